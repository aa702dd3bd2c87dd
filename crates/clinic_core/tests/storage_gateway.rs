use clinic_core::db::open_db_in_memory;
use clinic_core::model::audit::AuditAction;
use clinic_core::model::billing::{Allocation, Charge, ChargeLineItem, Payment, PaymentMethod};
use clinic_core::model::budget::{Budget, TreatmentPlanItem};
use clinic_core::model::document::LinkedDocument;
use clinic_core::model::patient::Patient;
use clinic_core::model::staff::{User, UserRole};
use clinic_core::{
    AuditRepository, CancelToken, EntityId, EntityKind, LedgerRepository, RepoError,
    SqliteAuditRepository, SqliteLedgerRepository, StorageGateway, SystemIdentity, UnitOfWork,
};
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

fn amount(raw: &str) -> Decimal {
    Decimal::from_str(raw).unwrap()
}

#[test]
fn add_commit_and_read_back() {
    let conn = open_db_in_memory().unwrap();
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();

    let mut patient = Patient::new("Marta Gil");
    patient.birth_date = chrono::NaiveDate::from_ymd_opt(1988, 4, 2);
    let staged = uow.set::<Patient>().add(patient.clone()).unwrap();
    assert_eq!(uow.assigned_id(staged), None);

    assert_eq!(uow.commit().unwrap(), 1);
    let id = uow.assigned_id(staged).unwrap();

    let stored = uow.set::<Patient>().get_by_id(id).unwrap().unwrap();
    patient.id = Some(id);
    assert_eq!(stored, patient);
}

#[test]
fn reads_see_committed_state_only() {
    let conn = open_db_in_memory().unwrap();
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();

    uow.set::<Patient>().add(Patient::new("Marta Gil")).unwrap();
    assert!(uow.set::<Patient>().get_all().unwrap().is_empty());

    uow.commit().unwrap();
    assert_eq!(uow.set::<Patient>().get_all().unwrap().len(), 1);
}

#[test]
fn find_filters_committed_rows() {
    let conn = open_db_in_memory().unwrap();
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();

    uow.set::<User>()
        .add_range(vec![
            User::new("dr.lopez", "Dra. Lopez", UserRole::Clinician),
            User::new("desk", "Front desk", UserRole::Reception),
            User::new("dr.soto", "Dr. Soto", UserRole::Clinician),
        ])
        .unwrap();
    assert_eq!(uow.commit().unwrap(), 3);

    let clinicians = uow
        .set::<User>()
        .find(&|user: &User| user.role == UserRole::Clinician)
        .unwrap();
    let names: Vec<&str> = clinicians.iter().map(|user| user.username.as_str()).collect();
    assert_eq!(names, vec!["dr.lopez", "dr.soto"]);
}

#[test]
fn charge_line_items_and_amounts_survive_storage() {
    let conn = open_db_in_memory().unwrap();
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();

    let patient = uow.set::<Patient>().add(Patient::new("Marta Gil")).unwrap();
    let clinician = uow
        .set::<User>()
        .add(User::new("dr.lopez", "Dra. Lopez", UserRole::Clinician))
        .unwrap();
    uow.commit().unwrap();

    let visit_at = Utc.with_ymd_and_hms(2025, 2, 14, 10, 30, 0).unwrap();
    let mut charge = Charge::new(
        uow.assigned_id(patient).unwrap(),
        uow.assigned_id(clinician).unwrap(),
        visit_at,
        "Cleaning and sealant",
        amount("85.50"),
    );
    charge.line_items = vec![
        ChargeLineItem {
            description: "Cleaning".to_string(),
            quantity: 1,
            unit_price: amount("45.50"),
        },
        ChargeLineItem {
            description: "Sealant".to_string(),
            quantity: 2,
            unit_price: amount("20.00"),
        },
    ];
    let staged = uow.set::<Charge>().add(charge.clone()).unwrap();
    uow.commit().unwrap();

    let id = uow.assigned_id(staged).unwrap();
    let stored = uow
        .set::<Charge>()
        .get_by_id(id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.total_cost, amount("85.50"));
    assert_eq!(stored.visit_at, visit_at);
    assert_eq!(stored.line_items, charge.line_items);
}

#[test]
fn update_and_remove_require_an_existing_row() {
    let conn = open_db_in_memory().unwrap();
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();

    let mut ghost = Patient::new("Nobody");
    ghost.id = Some(77);
    assert!(matches!(
        uow.set::<Patient>().update(&ghost),
        Err(RepoError::NotFound { id: 77, .. })
    ));
    assert!(matches!(
        uow.set::<Patient>().remove(77),
        Err(RepoError::NotFound { id: 77, .. })
    ));
    assert!(matches!(
        uow.set::<Patient>().update(&Patient::new("Unsaved")),
        Err(RepoError::Unsaved(_))
    ));
    assert_eq!(uow.pending_count(), 0);
}

#[test]
fn remove_range_deletes_every_row() {
    let conn = open_db_in_memory().unwrap();
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();

    let tickets = uow
        .set::<Patient>()
        .add_range(vec![Patient::new("A"), Patient::new("B"), Patient::new("C")])
        .unwrap();
    uow.commit().unwrap();

    let ids: Vec<i64> = tickets
        .iter()
        .map(|ticket| uow.assigned_id(*ticket).unwrap())
        .collect();
    uow.set::<Patient>().remove_range(&ids[..2]).unwrap();
    assert_eq!(uow.commit().unwrap(), 2);

    let remaining = uow.set::<Patient>().get_all().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, Some(ids[2]));
}

#[test]
fn unique_violation_rolls_back_the_whole_commit() {
    let conn = open_db_in_memory().unwrap();
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();

    uow.set::<User>()
        .add(User::new("desk", "Front desk", UserRole::Reception))
        .unwrap();
    uow.commit().unwrap();

    uow.set::<Patient>().add(Patient::new("Marta Gil")).unwrap();
    uow.set::<User>()
        .add(User::new("desk", "Second desk", UserRole::Reception))
        .unwrap();
    let err = uow.commit().unwrap_err();

    assert!(matches!(err, RepoError::ConstraintViolation(_)));
    assert!(uow.set::<Patient>().get_all().unwrap().is_empty());
    assert_eq!(uow.set::<User>().get_all().unwrap().len(), 1);
}

#[test]
fn row_deleted_after_staging_fails_the_commit() {
    let conn = open_db_in_memory().unwrap();
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();

    let staged = uow
        .set::<LinkedDocument>()
        .add(LinkedDocument {
            id: None,
            patient_id: 0,
            title: "X-ray".to_string(),
            file_path: "/scans/xray.png".to_string(),
            linked_at: Utc::now(),
        })
        .unwrap();
    // No patient 0: the insert itself breaks the foreign key.
    assert!(matches!(uow.commit(), Err(RepoError::ConstraintViolation(_))));
    assert_eq!(uow.assigned_id(staged), None);

    uow.set::<Patient>().add(Patient::new("Marta Gil")).unwrap();
    uow.commit().unwrap();
    let mut patient = uow.set::<Patient>().get_all().unwrap().remove(0);

    patient.phone = Some("555-0102".to_string());
    uow.set::<Patient>().update(&patient).unwrap();
    conn.execute("DELETE FROM patients WHERE id = ?1;", [patient.id.unwrap()])
        .unwrap();

    assert!(matches!(uow.commit(), Err(RepoError::NotFound { .. })));
}

#[test]
fn invalid_amount_is_rejected_before_staging() {
    let conn = open_db_in_memory().unwrap();
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();

    let charge = Charge::new(1, 1, Utc::now(), "Extraction", amount("10.005"));
    assert!(matches!(
        uow.set::<Charge>().add(charge),
        Err(RepoError::Validation(_))
    ));
    assert_eq!(uow.pending_count(), 0);
}

struct LedgerRows {
    charge_id: EntityId,
    payment_id: EntityId,
    allocation_id: EntityId,
}

fn seed_ledger(conn: &rusqlite::Connection) -> LedgerRows {
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(conn, &identity).unwrap();
    let patient = uow.set::<Patient>().add(Patient::new("Marta Gil")).unwrap();
    let clinician = uow
        .set::<User>()
        .add(User::new("dr.lopez", "Dra. Lopez", UserRole::Clinician))
        .unwrap();
    uow.commit().unwrap();
    let patient_id = uow.assigned_id(patient).unwrap();
    let clinician_id = uow.assigned_id(clinician).unwrap();

    let visit_at = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
    let charge = uow
        .set::<Charge>()
        .add(Charge::new(
            patient_id,
            clinician_id,
            visit_at,
            "Extraction",
            amount("100.00"),
        ))
        .unwrap();
    let payment = uow
        .set::<Payment>()
        .add(Payment::new(
            patient_id,
            visit_at,
            amount("60.00"),
            PaymentMethod::Cash,
        ))
        .unwrap();
    uow.commit().unwrap();
    let charge_id = uow.assigned_id(charge).unwrap();
    let payment_id = uow.assigned_id(payment).unwrap();

    let ledger = SqliteLedgerRepository::try_new(conn, &identity).unwrap();
    let allocation = ledger.allocate(payment_id, charge_id, amount("60.00")).unwrap();
    LedgerRows {
        charge_id,
        payment_id,
        allocation_id: allocation.id.unwrap(),
    }
}

fn assert_forbidden(result: Result<(), RepoError>, kind: EntityKind, action: AuditAction) {
    match result {
        Err(RepoError::GatewayForbidden {
            kind: rejected_kind,
            action: rejected_action,
        }) => {
            assert_eq!(rejected_kind, kind);
            assert_eq!(rejected_action, action);
        }
        other => panic!("expected {action:?} of {kind} to be refused, got {other:?}"),
    }
}

#[test]
fn recorded_payments_cannot_be_edited() {
    let conn = open_db_in_memory().unwrap();
    let rows = seed_ledger(&conn);
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();

    let mut payment = uow
        .set::<Payment>()
        .get_by_id(rows.payment_id)
        .unwrap()
        .unwrap();
    payment.amount = amount("5.00");
    assert_forbidden(
        uow.set::<Payment>().update(&payment),
        EntityKind::Payment,
        AuditAction::Update,
    );
    assert_eq!(uow.pending_count(), 0);
    assert_eq!(uow.commit().unwrap(), 0);

    let stored = uow
        .set::<Payment>()
        .get_by_id(rows.payment_id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.amount, amount("60.00"));
}

#[test]
fn ledger_rows_cannot_be_removed_through_the_gateway() {
    let conn = open_db_in_memory().unwrap();
    let rows = seed_ledger(&conn);
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();

    assert_forbidden(
        uow.set::<Charge>().remove(rows.charge_id),
        EntityKind::ClinicalEntry,
        AuditAction::Delete,
    );
    assert_forbidden(
        uow.set::<Charge>().remove_range(&[rows.charge_id]),
        EntityKind::ClinicalEntry,
        AuditAction::Delete,
    );
    assert_forbidden(
        uow.set::<Payment>().remove(rows.payment_id),
        EntityKind::Payment,
        AuditAction::Delete,
    );
    assert_forbidden(
        uow.set::<Allocation>().remove(rows.allocation_id),
        EntityKind::Allocation,
        AuditAction::Delete,
    );
    assert_eq!(uow.pending_count(), 0);

    let ledger = SqliteLedgerRepository::try_new(&conn, &identity).unwrap();
    assert_eq!(
        ledger.allocations_for_charge(rows.charge_id).unwrap().len(),
        1
    );
    assert!(ledger
        .delete_charge_with_allocations(rows.charge_id)
        .unwrap()
        .is_deleted());
}

#[test]
fn charges_can_still_be_corrected() {
    let conn = open_db_in_memory().unwrap();
    let rows = seed_ledger(&conn);
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();

    let mut charge = uow
        .set::<Charge>()
        .get_by_id(rows.charge_id)
        .unwrap()
        .unwrap();
    charge.description = "Surgical extraction".to_string();
    uow.set::<Charge>().update(&charge).unwrap();
    assert_eq!(uow.commit().unwrap(), 1);
}

#[test]
fn linked_rows_commit_with_their_parent() {
    let conn = open_db_in_memory().unwrap();
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();
    let patient = uow.set::<Patient>().add(Patient::new("Marta Gil")).unwrap();
    uow.commit().unwrap();
    let patient_id = uow.assigned_id(patient).unwrap();

    let mut budget = Budget::draft(
        patient_id,
        Utc.with_ymd_and_hms(2025, 4, 1, 10, 0, 0).unwrap(),
        amount("85.00"),
    );
    budget.number = "2025-0001".to_string();
    let budget_ticket = uow.set::<Budget>().add(budget).unwrap();
    let item_ticket = uow
        .set::<TreatmentPlanItem>()
        .add_linked(
            TreatmentPlanItem::new(0, "Composite filling", amount("85.00")),
            "budget_id",
            budget_ticket,
        )
        .unwrap();
    assert_eq!(uow.commit().unwrap(), 2);

    let budget_id = uow.assigned_id(budget_ticket).unwrap();
    let item_id = uow.assigned_id(item_ticket).unwrap();
    let item = uow
        .set::<TreatmentPlanItem>()
        .get_by_id(item_id)
        .unwrap()
        .unwrap();
    assert_eq!(item.budget_id, budget_id);

    let audit = SqliteAuditRepository::try_new(&conn).unwrap();
    let history = audit
        .history_for(EntityKind::TreatmentPlanItem, item_id, &CancelToken::never())
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].diff_json().unwrap()["budget_id"], budget_id);
}

#[test]
fn link_to_a_discarded_parent_fails_the_commit() {
    let conn = open_db_in_memory().unwrap();
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();
    let patient = uow.set::<Patient>().add(Patient::new("Marta Gil")).unwrap();
    uow.commit().unwrap();
    let patient_id = uow.assigned_id(patient).unwrap();

    let mut budget = Budget::draft(
        patient_id,
        Utc.with_ymd_and_hms(2025, 4, 1, 10, 0, 0).unwrap(),
        amount("85.00"),
    );
    budget.number = "2025-0001".to_string();
    let dropped = uow.set::<Budget>().add(budget).unwrap();
    assert_eq!(uow.discard(), 1);

    let orphan = uow
        .set::<TreatmentPlanItem>()
        .add_linked(
            TreatmentPlanItem::new(0, "Composite filling", amount("85.00")),
            "budget_id",
            dropped,
        )
        .unwrap();
    assert!(matches!(uow.commit(), Err(RepoError::InvalidData(_))));
    assert_eq!(uow.assigned_id(orphan), None);
    assert!(uow.set::<TreatmentPlanItem>().get_all().unwrap().is_empty());
}
