use clinic_core::db::{open_db, open_db_in_memory};
use clinic_core::model::billing::Charge;
use clinic_core::model::budget::{Budget, TreatmentPlanItem};
use clinic_core::model::patient::Patient;
use clinic_core::model::staff::{User, UserRole};
use clinic_core::repo::sequence_repo::{current_period, parse_document_number};
use clinic_core::service::document_service::{DocumentServiceError, PlanLine};
use clinic_core::{
    AuditRepository, CancelToken, DocumentService, EntityId, EntityKind, SequenceKind,
    SequenceRepository, SqliteAuditRepository, SqliteSequenceRepository, StorageGateway,
    SystemIdentity, UnitOfWork, ValidationError,
};
use chrono::{TimeZone, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::thread;

fn amount(raw: &str) -> Decimal {
    Decimal::from_str(raw).unwrap()
}

fn seed_patient(conn: &Connection) -> EntityId {
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(conn, &identity).unwrap();
    let staged = uow.set::<Patient>().add(Patient::new("Lucia Ramos")).unwrap();
    uow.commit().unwrap();
    uow.assigned_id(staged).unwrap()
}

fn line(description: &str, tooth: Option<&str>, price: &str) -> PlanLine {
    PlanLine {
        description: description.to_string(),
        tooth: tooth.map(str::to_string),
        price: amount(price),
    }
}

#[test]
fn numbers_are_issued_in_order() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSequenceRepository::try_new(&conn).unwrap();

    let issued: Vec<String> = (0..3)
        .map(|_| repo.next_number(SequenceKind::Budget, 2025).unwrap())
        .collect();
    assert_eq!(issued, vec!["2025-0001", "2025-0002", "2025-0003"]);
    assert_eq!(repo.current_value(SequenceKind::Budget, 2025).unwrap(), 3);
}

#[test]
fn sequence_continues_after_existing_numbers() {
    let conn = open_db_in_memory().unwrap();
    let patient_id = seed_patient(&conn);
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();
    for number in ["2025-0007", "2025-0042", "2024-0100"] {
        let mut budget = Budget::draft(
            patient_id,
            Utc.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap(),
            amount("10.00"),
        );
        budget.number = number.to_string();
        uow.set::<Budget>().add(budget).unwrap();
    }
    uow.commit().unwrap();

    let repo = SqliteSequenceRepository::try_new(&conn).unwrap();
    assert_eq!(repo.current_value(SequenceKind::Budget, 2025).unwrap(), 42);
    assert_eq!(
        repo.next_number(SequenceKind::Budget, 2025).unwrap(),
        "2025-0043"
    );
    assert_eq!(
        repo.next_number(SequenceKind::Budget, 2024).unwrap(),
        "2024-0101"
    );
    assert_eq!(
        repo.next_number(SequenceKind::Invoice, 2025).unwrap(),
        "2025-0001"
    );
}

#[test]
fn concurrent_connections_never_share_a_number() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clinic.sqlite3");
    {
        let conn = open_db(&path).unwrap();
        let repo = SqliteSequenceRepository::try_new(&conn).unwrap();
        for _ in 0..5 {
            repo.next_value(SequenceKind::Budget, 2025).unwrap();
        }
    }

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let path = path.clone();
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let repo = SqliteSequenceRepository::try_new(&conn).unwrap();
                (0..10)
                    .map(|_| repo.next_value(SequenceKind::Budget, 2025).unwrap())
                    .collect::<Vec<i64>>()
            })
        })
        .collect();

    let mut seen = BTreeSet::new();
    for worker in workers {
        for value in worker.join().unwrap() {
            assert!(value > 5);
            assert!(seen.insert(value), "value {value} issued twice");
        }
    }
    assert_eq!(seen.len(), 40);
}

#[test]
fn budget_numbers_use_the_current_year() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteSequenceRepository::try_new(&conn).unwrap();
    let number = repo.next_budget_number().unwrap();
    assert_eq!(parse_document_number(&number), Some((current_period(), 1)));
}

#[test]
fn issue_budget_commits_numbered_budget_with_items() {
    let conn = open_db_in_memory().unwrap();
    let patient_id = seed_patient(&conn);
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();
    let service = DocumentService::new(SqliteSequenceRepository::try_new(&conn).unwrap());

    let issued = service
        .issue_budget(
            &mut uow,
            patient_id,
            Utc.with_ymd_and_hms(2025, 4, 1, 10, 0, 0).unwrap(),
            vec![
                line("Composite filling", Some("16"), "85.00"),
                line("Cleaning", None, "40.50"),
            ],
        )
        .unwrap();

    let budget_id = issued.budget.id.unwrap();
    assert_eq!(issued.budget.total, amount("125.50"));
    assert_eq!(
        parse_document_number(&issued.budget.number),
        Some((current_period(), 1))
    );
    assert!(issued
        .items
        .iter()
        .all(|item| item.id.is_some() && item.budget_id == budget_id));

    let stored = uow.set::<Budget>().get_by_id(budget_id).unwrap().unwrap();
    assert_eq!(stored, issued.budget);
    let items = uow
        .set::<TreatmentPlanItem>()
        .find(&|item| item.budget_id == budget_id)
        .unwrap();
    assert_eq!(items.len(), 2);

    let second = service
        .issue_budget(
            &mut uow,
            patient_id,
            Utc.with_ymd_and_hms(2025, 4, 2, 10, 0, 0).unwrap(),
            vec![line("Extraction", Some("38"), "120.00")],
        )
        .unwrap();
    assert_eq!(
        parse_document_number(&second.budget.number),
        Some((current_period(), 2))
    );
}

#[test]
fn invalid_plan_line_issues_nothing() {
    let conn = open_db_in_memory().unwrap();
    let patient_id = seed_patient(&conn);
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();
    let repo = SqliteSequenceRepository::try_new(&conn).unwrap();
    let service = DocumentService::new(SqliteSequenceRepository::try_new(&conn).unwrap());

    let result = service.issue_budget(
        &mut uow,
        patient_id,
        Utc.with_ymd_and_hms(2025, 4, 1, 10, 0, 0).unwrap(),
        vec![line("   ", None, "10.00")],
    );
    assert!(matches!(result, Err(DocumentServiceError::Invalid(_))));
    assert!(uow.set::<Budget>().get_all().unwrap().is_empty());
    assert_eq!(
        repo.current_value(SequenceKind::Budget, current_period())
            .unwrap(),
        0
    );
}

#[test]
fn oversized_plan_is_rejected_before_numbering() {
    let conn = open_db_in_memory().unwrap();
    let patient_id = seed_patient(&conn);
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();
    let repo = SqliteSequenceRepository::try_new(&conn).unwrap();
    let service = DocumentService::new(SqliteSequenceRepository::try_new(&conn).unwrap());
    let issued_at = Utc.with_ymd_and_hms(2025, 4, 1, 10, 0, 0).unwrap();

    let price = |value: Decimal| PlanLine {
        description: "Implant".to_string(),
        tooth: None,
        price: value,
    };

    let unrepresentable = service.issue_budget(
        &mut uow,
        patient_id,
        issued_at,
        vec![price(Decimal::MAX), price(Decimal::MAX)],
    );
    assert!(matches!(
        unrepresentable,
        Err(DocumentServiceError::Invalid(
            ValidationError::AmountOutOfRange { .. }
        ))
    ));

    let half = Decimal::from(50_000_000_000_000_000i64);
    let overflowing_total =
        service.issue_budget(&mut uow, patient_id, issued_at, vec![price(half), price(half)]);
    assert!(matches!(
        overflowing_total,
        Err(DocumentServiceError::Invalid(
            ValidationError::AmountOutOfRange { field: "total" }
        ))
    ));

    assert_eq!(uow.pending_count(), 0);
    assert!(uow.set::<Budget>().get_all().unwrap().is_empty());
    assert_eq!(
        repo.current_value(SequenceKind::Budget, current_period())
            .unwrap(),
        0
    );
}

#[test]
fn failed_item_insert_commits_nothing() {
    let conn = open_db_in_memory().unwrap();
    let patient_id = seed_patient(&conn);
    conn.execute_batch(
        "CREATE TRIGGER plan_items_locked
         BEFORE INSERT ON treatment_plan_items
         BEGIN
             SELECT RAISE(ABORT, 'plan items locked');
         END;",
    )
    .unwrap();
    let audit_rows_before: i64 = conn
        .query_row("SELECT COUNT(*) FROM audit_entries;", [], |row| row.get(0))
        .unwrap();

    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();
    let repo = SqliteSequenceRepository::try_new(&conn).unwrap();
    let service = DocumentService::new(SqliteSequenceRepository::try_new(&conn).unwrap());
    let result = service.issue_budget(
        &mut uow,
        patient_id,
        Utc.with_ymd_and_hms(2025, 4, 1, 10, 0, 0).unwrap(),
        vec![line("Crown", Some("21"), "300.00")],
    );
    assert!(matches!(result, Err(DocumentServiceError::Repo(_))));
    assert_eq!(uow.pending_count(), 0);

    let budget_rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM budgets;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(budget_rows, 0);

    let audit = SqliteAuditRepository::try_new(&conn).unwrap();
    let history = audit
        .history_for(EntityKind::Budget, 1, &CancelToken::never())
        .unwrap();
    assert!(history.is_empty());
    let audit_rows_after: i64 = conn
        .query_row("SELECT COUNT(*) FROM audit_entries;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(audit_rows_after, audit_rows_before);

    // The reserved number is not reused.
    assert_eq!(
        repo.current_value(SequenceKind::Budget, current_period())
            .unwrap(),
        1
    );
}

#[test]
fn invoiced_charges_receive_distinct_invoice_numbers() {
    let conn = open_db_in_memory().unwrap();
    let patient_id = seed_patient(&conn);
    let identity = SystemIdentity;
    let mut uow = UnitOfWork::try_new(&conn, &identity).unwrap();
    let clinician = uow
        .set::<User>()
        .add(User::new("dr.vega", "Dr. Vega", UserRole::Clinician))
        .unwrap();
    uow.commit().unwrap();
    let clinician_id = uow.assigned_id(clinician).unwrap();
    let service = DocumentService::new(SqliteSequenceRepository::try_new(&conn).unwrap());

    let visit = Utc.with_ymd_and_hms(2025, 4, 1, 10, 0, 0).unwrap();
    let first = service
        .record_invoiced_charge(
            &mut uow,
            Charge::new(patient_id, clinician_id, visit, "Checkup", amount("30.00")),
        )
        .unwrap();
    let second = service
        .record_invoiced_charge(
            &mut uow,
            Charge::new(patient_id, clinician_id, visit, "X-ray", amount("45.00")),
        )
        .unwrap();

    let first_number = first.invoice_number.clone().unwrap();
    let second_number = second.invoice_number.clone().unwrap();
    assert_eq!(
        parse_document_number(&first_number),
        Some((current_period(), 1))
    );
    assert_eq!(
        parse_document_number(&second_number),
        Some((current_period(), 2))
    );

    let stored = uow
        .set::<Charge>()
        .get_by_id(second.id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(stored.invoice_number, Some(second_number));
}
