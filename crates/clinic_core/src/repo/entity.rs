//! Row mapping between domain records and their SQLite tables.
//!
//! # Invariants
//! - `COLUMNS` lists every non-id column in bind order; `encode` returns
//!   values in the same order.
//! - Money is bound as integer minor units, timestamps as epoch ms.
//! - Decoding rejects values the domain model cannot represent instead of
//!   masking them.

use super::{RepoError, RepoResult};
use crate::model::billing::{Allocation, Charge, ChargeLineItem, Payment, PaymentMethod};
use crate::model::budget::{Budget, BudgetStatus, TreatmentPlanItem};
use crate::model::document::LinkedDocument;
use crate::model::kind::EntityKind;
use crate::model::money::{from_minor_units, to_minor_units};
use crate::model::patient::Patient;
use crate::model::staff::{User, UserRole};
use crate::model::timestamp::from_epoch_millis;
use crate::model::{EntityId, ValidationError};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, Value};
use rusqlite::Row;
use serde::Serialize;

/// A record persisted through the storage gateway.
pub trait Entity: Serialize + Clone {
    const KIND: EntityKind;
    /// Non-id columns, in `encode` order.
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> Option<EntityId>;
    fn set_id(&mut self, id: EntityId);
    fn validate(&self) -> Result<(), ValidationError>;
    /// Bind values for `COLUMNS`.
    fn encode(&self) -> RepoResult<Vec<Value>>;
    fn decode(columns: &RowColumns<'_, '_>) -> RepoResult<Self>;

    fn from_row(row: &Row<'_>) -> RepoResult<Self> {
        Self::decode(&RowColumns::new(row))
    }
}

/// Named column access with an optional alias prefix, for joined rows.
pub struct RowColumns<'r, 's> {
    row: &'r Row<'s>,
    prefix: &'static str,
}

impl<'r, 's> RowColumns<'r, 's> {
    pub fn new(row: &'r Row<'s>) -> Self {
        Self { row, prefix: "" }
    }

    pub fn prefixed(row: &'r Row<'s>, prefix: &'static str) -> Self {
        Self { row, prefix }
    }

    pub fn get<V: FromSql>(&self, name: &str) -> RepoResult<V> {
        let value = if self.prefix.is_empty() {
            self.row.get(name)?
        } else {
            self.row.get(format!("{}{name}", self.prefix).as_str())?
        };
        Ok(value)
    }

    fn amount(&self, name: &str) -> RepoResult<rust_decimal::Decimal> {
        Ok(from_minor_units(self.get::<i64>(name)?))
    }

    fn timestamp(&self, name: &str) -> RepoResult<DateTime<Utc>> {
        let millis: i64 = self.get(name)?;
        from_epoch_millis(millis).ok_or_else(|| {
            RepoError::InvalidData(format!("timestamp `{millis}` out of range in `{name}`"))
        })
    }

    fn flag(&self, name: &str) -> RepoResult<bool> {
        match self.get::<i64>(name)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(RepoError::InvalidData(format!(
                "invalid boolean `{other}` in `{name}`"
            ))),
        }
    }

    fn date(&self, name: &str) -> RepoResult<Option<NaiveDate>> {
        self.get::<Option<String>>(name)?
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
                    RepoError::InvalidData(format!("invalid date `{raw}` in `{name}`"))
                })
            })
            .transpose()
    }

    fn tag<T>(&self, name: &str, parse: fn(&str) -> Option<T>) -> RepoResult<T> {
        let raw: String = self.get(name)?;
        parse(&raw).ok_or_else(|| RepoError::InvalidData(format!("invalid value `{raw}` in `{name}`")))
    }
}

/// `SELECT id, <columns> FROM <table>`.
pub(crate) fn select_sql<T: Entity>() -> String {
    format!(
        "SELECT id, {} FROM {}",
        T::COLUMNS.join(", "),
        T::KIND.table()
    )
}

/// `alias.id AS <prefix>id, alias.col AS <prefix>col, ...` for joined reads.
pub(crate) fn aliased_columns<T: Entity>(alias: &str, prefix: &str) -> String {
    std::iter::once("id")
        .chain(T::COLUMNS.iter().copied())
        .map(|column| format!("{alias}.{column} AS {prefix}{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn minor(field: &'static str, amount: rust_decimal::Decimal) -> RepoResult<Value> {
    Ok(Value::Integer(to_minor_units(field, amount)?))
}

fn millis(value: DateTime<Utc>) -> Value {
    Value::Integer(value.timestamp_millis())
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn opt_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, text)
}

fn flag(value: bool) -> Value {
    Value::Integer(i64::from(value))
}

impl Entity for Patient {
    const KIND: EntityKind = EntityKind::Patient;
    const COLUMNS: &'static [&'static str] =
        &["full_name", "national_id", "phone", "birth_date", "notes"];

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Patient::validate(self)
    }

    fn encode(&self) -> RepoResult<Vec<Value>> {
        Ok(vec![
            text(&self.full_name),
            opt_text(self.national_id.as_deref()),
            opt_text(self.phone.as_deref()),
            self.birth_date
                .map_or(Value::Null, |date| Value::Text(date.format("%Y-%m-%d").to_string())),
            opt_text(self.notes.as_deref()),
        ])
    }

    fn decode(columns: &RowColumns<'_, '_>) -> RepoResult<Self> {
        Ok(Self {
            id: Some(columns.get("id")?),
            full_name: columns.get("full_name")?,
            national_id: columns.get("national_id")?,
            phone: columns.get("phone")?,
            birth_date: columns.date("birth_date")?,
            notes: columns.get("notes")?,
        })
    }
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;
    const COLUMNS: &'static [&'static str] = &["username", "display_name", "role", "is_active"];

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        User::validate(self)
    }

    fn encode(&self) -> RepoResult<Vec<Value>> {
        Ok(vec![
            text(&self.username),
            text(&self.display_name),
            text(self.role.as_str()),
            flag(self.is_active),
        ])
    }

    fn decode(columns: &RowColumns<'_, '_>) -> RepoResult<Self> {
        Ok(Self {
            id: Some(columns.get("id")?),
            username: columns.get("username")?,
            display_name: columns.get("display_name")?,
            role: columns.tag("role", UserRole::parse)?,
            is_active: columns.flag("is_active")?,
        })
    }
}

impl Entity for Charge {
    const KIND: EntityKind = EntityKind::ClinicalEntry;
    const COLUMNS: &'static [&'static str] = &[
        "patient_id",
        "clinician_id",
        "visit_at",
        "description",
        "total_cost_minor",
        "invoice_number",
        "line_items",
    ];

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Charge::validate(self)
    }

    fn encode(&self) -> RepoResult<Vec<Value>> {
        Ok(vec![
            Value::Integer(self.patient_id),
            Value::Integer(self.clinician_id),
            millis(self.visit_at),
            text(&self.description),
            minor("total_cost", self.total_cost)?,
            opt_text(self.invoice_number.as_deref()),
            Value::Text(serde_json::to_string(&self.line_items)?),
        ])
    }

    fn decode(columns: &RowColumns<'_, '_>) -> RepoResult<Self> {
        let raw_items: String = columns.get("line_items")?;
        let line_items: Vec<ChargeLineItem> = serde_json::from_str(&raw_items).map_err(|err| {
            RepoError::InvalidData(format!("invalid line items in clinical_entries: {err}"))
        })?;
        Ok(Self {
            id: Some(columns.get("id")?),
            patient_id: columns.get("patient_id")?,
            clinician_id: columns.get("clinician_id")?,
            visit_at: columns.timestamp("visit_at")?,
            description: columns.get("description")?,
            total_cost: columns.amount("total_cost_minor")?,
            invoice_number: columns.get("invoice_number")?,
            line_items,
        })
    }
}

impl Entity for Payment {
    const KIND: EntityKind = EntityKind::Payment;
    const COLUMNS: &'static [&'static str] = &["patient_id", "paid_at", "amount_minor", "method"];

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Payment::validate(self)
    }

    fn encode(&self) -> RepoResult<Vec<Value>> {
        Ok(vec![
            Value::Integer(self.patient_id),
            millis(self.paid_at),
            minor("amount", self.amount)?,
            text(self.method.as_str()),
        ])
    }

    fn decode(columns: &RowColumns<'_, '_>) -> RepoResult<Self> {
        Ok(Self {
            id: Some(columns.get("id")?),
            patient_id: columns.get("patient_id")?,
            paid_at: columns.timestamp("paid_at")?,
            amount: columns.amount("amount_minor")?,
            method: columns.tag("method", PaymentMethod::parse)?,
        })
    }
}

impl Entity for Allocation {
    const KIND: EntityKind = EntityKind::Allocation;
    const COLUMNS: &'static [&'static str] =
        &["payment_id", "charge_id", "amount_allocated_minor"];

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Allocation::validate(self)
    }

    fn encode(&self) -> RepoResult<Vec<Value>> {
        Ok(vec![
            Value::Integer(self.payment_id),
            Value::Integer(self.charge_id),
            minor("amount_allocated", self.amount_allocated)?,
        ])
    }

    fn decode(columns: &RowColumns<'_, '_>) -> RepoResult<Self> {
        Ok(Self {
            id: Some(columns.get("id")?),
            payment_id: columns.get("payment_id")?,
            charge_id: columns.get("charge_id")?,
            amount_allocated: columns.amount("amount_allocated_minor")?,
        })
    }
}

impl Entity for Budget {
    const KIND: EntityKind = EntityKind::Budget;
    const COLUMNS: &'static [&'static str] =
        &["number", "patient_id", "issued_at", "total_minor", "status"];

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Budget::validate(self)
    }

    fn encode(&self) -> RepoResult<Vec<Value>> {
        Ok(vec![
            text(&self.number),
            Value::Integer(self.patient_id),
            millis(self.issued_at),
            minor("total", self.total)?,
            text(self.status.as_str()),
        ])
    }

    fn decode(columns: &RowColumns<'_, '_>) -> RepoResult<Self> {
        Ok(Self {
            id: Some(columns.get("id")?),
            number: columns.get("number")?,
            patient_id: columns.get("patient_id")?,
            issued_at: columns.timestamp("issued_at")?,
            total: columns.amount("total_minor")?,
            status: columns.tag("status", BudgetStatus::parse)?,
        })
    }
}

impl Entity for TreatmentPlanItem {
    const KIND: EntityKind = EntityKind::TreatmentPlanItem;
    const COLUMNS: &'static [&'static str] =
        &["budget_id", "description", "tooth", "price_minor", "completed"];

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        TreatmentPlanItem::validate(self)
    }

    fn encode(&self) -> RepoResult<Vec<Value>> {
        Ok(vec![
            Value::Integer(self.budget_id),
            text(&self.description),
            opt_text(self.tooth.as_deref()),
            minor("price", self.price)?,
            flag(self.completed),
        ])
    }

    fn decode(columns: &RowColumns<'_, '_>) -> RepoResult<Self> {
        Ok(Self {
            id: Some(columns.get("id")?),
            budget_id: columns.get("budget_id")?,
            description: columns.get("description")?,
            tooth: columns.get("tooth")?,
            price: columns.amount("price_minor")?,
            completed: columns.flag("completed")?,
        })
    }
}

impl Entity for LinkedDocument {
    const KIND: EntityKind = EntityKind::LinkedDocument;
    const COLUMNS: &'static [&'static str] = &["patient_id", "title", "file_path", "linked_at"];

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        LinkedDocument::validate(self)
    }

    fn encode(&self) -> RepoResult<Vec<Value>> {
        Ok(vec![
            Value::Integer(self.patient_id),
            text(&self.title),
            text(&self.file_path),
            millis(self.linked_at),
        ])
    }

    fn decode(columns: &RowColumns<'_, '_>) -> RepoResult<Self> {
        Ok(Self {
            id: Some(columns.get("id")?),
            patient_id: columns.get("patient_id")?,
            title: columns.get("title")?,
            file_path: columns.get("file_path")?,
            linked_at: columns.timestamp("linked_at")?,
        })
    }
}
