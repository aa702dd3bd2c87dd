use clinic_core::db::migrations::latest_version;
use clinic_core::db::{open_db, open_db_in_memory, open_db_with_config, DbError};
use clinic_core::CoreConfig;
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    for table in [
        "patients",
        "users",
        "clinical_entries",
        "payments",
        "allocations",
        "budgets",
        "treatment_plan_items",
        "linked_documents",
        "audit_entries",
        "sequence_counters",
    ] {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn foreign_keys_are_enforced() {
    let conn = open_db_in_memory().unwrap();
    let enabled: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(enabled, 1);

    let err = conn
        .execute(
            "INSERT INTO payments (patient_id, paid_at, amount_minor, method)
             VALUES (404, 0, 100, 'cash');",
            [],
        )
        .unwrap_err();
    assert!(err.to_string().contains("FOREIGN KEY"));
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clinic.sqlite3");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "audit_entries");
}

#[test]
fn open_with_config_uses_configured_path() {
    let dir = tempfile::tempdir().unwrap();
    let config = CoreConfig {
        database_path: dir.path().join("configured.sqlite3"),
        busy_timeout_ms: 250,
        ..CoreConfig::default()
    };

    let conn = open_db_with_config(&config).unwrap();
    assert_eq!(schema_version(&conn), latest_version());
    assert!(config.database_path.exists());
}

#[test]
fn out_of_range_busy_timeout_is_rejected_before_opening() {
    let dir = tempfile::tempdir().unwrap();
    for millis in [0, 600_001] {
        let config = CoreConfig {
            database_path: dir.path().join("never.sqlite3"),
            busy_timeout_ms: millis,
            ..CoreConfig::default()
        };

        match open_db_with_config(&config) {
            Err(DbError::InvalidBusyTimeout { millis: rejected }) => assert_eq!(rejected, millis),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("busy timeout {millis} ms was accepted"),
        }
        assert!(!config.database_path.exists());
    }
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite3");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
