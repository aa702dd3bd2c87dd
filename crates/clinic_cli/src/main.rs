//! CLI diagnostic entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `clinic_core` linkage against a
//!   real database file.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Configuration comes from `CLINIC_*` environment variables.

use clinic_core::{
    core_version, init_logging_from_config, open_db_with_config, AuditRepository, CancelToken,
    CoreConfig, DeleteOutcome, EntityKind, LedgerRepository, SequenceRepository,
    SqliteAuditRepository, SqliteLedgerRepository, SqliteSequenceRepository, SystemIdentity,
};
use log::{error, info};
use std::process::ExitCode;

const USAGE: &str = "usage: clinic_cli <version | balance <patient_id> | delete-charge <charge_id> | next-budget-number | audit <kind> <id>>";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> Result<(), String> {
    let command = args.first().map(String::as_str).unwrap_or("version");
    if command == "version" {
        println!("clinic_core version={}", core_version());
        return Ok(());
    }

    let config = CoreConfig::from_env().map_err(|err| err.to_string())?;
    init_logging_from_config(&config)?;
    let conn = open_db_with_config(&config).map_err(|err| err.to_string())?;
    info!("event=cli_command module=cli status=start command={command}");

    let result = match (command, &args[1..]) {
        ("balance", [patient_id]) => {
            let patient_id = parse_id(patient_id)?;
            let identity = SystemIdentity;
            let ledger = SqliteLedgerRepository::with_config(&conn, &identity, &config)
                .map_err(|err| err.to_string())?;
            let cancel = CancelToken::never();
            let charged = ledger
                .total_charged(patient_id, &cancel)
                .map_err(|err| err.to_string())?;
            let paid = ledger
                .total_paid(patient_id, &cancel)
                .map_err(|err| err.to_string())?;
            println!(
                "patient={patient_id} charged={charged} paid={paid} balance={}",
                charged - paid
            );
            Ok(())
        }
        ("delete-charge", [charge_id]) => {
            let charge_id = parse_id(charge_id)?;
            let identity = SystemIdentity;
            let ledger = SqliteLedgerRepository::with_config(&conn, &identity, &config)
                .map_err(|err| err.to_string())?;
            match ledger
                .delete_charge_with_allocations(charge_id)
                .map_err(|err| err.to_string())?
            {
                DeleteOutcome::Deleted {
                    allocations_removed,
                } => println!("charge={charge_id} deleted allocations_removed={allocations_removed}"),
                DeleteOutcome::NotFound => println!("charge={charge_id} not_found"),
            }
            Ok(())
        }
        ("next-budget-number", []) => {
            let sequences =
                SqliteSequenceRepository::try_new(&conn).map_err(|err| err.to_string())?;
            let number = sequences
                .next_budget_number()
                .map_err(|err| err.to_string())?;
            println!("budget_number={number}");
            Ok(())
        }
        ("audit", [kind, id]) => {
            let kind = EntityKind::parse(kind).ok_or_else(|| format!("unknown entity kind `{kind}`"))?;
            let id = parse_id(id)?;
            let audit = SqliteAuditRepository::try_new(&conn).map_err(|err| err.to_string())?;
            let entries = audit
                .history_for(kind, id, &CancelToken::never())
                .map_err(|err| err.to_string())?;
            for entry in entries {
                println!(
                    "{} {} {} {}",
                    entry.timestamp_utc.to_rfc3339(),
                    entry.actor,
                    entry.action.as_str(),
                    entry.diff
                );
            }
            Ok(())
        }
        _ => Err(USAGE.to_string()),
    };

    if let Err(message) = &result {
        error!("event=cli_command module=cli status=error command={command} error={message}");
    }
    result
}

fn parse_id(raw: &str) -> Result<i64, String> {
    raw.parse()
        .map_err(|_| format!("expected a numeric id, got `{raw}`"))
}
