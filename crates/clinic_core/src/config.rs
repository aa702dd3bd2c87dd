//! Core runtime configuration.
//!
//! # Responsibility
//! - Describe the knobs the persistence core needs at startup.
//! - Parse a settings document handed over by the settings layer and apply
//!   `CLINIC_*` environment overrides on top.
//!
//! # Invariants
//! - Reading the settings file is the caller's job; this module only parses.
//! - A loaded config always has a non-empty system actor and a known log level.

use crate::audit::AuditCommitMode;
use crate::logging::normalize_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

const DEFAULT_DB_FILE_NAME: &str = "clinic.sqlite3";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_SYSTEM_ACTOR: &str = "system";

/// Errors raised while building a [`CoreConfig`].
#[derive(Debug)]
pub enum ConfigError {
    /// Settings document is not valid JSON for this shape.
    Parse(serde_json::Error),
    /// A key carries a value outside its accepted range.
    InvalidValue { key: &'static str, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid core settings: {err}"),
            Self::InvalidValue { key, value } => {
                write!(f, "invalid value `{value}` for `{key}`")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::InvalidValue { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Startup configuration for the persistence core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// SQLite database file.
    pub database_path: PathBuf,
    /// One of `trace|debug|info|warn|error`.
    pub log_level: String,
    /// Absolute directory for rolling log files. `None` keeps logging off.
    pub log_dir: Option<PathBuf>,
    /// How long a writer waits for SQLite's lock before failing.
    pub busy_timeout_ms: u64,
    /// Whether audit rows share the business transaction.
    pub audit_commit_mode: AuditCommitMode,
    /// Actor recorded on audit entries when nobody is signed in.
    pub system_actor: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DB_FILE_NAME),
            log_level: crate::logging::default_log_level().to_string(),
            log_dir: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            audit_commit_mode: AuditCommitMode::default(),
            system_actor: DEFAULT_SYSTEM_ACTOR.to_string(),
        }
    }
}

impl CoreConfig {
    /// Builds a config from defaults plus `CLINIC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a JSON settings document; missing keys keep their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides using `lookup` to resolve variable names.
    ///
    /// Recognised keys: `CLINIC_DB_PATH`, `CLINIC_LOG_LEVEL`, `CLINIC_LOG_DIR`,
    /// `CLINIC_BUSY_TIMEOUT_MS`, `CLINIC_AUDIT_MODE`, `CLINIC_SYSTEM_ACTOR`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("CLINIC_DB_PATH") {
            self.database_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("CLINIC_LOG_LEVEL") {
            self.log_level = value;
        }
        if let Some(value) = lookup("CLINIC_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("CLINIC_BUSY_TIMEOUT_MS") {
            self.busy_timeout_ms =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "CLINIC_BUSY_TIMEOUT_MS",
                        value: value.clone(),
                    })?;
        }
        if let Some(value) = lookup("CLINIC_AUDIT_MODE") {
            self.audit_commit_mode =
                AuditCommitMode::parse(&value).ok_or_else(|| ConfigError::InvalidValue {
                    key: "CLINIC_AUDIT_MODE",
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup("CLINIC_SYSTEM_ACTOR") {
            self.system_actor = value;
        }
        Ok(())
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if normalize_level(&self.log_level).is_err() {
            return Err(ConfigError::InvalidValue {
                key: "log_level",
                value: self.log_level.clone(),
            });
        }
        if self.system_actor.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "system_actor",
                value: self.system_actor.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig};
    use crate::audit::AuditCommitMode;
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[test]
    fn json_settings_keep_defaults_for_missing_keys() {
        let config = CoreConfig::from_json_str(
            r#"{ "database_path": "/data/clinic.db", "audit_commit_mode": "two_phase" }"#,
        )
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/data/clinic.db"));
        assert_eq!(config.audit_commit_mode, AuditCommitMode::TwoPhase);
        assert_eq!(config.system_actor, "system");
        assert_eq!(config.busy_timeout_ms, 5_000);
    }

    #[test]
    fn env_overrides_replace_defaults() {
        let vars: HashMap<&str, &str> = [
            ("CLINIC_DB_PATH", "/tmp/other.db"),
            ("CLINIC_BUSY_TIMEOUT_MS", "250"),
            ("CLINIC_AUDIT_MODE", "atomic"),
            ("CLINIC_SYSTEM_ACTOR", "scheduler"),
        ]
        .into_iter()
        .collect();

        let mut config = CoreConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|value| value.to_string()))
            .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(config.audit_commit_mode, AuditCommitMode::Atomic);
        assert_eq!(config.system_actor, "scheduler");
    }

    #[test]
    fn bad_timeout_override_is_rejected() {
        let mut config = CoreConfig::default();
        let err = config
            .apply_overrides(|key| (key == "CLINIC_BUSY_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CLINIC_BUSY_TIMEOUT_MS",
                ..
            }
        ));
    }

    #[test]
    fn blank_system_actor_fails_validation() {
        let err = CoreConfig::from_json_str(r#"{ "system_actor": "  " }"#).unwrap_err();
        assert!(err.to_string().contains("system_actor"));
    }
}
