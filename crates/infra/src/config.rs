//! Runtime configuration read from the environment.

use std::collections::HashMap;

use stockledger_observability::LogFormat;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 3;
const DEFAULT_CONFLICT_RETRIES: u32 = 3;
const DEFAULT_EXPIRY_WINDOW_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Postgres { database_url: String },
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Memory => "memory",
            Backend::Postgres { .. } => "postgres",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub backend: Backend,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// How many times a workflow step is re-decided after a version conflict.
    pub conflict_retries: u32,
    /// Look-ahead for expiring stock queries.
    pub expiry_window_days: u32,
    pub run_migrations: bool,
    pub log_format: LogFormat,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
            expiry_window_days: DEFAULT_EXPIRY_WINDOW_DAYS,
            run_migrations: true,
            log_format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} is required when STOCKLEDGER_BACKEND=postgres")]
    Missing { key: &'static str },

    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl LedgerConfig {
    /// Read from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Read through an arbitrary key lookup. Unset keys take their default;
    /// set but unparsable keys are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let backend = match lookup("STOCKLEDGER_BACKEND").as_deref().map(str::trim) {
            None | Some("") | Some("memory") => Backend::Memory,
            Some("postgres") => {
                let database_url = lookup("DATABASE_URL")
                    .filter(|url| !url.trim().is_empty())
                    .ok_or(ConfigError::Missing {
                        key: "DATABASE_URL",
                    })?;
                Backend::Postgres { database_url }
            }
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "STOCKLEDGER_BACKEND",
                    value: other.to_string(),
                    reason: "expected 'memory' or 'postgres'".to_string(),
                });
            }
        };

        let max_connections =
            parse_or(&lookup, "STOCKLEDGER_MAX_CONNECTIONS", defaults.max_connections)?;
        if max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "STOCKLEDGER_MAX_CONNECTIONS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let log_format = match lookup("STOCKLEDGER_LOG_FORMAT") {
            None => defaults.log_format,
            Some(raw) => raw.parse().map_err(|e: stockledger_observability::UnknownLogFormat| {
                ConfigError::Invalid {
                    key: "STOCKLEDGER_LOG_FORMAT",
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?,
        };

        Ok(Self {
            backend,
            max_connections,
            acquire_timeout_secs: parse_or(
                &lookup,
                "STOCKLEDGER_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout_secs,
            )?,
            conflict_retries: parse_or(
                &lookup,
                "STOCKLEDGER_CONFLICT_RETRIES",
                defaults.conflict_retries,
            )?,
            expiry_window_days: parse_or(
                &lookup,
                "STOCKLEDGER_EXPIRY_WINDOW_DAYS",
                defaults.expiry_window_days,
            )?,
            run_migrations: parse_or(
                &lookup,
                "STOCKLEDGER_RUN_MIGRATIONS",
                defaults.run_migrations,
            )?,
            log_format,
        })
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = LedgerConfig::from_map(&HashMap::new()).unwrap();
        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.backend.name(), "memory");
    }

    #[test]
    fn postgres_backend_needs_a_database_url() {
        let err = LedgerConfig::from_map(&test_vars(&[("STOCKLEDGER_BACKEND", "postgres")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::Missing { key: "DATABASE_URL" });

        let config = LedgerConfig::from_map(&test_vars(&[
            ("STOCKLEDGER_BACKEND", "postgres"),
            ("DATABASE_URL", "postgres://localhost/stock"),
            ("STOCKLEDGER_MAX_CONNECTIONS", "12"),
            ("STOCKLEDGER_RUN_MIGRATIONS", "false"),
            ("STOCKLEDGER_LOG_FORMAT", "compact"),
        ]))
        .unwrap();
        assert_eq!(
            config.backend,
            Backend::Postgres {
                database_url: "postgres://localhost/stock".to_string()
            }
        );
        assert_eq!(config.max_connections, 12);
        assert!(!config.run_migrations);
        assert_eq!(config.log_format, LogFormat::Compact);
    }

    #[test]
    fn bad_values_are_rejected_not_defaulted() {
        let err = LedgerConfig::from_map(&test_vars(&[("STOCKLEDGER_CONFLICT_RETRIES", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "STOCKLEDGER_CONFLICT_RETRIES",
                ..
            }
        ));

        let err = LedgerConfig::from_map(&test_vars(&[("STOCKLEDGER_BACKEND", "sqlite")]))
            .unwrap_err();
        assert!(err.to_string().contains("STOCKLEDGER_BACKEND"));

        assert!(
            LedgerConfig::from_map(&test_vars(&[("STOCKLEDGER_MAX_CONNECTIONS", "0")])).is_err()
        );
    }
}
