//! Configuration types.
//!
//! All settings come from the environment and are read once at startup
//! into a value object passed by reference into the pipeline — no
//! process-wide mutable state.

use secrecy::SecretString;

use crate::error::ConfigError;

/// Mailbox connection settings.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    pub folder: String,
    pub username: String,
    pub password: SecretString,
}

/// Full configuration for one sweep run.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub mailbox: MailboxConfig,
    /// Sender allow-list (exact `mailbox@host` matches). Empty = allow any.
    pub allowed_senders: Vec<String>,
    /// Topic allow-list (ARN values with the trailing `:suffix` stripped).
    /// Empty = allow any.
    pub allowed_topics: Vec<String>,
    /// Delete (and expunge) messages that yielded at least one bounce record.
    pub delete_processed: bool,
    /// Path to the recipient database file.
    pub db_path: String,
    /// Table-name prefix for the recipient database.
    pub table_prefix: String,
    /// Bounce count at which an address is suppressed. 0 disables suppression.
    pub suppression_threshold: u32,
    /// Run extraction and decision logic but skip all store writes.
    pub dry_run: bool,
    /// Suppress progress narration (failures still print).
    pub silent: bool,
}

impl SweepConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("BOUNCE_IMAP_HOST").map_err(|_| ConfigError::MissingRequired {
            key: "BOUNCE_IMAP_HOST".into(),
            hint: "Set it to the IMAP server holding the bounce mailbox.".into(),
        })?;

        let port: u16 = parse_or("BOUNCE_IMAP_PORT", 993)?;
        let folder = std::env::var("BOUNCE_IMAP_FOLDER").unwrap_or_else(|_| "INBOX".into());

        let username =
            std::env::var("BOUNCE_USERNAME").map_err(|_| ConfigError::MissingRequired {
                key: "BOUNCE_USERNAME".into(),
                hint: "Set it to the bounce mailbox login.".into(),
            })?;
        let password = SecretString::from(std::env::var("BOUNCE_PASSWORD").unwrap_or_default());

        Ok(Self {
            mailbox: MailboxConfig {
                host,
                port,
                folder,
                username,
                password,
            },
            allowed_senders: split_list(&std::env::var("BOUNCE_ALLOWED_SENDERS").unwrap_or_default()),
            allowed_topics: split_list(&std::env::var("BOUNCE_ALLOWED_TOPICS").unwrap_or_default()),
            delete_processed: parse_bool("BOUNCE_DELETE_PROCESSED", false),
            db_path: std::env::var("BOUNCE_DB_PATH").unwrap_or_else(|_| "./data/bounces.db".into()),
            table_prefix: std::env::var("BOUNCE_TABLE_PREFIX").unwrap_or_default(),
            suppression_threshold: parse_or("BOUNCE_SUPPRESSION_THRESHOLD", 3)?,
            dry_run: parse_bool("BOUNCE_DRY_RUN", false),
            silent: parse_bool("BOUNCE_SILENT", false),
        })
    }
}

/// Split a comma-separated list, trimming entries and dropping empties.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse an env var into `T`, falling back to `default` when unset.
fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.into(),
            message: format!("could not parse {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}

/// Parse a boolean env var (`1`/`true`/`yes`, case-insensitive).
fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_trims_and_drops_empties() {
        assert_eq!(
            split_list(" a@x.com , b@y.com ,,"),
            vec!["a@x.com".to_string(), "b@y.com".to_string()]
        );
    }

    #[test]
    fn split_list_empty_input() {
        assert!(split_list("").is_empty());
    }
}
