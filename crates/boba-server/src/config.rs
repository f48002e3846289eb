use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: String,
    pub jwt_secret: String,
    /// Quiet period a mutation must survive before the database file is
    /// uploaded; a new mutation inside the window restarts it.
    pub backup_window: Duration,
    pub backup: Option<BackupConfig>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub bucket: String,
    pub region: String,
    /// S3-compatible endpoint override (R2, COS, MinIO). AWS when unset.
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub key_prefix: Option<String>,
}

impl fmt::Debug for BackupConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BackupConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("backup_window", &self.backup_window)
            .field("backup", &self.backup)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "BOBA_BIND_ADDR", "127.0.0.1:8080");
        let database_path = value_or_default(&lookup, "BOBA_DATABASE_PATH", "boba.db");
        let jwt_secret = required_trimmed(&lookup, "BOBA_JWT_SECRET")?;

        let backup_window_secs = value_or_default(&lookup, "BOBA_BACKUP_WINDOW_SECS", "300")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "BOBA_BACKUP_WINDOW_SECS must be an integer in [5, 3600]".to_string(),
                )
            })?;
        if !(5..=3_600).contains(&backup_window_secs) {
            return Err(ConfigError::Invalid(
                "BOBA_BACKUP_WINDOW_SECS must be in [5, 3600]".to_string(),
            ));
        }

        let backup = parse_backup_config(&lookup)?;

        Ok(Self {
            bind_addr,
            database_path,
            jwt_secret,
            backup_window: Duration::from_secs(backup_window_secs),
            backup,
        })
    }
}

fn parse_backup_config(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Option<BackupConfig>, ConfigError> {
    let bucket = optional_trimmed(&lookup, "S3_BUCKET");
    let access_key_id = optional_trimmed(&lookup, "S3_ACCESS_KEY_ID");
    let secret_access_key = optional_trimmed(&lookup, "S3_SECRET_ACCESS_KEY");

    let any_set = bucket.is_some() || access_key_id.is_some() || secret_access_key.is_some();
    if !any_set {
        return Ok(None);
    }

    let bucket = bucket.ok_or(ConfigError::MissingVar("S3_BUCKET"))?;
    let access_key_id = access_key_id.ok_or(ConfigError::MissingVar("S3_ACCESS_KEY_ID"))?;
    let secret_access_key =
        secret_access_key.ok_or(ConfigError::MissingVar("S3_SECRET_ACCESS_KEY"))?;

    let region = value_or_default(&lookup, "S3_REGION", "auto");
    let endpoint = optional_trimmed(&lookup, "S3_ENDPOINT")
        .map(|value| value.trim_end_matches('/').to_string());
    if let Some(endpoint) = endpoint.as_deref() {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::Invalid(
                "S3_ENDPOINT must start with http:// or https://".to_string(),
            ));
        }
    }
    let key_prefix =
        optional_trimmed(&lookup, "S3_KEY_PREFIX").map(|value| value.trim_matches('/').to_string());

    Ok(Some(BackupConfig {
        bucket,
        region,
        endpoint,
        access_key_id,
        secret_access_key,
        key_prefix,
    }))
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
