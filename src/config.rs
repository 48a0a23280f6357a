use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "phi-extract";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Identifiers per query call before the batched fetcher starts chunking.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Identifier values sampled into an audit record (when sampling is enabled).
pub const DEFAULT_ID_SAMPLE_SIZE: usize = 3;

/// Validation issues logged individually before collapsing into a count.
pub const MAX_REPORTED_VALIDATION_ISSUES: usize = 10;

pub const DEFAULT_DB_PATH: &str = "data/clinical.db";
pub const DEFAULT_AUDIT_PATH: &str = "logs/audit.jsonl";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "phi_extract=info"
}

// ═══════════════════════════════════════════════════════════
// Runtime configuration
// ═══════════════════════════════════════════════════════════

/// Location of the relational store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Audit sink settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditConfig {
    pub path: PathBuf,
    pub include_id_samples: bool,
    pub id_sample_size: usize,
    /// `None` disables sample hashing. Empty values are normalised to `None`.
    pub id_hash_salt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db: DbConfig,
    pub audit: AuditConfig,
    pub batch_size: usize,
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let db = DbConfig {
            path: lookup("EXTRACT_DB_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
        };

        let audit = AuditConfig {
            path: lookup("AUDIT_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIT_PATH)),
            include_id_samples: parse_bool(lookup("AUDIT_INCLUDE_ID_SAMPLES"), true),
            id_sample_size: parse_usize(lookup("AUDIT_ID_SAMPLE_SIZE"), DEFAULT_ID_SAMPLE_SIZE),
            id_hash_salt: lookup("AUDIT_HASH_SALT").filter(|v| !v.is_empty()),
        };

        let batch_size = match parse_usize(lookup("EXTRACT_BATCH_SIZE"), DEFAULT_BATCH_SIZE) {
            0 => DEFAULT_BATCH_SIZE,
            n => n,
        };

        Self {
            db,
            audit,
            batch_size,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value {
        Some(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn parse_usize(value: Option<String>, default: usize) -> usize {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}
