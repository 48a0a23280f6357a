//! Append-only JSONL audit trail of extractions.
//!
//! One record per extraction call. Identifier values are only written when
//! sampling is switched on, and then hashed whenever a salt is configured.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::{AuditConfig, DEFAULT_ID_SAMPLE_SIZE};
use crate::crypto::hash_value;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Audit sink lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditOptions {
    pub include_id_samples: bool,
    pub id_sample_size: usize,
    /// Non-empty salt: samples are hashed. Otherwise samples are raw.
    pub id_hash_salt: Option<String>,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            include_id_samples: false,
            id_sample_size: DEFAULT_ID_SAMPLE_SIZE,
            id_hash_salt: None,
        }
    }
}

impl AuditOptions {
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            include_id_samples: config.include_id_samples,
            id_sample_size: config.id_sample_size,
            id_hash_salt: config.id_hash_salt.clone(),
        }
    }

    fn salt(&self) -> Option<&str> {
        self.id_hash_salt.as_deref().filter(|s| !s.is_empty())
    }
}

/// Identifier summary: always the count, optionally a bounded sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdSummary {
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashed_ids: Option<Vec<String>>,
}

/// One serialised audit line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: String,
    pub actor: Option<String>,
    pub action: String,
    pub resource: String,
    pub by: String,
    pub ids: IdSummary,
    pub fields_requested: Option<Vec<String>>,
    pub fetch_fields: Option<Vec<String>>,
    pub include_fields: Option<Vec<String>>,
    pub derived_added: Vec<String>,
    pub hashed: bool,
    pub out: Option<String>,
    pub out_format: Option<String>,
    pub rows: Option<usize>,
    pub duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// What an extraction did, before identifiers are summarised.
#[derive(Debug, Clone, Default)]
pub struct AccessEvent<'a> {
    pub actor: Option<&'a str>,
    pub action: &'a str,
    pub resource: &'a str,
    pub by: &'a str,
    pub ids: &'a [String],
    pub fields: Option<&'a [String]>,
    pub fetch_fields: Option<&'a [String]>,
    pub include_fields: Option<&'a [String]>,
    pub derived_added: &'a [String],
    pub hashed: bool,
    pub out: Option<&'a str>,
    pub out_format: Option<&'a str>,
    pub rows: Option<usize>,
    pub duration_ms: Option<f64>,
    pub extra: Option<Value>,
}

enum Sink {
    File(File),
    Stream(Box<dyn Write + Send>),
}

impl Sink {
    fn append(&mut self, line: &[u8]) -> std::io::Result<()> {
        match self {
            Self::File(file) => {
                file.write_all(line)?;
                file.flush()?;
                file.sync_data()
            }
            Self::Stream(stream) => {
                stream.write_all(line)?;
                stream.flush()
            }
        }
    }
}

pub struct AuditLogger {
    sink: Mutex<Sink>,
    options: AuditOptions,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl AuditLogger {
    /// Append to the file at `path`, creating it and its parent directories.
    pub fn open(path: &Path, options: AuditOptions) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            sink: Mutex::new(Sink::File(file)),
            options,
        })
    }

    /// Write to an arbitrary stream.
    pub fn from_writer<W: Write + Send + 'static>(writer: W, options: AuditOptions) -> Self {
        Self {
            sink: Mutex::new(Sink::Stream(Box::new(writer))),
            options,
        }
    }

    pub fn from_config(config: &AuditConfig) -> Result<Self, AuditError> {
        Self::open(&config.path, AuditOptions::from_config(config))
    }

    pub fn options(&self) -> &AuditOptions {
        &self.options
    }

    pub fn summarize_ids(&self, ids: &[String]) -> IdSummary {
        let mut summary = IdSummary {
            count: ids.len(),
            ..IdSummary::default()
        };
        if !self.options.include_id_samples || ids.is_empty() {
            return summary;
        }
        let sample = ids.iter().take(self.options.id_sample_size);
        match self.options.salt() {
            Some(salt) => {
                summary.hashed_ids = Some(sample.map(|id| hash_value(id, Some(salt))).collect());
            }
            None => summary.ids = Some(sample.cloned().collect()),
        }
        summary
    }

    /// Serialise, append and flush one record; returns what was written.
    pub fn log_access(&self, event: AccessEvent<'_>) -> Result<AuditRecord, AuditError> {
        let record = AuditRecord {
            ts: chrono::Local::now().to_rfc3339(),
            actor: event.actor.map(str::to_string),
            action: event.action.to_string(),
            resource: event.resource.to_string(),
            by: event.by.to_string(),
            ids: self.summarize_ids(event.ids),
            fields_requested: event.fields.map(<[String]>::to_vec),
            fetch_fields: event.fetch_fields.map(<[String]>::to_vec),
            include_fields: event.include_fields.map(<[String]>::to_vec),
            derived_added: event.derived_added.to_vec(),
            hashed: event.hashed,
            out: event.out.map(str::to_string),
            out_format: event.out_format.map(str::to_string),
            rows: event.rows,
            duration_ms: event.duration_ms,
            extra: event.extra.filter(|v| !v.is_null()),
        };

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        self.sink
            .lock()
            .map_err(|_| AuditError::LockPoisoned)?
            .append(&line)?;

        tracing::debug!(
            resource = %record.resource,
            by = %record.by,
            rows = ?record.rows,
            "Audit record appended"
        );
        Ok(record)
    }
}

/// Parse an audit file back into records, skipping blank lines.
pub fn read_audit_log(path: &Path) -> Result<Vec<AuditRecord>, AuditError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    /// In-memory stream whose contents stay readable after the logger owns it.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn lines(&self) -> Vec<Value> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn sampling(salt: Option<&str>) -> AuditOptions {
        AuditOptions {
            include_id_samples: true,
            id_sample_size: 2,
            id_hash_salt: salt.map(str::to_string),
        }
    }

    fn event<'a>(ids: &'a [String]) -> AccessEvent<'a> {
        AccessEvent {
            action: "fetch",
            resource: "demographics",
            by: "cases",
            ids,
            rows: Some(1),
            ..AccessEvent::default()
        }
    }

    #[test]
    fn count_only_by_default() {
        let logger = AuditLogger::from_writer(SharedBuf::default(), AuditOptions::default());
        let summary = logger.summarize_ids(&ids(&["A", "B", "C"]));
        assert_eq!(summary, IdSummary { count: 3, ids: None, hashed_ids: None });
    }

    #[test]
    fn raw_sample_without_salt() {
        let logger = AuditLogger::from_writer(SharedBuf::default(), sampling(None));
        let summary = logger.summarize_ids(&ids(&["A", "B", "C"]));
        assert_eq!(summary.ids, Some(ids(&["A", "B"])));
        assert_eq!(summary.hashed_ids, None);
    }

    #[test]
    fn hashed_sample_with_salt() {
        let logger = AuditLogger::from_writer(SharedBuf::default(), sampling(Some("pepper")));
        let summary = logger.summarize_ids(&ids(&["A", "B", "C"]));
        assert_eq!(summary.ids, None);
        assert_eq!(
            summary.hashed_ids,
            Some(vec![hash_value("A", Some("pepper")), hash_value("B", Some("pepper"))])
        );
    }

    #[test]
    fn empty_salt_counts_as_no_salt() {
        let logger = AuditLogger::from_writer(SharedBuf::default(), sampling(Some("")));
        assert_eq!(logger.summarize_ids(&ids(&["A"])).ids, Some(ids(&["A"])));
    }

    #[test]
    fn empty_id_list_has_no_sample() {
        let logger = AuditLogger::from_writer(SharedBuf::default(), sampling(None));
        assert_eq!(logger.summarize_ids(&[]), IdSummary::default());
    }

    #[test]
    fn writes_one_line_per_call_with_all_keys() {
        let buf = SharedBuf::default();
        let logger = AuditLogger::from_writer(buf.clone(), AuditOptions::default());
        let id_list = ids(&["007"]);
        logger.log_access(event(&id_list)).unwrap();
        logger.log_access(event(&id_list)).unwrap();

        let lines = buf.lines();
        assert_eq!(lines.len(), 2);
        let first = lines[0].as_object().unwrap();
        for key in [
            "ts", "actor", "action", "resource", "by", "ids", "fields_requested",
            "fetch_fields", "include_fields", "derived_added", "hashed", "out",
            "out_format", "rows", "duration_ms",
        ] {
            assert!(first.contains_key(key), "missing key {key}");
        }
        assert!(!first.contains_key("extra"));
        assert_eq!(lines[0]["ids"], json!({ "count": 1 }));
        assert!(!buf.lines().iter().any(|l| l.to_string().contains("007")));
        assert!(chrono::DateTime::parse_from_rfc3339(lines[0]["ts"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn extra_is_carried_verbatim() {
        let buf = SharedBuf::default();
        let logger = AuditLogger::from_writer(buf.clone(), AuditOptions::default());
        let id_list = ids(&[]);
        let record = logger
            .log_access(AccessEvent {
                extra: Some(json!({ "ticket": "REQ-1" })),
                ..event(&id_list)
            })
            .unwrap();
        assert_eq!(record.extra, Some(json!({ "ticket": "REQ-1" })));
        assert_eq!(buf.lines()[0]["extra"], json!({ "ticket": "REQ-1" }));
    }

    #[test]
    fn file_sink_appends_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/audit.jsonl");
        let id_list = ids(&["C1", "C2"]);

        let first = AuditLogger::open(&path, sampling(Some("s"))).unwrap();
        let written = first.log_access(event(&id_list)).unwrap();
        drop(first);

        let second = AuditLogger::open(&path, AuditOptions::default()).unwrap();
        second.log_access(event(&id_list)).unwrap();

        let records = read_audit_log(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], written);
        assert_eq!(records[0].ids.hashed_ids.as_ref().map(Vec::len), Some(2));
        assert_eq!(records[1].ids, IdSummary { count: 2, ids: None, hashed_ids: None });
    }

    #[test]
    fn from_config_uses_audit_section() {
        let dir = tempfile::tempdir().unwrap();
        let config = AuditConfig {
            path: dir.path().join("audit.jsonl"),
            include_id_samples: true,
            id_sample_size: 1,
            id_hash_salt: Some("k".into()),
        };
        let logger = AuditLogger::from_config(&config).unwrap();
        assert_eq!(logger.options(), &AuditOptions::from_config(&config));
        let summary = logger.summarize_ids(&ids(&["x", "y"]));
        assert_eq!(summary.hashed_ids, Some(vec![hash_value("x", Some("k"))]));
    }
}
