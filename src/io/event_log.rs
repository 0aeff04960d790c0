//! Gate event log - append-only JSONL sink
//!
//! One JSON object per line: `{"t": "<local time>", "kind": "...", ...fields}`.
//! Every record is mirrored to tracing. Write failures are reported through
//! tracing and never reach the caller.

use chrono::Local;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

pub struct EventLog {
    file_path: Option<PathBuf>,
    /// Serializes appends so concurrent records never interleave
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        info!(file_path = %file_path.display(), "event_log_initialized");
        Self { file_path: Some(file_path), write_lock: Mutex::new(()) }
    }

    /// Log to tracing only
    pub fn disabled() -> Self {
        Self { file_path: None, write_lock: Mutex::new(()) }
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Append one record. `fields` should be a JSON object; other values are
    /// stored under `"value"`.
    pub fn log(&self, kind: &str, fields: Value) {
        let line = Self::format_record(kind, fields);
        info!(kind = %kind, record = %line, "event");

        let Some(ref path) = self.file_path else {
            return;
        };

        let _guard = self.write_lock.lock();
        if let Err(e) = Self::append_line(path, &line) {
            error!(file = %path.display(), kind = %kind, error = %e, "event_log_write_failed");
        }
    }

    fn format_record(kind: &str, fields: Value) -> String {
        let mut record = Map::new();
        let t = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        record.insert("t".to_string(), Value::String(t));
        record.insert("kind".to_string(), Value::String(kind.to_string()));
        match fields {
            Value::Object(map) => {
                for (k, v) in map {
                    if k != "t" && k != "kind" {
                        record.insert(k, v);
                    }
                }
            }
            Value::Null => {}
            other => {
                record.insert("value".to_string(), other);
            }
        }
        Value::Object(record).to_string()
    }

    fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %path.display(), bytes = %line.len(), "event_log_written");
        Ok(())
    }
}
