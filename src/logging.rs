//! Append-only JSONL exchange log.
//!
//! Every exchange gets a short id; entries carry it so one request's lines can
//! be grepped out of a busy log. This sits beside `tracing`, which stays the
//! process-level log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_id: Option<String>,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.into(),
            exchange_id: None,
            message: message.into(),
        }
    }

    pub fn for_exchange(mut self, exchange_id: impl Into<String>) -> Self {
        self.exchange_id = Some(exchange_id.into());
        self
    }
}

/// Thread-safe handle to the exchange log. Cloning shares the same file.
#[derive(Clone, Default)]
pub struct SharedLogger(Option<Arc<Mutex<BufWriter<File>>>>);

impl SharedLogger {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref();

        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(Self(Some(Arc::new(Mutex::new(BufWriter::new(file))))))
    }

    /// A logger that discards everything.
    pub fn disabled() -> Self {
        Self(None)
    }

    pub fn log(&self, entry: LogEntry) {
        let Some(ref writer) = self.0 else {
            return;
        };
        if let (Ok(mut writer), Ok(json)) = (writer.lock(), serde_json::to_string(&entry)) {
            let _ = writeln!(writer, "{json}");
            let _ = writer.flush();
        }
    }

    pub fn exchange(&self, exchange_id: &str, level: LogLevel, component: &str, message: impl Into<String>) {
        self.log(LogEntry::new(level, component, message).for_exchange(exchange_id));
    }

    pub fn info(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Info, component, message));
    }
}

/// Short random id naming one exchange in the log.
pub fn new_exchange_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}
