use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

fn now_millis() -> u64 {
    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Injected logging capability. Components receive it at construction;
/// logging never fails the caller.
pub trait EventLogger: Send + Sync {
    fn log(&self, severity: Severity, message: &str);
}

pub struct NullEventLogger;

impl EventLogger for NullEventLogger {
    fn log(&self, _severity: Severity, _message: &str) {}
}

pub struct FileEventLogger {
    writer: Mutex<BufWriter<File>>,
}

impl FileEventLogger {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl EventLogger for FileEventLogger {
    fn log(&self, severity: Severity, message: &str) {
        let Ok(mut writer) = self.writer.lock() else {
            return;
        };

        let line = serde_json::json!({
            "ts": now_millis(),
            "level": severity.label(),
            "message": message,
        });

        let Ok(encoded) = serde_json::to_string(&line) else {
            return;
        };

        if writer.write_all(encoded.as_bytes()).is_err() {
            return;
        }
        if writer.write_all(b"\n").is_err() {
            return;
        }
        let _ = writer.flush();
    }
}

#[cfg(test)]
mod tests;
