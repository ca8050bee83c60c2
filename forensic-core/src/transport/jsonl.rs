//! Line-delimited JSON file transport

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;

use super::LogTransport;
use crate::error::{ForensicError, Result};
use crate::event::LogRecord;

/// Appends envelopes to a single `.jsonl` file
#[derive(Debug)]
pub struct JsonlFileTransport {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
    /// Skip malformed lines on read instead of failing
    lenient: bool,
}

impl JsonlFileTransport {
    /// Open (creating parent directories) for append
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ForensicError::Io {
                    message: format!("Failed to create log directory: {}", e),
                })?;
            }
        }
        Ok(Self {
            path,
            writer: Mutex::new(None),
            lenient: false,
        })
    }

    /// Open an existing log for reading, skipping lines that do not parse
    pub fn open_lenient(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(None),
            lenient: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_writer<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
    {
        let mut writer = self.writer.lock();
        if writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| ForensicError::Io {
                    message: format!("Failed to open {}: {}", self.path.display(), e),
                })?;
            *writer = Some(BufWriter::new(file));
        }
        match writer.as_mut() {
            Some(w) => f(w).map_err(|e| ForensicError::Io {
                message: format!("Failed to write {}: {}", self.path.display(), e),
            }),
            None => Ok(()),
        }
    }
}

impl LogTransport for JsonlFileTransport {
    fn append(&self, record: &LogRecord) -> Result<()> {
        let line = record.to_json()?;
        self.with_writer(|w| writeln!(w, "{}", line))
    }

    fn append_batch(&self, records: &[LogRecord]) -> Result<()> {
        let lines = records
            .iter()
            .map(LogRecord::to_json)
            .collect::<Result<Vec<_>>>()?;
        self.with_writer(|w| {
            for line in &lines {
                writeln!(w, "{}", line)?;
            }
            Ok(())
        })
    }

    fn records(&self) -> Result<Vec<LogRecord>> {
        self.flush()?;
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path).map_err(|e| ForensicError::Io {
            message: format!("Failed to open {}: {}", self.path.display(), e),
        })?;

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match LogRecord::from_json(&line) {
                Ok(record) => records.push(record),
                Err(err) if self.lenient => {
                    warn!(line = index + 1, error = %err, "skipping unreadable log line");
                }
                Err(err) => {
                    return Err(ForensicError::MalformedLogLine {
                        line: index + 1,
                        reason: err.to_string(),
                    })
                }
            }
        }
        Ok(records)
    }

    fn flush(&self) -> Result<()> {
        if let Some(writer) = self.writer.lock().as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}

impl Drop for JsonlFileTransport {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.get_mut().as_mut() {
            let _ = writer.flush();
        }
    }
}
