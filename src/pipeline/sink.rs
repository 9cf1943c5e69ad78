use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::pipeline::pipeline_errors::PersistenceError;
use crate::pipeline::violation::Violation;

/// Persistence capability: store the record or fail
pub trait ViolationSink: Send {
    fn store(&mut self, violation: &Violation) -> Result<(), PersistenceError>;
    fn flush(&mut self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Appends one JSON document per violation
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!(path = %path.display(), "violation sink opened");
        Ok(JsonLinesSink {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ViolationSink for JsonLinesSink {
    fn store(&mut self, violation: &Violation) -> Result<(), PersistenceError> {
        serde_json::to_writer(&mut self.writer, violation)?;
        self.writer.write_all(b"\n")?;
        // Each record must survive a crash of the process
        self.writer.flush()?;
        Ok(())
    }
    fn flush(&mut self) -> Result<(), PersistenceError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps violations in memory; clones share the same storage
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<Violation>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn records(&self) -> Vec<Violation> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
    pub fn len(&self) -> usize {
        self.records().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ViolationSink for MemorySink {
    fn store(&mut self, violation: &Violation) -> Result<(), PersistenceError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| PersistenceError::Rejected("storage lock poisoned".to_string()))?;
        records.push(violation.clone());
        Ok(())
    }
}
