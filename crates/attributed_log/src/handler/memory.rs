use parking_lot::Mutex;
use tracing::Level;

use super::Handler;
use crate::record::LogRecord;

/// Keeps every record it receives in memory.
///
/// Mostly useful for inspecting what a piece of code logged.
#[derive(Debug, Default)]
pub struct MemoryHandler {
    level: Option<Level>,
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryHandler {
    /// Creates a handler accepting every level.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the least severe level the handler keeps.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<Option<Level>>) -> Self {
        self.level = level.into();
        self
    }

    /// A copy of the records received so far, oldest first.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Removes and returns the records received so far.
    pub fn take(&self) -> Vec<LogRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether no records are held.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl Handler for MemoryHandler {
    fn level(&self) -> Option<Level> {
        self.level
    }

    fn handle(&self, record: &LogRecord) {
        self.records.lock().push(record.clone());
    }
}
