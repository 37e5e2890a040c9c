//! Sinks that records are dispatched to once a logger has accepted them.

mod bridge;
mod console;
mod file;
mod memory;

use std::fmt;

use tracing::Level;

pub use self::{
    bridge::TracingHandler, console::ConsoleHandler, file::TimedRotatingFileHandler,
    memory::MemoryHandler,
};
#[cfg(test)]
pub(crate) use self::console::test_support;
use crate::{LoggingError, record::LogRecord};

/// A destination for log records.
///
/// Handlers are shared between loggers and threads. Failures while emitting a record are
/// reported through `tracing` and never reach the logging call.
pub trait Handler: Send + Sync + fmt::Debug {
    /// The least severe level the handler emits, or `None` to emit every record.
    fn level(&self) -> Option<Level> {
        None
    }

    /// Whether records at `level` pass the handler's threshold.
    fn accepts(&self, level: Level) -> bool {
        self.level().is_none_or(|threshold| level <= threshold)
    }

    /// Emits `record`.
    fn handle(&self, record: &LogRecord);

    /// Flushes buffered output.
    fn flush(&self) {}

    /// Whether the handler writes to a file rotated on a schedule.
    fn is_rotating(&self) -> bool {
        false
    }

    /// Starts a new output file, keeping the current one as a backup. No-op for handlers that
    /// do not rotate.
    fn rollover(&self) -> Result<(), LoggingError> {
        Ok(())
    }
}
