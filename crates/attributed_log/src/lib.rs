//! `attributed_log` is a logging façade that stamps every record with the qualified identity of
//! the code that emitted it, instead of the name of the logger the record was emitted through.
//!
//! It offers:
//! - An [`AttributingLogger`] whose records carry `logger.name` plus, for calls made from a
//!   method, the receiver's type (`app.worker.Worker`).
//! - A [`LoggerRegistry`] of named loggers arranged in a dotted hierarchy under a single root,
//!   with a process-wide instance reachable through [`get`] and [`global`].
//! - An explicit per-thread call stack ([`frame`]) populated by the [`frame!`] and
//!   [`entry_frame!`] macros and by the logging macros, which the [`QualifiedNameResolver`]
//!   inspects to attribute each call.
//! - Sinks ([`ConsoleHandler`], [`TimedRotatingFileHandler`], [`MemoryHandler`],
//!   [`TracingHandler`]) and formatters ([`TextFormatter`], [`JsonFormatter`]), configured
//!   from a `logging.config` TOML file or, failing that, a console fallback.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use attributed_log::{Level, LoggerRegistry, MemoryHandler, QualifiedNameResolver};
//!
//! struct Worker {
//!     logger: Arc<attributed_log::AttributingLogger>,
//! }
//!
//! impl Worker {
//!     fn run(&self) {
//!         let _frame = attributed_log::frame!(self);
//!         attributed_log::error!(self.logger, "job {} failed", 42);
//!     }
//! }
//!
//! let registry = LoggerRegistry::new(QualifiedNameResolver::default(), Level::DEBUG);
//! let records = Arc::new(MemoryHandler::new());
//! registry.root().add_handler(records.clone());
//!
//! Worker { logger: registry.get(Some("app.worker")) }.run();
//!
//! let record = &records.records()[0];
//! assert_eq!(record.name(), "app.worker.Worker");
//! assert_eq!(record.function(), "run");
//! assert_eq!(record.message(), "job 42 failed");
//! ```

mod config;
mod formatter;
pub mod frame;
mod handler;
mod logger;
mod macros;
mod record;
mod registry;
mod resolver;
mod setup;

use std::path::PathBuf;

pub use tracing::Level;
pub use tracing_appender::rolling::Rotation;

pub use self::{
    config::{
        ConsoleStream, FileConfig, HandlerSection, LoggerSection, RecordFormat, RotationSetting,
        parse_level,
    },
    formatter::{JsonFormatter, RecordFormatter, TextFormatter},
    frame::{Bindings, ENTRY_POINT_MODULE, FrameGuard, ModuleRef, StackFrame},
    handler::{ConsoleHandler, Handler, MemoryHandler, TimedRotatingFileHandler, TracingHandler},
    logger::{AttributingLogger, CALLER_SKIP, CONSTRUCTOR_SKIP},
    record::{ErrorInfo, LogRecord, render_message},
    registry::{LoggerRegistry, ROOT_LOGGER_NAME, get, global, init},
    resolver::{
        ModulePath, QualifiedIdentity, QualifiedNameResolver, UNKNOWN_FILE, UNKNOWN_FUNCTION,
    },
    setup::{
        ConfigOutcome, DEFAULT_CONFIG_FILE, DEFAULT_ROOT_LEVEL, LOGGING_CONFIG_ENV,
        LOGGING_DIRECTORY_ENV, LOGGING_SEARCH_PATH_ENV, Settings, prepare_log_directory,
    },
};

mod keys {
    use std::sync::LazyLock;

    use rustc_hash::FxHashSet;

    pub(crate) const MESSAGE: &str = "message";
    pub(crate) const LEVEL: &str = "level";
    pub(crate) const NAME: &str = "name";
    pub(crate) const LOGGER: &str = "logger";
    pub(crate) const LINE: &str = "line";
    pub(crate) const FILE: &str = "file";
    pub(crate) const FN: &str = "fn";
    pub(crate) const THREAD: &str = "thread";
    pub(crate) const TIME: &str = "time";
    pub(crate) const HOSTNAME: &str = "hostname";
    pub(crate) const PID: &str = "pid";
    pub(crate) const ERROR: &str = "error";

    pub(crate) static IMPLICIT_KEYS: LazyLock<FxHashSet<&'static str>> = LazyLock::new(|| {
        [
            MESSAGE, LEVEL, NAME, LOGGER, LINE, FILE, FN, THREAD, TIME, HOSTNAME, PID, ERROR,
        ]
        .iter()
        .copied()
        .collect()
    });
}

/// Errors that can occur while configuring or writing logs.
///
/// None of these escape a logging call: handlers report write failures through `tracing` and
/// configuration failures make the registry fall back to a console handler.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Represents an error in configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The configuration file could not be read.
    #[error("Failed to read configuration file `{}`: {source}", path.display())]
    ConfigRead {
        /// Path of the configuration file.
        path: PathBuf,

        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML or does not match the expected layout.
    #[error("Failed to parse configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A level name that does not correspond to any [`Level`].
    #[error("Invalid log level `{0}`")]
    InvalidLevel(String),

    /// A logger section refers to a handler that is not declared.
    #[error("Unknown handler `{0}`")]
    UnknownHandler(String),

    /// Represents an I/O error while preparing or writing log files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Represents an error during JSON serialization.
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    /// Represents an error while formatting a record timestamp.
    #[error("Failed to format timestamp: {0}")]
    TimestampFormatting(#[from] time::error::Format),

    /// [`init`] was called after the process-wide registry had been created.
    #[error("The process-wide logger registry is already initialized")]
    AlreadyInitialized,
}
