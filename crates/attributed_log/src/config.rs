//! The `logging.config` file: logger levels, handlers and formatters, in TOML.
//!
//! ```toml
//! [root]
//! level = "info"
//! handlers = ["console", "file"]
//!
//! [loggers."app.worker"]
//! level = "debug"
//! handlers = ["file"]
//! propagate = false
//!
//! [handlers.console]
//! kind = "console"
//! stream = "stderr"
//!
//! [handlers.file]
//! kind = "timed_rotating_file"
//! file_name = "app.log"
//! rotation = "daily"
//! backup_count = 7
//! format = "compact_json"
//!
//! [static_fields]
//! service = "billing"
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;
use serde_json::Value;
use tracing::Level;
use tracing_appender::rolling::Rotation;

use crate::{
    LoggingError,
    formatter::{JsonFormatter, RecordFormatter, TextFormatter},
    handler::{ConsoleHandler, Handler, TimedRotatingFileHandler, TracingHandler},
    logger::AttributingLogger,
    registry::LoggerRegistry,
};

/// Parses a level name.
///
/// Besides the [`Level`] names (case-insensitive), accepts `warning` for [`Level::WARN`],
/// `critical` and `fatal` for [`Level::ERROR`], and `notset`, which yields `None`.
pub fn parse_level(name: &str) -> Result<Option<Level>, LoggingError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "notset" => Ok(None),
        "warning" => Ok(Some(Level::WARN)),
        "critical" | "fatal" => Ok(Some(Level::ERROR)),
        other => other
            .parse::<Level>()
            .map(Some)
            .map_err(|_| LoggingError::InvalidLevel(name.to_owned())),
    }
}

fn parse_optional_level(name: Option<&str>) -> Result<Option<Level>, LoggingError> {
    Ok(name.map(parse_level).transpose()?.flatten())
}

/// Contents of a logging configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Settings of the root logger.
    pub root: LoggerSection,

    /// Settings of named loggers, by logger name.
    pub loggers: BTreeMap<String, LoggerSection>,

    /// Handler declarations, by the identifier logger sections refer to them with.
    pub handlers: BTreeMap<String, HandlerSection>,

    /// Fields added to every record written with a JSON format.
    pub static_fields: HashMap<String, Value>,
}

/// Settings of one logger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggerSection {
    /// Level name, see [`parse_level`]. Left unchanged when absent.
    pub level: Option<String>,

    /// Identifiers of the handlers attached to the logger, replacing any attached before.
    pub handlers: Vec<String>,

    /// Whether records are passed on to the ancestors' handlers. Left unchanged when absent.
    pub propagate: Option<bool>,
}

/// A handler declaration, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandlerSection {
    /// A [`ConsoleHandler`].
    Console {
        /// Least severe level emitted.
        level: Option<String>,

        /// The stream written to.
        #[serde(default)]
        stream: ConsoleStream,

        /// Layout of the records.
        #[serde(default)]
        format: RecordFormat,
    },

    /// A [`TimedRotatingFileHandler`].
    TimedRotatingFile {
        /// Least severe level emitted.
        level: Option<String>,

        /// Directory of the log file. Defaults to the configured log directory.
        directory: Option<PathBuf>,

        /// Name of the log file.
        file_name: String,

        /// Rollover schedule.
        #[serde(default)]
        rotation: RotationSetting,

        /// Number of backups kept. All are kept when absent.
        backup_count: Option<NonZeroUsize>,

        /// Layout of the records.
        #[serde(default)]
        format: RecordFormat,
    },

    /// A [`TracingHandler`].
    Tracing {
        /// Least severe level forwarded.
        level: Option<String>,
    },
}

/// Layout of the records written by a handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    /// [`TextFormatter`].
    #[default]
    Text,

    /// Compact, single-line JSON.
    CompactJson,

    /// Pretty-printed, multi-line JSON.
    PrettyJson,
}

impl RecordFormat {
    fn build(
        self,
        static_fields: &HashMap<String, Value>,
    ) -> Result<Box<dyn RecordFormatter>, LoggingError> {
        let formatter: Box<dyn RecordFormatter> = match self {
            Self::Text => Box::new(TextFormatter),
            Self::CompactJson => Box::new(JsonFormatter::compact(static_fields.clone())?),
            Self::PrettyJson => Box::new(JsonFormatter::pretty(static_fields.clone())?),
        };
        Ok(formatter)
    }
}

/// Console stream written by a console handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleStream {
    /// Standard output.
    #[default]
    Stdout,

    /// Standard error.
    Stderr,
}

/// Rollover schedule of a file handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationSetting {
    /// Every minute.
    Minutely,

    /// Every hour.
    #[default]
    Hourly,

    /// Every day.
    Daily,

    /// Only when forced.
    Never,
}

impl From<RotationSetting> for Rotation {
    fn from(setting: RotationSetting) -> Self {
        match setting {
            RotationSetting::Minutely => Self::MINUTELY,
            RotationSetting::Hourly => Self::HOURLY,
            RotationSetting::Daily => Self::DAILY,
            RotationSetting::Never => Self::NEVER,
        }
    }
}

impl HandlerSection {
    /// Creates the declared handler. File handlers without a directory of their own are placed
    /// in `log_directory`.
    pub fn build(
        &self,
        id: &str,
        log_directory: Option<&Path>,
        static_fields: &HashMap<String, Value>,
    ) -> Result<Arc<dyn Handler>, LoggingError> {
        self.prepare(id, log_directory, static_fields)?.open()
    }

    /// Parses and validates the declaration without touching the filesystem.
    fn prepare(
        &self,
        id: &str,
        log_directory: Option<&Path>,
        static_fields: &HashMap<String, Value>,
    ) -> Result<PreparedHandler, LoggingError> {
        let prepared = match self {
            Self::Console {
                level,
                stream,
                format,
            } => PreparedHandler::Console {
                stream: *stream,
                level: parse_optional_level(level.as_deref())?,
                formatter: format.build(static_fields)?,
            },
            Self::TimedRotatingFile {
                level,
                directory,
                file_name,
                rotation,
                backup_count,
                format,
            } => {
                let directory = directory.as_deref().or(log_directory).ok_or_else(|| {
                    LoggingError::Configuration(format!(
                        "Handler `{id}` has no directory and no log directory is configured"
                    ))
                })?;
                PreparedHandler::TimedRotatingFile {
                    path: directory.join(file_name),
                    rotation: Rotation::from(*rotation),
                    backup_count: *backup_count,
                    level: parse_optional_level(level.as_deref())?,
                    formatter: format.build(static_fields)?,
                }
            }
            Self::Tracing { level } => PreparedHandler::Tracing {
                level: parse_optional_level(level.as_deref())?,
            },
        };
        Ok(prepared)
    }
}

/// A validated handler declaration, ready to be opened.
enum PreparedHandler {
    Console {
        stream: ConsoleStream,
        level: Option<Level>,
        formatter: Box<dyn RecordFormatter>,
    },
    TimedRotatingFile {
        path: PathBuf,
        rotation: Rotation,
        backup_count: Option<NonZeroUsize>,
        level: Option<Level>,
        formatter: Box<dyn RecordFormatter>,
    },
    Tracing {
        level: Option<Level>,
    },
}

impl PreparedHandler {
    fn open(self) -> Result<Arc<dyn Handler>, LoggingError> {
        let handler: Arc<dyn Handler> = match self {
            Self::Console {
                stream: ConsoleStream::Stdout,
                level,
                formatter,
            } => Arc::new(
                ConsoleHandler::stdout()
                    .with_formatter(formatter)
                    .with_level(level),
            ),
            Self::Console {
                stream: ConsoleStream::Stderr,
                level,
                formatter,
            } => Arc::new(
                ConsoleHandler::stderr()
                    .with_formatter(formatter)
                    .with_level(level),
            ),
            Self::TimedRotatingFile {
                path,
                rotation,
                backup_count,
                level,
                formatter,
            } => Arc::new(
                TimedRotatingFileHandler::new(path, rotation, backup_count)?
                    .with_formatter(formatter)
                    .with_level(level),
            ),
            Self::Tracing { level } => Arc::new(TracingHandler::new().with_level(level)),
        };
        Ok(handler)
    }
}

/// A logger section with its level parsed and its handler identifiers checked.
struct ResolvedSection<'a> {
    level: Option<Option<Level>>,
    handlers: Vec<&'a str>,
    propagate: Option<bool>,
}

impl<'a> ResolvedSection<'a> {
    fn resolve(
        section: &'a LoggerSection,
        declared: &BTreeMap<String, HandlerSection>,
    ) -> Result<Self, LoggingError> {
        let level = section.level.as_deref().map(parse_level).transpose()?;
        let handlers = section
            .handlers
            .iter()
            .map(|id| {
                if declared.contains_key(id) {
                    Ok(id.as_str())
                } else {
                    Err(LoggingError::UnknownHandler(id.clone()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            level,
            handlers,
            propagate: section.propagate,
        })
    }
}

impl FileConfig {
    /// Reads and parses the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, LoggingError> {
        let content = fs::read_to_string(path).map_err(|source| LoggingError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parses configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, LoggingError> {
        Ok(toml::from_str(content)?)
    }

    /// Applies the configuration to `registry`.
    ///
    /// Every section is validated before any log file is created or any logger is modified, so
    /// an invalid configuration leaves both the registry and the filesystem as they were. Only a
    /// failure to open a log file can leave the files opened before it behind.
    pub fn apply(
        &self,
        registry: &LoggerRegistry,
        log_directory: Option<&Path>,
    ) -> Result<(), LoggingError> {
        let prepared = self
            .handlers
            .iter()
            .map(|(id, section)| {
                section
                    .prepare(id, log_directory, &self.static_fields)
                    .map(|handler| (id.as_str(), handler))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let root = ResolvedSection::resolve(&self.root, &self.handlers)?;
        let loggers = self
            .loggers
            .iter()
            .map(|(name, section)| {
                ResolvedSection::resolve(section, &self.handlers).map(|section| (name, section))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let handlers = prepared
            .into_iter()
            .map(|(id, handler)| handler.open().map(|handler| (id, handler)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Self::configure_logger(registry.root(), &root, &handlers);
        for (name, section) in &loggers {
            let logger = registry.get(Some(name.as_str()));
            Self::configure_logger(&logger, section, &handlers);
        }
        Ok(())
    }

    fn configure_logger(
        logger: &AttributingLogger,
        section: &ResolvedSection<'_>,
        handlers: &BTreeMap<&str, Arc<dyn Handler>>,
    ) {
        if let Some(level) = section.level {
            logger.set_level(level);
        }
        if let Some(propagate) = section.propagate {
            logger.set_propagate(propagate);
        }
        logger.clear_handlers();
        section
            .handlers
            .iter()
            .filter_map(|id| handlers.get(id))
            .for_each(|handler| logger.add_handler(Arc::clone(handler)));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::resolver::QualifiedNameResolver;

    fn temp_dir(name: &str) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "attributed_log-config-{name}-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&dir).expect("temporary directory must be creatable");
        dir
    }

    fn registry() -> LoggerRegistry {
        LoggerRegistry::new(QualifiedNameResolver::default(), Level::DEBUG)
    }

    const CONFIG: &str = r#"
        [root]
        level = "warning"
        handlers = ["events"]

        [loggers."app.worker"]
        level = "trace"
        handlers = ["file", "events"]
        propagate = false

        [handlers.events]
        kind = "tracing"
        level = "info"

        [handlers.file]
        kind = "timed_rotating_file"
        file_name = "worker.log"
        rotation = "daily"
        backup_count = 3
        format = "compact_json"

        [static_fields]
        service = "billing"
    "#;

    #[test]
    fn level_names_follow_logging_conventions() {
        assert_eq!(parse_level("DEBUG").ok(), Some(Some(Level::DEBUG)));
        assert_eq!(parse_level("warning").ok(), Some(Some(Level::WARN)));
        assert_eq!(parse_level("Critical").ok(), Some(Some(Level::ERROR)));
        assert_eq!(parse_level("notset").ok(), Some(None));
        assert!(matches!(
            parse_level("verbose"),
            Err(LoggingError::InvalidLevel(name)) if name == "verbose"
        ));
    }

    #[test]
    fn parses_sections() {
        let config = FileConfig::parse(CONFIG).expect("configuration must parse");

        assert_eq!(config.root.level.as_deref(), Some("warning"));
        assert_eq!(config.loggers.len(), 1);
        assert_eq!(
            config.handlers.get("file"),
            Some(&HandlerSection::TimedRotatingFile {
                level: None,
                directory: None,
                file_name: "worker.log".to_owned(),
                rotation: RotationSetting::Daily,
                backup_count: NonZeroUsize::new(3),
                format: RecordFormat::CompactJson,
            })
        );
        assert_eq!(config.static_fields.get("service"), Some(&Value::from("billing")));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            FileConfig::parse("[root]\nlevels = \"info\"\n"),
            Err(LoggingError::ConfigParse(_))
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let path = temp_dir("missing").join("logging.config");
        assert!(matches!(
            FileConfig::load(&path),
            Err(LoggingError::ConfigRead { path: failed, .. }) if failed == path
        ));
    }

    #[test]
    fn applies_levels_handlers_and_propagation() {
        let dir = temp_dir("apply");
        let registry = registry();
        let config = FileConfig::parse(CONFIG).expect("configuration must parse");

        config
            .apply(&registry, Some(&dir))
            .expect("configuration must apply");

        let root = registry.root();
        assert_eq!(root.level(), Some(Level::WARN));
        assert_eq!(root.handlers().len(), 1);

        let worker = registry.get(Some("app.worker"));
        assert_eq!(worker.level(), Some(Level::TRACE));
        assert!(!worker.propagate());
        assert_eq!(worker.handlers().len(), 2);
        assert!(worker.handlers().iter().any(|handler| handler.is_rotating()));
        assert!(dir.join("worker.log").exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn unknown_handler_leaves_registry_untouched() {
        let registry = registry();
        let config = FileConfig::parse("[root]\nlevel = \"error\"\nhandlers = [\"missing\"]\n")
            .expect("configuration must parse");

        assert!(matches!(
            config.apply(&registry, None),
            Err(LoggingError::UnknownHandler(id)) if id == "missing"
        ));
        assert_eq!(registry.root().level(), Some(Level::DEBUG));
    }

    #[test]
    fn invalid_configuration_creates_no_log_files() {
        let dir = temp_dir("invalid");
        let registry = registry();
        let unknown_handler = FileConfig::parse(
            "[root]\nhandlers = [\"file\", \"missing\"]\n\n\
             [handlers.file]\nkind = \"timed_rotating_file\"\nfile_name = \"app.log\"\n",
        )
        .expect("configuration must parse");
        let reserved_field = FileConfig::parse(
            "[handlers.file]\nkind = \"timed_rotating_file\"\nfile_name = \"app.log\"\n\n\
             [handlers.out]\nkind = \"console\"\nformat = \"compact_json\"\n\n\
             [static_fields]\nlevel = \"custom\"\n",
        )
        .expect("configuration must parse");

        assert!(matches!(
            unknown_handler.apply(&registry, Some(&dir)),
            Err(LoggingError::UnknownHandler(_))
        ));
        assert!(matches!(
            reserved_field.apply(&registry, Some(&dir)),
            Err(LoggingError::Configuration(_))
        ));
        assert!(!dir.join("app.log").exists());
        assert!(registry.root().handlers().is_empty());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn file_handler_requires_a_directory() {
        let registry = registry();
        let config = FileConfig::parse(
            "[handlers.file]\nkind = \"timed_rotating_file\"\nfile_name = \"app.log\"\n",
        )
        .expect("configuration must parse");

        assert!(matches!(
            config.apply(&registry, None),
            Err(LoggingError::Configuration(_))
        ));
    }

    #[test]
    fn reserved_static_fields_are_rejected() {
        let registry = registry();
        let config = FileConfig::parse(
            "[handlers.out]\nkind = \"console\"\nformat = \"pretty_json\"\n\n[static_fields]\npid = 1\n",
        )
        .expect("configuration must parse");

        assert!(matches!(
            config.apply(&registry, None),
            Err(LoggingError::Configuration(_))
        ));
    }
}
