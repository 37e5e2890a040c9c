//! Initialization of a registry: log directory, configuration file and console fallback.

use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::Level;

use crate::{
    LoggingError,
    config::FileConfig,
    handler::{ConsoleHandler, Handler},
    registry::LoggerRegistry,
    resolver::{ModulePath, QualifiedNameResolver},
};

/// Environment variable overriding the path of the configuration file.
pub const LOGGING_CONFIG_ENV: &str = "LOGGING_CONFIG";

/// Environment variable naming the directory log files are written to.
pub const LOGGING_DIRECTORY_ENV: &str = "LOGGING_DIRECTORY";

/// Environment variable listing the search roots used to name the entry-point module, in the
/// platform's path list syntax.
pub const LOGGING_SEARCH_PATH_ENV: &str = "LOGGING_SEARCH_PATH";

/// Configuration file read when none is specified.
pub const DEFAULT_CONFIG_FILE: &str = "logging.config";

/// Level of the root logger before configuration.
pub const DEFAULT_ROOT_LEVEL: Level = Level::DEBUG;

/// Settings a registry is initialized from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Path of the configuration file.
    pub config_path: PathBuf,

    /// Directory created before configuration, and the default location of log files.
    pub log_directory: Option<PathBuf>,

    /// Level of the root logger, unless the configuration sets one.
    pub root_level: Level,

    /// Search roots used to name the entry-point module.
    pub search_roots: Vec<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            log_directory: None,
            root_level: DEFAULT_ROOT_LEVEL,
            search_roots: vec![PathBuf::from("src")],
        }
    }
}

impl Settings {
    /// Reads [`LOGGING_CONFIG_ENV`], [`LOGGING_DIRECTORY_ENV`] and [`LOGGING_SEARCH_PATH_ENV`],
    /// using the defaults for those that are unset or empty.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Some(config_path) = env::var_os(LOGGING_CONFIG_ENV).filter(|path| !path.is_empty())
        {
            settings.config_path = PathBuf::from(config_path);
        }
        settings.log_directory = env::var_os(LOGGING_DIRECTORY_ENV)
            .filter(|directory| !directory.is_empty())
            .map(PathBuf::from);
        if let Some(search_path) = env::var_os(LOGGING_SEARCH_PATH_ENV) {
            let search_roots = env::split_paths(&search_path)
                .filter(|root| !root.as_os_str().is_empty())
                .collect::<Vec<_>>();
            if !search_roots.is_empty() {
                settings.search_roots = search_roots;
            }
        }

        settings
    }
}

/// How a registry ended up configured.
#[derive(Debug)]
pub enum ConfigOutcome {
    /// The configuration file at the given path was applied.
    Loaded(PathBuf),

    /// The configuration file could not be applied; the root logger writes to the console.
    Fallback(LoggingError),
}

impl ConfigOutcome {
    /// Whether the console fallback is in use.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

/// Creates `directory` and any missing parents. Succeeds if it already exists.
pub fn prepare_log_directory(directory: &Path) -> Result<(), LoggingError> {
    fs::create_dir_all(directory)?;
    Ok(())
}

impl LoggerRegistry {
    /// Creates a registry and configures it from `settings`, see [`LoggerRegistry::configure`].
    pub fn initialize(settings: &Settings) -> Self {
        let registry = Self::new(
            QualifiedNameResolver::new(settings.search_roots.iter().cloned()),
            settings.root_level,
        );
        registry.configure(settings);
        registry
    }

    /// Configures the registry from `settings`, falling back to a plain-text console handler on
    /// standard output.
    pub fn configure(&self, settings: &Settings) -> ConfigOutcome {
        self.configure_with_fallback(settings, || Arc::new(ConsoleHandler::stdout()))
    }

    /// Configures the registry from `settings`.
    ///
    /// The root logger is reset to the configured level without handlers, and the log directory
    /// is created. Then the configuration file is loaded and applied, after which every rotating
    /// file handler rolls over. If the file cannot be loaded or applied, the handler built by
    /// `fallback` is attached to the root logger instead and the failure is logged through it.
    /// No failure is returned to the caller.
    pub fn configure_with_fallback(
        &self,
        settings: &Settings,
        fallback: impl FnOnce() -> Arc<dyn Handler>,
    ) -> ConfigOutcome {
        let _frame = crate::frame!();

        let root = self.root();
        root.set_level(settings.root_level);
        root.clear_handlers();

        if let Some(directory) = &settings.log_directory {
            if let Err(error) = prepare_log_directory(directory) {
                tracing::warn!(
                    %error,
                    directory = %directory.display(),
                    "Failed to create log directory"
                );
            }
        }

        let logger_name = ModulePath::from_rust_path(module_path!()).to_string();
        let logger = self.get(Some(logger_name.as_str()));
        let config_path = &settings.config_path;

        let applied = FileConfig::load(config_path)
            .and_then(|config| config.apply(self, settings.log_directory.as_deref()));
        match applied {
            Ok(()) => {
                if root.handlers().is_empty() {
                    root.add_handler(fallback());
                }
                logger.info("Using config properties: {}", &[&config_path.display()]);
                self.rollover_all();
                ConfigOutcome::Loaded(config_path.clone())
            }
            Err(error) => {
                root.add_handler(fallback());
                logger.debug("Failed to parse log config: {}", &[&config_path.display()]);
                logger.log(Level::DEBUG, "ERROR: {}", &[&error], Some(&error));
                let module = module_path!().rsplit("::").next().unwrap_or(module_path!());
                logger.info("Using DEFAULT config properties in {}.", &[&module]);
                ConfigOutcome::Fallback(error)
            }
        }
    }
}
