//! The registry of named loggers, and the process-wide instance of it.

use std::{
    iter,
    panic::Location,
    sync::{Arc, OnceLock},
};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::Level;

use crate::{
    LoggingError, handler::Handler, logger::AttributingLogger, record,
    resolver::QualifiedNameResolver, setup::Settings,
};

/// Name of the root logger. Requesting it returns the root itself.
pub const ROOT_LOGGER_NAME: &str = "root";

static GLOBAL: OnceLock<LoggerRegistry> = OnceLock::new();

/// Owns the root logger and every named logger, arranged in a hierarchy by dotted name.
///
/// Loggers are created on first request and live as long as the registry. The parent of a
/// logger is its nearest registered ancestor (`app` for `app.worker`), or the root.
#[derive(Debug)]
pub struct LoggerRegistry {
    root: Arc<AttributingLogger>,
    loggers: Mutex<FxHashMap<String, Arc<AttributingLogger>>>,
    resolver: Arc<QualifiedNameResolver>,
}

impl LoggerRegistry {
    /// Creates a registry whose root logger emits records at `root_level` and above, without
    /// any handlers attached.
    ///
    /// The local UTC offset used for timestamps is read here, so registries should be created
    /// before the process spawns threads.
    pub fn new(resolver: QualifiedNameResolver, root_level: Level) -> Self {
        record::local_offset();
        let resolver = Arc::new(resolver);
        Self {
            root: Arc::new(AttributingLogger::root(
                ROOT_LOGGER_NAME,
                Arc::clone(&resolver),
                root_level,
            )),
            loggers: Mutex::new(FxHashMap::default()),
            resolver,
        }
    }

    /// The root logger.
    pub fn root(&self) -> &Arc<AttributingLogger> {
        &self.root
    }

    /// The resolver shared by every logger of the registry.
    pub fn resolver(&self) -> &QualifiedNameResolver {
        &self.resolver
    }

    /// Returns the logger named `name`, creating it on first request.
    ///
    /// `None`, an empty name and [`ROOT_LOGGER_NAME`] return the root. A logger requested as
    /// [`ENTRY_POINT_MODULE`](crate::ENTRY_POINT_MODULE) is named after the module path of the
    /// calling code.
    #[track_caller]
    pub fn get(&self, name: Option<&str>) -> Arc<AttributingLogger> {
        let _frame = crate::frame!();

        let Some(name) = name.filter(|name| !name.is_empty() && *name != ROOT_LOGGER_NAME) else {
            return Arc::clone(&self.root);
        };

        let mut loggers = self.loggers.lock();
        if let Some(logger) = loggers.get(name) {
            return Arc::clone(logger);
        }

        let logger = Arc::new(AttributingLogger::new(
            name,
            Arc::clone(&self.resolver),
            Location::caller(),
        ));
        if let Some(existing) = loggers.get(logger.name()) {
            return Arc::clone(existing);
        }

        self.attach(&loggers, &logger);
        loggers.insert(logger.name().to_owned(), Arc::clone(&logger));
        logger
    }

    /// Links `logger` into the hierarchy: under its nearest registered ancestor, and above the
    /// registered descendants that were attached to one of its ancestors.
    fn attach(
        &self,
        loggers: &FxHashMap<String, Arc<AttributingLogger>>,
        logger: &Arc<AttributingLogger>,
    ) {
        let name = logger.name();

        let parent = name
            .rmatch_indices('.')
            .filter_map(|(index, _)| name.get(..index))
            .find_map(|ancestor| loggers.get(ancestor))
            .unwrap_or(&self.root);
        logger.set_parent(Arc::clone(parent));

        let subtree = format!("{name}.");
        for descendant in loggers
            .values()
            .filter(|candidate| candidate.name().starts_with(&subtree))
        {
            let attached_within_subtree = descendant
                .parent()
                .is_some_and(|parent| parent.name().starts_with(&subtree));
            if !attached_within_subtree {
                descendant.set_parent(Arc::clone(logger));
            }
        }
    }

    /// The named loggers created so far, ordered by name. The root is not included.
    pub fn loggers(&self) -> Vec<Arc<AttributingLogger>> {
        let mut loggers = self.loggers.lock().values().cloned().collect::<Vec<_>>();
        loggers.sort_by(|a, b| a.name().cmp(b.name()));
        loggers
    }

    fn all_loggers(&self) -> impl Iterator<Item = Arc<AttributingLogger>> {
        iter::once(Arc::clone(&self.root)).chain(self.loggers())
    }

    /// Rolls over every rotating file handler attached to any logger, once per handler.
    ///
    /// Failures are reported through `tracing` and do not stop the remaining rollovers.
    pub fn rollover_all(&self) {
        let mut rolled_over: Vec<Arc<dyn Handler>> = Vec::new();
        for logger in self.all_loggers() {
            for handler in logger.handlers() {
                if !handler.is_rotating()
                    || rolled_over
                        .iter()
                        .any(|done| Arc::ptr_eq(done, &handler))
                {
                    continue;
                }
                if let Err(error) = handler.rollover() {
                    tracing::warn!(%error, logger = logger.name(), "Failed to roll over log file");
                }
                rolled_over.push(handler);
            }
        }
    }

    /// Flushes every handler attached to any logger.
    pub fn flush(&self) {
        self.all_loggers()
            .flat_map(|logger| logger.handlers())
            .for_each(|handler| handler.flush());
    }

    /// Flushes and detaches every handler. Loggers remain registered and can be given new
    /// handlers afterwards.
    pub fn shutdown(&self) {
        self.all_loggers()
            .for_each(|logger| logger.clear_handlers());
    }
}

/// Creates the process-wide registry from `settings`.
///
/// # Errors
///
/// Returns [`LoggingError::AlreadyInitialized`] if the process-wide registry already exists,
/// whether created by an earlier call or lazily by [`global`].
pub fn init(settings: Settings) -> Result<&'static LoggerRegistry, LoggingError> {
    let mut created = false;
    let registry = GLOBAL.get_or_init(|| {
        created = true;
        LoggerRegistry::initialize(&settings)
    });
    if created {
        Ok(registry)
    } else {
        Err(LoggingError::AlreadyInitialized)
    }
}

/// The process-wide registry, initialized from [`Settings::from_env`] on first use unless
/// [`init`] was called before.
pub fn global() -> &'static LoggerRegistry {
    GLOBAL.get_or_init(|| LoggerRegistry::initialize(&Settings::from_env()))
}

/// Returns the logger named `name` from the process-wide registry.
#[track_caller]
pub fn get(name: Option<&str>) -> Arc<AttributingLogger> {
    global().get(name)
}

#[cfg(test)]
mod tests {
    use std::{path::Path, thread};

    use super::*;
    use crate::{ENTRY_POINT_MODULE, handler::MemoryHandler};

    fn registry() -> LoggerRegistry {
        LoggerRegistry::new(QualifiedNameResolver::default(), Level::DEBUG)
    }

    fn parent_name(logger: &AttributingLogger) -> Option<String> {
        logger.parent().map(|parent| parent.name().to_owned())
    }

    #[test]
    fn root_is_a_singleton() {
        let registry = registry();
        let root = registry.get(None);

        assert!(Arc::ptr_eq(&root, registry.root()));
        assert!(Arc::ptr_eq(&root, &registry.get(Some(""))));
        assert!(Arc::ptr_eq(&root, &registry.get(Some(ROOT_LOGGER_NAME))));
        assert_eq!(root.level(), Some(Level::DEBUG));
        assert!(root.parent().is_none());
        assert!(registry.loggers().is_empty());
    }

    #[test]
    fn same_name_returns_same_logger() {
        let registry = registry();
        let first = registry.get(Some("app.worker"));
        let second = registry.get(Some("app.worker"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.loggers().len(), 1);
    }

    #[test]
    fn loggers_attach_to_nearest_ancestor() {
        let registry = registry();
        let leaf = registry.get(Some("app.jobs.worker"));
        assert_eq!(parent_name(&leaf).as_deref(), Some(ROOT_LOGGER_NAME));

        let app = registry.get(Some("app"));
        assert_eq!(parent_name(&app).as_deref(), Some(ROOT_LOGGER_NAME));
        assert_eq!(parent_name(&leaf).as_deref(), Some("app"));

        let jobs = registry.get(Some("app.jobs"));
        assert_eq!(parent_name(&jobs).as_deref(), Some("app"));
        assert_eq!(parent_name(&leaf).as_deref(), Some("app.jobs"));

        let sibling = registry.get(Some("application"));
        assert_eq!(parent_name(&sibling).as_deref(), Some(ROOT_LOGGER_NAME));
    }

    #[test]
    fn entry_point_requests_are_renamed() {
        let crate_dir = Path::new(file!())
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let registry = LoggerRegistry::new(QualifiedNameResolver::new([crate_dir]), Level::DEBUG);

        let without_frames = registry.get(Some(ENTRY_POINT_MODULE));
        assert_eq!(without_frames.name(), "src.registry");

        let _frame = crate::entry_frame!();
        let within_entry_frame = registry.get(Some(ENTRY_POINT_MODULE));
        assert!(Arc::ptr_eq(&without_frames, &within_entry_frame));

        assert!(
            registry
                .loggers()
                .iter()
                .all(|logger| logger.name() != ENTRY_POINT_MODULE)
        );
    }

    #[test]
    fn concurrent_requests_create_one_logger() {
        let registry = registry();
        let loggers = thread::scope(|scope| {
            let handles = (0..8)
                .map(|_| scope.spawn(|| registry.get(Some("app.shared"))))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread must not panic"))
                .collect::<Vec<_>>()
        });

        let first = loggers.first().expect("threads must return loggers");
        assert!(loggers.iter().all(|logger| Arc::ptr_eq(first, logger)));
        assert_eq!(registry.loggers().len(), 1);
    }

    #[test]
    fn shutdown_detaches_handlers() {
        let registry = registry();
        let records = Arc::new(MemoryHandler::new());
        registry.root().add_handler(records.clone());
        registry.get(Some("app")).add_handler(records.clone());

        registry.flush();
        registry.shutdown();

        assert!(registry.root().handlers().is_empty());
        assert!(!registry.get(Some("app")).has_handlers());
    }
}
