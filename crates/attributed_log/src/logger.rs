//! The logger that attributes records to the qualified identity of their call site.

use std::{
    error::Error,
    fmt::{self, Display},
    panic::Location,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::RwLock;
use tracing::Level;

use crate::{
    frame::{self, ENTRY_POINT_MODULE},
    handler::Handler,
    record::{ErrorInfo, LogRecord},
    resolver::{QualifiedIdentity, QualifiedNameResolver},
};

/// Frames between a logging call and the frame it is attributed to: the logger's own dispatch
/// frame.
pub const CALLER_SKIP: usize = 1;

/// Frames between the code requesting a logger and the frame the entry-point name is resolved
/// from: the registry lookup and the logger constructor.
pub const CONSTRUCTOR_SKIP: usize = 2;

/// A named logger whose records are attributed to the code that emits them.
///
/// Records carry the logger's name, extended with the receiver's type when the call is made from
/// a method whose frame was entered with [`frame!(self)`](crate::frame!). The source location
/// and function of the call are taken from the same frame.
///
/// Loggers are obtained from a [`LoggerRegistry`](crate::LoggerRegistry) and form a hierarchy by
/// their dotted names: records are passed to the handlers of the logger and of its ancestors,
/// up to the first logger that does not propagate.
pub struct AttributingLogger {
    name: String,
    level: RwLock<Option<Level>>,
    handlers: RwLock<Vec<Arc<dyn Handler>>>,
    parent: RwLock<Option<Arc<Self>>>,
    propagate: AtomicBool,
    resolver: Arc<QualifiedNameResolver>,
}

impl AttributingLogger {
    pub(crate) fn root(name: &str, resolver: Arc<QualifiedNameResolver>, level: Level) -> Self {
        Self::with_name(name.to_owned(), resolver, Some(level))
    }

    /// Creates the logger named `name`, requested from `location`.
    ///
    /// A logger requested as the entry-point module is named after the module path of the
    /// requesting frame instead.
    pub(crate) fn new(
        name: &str,
        resolver: Arc<QualifiedNameResolver>,
        location: &'static Location<'static>,
    ) -> Self {
        let _frame = crate::frame!();

        let name = if name == ENTRY_POINT_MODULE {
            let module_path = frame::frame_at(CONSTRUCTOR_SKIP)
                .filter(|caller| caller.file() == location.file())
                .map(|caller| resolver.module_path_of(&caller))
                .unwrap_or_else(|| resolver.module_path_for_file(location.file()));
            if module_path.is_empty() {
                name.to_owned()
            } else {
                module_path.to_string()
            }
        } else {
            name.to_owned()
        };

        Self::with_name(name, resolver, None)
    }

    fn with_name(name: String, resolver: Arc<QualifiedNameResolver>, level: Option<Level>) -> Self {
        Self {
            name,
            level: RwLock::new(level),
            handlers: RwLock::new(Vec::new()),
            parent: RwLock::new(None),
            propagate: AtomicBool::new(true),
            resolver,
        }
    }

    /// The name of the logger.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The level set on this logger, if any.
    pub fn level(&self) -> Option<Level> {
        *self.level.read()
    }

    /// Sets the least severe level the logger emits. `None` defers to the ancestors.
    pub fn set_level(&self, level: impl Into<Option<Level>>) {
        *self.level.write() = level.into();
    }

    /// The level of the nearest logger in the hierarchy that has one set.
    pub fn effective_level(&self) -> Level {
        if let Some(level) = self.level() {
            return level;
        }
        let mut current = self.parent();
        while let Some(logger) = current {
            if let Some(level) = logger.level() {
                return level;
            }
            current = logger.parent();
        }
        Level::TRACE
    }

    /// Whether records at `level` would be emitted.
    pub fn is_enabled_for(&self, level: Level) -> bool {
        level <= self.effective_level()
    }

    /// Attaches a handler.
    pub fn add_handler(&self, handler: Arc<dyn Handler>) {
        self.handlers.write().push(handler);
    }

    /// Detaches `handler`, returning whether it was attached.
    pub fn remove_handler(&self, handler: &Arc<dyn Handler>) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|attached| !Arc::ptr_eq(attached, handler));
        handlers.len() != before
    }

    /// Detaches every handler, flushing them first.
    pub fn clear_handlers(&self) {
        let handlers = std::mem::take(&mut *self.handlers.write());
        handlers.iter().for_each(|handler| handler.flush());
    }

    /// The handlers attached to this logger.
    pub fn handlers(&self) -> Vec<Arc<dyn Handler>> {
        self.handlers.read().clone()
    }

    /// Whether handlers are attached to this logger or any ancestor it propagates to.
    pub fn has_handlers(&self) -> bool {
        !self.effective_handlers().is_empty()
    }

    /// Whether records are passed on to the ancestors' handlers.
    pub fn propagate(&self) -> bool {
        self.propagate.load(Ordering::Acquire)
    }

    /// Sets whether records are passed on to the ancestors' handlers.
    pub fn set_propagate(&self, propagate: bool) {
        self.propagate.store(propagate, Ordering::Release);
    }

    /// The logger's parent in the hierarchy. Only the root has none.
    pub fn parent(&self) -> Option<Arc<Self>> {
        self.parent.read().clone()
    }

    pub(crate) fn set_parent(&self, parent: Arc<Self>) {
        *self.parent.write() = Some(parent);
    }

    /// Logs at [`Level::TRACE`].
    #[track_caller]
    pub fn trace(&self, template: &str, args: &[&dyn Display]) {
        self.log(Level::TRACE, template, args, None);
    }

    /// Logs at [`Level::DEBUG`].
    #[track_caller]
    pub fn debug(&self, template: &str, args: &[&dyn Display]) {
        self.log(Level::DEBUG, template, args, None);
    }

    /// Logs at [`Level::INFO`].
    #[track_caller]
    pub fn info(&self, template: &str, args: &[&dyn Display]) {
        self.log(Level::INFO, template, args, None);
    }

    /// Logs at [`Level::WARN`].
    #[track_caller]
    pub fn warn(&self, template: &str, args: &[&dyn Display]) {
        self.log(Level::WARN, template, args, None);
    }

    /// Logs at [`Level::ERROR`].
    #[track_caller]
    pub fn error(&self, template: &str, args: &[&dyn Display]) {
        self.log(Level::ERROR, template, args, None);
    }

    /// Logs `error` at [`Level::ERROR`], together with its source chain.
    #[track_caller]
    pub fn exception(&self, template: &str, args: &[&dyn Display], error: &dyn Error) {
        self.log(Level::ERROR, template, args, Some(error));
    }

    /// Logs a record at `level`, attributed to the calling frame.
    ///
    /// The record's name is the logger name plus, if the calling frame has a receiver, the
    /// receiver's type. When no calling frame is available, the record is attributed to the
    /// logger name with an unknown source location.
    ///
    /// The call's location replaces the line of the innermost frame when both are in the same
    /// file. A function without a frame of its own that calls this method is therefore reported
    /// with its own line but under the name of the innermost framed function of that file.
    #[track_caller]
    pub fn log(
        &self,
        level: Level,
        template: &str,
        args: &[&dyn Display],
        error: Option<&dyn Error>,
    ) {
        if !self.is_enabled_for(level) {
            return;
        }

        let _call_site = frame::enter_location(Location::caller());
        let _frame = crate::frame!();

        let identity = self
            .resolver
            .resolve_caller_identity(&self.name, CALLER_SKIP)
            .unwrap_or_else(|| QualifiedIdentity::unknown(&self.name));
        let record = LogRecord::new(
            &self.name,
            &identity,
            level,
            template,
            args,
            error.map(ErrorInfo::capture),
        );
        self.handle(&record);
    }

    /// Passes `record` to the handlers of this logger and of the ancestors it propagates to.
    pub fn handle(&self, record: &LogRecord) {
        for handler in self.effective_handlers() {
            if handler.accepts(record.level()) {
                handler.handle(record);
            }
        }
    }

    fn effective_handlers(&self) -> Vec<Arc<dyn Handler>> {
        let mut handlers = self.handlers();
        if !self.propagate() {
            return handlers;
        }
        let mut current = self.parent();
        while let Some(logger) = current {
            handlers.extend(logger.handlers.read().iter().cloned());
            if !logger.propagate() {
                break;
            }
            current = logger.parent();
        }
        handlers
    }
}

impl fmt::Debug for AttributingLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributingLogger")
            .field("name", &self.name)
            .field("level", &self.level())
            .field("handlers", &self.handlers.read().len())
            .field("parent", &self.parent().map(|parent| parent.name.clone()))
            .field("propagate", &self.propagate())
            .finish()
    }
}
