//! An explicit, per-thread call stack of the frames that logging calls are attributed to.
//!
//! Frames are entered by [`frame!`](crate::frame!) at the top of a function (optionally
//! recording the method receiver), by the logging macros at each call site, and by the logger
//! around its own dispatch. [`frame_at`] then walks this stack from the innermost frame outward.

use std::{cell::RefCell, marker::PhantomData, panic::Location};

/// Declared module name of the program's entry point.
pub const ENTRY_POINT_MODULE: &str = "__main__";

/// Name of the binding holding the receiver of a method call.
pub const RECEIVER_BINDING: &str = "self";

thread_local! {
    static STACK: RefCell<Vec<StackFrame>> = const { RefCell::new(Vec::new()) };
}

/// The module a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleRef {
    name: &'static str,
    file: &'static str,
}

impl ModuleRef {
    /// Creates a reference to the module declared as `name` (a `module_path!()`), defined in
    /// `file`.
    pub const fn new(name: &'static str, file: &'static str) -> Self {
        Self { name, file }
    }

    /// Creates a reference to the entry-point module defined in `file`.
    pub const fn entry_point(file: &'static str) -> Self {
        Self::new(ENTRY_POINT_MODULE, file)
    }

    /// The declared name of the module.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The source file defining the module.
    pub fn file(&self) -> &'static str {
        self.file
    }

    /// Whether the module is declared as the program's entry point.
    pub fn is_entry_point(&self) -> bool {
        self.name == ENTRY_POINT_MODULE
    }
}

/// Local bindings of a frame, as pairs of binding name and runtime type name.
///
/// Only the receiver binding is consulted when resolving identities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    entries: Vec<(&'static str, &'static str)>,
}

impl Bindings {
    /// Creates an empty set of bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates bindings holding only the receiver, of type `T`.
    ///
    /// `T` is the type the method is implemented on (`Self`), not the type of the `self`
    /// binding, which may be a `Box<Self>`, `Arc<Self>` or `Pin<&mut Self>`.
    pub fn with_receiver<T: ?Sized>() -> Self {
        let mut bindings = Self::new();
        bindings.bind(
            RECEIVER_BINDING,
            short_type_name(std::any::type_name::<T>()),
        );
        bindings
    }

    /// Binds `name` to `type_name`, replacing any previous binding of the same name.
    pub fn bind(&mut self, name: &'static str, type_name: &'static str) {
        match self.entries.iter_mut().find(|(bound, _)| *bound == name) {
            Some(entry) => entry.1 = type_name,
            None => self.entries.push((name, type_name)),
        }
    }

    /// The type name bound to `name`, if any.
    pub fn get(&self, name: &str) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(bound, _)| *bound == name)
            .map(|(_, type_name)| *type_name)
    }

    /// The type name of the receiver, if the frame belongs to a method call.
    pub fn receiver(&self) -> Option<&'static str> {
        self.get(RECEIVER_BINDING)
    }

    /// Whether no bindings are recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One activation on the call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    module: ModuleRef,
    file: &'static str,
    line: u32,
    function_path: &'static str,
    bindings: Bindings,
}

impl StackFrame {
    /// Creates a frame without bindings. `function_path` is the full path of the enclosing
    /// function, as produced by `std::any::type_name`.
    pub fn new(
        module: ModuleRef,
        file: &'static str,
        line: u32,
        function_path: &'static str,
    ) -> Self {
        Self {
            module,
            file,
            line,
            function_path,
            bindings: Bindings::default(),
        }
    }

    /// Replaces the bindings of the frame.
    #[must_use]
    pub fn with_bindings(mut self, bindings: Bindings) -> Self {
        self.bindings = bindings;
        self
    }

    /// The module defining the frame.
    pub fn module(&self) -> ModuleRef {
        self.module
    }

    /// The source file currently executing in the frame.
    pub fn file(&self) -> &'static str {
        self.file
    }

    /// The line currently executing in the frame.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// The full path of the enclosing function.
    pub fn function_path(&self) -> &'static str {
        self.function_path
    }

    /// The name of the enclosing function, without its path or closure suffixes.
    pub fn function(&self) -> &'static str {
        short_function_name(self.function_path)
    }

    /// The local bindings of the frame.
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    fn is_same_activation(&self, other: &Self) -> bool {
        self.function_path == other.function_path
            && self.file == other.file
            && self.module == other.module
    }

    /// Whether `call_site` lies in a closure defined by this frame's function.
    fn encloses(&self, call_site: &Self) -> bool {
        call_site.function_path != self.function_path
            && strip_closures(call_site.function_path) == self.function_path
            && call_site.file == self.file
            && call_site.module == self.module
    }
}

#[derive(Debug, Clone, Copy)]
enum Restore {
    Truncate(usize),
    Line { index: usize, line: u32 },
    Nothing,
}

/// Leaves the frame (or the line position) it was created for when dropped.
///
/// Guards are tied to the thread that created them.
#[derive(Debug)]
#[must_use = "the frame is left as soon as the guard is dropped"]
pub struct FrameGuard {
    restore: Restore,
    _not_send: PhantomData<*const ()>,
}

impl FrameGuard {
    fn new(restore: Restore) -> Self {
        Self {
            restore,
            _not_send: PhantomData,
        }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let restore = self.restore;
        // The stack may already be gone while the thread is being torn down.
        let _ = STACK.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            match restore {
                Restore::Truncate(len) => stack.truncate(len),
                Restore::Line { index, line } => {
                    if let Some(frame) = stack.get_mut(index) {
                        frame.line = line;
                    }
                }
                Restore::Nothing => (),
            }
        });
    }
}

/// Returns the frame `skip` levels out from the innermost frame of the current thread.
///
/// `skip = 0` is the innermost frame, i.e. the frame of whoever calls this function. Returns
/// `None` when fewer than `skip + 1` frames are live.
pub fn frame_at(skip: usize) -> Option<StackFrame> {
    STACK
        .try_with(|stack| {
            let stack = stack.borrow();
            let index = stack.len().checked_sub(skip.checked_add(1)?)?;
            stack.get(index).cloned()
        })
        .ok()
        .flatten()
}

/// Number of live frames on the current thread.
pub fn depth() -> usize {
    STACK.try_with(|stack| stack.borrow().len()).unwrap_or(0)
}

/// Enters a new activation. The frame is left when the returned guard is dropped.
pub fn enter(frame: StackFrame) -> FrameGuard {
    let restore = STACK
        .try_with(|stack| {
            let mut stack = stack.borrow_mut();
            let len = stack.len();
            stack.push(frame);
            Restore::Truncate(len)
        })
        .unwrap_or(Restore::Nothing);
    FrameGuard::new(restore)
}

/// Records a call site.
///
/// If the innermost frame is the activation the call site belongs to, only its current line
/// moves to `frame.line()` until the guard is dropped. Otherwise `frame` is entered as a new
/// activation. A call site inside a closure of the innermost frame's function shares that
/// frame's bindings, so calls from closures in a method stay attributed to the receiver.
pub fn enter_call_site(mut frame: StackFrame) -> FrameGuard {
    let restore = STACK
        .try_with(|stack| {
            let mut stack = stack.borrow_mut();
            let len = stack.len();
            let index = len.saturating_sub(1);
            if let Some(top) = stack
                .get_mut(index)
                .filter(|top| top.is_same_activation(&frame))
            {
                return Restore::Line {
                    index,
                    line: std::mem::replace(&mut top.line, frame.line),
                };
            }
            if let Some(top) = stack.get(index).filter(|top| top.encloses(&frame)) {
                frame.bindings = top.bindings.clone();
            }
            stack.push(frame);
            Restore::Truncate(len)
        })
        .unwrap_or(Restore::Nothing);
    FrameGuard::new(restore)
}

/// Moves the current line of the innermost frame to `location`, if both are in the same file.
pub fn enter_location(location: &Location<'_>) -> FrameGuard {
    let restore = STACK
        .try_with(|stack| {
            let mut stack = stack.borrow_mut();
            let index = stack.len().saturating_sub(1);
            stack
                .get_mut(index)
                .filter(|top| top.file == location.file())
                .map_or(Restore::Nothing, |top| Restore::Line {
                    index,
                    line: std::mem::replace(&mut top.line, location.line()),
                })
        })
        .unwrap_or(Restore::Nothing);
    FrameGuard::new(restore)
}

/// Last path segment of a type name, without references or generic arguments.
pub(crate) fn short_type_name(type_name: &'static str) -> &'static str {
    let mut name = type_name;
    loop {
        let trimmed = name
            .trim_start_matches('&')
            .trim_start_matches("mut ")
            .trim_start_matches("dyn ");
        if trimmed.len() == name.len() {
            break;
        }
        name = trimmed;
    }
    let name = name.split('<').next().unwrap_or(name);
    name.rsplit("::").next().unwrap_or(name)
}

fn strip_closures(function_path: &'static str) -> &'static str {
    let mut path = function_path;
    while let Some(stripped) = path.strip_suffix("::{{closure}}") {
        path = stripped;
    }
    path
}

fn short_function_name(function_path: &'static str) -> &'static str {
    let path = strip_closures(function_path);
    path.rsplit("::").next().unwrap_or(path)
}
