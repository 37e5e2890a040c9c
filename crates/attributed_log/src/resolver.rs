//! Resolution of the qualified identity a logging call is attributed to.

use std::{
    fmt,
    path::{Component, Path, PathBuf},
};

use crate::frame::{self, StackFrame};

/// Source file reported when the calling frame cannot be inspected.
pub const UNKNOWN_FILE: &str = "(unknown file)";

/// Function name reported when the calling frame cannot be inspected.
pub const UNKNOWN_FUNCTION: &str = "(unknown function)";

/// A dot-delimited path identifying a logical unit of code, such as `app.worker`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ModulePath {
    segments: Vec<String>,
}

impl ModulePath {
    /// Creates an empty path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts a Rust module path (`app::worker`) into a module path (`app.worker`).
    pub fn from_rust_path(path: &str) -> Self {
        path.split("::").map(ToOwned::to_owned).collect()
    }

    /// Parses a dotted name (`app.worker`).
    pub fn from_dotted(name: &str) -> Self {
        name.split('.').map(ToOwned::to_owned).collect()
    }

    /// Appends a segment. Empty segments are ignored.
    pub fn push(&mut self, segment: impl Into<String>) {
        let segment = segment.into();
        if !segment.is_empty() {
            self.segments.push(segment);
        }
    }

    /// The segments of the path, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether the path has no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl FromIterator<String> for ModulePath {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut path = Self::new();
        iter.into_iter().for_each(|segment| path.push(segment));
        path
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// The identity stamped onto a log record in place of the logger's own name, together with the
/// source location of the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedIdentity {
    module_path: ModulePath,
    type_name: Option<&'static str>,
    source_file: &'static str,
    line: u32,
    function: &'static str,
}

impl QualifiedIdentity {
    /// The identity used when the calling frame cannot be inspected: the logger's own name and
    /// sentinel source location.
    pub fn unknown(logger_name: &str) -> Self {
        Self {
            module_path: ModulePath::from_dotted(logger_name),
            type_name: None,
            source_file: UNKNOWN_FILE,
            line: 0,
            function: UNKNOWN_FUNCTION,
        }
    }

    /// The module part of the identity.
    pub fn module_path(&self) -> &ModulePath {
        &self.module_path
    }

    /// The enclosing type, when the call was made from a method.
    pub fn type_name(&self) -> Option<&'static str> {
        self.type_name
    }

    /// The source file of the call.
    pub fn source_file(&self) -> &'static str {
        self.source_file
    }

    /// The line of the call.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// The function the call was made from.
    pub fn function(&self) -> &'static str {
        self.function
    }

    /// The module path and type name, joined with `.`.
    pub fn display_name(&self) -> String {
        let mut name = self.module_path.to_string();
        if let Some(type_name) = self.type_name {
            if !name.is_empty() {
                name.push('.');
            }
            name.push_str(type_name);
        }
        name
    }
}

impl fmt::Display for QualifiedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Computes module paths and caller identities from the frames on the current thread's stack.
///
/// The search roots play the part of the directories code is loaded from: they are used to
/// rebuild the logical path of the entry-point module from its source file location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualifiedNameResolver {
    search_roots: Vec<PathBuf>,
}

impl QualifiedNameResolver {
    /// Creates a resolver scanning `search_roots` in the given order. Empty roots are ignored.
    pub fn new<I, P>(search_roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            search_roots: search_roots
                .into_iter()
                .map(Into::into)
                .filter(|root: &PathBuf| !root.as_os_str().is_empty())
                .collect(),
        }
    }

    /// The configured search roots.
    pub fn search_roots(&self) -> &[PathBuf] {
        &self.search_roots
    }

    /// Resolves the module path of the frame `skip` levels out from the innermost frame.
    ///
    /// Returns an empty path when the stack is shallower than requested.
    pub fn resolve_module_path(&self, skip: usize) -> ModulePath {
        frame::frame_at(skip)
            .map(|frame| self.module_path_of(&frame))
            .unwrap_or_default()
    }

    /// The module path of `frame`: its declared module name, or for the entry-point module, the
    /// path rebuilt from the module's source file.
    pub fn module_path_of(&self, frame: &StackFrame) -> ModulePath {
        let module = frame.module();
        if module.is_entry_point() {
            self.module_path_for_file(module.file())
        } else {
            ModulePath::from_rust_path(module.name())
        }
    }

    /// Rebuilds a module path from the location of a source file.
    ///
    /// The first search root (in configured order) that is a proper prefix of the file's
    /// directory is stripped, and the remaining directories followed by the file stem form the
    /// path. Without such a root, the path is the directory's own name followed by the file stem.
    pub fn module_path_for_file(&self, file: &str) -> ModulePath {
        let file = Path::new(file);
        let package_dir = file.parent().unwrap_or_else(|| Path::new(""));

        let package = self
            .search_roots
            .iter()
            .find(|root| package_dir.starts_with(root) && package_dir != root.as_path())
            .and_then(|root| package_dir.strip_prefix(root).ok());

        let mut path = ModulePath::new();
        match package {
            Some(package) => package
                .components()
                .filter_map(|component| match component {
                    Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
                    _ => None,
                })
                .for_each(|segment| path.push(segment)),
            None => {
                if let Some(directory) = package_dir.file_name() {
                    path.push(directory.to_string_lossy());
                }
            }
        }
        if let Some(stem) = file.file_stem() {
            path.push(stem.to_string_lossy());
        }
        path
    }

    /// Resolves the identity of the frame `skip` levels out from the innermost frame, for a call
    /// made through the logger named `logger_name`.
    ///
    /// Returns `None` when the stack is shallower than requested.
    pub fn resolve_caller_identity(
        &self,
        logger_name: &str,
        skip: usize,
    ) -> Option<QualifiedIdentity> {
        frame::frame_at(skip).map(|frame| Self::identity_of(logger_name, &frame))
    }

    /// The identity of a call made from `frame` through the logger named `logger_name`.
    ///
    /// Only frames carrying a receiver binding are attributed to a type; calls from associated
    /// functions resolve to the logger name alone.
    pub fn identity_of(logger_name: &str, frame: &StackFrame) -> QualifiedIdentity {
        QualifiedIdentity {
            module_path: ModulePath::from_dotted(logger_name),
            type_name: frame.bindings().receiver(),
            source_file: frame.file(),
            line: frame.line(),
            function: frame.function(),
        }
    }
}
