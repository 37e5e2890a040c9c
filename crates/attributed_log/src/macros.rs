//! Macros capturing call-site information at compile time.

/// Returns the full path of the enclosing function.
#[doc(hidden)]
#[macro_export]
macro_rules! __function_path {
    () => {{
        fn __here() {}
        fn __type_name_of<T>(_: T) -> &'static str {
            ::core::any::type_name::<T>()
        }
        let path = __type_name_of(__here);
        match path.strip_suffix("::__here") {
            ::core::option::Option::Some(path) => path,
            ::core::option::Option::None => path,
        }
    }};
}

/// Builds a [`StackFrame`](crate::StackFrame) for the location the macro is invoked at.
#[macro_export]
macro_rules! here {
    () => {
        $crate::StackFrame::new(
            $crate::ModuleRef::new(::core::module_path!(), ::core::file!()),
            ::core::file!(),
            ::core::line!(),
            $crate::__function_path!(),
        )
    };
}

/// Enters a frame for the enclosing function, returning a guard that leaves it when dropped.
///
/// Pass `self` in a method to have calls made from it, and from closures defined in it,
/// attributed to the type the method is implemented on. Any receiver form is accepted
/// (`&self`, `&mut self`, `self: Box<Self>`, `self: Arc<Self>`, ...).
///
/// # Example
///
/// ```
/// struct Worker;
///
/// impl Worker {
///     fn run(&self) {
///         let _frame = attributed_log::frame!(self);
///         let frame = attributed_log::frame::frame_at(0).expect("frame was just entered");
///         assert_eq!(frame.bindings().receiver(), Some("Worker"));
///     }
/// }
///
/// Worker.run();
/// ```
#[macro_export]
macro_rules! frame {
    () => {
        $crate::frame::enter($crate::here!())
    };
    (self) => {
        $crate::frame::enter(
            $crate::here!().with_bindings($crate::Bindings::with_receiver::<Self>()),
        )
    };
}

/// Enters a frame for the enclosing function, declaring its module as the program's entry point.
///
/// Loggers requested as [`ENTRY_POINT_MODULE`](crate::ENTRY_POINT_MODULE) from within such a
/// frame are named after the location of the entry-point source file.
#[macro_export]
macro_rules! entry_frame {
    () => {
        $crate::frame::enter($crate::StackFrame::new(
            $crate::ModuleRef::entry_point(::core::file!()),
            ::core::file!(),
            ::core::line!(),
            $crate::__function_path!(),
        ))
    };
}

/// Returns the logger named after the current module, from the process-wide registry.
///
/// ```
/// let logger = attributed_log::logger!();
/// assert_eq!(logger.name(), module_path!().replace("::", "."));
/// ```
#[macro_export]
macro_rules! logger {
    () => {{
        let name = $crate::ModulePath::from_rust_path(::core::module_path!()).to_string();
        $crate::get(::core::option::Option::Some(name.as_str()))
    }};
}

/// Logs through `$logger` at `$level`, recording the call site first.
///
/// Arguments are substituted positionally for `{}` (or `%s`) in the template. Prefix the
/// template with `error: <expr>,` to capture an error along with the record.
#[macro_export]
macro_rules! log {
    ($logger:expr, $level:expr, error: $error:expr, $template:expr $(, $arg:expr)* $(,)?) => {{
        let _call_site = $crate::frame::enter_call_site($crate::here!());
        $logger.log(
            $level,
            $template,
            &[$(&$arg as &dyn ::core::fmt::Display),*],
            ::core::option::Option::Some(&$error as &dyn ::std::error::Error),
        )
    }};
    ($logger:expr, $level:expr, $template:expr $(, $arg:expr)* $(,)?) => {{
        let _call_site = $crate::frame::enter_call_site($crate::here!());
        $logger.log(
            $level,
            $template,
            &[$(&$arg as &dyn ::core::fmt::Display),*],
            ::core::option::Option::None,
        )
    }};
}

/// Logs at [`Level::TRACE`](crate::Level::TRACE). See [`log!`](crate::log!).
#[macro_export]
macro_rules! trace {
    ($logger:expr, $($rest:tt)+) => {
        $crate::log!($logger, $crate::Level::TRACE, $($rest)+)
    };
}

/// Logs at [`Level::DEBUG`](crate::Level::DEBUG). See [`log!`](crate::log!).
#[macro_export]
macro_rules! debug {
    ($logger:expr, $($rest:tt)+) => {
        $crate::log!($logger, $crate::Level::DEBUG, $($rest)+)
    };
}

/// Logs at [`Level::INFO`](crate::Level::INFO). See [`log!`](crate::log!).
#[macro_export]
macro_rules! info {
    ($logger:expr, $($rest:tt)+) => {
        $crate::log!($logger, $crate::Level::INFO, $($rest)+)
    };
}

/// Logs at [`Level::WARN`](crate::Level::WARN). See [`log!`](crate::log!).
#[macro_export]
macro_rules! warn {
    ($logger:expr, $($rest:tt)+) => {
        $crate::log!($logger, $crate::Level::WARN, $($rest)+)
    };
}

/// Logs at [`Level::ERROR`](crate::Level::ERROR). See [`log!`](crate::log!).
#[macro_export]
macro_rules! error {
    ($logger:expr, $($rest:tt)+) => {
        $crate::log!($logger, $crate::Level::ERROR, $($rest)+)
    };
}
