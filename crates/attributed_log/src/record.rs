//! Log records as they are handed to sinks.

use std::{
    backtrace::{Backtrace, BacktraceStatus},
    error::Error,
    fmt::{self, Display},
    sync::OnceLock,
    thread::{self, ThreadId},
};

use time::{OffsetDateTime, UtcOffset};
use tracing::Level;

use crate::resolver::QualifiedIdentity;

static LOCAL_OFFSET: OnceLock<UtcOffset> = OnceLock::new();

/// Reads the local UTC offset, unless it was read before.
///
/// The offset can only be determined while the process is single-threaded, so registries read
/// it on creation. If it cannot be determined, timestamps are in UTC.
pub(crate) fn local_offset() -> UtcOffset {
    *LOCAL_OFFSET.get_or_init(|| UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC))
}

pub(crate) fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(local_offset())
}

/// An error captured along with a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    message: String,
    sources: Vec<String>,
    backtrace: Option<String>,
}

impl ErrorInfo {
    /// Captures the message and source chain of `error`, and a backtrace of the logging call
    /// when backtraces are enabled.
    pub fn capture(error: &dyn Error) -> Self {
        let sources = std::iter::successors(error.source(), |&source| source.source())
            .map(ToString::to_string)
            .collect();
        let backtrace = Backtrace::capture();
        let backtrace = (backtrace.status() == BacktraceStatus::Captured)
            .then(|| backtrace.to_string());

        Self {
            message: error.to_string(),
            sources,
            backtrace,
        }
    }

    /// The message of the error itself.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Messages of the chain of underlying errors, outermost first.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Backtrace of the logging call, if one was captured.
    pub fn backtrace(&self) -> Option<&str> {
        self.backtrace.as_deref()
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for source in &self.sources {
            write!(f, "\nCaused by: {source}")?;
        }
        if let Some(backtrace) = &self.backtrace {
            write!(f, "\n{backtrace}")?;
        }
        Ok(())
    }
}

/// A single logging event, attributed to the qualified identity of its call site.
#[derive(Debug, Clone)]
pub struct LogRecord {
    name: String,
    logger_name: String,
    level: Level,
    template: String,
    args: Vec<String>,
    file: &'static str,
    line: u32,
    function: &'static str,
    timestamp: OffsetDateTime,
    thread_name: String,
    thread_id: ThreadId,
    error: Option<ErrorInfo>,
}

impl LogRecord {
    /// Creates a record for a call made through the logger named `logger_name`, stamped with the
    /// current time and thread.
    pub fn new(
        logger_name: &str,
        identity: &QualifiedIdentity,
        level: Level,
        template: &str,
        args: &[&dyn Display],
        error: Option<ErrorInfo>,
    ) -> Self {
        let thread = thread::current();
        let thread_id = thread.id();
        let thread_name = thread
            .name()
            .map_or_else(|| format!("{thread_id:?}"), ToOwned::to_owned);

        Self {
            name: identity.display_name(),
            logger_name: logger_name.to_owned(),
            level,
            template: template.to_owned(),
            args: args.iter().map(ToString::to_string).collect(),
            file: identity.source_file(),
            line: identity.line(),
            function: identity.function(),
            timestamp: now_local(),
            thread_name,
            thread_id,
            error,
        }
    }

    /// The qualified identity the record is attributed to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name of the logger the record was emitted through.
    pub fn logger_name(&self) -> &str {
        &self.logger_name
    }

    /// The severity of the record.
    pub fn level(&self) -> Level {
        self.level
    }

    /// The message template, before argument substitution.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// The rendered message arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The message with arguments substituted into the template.
    pub fn message(&self) -> String {
        render_message(&self.template, &self.args)
    }

    /// The source file of the call.
    pub fn file(&self) -> &'static str {
        self.file
    }

    /// The line of the call.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// The function the call was made from.
    pub fn function(&self) -> &'static str {
        self.function
    }

    /// When the record was created, in local time.
    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    /// The name of the emitting thread, or its id if the thread is unnamed.
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// The id of the emitting thread.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// The error captured with the record, if any.
    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }
}

/// Substitutes `args` positionally for the `{}` and `%s` placeholders of `template`.
///
/// Without arguments the template is returned verbatim. Otherwise `{{`, `}}` and `%%` stand for
/// literal braces and percent signs, and placeholders left over after the arguments run out are
/// kept as written.
pub fn render_message<S: AsRef<str>>(template: &str, args: &[S]) -> String {
    if args.is_empty() {
        return template.to_owned();
    }

    let mut rendered = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        let next = chars.peek().copied();
        match (c, next) {
            ('{', Some('{')) | ('}', Some('}')) | ('%', Some('%')) => {
                rendered.push(c);
                chars.next();
            }
            ('{', Some('}')) | ('%', Some('s')) => {
                let placeholder = chars.next();
                match args.next() {
                    Some(arg) => rendered.push_str(arg.as_ref()),
                    None => {
                        rendered.push(c);
                        rendered.extend(placeholder);
                    }
                }
            }
            _ => rendered.push(c),
        }
    }
    rendered
}
