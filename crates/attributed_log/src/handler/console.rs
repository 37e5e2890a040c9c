use std::io::{self, Write};

use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

use super::Handler;
use crate::{
    formatter::{RecordFormatter, TextFormatter},
    record::LogRecord,
};

/// Writes formatted records to a console stream, or any other [`MakeWriter`].
#[derive(Debug)]
pub struct ConsoleHandler<W = fn() -> io::Stdout> {
    make_writer: W,
    formatter: Box<dyn RecordFormatter>,
    level: Option<Level>,
}

impl ConsoleHandler {
    /// Creates a handler writing plain-text records to standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout as fn() -> io::Stdout)
    }
}

impl ConsoleHandler<fn() -> io::Stderr> {
    /// Creates a handler writing plain-text records to standard error.
    pub fn stderr() -> Self {
        Self::new(io::stderr as fn() -> io::Stderr)
    }
}

impl<W> ConsoleHandler<W>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    /// Creates a handler writing plain-text records to `make_writer`.
    pub fn new(make_writer: W) -> Self {
        Self {
            make_writer,
            formatter: Box::new(TextFormatter),
            level: None,
        }
    }

    /// Replaces the formatter.
    #[must_use]
    pub fn with_formatter(mut self, formatter: impl RecordFormatter + 'static) -> Self {
        self.formatter = Box::new(formatter);
        self
    }

    /// Sets the least severe level the handler emits.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<Option<Level>>) -> Self {
        self.level = level.into();
        self
    }

    /// Writes the line with its trailing newline in a single `write_all` call, so that lines
    /// from concurrent threads do not interleave.
    fn write_line(&self, mut buffer: Vec<u8>) -> Result<(), io::Error> {
        buffer.write_all(b"\n")?;
        self.make_writer.make_writer().write_all(&buffer)
    }
}

impl<W> Handler for ConsoleHandler<W>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + std::fmt::Debug + 'static,
{
    fn level(&self) -> Option<Level> {
        self.level
    }

    fn handle(&self, record: &LogRecord) {
        let result = self
            .formatter
            .format(record)
            .and_then(|line| self.write_line(line).map_err(Into::into));
        if let Err(error) = result {
            tracing::warn!(%error, name = record.name(), "Failed to write log record to console");
        }
    }

    fn flush(&self) {
        let _ = self.make_writer.make_writer().flush();
    }
}


#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::Value;

    use super::{test_support::SharedBuffer, *};
    use crate::{formatter::JsonFormatter, resolver::QualifiedIdentity};

    fn record(level: Level) -> LogRecord {
        LogRecord::new(
            "app.worker",
            &QualifiedIdentity::unknown("app.worker"),
            level,
            "job {} done",
            &[&7],
            None,
        )
    }

    #[test]
    fn writes_one_line_per_record() {
        let buffer = SharedBuffer::default();
        let handler = ConsoleHandler::new(buffer.clone());

        handler.handle(&record(Level::INFO));
        handler.handle(&record(Level::WARN));

        let contents = buffer.contents();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|line| line.ends_with("job 7 done")));
        assert!(contents.ends_with('\n'));
        assert!(lines.first().is_some_and(|line| line.contains(" INFO app.worker.")));
    }

    #[test]
    fn json_formatter_writes_objects() {
        let buffer = SharedBuffer::default();
        let formatter = JsonFormatter::compact(HashMap::new()).expect("no static fields");
        let handler = ConsoleHandler::new(buffer.clone()).with_formatter(formatter);

        handler.handle(&record(Level::ERROR));

        let value: Value =
            serde_json::from_str(buffer.contents().trim_end()).expect("output must be JSON");
        assert_eq!(value["message"], "job 7 done");
        assert_eq!(value["file"], crate::UNKNOWN_FILE);
    }

    #[test]
    fn level_is_reported_for_filtering() {
        let handler = ConsoleHandler::stderr().with_level(Level::WARN);
        assert_eq!(handler.level(), Some(Level::WARN));
        assert!(!handler.accepts(Level::DEBUG));
    }
}
