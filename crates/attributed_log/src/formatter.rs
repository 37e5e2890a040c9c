//! Formatters turning [`LogRecord`]s into bytes for line-oriented sinks.

use std::{collections::HashMap, fmt, io::Write};

use serde::ser::{SerializeMap, Serializer};
use serde_json::{
    Value,
    ser::{CompactFormatter, Formatter, PrettyFormatter},
};
use time::{
    OffsetDateTime,
    format_description::{BorrowedFormatItem, well_known::Iso8601},
    macros::format_description,
};

use crate::{LoggingError, keys, record::LogRecord};

const DATE_TIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Renders a record into the bytes of a single log line, without the trailing newline.
pub trait RecordFormatter: Send + Sync + fmt::Debug {
    /// Formats `record`.
    fn format(&self, record: &LogRecord) -> Result<Vec<u8>, LoggingError>;
}

impl<T: RecordFormatter + ?Sized> RecordFormatter for Box<T> {
    fn format(&self, record: &LogRecord) -> Result<Vec<u8>, LoggingError> {
        (**self).format(record)
    }
}

/// The plain-text layout:
///
/// ```text
/// 2024-05-01 12:30:45.123000 INFO app.worker.Worker.run:42 [main] job 42 done
/// ```
///
/// A captured error follows on the next lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFormatter;

impl RecordFormatter for TextFormatter {
    fn format(&self, record: &LogRecord) -> Result<Vec<u8>, LoggingError> {
        let mut buffer = Vec::new();
        write!(
            buffer,
            "{} {} {}.{}:{} [{}] {}",
            format_timestamp(record.timestamp())?,
            record.level(),
            record.name(),
            record.function(),
            record.line(),
            record.thread_name(),
            record.message(),
        )?;
        if let Some(error) = record.error() {
            write!(buffer, "\n{error}")?;
        }
        Ok(buffer)
    }
}

/// `2024-05-01 12:30:45.123000`. Milliseconds are not zero-padded, so 5 ms renders as `.5000`.
fn format_timestamp(timestamp: OffsetDateTime) -> Result<String, LoggingError> {
    Ok(format!(
        "{}.{}000",
        timestamp.format(DATE_TIME_FORMAT)?,
        timestamp.millisecond()
    ))
}

/// Formats records as JSON objects, one per line.
///
/// Alongside the record fields, every object carries the process id, the host name and any
/// static fields supplied at construction.
#[derive(Debug, Clone)]
pub struct JsonFormatter<F = CompactFormatter>
where
    F: Formatter + Clone,
{
    formatter: F,
    pid: u32,
    hostname: String,
    static_fields: HashMap<String, Value>,
}

impl JsonFormatter<CompactFormatter> {
    /// Creates a formatter emitting compact JSON.
    pub fn compact(static_fields: HashMap<String, Value>) -> Result<Self, LoggingError> {
        Self::new(static_fields, CompactFormatter)
    }
}

impl JsonFormatter<PrettyFormatter<'static>> {
    /// Creates a formatter emitting indented JSON.
    pub fn pretty(static_fields: HashMap<String, Value>) -> Result<Self, LoggingError> {
        Self::new(static_fields, PrettyFormatter::new())
    }
}

impl<F> JsonFormatter<F>
where
    F: Formatter + Clone,
{
    /// Creates a formatter with the given static fields and JSON style.
    ///
    /// Fails if a static field would shadow one of the record fields.
    pub fn new(static_fields: HashMap<String, Value>, formatter: F) -> Result<Self, LoggingError> {
        let pid = std::process::id();
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();

        for key in static_fields.keys() {
            if keys::IMPLICIT_KEYS.contains(key.as_str()) {
                return Err(LoggingError::Configuration(format!(
                    "A reserved key `{key}` was included in the static fields of a JSON formatter"
                )));
            }
        }

        Ok(Self {
            formatter,
            pid,
            hostname,
            static_fields,
        })
    }

    fn serialize_record_fields(
        &self,
        map_serializer: &mut impl SerializeMap<Error = serde_json::Error>,
        record: &LogRecord,
    ) -> Result<(), LoggingError> {
        map_serializer.serialize_entry(keys::MESSAGE, &record.message())?;
        map_serializer.serialize_entry(keys::HOSTNAME, &self.hostname)?;
        map_serializer.serialize_entry(keys::PID, &self.pid)?;
        map_serializer.serialize_entry(keys::LEVEL, &format_args!("{}", record.level()))?;
        map_serializer.serialize_entry(keys::NAME, record.name())?;
        map_serializer.serialize_entry(keys::LOGGER, record.logger_name())?;
        map_serializer.serialize_entry(keys::LINE, &record.line())?;
        map_serializer.serialize_entry(keys::FILE, record.file())?;
        map_serializer.serialize_entry(keys::FN, record.function())?;
        map_serializer.serialize_entry(keys::THREAD, record.thread_name())?;
        map_serializer.serialize_entry(keys::TIME, &record.timestamp().format(&Iso8601::DEFAULT)?)?;

        if let Some(error) = record.error() {
            map_serializer.serialize_entry(keys::ERROR, &error.to_string())?;
        }

        Ok(())
    }
}

impl<F> RecordFormatter for JsonFormatter<F>
where
    F: Formatter + Clone + Send + Sync + fmt::Debug,
{
    fn format(&self, record: &LogRecord) -> Result<Vec<u8>, LoggingError> {
        let mut buffer = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut buffer, self.formatter.clone());
        let mut map_serializer = serializer.serialize_map(None)?;

        self.serialize_record_fields(&mut map_serializer, record)?;
        for (key, value) in &self.static_fields {
            map_serializer.serialize_entry(key, value)?;
        }

        map_serializer.end()?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use time::macros::datetime;
    use tracing::Level;

    use super::*;
    use crate::{
        frame::{ModuleRef, StackFrame},
        record::ErrorInfo,
        resolver::{QualifiedIdentity, QualifiedNameResolver},
    };

    fn record(error: Option<ErrorInfo>) -> LogRecord {
        let frame = StackFrame::new(
            ModuleRef::new("app::worker", "src/worker.rs"),
            "src/worker.rs",
            42,
            "app::worker::Worker::run",
        );
        let identity: QualifiedIdentity = QualifiedNameResolver::identity_of("app.worker", &frame);
        LogRecord::new(
            "app.worker",
            &identity,
            Level::INFO,
            "job {} done",
            &[&42],
            error,
        )
    }

    #[test]
    fn text_layout_matches_console_pattern() {
        let line = TextFormatter.format(&record(None)).expect("record must format");
        let line = String::from_utf8(line).expect("output must be UTF-8");

        let mut fields = line.splitn(3, ' ');
        let date = fields.next().unwrap_or_default();
        assert_eq!(date.len(), 10);
        assert!(date.chars().filter(|c| *c == '-').count() == 2);

        let time = fields.next().unwrap_or_default();
        assert!(time.ends_with("000"));
        assert_eq!(time.chars().nth(8), Some('.'));
        let rest = fields.next().unwrap_or_default();

        let thread = std::thread::current();
        let thread = thread.name().unwrap_or_default();
        assert_eq!(
            rest,
            format!("INFO app.worker.run:42 [{thread}] job 42 done")
        );
    }

    #[test]
    fn milliseconds_are_not_padded() {
        let format = |timestamp| format_timestamp(timestamp).expect("timestamp must format");
        assert_eq!(
            format(datetime!(2024-05-01 12:30:45.005 UTC)),
            "2024-05-01 12:30:45.5000"
        );
        assert_eq!(
            format(datetime!(2024-05-01 12:30:45.123 UTC)),
            "2024-05-01 12:30:45.123000"
        );
        assert_eq!(
            format(datetime!(2024-05-01 12:30:45 UTC)),
            "2024-05-01 12:30:45.0000"
        );
    }

    #[test]
    fn text_layout_appends_error() {
        let error = ErrorInfo::capture(&io::Error::other("disk full"));
        let line = TextFormatter
            .format(&record(Some(error)))
            .expect("record must format");
        let line = String::from_utf8(line).expect("output must be UTF-8");
        assert!(line.contains("job 42 done\ndisk full"));
    }

    #[test]
    fn json_contains_record_and_static_fields() {
        let static_fields = HashMap::from([("service".to_owned(), Value::from("billing"))]);
        let formatter = JsonFormatter::compact(static_fields).expect("fields must be accepted");

        let bytes = formatter.format(&record(None)).expect("record must format");
        let value: Value = serde_json::from_slice(&bytes).expect("output must be JSON");

        assert_eq!(value[keys::MESSAGE], "job 42 done");
        assert_eq!(value[keys::LEVEL], "INFO");
        assert_eq!(value[keys::NAME], "app.worker");
        assert_eq!(value[keys::LOGGER], "app.worker");
        assert_eq!(value[keys::LINE], 42);
        assert_eq!(value[keys::FN], "run");
        assert_eq!(value[keys::PID], std::process::id());
        assert_eq!(value["service"], "billing");
        assert!(value.get(keys::ERROR).is_none());
    }

    #[test]
    fn json_rejects_reserved_static_fields() {
        let static_fields = HashMap::from([(keys::LEVEL.to_owned(), Value::from("custom"))]);
        assert!(matches!(
            JsonFormatter::pretty(static_fields),
            Err(LoggingError::Configuration(_))
        ));
    }
}
