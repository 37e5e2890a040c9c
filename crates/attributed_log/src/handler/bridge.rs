use tracing::Level;

use super::Handler;
use crate::record::LogRecord;

/// Target of the `tracing` events emitted by [`TracingHandler`].
const TARGET: &str = "attributed_log";

/// Re-emits records as `tracing` events, so that they reach whichever subscriber the
/// application has installed.
///
/// Each event carries the record's qualified name, logger, location, thread and error as
/// fields, with the rendered message as the event message.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHandler {
    level: Option<Level>,
}

impl TracingHandler {
    /// Creates a handler forwarding every level.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the least severe level the handler forwards.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<Option<Level>>) -> Self {
        self.level = level.into();
        self
    }
}

macro_rules! emit {
    ($level:expr, $record:expr) => {{
        let record = $record;
        tracing::event!(
            target: TARGET,
            $level,
            name = record.name(),
            logger = record.logger_name(),
            file = record.file(),
            line = record.line(),
            function = record.function(),
            thread = record.thread_name(),
            error = record.error().map(|error| error.message()),
            "{}",
            record.message()
        )
    }};
}

impl Handler for TracingHandler {
    fn level(&self) -> Option<Level> {
        self.level
    }

    fn handle(&self, record: &LogRecord) {
        match record.level() {
            Level::ERROR => emit!(Level::ERROR, record),
            Level::WARN => emit!(Level::WARN, record),
            Level::INFO => emit!(Level::INFO, record),
            Level::DEBUG => emit!(Level::DEBUG, record),
            _ => emit!(Level::TRACE, record),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fmt, sync::Arc};

    use parking_lot::Mutex;
    use tracing::{
        Event, Subscriber,
        field::{Field, Visit},
    };
    use tracing_subscriber::{
        Layer,
        layer::{Context, SubscriberExt},
    };

    use super::*;
    use crate::resolver::QualifiedIdentity;

    #[derive(Debug, Default)]
    struct Fields(Vec<(String, String)>);

    impl Visit for Fields {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.push((field.name().to_owned(), format!("{value:?}")));
        }

        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.push((field.name().to_owned(), value.to_owned()));
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Capture(Arc<Mutex<Vec<(Level, String, Fields)>>>);

    impl<S: Subscriber> Layer<S> for Capture {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut fields = Fields::default();
            event.record(&mut fields);
            let metadata = event.metadata();
            self.0
                .lock()
                .push((*metadata.level(), metadata.target().to_owned(), fields));
        }
    }

    #[test]
    fn records_become_events_with_attribution_fields() {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let record = LogRecord::new(
            "app.worker",
            &QualifiedIdentity::unknown("app.worker"),
            Level::WARN,
            "disk at {}%",
            &[&93],
            None,
        );

        tracing::subscriber::with_default(subscriber, || TracingHandler::new().handle(&record));

        let events = capture.0.lock();
        let (level, target, fields) = events.first().expect("one event must be emitted");
        assert_eq!(*level, Level::WARN);
        assert_eq!(target, TARGET);

        let field = |name: &str| {
            fields
                .0
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
        };
        assert_eq!(field("name").as_deref(), Some("app.worker"));
        assert_eq!(field("function").as_deref(), Some(crate::UNKNOWN_FUNCTION));
        assert_eq!(field("message").as_deref(), Some("disk at 93%"));
        assert_eq!(field("error"), None);
    }
}
