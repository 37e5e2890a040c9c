use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use time::{
    Duration, OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description,
};
use tracing::Level;
use tracing_appender::rolling::Rotation;

use super::Handler;
use crate::{
    LoggingError,
    formatter::{RecordFormatter, TextFormatter},
    record::{LogRecord, now_local},
};

const BACKUP_SUFFIX_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");

// Length of a suffix rendered with `BACKUP_SUFFIX_FORMAT`.
const BACKUP_SUFFIX_LEN: usize = 19;

#[derive(Debug)]
struct FileState {
    file: Option<File>,
    next_rollover: Option<OffsetDateTime>,
}

/// Writes formatted records to a file that is rolled over on a schedule.
///
/// On rollover the current file is renamed to `<file name>.<YYYY-MM-DD_HH-MM-SS>` and a fresh
/// file is opened in its place. When a backup count is set, only that many of the most recent
/// backups are kept.
#[derive(Debug)]
pub struct TimedRotatingFileHandler {
    path: PathBuf,
    rotation: Rotation,
    backup_count: Option<NonZeroUsize>,
    formatter: Box<dyn RecordFormatter>,
    level: Option<Level>,
    state: Mutex<FileState>,
}

impl TimedRotatingFileHandler {
    /// Opens (or creates) the file at `path` for appending plain-text records.
    pub fn new(
        path: impl Into<PathBuf>,
        rotation: Rotation,
        backup_count: Option<NonZeroUsize>,
    ) -> Result<Self, LoggingError> {
        let path = path.into();
        let file = open(&path)?;
        let next_rollover = next_rollover(&rotation, now_local());

        Ok(Self {
            path,
            rotation,
            backup_count,
            formatter: Box::new(TextFormatter),
            level: None,
            state: Mutex::new(FileState {
                file: Some(file),
                next_rollover,
            }),
        })
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

    /// The path of the active log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The rollover schedule.
    pub fn rotation(&self) -> &Rotation {
        &self.rotation
    }

    /// Paths of the existing backups of the log file, oldest first.
    pub fn backups(&self) -> Result<Vec<PathBuf>, LoggingError> {
        let Some(file_name) = self.path.file_name().map(|name| name.to_string_lossy()) else {
            return Ok(Vec::new());
        };
        let prefix = format!("{file_name}.");

        let mut backups = fs::read_dir(self.directory())?
            .filter_map(Result::ok)
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_prefix(&prefix))
                    .is_some_and(is_backup_suffix)
            })
            .map(|entry| entry.path())
            .collect::<Vec<_>>();
        backups.sort();
        Ok(backups)
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn do_rollover(&self, state: &mut FileState) -> Result<(), LoggingError> {
        let now = now_local();
        if let Some(mut file) = state.file.take() {
            file.flush()?;
        }

        let is_empty = fs::metadata(&self.path).map_or(true, |metadata| metadata.len() == 0);
        if !is_empty {
            let mut backup = self.path.clone().into_os_string();
            backup.push(".");
            backup.push(now.format(BACKUP_SUFFIX_FORMAT)?);
            let backup = PathBuf::from(backup);
            if backup.exists() {
                fs::remove_file(&backup)?;
            }
            fs::rename(&self.path, &backup)?;
        }

        state.file = Some(open(&self.path)?);
        state.next_rollover = next_rollover(&self.rotation, now);
        self.prune_backups()
    }

    fn prune_backups(&self) -> Result<(), LoggingError> {
        let Some(backup_count) = self.backup_count else {
            return Ok(());
        };
        let backups = self.backups()?;
        let excess = backups.len().saturating_sub(backup_count.get());
        for backup in backups.iter().take(excess) {
            fs::remove_file(backup)?;
        }
        Ok(())
    }

    fn write_record(&self, record: &LogRecord) -> Result<(), LoggingError> {
        let mut line = self.formatter.format(record)?;
        line.push(b'\n');

        let mut state = self.state.lock();
        if state
            .next_rollover
            .is_some_and(|next_rollover| record.timestamp() >= next_rollover)
        {
            self.do_rollover(&mut state)?;
        }
        if state.file.is_none() {
            state.file = Some(open(&self.path)?);
        }
        if let Some(file) = state.file.as_mut() {
            file.write_all(&line)?;
        }
        Ok(())
    }
}

impl Handler for TimedRotatingFileHandler {
    fn level(&self) -> Option<Level> {
        self.level
    }

    fn handle(&self, record: &LogRecord) {
        if let Err(error) = self.write_record(record) {
            tracing::warn!(
                %error,
                path = %self.path.display(),
                "Failed to write log record to file"
            );
        }
    }

    fn flush(&self) {
        if let Some(file) = self.state.lock().file.as_mut() {
            let _ = file.flush();
        }
    }

    fn is_rotating(&self) -> bool {
        true
    }

    fn rollover(&self) -> Result<(), LoggingError> {
        let mut state = self.state.lock();
        self.do_rollover(&mut state)
    }
}

fn open(path: &Path) -> Result<File, io::Error> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn next_rollover(rotation: &Rotation, from: OffsetDateTime) -> Option<OffsetDateTime> {
    let interval = if *rotation == Rotation::MINUTELY {
        Duration::MINUTE
    } else if *rotation == Rotation::HOURLY {
        Duration::HOUR
    } else if *rotation == Rotation::DAILY {
        Duration::DAY
    } else {
        return None;
    };
    from.checked_add(interval)
}

fn is_backup_suffix(suffix: &str) -> bool {
    suffix.len() == BACKUP_SUFFIX_LEN
        && suffix
            .chars()
            .all(|c| c.is_ascii_digit() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::resolver::QualifiedIdentity;

    fn temp_dir(name: &str) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "attributed_log-{name}-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&dir).expect("temporary directory must be creatable");
        dir
    }

    fn record(template: &str) -> LogRecord {
        LogRecord::new(
            "app.worker",
            &QualifiedIdentity::unknown("app.worker"),
            Level::INFO,
            template,
            &[],
            None,
        )
    }

    #[test]
    fn appends_records_to_file() {
        let dir = temp_dir("append");
        let handler = TimedRotatingFileHandler::new(dir.join("app.log"), Rotation::DAILY, None)
            .expect("handler must open its file");

        handler.handle(&record("first"));
        handler.handle(&record("second"));
        handler.flush();

        let contents = fs::read_to_string(handler.path()).expect("log file must be readable");
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("] first\n"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn rollover_moves_current_file_to_backup() {
        let dir = temp_dir("rollover");
        let handler = TimedRotatingFileHandler::new(dir.join("app.log"), Rotation::NEVER, None)
            .expect("handler must open its file");

        handler.handle(&record("before"));
        handler.rollover().expect("rollover must succeed");
        handler.handle(&record("after"));

        let backups = handler.backups().expect("backups must be listable");
        assert_eq!(backups.len(), 1);
        let backup = backups.first().map(fs::read_to_string);
        assert!(matches!(backup, Some(Ok(contents)) if contents.contains("before")));

        let current = fs::read_to_string(handler.path()).expect("log file must be readable");
        assert!(current.contains("after"));
        assert!(!current.contains("before"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn rollover_of_empty_file_keeps_no_backup() {
        let dir = temp_dir("empty");
        let handler = TimedRotatingFileHandler::new(dir.join("app.log"), Rotation::HOURLY, None)
            .expect("handler must open its file");

        handler.rollover().expect("rollover must succeed");
        assert!(handler.backups().expect("backups must be listable").is_empty());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn old_backups_are_pruned() {
        let dir = temp_dir("prune");
        for suffix in ["2024-01-01_00-00-00", "2024-01-02_00-00-00", "2024-01-03_00-00-00"] {
            fs::write(dir.join(format!("app.log.{suffix}")), "old\n")
                .expect("backup must be writable");
        }
        fs::write(dir.join("app.log.unrelated"), "keep\n").expect("file must be writable");

        let handler = TimedRotatingFileHandler::new(
            dir.join("app.log"),
            Rotation::DAILY,
            NonZeroUsize::new(2),
        )
        .expect("handler must open its file");
        handler.handle(&record("current"));
        handler.rollover().expect("rollover must succeed");

        let backups = handler.backups().expect("backups must be listable");
        assert_eq!(backups.len(), 2);
        assert!(!dir.join("app.log.2024-01-01_00-00-00").exists());
        assert!(!dir.join("app.log.2024-01-02_00-00-00").exists());
        assert!(dir.join("app.log.unrelated").exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn schedule_follows_rotation() {
        let now = now_local();
        assert_eq!(next_rollover(&Rotation::HOURLY, now), Some(now + Duration::HOUR));
        assert_eq!(next_rollover(&Rotation::NEVER, now), None);
    }
}
