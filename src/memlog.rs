//! An in-memory log storage, with a fixed size for records.
//!
//! This is the one piece of state every task writes to. Access goes through
//! an async mutex taken with a bounded wait; records that can't get the
//! lock in time are dropped and counted.

use core::fmt::Display;
use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::{
    collections::vec_deque::{self, VecDeque},
    format,
    string::String,
};
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    mutex::{MappedMutexGuard, Mutex, MutexGuard},
};
use embassy_time::{Duration, Instant, with_timeout};

/// Longest a task waits on the log before giving up on a record.
pub const LOG_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

const DISCARD_ERROR: &str = "log discarded: too large for storage";

pub type SharedLogger = &'static MemLog;

#[derive(Clone, Debug)]
pub struct Record {
    pub instant: Instant,
    pub level: Level,
    pub text: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Display for Level {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Level::Trace => write!(f, "TRCE"),
            Level::Debug => write!(f, "DEBG"),
            Level::Info => write!(f, "INFO"),
            Level::Warn => write!(f, "WARN"),
            Level::Error => write!(f, "ERRO"),
        }
    }
}

struct LogStorage {
    records: VecDeque<Record>,
    // In characters.
    utilization: usize,
    capacity: usize,
}

impl LogStorage {
    const fn with_capacity(capacity: usize) -> Self {
        LogStorage {
            records: VecDeque::new(),
            utilization: 0,
            capacity,
        }
    }

    fn add_record(&mut self, level: Level, text: String) {
        // Can't fit this record in storage. Log a warning.
        if text.len() > self.capacity {
            self.add_record(Level::Warn, DISCARD_ERROR.into());
            return;
        }

        // Pop existing records until we have enough space for the new record.
        while (self.capacity - self.utilization) < text.len() {
            match self.records.pop_back() {
                Some(removed) => self.utilization -= removed.text.len(),
                None => break,
            }
        }

        // Store the new record.
        self.utilization += text.len();
        self.records.push_front(Record {
            instant: Instant::now(),
            level,
            text,
        });
    }

    fn iter(&self) -> vec_deque::Iter<'_, Record> {
        self.records.iter()
    }
}

pub struct MemLog {
    storage: Mutex<CriticalSectionRawMutex, LogStorage>,
    min_level: Level,
    dropped: AtomicUsize,
}

impl MemLog {
    /// Panics if `capacity` can't hold the discard notice.
    pub fn new(capacity: usize, min_level: Level) -> Self {
        // Ensure we have enough space to store the error about not having enough space.
        if capacity < DISCARD_ERROR.len() {
            panic!("minimum log storage capacity is {}", DISCARD_ERROR.len());
        }

        Self {
            storage: Mutex::new(LogStorage::with_capacity(capacity)),
            min_level,
            dropped: AtomicUsize::new(0),
        }
    }

    pub async fn log(&self, level: Level, text: impl Into<String>) {
        if level < self.min_level {
            return;
        }
        match with_timeout(LOG_LOCK_TIMEOUT, self.storage.lock()).await {
            Ok(mut storage) => storage.add_record(level, text.into()),
            Err(_timeout) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Best-effort, non-blocking variant for use before the tasks run.
    pub fn log_now(&self, level: Level, text: impl Into<String>) {
        if level < self.min_level {
            return;
        }
        match self.storage.try_lock() {
            Ok(mut storage) => storage.add_record(level, text.into()),
            Err(_busy) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub async fn trace(&self, text: impl Into<String>) {
        self.log(Level::Trace, text).await
    }
    pub async fn debug(&self, text: impl Into<String>) {
        self.log(Level::Debug, text).await
    }
    pub async fn info(&self, text: impl Into<String>) {
        self.log(Level::Info, text).await
    }
    pub async fn warn(&self, text: impl Into<String>) {
        self.log(Level::Warn, text).await
    }
    pub async fn error(&self, text: impl Into<String>) {
        self.log(Level::Error, text).await
    }

    /// Newest records first.
    pub async fn records(&self) -> MappedMutexGuard<'_, CriticalSectionRawMutex, VecDeque<Record>> {
        let guard = self.storage.lock().await;
        MutexGuard::map(guard, |storage| &mut storage.records)
    }

    /// Count of records stored with `level`.
    pub async fn count(&self, level: Level) -> usize {
        self.storage
            .lock()
            .await
            .iter()
            .filter(|record| record.level == level)
            .count()
    }

    /// Records lost to lock contention.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Formats a record as "[HHHHH:MM:SS.xxx] LEVL: text".
pub fn format_record(record: &Record) -> String {
    let timestamp = format_milliseconds_to_hms(record.instant.as_millis());
    format!("[{}] {}: {}", timestamp, record.level, record.text)
}

/// Formats a u64 millisecond value into "HHHHH:MM:SS.xxx" string.
#[inline]
pub fn format_milliseconds_to_hms(total_ms: u64) -> String {
    let millis_part = total_ms % 1000;
    let total_seconds = total_ms / 1000;

    let seconds_part = total_seconds % 60;
    let total_minutes = total_seconds / 60;

    let minutes_part = total_minutes % 60;
    let hours_part = total_minutes / 60;

    format!(
        "{:05}:{:02}:{:02}.{:03}",
        hours_part, minutes_part, seconds_part, millis_part
    )
}
