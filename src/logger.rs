use crate::events::{EventBus, PipelineEvent};
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::Deserialize;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Severity of a log record. The variants form a total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn tag(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO ",
            LogLevel::Warning => "WARN ",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRIT ",
        }
    }

    fn from_u8(value: u8) -> LogLevel {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warning,
            3 => LogLevel::Error,
            _ => LogLevel::Critical,
        }
    }
}

/// One log record, timestamped on the producer side.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: String,
    pub thread_name: String,
    pub message: String,
}

impl LogRecord {
    pub fn format(&self) -> String {
        format!(
            "[{}] [{}] [{}] [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.level.tag(),
            self.category,
            self.thread_name,
            self.message
        )
    }
}

struct Shared {
    queue: Mutex<VecDeque<LogRecord>>,
    signal: Condvar,
    stopping: Arc<AtomicBool>,
    min_level: AtomicU8,
    events: Mutex<Option<EventBus>>,
}

/// Asynchronous logger: producers enqueue without ever touching I/O, a
/// single sink worker writes records in FIFO order to a line stream.
pub struct AsyncLogger {
    shared: Arc<Shared>,
    sink_handle: Mutex<Option<JoinHandle<()>>>,
    alive: Arc<AtomicBool>,
}

impl AsyncLogger {
    /// Spawn the sink worker writing to `sink`.
    pub fn new(min_level: LogLevel, sink: Box<dyn Write + Send>) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            signal: Condvar::new(),
            stopping: Arc::new(AtomicBool::new(false)),
            min_level: AtomicU8::new(min_level as u8),
            events: Mutex::new(None),
        });
        let alive = Arc::new(AtomicBool::new(true));

        let sink_shared = Arc::clone(&shared);
        let sink_alive = Arc::clone(&alive);
        let handle = thread::Builder::new()
            .name("logger-sink".to_string())
            .spawn(move || {
                run_sink(sink_shared, sink);
                sink_alive.store(false, Ordering::SeqCst);
            })
            .ok();

        Self {
            shared,
            sink_handle: Mutex::new(handle),
            alive,
        }
    }

    /// Writes to stderr.
    pub fn to_stderr(min_level: LogLevel) -> Self {
        Self::new(min_level, Box::new(std::io::stderr()))
    }

    /// Forward every accepted record as a [`PipelineEvent::LogEntryAdded`].
    pub fn attach_events(&self, events: EventBus) {
        *self.shared.events.lock() = Some(events);
    }

    pub fn min_level(&self) -> LogLevel {
        LogLevel::from_u8(self.shared.min_level.load(Ordering::Relaxed))
    }

    pub fn set_min_level(&self, level: LogLevel) {
        self.shared.min_level.store(level as u8, Ordering::Relaxed);
    }

    /// Non-blocking for the producer: filter, stamp, enqueue, signal.
    pub fn log(&self, level: LogLevel, category: &str, message: impl Into<String>) {
        if level < self.min_level() {
            return;
        }
        let record = LogRecord {
            timestamp: Utc::now(),
            level,
            category: category.to_string(),
            thread_name: thread::current()
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{:?}", thread::current().id())),
            message: message.into(),
        };

        {
            let mut queue = self.shared.queue.lock();
            queue.push_back(record.clone());
        }
        self.shared.signal.notify_one();

        if let Some(events) = self.shared.events.lock().as_ref() {
            events.emit(PipelineEvent::LogEntryAdded { record });
        }
    }

    pub fn debug(&self, category: &str, message: impl Into<String>) {
        self.log(LogLevel::Debug, category, message);
    }

    pub fn info(&self, category: &str, message: impl Into<String>) {
        self.log(LogLevel::Info, category, message);
    }

    pub fn warning(&self, category: &str, message: impl Into<String>) {
        self.log(LogLevel::Warning, category, message);
    }

    pub fn error(&self, category: &str, message: impl Into<String>) {
        self.log(LogLevel::Error, category, message);
    }

    pub fn critical(&self, category: &str, message: impl Into<String>) {
        self.log(LogLevel::Critical, category, message);
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Stop the sink worker. The queue is drained once more before the
    /// worker exits; records logged afterwards may be dropped. Idempotent.
    pub fn stop(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.signal.notify_all();
        if let Some(handle) = self.sink_handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Liveness flag of the sink worker, cleared when the thread exits.
    pub fn alive_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shared.stopping)
    }
}

impl Drop for AsyncLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_sink(shared: Arc<Shared>, mut sink: Box<dyn Write + Send>) {
    loop {
        let record = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(record) = queue.pop_front() {
                    break Some(record);
                }
                if shared.stopping.load(Ordering::SeqCst) {
                    break None;
                }
                shared
                    .signal
                    .wait_for(&mut queue, Duration::from_millis(100));
            }
        };

        match record {
            Some(record) => {
                let _ = writeln!(sink, "{}", record.format());
            }
            None => break,
        }
    }
    let _ = sink.flush();
}
