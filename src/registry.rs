use crate::events::{EventBus, PipelineEvent};
use crate::logger::AsyncLogger;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Scheduling hint recorded for a worker. Purely informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPriority {
    Low,
    Normal,
    High,
}

/// Point-in-time snapshot of one registered worker.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub name: String,
    pub priority: WorkerPriority,
    pub started_at: Instant,
    pub last_health_check: Instant,
    pub active: bool,
}

struct WorkerEntry {
    name: String,
    priority: WorkerPriority,
    started_at: Instant,
    last_health_check: Mutex<Instant>,
    active: AtomicBool,
    /// Cleared by the worker's thread wrapper when the thread exits.
    alive: Arc<AtomicBool>,
    /// Raising this asks the worker to stop at its next check.
    stop: Arc<AtomicBool>,
}

/// Bookkeeping of every worker thread in the pipeline: the five stations
/// plus the background workers (logger sink, metrics sampler, event router).
///
/// Pause/resume is a contract between controller and station; the registry
/// only observes liveness.
pub struct WorkerRegistry {
    workers: Mutex<Vec<Arc<WorkerEntry>>>,
    events: EventBus,
    logger: Arc<AsyncLogger>,
    check_interval: Duration,
    unresponsive_after: Duration,
    monitor_stop: Arc<AtomicBool>,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerRegistry {
    pub fn new(
        events: EventBus,
        logger: Arc<AsyncLogger>,
        check_interval: Duration,
        unresponsive_after: Duration,
    ) -> Self {
        Self {
            workers: Mutex::new(Vec::new()),
            events,
            logger,
            check_interval,
            unresponsive_after,
            monitor_stop: Arc::new(AtomicBool::new(false)),
            monitor_handle: Mutex::new(None),
        }
    }

    /// Register a worker. A previous entry with the same name is replaced.
    pub fn register(
        &self,
        name: impl Into<String>,
        priority: WorkerPriority,
        alive: Arc<AtomicBool>,
        stop: Arc<AtomicBool>,
    ) {
        let name = name.into();
        let entry = Arc::new(WorkerEntry {
            name: name.clone(),
            priority,
            started_at: Instant::now(),
            last_health_check: Mutex::new(Instant::now()),
            active: AtomicBool::new(true),
            alive,
            stop,
        });
        let mut workers = self.workers.lock();
        workers.retain(|existing| existing.name != name);
        workers.push(entry);
        self.logger.debug("Registry", format!("Worker {name} registered"));
    }

    pub fn unregister(&self, name: &str) {
        let mut workers = self.workers.lock();
        let before = workers.len();
        workers.retain(|entry| entry.name != name);
        if workers.len() != before {
            self.logger.debug("Registry", format!("Worker {name} unregistered"));
        }
    }

    pub fn list(&self) -> Vec<WorkerInfo> {
        self.workers
            .lock()
            .iter()
            .map(|entry| WorkerInfo {
                name: entry.name.clone(),
                priority: entry.priority,
                started_at: entry.started_at,
                last_health_check: *entry.last_health_check.lock(),
                active: entry.active.load(Ordering::SeqCst),
            })
            .collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<WorkerInfo> {
        self.list().into_iter().find(|info| info.name == name)
    }

    pub fn count_active(&self) -> usize {
        self.workers
            .lock()
            .iter()
            .filter(|entry| entry.active.load(Ordering::SeqCst))
            .count()
    }

    /// One health pass: stamp live workers, flag active-but-dead ones.
    pub fn health_check_once(&self) {
        let workers: Vec<_> = self.workers.lock().clone();
        for entry in workers {
            if entry.alive.load(Ordering::SeqCst) {
                *entry.last_health_check.lock() = Instant::now();
            } else if entry.active.swap(false, Ordering::SeqCst) {
                let message = format!("Worker {} marked active but not running", entry.name);
                self.logger.warning("Registry", message.clone());
                self.events.emit(PipelineEvent::WorkerAlert {
                    worker: entry.name.clone(),
                    message,
                });
            }
        }
    }

    /// Signal stop to every worker whose health stamp is older than the
    /// unresponsive threshold, and raise an alert for each.
    pub fn terminate_unresponsive(&self) {
        let workers: Vec<_> = self.workers.lock().clone();
        let now = Instant::now();
        for entry in workers {
            if !entry.active.load(Ordering::SeqCst) {
                continue;
            }
            let stamp = *entry.last_health_check.lock();
            if now.duration_since(stamp) > self.unresponsive_after {
                entry.stop.store(true, Ordering::SeqCst);
                entry.active.store(false, Ordering::SeqCst);
                let message = format!("Worker {} unresponsive, stop requested", entry.name);
                self.logger.warning("Registry", message.clone());
                self.events.emit(PipelineEvent::WorkerAlert {
                    worker: entry.name.clone(),
                    message,
                });
            }
        }
    }

    /// Spawn the periodic health monitor. Idempotent.
    pub fn start_monitor(self: &Arc<Self>) {
        let mut handle = self.monitor_handle.lock();
        if handle.is_some() {
            return;
        }
        self.monitor_stop.store(false, Ordering::SeqCst);

        let registry = Arc::clone(self);
        let stop = Arc::clone(&self.monitor_stop);
        let interval = self.check_interval;
        *handle = thread::Builder::new()
            .name("health-monitor".to_string())
            .spawn(move || {
                let mut next_check = Instant::now() + interval;
                while !stop.load(Ordering::SeqCst) {
                    if Instant::now() >= next_check {
                        next_check = Instant::now() + interval;
                        registry.health_check_once();
                        registry.terminate_unresponsive();
                    }
                    thread::sleep(Duration::from_millis(50));
                }
            })
            .ok();
    }

    pub fn stop_monitor(&self) {
        self.monitor_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.monitor_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerRegistry {
    fn drop(&mut self) {
        self.stop_monitor();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogLevel;
    use crossbeam_channel::Receiver;

    fn registry() -> (Arc<WorkerRegistry>, Receiver<PipelineEvent>) {
        let (events, rx) = EventBus::channel();
        let logger = Arc::new(AsyncLogger::new(LogLevel::Critical, Box::new(std::io::sink())));
        (
            Arc::new(WorkerRegistry::new(
                events,
                logger,
                Duration::from_millis(50),
                Duration::from_millis(200),
            )),
            rx,
        )
    }

    fn flags() -> (Arc<AtomicBool>, Arc<AtomicBool>) {
        (
            Arc::new(AtomicBool::new(true)),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_register_and_find() {
        let (registry, _rx) = registry();
        let (alive, stop) = flags();
        registry.register("Assembler", WorkerPriority::Normal, alive, stop);
        let info = registry.find_by_name("Assembler").unwrap();
        assert!(info.active);
        assert_eq!(info.priority, WorkerPriority::Normal);
        assert_eq!(registry.count_active(), 1);

        registry.unregister("Assembler");
        assert!(registry.find_by_name("Assembler").is_none());
        assert_eq!(registry.count_active(), 0);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let (registry, _rx) = registry();
        let (alive, stop) = flags();
        registry.register("sampler", WorkerPriority::Low, alive.clone(), stop.clone());
        registry.register("sampler", WorkerPriority::High, alive, stop);
        assert_eq!(registry.list().len(), 1);
        assert_eq!(
            registry.find_by_name("sampler").unwrap().priority,
            WorkerPriority::High
        );
    }

    #[test]
    fn test_desync_raises_alert_and_clears_active() {
        let (registry, rx) = registry();
        let (alive, stop) = flags();
        registry.register("Shipping", WorkerPriority::Normal, alive.clone(), stop);

        alive.store(false, Ordering::SeqCst);
        registry.health_check_once();

        assert!(!registry.find_by_name("Shipping").unwrap().active);
        let alert = rx
            .try_iter()
            .find(|event| matches!(event, PipelineEvent::WorkerAlert { .. }));
        match alert {
            Some(PipelineEvent::WorkerAlert { worker, .. }) => assert_eq!(worker, "Shipping"),
            other => panic!("expected WorkerAlert, got {other:?}"),
        }
        // A second pass does not alert again.
        registry.health_check_once();
        assert!(rx
            .try_iter()
            .all(|event| !matches!(event, PipelineEvent::WorkerAlert { .. })));
    }

    #[test]
    fn test_unresponsive_sweep_signals_stop() {
        let (registry, rx) = registry();
        let (alive, stop) = flags();
        // A live worker keeps its stamp fresh through health checks; freeze
        // it by marking the thread dead without clearing active first.
        registry.register("Packaging", WorkerPriority::Normal, alive.clone(), stop.clone());
        std::thread::sleep(Duration::from_millis(250));

        registry.terminate_unresponsive();
        assert!(stop.load(Ordering::SeqCst));
        assert!(!registry.find_by_name("Packaging").unwrap().active);
        assert!(rx
            .try_iter()
            .any(|event| matches!(event, PipelineEvent::WorkerAlert { .. })));
        let _ = alive;
    }

    #[test]
    fn test_healthy_worker_not_swept() {
        let (registry, rx) = registry();
        let (alive, stop) = flags();
        registry.register("Intake", WorkerPriority::Normal, alive, stop.clone());
        registry.health_check_once();
        registry.terminate_unresponsive();
        assert!(!stop.load(Ordering::SeqCst));
        assert!(registry.find_by_name("Intake").unwrap().active);
        assert!(rx
            .try_iter()
            .all(|event| !matches!(event, PipelineEvent::WorkerAlert { .. })));
    }
}
