use crate::buffer::BoundedBuffer;
use crate::config::StationConfig;
use crate::error::Result;
use crate::events::{EventBus, PipelineEvent};
use crate::logger::AsyncLogger;
use crate::product::{Product, ProductState};
use crate::rng::PipelineRng;
use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How long the worker waits on an empty input before re-checking control
/// flags.
const INPUT_POLL: Duration = Duration::from_millis(10);
/// Granularity of simulated work and pause waits, keeping cancellation and
/// resume responsive.
const WORK_SLICE: Duration = Duration::from_millis(20);
const PAUSE_POLL: Duration = Duration::from_millis(100);
const METRICS_PERIOD: Duration = Duration::from_secs(1);

/// Lifecycle states of a station worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StationState {
    Idle = 0,
    Running,
    Paused,
    Blocked,
    Stopping,
    Stopped,
    Error,
}

impl StationState {
    fn from_u8(value: u8) -> StationState {
        match value {
            0 => StationState::Idle,
            1 => StationState::Running,
            2 => StationState::Paused,
            3 => StationState::Blocked,
            4 => StationState::Stopping,
            5 => StationState::Stopped,
            _ => StationState::Error,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StationState::Idle => "Idle",
            StationState::Running => "Running",
            StationState::Paused => "Paused",
            StationState::Blocked => "Blocked",
            StationState::Stopping => "Stopping",
            StationState::Stopped => "Stopped",
            StationState::Error => "Error",
        }
    }
}

/// What the station-specific logic decided about a product.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Advance and forward to the normal output buffer.
    Forward,
    /// Send back to the assembler's input via the rework path.
    Rework,
    /// Permanent rejection; the product is not forwarded.
    Reject,
}

/// The single polymorphic point of a station: how one product is processed.
pub trait StationLogic: Send + 'static {
    fn process(&mut self, product: &mut Product, station: &StationCore) -> Result<ProcessOutcome>;
}

/// Where the products of a station go. Only QualityInspection has a rework
/// output; only Shipping has a finished sink instead of an output buffer.
#[derive(Default)]
pub struct StationWiring {
    pub input: Option<BoundedBuffer<Product>>,
    pub output: Option<BoundedBuffer<Product>>,
    pub rework_output: Option<BoundedBuffer<Product>>,
    pub finished_sink: Option<Sender<Product>>,
    pub rejected_sink: Option<Sender<Product>>,
}

/// Shared state of one station: identity, tuning, counters, control flags
/// and wiring. The worker thread and the controller both hold it.
pub struct StationCore {
    name: &'static str,
    tuning: StationConfig,
    wiring: StationWiring,
    state: AtomicU8,
    stopping: Arc<AtomicBool>,
    pause_lock: Mutex<()>,
    pause_signal: Condvar,
    processed: AtomicU64,
    rejected: AtomicU64,
    started_at: Mutex<Option<Instant>>,
    current_product: Mutex<Option<String>>,
    rng: Arc<PipelineRng>,
    events: EventBus,
    logger: Arc<AsyncLogger>,
}

impl StationCore {
    pub fn new(
        name: &'static str,
        tuning: StationConfig,
        wiring: StationWiring,
        rng: Arc<PipelineRng>,
        events: EventBus,
        logger: Arc<AsyncLogger>,
    ) -> Self {
        Self {
            name,
            tuning,
            wiring,
            state: AtomicU8::new(StationState::Idle as u8),
            stopping: Arc::new(AtomicBool::new(false)),
            pause_lock: Mutex::new(()),
            pause_signal: Condvar::new(),
            processed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            started_at: Mutex::new(None),
            current_product: Mutex::new(None),
            rng,
            events,
            logger,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Metric key prefix: the name lower-cased with spaces as underscores.
    pub fn metric_prefix(&self) -> String {
        self.name.to_lowercase().replace(' ', "_")
    }

    pub fn state(&self) -> StationState {
        StationState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, new: StationState) {
        let old = self.state.swap(new as u8, Ordering::SeqCst);
        if old != new as u8 {
            self.events.emit(PipelineEvent::StationStateChanged {
                station: self.name.to_string(),
                state: new,
            });
        }
    }

    /// Compare-and-set transition; emits the change event on success.
    fn transition(&self, from: StationState, to: StationState) -> bool {
        let swapped = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if swapped {
            self.events.emit(PipelineEvent::StationStateChanged {
                station: self.name.to_string(),
                state: to,
            });
        }
        swapped
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Items per minute since the worker started.
    pub fn throughput(&self) -> f64 {
        let started = self.started_at.lock();
        match *started {
            Some(at) => {
                let elapsed_ms = at.elapsed().as_millis() as f64;
                if elapsed_ms <= 0.0 {
                    0.0
                } else {
                    self.processed() as f64 * 60_000.0 / elapsed_ms
                }
            }
            None => 0.0,
        }
    }

    pub fn current_product(&self) -> Option<String> {
        self.current_product.lock().clone()
    }

    pub fn input_depth(&self) -> usize {
        self.wiring.input.as_ref().map_or(0, BoundedBuffer::len)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// The stopping flag, shared with the worker registry so an
    /// unresponsive-worker sweep can signal this station.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopping)
    }

    /// Running -> Paused. A no-op in any other state.
    pub fn pause(&self) {
        if self.transition(StationState::Running, StationState::Paused) {
            self.logger.info(self.name, "Station paused");
        }
    }

    /// Paused -> Running, waking the worker.
    pub fn resume(&self) {
        if self.transition(StationState::Paused, StationState::Running) {
            self.pause_signal.notify_all();
            self.logger.info(self.name, "Station resumed");
        }
    }

    /// Cooperative stop: raise the stopping flag and wake any pause wait.
    /// The worker exits at its next suspension point.
    pub fn request_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        if matches!(
            self.state(),
            StationState::Running | StationState::Paused | StationState::Blocked
        ) {
            self.set_state(StationState::Stopping);
        }
        self.pause_signal.notify_all();
    }

    /// Zero the counters and restart the throughput base.
    pub fn reset_statistics(&self) {
        self.processed.store(0, Ordering::SeqCst);
        self.rejected.store(0, Ordering::SeqCst);
        *self.started_at.lock() = Some(Instant::now());
    }

    /// Return the station to `Idle`, clearing an `Error` if present. Only
    /// valid while no worker is running.
    pub fn reset(&self) {
        self.stopping.store(false, Ordering::SeqCst);
        self.set_state(StationState::Idle);
        *self.current_product.lock() = None;
        self.reset_statistics();
    }

    /// Escalation path: the controller marks a station that missed the stop
    /// grace period.
    pub(crate) fn mark_error(&self) {
        self.set_state(StationState::Error);
    }

    /// Called by the controller right before spawning the worker.
    pub(crate) fn prepare_start(&self) {
        self.stopping.store(false, Ordering::SeqCst);
        *self.started_at.lock() = Some(Instant::now());
    }

    /// Sample the configured failure rate.
    pub fn should_reject(&self) -> bool {
        self.rng.chance(self.tuning.failure_rate)
    }

    /// Draw a processing time from the configured range.
    pub fn processing_delay(&self) -> Duration {
        self.rng
            .processing_delay(self.tuning.min_processing_time, self.tuning.max_processing_time)
    }

    /// Sleep for `duration`, returning early if the station is stopping.
    pub fn simulate_work(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.is_stopping() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(WORK_SLICE.min(deadline - now));
        }
    }

    pub fn rng(&self) -> &PipelineRng {
        &self.rng
    }

    pub fn log_debug(&self, message: impl Into<String>) {
        self.logger.debug(self.name, message);
    }

    pub fn log_info(&self, message: impl Into<String>) {
        self.logger.info(self.name, message);
    }

    fn wait_if_paused(&self) {
        let mut guard = self.pause_lock.lock();
        while self.state() == StationState::Paused && !self.is_stopping() {
            self.pause_signal.wait_for(&mut guard, PAUSE_POLL);
        }
    }
}

/// Runs one station: pulls products from the input (or synthesizes them, for
/// the intake), applies the station logic, forwards the result.
pub struct StationWorker {
    core: Arc<StationCore>,
    logic: Box<dyn StationLogic>,
    production_interval: Option<Duration>,
}

impl StationWorker {
    pub fn new(core: Arc<StationCore>, logic: Box<dyn StationLogic>) -> Self {
        Self {
            core,
            logic,
            production_interval: None,
        }
    }

    /// Make this worker a producing intake: no input buffer, a new product
    /// synthesized every `interval` while `Running`.
    pub fn with_production_interval(mut self, interval: Duration) -> Self {
        self.production_interval = Some(interval);
        self
    }

    /// The worker loop. Returns when the station is stopping or faulted.
    pub fn run(&mut self) {
        self.core.set_state(StationState::Running);
        self.core.logger.info(self.core.name, "Station started");
        let mut last_metrics = Instant::now();
        let mut next_tick = Instant::now();

        while !self.core.is_stopping() {
            self.core.wait_if_paused();
            if self.core.is_stopping() {
                break;
            }

            let product = self.acquire_product(&mut next_tick);
            if let Some(product) = product {
                if !self.handle_product(product) {
                    // Unrecoverable fault; leave the station in Error.
                    return;
                }
            }

            if last_metrics.elapsed() >= METRICS_PERIOD {
                last_metrics = Instant::now();
                self.core.events.emit(PipelineEvent::StationMetricsUpdated {
                    station: self.core.name.to_string(),
                    input_depth: self.core.input_depth(),
                    throughput_per_minute: self.core.throughput(),
                });
            }
        }

        if self.core.state() != StationState::Error {
            self.core.set_state(StationState::Stopped);
        }
        self.core.logger.info(self.core.name, "Station stopped");
    }

    fn acquire_product(&mut self, next_tick: &mut Instant) -> Option<Product> {
        match self.production_interval {
            Some(interval) => {
                let now = Instant::now();
                if now < *next_tick {
                    thread::sleep(INPUT_POLL.min(*next_tick - now));
                    return None;
                }
                if self.core.state() != StationState::Running {
                    return None;
                }
                *next_tick = now + interval;
                let product = Product::new(self.core.rng.product_type());
                self.core.log_debug(format!(
                    "Generated product {} ({})",
                    product.id(),
                    product.product_type().label()
                ));
                Some(product)
            }
            None => self
                .core
                .wiring
                .input
                .as_ref()
                .and_then(|input| input.pop_timeout(INPUT_POLL)),
        }
    }

    /// Returns `false` when the worker must exit because of a fault.
    fn handle_product(&mut self, mut product: Product) -> bool {
        let id = product.id().to_string();
        *self.core.current_product.lock() = Some(id.clone());

        let outcome = self.logic.process(&mut product, &self.core);
        let keep_running = match outcome {
            Ok(ProcessOutcome::Forward) => {
                self.forward(product, &id, false);
                true
            }
            Ok(ProcessOutcome::Rework) => {
                self.forward(product, &id, true);
                true
            }
            Ok(ProcessOutcome::Reject) => {
                self.reject(product, &id);
                true
            }
            Err(fault) => {
                let message = fault.to_string();
                self.core.set_state(StationState::Error);
                self.core.logger.error(
                    self.core.name,
                    format!("Processing fault on {id}: {message}"),
                );
                self.core.events.emit(PipelineEvent::StationError {
                    station: self.core.name.to_string(),
                    message,
                });
                self.reject(product, &id);
                false
            }
        };

        *self.core.current_product.lock() = None;
        keep_running
    }

    fn forward(&self, product: Product, id: &str, rework: bool) {
        let destination = if rework {
            self.core.wiring.rework_output.as_ref()
        } else {
            self.core.wiring.output.as_ref()
        };

        match destination {
            None => {
                // Terminal station: the journey ends here.
                if let Some(sink) = &self.core.wiring.finished_sink {
                    let _ = sink.send(product);
                }
                self.record_processed(id);
            }
            Some(buffer) if self.production_interval.is_some() => {
                // The intake never blocks; a full line skips the tick.
                match buffer.try_push(product) {
                    Ok(()) => self.record_processed(id),
                    Err(_) => {
                        self.core
                            .log_info(format!("Output full, generation of {id} skipped"));
                    }
                }
            }
            Some(buffer) => {
                let mut item = product;
                match buffer.try_push(item) {
                    Ok(()) => self.record_processed(id),
                    Err(returned) => {
                        item = returned;
                        self.core.transition(StationState::Running, StationState::Blocked);
                        self.core.log_debug(format!("Output buffer full, blocked on {id}"));
                        loop {
                            if self.core.is_stopping() || buffer.is_stopped() {
                                // Cancellation: the stranded product goes to
                                // the reject bin, never out of account.
                                self.reject(item, id);
                                return;
                            }
                            match buffer.push(item) {
                                Ok(()) => break,
                                Err(returned) => item = returned,
                            }
                        }
                        self.core.transition(StationState::Blocked, StationState::Running);
                        self.record_processed(id);
                    }
                }
            }
        }
    }

    fn record_processed(&self, id: &str) {
        self.core.processed.fetch_add(1, Ordering::SeqCst);
        self.core.events.emit(PipelineEvent::ProductProcessed {
            station: self.core.name.to_string(),
            id: id.to_string(),
        });
    }

    fn reject(&self, mut product: Product, id: &str) {
        product.set_state(ProductState::Rejected);
        self.core.rejected.fetch_add(1, Ordering::SeqCst);
        self.core.events.emit(PipelineEvent::ProductRejected {
            station: self.core.name.to_string(),
            id: id.to_string(),
        });
        if let Some(sink) = &self.core.wiring.rejected_sink {
            let _ = sink.send(product);
        }
    }
}
