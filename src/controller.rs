use crate::buffer::BoundedBuffer;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::events::{EventBus, PipelineEvent};
use crate::logger::AsyncLogger;
use crate::metrics::{MetricsAggregator, BUFFER_SIZE_KEYS};
use crate::product::Product;
use crate::registry::{WorkerPriority, WorkerRegistry};
use crate::rng::PipelineRng;
use crate::station::{StationCore, StationLogic, StationWiring, StationWorker};
use crate::stations::{
    AssemblerLogic, IntakeLogic, PackagingLogic, QualityInspectionLogic, ShippingLogic, ASSEMBLER,
    INTAKE, PACKAGING, QUALITY_INSPECTION, SHIPPING,
};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long a station worker gets to exit after a stop request before the
/// controller escalates.
const STOP_GRACE: Duration = Duration::from_secs(5);
const ROUTER_POLL: Duration = Duration::from_millis(100);

struct StationHandle {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// Owns the five stations and the four buffers between them, fans lifecycle
/// operations out to every worker, routes station events to the public
/// channel, and drives the metrics sampler.
pub struct PipelineController {
    config: PipelineConfig,
    rng: Arc<PipelineRng>,
    logger: Arc<AsyncLogger>,
    registry: Arc<WorkerRegistry>,
    aggregator: Arc<MetricsAggregator>,
    buffers: Vec<BoundedBuffer<Product>>,
    stations: Vec<Arc<StationCore>>,
    running: AtomicBool,
    paused: AtomicBool,
    finished_count: Arc<AtomicU64>,
    public: EventBus,
    public_rx: Receiver<PipelineEvent>,
    internal_rx: Receiver<PipelineEvent>,
    finished_rx: Receiver<Product>,
    rejected_rx: Receiver<Product>,
    station_handles: Mutex<Vec<StationHandle>>,
    service_stop: Arc<AtomicBool>,
    service_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PipelineController {
    /// Build the line with the sink of the async logger on stderr.
    pub fn new(config: PipelineConfig) -> Self {
        let min_level = config.logger.min_level;
        Self::with_log_sink(config, AsyncLogger::to_stderr(min_level))
    }

    /// Build the line logging to an arbitrary sink.
    pub fn with_sink(config: PipelineConfig, sink: Box<dyn Write + Send>) -> Self {
        let min_level = config.logger.min_level;
        Self::with_log_sink(config, AsyncLogger::new(min_level, sink))
    }

    fn with_log_sink(config: PipelineConfig, logger: AsyncLogger) -> Self {
        let logger = Arc::new(logger);
        let (public, public_rx) = EventBus::channel();
        let (internal, internal_rx) = EventBus::channel();
        logger.attach_events(public.clone());

        let rng = Arc::new(PipelineRng::new(config.rng_seed));
        let registry = Arc::new(WorkerRegistry::new(
            public.clone(),
            Arc::clone(&logger),
            Duration::from_millis(config.worker.health_check_interval_ms),
            Duration::from_millis(config.worker.unresponsive_threshold_ms),
        ));
        let aggregator = Arc::new(MetricsAggregator::new(
            public.clone(),
            config.aggregator.max_history_size,
            config.aggregator.expected_throughput,
            config.buffer_capacity,
        ));

        let buffers: Vec<BoundedBuffer<Product>> = (0..4)
            .map(|_| BoundedBuffer::new(config.buffer_capacity))
            .collect();
        let (finished_tx, finished_rx) = unbounded();
        let (rejected_tx, rejected_rx) = unbounded();

        let mk_core = |name, tuning, wiring: StationWiring| {
            Arc::new(StationCore::new(
                name,
                tuning,
                wiring,
                Arc::clone(&rng),
                internal.clone(),
                Arc::clone(&logger),
            ))
        };

        let stations = vec![
            mk_core(
                INTAKE,
                config.intake.station(),
                StationWiring {
                    output: Some(buffers[0].clone()),
                    rejected_sink: Some(rejected_tx.clone()),
                    ..StationWiring::default()
                },
            ),
            mk_core(
                ASSEMBLER,
                config.assembler.clone(),
                StationWiring {
                    input: Some(buffers[0].clone()),
                    output: Some(buffers[1].clone()),
                    rejected_sink: Some(rejected_tx.clone()),
                    ..StationWiring::default()
                },
            ),
            mk_core(
                QUALITY_INSPECTION,
                config.quality.station(),
                StationWiring {
                    input: Some(buffers[1].clone()),
                    output: Some(buffers[2].clone()),
                    // The rework path lands products back on the assembler's
                    // input; a forwarded product goes to exactly one buffer.
                    rework_output: Some(buffers[0].clone()),
                    rejected_sink: Some(rejected_tx.clone()),
                    ..StationWiring::default()
                },
            ),
            mk_core(
                PACKAGING,
                config.packaging.clone(),
                StationWiring {
                    input: Some(buffers[2].clone()),
                    output: Some(buffers[3].clone()),
                    rejected_sink: Some(rejected_tx.clone()),
                    ..StationWiring::default()
                },
            ),
            mk_core(
                SHIPPING,
                config.shipping.clone(),
                StationWiring {
                    input: Some(buffers[3].clone()),
                    finished_sink: Some(finished_tx),
                    rejected_sink: Some(rejected_tx),
                    ..StationWiring::default()
                },
            ),
        ];

        logger.info("Controller", "Production controller initialized");

        Self {
            config,
            rng,
            logger,
            registry,
            aggregator,
            buffers,
            stations,
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            finished_count: Arc::new(AtomicU64::new(0)),
            public,
            public_rx,
            internal_rx,
            finished_rx,
            rejected_rx,
            station_handles: Mutex::new(Vec::new()),
            service_stop: Arc::new(AtomicBool::new(false)),
            service_handles: Mutex::new(Vec::new()),
        }
    }

    fn logic_for(&self, name: &str) -> Box<dyn StationLogic> {
        match name {
            INTAKE => Box::new(IntakeLogic),
            ASSEMBLER => Box::new(AssemblerLogic),
            QUALITY_INSPECTION => Box::new(QualityInspectionLogic::new(&self.config.quality)),
            PACKAGING => Box::new(PackagingLogic),
            _ => Box::new(ShippingLogic),
        }
    }

    /// Start the line: reopen buffers, spawn one worker per station plus the
    /// event router and the metrics sampler. A no-op while already running.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.paused.store(false, Ordering::SeqCst);
        self.service_stop.store(false, Ordering::SeqCst);
        self.logger.info("Controller", "Starting production line");

        for buffer in &self.buffers {
            buffer.reopen();
        }
        // Drop any station events left from before the previous shutdown.
        for _ in self.internal_rx.try_iter() {}

        let production_interval =
            Duration::from_millis(60_000 / u64::from(self.config.intake.production_rate.max(1)));

        let mut handles = self.station_handles.lock();
        for core in &self.stations {
            core.prepare_start();
            let mut worker = StationWorker::new(Arc::clone(core), self.logic_for(core.name()));
            if core.name() == INTAKE {
                worker = worker.with_production_interval(production_interval);
            }

            let alive = Arc::new(AtomicBool::new(true));
            let thread_alive = Arc::clone(&alive);
            let handle = thread::Builder::new()
                .name(format!("station-{}", core.metric_prefix()))
                .spawn(move || {
                    worker.run();
                    thread_alive.store(false, Ordering::SeqCst);
                })
                .map_err(|e| PipelineError::ThreadError(e.to_string()))?;

            self.registry
                .register(core.name(), WorkerPriority::Normal, alive, core.stop_flag());
            handles.push(StationHandle {
                name: core.name(),
                handle,
            });
        }
        drop(handles);

        let mut services = self.service_handles.lock();
        services.push(self.spawn_router()?);
        services.push(self.spawn_sampler()?);
        drop(services);

        self.registry.register(
            "logger-sink",
            WorkerPriority::Low,
            self.logger.alive_flag(),
            self.logger.stop_flag(),
        );
        self.registry.start_monitor();

        self.public.emit(PipelineEvent::ProductionStarted);
        self.logger.info("Controller", "Production line started");
        Ok(())
    }

    fn spawn_router(&self) -> Result<JoinHandle<()>> {
        let internal_rx = self.internal_rx.clone();
        let public = self.public.clone();
        let finished_count = Arc::clone(&self.finished_count);
        let stop = Arc::clone(&self.service_stop);
        let alive = Arc::new(AtomicBool::new(true));
        self.registry.register(
            "event-router",
            WorkerPriority::Low,
            Arc::clone(&alive),
            Arc::clone(&stop),
        );

        thread::Builder::new()
            .name("event-router".to_string())
            .spawn(move || {
                loop {
                    match internal_rx.recv_timeout(ROUTER_POLL) {
                        Ok(event) => route_event(event, &public, &finished_count),
                        Err(RecvTimeoutError::Timeout) => {
                            if stop.load(Ordering::SeqCst) {
                                for event in internal_rx.try_iter() {
                                    route_event(event, &public, &finished_count);
                                }
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                alive.store(false, Ordering::SeqCst);
            })
            .map_err(|e| PipelineError::ThreadError(e.to_string()))
    }

    fn spawn_sampler(&self) -> Result<JoinHandle<()>> {
        let interval = Duration::from_millis(self.config.aggregator.update_interval_ms.max(10));
        let buffers = self.buffers.clone();
        let stations = self.stations.clone();
        let aggregator = Arc::clone(&self.aggregator);
        let finished_count = Arc::clone(&self.finished_count);
        let public = self.public.clone();
        let stop = Arc::clone(&self.service_stop);
        let alive = Arc::new(AtomicBool::new(true));
        self.registry.register(
            "metrics-sampler",
            WorkerPriority::Low,
            Arc::clone(&alive),
            Arc::clone(&stop),
        );

        thread::Builder::new()
            .name("metrics-sampler".to_string())
            .spawn(move || {
                let mut next_sample = Instant::now() + interval;
                while !stop.load(Ordering::SeqCst) {
                    if Instant::now() >= next_sample {
                        next_sample = Instant::now() + interval;

                        let mut values = HashMap::new();
                        values.insert(
                            "finished_count".to_string(),
                            finished_count.load(Ordering::SeqCst) as f64,
                        );
                        for (key, buffer) in BUFFER_SIZE_KEYS.iter().zip(&buffers) {
                            values.insert(key.to_string(), buffer.len() as f64);
                        }
                        for core in &stations {
                            let prefix = core.metric_prefix();
                            values.insert(format!("{prefix}_throughput"), core.throughput());
                            values
                                .insert(format!("{prefix}_processed"), core.processed() as f64);
                            values.insert(format!("{prefix}_rejected"), core.rejected() as f64);
                        }
                        aggregator.update(values);
                        public.emit(PipelineEvent::StatisticsUpdated);
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                alive.store(false, Ordering::SeqCst);
            })
            .map_err(|e| PipelineError::ThreadError(e.to_string()))
    }

    /// Stop the line: signal every station, stop all buffers, join workers
    /// within the grace period, then stop the router and sampler. A no-op
    /// while not running.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.paused.store(false, Ordering::SeqCst);
        self.logger.info("Controller", "Stopping production line");

        for core in &self.stations {
            core.request_stop();
        }
        // Safety net: wakes anything still blocked on a buffer.
        for buffer in &self.buffers {
            buffer.stop();
        }

        let handles = std::mem::take(&mut *self.station_handles.lock());
        for station in handles {
            let deadline = Instant::now() + STOP_GRACE;
            while !station.handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if station.handle.is_finished() {
                let _ = station.handle.join();
            } else {
                if let Some(core) = self.station(station.name) {
                    core.mark_error();
                }
                let message = format!(
                    "Station {} did not stop within the grace period",
                    station.name
                );
                self.logger.error("Controller", message.clone());
                self.public.emit(PipelineEvent::ErrorOccurred { message });
            }
            self.registry.unregister(station.name);
        }

        self.service_stop.store(true, Ordering::SeqCst);
        for handle in std::mem::take(&mut *self.service_handles.lock()) {
            let _ = handle.join();
        }
        self.registry.stop_monitor();
        self.registry.unregister("event-router");
        self.registry.unregister("metrics-sampler");

        self.public.emit(PipelineEvent::ProductionStopped);
        self.logger.info("Controller", "Production line stopped");
    }

    /// Pause every station. Only meaningful while running and not paused.
    pub fn pause(&self) {
        if !self.running.load(Ordering::SeqCst) || self.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        for core in &self.stations {
            core.pause();
        }
        self.public.emit(PipelineEvent::ProductionPaused);
        self.logger.info("Controller", "Production line paused");
    }

    /// Resume every station. Only meaningful while running and paused.
    pub fn resume(&self) {
        if !self.running.load(Ordering::SeqCst) || !self.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        for core in &self.stations {
            core.resume();
        }
        self.public.emit(PipelineEvent::ProductionResumed);
        self.logger.info("Controller", "Production line resumed");
    }

    /// Stop if running, then clear every buffer, zero all statistics and
    /// return every station (including ones in `Error`) to `Idle`.
    pub fn reset(&self) {
        if self.running.load(Ordering::SeqCst) {
            self.stop();
        }
        for buffer in &self.buffers {
            buffer.clear();
        }
        for core in &self.stations {
            core.reset();
        }
        self.finished_count.store(0, Ordering::SeqCst);
        for _ in self.finished_rx.try_iter() {}
        for _ in self.rejected_rx.try_iter() {}
        self.aggregator.reset();
        self.public.emit(PipelineEvent::ProductionReset);
        self.logger.info("Controller", "Production line reset");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Products that completed the whole line, i.e. left Shipping.
    pub fn finished_count(&self) -> u64 {
        self.finished_count.load(Ordering::SeqCst)
    }

    /// The receiving side of the public event channel. Events are consumed
    /// by whichever receiver gets them first, so hand this to one observer.
    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.public_rx.clone()
    }

    pub fn stations(&self) -> &[Arc<StationCore>] {
        &self.stations
    }

    pub fn station(&self, name: &str) -> Option<&Arc<StationCore>> {
        self.stations.iter().find(|core| core.name() == name)
    }

    /// The four inter-station buffers, intake-side first.
    pub fn buffers(&self) -> &[BoundedBuffer<Product>] {
        &self.buffers
    }

    /// Number of products currently held by a station worker.
    pub fn in_process_count(&self) -> usize {
        self.stations
            .iter()
            .filter(|core| core.current_product().is_some())
            .count()
    }

    /// Drain and return the products that finished since the last call.
    pub fn take_finished(&self) -> Vec<Product> {
        self.finished_rx.try_iter().collect()
    }

    /// Drain and return the products rejected since the last call.
    pub fn take_rejected(&self) -> Vec<Product> {
        self.rejected_rx.try_iter().collect()
    }

    pub fn aggregator(&self) -> &Arc<MetricsAggregator> {
        &self.aggregator
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn logger(&self) -> &Arc<AsyncLogger> {
        &self.logger
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn rng(&self) -> &Arc<PipelineRng> {
        &self.rng
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.stop();
        self.logger.stop();
    }
}

fn route_event(event: PipelineEvent, public: &EventBus, finished_count: &AtomicU64) {
    let follow_up = match &event {
        PipelineEvent::ProductProcessed { station, id } if station == SHIPPING => {
            finished_count.fetch_add(1, Ordering::SeqCst);
            Some(PipelineEvent::ProductFinished { id: id.clone() })
        }
        PipelineEvent::StationError { station, message } => {
            Some(PipelineEvent::ErrorOccurred {
                message: format!("Station {station} error: {message}"),
            })
        }
        _ => None,
    };
    public.emit(event);
    if let Some(follow_up) = follow_up {
        public.emit(follow_up);
    }
}
