use crate::events::{EventBus, PipelineEvent};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// The four inter-station buffer size keys, named after the upstream station.
pub const BUFFER_SIZE_KEYS: [&str; 4] = [
    "intake_buffer_size",
    "assembler_buffer_size",
    "quality_buffer_size",
    "packaging_buffer_size",
];

/// Metric key prefixes of the five stations.
pub const STATION_PREFIXES: [&str; 5] = [
    "intake",
    "assembler",
    "quality_inspection",
    "packaging",
    "shipping",
];

const TREND_WINDOW: usize = 10;
const ALERT_DEDUP: Duration = Duration::from_secs(1);

/// Kinds of alert the aggregator can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    HighQueueUtil,
    LowThroughput,
    HighErrorRate,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::HighQueueUtil => "HIGH_QUEUE_UTIL",
            AlertKind::LowThroughput => "LOW_THROUGHPUT",
            AlertKind::HighErrorRate => "HIGH_ERROR_RATE",
        }
    }
}

/// A timestamped map of metric values.
#[derive(Debug, Clone)]
pub struct MetricsSample {
    pub timestamp: DateTime<Utc>,
    pub values: HashMap<String, f64>,
}

struct AggregatorState {
    current: HashMap<String, f64>,
    derived: HashMap<String, f64>,
    history: VecDeque<MetricsSample>,
    started_at: Instant,
    last_alerts: HashMap<AlertKind, Instant>,
}

/// Observes the running pipeline: retains a bounded sample history, derives
/// moving averages, trends and peaks, and raises threshold alerts.
pub struct MetricsAggregator {
    state: Mutex<AggregatorState>,
    events: EventBus,
    max_history: usize,
    expected_throughput: f64,
    buffer_capacity: usize,
}

impl MetricsAggregator {
    pub fn new(
        events: EventBus,
        max_history: usize,
        expected_throughput: f64,
        buffer_capacity: usize,
    ) -> Self {
        Self {
            state: Mutex::new(AggregatorState {
                current: HashMap::new(),
                derived: HashMap::new(),
                history: VecDeque::new(),
                started_at: Instant::now(),
                last_alerts: HashMap::new(),
            }),
            events,
            max_history: max_history.max(1),
            expected_throughput,
            buffer_capacity,
        }
    }

    /// Ingest one tick of raw values, recompute the derived metrics and
    /// check the alert thresholds.
    pub fn update(&self, values: HashMap<String, f64>) {
        let mut pending = Vec::new();
        let (sample, derived) = {
            let mut state = self.state.lock();
            for (key, value) in values {
                state.current.insert(key, value);
            }

            let elapsed = state.started_at.elapsed().as_secs_f64();
            let finished = state.current.get("finished_count").copied().unwrap_or(0.0);
            let overall = if elapsed > 0.0 {
                finished * 60.0 / elapsed
            } else {
                0.0
            };
            state.current.insert("overall_throughput".to_string(), overall);

            let wip: f64 = BUFFER_SIZE_KEYS
                .iter()
                .filter_map(|key| state.current.get(*key))
                .sum();
            state.current.insert("wip_count".to_string(), wip);

            let sample = MetricsSample {
                timestamp: Utc::now(),
                values: state.current.clone(),
            };
            state.history.push_back(sample.clone());
            while state.history.len() > self.max_history {
                state.history.pop_front();
            }

            let averages = [
                ("throughput_avg_1min", "overall_throughput", 60),
                ("throughput_avg_5min", "overall_throughput", 300),
                ("wip_avg", "wip_count", 60),
            ]
            .map(|(out, key, window)| (out, moving_average(&state.history, key, window)));
            let trends = [
                ("throughput_trend", "overall_throughput"),
                ("wip_trend", "wip_count"),
            ]
            .map(|(out, key)| (out, trend(&state.history, key, TREND_WINDOW)));
            let peaks = [
                ("peak_throughput", "overall_throughput"),
                ("peak_wip", "wip_count"),
            ]
            .map(|(out, key)| (out, peak(&state.history, key)));

            state.derived.clear();
            for (key, value) in averages.into_iter().chain(trends).chain(peaks) {
                state.derived.insert(key.to_string(), value);
            }
            let derived = state.derived.clone();

            self.check_alerts(&mut state, overall, &mut pending);
            (sample, derived)
        };

        self.events.emit(PipelineEvent::StatsUpdated { current: sample });
        self.events
            .emit(PipelineEvent::AggregatedStatsChanged { derived });
        for (kind, message, value) in pending {
            self.events.emit(PipelineEvent::AlertTriggered {
                kind,
                message,
                value,
            });
        }
    }

    fn check_alerts(
        &self,
        state: &mut AggregatorState,
        overall: f64,
        pending: &mut Vec<(AlertKind, String, f64)>,
    ) {
        let mut raise = |state: &mut AggregatorState, kind: AlertKind, message: String, value| {
            let now = Instant::now();
            let recent = state
                .last_alerts
                .get(&kind)
                .is_some_and(|at| now.duration_since(*at) < ALERT_DEDUP);
            if !recent {
                state.last_alerts.insert(kind, now);
                pending.push((kind, message, value));
            }
        };

        if self.buffer_capacity > 0 {
            for key in BUFFER_SIZE_KEYS {
                let size = state.current.get(key).copied().unwrap_or(0.0);
                let utilization = size / self.buffer_capacity as f64;
                if utilization > 0.80 {
                    raise(
                        &mut *state,
                        AlertKind::HighQueueUtil,
                        format!("Buffer {} utilization: {:.1}%", key, utilization * 100.0),
                        utilization,
                    );
                    break;
                }
            }
        }

        if overall < self.expected_throughput * 0.5 {
            raise(
                &mut *state,
                AlertKind::LowThroughput,
                format!("Throughput below threshold: {overall:.1} items/min"),
                overall,
            );
        }

        for prefix in STATION_PREFIXES {
            let rejected = state
                .current
                .get(&format!("{prefix}_rejected"))
                .copied()
                .unwrap_or(0.0);
            let processed = state
                .current
                .get(&format!("{prefix}_processed"))
                .copied()
                .unwrap_or(0.0);
            let total = rejected + processed;
            if total > 0.0 {
                let rate = rejected / total;
                if rate > 0.10 {
                    raise(
                        &mut *state,
                        AlertKind::HighErrorRate,
                        format!("High rejection rate at {}: {:.1}%", prefix, rate * 100.0),
                        rate,
                    );
                    break;
                }
            }
        }
    }

    /// Snapshot of the most recent raw values.
    pub fn current(&self) -> HashMap<String, f64> {
        self.state.lock().current.clone()
    }

    /// Snapshot of the derived metrics.
    pub fn derived(&self) -> HashMap<String, f64> {
        self.state.lock().derived.clone()
    }

    /// The most recent `max_entries` retained samples, oldest first.
    pub fn history(&self, max_entries: usize) -> Vec<MetricsSample> {
        let state = self.state.lock();
        let skip = state.history.len().saturating_sub(max_entries);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn wip_count(&self) -> f64 {
        self.state
            .lock()
            .current
            .get("wip_count")
            .copied()
            .unwrap_or(0.0)
    }

    pub fn overall_throughput(&self) -> f64 {
        self.state
            .lock()
            .current
            .get("overall_throughput")
            .copied()
            .unwrap_or(0.0)
    }

    /// Drop all retained state and restart the elapsed-time base.
    pub fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.current.clear();
            state.derived.clear();
            state.history.clear();
            state.last_alerts.clear();
            state.started_at = Instant::now();

            state.current.insert("finished_count".to_string(), 0.0);
            for key in BUFFER_SIZE_KEYS {
                state.current.insert(key.to_string(), 0.0);
            }
            state
                .current
                .insert("overall_throughput".to_string(), 0.0);
            state.current.insert("wip_count".to_string(), 0.0);
        }
        self.events.emit(PipelineEvent::StatsUpdated {
            current: MetricsSample {
                timestamp: Utc::now(),
                values: self.current(),
            },
        });
        self.events.emit(PipelineEvent::AggregatedStatsChanged {
            derived: HashMap::new(),
        });
    }
}

fn moving_average(history: &VecDeque<MetricsSample>, key: &str, window: usize) -> f64 {
    let skip = history.len().saturating_sub(window);
    let mut sum = 0.0;
    let mut count = 0usize;
    for sample in history.iter().skip(skip) {
        if let Some(value) = sample.values.get(key) {
            sum += value;
            count += 1;
        }
    }
    if count > 0 {
        sum / count as f64
    } else {
        0.0
    }
}

/// Least-squares slope of `key` over the last `window` samples; zero until
/// the window is full.
fn trend(history: &VecDeque<MetricsSample>, key: &str, window: usize) -> f64 {
    if history.len() < window {
        return 0.0;
    }
    let skip = history.len() - window;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);
    for (i, sample) in history.iter().skip(skip).enumerate() {
        let x = i as f64;
        let y = sample.values.get(key).copied().unwrap_or(0.0);
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }
    let n = window as f64;
    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator == 0.0 {
        0.0
    } else {
        (n * sum_xy - sum_x * sum_y) / denominator
    }
}

fn peak(history: &VecDeque<MetricsSample>, key: &str) -> f64 {
    history
        .iter()
        .filter_map(|sample| sample.values.get(key))
        .fold(0.0, |max, value| value.max(max))
}
