use crate::logger::LogLevel;
use serde::Deserialize;

/// Timing and failure tuning for one station.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StationConfig {
    /// Lower bound of the simulated processing time, in milliseconds.
    pub min_processing_time: u64,
    /// Upper bound of the simulated processing time, in milliseconds.
    pub max_processing_time: u64,
    /// Probability in `[0, 1]` that a product is permanently rejected.
    pub failure_rate: f64,
}

impl StationConfig {
    pub fn new(min_processing_time: u64, max_processing_time: u64, failure_rate: f64) -> Self {
        Self {
            min_processing_time,
            max_processing_time,
            failure_rate,
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self::new(100, 500, 0.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IntakeConfig {
    pub min_processing_time: u64,
    pub max_processing_time: u64,
    pub failure_rate: f64,
    /// Products synthesized per minute.
    pub production_rate: u32,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            min_processing_time: 50,
            max_processing_time: 150,
            failure_rate: 0.0,
            production_rate: 10,
        }
    }
}

impl IntakeConfig {
    pub fn station(&self) -> StationConfig {
        StationConfig::new(
            self.min_processing_time,
            self.max_processing_time,
            self.failure_rate,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QualityConfig {
    pub min_processing_time: u64,
    pub max_processing_time: u64,
    /// Outright rejection probability, sampled before rework is considered.
    pub failure_rate: f64,
    /// Probability that a single failed sub-test sends a product to rework.
    pub rework_rate: f64,
    /// Independent pass probability of each sub-test.
    pub sub_test_pass_rate: f64,
    /// When set, a product inspected this many times is rejected instead of
    /// being sent to rework again.
    pub max_rework_count: Option<u32>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_processing_time: 150,
            max_processing_time: 300,
            failure_rate: 0.03,
            rework_rate: 0.08,
            sub_test_pass_rate: 0.85,
            max_rework_count: None,
        }
    }
}

impl QualityConfig {
    pub fn station(&self) -> StationConfig {
        StationConfig::new(
            self.min_processing_time,
            self.max_processing_time,
            self.failure_rate,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AggregatorConfig {
    pub update_interval_ms: u64,
    pub max_history_size: usize,
    /// Expected line throughput in items/minute, the LOW_THROUGHPUT baseline.
    pub expected_throughput: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 1000,
            max_history_size: 300,
            expected_throughput: 10.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggerConfig {
    pub min_level: LogLevel,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerConfig {
    pub health_check_interval_ms: u64,
    /// A worker whose health stamp is older than this is considered
    /// unresponsive by the sweep.
    pub unresponsive_threshold_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 5000,
            unresponsive_threshold_ms: 30_000,
        }
    }
}

/// Complete configuration of the production line. Every field defaults, so
/// `PipelineConfig::default()` and deserializing `{}` both yield a line with
/// the stock tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    pub rng_seed: Option<u64>,
    pub intake: IntakeConfig,
    #[serde(default = "default_assembler")]
    pub assembler: StationConfig,
    pub quality: QualityConfig,
    #[serde(default = "default_packaging")]
    pub packaging: StationConfig,
    #[serde(default = "default_shipping")]
    pub shipping: StationConfig,
    pub aggregator: AggregatorConfig,
    pub logger: LoggerConfig,
    pub worker: WorkerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            rng_seed: None,
            intake: IntakeConfig::default(),
            assembler: default_assembler(),
            quality: QualityConfig::default(),
            packaging: default_packaging(),
            shipping: default_shipping(),
            aggregator: AggregatorConfig::default(),
            logger: LoggerConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

fn default_buffer_capacity() -> usize {
    20
}

fn default_assembler() -> StationConfig {
    StationConfig::new(200, 400, 0.02)
}

fn default_packaging() -> StationConfig {
    StationConfig::new(180, 350, 0.01)
}

fn default_shipping() -> StationConfig {
    StationConfig::new(100, 200, 0.005)
}
