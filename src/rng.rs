use crate::product::ProductType;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// The single pseudorandom source every random choice in the pipeline draws
/// from: processing times, failure samples, sub-test outcomes, intake types.
///
/// With a fixed seed each draw is reproducible given a fixed consumption
/// order; under real multi-threading the interleaving is not controlled.
pub struct PipelineRng {
    inner: Mutex<StdRng>,
}

impl PipelineRng {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Uniform duration in `[min_ms, max_ms]`. A degenerate range collapses
    /// to `min_ms`.
    pub fn processing_delay(&self, min_ms: u64, max_ms: u64) -> Duration {
        let ms = if max_ms <= min_ms {
            min_ms
        } else {
            self.inner.lock().gen_range(min_ms..=max_ms)
        };
        Duration::from_millis(ms)
    }

    /// Bernoulli sample; `probability` outside `[0, 1]` saturates.
    pub fn chance(&self, probability: f64) -> bool {
        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        self.inner.lock().gen::<f64>() < probability
    }

    /// Uniform index in `[0, len)`.
    pub fn index(&self, len: usize) -> usize {
        self.inner.lock().gen_range(0..len)
    }

    pub fn product_type(&self) -> ProductType {
        ProductType::ALL[self.index(ProductType::ALL.len())]
    }

    /// Uniform integer in `[low, high)`.
    pub fn range_u32(&self, low: u32, high: u32) -> u32 {
        self.inner.lock().gen_range(low..high)
    }
}
