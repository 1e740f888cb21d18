//! A concurrent multi-stage production line simulator.
//!
//! Five stations (Intake, Assembler, Quality Inspection, Packaging,
//! Shipping) run as independent worker threads, coupled by bounded buffers
//! that propagate back-pressure upstream. A controller fans lifecycle
//! operations out to every worker, a metrics aggregator samples the running
//! line and raises threshold alerts, and an async logger keeps producers off
//! the I/O path.
//!
//! # Features
//!
//! - Blocking bounded buffers with prompt cooperative cancellation
//! - Per-station worker lifecycle: start, pause, resume, stop, reset
//! - A product state machine with a quality-inspection rework loop
//! - Bounded metrics history with moving averages, trends and alerting
//! - A single typed event channel for every observable occurrence
//!
//! # Example
//!
//! ```ignore
//! use prodline::{PipelineConfig, PipelineController, PipelineEvent};
//!
//! let controller = PipelineController::new(PipelineConfig::default());
//! let events = controller.events();
//!
//! controller.start()?;
//! // ... let the line run ...
//! controller.stop();
//!
//! for event in events.try_iter() {
//!     if let PipelineEvent::ProductFinished { id } = event {
//!         println!("finished {id}");
//!     }
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod logger;
pub mod metrics;
pub mod product;
pub mod registry;
pub mod rng;
pub mod station;
pub mod stations;

// Re-exports for convenience
pub use buffer::BoundedBuffer;
pub use config::{PipelineConfig, StationConfig};
pub use controller::PipelineController;
pub use error::{PipelineError, Result};
pub use events::{EventBus, PipelineEvent};
pub use logger::{AsyncLogger, LogLevel, LogRecord};
pub use metrics::{AlertKind, MetricsAggregator, MetricsSample};
pub use product::{Product, ProductState, ProductType};
pub use registry::{WorkerPriority, WorkerRegistry};
pub use station::{StationCore, StationLogic, StationState, StationWorker};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
