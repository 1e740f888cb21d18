use crate::logger::LogRecord;
use crate::metrics::{AlertKind, MetricsSample};
use crate::station::StationState;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;

/// Every observable occurrence in the pipeline, posted as a typed variant to
/// a single channel. Stations post to the controller's internal channel; the
/// controller routes onto the public channel external observers drain.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    ProductionStarted,
    ProductionPaused,
    ProductionResumed,
    ProductionStopped,
    ProductionReset,
    ProductFinished {
        id: String,
    },
    StatisticsUpdated,
    ErrorOccurred {
        message: String,
    },
    StationStateChanged {
        station: String,
        state: StationState,
    },
    ProductProcessed {
        station: String,
        id: String,
    },
    ProductRejected {
        station: String,
        id: String,
    },
    StationError {
        station: String,
        message: String,
    },
    StationMetricsUpdated {
        station: String,
        input_depth: usize,
        throughput_per_minute: f64,
    },
    StatsUpdated {
        current: MetricsSample,
    },
    AggregatedStatsChanged {
        derived: HashMap<String, f64>,
    },
    AlertTriggered {
        kind: AlertKind,
        message: String,
        value: f64,
    },
    LogEntryAdded {
        record: LogRecord,
    },
    WorkerAlert {
        worker: String,
        message: String,
    },
}

/// Cloneable sending half of an event channel. Sends never block and are
/// silently dropped once the receiving side has gone away.
#[derive(Clone)]
pub struct EventBus {
    tx: Sender<PipelineEvent>,
}

impl EventBus {
    pub fn channel() -> (EventBus, Receiver<PipelineEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}
