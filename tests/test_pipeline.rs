use prodline::{
    LogLevel, PipelineConfig, PipelineController, PipelineEvent, ProductState, StationConfig,
    StationState,
};
use std::time::{Duration, Instant};

/// Stock pipeline scaled down so scenarios complete in a couple of seconds:
/// millisecond processing, a fast intake, no failures anywhere.
fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.logger.min_level = LogLevel::Critical;
    config.intake.min_processing_time = 1;
    config.intake.max_processing_time = 2;
    config.intake.production_rate = 600; // one product every 100 ms
    config.assembler = StationConfig::new(1, 3, 0.0);
    config.quality.min_processing_time = 1;
    config.quality.max_processing_time = 2;
    config.quality.failure_rate = 0.0;
    config.quality.rework_rate = 0.0;
    config.quality.sub_test_pass_rate = 1.0;
    config.packaging = StationConfig::new(1, 3, 0.0);
    config.shipping = StationConfig::new(1, 2, 0.0);
    config.aggregator.update_interval_ms = 100;
    config
}

fn quiet_controller(config: PipelineConfig) -> PipelineController {
    PipelineController::with_sink(config, Box::new(std::io::sink()))
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_happy_path_products_flow_to_finished() {
    let controller = quiet_controller(fast_config());
    let events = controller.events();

    controller.start().expect("start failed");
    assert!(wait_until(Duration::from_secs(10), || {
        controller.finished_count() >= 4
    }));
    let stop_started = Instant::now();
    controller.stop();
    assert!(stop_started.elapsed() < Duration::from_secs(6));

    let drained: Vec<_> = events.try_iter().collect();
    assert!(drained
        .iter()
        .all(|event| !matches!(event, PipelineEvent::ErrorOccurred { .. })));
    assert!(drained
        .iter()
        .any(|event| matches!(event, PipelineEvent::ProductFinished { .. })));
    assert!(drained
        .iter()
        .any(|event| matches!(event, PipelineEvent::StatisticsUpdated)));

    let finished = controller.take_finished();
    assert_eq!(finished.len() as u64, controller.finished_count());
    for product in &finished {
        assert_eq!(product.state(), ProductState::Finished);
        assert_eq!(product.trace().len(), 5, "trace: {:?}", product.trace());
        for (entry, station) in product.trace().iter().zip([
            "Intake",
            "Assembler",
            "Quality Inspection",
            "Packaging",
            "Shipping",
        ]) {
            assert!(entry.starts_with(station), "entry {entry} vs {station}");
        }
        // Wire form survives the journey.
        let decoded = prodline::Product::from_json(&product.to_json().unwrap()).unwrap();
        assert_eq!(&decoded, product);
    }
}

#[test]
fn test_pure_rejection_starves_downstream() {
    let mut config = fast_config();
    config.assembler.failure_rate = 1.0;
    let controller = quiet_controller(config);
    let events = controller.events();

    controller.start().expect("start failed");
    let assembler = controller.station("Assembler").unwrap().clone();
    assert!(wait_until(Duration::from_secs(10), || assembler.rejected() >= 3));
    std::thread::sleep(Duration::from_millis(300));
    controller.stop();

    assert_eq!(controller.finished_count(), 0);
    assert!(assembler.rejected() > 0);
    assert_eq!(assembler.processed(), 0);
    // Everything downstream of the assembler stayed empty.
    for buffer in &controller.buffers()[1..] {
        assert!(buffer.is_empty());
    }
    for core in controller.stations() {
        assert_ne!(core.state(), StationState::Error);
    }
    for product in controller.take_rejected() {
        assert_eq!(product.state(), ProductState::Rejected);
    }
    assert!(events
        .try_iter()
        .all(|event| !matches!(event, PipelineEvent::ProductFinished { .. })));
}

#[test]
fn test_rework_loop_capped_and_rejected() {
    let mut config = fast_config();
    // One product every six seconds, so exactly one enters the line.
    config.intake.production_rate = 10;
    // Every sub-test fails, so every inspection wants rework; the cap
    // rejects the product on its third visit.
    config.quality.sub_test_pass_rate = 0.0;
    config.quality.max_rework_count = Some(3);
    let controller = quiet_controller(config);

    controller.start().expect("start failed");
    let mut rejected = Vec::new();
    assert!(wait_until(Duration::from_secs(10), || {
        rejected.extend(controller.take_rejected());
        !rejected.is_empty()
    }));
    controller.stop();

    assert_eq!(rejected.len(), 1);
    let product = &rejected[0];
    assert_eq!(product.state(), ProductState::Rejected);
    assert_eq!(product.visits("Assembler"), 3, "trace: {:?}", product.trace());
    assert_eq!(
        product.visits("Quality Inspection"),
        3,
        "trace: {:?}",
        product.trace()
    );
    assert_eq!(controller.finished_count(), 0);
}

#[test]
fn test_backpressure_blocks_upstream_without_losing_products() {
    let mut config = fast_config();
    config.buffer_capacity = 2;
    // Shipping hoards its product far longer than the scenario runs.
    config.shipping = StationConfig::new(8000, 8000, 0.0);
    let controller = quiet_controller(config);

    controller.start().expect("start failed");

    let packaging = controller.station("Packaging").unwrap().clone();
    let assembler = controller.station("Assembler").unwrap().clone();
    assert!(wait_until(Duration::from_secs(5), || {
        controller.buffers()[3].is_full() && packaging.state() == StationState::Blocked
    }));
    assert_eq!(controller.buffers()[3].len(), 2);
    assert!(wait_until(Duration::from_secs(5), || {
        assembler.state() == StationState::Blocked
    }));

    // Freeze the line and account for every admitted product.
    controller.pause();
    std::thread::sleep(Duration::from_millis(600));

    let generated = controller.station("Intake").unwrap().processed();
    let in_buffers: usize = controller.buffers().iter().map(|buffer| buffer.len()).sum();
    let downstream = &controller.stations()[1..];
    let in_process = downstream
        .iter()
        .filter(|core| core.current_product().is_some())
        .count();
    let rejected: u64 = downstream.iter().map(|core| core.rejected()).sum();
    assert!(generated > 0);
    assert_eq!(
        generated,
        controller.finished_count() + rejected + in_buffers as u64 + in_process as u64,
        "admitted {generated}, buffers {in_buffers}, in process {in_process}"
    );

    let stop_started = Instant::now();
    controller.stop();
    assert!(stop_started.elapsed() < Duration::from_secs(6));
}

#[test]
fn test_high_queue_utilization_alert_names_buffer() {
    let mut config = fast_config();
    config.buffer_capacity = 10;
    let controller = quiet_controller(config);
    let events = controller.events();

    // Load the intake-to-assembler buffer to 9 of 10 and feed the
    // aggregator one sample.
    let mut values = std::collections::HashMap::new();
    values.insert("intake_buffer_size".to_string(), 9.0);
    controller.aggregator().update(values);

    let alert = events.try_iter().find_map(|event| match event {
        PipelineEvent::AlertTriggered { kind, message, .. }
            if kind == prodline::AlertKind::HighQueueUtil =>
        {
            Some(message)
        }
        _ => None,
    });
    let message = alert.expect("expected HIGH_QUEUE_UTIL alert");
    assert!(message.contains("intake_buffer"), "message: {message}");
}

#[test]
fn test_clean_shutdown_and_restart_under_load() {
    let controller = quiet_controller(fast_config());
    let events = controller.events();

    controller.start().expect("start failed");
    assert!(wait_until(Duration::from_secs(10), || {
        controller.finished_count() >= 2
    }));

    let stop_started = Instant::now();
    controller.stop();
    assert!(stop_started.elapsed() < Duration::from_secs(6));
    for core in controller.stations() {
        assert_eq!(core.state(), StationState::Stopped, "{}", core.name());
    }
    let stops = events
        .try_iter()
        .filter(|event| matches!(event, PipelineEvent::ProductionStopped))
        .count();
    assert_eq!(stops, 1);
    // No buffer accepts anything once stopped.
    for buffer in controller.buffers() {
        assert!(buffer
            .try_push(prodline::Product::new(prodline::ProductType::Washer))
            .is_err());
    }

    // The line comes back and products flow again.
    let before_restart = controller.finished_count();
    controller.start().expect("restart failed");
    assert!(wait_until(Duration::from_secs(10), || {
        controller.finished_count() > before_restart
    }));
    controller.stop();
}

#[test]
fn test_pause_freezes_and_resume_revives_the_line() {
    let controller = quiet_controller(fast_config());
    let events = controller.events();

    controller.start().expect("start failed");
    assert!(wait_until(Duration::from_secs(10), || {
        controller.finished_count() >= 1
    }));

    controller.pause();
    assert!(controller.is_paused());
    std::thread::sleep(Duration::from_millis(400));
    let frozen: u64 = controller.stations().iter().map(|core| core.processed()).sum();
    std::thread::sleep(Duration::from_millis(600));
    let still: u64 = controller.stations().iter().map(|core| core.processed()).sum();
    assert_eq!(frozen, still);

    controller.resume();
    assert!(!controller.is_paused());
    assert!(wait_until(Duration::from_secs(10), || {
        let now: u64 = controller.stations().iter().map(|core| core.processed()).sum();
        now > still
    }));
    controller.stop();

    let drained: Vec<_> = events.try_iter().collect();
    assert!(drained
        .iter()
        .any(|event| matches!(event, PipelineEvent::ProductionPaused)));
    assert!(drained
        .iter()
        .any(|event| matches!(event, PipelineEvent::ProductionResumed)));
}

#[test]
fn test_registry_tracks_line_workers() {
    let controller = quiet_controller(fast_config());
    controller.start().expect("start failed");

    let registry = controller.registry();
    assert!(wait_until(Duration::from_secs(2), || {
        registry.count_active() >= 8
    }));
    for name in [
        "Intake",
        "Assembler",
        "Quality Inspection",
        "Packaging",
        "Shipping",
        "event-router",
        "metrics-sampler",
        "logger-sink",
    ] {
        let info = registry.find_by_name(name);
        assert!(info.is_some(), "missing worker {name}");
        assert!(info.unwrap().active, "inactive worker {name}");
    }

    controller.stop();
    for name in ["Intake", "event-router", "metrics-sampler"] {
        assert!(registry.find_by_name(name).is_none(), "{name} still registered");
    }
}

#[test]
fn test_aggregator_follows_running_line() {
    let controller = quiet_controller(fast_config());
    controller.start().expect("start failed");
    assert!(wait_until(Duration::from_secs(10), || {
        controller.finished_count() >= 3
    }));
    // Let a few sampler ticks observe the finished work.
    std::thread::sleep(Duration::from_millis(300));
    controller.stop();

    let current = controller.aggregator().current();
    assert!(current["finished_count"] >= 3.0);
    assert!(current["overall_throughput"] > 0.0);
    assert!(current.contains_key("shipping_throughput"));
    assert!(current.contains_key("intake_processed"));
    let derived = controller.aggregator().derived();
    assert!(derived["peak_throughput"] > 0.0);
    assert!(!controller.aggregator().history(100).is_empty());
}

#[test]
fn test_reset_returns_line_to_initial_state() {
    let controller = quiet_controller(fast_config());
    let events = controller.events();

    controller.start().expect("start failed");
    assert!(wait_until(Duration::from_secs(10), || {
        controller.finished_count() >= 1
    }));
    controller.reset();

    assert!(!controller.is_running());
    assert_eq!(controller.finished_count(), 0);
    for core in controller.stations() {
        assert_eq!(core.state(), StationState::Idle);
        assert_eq!(core.processed(), 0);
        assert_eq!(core.rejected(), 0);
    }
    for buffer in controller.buffers() {
        assert!(buffer.is_empty());
    }
    assert!(controller.take_finished().is_empty());
    assert!(events
        .try_iter()
        .any(|event| matches!(event, PipelineEvent::ProductionReset)));
}
