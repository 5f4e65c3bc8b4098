//! Integration tests for acquisition, capture and export against mock sensors

use dual_adxl345_logger::mock::{MockAdxl345, RecordingRenderer, RenderKind, StepClock};
use dual_adxl345_logger::{
    capture_channel, AcquisitionLoop, DataRate, ExportConfig, LoopState, MemoryStore, SampleStore, SessionConfig,
    SnapshotExporter, StopFlag, StreamControl, Supervisor, TriggerSource,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_five_rounds_export_ten_samples_at_half_g_bound() {
    let dir = tempfile::tempdir().unwrap();
    let dev0 = MockAdxl345::new();
    let dev1 = MockAdxl345::new();
    let (probe0, probe1) = (dev0.probe(), dev1.probe());
    for i in 0..5 {
        probe0.push_raw(i, -i, 250);
        probe1.push_raw(0, 250, -250);
    }

    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(StepClock::new(1_700_000_000.0, Duration::from_millis(1)));
    let rate = DataRate::from_code(0xA).unwrap();

    let mut acquisition = AcquisitionLoop::new(dev0, dev1, store.clone(), clock.clone());
    acquisition.start(rate).unwrap();

    let mut rounds = 0;
    let summary = acquisition
        .run(&StopFlag::new(), |_| {
            rounds += 1;
            if rounds == 5 {
                StreamControl::Break
            } else {
                StreamControl::Continue
            }
        })
        .unwrap();
    assert_eq!(summary.rounds, 5);
    assert_eq!(acquisition.state(), LoopState::Stopped);
    drop(acquisition);
    assert_eq!(probe0.released(), 1);
    assert_eq!(probe1.released(), 1);

    let renderer = RecordingRenderer::new();
    let exporter = SnapshotExporter::new(
        store.clone(),
        Box::new(renderer.clone()),
        clock,
        rate.code(),
        ExportConfig {
            subplot_dir: dir.path().join("plot"),
            overlay_dir: dir.path().join("plot_overlay"),
        },
    );
    let report = exporter.export(Duration::from_secs(180)).unwrap();

    assert_eq!(store.sample_count().unwrap(), 10);
    assert_eq!(report.samples, 10);
    assert_eq!(report.y_bound, 0.5);

    let calls = renderer.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].kind, RenderKind::Subplots);
    assert_eq!(calls[1].kind, RenderKind::Overlay);

    let window = &calls[0].window;
    assert_eq!(window.channels[&0].len(), 5);
    assert_eq!(window.channels[&1].len(), 5);
    assert!(window.channels[&0].z_g.iter().all(|&z| z == 1.0));
    assert!(window.channels[&1].y_g.iter().all(|&y| y == 1.0));
    assert!(window.channels[&1].z_g.iter().all(|&z| z == -1.0));
    assert_eq!(window.channels[&0].x_g[4], 4.0 * 0.004);
}

#[test]
fn test_wrong_device_on_second_bus_never_starts() {
    let dev0 = MockAdxl345::new();
    let dev1 = MockAdxl345::with_devid(0x00);
    let (probe0, probe1) = (dev0.probe(), dev1.probe());

    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(StepClock::new(0.0, Duration::from_millis(1)));
    let mut acquisition = AcquisitionLoop::new(dev0, dev1, store.clone(), clock);

    let err = acquisition.start(DataRate::Hz100).unwrap_err();
    assert!(err.is_init_fatal());
    assert_eq!(acquisition.state(), LoopState::Idle);

    drop(acquisition);
    assert_eq!(probe0.released(), 1);
    assert_eq!(probe1.released(), 1);
    assert_eq!(store.sample_count().unwrap(), 0);
}

#[test]
fn test_supervised_session_exits_cleanly_on_interrupt() {
    let dir = tempfile::tempdir().unwrap();
    let dev0 = MockAdxl345::new();
    let dev1 = MockAdxl345::new();
    let (probe0, probe1) = (dev0.probe(), dev1.probe());
    probe0.set_latency(Duration::from_micros(100));
    probe1.set_latency(Duration::from_micros(100));

    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(dual_adxl345_logger::SystemClock);
    let mut acquisition = AcquisitionLoop::new(dev0, dev1, store.clone(), clock.clone());
    acquisition.start(DataRate::Hz3200).unwrap();

    let renderer = RecordingRenderer::new();
    let exporter = SnapshotExporter::new(
        store.clone(),
        Box::new(renderer.clone()),
        clock,
        DataRate::Hz3200.code(),
        ExportConfig {
            subplot_dir: dir.path().join("plot"),
            overlay_dir: dir.path().join("plot_overlay"),
        },
    );
    let config = SessionConfig {
        echo_precision: None,
        ..SessionConfig::default()
    };
    let supervisor = Supervisor::new(acquisition, exporter, capture_channel(), config).unwrap();

    // Two triggers in quick succession collapse into one capture
    let handle = supervisor.trigger_handle();
    let requester = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        handle.request_capture_and_stop(TriggerSource::Interrupt);
        handle.request_capture_and_stop(TriggerSource::Button);
    });

    let report = supervisor.run().unwrap();
    requester.join().unwrap();

    assert_eq!(report.trigger, TriggerSource::Interrupt);
    assert_eq!(report.export.unwrap().y_bound, 2.5);
    assert_eq!(renderer.calls().len(), 2);
    assert_eq!(
        store.sample_count().unwrap() as u64,
        report.summary.rounds * 2
    );
    assert_eq!(probe0.released(), 1);
    assert_eq!(probe1.released(), 1);
}
