//! Session supervision: acquisition thread, capture handling and shutdown
//!
//! The supervisor owns everything with a lifetime: the started acquisition
//! loop (and through it both buses), the exporter and the optional button
//! watcher. On a capture request it exports first, while acquisition keeps
//! running, then stops and joins the loop and releases the inputs.

use crate::acquisition::{
    format_sample, AcquisitionLoop, AcquisitionSummary, LoopState, StopFlag, StreamControl,
    CSV_HEADER,
};
use crate::bus::SpiTransport;
use crate::error::{AccelError, Result};
use crate::export::{ExportReport, SnapshotExporter, DEFAULT_WINDOW};
use crate::trigger::{ButtonWatcher, CaptureQueue, SessionEvent, TriggerHandle, TriggerSource};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Session behaviour
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Length of the exported window
    pub window: Duration,
    /// Capture automatically after this long
    pub max_duration: Option<Duration>,
    /// Print one CSV line per sample with this many decimals
    pub echo_precision: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_duration: None,
            echo_precision: Some(3),
        }
    }
}

/// How a session ended
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// What requested the capture
    pub trigger: TriggerSource,
    pub summary: AcquisitionSummary,
    /// `None` if the export failed (shutdown proceeds regardless)
    pub export: Option<ExportReport>,
}

pub struct Supervisor<T: SpiTransport> {
    acquisition: AcquisitionLoop<T>,
    exporter: SnapshotExporter,
    handle: TriggerHandle,
    queue: CaptureQueue,
    button: Option<ButtonWatcher>,
    config: SessionConfig,
}

impl<T: SpiTransport + Send + 'static> Supervisor<T> {
    /// Supervise an already started acquisition loop
    ///
    /// `channel` comes from [`crate::trigger::capture_channel`]. Trigger
    /// sources may be wired to it before the buses are opened; requests
    /// queued during startup are handled as soon as [`Self::run`] begins.
    pub fn new(
        acquisition: AcquisitionLoop<T>,
        exporter: SnapshotExporter,
        channel: (TriggerHandle, CaptureQueue),
        config: SessionConfig,
    ) -> Result<Self> {
        if acquisition.state() != LoopState::Running {
            return Err(AccelError::InvalidParameter(format!(
                "Supervisor needs a running acquisition loop, got {:?}",
                acquisition.state()
            )));
        }

        let (handle, queue) = channel;
        Ok(Self {
            acquisition,
            exporter,
            handle,
            queue,
            button: None,
            config,
        })
    }

    /// Handle for trigger sources (Ctrl+C handler, button watcher)
    pub fn trigger_handle(&self) -> TriggerHandle {
        self.handle.clone()
    }

    /// Hand over a button watcher to be released at shutdown
    pub fn with_button(mut self, button: ButtonWatcher) -> Self {
        self.button = Some(button);
        self
    }

    /// Acquire until a capture trigger or a fatal error, then shut down
    pub fn run(self) -> Result<SessionReport> {
        let Supervisor {
            mut acquisition,
            exporter,
            handle,
            queue,
            button,
            config,
        } = self;

        let stop = StopFlag::new();
        let loop_stop = stop.clone();
        let ended = handle.clone();
        let echo = config.echo_precision;

        let worker = thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || {
                if echo.is_some() {
                    println!("{}", CSV_HEADER);
                }
                let result = acquisition.run(&loop_stop, |round| {
                    if let Some(precision) = echo {
                        for sample in round {
                            println!("{}", format_sample(sample, precision));
                        }
                    }
                    StreamControl::Continue
                });
                // Releases both buses before the supervisor is told
                drop(acquisition);
                ended.notify_acquisition_ended();
                result
            })?;

        let trigger = wait_for_trigger(&queue, config.max_duration);

        let export = match trigger {
            Some(source) => {
                info!(%source, window_secs = config.window.as_secs_f64(), "capture requested");
                match exporter.export(config.window) {
                    Ok(report) => Some(report),
                    Err(e) => {
                        error!(error = %e, "snapshot export failed, continuing shutdown");
                        None
                    }
                }
            }
            None => None,
        };

        stop.request();
        let joined = worker.join();

        if let Some(button) = button {
            button.release();
        }
        drop(handle);

        let summary = match joined.map_err(|_| AccelError::WorkerPanic)? {
            Ok(summary) => summary,
            Err(e) if e.is_round_fatal() => {
                error!(error = %e, "acquisition fault ended the session");
                return Err(e);
            }
            Err(e) => {
                error!(error = %e, "acquisition failed");
                return Err(e);
            }
        };
        let trigger = match trigger {
            Some(source) => source,
            None => {
                // The loop only ends on its own through a fault, which has
                // already been returned above.
                warn!("acquisition ended without a capture request");
                return Err(AccelError::InvalidParameter(
                    "acquisition ended without a capture request".to_string(),
                ));
            }
        };

        info!(
            %trigger,
            rounds = summary.rounds,
            elapsed_secs = summary.elapsed_secs,
            round_rate_hz = summary.round_rate(),
            "session finished"
        );

        Ok(SessionReport {
            trigger,
            summary,
            export,
        })
    }
}

/// Block until a capture request, a loop exit, or the run duration
fn wait_for_trigger(queue: &CaptureQueue, max_duration: Option<Duration>) -> Option<TriggerSource> {
    let deadline = max_duration.map(|d| Instant::now() + d);

    loop {
        let timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        match queue.wait(timeout) {
            Some(SessionEvent::Capture(request)) => {
                debug!(
                    source = %request.source,
                    queued_us = request.requested_at.elapsed().as_micros() as u64,
                    "capture request dequeued"
                );
                return Some(request.source);
            }
            Some(SessionEvent::AcquisitionEnded) => return None,
            None => match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    info!("run duration elapsed");
                    return Some(TriggerSource::Timer);
                }
                Some(_) => continue,
                None => return None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adxl345::DataRate;
    use crate::common::SystemClock;
    use crate::export::ExportConfig;
    use crate::mock::{MockAdxl345, MockInput, MockProbe, RecordingRenderer};
    use crate::store::MemoryStore;
    use crate::trigger::capture_channel;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    struct Fixture {
        supervisor: Supervisor<MockAdxl345>,
        probes: (MockProbe, MockProbe),
        renderer: RecordingRenderer,
        _dir: tempfile::TempDir,
    }

    fn fixture(renderer: RecordingRenderer, config: SessionConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let dev0 = MockAdxl345::new();
        let dev1 = MockAdxl345::new();
        let probes = (dev0.probe(), dev1.probe());
        probes.0.set_latency(Duration::from_micros(200));
        probes.1.set_latency(Duration::from_micros(200));

        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(SystemClock);
        let mut acquisition = AcquisitionLoop::new(dev0, dev1, store.clone(), clock.clone());
        acquisition.start(DataRate::Hz400).unwrap();

        let exporter = SnapshotExporter::new(
            store,
            Box::new(renderer.clone()),
            clock,
            DataRate::Hz400.code(),
            ExportConfig {
                subplot_dir: dir.path().join("plot"),
                overlay_dir: dir.path().join("plot_overlay"),
            },
        );

        Fixture {
            supervisor: Supervisor::new(acquisition, exporter, capture_channel(), config).unwrap(),
            probes,
            renderer,
            _dir: dir,
        }
    }

    fn quiet() -> SessionConfig {
        SessionConfig {
            echo_precision: None,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_supervisor_requires_running_loop() {
        let store = Arc::new(MemoryStore::new());
        let acquisition =
            AcquisitionLoop::new(MockAdxl345::new(), MockAdxl345::new(), store.clone(), Arc::new(SystemClock));
        let exporter = SnapshotExporter::new(
            store,
            Box::new(RecordingRenderer::new()),
            Arc::new(SystemClock),
            0xA,
            ExportConfig::default(),
        );
        assert!(Supervisor::new(acquisition, exporter, capture_channel(), quiet()).is_err());
    }

    #[test]
    fn test_interrupt_queued_during_startup_is_handled() {
        let (handle, queue) = capture_channel();
        // Ctrl+C arrives before the sensors are even opened
        handle.request_capture_and_stop(TriggerSource::Interrupt);

        let dir = tempfile::tempdir().unwrap();
        let dev0 = MockAdxl345::new();
        let dev1 = MockAdxl345::new();
        let (p0, p1) = (dev0.probe(), dev1.probe());
        let store = Arc::new(MemoryStore::new());
        let mut acquisition =
            AcquisitionLoop::new(dev0, dev1, store.clone(), Arc::new(SystemClock));
        acquisition.start(DataRate::Hz100).unwrap();

        let renderer = RecordingRenderer::new();
        let exporter = SnapshotExporter::new(
            store,
            Box::new(renderer.clone()),
            Arc::new(SystemClock),
            DataRate::Hz100.code(),
            ExportConfig {
                subplot_dir: dir.path().join("plot"),
                overlay_dir: dir.path().join("plot_overlay"),
            },
        );

        let supervisor = Supervisor::new(acquisition, exporter, (handle, queue), quiet()).unwrap();
        let report = supervisor.run().unwrap();

        assert_eq!(report.trigger, TriggerSource::Interrupt);
        assert!(report.export.is_some());
        assert_eq!(renderer.calls().len(), 2);
        assert_eq!(p0.released(), 1);
        assert_eq!(p1.released(), 1);
    }

    #[test]
    fn test_capture_during_acquisition_exports_whole_rounds() {
        let f = fixture(RecordingRenderer::new(), quiet());
        let handle = f.supervisor.trigger_handle();

        let trigger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            handle.request_capture_and_stop(TriggerSource::Interrupt);
        });

        let report = f.supervisor.run().unwrap();
        trigger.join().unwrap();

        assert_eq!(report.trigger, TriggerSource::Interrupt);
        let export = report.export.expect("export should succeed");
        assert_eq!(export.y_bound, 1.0);

        let calls = f.renderer.calls();
        assert_eq!(calls.len(), 2);
        let window = &calls[0].window;
        let ch0 = window.channels.get(&0).map(|s| s.len()).unwrap_or(0);
        let ch1 = window.channels.get(&1).map(|s| s.len()).unwrap_or(0);
        assert_eq!(ch0, ch1, "every exported round has both channels");
        assert_eq!(export.samples, ch0 + ch1);
        // Export ran before the loop was stopped
        assert!(report.summary.rounds as usize >= ch0);

        assert_eq!(f.probes.0.released(), 1);
        assert_eq!(f.probes.1.released(), 1);
    }

    #[test]
    fn test_fatal_error_skips_export_and_releases() {
        let f = fixture(RecordingRenderer::new(), quiet());
        f.probes.1.fail_after(3 + 5);

        let result = f.supervisor.run();

        assert!(matches!(result, Err(AccelError::Bus(_))));
        assert!(f.renderer.calls().is_empty());
        assert_eq!(f.probes.0.released(), 1);
        assert_eq!(f.probes.1.released(), 1);
    }

    #[test]
    fn test_run_duration_triggers_capture() {
        let config = SessionConfig {
            max_duration: Some(Duration::from_millis(20)),
            ..quiet()
        };
        let f = fixture(RecordingRenderer::new(), config);

        let report = f.supervisor.run().unwrap();

        assert_eq!(report.trigger, TriggerSource::Timer);
        assert!(report.export.is_some());
        assert!(report.summary.rounds > 0);
    }

    #[test]
    fn test_export_failure_does_not_block_shutdown() {
        let config = SessionConfig {
            max_duration: Some(Duration::from_millis(10)),
            ..quiet()
        };
        let f = fixture(RecordingRenderer::failing(), config);

        let report = f.supervisor.run().unwrap();

        assert!(report.export.is_none());
        assert_eq!(f.probes.0.released(), 1);
        assert_eq!(f.probes.1.released(), 1);
    }

    #[test]
    fn test_button_press_captures_and_input_is_released() {
        let f = fixture(RecordingRenderer::new(), quiet());
        let input = MockInput::new(vec![true, true, true, false]);
        let released = input.release_counter();
        let watcher = ButtonWatcher::spawn(
            input,
            Duration::from_millis(1),
            Duration::from_millis(200),
            f.supervisor.trigger_handle(),
        );

        let report = f.supervisor.with_button(watcher).run().unwrap();

        assert_eq!(report.trigger, TriggerSource::Button);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(f.renderer.calls().len(), 2);
    }
}
