//! Capture triggers: button input, Ctrl+C and the run-duration timer
//!
//! Trigger contexts never do I/O themselves. They only enqueue a
//! [`CaptureRequest`] on a channel; the supervisor dequeues it on a normal
//! thread and runs the export and shutdown from there.

use crate::error::{AccelError, Result};
use linux_embedded_hal::gpio_cdev::{Chip, LineHandle, LineRequestFlags};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default minimum interval between two accepted button presses
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Default button polling period
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// What fired a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Falling edge on the button input
    Button,
    /// Process interrupt signal (Ctrl+C)
    Interrupt,
    /// Configured run duration elapsed
    Timer,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Button => write!(f, "button"),
            TriggerSource::Interrupt => write!(f, "interrupt"),
            TriggerSource::Timer => write!(f, "timer"),
        }
    }
}

/// A queued request to export the recent window and then shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub source: TriggerSource,
    pub requested_at: Instant,
}

/// Events the supervisor waits on
#[derive(Debug)]
pub enum SessionEvent {
    Capture(CaptureRequest),
    /// The acquisition thread left its loop on its own (fault or callback)
    AcquisitionEnded,
}

/// Cloneable sender side, handed to every trigger source
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: Sender<SessionEvent>,
}

impl TriggerHandle {
    /// Enqueue a capture request; never blocks
    pub fn request_capture_and_stop(&self, source: TriggerSource) {
        let request = CaptureRequest {
            source,
            requested_at: Instant::now(),
        };
        // The queue is gone once the supervisor has finished; late triggers
        // have nothing left to do.
        if self.tx.send(SessionEvent::Capture(request)).is_err() {
            debug!(%source, "capture requested after shutdown, ignored");
        }
    }

    pub(crate) fn notify_acquisition_ended(&self) {
        let _ = self.tx.send(SessionEvent::AcquisitionEnded);
    }
}

/// Receiver side, owned by the supervisor
pub struct CaptureQueue {
    rx: Receiver<SessionEvent>,
}

impl CaptureQueue {
    /// Block until the next event, or until `timeout` elapses
    pub fn wait(&self, timeout: Option<Duration>) -> Option<SessionEvent> {
        match timeout {
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(event) => Some(event),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            },
            None => self.rx.recv().ok(),
        }
    }

    /// Take an event if one is already queued
    pub fn try_next(&self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}

/// Create a connected handle/queue pair
pub fn capture_channel() -> (TriggerHandle, CaptureQueue) {
    let (tx, rx) = mpsc::channel();
    (TriggerHandle { tx }, CaptureQueue { rx })
}

/// Route SIGINT to a capture request
///
/// `ctrlc` allows one handler per process; a second call fails.
pub fn install_interrupt_handler(handle: TriggerHandle) -> Result<()> {
    ctrlc::set_handler(move || {
        handle.request_capture_and_stop(TriggerSource::Interrupt);
    })
    .map_err(|e| AccelError::InvalidParameter(format!("Failed to install Ctrl+C handler: {}", e)))
}

/// Suppresses repeated events within a minimum interval
#[derive(Debug, Clone)]
pub struct Debouncer {
    interval: Duration,
    last_accepted: Option<Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: None,
        }
    }

    /// Returns true if an event at `at` should be acted on
    pub fn accept(&mut self, at: Instant) -> bool {
        match self.last_accepted {
            Some(last) if at.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_accepted = Some(at);
                true
            }
        }
    }
}

/// Falling-edge detector over sampled input levels
#[derive(Debug, Clone, Default)]
pub struct EdgeDetector {
    last_level: Option<bool>,
}

impl EdgeDetector {
    /// Feed the current level; true on a high-to-low transition
    pub fn falling(&mut self, level: bool) -> bool {
        let fell = self.last_level == Some(true) && !level;
        self.last_level = Some(level);
        fell
    }
}

/// Edge detection plus debounce for an active-low button
#[derive(Debug, Clone)]
pub struct ButtonLogic {
    edges: EdgeDetector,
    debounce: Debouncer,
}

impl ButtonLogic {
    pub fn new(debounce: Duration) -> Self {
        Self {
            edges: EdgeDetector::default(),
            debounce: Debouncer::new(debounce),
        }
    }

    /// Feed a level sampled at `at`; true when a press should fire
    pub fn update(&mut self, level: bool, at: Instant) -> bool {
        self.edges.falling(level) && self.debounce.accept(at)
    }
}

/// A digital input line
pub trait DigitalInput {
    /// Current line level
    fn is_high(&mut self) -> Result<bool>;
}

/// GPIO character-device input line
///
/// The line is released when the value is dropped.
pub struct CdevInput {
    handle: LineHandle,
    line: u32,
}

impl CdevInput {
    /// Request `line` on `chip_path` as an input
    ///
    /// The button is wired active-low; the line needs an external or
    /// board-configured pull-up.
    pub fn open<P: AsRef<Path>>(chip_path: P, line: u32) -> Result<Self> {
        let chip_path = chip_path.as_ref();
        let mut chip = Chip::new(chip_path)
            .map_err(|e| AccelError::Gpio(format!("Failed to open {}: {}", chip_path.display(), e)))?;
        let handle = chip
            .get_line(line)
            .and_then(|l| l.request(LineRequestFlags::INPUT, 0, "ride-logger"))
            .map_err(|e| AccelError::Gpio(format!("Failed to request line {}: {}", line, e)))?;

        info!(chip = %chip_path.display(), line, "button input requested");
        Ok(Self { handle, line })
    }
}

impl DigitalInput for CdevInput {
    fn is_high(&mut self) -> Result<bool> {
        self.handle
            .get_value()
            .map(|v| v != 0)
            .map_err(|e| AccelError::Gpio(format!("Failed to read line {}: {}", self.line, e)))
    }
}

impl Drop for CdevInput {
    fn drop(&mut self) {
        debug!(line = self.line, "button input released");
    }
}

/// Background poller turning button presses into capture requests
pub struct ButtonWatcher {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ButtonWatcher {
    /// Start polling `input` every `poll_interval`
    pub fn spawn<I>(input: I, poll_interval: Duration, debounce: Duration, handle: TriggerHandle) -> Self
    where
        I: DigitalInput + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let thread = thread::spawn(move || {
            let mut input = input;
            let mut logic = ButtonLogic::new(debounce);

            while !stop_flag.load(Ordering::SeqCst) {
                match input.is_high() {
                    Ok(level) => {
                        if logic.update(level, Instant::now()) {
                            info!("button pressed");
                            handle.request_capture_and_stop(TriggerSource::Button);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "button poll failed, watcher stopping");
                        break;
                    }
                }
                thread::sleep(poll_interval);
            }
            // `input` drops here, releasing the line
        });

        Self {
            stop,
            thread: Some(thread),
        }
    }

    /// Stop polling and release the input line
    pub fn release(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("button watcher thread panicked");
            }
        }
    }
}

impl Drop for ButtonWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockInput;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_debounce_suppresses_close_events() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(ms(200));

        assert!(debouncer.accept(t0));
        assert!(!debouncer.accept(t0 + ms(50)));
        assert!(!debouncer.accept(t0 + ms(199)));
        assert!(debouncer.accept(t0 + ms(200)));
        assert!(!debouncer.accept(t0 + ms(250)));
    }

    #[test]
    fn test_edge_detector_falling_only() {
        let mut edges = EdgeDetector::default();
        // First sample establishes the level
        assert!(!edges.falling(false));
        assert!(!edges.falling(true));
        assert!(edges.falling(false));
        assert!(!edges.falling(false));
        assert!(!edges.falling(true));
        assert!(edges.falling(false));
    }

    #[test]
    fn test_two_edges_within_debounce_fire_once() {
        let (handle, queue) = capture_channel();
        let t0 = Instant::now();
        let mut logic = ButtonLogic::new(ms(200));

        // Idle high, press, bounce back up, second edge 50 ms later
        let levels = [(true, 0), (false, 10), (true, 30), (false, 60), (true, 100)];
        for (level, at) in levels {
            if logic.update(level, t0 + ms(at)) {
                handle.request_capture_and_stop(TriggerSource::Button);
            }
        }

        let mut fired = 0;
        while let Some(event) = queue.try_next() {
            assert!(matches!(
                event,
                SessionEvent::Capture(CaptureRequest { source: TriggerSource::Button, .. })
            ));
            fired += 1;
        }
        assert_eq!(fired, 1);

        // A later, separate press fires again
        assert!(!logic.update(true, t0 + ms(400)));
        assert!(logic.update(false, t0 + ms(450)));
    }

    #[test]
    fn test_request_after_queue_dropped_is_ignored() {
        let (handle, queue) = capture_channel();
        drop(queue);
        handle.request_capture_and_stop(TriggerSource::Interrupt);
    }

    #[test]
    fn test_wait_timeout() {
        let (_handle, queue) = capture_channel();
        assert!(queue.wait(Some(ms(10))).is_none());
    }

    #[test]
    fn test_watcher_fires_on_press_and_releases_input() {
        let (handle, queue) = capture_channel();
        let input = MockInput::new(vec![true, true, false, false, true, false]);
        let released = input.release_counter();

        let watcher = ButtonWatcher::spawn(input, ms(1), ms(1000), handle);

        match queue.wait(Some(Duration::from_secs(2))) {
            Some(SessionEvent::Capture(request)) => assert_eq!(request.source, TriggerSource::Button),
            other => panic!("expected a button capture, got {:?}", other),
        }

        watcher.release();
        assert_eq!(released.load(Ordering::SeqCst), 1);

        // Second falling edge was inside the debounce interval
        assert!(queue.try_next().is_none());
    }
}
