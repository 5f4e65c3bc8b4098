//! Hardware stand-ins for tests and dry runs
//!
//! `MockAdxl345` emulates the ADXL345 register file behind an SPI
//! transport, so the protocol driver, the sensor channel and the acquisition
//! loop run unmodified against it.

use crate::adxl345::{DEVID_VALUE, REG_BW_RATE, REG_DATAX0, REG_DEVID};
use crate::bus::SpiTransport;
use crate::common::Clock;
use crate::error::{AccelError, Result};
use crate::export::{CaptureWindow, Renderer};
use crate::protocol::{BURST_BIT, MAX_REGISTER, READ_BIT};
use crate::trigger::DigitalInput;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const REGISTER_COUNT: usize = MAX_REGISTER as usize + 1;

struct MockState {
    registers: [u8; REGISTER_COUNT],
    pending: VecDeque<(i16, i16, i16)>,
    frames: Vec<Vec<u8>>,
    transfers: usize,
    fail_after: Option<usize>,
    truncate: Option<usize>,
    latency: Duration,
    released: usize,
}

/// Emulated ADXL345 on an SPI bus
///
/// Each burst read starting at DATAX0 first loads the next queued raw
/// triple into the data registers, like a fresh conversion.
pub struct MockAdxl345 {
    state: Arc<Mutex<MockState>>,
}

/// Test-side view of a [`MockAdxl345`] that outlives it
#[derive(Clone)]
pub struct MockProbe {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Arc<Mutex<MockState>>) -> MutexGuard<'_, MockState> {
    // A panicking test thread must not hide the state from the others
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockAdxl345 {
    pub fn new() -> Self {
        Self::with_devid(DEVID_VALUE)
    }

    /// Device answering with a different identity byte
    pub fn with_devid(devid: u8) -> Self {
        let mut registers = [0u8; REGISTER_COUNT];
        registers[REG_DEVID as usize] = devid;
        // Power-on BW_RATE
        registers[REG_BW_RATE as usize] = 0x0A;

        Self {
            state: Arc::new(Mutex::new(MockState {
                registers,
                pending: VecDeque::new(),
                frames: Vec::new(),
                transfers: 0,
                fail_after: None,
                truncate: None,
                latency: Duration::ZERO,
                released: 0,
            })),
        }
    }

    pub fn probe(&self) -> MockProbe {
        MockProbe {
            state: self.state.clone(),
        }
    }
}

impl Default for MockAdxl345 {
    fn default() -> Self {
        Self::new()
    }
}

impl SpiTransport for MockAdxl345 {
    fn transfer(&mut self, bytes_out: &[u8]) -> Result<Vec<u8>> {
        let latency = lock(&self.state).latency;
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let mut state = lock(&self.state);
        if let Some(limit) = state.fail_after {
            if state.transfers >= limit {
                return Err(AccelError::Bus(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "injected transfer failure",
                )));
            }
        }
        state.transfers += 1;
        state.frames.push(bytes_out.to_vec());

        let mut bytes_in = vec![0u8; bytes_out.len()];
        if let Some(&command) = bytes_out.first() {
            let addr = (command & MAX_REGISTER) as usize;
            let burst = command & BURST_BIT != 0;

            if command & READ_BIT != 0 {
                if burst && addr == REG_DATAX0 as usize {
                    if let Some((x, y, z)) = state.pending.pop_front() {
                        let data = [x.to_le_bytes(), y.to_le_bytes(), z.to_le_bytes()].concat();
                        state.registers[addr..addr + data.len()].copy_from_slice(&data);
                    }
                }
                for (i, byte) in bytes_in.iter_mut().enumerate().skip(1) {
                    let reg = if burst { addr + i - 1 } else { addr };
                    *byte = state.registers[reg % REGISTER_COUNT];
                }
            } else {
                for (i, &value) in bytes_out.iter().enumerate().skip(1) {
                    let reg = if burst { addr + i - 1 } else { addr };
                    // DEVID is read-only
                    if reg != REG_DEVID as usize {
                        state.registers[reg % REGISTER_COUNT] = value;
                    }
                }
            }
        }

        if let Some(len) = state.truncate {
            bytes_in.truncate(len);
        }
        Ok(bytes_in)
    }
}

impl Drop for MockAdxl345 {
    fn drop(&mut self) {
        lock(&self.state).released += 1;
    }
}

impl MockProbe {
    /// Queue a raw X/Y/Z conversion
    pub fn push_raw(&self, x: i16, y: i16, z: i16) {
        lock(&self.state).pending.push_back((x, y, z));
    }

    /// Current register value
    pub fn register(&self, addr: u8) -> u8 {
        lock(&self.state).registers[addr as usize % REGISTER_COUNT]
    }

    /// Every frame clocked out so far
    pub fn frames(&self) -> Vec<Vec<u8>> {
        lock(&self.state).frames.clone()
    }

    /// Number of successful transfers
    pub fn transfers(&self) -> usize {
        lock(&self.state).transfers
    }

    /// Fail every transfer once `count` transfers have succeeded
    pub fn fail_after(&self, count: usize) {
        lock(&self.state).fail_after = Some(count);
    }

    /// Cut every response to `len` bytes (`None` restores full responses)
    pub fn truncate_responses(&self, len: Option<usize>) {
        lock(&self.state).truncate = len;
    }

    /// Sleep this long in every transfer
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = latency;
    }

    /// How many times the transport has been dropped
    pub fn released(&self) -> usize {
        lock(&self.state).released
    }
}

/// Scripted digital input; holds its last level once the script runs out
pub struct MockInput {
    levels: VecDeque<bool>,
    current: bool,
    released: Arc<AtomicUsize>,
}

impl MockInput {
    pub fn new(levels: Vec<bool>) -> Self {
        Self {
            current: levels.first().copied().unwrap_or(true),
            levels: levels.into(),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter incremented when the input is dropped
    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        self.released.clone()
    }
}

impl DigitalInput for MockInput {
    fn is_high(&mut self) -> Result<bool> {
        if let Some(level) = self.levels.pop_front() {
            self.current = level;
        }
        Ok(self.current)
    }
}

impl Drop for MockInput {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Clock advancing by a fixed step on every reading
#[derive(Debug)]
pub struct StepClock {
    micros: AtomicU64,
    step_micros: u64,
}

impl StepClock {
    pub fn new(start_secs: f64, step: Duration) -> Self {
        Self {
            micros: AtomicU64::new((start_secs * 1_000_000.0) as u64),
            step_micros: step.as_micros() as u64,
        }
    }
}

impl Clock for StepClock {
    fn now_secs(&self) -> f64 {
        let micros = self.micros.fetch_add(self.step_micros, Ordering::SeqCst);
        micros as f64 / 1_000_000.0
    }
}

/// Which of the two snapshot images a render call produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderKind {
    Subplots,
    Overlay,
}

/// One recorded render call
#[derive(Debug, Clone)]
pub struct RenderCall {
    pub kind: RenderKind,
    pub path: PathBuf,
    pub y_bound: f64,
    pub window: CaptureWindow,
}

/// Renderer that records its inputs instead of drawing
#[derive(Clone, Default)]
pub struct RecordingRenderer {
    calls: Arc<Mutex<Vec<RenderCall>>>,
    fail: bool,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renderer whose every call fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, kind: RenderKind, window: &CaptureWindow, y_bound: f64, path: &Path) -> Result<()> {
        if self.fail {
            return Err(AccelError::Render("recording renderer set to fail".to_string()));
        }
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RenderCall {
                kind,
                path: path.to_path_buf(),
                y_bound,
                window: window.clone(),
            });
        Ok(())
    }
}

impl Renderer for RecordingRenderer {
    fn render_subplots(&self, window: &CaptureWindow, y_bound: f64, path: &Path) -> Result<()> {
        self.record(RenderKind::Subplots, window, y_bound, path)
    }

    fn render_overlay(&self, window: &CaptureWindow, y_bound: f64, path: &Path) -> Result<()> {
        self.record(RenderKind::Overlay, window, y_bound, path)
    }
}
