//! Dual-channel acquisition loop
//!
//! Each round reads channel 0 then channel 1, persists both samples as one
//! atomic round, then reports the round to the caller. The stop flag is
//! only checked between rounds, so a stop never leaves half a round in the
//! store.

use crate::adxl345::{Adxl345, DataRate};
use crate::bus::SpiTransport;
use crate::common::{Clock, TimeKeeper};
use crate::error::{AccelError, Result};
use crate::store::{Round, Sample, SampleStore, CHANNEL_COUNT};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Control flow for the per-round callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    /// Continue acquiring
    Continue,
    /// Stop after this round
    Break,
}

/// Loop lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Cooperative stop request shared with trigger contexts
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionSummary {
    /// Rounds persisted (each round is one sample per channel)
    pub rounds: u64,
    pub elapsed_secs: f64,
}

impl AcquisitionSummary {
    /// Achieved rounds per second
    pub fn round_rate(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.rounds as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

/// Drives both sensor channels in lockstep and writes through to the store
pub struct AcquisitionLoop<T: SpiTransport> {
    channels: [Adxl345<T>; CHANNEL_COUNT],
    store: Arc<dyn SampleStore>,
    clock: Arc<dyn Clock>,
    state: LoopState,
    rounds: u64,
}

impl<T: SpiTransport> AcquisitionLoop<T> {
    /// Take ownership of both buses; channel ids are 0 and 1 in that order
    pub fn new(bus0: T, bus1: T, store: Arc<dyn SampleStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            channels: [Adxl345::new(bus0, 0), Adxl345::new(bus1, 1)],
            store,
            clock,
            state: LoopState::Idle,
            rounds: 0,
        }
    }

    /// Initialize both channels; `Idle -> Running`
    ///
    /// Any failure leaves the loop `Idle`. Dropping it then releases both
    /// buses, including one whose channel did initialize.
    pub fn start(&mut self, data_rate: DataRate) -> Result<()> {
        if self.state != LoopState::Idle {
            return Err(AccelError::InvalidParameter(format!(
                "Cannot start acquisition in state {:?}",
                self.state
            )));
        }

        for channel in self.channels.iter_mut() {
            if let Err(e) = channel.initialize(data_rate) {
                error!(channel = channel.channel_id(), error = %e, "channel initialization failed");
                return Err(e);
            }
        }

        self.state = LoopState::Running;
        info!(rate = %data_rate, "acquisition running");
        Ok(())
    }

    /// Acquire rounds until `stop` is requested, the callback breaks, or a
    /// round fails
    ///
    /// Whatever ends the loop, it passes through `Stopping` (store flush) to
    /// `Stopped`. A failed round is neither persisted nor counted.
    pub fn run<F>(&mut self, stop: &StopFlag, mut on_round: F) -> Result<AcquisitionSummary>
    where
        F: FnMut(&Round) -> StreamControl,
    {
        if self.state != LoopState::Running {
            return Err(AccelError::InvalidParameter(format!(
                "Cannot run acquisition in state {:?}",
                self.state
            )));
        }

        let timer = TimeKeeper::new();

        let outcome = loop {
            if stop.is_requested() {
                break Ok(());
            }

            let round = match self.read_round() {
                Ok(round) => round,
                Err(e) => break Err(e),
            };
            if let Err(e) = self.store.append_round(&round) {
                break Err(e);
            }
            self.rounds += 1;

            if on_round(&round) == StreamControl::Break {
                break Ok(());
            }
        };

        self.state = LoopState::Stopping;
        let flushed = self.store.flush();
        self.state = LoopState::Stopped;

        let summary = AcquisitionSummary {
            rounds: self.rounds,
            elapsed_secs: timer.elapsed_secs(),
        };

        match (outcome, flushed) {
            (Err(e), flushed) => {
                if let Err(flush_err) = flushed {
                    warn!(error = %flush_err, "store flush after fault failed");
                }
                error!(rounds = summary.rounds, error = %e, "acquisition aborted");
                Err(e)
            }
            (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => {
                info!(
                    rounds = summary.rounds,
                    elapsed_secs = summary.elapsed_secs,
                    "acquisition stopped"
                );
                Ok(summary)
            }
        }
    }

    fn read_round(&mut self) -> Result<Round> {
        Ok([self.read_channel(0)?, self.read_channel(1)?])
    }

    fn read_channel(&mut self, index: usize) -> Result<Sample> {
        let channel = &mut self.channels[index];
        let (x_g, y_g, z_g) = channel.read_sample()?;
        Ok(Sample {
            // Taken once the burst read has completed
            timestamp: self.clock.now_secs(),
            channel_id: channel.channel_id(),
            x_g,
            y_g,
            z_g,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Rounds persisted so far
    pub fn rounds(&self) -> u64 {
        self.rounds
    }
}

/// CSV line for one sample, e.g. `1712345678.123456,sensor0,0.004,-0.008,1.000`
pub fn format_sample(sample: &Sample, precision: usize) -> String {
    format!(
        "{:.6},sensor{},{:.p$},{:.p$},{:.p$}",
        sample.timestamp,
        sample.channel_id,
        sample.x_g,
        sample.y_g,
        sample.z_g,
        p = precision
    )
}

/// Header matching [`format_sample`]
pub const CSV_HEADER: &str = "timestamp,sensor,x_g,y_g,z_g";
