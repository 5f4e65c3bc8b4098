//! Dual ADXL345 ride logger
//!
//! Streams 3-axis acceleration from two ADXL345 accelerometers, each on its
//! own SPI bus, into an append-only sample store. On a capture trigger
//! (button, Ctrl+C or run duration) the last few minutes are rendered as
//! per-sensor subplots and as one overlay chart, then acquisition shuts
//! down and every bus and input line is released.
//!
//! # Quick Start
//!
//! ## Reading one sensor
//! ```no_run
//! use dual_adxl345_logger::{Adxl345, BusConfig, DataRate, SpidevBus};
//!
//! let bus = SpidevBus::open(&BusConfig::new("/dev/spidev0.0"))?;
//! let mut sensor = Adxl345::new(bus, 0);
//! sensor.initialize(DataRate::Hz400)?;
//!
//! let (x, y, z) = sensor.read_sample()?;
//! println!("x={:.3}g y={:.3}g z={:.3}g", x, y, z);
//! # Ok::<(), dual_adxl345_logger::AccelError>(())
//! ```
//!
//! ## Lockstep acquisition into a store
//! ```no_run
//! use dual_adxl345_logger::{
//!     AcquisitionLoop, BusConfig, DataRate, MemoryStore, SpidevBus, StopFlag, StreamControl,
//!     SystemClock,
//! };
//! use std::sync::Arc;
//!
//! let bus0 = SpidevBus::open(&BusConfig::new("/dev/spidev0.0"))?;
//! let bus1 = SpidevBus::open(&BusConfig::new("/dev/spidev1.0"))?;
//! let store = Arc::new(MemoryStore::new());
//!
//! let mut acquisition = AcquisitionLoop::new(bus0, bus1, store, Arc::new(SystemClock));
//! acquisition.start(DataRate::Hz3200)?;
//!
//! // Stop after 1000 rounds
//! let mut remaining = 1000;
//! let summary = acquisition.run(&StopFlag::new(), |_round| {
//!     remaining -= 1;
//!     if remaining == 0 {
//!         StreamControl::Break
//!     } else {
//!         StreamControl::Continue
//!     }
//! })?;
//! println!("{:.1} rounds/s", summary.round_rate());
//! # Ok::<(), dual_adxl345_logger::AccelError>(())
//! ```

pub mod acquisition;
pub mod adxl345;
pub mod bus;
pub mod common;
pub mod error;
pub mod export;
#[cfg(feature = "storage")]
pub mod hdf5_store;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
#[cfg(feature = "plot")]
pub mod plot;
pub mod protocol;
pub mod session;
pub mod store;
pub mod trigger;

// Re-export public API
pub use acquisition::{
    format_sample, AcquisitionLoop, AcquisitionSummary, LoopState, StopFlag, StreamControl,
    CSV_HEADER,
};
pub use adxl345::{Adxl345, DataRate, RawReading};
pub use bus::{BusConfig, SpiMode, SpiTransport, SpidevBus};
pub use common::{Clock, SystemClock, TimeKeeper};
pub use error::{AccelError, Result};
pub use export::{plot_bound, CaptureWindow, ExportConfig, ExportReport, Renderer, SnapshotExporter};
#[cfg(feature = "storage")]
pub use hdf5_store::{Hdf5Store, Metadata};
#[cfg(feature = "plot")]
pub use plot::PlottersRenderer;
pub use session::{SessionConfig, SessionReport, Supervisor};
pub use store::{MemoryStore, Round, Sample, SampleStore, CHANNEL_COUNT};
pub use trigger::{
    capture_channel, install_interrupt_handler, ButtonWatcher, CaptureQueue, CdevInput,
    DigitalInput, TriggerHandle, TriggerSource,
};
