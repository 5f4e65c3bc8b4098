//! Snapshot export of the recent capture window

use crate::common::{file_stamp, local_time, Clock};
use crate::error::Result;
use crate::store::{Sample, SampleStore};
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Plot bound used when the data-rate code is not in the table
pub const FALLBACK_PLOT_BOUND: f64 = 2.0;

/// Default capture window
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(180);

/// Symmetric y-axis bound (in g) for a BW_RATE code
///
/// The rate code doubles as the plot range selector: faster rates are
/// plotted with wider bounds. Unknown codes fall back to
/// [`FALLBACK_PLOT_BOUND`] rather than failing.
pub fn plot_bound(data_rate_code: u8) -> f64 {
    match data_rate_code {
        0xF => 2.5,
        0xE => 2.0,
        0xD => 1.5,
        0xC => 1.0,
        0xB => 0.75,
        0xA => 0.5,
        0x9 => 0.4,
        0x8 => 0.3,
        0x7 => 0.2,
        0x0..=0x6 => 0.1,
        _ => FALLBACK_PLOT_BOUND,
    }
}

/// Time series of one channel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSeries {
    pub timestamps: Vec<f64>,
    pub x_g: Vec<f64>,
    pub y_g: Vec<f64>,
    pub z_g: Vec<f64>,
}

impl ChannelSeries {
    fn push(&mut self, sample: &Sample) {
        self.timestamps.push(sample.timestamp);
        self.x_g.push(sample.x_g);
        self.y_g.push(sample.y_g);
        self.z_g.push(sample.z_g);
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Samples of the last `duration`, grouped by channel
#[derive(Debug, Clone)]
pub struct CaptureWindow {
    pub duration: Duration,
    /// Window start, epoch seconds
    pub since: f64,
    /// Window end ("now" at export), epoch seconds
    pub until: f64,
    pub exported_at: DateTime<Local>,
    pub channels: BTreeMap<u8, ChannelSeries>,
}

impl CaptureWindow {
    /// Group `samples` by channel id, preserving order
    pub fn from_samples(samples: &[Sample], duration: Duration, until: f64) -> Self {
        let mut channels: BTreeMap<u8, ChannelSeries> = BTreeMap::new();
        for sample in samples {
            channels.entry(sample.channel_id).or_default().push(sample);
        }

        Self {
            duration,
            since: until - duration.as_secs_f64(),
            until,
            exported_at: local_time(until).unwrap_or_else(Local::now),
            channels,
        }
    }

    /// Total samples across channels
    pub fn sample_count(&self) -> usize {
        self.channels.values().map(ChannelSeries::len).sum()
    }

    /// Duration as used in titles and file names, e.g. `180`
    pub fn duration_label(&self) -> String {
        let secs = self.duration.as_secs_f64();
        if secs.fract() == 0.0 {
            format!("{}", self.duration.as_secs())
        } else {
            format!("{}", secs)
        }
    }
}

/// Image renderer for capture windows
pub trait Renderer: Send {
    /// One subplot per channel, X/Y/Z on each
    fn render_subplots(&self, window: &CaptureWindow, y_bound: f64, path: &Path) -> Result<()>;

    /// All channels and axes on one chart
    fn render_overlay(&self, window: &CaptureWindow, y_bound: f64, path: &Path) -> Result<()>;
}

/// Output locations for snapshot images
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub subplot_dir: PathBuf,
    pub overlay_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            subplot_dir: PathBuf::from("./plot"),
            overlay_dir: PathBuf::from("./plot_overlay"),
        }
    }
}

/// What an export produced
#[derive(Debug, Clone)]
pub struct ExportReport {
    pub samples: usize,
    pub y_bound: f64,
    pub subplot_path: PathBuf,
    pub overlay_path: PathBuf,
}

/// Reads the recent window from the store and hands it to a renderer
pub struct SnapshotExporter {
    store: Arc<dyn SampleStore>,
    renderer: Box<dyn Renderer>,
    clock: Arc<dyn Clock>,
    data_rate_code: u8,
    config: ExportConfig,
}

impl SnapshotExporter {
    pub fn new(
        store: Arc<dyn SampleStore>,
        renderer: Box<dyn Renderer>,
        clock: Arc<dyn Clock>,
        data_rate_code: u8,
        config: ExportConfig,
    ) -> Self {
        Self {
            store,
            renderer,
            clock,
            data_rate_code,
            config,
        }
    }

    /// Query the last `window` of samples without rendering
    pub fn capture(&self, window: Duration) -> Result<CaptureWindow> {
        let now = self.clock.now_secs();
        let samples = self.store.query_since(now - window.as_secs_f64())?;
        Ok(CaptureWindow::from_samples(&samples, window, now))
    }

    /// Render the last `window` of samples as subplot and overlay images
    pub fn export(&self, window: Duration) -> Result<ExportReport> {
        let capture = self.capture(window)?;
        let y_bound = plot_bound(self.data_rate_code);

        fs::create_dir_all(&self.config.subplot_dir)?;
        fs::create_dir_all(&self.config.overlay_dir)?;

        let duration = capture.duration_label();
        let stamp = file_stamp(&capture.exported_at);
        let subplot_path = self.config.subplot_dir.join(format!(
            "acceleration_plot_subplots_last_{}s-{}.png",
            duration, stamp
        ));
        let overlay_path = self.config.overlay_dir.join(format!(
            "acceleration_plot_overlay_last_{}s-{}.png",
            duration, stamp
        ));

        self.renderer.render_subplots(&capture, y_bound, &subplot_path)?;
        self.renderer.render_overlay(&capture, y_bound, &overlay_path)?;

        info!(
            samples = capture.sample_count(),
            channels = capture.channels.len(),
            y_bound,
            subplot = %subplot_path.display(),
            overlay = %overlay_path.display(),
            "snapshot exported"
        );

        Ok(ExportReport {
            samples: capture.sample_count(),
            y_bound,
            subplot_path,
            overlay_path,
        })
    }
}
