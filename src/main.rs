//! Ride logger
//!
//! Streams both ADXL345 sensors into an HDF5 store until the button is
//! pressed (or Ctrl+C, or the optional run duration elapses), then renders
//! the last few minutes as PNG plots and exits.
//!
//! Usage:
//!   ride-logger --rate 3200hz --window 180

use clap::Parser;
use dual_adxl345_logger::common::file_stamp;
use dual_adxl345_logger::trigger::DEFAULT_POLL_INTERVAL;
use dual_adxl345_logger::{
    capture_channel, install_interrupt_handler, AcquisitionLoop, BusConfig, ButtonWatcher,
    CdevInput, DataRate, ExportConfig, Hdf5Store, PlottersRenderer, SampleStore, SessionConfig,
    SnapshotExporter, SpidevBus, Supervisor, SystemClock,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ride-logger")]
#[command(about = "Log two ADXL345 accelerometers and plot the last minutes on demand", long_about = None)]
struct Args {
    /// Output data rate: label (3200hz, 100hz, 0.10hz) or BW_RATE code (0xA)
    #[arg(short, long, default_value = "3200hz")]
    rate: DataRate,

    /// SPI device of sensor 0
    #[arg(long, default_value = "/dev/spidev0.0")]
    spi0: PathBuf,

    /// SPI device of sensor 1
    #[arg(long, default_value = "/dev/spidev1.0")]
    spi1: PathBuf,

    /// SPI clock in Hz
    #[arg(long, default_value_t = 5_000_000)]
    spi_speed: u32,

    /// GPIO character device of the capture button
    #[arg(long, default_value = "/dev/gpiochip0")]
    gpio_chip: PathBuf,

    /// GPIO line of the capture button (active low)
    #[arg(long, default_value_t = 26)]
    button_line: u32,

    /// Run without the capture button (Ctrl+C or --duration only)
    #[arg(long)]
    no_button: bool,

    /// Button debounce in milliseconds
    #[arg(long, default_value_t = 200)]
    debounce_ms: u64,

    /// Seconds of data to plot on capture
    #[arg(short, long, default_value_t = 180)]
    window: u64,

    /// Capture automatically after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Directory for the HDF5 store
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Directory for the per-sensor subplot images
    #[arg(long, default_value = "./plot")]
    plot_dir: PathBuf,

    /// Directory for the overlay images
    #[arg(long, default_value = "./plot_overlay")]
    overlay_dir: PathBuf,

    /// Decimal places of the console CSV echo
    #[arg(long, default_value_t = 3)]
    precision: usize,

    /// Do not echo samples to stdout
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // stdout carries the CSV echo, logs go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        rate = %args.rate,
        hz = args.rate.hz(),
        window_secs = args.window,
        "ride-logger starting"
    );

    // Ctrl+C during startup is queued and handled once the session runs
    let (triggers, queue) = capture_channel();
    install_interrupt_handler(triggers.clone())?;

    fs::create_dir_all(&args.data_dir)?;
    let store_path = args
        .data_dir
        .join(format!("ride_{}.h5", file_stamp(&chrono::Local::now())));
    let store = Arc::new(Hdf5Store::create(&store_path, args.rate)?);
    let clock = Arc::new(SystemClock);

    let bus0 = SpidevBus::open(&BusConfig {
        max_speed_hz: args.spi_speed,
        ..BusConfig::new(&args.spi0)
    })?;
    let bus1 = SpidevBus::open(&BusConfig {
        max_speed_hz: args.spi_speed,
        ..BusConfig::new(&args.spi1)
    })?;

    let mut acquisition = AcquisitionLoop::new(bus0, bus1, store.clone(), clock.clone());
    if let Err(e) = acquisition.start(args.rate) {
        if e.is_init_fatal() {
            error!(error = %e, "sensor identity check failed, check wiring and chip selects");
        }
        return Err(e.into());
    }

    let exporter = SnapshotExporter::new(
        store.clone(),
        Box::new(PlottersRenderer::new()),
        clock,
        args.rate.code(),
        ExportConfig {
            subplot_dir: args.plot_dir.clone(),
            overlay_dir: args.overlay_dir.clone(),
        },
    );

    let config = SessionConfig {
        window: Duration::from_secs(args.window),
        max_duration: args.duration.map(Duration::from_secs),
        echo_precision: if args.quiet { None } else { Some(args.precision) },
    };

    let mut supervisor = Supervisor::new(acquisition, exporter, (triggers, queue), config)?;

    if args.no_button {
        info!("capture button disabled");
    } else {
        let input = CdevInput::open(&args.gpio_chip, args.button_line)?;
        let watcher = ButtonWatcher::spawn(
            input,
            DEFAULT_POLL_INTERVAL,
            Duration::from_millis(args.debounce_ms),
            supervisor.trigger_handle(),
        );
        supervisor = supervisor.with_button(watcher);
    }

    info!("acquiring, press the button or Ctrl+C to capture and stop");
    let report = supervisor.run()?;
    let stored = store.sample_count()?;

    info!(
        trigger = %report.trigger,
        rounds = report.summary.rounds,
        elapsed_secs = %format!("{:.2}", report.summary.elapsed_secs),
        round_rate_hz = %format!("{:.1}", report.summary.round_rate()),
        samples = stored,
        store = %store.path().display(),
        "collection complete"
    );
    match &report.export {
        Some(export) => info!(
            samples = export.samples,
            subplot = %export.subplot_path.display(),
            overlay = %export.overlay_path.display(),
            "plots written"
        ),
        None => warn!("no plots were written"),
    }

    Ok(())
}
