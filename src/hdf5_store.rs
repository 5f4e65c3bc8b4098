//! HDF5-backed sample store
//!
//! Layout:
//!
//! ```text
//! /metadata            attrs: start_time (RFC 3339), data_rate_code, version
//! /acceleration/timestamp  f64
//! /acceleration/sensor_id  u8
//! /acceleration/x_g        f64
//! /acceleration/y_g        f64
//! /acceleration/z_g        f64
//! ```
//!
//! All datasets are resizable, chunked and deflate-compressed, and always
//! have the same length. The committed row count lives next to the file
//! handle behind one mutex; queries never look past it, so a round whose
//! write failed halfway is never visible.
//!
//! The file is flushed whenever the row count crosses a chunk boundary and
//! at least once per [`FLUSH_INTERVAL`] while rounds keep arriving, so a
//! power cut loses at most that much data.

use crate::adxl345::DataRate;
use crate::error::{AccelError, Result};
use crate::store::{Round, Sample, SampleStore};
use hdf5::{Dataset, File, Group};
use std::path::{Path, PathBuf};
use std::ops::Range;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const FORMAT_VERSION: &str = "1.0";
const CHUNK_SIZE: usize = 1024;

/// Longest time appended rounds may stay unflushed
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Metadata stored in the HDF5 file
#[derive(Debug, Clone)]
pub struct Metadata {
    pub start_time: String,
    pub data_rate_code: u8,
    pub version: String,
}

/// Handles for the column datasets
#[derive(Clone)]
struct DatasetHandles {
    timestamp: Dataset,
    sensor_id: Dataset,
    x_g: Dataset,
    y_g: Dataset,
    z_g: Dataset,
}

struct Inner {
    file: File,
    datasets: DatasetHandles,
    /// Committed rows; queries never read past this
    sample_count: usize,
    /// Rows covered by the last flush
    durable_count: usize,
    last_flush: Instant,
}

impl Inner {
    fn new(file: File, datasets: DatasetHandles, sample_count: usize) -> Self {
        Self {
            file,
            datasets,
            sample_count,
            durable_count: sample_count,
            last_flush: Instant::now(),
        }
    }

    fn flush_due(&self, new_size: usize) -> bool {
        new_size / CHUNK_SIZE > self.durable_count / CHUNK_SIZE
            || self.last_flush.elapsed() >= FLUSH_INTERVAL
    }

    /// Flush everything written so far, covering `rows` rows
    fn flush_file(&mut self, rows: usize) -> Result<()> {
        self.file
            .flush()
            .map_err(|e| write_err("Failed to flush HDF5 file", e))?;
        self.durable_count = rows;
        self.last_flush = Instant::now();
        Ok(())
    }
}

/// Append-only HDF5 store, one file per run
pub struct Hdf5Store {
    inner: Mutex<Inner>,
    metadata: Metadata,
    path: PathBuf,
}

fn write_err(context: &str, e: hdf5::Error) -> AccelError {
    AccelError::StoreWrite(format!("{}: {}", context, e))
}

fn read_err(context: &str, e: hdf5::Error) -> AccelError {
    AccelError::StoreRead(format!("{}: {}", context, e))
}

impl Hdf5Store {
    /// Create a new store file
    pub fn create<P: AsRef<Path>>(path: P, data_rate: DataRate) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| write_err("Failed to create HDF5 file", e))?;

        let metadata_group = file
            .create_group("metadata")
            .map_err(|e| write_err("Failed to create metadata group", e))?;

        let start_time = chrono::Local::now().to_rfc3339();
        write_string_attr(&metadata_group, "start_time", &start_time)?;
        metadata_group
            .new_attr::<u8>()
            .create("data_rate_code")
            .and_then(|attr| attr.write_scalar(&data_rate.code()))
            .map_err(|e| write_err("Failed to write data_rate_code", e))?;
        write_string_attr(&metadata_group, "version", FORMAT_VERSION)?;

        let data_group = file
            .create_group("acceleration")
            .map_err(|e| write_err("Failed to create acceleration group", e))?;

        let datasets = DatasetHandles {
            timestamp: create_dataset::<f64>(&data_group, "timestamp")?,
            sensor_id: create_dataset::<u8>(&data_group, "sensor_id")?,
            x_g: create_dataset::<f64>(&data_group, "x_g")?,
            y_g: create_dataset::<f64>(&data_group, "y_g")?,
            z_g: create_dataset::<f64>(&data_group, "z_g")?,
        };

        info!(path = %path.display(), rate = %data_rate, "hdf5 store created");

        Ok(Self {
            inner: Mutex::new(Inner::new(file, datasets, 0)),
            metadata: Metadata {
                start_time,
                data_rate_code: data_rate.code(),
                version: FORMAT_VERSION.to_string(),
            },
            path: path.to_path_buf(),
        })
    }

    /// Open an existing store file read-only
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| read_err("Failed to open HDF5 file", e))?;
        let metadata = read_metadata(&file)?;

        let data_group = file
            .group("acceleration")
            .map_err(|e| read_err("Failed to open acceleration group", e))?;
        let open = |name: &str| {
            data_group
                .dataset(name)
                .map_err(|e| read_err(&format!("Failed to open {} dataset", name), e))
        };

        let datasets = DatasetHandles {
            timestamp: open("timestamp")?,
            sensor_id: open("sensor_id")?,
            x_g: open("x_g")?,
            y_g: open("y_g")?,
            z_g: open("z_g")?,
        };
        let sample_count = datasets.timestamp.size();

        Ok(Self {
            inner: Mutex::new(Inner::new(file, datasets, sample_count)),
            metadata,
            path: path.to_path_buf(),
        })
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| AccelError::StoreWrite("store lock poisoned".to_string()))
    }
}

impl SampleStore for Hdf5Store {
    fn append_round(&self, round: &Round) -> Result<()> {
        let mut inner = self.lock()?;
        let new_size = inner.sample_count + round.len();

        let timestamp: Vec<f64> = round.iter().map(|s| s.timestamp).collect();
        let sensor_id: Vec<u8> = round.iter().map(|s| s.channel_id).collect();
        let x_g: Vec<f64> = round.iter().map(|s| s.x_g).collect();
        let y_g: Vec<f64> = round.iter().map(|s| s.y_g).collect();
        let z_g: Vec<f64> = round.iter().map(|s| s.z_g).collect();

        let ds = &inner.datasets;
        append_to_dataset(&ds.timestamp, new_size, &timestamp)?;
        append_to_dataset(&ds.sensor_id, new_size, &sensor_id)?;
        append_to_dataset(&ds.x_g, new_size, &x_g)?;
        append_to_dataset(&ds.y_g, new_size, &y_g)?;
        append_to_dataset(&ds.z_g, new_size, &z_g)?;

        // A round whose flush failed is not committed
        if inner.flush_due(new_size) {
            inner.flush_file(new_size)?;
            debug!(samples = new_size, "hdf5 store flushed");
        }

        // Commit point
        inner.sample_count = new_size;
        Ok(())
    }

    fn query_since(&self, since: f64) -> Result<Vec<Sample>> {
        // Rows below the committed count never change again, so the read
        // runs without holding up appends.
        let (ds, committed) = {
            let inner = self.lock()?;
            (inner.datasets.clone(), inner.sample_count)
        };

        let start = window_start(&ds.timestamp, committed, since)?;
        if start == committed {
            return Ok(Vec::new());
        }
        let rows = start..committed;

        let timestamps = read_column::<f64>(&ds.timestamp, rows.clone(), "timestamp")?;
        let sensor_id = read_column::<u8>(&ds.sensor_id, rows.clone(), "sensor_id")?;
        let x_g = read_column::<f64>(&ds.x_g, rows.clone(), "x_g")?;
        let y_g = read_column::<f64>(&ds.y_g, rows.clone(), "y_g")?;
        let z_g = read_column::<f64>(&ds.z_g, rows, "z_g")?;

        let samples = timestamps
            .into_iter()
            .zip(sensor_id)
            .zip(x_g)
            .zip(y_g)
            .zip(z_g)
            .map(|((((timestamp, channel_id), x_g), y_g), z_g)| Sample {
                timestamp,
                channel_id,
                x_g,
                y_g,
                z_g,
            })
            // A wall-clock step backwards can put older rows after `start`
            .filter(|s| s.timestamp >= since)
            .collect();

        Ok(samples)
    }

    fn sample_count(&self) -> Result<usize> {
        Ok(self.lock()?.sample_count)
    }

    fn flush(&self) -> Result<()> {
        let mut inner = self.lock()?;
        let rows = inner.sample_count;
        inner.flush_file(rows)?;
        debug!(path = %self.path.display(), samples = rows, "hdf5 store flushed");
        Ok(())
    }
}

/// First row in `0..committed` whose timestamp is `>= since`
///
/// Binary search over single-row reads; timestamps are appended in
/// non-decreasing order.
fn window_start(timestamps: &Dataset, committed: usize, since: f64) -> Result<usize> {
    let (mut lo, mut hi) = (0, committed);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let value = timestamps
            .read_slice_1d::<f64, _>(mid..mid + 1)
            .map_err(|e| read_err("Failed to read timestamp", e))?;
        match value.iter().next() {
            Some(&t) if t < since => lo = mid + 1,
            _ => hi = mid,
        }
    }
    Ok(lo)
}

fn read_column<T: hdf5::H5Type>(dataset: &Dataset, rows: Range<usize>, name: &str) -> Result<Vec<T>> {
    dataset
        .read_slice_1d::<T, _>(rows)
        .map(|column| column.to_vec())
        .map_err(|e| read_err(&format!("Failed to read {}", name), e))
}

/// Create a resizable, chunked, compressed dataset
fn create_dataset<T: hdf5::H5Type>(group: &Group, name: &str) -> Result<Dataset> {
    group
        .new_dataset::<T>()
        .shape((0..,))
        .chunk((CHUNK_SIZE,))
        .deflate(4)
        .create(name)
        .map_err(|e| write_err(&format!("Failed to create dataset {}", name), e))
}

/// Grow a dataset to `new_size` and write `data` into its tail
fn append_to_dataset<T: hdf5::H5Type>(dataset: &Dataset, new_size: usize, data: &[T]) -> Result<()> {
    dataset
        .resize((new_size,))
        .map_err(|e| write_err("Failed to resize dataset", e))?;

    let start = new_size - data.len();
    dataset
        .write_slice(data, start..new_size)
        .map_err(|e| write_err("Failed to write to dataset", e))?;

    Ok(())
}

fn write_string_attr(group: &Group, name: &str, value: &str) -> Result<()> {
    let value: hdf5::types::VarLenUnicode = value
        .parse()
        .map_err(|e| AccelError::StoreWrite(format!("Invalid {} value: {}", name, e)))?;
    group
        .new_attr::<hdf5::types::VarLenUnicode>()
        .create(name)
        .and_then(|attr| attr.write_scalar(&value))
        .map_err(|e| write_err(&format!("Failed to write {}", name), e))
}

fn read_string_attr(group: &Group, name: &str) -> Result<String> {
    group
        .attr(name)
        .and_then(|attr| attr.read_scalar::<hdf5::types::VarLenUnicode>())
        .map(|s| s.to_string())
        .map_err(|e| read_err(&format!("Failed to read {}", name), e))
}

fn read_metadata(file: &File) -> Result<Metadata> {
    let group = file
        .group("metadata")
        .map_err(|e| read_err("Failed to open metadata group", e))?;

    let data_rate_code = group
        .attr("data_rate_code")
        .and_then(|attr| attr.read_scalar::<u8>())
        .map_err(|e| read_err("Failed to read data_rate_code", e))?;

    Ok(Metadata {
        start_time: read_string_attr(&group, "start_time")?,
        data_rate_code,
        version: read_string_attr(&group, "version")?,
    })
}
