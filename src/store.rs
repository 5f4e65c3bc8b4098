//! Sample store interface and in-memory implementation
//!
//! The logical schema is one append-only relation:
//!
//! ```text
//! acceleration(timestamp REAL, sensor_id INTEGER, x_g REAL, y_g REAL, z_g REAL)
//! ```
//!
//! Rounds are the unit of atomicity: a store appends both samples of a round
//! under one lock acquisition, so a concurrent query sees either the whole
//! round or none of it.

use crate::error::{AccelError, Result};
use std::sync::RwLock;

/// Number of physical sensor channels
pub const CHANNEL_COUNT: usize = 2;

/// One timestamped 3-axis reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Wall-clock seconds since the Unix epoch
    pub timestamp: f64,
    /// Physical sensor, 0 or 1
    pub channel_id: u8,
    pub x_g: f64,
    pub y_g: f64,
    pub z_g: f64,
}

/// Both channels' samples from one acquisition round
pub type Round = [Sample; CHANNEL_COUNT];

/// Append-only persistence of samples
pub trait SampleStore: Send + Sync {
    /// Persist one round atomically
    fn append_round(&self, round: &Round) -> Result<()>;

    /// All samples with `timestamp >= since`, in insertion order
    fn query_since(&self, since: f64) -> Result<Vec<Sample>>;

    /// Total number of persisted samples
    fn sample_count(&self) -> Result<usize>;

    /// Push buffered data to durable storage
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Store that keeps every sample in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    samples: RwLock<Vec<Sample>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SampleStore for MemoryStore {
    fn append_round(&self, round: &Round) -> Result<()> {
        let mut samples = self
            .samples
            .write()
            .map_err(|_| AccelError::StoreWrite("store lock poisoned".to_string()))?;
        samples.extend_from_slice(round);
        Ok(())
    }

    fn query_since(&self, since: f64) -> Result<Vec<Sample>> {
        let samples = self
            .samples
            .read()
            .map_err(|_| AccelError::StoreRead("store lock poisoned".to_string()))?;
        Ok(samples.iter().filter(|s| s.timestamp >= since).copied().collect())
    }

    fn sample_count(&self) -> Result<usize> {
        let samples = self
            .samples
            .read()
            .map_err(|_| AccelError::StoreRead("store lock poisoned".to_string()))?;
        Ok(samples.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(t0: f64, t1: f64) -> Round {
        [
            Sample { timestamp: t0, channel_id: 0, x_g: 0.1, y_g: 0.2, z_g: 1.0 },
            Sample { timestamp: t1, channel_id: 1, x_g: -0.1, y_g: -0.2, z_g: 0.9 },
        ]
    }

    #[test]
    fn test_append_and_count() {
        let store = MemoryStore::new();
        store.append_round(&round(1.0, 1.001)).unwrap();
        store.append_round(&round(2.0, 2.001)).unwrap();
        assert_eq!(store.sample_count().unwrap(), 4);
    }

    #[test]
    fn test_query_since_is_inclusive() {
        let store = MemoryStore::new();
        store.append_round(&round(10.0, 10.5)).unwrap();
        store.append_round(&round(20.0, 20.5)).unwrap();

        let window = store.query_since(10.5).unwrap();
        let stamps: Vec<f64> = window.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![10.5, 20.0, 20.5]);

        assert!(store.query_since(100.0).unwrap().is_empty());
        assert_eq!(store.query_since(0.0).unwrap().len(), 4);
    }

    #[test]
    fn test_concurrent_reader_sees_whole_rounds() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(MemoryStore::new());
        let writer_store = store.clone();

        let writer = thread::spawn(move || {
            for i in 0..2000 {
                let t = i as f64;
                writer_store.append_round(&round(t, t + 0.5)).unwrap();
            }
        });

        for _ in 0..200 {
            let snapshot = store.query_since(0.0).unwrap();
            assert_eq!(snapshot.len() % CHANNEL_COUNT, 0);
        }

        writer.join().unwrap();
        assert_eq!(store.sample_count().unwrap(), 4000);
    }
}
