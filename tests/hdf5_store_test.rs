//! Integration tests for the HDF5 sample store

use dual_adxl345_logger::mock::{MockAdxl345, StepClock};
use dual_adxl345_logger::{
    AcquisitionLoop, DataRate, Hdf5Store, SampleStore, StopFlag, StreamControl,
};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_acquired_rounds_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ride_test.h5");

    let dev0 = MockAdxl345::new();
    let dev1 = MockAdxl345::new();
    for _ in 0..20 {
        dev0.probe().push_raw(10, 20, 250);
        dev1.probe().push_raw(-10, -20, -250);
    }

    {
        let store = Arc::new(Hdf5Store::create(&path, DataRate::Hz800).unwrap());
        let clock = Arc::new(StepClock::new(1_700_000_000.0, Duration::from_millis(1)));
        let mut acquisition = AcquisitionLoop::new(dev0, dev1, store.clone(), clock);
        acquisition.start(DataRate::Hz800).unwrap();

        let mut remaining = 20;
        let summary = acquisition
            .run(&StopFlag::new(), |_| {
                remaining -= 1;
                if remaining == 0 {
                    StreamControl::Break
                } else {
                    StreamControl::Continue
                }
            })
            .unwrap();
        assert_eq!(summary.rounds, 20);
        assert_eq!(store.sample_count().unwrap(), 40);
    }

    let store = Hdf5Store::open(&path).unwrap();
    assert_eq!(store.metadata().data_rate_code, 0xD);
    assert_eq!(store.sample_count().unwrap(), 40);

    let samples = store.query_since(0.0).unwrap();
    assert_eq!(samples.len(), 40);
    for pair in samples.chunks(2) {
        assert_eq!(pair[0].channel_id, 0);
        assert_eq!(pair[1].channel_id, 1);
        assert!(pair[0].timestamp < pair[1].timestamp);
        assert_eq!(pair[0].z_g, 1.0);
        assert_eq!(pair[1].z_g, -1.0);
    }

    // Window query keeps only the tail
    let cutoff = samples[30].timestamp;
    let tail = store.query_since(cutoff).unwrap();
    assert_eq!(tail.len(), 10);
    assert_eq!(tail[0], samples[30]);
}
