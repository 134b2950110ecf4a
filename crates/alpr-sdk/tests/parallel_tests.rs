//! Parallel delivery tests: acknowledgements, ordering, shutdown drain

mod common;

use std::sync::Arc;
use std::thread;

use alpr_sdk::error::code;
use alpr_sdk::{AlprResult, DeliveryCallback, EngineState, ImageDescriptor, ImageType};
use common::{engine_lock, json, rgb_image, scripted_engine, FAIL_MARKER};
use parking_lot::Mutex;

/// Observer that keeps every delivered result.
fn collector() -> (Arc<dyn DeliveryCallback>, Arc<Mutex<Vec<AlprResult>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let observer: Arc<dyn DeliveryCallback> =
        Arc::new(move |result: &AlprResult| sink.lock().push(result.clone()));
    (observer, seen)
}

fn frame_ids(results: &[AlprResult]) -> Vec<u64> {
    results
        .iter()
        .map(|r| json(r)["frame_id"].as_u64().unwrap())
        .collect()
}

#[test]
fn test_process_acknowledges_and_delivers_in_order() {
    let _guard = engine_lock();
    let (engine, _) = scripted_engine();
    let (observer, seen) = collector();
    assert!(engine.init(Some(r#"{"max_latency": 2}"#), Some(observer)).is_ok());

    for i in 0..10u8 {
        let data = rgb_image(i % 3, 0);
        let ack = engine.process(&ImageDescriptor::packed(ImageType::Rgb24, &data, 16, 8));
        assert_eq!(ack.code(), code::OK);
        assert_eq!(ack.num_plates(), 0);
        assert_eq!(json(&ack)["frame_id"], i as u64 + 1);
    }

    assert!(engine.deinit().is_ok());
    assert_eq!(engine.state(), EngineState::Uninitialized);

    let results = seen.lock();
    assert_eq!(frame_ids(&results), (1..=10).collect::<Vec<u64>>());
    let plates: Vec<usize> = results.iter().map(|r| r.num_plates()).collect();
    assert_eq!(plates, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
}

#[test]
fn test_caller_buffer_is_copied() {
    let _guard = engine_lock();
    let (engine, _) = scripted_engine();
    let (observer, seen) = collector();
    assert!(engine.init(None, Some(observer)).is_ok());

    let mut data = rgb_image(2, 0);
    engine.process(&ImageDescriptor::packed(ImageType::Rgb24, &data, 16, 8));
    // reusing the buffer right away must not affect the queued frame
    data[0] = 0;
    engine.process(&ImageDescriptor::packed(ImageType::Rgb24, &data, 16, 8));
    engine.deinit();

    let plates: Vec<usize> = seen.lock().iter().map(|r| r.num_plates()).collect();
    assert_eq!(plates, vec![2, 0]);
}

#[test]
fn test_invalid_image_is_rejected_synchronously() {
    let _guard = engine_lock();
    let (engine, factory) = scripted_engine();
    let (observer, seen) = collector();
    assert!(engine.init(None, Some(observer)).is_ok());

    let data = rgb_image(1, 0);
    let result = engine.process(&ImageDescriptor::packed(ImageType::Rgb24, &data[..5], 16, 8));
    assert_eq!(result.code(), code::INVALID_ARGUMENT);

    engine.deinit();
    assert!(seen.lock().is_empty());
    assert_eq!(factory.recognize_calls(), 0);
}

#[test]
fn test_backend_failure_is_delivered() {
    let _guard = engine_lock();
    let (engine, _) = scripted_engine();
    let (observer, seen) = collector();
    assert!(engine.init(None, Some(observer)).is_ok());

    let mut bad = rgb_image(0, 0);
    bad[0] = FAIL_MARKER;
    let good = rgb_image(1, 0);
    let ack = engine.process(&ImageDescriptor::packed(ImageType::Rgb24, &bad, 16, 8));
    assert!(ack.is_ok());
    engine.process(&ImageDescriptor::packed(ImageType::Rgb24, &good, 16, 8));
    engine.deinit();

    let results = seen.lock();
    assert_eq!(results[0].code(), code::BACKEND);
    assert_eq!(json(&results[0])["frame_id"], 1);
    assert!(results[1].is_ok());
    assert_eq!(results[1].num_plates(), 1);
}

#[test]
fn test_concurrent_submitters() {
    let _guard = engine_lock();
    let (engine, factory) = scripted_engine();
    let (observer, seen) = collector();
    assert!(engine.init(Some(r#"{"max_latency": 0}"#), Some(observer)).is_ok());

    let engine = Arc::new(engine);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || {
                let data = rgb_image(1, 0);
                for _ in 0..25 {
                    let ack =
                        engine.process(&ImageDescriptor::packed(ImageType::Rgb24, &data, 16, 8));
                    assert!(ack.is_ok());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    engine.deinit();

    let results = seen.lock();
    assert_eq!(results.len(), 100);
    let mut ids = frame_ids(&results);
    ids.sort_unstable();
    assert_eq!(ids, (1..=100).collect::<Vec<u64>>());
    assert_eq!(factory.recognize_calls(), 100);
}

#[test]
fn test_observer_panic_is_contained() {
    let _guard = engine_lock();
    let (engine, _) = scripted_engine();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let observer: Arc<dyn DeliveryCallback> = Arc::new(move |result: &AlprResult| {
        let id = json(result)["frame_id"].as_u64().unwrap();
        if id == 1 {
            panic!("host observer failure");
        }
        sink.lock().push(id);
    });
    assert!(engine.init(None, Some(observer)).is_ok());

    let data = rgb_image(0, 0);
    for _ in 0..3 {
        engine.process(&ImageDescriptor::packed(ImageType::Rgb24, &data, 16, 8));
    }
    engine.deinit();
    assert_eq!(*seen.lock(), vec![2, 3]);
}
