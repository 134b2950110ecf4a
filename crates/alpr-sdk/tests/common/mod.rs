//! Shared helpers for the engine integration tests
//!
//! The scripted backend matches the crate's unit-test double, which is not
//! visible from here: same byte script, same plates and cars.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use alpr_sdk::{
    AlprError, AssetSource, Backend, BackendFactory, BoundingBox, Car, DeviceFingerprint, Engine,
    EngineConfig, Plate, Recognition, Result,
};
use alpr_sdk::image::FrameRef;
use parking_lot::{Mutex, MutexGuard};

/// Only one engine may exist per process; tests take turns.
static ENGINE_LOCK: Mutex<()> = parking_lot::const_mutex(());

pub fn engine_lock() -> MutexGuard<'static, ()> {
    ENGINE_LOCK.lock()
}

/// First pixel byte that makes the backend fail.
pub const FAIL_MARKER: u8 = 0xEE;

/// Reads its script from the first two bytes of the frame: number of plates,
/// number of cars without a plate. Values of 10 and above count as zero.
pub struct ScriptedBackend {
    calls: Arc<AtomicUsize>,
}

impl Backend for ScriptedBackend {
    fn recognize(&self, frame: &FrameRef<'_>) -> Result<Recognition> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let data = frame.planes()[0].data();
        if data.first() == Some(&FAIL_MARKER) {
            return Err(AlprError::Backend("scripted failure".to_string()));
        }
        let count = |i: usize| data.get(i).copied().filter(|&v| v < 10).unwrap_or(0) as usize;

        let plates = (0..count(0))
            .map(|i| {
                let bbox = BoundingBox::new(12.0 * i as f32, 10.0, 40.0, 12.0);
                Plate::new(format!("AB{}CD", i), 0.92, &[0.9; 5], bbox.to_warped_box())
                    .with_car(Car::new(0.97, bbox.to_warped_box()))
            })
            .collect();
        let cars = (0..count(1))
            .map(|i| Car::new(0.95, BoundingBox::new(60.0 * i as f32, 0.0, 50.0, 40.0).to_warped_box()))
            .collect();

        Ok(Recognition { plates, cars })
    }
}

#[derive(Default)]
pub struct ScriptedFactory {
    calls: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn recognize_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BackendFactory for ScriptedFactory {
    fn open(&self, _config: &EngineConfig, _assets: &dyn AssetSource) -> Result<Arc<dyn Backend>> {
        Ok(Arc::new(ScriptedBackend {
            calls: self.calls.clone(),
        }))
    }
}

pub fn fingerprint() -> DeviceFingerprint {
    DeviceFingerprint {
        machine_id: "integration-host".to_string(),
        os: "linux".to_string(),
        arch: "x86_64".to_string(),
    }
}

/// Uninitialized engine backed by the scripted backend.
pub fn scripted_engine() -> (Engine, Arc<ScriptedFactory>) {
    let factory = Arc::new(ScriptedFactory::default());
    let engine = Engine::builder()
        .backend_factory(factory.clone())
        .device_fingerprint(fingerprint())
        .build()
        .expect("engine slot is free");
    (engine, factory)
}

/// 16x8 RGB24 image scripted to yield `plates` plates and `cars` lone cars.
pub fn rgb_image(plates: u8, cars: u8) -> Vec<u8> {
    let mut data = vec![180u8; 16 * 8 * 3];
    data[0] = plates;
    data[1] = cars;
    data
}

pub fn json(result: &alpr_sdk::AlprResult) -> serde_json::Value {
    serde_json::from_str(result.json()).expect("result json")
}
