//! Test doubles shared by the unit tests.
//!
//! `tests/common` carries the same scripted backend for the integration
//! tests; keep the two scripts in step.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::assets::AssetSource;
use crate::backend::{Backend, BackendFactory};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::{AlprError, Result};
use crate::image::FrameRef;
use crate::license::DeviceFingerprint;
use crate::recognition::{BoundingBox, Car, Plate, Recognition};

/// Serializes tests that create an engine; only one may exist at a time.
pub(crate) static ENGINE_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Backend whose output is scripted by the first bytes of the frame:
/// byte 0 is the number of plates, each on a car, byte 1 the number of cars
/// without a plate. Values of 10 and above mean nothing was found, except
/// `FAIL_MARKER`.
pub(crate) struct ScriptedBackend {
    calls: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub(crate) const FAIL_MARKER: u8 = 0xEE;
}

impl Backend for ScriptedBackend {
    fn recognize(&self, frame: &FrameRef<'_>) -> Result<Recognition> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let data = frame.planes()[0].data();
        let marker = |i: usize| data.get(i).copied().filter(|&v| v < 10).unwrap_or(0) as usize;

        if data.first() == Some(&Self::FAIL_MARKER) {
            return Err(AlprError::Backend("scripted failure".to_string()));
        }

        let plates = (0..marker(0))
            .map(|i| {
                let bbox = BoundingBox::new(12.0 * i as f32, 10.0, 40.0, 12.0);
                Plate::new(format!("AB{}CD", i), 0.92, &[0.9; 5], bbox.to_warped_box())
                    .with_car(Car::new(0.97, bbox.to_warped_box()))
            })
            .collect();
        let cars = (0..marker(1))
            .map(|i| Car::new(0.95, BoundingBox::new(60.0 * i as f32, 0.0, 50.0, 40.0).to_warped_box()))
            .collect();

        Ok(Recognition { plates, cars })
    }
}

#[derive(Default)]
pub(crate) struct ScriptedFactory {
    opens: AtomicUsize,
    calls: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn recognize_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BackendFactory for ScriptedFactory {
    fn open(&self, _config: &EngineConfig, _assets: &dyn AssetSource) -> Result<Arc<dyn Backend>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedBackend {
            calls: self.calls.clone(),
        }))
    }
}

pub(crate) fn test_fingerprint() -> DeviceFingerprint {
    DeviceFingerprint {
        machine_id: "test-machine".to_string(),
        os: "linux".to_string(),
        arch: "x86_64".to_string(),
    }
}

/// Engine wired to a scripted backend. Hold `ENGINE_LOCK` while it lives.
pub(crate) fn scripted_engine() -> (Engine, Arc<ScriptedFactory>) {
    let factory = Arc::new(ScriptedFactory::default());
    let engine = Engine::builder()
        .backend_factory(factory.clone())
        .device_fingerprint(test_fingerprint())
        .build()
        .expect("engine slot is free");
    (engine, factory)
}

/// 8x8 RGB24 frame scripted to yield `plates` plates and `cars` lone cars.
pub(crate) fn rgb_frame(plates: u8, cars: u8) -> Vec<u8> {
    let mut data = vec![200u8; 8 * 8 * 3];
    data[0] = plates;
    data[1] = cars;
    data
}
