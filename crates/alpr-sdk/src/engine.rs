//! The engine facade.
//!
//! One [`Engine`] may exist per process. It moves between three states:
//!
//! ```text
//!   Uninitialized --init--> Ready --deinit--> ShuttingDown --> Uninitialized
//! ```
//!
//! Every operation returns an [`AlprResult`]; nothing here panics on caller
//! mistakes. Frame processing takes a shared lock on the session, so
//! `process` calls may overlap each other but never `init`. `deinit` holds
//! the exclusive lock only to take the session; queued parallel frames are
//! drained after it is released, so observers calling back into the engine
//! see `IllegalState` instead of waiting on it.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::accelerator::{self, ModelCompiler};
use crate::assets::{AssetSource, FsAssetSource};
use crate::backend::{BackendFactory, ModelBackendFactory};
use crate::config::EngineConfig;
use crate::delivery::{self, Delivery, DeliveryCallback, ParallelDelivery, Submission};
use crate::error::{code, AlprError, Result};
use crate::exif;
use crate::image::{ImageDescriptor, ImageType};
use crate::license::{self, DeviceFingerprint};
use crate::logging::{self, prefix};
use crate::pipeline::{frame_stub, FramePipeline};
use crate::result::AlprResult;

static INSTANCE_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Lifecycle state reported by [`Engine::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Ready,
    ShuttingDown,
}

impl EngineState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => EngineState::Ready,
            2 => EngineState::ShuttingDown,
            _ => EngineState::Uninitialized,
        }
    }
}

/// Everything that exists only between `init` and `deinit`.
struct Session {
    pipeline: Arc<FramePipeline>,
    delivery: Delivery,
    next_frame_id: AtomicU64,
    runtime_key: String,
}

/// Builder for an [`Engine`] with non-default collaborators.
pub struct EngineBuilder {
    factory: Arc<dyn BackendFactory>,
    assets: Option<Arc<dyn AssetSource>>,
    fingerprint: Option<DeviceFingerprint>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            factory: Arc::new(ModelBackendFactory),
            assets: None,
            fingerprint: None,
        }
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend factory used by `init`.
    pub fn backend_factory(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Asset source used instead of `assets_folder`.
    pub fn asset_source(mut self, assets: Arc<dyn AssetSource>) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Device fingerprint used instead of the detected one.
    pub fn device_fingerprint(mut self, fingerprint: DeviceFingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Claim the process-wide engine slot.
    pub fn build(self) -> Result<Engine> {
        if INSTANCE_CLAIMED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AlprError::IllegalState(
                "an engine already exists in this process".to_string(),
            ));
        }

        Ok(Engine {
            state: RwLock::new(None),
            lifecycle: Mutex::new(()),
            phase: AtomicU8::new(EngineState::Uninitialized as u8),
            factory: self.factory,
            assets: self.assets,
            fingerprint: self.fingerprint,
        })
    }
}

/// License plate recognition engine.
pub struct Engine {
    state: RwLock<Option<Session>>,
    // Serializes init and deinit, including the drain after the session is taken
    lifecycle: Mutex<()>,
    phase: AtomicU8,
    factory: Arc<dyn BackendFactory>,
    assets: Option<Arc<dyn AssetSource>>,
    fingerprint: Option<DeviceFingerprint>,
}

impl Engine {
    /// Engine with the model-backed backend and on-disk assets.
    pub fn new() -> Result<Self> {
        EngineBuilder::new().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Load configuration, models and license, and start delivery.
    ///
    /// With an `observer`, results are delivered in parallel: `process`
    /// returns immediately and the observer later receives every result in
    /// submission order.
    pub fn init(
        &self,
        config_json: Option<&str>,
        observer: Option<Arc<dyn DeliveryCallback>>,
    ) -> AlprResult {
        if delivery::on_delivery_thread() {
            return observer_reentry("init").into();
        }
        let _lifecycle = self.lifecycle.lock();
        let mut state = self.state.write();
        if state.is_some() {
            return AlprError::IllegalState("engine already initialized".to_string()).into();
        }

        match self.open_session(config_json, observer) {
            Ok(session) => {
                let mode = if session.delivery.is_parallel() {
                    "parallel"
                } else {
                    "sequential"
                };
                *state = Some(session);
                self.set_phase(EngineState::Ready);
                info!("{} Engine ready ({} delivery)", prefix::ENGINE_OPEN, mode);
                AlprResult::bodyless_ok()
            }
            Err(e) => {
                warn!(error = %e, "engine initialization failed");
                e.into()
            }
        }
    }

    fn open_session(
        &self,
        config_json: Option<&str>,
        observer: Option<Arc<dyn DeliveryCallback>>,
    ) -> Result<Session> {
        let config = EngineConfig::from_json(config_json)?;
        logging::init_with_filter(config.debug_level.filter_directive());

        let fingerprint = self
            .fingerprint
            .clone()
            .unwrap_or_else(DeviceFingerprint::detect);
        let runtime_key = fingerprint.runtime_key();
        license::check(&config, &runtime_key)?;

        let assets: Arc<dyn AssetSource> = match &self.assets {
            Some(assets) => assets.clone(),
            None => Arc::new(FsAssetSource::new(&config.assets_folder)),
        };
        let backend = self.factory.open(&config, assets.as_ref())?;
        let pipeline = Arc::new(FramePipeline::new(backend, &config));

        let delivery = match observer {
            Some(observer) => Delivery::Parallel(ParallelDelivery::spawn(
                pipeline.clone(),
                observer,
                config.queue_depth(),
            )?),
            None => Delivery::Sequential,
        };

        Ok(Session {
            pipeline,
            delivery,
            next_frame_id: AtomicU64::new(1),
            runtime_key,
        })
    }

    /// Prime the backend for frames of `image_type`.
    pub fn warm_up(&self, image_type: ImageType) -> AlprResult {
        let state = self.state.read();
        let session = match ready(&state) {
            Ok(session) => session,
            Err(e) => return e.into(),
        };

        let started = Instant::now();
        match session.pipeline.backend().warm_up(image_type) {
            Ok(()) => {
                info!(?image_type, elapsed_ms = started.elapsed().as_millis() as u64, "warm-up done");
                AlprResult::bodyless_ok()
            }
            Err(e) => e.into(),
        }
    }

    /// Recognize plates in one image.
    ///
    /// In sequential mode the returned result carries the recognition. In
    /// parallel mode the image is copied and queued, and the returned result
    /// only acknowledges the submission with its `frame_id`.
    pub fn process(&self, image: &ImageDescriptor<'_>) -> AlprResult {
        let state = self.state.read();
        let session = match ready(&state) {
            Ok(session) => session,
            Err(e) => return e.into(),
        };

        let frame = match image.validate() {
            Ok(frame) => frame,
            Err(e) => return e.into(),
        };

        let submitted_at = Instant::now();
        let frame_id = session.next_frame_id.fetch_add(1, Ordering::Relaxed);

        match &session.delivery {
            Delivery::Sequential => session.pipeline.run(frame_id, &frame, submitted_at),
            Delivery::Parallel(parallel) => {
                let submission = Submission {
                    frame_id,
                    frame: frame.to_frame(),
                    submitted_at,
                };
                match parallel.submit(submission) {
                    Ok(()) => AlprResult::new(code::OK, "OK", frame_stub(frame_id), 0, 0),
                    Err(e) => e.into(),
                }
            }
        }
    }

    /// Device runtime key: bare when `raw`, else `{"key": "..."}`.
    pub fn request_runtime_license_key(&self, raw: bool) -> AlprResult {
        let state = self.state.read();
        let session = match ready(&state) {
            Ok(session) => session,
            Err(e) => return e.into(),
        };

        let json = if raw {
            session.runtime_key.clone()
        } else {
            serde_json::json!({ "key": session.runtime_key }).to_string()
        };
        AlprResult::new(code::OK, "OK", json, 0, 0)
    }

    /// Stop delivery, release the backend and return to `Uninitialized`.
    ///
    /// Queued parallel frames are delivered before this returns. Calling it
    /// when not initialized is a successful no-op.
    pub fn deinit(&self) -> AlprResult {
        if delivery::on_delivery_thread() {
            return observer_reentry("deinit").into();
        }
        let _lifecycle = self.lifecycle.lock();
        let session = self.state.write().take();
        let Some(mut session) = session else {
            return AlprResult::bodyless_ok();
        };

        self.set_phase(EngineState::ShuttingDown);
        session.delivery.shutdown();
        let delivered = session.next_frame_id.load(Ordering::Relaxed) - 1;
        drop(session);
        self.set_phase(EngineState::Uninitialized);

        info!("{} Engine stopped after {} frames", prefix::ENGINE_CLOSE, delivered);
        AlprResult::bodyless_ok()
    }

    /// Compile the models under `assets_folder` for the local accelerator.
    ///
    /// Works in any state and on any thread; artifacts are reused by later
    /// `init` calls when `gpgpu_enabled` is set.
    pub fn optimize_accelerator(assets_folder: impl AsRef<Path>) -> AlprResult {
        let compiler = accelerator::default_compiler();
        Self::optimize_accelerator_with(assets_folder, compiler.as_ref())
    }

    /// [`optimize_accelerator`](Self::optimize_accelerator) with a given compiler.
    pub fn optimize_accelerator_with(
        assets_folder: impl AsRef<Path>,
        compiler: &dyn ModelCompiler,
    ) -> AlprResult {
        let report = match accelerator::optimize(assets_folder.as_ref(), compiler) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "accelerator optimization failed");
                return e.into();
            }
        };
        match serde_json::to_string(&report) {
            Ok(json) => AlprResult::new(code::OK, "OK", json, 0, 0),
            Err(e) => AlprError::Backend(e.to_string()).into(),
        }
    }

    /// EXIF orientation (1..=8) of JPEG/EXIF metadata, 1 when unknown.
    pub fn exif_orientation(meta: &[u8]) -> i32 {
        exif::orientation(meta)
    }

    fn set_phase(&self, phase: EngineState) {
        self.phase.store(phase as u8, Ordering::Release);
    }
}

fn ready(state: &Option<Session>) -> Result<&Session> {
    state
        .as_ref()
        .ok_or_else(|| AlprError::IllegalState("engine not initialized".to_string()))
}

fn observer_reentry(operation: &str) -> AlprError {
    AlprError::IllegalState(format!("{} cannot be called from a delivery observer", operation))
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.state.get_mut().is_some() {
            self.deinit();
        }
        INSTANCE_CLAIMED.store(false, Ordering::Release);
    }
}
