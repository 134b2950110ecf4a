//! Recognition backends.
//!
//! The engine owns exactly one [`Backend`] per initialized session and never
//! talks to models directly. A [`BackendFactory`] opens the backend during
//! `init`; tests and hosts with their own inference stack plug in here.

use std::sync::Arc;

use crate::assets::{self, AssetSource};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::image::{Frame, FrameRef, ImageType};
use crate::recognition::Recognition;

#[cfg(feature = "onnx")]
pub mod onnx;

/// Frame size used to prime a backend.
pub const WARM_UP_WIDTH: usize = 1280;
pub const WARM_UP_HEIGHT: usize = 720;

/// Detects and reads plates in validated frames.
///
/// `recognize` may be called from the caller's thread (sequential delivery)
/// or from the delivery worker (parallel delivery), never from both at once
/// for the same session.
pub trait Backend: Send + Sync {
    /// Run the full pipeline once on a blank frame of `image_type`.
    fn warm_up(&self, image_type: ImageType) -> Result<()> {
        let frame = Frame::blank(image_type, WARM_UP_WIDTH, WARM_UP_HEIGHT);
        self.recognize(&frame.view()).map(|_| ())
    }

    fn recognize(&self, frame: &FrameRef<'_>) -> Result<Recognition>;
}

/// Opens a backend for one configuration.
pub trait BackendFactory: Send + Sync {
    fn open(&self, config: &EngineConfig, assets: &dyn AssetSource) -> Result<Arc<dyn Backend>>;
}

/// Model-backed factory: loads the models from the asset source and runs
/// them with ONNX Runtime when the `onnx` feature is enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelBackendFactory;

impl BackendFactory for ModelBackendFactory {
    fn open(&self, config: &EngineConfig, assets: &dyn AssetSource) -> Result<Arc<dyn Backend>> {
        let models = assets::load_models(assets, config)?;

        #[cfg(feature = "onnx")]
        {
            Ok(Arc::new(onnx::OnnxBackend::new(config, &models)?))
        }

        #[cfg(not(feature = "onnx"))]
        {
            let _ = models;
            Err(crate::error::AlprError::Backend(
                "no inference runtime in this build (enable the `onnx` feature)".to_string(),
            ))
        }
    }
}
