//! ALPR SDK
//!
//! License plate recognition engine behind a small facade, usable from Rust
//! and from C.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────┐     ┌──────────────┐     ┌────────────┐
//! │ ImageDescriptor │────▶│  Engine  │────▶│ FramePipeline│────▶│ AlprResult │
//! │ (borrowed bytes)│     │ (facade) │     │ (Backend)    │     │ (JSON)     │
//! └─────────────────┘     └────┬─────┘     └──────────────┘     └────────────┘
//!                              │ parallel mode
//!                              ▼
//!                      ┌───────────────┐     ┌──────────────────┐
//!                      │ bounded queue │────▶│ DeliveryCallback │
//!                      │ (FIFO worker) │     │ (host observer)  │
//!                      └───────────────┘     └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use alpr_sdk::{Engine, ImageDescriptor, ImageType};
//!
//! let engine = Engine::new().expect("one engine per process");
//! let result = engine.init(Some(r#"{"assets_folder": "./assets"}"#), None);
//! assert!(result.is_ok(), "{}", result.phrase());
//!
//! let pixels = vec![0u8; 1280 * 720 * 3];
//! let image = ImageDescriptor::packed(ImageType::Rgb24, &pixels, 1280, 720);
//! let result = engine.process(&image);
//! println!("{} plates: {}", result.num_plates(), result.json());
//!
//! engine.deinit();
//! ```
//!
//! ## Memory Ownership
//!
//! - Image bytes are borrowed for the duration of `process` only
//! - Parallel mode copies each frame before queueing it
//! - C results must be released with `alpr_result_free()`

pub mod accelerator;
pub mod assets;
pub mod backend;
pub mod config;
pub mod convert;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod exif;
pub mod ffi;
pub mod image;
pub mod license;
pub mod logging;
pub mod recognition;
pub mod result;

mod digest;
mod pipeline;

#[cfg(test)]
mod testing;

// Re-export main types
pub use accelerator::{ModelCompiler, OptimizeReport};
pub use assets::{AssetSource, FsAssetSource};
pub use backend::{Backend, BackendFactory};
pub use config::{DebugLevel, EngineConfig, ScoreType};
pub use delivery::DeliveryCallback;
pub use engine::{Engine, EngineBuilder, EngineState};
pub use error::{AlprError, Result};
pub use image::{ImageDescriptor, ImageType, PixelData, Plane};
pub use license::{DeviceFingerprint, LicenseToken};
pub use recognition::{BoundingBox, Car, Plate, Recognition};
pub use result::AlprResult;

// Re-export FFI types for C consumers
pub use ffi::{AlprDeliveryCallbackC, AlprResultC};
