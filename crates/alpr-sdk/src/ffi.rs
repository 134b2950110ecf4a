//! C-compatible FFI interface for the engine
//!
//! The C side sees one process-wide engine, created by `alpr_engine_init`
//! and destroyed by `alpr_engine_deinit`.
//!
//! # Memory Ownership Rules
//!
//! - Every `AlprResultC` returned by a function is owned by the caller and
//!   must be released with `alpr_result_free`
//! - Results passed to the delivery callback are owned by the engine and only
//!   valid for the duration of the callback
//! - Image buffers are borrowed for the duration of the process call only
//!
//! # Thread Safety
//!
//! `alpr_engine_process*` may be called from several threads at once.
//! `alpr_engine_init` and `alpr_engine_deinit` wait for in-flight calls.
//!
//! # Safety
//!
//! All public FFI functions handle null pointer checks internally.
//! The caller is responsible for passing valid pointers as documented.

use std::os::raw::{c_char, c_void};
use std::sync::Arc;

use alpr_ffi_common::{
    bytes_from_raw, cstr_to_str, cstring_new_or_empty, free_cstring, opt_cstr_to_str, FfiResult,
};
use parking_lot::RwLock;

use crate::delivery::DeliveryCallback;
use crate::engine::{Engine, EngineBuilder};
use crate::error::{code, AlprError};
use crate::exif;
use crate::image::{ImageDescriptor, ImageType, PlanarGeometry, Plane};
use crate::result::AlprResult;

// Safety limits to prevent DoS attacks
const MAX_FRAME_SIZE: usize = 256_000_000; // 256MB max frame
const MAX_CONFIG_LEN: usize = 1_000_000; // 1MB max configuration
const MAX_EXIF_LEN: usize = 16_000_000;

static ENGINE: RwLock<Option<Arc<Engine>>> = parking_lot::const_rwlock(None);

/// C-compatible engine result
#[repr(C)]
pub struct AlprResultC {
    /// 0 on success, see the status code table otherwise
    pub code: i32,
    /// Short description of the code (owned, must be freed)
    pub phrase: *mut c_char,
    /// JSON payload, empty string when absent (owned, must be freed)
    pub json: *mut c_char,
    /// Number of plates in `json`
    pub num_plates: usize,
    /// Number of cars in `json`
    pub num_cars: usize,
}

impl From<&AlprResult> for AlprResultC {
    fn from(result: &AlprResult) -> Self {
        Self {
            code: result.code(),
            phrase: cstring_new_or_empty(result.phrase()),
            json: cstring_new_or_empty(result.json()),
            num_plates: result.num_plates(),
            num_cars: result.num_cars(),
        }
    }
}

impl From<AlprResult> for AlprResultC {
    fn from(result: AlprResult) -> Self {
        Self::from(&result)
    }
}

impl From<AlprError> for AlprResultC {
    fn from(err: AlprError) -> Self {
        Self::error(err.code(), &err.to_string())
    }
}

impl FfiResult for AlprResultC {
    const ERROR_FALLBACK: &'static str = "unknown error";

    fn error_fields(code: i32, phrase: *mut c_char) -> Self {
        Self {
            code,
            phrase,
            json: cstring_new_or_empty(""),
            num_plates: 0,
            num_cars: 0,
        }
    }
}

/// Parallel-mode callback. `result` is valid only during the call.
pub type AlprDeliveryCallbackC = extern "C" fn(result: *const AlprResultC, user_data: *mut c_void);

struct CallbackBridge {
    callback: AlprDeliveryCallbackC,
    // Stored as an address so the bridge is Send + Sync; the host owns it
    user_data: usize,
}

impl DeliveryCallback for CallbackBridge {
    fn on_new_result(&self, result: &AlprResult) {
        let result = AlprResultC::from(result);
        (self.callback)(&result, self.user_data as *mut c_void);
        alpr_result_free(result);
    }
}

fn current_engine() -> Result<Arc<Engine>, AlprResultC> {
    ENGINE
        .read()
        .clone()
        .ok_or_else(|| AlprResultC::error(code::ILLEGAL_STATE, "engine not initialized"))
}

// ============================================================================
// Engine Lifecycle
// ============================================================================

/// Create and initialize the engine.
///
/// # Arguments
/// - `config_json`: JSON configuration, NULL for defaults
/// - `callback`: NULL for sequential delivery, else parallel delivery target
/// - `user_data`: Passed back to `callback` untouched
///
/// # Returns
/// AlprResultC. Caller must call `alpr_result_free`.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn alpr_engine_init(
    config_json: *const c_char,
    callback: Option<AlprDeliveryCallbackC>,
    user_data: *mut c_void,
) -> AlprResultC {
    let config = match unsafe { opt_cstr_to_str(config_json) } {
        Ok(Some(s)) if s.len() > MAX_CONFIG_LEN => {
            return AlprResultC::error(code::INVALID_ARGUMENT, "configuration exceeds maximum length")
        }
        Ok(config) => config,
        Err(e) => return AlprResultC::error(code::INVALID_ARGUMENT, e),
    };
    init_slot(Engine::builder(), config, callback, user_data)
}

/// Build an engine from `builder` into the process-wide slot.
fn init_slot(
    builder: EngineBuilder,
    config: Option<&str>,
    callback: Option<AlprDeliveryCallbackC>,
    user_data: *mut c_void,
) -> AlprResultC {
    let mut slot = ENGINE.write();
    if slot.is_some() {
        return AlprResultC::error(code::ILLEGAL_STATE, "engine already initialized");
    }

    let engine = match builder.build() {
        Ok(engine) => engine,
        Err(e) => return e.into(),
    };
    let observer = callback.map(|callback| {
        Arc::new(CallbackBridge {
            callback,
            user_data: user_data as usize,
        }) as Arc<dyn DeliveryCallback>
    });

    let result = engine.init(config, observer);
    if result.is_ok() {
        *slot = Some(Arc::new(engine));
    }
    result.into()
}

/// Deinitialize and destroy the engine. No-op when not initialized.
#[no_mangle]
pub extern "C" fn alpr_engine_deinit() -> AlprResultC {
    let engine = ENGINE.write().take();
    match engine {
        Some(engine) => engine.deinit().into(),
        None => AlprResult::bodyless_ok().into(),
    }
}

/// Prime the engine for one image type.
#[no_mangle]
pub extern "C" fn alpr_engine_warm_up(image_type: i32) -> AlprResultC {
    let engine = match current_engine() {
        Ok(engine) => engine,
        Err(result) => return result,
    };
    match ImageType::from_raw(image_type) {
        Ok(image_type) => engine.warm_up(image_type).into(),
        Err(e) => e.into(),
    }
}

// ============================================================================
// Frame Processing
// ============================================================================

/// Process an image held in one buffer.
///
/// # Arguments
/// - `image_type`: Pixel layout (see `ImageType`)
/// - `data`: Pointer to pixel data, YUV planes contiguous
/// - `data_len`: Length of pixel data in bytes
/// - `width`, `height`: Image size in pixels
/// - `stride`: Row length in samples, 0 for `width`
/// - `exif_orientation`: 1..=8
///
/// # Safety
/// - `data` must point to at least `data_len` bytes
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref, clippy::too_many_arguments)]
pub extern "C" fn alpr_engine_process(
    image_type: i32,
    data: *const u8,
    data_len: usize,
    width: usize,
    height: usize,
    stride: usize,
    exif_orientation: i32,
) -> AlprResultC {
    let engine = match current_engine() {
        Ok(engine) => engine,
        Err(result) => return result,
    };
    let image_type = match ImageType::from_raw(image_type) {
        Ok(t) => t,
        Err(e) => return e.into(),
    };
    if data_len > MAX_FRAME_SIZE {
        return AlprResultC::error(code::INVALID_ARGUMENT, "frame size exceeds maximum");
    }
    let data = match unsafe { bytes_from_raw(data, data_len) } {
        Some(data) => data,
        None => return AlprResultC::error(code::INVALID_ARGUMENT, "null image data pointer"),
    };

    let image = ImageDescriptor::packed(image_type, data, width, height)
        .with_stride(stride)
        .with_exif_orientation(exif_orientation);
    engine.process(&image).into()
}

/// Process a YUV image given as three planes.
///
/// Plane lengths are derived from the size, strides and layout; zero strides
/// are derived as well. For NV12/NV21 `u` and `v` may point into the same
/// interleaved plane with `uv_pixel_stride` 2.
///
/// # Safety
/// - each plane pointer must cover the rows implied by its stride
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref, clippy::too_many_arguments)]
pub extern "C" fn alpr_engine_process_planar(
    image_type: i32,
    y: *const u8,
    u: *const u8,
    v: *const u8,
    width: usize,
    height: usize,
    y_stride: usize,
    u_stride: usize,
    v_stride: usize,
    uv_pixel_stride: usize,
    exif_orientation: i32,
) -> AlprResultC {
    let engine = match current_engine() {
        Ok(engine) => engine,
        Err(result) => return result,
    };
    let image_type = match ImageType::from_raw(image_type) {
        Ok(t) => t,
        Err(e) => return e.into(),
    };
    let geometry = match PlanarGeometry::resolve(
        image_type,
        width,
        height,
        y_stride,
        u_stride,
        v_stride,
        uv_pixel_stride,
    ) {
        Ok(g) => g,
        Err(e) => return e.into(),
    };
    let [y_len, u_len, v_len] = match geometry.required_lengths() {
        Ok(lengths) => lengths,
        Err(e) => return e.into(),
    };
    match y_len.checked_add(u_len).and_then(|n| n.checked_add(v_len)) {
        None => return AlprError::invalid("image dimensions overflow").into(),
        Some(total) if total > MAX_FRAME_SIZE => {
            return AlprResultC::error(code::INVALID_ARGUMENT, "frame size exceeds maximum")
        }
        Some(_) => {}
    }

    let planes = unsafe {
        (
            bytes_from_raw(y, y_len),
            bytes_from_raw(u, u_len),
            bytes_from_raw(v, v_len),
        )
    };
    let (y, u, v) = match planes {
        (Some(y), Some(u), Some(v)) => (y, u, v),
        _ => return AlprResultC::error(code::INVALID_ARGUMENT, "null plane pointer"),
    };

    let image = ImageDescriptor::planar(
        image_type,
        Plane::new(y, geometry.y_stride),
        Plane::new(u, geometry.u_stride),
        Plane::new(v, geometry.v_stride),
        width,
        height,
    )
    .with_uv_pixel_stride(geometry.uv_pixel_stride)
    .with_exif_orientation(exif_orientation);
    engine.process(&image).into()
}

// ============================================================================
// Utilities
// ============================================================================

/// Runtime license key of this device; bare string when `raw`.
#[no_mangle]
pub extern "C" fn alpr_engine_request_runtime_license_key(raw: bool) -> AlprResultC {
    match current_engine() {
        Ok(engine) => engine.request_runtime_license_key(raw).into(),
        Err(result) => result,
    }
}

/// Compile the models under `assets_folder` for the local accelerator.
/// Works whether or not the engine is initialized.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn alpr_engine_optimize_accelerator(assets_folder: *const c_char) -> AlprResultC {
    match unsafe { cstr_to_str(assets_folder) } {
        Ok(path) => Engine::optimize_accelerator(path).into(),
        Err(e) => AlprResultC::error(code::INVALID_ARGUMENT, e),
    }
}

/// EXIF orientation (1..=8) of JPEG/EXIF bytes; 1 when absent or unreadable.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn alpr_exif_orientation(data: *const u8, data_len: usize) -> i32 {
    if data_len > MAX_EXIF_LEN {
        return 1;
    }
    match unsafe { bytes_from_raw(data, data_len) } {
        Some(meta) => exif::orientation(meta),
        None => 1,
    }
}

/// Free the strings of an AlprResultC.
///
/// # Safety
/// - `result` must come from this library and must not be used afterwards
#[no_mangle]
pub extern "C" fn alpr_result_free(result: AlprResultC) {
    unsafe {
        free_cstring(result.phrase);
        free_cstring(result.json);
    }
}

alpr_ffi_common::define_string_free!(alpr_string_free);
alpr_ffi_common::define_version_fn!(alpr_sdk_version);
