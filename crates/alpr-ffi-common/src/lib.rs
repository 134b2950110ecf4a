//! FFI helpers for the ALPR SDK C interface.
//!
//! Everything that crosses the C boundary as a string or a raw buffer goes
//! through these helpers so the ownership rules stay in one place.
//!
//! # Memory Ownership
//!
//! - Functions returning `*mut c_char` transfer ownership to the caller
//! - Callers must hand those pointers back to `free_cstring` (or an exported
//!   `*_string_free` wrapper generated with [`define_string_free!`])
//! - NULL pointers are handled safely (no-op for free functions)
//! - Borrowed views (`cstr_to_str`, `bytes_from_raw`) are only valid for the
//!   duration of the FFI call that produced them

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::slice;

/// Convert a Rust string to an owned C string, falling back to `fallback` when
/// `s` contains an interior NUL byte.
///
/// # Example
/// ```
/// use alpr_ffi_common::{cstring_new_or_fallback, free_cstring};
///
/// let ptr = cstring_new_or_fallback("plate", "error");
/// unsafe { free_cstring(ptr) };
/// ```
#[inline]
pub fn cstring_new_or_fallback(s: &str, fallback: &'static str) -> *mut c_char {
    CString::new(s)
        .or_else(|_| CString::new(fallback))
        .unwrap_or_default()
        .into_raw()
}

/// Convert a Rust string to an owned C string, using the empty string when
/// `s` contains an interior NUL byte.
#[inline]
pub fn cstring_new_or_empty(s: &str) -> *mut c_char {
    CString::new(s).unwrap_or_default().into_raw()
}

/// Free a C string previously produced by this crate.
///
/// # Safety
/// The pointer must have been allocated by `CString::into_raw()` or be null.
#[inline]
pub unsafe fn free_cstring(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            drop(CString::from_raw(ptr));
        }
    }
}

/// Borrow a NUL-terminated C string as `&str`.
///
/// # Safety
/// The pointer must be valid and NUL-terminated, or null.
pub unsafe fn cstr_to_str<'a>(ptr: *const c_char) -> Result<&'a str, &'static str> {
    if ptr.is_null() {
        return Err("null pointer");
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| "invalid UTF-8")
}

/// Borrow an optional C string: null maps to `Ok(None)`.
///
/// # Safety
/// Same as [`cstr_to_str`].
pub unsafe fn opt_cstr_to_str<'a>(ptr: *const c_char) -> Result<Option<&'a str>, &'static str> {
    if ptr.is_null() {
        return Ok(None);
    }
    unsafe { cstr_to_str(ptr) }.map(Some)
}

/// Borrow `len` bytes starting at `ptr`.
///
/// Returns `None` for a null pointer. A zero length yields an empty slice.
///
/// # Safety
/// `ptr` must point to at least `len` readable bytes that stay alive and
/// unmodified for `'a`.
pub unsafe fn bytes_from_raw<'a>(ptr: *const u8, len: usize) -> Option<&'a [u8]> {
    if ptr.is_null() {
        return None;
    }
    if len == 0 {
        return Some(&[]);
    }
    Some(unsafe { slice::from_raw_parts(ptr, len) })
}

/// Trait for `#[repr(C)]` result structs that carry an owned error message.
///
/// Implementors describe how to build their error shape once; `error()` then
/// takes care of the C string conversion.
///
/// # Example
/// ```ignore
/// impl FfiResult for AlprResultC {
///     const ERROR_FALLBACK: &'static str = "unknown error";
///
///     fn error_fields(code: i32, phrase: *mut c_char) -> Self {
///         Self { code, phrase, json: ptr::null_mut(), num_plates: 0, num_cars: 0 }
///     }
/// }
///
/// let result = AlprResultC::error(4, "width must be positive");
/// ```
pub trait FfiResult: Sized {
    /// Fallback message used when the error message contains NUL bytes.
    const ERROR_FALLBACK: &'static str;

    /// Construct the error shape from a status code and an owned message.
    fn error_fields(code: i32, msg: *mut c_char) -> Self;

    /// Create an error result with the given status code and message.
    #[inline]
    fn error(code: i32, msg: &str) -> Self {
        let msg = cstring_new_or_fallback(msg, Self::ERROR_FALLBACK);
        Self::error_fields(code, msg)
    }
}

/// Generate a version function that returns a static C string.
///
/// ```ignore
/// alpr_ffi_common::define_version_fn!(alpr_sdk_version);
/// ```
#[macro_export]
macro_rules! define_version_fn {
    ($fn_name:ident) => {
        #[no_mangle]
        pub extern "C" fn $fn_name() -> *const std::os::raw::c_char {
            concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const std::os::raw::c_char
        }
    };
}

/// Generate an exported string free function.
///
/// ```ignore
/// alpr_ffi_common::define_string_free!(alpr_string_free);
/// ```
#[macro_export]
macro_rules! define_string_free {
    ($fn_name:ident) => {
        #[no_mangle]
        #[allow(clippy::not_unsafe_ptr_arg_deref)]
        pub extern "C" fn $fn_name(s: *mut std::os::raw::c_char) {
            unsafe { $crate::free_cstring(s) };
        }
    };
}
