//! Error types for the ALPR engine facade.
//!
//! Every failure the facade can report maps to a stable integer status code
//! (see [`code`]). Public lifecycle operations never surface these errors as
//! `Err`; they are folded into an [`AlprResult`](crate::AlprResult) with a
//! non-zero code and the error's display text as phrase.

use thiserror::Error;

/// Stable status codes carried by [`AlprResult::code`](crate::AlprResult::code).
pub mod code {
    pub const OK: i32 = 0;
    pub const CONFIGURATION: i32 = 1;
    pub const ASSET_LOAD: i32 = 2;
    pub const ILLEGAL_STATE: i32 = 3;
    pub const INVALID_ARGUMENT: i32 = 4;
    pub const BACKEND: i32 = 5;
    pub const LICENSE: i32 = 6;
}

/// Result type alias using [`AlprError`].
pub type Result<T> = std::result::Result<T, AlprError>;

/// Errors reported by the engine facade and its collaborators.
#[derive(Error, Debug)]
pub enum AlprError {
    /// Malformed, out-of-range or contradictory configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Model or other mandatory asset missing or unreadable
    #[error("asset load error: {asset}: {reason}")]
    AssetLoad { asset: String, reason: String },

    /// Operation invoked outside its valid lifecycle state
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Malformed image descriptor or out-of-range parameter
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The recognition backend reported an internal error
    #[error("backend failure: {0}")]
    Backend(String),

    /// License token missing, invalid or expired for a protected feature
    #[error("license error: {0}")]
    License(String),
}

impl AlprError {
    /// Status code for this error.
    pub fn code(&self) -> i32 {
        match self {
            AlprError::Configuration(_) => code::CONFIGURATION,
            AlprError::AssetLoad { .. } => code::ASSET_LOAD,
            AlprError::IllegalState(_) => code::ILLEGAL_STATE,
            AlprError::InvalidArgument(_) => code::INVALID_ARGUMENT,
            AlprError::Backend(_) => code::BACKEND,
            AlprError::License(_) => code::LICENSE,
        }
    }

    pub(crate) fn asset(asset: impl Into<String>, reason: impl ToString) -> Self {
        AlprError::AssetLoad {
            asset: asset.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        AlprError::InvalidArgument(msg.into())
    }
}

impl From<serde_json::Error> for AlprError {
    fn from(err: serde_json::Error) -> Self {
        AlprError::Configuration(err.to_string())
    }
}
