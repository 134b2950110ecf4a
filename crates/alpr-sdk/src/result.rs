//! The value returned by every engine operation.

use crate::error::{code, AlprError};

/// Outcome of an engine operation.
///
/// Both string fields are owned, so a result may outlive the call that
/// produced it and can be handed to another thread. Cloning deep-copies them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlprResult {
    code: i32,
    phrase: String,
    json: String,
    num_plates: usize,
    num_cars: usize,
}

impl AlprResult {
    pub fn new(
        code: i32,
        phrase: impl Into<String>,
        json: impl Into<String>,
        num_plates: usize,
        num_cars: usize,
    ) -> Self {
        Self {
            code,
            phrase: phrase.into(),
            json: json.into(),
            num_plates,
            num_cars,
        }
    }

    /// Result without a JSON payload.
    pub fn bodyless(code: i32, phrase: impl Into<String>) -> Self {
        Self::new(code, phrase, String::new(), 0, 0)
    }

    /// Successful result without a JSON payload.
    pub fn bodyless_ok() -> Self {
        Self::bodyless(code::OK, "OK")
    }

    /// Status code: 0 on success.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Short description of [`code`](Self::code).
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// JSON payload; empty for operations without a body.
    pub fn json(&self) -> &str {
        &self.json
    }

    /// Number of plates in [`json`](Self::json), without parsing it.
    pub fn num_plates(&self) -> usize {
        self.num_plates
    }

    /// Number of cars in [`json`](Self::json), with or without a plate.
    pub fn num_cars(&self) -> usize {
        self.num_cars
    }

    pub fn is_ok(&self) -> bool {
        self.code == code::OK
    }
}

impl Default for AlprResult {
    fn default() -> Self {
        Self::bodyless_ok()
    }
}

impl From<AlprError> for AlprResult {
    fn from(err: AlprError) -> Self {
        Self::bodyless(err.code(), err.to_string())
    }
}

impl<T> From<crate::error::Result<T>> for AlprResult
where
    T: Into<AlprResult>,
{
    fn from(result: crate::error::Result<T>) -> Self {
        match result {
            Ok(value) => value.into(),
            Err(err) => err.into(),
        }
    }
}

impl From<()> for AlprResult {
    fn from(_: ()) -> Self {
        Self::bodyless_ok()
    }
}
