//! Engine configuration parsed from a flat JSON object.
//!
//! Unknown keys are ignored so newer callers can talk to older engines. Keys
//! that are absent take the defaults below. Wrong types, unknown enum values,
//! out-of-range numbers and contradictory keys are configuration errors.

use serde::Deserialize;

use crate::error::{AlprError, Result};

/// Logging verbosity requested through `debug_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugLevel {
    Verbose,
    Info,
    Warn,
    Error,
    Fatal,
}

impl DebugLevel {
    /// Default `tracing` filter directive for this level.
    pub fn filter_directive(self) -> &'static str {
        match self {
            DebugLevel::Verbose => "trace",
            DebugLevel::Info => "info",
            DebugLevel::Warn => "warn",
            DebugLevel::Error | DebugLevel::Fatal => "error",
        }
    }
}

/// How per-character recognition scores are folded into one plate score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreType {
    Min,
    Mean,
    Median,
    Max,
    Minmax,
}

/// Detection region of interest in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roi {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl Roi {
    /// Whether the point lies inside the region (edges included).
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }
}

/// Configuration for [`Engine::init`](crate::Engine::init).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub debug_level: DebugLevel,
    pub debug_write_input_image_enabled: bool,
    pub debug_internal_data_path: String,

    /// Maximum number of threads, -1 for auto
    pub num_threads: i32,
    pub gpgpu_enabled: bool,
    /// Parallel queue depth in frames, -1 for auto
    pub max_latency: i32,
    pub charset: String,
    pub ienv_enabled: bool,
    pub openvino_enabled: bool,
    pub openvino_device: String,

    /// `[left, right, top, bottom]`, all zero for the full image
    pub detect_roi: [f32; 4],
    pub detect_minscore: f32,

    pub car_noplate_detect_enabled: bool,
    pub car_noplate_detect_min_score: f32,

    pub pyramidal_search_enabled: bool,
    pub pyramidal_search_sensitivity: f32,
    pub pyramidal_search_minscore: f32,
    pub pyramidal_search_min_image_size_inpixels: u32,

    /// License plate country identification
    pub klass_lpci_enabled: bool,
    /// Vehicle color recognition
    pub klass_vcr_enabled: bool,
    /// Vehicle make/model/year recognition
    pub klass_vmmr_enabled: bool,
    /// Vehicle body style recognition
    pub klass_vbsr_enabled: bool,
    pub klass_vcr_gamma: f32,

    pub recogn_minscore: f32,
    pub recogn_score_type: ScoreType,
    pub recogn_rectify_enabled: bool,

    pub assets_folder: String,
    pub license_token_data: Option<String>,
    pub license_token_file: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debug_level: DebugLevel::Info,
            debug_write_input_image_enabled: false,
            debug_internal_data_path: ".".to_string(),
            num_threads: -1,
            gpgpu_enabled: true,
            max_latency: -1,
            charset: "latin".to_string(),
            ienv_enabled: false,
            openvino_enabled: true,
            openvino_device: "CPU".to_string(),
            detect_roi: [0.0; 4],
            detect_minscore: 0.3,
            car_noplate_detect_enabled: false,
            car_noplate_detect_min_score: 0.8,
            pyramidal_search_enabled: true,
            pyramidal_search_sensitivity: 0.28,
            pyramidal_search_minscore: 0.3,
            pyramidal_search_min_image_size_inpixels: 800,
            klass_lpci_enabled: false,
            klass_vcr_enabled: false,
            klass_vmmr_enabled: false,
            klass_vbsr_enabled: false,
            klass_vcr_gamma: 1.5,
            recogn_minscore: 0.3,
            recogn_score_type: ScoreType::Median,
            recogn_rectify_enabled: false,
            assets_folder: ".".to_string(),
            license_token_data: None,
            license_token_file: None,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration string.
    ///
    /// `None` and blank strings yield the defaults.
    pub fn from_json(json: Option<&str>) -> Result<Self> {
        let json = match json.map(str::trim) {
            None | Some("") => return Ok(Self::default()),
            Some(s) => s,
        };

        let value: serde_json::Value = serde_json::from_str(json)?;
        if !value.is_object() {
            return Err(AlprError::Configuration(
                "configuration must be a JSON object".to_string(),
            ));
        }

        let config: EngineConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges and key combinations.
    pub fn validate(&self) -> Result<()> {
        check_range("detect_minscore", self.detect_minscore, false)?;
        check_range("recogn_minscore", self.recogn_minscore, false)?;
        check_range("pyramidal_search_minscore", self.pyramidal_search_minscore, false)?;
        check_range(
            "car_noplate_detect_min_score",
            self.car_noplate_detect_min_score,
            true,
        )?;
        check_range(
            "pyramidal_search_sensitivity",
            self.pyramidal_search_sensitivity,
            true,
        )?;

        if self.klass_vcr_gamma.is_nan() || self.klass_vcr_gamma < 0.0 {
            return Err(AlprError::Configuration(
                "klass_vcr_gamma must be >= 0".to_string(),
            ));
        }
        if self.max_latency < -1 {
            return Err(AlprError::Configuration(
                "max_latency must be -1 (auto) or >= 0".to_string(),
            ));
        }
        if self.charset.trim().is_empty() {
            return Err(AlprError::Configuration("charset must not be empty".to_string()));
        }

        let [left, right, top, bottom] = self.detect_roi;
        if self.detect_roi.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(AlprError::Configuration(
                "detect_roi values must be finite and >= 0".to_string(),
            ));
        }
        if self.roi().is_some() && (left >= right || top >= bottom) {
            return Err(AlprError::Configuration(
                "detect_roi must satisfy left < right and top < bottom".to_string(),
            ));
        }

        if self.license_token_data.is_some() && self.license_token_file.is_some() {
            return Err(AlprError::Configuration(
                "license_token_data and license_token_file are mutually exclusive".to_string(),
            ));
        }

        Ok(())
    }

    /// Region of interest, `None` when the whole image is searched.
    pub fn roi(&self) -> Option<Roi> {
        if self.detect_roi.iter().all(|v| *v == 0.0) {
            return None;
        }
        let [left, right, top, bottom] = self.detect_roi;
        Some(Roi {
            left,
            right,
            top,
            bottom,
        })
    }

    /// Names of the enabled features that require a license token.
    pub fn protected_features(&self) -> Vec<&'static str> {
        [
            ("klass_lpci_enabled", self.klass_lpci_enabled),
            ("klass_vcr_enabled", self.klass_vcr_enabled),
            ("klass_vmmr_enabled", self.klass_vmmr_enabled),
            ("klass_vbsr_enabled", self.klass_vbsr_enabled),
        ]
        .into_iter()
        .filter_map(|(name, enabled)| enabled.then_some(name))
        .collect()
    }

    /// Depth of the parallel submission queue.
    pub fn queue_depth(&self) -> usize {
        if self.max_latency >= 0 {
            self.max_latency as usize
        } else {
            DEFAULT_QUEUE_DEPTH
        }
    }
}

/// Queue depth used when `max_latency` is -1.
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

fn check_range(name: &str, value: f32, allow_zero: bool) -> Result<()> {
    let lower_ok = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if lower_ok && value <= 1.0 {
        Ok(())
    } else {
        let bound = if allow_zero { "[0, 1]" } else { "]0, 1]" };
        Err(AlprError::Configuration(format!(
            "{} must be within {}, got {}",
            name, bound, value
        )))
    }
}
