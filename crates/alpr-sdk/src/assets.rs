//! Model assets and where they are read from.
//!
//! Assets are addressed by relative names such as `models/plate_detector.onnx`.
//! The engine reads them through an [`AssetSource`]; the default one is a
//! directory on disk (`assets_folder`). Which models are mandatory depends on
//! the enabled classifiers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::accelerator;
use crate::config::EngineConfig;
use crate::error::{AlprError, Result};
use crate::logging::prefix;

/// Read-only access to named assets.
pub trait AssetSource: Send + Sync {
    fn read(&self, name: &str) -> io::Result<Vec<u8>>;

    fn exists(&self, name: &str) -> bool;

    /// Human-readable location, for logs and error messages.
    fn describe(&self) -> String;
}

/// Assets stored under a directory.
#[derive(Debug, Clone)]
pub struct FsAssetSource {
    root: PathBuf,
}

impl FsAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl AssetSource for FsAssetSource {
    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path_of(name))
    }

    fn exists(&self, name: &str) -> bool {
        self.path_of(name).is_file()
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Models the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelAsset {
    PlateDetector,
    PlateRecognizer,
    CountryClassifier,
    VehicleColor,
    VehicleMakeModel,
    VehicleBodyStyle,
}

impl ModelAsset {
    pub const ALL: [ModelAsset; 6] = [
        ModelAsset::PlateDetector,
        ModelAsset::PlateRecognizer,
        ModelAsset::CountryClassifier,
        ModelAsset::VehicleColor,
        ModelAsset::VehicleMakeModel,
        ModelAsset::VehicleBodyStyle,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            ModelAsset::PlateDetector => "models/plate_detector.onnx",
            ModelAsset::PlateRecognizer => "models/plate_recognizer.onnx",
            ModelAsset::CountryClassifier => "models/country_classifier.onnx",
            ModelAsset::VehicleColor => "models/vehicle_color.onnx",
            ModelAsset::VehicleMakeModel => "models/vehicle_make_model.onnx",
            ModelAsset::VehicleBodyStyle => "models/vehicle_body_style.onnx",
        }
    }

    /// Optional label list next to the model.
    pub fn labels_name(self) -> String {
        let stem = self.file_name().trim_end_matches(".onnx");
        format!("{}.labels", stem)
    }
}

/// Models required by a configuration, detector and recognizer first.
pub fn required_models(config: &EngineConfig) -> Vec<ModelAsset> {
    let mut models = vec![ModelAsset::PlateDetector, ModelAsset::PlateRecognizer];
    let optional = [
        (ModelAsset::CountryClassifier, config.klass_lpci_enabled),
        (ModelAsset::VehicleColor, config.klass_vcr_enabled),
        (ModelAsset::VehicleMakeModel, config.klass_vmmr_enabled),
        (ModelAsset::VehicleBodyStyle, config.klass_vbsr_enabled),
    ];
    models.extend(optional.into_iter().filter_map(|(m, on)| on.then_some(m)));
    models
}

/// Bytes and labels of one loaded model.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub asset: ModelAsset,
    pub bytes: Vec<u8>,
    pub labels: Vec<String>,
    /// Whether `bytes` is an accelerator-optimized artifact
    pub optimized: bool,
}

/// Every model a configuration needs, plus the recognizer charset.
#[derive(Debug, Clone)]
pub struct ModelSet {
    models: Vec<LoadedModel>,
    charset: Vec<char>,
}

impl ModelSet {
    pub fn get(&self, asset: ModelAsset) -> Option<&LoadedModel> {
        self.models.iter().find(|m| m.asset == asset)
    }

    pub fn models(&self) -> &[LoadedModel] {
        &self.models
    }

    pub fn charset(&self) -> &[char] {
        &self.charset
    }
}

/// Read every mandatory model. Missing or empty files are asset errors.
pub fn load_models(source: &dyn AssetSource, config: &EngineConfig) -> Result<ModelSet> {
    let mut models = Vec::new();
    for asset in required_models(config) {
        let name = asset.file_name();
        let bytes = read_required(source, name)?;

        let cached = if config.gpgpu_enabled {
            accelerator::cached_artifact(source, name, &bytes)
        } else {
            None
        };
        let optimized = cached.is_some();
        let bytes = cached.unwrap_or(bytes);

        let labels = match source.read(&asset.labels_name()) {
            Ok(raw) => parse_labels(&String::from_utf8_lossy(&raw)),
            Err(_) => Vec::new(),
        };

        debug!(
            "{} Loaded {} ({} bytes, optimized: {}, {} labels)",
            prefix::ASSETS,
            name,
            bytes.len(),
            optimized,
            labels.len()
        );
        models.push(LoadedModel {
            asset,
            bytes,
            labels,
            optimized,
        });
    }

    let charset = load_charset(source, &config.charset)?;
    info!(
        "{} {} models loaded from {}",
        prefix::ASSETS,
        models.len(),
        source.describe()
    );
    Ok(ModelSet { models, charset })
}

fn read_required(source: &dyn AssetSource, name: &str) -> Result<Vec<u8>> {
    let bytes = source
        .read(name)
        .map_err(|e| AlprError::asset(format!("{}/{}", source.describe(), name), e))?;
    if bytes.is_empty() {
        return Err(AlprError::asset(
            format!("{}/{}", source.describe(), name),
            "file is empty",
        ));
    }
    Ok(bytes)
}

/// Built-in `latin` symbols; recognizer class `i` maps to symbol `i - 1`.
const LATIN_CHARSET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// `latin` is built in; any other name is read from `charsets/<name>.txt`.
pub fn load_charset(source: &dyn AssetSource, name: &str) -> Result<Vec<char>> {
    let symbols: Vec<char> = if name == "latin" {
        LATIN_CHARSET.chars().collect()
    } else {
        let file = format!("charsets/{}.txt", name);
        let raw = read_required(source, &file)?;
        String::from_utf8_lossy(&raw)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect()
    };

    if symbols.is_empty() {
        return Err(AlprError::Configuration(format!("charset '{}' is empty", name)));
    }
    Ok(symbols)
}

/// Parse labels from string (newline-separated or JSON array)
pub fn parse_labels(labels_str: &str) -> Vec<String> {
    let trimmed = labels_str.trim();

    if trimmed.starts_with('[') {
        if let Ok(labels) = serde_json::from_str::<Vec<String>>(trimmed) {
            return labels;
        }
    }

    trimmed
        .lines()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) {
        let path = dir.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_required_models_follow_toggles() {
        let mut config = EngineConfig::default();
        assert_eq!(
            required_models(&config),
            vec![ModelAsset::PlateDetector, ModelAsset::PlateRecognizer]
        );

        config.klass_vmmr_enabled = true;
        config.klass_lpci_enabled = true;
        assert_eq!(
            required_models(&config),
            vec![
                ModelAsset::PlateDetector,
                ModelAsset::PlateRecognizer,
                ModelAsset::CountryClassifier,
                ModelAsset::VehicleMakeModel,
            ]
        );
    }

    #[test]
    fn test_missing_model_is_asset_error() {
        let dir = TempDir::new().unwrap();
        write(&dir, ModelAsset::PlateDetector.file_name(), b"detector");

        let source = FsAssetSource::new(dir.path());
        match load_models(&source, &EngineConfig::default()) {
            Err(AlprError::AssetLoad { asset, .. }) => {
                assert!(asset.ends_with("models/plate_recognizer.onnx"))
            }
            other => panic!("expected asset error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_empty_model_is_asset_error() {
        let dir = TempDir::new().unwrap();
        write(&dir, ModelAsset::PlateDetector.file_name(), b"");
        write(&dir, ModelAsset::PlateRecognizer.file_name(), b"recognizer");

        let source = FsAssetSource::new(dir.path());
        assert!(matches!(
            load_models(&source, &EngineConfig::default()),
            Err(AlprError::AssetLoad { .. })
        ));
    }

    #[test]
    fn test_loads_models_and_labels() {
        let dir = TempDir::new().unwrap();
        write(&dir, ModelAsset::PlateDetector.file_name(), b"detector");
        write(&dir, ModelAsset::PlateRecognizer.file_name(), b"recognizer");
        write(&dir, ModelAsset::VehicleColor.file_name(), b"color");
        write(&dir, "models/vehicle_color.labels", b"[\"black\", \"white\"]");

        let config = EngineConfig {
            klass_vcr_enabled: true,
            ..EngineConfig::default()
        };
        let set = load_models(&FsAssetSource::new(dir.path()), &config).unwrap();

        assert_eq!(set.models().len(), 3);
        let color = set.get(ModelAsset::VehicleColor).unwrap();
        assert_eq!(color.bytes, b"color");
        assert_eq!(color.labels, vec!["black", "white"]);
        assert!(!color.optimized);
        assert_eq!(set.charset().len(), 36);
    }

    #[test]
    fn test_custom_charset() {
        let dir = TempDir::new().unwrap();
        write(&dir, "charsets/korean.txt", "가 나\n다".as_bytes());
        let source = FsAssetSource::new(dir.path());

        assert_eq!(load_charset(&source, "korean").unwrap(), vec!['가', '나', '다']);
        assert!(matches!(
            load_charset(&source, "cyrillic"),
            Err(AlprError::AssetLoad { .. })
        ));
    }

    #[test]
    fn test_label_parsing() {
        assert_eq!(parse_labels("red\n\n blue \n"), vec!["red", "blue"]);
        assert_eq!(parse_labels("[\"a\",\"b\"]"), vec!["a", "b"]);
    }
}
