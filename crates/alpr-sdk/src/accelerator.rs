//! Ahead-of-time model optimization for the installed accelerator.
//!
//! Every `models/*.onnx` file under an assets folder is compiled to
//! `models/<stem>.opt.onnx`. A manifest records the SHA-256 of each source
//! and artifact, so a second run only recompiles what changed, and `init`
//! only picks up artifacts that still match their source.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::assets::AssetSource;
use crate::digest::sha256_hex;
use crate::error::{AlprError, Result};
use crate::logging::prefix;

/// Manifest location relative to the assets folder.
pub const MANIFEST_NAME: &str = "models/accelerator.json";

const ARTIFACT_SUFFIX: &str = ".opt.onnx";

/// Turns a model into an accelerator-specific artifact.
pub trait ModelCompiler {
    /// Name recorded in the manifest; a different name invalidates artifacts.
    fn accelerator(&self) -> &str;

    fn compile(&self, source: &Path, target: &Path) -> Result<()>;
}

/// Compiler for the current build.
pub fn default_compiler() -> Box<dyn ModelCompiler> {
    #[cfg(feature = "onnx")]
    {
        Box::new(crate::backend::onnx::OrtCompiler::default())
    }
    #[cfg(not(feature = "onnx"))]
    {
        Box::new(UnavailableCompiler)
    }
}

/// Stand-in when no inference runtime is compiled in.
#[cfg(not(feature = "onnx"))]
struct UnavailableCompiler;

#[cfg(not(feature = "onnx"))]
impl ModelCompiler for UnavailableCompiler {
    fn accelerator(&self) -> &str {
        "none"
    }

    fn compile(&self, _source: &Path, _target: &Path) -> Result<()> {
        Err(AlprError::Backend(
            "no accelerator available in this build (enable the `onnx` feature)".to_string(),
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub accelerator: String,
    pub models: BTreeMap<String, ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub source_sha256: String,
    pub artifact: String,
    pub artifact_sha256: String,
}

/// What one optimization run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OptimizeReport {
    pub accelerator: String,
    pub compiled: Vec<String>,
    pub up_to_date: Vec<String>,
}

/// Compile every model under `assets_folder`, skipping up-to-date artifacts.
pub fn optimize(assets_folder: &Path, compiler: &dyn ModelCompiler) -> Result<OptimizeReport> {
    let models_dir = assets_folder.join("models");
    let sources = list_models(&models_dir)?;
    if sources.is_empty() {
        return Err(AlprError::asset(
            models_dir.display().to_string(),
            "no models to optimize",
        ));
    }

    let manifest_path = assets_folder.join(MANIFEST_NAME);
    let mut manifest = read_manifest(&manifest_path);
    if manifest.accelerator != compiler.accelerator() {
        manifest = Manifest {
            accelerator: compiler.accelerator().to_string(),
            models: BTreeMap::new(),
        };
    }

    let mut report = OptimizeReport {
        accelerator: manifest.accelerator.clone(),
        ..OptimizeReport::default()
    };

    for source in sources {
        let name = relative_name(assets_folder, &source);
        let bytes = fs::read(&source).map_err(|e| AlprError::asset(&name, e))?;
        let source_sha256 = sha256_hex(&bytes);
        let artifact = artifact_name(&name);
        let artifact_path = assets_folder.join(&artifact);

        let fresh = manifest.models.get(&name).is_some_and(|entry| {
            entry.source_sha256 == source_sha256
                && fs::read(&artifact_path)
                    .map(|a| sha256_hex(&a) == entry.artifact_sha256)
                    .unwrap_or(false)
        });
        if fresh {
            debug!("{} {} is up to date", prefix::ASSETS, name);
            report.up_to_date.push(name);
            continue;
        }

        compiler.compile(&source, &artifact_path)?;
        let artifact_bytes =
            fs::read(&artifact_path).map_err(|e| AlprError::asset(&artifact, e))?;

        info!("{} Compiled {} -> {}", prefix::ASSETS, name, artifact);
        manifest.models.insert(
            name.clone(),
            ManifestEntry {
                source_sha256,
                artifact,
                artifact_sha256: sha256_hex(&artifact_bytes),
            },
        );
        report.compiled.push(name);
    }

    write_manifest(&manifest_path, &manifest)?;
    Ok(report)
}

/// Optimized artifact for `model`, if one exists and matches `model_bytes`.
pub(crate) fn cached_artifact(
    source: &dyn AssetSource,
    model: &str,
    model_bytes: &[u8],
) -> Option<Vec<u8>> {
    let raw = source.read(MANIFEST_NAME).ok()?;
    let manifest: Manifest = match serde_json::from_slice(&raw) {
        Ok(m) => m,
        Err(e) => {
            warn!("{} Ignoring unreadable accelerator manifest: {}", prefix::ASSETS, e);
            return None;
        }
    };

    let entry = manifest.models.get(model)?;
    if entry.source_sha256 != sha256_hex(model_bytes) {
        debug!("{} Artifact for {} is stale", prefix::ASSETS, model);
        return None;
    }
    let artifact = source.read(&entry.artifact).ok()?;
    (sha256_hex(&artifact) == entry.artifact_sha256).then_some(artifact)
}

fn list_models(models_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(models_dir)
        .map_err(|e| AlprError::asset(models_dir.display().to_string(), e))?;

    let mut models: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".onnx") && !n.ends_with(ARTIFACT_SUFFIX))
        })
        .collect();
    models.sort();
    Ok(models)
}

fn relative_name(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn artifact_name(model: &str) -> String {
    format!("{}{}", model.trim_end_matches(".onnx"), ARTIFACT_SUFFIX)
}

fn read_manifest(path: &Path) -> Manifest {
    match fs::read(path) {
        Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
            warn!("{} Rebuilding unreadable manifest {}: {}", prefix::ASSETS, path.display(), e);
            Manifest::default()
        }),
        Err(_) => Manifest::default(),
    }
}

fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    let json = serde_json::to_vec_pretty(manifest)
        .map_err(|e| AlprError::Backend(format!("failed to encode manifest: {}", e)))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)
        .and_then(|_| fs::rename(&tmp, path))
        .map_err(|e| AlprError::asset(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::FsAssetSource;
    use std::cell::Cell;
    use tempfile::TempDir;

    /// Copies the model and appends a marker.
    struct CopyCompiler {
        name: &'static str,
        calls: Cell<usize>,
    }

    impl CopyCompiler {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                calls: Cell::new(0),
            }
        }
    }

    impl ModelCompiler for CopyCompiler {
        fn accelerator(&self) -> &str {
            self.name
        }

        fn compile(&self, source: &Path, target: &Path) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            let mut bytes = fs::read(source).map_err(|e| AlprError::asset("source", e))?;
            bytes.extend_from_slice(b"+opt");
            fs::write(target, bytes).map_err(|e| AlprError::asset("target", e))
        }
    }

    fn assets_with_models() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("models")).unwrap();
        fs::write(dir.path().join("models/plate_detector.onnx"), b"det").unwrap();
        fs::write(dir.path().join("models/plate_recognizer.onnx"), b"rec").unwrap();
        fs::write(dir.path().join("models/notes.txt"), b"ignored").unwrap();
        dir
    }

    #[test]
    fn test_optimize_is_idempotent() {
        let dir = assets_with_models();
        let compiler = CopyCompiler::new("test-gpu");

        let first = optimize(dir.path(), &compiler).unwrap();
        assert_eq!(
            first.compiled,
            vec!["models/plate_detector.onnx", "models/plate_recognizer.onnx"]
        );
        assert_eq!(compiler.calls.get(), 2);
        assert_eq!(
            fs::read(dir.path().join("models/plate_detector.opt.onnx")).unwrap(),
            b"det+opt"
        );

        let second = optimize(dir.path(), &compiler).unwrap();
        assert!(second.compiled.is_empty());
        assert_eq!(second.up_to_date.len(), 2);
        assert_eq!(compiler.calls.get(), 2);
    }

    #[test]
    fn test_changed_source_or_accelerator_recompiles() {
        let dir = assets_with_models();
        let compiler = CopyCompiler::new("test-gpu");
        optimize(dir.path(), &compiler).unwrap();

        fs::write(dir.path().join("models/plate_detector.onnx"), b"det-v2").unwrap();
        let report = optimize(dir.path(), &compiler).unwrap();
        assert_eq!(report.compiled, vec!["models/plate_detector.onnx"]);

        let other = CopyCompiler::new("other-gpu");
        let report = optimize(dir.path(), &other).unwrap();
        assert_eq!(report.compiled.len(), 2);
    }

    #[test]
    fn test_missing_folder_is_asset_error() {
        let dir = TempDir::new().unwrap();
        let result = optimize(&dir.path().join("nope"), &CopyCompiler::new("x"));
        assert!(matches!(result, Err(AlprError::AssetLoad { .. })));

        fs::create_dir_all(dir.path().join("models")).unwrap();
        let result = optimize(dir.path(), &CopyCompiler::new("x"));
        assert!(matches!(result, Err(AlprError::AssetLoad { .. })));
    }

    #[test]
    fn test_cached_artifact_requires_matching_source() {
        let dir = assets_with_models();
        optimize(dir.path(), &CopyCompiler::new("test-gpu")).unwrap();
        let source = FsAssetSource::new(dir.path());

        let cached = cached_artifact(&source, "models/plate_detector.onnx", b"det");
        assert_eq!(cached.as_deref(), Some(&b"det+opt"[..]));
        assert!(cached_artifact(&source, "models/plate_detector.onnx", b"changed").is_none());
        assert!(cached_artifact(&source, "models/unknown.onnx", b"det").is_none());
    }
}
