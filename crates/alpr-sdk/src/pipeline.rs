//! One recognition pass: optional input dump, backend, filter, payload.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::backend::Backend;
use crate::config::EngineConfig;
use crate::convert;
use crate::image::FrameRef;
use crate::recognition::RecognitionFilter;
use crate::result::AlprResult;

pub(crate) struct FramePipeline {
    backend: Arc<dyn Backend>,
    filter: RecognitionFilter,
    dump: Option<InputDump>,
}

impl FramePipeline {
    pub(crate) fn new(backend: Arc<dyn Backend>, config: &EngineConfig) -> Self {
        let dump = config
            .debug_write_input_image_enabled
            .then(|| InputDump::new(&config.debug_internal_data_path));

        Self {
            backend,
            filter: RecognitionFilter::from_config(config),
            dump,
        }
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Recognize one frame. Failures come back as error results that still
    /// carry the frame id.
    pub(crate) fn run(&self, frame_id: u64, frame: &FrameRef<'_>, submitted_at: Instant) -> AlprResult {
        if let Some(dump) = &self.dump {
            dump.write(frame_id, frame);
        }

        let outcome = self
            .backend
            .recognize(frame)
            .map(|recognition| self.filter.apply(recognition))
            .and_then(|recognition| {
                let latency_ms = submitted_at.elapsed().as_millis() as u64;
                recognition.into_result(frame_id, latency_ms)
            });

        match outcome {
            Ok(result) => {
                debug!(
                    frame_id,
                    plates = result.num_plates(),
                    cars = result.num_cars(),
                    "frame recognized"
                );
                result
            }
            Err(e) => {
                warn!(frame_id, error = %e, "frame recognition failed");
                AlprResult::new(e.code(), e.to_string(), frame_stub(frame_id), 0, 0)
            }
        }
    }
}

/// Minimal payload identifying a frame.
pub(crate) fn frame_stub(frame_id: u64) -> String {
    format!("{{\"frame_id\":{}}}", frame_id)
}

/// Writes every input frame, upright, as PNG for offline inspection.
struct InputDump {
    dir: PathBuf,
}

impl InputDump {
    fn new(dir: &str) -> Self {
        Self {
            dir: PathBuf::from(dir),
        }
    }

    fn write(&self, frame_id: u64, frame: &FrameRef<'_>) {
        let stamp = chrono::Local::now().format("%Y%m%dT%H%M%S");
        let path = self
            .dir
            .join(format!("alpr_input_{}_{:06}.png", stamp, frame_id));

        let written = convert::to_upright_rgb(frame)
            .map_err(|e| e.to_string())
            .and_then(|image| image.save(&path).map_err(|e| e.to_string()));
        match written {
            Ok(()) => debug!(frame_id, path = %path.display(), "input image written"),
            Err(e) => warn!(frame_id, path = %path.display(), error = %e, "failed to write input image"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{code, AlprError, Result};
    use crate::image::{ImageDescriptor, ImageType};
    use crate::recognition::{BoundingBox, Plate, Recognition};
    use tempfile::TempDir;

    struct FixedBackend(Option<Recognition>);

    impl Backend for FixedBackend {
        fn recognize(&self, _frame: &FrameRef<'_>) -> Result<Recognition> {
            self.0
                .clone()
                .ok_or_else(|| AlprError::Backend("model crashed".to_string()))
        }
    }

    fn frame_data() -> Vec<u8> {
        vec![100u8; 8 * 4 * 3]
    }

    #[test]
    fn test_run_filters_and_serializes() {
        let recognition = Recognition {
            plates: vec![
                Plate::new("AB123", 0.9, &[0.9; 5], BoundingBox::new(0.0, 0.0, 4.0, 2.0).to_warped_box()),
                Plate::new("WEAK", 0.1, &[0.9; 4], BoundingBox::new(0.0, 0.0, 4.0, 2.0).to_warped_box()),
            ],
            cars: Vec::new(),
        };
        let pipeline = FramePipeline::new(Arc::new(FixedBackend(Some(recognition))), &EngineConfig::default());

        let data = frame_data();
        let frame = ImageDescriptor::packed(ImageType::Rgb24, &data, 8, 4).validate().unwrap();
        let result = pipeline.run(3, &frame, Instant::now());

        assert!(result.is_ok());
        assert_eq!(result.num_plates(), 1);
        let json: serde_json::Value = serde_json::from_str(result.json()).unwrap();
        assert_eq!(json["frame_id"], 3);
        assert_eq!(json["plates"][0]["text"], "AB123");
    }

    #[test]
    fn test_backend_failure_keeps_frame_id() {
        let pipeline = FramePipeline::new(Arc::new(FixedBackend(None)), &EngineConfig::default());
        let data = frame_data();
        let frame = ImageDescriptor::packed(ImageType::Rgb24, &data, 8, 4).validate().unwrap();

        let result = pipeline.run(9, &frame, Instant::now());
        assert_eq!(result.code(), code::BACKEND);
        assert_eq!(result.json(), r#"{"frame_id":9}"#);
    }

    #[test]
    fn test_input_dump_writes_png() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            debug_write_input_image_enabled: true,
            debug_internal_data_path: dir.path().display().to_string(),
            ..EngineConfig::default()
        };
        let pipeline = FramePipeline::new(Arc::new(FixedBackend(Some(Recognition::default()))), &config);

        let data = frame_data();
        let frame = ImageDescriptor::packed(ImageType::Rgb24, &data, 8, 4).validate().unwrap();
        assert!(pipeline.run(1, &frame, Instant::now()).is_ok());

        let pngs: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "png"))
            .collect();
        assert_eq!(pngs.len(), 1);
    }
}
