//! ONNX Runtime backend.
//!
//! Model contracts:
//! - detector: `[1, 3, 640, 640]` RGB in [0, 1] -> `[1, N, 6]` rows of
//!   `x1, y1, x2, y2, score, class` in input pixels, class 0 plate, 1 car
//! - recognizer: `[1, 3, 32, 128]` plate crop -> `[1, T, C]` per-step scores,
//!   index 0 is the CTC blank, index i the charset symbol i - 1
//! - classifiers: `[1, 3, 224, 224]` crop -> `[1, K]` class scores

use std::path::Path;

use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use parking_lot::Mutex;
use tracing::debug;

use crate::accelerator::ModelCompiler;
use crate::assets::{LoadedModel, ModelAsset, ModelSet};
use crate::config::EngineConfig;
use crate::convert;
use crate::error::{AlprError, Result};
use crate::image::FrameRef;
use crate::recognition::{
    non_max_suppression, BoundingBox, Candidate, Car, Country, Detection, Digit, MakeModelYear,
    Plate, Recognition, Rect,
};

use super::Backend;

const DETECTOR_SIZE: u32 = 640;
const RECOGNIZER_WIDTH: u32 = 128;
const RECOGNIZER_HEIGHT: u32 = 32;
const CLASSIFIER_SIZE: u32 = 224;

const CLASS_PLATE: u32 = 0;
const CLASS_CAR: u32 = 1;
const NMS_IOU_THRESHOLD: f32 = 0.45;
const TOP_K: usize = 3;

fn backend_err(e: impl std::fmt::Display) -> AlprError {
    AlprError::Backend(e.to_string())
}

fn open_session(model: &LoadedModel, config: &EngineConfig) -> Result<Session> {
    let mut builder = Session::builder()
        .map_err(backend_err)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(backend_err)?;

    if config.num_threads > 0 {
        builder = builder
            .with_intra_threads(config.num_threads as usize)
            .map_err(backend_err)?;
    }

    builder
        .commit_from_memory(&model.bytes)
        .map_err(|e| AlprError::asset(model.asset.file_name(), e))
}

/// Resize to `width` x `height` and lay out as normalized NCHW.
fn to_tensor(image: &RgbImage, width: u32, height: u32) -> Array4<f32> {
    let resized = imageops::resize(image, width, height, FilterType::Triangle);
    let mut input = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, px) in resized.enumerate_pixels() {
        for c in 0..3 {
            input[[0, c, y as usize, x as usize]] = px[c] as f32 / 255.0;
        }
    }
    input
}

fn run(session: &Mutex<Session>, input: Array4<f32>) -> Result<(Vec<i64>, Vec<f32>)> {
    let tensor = Tensor::from_array(input).map_err(backend_err)?;
    let mut session = session.lock();
    let outputs = session.run(ort::inputs![tensor]).map_err(backend_err)?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(backend_err)?;
    Ok((shape.to_vec(), data.to_vec()))
}

fn crop(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let x = bbox.x.max(0.0) as u32;
    let y = bbox.y.max(0.0) as u32;
    let w = (bbox.width as u32).min(image.width().saturating_sub(x));
    let h = (bbox.height as u32).min(image.height().saturating_sub(y));
    (w > 0 && h > 0).then(|| imageops::crop_imm(image, x, y, w, h).to_image())
}

fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

struct Classifier {
    session: Mutex<Session>,
    labels: Vec<String>,
}

impl Classifier {
    fn open(models: &ModelSet, asset: ModelAsset, config: &EngineConfig) -> Result<Option<Self>> {
        let Some(model) = models.get(asset) else {
            return Ok(None);
        };
        Ok(Some(Self {
            session: Mutex::new(open_session(model, config)?),
            labels: model.labels.clone(),
        }))
    }

    /// Best `TOP_K` classes as (class, score, label fields).
    fn classify(&self, crop: &RgbImage) -> Result<Vec<(u32, f32, Vec<String>)>> {
        let (_, scores) = run(&self.session, to_tensor(crop, CLASSIFIER_SIZE, CLASSIFIER_SIZE))?;
        let probs = softmax(&scores);

        let mut ranked: Vec<(usize, f32)> = probs.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(ranked
            .into_iter()
            .take(TOP_K)
            .map(|(k, p)| {
                let fields = match self.labels.get(k) {
                    Some(label) => label.split('|').map(|s| s.trim().to_string()).collect(),
                    None => vec![k.to_string()],
                };
                (k as u32, p, fields)
            })
            .collect())
    }
}

/// Recognizer backed by ONNX Runtime sessions.
pub struct OnnxBackend {
    detector: Mutex<Session>,
    recognizer: Mutex<Session>,
    charset: Vec<char>,
    country: Option<Classifier>,
    color: Option<Classifier>,
    make_model: Option<Classifier>,
    body_style: Option<Classifier>,
    min_score: f32,
    vcr_gamma: f32,
}

impl OnnxBackend {
    pub fn new(config: &EngineConfig, models: &ModelSet) -> Result<Self> {
        let required = |asset: ModelAsset| {
            models
                .get(asset)
                .ok_or_else(|| AlprError::asset(asset.file_name(), "not loaded"))
        };

        let backend = Self {
            detector: Mutex::new(open_session(required(ModelAsset::PlateDetector)?, config)?),
            recognizer: Mutex::new(open_session(required(ModelAsset::PlateRecognizer)?, config)?),
            charset: models.charset().to_vec(),
            country: Classifier::open(models, ModelAsset::CountryClassifier, config)?,
            color: Classifier::open(models, ModelAsset::VehicleColor, config)?,
            make_model: Classifier::open(models, ModelAsset::VehicleMakeModel, config)?,
            body_style: Classifier::open(models, ModelAsset::VehicleBodyStyle, config)?,
            min_score: config.detect_minscore.min(config.car_noplate_detect_min_score),
            vcr_gamma: config.klass_vcr_gamma,
        };
        debug!("ONNX backend ready ({} charset symbols)", backend.charset.len());
        Ok(backend)
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>> {
        let (shape, data) = run(
            &self.detector,
            to_tensor(image, DETECTOR_SIZE, DETECTOR_SIZE),
        )?;
        if shape.len() != 3 || shape[2] != 6 {
            return Err(AlprError::Backend(format!(
                "unexpected detector output shape {:?}",
                shape
            )));
        }

        let sx = image.width() as f32 / DETECTOR_SIZE as f32;
        let sy = image.height() as f32 / DETECTOR_SIZE as f32;
        let detections = data
            .chunks_exact(6)
            .filter(|row| row[4] >= self.min_score)
            .map(|row| Detection {
                bbox: BoundingBox::new(
                    row[0] * sx,
                    row[1] * sy,
                    (row[2] - row[0]) * sx,
                    (row[3] - row[1]) * sy,
                ),
                confidence: row[4],
                class_id: row[5].round() as u32,
            })
            .collect();

        Ok(non_max_suppression(detections, NMS_IOU_THRESHOLD))
    }

    /// Greedy CTC decode of one plate crop.
    fn read_text(&self, image: &RgbImage, bbox: &BoundingBox) -> Result<(String, Vec<f32>, Vec<Digit>)> {
        let Some(plate) = crop(image, bbox) else {
            return Ok((String::new(), Vec::new(), Vec::new()));
        };
        let (shape, data) = run(
            &self.recognizer,
            to_tensor(&plate, RECOGNIZER_WIDTH, RECOGNIZER_HEIGHT),
        )?;
        if shape.len() != 3 {
            return Err(AlprError::Backend(format!(
                "unexpected recognizer output shape {:?}",
                shape
            )));
        }
        let (steps, classes) = (shape[1] as usize, shape[2] as usize);

        let mut text = String::new();
        let mut scores = Vec::new();
        let mut digits = Vec::new();
        let mut previous = 0usize;
        let step_width = bbox.width / steps.max(1) as f32;

        for t in 0..steps {
            let probs = softmax(&data[t * classes..(t + 1) * classes]);
            let (best, p) = probs
                .iter()
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .unwrap_or((0, 0.0));

            if best != 0 && best != previous {
                if let Some(&symbol) = self.charset.get(best - 1) {
                    text.push(symbol);
                    scores.push(p);
                    let left = bbox.x + t as f32 * step_width;
                    digits.push(Digit {
                        location: Rect {
                            left,
                            top: bbox.y,
                            right: left + step_width,
                            bottom: bbox.y + bbox.height,
                        },
                        confidence: p,
                        char_code: symbol as u32,
                    });
                }
            }
            previous = best;
        }

        Ok((text, scores, digits))
    }

    fn describe_car(&self, image: &RgbImage, detection: &Detection) -> Result<Car> {
        let mut car = Car::new(detection.confidence, detection.bbox.to_warped_box());
        let Some(crop) = crop(image, &detection.bbox) else {
            return Ok(car);
        };

        if let Some(classifier) = &self.color {
            let adjusted = apply_gamma(&crop, self.vcr_gamma);
            car.color = candidates(classifier.classify(&adjusted)?);
        }
        if let Some(classifier) = &self.body_style {
            car.body_style = candidates(classifier.classify(&crop)?);
        }
        if let Some(classifier) = &self.make_model {
            car.make_model_year = classifier
                .classify(&crop)?
                .into_iter()
                .map(|(klass, confidence, fields)| {
                    let field = |i: usize| fields.get(i).cloned().unwrap_or_default();
                    MakeModelYear {
                        confidence,
                        klass,
                        make: field(0),
                        model: field(1),
                        year: field(2),
                    }
                })
                .collect();
        }
        Ok(car)
    }

    fn countries(&self, image: &RgbImage, bbox: &BoundingBox) -> Result<Vec<Country>> {
        let (Some(classifier), Some(crop)) = (&self.country, crop(image, bbox)) else {
            return Ok(Vec::new());
        };
        Ok(classifier
            .classify(&crop)?
            .into_iter()
            .map(|(klass, confidence, fields)| {
                let field = |i: usize| fields.get(i).cloned();
                Country {
                    code: field(0).unwrap_or_default(),
                    confidence,
                    klass,
                    name: field(1).or_else(|| field(0)).unwrap_or_default(),
                    state: field(2),
                }
            })
            .collect())
    }
}

impl Backend for OnnxBackend {
    fn recognize(&self, frame: &FrameRef<'_>) -> Result<Recognition> {
        let image = convert::to_upright_rgb(frame)?;
        let detections = self.detect(&image)?;

        let mut cars: Vec<(Detection, Car, bool)> = Vec::new();
        for det in detections.iter().filter(|d| d.class_id == CLASS_CAR) {
            cars.push((*det, self.describe_car(&image, det)?, false));
        }

        let mut recognition = Recognition::default();
        for det in detections.iter().filter(|d| d.class_id == CLASS_PLATE) {
            let (text, scores, digits) = self.read_text(&image, &det.bbox)?;
            if text.is_empty() {
                continue;
            }

            let mut plate = Plate::new(text, det.confidence, &scores, det.bbox.to_warped_box())
                .with_digits(digits);
            plate.country = self.countries(&image, &det.bbox)?;

            let (cx, cy) = (
                det.bbox.x + det.bbox.width / 2.0,
                det.bbox.y + det.bbox.height / 2.0,
            );
            if let Some((_, car, used)) = cars
                .iter_mut()
                .find(|(car_det, _, used)| !*used && car_det.bbox.contains(cx, cy))
            {
                *used = true;
                plate = plate.with_car(car.clone());
            }
            recognition.plates.push(plate);
        }

        recognition.cars = cars
            .into_iter()
            .filter(|(_, _, used)| !used)
            .map(|(_, car, _)| car)
            .collect();
        Ok(recognition)
    }
}

fn candidates(ranked: Vec<(u32, f32, Vec<String>)>) -> Vec<Candidate> {
    ranked
        .into_iter()
        .map(|(klass, confidence, fields)| Candidate {
            confidence,
            klass,
            name: fields.into_iter().next().unwrap_or_default(),
        })
        .collect()
}

/// Brighten (gamma > 1) or darken (gamma < 1) a crop before color recognition.
fn apply_gamma(image: &RgbImage, gamma: f32) -> RgbImage {
    if gamma <= 0.0 || (gamma - 1.0).abs() < f32::EPSILON {
        return image.clone();
    }
    let lut: Vec<u8> = (0..=255u32)
        .map(|v| ((v as f32 / 255.0).powf(1.0 / gamma) * 255.0).round() as u8)
        .collect();
    let mut out = image.clone();
    for px in out.pixels_mut() {
        for c in px.0.iter_mut() {
            *c = lut[*c as usize];
        }
    }
    out
}

/// Graph optimizer of ONNX Runtime, writing the optimized model to disk.
#[derive(Debug, Default)]
pub struct OrtCompiler;

impl ModelCompiler for OrtCompiler {
    fn accelerator(&self) -> &str {
        "onnxruntime"
    }

    fn compile(&self, source: &Path, target: &Path) -> Result<()> {
        Session::builder()
            .map_err(backend_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(backend_err)?
            .with_optimized_model_path(target)
            .map_err(backend_err)?
            .commit_from_file(source)
            .map_err(|e| AlprError::asset(source.display().to_string(), e))?;
        Ok(())
    }
}
