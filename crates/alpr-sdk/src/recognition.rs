//! Recognition records, filtering and result payloads.
//!
//! Backends produce a [`Recognition`]; the engine runs it through a
//! [`RecognitionFilter`] built from the configuration and serializes the
//! survivors into the JSON payload of an [`AlprResult`].

use serde::Serialize;

use crate::config::{EngineConfig, Roi, ScoreType};
use crate::error::{AlprError, Result};
use crate::result::AlprResult;

/// Four corners (x, y) clockwise from top-left, in input image pixels.
pub type WarpedBox = [f32; 8];

/// Axis-aligned box in image pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }

    /// Corners clockwise from top-left.
    pub fn to_warped_box(&self) -> WarpedBox {
        let (l, t) = (self.x, self.y);
        let (r, b) = (self.x + self.width, self.y + self.height);
        [l, t, r, t, r, b, l, b]
    }
}

/// Centroid of a warped box.
pub fn warped_box_center(corners: &WarpedBox) -> (f32, f32) {
    let x = (corners[0] + corners[2] + corners[4] + corners[6]) / 4.0;
    let y = (corners[1] + corners[3] + corners[5] + corners[7]) / 4.0;
    (x, y)
}

/// Edges of an axis-aligned rectangle in image pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

/// One recognized character.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Digit {
    pub location: Rect,
    pub confidence: f32,
    pub char_code: u32,
}

/// One classifier candidate: class index, display name and score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub confidence: f32,
    pub klass: u32,
    pub name: String,
}

/// Country or state candidate for a plate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Country {
    pub code: String,
    pub confidence: f32,
    pub klass: u32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Make/model/year candidate for a vehicle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MakeModelYear {
    pub confidence: f32,
    pub klass: u32,
    pub make: String,
    pub model: String,
    pub year: String,
}

/// A detected vehicle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Car {
    pub confidence: f32,
    pub warped_box: WarpedBox,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub color: Vec<Candidate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub make_model_year: Vec<MakeModelYear>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub body_style: Vec<Candidate>,
}

impl Car {
    pub fn new(confidence: f32, warped_box: WarpedBox) -> Self {
        Self {
            confidence,
            warped_box,
            color: Vec::new(),
            make_model_year: Vec::new(),
            body_style: Vec::new(),
        }
    }
}

/// A recognized license plate.
///
/// `confidences` holds the aggregated recognition score, the detection score
/// and one score per character, all in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plate {
    pub text: String,
    confidences: Vec<f32>,
    pub warped_box: WarpedBox,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub digits: Vec<Digit>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub country: Vec<Country>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub car: Option<Car>,
}

impl Plate {
    pub fn new(
        text: impl Into<String>,
        detection_confidence: f32,
        char_confidences: &[f32],
        warped_box: WarpedBox,
    ) -> Self {
        let mut confidences = Vec::with_capacity(char_confidences.len() + 2);
        confidences.push(ScoreType::Median.aggregate(char_confidences));
        confidences.push(detection_confidence);
        confidences.extend_from_slice(char_confidences);

        Self {
            text: text.into(),
            confidences,
            warped_box,
            digits: Vec::new(),
            country: Vec::new(),
            car: None,
        }
    }

    pub fn with_digits(mut self, digits: Vec<Digit>) -> Self {
        self.digits = digits;
        self
    }

    pub fn with_car(mut self, car: Car) -> Self {
        self.car = Some(car);
        self
    }

    pub fn recognition_score(&self) -> f32 {
        self.confidences[0]
    }

    pub fn detection_confidence(&self) -> f32 {
        self.confidences[1]
    }

    pub fn char_confidences(&self) -> &[f32] {
        &self.confidences[2..]
    }

    pub fn confidences(&self) -> &[f32] {
        &self.confidences
    }

    fn rescore(&mut self, score_type: ScoreType) {
        self.confidences[0] = score_type.aggregate(&self.confidences[2..]);
    }
}

/// Everything a backend found in one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognition {
    pub plates: Vec<Plate>,
    /// Vehicles without a readable plate
    pub cars: Vec<Car>,
}

impl Recognition {
    pub fn num_plates(&self) -> usize {
        self.plates.len()
    }

    /// Cars with a plate plus cars without one.
    pub fn num_cars(&self) -> usize {
        self.plates.iter().filter(|p| p.car.is_some()).count() + self.cars.len()
    }

    /// Serialize into a successful result for frame `frame_id`.
    pub fn into_result(self, frame_id: u64, latency_ms: u64) -> Result<AlprResult> {
        let payload = Payload {
            frame_id,
            latency: latency_ms,
            plates: &self.plates,
            cars: &self.cars,
        };
        let json = serde_json::to_string(&payload)
            .map_err(|e| AlprError::Backend(format!("failed to serialize result: {}", e)))?;

        Ok(AlprResult::new(
            crate::error::code::OK,
            "OK",
            json,
            self.num_plates(),
            self.num_cars(),
        ))
    }
}

#[derive(Serialize)]
struct Payload<'a> {
    frame_id: u64,
    latency: u64,
    plates: &'a [Plate],
    #[serde(skip_serializing_if = "is_empty")]
    cars: &'a [Car],
}

fn is_empty<T>(items: &&[T]) -> bool {
    items.is_empty()
}

impl ScoreType {
    /// Fold per-character scores into one. Empty input scores 0.
    pub fn aggregate(self, scores: &[f32]) -> f32 {
        if scores.is_empty() {
            return 0.0;
        }
        let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
        let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        match self {
            ScoreType::Min => min,
            ScoreType::Max => max,
            ScoreType::Minmax => (min + max) / 2.0,
            ScoreType::Mean => scores.iter().sum::<f32>() / scores.len() as f32,
            ScoreType::Median => {
                let mut sorted = scores.to_vec();
                sorted.sort_by(f32::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
        }
    }
}

/// Thresholds and toggles applied to every recognition.
#[derive(Debug, Clone)]
pub struct RecognitionFilter {
    detect_minscore: f32,
    recogn_minscore: f32,
    score_type: ScoreType,
    roi: Option<Roi>,
    car_noplate_min_score: Option<f32>,
    country: bool,
    color: bool,
    make_model_year: bool,
    body_style: bool,
}

impl RecognitionFilter {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            detect_minscore: config.detect_minscore,
            recogn_minscore: config.recogn_minscore,
            score_type: config.recogn_score_type,
            roi: config.roi(),
            car_noplate_min_score: config
                .car_noplate_detect_enabled
                .then_some(config.car_noplate_detect_min_score),
            country: config.klass_lpci_enabled,
            color: config.klass_vcr_enabled,
            make_model_year: config.klass_vmmr_enabled,
            body_style: config.klass_vbsr_enabled,
        }
    }

    pub fn apply(&self, mut recognition: Recognition) -> Recognition {
        recognition.plates.retain_mut(|plate| {
            plate.rescore(self.score_type);
            plate.detection_confidence() >= self.detect_minscore
                && plate.recognition_score() >= self.recogn_minscore
                && self.in_roi(&plate.warped_box)
        });
        for plate in &mut recognition.plates {
            if !self.country {
                plate.country.clear();
            }
            if let Some(car) = &mut plate.car {
                self.strip_car(car);
            }
        }

        match self.car_noplate_min_score {
            Some(min_score) => {
                recognition
                    .cars
                    .retain(|car| car.confidence >= min_score && self.in_roi(&car.warped_box));
                for car in &mut recognition.cars {
                    self.strip_car(car);
                }
            }
            None => recognition.cars.clear(),
        }

        recognition
    }

    fn in_roi(&self, corners: &WarpedBox) -> bool {
        match &self.roi {
            Some(roi) => {
                let (x, y) = warped_box_center(corners);
                roi.contains(x, y)
            }
            None => true,
        }
    }

    fn strip_car(&self, car: &mut Car) {
        if !self.color {
            car.color.clear();
        }
        if !self.make_model_year {
            car.make_model_year.clear();
        }
        if !self.body_style {
            car.body_style.clear();
        }
    }
}

/// A scored, classed box before recognition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_id: u32,
}

/// Confidence-ordered non-maximum suppression within each class.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        let overlaps = keep
            .iter()
            .any(|k| k.class_id == det.class_id && k.bbox.iou(&det.bbox) > iou_threshold);
        if !overlaps {
            keep.push(det);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn plate(text: &str, detection: f32, chars: &[f32], x: f32) -> Plate {
        Plate::new(text, detection, chars, BoundingBox::new(x, 100.0, 100.0, 30.0).to_warped_box())
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 10.0, 10.0);
        assert!((a.iou(&b) - 25.0 / 175.0).abs() < 1e-6);
        assert_eq!(a.iou(&BoundingBox::new(20.0, 20.0, 5.0, 5.0)), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_score_aggregation() {
        let scores = [0.9, 0.5, 0.7, 0.3];
        assert_eq!(ScoreType::Min.aggregate(&scores), 0.3);
        assert_eq!(ScoreType::Max.aggregate(&scores), 0.9);
        assert!((ScoreType::Minmax.aggregate(&scores) - 0.6).abs() < 1e-6);
        assert!((ScoreType::Mean.aggregate(&scores) - 0.6).abs() < 1e-6);
        assert!((ScoreType::Median.aggregate(&scores) - 0.6).abs() < 1e-6);
        assert_eq!(ScoreType::Median.aggregate(&[0.2, 0.8, 0.4]), 0.4);
        assert_eq!(ScoreType::Mean.aggregate(&[]), 0.0);
    }

    #[test]
    fn test_counts_include_standalone_cars() {
        let recognition = Recognition {
            plates: vec![
                plate("ABC123", 0.9, &[0.9; 6], 0.0).with_car(Car::new(0.95, [0.0; 8])),
                plate("XYZ9", 0.9, &[0.9; 4], 200.0),
            ],
            cars: vec![Car::new(0.9, [0.0; 8])],
        };
        assert_eq!(recognition.num_plates(), 2);
        assert_eq!(recognition.num_cars(), 2);
    }

    #[test]
    fn test_payload_shape() {
        let digit = Digit {
            location: Rect {
                left: 1.0,
                top: 2.0,
                right: 11.0,
                bottom: 22.0,
            },
            confidence: 1.0,
            char_code: '3' as u32,
        };
        let recognition = Recognition {
            plates: vec![plate("3PEDLM4", 0.8, &[1.0, 0.5], 0.0).with_digits(vec![digit])],
            cars: Vec::new(),
        };
        let result = recognition.into_result(7, 12).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.num_plates(), 1);
        assert_eq!(result.num_cars(), 0);

        let json: serde_json::Value = serde_json::from_str(result.json()).unwrap();
        assert_eq!(json["frame_id"], 7);
        assert_eq!(json["latency"], 12);
        assert_eq!(json["plates"][0]["text"], "3PEDLM4");
        assert_eq!(json["plates"][0]["warpedBox"].as_array().unwrap().len(), 8);
        let confidences = json["plates"][0]["confidences"].as_array().unwrap();
        assert_eq!(confidences.len(), 4);
        assert_eq!(json["plates"][0]["digits"][0]["charCode"], 51);
        assert_eq!(json["plates"][0]["digits"][0]["location"]["right"], 11.0);
        assert!(json["plates"][0].get("car").is_none());
        assert!(json.get("cars").is_none());
    }

    #[test]
    fn test_empty_payload() {
        let result = Recognition::default().into_result(1, 0).unwrap();
        assert_eq!(result.json(), r#"{"frame_id":1,"latency":0,"plates":[]}"#);
    }

    #[test]
    fn test_filter_thresholds() {
        let config = EngineConfig {
            detect_minscore: 0.5,
            recogn_minscore: 0.6,
            recogn_score_type: ScoreType::Min,
            ..EngineConfig::default()
        };
        let filter = RecognitionFilter::from_config(&config);

        let recognition = Recognition {
            plates: vec![
                plate("KEEP", 0.9, &[0.7, 0.8], 0.0),
                plate("LOWDET", 0.4, &[0.9, 0.9], 0.0),
                plate("LOWREC", 0.9, &[0.9, 0.5], 0.0),
            ],
            cars: vec![Car::new(0.99, [0.0; 8])],
        };
        let filtered = filter.apply(recognition);

        let texts: Vec<&str> = filtered.plates.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["KEEP"]);
        assert_eq!(filtered.plates[0].recognition_score(), 0.7);
        // car_noplate detection is off by default
        assert!(filtered.cars.is_empty());
    }

    #[test]
    fn test_filter_roi_uses_box_center() {
        let config = EngineConfig {
            detect_roi: [0.0, 150.0, 0.0, 500.0],
            ..EngineConfig::default()
        };
        let filter = RecognitionFilter::from_config(&config);

        let recognition = Recognition {
            plates: vec![plate("INSIDE", 0.9, &[0.9], 50.0), plate("OUTSIDE", 0.9, &[0.9], 120.0)],
            cars: Vec::new(),
        };
        let filtered = filter.apply(recognition);
        assert_eq!(filtered.plates.len(), 1);
        assert_eq!(filtered.plates[0].text, "INSIDE");
    }

    #[test]
    fn test_filter_strips_disabled_classifiers() {
        let config = EngineConfig {
            car_noplate_detect_enabled: true,
            klass_vcr_enabled: true,
            ..EngineConfig::default()
        };
        let filter = RecognitionFilter::from_config(&config);

        let mut car = Car::new(0.9, [0.0; 8]);
        car.color.push(Candidate {
            confidence: 0.8,
            klass: 3,
            name: "white".into(),
        });
        car.body_style.push(Candidate {
            confidence: 0.7,
            klass: 1,
            name: "sedan".into(),
        });
        let mut p = plate("ABC", 0.9, &[0.9], 0.0).with_car(car.clone());
        p.country.push(Country {
            code: "FRA".into(),
            confidence: 0.9,
            klass: 12,
            name: "France".into(),
            state: None,
        });

        let weak_car = Car::new(0.5, [0.0; 8]);
        let filtered = filter.apply(Recognition {
            plates: vec![p],
            cars: vec![car, weak_car],
        });

        let plate_car = filtered.plates[0].car.as_ref().unwrap();
        assert_eq!(plate_car.color.len(), 1);
        assert!(plate_car.body_style.is_empty());
        assert!(filtered.plates[0].country.is_empty());
        assert_eq!(filtered.cars.len(), 1);
        assert!(filtered.cars[0].body_style.is_empty());
    }

    #[test]
    fn test_nms_per_class() {
        let det = |x: f32, confidence: f32, class_id: u32| Detection {
            bbox: BoundingBox::new(x, 0.0, 10.0, 10.0),
            confidence,
            class_id,
        };
        let kept = non_max_suppression(
            vec![det(0.0, 0.6, 0), det(1.0, 0.9, 0), det(1.0, 0.8, 1), det(50.0, 0.5, 0)],
            0.5,
        );
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].confidence, 0.9);
        assert!(kept.iter().any(|d| d.class_id == 1));
    }
}
