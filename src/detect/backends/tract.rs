#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tract_onnx::prelude::*;

use crate::detect::backend::{PlateDetector, TextRecognizer};
use crate::detect::result::{Recognition, RegionDetection};
use crate::error::{DetectError, RecognitionError};
use crate::frame::{BoundingRegion, Frame};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>>;

const DETECTOR_INPUT: u32 = 640;
const NMS_IOU: f32 = 0.45;

fn load_plan(model_path: &Path, shape: [usize; 4]) -> Result<Plan> {
    tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(
                f32::datum_type(),
                tvec!(shape[0], shape[1], shape[2], shape[3]),
            ),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

/// YOLO-style single-class plate detector.
///
/// Expects a `[1, 3, 640, 640]` input and a `[1, 5, N]` output of
/// `(cx, cy, w, h, score)` rows in input pixel space.
pub struct TractPlateDetector {
    model: Plan,
}

impl TractPlateDetector {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let side = DETECTOR_INPUT as usize;
        let model = load_plan(model_path.as_ref(), [1, 3, side, side])?;
        Ok(Self { model })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor, DetectError> {
        let resized = frame
            .resized(DETECTOR_INPUT, DETECTOR_INPUT)
            .map_err(|e| DetectError::InvalidInput(e.to_string()))?;
        let pixels = resized.pixels();
        let side = DETECTOR_INPUT as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            pixels[(y * side + x) * 3 + c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }
}

impl PlateDetector for TractPlateDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(
        &mut self,
        frame: &Frame,
        min_confidence: f32,
    ) -> Result<Vec<RegionDetection>, DetectError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(DetectError::InvalidInput("empty frame".to_string()));
        }
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| DetectError::Inference(e.to_string()))?;
        let output = outputs
            .first()
            .ok_or_else(|| DetectError::Inference("model produced no outputs".to_string()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| DetectError::Inference(e.to_string()))?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[1] < 5 {
            return Err(DetectError::Inference(format!(
                "unexpected detector output shape {:?}",
                shape
            )));
        }

        let sx = frame.width as f32 / DETECTOR_INPUT as f32;
        let sy = frame.height as f32 / DETECTOR_INPUT as f32;
        let mut candidates = Vec::new();
        for i in 0..shape[2] {
            let score = view[[0, 4, i]];
            if score < min_confidence {
                continue;
            }
            let (cx, cy) = (view[[0, 0, i]], view[[0, 1, i]]);
            let (w, h) = (view[[0, 2, i]], view[[0, 3, i]]);
            candidates.push(RegionDetection {
                region: BoundingRegion::new(
                    ((cx - w / 2.0) * sx).round() as i32,
                    ((cy - h / 2.0) * sy).round() as i32,
                    ((cx + w / 2.0) * sx).round() as i32,
                    ((cy + h / 2.0) * sy).round() as i32,
                ),
                confidence: score,
            });
        }
        Ok(non_max_suppression(candidates, NMS_IOU))
    }
}

fn iou(a: &BoundingRegion, b: &BoundingRegion) -> f32 {
    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0) as f32;
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0) as f32;
    let inter = ix * iy;
    let union = (a.width() * a.height()) as f32 + (b.width() * b.height()) as f32 - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

fn non_max_suppression(mut candidates: Vec<RegionDetection>, threshold: f32) -> Vec<RegionDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RegionDetection> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(&k.region, &candidate.region) <= threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Recognizer model description, read from the YAML file shipped with the model.
#[derive(Clone, Debug, Deserialize)]
pub struct OcrModelConfig {
    pub max_plate_slots: usize,
    pub alphabet: String,
    pub pad_char: char,
    pub img_height: u32,
    pub img_width: u32,
    #[serde(default = "default_color_mode")]
    pub image_color_mode: String,
}

fn default_color_mode() -> String {
    "grayscale".to_string()
}

impl OcrModelConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read OCR config {}", path.display()))?;
        let config: OcrModelConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse OCR config {}", path.display()))?;
        if config.alphabet.is_empty() || config.max_plate_slots == 0 {
            return Err(anyhow!("OCR config {} has an empty alphabet", path.display()));
        }
        Ok(config)
    }

    fn channels(&self) -> usize {
        if self.image_color_mode.eq_ignore_ascii_case("rgb") {
            3
        } else {
            1
        }
    }
}

/// Fixed-slot plate OCR: one softmax over the alphabet per character slot.
pub struct TractRecognizer {
    model: Plan,
    config: OcrModelConfig,
    alphabet: Vec<char>,
}

impl TractRecognizer {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(model_path: P, config_path: Q) -> Result<Self> {
        let config = OcrModelConfig::load(config_path)?;
        let model = load_plan(
            model_path.as_ref(),
            [
                1,
                config.img_height as usize,
                config.img_width as usize,
                config.channels(),
            ],
        )?;
        let alphabet = config.alphabet.chars().collect();
        Ok(Self {
            model,
            config,
            alphabet,
        })
    }

    fn build_input(&self, crop: &Frame) -> Result<Tensor, RecognitionError> {
        let (w, h) = (self.config.img_width, self.config.img_height);
        let resized = crop
            .resized(w, h)
            .map_err(|e| RecognitionError::MalformedImage(e.to_string()))?;
        let pixels = resized.pixels();
        let channels = self.config.channels();
        let (w, h) = (w as usize, h as usize);
        let input = tract_ndarray::Array4::from_shape_fn((1, h, w, channels), |(_, y, x, c)| {
            let idx = (y * w + x) * 3;
            if channels == 1 {
                let sum = pixels[idx] as u32 * 299 + pixels[idx + 1] as u32 * 587
                    + pixels[idx + 2] as u32 * 114;
                (sum / 1000) as f32
            } else {
                pixels[idx + c] as f32
            }
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, probs: &[f32]) -> (String, f32) {
        let classes = self.alphabet.len();
        let mut text = String::new();
        let mut confidences = Vec::with_capacity(self.config.max_plate_slots);
        for slot in probs.chunks(classes).take(self.config.max_plate_slots) {
            let (best, score) = slot
                .iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |acc, (i, &p)| if p > acc.1 { (i, p) } else { acc });
            confidences.push(score);
            let c = self.alphabet[best];
            if c != self.config.pad_char {
                text.push(c);
            }
        }
        let mean = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f32>() / confidences.len() as f32
        };
        (text, mean)
    }
}

impl TextRecognizer for TractRecognizer {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn recognize(&mut self, crop: &Frame) -> Result<Option<Recognition>, RecognitionError> {
        let input = self.build_input(crop)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| RecognitionError::Inference(e.to_string()))?;
        let output = outputs
            .first()
            .ok_or_else(|| RecognitionError::Inference("model produced no outputs".to_string()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| RecognitionError::Inference(e.to_string()))?;
        let probs: Vec<f32> = view.iter().copied().collect();
        if probs.len() < self.alphabet.len() * self.config.max_plate_slots {
            return Err(RecognitionError::Inference(format!(
                "expected {} slot scores, got {}",
                self.alphabet.len() * self.config.max_plate_slots,
                probs.len()
            )));
        }
        let (text, confidence) = self.decode(&probs);
        let text = text.to_uppercase();
        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Recognition { text, confidence }))
        }
    }
}
