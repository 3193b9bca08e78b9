use sha2::{Digest, Sha256};
use std::collections::VecDeque;

use crate::detect::backend::{PlateDetector, TextRecognizer};
use crate::detect::result::{Recognition, RegionDetection};
use crate::error::{DetectError, RecognitionError};
use crate::frame::{BoundingRegion, Frame};

/// Plates the stub recognizer cycles through. Mixes valid, invalid and near-duplicate reads.
const STUB_PLATES: &[&str] = &["30A-12345", "30A-12845", "51G 678.90", "3OI2345", "", "29C1234"];

/// Stub detector for `stub://` streams. Uses pixel hashing to notice scene changes
/// and reports one centred region whenever the frame differs from the previous one.
pub struct StubDetector {
    last_hash: Option<[u8; 32]>,
}

impl StubDetector {
    pub fn new() -> Self {
        Self { last_hash: None }
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PlateDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(
        &mut self,
        frame: &Frame,
        min_confidence: f32,
    ) -> Result<Vec<RegionDetection>, DetectError> {
        let current_hash: [u8; 32] = Sha256::digest(frame.pixels()).into();
        let changed = self.last_hash.is_some_and(|prev| prev != current_hash);
        self.last_hash = Some(current_hash);

        let confidence = 0.85;
        if !changed || confidence < min_confidence {
            return Ok(vec![]);
        }
        let (w, h) = (frame.width as i32, frame.height as i32);
        Ok(vec![RegionDetection {
            region: BoundingRegion::new(w * 3 / 8, h * 5 / 8, w * 5 / 8, h * 3 / 4),
            confidence,
        }])
    }
}

/// Stub recognizer that cycles through a fixed list of plate strings, repeating
/// each one a few times the way a plate lingers in view.
pub struct StubRecognizer {
    calls: usize,
    repeats: usize,
}

impl StubRecognizer {
    pub fn new(repeats: usize) -> Self {
        Self {
            calls: 0,
            repeats: repeats.max(1),
        }
    }
}

impl Default for StubRecognizer {
    fn default() -> Self {
        Self::new(3)
    }
}

impl TextRecognizer for StubRecognizer {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn recognize(&mut self, _crop: &Frame) -> Result<Option<Recognition>, RecognitionError> {
        let text = STUB_PLATES[(self.calls / self.repeats) % STUB_PLATES.len()];
        self.calls += 1;
        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Recognition::new(text, 0.9)))
        }
    }
}

/// Detector that replays a script, one entry per processed frame. Once the
/// script runs out it reports nothing.
#[derive(Default)]
pub struct ScriptedDetector {
    script: VecDeque<Result<Vec<RegionDetection>, DetectError>>,
    calls: usize,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_regions(mut self, regions: Vec<RegionDetection>) -> Self {
        self.script.push_back(Ok(regions));
        self
    }

    pub fn then_error(mut self, reason: &str) -> Self {
        self.script
            .push_back(Err(DetectError::Inference(reason.to_string())));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl PlateDetector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(
        &mut self,
        _frame: &Frame,
        min_confidence: f32,
    ) -> Result<Vec<RegionDetection>, DetectError> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(Ok(regions)) => Ok(regions
                .into_iter()
                .filter(|d| d.confidence >= min_confidence)
                .collect()),
            Some(Err(e)) => Err(e),
            None => Ok(vec![]),
        }
    }
}

/// Recognizer that replays a script, one entry per crop.
#[derive(Default)]
pub struct ScriptedRecognizer {
    script: VecDeque<Result<Option<Recognition>, RecognitionError>>,
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_text(mut self, text: &str, confidence: f32) -> Self {
        self.script
            .push_back(Ok(Some(Recognition::new(text, confidence))));
        self
    }

    pub fn then_nothing(mut self) -> Self {
        self.script.push_back(Ok(None));
        self
    }

    pub fn then_error(mut self, reason: &str) -> Self {
        self.script
            .push_back(Err(RecognitionError::Inference(reason.to_string())));
        self
    }
}

impl TextRecognizer for ScriptedRecognizer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn recognize(&mut self, _crop: &Frame) -> Result<Option<Recognition>, RecognitionError> {
        self.script.pop_front().unwrap_or(Ok(None))
    }
}
