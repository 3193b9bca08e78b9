use crate::frame::BoundingRegion;

/// One region reported by the plate detector.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionDetection {
    /// Pixel rectangle in frame coordinates. May extend past the frame edges.
    pub region: BoundingRegion,
    /// Detector confidence, 0..=1.
    pub confidence: f32,
}

/// Text read from one crop.
#[derive(Clone, Debug, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Mean per-character confidence, 0..=1.
    pub confidence: f32,
}

impl Recognition {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            confidence,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}
