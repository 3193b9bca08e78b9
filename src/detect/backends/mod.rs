pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{ScriptedDetector, ScriptedRecognizer, StubDetector, StubRecognizer};

#[cfg(feature = "backend-tract")]
pub use tract::{OcrModelConfig, TractPlateDetector, TractRecognizer};
