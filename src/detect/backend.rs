use crate::detect::result::{Recognition, RegionDetection};
use crate::error::{DetectError, RecognitionError};
use crate::frame::Frame;

/// Plate detector contract.
///
/// Invoked synchronously from the session loop, once per processed frame.
/// Implementations own their model state; each session gets its own instance.
pub trait PlateDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Return every plate region at or above `min_confidence`.
    fn detect(
        &mut self,
        frame: &Frame,
        min_confidence: f32,
    ) -> Result<Vec<RegionDetection>, DetectError>;

    /// Optional warm-up hook, called once before streaming starts.
    fn warm_up(&mut self) -> Result<(), DetectError> {
        Ok(())
    }
}

/// Text recognizer contract.
///
/// Callers hand over an RGB24 crop already upscaled to the minimum readable
/// size (`frame::prepare_for_recognition`). `Ok(None)` means nothing legible.
pub trait TextRecognizer: Send {
    fn name(&self) -> &'static str;

    fn recognize(&mut self, crop: &Frame) -> Result<Option<Recognition>, RecognitionError>;
}
