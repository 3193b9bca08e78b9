mod backend;
pub mod backends;
mod result;

pub use backend::{PlateDetector, TextRecognizer};
pub use backends::{ScriptedDetector, ScriptedRecognizer, StubDetector, StubRecognizer};
pub use result::{Recognition, RegionDetection};
