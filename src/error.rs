//! Typed failures at the external contracts.
//!
//! Each collaborator (frame source, detector, recognizer, datastore) reports
//! its own error type. The session loop and the router decide which of these
//! are absorbed and which terminate the session:
//!
//! | Error              | During startup | During streaming                      |
//! |--------------------|----------------|---------------------------------------|
//! | `SourceError`      | fatal          | reconnect, fatal once budget exceeded |
//! | `DetectError`      | -              | frame skipped, counted                |
//! | `RecognitionError` | -              | treated as absent text, counted       |
//! | `StoreError`       | fatal          | observation dropped, counted          |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open stream {url}: {reason}")]
    Open { url: String, reason: String },
    #[error("stream read failed: {0}")]
    Read(String),
    #[error("stream is not open")]
    NotOpen,
    #[error("unsupported stream url {0}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("detector rejected frame: {0}")]
    InvalidInput(String),
    #[error("detector inference failed: {0}")]
    Inference(String),
}

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("malformed crop: {0}")]
    MalformedImage(String),
    #[error("recognizer inference failed: {0}")]
    Inference(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("datastore unreachable: {0}")]
    Connect(String),
    #[error("datastore statement failed: {0}")]
    Execute(String),
    #[error("artifact write failed: {0}")]
    Artifact(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Execute(err.to_string())
    }
}
