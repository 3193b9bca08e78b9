//! Plate Watch
//!
//! Unattended license-plate capture from live video streams.
//!
//! # Pipeline
//!
//! One session per stream pulls frames, hands every `skip_frames + 1`'th frame
//! to the plate detector, reads each region with the text recognizer and routes
//! the result:
//!
//! 1. **Normalize & validate** (`plate`): canonical text plus a grammar check.
//! 2. **Duplicate suppression** (`dedup`): time-windowed, fuzzy, per session.
//! 3. **Routing** (`router`): decides what is stored and where.
//! 4. **Persistence** (`persist`): crop artifact plus datastore row, best effort.
//! 5. **Statistics** (`stats`): counters, status lines and a final summary.
//!
//! The session (`session`) owns the connection and the reconnect policy;
//! `supervisor` runs several sessions side by side without shared state.
//!
//! # Module Structure
//!
//! - `frame`: owned frames, regions and recognizer input preparation
//! - `ingest`: frame sources (RTSP, `stub://`, scripted)
//! - `detect`: detector and recognizer contracts and backends
//! - `storage`, `artifact`: datastore and artifact tree
//! - `config`: file + env configuration for the daemon

pub mod annotate;
pub mod artifact;
pub mod config;
pub mod dedup;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod observation;
pub mod persist;
pub mod pipeline;
pub mod plate;
pub mod router;
pub mod session;
pub mod stats;
pub mod storage;
pub mod supervisor;

pub use config::PlatewatchConfig;
pub use dedup::{DedupDecision, DedupStats, DuplicateFilter};
pub use detect::{PlateDetector, Recognition, RegionDetection, TextRecognizer};
pub use error::{DetectError, RecognitionError, SourceError, StoreError};
pub use frame::{BoundingRegion, Frame, PixelFormat};
pub use ingest::{FrameSource, RtspConfig, RtspSource};
pub use observation::Observation;
pub use persist::{DeleteReport, PersistenceGateway};
pub use plate::{normalize, validate, PlateText};
pub use router::{DetectionRouter, RouteOutcome, RoutePolicy};
pub use session::{PipelineSettings, SessionReport, SessionState, StreamSession, TerminationReason};
pub use stats::SessionStats;
pub use storage::{
    HourlyCounts, InMemoryPlateStore, PlateStore, SqlitePlateStore, StoredObservation, TimeRange,
};
pub use supervisor::SessionSupervisor;
