//! Frame ingestion sources.
//!
//! A source is pull-based: the session opens it, reads frames one at a time and
//! closes it again before reconnecting. Sources never retry on their own; the
//! reconnect policy belongs to the session.
//!
//! - RTSP streams (IP cameras, feature `rtsp-gstreamer`)
//! - `stub://` synthetic streams
//! - Scripted sources for tests and demos

pub mod normalize;
pub mod rtsp;
pub mod scripted;

pub use rtsp::{RtspConfig, RtspSource};
pub use scripted::{ScriptedRead, ScriptedSource};

use crate::error::SourceError;
use crate::frame::Frame;

/// Pull-based frame source.
pub trait FrameSource: Send {
    /// Connection string, for logs.
    fn url(&self) -> &str;

    /// Connect, or reconnect after `close`.
    fn open(&mut self) -> Result<(), SourceError>;

    /// Next frame. `Ok(None)` means the stream ended.
    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Release the connection. Safe to call when already closed.
    fn close(&mut self);
}
