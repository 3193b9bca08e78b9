//! RTSP frame source.
//!
//! `stub://` URLs produce synthetic frames: a static road scene with a light
//! pixel jitter and a "vehicle" block that moves every few frames. Any other
//! URL is decoded through GStreamer (feature `rtsp-gstreamer`).

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
use rand::Rng;
#[cfg(feature = "rtsp-gstreamer")]
use std::time::Duration;

use crate::error::SourceError;
use crate::frame::Frame;
use crate::ingest::FrameSource;

/// Configuration for an RTSP source.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// Stream URL, e.g. `rtsp://192.168.1.100:554/stream` or `stub://gate-1`.
    pub url: String,
    /// Expected frame rate. Only used to size the read timeout.
    pub target_fps: u32,
    /// Frame width for synthetic frames.
    pub width: u32,
    /// Frame height for synthetic frames.
    pub height: u32,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://localhost:554/stream".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// Statistics for an RTSP source.
#[derive(Clone, Debug, Default)]
pub struct RtspStats {
    pub frames_captured: u64,
    pub opens: u64,
}

/// RTSP frame source. Synthetic for `stub://`, GStreamer otherwise.
pub struct RtspSource {
    config: RtspConfig,
    backend: Option<RtspBackend>,
    stats: RtspStats,
}

enum RtspBackend {
    Synthetic(SyntheticStream),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerStream),
}

impl RtspSource {
    /// Check the URL scheme is supported. Does not connect.
    pub fn new(config: RtspConfig) -> Result<Self, SourceError> {
        if !config.url.starts_with("stub://") && !cfg!(feature = "rtsp-gstreamer") {
            return Err(SourceError::Unsupported(format!(
                "{} (live streams require the rtsp-gstreamer feature)",
                config.url
            )));
        }
        if config.width == 0 || config.height == 0 {
            return Err(SourceError::Open {
                url: config.url.clone(),
                reason: "frame size must be non-zero".to_string(),
            });
        }
        Ok(Self {
            config,
            backend: None,
            stats: RtspStats::default(),
        })
    }

    pub fn stats(&self) -> &RtspStats {
        &self.stats
    }

    fn is_synthetic(&self) -> bool {
        self.config.url.starts_with("stub://")
    }
}

impl FrameSource for RtspSource {
    fn url(&self) -> &str {
        &self.config.url
    }

    fn open(&mut self) -> Result<(), SourceError> {
        self.close();
        let backend = if self.is_synthetic() {
            RtspBackend::Synthetic(SyntheticStream::new(self.config.width, self.config.height))
        } else {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                RtspBackend::Gstreamer(GstreamerStream::start(&self.config).map_err(|e| {
                    SourceError::Open {
                        url: self.config.url.clone(),
                        reason: format!("{:#}", e),
                    }
                })?)
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                return Err(SourceError::Unsupported(self.config.url.clone()));
            }
        };
        self.backend = Some(backend);
        self.stats.opens += 1;
        log::info!("RtspSource: connected to {}", self.config.url);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let frame = match self.backend.as_mut().ok_or(SourceError::NotOpen)? {
            RtspBackend::Synthetic(stream) => Some(stream.next_frame()?),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(stream) => stream.next_frame(&self.config)?,
        };
        if frame.is_some() {
            self.stats.frames_captured += 1;
        }
        Ok(frame)
    }

    fn close(&mut self) {
        #[cfg(feature = "rtsp-gstreamer")]
        if let Some(RtspBackend::Gstreamer(stream)) = &self.backend {
            stream.stop();
        }
        self.backend = None;
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

const VEHICLE_EVERY: u64 = 6;

struct SyntheticStream {
    width: u32,
    height: u32,
    frame_count: u64,
}

impl SyntheticStream {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_count: 0,
        }
    }

    fn next_frame(&mut self) -> Result<Frame, SourceError> {
        self.frame_count += 1;
        let mut rng = rand::thread_rng();
        let (w, h) = (self.width as usize, self.height as usize);
        let mut pixels = vec![0u8; w * h * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let y = i / w;
            let base = if y > h / 2 { 70 } else { 150 };
            let jitter: u8 = rng.gen_range(0..4);
            px.copy_from_slice(&[base + jitter, base + jitter, base + jitter]);
        }

        // Vehicle block, shifted once per VEHICLE_EVERY frames.
        let slot = (self.frame_count / VEHICLE_EVERY) as usize;
        let (bw, bh) = (w / 4, h / 6);
        let x0 = (slot * bw / 2) % (w - bw).max(1);
        let y0 = h * 5 / 8;
        for y in y0..(y0 + bh).min(h) {
            for x in x0..(x0 + bw).min(w) {
                let idx = (y * w + x) * 3;
                pixels[idx..idx + 3].copy_from_slice(&[230, 230, 230]);
            }
        }

        Frame::rgb(pixels, self.width, self.height).map_err(|e| SourceError::Read(e.to_string()))
    }
}

// ----------------------------------------------------------------------------
// Live source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerStream {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerStream {
    fn start(config: &RtspConfig) -> anyhow::Result<Self> {
        use gstreamer::prelude::*;

        gstreamer::init().context("initialize gstreamer")?;
        let description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            config.url
        );
        let pipeline = gstreamer::parse::launch(&description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("RTSP pipeline is not a Pipeline"))?;
        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;
        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        Ok(Self { pipeline, appsink })
    }

    fn stop(&self) {
        use gstreamer::prelude::*;
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }

    /// `Ok(None)` at end of stream.
    fn next_frame(&mut self, config: &RtspConfig) -> Result<Option<Frame>, SourceError> {
        use gstreamer::prelude::*;

        if let Some(bus) = self.pipeline.bus() {
            while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
                match message.view() {
                    gstreamer::MessageView::Error(err) => {
                        return Err(SourceError::Read(format!("gstreamer: {}", err.error())));
                    }
                    gstreamer::MessageView::Eos(..) => return Ok(None),
                    _ => {}
                }
            }
        }

        let timeout = read_timeout(config.target_fps);
        let sample = self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64))
            .ok_or_else(|| SourceError::Read("stream stalled".to_string()))?;
        sample_to_frame(&sample)
            .map(Some)
            .map_err(|e| SourceError::Read(format!("{:#}", e)))
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn read_timeout(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        500
    } else {
        (1000 / target_fps).saturating_mul(4)
    };
    Duration::from_millis(base_ms.max(500) as u64)
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_frame(sample: &gstreamer::Sample) -> anyhow::Result<Frame> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = width as usize * 3;
    let stride = info.stride()[0] as usize;
    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("RTSP buffer row is out of bounds")?,
        );
    }
    Frame::rgb(pixels, width, height)
}
