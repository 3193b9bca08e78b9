use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::artifact::DEFAULT_OUTPUT_DIR;
use crate::dedup::{DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_TIME_WINDOW};
use crate::ingest::RtspConfig;
use crate::router::RoutePolicy;
use crate::session::{
    PipelineSettings, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_MIN_CONFIDENCE,
    DEFAULT_RECONNECT_BACKOFF, DEFAULT_SKIP_FRAMES,
};
use crate::stats::DEFAULT_STATUS_INTERVAL;
use crate::storage::{DEFAULT_DB_PATH, DEFAULT_DB_TIMEOUT};

const DEFAULT_SOURCE_ID: &str = "cam-1";
const DEFAULT_STREAM_URL: &str = "stub://cam-1";
const DEFAULT_STREAM_FPS: u32 = 10;
const DEFAULT_STREAM_WIDTH: u32 = 640;
const DEFAULT_STREAM_HEIGHT: u32 = 480;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PlatewatchConfigFile {
    source_id: Option<String>,
    stream_url: Option<String>,
    detector_model: Option<PathBuf>,
    ocr_model: Option<PathBuf>,
    ocr_config: Option<PathBuf>,
    db_path: Option<String>,
    output_dir: Option<PathBuf>,
    skip_frames: Option<u32>,
    min_confidence: Option<f32>,
    duplicate_filter: Option<bool>,
    duplicate_window_secs: Option<u64>,
    similarity_threshold: Option<f64>,
    max_reconnect_attempts: Option<u32>,
    reconnect_backoff_secs: Option<u64>,
    status_interval_secs: Option<u64>,
    db_timeout_secs: Option<u64>,
    auto_cleanup_days: Option<u32>,
    persist_all: Option<bool>,
    keep_rejected_crops: Option<bool>,
    annotate: Option<bool>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatewatchConfig {
    pub source_id: String,
    pub stream_url: String,
    pub detector_model: Option<PathBuf>,
    pub ocr_model: Option<PathBuf>,
    pub ocr_config: Option<PathBuf>,
    pub db_path: String,
    pub output_dir: PathBuf,
    pub skip_frames: u32,
    pub min_confidence: f32,
    pub duplicate_filter: bool,
    pub duplicate_window: Duration,
    pub similarity_threshold: f64,
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff: Duration,
    pub status_interval: Duration,
    pub db_timeout: Duration,
    /// Delete observations older than this many days at startup.
    pub auto_cleanup_days: Option<u32>,
    /// Store invalid plates too, not only valid ones.
    pub persist_all: bool,
    pub keep_rejected_crops: bool,
    pub annotate: bool,
    pub stream: StreamSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for PlatewatchConfig {
    fn default() -> Self {
        Self::from_file(PlatewatchConfigFile::default())
    }
}

impl PlatewatchConfig {
    /// Load from `PLATEWATCH_CONFIG` (if set), apply env overrides, validate.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like `load`, with an explicit config file taking precedence over the env.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("PLATEWATCH_CONFIG").ok().map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => read_config_file(&path)?,
            None => PlatewatchConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PlatewatchConfigFile) -> Self {
        let stream = file.stream.unwrap_or_default();
        Self {
            source_id: file
                .source_id
                .unwrap_or_else(|| DEFAULT_SOURCE_ID.to_string()),
            stream_url: file
                .stream_url
                .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
            detector_model: file.detector_model,
            ocr_model: file.ocr_model,
            ocr_config: file.ocr_config,
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            output_dir: file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            skip_frames: file.skip_frames.unwrap_or(DEFAULT_SKIP_FRAMES),
            min_confidence: file.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
            duplicate_filter: file.duplicate_filter.unwrap_or(true),
            duplicate_window: file
                .duplicate_window_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIME_WINDOW),
            similarity_threshold: file
                .similarity_threshold
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
            max_reconnect_attempts: file
                .max_reconnect_attempts
                .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS),
            reconnect_backoff: file
                .reconnect_backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RECONNECT_BACKOFF),
            status_interval: file
                .status_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_STATUS_INTERVAL),
            db_timeout: file
                .db_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_DB_TIMEOUT),
            auto_cleanup_days: file.auto_cleanup_days.filter(|days| *days > 0),
            persist_all: file.persist_all.unwrap_or(false),
            keep_rejected_crops: file.keep_rejected_crops.unwrap_or(false),
            annotate: file.annotate.unwrap_or(false),
            stream: StreamSettings {
                width: stream.width.unwrap_or(DEFAULT_STREAM_WIDTH),
                height: stream.height.unwrap_or(DEFAULT_STREAM_HEIGHT),
                target_fps: stream.target_fps.unwrap_or(DEFAULT_STREAM_FPS),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(id) = env_string("PLATEWATCH_SOURCE_ID") {
            self.source_id = id;
        }
        if let Some(url) = env_string("PLATEWATCH_STREAM_URL") {
            self.stream_url = url;
        }
        if let Some(path) = env_string("PLATEWATCH_DB_PATH") {
            self.db_path = path;
        }
        if let Some(dir) = env_string("PLATEWATCH_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(skip) = env_string("PLATEWATCH_SKIP_FRAMES") {
            self.skip_frames = skip
                .parse()
                .map_err(|_| anyhow!("PLATEWATCH_SKIP_FRAMES must be a non-negative integer"))?;
        }
        if let Some(window) = env_string("PLATEWATCH_DUPLICATE_WINDOW_SECS") {
            let seconds: u64 = window.parse().map_err(|_| {
                anyhow!("PLATEWATCH_DUPLICATE_WINDOW_SECS must be an integer number of seconds")
            })?;
            self.duplicate_window = Duration::from_secs(seconds);
        }
        if let Some(flag) = env_string("PLATEWATCH_PERSIST_ALL") {
            self.persist_all = parse_bool(&flag)
                .ok_or_else(|| anyhow!("PLATEWATCH_PERSIST_ALL must be true or false"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_id.trim().is_empty() {
            return Err(anyhow!("source_id must not be empty"));
        }
        if self.stream_url.trim().is_empty() {
            return Err(anyhow!("stream_url must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(anyhow!("min_confidence must be within [0, 1]"));
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(anyhow!("similarity_threshold must be within (0, 1]"));
        }
        if self.duplicate_window.is_zero() {
            return Err(anyhow!("duplicate window must be greater than zero"));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(anyhow!("max_reconnect_attempts must be greater than zero"));
        }
        if self.stream.width == 0 || self.stream.height == 0 {
            return Err(anyhow!("stream width and height must be greater than zero"));
        }
        Ok(())
    }

    /// True when no model paths are configured and stub collaborators are used.
    pub fn uses_stub_models(&self) -> bool {
        self.detector_model.is_none() && self.ocr_model.is_none()
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            source_id: self.source_id.clone(),
            skip_frames: self.skip_frames,
            min_confidence: self.min_confidence,
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_backoff: self.reconnect_backoff,
            status_interval: self.status_interval,
        }
    }

    pub fn route_policy(&self) -> RoutePolicy {
        RoutePolicy {
            persist_only_valid: !self.persist_all,
            keep_rejected_crops: self.keep_rejected_crops,
        }
    }

    pub fn rtsp_config(&self) -> RtspConfig {
        RtspConfig {
            url: self.stream_url.clone(),
            target_fps: self.stream.target_fps,
            width: self.stream.width,
            height: self.stream.height,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_config_file(path: &Path) -> Result<PlatewatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
