//! platewatchd - stream plate detection daemon
//!
//! This daemon:
//! 1. Loads configuration (file, `PLATEWATCH_*` env, then flags)
//! 2. Checks the datastore and runs the optional auto-cleanup
//! 3. Loads the detector and recognizer
//! 4. Runs one session per camera until Ctrl-C or stream exhaustion
//!
//! Startup failures exit non-zero before any stream is opened.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use plate_watch::pipeline::{build_session, open_gateway};
use plate_watch::{PlatewatchConfig, SessionReport, SessionSupervisor};

#[derive(Parser, Debug)]
#[command(name = "platewatchd", about = "Stream license plate detection daemon")]
struct Args {
    /// JSON or TOML config file
    #[arg(long, env = "PLATEWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Camera / stream identity
    #[arg(long)]
    source_id: Option<String>,
    /// Stream URL (rtsp://... or stub://...)
    #[arg(long)]
    stream_url: Option<String>,
    /// Plate detector ONNX model
    #[arg(long)]
    model: Option<PathBuf>,
    /// Plate OCR ONNX model
    #[arg(long)]
    ocr_model: Option<PathBuf>,
    /// Plate OCR model config (YAML)
    #[arg(long)]
    ocr_config: Option<PathBuf>,
    #[arg(long)]
    db: Option<String>,
    /// Directory for crops and annotated frames
    #[arg(long)]
    output: Option<PathBuf>,
    /// Frames passed through between two processed frames
    #[arg(long)]
    skip_frames: Option<u32>,
    #[arg(long)]
    min_confidence: Option<f32>,
    /// Duplicate window in seconds
    #[arg(long)]
    duplicate_window: Option<u64>,
    #[arg(long)]
    no_duplicate_filter: bool,
    /// Delete observations older than N days at startup
    #[arg(long)]
    auto_cleanup_days: Option<u32>,
    /// Store invalid plates as well as valid ones
    #[arg(long)]
    persist_all: bool,
    /// Save annotated frames
    #[arg(long)]
    annotate: bool,
    /// Additional camera as ID=URL; may be repeated
    #[arg(long = "camera", value_parser = parse_camera)]
    cameras: Vec<(String, String)>,
}

fn parse_camera(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((id, url)) if !id.trim().is_empty() && !url.trim().is_empty() => {
            Ok((id.trim().to_string(), url.trim().to_string()))
        }
        _ => Err(format!("expected ID=URL, got {:?}", value)),
    }
}

fn apply_args(cfg: &mut PlatewatchConfig, args: &Args) {
    if let Some(id) = &args.source_id {
        cfg.source_id = id.clone();
    }
    if let Some(url) = &args.stream_url {
        cfg.stream_url = url.clone();
    }
    if let Some(path) = &args.model {
        cfg.detector_model = Some(path.clone());
    }
    if let Some(path) = &args.ocr_model {
        cfg.ocr_model = Some(path.clone());
    }
    if let Some(path) = &args.ocr_config {
        cfg.ocr_config = Some(path.clone());
    }
    if let Some(db) = &args.db {
        cfg.db_path = db.clone();
    }
    if let Some(dir) = &args.output {
        cfg.output_dir = dir.clone();
    }
    if let Some(skip) = args.skip_frames {
        cfg.skip_frames = skip;
    }
    if let Some(conf) = args.min_confidence {
        cfg.min_confidence = conf;
    }
    if let Some(secs) = args.duplicate_window {
        cfg.duplicate_window = Duration::from_secs(secs);
    }
    if args.no_duplicate_filter {
        cfg.duplicate_filter = false;
    }
    if let Some(days) = args.auto_cleanup_days {
        cfg.auto_cleanup_days = (days > 0).then_some(days);
    }
    cfg.persist_all |= args.persist_all;
    cfg.annotate |= args.annotate;
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = run() {
        log::error!("platewatchd: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let mut cfg = PlatewatchConfig::load_from(args.config.as_deref())?;
    apply_args(&mut cfg, &args);
    cfg.validate()?;

    log::info!(
        "platewatchd {} | source={} | skip_frames={} | min_confidence={} | duplicates={} | store={}",
        env!("CARGO_PKG_VERSION"),
        cfg.source_id,
        cfg.skip_frames,
        cfg.min_confidence,
        if cfg.duplicate_filter {
            format!("{}s window", cfg.duplicate_window.as_secs())
        } else {
            "off".to_string()
        },
        if cfg.persist_all { "all plates" } else { "valid only" }
    );

    let maintenance = open_gateway(&cfg)?;
    if let Some(days) = cfg.auto_cleanup_days {
        let report = maintenance.cleanup_older_than(days)?;
        log::info!(
            "auto cleanup: {} observation(s) older than {} day(s) deleted, {} artifact(s) removed",
            report.rows,
            days,
            report.artifacts_removed
        );
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let mut cameras = vec![(cfg.source_id.clone(), cfg.stream_url.clone())];
    cameras.extend(args.cameras.iter().cloned());

    if cameras.len() == 1 {
        let session = build_session(&cfg, maintenance)?.with_stop_flag(stop);
        log::info!("detection loop started. Press Ctrl-C to stop.");
        return check_report(&session.run());
    }

    let mut supervisor = SessionSupervisor::new();
    for (camera_id, url) in &cameras {
        let camera_cfg = PlatewatchConfig {
            source_id: camera_id.clone(),
            stream_url: url.clone(),
            ..cfg.clone()
        };
        camera_cfg.validate()?;
        let session = build_session(&camera_cfg, open_gateway(&camera_cfg)?)?;
        supervisor.start(camera_id, session)?;
    }
    log::info!("{} camera sessions running. Press Ctrl-C to stop.", cameras.len());

    while !stop.load(Ordering::SeqCst) && !supervisor.running_cameras().is_empty() {
        std::thread::sleep(Duration::from_millis(200));
    }
    let mut failed = Vec::new();
    for (camera_id, result) in supervisor.stop_all() {
        match result.and_then(|report| check_report(&report)) {
            Ok(()) => {}
            Err(e) => {
                log::error!("camera {}: {:#}", camera_id, e);
                failed.push(camera_id);
            }
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("sessions ended with errors: {}", failed.join(", ")))
    }
}

fn check_report(report: &SessionReport) -> Result<()> {
    if report.reason.is_fatal() {
        return Err(anyhow!(
            "session {} terminated: {:?}",
            report.source_id,
            report.reason
        ));
    }
    Ok(())
}
