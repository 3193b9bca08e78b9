//! Startup wiring shared by the daemon and the admin shell.
//!
//! Everything here runs before the session loop, so failures are fatal and
//! reported as `anyhow` errors with context.

use anyhow::{anyhow, Context, Result};
use std::path::Path;

use crate::annotate::AnnotatedFrameWriter;
use crate::artifact::ArtifactStore;
use crate::config::PlatewatchConfig;
use crate::dedup::DuplicateFilter;
use crate::detect::{PlateDetector, StubDetector, StubRecognizer, TextRecognizer};
use crate::ingest::RtspSource;
use crate::persist::PersistenceGateway;
use crate::router::DetectionRouter;
use crate::session::StreamSession;
use crate::storage::SqlitePlateStore;

/// Open the datastore and artifact tree and check the datastore answers.
pub fn open_gateway(cfg: &PlatewatchConfig) -> Result<PersistenceGateway> {
    let store = SqlitePlateStore::open(&cfg.db_path, cfg.db_timeout)
        .with_context(|| format!("datastore {} is unreachable", cfg.db_path))?;
    gateway_over(cfg, store)
}

/// Like `open_gateway`, but a missing datastore is an error and is not created.
pub fn open_admin_gateway(cfg: &PlatewatchConfig) -> Result<PersistenceGateway> {
    let store = SqlitePlateStore::open_existing(&cfg.db_path, cfg.db_timeout)
        .with_context(|| format!("datastore {} does not exist or is unreachable", cfg.db_path))?;
    gateway_over(cfg, store)
}

fn gateway_over(cfg: &PlatewatchConfig, store: SqlitePlateStore) -> Result<PersistenceGateway> {
    let artifacts = ArtifactStore::new(&cfg.output_dir)
        .with_context(|| format!("cannot prepare output dir {}", cfg.output_dir.display()))?;
    let gateway = PersistenceGateway::new(Box::new(store), artifacts);
    gateway
        .ping()
        .with_context(|| format!("datastore {} did not answer", cfg.db_path))?;
    Ok(gateway)
}

fn require_file(label: &str, path: Option<&Path>) -> Result<()> {
    let path = path.ok_or_else(|| anyhow!("{} path is required for live models", label))?;
    if !path.is_file() {
        return Err(anyhow!("{} not found: {}", label, path.display()));
    }
    Ok(())
}

/// Build the detector and recognizer the config asks for.
///
/// No model paths selects the stub collaborators. Model paths must all exist.
pub fn build_collaborators(
    cfg: &PlatewatchConfig,
) -> Result<(Box<dyn PlateDetector>, Box<dyn TextRecognizer>)> {
    if cfg.uses_stub_models() {
        log::warn!("no model paths configured; using stub detector and recognizer");
        return Ok((
            Box::new(StubDetector::new()),
            Box::new(StubRecognizer::default()),
        ));
    }
    require_file("detector model", cfg.detector_model.as_deref())?;
    require_file("OCR model", cfg.ocr_model.as_deref())?;
    require_file("OCR config", cfg.ocr_config.as_deref())?;
    load_model_backends(cfg)
}

#[cfg(feature = "backend-tract")]
fn load_model_backends(
    cfg: &PlatewatchConfig,
) -> Result<(Box<dyn PlateDetector>, Box<dyn TextRecognizer>)> {
    use crate::detect::backends::{TractPlateDetector, TractRecognizer};

    let (Some(det), Some(ocr), Some(ocr_cfg)) = (
        cfg.detector_model.as_ref(),
        cfg.ocr_model.as_ref(),
        cfg.ocr_config.as_ref(),
    ) else {
        return Err(anyhow!("detector and OCR model paths are required"));
    };
    let mut detector = TractPlateDetector::new(det)?;
    detector
        .warm_up()
        .map_err(|e| anyhow!("detector warm-up failed: {}", e))?;
    let recognizer = TractRecognizer::new(ocr, ocr_cfg)?;
    log::info!("loaded detector {} and OCR model {}", det.display(), ocr.display());
    Ok((Box::new(detector), Box::new(recognizer)))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model_backends(
    _cfg: &PlatewatchConfig,
) -> Result<(Box<dyn PlateDetector>, Box<dyn TextRecognizer>)> {
    Err(anyhow!(
        "model inference requires the backend-tract feature"
    ))
}

/// Assemble a ready-to-run session for the configured stream.
pub fn build_session(cfg: &PlatewatchConfig, gateway: PersistenceGateway) -> Result<StreamSession> {
    let (detector, recognizer) = build_collaborators(cfg)?;
    let source = RtspSource::new(cfg.rtsp_config())?;
    let filter = cfg
        .duplicate_filter
        .then(|| DuplicateFilter::new(cfg.duplicate_window, cfg.similarity_threshold));
    if filter.is_none() {
        log::warn!("[{}] duplicate filter disabled", cfg.source_id);
    }
    let router = DetectionRouter::new(gateway, filter, cfg.route_policy());
    let mut session = StreamSession::new(
        cfg.pipeline_settings(),
        Box::new(source),
        detector,
        recognizer,
        router,
    );
    if cfg.annotate {
        session = session.with_annotator(AnnotatedFrameWriter::new(&cfg.output_dir, &cfg.source_id)?);
    }
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(dir: &Path) -> PlatewatchConfig {
        PlatewatchConfig {
            db_path: dir.join("plates.db").display().to_string(),
            output_dir: dir.join("out"),
            ..PlatewatchConfig::default()
        }
    }

    #[test]
    fn stub_pipeline_builds_without_models() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = temp_config(dir.path());
        let gateway = open_gateway(&cfg)?;
        let session = build_session(&cfg, gateway)?;
        assert_eq!(session.source_id(), "cam-1");
        assert_eq!(session.url(), "stub://cam-1");
        Ok(())
    }

    #[test]
    fn admin_gateway_does_not_create_a_missing_datastore() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = temp_config(dir.path());
        assert!(open_admin_gateway(&cfg).is_err());
        assert!(!dir.path().join("plates.db").exists());

        open_gateway(&cfg)?;
        let gateway = open_admin_gateway(&cfg)?;
        assert_eq!(gateway.stats()?.total, 0);
        Ok(())
    }

    #[test]
    fn missing_model_file_is_fatal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = PlatewatchConfig {
            detector_model: Some(dir.path().join("missing.onnx")),
            ..temp_config(dir.path())
        };
        let err = build_collaborators(&cfg).err().expect("missing model must fail");
        assert!(err.to_string().contains("detector model not found"));
        Ok(())
    }
}
