//! Multi-camera supervisor.
//!
//! Runs one `StreamSession` per camera on its own thread. Each session keeps
//! its own stop flag, duplicate filter and counters; the supervisor only holds
//! the handles needed to stop and join them.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::session::{SessionReport, StreamSession};

struct RunningSession {
    url: String,
    started: Instant,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<SessionReport>,
}

impl RunningSession {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    fn join(self, camera_id: &str) -> Result<SessionReport> {
        self.handle
            .join()
            .map_err(|_| anyhow!("session thread for camera {} panicked", camera_id))
    }
}

/// Snapshot of one supervised camera.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub camera_id: String,
    pub url: String,
    pub uptime: Duration,
    pub running: bool,
}

#[derive(Default)]
pub struct SessionSupervisor {
    sessions: BTreeMap<String, RunningSession>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `session` for `camera_id` on a new thread.
    ///
    /// Fails if that camera already has a live session. A finished session for
    /// the same camera is joined and replaced.
    pub fn start(&mut self, camera_id: &str, session: StreamSession) -> Result<()> {
        if self.is_running(camera_id) {
            return Err(anyhow!("camera {} is already running", camera_id));
        }
        if let Some(previous) = self.sessions.remove(camera_id) {
            let report = previous.join(camera_id)?;
            log::info!(
                "camera {}: replacing finished session ({:?})",
                camera_id,
                report.reason
            );
        }

        let url = session.url().to_string();
        let stop = session.stop_handle();
        let handle = std::thread::Builder::new()
            .name(format!("session-{}", camera_id))
            .spawn(move || session.run())
            .map_err(|e| anyhow!("failed to spawn session thread for {}: {}", camera_id, e))?;
        log::info!("camera {}: session started ({})", camera_id, url);
        self.sessions.insert(
            camera_id.to_string(),
            RunningSession {
                url,
                started: Instant::now(),
                stop,
                handle,
            },
        );
        Ok(())
    }

    /// Signal the session to stop and wait for it. `None` if the camera is unknown.
    pub fn stop(&mut self, camera_id: &str) -> Result<Option<SessionReport>> {
        let Some(running) = self.sessions.remove(camera_id) else {
            return Ok(None);
        };
        running.stop.store(true, Ordering::SeqCst);
        let report = running.join(camera_id)?;
        log::info!("camera {}: session stopped ({:?})", camera_id, report.reason);
        Ok(Some(report))
    }

    pub fn is_running(&self, camera_id: &str) -> bool {
        self.sessions
            .get(camera_id)
            .is_some_and(RunningSession::is_running)
    }

    pub fn running_cameras(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|(_, s)| s.is_running())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn info(&self, camera_id: &str) -> Option<SessionInfo> {
        self.sessions.get(camera_id).map(|s| SessionInfo {
            camera_id: camera_id.to_string(),
            url: s.url.clone(),
            uptime: s.started.elapsed(),
            running: s.is_running(),
        })
    }

    /// Stop every session, including ones that already ended on their own.
    pub fn stop_all(&mut self) -> Vec<(String, Result<SessionReport>)> {
        for running in self.sessions.values() {
            running.stop.store(true, Ordering::SeqCst);
        }
        std::mem::take(&mut self.sessions)
            .into_iter()
            .map(|(id, running)| {
                let report = running.join(&id);
                (id, report)
            })
            .collect()
    }

    /// Block until every session has ended on its own.
    pub fn join_all(&mut self) -> Vec<(String, Result<SessionReport>)> {
        std::mem::take(&mut self.sessions)
            .into_iter()
            .map(|(id, running)| {
                let report = running.join(&id);
                (id, report)
            })
            .collect()
    }
}

impl Drop for SessionSupervisor {
    fn drop(&mut self) {
        if !self.sessions.is_empty() {
            self.stop_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactStore;
    use crate::dedup::DuplicateFilter;
    use crate::detect::{StubDetector, StubRecognizer};
    use crate::ingest::{RtspConfig, RtspSource, ScriptedSource};
    use crate::persist::PersistenceGateway;
    use crate::router::{DetectionRouter, RoutePolicy};
    use crate::session::{PipelineSettings, TerminationReason};
    use crate::storage::InMemoryPlateStore;

    fn stub_session(camera_id: &str, dir: &std::path::Path) -> StreamSession {
        let source = RtspSource::new(RtspConfig {
            url: format!("stub://{}", camera_id),
            target_fps: 10,
            width: 160,
            height: 120,
        })
        .unwrap();
        let gateway = PersistenceGateway::new(
            Box::new(InMemoryPlateStore::new()),
            ArtifactStore::new(dir).unwrap(),
        );
        let router = DetectionRouter::new(
            gateway,
            Some(DuplicateFilter::default()),
            RoutePolicy::default(),
        );
        StreamSession::new(
            PipelineSettings::new(camera_id),
            Box::new(source),
            Box::new(StubDetector::new()),
            Box::new(StubRecognizer::default()),
            router,
        )
    }

    #[test]
    fn start_stop_and_query_sessions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut supervisor = SessionSupervisor::new();
        supervisor.start("gate-1", stub_session("gate-1", dir.path()))?;
        supervisor.start("gate-2", stub_session("gate-2", dir.path()))?;

        assert!(supervisor.is_running("gate-1"));
        assert!(supervisor
            .start("gate-1", stub_session("gate-1", dir.path()))
            .is_err());
        assert_eq!(supervisor.running_cameras(), vec!["gate-1", "gate-2"]);
        assert_eq!(supervisor.info("gate-2").unwrap().url, "stub://gate-2");

        let report = supervisor.stop("gate-1")?.expect("gate-1 was running");
        assert_eq!(report.reason, TerminationReason::Cancelled);
        assert!(!supervisor.is_running("gate-1"));
        assert!(supervisor.stop("gate-1")?.is_none());

        let rest = supervisor.stop_all();
        assert_eq!(rest.len(), 1);
        assert!(supervisor.running_cameras().is_empty());
        Ok(())
    }

    #[test]
    fn finished_session_can_be_restarted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut supervisor = SessionSupervisor::new();
        let unreachable = ScriptedSource::new("rtsp://down").unreachable();
        let gateway = PersistenceGateway::new(
            Box::new(InMemoryPlateStore::new()),
            ArtifactStore::new(dir.path())?,
        );
        let session = StreamSession::new(
            PipelineSettings::new("gate-3"),
            Box::new(unreachable),
            Box::new(StubDetector::new()),
            Box::new(StubRecognizer::default()),
            DetectionRouter::new(gateway, None, RoutePolicy::default()),
        );
        supervisor.start("gate-3", session)?;
        let finished = supervisor.join_all();
        assert!(matches!(
            finished[0].1.as_ref().map(|r| r.reason.clone()),
            Ok(TerminationReason::StartupFailed(_))
        ));

        supervisor.start("gate-3", stub_session("gate-3", dir.path()))?;
        assert!(supervisor.is_running("gate-3"));
        supervisor.stop_all();
        Ok(())
    }
}
