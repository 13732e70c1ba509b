use crate::config::Config;
use chrono::NaiveDateTime;
use rollcall_core::frame::FrameError;
use rollcall_core::roster::RosterOrigin;
use rollcall_core::{
    Assessment, Descriptor, DescriptorFile, EnrollmentStore, Frame, QualityGate, Roster,
    RosterError,
};
use rollcall_ledger::{
    FaceOutcome, Ledger, LedgerError, LogNotifier, Notifier, NullNotifier, ReportFilter,
    ReportRow, Station, StationError,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Station(#[from] StationError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("enrollment reload failed: {0}")]
    Roster(#[from] RosterError),
    #[error("bad frame: {0}")]
    Frame(#[from] FrameError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of loading a roster + descriptor set into the store.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadSummary {
    pub version: u64,
    pub enrolled: usize,
    pub skipped: Vec<String>,
    pub builtin_roster: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub snapshot_version: u64,
    pub enrolled: usize,
    pub events: u64,
    pub tolerance: f64,
    pub descriptor_dim: usize,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Mark {
        descriptors: Vec<Descriptor>,
        at: NaiveDateTime,
        reply: oneshot::Sender<Result<Vec<FaceOutcome>, EngineError>>,
    },
    Assess {
        frame: Frame,
        reply: oneshot::Sender<Assessment>,
    },
    Report {
        filter: ReportFilter,
        reply: oneshot::Sender<Result<Vec<ReportRow>, EngineError>>,
    },
    Reload {
        reply: oneshot::Sender<Result<ReloadSummary, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<Result<EngineStatus, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Match and record each descriptor (one per detected face).
    pub async fn mark(
        &self,
        descriptors: Vec<Descriptor>,
        at: NaiveDateTime,
    ) -> Result<Vec<FaceOutcome>, EngineError> {
        self.request(|reply| EngineRequest::Mark {
            descriptors,
            at,
            reply,
        })
        .await?
    }

    /// Run the capture quality gate on a grayscale frame.
    pub async fn assess(&self, frame: Frame) -> Result<Assessment, EngineError> {
        self.request(|reply| EngineRequest::Assess { frame, reply })
            .await
    }

    pub async fn report(&self, filter: ReportFilter) -> Result<Vec<ReportRow>, EngineError> {
        self.request(|reply| EngineRequest::Report { filter, reply })
            .await?
    }

    /// Re-read the roster and descriptor files and swap in a new snapshot.
    pub async fn reload(&self) -> Result<ReloadSummary, EngineError> {
        self.request(|reply| EngineRequest::Reload { reply }).await?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await?
    }
}

/// Load the roster and descriptor files into `store`.
pub fn load_enrollment(
    store: &EnrollmentStore,
    roster_path: &Path,
    descriptors_path: &Path,
) -> Result<ReloadSummary, RosterError> {
    let roster = Roster::load(roster_path)?;
    let descriptors = DescriptorFile::load(descriptors_path)?;
    let snapshot = store.reload(roster.sources(&descriptors));

    Ok(ReloadSummary {
        version: snapshot.version(),
        enrolled: snapshot.len(),
        skipped: snapshot.warnings().iter().map(|w| w.to_string()).collect(),
        builtin_roster: roster.origin == RosterOrigin::BuiltinDefault,
    })
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the ledger and loads the first enrollment snapshot synchronously,
/// then enters a request loop. Fails fast at startup if the ledger cannot be
/// opened or the roster is malformed.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let ledger = Ledger::open(&config.db_path)?;

    let store = Arc::new(EnrollmentStore::new(config.descriptor_dim));
    let summary = load_enrollment(&store, &config.roster_path, &config.descriptors_path)?;
    tracing::info!(
        version = summary.version,
        enrolled = summary.enrolled,
        skipped = summary.skipped.len(),
        builtin_roster = summary.builtin_roster,
        "enrollment loaded"
    );

    let notifier: Box<dyn Notifier> = if config.notify_enabled {
        Box::new(LogNotifier)
    } else {
        tracing::info!("notifications disabled via ROLLCALL_NOTIFY=0");
        Box::new(NullNotifier)
    };

    let station = Station::new(store, ledger, QualityGate::new(config.quality()), notifier)
        .with_tolerance(config.tolerance);

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);
    let roster_path = config.roster_path.clone();
    let descriptors_path = config.descriptors_path.clone();

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Mark {
                        descriptors,
                        at,
                        reply,
                    } => {
                        let result = station
                            .attend_descriptors(&descriptors, at)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Assess { frame, reply } => {
                        let _ = reply.send(station.assess(&frame));
                    }
                    EngineRequest::Report { filter, reply } => {
                        let _ = reply.send(station.report(&filter).map_err(EngineError::from));
                    }
                    EngineRequest::Reload { reply } => {
                        let result =
                            load_enrollment(station.store(), &roster_path, &descriptors_path)
                                .map_err(EngineError::from);
                        if let Ok(summary) = &result {
                            tracing::info!(
                                version = summary.version,
                                enrolled = summary.enrolled,
                                "enrollment reloaded"
                            );
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(status(&station));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn status(station: &Station) -> Result<EngineStatus, EngineError> {
    let snapshot = station.store().snapshot();
    Ok(EngineStatus {
        snapshot_version: snapshot.version(),
        enrolled: snapshot.len(),
        events: station.ledger().count()?,
        tolerance: station.tolerance(),
        descriptor_dim: snapshot.dimension(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const ROSTER: &str = r#"
[[student]]
image_file = "a.jpg"
name = "A"
roll_no = "1"
department = "EE"

[[student]]
image_file = "b.jpg"
name = "B"
roll_no = "2"
department = "CS"
"#;

    fn config(dir: &std::path::Path) -> Config {
        std::fs::write(dir.join("roster.toml"), ROSTER).unwrap();
        std::fs::write(
            dir.join("descriptors.json"),
            r#"{"a.jpg": [[0.3, 0.0]], "b.jpg": [[0.0, 0.8]]}"#,
        )
        .unwrap();
        Config {
            db_path: dir.join("attendance.db"),
            roster_path: dir.join("roster.toml"),
            descriptors_path: dir.join("descriptors.json"),
            tolerance: 0.6,
            descriptor_dim: 2,
            sharpness_threshold: 100.0,
            dark_fraction: 0.0,
            notify_enabled: false,
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_mark_then_report() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_engine(&config(dir.path())).unwrap();

        let first = engine
            .mark(vec![Descriptor::new(vec![0.0, 0.0])], at(9, 0))
            .await
            .unwrap();
        assert!(matches!(first[0], FaceOutcome::Recorded { .. }));

        let again = engine
            .mark(vec![Descriptor::new(vec![0.0, 0.0])], at(9, 5))
            .await
            .unwrap();
        assert!(matches!(again[0], FaceOutcome::AlreadyRecorded { .. }));

        let rows = engine.report(ReportFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "A");

        let status = engine.status().await.unwrap();
        assert_eq!(status.events, 1);
        assert_eq!(status.enrolled, 2);
    }

    #[tokio::test]
    async fn test_mark_without_faces_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_engine(&config(dir.path())).unwrap();

        let err = engine.mark(vec![], at(9, 0)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Station(StationError::NoFaceDetected)
        ));
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let engine = spawn_engine(&cfg).unwrap();

        std::fs::write(&cfg.descriptors_path, r#"{"a.jpg": [[0.3, 0.0]]}"#).unwrap();
        let summary = engine.reload().await.unwrap();

        assert_eq!(summary.version, 2);
        assert_eq!(summary.enrolled, 1);
        assert_eq!(summary.skipped.len(), 1);
        assert!(!summary.builtin_roster);
    }

    #[tokio::test]
    async fn test_assess_rejects_flat_frame() {
        let dir = tempfile::tempdir().unwrap();
        let engine = spawn_engine(&config(dir.path())).unwrap();

        let frame = Frame::from_luma(8, 8, vec![128u8; 64]).unwrap();
        let assessment = engine.assess(frame).await.unwrap();
        assert!(!assessment.is_accept());
    }

    #[test]
    fn test_missing_roster_uses_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnrollmentStore::new(2);
        let summary = load_enrollment(
            &store,
            &dir.path().join("none.toml"),
            &dir.path().join("none.json"),
        )
        .unwrap();
        assert!(summary.builtin_roster);
        // The sample entry has no reference descriptors.
        assert_eq!(summary.enrolled, 0);
        assert_eq!(summary.skipped.len(), 1);
    }
}
