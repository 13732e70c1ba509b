//! Attendance station: quality gate → extraction → matching → ledger.
//!
//! The capture loop hands a frame (and an extractor) to [`Station::attend`];
//! front ends that already ran the gate and extraction call
//! [`Station::attend_descriptors`]. Every face in a frame is matched and
//! recorded independently.

use crate::ledger::{AppendOutcome, AttendanceEvent, Ledger, LedgerError};
use crate::notify::{Notification, Notifier};
use crate::report::{self, ReportFilter, ReportRow};
use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::{
    identify_faces, Assessment, Descriptor, EnrollmentSnapshot, EnrollmentStore,
    EuclideanMatcher, Frame, IdentityId, MatchResult, QualityGate, RejectReason,
    DEFAULT_TOLERANCE,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("feature extraction failed: {0}")]
pub struct ExtractError(pub String);

/// External feature extractor: image in, zero or more descriptors out.
pub trait FaceExtractor {
    fn extract(&self, frame: &Frame) -> Result<Vec<Descriptor>, ExtractError>;
}

#[derive(Error, Debug)]
pub enum StationError {
    #[error("low quality capture: {0}")]
    LowQualityCapture(RejectReason),
    #[error("no face detected; face the camera and recapture")]
    NoFaceDetected,
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// What happened to one face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FaceOutcome {
    NoMatch,
    Recorded {
        identity_id: IdentityId,
        name: String,
        distance: f64,
        event: AttendanceEvent,
    },
    AlreadyRecorded {
        identity_id: IdentityId,
        name: String,
        distance: f64,
        day: NaiveDate,
    },
    /// This face could not be matched or recorded. Other faces in the same
    /// frame are unaffected.
    Failed { reason: String },
}

impl FaceOutcome {
    /// User-facing text for this outcome.
    pub fn message(&self) -> String {
        match self {
            FaceOutcome::NoMatch => "face not recognised; not enrolled or too far from any enrolled face".to_string(),
            FaceOutcome::Recorded { name, event, .. } => format!(
                "attendance marked for {name} at {}",
                event.time_of_day.format("%H:%M:%S")
            ),
            FaceOutcome::AlreadyRecorded { name, day, .. } => {
                format!("attendance already marked for {name} on {day}")
            }
            FaceOutcome::Failed { reason } => format!("face not processed: {reason}"),
        }
    }
}

pub struct Station {
    store: Arc<EnrollmentStore>,
    ledger: Ledger,
    gate: QualityGate,
    matcher: EuclideanMatcher,
    tolerance: f64,
    notifier: Box<dyn Notifier>,
}

impl Station {
    pub fn new(
        store: Arc<EnrollmentStore>,
        ledger: Ledger,
        gate: QualityGate,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            ledger,
            gate,
            matcher: EuclideanMatcher,
            tolerance: DEFAULT_TOLERANCE,
            notifier,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn store(&self) -> &Arc<EnrollmentStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run only the quality gate.
    pub fn assess(&self, frame: &Frame) -> Assessment {
        self.gate.assess(frame)
    }

    /// Full pipeline for one captured frame.
    ///
    /// A gate rejection returns before the extractor runs; a frame with no
    /// faces returns before anything is matched or written.
    pub fn attend(
        &self,
        frame: &Frame,
        extractor: &dyn FaceExtractor,
        at: NaiveDateTime,
    ) -> Result<Vec<FaceOutcome>, StationError> {
        if let Assessment::Reject(reason) = self.assess(frame) {
            tracing::info!(%reason, "station: capture rejected");
            return Err(StationError::LowQualityCapture(reason));
        }

        let descriptors = extractor.extract(frame)?;
        self.attend_descriptors(&descriptors, at)
    }

    /// Match and record already-extracted descriptors, one per face.
    pub fn attend_descriptors(
        &self,
        descriptors: &[Descriptor],
        at: NaiveDateTime,
    ) -> Result<Vec<FaceOutcome>, StationError> {
        if descriptors.is_empty() {
            return Err(StationError::NoFaceDetected);
        }

        let snapshot = self.store.snapshot();
        let matches = identify_faces(&self.matcher, descriptors, &snapshot, self.tolerance);

        let mut outcomes = Vec::with_capacity(matches.len());
        for (face, found) in matches.into_iter().enumerate() {
            let outcome = match found {
                Ok(found) => self.record(&snapshot, found, at).unwrap_or_else(|e| {
                    tracing::warn!(face, error = %e, "station: ledger write failed");
                    FaceOutcome::Failed {
                        reason: e.to_string(),
                    }
                }),
                Err(e) => {
                    tracing::warn!(face, error = %e, "station: face not matched");
                    FaceOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            tracing::info!(
                face,
                snapshot = snapshot.version(),
                outcome = %outcome.message(),
                "station: face processed"
            );
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn record(
        &self,
        snapshot: &EnrollmentSnapshot,
        found: Option<MatchResult>,
        at: NaiveDateTime,
    ) -> Result<FaceOutcome, LedgerError> {
        let Some(found) = found else {
            return Ok(FaceOutcome::NoMatch);
        };
        let Some(identity) = snapshot.lookup(&found.identity_id) else {
            return Ok(FaceOutcome::NoMatch);
        };

        let day = at.date();
        match self.ledger.append(identity, day, at.time())? {
            AppendOutcome::Recorded(event) => {
                if let Some(notification) = Notification::attendance_recorded(identity, &event) {
                    // The event is committed; delivery problems only get logged.
                    if let Err(e) = self.notifier.notify(&notification) {
                        tracing::warn!(error = %e, identity = %identity.id, "notification failed");
                    }
                }
                Ok(FaceOutcome::Recorded {
                    identity_id: identity.id.clone(),
                    name: identity.display_name().to_string(),
                    distance: found.distance,
                    event,
                })
            }
            AppendOutcome::AlreadyRecorded => Ok(FaceOutcome::AlreadyRecorded {
                identity_id: identity.id.clone(),
                name: identity.display_name().to_string(),
                distance: found.distance,
                day,
            }),
        }
    }

    /// Report over the ledger, joined with the current snapshot.
    pub fn report(&self, filter: &ReportFilter) -> Result<Vec<ReportRow>, LedgerError> {
        report::report(&self.ledger, &self.store.snapshot(), filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{NotifyError, NullNotifier};
    use rollcall_core::{EnrollmentSource, IdentityMetadata, MatchError, QualityConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn source(key: &str, name: &str, values: Vec<f64>, contact: Option<&str>) -> EnrollmentSource {
        EnrollmentSource {
            reference: key.into(),
            descriptors: vec![Descriptor::new(values)],
            metadata: IdentityMetadata {
                display_name: name.into(),
                external_reference: format!("R-{key}"),
                group: "EE".into(),
                contact: contact.map(str::to_string),
            },
        }
    }

    fn station_with(notifier: Box<dyn Notifier>) -> Station {
        let store = Arc::new(EnrollmentStore::new(2));
        store.reload(vec![
            source("a.jpg", "A", vec![0.3, 0.0], Some("a@example.edu")),
            source("b.jpg", "B", vec![0.0, 0.8], None),
        ]);
        Station::new(
            store,
            Ledger::open_in_memory().unwrap(),
            QualityGate::new(QualityConfig::default()),
            notifier,
        )
    }

    fn station() -> Station {
        station_with(Box::new(NullNotifier))
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    /// Counts calls and returns a fixed set of descriptors.
    struct FixedExtractor {
        calls: AtomicUsize,
        faces: Vec<Descriptor>,
    }

    impl FixedExtractor {
        fn new(faces: Vec<Vec<f64>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                faces: faces.into_iter().map(Descriptor::new).collect(),
            }
        }
    }

    impl FaceExtractor for FixedExtractor {
        fn extract(&self, _frame: &Frame) -> Result<Vec<Descriptor>, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.faces.clone())
        }
    }

    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<Notification>>>,
        fail: bool,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(notification.clone());
            if self.fail {
                Err(NotifyError::Delivery {
                    recipient: notification.recipient.clone(),
                    reason: "smtp down".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn sharp_frame() -> Frame {
        let mut data = vec![100u8; 25];
        data[12] = 200;
        Frame::from_luma(5, 5, data).unwrap()
    }

    fn blurry_frame() -> Frame {
        // Gentle ramp: tiny Laplacian variance, not dark.
        let data = (0..25u8).map(|i| 100 + i / 5).collect();
        Frame::from_luma(5, 5, data).unwrap()
    }

    #[test]
    fn test_matches_nearest_and_records() {
        let station = station();
        let outcomes = station.attend_descriptors(&[Descriptor::new(vec![0.0, 0.0])], at(9, 0)).unwrap();

        match &outcomes[0] {
            FaceOutcome::Recorded { identity_id, distance, .. } => {
                assert_eq!(identity_id, &IdentityId::from("a.jpg"));
                assert!((distance - 0.3).abs() < 1e-12);
            }
            other => panic!("expected Recorded, got {other:?}"),
        }
    }

    #[test]
    fn test_second_mark_same_day_already_recorded() {
        let station = station();
        let face = [Descriptor::new(vec![0.0, 0.0])];

        station.attend_descriptors(&face, at(9, 0)).unwrap();
        let second = station.attend_descriptors(&face, at(9, 5)).unwrap();

        assert!(matches!(second[0], FaceOutcome::AlreadyRecorded { .. }));
        assert_eq!(station.ledger().count().unwrap(), 1);
    }

    #[test]
    fn test_blurry_frame_never_reaches_extractor() {
        let station = station();
        let extractor = FixedExtractor::new(vec![vec![0.0, 0.0]]);

        let err = station.attend(&blurry_frame(), &extractor, at(9, 0)).unwrap_err();

        assert!(matches!(
            err,
            StationError::LowQualityCapture(RejectReason::TooBlurry { .. })
        ));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(station.ledger().count().unwrap(), 0);
    }

    #[test]
    fn test_no_face_no_write() {
        let station = station();
        let extractor = FixedExtractor::new(vec![]);

        let err = station.attend(&sharp_frame(), &extractor, at(9, 0)).unwrap_err();

        assert!(matches!(err, StationError::NoFaceDetected));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(station.ledger().count().unwrap(), 0);
    }

    #[test]
    fn test_multiple_faces_independent() {
        let station = station();
        let extractor = FixedExtractor::new(vec![vec![0.0, 0.0], vec![9.0, 9.0], vec![0.0, 0.75]]);

        let outcomes = station.attend(&sharp_frame(), &extractor, at(9, 0)).unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(&outcomes[0], FaceOutcome::Recorded { identity_id, .. } if identity_id.as_str() == "a.jpg"));
        assert_eq!(outcomes[1], FaceOutcome::NoMatch);
        assert!(matches!(&outcomes[2], FaceOutcome::Recorded { identity_id, .. } if identity_id.as_str() == "b.jpg"));
        assert_eq!(station.ledger().count().unwrap(), 2);
    }

    #[test]
    fn test_wrong_dimension_face_does_not_sink_the_others() {
        let station = station();
        let faces = [Descriptor::new(vec![0.0, 0.0]), Descriptor::new(vec![0.0, 0.0, 0.0])];

        let outcomes = station.attend_descriptors(&faces, at(9, 0)).unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(matches!(&outcomes[0], FaceOutcome::Recorded { identity_id, .. } if identity_id.as_str() == "a.jpg"));
        let expected = MatchError::DimensionMismatch {
            expected: 2,
            actual: 3,
        };
        assert_eq!(
            outcomes[1],
            FaceOutcome::Failed {
                reason: expected.to_string()
            }
        );
        assert_eq!(station.ledger().count().unwrap(), 1);
    }

    #[test]
    fn test_storage_failure_reported_per_face() {
        let station = station();
        station
            .ledger()
            .execute_batch(
                "CREATE TRIGGER refuse_b BEFORE INSERT ON attendance WHEN NEW.name = 'B'
                 BEGIN SELECT RAISE(ABORT, 'disk gone'); END;",
            )
            .unwrap();
        let faces = [Descriptor::new(vec![0.3, 0.0]), Descriptor::new(vec![0.0, 0.8])];

        let outcomes = station.attend_descriptors(&faces, at(9, 0)).unwrap();

        assert!(matches!(outcomes[0], FaceOutcome::Recorded { .. }));
        match &outcomes[1] {
            FaceOutcome::Failed { reason } => assert!(reason.contains("storage unavailable")),
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(station.ledger().count().unwrap(), 1);
    }

    #[test]
    fn test_notifier_failure_keeps_record() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let station = station_with(Box::new(RecordingNotifier {
            sent: Arc::clone(&sent),
            fail: true,
        }));

        let outcomes = station.attend_descriptors(&[Descriptor::new(vec![0.0, 0.0])], at(9, 0)).unwrap();

        assert!(matches!(outcomes[0], FaceOutcome::Recorded { .. }));
        assert_eq!(station.ledger().count().unwrap(), 1);
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_notifies_only_on_recorded_with_contact() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let station = station_with(Box::new(RecordingNotifier {
            sent: Arc::clone(&sent),
            fail: false,
        }));
        let a = [Descriptor::new(vec![0.3, 0.0])];
        let b = [Descriptor::new(vec![0.0, 0.8])];

        station.attend_descriptors(&a, at(9, 0)).unwrap();
        station.attend_descriptors(&a, at(9, 5)).unwrap();
        station.attend_descriptors(&b, at(9, 6)).unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "a@example.edu");
    }

    #[test]
    fn test_messages_are_distinct() {
        let station = station();
        let face = [Descriptor::new(vec![0.0, 0.0])];
        let first = station.attend_descriptors(&face, at(9, 0)).unwrap().remove(0);
        let second = station.attend_descriptors(&face, at(9, 5)).unwrap().remove(0);

        let messages = [first.message(), second.message(), FaceOutcome::NoMatch.message()];
        assert_ne!(messages[0], messages[1]);
        assert_ne!(messages[1], messages[2]);
        assert_ne!(StationError::NoFaceDetected.to_string(), messages[2]);
    }

    #[test]
    fn test_station_report_uses_current_snapshot() {
        let station = station();
        station.attend_descriptors(&[Descriptor::new(vec![0.3, 0.0])], at(9, 0)).unwrap();

        let rows = station.report(&ReportFilter::default().group("EE")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].contact.as_deref(), Some("a@example.edu"));
    }

    #[test]
    fn test_outcome_json_shape() {
        let json = serde_json::to_value(FaceOutcome::NoMatch).unwrap();
        assert_eq!(json["outcome"], "no_match");
    }
}
