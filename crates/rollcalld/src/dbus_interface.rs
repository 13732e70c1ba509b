use crate::engine::{EngineError, EngineHandle};
use chrono::{Local, NaiveDate};
use rollcall_core::{Assessment, Descriptor, Frame};
use rollcall_ledger::ReportFilter;
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    engine: EngineHandle,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn failed(e: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// Empty string means "no filter".
fn parse_filter(day: &str, group: &str) -> zbus::fdo::Result<ReportFilter> {
    let day = match day.trim() {
        "" => None,
        d => Some(NaiveDate::parse_from_str(d, "%Y-%m-%d").map_err(|e| {
            zbus::fdo::Error::InvalidArgs(format!("day must be YYYY-MM-DD: {e}"))
        })?),
    };
    let group = match group.trim() {
        "" => None,
        g => Some(g.to_string()),
    };
    Ok(ReportFilter { day, group })
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Mark attendance for every face descriptor in `descriptors_json`
    /// (a JSON array of arrays). Returns the per-face outcomes as JSON.
    async fn mark(&self, descriptors_json: &str) -> zbus::fdo::Result<String> {
        let descriptors: Vec<Descriptor> = serde_json::from_str(descriptors_json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("descriptors: {e}")))?;
        tracing::info!(faces = descriptors.len(), "mark requested");

        let now = Local::now().naive_local();
        let outcomes = self.engine.mark(descriptors, now).await.map_err(|e| {
            tracing::warn!(error = %e, "mark failed");
            failed(e)
        })?;
        to_json(&outcomes)
    }

    /// Run the capture quality gate on a grayscale frame.
    /// Returns `"accept"` or the rejection message.
    async fn assess(&self, width: u32, height: u32, pixels: Vec<u8>) -> zbus::fdo::Result<String> {
        let frame = Frame::from_luma(width, height, pixels)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(EngineError::from(e).to_string()))?;
        match self.engine.assess(frame).await.map_err(failed)? {
            Assessment::Accept { sharpness } => {
                tracing::debug!(sharpness, "assess: accepted");
                Ok("accept".into())
            }
            Assessment::Reject(reason) => Ok(reason.to_string()),
        }
    }

    /// Attendance report as JSON rows. Empty `day`/`group` disables that filter.
    async fn report(&self, day: &str, group: &str) -> zbus::fdo::Result<String> {
        let filter = parse_filter(day, group)?;
        tracing::info!(day = ?filter.day, group = ?filter.group, "report requested");
        let rows = self.engine.report(filter).await.map_err(failed)?;
        to_json(&rows)
    }

    /// Reload roster and descriptors; returns the reload summary as JSON.
    async fn reload(&self) -> zbus::fdo::Result<String> {
        tracing::info!("reload requested");
        let summary = self.engine.reload().await.map_err(failed)?;
        to_json(&summary)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(failed)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "snapshot_version": status.snapshot_version,
            "enrolled": status.enrolled,
            "events": status.events,
            "tolerance": status.tolerance,
            "descriptor_dim": status.descriptor_dim,
        })
        .to_string())
    }
}
