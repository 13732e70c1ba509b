//! Read-only report projection over the ledger.

use crate::ledger::{AttendanceEvent, Ledger, LedgerEntry, LedgerError};
use chrono::NaiveDate;
use rollcall_core::EnrollmentSnapshot;
use serde::{Deserialize, Serialize};

/// Report filters. Unset fields do not constrain; set fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportFilter {
    pub day: Option<NaiveDate>,
    pub group: Option<String>,
}

impl ReportFilter {
    pub fn day(mut self, day: NaiveDate) -> Self {
        self.day = Some(day);
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// An attendance event joined with the person's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub event: AttendanceEvent,
    pub name: String,
    pub roll_no: String,
    pub department: String,
    /// From the current enrollment snapshot; `None` if not enrolled any more.
    pub contact: Option<String>,
}

/// Run a filtered report, ordered by recorded time ascending.
///
/// An empty vector is a successful "nothing matched"; storage problems come
/// back as `Err`.
pub fn report(
    ledger: &Ledger,
    snapshot: &EnrollmentSnapshot,
    filter: &ReportFilter,
) -> Result<Vec<ReportRow>, LedgerError> {
    let entries = ledger.query(filter.day, filter.group.as_deref())?;
    let rows: Vec<ReportRow> = entries
        .into_iter()
        .map(|entry| join_identity(entry, snapshot))
        .collect();

    tracing::debug!(
        day = ?filter.day,
        group = ?filter.group,
        rows = rows.len(),
        "report generated"
    );
    Ok(rows)
}

fn join_identity(entry: LedgerEntry, snapshot: &EnrollmentSnapshot) -> ReportRow {
    // Only trust the snapshot's contact if it still describes the same person.
    let contact = snapshot
        .lookup(&entry.event.identity_id)
        .filter(|i| i.display_name() == entry.name && i.external_reference() == entry.roll_no)
        .and_then(|i| i.contact().map(str::to_string));

    ReportRow {
        event: entry.event,
        name: entry.name,
        roll_no: entry.roll_no,
        department: entry.department,
        contact,
    }
}
