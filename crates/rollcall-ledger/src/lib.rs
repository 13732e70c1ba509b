//! rollcall-ledger — Once-per-day attendance ledger and reports.
//!
//! SQLite-backed ledger whose uniqueness constraint enforces one event per
//! person per calendar day, the report projection over it, report export, and
//! the station pipeline that ties the gate, matcher and ledger together.

pub mod export;
pub mod ledger;
pub mod notify;
pub mod report;
pub mod station;

pub use export::{export_report, ExportError, ExportFormat};
pub use ledger::{AppendOutcome, AttendanceEvent, Ledger, LedgerEntry, LedgerError};
pub use notify::{LogNotifier, Notification, Notifier, NotifyError, NullNotifier};
pub use report::{report, ReportFilter, ReportRow};
pub use station::{ExtractError, FaceExtractor, FaceOutcome, Station, StationError};
