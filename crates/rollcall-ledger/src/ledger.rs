//! Persistent attendance ledger using `SQLite`.
//!
//! # Schema
//!
//! The `attendance` table has columns `id`, `identity_id`, `name`, `roll_no`,
//! `department`, `date` (`YYYY-MM-DD`, local calendar day) and `time`
//! (`HH:MM:SS`). `UNIQUE(name, roll_no, date)` is the once-per-day rule;
//! [`Ledger::append`] relies on it instead of reading before writing, so
//! concurrent writers (threads or separate processes sharing the file) can
//! never both record the same person on the same day.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rollcall_core::{Identity, IdentityId};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id TEXT NOT NULL,
    name TEXT NOT NULL,
    roll_no TEXT NOT NULL,
    department TEXT NOT NULL,
    date TEXT NOT NULL,
    time TEXT NOT NULL,
    UNIQUE(name, roll_no, date)
);

CREATE INDEX IF NOT EXISTS idx_attendance_department ON attendance(department, date);
";

const SELECT_COLUMNS: &str =
    "SELECT id, identity_id, name, roll_no, department, date, time FROM attendance";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("attendance storage unavailable: {0}")]
    StorageUnavailable(#[from] rusqlite::Error),
    #[error("attendance storage unavailable: ledger lock poisoned")]
    Poisoned,
}

/// One recorded presence. Never updated or deleted by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: i64,
    pub identity_id: IdentityId,
    pub day: NaiveDate,
    pub time_of_day: NaiveTime,
    pub recorded_at: NaiveDateTime,
}

/// A ledger row: the event plus the person fields persisted with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub event: AttendanceEvent,
    pub name: String,
    pub roll_no: String,
    pub department: String,
}

/// Result of [`Ledger::append`]. Both variants are successes.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Recorded(AttendanceEvent),
    /// The person already has an event for that day; nothing was written.
    AlreadyRecorded,
}

impl AppendOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, AppendOutcome::Recorded(_))
    }
}

/// Durable once-per-day attendance ledger backed by `SQLite`.
#[derive(Debug)]
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Open (creating if needed) the ledger database at `path`.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::warn!(
                        dir = %parent.display(),
                        error = %e,
                        "cannot create ledger directory"
                    );
                }
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        tracing::info!(path = %path.display(), "attendance ledger opened");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn.lock().map_err(|_| LedgerError::Poisoned)
    }

    /// Record `identity` as present on `day`, unless already recorded.
    ///
    /// A single insert-if-absent statement: the uniqueness constraint decides,
    /// and the affected-row count tells which way it went. Seconds precision.
    pub fn append(
        &self,
        identity: &Identity,
        day: NaiveDate,
        time: NaiveTime,
    ) -> Result<AppendOutcome, LedgerError> {
        let time = time.with_nanosecond(0).unwrap_or(time);
        let conn = self.lock()?;

        let inserted = conn.execute(
            "INSERT INTO attendance (identity_id, name, roll_no, department, date, time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name, roll_no, date) DO NOTHING",
            params![
                identity.id.as_str(),
                identity.display_name(),
                identity.external_reference(),
                identity.group(),
                day.format(DATE_FORMAT).to_string(),
                time.format(TIME_FORMAT).to_string(),
            ],
        )?;

        if inserted == 0 {
            tracing::info!(identity = %identity.id, %day, "attendance already recorded");
            return Ok(AppendOutcome::AlreadyRecorded);
        }

        let event = AttendanceEvent {
            id: conn.last_insert_rowid(),
            identity_id: identity.id.clone(),
            day,
            time_of_day: time,
            recorded_at: day.and_time(time),
        };
        tracing::info!(
            identity = %identity.id,
            event_id = event.id,
            %day,
            %time,
            "attendance recorded"
        );
        Ok(AppendOutcome::Recorded(event))
    }

    /// Events for one calendar day, in recorded order.
    pub fn query_day(&self, day: NaiveDate) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.query(Some(day), None)
    }

    /// Events for one group (department), in recorded order.
    pub fn query_group(&self, group: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.query(None, Some(group))
    }

    /// Events matching every given filter, ordered by recorded time then id.
    pub fn query(
        &self,
        day: Option<NaiveDate>,
        group: Option<&str>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut conditions = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(day) = day {
            values.push(day.format(DATE_FORMAT).to_string());
            conditions.push(format!("date = ?{}", values.len()));
        }
        if let Some(group) = group {
            values.push(group.to_string());
            conditions.push(format!("department = ?{}", values.len()));
        }

        let mut sql = SELECT_COLUMNS.to_string();
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY date ASC, time ASC, id ASC");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), entry_from_row)?;
        let entries = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Total number of recorded events.
    pub fn count(&self) -> Result<u64, LedgerError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM attendance", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let date: String = row.get(5)?;
    let time: String = row.get(6)?;
    let day = NaiveDate::parse_from_str(&date, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
    let time_of_day = NaiveTime::parse_from_str(&time, TIME_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;

    Ok(LedgerEntry {
        event: AttendanceEvent {
            id: row.get(0)?,
            identity_id: IdentityId(row.get(1)?),
            day,
            time_of_day,
            recorded_at: day.and_time(time_of_day),
        },
        name: row.get(2)?,
        roll_no: row.get(3)?,
        department: row.get(4)?,
    })
}

#[cfg(test)]
impl Ledger {
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), LedgerError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rollcall_core::{Descriptor, IdentityMetadata};
    use std::sync::{Arc, Barrier};

    pub(crate) fn identity(key: &str, name: &str, group: &str) -> Identity {
        Identity {
            id: IdentityId::from(key),
            metadata: IdentityMetadata {
                display_name: name.to_string(),
                external_reference: format!("R-{key}"),
                group: group.to_string(),
                contact: None,
            },
            descriptor: Descriptor::new(vec![0.0, 0.0]),
        }
    }

    pub(crate) fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    pub(crate) fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_second_append_same_day_already_recorded() {
        let ledger = Ledger::open_in_memory().unwrap();
        let x = identity("x.jpg", "X", "EE");
        let today = day("2024-03-01");

        let first = ledger.append(&x, today, at(9, 0)).unwrap();
        let second = ledger.append(&x, today, at(9, 5)).unwrap();

        assert!(first.is_recorded());
        assert_eq!(second, AppendOutcome::AlreadyRecorded);

        let events = ledger.query_day(today).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.time_of_day, at(9, 0));
    }

    #[test]
    fn test_next_day_records_again() {
        let ledger = Ledger::open_in_memory().unwrap();
        let x = identity("x.jpg", "X", "EE");

        assert!(ledger.append(&x, day("2024-03-01"), at(23, 59)).unwrap().is_recorded());
        assert!(ledger.append(&x, day("2024-03-02"), at(0, 1)).unwrap().is_recorded());
        assert_eq!(ledger.count().unwrap(), 2);
    }

    #[test]
    fn test_recorded_event_fields() {
        let ledger = Ledger::open_in_memory().unwrap();
        let x = identity("x.jpg", "X", "EE");
        let time = NaiveTime::from_hms_milli_opt(9, 15, 30, 750).unwrap();

        let AppendOutcome::Recorded(event) = ledger.append(&x, day("2024-03-01"), time).unwrap()
        else {
            panic!("expected Recorded");
        };
        assert_eq!(event.identity_id, x.id);
        assert_eq!(event.time_of_day, NaiveTime::from_hms_opt(9, 15, 30).unwrap());
        assert_eq!(event.recorded_at, day("2024-03-01").and_time(event.time_of_day));

        let stored = &ledger.query(None, None).unwrap()[0];
        assert_eq!(stored.event, event);
        assert_eq!(stored.roll_no, "R-x.jpg");
    }

    #[test]
    fn test_query_filters_compose_with_and() {
        let ledger = Ledger::open_in_memory().unwrap();
        let ee = identity("a.jpg", "A", "EE");
        let cs = identity("b.jpg", "B", "CS");
        ledger.append(&ee, day("2024-03-01"), at(9, 0)).unwrap();
        ledger.append(&cs, day("2024-03-01"), at(9, 1)).unwrap();
        ledger.append(&ee, day("2024-03-02"), at(9, 2)).unwrap();

        assert_eq!(ledger.query_group("EE").unwrap().len(), 2);
        assert_eq!(ledger.query_day(day("2024-03-01")).unwrap().len(), 2);
        let both = ledger.query(Some(day("2024-03-02")), Some("EE")).unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].name, "A");
        assert!(ledger.query(Some(day("2024-03-02")), Some("CS")).unwrap().is_empty());
    }

    #[test]
    fn test_query_group_is_parameterised() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.append(&identity("a.jpg", "A", "EE"), day("2024-03-01"), at(9, 0)).unwrap();
        let hostile = ledger.query_group("EE' OR '1'='1").unwrap();
        assert!(hostile.is_empty());
    }

    #[test]
    fn test_concurrent_appends_single_ledger() {
        const N: usize = 16;
        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let barrier = Arc::new(Barrier::new(N));
        let x = identity("x.jpg", "X", "EE");

        let handles: Vec<_> = (0..N)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                let barrier = Arc::clone(&barrier);
                let x = x.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    ledger.append(&x, day("2024-03-01"), at(9, i as u32)).unwrap()
                })
            })
            .collect();

        let outcomes: Vec<AppendOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let recorded = outcomes.iter().filter(|o| o.is_recorded()).count();
        assert_eq!(recorded, 1);
        assert_eq!(
            outcomes.iter().filter(|o| **o == AppendOutcome::AlreadyRecorded).count(),
            N - 1
        );
        assert_eq!(ledger.count().unwrap(), 1);
    }

    #[test]
    fn test_concurrent_appends_across_connections() {
        const N: usize = 8;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.db");
        let ledgers = [
            Arc::new(Ledger::open(&path).unwrap()),
            Arc::new(Ledger::open(&path).unwrap()),
        ];
        let barrier = Arc::new(Barrier::new(N));
        let x = identity("x.jpg", "X", "EE");

        let handles: Vec<_> = (0..N)
            .map(|i| {
                let ledger = Arc::clone(&ledgers[i % 2]);
                let barrier = Arc::clone(&barrier);
                let x = x.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    ledger.append(&x, day("2024-03-01"), at(10, i as u32)).unwrap()
                })
            })
            .collect();

        let recorded = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(AppendOutcome::is_recorded)
            .count();
        assert_eq!(recorded, 1);
        assert_eq!(ledgers[0].count().unwrap(), 1);
        assert_eq!(ledgers[1].count().unwrap(), 1);
    }

    #[test]
    fn test_reopen_keeps_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("attendance.db");
        let x = identity("x.jpg", "X", "EE");
        {
            let ledger = Ledger::open(&path).unwrap();
            ledger.append(&x, day("2024-03-01"), at(9, 0)).unwrap();
        }
        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(
            ledger.append(&x, day("2024-03-01"), at(11, 0)).unwrap(),
            AppendOutcome::AlreadyRecorded
        );
    }

    #[test]
    fn test_open_under_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let err = Ledger::open(&blocker.join("attendance.db")).unwrap_err();
        assert!(matches!(err, LedgerError::StorageUnavailable(_)));
    }
}
