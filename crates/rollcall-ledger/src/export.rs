//! Report export to delimited text or JSON files.

use crate::report::ReportRow;
use chrono::NaiveDateTime;
use std::fmt;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;
use thiserror::Error;

const CSV_HEADER: [&str; 6] = ["id", "name", "roll_no", "department", "date", "time"];

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("failed to write report {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("unknown report format '{other}' (expected csv or json)")),
        }
    }
}

/// `attendance_report_YYYYMMDD_HHMMSS.<ext>`
pub fn report_file_name(format: ExportFormat, generated_at: NaiveDateTime) -> String {
    format!(
        "attendance_report_{}.{}",
        generated_at.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

/// Write `rows` into `dir`. Returns `None` without touching the filesystem
/// when there is nothing to export.
///
/// The report is written to a temporary file in `dir` and renamed into place,
/// so a failed export leaves no partial report behind.
pub fn export_report(
    rows: &[ReportRow],
    format: ExportFormat,
    dir: &Path,
    generated_at: NaiveDateTime,
) -> Result<Option<PathBuf>, ExportError> {
    if rows.is_empty() {
        return Ok(None);
    }

    let path = dir.join(report_file_name(format, generated_at));
    let io_err = |source| ExportError::Io {
        path: path.display().to_string(),
        source,
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        match format {
            ExportFormat::Csv => write_csv(&mut out, rows).map_err(io_err)?,
            ExportFormat::Json => serde_json::to_writer_pretty(&mut out, rows)?,
        }
        out.flush().map_err(io_err)?;
    }
    tmp.persist(&path).map_err(|e| io_err(e.error))?;

    tracing::info!(path = %path.display(), rows = rows.len(), %format, "report exported");
    Ok(Some(path))
}

fn write_csv<W: Write>(out: &mut W, rows: &[ReportRow]) -> std::io::Result<()> {
    writeln!(out, "{}", CSV_HEADER.join(","))?;
    for row in rows {
        let fields = [
            row.event.id.to_string(),
            row.name.clone(),
            row.roll_no.clone(),
            row.department.clone(),
            row.event.day.format("%Y-%m-%d").to_string(),
            row.event.time_of_day.format("%H:%M:%S").to_string(),
        ];
        let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        writeln!(out, "{}", line.join(","))?;
    }
    Ok(())
}

/// RFC 4180 quoting: wrap in quotes when the field holds a delimiter, quote
/// or line break; double embedded quotes.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
