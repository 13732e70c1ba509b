use rollcall_core::quality::{QualityConfig, DEFAULT_SHARPNESS_THRESHOLD};
use rollcall_core::{DEFAULT_DESCRIPTOR_DIM, DEFAULT_TOLERANCE};
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite attendance database.
    pub db_path: PathBuf,
    /// Roster TOML (image_file, name, roll_no, department, email).
    pub roster_path: PathBuf,
    /// JSON map of reference image → extracted descriptors.
    pub descriptors_path: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub tolerance: f64,
    /// Descriptor dimensionality shared by enrollment and capture.
    pub descriptor_dim: usize,
    /// Laplacian-variance threshold for the capture quality gate.
    pub sharpness_threshold: f64,
    /// Dark-pixel fraction above which frames are rejected (0, the default, disables).
    pub dark_fraction: f32,
    /// Whether to log a notification for each recorded event.
    pub notify_enabled: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        Self {
            db_path: env_path("ROLLCALL_DB_PATH").unwrap_or_else(|| data_dir.join("attendance.db")),
            roster_path: env_path("ROLLCALL_ROSTER_PATH")
                .unwrap_or_else(|| data_dir.join("roster.toml")),
            descriptors_path: env_path("ROLLCALL_DESCRIPTORS_PATH")
                .unwrap_or_else(|| data_dir.join("descriptors.json")),
            tolerance: env_parse("ROLLCALL_TOLERANCE", DEFAULT_TOLERANCE),
            descriptor_dim: env_parse("ROLLCALL_DESCRIPTOR_DIM", DEFAULT_DESCRIPTOR_DIM),
            sharpness_threshold: env_parse("ROLLCALL_SHARPNESS_THRESHOLD", DEFAULT_SHARPNESS_THRESHOLD),
            dark_fraction: env_parse("ROLLCALL_DARK_FRACTION", 0.0),
            notify_enabled: std::env::var("ROLLCALL_NOTIFY")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }

    pub fn quality(&self) -> QualityConfig {
        QualityConfig {
            sharpness_threshold: self.sharpness_threshold,
            inclusive: false,
            dark_fraction: (self.dark_fraction > 0.0).then_some(self.dark_fraction),
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    let Ok(value) = std::env::var(key) else {
        return default;
    };
    match value.parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            tracing::warn!(key, value = %value, "unparsable value, using default");
            default
        }
    }
}
