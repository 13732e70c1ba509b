//! Enrollment inputs: the roster of people and the reference descriptors
//! produced for their images by the external extractor.
//!
//! Roster file (`roster.toml`), one table per person keyed by reference image:
//!
//! ```toml
//! [[student]]
//! image_file = "jane.jpg"
//! name = "Jane Roe"
//! roll_no = "35501622001"
//! department = "EE"
//! email = "jane@example.edu"   # optional
//! ```
//!
//! Descriptor file (`descriptors.json`): `{ "jane.jpg": [[0.01, ...], ...] }`.

use crate::enrollment::EnrollmentSource;
use crate::types::{Descriptor, IdentityMetadata};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Built-in roster used when no roster file exists.
const DEFAULT_ROSTER: &str = r#"
[[student]]
image_file = "sample.jpg"
name = "SAMPLE STUDENT"
roll_no = "0000000001"
department = "EE"
"#;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed roster {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("malformed descriptor file {path}: {source}")]
    Descriptors {
        path: String,
        source: serde_json::Error,
    },
}

/// One roster row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RosterEntry {
    pub image_file: String,
    pub name: String,
    pub roll_no: String,
    pub department: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl RosterEntry {
    pub fn metadata(&self) -> IdentityMetadata {
        IdentityMetadata {
            display_name: self.name.clone(),
            external_reference: self.roll_no.clone(),
            group: self.department.clone(),
            // Blank email column means no contact.
            contact: self.email.clone().filter(|e| !e.trim().is_empty()),
        }
    }
}

/// Where a roster came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterOrigin {
    File,
    BuiltinDefault,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Roster {
    #[serde(default, rename = "student")]
    pub entries: Vec<RosterEntry>,
    #[serde(skip, default = "default_origin")]
    pub origin: RosterOrigin,
}

fn default_origin() -> RosterOrigin {
    RosterOrigin::File
}

impl Roster {
    /// Load the roster at `path`, falling back to the built-in default when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %path.display(),
                    "enrollment source missing; using built-in default roster"
                );
                return Ok(Self::builtin_default());
            }
            Err(source) => {
                return Err(RosterError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        Self::parse(&text).map_err(|source| RosterError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn builtin_default() -> Self {
        match toml::from_str::<Roster>(DEFAULT_ROSTER) {
            Ok(mut roster) => {
                roster.origin = RosterOrigin::BuiltinDefault;
                roster
            }
            Err(e) => {
                tracing::error!(error = %e, "bad built-in roster");
                Self {
                    entries: Vec::new(),
                    origin: RosterOrigin::BuiltinDefault,
                }
            }
        }
    }

    /// Join roster rows with their reference descriptors, in roster order.
    /// Rows without an entry in `descriptors` get an empty descriptor list.
    pub fn sources(&self, descriptors: &DescriptorFile) -> Vec<EnrollmentSource> {
        self.entries
            .iter()
            .map(|entry| EnrollmentSource {
                reference: entry.image_file.clone(),
                descriptors: descriptors.get(&entry.image_file).to_vec(),
                metadata: entry.metadata(),
            })
            .collect()
    }
}

/// Reference descriptors keyed by image file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct DescriptorFile {
    by_image: HashMap<String, Vec<Descriptor>>,
}

impl DescriptorFile {
    /// Load a descriptor file. A missing file yields an empty set.
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "descriptor file missing; no references loaded");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(RosterError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        serde_json::from_str(&text).map_err(|source| RosterError::Descriptors {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn insert(&mut self, image_file: impl Into<String>, descriptors: Vec<Descriptor>) {
        self.by_image.insert(image_file.into(), descriptors);
    }

    pub fn get(&self, image_file: &str) -> &[Descriptor] {
        self.by_image
            .get(image_file)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
