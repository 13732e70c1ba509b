use serde::{Deserialize, Serialize};
use std::fmt;

/// Default descriptor dimensionality (dlib ResNet face encodings).
pub const DEFAULT_DESCRIPTOR_DIM: usize = 128;

/// Face descriptor vector produced by the external feature extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f64>,
}

impl Descriptor {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two descriptors.
    ///
    /// Callers must check dimensions first; extra components of the longer
    /// vector are ignored.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

impl From<Vec<f64>> for Descriptor {
    fn from(values: Vec<f64>) -> Self {
        Self { values }
    }
}

/// Identity key: the reference image the enrolled descriptor came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub String);

impl IdentityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Descriptive fields of an enrolled person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityMetadata {
    pub display_name: String,
    /// Roll or staff number.
    pub external_reference: String,
    /// Department or class.
    pub group: String,
    pub contact: Option<String>,
}

/// An enrolled person with exactly one reference descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    #[serde(flatten)]
    pub metadata: IdentityMetadata,
    pub descriptor: Descriptor,
}

impl Identity {
    pub fn display_name(&self) -> &str {
        &self.metadata.display_name
    }

    pub fn external_reference(&self) -> &str {
        &self.metadata.external_reference
    }

    pub fn group(&self) -> &str {
        &self.metadata.group
    }

    pub fn contact(&self) -> Option<&str> {
        self.metadata.contact.as_deref()
    }
}

/// Accepted nearest-neighbour match for one captured descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub identity_id: IdentityId,
    /// Euclidean distance to the matched identity's descriptor.
    pub distance: f64,
}
