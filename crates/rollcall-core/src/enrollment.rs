//! Enrollment snapshots and the store that swaps them.
//!
//! A snapshot is built once from externally extracted reference descriptors
//! and is read-only afterwards. Reloading builds a complete new snapshot and
//! replaces the store's pointer in one step, so a matcher holding the previous
//! `Arc` keeps a consistent view until it drops it.

use crate::types::{Descriptor, Identity, IdentityId, IdentityMetadata};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// One reference image's extraction output plus its roster metadata.
#[derive(Debug, Clone)]
pub struct EnrollmentSource {
    /// Reference image key (roster `image_file`), becomes the identity id.
    pub reference: String,
    /// Every descriptor the extractor found in the reference image.
    pub descriptors: Vec<Descriptor>,
    pub metadata: IdentityMetadata,
}

/// Why a source did not produce an identity.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollmentWarning {
    NoFaceDetected {
        reference: String,
    },
    DimensionMismatch {
        reference: String,
        expected: usize,
        actual: usize,
    },
    DuplicateIdentity {
        reference: String,
        display_name: String,
        external_reference: String,
    },
}

impl fmt::Display for EnrollmentWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnrollmentWarning::NoFaceDetected { reference } => {
                write!(f, "{reference}: no face detected in reference image, skipped")
            }
            EnrollmentWarning::DimensionMismatch {
                reference,
                expected,
                actual,
            } => write!(
                f,
                "{reference}: descriptor has {actual} dimensions, expected {expected}, skipped"
            ),
            EnrollmentWarning::DuplicateIdentity {
                reference,
                display_name,
                external_reference,
            } => write!(
                f,
                "{reference}: {display_name} ({external_reference}) already enrolled, skipped"
            ),
        }
    }
}

/// Immutable, versioned view of all enrolled identities.
#[derive(Debug)]
pub struct EnrollmentSnapshot {
    version: u64,
    dimension: usize,
    identities: Vec<Identity>,
    index: HashMap<IdentityId, usize>,
    warnings: Vec<EnrollmentWarning>,
}

impl EnrollmentSnapshot {
    /// Build a snapshot from extraction output, in source order.
    ///
    /// Sources are skipped (with a recorded warning) when extraction found no
    /// face, when the descriptor has the wrong dimension, or when the same
    /// name + reference number, or the same image key, was already enrolled. A
    /// reference image with several faces enrolls its first descriptor.
    pub fn load(
        dimension: usize,
        version: u64,
        sources: impl IntoIterator<Item = EnrollmentSource>,
    ) -> Self {
        let mut identities = Vec::new();
        let mut index = HashMap::new();
        let mut seen_people: HashSet<(String, String)> = HashSet::new();
        let mut warnings = Vec::new();

        for source in sources {
            let Some(descriptor) = source.descriptors.into_iter().next() else {
                warnings.push(EnrollmentWarning::NoFaceDetected {
                    reference: source.reference,
                });
                continue;
            };

            if descriptor.dimension() != dimension {
                warnings.push(EnrollmentWarning::DimensionMismatch {
                    reference: source.reference,
                    expected: dimension,
                    actual: descriptor.dimension(),
                });
                continue;
            }

            let id = IdentityId(source.reference.clone());
            let person = (
                source.metadata.display_name.clone(),
                source.metadata.external_reference.clone(),
            );
            if index.contains_key(&id) || seen_people.contains(&person) {
                warnings.push(EnrollmentWarning::DuplicateIdentity {
                    reference: source.reference,
                    display_name: person.0,
                    external_reference: person.1,
                });
                continue;
            }

            seen_people.insert(person);
            index.insert(id.clone(), identities.len());
            identities.push(Identity {
                id,
                metadata: source.metadata,
                descriptor,
            });
        }

        for warning in &warnings {
            tracing::warn!(version, %warning, "enrollment: source skipped");
        }
        tracing::info!(
            version,
            dimension,
            enrolled = identities.len(),
            skipped = warnings.len(),
            "enrollment snapshot built"
        );

        Self {
            version,
            dimension,
            identities,
            index,
            warnings,
        }
    }

    /// An empty snapshot, used before the first load.
    pub fn empty(dimension: usize) -> Self {
        Self::load(dimension, 0, std::iter::empty())
    }

    pub fn lookup(&self, id: &IdentityId) -> Option<&Identity> {
        self.index.get(id).map(|&i| &self.identities[i])
    }

    /// All identities in enrollment order.
    pub fn all(&self) -> &[Identity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn warnings(&self) -> &[EnrollmentWarning] {
        &self.warnings
    }
}

/// Holds the current snapshot and swaps it atomically on reload.
#[derive(Debug)]
pub struct EnrollmentStore {
    dimension: usize,
    current: RwLock<Arc<EnrollmentSnapshot>>,
    last_version: AtomicU64,
}

impl EnrollmentStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            current: RwLock::new(Arc::new(EnrollmentSnapshot::empty(dimension))),
            last_version: AtomicU64::new(0),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The snapshot in effect right now. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<EnrollmentSnapshot> {
        // A poisoned lock still guards a valid Arc; the swap is a single store.
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Build a new snapshot off-lock, then publish it.
    pub fn reload(
        &self,
        sources: impl IntoIterator<Item = EnrollmentSource>,
    ) -> Arc<EnrollmentSnapshot> {
        let version = self.last_version.fetch_add(1, Ordering::AcqRel) + 1;
        let next = Arc::new(EnrollmentSnapshot::load(self.dimension, version, sources));

        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Concurrent reloads: never replace a newer snapshot with an older one.
        if next.version() > guard.version() {
            *guard = Arc::clone(&next);
        }
        drop(guard);

        next
    }
}
