//! rollcall-core — Identity matching and capture quality.
//!
//! Nearest-neighbour matching of face descriptors against an immutable
//! enrollment snapshot, plus the sharpness gate applied to frames before
//! feature extraction.

pub mod enrollment;
pub mod frame;
pub mod matcher;
pub mod quality;
pub mod roster;
pub mod types;

pub use enrollment::{EnrollmentSnapshot, EnrollmentSource, EnrollmentStore, EnrollmentWarning};
pub use frame::Frame;
pub use matcher::{identify_faces, EuclideanMatcher, MatchError, Matcher, DEFAULT_TOLERANCE};
pub use quality::{Assessment, QualityConfig, QualityGate, RejectReason};
pub use roster::{DescriptorFile, Roster, RosterError};
pub use types::{Descriptor, Identity, IdentityId, IdentityMetadata, MatchResult, DEFAULT_DESCRIPTOR_DIM};
