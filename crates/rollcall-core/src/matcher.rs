//! Nearest-neighbour descriptor matching against an enrollment snapshot.

use crate::enrollment::EnrollmentSnapshot;
use crate::types::{Descriptor, MatchResult};
use thiserror::Error;

/// Default maximum accepted Euclidean distance.
pub const DEFAULT_TOLERANCE: f64 = 0.6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("descriptor has {actual} dimensions, enrollment snapshot expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Strategy for matching a captured descriptor against enrolled identities.
pub trait Matcher {
    /// Returns the accepted match, or `None` when nothing is close enough.
    fn find(
        &self,
        captured: &Descriptor,
        snapshot: &EnrollmentSnapshot,
        tolerance: f64,
    ) -> Result<Option<MatchResult>, MatchError>;
}

/// Euclidean nearest-neighbour matcher.
///
/// Computes the distance to every enrolled descriptor, picks the minimum, and
/// only then applies the tolerance: `distance < tolerance` accepts. Equal
/// minima resolve to the earliest enrolled identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn find(
        &self,
        captured: &Descriptor,
        snapshot: &EnrollmentSnapshot,
        tolerance: f64,
    ) -> Result<Option<MatchResult>, MatchError> {
        if captured.dimension() != snapshot.dimension() {
            return Err(MatchError::DimensionMismatch {
                expected: snapshot.dimension(),
                actual: captured.dimension(),
            });
        }

        let mut best_dist = f64::INFINITY;
        let mut best_idx: Option<usize> = None;

        // Full traversal; strict `<` keeps the first of equal minima.
        for (i, identity) in snapshot.all().iter().enumerate() {
            let dist = captured.euclidean_distance(&identity.descriptor);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        let result = match best_idx {
            Some(idx) if best_dist < tolerance => Some(MatchResult {
                identity_id: snapshot.all()[idx].id.clone(),
                distance: best_dist,
            }),
            _ => None,
        };

        tracing::debug!(
            enrolled = snapshot.len(),
            best_distance = best_dist,
            tolerance,
            matched = result.is_some(),
            "matcher: nearest neighbour evaluated"
        );

        Ok(result)
    }
}

/// Match every face of one captured frame independently.
///
/// One entry per input descriptor, in the same order. No deduplication across
/// faces: two faces may resolve to the same identity.
pub fn identify_faces<M: Matcher + ?Sized>(
    matcher: &M,
    captured: &[Descriptor],
    snapshot: &EnrollmentSnapshot,
    tolerance: f64,
) -> Vec<Result<Option<MatchResult>, MatchError>> {
    captured
        .iter()
        .map(|d| matcher.find(d, snapshot, tolerance))
        .collect()
}
