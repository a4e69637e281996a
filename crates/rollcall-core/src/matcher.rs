//! Nearest-descriptor matching.

use crate::types::{Candidate, Descriptor, Match};

/// Strategy for comparing a probe descriptor against a gallery of stored descriptors.
pub trait Matcher {
    /// Return the closest candidate if it lies strictly within `threshold`.
    fn best_match(&self, probe: &Descriptor, candidates: &[Candidate], threshold: f32) -> Option<Match>;
}

/// Linear-scan Euclidean matcher.
///
/// Every candidate is visited, so a call costs O(n·d) for n stored descriptors
/// of dimension d. There is no index; this is the ceiling on gallery size.
///
/// Candidates whose length differs from the probe are skipped. Ties keep the
/// first candidate seen in scan order.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(&self, probe: &Descriptor, candidates: &[Candidate], threshold: f32) -> Option<Match> {
        let mut best: Option<(usize, f32)> = None;

        for (i, candidate) in candidates.iter().enumerate() {
            let Some(distance) = probe.distance(&candidate.descriptor) else {
                tracing::debug!(
                    owner = %candidate.owner.student_id,
                    probe_len = probe.len(),
                    candidate_len = candidate.descriptor.len(),
                    "skipping descriptor with mismatched length"
                );
                continue;
            };
            if !distance.is_finite() {
                continue;
            }
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((i, distance)),
            }
        }

        match best {
            Some((idx, distance)) if distance < threshold => Some(Match {
                owner: candidates[idx].owner.clone(),
                distance,
            }),
            _ => None,
        }
    }
}
