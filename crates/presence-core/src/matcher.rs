//! Descriptor matching by Euclidean distance.
//!
//! Confidence is `max(0, 1 - distance)`; a comparison matches when the
//! confidence reaches the threshold (inclusive).

use crate::types::{FeatureVector, IdentityId, MatchResult, Template};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;

impl MatchResult {
    /// Derive confidence and the match decision from a raw distance.
    pub fn from_distance(distance: f64, threshold: f64) -> Self {
        let confidence = (1.0 - distance).max(0.0);
        Self {
            distance,
            confidence,
            matched: confidence >= threshold,
        }
    }

    /// Result reported when there is nothing to compare against.
    pub fn no_candidates() -> Self {
        Self {
            distance: f64::INFINITY,
            confidence: 0.0,
            matched: false,
        }
    }
}

/// Compare two descriptors. Symmetric in its arguments.
pub fn compare(a: &FeatureVector, b: &FeatureVector, threshold: f64) -> MatchResult {
    MatchResult::from_distance(a.euclidean_distance(b), threshold)
}

/// Winner of a one-to-many search.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    pub identity: IdentityId,
    /// Position of the winning candidate in the input list.
    pub index: usize,
    pub result: MatchResult,
}

/// Strategy for comparing a probe descriptor against enrolled descriptors.
pub trait Matcher {
    fn threshold(&self) -> f64;

    fn compare(&self, a: &FeatureVector, b: &FeatureVector) -> MatchResult;

    /// Highest-confidence candidate, or `None` for an empty list.
    ///
    /// Only a strictly higher confidence replaces the current best, so ties
    /// resolve to the earliest-listed candidate.
    fn find_best_match(
        &self,
        input: &FeatureVector,
        candidates: &[(IdentityId, FeatureVector)],
    ) -> Option<BestMatch> {
        let mut best: Option<BestMatch> = None;

        for (index, (identity, vector)) in candidates.iter().enumerate() {
            let result = self.compare(input, vector);
            let is_better = match &best {
                None => true,
                Some(prev) => result.confidence > prev.result.confidence,
            };
            if is_better {
                best = Some(BestMatch {
                    identity: identity.clone(),
                    index,
                    result,
                });
            }
        }

        best
    }

    /// Best comparison against a single identity's templates.
    fn verify(&self, input: &FeatureVector, templates: &[Template]) -> MatchResult {
        templates
            .iter()
            .map(|t| self.compare(input, &t.vector))
            .fold(None, |best: Option<MatchResult>, result| match best {
                Some(prev) if prev.confidence >= result.confidence => Some(prev),
                _ => Some(result),
            })
            .unwrap_or_else(MatchResult::no_candidates)
    }
}

/// Plain Euclidean matcher with a configurable threshold.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    threshold: f64,
}

impl EuclideanMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl Matcher for EuclideanMatcher {
    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn compare(&self, a: &FeatureVector, b: &FeatureVector) -> MatchResult {
        compare(a, b, self.threshold)
    }
}
