//! Identity similarity between face observations.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::store::ImageStore;
use crate::types::{AuthError, AuthResult, Candidate, FaceMatch, FaceObservation};

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Cosine similarity of two observations rescaled to [0,1].
///
/// Zero when either side has no face, an empty embedding, a different
/// dimensionality, or was produced by a different extractor.
pub fn normalized_similarity(a: &FaceObservation, b: &FaceObservation) -> f32 {
    if !a.detected || !b.detected {
        return 0.0;
    }
    if a.extractor != b.extractor {
        return 0.0;
    }
    if a.embedding.is_empty() || a.embedding.len() != b.embedding.len() {
        return 0.0;
    }
    ((cosine_similarity(&a.embedding, &b.embedding) + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Convert a pairwise distance (larger is more different) to a similarity.
pub fn distance_to_similarity(distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    1.0 - distance.clamp(0.0, 1.0)
}

/// Output of a scorer: the similarity plus an independent identity verdict, if the scorer has one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdentityScore {
    pub similarity: f32,
    pub verified: Option<bool>,
}

pub trait SimilarityScorer: Send + Sync {
    fn score(&self, stored: &FaceObservation, probe: &FaceObservation) -> AuthResult<IdentityScore>;

    /// Whether observations must carry a `source_image` reference to be scored.
    fn needs_image_refs(&self) -> bool {
        false
    }
}

/// Pure embedding comparison. Never produces an identity verdict.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineScorer;

impl SimilarityScorer for CosineScorer {
    fn score(&self, stored: &FaceObservation, probe: &FaceObservation) -> AuthResult<IdentityScore> {
        Ok(IdentityScore {
            similarity: normalized_similarity(stored, probe),
            verified: None,
        })
    }
}

/// Result of comparing two face images directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairVerdict {
    pub distance: f32,
    pub verified: bool,
}

/// A capability that verifies two encoded face images against each other.
pub trait PairVerifier: Send + Sync {
    fn verify_pair(&self, a: &[u8], b: &[u8]) -> AuthResult<PairVerdict>;
}

/// Delegates to a [`PairVerifier`], loading both images through the image store.
pub struct PairwiseScorer {
    verifier: Arc<dyn PairVerifier>,
    images: Arc<dyn ImageStore>,
}

impl PairwiseScorer {
    pub fn new(verifier: Arc<dyn PairVerifier>, images: Arc<dyn ImageStore>) -> Self {
        Self { verifier, images }
    }
}

impl SimilarityScorer for PairwiseScorer {
    fn score(&self, stored: &FaceObservation, probe: &FaceObservation) -> AuthResult<IdentityScore> {
        if stored.extractor != probe.extractor || !stored.detected || !probe.detected {
            return Ok(IdentityScore {
                similarity: 0.0,
                verified: Some(false),
            });
        }
        let (Some(stored_ref), Some(probe_ref)) = (&stored.source_image, &probe.source_image)
        else {
            return Err(AuthError::Scoring(
                "pairwise verification needs an image reference on both observations".to_string(),
            ));
        };
        let stored_bytes = self.images.load(stored_ref)?;
        let probe_bytes = self.images.load(probe_ref)?;
        let verdict = self.verifier.verify_pair(&stored_bytes, &probe_bytes)?;
        tracing::debug!(
            "Pairwise distance {:.4}, verified={}",
            verdict.distance,
            verdict.verified
        );
        Ok(IdentityScore {
            similarity: distance_to_similarity(verdict.distance),
            verified: Some(verdict.verified),
        })
    }

    fn needs_image_refs(&self) -> bool {
        true
    }
}

/// Identification-style lookup: similarity only, no expression gating.
///
/// Keeps candidates at or above `threshold`, ordered by descending similarity
/// with ties broken by identity. Candidates the scorer cannot handle are skipped.
pub fn find_matches(
    scorer: &dyn SimilarityScorer,
    probe: &FaceObservation,
    candidates: &[Candidate],
    threshold: f32,
) -> Vec<FaceMatch> {
    let mut matches: Vec<FaceMatch> = candidates
        .iter()
        .filter_map(|c| match scorer.score(&c.observation, probe) {
            Ok(score) => Some(FaceMatch {
                identity: c.identity.clone(),
                confidence: score.similarity,
            }),
            Err(e) => {
                tracing::warn!("Skipping candidate {}: {e}", c.identity);
                None
            }
        })
        .filter(|m| m.confidence >= threshold)
        .collect();

    matches.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.identity.cmp(&b.identity))
    });
    matches
}
