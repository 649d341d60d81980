//! Deterministic stand-in for the real extraction capability.
//!
//! The same content bytes always produce the same embedding and the same
//! dominant expression, which makes re-enrollment idempotent and lets the rest
//! of the engine run without any model.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use crate::extractor::{FaceExtractor, FaceInput};
use crate::types::{AuthResult, Expression, ExpressionScores, ExtractorKind, FaceObservation};

/// Default dimensionality of simulated embeddings.
pub const SIMULATED_EMBEDDING_DIM: usize = 128;

/// Labels the simulation draws from.
pub const SIMULATED_EXPRESSIONS: [Expression; 5] = [
    Expression::Happy,
    Expression::Neutral,
    Expression::Sad,
    Expression::Surprised,
    Expression::Angry,
];

const DOMINANT_WEIGHT: f32 = 0.9;
const RESIDUAL_WEIGHT: f32 = 0.1;

/// Hash-seeded extractor. Always reports a detected face.
#[derive(Debug, Clone)]
pub struct SimulatedExtractor {
    dim: usize,
}

impl Default for SimulatedExtractor {
    fn default() -> Self {
        Self::new(SIMULATED_EMBEDDING_DIM)
    }
}

impl SimulatedExtractor {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Observation derived entirely from the content hash.
    pub fn observe(&self, content: &[u8]) -> FaceObservation {
        let digest = Sha256::digest(content);
        let index = u32::from_be_bytes([digest[8], digest[9], digest[10], digest[11]]) as usize
            % SIMULATED_EXPRESSIONS.len();
        self.build(&digest, SIMULATED_EXPRESSIONS[index])
    }

    /// Same embedding as [`observe`](Self::observe) but with the dominant label forced.
    ///
    /// Used to substitute a probe whose live detection failed.
    pub fn observe_with_expression(&self, content: &[u8], expression: Expression) -> FaceObservation {
        let digest = Sha256::digest(content);
        self.build(&digest, expression)
    }

    fn build(&self, digest: &[u8], dominant: Expression) -> FaceObservation {
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest[..8]);
        let mut rng = StdRng::seed_from_u64(u64::from_be_bytes(seed));
        let embedding: Vec<f32> = (0..self.dim).map(|_| rng.gen_range(-0.5f32..0.5)).collect();

        let mut scores: ExpressionScores = SIMULATED_EXPRESSIONS
            .iter()
            .map(|&label| (label, RESIDUAL_WEIGHT))
            .collect();
        scores.insert(dominant, DOMINANT_WEIGHT);

        FaceObservation::detected(embedding, scores, ExtractorKind::Simulated)
    }
}

impl FaceExtractor for SimulatedExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Simulated
    }

    fn extract(&self, input: FaceInput<'_>) -> AuthResult<FaceObservation> {
        let obs = self.observe(input.content());
        tracing::debug!(
            "Simulated observation: expression={}, dim={}",
            obs.dominant_expression,
            obs.embedding.len()
        );
        Ok(obs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_bytes_same_observation() {
        let ext = SimulatedExtractor::default();
        let a = ext.observe(b"capture-1");
        let b = ext.observe(b"capture-1");
        assert_eq!(a, b);
        assert_eq!(a.embedding.len(), SIMULATED_EMBEDDING_DIM);
    }

    #[test]
    fn test_always_detected_with_bounded_components() {
        let ext = SimulatedExtractor::new(32);
        let obs = ext.observe(b"");
        assert!(obs.detected);
        assert!(obs.embedding.iter().all(|v| (-0.5..0.5).contains(v)));
    }

    #[test]
    fn test_score_map_shape() {
        let obs = SimulatedExtractor::default().observe(b"abc");
        assert_eq!(obs.expression_scores.len(), SIMULATED_EXPRESSIONS.len());
        assert_eq!(obs.expression_scores[&obs.dominant_expression], DOMINANT_WEIGHT);
        let residuals = obs
            .expression_scores
            .iter()
            .filter(|(label, _)| **label != obs.dominant_expression)
            .all(|(_, w)| *w == RESIDUAL_WEIGHT);
        assert!(residuals);
    }

    #[test]
    fn test_forced_expression_keeps_embedding() {
        let ext = SimulatedExtractor::default();
        let plain = ext.observe(b"probe");
        let forced = ext.observe_with_expression(b"probe", Expression::Surprised);
        assert_eq!(plain.embedding, forced.embedding);
        assert_eq!(forced.dominant_expression, Expression::Surprised);
    }

    #[test]
    fn test_different_bytes_different_embeddings() {
        let ext = SimulatedExtractor::default();
        assert_ne!(ext.observe(b"one").embedding, ext.observe(b"two").embedding);
    }
}
