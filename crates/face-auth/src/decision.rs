//! Accept/reject policy combining identity similarity and expression agreement.
//!
//! The engine is stateless: every call to [`DecisionEngine::decide`] is a pure
//! function of the two observations, the policy, and the scorer. Scorer
//! failures are absorbed into a zero-confidence rejection and never propagate.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::similarity::{CosineScorer, IdentityScore, SimilarityScorer};
use crate::types::{AuthError, AuthResult, FaceObservation};

/// How identity is established when the scorer has no verdict of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    /// Weighted blend of similarity and expression agreement against `threshold`.
    #[default]
    Blended,
    /// Similarity at or above `identity_floor` counts as a verified identity.
    IdentityGated,
}

impl fmt::Display for DecisionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionMode::Blended => f.write_str("blended"),
            DecisionMode::IdentityGated => f.write_str("identity_gated"),
        }
    }
}

impl FromStr for DecisionMode {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "blended" => Ok(DecisionMode::Blended),
            "identity_gated" | "gated" => Ok(DecisionMode::IdentityGated),
            other => Err(AuthError::InvalidConfig(format!(
                "Unknown decision mode: {other}"
            ))),
        }
    }
}

/// Which branch of the policy produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPath {
    /// Identity verified and expressions agree.
    BothPass,
    /// Identity verified but expressions differ.
    ExpressionVeto,
    /// Identity not verified, but expressions agree and residual similarity is acceptable.
    Lenient,
    /// Identity not verified and no leniency applies.
    IdentityRejected,
    /// No identity verdict; weighted blend against the threshold.
    Blended,
    /// The scorer failed.
    ScorerFailure,
    /// The probe had no face and detection failures are not substituted.
    DetectionFailed,
}

/// Tunable constants of the decision policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionPolicy {
    pub threshold: f32,
    pub expression_weight: f32,
    pub identity_floor: f32,
    pub leniency_floor: f32,
    pub identity_weight: f32,
    pub expression_bonus: f32,
    pub mode: DecisionMode,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            expression_weight: 0.3,
            identity_floor: 0.9,
            leniency_floor: 0.4,
            identity_weight: 0.8,
            expression_bonus: 0.2,
            mode: DecisionMode::Blended,
        }
    }
}

fn check_unit(name: &str, value: f32) -> AuthResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(AuthError::InvalidConfig(format!(
            "{name} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

impl DecisionPolicy {
    pub fn validate(&self) -> AuthResult<()> {
        check_unit("threshold", self.threshold)?;
        check_unit("expression_weight", self.expression_weight)?;
        check_unit("identity_floor", self.identity_floor)?;
        check_unit("leniency_floor", self.leniency_floor)?;
        check_unit("identity_weight", self.identity_weight)?;
        check_unit("expression_bonus", self.expression_bonus)?;
        if self.identity_weight + self.expression_bonus > 1.0 + f32::EPSILON {
            return Err(AuthError::InvalidConfig(format!(
                "identity_weight + expression_bonus must not exceed 1, got {}",
                self.identity_weight + self.expression_bonus
            )));
        }
        if self.leniency_floor > self.identity_floor {
            return Err(AuthError::InvalidConfig(format!(
                "leniency_floor ({}) must not exceed identity_floor ({})",
                self.leniency_floor, self.identity_floor
            )));
        }
        Ok(())
    }

    /// Blended-path confidence for a given similarity and expression agreement.
    pub fn blend(&self, face_similarity: f32, expression_match: bool) -> f32 {
        let w = self.expression_weight;
        let expression = if expression_match { 1.0 } else { 0.0 };
        ((1.0 - w) * face_similarity + w * expression).clamp(0.0, 1.0)
    }
}

/// Full account of a single decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub matched: bool,
    pub confidence: f32,
    pub face_similarity: f32,
    pub expression_match: bool,
    pub path: DecisionPath,
}

impl Decision {
    /// The `(matched, confidence)` pair.
    pub fn verdict(&self) -> (bool, f32) {
        (self.matched, self.confidence)
    }

    pub(crate) fn reject(face_similarity: f32, expression_match: bool, path: DecisionPath) -> Self {
        Self {
            matched: false,
            confidence: 0.0,
            face_similarity,
            expression_match,
            path,
        }
    }
}

/// Decides whether a probe matches a stored template.
#[derive(Clone)]
pub struct DecisionEngine {
    policy: DecisionPolicy,
    scorer: Arc<dyn SimilarityScorer>,
}

impl fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self {
            policy: DecisionPolicy::default(),
            scorer: Arc::new(CosineScorer),
        }
    }
}

impl DecisionEngine {
    pub fn new(policy: DecisionPolicy, scorer: Arc<dyn SimilarityScorer>) -> AuthResult<Self> {
        policy.validate()?;
        Ok(Self { policy, scorer })
    }

    /// Same policy, different scorer.
    pub fn with_scorer(&self, scorer: Arc<dyn SimilarityScorer>) -> Self {
        Self {
            policy: self.policy,
            scorer,
        }
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    pub fn scorer(&self) -> &dyn SimilarityScorer {
        self.scorer.as_ref()
    }

    pub fn decide(&self, stored: &FaceObservation, probe: &FaceObservation) -> Decision {
        let expression_match = stored.dominant_expression == probe.dominant_expression;

        let score = match self.scorer.score(stored, probe) {
            Ok(score) => score,
            Err(e) => {
                tracing::warn!("Similarity scorer failed, rejecting: {e}");
                return Decision::reject(0.0, expression_match, DecisionPath::ScorerFailure);
            }
        };
        let decision = self.apply(score, expression_match);
        tracing::debug!(
            "Decision {:?}: similarity={:.4}, expression_match={}, confidence={:.4}, matched={}",
            decision.path,
            decision.face_similarity,
            decision.expression_match,
            decision.confidence,
            decision.matched
        );
        decision
    }

    fn apply(&self, score: IdentityScore, expression_match: bool) -> Decision {
        let p = &self.policy;
        let sim = if score.similarity.is_finite() {
            score.similarity.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let identity = match (score.verified, p.mode) {
            (Some(verdict), _) => Some(verdict),
            (None, DecisionMode::IdentityGated) => Some(sim >= p.identity_floor),
            (None, DecisionMode::Blended) => None,
        };

        match identity {
            Some(true) if expression_match => Decision {
                matched: true,
                confidence: (p.identity_weight * sim + p.expression_bonus).clamp(0.0, 1.0),
                face_similarity: sim,
                expression_match,
                path: DecisionPath::BothPass,
            },
            Some(true) => Decision::reject(sim, expression_match, DecisionPath::ExpressionVeto),
            Some(false) if expression_match && sim > p.leniency_floor => {
                let distance = 1.0 - sim;
                Decision {
                    matched: true,
                    confidence: (1.0 - distance).max(0.0),
                    face_similarity: sim,
                    expression_match,
                    path: DecisionPath::Lenient,
                }
            }
            Some(false) => Decision::reject(sim, expression_match, DecisionPath::IdentityRejected),
            None => {
                let confidence = p.blend(sim, expression_match);
                Decision {
                    matched: confidence >= p.threshold,
                    confidence,
                    face_similarity: sim,
                    expression_match,
                    path: DecisionPath::Blended,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Expression, ExpressionScores, ExtractorKind};

    fn obs(embedding: Vec<f32>, expression: Expression) -> FaceObservation {
        let mut scores = ExpressionScores::new();
        scores.insert(expression, 0.9);
        FaceObservation::detected(embedding, scores, ExtractorKind::Simulated)
    }

    struct FixedScorer(IdentityScore);

    impl SimilarityScorer for FixedScorer {
        fn score(&self, _: &FaceObservation, _: &FaceObservation) -> AuthResult<IdentityScore> {
            Ok(self.0)
        }
    }

    struct FailingScorer;

    impl SimilarityScorer for FailingScorer {
        fn score(&self, _: &FaceObservation, _: &FaceObservation) -> AuthResult<IdentityScore> {
            Err(AuthError::Scoring("boom".into()))
        }
    }

    fn engine_with(similarity: f32, verified: Option<bool>) -> DecisionEngine {
        DecisionEngine::new(
            DecisionPolicy::default(),
            Arc::new(FixedScorer(IdentityScore {
                similarity,
                verified,
            })),
        )
        .unwrap()
    }

    #[test]
    fn test_blended_same_face_same_expression() {
        let engine = DecisionEngine::default();
        let a = obs(vec![0.3, -0.2, 0.1], Expression::Happy);
        let d = engine.decide(&a, &a);
        assert_eq!(d.path, DecisionPath::Blended);
        assert!(d.matched);
        assert!((d.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_blended_expression_mismatch_can_still_pass() {
        let engine = DecisionEngine::default();
        let a = obs(vec![0.3, -0.2, 0.1], Expression::Happy);
        let b = obs(vec![0.3, -0.2, 0.1], Expression::Sad);
        let d = engine.decide(&a, &b);
        assert!((d.confidence - 0.7).abs() < 1e-6);
        assert!(d.matched);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let a = obs(vec![1.0, 0.0], Expression::Happy);
        let b = obs(vec![0.0, 1.0], Expression::Happy);
        let probe_conf = DecisionEngine::default().decide(&a, &b).confidence;

        let policy = DecisionPolicy {
            threshold: probe_conf,
            ..DecisionPolicy::default()
        };
        let engine = DecisionEngine::new(policy, Arc::new(CosineScorer)).unwrap();
        let d = engine.decide(&a, &b);
        assert_eq!(d.confidence, probe_conf);
        assert!(d.matched);
    }

    #[test]
    fn test_both_pass_confidence() {
        let d = engine_with(0.9, Some(true)).decide(
            &obs(vec![1.0], Expression::Happy),
            &obs(vec![1.0], Expression::Happy),
        );
        assert_eq!(d.path, DecisionPath::BothPass);
        assert!(d.matched);
        assert!((d.confidence - (0.8 * 0.9 + 0.2)).abs() < 1e-6);
    }

    #[test]
    fn test_expression_veto_for_any_similarity() {
        for sim in [0.0, 0.35, 0.6, 0.95, 1.0] {
            let d = engine_with(sim, Some(true)).decide(
                &obs(vec![1.0], Expression::Happy),
                &obs(vec![1.0], Expression::Angry),
            );
            assert_eq!(d.path, DecisionPath::ExpressionVeto);
            assert_eq!(d.verdict(), (false, 0.0));
        }
    }

    #[test]
    fn test_lenient_path() {
        let d = engine_with(0.55, Some(false)).decide(
            &obs(vec![1.0], Expression::Sad),
            &obs(vec![1.0], Expression::Sad),
        );
        assert_eq!(d.path, DecisionPath::Lenient);
        assert!(d.matched);
        assert!((d.confidence - 0.55).abs() < 1e-6);
    }

    #[test]
    fn test_lenient_floor_is_strict() {
        let d = engine_with(0.4, Some(false)).decide(
            &obs(vec![1.0], Expression::Sad),
            &obs(vec![1.0], Expression::Sad),
        );
        assert_eq!(d.path, DecisionPath::IdentityRejected);
        assert_eq!(d.verdict(), (false, 0.0));
    }

    #[test]
    fn test_identity_rejected_without_expression() {
        let d = engine_with(0.8, Some(false)).decide(
            &obs(vec![1.0], Expression::Sad),
            &obs(vec![1.0], Expression::Happy),
        );
        assert_eq!(d.path, DecisionPath::IdentityRejected);
        assert!(!d.matched);
    }

    #[test]
    fn test_gated_mode_uses_identity_floor() {
        let policy = DecisionPolicy {
            mode: DecisionMode::IdentityGated,
            ..DecisionPolicy::default()
        };
        let scorer = |sim| {
            Arc::new(FixedScorer(IdentityScore {
                similarity: sim,
                verified: None,
            }))
        };
        let happy = obs(vec![1.0], Expression::Happy);

        let high = DecisionEngine::new(policy, scorer(0.95)).unwrap();
        assert_eq!(high.decide(&happy, &happy).path, DecisionPath::BothPass);

        let mid = DecisionEngine::new(policy, scorer(0.7)).unwrap();
        assert_eq!(mid.decide(&happy, &happy).path, DecisionPath::Lenient);
    }

    #[test]
    fn test_scorer_failure_is_absorbed() {
        let engine =
            DecisionEngine::new(DecisionPolicy::default(), Arc::new(FailingScorer)).unwrap();
        let a = obs(vec![1.0], Expression::Happy);
        let d = engine.decide(&a, &a);
        assert_eq!(d.path, DecisionPath::ScorerFailure);
        assert_eq!(d.verdict(), (false, 0.0));
    }

    #[test]
    fn test_policy_validation() {
        assert!(DecisionPolicy::default().validate().is_ok());
        let bad = DecisionPolicy {
            threshold: 1.5,
            ..DecisionPolicy::default()
        };
        assert!(matches!(bad.validate(), Err(AuthError::InvalidConfig(_))));
        let inverted = DecisionPolicy {
            leniency_floor: 0.95,
            ..DecisionPolicy::default()
        };
        assert!(inverted.validate().is_err());
        let overweight = DecisionPolicy {
            identity_weight: 0.9,
            expression_bonus: 0.3,
            ..DecisionPolicy::default()
        };
        assert!(overweight.validate().is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(
            "identity-gated".parse::<DecisionMode>().unwrap(),
            DecisionMode::IdentityGated
        );
        assert_eq!(" Blended".parse::<DecisionMode>().unwrap(), DecisionMode::Blended);
        assert!("strict".parse::<DecisionMode>().is_err());
    }
}
