//! Core data types for face observations, templates, and verification results.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Facial expression labels, in tie-break order.
///
/// When two labels share the maximal score, the one declared first wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Angry,
    Contempt,
    Disgusted,
    Fearful,
    Happy,
    Neutral,
    Sad,
    Surprised,
}

impl Expression {
    pub const ALL: [Expression; 8] = [
        Expression::Angry,
        Expression::Contempt,
        Expression::Disgusted,
        Expression::Fearful,
        Expression::Happy,
        Expression::Neutral,
        Expression::Sad,
        Expression::Surprised,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Expression::Angry => "angry",
            Expression::Contempt => "contempt",
            Expression::Disgusted => "disgusted",
            Expression::Fearful => "fearful",
            Expression::Happy => "happy",
            Expression::Neutral => "neutral",
            Expression::Sad => "sad",
            Expression::Surprised => "surprised",
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Expression {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "angry" | "anger" => Ok(Expression::Angry),
            "contempt" => Ok(Expression::Contempt),
            "disgusted" | "disgust" => Ok(Expression::Disgusted),
            "fearful" | "fear" => Ok(Expression::Fearful),
            "happy" | "happiness" => Ok(Expression::Happy),
            "neutral" => Ok(Expression::Neutral),
            "sad" | "sadness" => Ok(Expression::Sad),
            "surprised" | "surprise" => Ok(Expression::Surprised),
            other => Err(AuthError::InvalidInput(format!(
                "Unknown expression label: {other}"
            ))),
        }
    }
}

/// Expression label → non-negative weight. Weights need not sum to 1.
pub type ExpressionScores = BTreeMap<Expression, f32>;

/// Pick the dominant label: maximal weight, ties resolved by declaration order.
pub fn dominant_expression(scores: &ExpressionScores) -> Option<Expression> {
    let mut best: Option<(Expression, f32)> = None;
    // BTreeMap iterates in declaration order, so a strict `>` keeps the earliest label on ties.
    for (&label, &weight) in scores {
        match best {
            Some((_, top)) if weight <= top => {}
            _ => best = Some((label, weight)),
        }
    }
    best.map(|(label, _)| label)
}

/// Which extractor implementation produced an observation.
///
/// Embeddings are only comparable between observations of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    Onnx,
    Simulated,
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractorKind::Onnx => f.write_str("onnx"),
            ExtractorKind::Simulated => f.write_str("simulated"),
        }
    }
}

/// The atomic unit produced by a feature extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub embedding: Vec<f32>,
    pub detected: bool,
    pub dominant_expression: Expression,
    pub expression_scores: ExpressionScores,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image: Option<String>,
    pub extractor: ExtractorKind,
}

impl FaceObservation {
    /// Build a detected observation; the dominant label is derived from `scores`.
    ///
    /// An empty score map falls back to a single `neutral` entry so the
    /// non-empty invariant holds for every detected observation.
    pub fn detected(
        embedding: Vec<f32>,
        mut scores: ExpressionScores,
        extractor: ExtractorKind,
    ) -> Self {
        if scores.is_empty() {
            scores.insert(Expression::Neutral, 1.0);
        }
        for weight in scores.values_mut() {
            if !weight.is_finite() || *weight < 0.0 {
                *weight = 0.0;
            }
        }
        let dominant_expression = dominant_expression(&scores).unwrap_or(Expression::Neutral);
        Self {
            embedding,
            detected: true,
            dominant_expression,
            expression_scores: scores,
            source_image: None,
            extractor,
        }
    }

    /// An observation for a capture in which no face was found.
    pub fn undetected(extractor: ExtractorKind) -> Self {
        Self {
            embedding: Vec::new(),
            detected: false,
            dominant_expression: Expression::Neutral,
            expression_scores: ExpressionScores::new(),
            source_image: None,
            extractor,
        }
    }

    pub fn with_source_image(mut self, source: impl Into<String>) -> Self {
        self.source_image = Some(source.into());
        self
    }

    /// Highest expression weight, if any.
    pub fn expression_confidence(&self) -> Option<f32> {
        self.expression_scores
            .values()
            .copied()
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f32| a.max(v))))
    }
}

/// A user's persisted reference template. One record per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub user_id: String,
    pub expression: Expression,
    pub observation: FaceObservation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_image_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EnrollmentRecord {
    /// The template as compared at verification time.
    ///
    /// The enrolled label takes precedence over the captured argmax, so an
    /// override given at enrollment is the expression the user must reproduce.
    pub fn reference(&self) -> FaceObservation {
        let mut observation = self.observation.clone();
        observation.dominant_expression = self.expression;
        observation
    }
}

/// Result of a 1:1 verification. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub matched: bool,
    pub confidence: f32,
    pub stored_expression: Expression,
    pub detected_expression: Expression,
    /// The probe was replaced by a simulated observation after detection failed.
    pub substituted: bool,
    pub path: crate::decision::DecisionPath,
}

/// What `enroll` reports back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentReceipt {
    pub user_id: String,
    pub expression: Expression,
    pub expression_scores: ExpressionScores,
    pub image_ref: Option<String>,
    pub substituted: bool,
    pub replaced: bool,
}

/// A named template considered by identification-style lookups.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub identity: String,
    pub observation: FaceObservation,
}

/// An identification hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub identity: String,
    pub confidence: f32,
}

/// Expression analysis of a single capture, without storing anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionAnalysis {
    pub detected: bool,
    pub expression: Expression,
    pub expression_scores: ExpressionScores,
    pub confidence: f32,
    /// No face was found and a simulated observation was analysed instead.
    pub substituted: bool,
}

/// Enrollment status of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentStatus {
    pub enrolled: bool,
    pub expression: Option<Expression>,
}

/// Errors that can occur in the face authentication engine.
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("User not enrolled: {0}")]
    NotEnrolled(String),

    #[error("Extractor unavailable: {0}")]
    ExtractorUnavailable(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Scoring error: {0}")]
    Scoring(String),

    #[error("Invalid user id '{user}': {message}")]
    InvalidUser { user: String, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Enrollment rejected: {0}")]
    EnrollmentRejected(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid login transition: cannot apply {event} in state {from}")]
    InvalidTransition { from: String, event: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuthError {
    /// Undecodable input: the current request cannot proceed and must not be retried as-is.
    pub fn is_decode(&self) -> bool {
        matches!(self, AuthError::Decode(_) | AuthError::Image(_))
    }
}

/// Convenience result type.
pub type AuthResult<T> = Result<T, AuthError>;
