//! Enrollment and verification built on the decision engine.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::decision::{Decision, DecisionEngine, DecisionPath};
use crate::extractor::{select_extractor, Capability, CapabilityReport, FaceInput};
use crate::similarity::{find_matches, CosineScorer, PairwiseScorer, SimilarityScorer};
use crate::simulated::SimulatedExtractor;
use crate::store::{
    validate_user_id, FileTemplateStore, FsImageStore, ImageStore, TemplateStore,
};
use crate::stream::{FrameAccumulator, FrameReport, FrameStatus};
use crate::types::{
    AuthError, AuthResult, Candidate, EnrollmentReceipt, EnrollmentRecord, EnrollmentStatus,
    Expression, ExpressionAnalysis, ExtractorKind, FaceMatch, FaceObservation,
    VerificationOutcome,
};

/// What to do when live detection finds no face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionFallback {
    /// Replace the observation with a simulated one. At verification the
    /// substitute carries the stored expression, which disables the expression
    /// check for that request.
    #[default]
    Substitute,
    /// Reject enrollment and verification when no face is found.
    FailClosed,
}

impl fmt::Display for DetectionFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionFallback::Substitute => f.write_str("substitute"),
            DetectionFallback::FailClosed => f.write_str("fail_closed"),
        }
    }
}

impl FromStr for DetectionFallback {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "substitute" => Ok(DetectionFallback::Substitute),
            "fail_closed" | "reject" => Ok(DetectionFallback::FailClosed),
            other => Err(AuthError::InvalidConfig(format!(
                "Unknown detection fallback: {other}"
            ))),
        }
    }
}

/// Enrollment, verification and lookup against a template store.
pub struct FaceAuthenticator {
    extractor: Capability,
    engine: DecisionEngine,
    templates: Arc<dyn TemplateStore>,
    images: Arc<dyn ImageStore>,
    fallback: DetectionFallback,
    simulated: SimulatedExtractor,
    stream_min_frames: usize,
}

impl fmt::Debug for FaceAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaceAuthenticator")
            .field("extractor", &self.extractor.kind())
            .field("engine", &self.engine)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl FaceAuthenticator {
    pub fn new(
        extractor: Capability,
        engine: DecisionEngine,
        templates: Arc<dyn TemplateStore>,
        images: Arc<dyn ImageStore>,
    ) -> Self {
        Self {
            extractor,
            engine,
            templates,
            images,
            fallback: DetectionFallback::default(),
            simulated: SimulatedExtractor::default(),
            stream_min_frames: crate::config::DEFAULT_STREAM_MIN_FRAMES,
        }
    }

    pub fn with_detection_fallback(mut self, fallback: DetectionFallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_stream_min_frames(mut self, min_frames: usize) -> Self {
        self.stream_min_frames = min_frames.max(1);
        self
    }

    pub fn with_simulated_dim(mut self, dim: usize) -> Self {
        self.simulated = SimulatedExtractor::new(dim);
        self
    }

    /// Wire everything from configuration: capability selection and on-disk stores under `data_dir`.
    ///
    /// A capability with a pairwise verifier is scored pairwise; anything else
    /// uses cosine similarity of embeddings.
    pub fn from_config(config: &EngineConfig) -> AuthResult<(Self, CapabilityReport)> {
        config.validate()?;
        let (extractor, report) = select_extractor(
            config.model_dir.as_deref(),
            config.verify_distance,
            config.embedding_dim,
        );
        let templates: Arc<dyn TemplateStore> = Arc::new(FileTemplateStore::new(&config.data_dir));
        let images: Arc<dyn ImageStore> = Arc::new(FsImageStore::new(&config.data_dir));

        let scorer: Arc<dyn SimilarityScorer> = match extractor.clone().pair_verifier() {
            Some(verifier) => Arc::new(PairwiseScorer::new(verifier, images.clone())),
            None => Arc::new(CosineScorer),
        };
        let engine = DecisionEngine::new(config.policy, scorer)?;

        let authenticator = Self::new(extractor, engine, templates, images)
            .with_detection_fallback(config.detection_fallback)
            .with_stream_min_frames(config.stream_min_frames)
            .with_simulated_dim(config.embedding_dim);
        Ok((authenticator, report))
    }

    pub fn extractor_kind(&self) -> ExtractorKind {
        self.extractor.kind()
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn detection_fallback(&self) -> DetectionFallback {
        self.fallback
    }

    pub fn templates(&self) -> &dyn TemplateStore {
        self.templates.as_ref()
    }

    /// A fresh accumulator sized for this authenticator.
    pub fn frame_accumulator(&self) -> FrameAccumulator {
        FrameAccumulator::new(self.stream_min_frames)
    }

    fn extract(&self, bytes: &[u8]) -> AuthResult<FaceObservation> {
        self.extractor.extract(FaceInput::Encoded(bytes))
    }

    /// Enroll or re-enroll a user. Re-enrollment replaces the record in place.
    pub fn enroll(
        &self,
        user_id: &str,
        image: &[u8],
        expression_override: Option<Expression>,
    ) -> AuthResult<EnrollmentReceipt> {
        validate_user_id(user_id)?;
        let mut observation = self.extract(image)?;
        let mut substituted = false;

        if !observation.detected {
            match self.fallback {
                DetectionFallback::FailClosed => {
                    tracing::warn!("Enrollment for {user_id} rejected: no face detected");
                    return Err(AuthError::EnrollmentRejected(
                        "no face detected in enrollment image".to_string(),
                    ));
                }
                DetectionFallback::Substitute => {
                    tracing::warn!(
                        "No face detected while enrolling {user_id}; storing a simulated template"
                    );
                    observation = self.simulated.observe(image);
                    substituted = true;
                }
            }
        }

        let image_ref = self.images.save(user_id, image)?;
        let observation = observation.with_source_image(image_ref.clone());
        let expression = expression_override.unwrap_or(observation.dominant_expression);

        let mut previous_image: Option<String> = None;
        let mut replaced = false;
        let result = self.templates.upsert(user_id, &mut |prev| {
            let now = Utc::now();
            replaced = prev.is_some();
            previous_image = prev.and_then(|r| r.reference_image_path.clone());
            Ok(EnrollmentRecord {
                user_id: user_id.to_string(),
                expression,
                observation: observation.clone(),
                reference_image_path: Some(image_ref.clone()),
                created_at: prev.map(|r| r.created_at).unwrap_or(now),
                updated_at: now,
            })
        });

        let record = match result {
            Ok(record) => record,
            Err(e) => {
                if let Err(cleanup) = self.images.remove(&image_ref) {
                    tracing::warn!("Failed to remove orphaned image {image_ref}: {cleanup}");
                }
                return Err(e);
            }
        };

        if let Some(old) = previous_image.filter(|old| *old != image_ref) {
            if let Err(e) = self.images.remove(&old) {
                tracing::warn!("Failed to remove previous reference image {old}: {e}");
            }
        }

        tracing::info!(
            "Enrolled {user_id} with expression {} (replaced={replaced}, substituted={substituted})",
            record.expression
        );
        Ok(EnrollmentReceipt {
            user_id: record.user_id,
            expression: record.expression,
            expression_scores: record.observation.expression_scores,
            image_ref: record.reference_image_path,
            substituted,
            replaced,
        })
    }

    fn load_record(&self, user_id: &str) -> AuthResult<EnrollmentRecord> {
        validate_user_id(user_id)?;
        self.templates
            .load(user_id)?
            .ok_or_else(|| AuthError::NotEnrolled(user_id.to_string()))
    }

    /// 1:1 verification of a live capture against the user's template.
    pub fn verify(&self, user_id: &str, image: &[u8]) -> AuthResult<VerificationOutcome> {
        let record = self.load_record(user_id)?;
        let probe = self.extract(image)?;
        let outcome = self.verify_observation(&record, probe, image)?;
        tracing::info!(
            "Verification for {user_id}: matched={}, confidence={:.3}, path={:?}",
            outcome.matched,
            outcome.confidence,
            outcome.path
        );
        Ok(outcome)
    }

    fn verify_observation(
        &self,
        record: &EnrollmentRecord,
        probe: FaceObservation,
        image: &[u8],
    ) -> AuthResult<VerificationOutcome> {
        if !probe.detected {
            return self.verify_without_face(record, image);
        }

        let reference = record.reference();
        if reference.extractor != probe.extractor {
            tracing::warn!(
                "Template for {} was produced by the {} extractor and cannot be compared with {} observations; re-enroll to restore matching",
                record.user_id,
                reference.extractor,
                probe.extractor
            );
        }

        let decision = self.decide_with_probe_image(&record.user_id, &reference, probe.clone(), image)?;
        if decision.path == DecisionPath::ScorerFailure {
            if let Some(current) = self.replaced_since(record)? {
                tracing::debug!(
                    "Template for {} was replaced during verification; scoring the new one",
                    record.user_id
                );
                let decision = self.decide_with_probe_image(
                    &current.user_id,
                    &current.reference(),
                    probe.clone(),
                    image,
                )?;
                return Ok(outcome(&current, &probe, decision, false));
            }
        }
        Ok(outcome(record, &probe, decision, false))
    }

    /// The user's current record, if a re-enroll swapped its reference image after `record` was read.
    fn replaced_since(&self, record: &EnrollmentRecord) -> AuthResult<Option<EnrollmentRecord>> {
        let current = self.templates.load(&record.user_id)?;
        Ok(current.filter(|c| c.reference_image_path != record.reference_image_path))
    }

    fn verify_without_face(
        &self,
        record: &EnrollmentRecord,
        image: &[u8],
    ) -> AuthResult<VerificationOutcome> {
        match self.fallback {
            DetectionFallback::FailClosed => {
                tracing::warn!("No face detected for {}; rejecting", record.user_id);
                let probe = FaceObservation::undetected(self.extractor.kind());
                let decision = Decision::reject(0.0, false, DecisionPath::DetectionFailed);
                Ok(outcome(record, &probe, decision, false))
            }
            DetectionFallback::Substitute => {
                tracing::warn!(
                    "No face detected for {}; substituting a simulated probe with the stored expression",
                    record.user_id
                );
                let stored = self.simulated_reference(record)?;
                let probe = self
                    .simulated
                    .observe_with_expression(image, record.expression);
                let decision = self
                    .engine
                    .with_scorer(Arc::new(CosineScorer))
                    .decide(&stored, &probe);
                Ok(outcome(record, &probe, decision, true))
            }
        }
    }

    /// The template in simulated space, so a substituted probe is compared like with like.
    fn simulated_reference(&self, record: &EnrollmentRecord) -> AuthResult<FaceObservation> {
        if record.observation.extractor == ExtractorKind::Simulated {
            return Ok(record.reference());
        }
        let image_ref = record.reference_image_path.as_deref().ok_or_else(|| {
            AuthError::Storage(format!(
                "no reference image stored for {}",
                record.user_id
            ))
        })?;
        let bytes = self.images.load(image_ref)?;
        Ok(self
            .simulated
            .observe_with_expression(&bytes, record.expression))
    }

    /// Run the engine, saving the probe image for the duration when the scorer needs it.
    fn decide_with_probe_image(
        &self,
        user_id: &str,
        reference: &FaceObservation,
        probe: FaceObservation,
        image: &[u8],
    ) -> AuthResult<Decision> {
        if !self.engine.scorer().needs_image_refs() {
            return Ok(self.engine.decide(reference, &probe));
        }
        let probe_ref = self.images.save(user_id, image)?;
        let probe = probe.with_source_image(probe_ref.clone());
        let decision = self.engine.decide(reference, &probe);
        if let Err(e) = self.images.remove(&probe_ref) {
            tracing::warn!("Failed to remove temporary probe image {probe_ref}: {e}");
        }
        Ok(decision)
    }

    /// Similarity-only lookup of a probe against a candidate set.
    pub fn find_matches(
        &self,
        probe: &FaceObservation,
        candidates: &[Candidate],
        threshold: f32,
    ) -> Vec<FaceMatch> {
        find_matches(self.engine.scorer(), probe, candidates, threshold)
    }

    /// Identify who is in a capture among every enrolled user.
    pub fn identify(&self, image: &[u8], threshold: f32) -> AuthResult<Vec<FaceMatch>> {
        let records = self.templates.list()?;
        self.lookup(image, records, threshold)
    }

    /// Match a capture against the templates of the named users only.
    ///
    /// Users without a template are skipped.
    pub fn match_candidates(
        &self,
        image: &[u8],
        user_ids: &[String],
        threshold: f32,
    ) -> AuthResult<Vec<FaceMatch>> {
        let mut records = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            validate_user_id(user_id)?;
            match self.templates.load(user_id)? {
                Some(record) => records.push(record),
                None => tracing::debug!("Candidate {user_id} is not enrolled; skipping"),
            }
        }
        self.lookup(image, records, threshold)
    }

    fn lookup(
        &self,
        image: &[u8],
        records: Vec<EnrollmentRecord>,
        threshold: f32,
    ) -> AuthResult<Vec<FaceMatch>> {
        let probe = self.extract(image)?;
        if !probe.detected {
            tracing::debug!("No face detected; nothing to match");
            return Ok(Vec::new());
        }
        let candidates: Vec<Candidate> = records
            .into_iter()
            .map(|record| Candidate {
                identity: record.user_id,
                observation: record.observation,
            })
            .collect();

        if !self.engine.scorer().needs_image_refs() {
            return Ok(self.find_matches(&probe, &candidates, threshold));
        }
        let probe_ref = self.images.save("probe", image)?;
        let probe = probe.with_source_image(probe_ref.clone());
        let matches = self.find_matches(&probe, &candidates, threshold);
        if let Err(e) = self.images.remove(&probe_ref) {
            tracing::warn!("Failed to remove temporary probe image {probe_ref}: {e}");
        }
        Ok(matches)
    }

    /// Expression analysis of a capture. Nothing is stored.
    pub fn analyze(&self, image: &[u8]) -> AuthResult<ExpressionAnalysis> {
        let observation = self.extract(image)?;
        if observation.detected {
            return Ok(analysis(&observation, false));
        }
        match self.fallback {
            DetectionFallback::FailClosed => Ok(ExpressionAnalysis {
                detected: false,
                expression: observation.dominant_expression,
                expression_scores: observation.expression_scores,
                confidence: 0.0,
                substituted: false,
            }),
            DetectionFallback::Substitute => {
                tracing::warn!("No face detected; analysing a simulated observation");
                Ok(analysis(&self.simulated.observe(image), true))
            }
        }
    }

    pub fn status(&self, user_id: &str) -> AuthResult<EnrollmentStatus> {
        validate_user_id(user_id)?;
        let record = self.templates.load(user_id)?;
        Ok(EnrollmentStatus {
            enrolled: record.is_some(),
            expression: record.map(|r| r.expression),
        })
    }

    /// The full stored record.
    pub fn template(&self, user_id: &str) -> AuthResult<EnrollmentRecord> {
        self.load_record(user_id)
    }

    /// Delete the user's template and reference image. Returns whether anything was removed.
    pub fn remove(&self, user_id: &str) -> AuthResult<bool> {
        validate_user_id(user_id)?;
        let Some(record) = self.templates.delete(user_id)? else {
            return Ok(false);
        };
        if let Some(image_ref) = &record.reference_image_path {
            if let Err(e) = self.images.remove(image_ref) {
                tracing::warn!("Failed to remove reference image {image_ref}: {e}");
            }
        }
        tracing::info!("Removed facial template for {user_id}");
        Ok(true)
    }

    /// Feed one frame of a capture stream.
    ///
    /// Frames only count while a face is present. Once enough consecutive
    /// frames have a face, each further frame is analysed and, when `user_id`
    /// is given and enrolled, verified against that user's template.
    pub fn analyze_frame(
        &self,
        accumulator: &mut FrameAccumulator,
        image: &[u8],
        user_id: Option<&str>,
    ) -> AuthResult<FrameReport> {
        let observation = self.extract(image)?;
        let ready = accumulator.push(observation.detected);
        let status = if !observation.detected {
            FrameStatus::NoFace
        } else if ready {
            FrameStatus::Analyzed
        } else {
            FrameStatus::Accumulating
        };

        let mut report = FrameReport {
            status,
            consecutive: accumulator.consecutive(),
            required: accumulator.min_frames(),
            analysis: None,
            self_match: None,
        };
        if status != FrameStatus::Analyzed {
            return Ok(report);
        }

        report.analysis = Some(analysis(&observation, false));
        if let Some(user_id) = user_id {
            validate_user_id(user_id)?;
            if let Some(record) = self.templates.load(user_id)? {
                report.self_match = Some(self.verify_observation(&record, observation, image)?);
            }
        }
        Ok(report)
    }
}

fn outcome(
    record: &EnrollmentRecord,
    probe: &FaceObservation,
    decision: Decision,
    substituted: bool,
) -> VerificationOutcome {
    let (matched, confidence) = decision.verdict();
    VerificationOutcome {
        matched,
        confidence,
        stored_expression: record.expression,
        detected_expression: probe.dominant_expression,
        substituted,
        path: decision.path,
    }
}

fn analysis(observation: &FaceObservation, substituted: bool) -> ExpressionAnalysis {
    ExpressionAnalysis {
        detected: observation.detected,
        expression: observation.dominant_expression,
        expression_scores: observation.expression_scores.clone(),
        confidence: observation.expression_confidence().unwrap_or(0.5),
        substituted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryImageStore, InMemoryTemplateStore};

    /// Reports no face for inputs starting with `NOFACE`, otherwise behaves like the simulation
    /// but labelled as a different extractor kind.
    struct FlakyExtractor(SimulatedExtractor);

    impl crate::extractor::FaceExtractor for FlakyExtractor {
        fn kind(&self) -> ExtractorKind {
            ExtractorKind::Onnx
        }

        fn extract(&self, input: FaceInput<'_>) -> AuthResult<FaceObservation> {
            let content = input.content();
            if content.starts_with(b"NOFACE") {
                return Ok(FaceObservation::undetected(ExtractorKind::Onnx));
            }
            let mut obs = self.0.observe(content);
            obs.extractor = ExtractorKind::Onnx;
            Ok(obs)
        }
    }

    fn simulated_auth() -> (FaceAuthenticator, Arc<InMemoryImageStore>) {
        let images = Arc::new(InMemoryImageStore::default());
        let auth = FaceAuthenticator::new(
            Arc::new(SimulatedExtractor::default()),
            DecisionEngine::default(),
            Arc::new(InMemoryTemplateStore::new()),
            images.clone(),
        );
        (auth, images)
    }

    fn flaky_auth(fallback: DetectionFallback) -> FaceAuthenticator {
        FaceAuthenticator::new(
            Arc::new(FlakyExtractor(SimulatedExtractor::default())),
            DecisionEngine::default(),
            Arc::new(InMemoryTemplateStore::new()),
            Arc::new(InMemoryImageStore::default()),
        )
        .with_detection_fallback(fallback)
    }

    #[test]
    fn test_reenroll_replaces_and_cleans_previous_image() {
        let (auth, images) = simulated_auth();
        let first = auth.enroll("alice", b"first capture", None).unwrap();
        assert!(!first.replaced);
        let second = auth
            .enroll("alice", b"second capture", Some(Expression::Happy))
            .unwrap();
        assert!(second.replaced);
        assert_eq!(second.expression, Expression::Happy);
        assert_eq!(images.len(), 1);

        let record = auth.template("alice").unwrap();
        assert_eq!(record.reference_image_path, second.image_ref);
        assert!(record.created_at <= record.updated_at);
    }

    struct SameBytesVerifier;

    impl crate::similarity::PairVerifier for SameBytesVerifier {
        fn verify_pair(&self, a: &[u8], b: &[u8]) -> AuthResult<crate::similarity::PairVerdict> {
            let distance = if a == b { 0.0 } else { 1.0 };
            Ok(crate::similarity::PairVerdict {
                distance,
                verified: distance <= 0.4,
            })
        }
    }

    /// Hands out one stale record before reading through to the real store.
    #[derive(Default)]
    struct StaleOnceStore {
        inner: InMemoryTemplateStore,
        stale: std::sync::Mutex<Option<EnrollmentRecord>>,
    }

    impl TemplateStore for StaleOnceStore {
        fn load(&self, user_id: &str) -> AuthResult<Option<EnrollmentRecord>> {
            if let Some(record) = self.stale.lock().unwrap().take() {
                return Ok(Some(record));
            }
            self.inner.load(user_id)
        }

        fn upsert(
            &self,
            user_id: &str,
            update: &mut dyn FnMut(Option<&EnrollmentRecord>) -> AuthResult<EnrollmentRecord>,
        ) -> AuthResult<EnrollmentRecord> {
            self.inner.upsert(user_id, update)
        }

        fn delete(&self, user_id: &str) -> AuthResult<Option<EnrollmentRecord>> {
            self.inner.delete(user_id)
        }

        fn list(&self) -> AuthResult<Vec<EnrollmentRecord>> {
            self.inner.list()
        }
    }

    #[test]
    fn test_verify_racing_reenroll_scores_new_template() {
        let images = Arc::new(InMemoryImageStore::default());
        let templates = Arc::new(StaleOnceStore::default());
        let scorer = Arc::new(PairwiseScorer::new(Arc::new(SameBytesVerifier), images.clone()));
        let engine = DecisionEngine::new(Default::default(), scorer).unwrap();
        let auth = FaceAuthenticator::new(
            Arc::new(SimulatedExtractor::default()),
            engine,
            templates.clone(),
            images.clone(),
        );

        auth.enroll("erin", b"old capture", None).unwrap();
        let old = auth.template("erin").unwrap();
        auth.enroll("erin", b"new capture", None).unwrap();
        assert_eq!(images.len(), 1);

        // The verification reads the record from before the re-enroll.
        *templates.stale.lock().unwrap() = Some(old);
        let outcome = auth.verify("erin", b"new capture").unwrap();
        assert_ne!(outcome.path, DecisionPath::ScorerFailure);
        assert!(outcome.matched);
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn test_override_is_the_expression_to_reproduce() {
        let (auth, _) = simulated_auth();
        let natural = SimulatedExtractor::default().observe(b"capture").dominant_expression;
        let other = Expression::ALL
            .into_iter()
            .find(|e| *e != natural)
            .unwrap();
        auth.enroll("bob", b"capture", Some(other)).unwrap();
        let outcome = auth.verify("bob", b"capture").unwrap();
        assert_eq!(outcome.stored_expression, other);
        assert_eq!(outcome.detected_expression, natural);
        // Same face, different expression: 0.7 blended confidence.
        assert!((outcome.confidence - 0.7).abs() < 1e-4);
    }

    #[test]
    fn test_substituted_enrollment() {
        let auth = flaky_auth(DetectionFallback::Substitute);
        let receipt = auth.enroll("carol", b"NOFACE-1", None).unwrap();
        assert!(receipt.substituted);
        let record = auth.template("carol").unwrap();
        assert_eq!(record.observation.extractor, ExtractorKind::Simulated);
    }

    #[test]
    fn test_fail_closed_enrollment() {
        let auth = flaky_auth(DetectionFallback::FailClosed);
        let err = auth.enroll("carol", b"NOFACE-1", None).unwrap_err();
        assert!(matches!(err, AuthError::EnrollmentRejected(_)));
        assert!(!auth.status("carol").unwrap().enrolled);
    }

    #[test]
    fn test_substituted_probe_copies_stored_expression() {
        let auth = flaky_auth(DetectionFallback::Substitute);
        auth.enroll("dave", b"real face", None).unwrap();
        let stored = auth.template("dave").unwrap().expression;

        let outcome = auth.verify("dave", b"NOFACE-probe").unwrap();
        assert!(outcome.substituted);
        assert_eq!(outcome.detected_expression, stored);
        assert_eq!(outcome.path, DecisionPath::Blended);

        let expected_stored = SimulatedExtractor::default().observe_with_expression(b"real face", stored);
        let expected_probe = SimulatedExtractor::default().observe_with_expression(b"NOFACE-probe", stored);
        let expected = DecisionEngine::default().decide(&expected_stored, &expected_probe);
        assert_eq!(outcome.confidence, expected.confidence);
        assert_eq!(outcome.matched, expected.matched);
    }

    #[test]
    fn test_fail_closed_probe() {
        let auth = flaky_auth(DetectionFallback::FailClosed);
        auth.enroll("erin", b"real face", None).unwrap();
        let outcome = auth.verify("erin", b"NOFACE-probe").unwrap();
        assert!(!outcome.matched);
        assert_eq!(outcome.confidence, 0.0);
        assert_eq!(outcome.path, DecisionPath::DetectionFailed);
    }

    #[test]
    fn test_cross_kind_template_scores_zero_similarity() {
        let auth = flaky_auth(DetectionFallback::Substitute);
        auth.enroll("frank", b"NOFACE-enroll", None).unwrap();
        let outcome = auth.verify("frank", b"live face").unwrap();
        assert!(!outcome.substituted);
        assert!(!outcome.matched);
        assert!(outcome.confidence <= 0.3 + 1e-6);
    }

    #[test]
    fn test_status_remove_and_not_enrolled() {
        let (auth, images) = simulated_auth();
        assert!(!auth.status("gina").unwrap().enrolled);
        auth.enroll("gina", b"img", None).unwrap();
        assert!(auth.status("gina").unwrap().enrolled);
        assert!(auth.remove("gina").unwrap());
        assert!(images.is_empty());
        assert!(!auth.remove("gina").unwrap());
        assert!(matches!(
            auth.verify("gina", b"img"),
            Err(AuthError::NotEnrolled(_))
        ));
        assert!(matches!(
            auth.template("gina"),
            Err(AuthError::NotEnrolled(_))
        ));
    }

    #[test]
    fn test_invalid_user_id() {
        let (auth, _) = simulated_auth();
        assert!(matches!(
            auth.enroll("../root", b"x", None),
            Err(AuthError::InvalidUser { .. })
        ));
    }

    #[test]
    fn test_identify_finds_enrolled_user() {
        let (auth, _) = simulated_auth();
        auth.enroll("hana", b"hana face", None).unwrap();
        auth.enroll("ivan", b"ivan face", None).unwrap();
        let matches = auth.identify(b"hana face", 0.99).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].identity, "hana");
    }

    #[test]
    fn test_match_candidates_limits_to_named_users() {
        let (auth, _) = simulated_auth();
        auth.enroll("hana", b"hana face", None).unwrap();
        auth.enroll("ivan", b"ivan face", None).unwrap();
        let named = vec!["ivan".to_string(), "ghost".to_string()];
        assert!(auth.match_candidates(b"hana face", &named, 0.99).unwrap().is_empty());
        let matches = auth.match_candidates(b"ivan face", &named, 0.99).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].identity, "ivan");
    }

    #[test]
    fn test_analyze() {
        let (auth, _) = simulated_auth();
        let analysis = auth.analyze(b"whatever").unwrap();
        assert!(analysis.detected);
        assert!(!analysis.substituted);
        assert!((analysis.confidence - 0.9).abs() < 1e-6);

        let flaky = flaky_auth(DetectionFallback::Substitute);
        assert!(flaky.analyze(b"NOFACE").unwrap().substituted);
        let closed = flaky_auth(DetectionFallback::FailClosed);
        let result = closed.analyze(b"NOFACE").unwrap();
        assert!(!result.detected);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_frame_stream() {
        let auth = flaky_auth(DetectionFallback::Substitute).with_stream_min_frames(2);
        auth.enroll("jo", b"jo face", None).unwrap();
        let mut acc = auth.frame_accumulator();

        let first = auth.analyze_frame(&mut acc, b"jo face", Some("jo")).unwrap();
        assert_eq!(first.status, FrameStatus::Accumulating);
        let gap = auth.analyze_frame(&mut acc, b"NOFACE", Some("jo")).unwrap();
        assert_eq!(gap.status, FrameStatus::NoFace);
        assert_eq!(gap.consecutive, 0);

        auth.analyze_frame(&mut acc, b"jo face", Some("jo")).unwrap();
        let ready = auth.analyze_frame(&mut acc, b"jo face", Some("jo")).unwrap();
        assert_eq!(ready.status, FrameStatus::Analyzed);
        assert!(ready.analysis.is_some());
        let self_match = ready.self_match.unwrap();
        assert!(self_match.matched);
    }
}
