//! The feature-extraction capability and its selection at startup.

use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use serde::Serialize;

use crate::embedding::{FaceModelPaths, OnnxFaceExtractor};
use crate::similarity::PairVerifier;
use crate::simulated::SimulatedExtractor;
use crate::types::{AuthResult, ExtractorKind, FaceObservation};

/// Input to an extractor: encoded bytes or an already-decoded pixel buffer.
#[derive(Debug, Clone, Copy)]
pub enum FaceInput<'a> {
    Encoded(&'a [u8]),
    Decoded(&'a DynamicImage),
}

impl<'a> FaceInput<'a> {
    /// Bytes identifying the capture's content.
    pub fn content(&self) -> &'a [u8] {
        match *self {
            FaceInput::Encoded(bytes) => bytes,
            FaceInput::Decoded(img) => img.as_bytes(),
        }
    }
}

impl<'a> From<&'a [u8]> for FaceInput<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        FaceInput::Encoded(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for FaceInput<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        FaceInput::Encoded(bytes.as_slice())
    }
}

impl<'a> From<&'a DynamicImage> for FaceInput<'a> {
    fn from(img: &'a DynamicImage) -> Self {
        FaceInput::Decoded(img)
    }
}

/// Converts a capture into a [`FaceObservation`].
///
/// "No face found" is a normal outcome (`detected == false`), never an error.
/// Errors are reserved for undecodable input and failed inference.
pub trait FaceExtractor: Send + Sync {
    fn kind(&self) -> ExtractorKind;

    fn extract(&self, input: FaceInput<'_>) -> AuthResult<FaceObservation>;

    /// The pairwise image verifier backing this extractor, if it has one.
    fn pair_verifier(self: Arc<Self>) -> Option<Arc<dyn PairVerifier>> {
        None
    }
}

/// The extractor chosen at process start.
pub type Capability = Arc<dyn FaceExtractor>;

/// How the capability was selected.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityReport {
    pub kind: ExtractorKind,
    /// True when the real capability was wanted or expected but could not run.
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Pick the extractor: ONNX models from `model_dir` if they load, simulated otherwise.
///
/// Falling back to simulated mode weakens the security guarantee, so it is
/// logged at `warn` and reported as degraded.
pub fn select_extractor(
    model_dir: Option<&Path>,
    verify_distance: f32,
    embedding_dim: usize,
) -> (Capability, CapabilityReport) {
    let simulated = || -> Capability { Arc::new(SimulatedExtractor::new(embedding_dim)) };

    let Some(dir) = model_dir else {
        tracing::warn!(
            "No face model directory configured. Running in simulated mode; \
             facial verification offers no real identity guarantee."
        );
        return (
            simulated(),
            CapabilityReport {
                kind: ExtractorKind::Simulated,
                degraded: true,
                reason: Some("no model directory configured".to_string()),
            },
        );
    };

    let paths = FaceModelPaths::in_dir(dir);
    match OnnxFaceExtractor::load(&paths, verify_distance) {
        Ok(extractor) => {
            tracing::info!("Face models loaded from {}", dir.display());
            (
                Arc::new(extractor),
                CapabilityReport {
                    kind: ExtractorKind::Onnx,
                    degraded: false,
                    reason: None,
                },
            )
        }
        Err(e) => {
            tracing::warn!("{e}. Falling back to simulated face extraction.");
            (
                simulated(),
                CapabilityReport {
                    kind: ExtractorKind::Simulated,
                    degraded: true,
                    reason: Some(e.to_string()),
                },
            )
        }
    }
}
