//! Face detection, embedding, and expression classification via ONNX Runtime.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;

use crate::capture::decode_image;
use crate::extractor::{FaceExtractor, FaceInput};
use crate::similarity::{cosine_similarity, PairVerdict, PairVerifier};
use crate::types::{
    AuthError, AuthResult, Expression, ExpressionScores, ExtractorKind, FaceObservation,
};

pub const DETECTOR_FILENAME: &str = "face_detector.onnx";
pub const EMBEDDER_FILENAME: &str = "face_embedder.onnx";
pub const EXPRESSION_FILENAME: &str = "face_expression.onnx";

/// Detector input (UltraFace RFB-320).
const DETECT_WIDTH: u32 = 320;
const DETECT_HEIGHT: u32 = 240;
const DETECT_MEAN: f32 = 127.0;
const DETECT_SCALE: f32 = 128.0;
/// Minimum face score for a box to count as a detection.
pub const DETECTION_CONFIDENCE: f32 = 0.7;

/// Embedder input (ArcFace).
const EMBED_SIZE: u32 = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_SCALE: f32 = 127.5;

/// Expression classifier input (FER+).
const EXPRESSION_SIZE: u32 = 64;

/// FER+ output order.
const FERPLUS_LABELS: [Expression; 8] = [
    Expression::Neutral,
    Expression::Happy,
    Expression::Surprised,
    Expression::Sad,
    Expression::Angry,
    Expression::Disgusted,
    Expression::Fearful,
    Expression::Contempt,
];

/// Locations of the three models.
#[derive(Debug, Clone)]
pub struct FaceModelPaths {
    pub detector: PathBuf,
    pub embedder: PathBuf,
    pub expression: PathBuf,
}

impl FaceModelPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_FILENAME),
            embedder: dir.join(EMBEDDER_FILENAME),
            expression: dir.join(EXPRESSION_FILENAME),
        }
    }
}

/// Normalised face box, corners in [0,1].
#[derive(Debug, Clone, Copy, PartialEq)]
struct FaceBox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

/// Real extraction capability backed by ONNX models.
pub struct OnnxFaceExtractor {
    detector: Mutex<Session>,
    embedder: Mutex<Session>,
    expression: Mutex<Session>,
    verify_distance: f32,
}

impl std::fmt::Debug for OnnxFaceExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxFaceExtractor")
            .field("verify_distance", &self.verify_distance)
            .finish_non_exhaustive()
    }
}

fn load_session(path: &Path) -> AuthResult<Session> {
    if !path.exists() {
        return Err(AuthError::ExtractorUnavailable(format!(
            "Face model not found at {}",
            path.display()
        )));
    }
    tracing::info!("Loading face model from {}", path.display());
    Session::builder()
        .and_then(|b| b.with_intra_threads(1).map_err(ort::Error::from))
        .and_then(|mut b| b.commit_from_file(path))
        .map_err(|e| {
            AuthError::ExtractorUnavailable(format!(
                "Failed to load ONNX model {}: {e}",
                path.display()
            ))
        })
}

fn run_single(session: &Mutex<Session>, tensor: Array4<f32>) -> AuthResult<Vec<f32>> {
    let input = Tensor::from_array(tensor)
        .map_err(|e| AuthError::Extraction(format!("Failed to create input tensor: {e}")))?;
    let mut session = session
        .lock()
        .map_err(|_| AuthError::Extraction("model session lock poisoned".to_string()))?;
    let outputs = session
        .run(ort::inputs![input])
        .map_err(|e| AuthError::Extraction(format!("ONNX inference failed: {e}")))?;
    let (_shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| AuthError::Extraction(format!("Failed to extract output: {e}")))?;
    Ok(data.to_vec())
}

fn l2_normalize(v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        exps.iter().map(|e| e / sum).collect()
    } else {
        vec![0.0; logits.len()]
    }
}

/// Best box from UltraFace outputs: scores `[1,N,2]`, boxes `[1,N,4]`.
fn best_face(scores: &[f32], boxes: &[f32], min_score: f32) -> Option<FaceBox> {
    let n = (scores.len() / 2).min(boxes.len() / 4);
    (0..n)
        .map(|i| FaceBox {
            x1: boxes[i * 4],
            y1: boxes[i * 4 + 1],
            x2: boxes[i * 4 + 2],
            y2: boxes[i * 4 + 3],
            score: scores[i * 2 + 1],
        })
        .filter(|b| b.score >= min_score && b.x2 > b.x1 && b.y2 > b.y1)
        .max_by(|a, b| a.score.total_cmp(&b.score))
}

fn crop_face(img: &DynamicImage, face: &FaceBox) -> DynamicImage {
    let (w, h) = (img.width() as f32, img.height() as f32);
    let x1 = (face.x1.clamp(0.0, 1.0) * w) as u32;
    let y1 = (face.y1.clamp(0.0, 1.0) * h) as u32;
    let x2 = (face.x2.clamp(0.0, 1.0) * w) as u32;
    let y2 = (face.y2.clamp(0.0, 1.0) * h) as u32;
    let cw = x2.saturating_sub(x1).max(1);
    let ch = y2.saturating_sub(y1).max(1);
    img.crop_imm(x1, y1, cw, ch)
}

fn rgb_tensor(img: &DynamicImage, width: u32, height: u32, mean: f32, scale: f32) -> Array4<f32> {
    let rgb = img
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgb8();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3usize {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - mean) / scale;
        }
    }
    tensor
}

fn gray_tensor(img: &DynamicImage, size: u32) -> Array4<f32> {
    let gray = img.resize_exact(size, size, FilterType::Triangle).to_luma8();
    let mut tensor = Array4::<f32>::zeros((1, 1, size as usize, size as usize));
    for (x, y, pixel) in gray.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = pixel[0] as f32;
    }
    tensor
}

impl OnnxFaceExtractor {
    /// Load all three models. Any missing or unloadable model makes the capability unavailable.
    pub fn load(paths: &FaceModelPaths, verify_distance: f32) -> AuthResult<Self> {
        let detector = load_session(&paths.detector)?;
        let embedder = load_session(&paths.embedder)?;
        let expression = load_session(&paths.expression)?;
        Ok(Self {
            detector: Mutex::new(detector),
            embedder: Mutex::new(embedder),
            expression: Mutex::new(expression),
            verify_distance,
        })
    }

    fn detect(&self, img: &DynamicImage) -> AuthResult<Option<FaceBox>> {
        let input = Tensor::from_array(rgb_tensor(
            img,
            DETECT_WIDTH,
            DETECT_HEIGHT,
            DETECT_MEAN,
            DETECT_SCALE,
        ))
        .map_err(|e| AuthError::Extraction(format!("Failed to create input tensor: {e}")))?;

        let mut session = self
            .detector
            .lock()
            .map_err(|_| AuthError::Extraction("model session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| AuthError::Extraction(format!("Face detection failed: {e}")))?;
        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AuthError::Extraction(format!("Failed to extract scores: {e}")))?;
        let (_, boxes) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| AuthError::Extraction(format!("Failed to extract boxes: {e}")))?;

        Ok(best_face(scores, boxes, DETECTION_CONFIDENCE))
    }

    fn embed(&self, face: &DynamicImage) -> AuthResult<Vec<f32>> {
        let raw = run_single(
            &self.embedder,
            rgb_tensor(face, EMBED_SIZE, EMBED_SIZE, EMBED_MEAN, EMBED_SCALE),
        )?;
        Ok(l2_normalize(raw))
    }

    fn classify(&self, face: &DynamicImage) -> AuthResult<ExpressionScores> {
        let logits = run_single(&self.expression, gray_tensor(face, EXPRESSION_SIZE))?;
        Ok(FERPLUS_LABELS
            .iter()
            .copied()
            .zip(softmax(&logits))
            .collect())
    }

    fn observe(&self, img: &DynamicImage) -> AuthResult<FaceObservation> {
        let Some(face) = self.detect(img)? else {
            tracing::debug!("No face above {DETECTION_CONFIDENCE} in capture");
            return Ok(FaceObservation::undetected(ExtractorKind::Onnx));
        };
        let crop = crop_face(img, &face);
        let embedding = self.embed(&crop)?;
        let scores = self.classify(&crop)?;
        tracing::debug!("Face detected with score {:.3}", face.score);
        Ok(FaceObservation::detected(embedding, scores, ExtractorKind::Onnx))
    }
}

impl FaceExtractor for OnnxFaceExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Onnx
    }

    fn extract(&self, input: FaceInput<'_>) -> AuthResult<FaceObservation> {
        match input {
            FaceInput::Encoded(bytes) => self.observe(&decode_image(bytes)?),
            FaceInput::Decoded(img) => self.observe(img),
        }
    }

    fn pair_verifier(self: Arc<Self>) -> Option<Arc<dyn PairVerifier>> {
        Some(self)
    }
}

impl PairVerifier for OnnxFaceExtractor {
    fn verify_pair(&self, a: &[u8], b: &[u8]) -> AuthResult<PairVerdict> {
        let first = self.observe(&decode_image(a)?)?;
        let second = self.observe(&decode_image(b)?)?;
        if !first.detected || !second.detected {
            return Ok(PairVerdict {
                distance: 1.0,
                verified: false,
            });
        }
        let distance = 1.0 - cosine_similarity(&first.embedding, &second.embedding);
        Ok(PairVerdict {
            distance,
            verified: distance <= self.verify_distance,
        })
    }
}
