//! FaceAuth: a facial-expression second factor. Face extraction, similarity, and an
//! expression-gated decision engine with enrollment and verification on top.

pub mod capture;
pub mod config;
pub mod decision;
pub mod embedding;
pub mod extractor;
pub mod protocol;
pub mod session;
pub mod similarity;
pub mod simulated;
pub mod store;
pub mod stream;
pub mod types;

pub use capture::{decode_base64, decode_image, is_supported_format};
pub use config::{ConfigFile, EngineConfig};
pub use decision::{Decision, DecisionEngine, DecisionMode, DecisionPath, DecisionPolicy};
pub use embedding::{FaceModelPaths, OnnxFaceExtractor};
pub use extractor::{select_extractor, Capability, CapabilityReport, FaceExtractor, FaceInput};
pub use protocol::{DetectionFallback, FaceAuthenticator};
pub use session::{LoginSession, LoginState};
pub use similarity::{
    cosine_similarity, distance_to_similarity, find_matches, normalized_similarity, CosineScorer,
    IdentityScore, PairVerdict, PairVerifier, PairwiseScorer, SimilarityScorer,
};
pub use simulated::SimulatedExtractor;
pub use store::{
    FileTemplateStore, FsImageStore, ImageStore, InMemoryImageStore, InMemoryTemplateStore,
    TemplateStore,
};
pub use stream::{FrameAccumulator, FrameReport, FrameStatus};
pub use types::*;
