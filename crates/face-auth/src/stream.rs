//! Frame-stream gating for continuous capture.

use serde::{Deserialize, Serialize};

use crate::types::{ExpressionAnalysis, VerificationOutcome};

/// Counts consecutive frames with a detected face.
///
/// Full analysis is only worth running once a face has been stable for
/// `min_frames` frames; any frame without a face starts the count over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameAccumulator {
    min_frames: usize,
    consecutive: usize,
    total: u64,
}

impl FrameAccumulator {
    pub fn new(min_frames: usize) -> Self {
        Self {
            min_frames: min_frames.max(1),
            consecutive: 0,
            total: 0,
        }
    }

    /// Record a frame. Returns true when the frame should be fully analysed.
    pub fn push(&mut self, detected: bool) -> bool {
        self.total += 1;
        if !detected {
            self.consecutive = 0;
            return false;
        }
        self.consecutive += 1;
        self.consecutive >= self.min_frames
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> usize {
        self.consecutive
    }

    pub fn min_frames(&self) -> usize {
        self.min_frames
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    NoFace,
    Accumulating,
    Analyzed,
}

/// What a single frame produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub status: FrameStatus,
    pub consecutive: usize,
    pub required: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<ExpressionAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_match: Option<VerificationOutcome>,
}
