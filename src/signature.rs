//! Signature Capture
//!
//! Per-artifact pad state machine: empty → capturing → captured → (clear)
//! → empty. Points carry position plus a pressure sample (0.5 when the
//! input device reports none). Pressure scales the rendered stroke width
//! between 1× and 4× but only in the raster; the stored metadata keeps the
//! raw samples. Required artifacts for a multi-form set are captured
//! strictly in sequence, each bound to form-specific attestation text.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pressure assumed when the input device reports none
pub const DEFAULT_PRESSURE: f32 = 0.5;

/// Stroke width multiplier for a pressure sample: 1× at zero pressure up
/// to 4× at full pressure. Affects only the raster.
pub fn stroke_width(pressure: f32) -> f32 {
    1.0 + pressure.clamp(0.0, 1.0) * 3.0
}

/// One sampled contact point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignaturePoint {
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
}

/// Pad capture state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PadState {
    Empty,
    Capturing,
    Captured,
}

/// Finalized capture metadata. Semantic record, independent of rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureMetadata {
    /// First-contact timestamp
    pub started_at: DateTime<Utc>,
    /// Elapsed capture duration in milliseconds
    pub duration_ms: i64,
    pub point_count: usize,
    pub pressure_samples: Vec<f32>,
}

impl SignatureMetadata {
    /// Pressure sensitivity is genuine if any sample deviates from the
    /// reported-none default.
    pub fn has_genuine_pressure(&self) -> bool {
        self.pressure_samples
            .iter()
            .any(|p| (p - DEFAULT_PRESSURE).abs() > f32::EPSILON)
    }
}

/// An accepted signature bound to one form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureArtifact {
    pub form_key: String,
    /// Opaque raster encoding
    pub raster: String,
    pub metadata: SignatureMetadata,
}

/// Errors from signature capture and sequencing
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("No captured signature on the pad")]
    NothingCaptured,

    #[error("A signature with zero points cannot be accepted")]
    EmptyArtifact,

    #[error("Expected signature for '{expected}', got '{got}'")]
    OutOfOrder { expected: String, got: String },

    #[error("All required signatures are already captured")]
    AlreadyComplete,
}

/// Interactive signature pad for one artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignaturePad {
    pub state: PadState,
    points: Vec<SignaturePoint>,
    started_at: Option<DateTime<Utc>>,
}

impl SignaturePad {
    pub fn new() -> Self {
        Self {
            state: PadState::Empty,
            points: Vec::new(),
            started_at: None,
        }
    }

    /// First contact begins a capture session; subsequent contacts extend it
    pub fn press(&mut self, x: f32, y: f32, pressure: Option<f32>) {
        if self.state == PadState::Captured {
            return; // captured pad must be cleared before re-signing
        }
        if self.state == PadState::Empty {
            self.state = PadState::Capturing;
            self.started_at = Some(Utc::now());
        }
        self.points.push(SignaturePoint {
            x,
            y,
            pressure: pressure.unwrap_or(DEFAULT_PRESSURE),
        });
    }

    /// Add a point to the active stroke. Ignored while not capturing.
    pub fn extend(&mut self, x: f32, y: f32, pressure: Option<f32>) {
        if self.state != PadState::Capturing {
            return;
        }
        self.points.push(SignaturePoint {
            x,
            y,
            pressure: pressure.unwrap_or(DEFAULT_PRESSURE),
        });
    }

    /// Finalize the capture: serialize the raster and freeze the metadata.
    /// Releasing while not capturing is a no-op; zero recorded points can
    /// never yield an artifact.
    pub fn release(&mut self) -> Option<(String, SignatureMetadata)> {
        if self.state != PadState::Capturing || self.points.is_empty() {
            return None;
        }
        let started_at = self.started_at?;

        let raster = encode_raster(&self.points);
        let metadata = SignatureMetadata {
            started_at,
            duration_ms: (Utc::now() - started_at).num_milliseconds(),
            point_count: self.points.len(),
            pressure_samples: self.points.iter().map(|p| p.pressure).collect(),
        };

        self.state = PadState::Captured;
        Some((raster, metadata))
    }

    /// Discard everything and return to empty
    pub fn clear(&mut self) {
        self.state = PadState::Empty;
        self.points.clear();
        self.started_at = None;
    }

    /// The per-artifact continue action is enabled only once a raster exists
    pub fn can_continue(&self) -> bool {
        self.state == PadState::Captured
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }
}

impl Default for SignaturePad {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize stroke geometry (with pressure-scaled widths) to the opaque
/// raster encoding.
fn encode_raster(points: &[SignaturePoint]) -> String {
    #[derive(Serialize)]
    struct RasterPoint {
        x: f32,
        y: f32,
        w: f32,
    }

    let rendered: Vec<RasterPoint> = points
        .iter()
        .map(|p| RasterPoint {
            x: p.x,
            y: p.y,
            w: stroke_width(p.pressure),
        })
        .collect();

    // serializing a plain vec of finite floats cannot fail
    let bytes = serde_json::to_vec(&rendered).unwrap_or_default();
    STANDARD.encode(bytes)
}

/// One required signature in a multi-form set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRequirement {
    pub form_key: String,
    /// Legal acknowledgement text bound to this artifact
    pub attestation: String,
}

/// Progress after accepting an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceProgress {
    /// Advanced to the named next requirement
    Advanced { next_form_key: String },
    /// The final artifact in the sequence was accepted
    Complete,
}

/// Ordered capture of all required artifacts. Artifacts are accepted
/// strictly in sequence; completion is reached only when the final one
/// is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureSequence {
    requirements: Vec<SignatureRequirement>,
    current_index: usize,
    artifacts: Vec<SignatureArtifact>,
}

impl SignatureSequence {
    pub fn new(requirements: Vec<SignatureRequirement>) -> Self {
        Self {
            requirements,
            current_index: 0,
            artifacts: Vec::new(),
        }
    }

    /// The requirement currently awaiting capture
    pub fn current(&self) -> Option<&SignatureRequirement> {
        self.requirements.get(self.current_index)
    }

    pub fn is_complete(&self) -> bool {
        self.current_index >= self.requirements.len()
    }

    pub fn artifacts(&self) -> &[SignatureArtifact] {
        &self.artifacts
    }

    pub fn artifact_for(&self, form_key: &str) -> Option<&SignatureArtifact> {
        self.artifacts.iter().find(|a| a.form_key == form_key)
    }

    /// Accept an artifact for the current requirement
    pub fn accept(&mut self, artifact: SignatureArtifact) -> Result<SequenceProgress, SignatureError> {
        let current = self.current().ok_or(SignatureError::AlreadyComplete)?;

        if artifact.form_key != current.form_key {
            return Err(SignatureError::OutOfOrder {
                expected: current.form_key.clone(),
                got: artifact.form_key,
            });
        }
        if artifact.metadata.point_count == 0 {
            return Err(SignatureError::EmptyArtifact);
        }

        self.artifacts.push(artifact);
        self.current_index += 1;

        match self.current() {
            Some(next) => Ok(SequenceProgress::Advanced {
                next_form_key: next.form_key.clone(),
            }),
            None => Ok(SequenceProgress::Complete),
        }
    }
}
