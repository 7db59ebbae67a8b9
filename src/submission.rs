//! Submission Coordinator
//!
//! Aggregates completed forms and signatures behind the confirmation gate
//! and produces the immutable receipt. The submission id and timestamp are
//! generated once, idempotently, on first arrival at the final step.
//! Backend failure is non-destructive: all entered state is preserved and
//! the submit can simply be retried.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::form::{FormRecord, FormStatus, FormType};
use crate::signature::{SignatureArtifact, SignatureSequence};

/// The four independent confirmations required before submit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmations {
    #[serde(default)]
    pub accuracy: bool,
    #[serde(default)]
    pub completeness: bool,
    #[serde(default)]
    pub authorization: bool,
    #[serde(default)]
    pub penalties_acknowledged: bool,
}

impl Confirmations {
    pub fn all_confirmed(&self) -> bool {
        self.accuracy && self.completeness && self.authorization && self.penalties_acknowledged
    }
}

/// Which confirmation a host is toggling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationKind {
    Accuracy,
    Completeness,
    Authorization,
    PenaltiesAcknowledged,
}

/// One row of the readiness status table surfaced alongside the gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormReadiness {
    pub form_type: FormType,
    pub form_completed: bool,
    pub signature_present: bool,
}

impl FormReadiness {
    pub fn is_ready(&self) -> bool {
        self.form_completed && self.signature_present
    }
}

/// Build the per-form readiness table
pub fn readiness(
    forms: &BTreeMap<FormType, FormRecord>,
    signatures: &SignatureSequence,
) -> Vec<FormReadiness> {
    FormType::required_forms()
        .iter()
        .map(|form_type| FormReadiness {
            form_type: *form_type,
            form_completed: forms
                .get(form_type)
                .map(|f| matches!(f.status, FormStatus::Completed | FormStatus::Submitted))
                .unwrap_or(false),
            signature_present: signatures.artifact_for(form_type.as_str()).is_some(),
        })
        .collect()
}

/// Aggregate payload forwarded to the persistence collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionPayload {
    pub session_id: Uuid,
    pub submission_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub employee_ref: Option<String>,
    pub forms: Vec<FormRecord>,
    pub signatures: Vec<SignatureArtifact>,
}

/// Errors from the submission path
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("All four confirmations must be checked before submitting")]
    ConfirmationsIncomplete,

    #[error("Packet is not ready: {missing:?}")]
    NotReady { missing: Vec<String> },

    #[error("This packet was already submitted")]
    AlreadySubmitted,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors from the external persistence backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend rejected the submission: {0}")]
    Rejected(String),

    #[error("Backend unreachable: {0}")]
    Transport(String),
}

/// External persistence collaborator
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Persist the finalized {forms, signatures} payload for a session
    async fn submit(&self, payload: &SubmissionPayload) -> Result<(), BackendError>;

    /// Finalize the session server-side after a successful submit
    async fn finalize_session(&self, session_id: Uuid) -> Result<(), BackendError>;
}

/// Immutable record of a successful submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub submission_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub confirmations: Confirmations,
    /// Form types included in the packet
    pub forms_included: Vec<String>,
    /// Form keys with an accepted signature
    pub signatures_included: Vec<String>,
    /// Hex sha-256 over the serialized payload, for later verification
    pub payload_digest: String,
}

/// Drives the confirmation gate and receipt generation for one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionCoordinator {
    /// Set once on first arrival at the final step
    seed: Option<(Uuid, DateTime<Utc>)>,
    pub confirmations: Confirmations,
    receipt: Option<SubmissionReceipt>,
}

impl SubmissionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the submission id and timestamp exactly once. Safe to call
    /// on every render of the final step.
    pub fn ensure_seed(&mut self) -> (Uuid, DateTime<Utc>) {
        *self
            .seed
            .get_or_insert_with(|| (Uuid::new_v4(), Utc::now()))
    }

    pub fn seed(&self) -> Option<(Uuid, DateTime<Utc>)> {
        self.seed
    }

    pub fn set_confirmation(&mut self, kind: ConfirmationKind, value: bool) {
        match kind {
            ConfirmationKind::Accuracy => self.confirmations.accuracy = value,
            ConfirmationKind::Completeness => self.confirmations.completeness = value,
            ConfirmationKind::Authorization => self.confirmations.authorization = value,
            ConfirmationKind::PenaltiesAcknowledged => {
                self.confirmations.penalties_acknowledged = value
            }
        }
    }

    /// The submit button state. Confirmations gate submission regardless
    /// of readiness, which is surfaced separately.
    pub fn can_submit(&self) -> bool {
        self.confirmations.all_confirmed() && self.receipt.is_none()
    }

    pub fn receipt(&self) -> Option<&SubmissionReceipt> {
        self.receipt.as_ref()
    }

    /// Run the full gate and forward the packet to the backend. On failure
    /// every piece of local state is left untouched so the caller can
    /// retry; on success the immutable receipt is recorded.
    pub async fn submit(
        &mut self,
        session_id: Uuid,
        employee_ref: Option<String>,
        forms: &BTreeMap<FormType, FormRecord>,
        signatures: &SignatureSequence,
        backend: &dyn PersistenceBackend,
    ) -> Result<&SubmissionReceipt, SubmissionError> {
        if self.receipt.is_some() {
            return Err(SubmissionError::AlreadySubmitted);
        }
        if !self.confirmations.all_confirmed() {
            return Err(SubmissionError::ConfirmationsIncomplete);
        }

        let table = readiness(forms, signatures);
        let missing: Vec<String> = table
            .iter()
            .filter(|row| !row.is_ready())
            .map(|row| row.form_type.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SubmissionError::NotReady { missing });
        }

        let (submission_id, submitted_at) = self.ensure_seed();
        let payload = SubmissionPayload {
            session_id,
            submission_id,
            submitted_at,
            employee_ref,
            forms: forms.values().cloned().collect(),
            signatures: signatures.artifacts().to_vec(),
        };

        backend.submit(&payload).await?;
        tracing::info!(%submission_id, %session_id, "Onboarding packet accepted by backend");

        self.receipt = Some(SubmissionReceipt {
            submission_id,
            submitted_at,
            confirmations: self.confirmations,
            forms_included: payload.forms.iter().map(|f| f.form_type.to_string()).collect(),
            signatures_included: payload
                .signatures
                .iter()
                .map(|s| s.form_key.clone())
                .collect(),
            payload_digest: payload_digest(&payload),
        });

        // receipt was just set
        self.receipt
            .as_ref()
            .ok_or(SubmissionError::AlreadySubmitted)
    }
}

/// Hex sha-256 over the canonical JSON serialization of the payload
pub fn payload_digest(payload: &SubmissionPayload) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(payload).unwrap_or_default());
    let hash = hasher.finalize();
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// Recording backend for tests and local development
#[derive(Default)]
pub struct InMemoryBackend {
    pub fail_submits: std::sync::atomic::AtomicBool,
    pub submitted: std::sync::Mutex<Vec<SubmissionPayload>>,
    pub finalized: std::sync::Mutex<Vec<Uuid>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let backend = Self::default();
        backend
            .fail_submits
            .store(true, std::sync::atomic::Ordering::SeqCst);
        backend
    }
}

#[async_trait]
impl PersistenceBackend for InMemoryBackend {
    async fn submit(&self, payload: &SubmissionPayload) -> Result<(), BackendError> {
        if self.fail_submits.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(BackendError::Transport("connection reset".to_string()));
        }
        self.submitted
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(payload.clone());
        Ok(())
    }

    async fn finalize_session(&self, session_id: Uuid) -> Result<(), BackendError> {
        self.finalized
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(session_id);
        Ok(())
    }
}
