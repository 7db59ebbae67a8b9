//! Session Controller
//!
//! Top-level owner of one onboarding attempt. Drives step activation,
//! owns the snapshot autosave and inactivity monitor tasks, and routes
//! data bottom-up: normalized document fields feed forms, completed forms
//! feed signatures, and both feed submission.
//!
//! All interaction-driven mutation is synchronous relative to the caller;
//! the only concurrent readers are the two owned background tasks, which
//! go through the same state lock.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::form::{FormRecord, FormType, WithholdingEstimate};
use crate::locale::{resolve, Language, MessageKey};
use crate::monitor::{
    spawn_autosave, spawn_inactivity_monitor, ActivityTracker, InactivityConfig, InactivityEvent,
    TaskHandle,
};
use crate::normalize::{self, NormalizedDocument};
use crate::recognition::{DocumentCapture, DocumentKind, RecognitionService};
use crate::session::{OnboardingSession, OnboardingStep};
use crate::signature::{
    SequenceProgress, SignatureArtifact, SignatureMetadata, SignaturePad, SignatureRequirement,
    SignatureSequence,
};
use crate::snapshot::{SnapshotEnvelope, SnapshotStore, SNAPSHOT_EXPIRY_HOURS};
use crate::submission::{
    readiness, ConfirmationKind, FormReadiness, PersistenceBackend, SubmissionCoordinator,
    SubmissionReceipt,
};
use crate::IntakeError;

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Key the snapshot is stored under
    pub snapshot_key: String,
    /// Seconds between snapshot writes
    pub autosave_interval_secs: u64,
    pub inactivity: InactivityConfig,
    /// Hours before a stored snapshot stops being resumable
    pub snapshot_expiry_hours: i64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            snapshot_key: "onboarding_session".to_string(),
            autosave_interval_secs: 15,
            inactivity: InactivityConfig::default(),
            snapshot_expiry_hours: SNAPSHOT_EXPIRY_HOURS,
        }
    }
}

/// Everything one wizard instance owns. Serialized whole into the snapshot
/// so a resume reconstructs identical field-level state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WizardState {
    pub session: OnboardingSession,
    pub captures: BTreeMap<Uuid, DocumentCapture>,
    pub normalized: BTreeMap<Uuid, NormalizedDocument>,
    pub forms: BTreeMap<FormType, FormRecord>,
    pub pad: SignaturePad,
    /// Raster + metadata from the latest pad release, awaiting acceptance
    pub pending_signature: Option<(String, SignatureMetadata)>,
    pub signatures: SignatureSequence,
    pub coordinator: SubmissionCoordinator,
}

impl WizardState {
    pub fn new(language: Language) -> Self {
        let forms = FormType::required_forms()
            .iter()
            .map(|form_type| (*form_type, FormRecord::new(*form_type)))
            .collect();

        Self {
            session: OnboardingSession::new(language),
            captures: BTreeMap::new(),
            normalized: BTreeMap::new(),
            forms,
            pad: SignaturePad::new(),
            pending_signature: None,
            signatures: SignatureSequence::new(signature_requirements(language)),
            coordinator: SubmissionCoordinator::new(),
        }
    }

    /// Merged auto-fill set, re-derived from all completed documents
    pub fn merged_fields(&self) -> BTreeMap<String, String> {
        normalize::merge_completed(self.normalized.values())
            .into_iter()
            .map(|(key, field)| (key, field.value))
            .collect()
    }
}

fn signature_requirements(language: Language) -> Vec<SignatureRequirement> {
    vec![
        SignatureRequirement {
            form_key: FormType::FederalW4.as_str().to_string(),
            attestation: resolve(language, MessageKey::AttestationFederalW4).to_string(),
        },
        SignatureRequirement {
            form_key: FormType::StateWithholding.as_str().to_string(),
            attestation: resolve(language, MessageKey::AttestationStateWithholding).to_string(),
        },
    ]
}

/// Result of looking for a resumable snapshot on mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOutcome {
    /// No usable snapshot; the wizard starts fresh
    Fresh,
    /// A snapshot younger than the expiry window exists; the host must
    /// surface the resume-or-restart choice before rendering any step
    ResumeAvailable { saved_at: chrono::DateTime<chrono::Utc> },
}

/// The user's answer to the resume prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    Resume,
    Restart,
}

/// Host callback fired on every step change: (step index, state)
pub type StepChangeCallback = Box<dyn Fn(usize, &WizardState) + Send + Sync>;
/// Host callback fired once the wizard completes successfully
pub type CompletionCallback = Box<dyn Fn(&WizardState) + Send + Sync>;

/// Top-level state machine for one onboarding attempt
pub struct SessionController {
    config: ControllerConfig,
    store: Arc<dyn SnapshotStore>,
    backend: Arc<dyn PersistenceBackend>,
    recognition: Arc<dyn RecognitionService>,
    state: Arc<Mutex<WizardState>>,
    activity: ActivityTracker,
    tasks: Vec<TaskHandle>,
    on_step_change: Option<StepChangeCallback>,
    on_complete: Option<CompletionCallback>,
}

impl SessionController {
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn SnapshotStore>,
        backend: Arc<dyn PersistenceBackend>,
        recognition: Arc<dyn RecognitionService>,
        language: Language,
    ) -> Self {
        Self {
            config,
            store,
            backend,
            recognition,
            state: Arc::new(Mutex::new(WizardState::new(language))),
            activity: ActivityTracker::new(),
            tasks: Vec::new(),
            on_step_change: None,
            on_complete: None,
        }
    }

    /// Attach the step-change instrumentation callback
    pub fn with_step_callback(mut self, callback: StepChangeCallback) -> Self {
        self.on_step_change = Some(callback);
        self
    }

    /// Attach the wizard-completion callback
    pub fn with_completion_callback(mut self, callback: CompletionCallback) -> Self {
        self.on_complete = Some(callback);
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, WizardState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run a read-only closure against the wizard state
    pub fn with_state<R>(&self, f: impl FnOnce(&WizardState) -> R) -> R {
        f(&self.lock_state())
    }

    // ────────────────────────────────────────────────────────────────────
    // Mount / resume / background tasks
    // ────────────────────────────────────────────────────────────────────

    /// Look for a resumable snapshot. Must run before rendering any step.
    pub async fn mount(&self) -> Result<MountOutcome, IntakeError> {
        let envelope = self.store.load(&self.config.snapshot_key).await?;

        match envelope {
            None => Ok(MountOutcome::Fresh),
            Some(envelope) => {
                if envelope.is_expired(chrono::Utc::now(), self.config.snapshot_expiry_hours) {
                    info!("Stored snapshot is past the expiry window; discarding");
                    self.store.clear(&self.config.snapshot_key).await?;
                    Ok(MountOutcome::Fresh)
                } else {
                    Ok(MountOutcome::ResumeAvailable {
                        saved_at: envelope.saved_at,
                    })
                }
            }
        }
    }

    /// Apply the user's resume-or-restart choice
    pub async fn resolve_resume(&self, decision: ResumeDecision) -> Result<(), IntakeError> {
        match decision {
            ResumeDecision::Resume => {
                let envelope = self.store.load(&self.config.snapshot_key).await?;
                let Some(envelope) = envelope else {
                    // Snapshot vanished between mount and the choice
                    warn!("Snapshot missing on resume; starting fresh");
                    return Ok(());
                };
                let restored: WizardState = serde_json::from_value(envelope.payload)
                    .map_err(crate::snapshot::SnapshotStoreError::from)?;
                info!(
                    session_id = %restored.session.session_id,
                    step = %restored.session.current_step,
                    "Resumed session from snapshot"
                );
                *self.lock_state() = restored;
                self.record_activity();
            }
            ResumeDecision::Restart => {
                self.store.clear(&self.config.snapshot_key).await?;
                info!("Restart chosen; stored snapshot cleared");
                self.record_activity();
            }
        }
        Ok(())
    }

    /// Spawn the autosave and inactivity tasks. Returns the event stream
    /// the host forwards back through [`Self::handle_inactivity`].
    pub fn start_background(&mut self) -> mpsc::UnboundedReceiver<InactivityEvent> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let autosave = {
            let state = Arc::clone(&self.state);
            let store = Arc::clone(&self.store);
            let key = self.config.snapshot_key.clone();
            spawn_autosave(self.config.autosave_interval_secs, move || {
                let state = Arc::clone(&state);
                let store = Arc::clone(&store);
                let key = key.clone();
                async move {
                    let envelope = {
                        let mut guard = state.lock().unwrap_or_else(|p| p.into_inner());
                        // A submitted session has had its snapshot cleared;
                        // writing again would offer resume of finished work
                        if guard.coordinator.receipt().is_some() {
                            return Ok(());
                        }
                        guard.session.snapshot_version += 1;
                        SnapshotEnvelope::new(
                            guard.session.snapshot_version,
                            serde_json::to_value(&*guard)?,
                        )
                    };
                    store.save(&key, &envelope).await
                }
            })
        };

        let monitor = spawn_inactivity_monitor(
            self.activity.clone(),
            self.config.inactivity.clone(),
            events_tx,
        );

        self.tasks.push(autosave);
        self.tasks.push(monitor);
        events_rx
    }

    /// Write a snapshot immediately (e.g. before the host suspends)
    pub async fn save_snapshot(&self) -> Result<(), IntakeError> {
        let envelope = {
            let mut guard = self.lock_state();
            guard.session.snapshot_version += 1;
            SnapshotEnvelope::new(
                guard.session.snapshot_version,
                serde_json::to_value(&*guard)
                    .map_err(crate::snapshot::SnapshotStoreError::from)?,
            )
        };
        self.store.save(&self.config.snapshot_key, &envelope).await?;
        Ok(())
    }

    /// Cancel both background tasks. Deterministic teardown: no scheduled
    /// work survives the controller.
    pub async fn teardown(&mut self) {
        for task in self.tasks.drain(..) {
            task.stop().await;
        }
    }

    /// React to a monitor event. The warning is informational (the host
    /// shows the modal); the hard expiry destroys the session.
    pub async fn handle_inactivity(&mut self, event: InactivityEvent) -> Result<(), IntakeError> {
        match event {
            InactivityEvent::Warned => {
                debug!("Inactivity warning raised");
                Ok(())
            }
            InactivityEvent::Expired => self.force_restart().await,
        }
    }

    /// Destructive restart: the snapshot is discarded and the wizard
    /// returns to the first step. Timeout is session-fatal by design,
    /// unlike submission failure which preserves state. The activity
    /// touch starts a fresh quiet period, so the still-running monitor
    /// keeps watching the restarted session.
    pub async fn force_restart(&mut self) -> Result<(), IntakeError> {
        if let Err(e) = self.store.clear(&self.config.snapshot_key).await {
            warn!(error = %e, "Failed to clear snapshot during forced restart");
        }
        let language = self.lock_state().session.language;
        *self.lock_state() = WizardState::new(language);
        self.activity.touch();
        info!("Session forcibly restarted after inactivity expiry");
        Ok(())
    }

    /// Record an interaction on any input channel
    pub fn record_activity(&self) {
        self.activity.touch();
        self.lock_state().session.touch();
    }

    /// Explicit "keep working" action from the warning dialog
    pub fn extend_session(&self) {
        info!("Session extended from inactivity warning");
        self.record_activity();
    }

    // ────────────────────────────────────────────────────────────────────
    // Session fields
    // ────────────────────────────────────────────────────────────────────

    pub fn set_language(&self, language: Language) {
        let mut state = self.lock_state();
        state.session.language = language;
        // Attestation text follows the language until signing has begun
        if state.signatures.artifacts().is_empty() {
            state.signatures = SignatureSequence::new(signature_requirements(language));
        }
        state.session.touch();
        drop(state);
        self.activity.touch();
    }

    /// Record the employee reference the access code resolved to
    pub fn set_employee_ref(&self, employee_ref: impl Into<String>) {
        let mut state = self.lock_state();
        state.session.employee_ref = Some(employee_ref.into());
        state.session.touch();
        drop(state);
        self.activity.touch();
    }

    pub fn set_accessibility(&self, prefs: crate::session::AccessibilityPrefs) {
        let mut state = self.lock_state();
        state.session.accessibility = prefs;
        state.session.touch();
        drop(state);
        self.activity.touch();
    }

    // ────────────────────────────────────────────────────────────────────
    // Navigation
    // ────────────────────────────────────────────────────────────────────

    /// Reasons the current step cannot be left yet
    pub fn step_blockers(&self) -> Vec<String> {
        let state = self.lock_state();
        step_blockers(&state)
    }

    /// Advance to the next step, marking the current one completed
    pub fn next_step(&mut self) -> Result<OnboardingStep, IntakeError> {
        self.activity.touch();
        let step = {
            let mut state = self.lock_state();
            let reasons = step_blockers(&state);
            if !reasons.is_empty() {
                return Err(IntakeError::StepBlocked {
                    step: state.session.current_step.to_string(),
                    reasons,
                });
            }
            freeze_if_leaving_forms(&mut state)?;
            let step = state.session.next_step()?;
            on_enter(&mut state, step);
            if let Some(callback) = &self.on_step_change {
                callback(step.index(), &state);
            }
            step
        };
        debug!(step = %step, "Advanced to step");
        Ok(step)
    }

    /// Move back one step without altering completed work
    pub fn previous_step(&mut self) -> Result<OnboardingStep, IntakeError> {
        self.activity.touch();
        let step = {
            let mut state = self.lock_state();
            let step = state.session.previous_step()?;
            if let Some(callback) = &self.on_step_change {
                callback(step.index(), &state);
            }
            step
        };
        Ok(step)
    }

    /// Jump to a specific step index, subject to the navigation rules.
    /// Jumping one step forward is gated exactly like `next_step`.
    pub fn jump_to(&mut self, index: usize) -> Result<OnboardingStep, IntakeError> {
        self.activity.touch();
        let step = {
            let mut state = self.lock_state();
            if index == state.session.current_step.index() + 1 {
                let reasons = step_blockers(&state);
                if !reasons.is_empty() {
                    return Err(IntakeError::StepBlocked {
                        step: state.session.current_step.to_string(),
                        reasons,
                    });
                }
                freeze_if_leaving_forms(&mut state)?;
            }
            let step = state.session.jump_to(index)?;
            on_enter(&mut state, step);
            if let Some(callback) = &self.on_step_change {
                callback(step.index(), &state);
            }
            step
        };
        Ok(step)
    }

    // ────────────────────────────────────────────────────────────────────
    // Documents
    // ────────────────────────────────────────────────────────────────────

    /// Upload one document and run recognition on it. Each document is
    /// independent; a failure here is recorded on the capture and does
    /// not block other documents.
    pub async fn upload_document(
        &self,
        kind: DocumentKind,
        file_ref: impl Into<String>,
        bytes: &[u8],
    ) -> Result<Uuid, IntakeError> {
        self.activity.touch();
        let capture_id = {
            let mut state = self.lock_state();
            let capture = DocumentCapture::new(kind, file_ref);
            let capture_id = capture.capture_id;
            state.captures.insert(capture_id, capture);
            capture_id
        };
        self.run_recognition(capture_id, kind, bytes).await;
        Ok(capture_id)
    }

    /// Retry recognition on a failed capture
    pub async fn retry_document(&self, capture_id: Uuid, bytes: &[u8]) -> Result<(), IntakeError> {
        self.activity.touch();
        let kind = {
            let mut state = self.lock_state();
            let capture = state
                .captures
                .get_mut(&capture_id)
                .ok_or(IntakeError::UnknownCapture(capture_id))?;
            capture.retry()?;
            capture.kind
        };
        self.run_recognition(capture_id, kind, bytes).await;
        Ok(())
    }

    async fn run_recognition(&self, capture_id: Uuid, kind: DocumentKind, bytes: &[u8]) {
        {
            let mut state = self.lock_state();
            if let Some(capture) = state.captures.get_mut(&capture_id) {
                capture.begin_processing();
            }
        }

        let result = self.recognition.recognize(bytes, kind).await;

        let mut state = self.lock_state();
        let Some(capture) = state.captures.get_mut(&capture_id) else {
            return; // capture removed while recognition was in flight
        };
        match result {
            Ok(output) => {
                let doc = normalize::normalize(&output);
                capture.complete(
                    doc.fields
                        .iter()
                        .map(|(k, f)| (k.clone(), f.value.clone()))
                        .collect(),
                    doc.fields
                        .iter()
                        .map(|(k, f)| (k.clone(), f.confidence))
                        .collect(),
                    output.raw_text,
                    doc.requires_review,
                );
                state.normalized.insert(capture_id, doc);
                debug!(%capture_id, kind = %kind, "Document recognition completed");
            }
            Err(e) => {
                warn!(%capture_id, kind = %kind, error = %e, "Document recognition failed");
                capture.fail(e.to_string());
            }
        }
    }

    /// Apply a manual correction from the document review screen
    pub fn review_edit(
        &self,
        capture_id: Uuid,
        field: &str,
        value: &str,
    ) -> Result<(), IntakeError> {
        self.activity.touch();
        let mut state = self.lock_state();
        state.session.touch();
        let doc = state
            .normalized
            .get_mut(&capture_id)
            .ok_or(IntakeError::UnknownCapture(capture_id))?;
        doc.apply_review_edit(field, value);
        let (values, confidences, requires_review) = (
            doc.fields
                .iter()
                .map(|(k, f)| (k.clone(), f.value.clone()))
                .collect(),
            doc.fields
                .iter()
                .map(|(k, f)| (k.clone(), f.confidence))
                .collect(),
            doc.requires_review,
        );
        if let Some(capture) = state.captures.get_mut(&capture_id) {
            capture.extracted_fields = values;
            capture.confidence_scores = confidences;
            capture.requires_review = requires_review;
        }
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────
    // Forms
    // ────────────────────────────────────────────────────────────────────

    pub fn set_form_field(
        &self,
        form_type: FormType,
        field: &str,
        value: &str,
    ) -> Result<(), IntakeError> {
        self.activity.touch();
        let mut state = self.lock_state();
        state.session.touch();
        let form = state
            .forms
            .get_mut(&form_type)
            .ok_or(IntakeError::UnknownForm(form_type))?;
        form.set_field(field, value)?;
        Ok(())
    }

    pub fn form_estimate(&self, form_type: FormType) -> Option<WithholdingEstimate> {
        self.lock_state().forms.get(&form_type).map(|f| f.estimate())
    }

    // ────────────────────────────────────────────────────────────────────
    // Signatures
    // ────────────────────────────────────────────────────────────────────

    pub fn pad_press(&self, x: f32, y: f32, pressure: Option<f32>) {
        self.activity.touch();
        self.lock_state().pad.press(x, y, pressure);
    }

    pub fn pad_extend(&self, x: f32, y: f32, pressure: Option<f32>) {
        self.activity.touch();
        self.lock_state().pad.extend(x, y, pressure);
    }

    /// Finalize the stroke on the pad. Returns true once a raster exists.
    pub fn pad_release(&self) -> bool {
        self.activity.touch();
        let mut state = self.lock_state();
        if let Some(result) = state.pad.release() {
            state.pending_signature = Some(result);
            true
        } else {
            state.pending_signature.is_some()
        }
    }

    pub fn pad_clear(&self) {
        self.activity.touch();
        let mut state = self.lock_state();
        state.pad.clear();
        state.pending_signature = None;
    }

    /// Accept the captured signature for the current requirement and
    /// advance the sequence. Clears the pad for the next artifact.
    pub fn accept_signature(&self) -> Result<SequenceProgress, IntakeError> {
        self.activity.touch();
        let mut state = self.lock_state();

        let (raster, metadata) = state
            .pending_signature
            .clone()
            .ok_or(IntakeError::Signature(
                crate::signature::SignatureError::NothingCaptured,
            ))?;
        let form_key = state
            .signatures
            .current()
            .map(|r| r.form_key.clone())
            .ok_or(IntakeError::Signature(
                crate::signature::SignatureError::AlreadyComplete,
            ))?;

        // Capture is kept on the pad until the sequence takes it
        let progress = state.signatures.accept(SignatureArtifact {
            form_key,
            raster,
            metadata,
        })?;
        state.pending_signature = None;

        state.pad.clear();
        state.session.touch();
        if progress == SequenceProgress::Complete {
            info!("All required signatures captured");
        }
        Ok(progress)
    }

    // ────────────────────────────────────────────────────────────────────
    // Submission
    // ────────────────────────────────────────────────────────────────────

    pub fn set_confirmation(&self, kind: ConfirmationKind, value: bool) {
        self.activity.touch();
        let mut state = self.lock_state();
        state.coordinator.set_confirmation(kind, value);
        state.session.touch();
    }

    pub fn readiness(&self) -> Vec<FormReadiness> {
        let state = self.lock_state();
        readiness(&state.forms, &state.signatures)
    }

    pub fn receipt(&self) -> Option<SubmissionReceipt> {
        self.lock_state().coordinator.receipt().cloned()
    }

    /// Submit the aggregated packet. On success the receipt is recorded,
    /// forms are marked submitted, the snapshot is cleared, and the
    /// wizard-completion callback fires. On failure all local state is
    /// preserved for retry.
    pub async fn submit(&mut self) -> Result<SubmissionReceipt, IntakeError> {
        self.activity.touch();

        let (mut coordinator, session_id, employee_ref, forms, signatures) = {
            let state = self.lock_state();
            (
                state.coordinator.clone(),
                state.session.session_id,
                state.session.employee_ref.clone(),
                state.forms.clone(),
                state.signatures.clone(),
            )
        };

        let result = coordinator
            .submit(
                session_id,
                employee_ref,
                &forms,
                &signatures,
                self.backend.as_ref(),
            )
            .await;

        let receipt = match result {
            Ok(receipt) => receipt.clone(),
            Err(e) => {
                // Preserve the seed so a retry reuses the submission id
                self.lock_state().coordinator = coordinator;
                return Err(e.into());
            }
        };

        {
            let mut state = self.lock_state();
            state.coordinator = coordinator;
            for form in state.forms.values_mut() {
                form.mark_submitted();
            }
            if let Some(callback) = &self.on_complete {
                callback(&state);
            }
        }

        if let Err(e) = self.store.clear(&self.config.snapshot_key).await {
            warn!(error = %e, "Failed to clear snapshot after submission");
        }
        if let Err(e) = self.backend.finalize_session(session_id).await {
            // The packet is already persisted; finalization is advisory
            warn!(error = %e, "Server-side session finalization failed");
        }

        info!(submission_id = %receipt.submission_id, "Onboarding complete");
        Ok(receipt)
    }
}

/// Reasons the current step cannot be left yet
fn step_blockers(state: &WizardState) -> Vec<String> {
    let mut reasons = Vec::new();

    match state.session.current_step {
        OnboardingStep::Language => {}
        OnboardingStep::AccessCode => {
            if state.session.employee_ref.is_none() {
                reasons.push("Access code has not been verified".to_string());
            }
        }
        OnboardingStep::Documents => {
            let in_flight = state
                .captures
                .values()
                .filter(|c| c.status.is_in_flight())
                .count();
            if in_flight > 0 {
                reasons.push(format!("{in_flight} document(s) still processing"));
            }
        }
        OnboardingStep::Forms => {
            for (form_type, form) in &state.forms {
                if !form.is_valid() {
                    reasons.push(format!(
                        "{form_type} has {} invalid or missing field(s)",
                        form.errors.len()
                    ));
                }
            }
        }
        OnboardingStep::Signature => {
            if !state.signatures.is_complete() {
                reasons.push("Required signatures are not all captured".to_string());
            }
        }
        OnboardingStep::Complete => {}
    }

    reasons
}

/// Leaving the forms step freezes every form at completed
fn freeze_if_leaving_forms(state: &mut WizardState) -> Result<(), IntakeError> {
    if state.session.current_step != OnboardingStep::Forms {
        return Ok(());
    }
    for form in state.forms.values_mut() {
        if form.status == crate::form::FormStatus::Draft {
            form.complete()?;
        }
    }
    Ok(())
}

/// Step-entry side effects
fn on_enter(state: &mut WizardState, step: OnboardingStep) {
    match step {
        OnboardingStep::Forms => {
            // One-time auto-fill from the merged normalized field set
            let merged = state.merged_fields();
            for form in state.forms.values_mut() {
                form.apply_autofill(&merged);
            }
        }
        OnboardingStep::Complete => {
            // Submission id and timestamp are fixed on first arrival
            let (submission_id, _) = state.coordinator.ensure_seed();
            debug!(%submission_id, "Arrived at final step");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::testing::{FailingRecognition, FixedRecognition};
    use crate::recognition::RecognitionOutput;
    use crate::snapshot::InMemorySnapshotStore;
    use crate::submission::InMemoryBackend;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn recognition_output() -> RecognitionOutput {
        let fields: HashMap<String, String> = [
            ("name", "john micheal doe"),
            ("ssn", "123456789"),
            ("address", "1 Main St"),
            ("city", "reno"),
            ("state", "Nevada"),
            ("zip", "89501"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let confidence = fields.keys().map(|k| (k.clone(), 0.97)).collect();
        RecognitionOutput {
            fields,
            confidence,
            raw_text: "NEVADA DRIVER LICENSE".to_string(),
        }
    }

    fn controller_with(
        store: Arc<dyn SnapshotStore>,
        backend: Arc<InMemoryBackend>,
    ) -> SessionController {
        controller_with_config(ControllerConfig::default(), store, backend)
    }

    fn controller_with_config(
        config: ControllerConfig,
        store: Arc<dyn SnapshotStore>,
        backend: Arc<InMemoryBackend>,
    ) -> SessionController {
        SessionController::new(
            config,
            store,
            backend,
            Arc::new(FixedRecognition {
                output: recognition_output(),
            }),
            Language::English,
        )
    }

    fn confirm_all(controller: &SessionController) {
        for kind in [
            ConfirmationKind::Accuracy,
            ConfirmationKind::Completeness,
            ConfirmationKind::Authorization,
            ConfirmationKind::PenaltiesAcknowledged,
        ] {
            controller.set_confirmation(kind, true);
        }
    }

    async fn drive_to_forms(controller: &mut SessionController) {
        controller.next_step().unwrap(); // language → access_code
        controller.set_employee_ref("EMP-7");
        controller.next_step().unwrap(); // → documents
        controller
            .upload_document(DocumentKind::DriversLicense, "file://dl.jpg", b"img")
            .await
            .unwrap();
        controller.next_step().unwrap(); // → forms (autofill applies)
    }

    fn finish_forms(controller: &SessionController) {
        for form_type in FormType::required_forms() {
            controller
                .set_form_field(*form_type, "filing_status", "single")
                .unwrap();
        }
        controller
            .set_form_field(FormType::StateWithholding, "allowances", "1")
            .unwrap();
    }

    fn sign_all(controller: &SessionController) {
        for _ in 0..2 {
            controller.pad_press(1.0, 1.0, Some(0.7));
            controller.pad_extend(4.0, 3.0, Some(0.8));
            assert!(controller.pad_release());
            controller.accept_signature().unwrap();
        }
    }

    #[tokio::test]
    async fn test_mount_fresh_when_no_snapshot() {
        let controller = controller_with(
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(InMemoryBackend::new()),
        );
        assert_eq!(controller.mount().await.unwrap(), MountOutcome::Fresh);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_restores_field_state() {
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
        let backend = Arc::new(InMemoryBackend::new());

        let mut first = controller_with(Arc::clone(&store), Arc::clone(&backend));
        drive_to_forms(&mut first).await;
        first
            .set_form_field(FormType::FederalW4, "email", "jane@example.com")
            .unwrap();
        first.save_snapshot().await.unwrap();

        let second = controller_with(Arc::clone(&store), backend);
        match second.mount().await.unwrap() {
            MountOutcome::ResumeAvailable { .. } => {}
            other => panic!("expected resumable snapshot, got {other:?}"),
        }
        second.resolve_resume(ResumeDecision::Resume).await.unwrap();

        second.with_state(|state| {
            assert_eq!(state.session.current_step, OnboardingStep::Forms);
            let form = &state.forms[&FormType::FederalW4];
            assert_eq!(form.values["email"], "jane@example.com");
            // Auto-filled values survived too
            assert_eq!(form.values["first_name"], "John");
            assert_eq!(form.values["ssn"], "123-45-6789");
        });
    }

    #[tokio::test]
    async fn test_expired_snapshot_discarded_on_mount() {
        let store = Arc::new(InMemorySnapshotStore::new());
        let mut envelope =
            SnapshotEnvelope::new(1, serde_json::to_value(WizardState::new(Language::English)).unwrap());
        envelope.saved_at = chrono::Utc::now() - chrono::Duration::hours(30);
        store.save("onboarding_session", &envelope).await.unwrap();

        let controller = controller_with(store.clone(), Arc::new(InMemoryBackend::new()));
        assert_eq!(controller.mount().await.unwrap(), MountOutcome::Fresh);
        assert!(store.load("onboarding_session").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_access_code_gates_advancement() {
        let mut controller = controller_with(
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(InMemoryBackend::new()),
        );
        controller.next_step().unwrap();

        let err = controller.next_step().unwrap_err();
        assert!(matches!(err, IntakeError::StepBlocked { .. }));

        controller.set_employee_ref("EMP-7");
        controller.next_step().unwrap();
    }

    #[tokio::test]
    async fn test_autofill_applied_on_forms_entry() {
        let mut controller = controller_with(
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(InMemoryBackend::new()),
        );
        drive_to_forms(&mut controller).await;

        controller.with_state(|state| {
            let form = &state.forms[&FormType::FederalW4];
            assert_eq!(form.values["first_name"], "John");
            assert_eq!(form.values["last_name"], "Doe");
            assert_eq!(form.values["state"], "NV");
            assert_eq!(form.values["zip"], "89501");
            assert!(form.autofill_applied);
        });
    }

    #[tokio::test]
    async fn test_failed_recognition_does_not_block_other_documents() {
        let store = Arc::new(InMemorySnapshotStore::new());
        let mut controller = SessionController::new(
            ControllerConfig::default(),
            store,
            Arc::new(InMemoryBackend::new()),
            Arc::new(FailingRecognition),
            Language::English,
        );
        controller.next_step().unwrap();
        controller.set_employee_ref("EMP-7");
        controller.next_step().unwrap();

        let capture_id = controller
            .upload_document(DocumentKind::Passport, "file://pp.jpg", b"img")
            .await
            .unwrap();
        controller.with_state(|state| {
            let capture = &state.captures[&capture_id];
            assert_eq!(capture.status, crate::recognition::CaptureStatus::Error);
            assert!(capture.can_retry());
        });

        // Error documents are terminal, so the step can still advance
        controller.next_step().unwrap();
    }

    #[tokio::test]
    async fn test_forms_step_blocked_until_valid() {
        let mut controller = controller_with(
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(InMemoryBackend::new()),
        );
        drive_to_forms(&mut controller).await;

        let err = controller.next_step().unwrap_err();
        assert!(matches!(err, IntakeError::StepBlocked { .. }));

        finish_forms(&controller);
        controller.next_step().unwrap();

        // Forms froze on exit
        controller.with_state(|state| {
            for form in state.forms.values() {
                assert_eq!(form.status, crate::form::FormStatus::Completed);
            }
        });
    }

    #[tokio::test]
    async fn test_full_flow_submits_and_fires_callbacks() {
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
        let backend = Arc::new(InMemoryBackend::new());
        let steps_seen = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicBool::new(false));

        let steps_in = Arc::clone(&steps_seen);
        let completed_in = Arc::clone(&completed);
        let mut controller = controller_with(Arc::clone(&store), Arc::clone(&backend))
            .with_step_callback(Box::new(move |_, _| {
                steps_in.fetch_add(1, Ordering::SeqCst);
            }))
            .with_completion_callback(Box::new(move |state| {
                assert!(state.signatures.is_complete());
                completed_in.store(true, Ordering::SeqCst);
            }));

        drive_to_forms(&mut controller).await;
        finish_forms(&controller);
        controller.next_step().unwrap(); // → signature
        sign_all(&controller);
        controller.next_step().unwrap(); // → complete

        // Submit stays gated on the four confirmations
        for kind in [
            ConfirmationKind::Accuracy,
            ConfirmationKind::Completeness,
            ConfirmationKind::Authorization,
        ] {
            controller.set_confirmation(kind, true);
        }
        let err = controller.submit().await.unwrap_err();
        assert!(matches!(
            err,
            IntakeError::Submission(crate::submission::SubmissionError::ConfirmationsIncomplete)
        ));

        controller.set_confirmation(ConfirmationKind::PenaltiesAcknowledged, true);
        let receipt = controller.submit().await.unwrap();
        assert_eq!(receipt.forms_included.len(), 2);

        assert!(completed.load(Ordering::SeqCst));
        assert!(steps_seen.load(Ordering::SeqCst) >= 5);
        assert_eq!(backend.submitted.lock().unwrap().len(), 1);
        assert_eq!(backend.finalized.lock().unwrap().len(), 1);

        // Snapshot cleared on completion
        let store_check = store;
        assert!(store_check
            .load("onboarding_session")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_submission_failure_preserves_state() {
        let backend = Arc::new(InMemoryBackend::failing());
        let mut controller = controller_with(
            Arc::new(InMemorySnapshotStore::new()),
            Arc::clone(&backend),
        );

        drive_to_forms(&mut controller).await;
        finish_forms(&controller);
        controller.next_step().unwrap();
        sign_all(&controller);
        controller.next_step().unwrap();

        for kind in [
            ConfirmationKind::Accuracy,
            ConfirmationKind::Completeness,
            ConfirmationKind::Authorization,
            ConfirmationKind::PenaltiesAcknowledged,
        ] {
            controller.set_confirmation(kind, true);
        }

        let err = controller.submit().await.unwrap_err();
        assert!(matches!(err, IntakeError::Submission(_)));

        // Everything kept for retry, including the idempotent seed
        let seed = controller.with_state(|state| {
            assert!(state.signatures.is_complete());
            assert!(state.forms.values().all(|f| f.is_valid()));
            state.coordinator.seed().unwrap()
        });

        backend.fail_submits.store(false, Ordering::SeqCst);
        let receipt = controller.submit().await.unwrap();
        assert_eq!(receipt.submission_id, seed.0);
    }

    #[tokio::test]
    async fn test_inactivity_expiry_forces_destructive_restart() {
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
        let mut controller = controller_with(Arc::clone(&store), Arc::new(InMemoryBackend::new()));

        drive_to_forms(&mut controller).await;
        controller.save_snapshot().await.unwrap();
        assert!(store.load("onboarding_session").await.unwrap().is_some());

        controller
            .handle_inactivity(InactivityEvent::Expired)
            .await
            .unwrap();

        controller.with_state(|state| {
            assert_eq!(state.session.current_step, OnboardingStep::Language);
            assert!(state.captures.is_empty());
        });
        assert!(store.load("onboarding_session").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_background_tasks_start_and_teardown() {
        let mut controller = controller_with(
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(InMemoryBackend::new()),
        );
        let _events = controller.start_background();
        assert_eq!(controller.tasks.len(), 2);

        controller.teardown().await;
        assert!(controller.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_monitor_outlives_forced_restart() {
        let config = ControllerConfig {
            autosave_interval_secs: 3600,
            inactivity: InactivityConfig {
                warn_after_secs: 1,
                expire_after_secs: 1,
                poll_interval_secs: 1,
            },
            ..ControllerConfig::default()
        };
        let mut controller = controller_with_config(
            config,
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(InMemoryBackend::new()),
        );
        let mut events = controller.start_background();

        let event = tokio::time::timeout(std::time::Duration::from_secs(4), events.recv())
            .await
            .expect("first expiry expected");
        assert_eq!(event, Some(InactivityEvent::Expired));
        controller
            .handle_inactivity(InactivityEvent::Expired)
            .await
            .unwrap();

        // The restart touched activity, opening a new quiet period; the
        // same monitor task must expire that one too.
        let event = tokio::time::timeout(std::time::Duration::from_secs(4), events.recv())
            .await
            .expect("second expiry expected");
        assert_eq!(event, Some(InactivityEvent::Expired));

        controller.teardown().await;
    }

    #[tokio::test]
    async fn test_autosave_stays_quiet_after_submission() {
        let config = ControllerConfig {
            autosave_interval_secs: 1,
            ..ControllerConfig::default()
        };
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
        let mut controller = controller_with_config(
            config,
            Arc::clone(&store),
            Arc::new(InMemoryBackend::new()),
        );
        let _events = controller.start_background();

        drive_to_forms(&mut controller).await;
        finish_forms(&controller);
        controller.next_step().unwrap();
        sign_all(&controller);
        controller.next_step().unwrap();
        confirm_all(&controller);
        controller.submit().await.unwrap();
        assert!(store.load("onboarding_session").await.unwrap().is_none());

        // Give the autosave task several intervals; the completed session
        // must not be re-persisted.
        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
        assert!(store.load("onboarding_session").await.unwrap().is_none());

        controller.teardown().await;
    }

    #[tokio::test]
    async fn test_review_edit_counts_as_activity() {
        let mut controller = controller_with(
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(InMemoryBackend::new()),
        );
        controller.next_step().unwrap();
        controller.set_employee_ref("EMP-7");
        controller.next_step().unwrap();
        let capture_id = controller
            .upload_document(DocumentKind::DriversLicense, "file://dl.jpg", b"img")
            .await
            .unwrap();

        let before = controller.with_state(|s| s.session.last_activity);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        controller.review_edit(capture_id, "first_name", "Jane").unwrap();
        let after = controller.with_state(|s| s.session.last_activity);
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_accept_signature_without_capture_fails() {
        let controller = controller_with(
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(InMemoryBackend::new()),
        );
        assert!(matches!(
            controller.accept_signature(),
            Err(IntakeError::Signature(_))
        ));
    }

    #[tokio::test]
    async fn test_language_change_updates_attestations() {
        let controller = controller_with(
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(InMemoryBackend::new()),
        );
        controller.set_language(Language::Spanish);
        controller.with_state(|state| {
            let attestation = &state.signatures.current().unwrap().attestation;
            assert!(attestation.starts_with("Bajo pena"));
        });
    }
}
