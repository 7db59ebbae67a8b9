//! Employee onboarding intake pipeline.
//!
//! A resumable wizard that walks a new hire from language selection
//! through identity-document capture, tax-form completion, signature
//! capture, and final submission. The [`controller::SessionController`]
//! is the entry point; the remaining modules are the step engines it
//! coordinates.

pub mod controller;
pub mod form;
pub mod locale;
pub mod monitor;
pub mod normalize;
pub mod recognition;
pub mod session;
pub mod signature;
pub mod snapshot;
pub mod submission;

pub use controller::{
    ControllerConfig, MountOutcome, ResumeDecision, SessionController, WizardState,
};
pub use form::{FormRecord, FormStatus, FormType, WithholdingEstimate};
pub use locale::{Language, MessageKey};
pub use monitor::{InactivityConfig, InactivityEvent};
pub use recognition::{CaptureStatus, DocumentCapture, DocumentKind, RecognitionService};
pub use session::{AccessibilityPrefs, OnboardingSession, OnboardingStep};
pub use signature::{SequenceProgress, SignatureArtifact, SignaturePad};
pub use snapshot::{LocalSnapshotStore, SnapshotStore};
pub use submission::{
    ConfirmationKind, PersistenceBackend, SubmissionCoordinator, SubmissionReceipt,
};

/// Top-level error for controller operations
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error(transparent)]
    Navigation(#[from] session::NavigationError),

    #[error(transparent)]
    Snapshot(#[from] snapshot::SnapshotStoreError),

    #[error(transparent)]
    Recognition(#[from] recognition::RecognitionError),

    #[error(transparent)]
    Form(#[from] form::FormError),

    #[error(transparent)]
    Signature(#[from] signature::SignatureError),

    #[error(transparent)]
    Submission(#[from] submission::SubmissionError),

    #[error("Cannot leave step {step}: {reasons:?}")]
    StepBlocked { step: String, reasons: Vec<String> },

    #[error("No document capture with id {0}")]
    UnknownCapture(uuid::Uuid),

    #[error("No form of type {0}")]
    UnknownForm(form::FormType),
}
