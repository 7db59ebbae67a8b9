//! Document Capture & Recognition
//!
//! `DocumentCapture` tracks one uploaded identity document through its
//! lifecycle: uploading → processing → completed | error. Recognition
//! itself is an external collaborator behind [`RecognitionService`];
//! each document is processed independently and a failed document can be
//! retried without blocking the others.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// Identity document types accepted at intake
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    DriversLicense,
    StateId,
    Passport,
    SocialSecurityCard,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DriversLicense => "drivers_license",
            Self::StateId => "state_id",
            Self::Passport => "passport",
            Self::SocialSecurityCard => "social_security_card",
        }
    }
}

impl FromStr for DocumentKind {
    type Err = RecognitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drivers_license" => Ok(Self::DriversLicense),
            "state_id" => Ok(Self::StateId),
            "passport" => Ok(Self::Passport),
            "social_security_card" => Ok(Self::SocialSecurityCard),
            _ => Err(RecognitionError::UnknownDocumentKind(s.to_string())),
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Capture lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    Uploading,
    Processing,
    Completed,
    Error,
}

impl CaptureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Terminal states are never reopened except via explicit retry
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Uploading | Self::Processing)
    }
}

impl std::fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors from the recognition path
#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("Unknown document kind: {0}")]
    UnknownDocumentKind(String),

    #[error("Recognition service failure: {0}")]
    Service(String),

    #[error("Document is unreadable: {0}")]
    Unreadable(String),

    #[error("Capture {0} is not in a retryable state")]
    NotRetryable(Uuid),
}

/// Raw recognition output for one document, as returned by the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionOutput {
    /// Arbitrary key→value pairs as read off the document
    pub fields: HashMap<String, String>,
    /// Per-key confidence in [0, 1]
    pub confidence: HashMap<String, f64>,
    /// Full raw text, kept for review
    pub raw_text: String,
}

/// External recognition collaborator
#[async_trait]
pub trait RecognitionService: Send + Sync {
    /// Recognize one document. Input is the document bytes plus the
    /// declared type; output is the raw field map or a failure signal.
    async fn recognize(
        &self,
        bytes: &[u8],
        kind: DocumentKind,
    ) -> Result<RecognitionOutput, RecognitionError>;
}

/// One uploaded document and its extraction results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentCapture {
    pub capture_id: Uuid,
    pub kind: DocumentKind,
    /// Opaque reference to the uploaded file
    pub file_ref: String,
    /// Canonical extracted fields (post-normalization)
    pub extracted_fields: HashMap<String, String>,
    /// Per-field confidence in [0, 1]
    pub confidence_scores: HashMap<String, f64>,
    pub raw_text: String,
    pub status: CaptureStatus,
    pub requires_review: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DocumentCapture {
    pub fn new(kind: DocumentKind, file_ref: impl Into<String>) -> Self {
        Self {
            capture_id: Uuid::new_v4(),
            kind,
            file_ref: file_ref.into(),
            extracted_fields: HashMap::new(),
            confidence_scores: HashMap::new(),
            raw_text: String::new(),
            status: CaptureStatus::Uploading,
            requires_review: false,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Upload finished, recognition started
    pub fn begin_processing(&mut self) {
        self.status = CaptureStatus::Processing;
    }

    /// Record successful extraction. Fields are the normalized canonical
    /// set, not the raw service output.
    pub fn complete(
        &mut self,
        extracted_fields: HashMap<String, String>,
        confidence_scores: HashMap<String, f64>,
        raw_text: String,
        requires_review: bool,
    ) {
        self.extracted_fields = extracted_fields;
        self.confidence_scores = confidence_scores;
        self.raw_text = raw_text;
        self.requires_review = requires_review;
        self.error = None;
        self.status = CaptureStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Record a recognition failure
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.status = CaptureStatus::Error;
        self.completed_at = Some(Utc::now());
    }

    pub fn can_retry(&self) -> bool {
        self.status == CaptureStatus::Error
    }

    /// Reopen a failed capture for another recognition attempt
    pub fn retry(&mut self) -> Result<(), RecognitionError> {
        if !self.can_retry() {
            return Err(RecognitionError::NotRetryable(self.capture_id));
        }
        self.status = CaptureStatus::Processing;
        self.error = None;
        self.completed_at = None;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_lifecycle() {
        let mut capture = DocumentCapture::new(DocumentKind::DriversLicense, "file://dl.jpg");
        assert_eq!(capture.status, CaptureStatus::Uploading);

        capture.begin_processing();
        assert!(capture.status.is_in_flight());

        capture.complete(
            HashMap::from([("first_name".to_string(), "Jane".to_string())]),
            HashMap::from([("first_name".to_string(), 0.97)]),
            "JANE DOE".to_string(),
            false,
        );
        assert_eq!(capture.status, CaptureStatus::Completed);
        assert!(capture.status.is_terminal());
        assert!(capture.completed_at.is_some());
    }

    #[test]
    fn test_retry_only_from_error() {
        let mut capture = DocumentCapture::new(DocumentKind::Passport, "file://pp.jpg");
        capture.begin_processing();

        assert!(capture.retry().is_err());

        capture.fail("service timeout");
        assert!(capture.can_retry());
        capture.retry().unwrap();
        assert_eq!(capture.status, CaptureStatus::Processing);
        assert!(capture.error.is_none());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(
            "drivers_license".parse::<DocumentKind>().unwrap(),
            DocumentKind::DriversLicense
        );
        assert!("library_card".parse::<DocumentKind>().is_err());
    }
}
