//! Onboarding Session State
//!
//! Defines the wizard step machine and the session record that owns it.
//! Navigation rules:
//! - `next_step` marks the current index completed and advances by one
//! - `previous_step` moves back without touching the completed set
//! - `jump_to` is allowed only to an index at or behind the current one,
//!   to `current + 1`, or to an already-completed index

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use uuid::Uuid;

use crate::locale::Language;

/// Wizard steps in order. `Complete` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    Language,
    AccessCode,
    Documents,
    Forms,
    Signature,
    Complete,
}

/// All steps in wizard order
pub const STEP_ORDER: [OnboardingStep; 6] = [
    OnboardingStep::Language,
    OnboardingStep::AccessCode,
    OnboardingStep::Documents,
    OnboardingStep::Forms,
    OnboardingStep::Signature,
    OnboardingStep::Complete,
];

impl OnboardingStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Language => "language",
            Self::AccessCode => "access_code",
            Self::Documents => "documents",
            Self::Forms => "forms",
            Self::Signature => "signature",
            Self::Complete => "complete",
        }
    }

    /// Position of this step in the wizard sequence
    pub fn index(&self) -> usize {
        match self {
            Self::Language => 0,
            Self::AccessCode => 1,
            Self::Documents => 2,
            Self::Forms => 3,
            Self::Signature => 4,
            Self::Complete => 5,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        STEP_ORDER.get(index).copied()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl FromStr for OnboardingStep {
    type Err = NavigationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "language" => Ok(Self::Language),
            "access_code" => Ok(Self::AccessCode),
            "documents" => Ok(Self::Documents),
            "forms" => Ok(Self::Forms),
            "signature" => Ok(Self::Signature),
            "complete" => Ok(Self::Complete),
            _ => Err(NavigationError::UnknownStep(s.to_string())),
        }
    }
}

impl std::fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised by navigation calls
#[derive(Debug, thiserror::Error)]
pub enum NavigationError {
    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error("Step index out of range: {0}")]
    OutOfRange(usize),

    #[error("Session is already complete")]
    AlreadyTerminal,

    #[error("Already at the first step")]
    AtFirstStep,

    #[error("Step {target} is locked until earlier steps are completed")]
    StepLocked { target: usize },
}

/// Accessibility preferences carried on the session and snapshotted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessibilityPrefs {
    #[serde(default)]
    pub high_contrast: bool,
    #[serde(default)]
    pub large_text: bool,
    #[serde(default)]
    pub audio_assist: bool,
}

/// One onboarding attempt. Owned exclusively by the session controller;
/// exactly one live instance exists per attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingSession {
    /// Unique session ID
    pub session_id: Uuid,
    /// Current wizard step
    pub current_step: OnboardingStep,
    /// Indices that have been completed. Once inserted, never removed.
    pub completed_steps: BTreeSet<usize>,
    /// Selected language
    pub language: Language,
    /// Employee reference resolved from the access code
    pub employee_ref: Option<String>,
    /// Most recent interaction across all input channels
    pub last_activity: DateTime<Utc>,
    /// Accessibility preferences
    #[serde(default)]
    pub accessibility: AccessibilityPrefs,
    /// Incremented on every snapshot write
    pub snapshot_version: u64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl OnboardingSession {
    pub fn new(language: Language) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            current_step: OnboardingStep::Language,
            completed_steps: BTreeSet::new(),
            language,
            employee_ref: None,
            last_activity: now,
            accessibility: AccessibilityPrefs::default(),
            snapshot_version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record an interaction on any input channel
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.last_activity = now;
        self.updated_at = now;
    }

    /// Mark the current step completed and advance by one
    pub fn next_step(&mut self) -> Result<OnboardingStep, NavigationError> {
        if self.current_step.is_terminal() {
            return Err(NavigationError::AlreadyTerminal);
        }
        let index = self.current_step.index();
        self.completed_steps.insert(index);
        // index + 1 always exists for a non-terminal step
        self.current_step = OnboardingStep::from_index(index + 1)
            .ok_or(NavigationError::OutOfRange(index + 1))?;
        self.touch();
        Ok(self.current_step)
    }

    /// Move back by one step. The completed set is left untouched.
    pub fn previous_step(&mut self) -> Result<OnboardingStep, NavigationError> {
        let index = self.current_step.index();
        if index == 0 {
            return Err(NavigationError::AtFirstStep);
        }
        self.current_step =
            OnboardingStep::from_index(index - 1).ok_or(NavigationError::OutOfRange(index - 1))?;
        self.touch();
        Ok(self.current_step)
    }

    /// Jump to an arbitrary step index. Permitted only when the target is
    /// at or behind the current step, exactly one ahead, or already
    /// completed. This prevents skipping unfinished required work.
    pub fn jump_to(&mut self, index: usize) -> Result<OnboardingStep, NavigationError> {
        let target = OnboardingStep::from_index(index).ok_or(NavigationError::OutOfRange(index))?;
        let current = self.current_step.index();

        let permitted =
            index <= current || index == current + 1 || self.completed_steps.contains(&index);
        if !permitted {
            return Err(NavigationError::StepLocked { target: index });
        }

        // Moving forward through jump_to behaves like next_step for the
        // step being left, so forward progress is always recorded.
        if index == current + 1 {
            self.completed_steps.insert(current);
        }

        self.current_step = target;
        self.touch();
        Ok(self.current_step)
    }

    /// Highest completed index, if any
    pub fn max_completed(&self) -> Option<usize> {
        self.completed_steps.iter().next_back().copied()
    }

    pub fn is_complete(&self) -> bool {
        self.current_step.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_index_round_trip() {
        for (i, step) in STEP_ORDER.iter().enumerate() {
            assert_eq!(step.index(), i);
            assert_eq!(OnboardingStep::from_index(i), Some(*step));
        }
        assert_eq!(OnboardingStep::from_index(6), None);
    }

    #[test]
    fn test_next_marks_completed_and_advances() {
        let mut session = OnboardingSession::new(Language::English);
        assert_eq!(session.current_step, OnboardingStep::Language);

        let step = session.next_step().unwrap();
        assert_eq!(step, OnboardingStep::AccessCode);
        assert!(session.completed_steps.contains(&0));
    }

    #[test]
    fn test_back_does_not_unmark_completed() {
        let mut session = OnboardingSession::new(Language::English);
        session.next_step().unwrap();
        session.next_step().unwrap();
        assert!(session.completed_steps.contains(&1));

        session.previous_step().unwrap();
        assert_eq!(session.current_step, OnboardingStep::AccessCode);
        assert!(session.completed_steps.contains(&1));
    }

    #[test]
    fn test_jump_rules() {
        let mut session = OnboardingSession::new(Language::English);
        session.next_step().unwrap(); // at access_code, 0 completed

        // One ahead is allowed
        session.jump_to(2).unwrap();
        assert_eq!(session.current_step, OnboardingStep::Documents);

        // Two ahead is locked
        assert!(matches!(
            session.jump_to(4),
            Err(NavigationError::StepLocked { target: 4 })
        ));

        // Backwards is always allowed
        session.jump_to(0).unwrap();
        assert_eq!(session.current_step, OnboardingStep::Language);

        // Completed indices are reachable from anywhere
        session.jump_to(1).unwrap();
        assert_eq!(session.current_step, OnboardingStep::AccessCode);
    }

    #[test]
    fn test_terminal_step_cannot_advance() {
        let mut session = OnboardingSession::new(Language::English);
        for _ in 0..5 {
            session.next_step().unwrap();
        }
        assert!(session.is_complete());
        assert!(matches!(
            session.next_step(),
            Err(NavigationError::AlreadyTerminal)
        ));
    }

    #[test]
    fn test_navigation_bound_holds_for_any_sequence() {
        // current never exceeds max(completed) + 1 regardless of the mix
        // of forward, back, and jump calls.
        let mut session = OnboardingSession::new(Language::English);
        let moves: &[fn(&mut OnboardingSession)] = &[
            |s| {
                let _ = s.next_step();
            },
            |s| {
                let _ = s.previous_step();
            },
            |s| {
                let _ = s.jump_to(3);
            },
            |s| {
                let _ = s.jump_to(0);
            },
            |s| {
                let _ = s.next_step();
            },
            |s| {
                let _ = s.jump_to(5);
            },
            |s| {
                let _ = s.previous_step();
            },
            |s| {
                let _ = s.jump_to(2);
            },
            |s| {
                let _ = s.next_step();
            },
            |s| {
                let _ = s.next_step();
            },
        ];

        for mv in moves {
            mv(&mut session);
            let bound = session.max_completed().map(|m| m + 1).unwrap_or(0);
            assert!(
                session.current_step.index() <= bound,
                "current {} exceeded completed bound {}",
                session.current_step.index(),
                bound
            );
        }
    }

    #[test]
    fn test_session_serde_round_trip() {
        let mut session = OnboardingSession::new(Language::Spanish);
        session.next_step().unwrap();
        session.employee_ref = Some("EMP-0042".to_string());
        session.accessibility.large_text = true;

        let json = serde_json::to_string(&session).unwrap();
        let back: OnboardingSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, session.session_id);
        assert_eq!(back.current_step, session.current_step);
        assert_eq!(back.completed_steps, session.completed_steps);
        assert_eq!(back.accessibility, session.accessibility);
    }
}
