//! Locale Resolution
//!
//! Single lookup table for all user-facing text. Components resolve
//! messages through `resolve(language, key)` instead of carrying their
//! own per-component string tables.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported wizard languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    Spanish,
}

impl Default for Language {
    fn default() -> Self {
        Self::English
    }
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Spanish => "es",
        }
    }
}

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "en" | "english" => Ok(Self::English),
            "es" | "spanish" => Ok(Self::Spanish),
            _ => Err(UnknownLanguage(s.to_string())),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown language: {0}")]
pub struct UnknownLanguage(pub String);

/// Keys into the message table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKey {
    WelcomeTitle,
    ResumePrompt,
    ResumeAction,
    RestartAction,
    InactivityWarning,
    ExtendSession,
    SessionExpired,
    FieldRequired,
    FieldInvalidFormat,
    DocumentReviewNeeded,
    SignaturePrompt,
    SignatureClear,
    AttestationFederalW4,
    AttestationStateWithholding,
    ConfirmAccuracy,
    ConfirmCompleteness,
    ConfirmAuthorization,
    ConfirmPenalties,
    SubmitAction,
    SubmissionFailed,
    SubmissionRetry,
    ReceiptTitle,
}

/// Resolve a message for a language. One lookup per render pass.
pub fn resolve(language: Language, key: MessageKey) -> &'static str {
    use MessageKey::*;
    match (language, key) {
        (Language::English, WelcomeTitle) => "Welcome to employee onboarding",
        (Language::English, ResumePrompt) => "A saved session was found. Resume where you left off?",
        (Language::English, ResumeAction) => "Resume",
        (Language::English, RestartAction) => "Start over",
        (Language::English, InactivityWarning) => "Your session will expire soon due to inactivity.",
        (Language::English, ExtendSession) => "Keep working",
        (Language::English, SessionExpired) => "Your session expired and was reset.",
        (Language::English, FieldRequired) => "This field is required.",
        (Language::English, FieldInvalidFormat) => "This value is not in the expected format.",
        (Language::English, DocumentReviewNeeded) => "Please review the highlighted fields.",
        (Language::English, SignaturePrompt) => "Sign in the box below.",
        (Language::English, SignatureClear) => "Clear signature",
        (Language::English, AttestationFederalW4) => {
            "Under penalties of perjury, I declare that this certificate, to the best of my knowledge and belief, is true, correct, and complete."
        }
        (Language::English, AttestationStateWithholding) => {
            "I certify that the withholding allowances claimed on this certificate do not exceed the number to which I am entitled."
        }
        (Language::English, ConfirmAccuracy) => "The information I provided is accurate.",
        (Language::English, ConfirmCompleteness) => "I have completed all required sections.",
        (Language::English, ConfirmAuthorization) => "I am authorized to submit this information.",
        (Language::English, ConfirmPenalties) => "I acknowledge the penalties for false statements.",
        (Language::English, SubmitAction) => "Submit onboarding packet",
        (Language::English, SubmissionFailed) => "Submission failed. Your answers were kept.",
        (Language::English, SubmissionRetry) => "Try again",
        (Language::English, ReceiptTitle) => "Onboarding packet submitted",

        (Language::Spanish, WelcomeTitle) => "Bienvenido a la incorporación de empleados",
        (Language::Spanish, ResumePrompt) => {
            "Se encontró una sesión guardada. ¿Continuar donde la dejó?"
        }
        (Language::Spanish, ResumeAction) => "Continuar",
        (Language::Spanish, RestartAction) => "Empezar de nuevo",
        (Language::Spanish, InactivityWarning) => {
            "Su sesión expirará pronto por inactividad."
        }
        (Language::Spanish, ExtendSession) => "Seguir trabajando",
        (Language::Spanish, SessionExpired) => "Su sesión expiró y fue reiniciada.",
        (Language::Spanish, FieldRequired) => "Este campo es obligatorio.",
        (Language::Spanish, FieldInvalidFormat) => "Este valor no tiene el formato esperado.",
        (Language::Spanish, DocumentReviewNeeded) => "Revise los campos resaltados.",
        (Language::Spanish, SignaturePrompt) => "Firme en el recuadro de abajo.",
        (Language::Spanish, SignatureClear) => "Borrar firma",
        (Language::Spanish, AttestationFederalW4) => {
            "Bajo pena de perjurio, declaro que este certificado, a mi leal saber y entender, es verdadero, correcto y completo."
        }
        (Language::Spanish, AttestationStateWithholding) => {
            "Certifico que las exenciones de retención reclamadas en este certificado no exceden el número al que tengo derecho."
        }
        (Language::Spanish, ConfirmAccuracy) => "La información que proporcioné es precisa.",
        (Language::Spanish, ConfirmCompleteness) => "Completé todas las secciones requeridas.",
        (Language::Spanish, ConfirmAuthorization) => {
            "Estoy autorizado a enviar esta información."
        }
        (Language::Spanish, ConfirmPenalties) => {
            "Reconozco las sanciones por declaraciones falsas."
        }
        (Language::Spanish, SubmitAction) => "Enviar paquete de incorporación",
        (Language::Spanish, SubmissionFailed) => "El envío falló. Sus respuestas se conservaron.",
        (Language::Spanish, SubmissionRetry) => "Intentar de nuevo",
        (Language::Spanish, ReceiptTitle) => "Paquete de incorporación enviado",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parsing() {
        assert_eq!("en".parse::<Language>().unwrap(), Language::English);
        assert_eq!("spanish".parse::<Language>().unwrap(), Language::Spanish);
        assert!("fr".parse::<Language>().is_err());
    }

    #[test]
    fn test_resolve_covers_both_languages() {
        let en = resolve(Language::English, MessageKey::ResumePrompt);
        let es = resolve(Language::Spanish, MessageKey::ResumePrompt);
        assert!(!en.is_empty());
        assert!(!es.is_empty());
        assert_ne!(en, es);
    }

    #[test]
    fn test_attestations_differ_per_form() {
        assert_ne!(
            resolve(Language::English, MessageKey::AttestationFederalW4),
            resolve(Language::English, MessageKey::AttestationStateWithholding)
        );
    }
}
