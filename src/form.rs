//! Form Engine
//!
//! Generic stepped-field validation over a declared required/optional
//! field set. Every field change re-runs the field-level validators,
//! recomputes the completion percentage, and refreshes the missing-required
//! list. Conditional sub-fields count toward the required set only while
//! their controlling selection is active.
//!
//! Auto-fill from normalized documents happens once, at first activation
//! of the form step, and only into empty fields. Manual edits are
//! permanent and never overwritten by later-arriving normalized data.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::OnceLock;
use uuid::Uuid;

/// The two structured legal forms driven by the wizard
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormType {
    FederalW4,
    StateWithholding,
}

impl FormType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FederalW4 => "federal_w4",
            Self::StateWithholding => "state_withholding",
        }
    }

    /// Forms required for every onboarding packet
    pub fn required_forms() -> &'static [FormType] {
        &[Self::FederalW4, Self::StateWithholding]
    }
}

impl FromStr for FormType {
    type Err = FormError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "federal_w4" => Ok(Self::FederalW4),
            "state_withholding" => Ok(Self::StateWithholding),
            _ => Err(FormError::UnknownFormType(s.to_string())),
        }
    }
}

impl std::fmt::Display for FormType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Form lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormStatus {
    Draft,
    Completed,
    Submitted,
}

impl FormStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Completed => "completed",
            Self::Submitted => "submitted",
        }
    }
}

/// Validator applied to a non-empty value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Ssn,
    Date,
    Zip,
    Email,
    Number,
    Choice,
}

/// A field is active only while its controlling selection matches
#[derive(Debug, Clone, Copy)]
pub struct FieldCondition {
    pub field: &'static str,
    pub equals: &'static str,
}

/// One declared field in a form definition
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub key: &'static str,
    pub kind: FieldKind,
    /// Required while active
    pub required: bool,
    /// Allowed values for `FieldKind::Choice`
    pub choices: &'static [&'static str],
    pub condition: Option<FieldCondition>,
}

impl FieldDef {
    const fn text(key: &'static str, required: bool) -> Self {
        Self {
            key,
            kind: FieldKind::Text,
            required,
            choices: &[],
            condition: None,
        }
    }

    const fn typed(key: &'static str, kind: FieldKind, required: bool) -> Self {
        Self {
            key,
            kind,
            required,
            choices: &[],
            condition: None,
        }
    }

    const fn choice(key: &'static str, required: bool, choices: &'static [&'static str]) -> Self {
        Self {
            key,
            kind: FieldKind::Choice,
            required,
            choices,
            condition: None,
        }
    }

    const fn when(mut self, field: &'static str, equals: &'static str) -> Self {
        self.condition = Some(FieldCondition { field, equals });
        self
    }
}

const FILING_STATUSES: &[&str] = &["single", "married_filing_jointly", "head_of_household"];
const YES_NO: &[&str] = &["yes", "no"];

static FEDERAL_W4_FIELDS: &[FieldDef] = &[
    FieldDef::text("first_name", true),
    FieldDef::text("middle_name", false),
    FieldDef::text("last_name", true),
    FieldDef::typed("ssn", FieldKind::Ssn, true),
    FieldDef::text("address_line1", true),
    FieldDef::text("city", true),
    FieldDef::text("state", true),
    FieldDef::typed("zip", FieldKind::Zip, true),
    FieldDef::typed("email", FieldKind::Email, false),
    FieldDef::choice("filing_status", true, FILING_STATUSES),
    FieldDef::choice("multiple_jobs", false, YES_NO),
    FieldDef::typed("qualifying_dependents", FieldKind::Number, false),
    FieldDef::typed("other_dependents", FieldKind::Number, false),
    FieldDef::typed("other_income", FieldKind::Number, false),
    FieldDef::typed("deductions", FieldKind::Number, false),
    FieldDef::typed("extra_withholding", FieldKind::Number, false),
    FieldDef::choice("exempt", false, YES_NO),
    // Sub-fields rendered and required only while exemption is claimed
    FieldDef::typed("exempt_year", FieldKind::Number, true).when("exempt", "yes"),
];

static STATE_WITHHOLDING_FIELDS: &[FieldDef] = &[
    FieldDef::text("first_name", true),
    FieldDef::text("last_name", true),
    FieldDef::typed("ssn", FieldKind::Ssn, true),
    FieldDef::text("address_line1", true),
    FieldDef::text("city", true),
    FieldDef::text("state", true),
    FieldDef::typed("zip", FieldKind::Zip, true),
    FieldDef::choice("filing_status", true, FILING_STATUSES),
    FieldDef::typed("allowances", FieldKind::Number, true),
    FieldDef::typed("additional_withholding", FieldKind::Number, false),
    FieldDef::choice("exempt", false, YES_NO),
    FieldDef::text("exempt_reason", true).when("exempt", "yes"),
];

/// Declared field set for a form type
pub fn definition(form_type: FormType) -> &'static [FieldDef] {
    match form_type {
        FormType::FederalW4 => FEDERAL_W4_FIELDS,
        FormType::StateWithholding => STATE_WITHHOLDING_FIELDS,
    }
}

fn ssn_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{3}-\d{2}-\d{4}$").expect("static pattern"))
}

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(0[1-9]|1[0-2])/(0[1-9]|[12]\d|3[01])/\d{4}$").expect("static pattern")
    })
}

fn zip_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{5}(-\d{4})?$").expect("static pattern"))
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static pattern"))
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(\.\d{1,2})?$").expect("static pattern"))
}

/// Why a field is currently failing validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum FieldError {
    /// Required field has no value
    Missing,
    /// Value present but not in the expected format
    InvalidFormat { expected: String },
}

impl FieldError {
    fn format(expected: &str) -> Self {
        Self::InvalidFormat {
            expected: expected.to_string(),
        }
    }
}

/// Errors from form operations
#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("Unknown form type: {0}")]
    UnknownFormType(String),

    #[error("Unknown field '{field}' on form {form_type}")]
    UnknownField { form_type: FormType, field: String },

    #[error("Form {0} is no longer editable")]
    Frozen(FormType),

    #[error("Form {form_type} has {error_count} invalid or missing fields")]
    Invalid {
        form_type: FormType,
        error_count: usize,
    },
}

/// Informational withholding-style estimate. Recomputed as a pure function
/// of current field values on every change; never gates validity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WithholdingEstimate {
    /// 2000 per qualifying dependent + 500 per other dependent
    pub dependent_credit: f64,
    /// Flat extra amount requested per pay period
    pub extra_per_period: f64,
}

/// One structured legal form being driven to completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormRecord {
    pub form_id: Uuid,
    pub form_type: FormType,
    pub values: BTreeMap<String, String>,
    /// Active validation errors, keyed by field
    pub errors: BTreeMap<String, FieldError>,
    /// filled-required / total-required × 100
    pub completion_percent: f32,
    pub missing_required: Vec<String>,
    pub status: FormStatus,
    /// Fields the user has edited by hand; auto-fill never touches these
    pub touched: BTreeSet<String>,
    /// One-time auto-fill latch
    pub autofill_applied: bool,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl FormRecord {
    pub fn new(form_type: FormType) -> Self {
        let mut record = Self {
            form_id: Uuid::new_v4(),
            form_type,
            values: BTreeMap::new(),
            errors: BTreeMap::new(),
            completion_percent: 0.0,
            missing_required: Vec::new(),
            status: FormStatus::Draft,
            touched: BTreeSet::new(),
            autofill_applied: false,
            updated_at: chrono::Utc::now(),
        };
        record.revalidate();
        record
    }

    fn def_for(&self, field: &str) -> Result<&'static FieldDef, FormError> {
        definition(self.form_type)
            .iter()
            .find(|d| d.key == field)
            .ok_or_else(|| FormError::UnknownField {
                form_type: self.form_type,
                field: field.to_string(),
            })
    }

    /// Whether a declared field is currently rendered/required
    pub fn is_active(&self, def: &FieldDef) -> bool {
        match def.condition {
            None => true,
            Some(cond) => self
                .values
                .get(cond.field)
                .map(|v| v == cond.equals)
                .unwrap_or(false),
        }
    }

    /// Record a user edit. Rejected once the form is frozen.
    pub fn set_field(&mut self, field: &str, value: impl Into<String>) -> Result<(), FormError> {
        if self.status != FormStatus::Draft {
            return Err(FormError::Frozen(self.form_type));
        }
        self.def_for(field)?;

        let value = value.into();
        if value.trim().is_empty() {
            self.values.remove(field);
        } else {
            self.values.insert(field.to_string(), value);
        }
        self.touched.insert(field.to_string());
        self.updated_at = chrono::Utc::now();
        self.revalidate();
        Ok(())
    }

    /// Populate empty fields from the merged normalized document set.
    /// Runs at most once per form; fields the user has already touched are
    /// never overwritten, and later calls are no-ops.
    pub fn apply_autofill(&mut self, normalized: &BTreeMap<String, String>) {
        if self.autofill_applied || self.status != FormStatus::Draft {
            return;
        }
        self.autofill_applied = true;

        for def in definition(self.form_type) {
            if self.touched.contains(def.key) {
                continue;
            }
            let already_filled = self
                .values
                .get(def.key)
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false);
            if already_filled {
                continue;
            }
            if let Some(value) = normalized.get(def.key) {
                if !value.trim().is_empty() {
                    self.values.insert(def.key.to_string(), value.clone());
                }
            }
        }

        self.updated_at = chrono::Utc::now();
        self.revalidate();
    }

    /// Re-run all field validators and recompute completion accounting
    pub fn revalidate(&mut self) {
        self.errors.clear();
        self.missing_required.clear();

        let mut total_required = 0u32;
        let mut filled_required = 0u32;

        for def in definition(self.form_type) {
            if !self.is_active(def) {
                continue;
            }

            let value = self.values.get(def.key).map(String::as_str).unwrap_or("");
            let filled = !value.trim().is_empty();

            if def.required {
                total_required += 1;
                if filled {
                    filled_required += 1;
                } else {
                    self.missing_required.push(def.key.to_string());
                    self.errors.insert(def.key.to_string(), FieldError::Missing);
                }
            }

            if filled {
                if let Some(error) = validate_format(def, value) {
                    self.errors.insert(def.key.to_string(), error);
                }
            }
        }

        self.completion_percent = if total_required == 0 {
            100.0
        } else {
            filled_required as f32 / total_required as f32 * 100.0
        };
    }

    /// No active errors and every required field filled
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.missing_required.is_empty()
    }

    /// Freeze the form. Fails while any required field is invalid.
    pub fn complete(&mut self) -> Result<(), FormError> {
        self.revalidate();
        if !self.is_valid() {
            return Err(FormError::Invalid {
                form_type: self.form_type,
                error_count: self.errors.len(),
            });
        }
        self.status = FormStatus::Completed;
        self.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Mark as submitted (terminal)
    pub fn mark_submitted(&mut self) {
        self.status = FormStatus::Submitted;
        self.updated_at = chrono::Utc::now();
    }

    fn number_value(&self, field: &str) -> f64 {
        self.values
            .get(field)
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    /// Current advisory estimate for this form
    pub fn estimate(&self) -> WithholdingEstimate {
        WithholdingEstimate {
            dependent_credit: self.number_value("qualifying_dependents") * 2000.0
                + self.number_value("other_dependents") * 500.0,
            extra_per_period: self.number_value("extra_withholding")
                + self.number_value("additional_withholding"),
        }
    }
}

fn validate_format(def: &FieldDef, value: &str) -> Option<FieldError> {
    match def.kind {
        FieldKind::Text => None,
        FieldKind::Ssn => (!ssn_regex().is_match(value)).then(|| FieldError::format("###-##-####")),
        FieldKind::Date => {
            (!date_regex().is_match(value)).then(|| FieldError::format("MM/DD/YYYY"))
        }
        FieldKind::Zip => {
            (!zip_regex().is_match(value)).then(|| FieldError::format("##### or #####-####"))
        }
        FieldKind::Email => {
            (!email_regex().is_match(value)).then(|| FieldError::format("name@example.com"))
        }
        FieldKind::Number => {
            (!number_regex().is_match(value)).then(|| FieldError::format("a non-negative number"))
        }
        FieldKind::Choice => (!def.choices.contains(&value))
            .then(|| FieldError::format(&format!("one of: {}", def.choices.join(", ")))),
    }
}
