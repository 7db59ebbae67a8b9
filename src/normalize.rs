//! Document Field Normalization
//!
//! Maps raw recognition output onto the canonical intake field set.
//! Each canonical target has an ordered alias list; the first alias with a
//! non-empty value wins. Values are then coerced to a single canonical
//! rendering (MM/DD/YYYY dates, dashed 3-2-4 identifiers, title-cased
//! names, 2-letter state codes) so downstream forms see one format
//! regardless of what the document used. All coercions are idempotent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::recognition::RecognitionOutput;

/// Overall confidence below this forces manual review
pub const OVERALL_REVIEW_THRESHOLD: f64 = 0.85;
/// Any single field below this forces review even if the mean is high
pub const FIELD_REVIEW_THRESHOLD: f64 = 0.80;
/// Manual review edits raise a field's confidence to at least this
pub const EDITED_CONFIDENCE_FLOOR: f64 = 0.90;
/// Confidence assumed when the service reports none for a key
const UNSCORED_CONFIDENCE: f64 = 0.5;

/// Canonical target fields, in presentation order
pub const CANONICAL_TARGETS: &[&str] = &[
    "first_name",
    "middle_name",
    "last_name",
    "date_of_birth",
    "ssn",
    "address_line1",
    "city",
    "state",
    "zip",
    "document_number",
    "issue_date",
    "expiration_date",
];

/// Ordered raw-key aliases accepted for a canonical target
fn aliases(target: &str) -> &'static [&'static str] {
    match target {
        "first_name" => &["first_name", "firstname", "given_name", "given_names", "fname"],
        "middle_name" => &["middle_name", "middlename", "middle_initial"],
        "last_name" => &["last_name", "lastname", "surname", "family_name", "lname"],
        "date_of_birth" => &["date_of_birth", "dob", "birth_date", "birthdate"],
        "ssn" => &["ssn", "social_security_number", "ssn_number", "social_security_no"],
        "address_line1" => &["address_line1", "address", "street_address", "addr", "residence"],
        "city" => &["city", "town"],
        "state" => &["state", "state_name", "province"],
        "zip" => &["zip", "zip_code", "zipcode", "postal_code"],
        "document_number" => &["document_number", "license_number", "id_number", "doc_no", "number"],
        "issue_date" => &["issue_date", "issued", "iss", "date_of_issue"],
        "expiration_date" => &["expiration_date", "expiry_date", "exp", "expires", "date_of_expiry"],
        _ => &[],
    }
}

/// Keys a whole name may arrive under when the document does not split it
const FULL_NAME_KEYS: &[&str] = &["full_name", "fullname", "name", "holder_name"];

fn is_date_target(target: &str) -> bool {
    matches!(target, "date_of_birth" | "issue_date" | "expiration_date")
}

fn is_name_target(target: &str) -> bool {
    matches!(target, "first_name" | "middle_name" | "last_name")
}

/// One canonical field after normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedField {
    pub value: String,
    /// Reliability estimate in [0, 1]
    pub confidence: f64,
    /// Raw key the value was resolved from, if any
    pub source_key: Option<String>,
    /// Set once a reviewer has corrected the field by hand
    #[serde(default)]
    pub edited: bool,
}

/// Canonical field set for one document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedDocument {
    pub fields: BTreeMap<String, NormalizedField>,
    /// Arithmetic mean of per-field confidences
    pub overall_confidence: f64,
    pub requires_review: bool,
}

impl NormalizedDocument {
    /// Apply a manual correction made during review. The edit is coerced
    /// like any extracted value and immediately raises the field's
    /// confidence to at least the edited floor.
    pub fn apply_review_edit(&mut self, target: &str, value: &str) {
        let coerced = coerce(target, value);
        let entry = self
            .fields
            .entry(target.to_string())
            .or_insert_with(|| NormalizedField {
                value: String::new(),
                confidence: EDITED_CONFIDENCE_FLOOR,
                source_key: None,
                edited: false,
            });
        entry.value = coerced;
        entry.confidence = entry.confidence.max(EDITED_CONFIDENCE_FLOOR);
        entry.edited = true;
        self.recompute_review();
    }

    /// Recompute the mean confidence and the review flag
    pub fn recompute_review(&mut self) {
        if self.fields.is_empty() {
            self.overall_confidence = 0.0;
            self.requires_review = true;
            return;
        }
        let sum: f64 = self.fields.values().map(|f| f.confidence).sum();
        self.overall_confidence = sum / self.fields.len() as f64;

        let any_weak = self
            .fields
            .values()
            .any(|f| f.confidence < FIELD_REVIEW_THRESHOLD);
        self.requires_review = self.overall_confidence < OVERALL_REVIEW_THRESHOLD || any_weak;
    }

    /// Flat key→value view for auto-fill
    pub fn values(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .map(|(k, f)| (k.clone(), f.value.clone()))
            .collect()
    }
}

/// Normalize raw recognition output into the canonical field set
pub fn normalize(output: &RecognitionOutput) -> NormalizedDocument {
    // Lookup keyed on cleaned raw keys; keep the original key for the
    // confidence lookup and provenance.
    let mut raw: BTreeMap<String, (&str, &str)> = BTreeMap::new();
    for (key, value) in &output.fields {
        raw.insert(clean_key(key), (key.as_str(), value.as_str()));
    }

    let mut doc = NormalizedDocument::default();

    for target in CANONICAL_TARGETS {
        let resolved = aliases(target).iter().find_map(|alias| {
            raw.get(*alias)
                .filter(|(_, value)| !value.trim().is_empty())
        });

        if let Some((source_key, value)) = resolved {
            let confidence = output
                .confidence
                .get(*source_key)
                .copied()
                .unwrap_or(UNSCORED_CONFIDENCE);
            doc.fields.insert(
                target.to_string(),
                NormalizedField {
                    value: coerce(target, value),
                    confidence,
                    source_key: Some(source_key.to_string()),
                    edited: false,
                },
            );
        }
    }

    // Split a combined name when the document did not break it apart
    if !doc.fields.contains_key("first_name") || !doc.fields.contains_key("last_name") {
        if let Some((source_key, value)) = FULL_NAME_KEYS
            .iter()
            .find_map(|k| raw.get(*k).filter(|(_, v)| !v.trim().is_empty()))
        {
            let confidence = output
                .confidence
                .get(*source_key)
                .copied()
                .unwrap_or(UNSCORED_CONFIDENCE);
            let parts: Vec<&str> = value.split_whitespace().collect();
            if parts.len() >= 2 {
                let mut insert = |target: &str, text: &str| {
                    doc.fields
                        .entry(target.to_string())
                        .or_insert_with(|| NormalizedField {
                            value: title_case(text),
                            confidence,
                            source_key: Some(source_key.to_string()),
                            edited: false,
                        });
                };
                insert("first_name", parts[0]);
                insert("last_name", parts[parts.len() - 1]);
                if parts.len() > 2 {
                    insert("middle_name", &parts[1..parts.len() - 1].join(" "));
                }
            }
        }
    }

    doc.recompute_review();
    doc
}

/// Coerce one value to its canonical rendering for the given target
pub fn coerce(target: &str, value: &str) -> String {
    let value = value.trim();
    if is_date_target(target) {
        normalize_date(value)
    } else if target == "ssn" {
        dash_identifier(value)
    } else if is_name_target(target) || target == "city" {
        title_case(value)
    } else if target == "state" {
        state_code(value)
    } else if target == "zip" {
        normalize_zip(value)
    } else {
        value.to_string()
    }
}

fn clean_key(key: &str) -> String {
    key.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' || c == '.' { '_' } else { c })
        .collect()
}

/// Normalize a date to MM/DD/YYYY. Accepts slash or dash separators (in
/// either MM-DD-YYYY or YYYY-MM-DD order) and 8-digit compact forms.
/// Values that do not parse are returned unchanged.
pub fn normalize_date(value: &str) -> String {
    let value = value.trim();

    let parts: Vec<&str> = if value.contains('/') {
        value.split('/').collect()
    } else if value.contains('-') {
        value.split('-').collect()
    } else {
        Vec::new()
    };

    let (month, day, year) = if parts.len() == 3 {
        if parts[0].len() == 4 {
            (parts[1], parts[2], parts[0])
        } else {
            (parts[0], parts[1], parts[2])
        }
    } else if parts.is_empty() && value.len() == 8 && value.chars().all(|c| c.is_ascii_digit()) {
        // Compact form: a leading pair above 12 can only be a year prefix
        let leading: u32 = value[0..2].parse().unwrap_or(0);
        if leading > 12 {
            (&value[4..6], &value[6..8], &value[0..4])
        } else {
            (&value[0..2], &value[2..4], &value[4..8])
        }
    } else {
        return value.to_string();
    };

    let (Ok(m), Ok(d), Ok(y)) = (
        month.parse::<u32>(),
        day.parse::<u32>(),
        year.parse::<u32>(),
    ) else {
        return value.to_string();
    };

    if !(1..=12).contains(&m) || !(1..=31).contains(&d) || year.len() != 4 {
        return value.to_string();
    }

    format!("{m:02}/{d:02}/{y:04}")
}

/// Regroup a 9-digit identifier into the dashed 3-2-4 pattern. Already
/// dashed values pass through unchanged; anything that is not 9 digits
/// is returned as-is.
pub fn dash_identifier(value: &str) -> String {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 9 {
        format!("{}-{}-{}", &digits[0..3], &digits[3..5], &digits[5..9])
    } else {
        value.trim().to_string()
    }
}

/// Title-case a free-text name: each word (and hyphenated segment) gets an
/// uppercase first letter, the rest lowered.
pub fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            word.split('-')
                .map(capitalize)
                .collect::<Vec<_>>()
                .join("-")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

/// Normalize a ZIP: 5-digit and ZIP+4 forms; 9 bare digits get the +4 dash.
pub fn normalize_zip(value: &str) -> String {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        5 => digits,
        9 => format!("{}-{}", &digits[0..5], &digits[5..9]),
        _ => value.trim().to_string(),
    }
}

/// Map a state name to its 2-letter code. Valid-looking 2-letter codes
/// pass through (uppercased); unknown names are returned unchanged.
pub fn state_code(value: &str) -> String {
    let value = value.trim();
    if value.len() == 2 && value.chars().all(|c| c.is_ascii_alphabetic()) {
        return value.to_uppercase();
    }

    match value.to_lowercase().as_str() {
        "alabama" => "AL",
        "alaska" => "AK",
        "arizona" => "AZ",
        "arkansas" => "AR",
        "california" => "CA",
        "colorado" => "CO",
        "connecticut" => "CT",
        "delaware" => "DE",
        "district of columbia" => "DC",
        "florida" => "FL",
        "georgia" => "GA",
        "hawaii" => "HI",
        "idaho" => "ID",
        "illinois" => "IL",
        "indiana" => "IN",
        "iowa" => "IA",
        "kansas" => "KS",
        "kentucky" => "KY",
        "louisiana" => "LA",
        "maine" => "ME",
        "maryland" => "MD",
        "massachusetts" => "MA",
        "michigan" => "MI",
        "minnesota" => "MN",
        "mississippi" => "MS",
        "missouri" => "MO",
        "montana" => "MT",
        "nebraska" => "NE",
        "nevada" => "NV",
        "new hampshire" => "NH",
        "new jersey" => "NJ",
        "new mexico" => "NM",
        "new york" => "NY",
        "north carolina" => "NC",
        "north dakota" => "ND",
        "ohio" => "OH",
        "oklahoma" => "OK",
        "oregon" => "OR",
        "pennsylvania" => "PA",
        "rhode island" => "RI",
        "south carolina" => "SC",
        "south dakota" => "SD",
        "tennessee" => "TN",
        "texas" => "TX",
        "utah" => "UT",
        "vermont" => "VT",
        "virginia" => "VA",
        "washington" => "WA",
        "west virginia" => "WV",
        "wisconsin" => "WI",
        "wyoming" => "WY",
        _ => return value.to_string(),
    }
    .to_string()
}

/// Up to 3 alternate renderings for format-ambiguous fields, offered for
/// one-tap correction during review. The current rendering is excluded.
pub fn alternates(target: &str, value: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    if is_date_target(target) {
        let canonical = normalize_date(value);
        if let Some((m, d, y)) = split_date(&canonical) {
            if d <= 12 && d != m {
                out.push(format!("{d:02}/{m:02}/{y:04}")); // day/month swap
            }
            out.push(format!("{y:04}-{m:02}-{d:02}"));
            out.push(format!("{m:02}{d:02}{y:04}"));
        }
    } else if target == "ssn" || target == "document_number" {
        let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() == 9 {
            out.push(digits.clone());
            out.push(format!("{} {} {}", &digits[0..3], &digits[3..5], &digits[5..9]));
        }
    } else if target == "zip" {
        let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() == 9 {
            out.push(digits[0..5].to_string());
        }
    } else if is_name_target(target) {
        out.push(value.to_uppercase());
    }

    out.retain(|alt| alt != value);
    out.dedup();
    out.truncate(3);
    out
}

fn split_date(value: &str) -> Option<(u32, u32, u32)> {
    let parts: Vec<&str> = value.split('/').collect();
    if parts.len() != 3 {
        return None;
    }
    Some((
        parts[0].parse().ok()?,
        parts[1].parse().ok()?,
        parts[2].parse().ok()?,
    ))
}

/// Re-derive the merged auto-fill field set from all completed documents.
/// The highest-confidence value wins per field; confidence ties break on
/// the lexicographically smaller value so the result is independent of
/// document completion order.
pub fn merge_completed<'a>(
    docs: impl IntoIterator<Item = &'a NormalizedDocument>,
) -> BTreeMap<String, NormalizedField> {
    let mut merged: BTreeMap<String, NormalizedField> = BTreeMap::new();

    for doc in docs {
        for (key, field) in &doc.fields {
            match merged.get(key) {
                Some(existing)
                    if existing.confidence > field.confidence
                        || (existing.confidence == field.confidence
                            && existing.value <= field.value) => {}
                _ => {
                    merged.insert(key.clone(), field.clone());
                }
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(fields: &[(&str, &str, f64)]) -> RecognitionOutput {
        RecognitionOutput {
            fields: fields
                .iter()
                .map(|(k, v, _)| (k.to_string(), v.to_string()))
                .collect(),
            confidence: fields
                .iter()
                .map(|(k, _, c)| (k.to_string(), *c))
                .collect(),
            raw_text: String::new(),
        }
    }

    #[test]
    fn test_full_name_split_and_title_case() {
        let doc = normalize(&output(&[("name", "john micheal doe", 0.95)]));
        assert_eq!(doc.fields["first_name"].value, "John");
        assert_eq!(doc.fields["middle_name"].value, "Micheal");
        assert_eq!(doc.fields["last_name"].value, "Doe");
    }

    #[test]
    fn test_identifier_regrouped() {
        let doc = normalize(&output(&[("ssn", "123456789", 0.99)]));
        assert_eq!(doc.fields["ssn"].value, "123-45-6789");
    }

    #[test]
    fn test_state_name_mapped_to_code() {
        let doc = normalize(&output(&[("state", "California", 0.9)]));
        assert_eq!(doc.fields["state"].value, "CA");
    }

    #[test]
    fn test_normalization_idempotent() {
        assert_eq!(dash_identifier("123-45-6789"), "123-45-6789");
        assert_eq!(state_code("CA"), "CA");
        assert_eq!(state_code("ca"), "CA");
        assert_eq!(normalize_date("03/12/1985"), "03/12/1985");
        assert_eq!(title_case("John Doe"), "John Doe");
        assert_eq!(normalize_zip("94103-1234"), "94103-1234");
    }

    #[test]
    fn test_date_separator_variants() {
        assert_eq!(normalize_date("3/4/1990"), "03/04/1990");
        assert_eq!(normalize_date("03-04-1990"), "03/04/1990");
        assert_eq!(normalize_date("1990-03-04"), "03/04/1990");
        assert_eq!(normalize_date("03041990"), "03/04/1990");
        assert_eq!(normalize_date("19900304"), "03/04/1990");
        // Garbage passes through untouched
        assert_eq!(normalize_date("soon"), "soon");
    }

    #[test]
    fn test_alias_order_first_non_empty_wins() {
        let doc = normalize(&output(&[
            ("first_name", "", 0.9),
            ("given_name", "maria", 0.93),
        ]));
        assert_eq!(doc.fields["first_name"].value, "Maria");
        assert_eq!(
            doc.fields["first_name"].source_key.as_deref(),
            Some("given_name")
        );
    }

    #[test]
    fn test_single_weak_field_forces_review() {
        let doc = normalize(&output(&[
            ("first_name", "Ann", 0.95),
            ("last_name", "Lee", 0.92),
            ("ssn", "123456789", 0.78),
        ]));
        // Mean ≈ 0.883 clears the overall threshold, but the weak field
        // overrides it.
        assert!(doc.overall_confidence > OVERALL_REVIEW_THRESHOLD);
        assert!(doc.requires_review);
    }

    #[test]
    fn test_review_edit_raises_confidence() {
        let mut doc = normalize(&output(&[
            ("first_name", "Ann", 0.95),
            ("ssn", "123456789", 0.70),
        ]));
        assert!(doc.requires_review);

        doc.apply_review_edit("ssn", "987654321");
        assert_eq!(doc.fields["ssn"].value, "987-65-4321");
        assert!(doc.fields["ssn"].confidence >= EDITED_CONFIDENCE_FLOOR);
        assert!(doc.fields["ssn"].edited);
        assert!(!doc.requires_review);
    }

    #[test]
    fn test_alternates_capped_and_exclude_current() {
        let alts = alternates("date_of_birth", "03/04/1990");
        assert!(alts.len() <= 3);
        assert!(alts.contains(&"04/03/1990".to_string()));
        assert!(!alts.contains(&"03/04/1990".to_string()));

        let alts = alternates("ssn", "123-45-6789");
        assert!(alts.contains(&"123456789".to_string()));
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = normalize(&output(&[("first_name", "Jon", 0.8), ("city", "Reno", 0.9)]));
        let b = normalize(&output(&[("first_name", "John", 0.95)]));

        let ab = merge_completed([&a, &b]);
        let ba = merge_completed([&b, &a]);

        assert_eq!(ab, ba);
        assert_eq!(ab["first_name"].value, "John");
        assert_eq!(ab["city"].value, "Reno");
    }

    #[test]
    fn test_empty_output_requires_review() {
        let doc = normalize(&output(&[]));
        assert!(doc.requires_review);
        assert_eq!(doc.overall_confidence, 0.0);
    }
}
