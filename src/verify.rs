//! Reconciles a model classification against the expected-forms registry.
//!
//! Every accessor here reads the untrusted response defensively: a missing
//! path, a wrong JSON type or an out-of-range value yields `None` for that
//! field only.

use serde_json::Value;

use crate::model::{ExpectedForm, RawClassification};
use crate::registry::ExpectedFormRegistry;

const CLASSIFICATION_ROOT: &str = "form_classification";

/// Fields read out of a raw classification, before any registry lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    pub form_number: Option<String>,
    pub form_title: Option<String>,
    pub page_count: Option<u32>,
    pub confidence: Option<u8>,
    pub form_number_confidence: Option<u8>,
    pub title_confidence: Option<u8>,
    pub page_count_confidence: Option<u8>,
    pub title_language: Option<String>,
    pub alternative_candidates: Vec<String>,
    pub referenced_forms: Vec<String>,
    pub single_form_number: Option<bool>,
    pub human_review: Option<bool>,
    pub potential_issues: Vec<String>,
}

impl ExtractedFields {
    /// True when the model saw other form numbers referenced in the document
    /// or was unsure the reported number is the document's own.
    pub fn has_reference_ambiguity(&self) -> bool {
        self.single_form_number == Some(false) || !self.referenced_forms.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerificationChecks {
    pub form_found: bool,
    pub title_match: bool,
    pub page_match: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Verification {
    pub form_number: Option<String>,
    pub form_title: Option<String>,
    pub page_count: Option<u32>,
    pub confidence: Option<u8>,
    pub is_verified: bool,
    pub checks: VerificationChecks,
    /// Everything read from the response, including per-field confidences and
    /// the review and ambiguity signals.
    pub fields: ExtractedFields,
}

pub fn verify(
    raw: Option<&RawClassification>,
    error: Option<&str>,
    registry: &ExpectedFormRegistry,
) -> Verification {
    if error.is_some() {
        return Verification::default();
    }
    let Some(raw) = raw else {
        return Verification::default();
    };

    verify_fields(extract_fields(raw), registry)
}

fn verify_fields(fields: ExtractedFields, registry: &ExpectedFormRegistry) -> Verification {
    let expected = registry.lookup(fields.form_number.as_deref());

    let checks = match expected {
        Some(form) => VerificationChecks {
            form_found: true,
            title_match: title_matches(form, fields.form_title.as_deref()),
            page_match: fields.page_count == Some(form.expected_pages),
        },
        None => VerificationChecks::default(),
    };

    Verification {
        form_number: fields.form_number.clone(),
        form_title: fields.form_title.clone(),
        page_count: fields.page_count,
        confidence: fields.confidence,
        is_verified: checks.form_found && checks.title_match && checks.page_match,
        checks,
        fields,
    }
}

/// Containment match: some accepted title of `form`, normalized, must occur
/// inside the normalized extracted title.
pub fn title_matches(form: &ExpectedForm, extracted: Option<&str>) -> bool {
    let Some(extracted) = extracted else {
        return false;
    };
    let haystack = normalize_title(extracted);
    if haystack.is_empty() {
        return false;
    }

    form.titles()
        .map(normalize_title)
        .any(|needle| !needle.is_empty() && haystack.contains(&needle))
}

/// Trims, collapses whitespace runs to a single space and lowercases.
/// Caseless scripts such as Hebrew pass through unchanged.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn extract_fields(raw: &RawClassification) -> ExtractedFields {
    let root = raw.as_value();
    let number_node = field_node(root, "form_number");
    let title_node = field_node(root, "form_title");
    let pages_node = field_node(root, "page_count");

    let overall_confidence = root
        .pointer("/processing_metadata/overall_confidence")
        .filter(|value| !value.is_null())
        .or_else(|| root.get("confidence"))
        .and_then(parse_confidence);

    ExtractedFields {
        form_number: number_node
            .and_then(node_value)
            .and_then(parse_form_number),
        form_title: title_node.and_then(node_value).and_then(parse_text),
        page_count: pages_node.and_then(node_value).and_then(parse_page_count),
        confidence: overall_confidence,
        form_number_confidence: number_node.and_then(node_confidence),
        title_confidence: title_node.and_then(node_confidence),
        page_count_confidence: pages_node.and_then(node_confidence),
        title_language: title_node
            .and_then(|node| node.get("language"))
            .and_then(parse_text),
        alternative_candidates: number_node
            .and_then(|node| node.get("alternative_candidates"))
            .map(string_list)
            .unwrap_or_default(),
        referenced_forms: number_node
            .and_then(|node| node.pointer("/form_number_validation/found_references_to_other_forms"))
            .map(string_list)
            .unwrap_or_default(),
        single_form_number: number_node
            .and_then(|node| node.pointer("/form_number_validation/is_single_number"))
            .and_then(Value::as_bool),
        human_review: root
            .pointer("/processing_metadata/recommended_human_review")
            .and_then(Value::as_bool),
        potential_issues: root
            .pointer("/processing_metadata/potential_issues")
            .map(string_list)
            .unwrap_or_default(),
    }
}

/// Reads a confidence as an integer percentage.
///
/// Accepts numbers and numeric strings in 0..=100 (an optional `%` suffix is
/// allowed) and the labels `High`, `Medium` and `Low`.
pub fn parse_confidence(value: &Value) -> Option<u8> {
    match value {
        Value::Number(number) => number.as_f64().and_then(percentage),
        Value::String(text) => parse_confidence_text(text),
        _ => None,
    }
}

pub fn parse_confidence_text(text: &str) -> Option<u8> {
    let text = text.trim();
    match text.to_ascii_lowercase().as_str() {
        "high" => return Some(90),
        "medium" => return Some(60),
        "low" => return Some(30),
        _ => {}
    }

    text.strip_suffix('%')
        .unwrap_or(text)
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(percentage)
}

fn percentage(value: f64) -> Option<u8> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Some(value.round() as u8)
    } else {
        None
    }
}

fn field_node<'a>(root: &'a Value, name: &str) -> Option<&'a Value> {
    root.get(CLASSIFICATION_ROOT)
        .and_then(|classification| classification.get(name))
        .or_else(|| root.get(name))
}

fn node_value(node: &Value) -> Option<&Value> {
    if node.is_object() {
        node.get("value")
    } else {
        Some(node)
    }
}

fn node_confidence(node: &Value) -> Option<u8> {
    node.get("confidence")
        .or_else(|| node.get("confidence_level"))
        .and_then(parse_confidence)
}

fn parse_form_number(value: &Value) -> Option<String> {
    match value {
        Value::String(_) => parse_text(value),
        Value::Number(number) => number.as_u64().map(|n| n.to_string()).or_else(|| {
            number
                .as_f64()
                .filter(|n| n.is_finite() && *n >= 0.0 && n.fract() == 0.0)
                .map(|n| format!("{n:.0}"))
        }),
        _ => None,
    }
}

fn parse_text(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned)
}

fn parse_page_count(value: &Value) -> Option<u32> {
    let count = match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|n| n.is_finite() && *n >= 0.0 && n.fract() == 0.0)
                .map(|n| n as u64)
        }),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }?;

    u32::try_from(count).ok().filter(|count| *count > 0)
}

fn string_list(value: &Value) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(_) => parse_text(item),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
        .collect()
}
