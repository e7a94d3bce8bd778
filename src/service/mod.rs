//! Boundary to the external multimodal classification service.

mod gemini;
mod prompts;

use std::fmt;

use thiserror::Error;

use crate::model::{RawClassification, TokenUsage};

pub use gemini::GeminiClassifier;

/// One document handed to a classifier.
#[derive(Debug, Clone, Copy)]
pub struct DocumentInput<'a> {
    pub filename: &'a str,
    pub bytes: &'a [u8],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub raw: RawClassification,
    pub token_usage: TokenUsage,
}

/// Submits a document and returns its structured classification.
///
/// Implementations must not carry state from one call into the next.
pub trait Classifier {
    fn classify(&self, document: DocumentInput<'_>) -> Result<Classification, ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub candidate_count: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 0.95,
            top_k: 10,
            max_output_tokens: 2048,
            candidate_count: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceErrorKind {
    Transport,
    ContentFilter,
    Quota,
    MalformedResponse,
    Api,
}

impl ServiceErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::ContentFilter => "content_filter",
            Self::Quota => "quota",
            Self::MalformedResponse => "malformed_response",
            Self::Api => "api",
        }
    }
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Safety classification attached to a content-filter rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyRating {
    pub category: String,
    pub probability: String,
    pub blocked: bool,
}

impl fmt::Display for SafetyRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.category, self.probability)?;
        if self.blocked {
            f.write_str(" (blocked)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind}: {detail}{}", render_ratings(.safety_ratings))]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub detail: String,
    pub safety_ratings: Vec<SafetyRating>,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            safety_ratings: Vec::new(),
        }
    }

    pub fn content_filter(detail: impl Into<String>, safety_ratings: Vec<SafetyRating>) -> Self {
        Self {
            kind: ServiceErrorKind::ContentFilter,
            detail: detail.into(),
            safety_ratings,
        }
    }
}

fn render_ratings(ratings: &[SafetyRating]) -> String {
    if ratings.is_empty() {
        return String::new();
    }
    let rendered = ratings
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!(" [safety: {rendered}]")
}
