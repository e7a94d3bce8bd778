use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::verify::Verification;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedForm {
    pub form_number: String,
    #[serde(alias = "expected_title_1")]
    pub expected_title: String,
    pub expected_pages: u32,
    #[serde(
        default,
        alias = "expected_title_2",
        skip_serializing_if = "Option::is_none"
    )]
    pub alternate_title: Option<String>,
}

impl ExpectedForm {
    /// Titles accepted for this form, primary first.
    pub fn titles(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.expected_title.as_str()).chain(
            self.alternate_title
                .as_deref()
                .filter(|title| !title.trim().is_empty()),
        )
    }

    pub fn display_titles(&self) -> String {
        self.titles().collect::<Vec<_>>().join(" OR ")
    }
}

/// Untrusted classification object returned by the model.
///
/// Kept as raw JSON; typed views are derived through the accessors in
/// `crate::verify`, each of which degrades to `None` on a missing or mistyped
/// path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawClassification(pub Value);

impl RawClassification {
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Builds usage from the counts a service reported. A missing total is
    /// derived; a total that disagrees with input + output is kept as reported.
    pub fn from_reported(input: Option<u64>, output: Option<u64>, total: Option<u64>) -> Self {
        let input_tokens = input.unwrap_or(0);
        let output_tokens = output.unwrap_or(0);
        let derived = input_tokens.saturating_add(output_tokens);
        let total_tokens = total.unwrap_or(derived);

        if input.is_some() && output.is_some() && total_tokens != derived {
            warn!(
                input_tokens,
                output_tokens,
                total_tokens,
                "reported total tokens differ from input + output"
            );
        }

        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub filename: String,
    pub form_number: Option<String>,
    pub form_title: Option<String>,
    pub page_count: Option<u32>,
    pub confidence: Option<u8>,
    pub is_verified: bool,
    pub token_usage: Option<TokenUsage>,
    pub llm_response: Option<RawClassification>,
    pub error: Option<String>,
}

impl ClassificationResult {
    pub fn succeeded(
        filename: String,
        verification: Verification,
        token_usage: TokenUsage,
        raw: RawClassification,
    ) -> Self {
        Self {
            filename,
            form_number: verification.form_number,
            form_title: verification.form_title,
            page_count: verification.page_count,
            confidence: verification.confidence,
            is_verified: verification.is_verified,
            token_usage: Some(token_usage),
            llm_response: Some(raw),
            error: None,
        }
    }

    pub fn failed(filename: String, error: String) -> Self {
        Self {
            filename,
            form_number: None,
            form_title: None,
            page_count: None,
            confidence: None,
            is_verified: false,
            token_usage: None,
            llm_response: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregate over every row of the cumulative stats artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub verified: usize,
    pub failed: usize,
    pub errors: usize,
    pub average_confidence: Option<f64>,
    pub average_tokens: Option<f64>,
    pub total_tokens: u64,
}
