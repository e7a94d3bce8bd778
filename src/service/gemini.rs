use std::time::Duration;

use base64::Engine;
use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::prompts::{SYSTEM_PROMPT, USER_PROMPT};
use super::{
    Classification, Classifier, DocumentInput, GenerationParams, SafetyRating, ServiceError,
    ServiceErrorKind,
};
use crate::model::{RawClassification, TokenUsage};

const PDF_MIME_TYPE: &str = "application/pdf";
const RESPONSE_PREVIEW_CHARS: usize = 200;

/// Harm categories relaxed for every request: the forms carry personal data
/// that the default thresholds tend to reject.
const RELAXED_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
];

const FILTER_FINISH_REASONS: [&str; 5] = [
    "SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "IMAGE_SAFETY",
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    safety_settings: Vec<SafetySetting>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
    candidate_count: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
    finish_message: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<ApiSafetyRating>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
    block_reason_message: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<ApiSafetyRating>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiSafetyRating {
    category: Option<String>,
    probability: Option<String>,
    #[serde(default)]
    blocked: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
    total_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    status: Option<String>,
}

/// Gemini `generateContent` client.
///
/// Holds only immutable settings. Each call builds its own HTTP client and
/// request, so nothing from one document reaches the next.
#[derive(Debug, Clone)]
pub struct GeminiClassifier {
    api_key: String,
    endpoint: String,
    model: String,
    params: GenerationParams,
}

impl GeminiClassifier {
    pub fn new(api_key: String, endpoint: String, model: String, params: GenerationParams) -> Self {
        Self {
            api_key,
            endpoint,
            model,
            params,
        }
    }

    fn request_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }

    fn build_request<'a>(&self, document: DocumentInput<'a>) -> GenerateContentRequest<'a> {
        let data = base64::engine::general_purpose::STANDARD.encode(document.bytes);

        GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part::Text {
                    text: SYSTEM_PROMPT,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: PDF_MIME_TYPE,
                            data,
                        },
                    },
                    Part::Text { text: USER_PROMPT },
                ],
            }],
            safety_settings: RELAXED_CATEGORIES
                .into_iter()
                .map(|category| SafetySetting {
                    category,
                    threshold: "BLOCK_NONE",
                })
                .collect(),
            generation_config: GenerationConfig {
                temperature: self.params.temperature,
                top_p: self.params.top_p,
                top_k: self.params.top_k,
                max_output_tokens: self.params.max_output_tokens,
                candidate_count: self.params.candidate_count,
                response_mime_type: "application/json",
            },
        }
    }
}

impl Classifier for GeminiClassifier {
    fn classify(&self, document: DocumentInput<'_>) -> Result<Classification, ServiceError> {
        let http = Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| transport(format!("failed to build HTTP client: {err}")))?;

        let request = self.build_request(document);
        let response = http
            .post(self.request_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .map_err(|err| transport(format!("request for {} failed: {err}", document.filename)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| transport(format!("failed to read response body: {err}")))?;

        interpret_response(status, &body)
    }
}

fn interpret_response(status: u16, body: &str) -> Result<Classification, ServiceError> {
    if !(200..300).contains(&status) {
        return Err(http_failure(status, body));
    }

    let response: GenerateContentResponse = serde_json::from_str(body).map_err(|err| {
        malformed(format!(
            "response body is not a generateContent payload: {err}"
        ))
    })?;

    if let Some(feedback) = response.prompt_feedback.as_ref() {
        if let Some(reason) = feedback.block_reason.as_deref() {
            let message = feedback
                .block_reason_message
                .as_deref()
                .map(|message| format!(" ({message})"))
                .unwrap_or_default();
            return Err(ServiceError::content_filter(
                format!("prompt blocked: {reason}{message}"),
                convert_ratings(&feedback.safety_ratings),
            ));
        }
    }

    let candidate = response
        .candidates
        .first()
        .ok_or_else(|| malformed("response has no candidates"))?;

    if let Some(reason) = candidate
        .finish_reason
        .as_deref()
        .filter(|reason| FILTER_FINISH_REASONS.contains(reason))
    {
        let message = candidate
            .finish_message
            .as_deref()
            .map(|message| format!(" ({message})"))
            .unwrap_or_default();
        return Err(ServiceError::content_filter(
            format!("finish_reason={reason}{message}"),
            convert_ratings(&candidate.safety_ratings),
        ));
    }

    let text = candidate
        .content
        .as_ref()
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<String>()
        })
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(malformed(format!(
            "candidate has no text (finish_reason={})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    let value = parse_json_object(&text)?;
    let token_usage = response
        .usage_metadata
        .map(|usage| {
            TokenUsage::from_reported(
                usage.prompt_token_count,
                usage.candidates_token_count,
                usage.total_token_count,
            )
        })
        .unwrap_or_default();

    Ok(Classification {
        raw: RawClassification(value),
        token_usage,
    })
}

fn http_failure(status: u16, body: &str) -> ServiceError {
    let error = serde_json::from_str::<ApiErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error);
    let api_status = error.as_ref().and_then(|error| error.status.clone());
    let message = error
        .and_then(|error| error.message)
        .unwrap_or_else(|| preview(body));

    let detail = match api_status.as_deref() {
        Some(api_status) => format!("HTTP {status} {api_status}: {message}"),
        None => format!("HTTP {status}: {message}"),
    };

    if status == 429 || api_status.as_deref() == Some("RESOURCE_EXHAUSTED") {
        ServiceError::new(ServiceErrorKind::Quota, detail)
    } else {
        ServiceError::new(ServiceErrorKind::Api, detail)
    }
}

/// Parses the model's text as a JSON object, tolerating markdown fences and
/// prose around the object.
fn parse_json_object(text: &str) -> Result<Value, ServiceError> {
    let unfenced = strip_code_fence(text);
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(unfenced) {
        return Ok(value);
    }

    let span = Regex::new(r"(?s)\{.*\}")
        .map_err(|err| malformed(format!("failed to compile JSON span pattern: {err}")))?;
    let candidate = span
        .find(unfenced)
        .ok_or_else(|| malformed(format!("no JSON object in response: {}", preview(text))))?;

    match serde_json::from_str::<Value>(candidate.as_str()) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(malformed("response JSON is not an object")),
        Err(err) => Err(malformed(format!(
            "could not parse JSON from response ({err}): {}",
            preview(text)
        ))),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn convert_ratings(ratings: &[ApiSafetyRating]) -> Vec<SafetyRating> {
    ratings
        .iter()
        .map(|rating| SafetyRating {
            category: rating
                .category
                .clone()
                .unwrap_or_else(|| "UNKNOWN_CATEGORY".to_string()),
            probability: rating
                .probability
                .clone()
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            blocked: rating.blocked,
        })
        .collect()
}

fn preview(text: &str) -> String {
    let mut preview = text.chars().take(RESPONSE_PREVIEW_CHARS).collect::<String>();
    if text.chars().nth(RESPONSE_PREVIEW_CHARS).is_some() {
        preview.push_str("...");
    }
    preview
}

fn transport(detail: String) -> ServiceError {
    ServiceError::new(ServiceErrorKind::Transport, detail)
}

fn malformed(detail: impl Into<String>) -> ServiceError {
    ServiceError::new(ServiceErrorKind::MalformedResponse, detail)
}
