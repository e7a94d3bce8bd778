use tracing::debug;

use crate::model::{BatchSummary, ClassificationResult};
use crate::registry::ExpectedFormRegistry;
use crate::verify::{extract_fields, parse_confidence_text};

/// Columns of the statistics table, in rendering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatsColumn {
    Filename,
    RecordedAt,
    FormNumber,
    FormNumberConfidence,
    Title,
    TitleConfidence,
    Pages,
    PagesConfidence,
    Confidence,
    InputTokens,
    OutputTokens,
    ExpectedTitle,
    ExpectedPages,
    Verified,
    Error,
}

impl StatsColumn {
    pub const ALL: [StatsColumn; 15] = [
        Self::Filename,
        Self::RecordedAt,
        Self::FormNumber,
        Self::FormNumberConfidence,
        Self::Title,
        Self::TitleConfidence,
        Self::Pages,
        Self::PagesConfidence,
        Self::Confidence,
        Self::InputTokens,
        Self::OutputTokens,
        Self::ExpectedTitle,
        Self::ExpectedPages,
        Self::Verified,
        Self::Error,
    ];

    /// Value of the `data-field` attribute.
    pub fn key(self) -> &'static str {
        match self {
            Self::Filename => "filename",
            Self::RecordedAt => "recorded_at",
            Self::FormNumber => "form_number",
            Self::FormNumberConfidence => "form_number_confidence",
            Self::Title => "form_title",
            Self::TitleConfidence => "title_confidence",
            Self::Pages => "page_count",
            Self::PagesConfidence => "page_count_confidence",
            Self::Confidence => "confidence",
            Self::InputTokens => "input_tokens",
            Self::OutputTokens => "output_tokens",
            Self::ExpectedTitle => "expected_title",
            Self::ExpectedPages => "expected_pages",
            Self::Verified => "is_verified",
            Self::Error => "error",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Filename => "File Name",
            Self::RecordedAt => "Date",
            Self::FormNumber => "Form Number",
            Self::FormNumberConfidence => "Conf (Number)",
            Self::Title => "Title",
            Self::TitleConfidence => "Conf (Title)",
            Self::Pages => "Pages",
            Self::PagesConfidence => "Conf (Pages)",
            Self::Confidence => "Confidence",
            Self::InputTokens => "Input Tokens",
            Self::OutputTokens => "Output Tokens",
            Self::ExpectedTitle => "Expected Title",
            Self::ExpectedPages => "Expected Pages",
            Self::Verified => "Success",
            Self::Error => "Error",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        Self::ALL.into_iter().find(|column| column.key() == key)
    }

    /// Maps a header label to its column. Labels used by older versions of
    /// the report (`Form Type`, `Conf (Type)`, `Verified`) are accepted.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.split_whitespace().collect::<Vec<_>>().join(" ");
        match label.to_lowercase().as_str() {
            "form type" => return Some(Self::FormNumber),
            "conf (type)" => return Some(Self::FormNumberConfidence),
            "verified" => return Some(Self::Verified),
            _ => {}
        }
        Self::ALL
            .into_iter()
            .find(|column| column.label().eq_ignore_ascii_case(&label))
    }
}

/// One document's line in the cumulative statistics table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsRow {
    pub filename: String,
    pub recorded_at: Option<String>,
    pub form_number: Option<String>,
    pub form_number_confidence: Option<u8>,
    pub form_title: Option<String>,
    pub title_confidence: Option<u8>,
    pub page_count: Option<u32>,
    pub page_count_confidence: Option<u8>,
    pub confidence: Option<u8>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub expected_title: Option<String>,
    pub expected_pages: Option<u32>,
    pub verified: bool,
    pub error: Option<String>,
}

impl StatsRow {
    pub fn from_result(
        result: &ClassificationResult,
        registry: &ExpectedFormRegistry,
        recorded_at: &str,
    ) -> Self {
        let fields = result
            .llm_response
            .as_ref()
            .map(extract_fields)
            .unwrap_or_default();
        let expected = registry.lookup(result.form_number.as_deref());

        Self {
            filename: result.filename.clone(),
            recorded_at: Some(recorded_at.to_string()),
            form_number: result.form_number.clone(),
            form_number_confidence: fields.form_number_confidence,
            form_title: result.form_title.clone(),
            title_confidence: fields.title_confidence,
            page_count: result.page_count,
            page_count_confidence: fields.page_count_confidence,
            confidence: result.confidence,
            input_tokens: result.token_usage.map(|usage| usage.input_tokens),
            output_tokens: result.token_usage.map(|usage| usage.output_tokens),
            expected_title: expected.map(|form| form.display_titles()),
            expected_pages: expected.map(|form| form.expected_pages),
            verified: result.is_verified,
            error: result.error.clone(),
        }
    }

    /// Tokens spent on this row, when any count was recorded.
    pub fn tokens(&self) -> Option<u64> {
        match (self.input_tokens, self.output_tokens) {
            (None, None) => None,
            (input, output) => Some(input.unwrap_or(0).saturating_add(output.unwrap_or(0))),
        }
    }

    pub fn cell_text(&self, column: StatsColumn) -> String {
        fn opt<T: ToString>(value: &Option<T>) -> String {
            value.as_ref().map(ToString::to_string).unwrap_or_default()
        }

        match column {
            StatsColumn::Filename => self.filename.clone(),
            StatsColumn::RecordedAt => opt(&self.recorded_at),
            StatsColumn::FormNumber => opt(&self.form_number),
            StatsColumn::FormNumberConfidence => opt(&self.form_number_confidence),
            StatsColumn::Title => opt(&self.form_title),
            StatsColumn::TitleConfidence => opt(&self.title_confidence),
            StatsColumn::Pages => opt(&self.page_count),
            StatsColumn::PagesConfidence => opt(&self.page_count_confidence),
            StatsColumn::Confidence => opt(&self.confidence),
            StatsColumn::InputTokens => opt(&self.input_tokens),
            StatsColumn::OutputTokens => opt(&self.output_tokens),
            StatsColumn::ExpectedTitle => opt(&self.expected_title),
            StatsColumn::ExpectedPages => opt(&self.expected_pages),
            StatsColumn::Verified => verified_label(self.verified).to_string(),
            StatsColumn::Error => opt(&self.error),
        }
    }

    /// Stores a parsed cell. Unreadable numeric cells become `None`; the
    /// verified flag is handled by the caller.
    pub fn set_cell(&mut self, column: StatsColumn, text: &str) {
        let text = text.trim();
        let owned = || (!text.is_empty()).then(|| text.to_string());

        match column {
            StatsColumn::Filename => self.filename = text.to_string(),
            StatsColumn::RecordedAt => self.recorded_at = owned(),
            StatsColumn::FormNumber => self.form_number = owned(),
            StatsColumn::FormNumberConfidence => {
                self.form_number_confidence = cell_confidence(column, text)
            }
            StatsColumn::Title => self.form_title = owned(),
            StatsColumn::TitleConfidence => self.title_confidence = cell_confidence(column, text),
            StatsColumn::Pages => self.page_count = cell_number(column, text),
            StatsColumn::PagesConfidence => {
                self.page_count_confidence = cell_confidence(column, text)
            }
            StatsColumn::Confidence => self.confidence = cell_confidence(column, text),
            StatsColumn::InputTokens => self.input_tokens = cell_number(column, text),
            StatsColumn::OutputTokens => self.output_tokens = cell_number(column, text),
            StatsColumn::ExpectedTitle => self.expected_title = owned(),
            StatsColumn::ExpectedPages => self.expected_pages = cell_number(column, text),
            StatsColumn::Verified => {}
            StatsColumn::Error => self.error = owned(),
        }
    }
}

pub fn verified_label(verified: bool) -> &'static str {
    if verified { "Yes" } else { "No" }
}

pub fn parse_verified(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "yes" | "true" | "verified" => Some(true),
        "no" | "false" | "failed" => Some(false),
        _ => None,
    }
}

/// Summary over every row, recomputed from scratch on each write.
pub fn summarize(rows: &[StatsRow]) -> BatchSummary {
    let verified = rows.iter().filter(|row| row.verified).count();
    let errors = rows.iter().filter(|row| row.error.is_some()).count();

    let confidences = rows
        .iter()
        .filter_map(|row| row.confidence)
        .map(f64::from)
        .collect::<Vec<_>>();
    let tokens = rows.iter().filter_map(StatsRow::tokens).collect::<Vec<_>>();
    let total_tokens = tokens.iter().fold(0_u64, |sum, value| sum.saturating_add(*value));

    BatchSummary {
        total: rows.len(),
        verified,
        failed: rows.len() - verified,
        errors,
        average_confidence: mean(&confidences),
        average_tokens: (!tokens.is_empty()).then(|| total_tokens as f64 / tokens.len() as f64),
        total_tokens,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn cell_confidence(column: StatsColumn, text: &str) -> Option<u8> {
    if text.is_empty() {
        return None;
    }
    let parsed = parse_confidence_text(text);
    if parsed.is_none() {
        debug!(column = column.key(), value = text, "ignoring unreadable confidence cell");
    }
    parsed
}

fn cell_number<T: std::str::FromStr>(column: StatsColumn, text: &str) -> Option<T> {
    if text.is_empty() {
        return None;
    }
    let parsed = text.replace(',', "").parse::<T>().ok();
    if parsed.is_none() {
        debug!(column = column.key(), value = text, "ignoring unreadable numeric cell");
    }
    parsed
}
