use std::cell::Cell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;

use super::batch::{classify_documents, discover_pdfs};
use super::report::write_report;
use super::run::execute;
use super::stats_merge::{merge_and_write, merge_rows};
use super::stats_parse::parse_stats_html;
use super::stats_render::render_stats_html;
use super::stats_rows::{StatsRow, summarize};
use crate::cli::ClassifyArgs;
use crate::model::{ClassificationResult, RawClassification, TokenUsage};
use crate::registry::ExpectedFormRegistry;
use crate::service::{
    Classification, Classifier, DocumentInput, SafetyRating, ServiceError, ServiceErrorKind,
};

struct StubClassifier {
    responses: HashMap<String, Result<Classification, ServiceError>>,
    calls: Cell<usize>,
}

impl StubClassifier {
    fn new() -> Self {
        Self {
            responses: HashMap::new(),
            calls: Cell::new(0),
        }
    }

    fn respond(mut self, filename: &str, response: Result<Classification, ServiceError>) -> Self {
        self.responses.insert(filename.to_string(), response);
        self
    }
}

impl Classifier for StubClassifier {
    fn classify(&self, document: DocumentInput<'_>) -> Result<Classification, ServiceError> {
        self.calls.set(self.calls.get() + 1);
        assert!(document.bytes.starts_with(b"%PDF"));
        self.responses
            .get(document.filename)
            .cloned()
            .unwrap_or_else(|| {
                Err(ServiceError::new(
                    ServiceErrorKind::MalformedResponse,
                    "no canned response",
                ))
            })
    }
}

fn registry() -> ExpectedFormRegistry {
    ExpectedFormRegistry::from_json_slice(
        r#"[
            {"form_number": "1344", "expected_title": "בקשה להחזר מס", "expected_pages": 2},
            {"form_number": "100", "expected_title": "Annual Report", "expected_pages": 3}
        ]"#
        .as_bytes(),
    )
    .unwrap()
}

fn classification(number: &str, title: &str, pages: u32, confidence: u8) -> Classification {
    Classification {
        raw: RawClassification(json!({
            "form_classification": {
                "form_number": {"value": number, "confidence": 95},
                "form_title": {"value": title, "confidence": 80, "language": "hebrew"},
                "page_count": {"value": pages, "confidence": 70}
            },
            "processing_metadata": {
                "overall_confidence": confidence,
                "recommended_human_review": false
            }
        })),
        token_usage: TokenUsage::from_reported(Some(1000), Some(200), None),
    }
}

fn write_pdf(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"%PDF-1.7\n%stub\n").unwrap();
    path
}

fn stats_row(filename: &str, verified: bool) -> StatsRow {
    StatsRow {
        filename: filename.to_string(),
        recorded_at: Some("2026-10-17 09:00".to_string()),
        form_number: Some("100".to_string()),
        confidence: Some(80),
        input_tokens: Some(100),
        output_tokens: Some(50),
        verified,
        ..StatsRow::default()
    }
}

fn args_for(dir: &Path) -> ClassifyArgs {
    ClassifyArgs {
        folder: dir.join("forms"),
        config: dir.join("form_config.json"),
        output: dir.join("out").join("classification_results.json"),
        api_key: Some("test-key".to_string()),
        stats: dir.join("classification_stats.html"),
        model: "gemini-2.5-flash-lite".to_string(),
        endpoint: "http://127.0.0.1:9".to_string(),
        temperature: 0.0,
        top_p: 0.95,
        top_k: 10,
        max_output_tokens: 2048,
    }
}

#[test]
fn discover_pdfs_is_flat_case_insensitive_and_sorted() {
    let dir = tempfile::tempdir().unwrap();
    write_pdf(dir.path(), "b.PDF");
    write_pdf(dir.path(), "a.pdf");
    fs::write(dir.path().join("notes.txt"), "x").unwrap();
    fs::create_dir(dir.path().join("nested")).unwrap();
    write_pdf(&dir.path().join("nested"), "c.pdf");

    let names = discover_pdfs(dir.path())
        .unwrap()
        .iter()
        .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect::<Vec<_>>();

    assert_eq!(names, vec!["a.pdf", "b.PDF"]);
}

#[test]
fn discover_pdfs_fails_for_missing_folder() {
    let dir = tempfile::tempdir().unwrap();
    let err = discover_pdfs(&dir.path().join("absent")).unwrap_err();
    assert!(format!("{err:#}").contains("absent"));
}

#[test]
fn every_document_yields_one_result_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let paths = vec![
        write_pdf(dir.path(), "1_ok.pdf"),
        write_pdf(dir.path(), "2_quota.pdf"),
        dir.path().join("3_missing.pdf"),
        write_pdf(dir.path(), "4_filtered.pdf"),
        write_pdf(dir.path(), "5_mismatch.pdf"),
    ];
    let classifier = StubClassifier::new()
        .respond("1_ok.pdf", Ok(classification("1344", "טופס 1344 - בקשה להחזר מס", 2, 88)))
        .respond(
            "2_quota.pdf",
            Err(ServiceError::new(ServiceErrorKind::Quota, "HTTP 429: exhausted")),
        )
        .respond(
            "4_filtered.pdf",
            Err(ServiceError::content_filter(
                "finish_reason=SAFETY",
                vec![SafetyRating {
                    category: "HARM_CATEGORY_DANGEROUS_CONTENT".to_string(),
                    probability: "HIGH".to_string(),
                    blocked: true,
                }],
            )),
        )
        .respond("5_mismatch.pdf", Ok(classification("100", "Annual Report", 4, 70)));

    let outcome = classify_documents(&paths, &classifier, &registry());

    assert_eq!(classifier.calls.get(), 4);
    assert_eq!(outcome.results.len(), paths.len());
    let names = outcome
        .results
        .iter()
        .map(|result| result.filename.as_str())
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec!["1_ok.pdf", "2_quota.pdf", "3_missing.pdf", "4_filtered.pdf", "5_mismatch.pdf"]
    );

    let ok = &outcome.results[0];
    assert!(ok.is_verified);
    assert_eq!(ok.form_number.as_deref(), Some("1344"));
    assert_eq!(ok.confidence, Some(88));
    assert_eq!(ok.token_usage.map(|usage| usage.total_tokens), Some(1200));

    assert_eq!(outcome.results[1].error.as_deref(), Some("quota: HTTP 429: exhausted"));
    assert!(
        outcome.results[2]
            .error
            .as_deref()
            .unwrap()
            .starts_with("document_read: ")
    );
    let filtered = outcome.results[3].error.as_deref().unwrap();
    assert!(filtered.starts_with("content_filter: finish_reason=SAFETY"));
    assert!(filtered.contains("HARM_CATEGORY_DANGEROUS_CONTENT=HIGH (blocked)"));

    let mismatch = &outcome.results[4];
    assert!(!mismatch.is_verified);
    assert!(mismatch.error.is_none());
    assert_eq!(mismatch.page_count, Some(4));

    for failed in &outcome.results[1..4] {
        assert!(!failed.is_verified);
        assert!(failed.llm_response.is_none());
    }

    let tally = &outcome.tally;
    assert_eq!(tally.total, 5);
    assert_eq!(tally.succeeded, 2);
    assert_eq!(tally.verified, 1);
    assert_eq!(tally.failed, 3);
    assert_eq!(tally.failures_by_kind.get("quota"), Some(&1));
    assert_eq!(tally.failures_by_kind.get("content_filter"), Some(&1));
    assert_eq!(tally.failures_by_kind.get("document_read"), Some(&1));
    assert_eq!(tally.total_tokens, 2400);
}

#[test]
fn report_is_a_json_array_in_processing_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.json");
    let results = vec![
        ClassificationResult::failed("a.pdf".to_string(), "transport: reset".to_string()),
        ClassificationResult::failed("b.pdf".to_string(), "api: HTTP 500".to_string()),
    ];

    write_report(&results, &path).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.ends_with('\n'));
    let parsed: Vec<ClassificationResult> = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, results);
}

#[test]
fn empty_batch_still_writes_an_empty_report() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.json");

    write_report(&[], &path).unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "[]\n");
}

#[test]
fn merging_twice_keeps_history_and_doubles_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stats.html");
    let rows = vec![stats_row("a.pdf", true), stats_row("b.pdf", false)];

    let first = merge_rows(rows.clone(), &path).unwrap();
    assert_eq!(first.prior_rows, 0);
    assert_eq!(first.summary.total, 2);

    let second = merge_rows(rows.clone(), &path).unwrap();
    assert_eq!(second.prior_rows, 2);
    assert_eq!(second.skipped_rows, 0);
    assert_eq!(second.summary.total, 4);
    assert_eq!(second.summary.verified, 2);
    assert_eq!(second.summary.failed, 2);

    let reparsed = parse_stats_html(&fs::read_to_string(&path).unwrap()).unwrap();
    let mut expected = rows.clone();
    expected.extend(rows);
    assert_eq!(reparsed.rows, expected);
}

#[test]
fn broken_prior_row_is_dropped_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stats.html");
    let prior = (1..=9)
        .map(|index| stats_row(&format!("{index}.pdf"), index % 2 == 0))
        .collect::<Vec<_>>();
    let html = render_stats_html(&prior, &summarize(&prior), "earlier", 0).replace(
        "</tbody>",
        "<tr><td data-field=\"filename\">broken.pdf</td><td data-field=\"is_verified\">maybe</td></tr>\n</tbody>",
    );
    fs::write(&path, html).unwrap();

    let report = merge_rows(vec![stats_row("new.pdf", true)], &path).unwrap();

    assert_eq!(report.prior_rows, 9);
    assert_eq!(report.skipped_rows, 1);
    assert_eq!(report.new_rows, 1);
    assert_eq!(report.summary.total, 10);

    let text = fs::read_to_string(&path).unwrap();
    let reparsed = parse_stats_html(&text).unwrap();
    assert_eq!(reparsed.rows.len(), 10);
    assert_eq!(reparsed.rows[9].filename, "new.pdf");
    assert!(!text.contains("broken.pdf"));
    assert!(text.contains("1 unreadable row(s)"));
}

#[test]
fn legacy_prettified_table_is_read_by_header_labels() {
    let legacy = r#"<!DOCTYPE html>
<html>
 <head>
  <title>
   Form Classification Statistics
  </title>
 </head>
 <body>
  <table>
   <thead>
    <tr>
     <th>File Name</th><th>Date</th><th>Form Type</th><th>Conf (Type)</th>
     <th>Title</th><th>Conf (Title)</th><th>Pages</th><th>Conf (Pages)</th>
     <th>Input Tokens</th><th>Output Tokens</th><th>Expected Title</th>
     <th>Expected Pages</th><th>Success</th>
    </tr>
   </thead>
   <tbody>
    <tr>
     <td>
      old.pdf
     </td>
     <td>2025-07-01 10:00</td>
     <td>1344</td>
     <td class="confidence-high">High</td>
     <td style="max-width: 200px;">
      בקשה   להחזר מס
     </td>
     <td class="confidence-medium">Medium</td>
     <td>N/A</td>
     <td class="confidence-low">Low</td>
     <td>1,500</td>
     <td>240</td>
     <td>בקשה להחזר מס</td>
     <td>2</td>
     <td class="success-yes">
      <strong>
       Yes
      </strong>
     </td>
    </tr>
   </tbody>
  </table>
 </body>
</html>"#;

    let parsed = parse_stats_html(legacy).unwrap();

    assert!(parsed.skipped.is_empty());
    assert_eq!(parsed.rows.len(), 1);
    let row = &parsed.rows[0];
    assert_eq!(row.filename, "old.pdf");
    assert_eq!(row.recorded_at.as_deref(), Some("2025-07-01 10:00"));
    assert_eq!(row.form_number.as_deref(), Some("1344"));
    assert_eq!(row.form_number_confidence, Some(90));
    assert_eq!(row.form_title.as_deref(), Some("בקשה להחזר מס"));
    assert_eq!(row.title_confidence, Some(60));
    assert_eq!(row.page_count, None);
    assert_eq!(row.page_count_confidence, Some(30));
    assert_eq!(row.confidence, None);
    assert_eq!(row.input_tokens, Some(1500));
    assert_eq!(row.output_tokens, Some(240));
    assert_eq!(row.expected_pages, Some(2));
    assert!(row.verified);
    assert_eq!(row.error, None);
}

#[test]
fn document_without_a_table_has_no_rows() {
    let parsed = parse_stats_html("<html><body><p>nothing here</p></body></html>").unwrap();
    assert!(parsed.rows.is_empty());
    assert!(parsed.skipped.is_empty());
}

#[test]
fn missing_or_empty_stats_file_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.html");
    let empty = dir.path().join("empty.html");
    fs::write(&empty, "  \n").unwrap();

    for path in [missing, empty] {
        let report = merge_rows(vec![stats_row("a.pdf", false)], &path).unwrap();
        assert_eq!(report.prior_rows, 0);
        assert_eq!(report.skipped_rows, 0);
        assert_eq!(report.summary.total, 1);
        assert!(path.exists());
    }
}

#[test]
fn unreadable_stats_file_aborts_without_overwriting() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stats.html");
    fs::create_dir(&path).unwrap();

    let err = merge_rows(vec![stats_row("a.pdf", true)], &path).unwrap_err();

    assert!(format!("{err:#}").contains("failed to read stats file"));
    assert!(path.is_dir());
}

#[test]
fn stats_file_with_invalid_utf8_is_still_merged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stats.html");
    let prior = vec![
        stats_row("a.pdf", true),
        stats_row("b.pdf", false),
        stats_row("c.pdf", true),
    ];
    let mut bytes = b"<!-- \xe0\xf0 -->\n".to_vec();
    bytes.extend(render_stats_html(&prior, &summarize(&prior), "earlier", 0).into_bytes());
    fs::write(&path, bytes).unwrap();

    let report = merge_rows(vec![stats_row("d.pdf", false)], &path).unwrap();

    assert_eq!(report.prior_rows, 3);
    assert_eq!(report.skipped_rows, 0);
    assert_eq!(report.summary.total, 4);
    let reparsed = parse_stats_html(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(reparsed.rows.len(), 4);
    assert_eq!(reparsed.rows[3].filename, "d.pdf");
}

#[test]
fn merge_and_write_derives_rows_from_results() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stats.html");
    let registry = registry();
    let classification = classification("100", "Annual Report 2025", 3, 91);
    let verified = ClassificationResult::succeeded(
        "report.pdf".to_string(),
        crate::verify::verify(Some(&classification.raw), None, &registry),
        classification.token_usage,
        classification.raw,
    );
    let failed = ClassificationResult::failed("bad.pdf".to_string(), "transport: reset".into());

    let report = merge_and_write(&[verified, failed], &registry, &path).unwrap();

    assert_eq!(report.new_rows, 2);
    assert_eq!(report.summary.verified, 1);
    assert_eq!(report.summary.errors, 1);
    assert_eq!(report.summary.average_confidence, Some(91.0));

    let rows = parse_stats_html(&fs::read_to_string(&path).unwrap())
        .unwrap()
        .rows;
    assert_eq!(rows[0].expected_title.as_deref(), Some("Annual Report"));
    assert_eq!(rows[0].expected_pages, Some(3));
    assert_eq!(rows[0].form_number_confidence, Some(95));
    assert_eq!(rows[0].input_tokens, Some(1000));
    assert!(rows[0].verified);
    assert_eq!(rows[1].error.as_deref(), Some("transport: reset"));
    assert!(!rows[1].verified);
    assert_eq!(rows[1].expected_title, None);
}

#[test]
fn execute_writes_both_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let args = args_for(dir.path());
    fs::create_dir(&args.folder).unwrap();
    write_pdf(&args.folder, "form_a.pdf");
    write_pdf(&args.folder, "form_b.pdf");

    let classifier = StubClassifier::new()
        .respond("form_a.pdf", Ok(classification("1344", "בקשה להחזר מס", 2, 90)))
        .respond(
            "form_b.pdf",
            Err(ServiceError::new(ServiceErrorKind::Transport, "connection reset")),
        );

    let (outcome, merge) = execute(&args, &registry(), &classifier).unwrap();
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(merge.summary.total, 2);

    let results: Vec<ClassificationResult> =
        serde_json::from_str(&fs::read_to_string(&args.output).unwrap()).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_verified);
    assert_eq!(results[1].error.as_deref(), Some("transport: connection reset"));

    let html = fs::read_to_string(&args.stats).unwrap();
    assert!(html.contains("form_a.pdf"));
    assert!(html.contains("form_b.pdf"));

    let (_, second) = execute(&args, &registry(), &classifier).unwrap();
    assert_eq!(second.prior_rows, 2);
    assert_eq!(second.summary.total, 4);
}

#[test]
fn execute_fails_when_folder_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let args = args_for(dir.path());

    let err = execute(&args, &registry(), &StubClassifier::new()).unwrap_err();

    assert!(format!("{err:#}").contains("failed to list documents"));
    assert!(!args.output.exists());
}

#[test]
fn report_failure_still_records_stats() {
    let dir = tempfile::tempdir().unwrap();
    let mut args = args_for(dir.path());
    fs::create_dir(&args.folder).unwrap();
    write_pdf(&args.folder, "form_a.pdf");
    args.output = dir.path().join("occupied");
    fs::create_dir(&args.output).unwrap();

    let classifier = StubClassifier::new()
        .respond("form_a.pdf", Ok(classification("1344", "בקשה להחזר מס", 2, 90)));

    let err = execute(&args, &registry(), &classifier).unwrap_err();

    assert!(format!("{err:#}").contains("failed to write report"));
    assert!(args.output.is_dir());
    let rows = parse_stats_html(&fs::read_to_string(&args.stats).unwrap())
        .unwrap()
        .rows;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].filename, "form_a.pdf");
    assert!(rows[0].verified);
}
