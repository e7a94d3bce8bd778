use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::model::ClassificationResult;
use crate::registry::ExpectedFormRegistry;
use crate::service::{Classifier, DocumentInput, ServiceError, ServiceErrorKind};
use crate::util::{read_file, sha256_bytes};
use crate::verify::verify;

/// Non-recursive listing of `.pdf` files (any case), sorted by file name.
pub fn discover_pdfs(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut pdfs = Vec::new();

    let entries =
        fs::read_dir(folder).with_context(|| format!("failed to read {}", folder.display()))?;

    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", folder.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }

        let is_pdf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);

        if is_pdf {
            pdfs.push(path);
        }
    }

    pdfs.sort_by(|left, right| left.file_name().cmp(&right.file_name()));
    Ok(pdfs)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchTally {
    pub total: usize,
    pub succeeded: usize,
    pub verified: usize,
    pub failed: usize,
    pub failures_by_kind: BTreeMap<&'static str, usize>,
    pub total_tokens: u64,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub results: Vec<ClassificationResult>,
    pub tally: BatchTally,
}

/// Classifies each document in order. Every input produces exactly one
/// result; a failure is recorded on its result and the batch continues.
pub fn classify_documents(
    paths: &[PathBuf],
    classifier: &dyn Classifier,
    registry: &ExpectedFormRegistry,
) -> BatchOutcome {
    let started = Instant::now();
    let mut results = Vec::with_capacity(paths.len());
    let mut tally = BatchTally {
        total: paths.len(),
        ..BatchTally::default()
    };

    for (index, path) in paths.iter().enumerate() {
        let filename = display_name(path);
        info!(
            document = index + 1,
            of = paths.len(),
            file = %filename,
            "classifying document"
        );

        let doc_started = Instant::now();
        let result = classify_one(path, &filename, classifier, registry, &mut tally);
        info!(
            file = %filename,
            verified = result.is_verified,
            failed = result.is_error(),
            error = result.error.as_deref().unwrap_or(""),
            elapsed_ms = doc_started.elapsed().as_millis() as u64,
            "document finished"
        );
        results.push(result);
    }

    tally.elapsed = started.elapsed();
    BatchOutcome { results, tally }
}

fn classify_one(
    path: &Path,
    filename: &str,
    classifier: &dyn Classifier,
    registry: &ExpectedFormRegistry,
    tally: &mut BatchTally,
) -> ClassificationResult {
    let bytes = match read_file(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(file = %filename, "failed to read document: {err:#}");
            record_failure(tally, "document_read");
            return ClassificationResult::failed(
                filename.to_string(),
                format!("document_read: {err:#}"),
            );
        }
    };
    info!(
        file = %filename,
        bytes = bytes.len(),
        sha256 = %sha256_bytes(&bytes),
        "loaded document"
    );

    let document = DocumentInput {
        filename,
        bytes: &bytes,
    };
    let classification = match classifier.classify(document) {
        Ok(classification) => classification,
        Err(err) => {
            log_service_error(filename, &err);
            record_failure(tally, err.kind.as_str());
            return ClassificationResult::failed(filename.to_string(), err.to_string());
        }
    };

    let verification = verify(Some(&classification.raw), None, registry);
    let fields = &verification.fields;
    if fields.human_review == Some(true) {
        warn!(
            file = %filename,
            issues = ?fields.potential_issues,
            "model recommends human review"
        );
    }
    if fields.has_reference_ambiguity() {
        warn!(
            file = %filename,
            referenced_forms = ?fields.referenced_forms,
            candidates = ?fields.alternative_candidates,
            "document references other form numbers"
        );
    }

    if verification.form_number.is_some() && !verification.checks.form_found {
        warn!(
            file = %filename,
            form_number = verification.form_number.as_deref().unwrap_or(""),
            "form number is not configured"
        );
    }

    info!(
        file = %filename,
        form_number = verification.form_number.as_deref().unwrap_or(""),
        form_found = verification.checks.form_found,
        title_match = verification.checks.title_match,
        page_match = verification.checks.page_match,
        confidence = ?verification.confidence,
        title_language = fields.title_language.as_deref().unwrap_or(""),
        total_tokens = classification.token_usage.total_tokens,
        "classification verified: {}",
        verification.is_verified
    );

    tally.succeeded += 1;
    if verification.is_verified {
        tally.verified += 1;
    }
    tally.total_tokens = tally
        .total_tokens
        .saturating_add(classification.token_usage.total_tokens);

    ClassificationResult::succeeded(
        filename.to_string(),
        verification,
        classification.token_usage,
        classification.raw,
    )
}

fn record_failure(tally: &mut BatchTally, kind: &'static str) {
    tally.failed += 1;
    *tally.failures_by_kind.entry(kind).or_default() += 1;
}

fn log_service_error(filename: &str, err: &ServiceError) {
    warn!(file = %filename, kind = %err.kind, "classification failed: {}", err.detail);
    if err.kind == ServiceErrorKind::ContentFilter {
        for rating in &err.safety_ratings {
            warn!(
                file = %filename,
                category = %rating.category,
                probability = %rating.probability,
                blocked = rating.blocked,
                "safety rating"
            );
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
