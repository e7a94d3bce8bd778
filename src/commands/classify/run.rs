use anyhow::{Context, Result, bail};
use tracing::{error, info, warn};

use crate::cli::ClassifyArgs;
use crate::registry::ExpectedFormRegistry;
use crate::service::{Classifier, GeminiClassifier};

use super::{
    BatchOutcome, MergeReport, classify_documents, discover_pdfs, merge_and_write, write_report,
};

pub fn run(args: ClassifyArgs) -> Result<()> {
    let registry = ExpectedFormRegistry::from_path(&args.config)
        .with_context(|| format!("failed to load form config {}", args.config.display()))?;
    if registry.is_empty() {
        warn!(
            config = %args.config.display(),
            "form config is empty; no document can be verified"
        );
    }

    let Some(api_key) = args
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
    else {
        bail!("missing API key: pass --api-key or set GEMINI_API_KEY");
    };

    let classifier = GeminiClassifier::new(
        api_key,
        args.endpoint.clone(),
        args.model.clone(),
        args.generation_params(),
    );

    execute(&args, &registry, &classifier)?;
    Ok(())
}

/// Runs one batch over `args.folder` and writes both artifacts.
pub fn execute(
    args: &ClassifyArgs,
    registry: &ExpectedFormRegistry,
    classifier: &dyn Classifier,
) -> Result<(BatchOutcome, MergeReport)> {
    let pdfs = discover_pdfs(&args.folder)
        .with_context(|| format!("failed to list documents in {}", args.folder.display()))?;
    info!(
        folder = %args.folder.display(),
        documents = pdfs.len(),
        configured_forms = registry.len(),
        "starting classification batch"
    );
    if pdfs.is_empty() {
        warn!(folder = %args.folder.display(), "no PDF documents found");
    }

    let outcome = classify_documents(&pdfs, classifier, registry);

    let tally = &outcome.tally;
    info!(
        total = tally.total,
        succeeded = tally.succeeded,
        verified = tally.verified,
        unverified = tally.succeeded - tally.verified,
        failed = tally.failed,
        content_filter = tally.failures_by_kind.get("content_filter").copied().unwrap_or(0),
        total_tokens = tally.total_tokens,
        elapsed_ms = tally.elapsed.as_millis() as u64,
        "classification batch complete"
    );
    for (kind, count) in &tally.failures_by_kind {
        info!(kind = *kind, count = *count, "failures by kind");
    }

    // Both artifacts are attempted; the first failure is returned.
    let report = write_report(&outcome.results, &args.output)
        .with_context(|| format!("failed to write report {}", args.output.display()));
    let merge = merge_and_write(&outcome.results, registry, &args.stats)
        .with_context(|| format!("failed to update stats {}", args.stats.display()));
    let merge = match (report, merge) {
        (Ok(()), Ok(merge)) => merge,
        (Err(report_err), Ok(merge)) => {
            info!(rows = merge.summary.total, "stats updated despite report failure");
            return Err(report_err);
        }
        (Err(report_err), Err(merge_err)) => {
            error!("{merge_err:#}");
            return Err(report_err);
        }
        (Ok(()), Err(merge_err)) => return Err(merge_err),
    };

    info!(
        prior_rows = merge.prior_rows,
        skipped_rows = merge.skipped_rows,
        new_rows = merge.new_rows,
        rows = merge.summary.total,
        verified = merge.summary.verified,
        failed = merge.summary.failed,
        errors = merge.summary.errors,
        average_confidence = ?merge.summary.average_confidence,
        total_tokens = merge.summary.total_tokens,
        "cumulative statistics"
    );

    Ok((outcome, merge))
}
