use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::model::{BatchSummary, ClassificationResult};
use crate::registry::ExpectedFormRegistry;
use crate::util::{local_minute_string, now_utc_string, write_atomic};

use super::stats_parse::parse_stats_html;
use super::stats_render::render_stats_html;
use super::stats_rows::{StatsRow, summarize};

#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub prior_rows: usize,
    pub skipped_rows: usize,
    pub new_rows: usize,
    pub summary: BatchSummary,
}

/// Appends one row per result to the cumulative stats document at `path`.
pub fn merge_and_write(
    results: &[ClassificationResult],
    registry: &ExpectedFormRegistry,
    path: &Path,
) -> Result<MergeReport> {
    let recorded_at = local_minute_string();
    let new_rows = results
        .iter()
        .map(|result| StatsRow::from_result(result, registry, &recorded_at))
        .collect::<Vec<_>>();

    merge_rows(new_rows, path)
}

/// Invalid UTF-8 (a hand-edited file saved in a legacy code page) is replaced
/// with U+FFFD so the remaining rows can still be recovered.
fn decode_stats(bytes: Vec<u8>, path: &Path) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            warn!(
                path = %path.display(),
                valid_up_to = err.utf8_error().valid_up_to(),
                "stats file is not valid UTF-8; undecodable bytes replaced"
            );
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    }
}

/// Prior rows come first, in file order, followed by `new_rows`. A missing or
/// empty file contributes nothing; a file that exists but cannot be read
/// aborts the write so the history is never replaced.
pub fn merge_rows(new_rows: Vec<StatsRow>, path: &Path) -> Result<MergeReport> {
    let existing = match fs::read(path) {
        Ok(bytes) => decode_stats(bytes, path),
        Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read stats file {}", path.display()));
        }
    };

    let prior = if existing.trim().is_empty() {
        Default::default()
    } else {
        parse_stats_html(&existing)
            .with_context(|| format!("failed to parse stats file {}", path.display()))?
    };

    for skipped in &prior.skipped {
        warn!(path = %path.display(), "dropping {skipped}");
    }

    let prior_rows = prior.rows.len();
    let skipped_rows = prior.skipped.len();
    let new_count = new_rows.len();

    let mut rows = prior.rows;
    rows.extend(new_rows);
    let summary = summarize(&rows);

    let html = render_stats_html(&rows, &summary, &now_utc_string(), skipped_rows);
    write_atomic(path, html.as_bytes())
        .with_context(|| format!("failed to write stats file {}", path.display()))?;

    info!(
        path = %path.display(),
        prior_rows,
        skipped_rows,
        new_rows = new_count,
        total_rows = summary.total,
        "wrote classification stats"
    );

    Ok(MergeReport {
        prior_rows,
        skipped_rows,
        new_rows: new_count,
        summary,
    })
}
