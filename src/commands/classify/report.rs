use std::path::Path;

use anyhow::Result;
use tracing::info;

use crate::model::ClassificationResult;
use crate::util::write_json_pretty;

/// Writes the batch results as a pretty-printed JSON array, one element per
/// input document in processing order.
pub fn write_report(results: &[ClassificationResult], path: &Path) -> Result<()> {
    write_json_pretty(path, &results)?;
    info!(
        path = %path.display(),
        results = results.len(),
        "wrote classification report"
    );
    Ok(())
}
