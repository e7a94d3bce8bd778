use anyhow::{Result, anyhow};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use super::stats_rows::{StatsColumn, StatsRow, parse_verified};

pub const STATS_TABLE_CLASS: &str = "classification-stats";

/// A data row that could not be recovered from an existing stats file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stats row {row_index}: {reason}")]
pub struct RowParseError {
    pub row_index: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct StatsParse {
    pub rows: Vec<StatsRow>,
    pub skipped: Vec<RowParseError>,
}

struct Selectors {
    stats_table: Selector,
    any_table: Selector,
    header_cell: Selector,
    row: Selector,
    data_cell: Selector,
    cell: Selector,
}

impl Selectors {
    fn new() -> Result<Self> {
        Ok(Self {
            stats_table: selector(&format!("table.{STATS_TABLE_CLASS}"))?,
            any_table: selector("table")?,
            header_cell: selector("thead th")?,
            row: selector("tr")?,
            data_cell: selector("td")?,
            cell: selector("th, td")?,
        })
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|err| anyhow!("invalid selector `{css}`: {err:?}"))
}

/// Recovers rows from a previously written stats document.
///
/// Parsing is tolerant of reformatted markup: columns are located by the
/// `data-field` attribute when present and by the header label otherwise.
/// Rows missing a file name or a readable success value are reported in
/// `skipped` instead of failing the parse.
pub fn parse_stats_html(html: &str) -> Result<StatsParse> {
    let selectors = Selectors::new()?;
    let document = Html::parse_document(html);

    let table = document
        .select(&selectors.stats_table)
        .next()
        .or_else(|| document.select(&selectors.any_table).next());
    let Some(table) = table else {
        return Ok(StatsParse::default());
    };

    let mut header = table
        .select(&selectors.header_cell)
        .map(|cell| StatsColumn::from_label(&cell_text(cell)))
        .collect::<Vec<_>>();

    let mut parse = StatsParse::default();
    let mut row_index = 0;
    for row in table.select(&selectors.row) {
        if row.select(&selectors.data_cell).next().is_none() {
            // Header-only rows outside <thead> still name the columns.
            if header.is_empty() {
                header = row
                    .select(&selectors.cell)
                    .map(|cell| StatsColumn::from_label(&cell_text(cell)))
                    .collect();
            }
            continue;
        }

        row_index += 1;
        match parse_row(row, &selectors, &header, row_index) {
            Ok(parsed) => parse.rows.push(parsed),
            Err(err) => parse.skipped.push(err),
        }
    }

    Ok(parse)
}

fn parse_row(
    row: ElementRef<'_>,
    selectors: &Selectors,
    header: &[Option<StatsColumn>],
    row_index: usize,
) -> Result<StatsRow, RowParseError> {
    let mut parsed = StatsRow::default();
    let mut verified = None;
    let mut saw_verified = false;

    for (position, cell) in row.select(&selectors.cell).enumerate() {
        // Cells tagged with `data-field` hold exactly the rendered value;
        // header-mapped cells may have been reflowed by a prettifier.
        let tagged = cell
            .value()
            .attr("data-field")
            .and_then(StatsColumn::from_key);
        let (column, text) = match tagged {
            Some(column) => (column, cell.text().collect::<String>()),
            None => match header.get(position).copied().flatten() {
                Some(column) => (column, cell_text(cell)),
                None => continue,
            },
        };

        if column == StatsColumn::Verified {
            saw_verified = true;
            verified = parse_verified(&text);
        } else {
            parsed.set_cell(column, &text);
        }
    }

    let fail = |reason: String| RowParseError { row_index, reason };
    if parsed.filename.is_empty() {
        return Err(fail("missing file name".to_string()));
    }
    if !saw_verified {
        return Err(fail(format!("{}: missing success column", parsed.filename)));
    }
    let Some(verified) = verified else {
        return Err(fail(format!("{}: unreadable success value", parsed.filename)));
    };
    parsed.verified = verified;

    Ok(parsed)
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
