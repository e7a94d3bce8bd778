use crate::model::BatchSummary;

use super::stats_parse::STATS_TABLE_CLASS;
use super::stats_rows::{StatsColumn, StatsRow};

const STYLE: &str = r#"body { font-family: Arial, sans-serif; margin: 20px; }
h1 { color: #333; border-bottom: 2px solid #007acc; padding-bottom: 10px; }
table { border-collapse: collapse; width: 100%; margin-top: 20px; }
th, td { border: 1px solid #ddd; padding: 8px; text-align: left; vertical-align: top; }
th { background-color: #f2f2f2; font-weight: bold; }
tr:nth-child(even) { background-color: #f9f9f9; }
tr:hover { background-color: #f0f8ff; }
.text-cell { max-width: 200px; word-wrap: break-word; }
.success-yes { background-color: #d4edda; color: #155724; }
.success-no { background-color: #f8d7da; color: #721c24; }
.confidence-high { background-color: #d1ecf1; }
.confidence-medium { background-color: #fff3cd; }
.confidence-low { background-color: #f8d7da; }
.timestamp { color: #666; font-size: 0.9em; }
.stats-summary { background-color: #e7f3ff; padding: 15px; border-radius: 5px; margin: 20px 0; }
.stats-note { color: #856404; }
"#;

fn html_escape(value: &str) -> String {
    v_htmlescape::escape(value).to_string()
}

/// Renders the full statistics document. `skipped_rows` is the number of
/// prior rows that could not be recovered and are absent from `rows`.
pub fn render_stats_html(
    rows: &[StatsRow],
    summary: &BatchSummary,
    generated_at: &str,
    skipped_rows: usize,
) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<title>Form Classification Statistics</title>\n");
    html.push_str(&format!("<style>\n{STYLE}</style>\n</head>\n<body>\n"));
    html.push_str("<h1>Form Classification Statistics</h1>\n");
    html.push_str(&format!(
        "<div class=\"timestamp\">Generated: {}</div>\n",
        html_escape(generated_at)
    ));

    html.push_str(&render_summary(summary));
    if skipped_rows > 0 {
        html.push_str(&format!(
            "<p class=\"stats-note\">{skipped_rows} unreadable row(s) from an earlier run were dropped.</p>\n"
        ));
    }

    html.push_str(&format!(
        "<table class=\"{STATS_TABLE_CLASS}\">\n<thead>\n<tr>"
    ));
    for column in StatsColumn::ALL {
        html.push_str(&format!(
            "<th data-field=\"{}\">{}</th>",
            column.key(),
            html_escape(column.label())
        ));
    }
    html.push_str("</tr>\n</thead>\n<tbody>\n");

    for row in rows {
        html.push_str("<tr>");
        for column in StatsColumn::ALL {
            html.push_str(&render_cell(row, column));
        }
        html.push_str("</tr>\n");
    }

    html.push_str("</tbody>\n</table>\n</body>\n</html>\n");
    html
}

fn render_summary(summary: &BatchSummary) -> String {
    let average_confidence = summary
        .average_confidence
        .map(|value| format!("{value:.1}"))
        .unwrap_or_else(|| "n/a".to_string());
    let average_tokens = summary
        .average_tokens
        .map(|value| format!("{value:.0}"))
        .unwrap_or_else(|| "n/a".to_string());

    format!(
        "<div class=\"stats-summary\">\n\
         <strong>Summary:</strong> {} total classifications |\n\
         <strong>Verified:</strong> {} |\n\
         <strong>Failed:</strong> {} |\n\
         <strong>Errors:</strong> {} |\n\
         <strong>Average confidence:</strong> {} |\n\
         <strong>Average tokens:</strong> {} |\n\
         <strong>Total tokens:</strong> {}\n\
         </div>\n",
        summary.total,
        summary.verified,
        summary.failed,
        summary.errors,
        average_confidence,
        average_tokens,
        summary.total_tokens
    )
}

fn render_cell(row: &StatsRow, column: StatsColumn) -> String {
    let text = html_escape(&row.cell_text(column));
    let key = column.key();

    match column {
        StatsColumn::FormNumberConfidence
        | StatsColumn::TitleConfidence
        | StatsColumn::PagesConfidence
        | StatsColumn::Confidence => {
            let value = match column {
                StatsColumn::FormNumberConfidence => row.form_number_confidence,
                StatsColumn::TitleConfidence => row.title_confidence,
                StatsColumn::PagesConfidence => row.page_count_confidence,
                _ => row.confidence,
            };
            format!(
                "<td data-field=\"{key}\" class=\"{}\">{text}</td>",
                confidence_class(value)
            )
        }
        StatsColumn::Title | StatsColumn::ExpectedTitle | StatsColumn::Error => {
            format!("<td data-field=\"{key}\" class=\"text-cell\" dir=\"auto\">{text}</td>")
        }
        StatsColumn::Verified => {
            let class = if row.verified { "success-yes" } else { "success-no" };
            format!("<td data-field=\"{key}\" class=\"{class}\"><strong>{text}</strong></td>")
        }
        _ => format!("<td data-field=\"{key}\">{text}</td>"),
    }
}

fn confidence_class(value: Option<u8>) -> &'static str {
    match value {
        Some(value) if value >= 80 => "confidence-high",
        Some(value) if value >= 50 => "confidence-medium",
        _ => "confidence-low",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::classify::stats_parse::parse_stats_html;

    fn row(filename: &str, title: &str, verified: bool) -> StatsRow {
        StatsRow {
            filename: filename.to_string(),
            recorded_at: Some("2026-10-17 09:30".to_string()),
            form_number: Some("1344".to_string()),
            form_title: Some(title.to_string()),
            confidence: Some(85),
            title_confidence: Some(55),
            input_tokens: Some(1200),
            output_tokens: Some(300),
            verified,
            ..StatsRow::default()
        }
    }

    #[test]
    fn markup_in_values_is_escaped() {
        let rows = vec![row("<script>.pdf", "a & b <i>", false)];
        let html = render_stats_html(&rows, &BatchSummary::default(), "now", 0);

        assert!(!html.contains("<script>.pdf"));
        assert!(html.contains("&lt;script&gt;.pdf"));
        assert!(html.contains("a &amp; b &lt;i&gt;"));
    }

    #[test]
    fn rendered_rows_parse_back() {
        let rows = vec![
            row("a.pdf", "בקשה להחזר מס", true),
            row("b.pdf", "Summary \"draft\"", false),
        ];
        let html = render_stats_html(&rows, &BatchSummary::default(), "now", 0);
        let parsed = parse_stats_html(&html).unwrap();

        assert!(parsed.skipped.is_empty());
        assert_eq!(parsed.rows, rows);
    }

    #[test]
    fn inner_whitespace_survives_a_round_trip() {
        let mut multiline = row("a.pdf", "Annual  Report\nPart 2", false);
        multiline.error = Some("api: HTTP 500  upstream\nretry later".to_string());
        let rows = vec![multiline];
        let html = render_stats_html(&rows, &BatchSummary::default(), "now", 0);
        let parsed = parse_stats_html(&html).unwrap();

        assert_eq!(parsed.rows, rows);
    }

    #[test]
    fn confidence_and_success_classes() {
        let html = render_stats_html(&[row("a.pdf", "t", true)], &BatchSummary::default(), "now", 0);

        assert!(html.contains("<td data-field=\"confidence\" class=\"confidence-high\">85</td>"));
        assert!(html.contains("<td data-field=\"title_confidence\" class=\"confidence-medium\">55</td>"));
        assert!(html.contains("<td data-field=\"page_count_confidence\" class=\"confidence-low\"></td>"));
        assert!(html.contains("class=\"success-yes\"><strong>Yes</strong>"));
    }

    #[test]
    fn summary_and_dropped_rows_note() {
        let summary = BatchSummary {
            total: 3,
            verified: 1,
            failed: 2,
            errors: 1,
            average_confidence: Some(72.5),
            average_tokens: None,
            total_tokens: 0,
        };
        let html = render_stats_html(&[], &summary, "now", 2);

        assert!(html.contains("<strong>Summary:</strong> 3 total classifications"));
        assert!(html.contains("<strong>Average confidence:</strong> 72.5"));
        assert!(html.contains("<strong>Average tokens:</strong> n/a"));
        assert!(html.contains("2 unreadable row(s)"));
    }
}
