use std::fmt::Write;

use crate::models::{AlertKind, Breach, DatasetSummary, EvaluationReport, IngestReport};

/// Telegram HTML body for one breach.
pub fn alert_message(breach: &Breach) -> String {
    let (title, metric) = match breach.kind {
        AlertKind::Actual => ("ACTUAL OCCUPANCY ALERT", "Total occupancy"),
        AlertKind::Predicted => ("PREDICTED OCCUPANCY ALERT", "Projected occupancy"),
    };

    let mut output = String::new();
    let _ = writeln!(output, "<b>{} - {}%</b>", title, breach.threshold);
    let _ = writeln!(output, "Hospital: {}", escape_html(&breach.hospital));
    let _ = writeln!(output, "Date: {}", breach.date.format("%Y-%m-%d"));
    let _ = write!(output, "{}: {:.2}%", metric, breach.ratio);
    output
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn dataset_line(output: &mut String, name: &str, summary: &DatasetSummary) {
    let _ = writeln!(
        output,
        "- {}: {} rows, {} breaches ({} outside window, {} bad date, {} malformed, {} zero capacity)",
        name,
        summary.rows,
        summary.breaches,
        summary.outside_window,
        summary.invalid_date,
        summary.malformed,
        summary.zero_capacity
    );
}

pub fn evaluation_summary(report: &EvaluationReport) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "{} alerts processed ({} sent, {} failed).",
        report.events.len(),
        report.sent(),
        report.failed()
    );
    dataset_line(&mut output, "actual", &report.actual);
    dataset_line(&mut output, "predicted", &report.predicted);
    output
}

pub fn ingest_summary(report: &IngestReport) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Published to '{}':", report.document);

    if report.sheets.is_empty() {
        let _ = writeln!(output, "No sheets published.");
    } else {
        for sheet in report.sheets.iter() {
            let _ = writeln!(
                output,
                "- {} -> {} ({} rows)",
                sheet.file_name, sheet.sheet_name, sheet.rows
            );
        }
    }

    output
}
