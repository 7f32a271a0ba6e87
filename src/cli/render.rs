//! Text and JSON output for parse reports and derived tables.

use anyhow::Result;
use serde::Serialize;

use crate::metrics::VerdictSummary;
use crate::parser::ParseReport;
use crate::schema::{self, Formula};
use crate::types::{DerivedRow, TestType, Tolerance, Verdict};

/// Derived table for one test, as printed with `--json`.
#[derive(Debug, Serialize)]
pub struct DerivedOutput<'a> {
    pub test_type: TestType,
    pub tolerance: Tolerance,
    pub summary: VerdictSummary,
    pub rows: &'a [DerivedRow],
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_report(report: &ParseReport) {
    println!();
    println!("Parse Report");
    println!("============");
    println!("Rows scanned: {}", report.rows_scanned);
    println!(
        "Sections: {} recognized, {} skipped",
        report.recognized_sections(),
        report.unrecognized_sections.len()
    );
    println!("Fields: {}", report.fields.len());
    println!("Unmapped cells: {}", report.unmapped_cells);
    println!();

    if report.sections.is_empty() {
        println!("No sections found. Section titles must start with 'TEST:'.");
        println!();
        return;
    }

    println!("{:<6} {:<36} {:>7}", "ROW", "SECTION", "FIELDS");
    println!("{}", "-".repeat(51));
    for section in &report.sections {
        let name = match section.test_type {
            Some(test) => test.title().to_string(),
            None => format!("(skipped) {}", section.title),
        };
        println!(
            "{:<6} {:<36} {:>7}",
            section.start_row + 1,
            truncate(&name, 36),
            section.fields
        );
    }
    println!();
}

/// Column heading for a formula's primary metric.
fn primary_label(formula: &Formula) -> &'static str {
    match formula {
        Formula::Linearity { .. } => "X",
        Formula::Deviation { .. } => "DEV %",
        Formula::Consistency => "COV",
        Formula::Leakage { .. } => "DOSE mGy",
    }
}

pub fn print_derived(test: TestType, tolerance: Tolerance, rows: &[DerivedRow]) {
    let test_schema = schema::schema(test);
    let mut settings: Vec<&'static str> = Vec::new();
    for field in test_schema.fields {
        if field.role != schema::FieldRole::Measurement && !settings.contains(&field.id) {
            settings.push(field.id);
        }
    }

    println!();
    println!("{}", test.title());
    println!("{}", "=".repeat(test.title().len()));
    println!("Tolerance: {}", tolerance);
    println!();

    println!(
        "{:<4} {:<28} {:>10} {:>10} {:>10} {:<6}",
        "ROW",
        "SETTINGS",
        "AVERAGE",
        "PEAK",
        primary_label(&test_schema.formula),
        "REMARK"
    );
    println!("{}", "-".repeat(73));

    for derived in rows {
        let described: Vec<String> = settings
            .iter()
            .filter_map(|id| derived.row.get(id).map(|v| format!("{}={}", id, v)))
            .collect();
        println!(
            "{:<4} {:<28} {:>10} {:>10} {:>10} {:<6}",
            derived.row.row_index,
            truncate(&described.join(" "), 28),
            short(derived.average),
            short(derived.peak),
            short(derived.primary),
            derived.remark.to_string()
        );
    }

    if let Some(first) = rows.first() {
        println!();
        println!("Max: {}  Min: {}", first.x_max, first.x_min);
        if matches!(test_schema.formula, Formula::Linearity { .. }) {
            println!("Coefficient of linearity: {}", first.coefficient);
        }
    }

    let summary = VerdictSummary::from_rows(rows);
    let overall = match summary.overall() {
        Verdict::Unset => "incomplete".to_string(),
        v => v.to_string(),
    };
    println!(
        "Result: {} ({} pass, {} fail, {} without verdict)",
        overall, summary.passed, summary.failed, summary.unset
    );
}

fn short(metric: crate::types::Metric) -> String {
    match metric.value() {
        Some(v) => format!("{:.4}", v),
        None => "-".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
