//! Schema command - show the built-in test schemas.

use anyhow::Result;

use crate::cli::SchemaAction;
use crate::schema::{self, FieldMapper, FieldRole, Formula, Normalizer};
use crate::types::TestType;

/// Run the schema command.
pub async fn run(action: SchemaAction) -> Result<()> {
    match action {
        SchemaAction::List => {
            println!();
            println!("{:<34} {:<10} MARKERS", "TEST", "TOLERANCE");
            println!("{}", "-".repeat(80));
            for test in TestType::ALL {
                let s = schema::schema(test);
                println!(
                    "{:<34} {:<10} {}",
                    test.slug(),
                    s.default_tolerance.to_string(),
                    s.markers.join(" | ")
                );
            }
            println!();
        }
        SchemaAction::Show { test } => show(test),
        SchemaAction::Resolve { test, text } => {
            match FieldMapper::global().resolve(test, text.trim()) {
                Some(field) => println!("{} -> {}", text.trim(), field),
                None => anyhow::bail!("'{}' does not map to a {} field", text.trim(), test.slug()),
            }
        }
    }

    Ok(())
}

fn describe_formula(formula: &Formula) -> String {
    match formula {
        Formula::Linearity { normalizer } => {
            let divisor = match normalizer {
                Normalizer::Field(f) => f.to_string(),
                Normalizer::TotalOrProduct {
                    total,
                    factors: (a, b),
                } => format!("{} (or {} x {})", total, a, b),
            };
            format!(
                "X = average / {}; CoL = (Xmax - Xmin) / (Xmax + Xmin)",
                divisor
            )
        }
        Formula::Deviation { reference } => {
            format!("deviation % = (average - {0}) / {0} x 100", reference)
        }
        Formula::Consistency => "CoV = sample std dev / mean of readings".to_string(),
        Formula::Leakage {
            workload,
            reference_current,
            ..
        } => format!(
            "dose mGy = ({} x peak mR/h) / (60 x {}) / 114",
            workload, reference_current
        ),
    }
}

fn show(test: TestType) {
    let s = schema::schema(test);

    println!();
    println!("{}", test.title());
    println!("{}", "=".repeat(test.title().len()));
    println!("Slug: {}", test.slug());
    println!("Markers: {}", s.markers.join(" | "));
    println!("Formula: {}", describe_formula(&s.formula));
    println!("Default tolerance: {}", s.default_tolerance);
    if s.formula.has_fixed_operator() {
        println!("  (operator fixed to <=)");
    }
    println!();

    println!("{:<14} {:<12} HEADERS / LABELS", "FIELD", "ROLE");
    println!("{}", "-".repeat(80));
    for field in s.fields {
        let role = match field.role {
            FieldRole::Setting => "setting",
            FieldRole::Measurement => "measurement",
            FieldRole::Descriptor => "descriptor",
        };
        let mut names: Vec<String> = field.headers.iter().map(|h| format!("\"{}\"", h)).collect();
        names.extend(field.labels.iter().map(|l| format!("\"{}\" (label)", l)));
        println!("{:<14} {:<12} {}", field.id, role, names.join(", "));
    }
    println!();
}
