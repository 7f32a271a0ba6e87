//! Per-test field schemas, section markers and the field mapper.
//!
//! Every test type owns one static [`TestSchema`]. Header and label strings
//! are matched case-sensitively and exactly; the only normalization is the
//! trim applied by the reader. The lookup tables are built once and shared
//! read-only by every parse.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::types::{TestType, Tolerance};

mod tables;

pub use tables::SCHEMAS;

/// How a field takes part in derived metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    /// Fixed or swept machine setting (kV, mA, time).
    Setting,
    /// A recorded reading averaged by the calculator.
    Measurement,
    /// Free text carried along (location, unit).
    Descriptor,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub id: &'static str,
    pub role: FieldRole,
    /// Column headers in horizontal tables.
    pub headers: &'static [&'static str],
    /// Labels in label/value rows.
    pub labels: &'static [&'static str],
}

/// Divisor applied to the row average to obtain X.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalizer {
    Field(&'static str),
    /// A stated total such as mAs, else the product of its factors.
    TotalOrProduct {
        total: &'static str,
        factors: (&'static str, &'static str),
    },
}

/// Formula family used by the calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formula {
    /// Coefficient of linearity over X = average / normalizer.
    Linearity { normalizer: Normalizer },
    /// Percent deviation of the average from a set value.
    Deviation { reference: &'static str },
    /// Coefficient of variation of the readings in a row.
    Consistency,
    /// Leakage dose from workload, peak reading and reference current.
    Leakage {
        workload: &'static str,
        reference_current: &'static str,
        unit: &'static str,
    },
}

impl Formula {
    /// Linearity tests always use an inclusive `<=` comparison.
    pub fn has_fixed_operator(&self) -> bool {
        matches!(self, Formula::Linearity { .. })
    }
}

#[derive(Debug)]
pub struct TestSchema {
    pub test_type: TestType,
    /// Upper-case title prefixes that introduce this test's section.
    pub markers: &'static [&'static str],
    pub fields: &'static [FieldSpec],
    pub formula: Formula,
    pub default_tolerance: Tolerance,
}

impl TestSchema {
    /// Canonical ids of the measurement fields, deduplicated, in schema order.
    pub fn measurement_fields(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = Vec::new();
        for field in self.fields {
            if field.role == FieldRole::Measurement && !ids.contains(&field.id) {
                ids.push(field.id);
            }
        }
        ids
    }
}

/// Look up the schema for a test type.
pub fn schema(test_type: TestType) -> &'static TestSchema {
    // SCHEMAS is laid out in declaration order of TestType.
    &SCHEMAS[test_type as usize]
}

/// Read-only lookup from display strings to canonical field ids.
pub struct FieldMapper {
    headers: HashMap<TestType, HashMap<&'static str, &'static str>>,
    labels: HashMap<TestType, HashMap<&'static str, &'static str>>,
}

impl FieldMapper {
    /// The process-wide mapper built from [`SCHEMAS`].
    pub fn global() -> &'static FieldMapper {
        static MAPPER: OnceLock<FieldMapper> = OnceLock::new();
        MAPPER.get_or_init(|| FieldMapper::from_schemas(&SCHEMAS))
    }

    fn from_schemas(schemas: &[TestSchema]) -> Self {
        let mut headers = HashMap::new();
        let mut labels = HashMap::new();

        for schema in schemas {
            let header_map: &mut HashMap<&'static str, &'static str> =
                headers.entry(schema.test_type).or_default();
            for field in schema.fields {
                for header in field.headers {
                    header_map.insert(*header, field.id);
                }
            }

            let label_map: &mut HashMap<&'static str, &'static str> =
                labels.entry(schema.test_type).or_default();
            for field in schema.fields {
                for label in field.labels {
                    label_map.insert(*label, field.id);
                }
            }
        }

        Self { headers, labels }
    }

    /// Resolve header or label text to a field id. Headers win.
    pub fn resolve(&self, test_type: TestType, text: &str) -> Option<&'static str> {
        self.resolve_header(test_type, text)
            .or_else(|| self.resolve_label(test_type, text))
    }

    /// Resolve a column header.
    pub fn resolve_header(&self, test_type: TestType, text: &str) -> Option<&'static str> {
        self.headers.get(&test_type)?.get(text).copied()
    }

    /// Resolve the label half of a label/value pair.
    pub fn resolve_label(&self, test_type: TestType, text: &str) -> Option<&'static str> {
        self.labels.get(&test_type)?.get(text).copied()
    }
}

/// Outcome of checking a row's first cell for a section marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// Not a marker row.
    None,
    /// A marker whose title matched a known test.
    Known(TestType),
    /// A marker with an unrecognized title.
    Unknown(String),
}

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^TEST\s*:\s*(.*)$").unwrap())
}

/// Marker prefixes sorted longest first so specific titles win.
fn marker_table() -> &'static [(&'static str, TestType)] {
    static TABLE: OnceLock<Vec<(&'static str, TestType)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table: Vec<_> = SCHEMAS
            .iter()
            .flat_map(|s| s.markers.iter().map(move |m| (*m, s.test_type)))
            .collect();
        table.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        table
    })
}

/// Classify a cell as a section marker.
pub fn match_marker(cell: &str) -> Marker {
    let Some(caps) = marker_pattern().captures(cell.trim()) else {
        return Marker::None;
    };

    let title = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
    let upper = title.to_uppercase();

    marker_table()
        .iter()
        .find(|(prefix, _)| upper.starts_with(prefix))
        .map(|(_, test_type)| Marker::Known(*test_type))
        .unwrap_or_else(|| Marker::Unknown(title.to_string()))
}
