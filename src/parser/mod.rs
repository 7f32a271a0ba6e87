//! Section parser.
//!
//! Walks a [`Grid`] once, top to bottom, and turns the horizontal tables and
//! label/value rows of each recognized `TEST: <title>` section into a flat
//! list of [`ParsedField`]s. Unknown sections and unmapped columns are
//! dropped and counted, unless strict parsing is requested.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::schema::{match_marker, FieldMapper, Marker};
use crate::types::{Grid, MeasurementRow, ParsedField, TestType};

/// Parsing switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Reject unknown sections and unmapped columns instead of dropping them.
    pub strict: bool,
}

/// Per-section summary for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionSummary {
    pub title: String,
    pub test_type: Option<TestType>,
    /// Zero-based grid row of the marker.
    pub start_row: usize,
    pub fields: usize,
}

/// Everything one parse produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParseReport {
    pub fields: Vec<ParsedField>,
    pub sections: Vec<SectionSummary>,
    pub unrecognized_sections: Vec<String>,
    pub unmapped_cells: usize,
    pub rows_scanned: usize,
}

impl ParseReport {
    pub fn recognized_sections(&self) -> usize {
        self.sections.iter().filter(|s| s.test_type.is_some()).count()
    }
}

#[derive(Debug)]
enum State {
    Seeking,
    /// Inside a section whose title was not recognized; rows are dropped.
    Skipping,
    NoHeader { test: TestType },
    WithHeader { test: TestType, header: Vec<String> },
}

/// Parse a grid with the global field mapper.
pub fn parse(grid: &Grid, options: ParseOptions) -> Result<ParseReport, ParseError> {
    SectionParser::new(FieldMapper::global(), options).run(grid)
}

struct SectionParser<'a> {
    mapper: &'a FieldMapper,
    options: ParseOptions,
    state: State,
    /// Row counters per test type; a repeated section continues its count.
    counters: HashMap<TestType, u32>,
    report: ParseReport,
}

impl<'a> SectionParser<'a> {
    fn new(mapper: &'a FieldMapper, options: ParseOptions) -> Self {
        Self {
            mapper,
            options,
            state: State::Seeking,
            counters: HashMap::new(),
            report: ParseReport::default(),
        }
    }

    fn run(mut self, grid: &Grid) -> Result<ParseReport, ParseError> {
        for (row_number, row) in grid.iter().enumerate() {
            self.report.rows_scanned += 1;
            self.step(row_number, row)?;
        }

        debug!(
            fields = self.report.fields.len(),
            sections = self.report.sections.len(),
            unrecognized = self.report.unrecognized_sections.len(),
            unmapped_cells = self.report.unmapped_cells,
            "Grid parsed"
        );

        Ok(self.report)
    }

    fn step(&mut self, row_number: usize, row: &[String]) -> Result<(), ParseError> {
        let first = row.first().map(String::as_str).unwrap_or_default();

        match match_marker(first) {
            Marker::Known(test) => {
                self.report.sections.push(SectionSummary {
                    title: first.to_string(),
                    test_type: Some(test),
                    start_row: row_number,
                    fields: 0,
                });
                self.state = State::NoHeader { test };
                return Ok(());
            }
            Marker::Unknown(title) => {
                if self.options.strict {
                    return Err(ParseError::SectionUnrecognized {
                        title,
                        row: row_number,
                    });
                }
                warn!(title = %title, row = row_number, "Unrecognized section, dropping its rows");
                self.report.sections.push(SectionSummary {
                    title: first.to_string(),
                    test_type: None,
                    start_row: row_number,
                    fields: 0,
                });
                self.report.unrecognized_sections.push(title);
                self.state = State::Skipping;
                return Ok(());
            }
            Marker::None => {}
        }

        let blank = row.iter().all(|c| c.is_empty());

        match std::mem::replace(&mut self.state, State::Seeking) {
            State::Seeking => {}
            State::Skipping => self.state = State::Skipping,
            State::NoHeader { test } => {
                self.state = State::NoHeader { test };
                if blank {
                    return Ok(());
                }
                if let Some(pairs) = self.label_value_pairs(test, row) {
                    let index = self.next_index(test);
                    for (field, value) in pairs {
                        self.emit(test, index, field, value);
                    }
                } else if self.is_header_row(test, row) {
                    self.state = State::WithHeader {
                        test,
                        header: row.to_vec(),
                    };
                } else {
                    debug!(test = %test, row = row_number, "Row outside any table, dropped");
                }
            }
            State::WithHeader { test, header } => {
                if blank {
                    self.state = State::NoHeader { test };
                    return Ok(());
                }
                let result = self.emit_data_row(test, &header, row_number, row);
                self.state = State::WithHeader { test, header };
                result?;
            }
        }

        Ok(())
    }

    fn next_index(&mut self, test: TestType) -> u32 {
        let counter = self.counters.entry(test).or_insert(0);
        *counter += 1;
        *counter
    }

    fn emit(&mut self, test: TestType, row_index: u32, field: &str, value: &str) {
        self.report.fields.push(ParsedField {
            test_name: test,
            row_index,
            field_name: field.to_string(),
            value: value.to_string(),
        });
        if let Some(section) = self.report.sections.last_mut() {
            section.fields += 1;
        }
    }

    /// Alternating label,value cells where every label resolves and no cell
    /// is a header. Returns the pairs with non-empty values.
    fn label_value_pairs<'r>(
        &self,
        test: TestType,
        row: &'r [String],
    ) -> Option<Vec<(&'static str, &'r str)>> {
        let end = row.iter().rposition(|c| !c.is_empty())? + 1;
        let cells = &row[..end];

        if cells
            .iter()
            .any(|c| self.mapper.resolve_header(test, c).is_some())
        {
            return None;
        }

        let mut pairs = Vec::new();
        for chunk in cells.chunks(2) {
            let field = self.mapper.resolve_label(test, &chunk[0])?;
            let value = chunk.get(1).map(String::as_str).unwrap_or_default();
            if !value.is_empty() {
                pairs.push((field, value));
            }
        }

        Some(pairs)
    }

    /// Two or more recognized headers, or one recognized header in a row with
    /// more than two non-empty cells.
    fn is_header_row(&self, test: TestType, row: &[String]) -> bool {
        let recognized = row
            .iter()
            .filter(|c| self.mapper.resolve_header(test, c).is_some())
            .count();
        let non_empty = row.iter().filter(|c| !c.is_empty()).count();

        recognized >= 2 || (recognized == 1 && non_empty > 2)
    }

    fn emit_data_row(
        &mut self,
        test: TestType,
        header: &[String],
        row_number: usize,
        row: &[String],
    ) -> Result<(), ParseError> {
        let index = self.next_index(test);

        for (position, cell) in row.iter().enumerate() {
            if cell.is_empty() {
                continue;
            }
            let label = header.get(position).map(String::as_str).unwrap_or_default();
            match self.mapper.resolve_header(test, label) {
                Some(field) => self.emit(test, index, field, cell),
                None => {
                    if self.options.strict {
                        return Err(ParseError::FieldUnmapped {
                            test: test.to_string(),
                            header: label.to_string(),
                            row: row_number,
                        });
                    }
                    self.report.unmapped_cells += 1;
                }
            }
        }

        Ok(())
    }
}

/// Group parsed fields into measurement rows, keyed by test and ordered by row index.
pub fn group_rows(fields: &[ParsedField]) -> BTreeMap<TestType, Vec<MeasurementRow>> {
    let mut grouped: BTreeMap<TestType, BTreeMap<u32, MeasurementRow>> = BTreeMap::new();

    for field in fields {
        grouped
            .entry(field.test_name)
            .or_default()
            .entry(field.row_index)
            .or_insert_with(|| MeasurementRow::new(field.test_name, field.row_index))
            .values
            .insert(field.field_name.clone(), field.value.clone());
    }

    grouped
        .into_iter()
        .map(|(test, rows)| (test, rows.into_values().collect()))
        .collect()
}
