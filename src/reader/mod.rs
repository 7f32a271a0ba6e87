//! Tabular file reader.
//!
//! Decodes delimited text or the first sheet of a spreadsheet workbook into
//! a [`Grid`] of trimmed string cells. No type inference happens here.

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;
use tracing::debug;

use crate::error::ReadError;
use crate::types::Grid;

pub mod fetch;

/// Decoding strategy chosen from a file name, extension or MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Delimited(u8),
    Workbook,
}

impl FileFormat {
    /// Pick a format from a hint such as `"sheet.xlsx"`, `"csv"` or `"text/csv"`.
    pub fn from_hint(hint: &str) -> Result<Self, ReadError> {
        let hint = hint.trim().to_lowercase();

        // MIME types may carry parameters ("text/csv; charset=utf-8")
        if hint.contains('/') {
            let mime = hint.split(';').next().unwrap_or_default().trim();
            return match mime {
                "text/csv" | "application/csv" | "text/plain" => Ok(FileFormat::Delimited(b',')),
                "text/tab-separated-values" => Ok(FileFormat::Delimited(b'\t')),
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
                | "application/vnd.ms-excel"
                | "application/vnd.ms-excel.sheet.macroenabled.12"
                | "application/vnd.ms-excel.sheet.binary.macroenabled.12"
                | "application/vnd.oasis.opendocument.spreadsheet" => Ok(FileFormat::Workbook),
                _ => Err(ReadError::UnsupportedFormat(mime.to_string())),
            };
        }

        let extension = hint.rsplit('.').next().unwrap_or_default();
        match extension {
            "csv" | "txt" => Ok(FileFormat::Delimited(b',')),
            "tsv" | "tab" => Ok(FileFormat::Delimited(b'\t')),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(FileFormat::Workbook),
            _ => Err(ReadError::UnsupportedFormat(hint.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FileFormat::Delimited(b'\t') => "tsv",
            FileFormat::Delimited(_) => "csv",
            FileFormat::Workbook => "workbook",
        }
    }
}

/// Decode file bytes with an already chosen format.
pub fn read_as(bytes: &[u8], format: FileFormat) -> Result<Grid, ReadError> {
    let grid = match format {
        FileFormat::Delimited(delimiter) => read_delimited(bytes, delimiter)?,
        FileFormat::Workbook => read_workbook(bytes)?,
    };

    debug!(format = format.name(), rows = grid.len(), "Grid decoded");
    Ok(grid)
}

/// Split lines on the delimiter, trimming every cell. Quotes are literal.
fn read_delimited(bytes: &[u8], delimiter: u8) -> Result<Grid, ReadError> {
    let text = String::from_utf8_lossy(bytes);

    // The csv reader skips empty lines; keep them as blank rows so they
    // still reset header state in the parser.
    let separator = char::from(delimiter);
    let normalized: String = text
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                separator.to_string()
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(normalized.as_bytes());

    let mut grid = Vec::new();
    for record in reader.byte_records() {
        let record = record?;
        grid.push(
            record
                .iter()
                .map(|cell| String::from_utf8_lossy(cell).trim().to_string())
                .collect(),
        );
    }

    Ok(grid)
}

/// Read the first sheet of a workbook held in memory.
fn read_workbook(bytes: &[u8]) -> Result<Grid, ReadError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;

    let first = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(ReadError::EmptyWorkbook)?;
    let range = workbook.worksheet_range(&first)?;

    let grid = range
        .rows()
        .map(|row| {
            let mut cells: Vec<String> = row.iter().map(cell_to_string).collect();
            // Ranges are rectangular; drop the padding calamine adds to short rows
            while cells.last().is_some_and(|c| c.is_empty()) {
                cells.pop();
            }
            cells
        })
        .collect();

    Ok(grid)
}

fn cell_to_string(cell: &Data) -> String {
    let text = match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    text.trim().to_string()
}
