use crate::cell::{Cell, RawTable};
use crate::error::{ReportError, Result};
use crate::field::{COLUMN_MAPPING, Field};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

lazy_static! {
    /// Placeholder names spreadsheet tools give to blank header cells.
    static ref UNNAMED_REGEX: Regex = Regex::new(r"^Unnamed(:\s*\d+(_level_\d+)?)?$").unwrap();
}

/// Source rows projected onto the canonical columns.
///
/// `rows[i][j]` holds the raw cell for `fields[j]`. Fields missing from the
/// source are absent from `fields`; nothing is defaulted here.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedTable {
    pub fields: Vec<Field>,
    pub rows: Vec<Vec<Cell>>,
}

impl NormalizedTable {
    pub fn position(&self, field: Field) -> Option<usize> {
        self.fields.iter().position(|f| *f == field)
    }
}

pub fn is_placeholder(name: &str) -> bool {
    name.is_empty() || UNNAMED_REGEX.is_match(name)
}

/// Column names of a header after trimming, without blank or placeholder
/// names.
pub fn detected_columns(header: &[String]) -> Vec<String> {
    header
        .iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !is_placeholder(name))
        .collect()
}

/// Map a headed table onto the canonical fields
///
/// Header names are trimmed and placeholder columns dropped. Only columns
/// listed in [`COLUMN_MAPPING`] survive, in mapping order; a repeated
/// source name resolves to its first occurrence. Rows with no content are
/// discarded.
///
/// # Errors
/// * `NoMappableColumns` - none of the mapped source names is present; the
///   error lists the detected names
pub fn normalize(table: &RawTable) -> Result<NormalizedTable> {
    let header = table.header.as_deref().unwrap_or_default();
    let names: Vec<String> = header.iter().map(|name| name.trim().to_string()).collect();

    let mut fields = Vec::new();
    let mut positions = Vec::new();
    for (source, field) in COLUMN_MAPPING.iter() {
        if let Some(pos) = names
            .iter()
            .position(|name| !is_placeholder(name) && name == source)
        {
            fields.push(*field);
            positions.push(pos);
        }
    }

    if fields.is_empty() {
        return Err(ReportError::NoMappableColumns {
            detected: detected_columns(header),
        });
    }

    let rows: Vec<Vec<Cell>> = table
        .rows
        .iter()
        .map(|row| {
            positions
                .iter()
                .map(|&pos| row.get(pos).cloned().unwrap_or_default())
                .collect::<Vec<Cell>>()
        })
        .filter(|row| !row.iter().all(Cell::is_empty))
        .collect();

    debug!("Mapped columns {:?} over {} rows", fields, rows.len());
    Ok(NormalizedTable { fields, rows })
}
