use crate::aggregate::aggregate;
use crate::cell::{Cell, RawTable};
use crate::coerce::coerce_records;
use crate::error::Result;
use crate::header::{
    DEFAULT_KEYWORDS, DEFAULT_MIN_MATCHES, DEFAULT_SCAN_ROWS, HeaderLocator, HeaderMode,
    resolve_header,
};
use crate::loader::{default_encodings, load_table};
use crate::normalizer::normalize;
use crate::report::{Provenance, Report, assemble};
use log::info;
use serde::Serialize;

/// Settings shared by the header preview and the full pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub header_mode: HeaderMode,
    pub scan_rows: usize,
    pub min_matches: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            header_mode: HeaderMode::Auto,
            scan_rows: DEFAULT_SCAN_ROWS,
            min_matches: DEFAULT_MIN_MATCHES,
        }
    }
}

impl PipelineConfig {
    pub fn locator(&self) -> HeaderLocator {
        HeaderLocator::new(DEFAULT_KEYWORDS, self.scan_rows, self.min_matches)
    }

    pub fn with_header_mode(&self, header_mode: HeaderMode) -> Self {
        PipelineConfig {
            header_mode,
            ..self.clone()
        }
    }
}

/// What the header resolver picked, for display before processing.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HeaderPreview {
    pub index: usize,
    /// 1-based spreadsheet row number, or file line for delimited text.
    pub row_number: usize,
    pub cells: Vec<String>,
    pub matched: Vec<String>,
    /// The first rows of the file, as scanned by the locator.
    pub scanned: Vec<String>,
}

/// Locate the header of an upload without processing it.
pub fn preview_header(bytes: &[u8], file_name: &str, config: &PipelineConfig) -> Result<HeaderPreview> {
    let table = load_table(bytes, file_name, &default_encodings())?;
    let found = resolve_header(&table, config.header_mode, &config.locator())?;

    let cells = table.rows[found.index].iter().map(Cell::to_text).collect();
    let scanned = (0..table.rows.len().min(config.scan_rows))
        .map(|i| table.describe_row(i))
        .collect();

    Ok(HeaderPreview {
        index: found.index,
        row_number: found.index + 1,
        cells,
        matched: found.matched,
        scanned,
    })
}

/// Run the whole pipeline on an uploaded file
///
/// Load, locate the header, normalize, coerce, aggregate and assemble. Any
/// failure aborts the upload; there is no partial result.
///
/// # Arguments
/// * `bytes` - File content
/// * `file_name` - Original file name, used to pick the format
/// * `config` - Header settings
///
/// # Returns
/// * `Result<Report>` - The assembled report or the reason the upload failed
pub fn process_upload(bytes: &[u8], file_name: &str, config: &PipelineConfig) -> Result<Report> {
    let table = load_table(bytes, file_name, &default_encodings())?;
    process_table(table, file_name, config)
}

/// Run the pipeline on rows already loaded.
pub fn process_table(table: RawTable, file_name: &str, config: &PipelineConfig) -> Result<Report> {
    let found = resolve_header(&table, config.header_mode, &config.locator())?;
    let headed = table.with_header_at(found.index);

    let normalized = normalize(&headed)?;
    let records = coerce_records(&normalized);
    let aggregation = aggregate(&records);

    info!(
        "{}: header at row {}, {} data rows -> {} groups ({} skipped)",
        file_name,
        found.index + 1,
        records.len(),
        aggregation.records.len(),
        aggregation.skipped
    );

    let provenance = Provenance {
        file_name: file_name.to_string(),
        header_index: found.index,
        source_rows: records.len(),
        skipped_rows: 0,
    };
    Ok(assemble(aggregation, &normalized.fields, provenance))
}
