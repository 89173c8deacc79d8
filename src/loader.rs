use crate::cell::{Cell, RawTable};
use crate::error::{ReportError, Result};
use calamine::{Data, Ods, Range, Reader, Xls, Xlsb, Xlsx, open_workbook_from_rs};
use encoding_rs::{EUC_KR, Encoding, UTF_8};
use log::{debug, info};
use std::borrow::Cow;
use std::io::Cursor;
use std::path::Path;

type Buffer = Cursor<Vec<u8>>;

/// Source file kinds accepted for upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Xlsx,
    Xls,
    Xlsb,
    Ods,
}

impl SourceFormat {
    /// Detects the format from the file extension (case-insensitive).
    ///
    /// # Examples
    /// ```
    /// use delivery_ledger::loader::SourceFormat;
    ///
    /// assert_eq!(SourceFormat::from_file_name("erp.XLSX").unwrap(), SourceFormat::Xlsx);
    /// assert!(SourceFormat::from_file_name("erp.pdf").is_err());
    /// ```
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        match extension.as_deref() {
            Some("csv") | Some("txt") => Ok(SourceFormat::Csv),
            Some("xlsx") | Some("xlsm") => Ok(SourceFormat::Xlsx),
            Some("xls") => Ok(SourceFormat::Xls),
            Some("xlsb") => Ok(SourceFormat::Xlsb),
            Some("ods") => Ok(SourceFormat::Ods),
            Some(ext) => Err(ReportError::UnsupportedFormat(format!(".{}", ext))),
            None => Err(ReportError::UnsupportedFormat(format!(
                "{} has no extension",
                file_name
            ))),
        }
    }
}

/// Encodings tried, in order, when decoding delimited text.
pub fn default_encodings() -> Vec<&'static Encoding> {
    vec![UTF_8, EUC_KR]
}

/// Load an uploaded file into a raw table
///
/// Workbooks contribute their first sheet only. Delimited text is decoded
/// with the first encoding in `encodings` that accepts the bytes without
/// errors.
///
/// # Arguments
/// * `bytes` - File content
/// * `file_name` - Original file name, used to pick the format
/// * `encodings` - Ordered list of text encodings for CSV input
///
/// # Returns
/// * `Result<RawTable>` - Rows with no header applied, or a read failure
pub fn load_table(
    bytes: &[u8],
    file_name: &str,
    encodings: &[&'static Encoding],
) -> Result<RawTable> {
    let format = SourceFormat::from_file_name(file_name)?;
    let table = match format {
        SourceFormat::Csv => from_csv(bytes, encodings)?,
        SourceFormat::Xlsx => from_workbook::<Xlsx<Buffer>>(bytes)?,
        SourceFormat::Xls => from_workbook::<Xls<Buffer>>(bytes)?,
        SourceFormat::Xlsb => from_workbook::<Xlsb<Buffer>>(bytes)?,
        SourceFormat::Ods => from_workbook::<Ods<Buffer>>(bytes)?,
    };

    if table.rows.iter().all(|row| row.iter().all(Cell::is_empty)) {
        return Err(ReportError::Empty);
    }

    info!(
        "Loaded {} ({:?}): {} rows x {} columns",
        file_name,
        format,
        table.rows.len(),
        table.width()
    );
    Ok(table)
}

/// Decode text by trying each encoding in order.
///
/// A UTF-8 byte order mark is stripped before the UTF-8 attempt. When no
/// encoding accepts the input the error names every encoding tried.
pub fn decode_text<'a>(bytes: &'a [u8], encodings: &[&'static Encoding]) -> Result<Cow<'a, str>> {
    for encoding in encodings {
        let body = if *encoding == UTF_8 {
            bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
        } else {
            bytes
        };

        match encoding.decode_without_bom_handling_and_without_replacement(body) {
            Some(text) => {
                debug!("Decoded upload as {}", encoding.name());
                return Ok(text);
            }
            None => debug!("Upload is not valid {}", encoding.name()),
        }
    }

    Err(ReportError::Decode {
        tried: encodings.iter().map(|e| e.name().to_string()).collect(),
    })
}

fn from_csv(bytes: &[u8], encodings: &[&'static Encoding]) -> Result<RawTable> {
    let text = decode_text(bytes, encodings)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    // The reader skips empty lines; pad them back so row `i` is line `i + 1`.
    let mut rows: Vec<Vec<Cell>> = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(position) = record.position() {
            let line = start_line(text.as_bytes(), position);
            while (rows.len() as u64) + 1 < line {
                rows.push(Vec::new());
            }
        }
        rows.push(record.iter().map(Cell::text).collect());
    }

    Ok(RawTable::new(rows))
}

/// Line on which a record's first field starts. The reader's position sits
/// before any empty lines it skipped, so those are counted here.
fn start_line(text: &[u8], position: &csv::Position) -> u64 {
    let skipped = text
        .get(position.byte() as usize..)
        .unwrap_or_default()
        .iter()
        .take_while(|b| matches!(b, b'\r' | b'\n'))
        .filter(|b| **b == b'\n')
        .count();
    position.line() + skipped as u64
}

fn from_workbook<R>(bytes: &[u8]) -> Result<RawTable>
where
    R: Reader<Buffer>,
    R::Error: std::fmt::Display,
{
    let mut workbook = open_workbook_from_rs::<R, Buffer>(Cursor::new(bytes.to_vec()))
        .map_err(|e| ReportError::Workbook(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ReportError::Empty)?
        .map_err(|e| ReportError::Workbook(e.to_string()))?;

    Ok(range_to_table(&range))
}

/// Converts a calamine range into rows, padding the leading empty rows and
/// columns so that row `i` is spreadsheet row `i + 1`.
fn range_to_table(range: &Range<Data>) -> RawTable {
    let (first_row, first_col) = range.start().unwrap_or((0, 0));

    let mut rows: Vec<Vec<Cell>> = (0..first_row).map(|_| Vec::new()).collect();
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; first_col as usize];
        cells.extend(row.iter().map(data_to_cell));
        rows.push(cells);
    }

    RawTable::new(rows)
}

fn data_to_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::text(s),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => Cell::Number(dt.as_f64()),
        other => Cell::text(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    #[test]
    fn detects_formats_by_extension() {
        assert_eq!(SourceFormat::from_file_name("a.csv").unwrap(), SourceFormat::Csv);
        assert_eq!(SourceFormat::from_file_name("a.Xls").unwrap(), SourceFormat::Xls);
        assert_eq!(SourceFormat::from_file_name("a.xlsm").unwrap(), SourceFormat::Xlsx);
        assert!(matches!(
            SourceFormat::from_file_name("README"),
            Err(ReportError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn utf8_csv_with_bom_loads() {
        let bytes = "\u{feff}거래처,발주번호\nA,PO1\n".as_bytes();
        let table = load_table(bytes, "erp.csv", &default_encodings()).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][0], Cell::text("거래처"));
        assert_eq!(table.rows[1][1], Cell::text("PO1"));
    }

    #[test]
    fn legacy_korean_csv_falls_back() {
        let (bytes, _, had_errors) = EUC_KR.encode("거래처,품명\n가나상사,볼트\n");
        assert!(!had_errors);
        let table = load_table(&bytes, "erp.csv", &default_encodings()).unwrap();
        assert_eq!(table.rows[0][0].to_text(), "거래처");
        assert_eq!(table.rows[1][0].to_text(), "가나상사");
    }

    #[test]
    fn undecodable_text_names_every_encoding() {
        let bytes = [0xff, 0xfe, 0xfd, 0x0a];
        let err = decode_text(&bytes, &[UTF_8]).unwrap_err();
        match err {
            ReportError::Decode { tried } => assert_eq!(tried, vec!["UTF-8".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_csv_is_rejected() {
        let err = load_table(b"\n,,\n", "erp.csv", &default_encodings()).unwrap_err();
        assert!(matches!(err, ReportError::Empty));
    }

    #[test]
    fn ragged_csv_rows_are_kept() {
        let bytes = b"title\n\na,b,c\n";
        let table = load_table(bytes, "erp.csv", &default_encodings()).unwrap();
        assert_eq!(table.rows.len(), 3);
        assert!(table.rows[1].is_empty());
        assert_eq!(table.rows[2].len(), 3);
    }

    #[test]
    fn csv_rows_keep_their_line_numbers() {
        let bytes = "2024년 납품 현황\n\n\n거래처,발주번호,품명\r\nA,\"PO\n1\",Widget\n\nB,PO2,Bolt\n";
        let table = load_table(bytes.as_bytes(), "erp.csv", &default_encodings()).unwrap();
        assert_eq!(table.rows.len(), 8);
        assert_eq!(table.rows[3][0], Cell::text("거래처"));
        assert_eq!(table.rows[4][1], Cell::text("PO\n1"));
        assert!(table.rows[6].is_empty());
        assert_eq!(table.rows[7][0], Cell::text("B"));
    }

    #[test]
    fn xlsx_first_sheet_keeps_row_positions() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(2, 1, "발주번호").unwrap();
        sheet.write_number(3, 1, 1234.0).unwrap();
        let second = workbook.add_worksheet();
        second.write_string(0, 0, "ignored").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let table = load_table(&bytes, "erp.xlsx", &default_encodings()).unwrap();
        assert_eq!(table.rows.len(), 4);
        assert_eq!(table.rows[2][1], Cell::text("발주번호"));
        assert_eq!(table.rows[3][1].to_text(), "1234");
        assert!(table.rows[2][0].is_empty());
    }

    #[test]
    fn corrupt_workbook_is_a_read_failure() {
        let err = load_table(b"not a zip", "erp.xlsx", &default_encodings()).unwrap_err();
        assert!(matches!(err, ReportError::Workbook(_)));
    }
}
