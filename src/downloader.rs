use crate::cell::Cell;
use crate::error::Result;
use crate::field::Field;
use crate::report::{Report, ReportValue};
use rust_xlsxwriter::{Format, Workbook, Worksheet};

pub const XLSX_FILE_NAME: &str = "납품대금_집계표.xlsx";
pub const CSV_FILE_NAME: &str = "납품대금_집계표.csv";
pub const SHEET_NAME: &str = "Sheet1";
pub const NUMBER_FORMAT: &str = "#,##0";

/// Convert a report to XLSX format
///
/// Writes a single sheet with the column labels in row 1 and one row per
/// aggregate group. Numeric columns use the `#,##0` format. When the
/// post-tax amount is present every balance cell holds a formula
/// subtracting the advance amount from the post-tax amount of the same row,
/// so editing the advance amount in a spreadsheet application updates the
/// balance.
///
/// # Arguments
/// * `report` - The assembled report
///
/// # Returns
/// * `Result<Vec<u8>>` - XLSX file content as bytes or an error
pub fn to_xlsx(report: &Report) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name(SHEET_NAME)?;

    let number_format = Format::new().set_num_format(NUMBER_FORMAT);

    for (c, label) in report.headers().iter().enumerate() {
        worksheet.write_string(0, c as u16, *label)?;
    }

    let balance_formula = balance_columns(report);

    for (r, row) in report.rows.iter().enumerate() {
        let xlsx_row = (r + 1) as u32;
        for (c, field) in report.columns.iter().enumerate() {
            let col = c as u16;

            if *field == Field::Balance {
                if let Some((total, advance)) = &balance_formula {
                    let formula = format!("={total}{n}-{advance}{n}", n = xlsx_row + 1);
                    worksheet.write_formula_with_format(xlsx_row, col, formula.as_str(), &number_format)?;
                    continue;
                }
            }

            match row.value(*field) {
                ReportValue::Text("") => {}
                ReportValue::Text(text) => {
                    worksheet.write_string(xlsx_row, col, text)?;
                }
                ReportValue::Number(n) => {
                    worksheet.write_number_with_format(xlsx_row, col, n, &number_format)?;
                }
            }
        }
    }

    workbook.push_worksheet(worksheet);
    let buffer = workbook.save_to_buffer()?;

    Ok(buffer)
}

/// Column letters of the post-tax amount and advance amount, when both are
/// in the report.
fn balance_columns(report: &Report) -> Option<(String, String)> {
    let total = report.column_index(Field::PostTaxAmount)?;
    let advance = report.column_index(Field::AdvanceAmount)?;
    report.column_index(Field::Balance)?;
    Some((
        column_to_letter(total as u16 + 1),
        column_to_letter(advance as u16 + 1),
    ))
}

/// Convert a report to CSV format
///
/// Same columns as the workbook. A CSV cannot carry formulas, so the balance
/// is written as its value. The output starts with a UTF-8 byte order mark
/// so spreadsheet applications detect the encoding of the Korean labels.
pub fn to_csv(report: &Report) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(b"\xEF\xBB\xBF".to_vec());
    writer.write_record(report.headers())?;

    for row in &report.rows {
        let record: Vec<String> = report
            .columns
            .iter()
            .map(|field| match field {
                Field::Balance => plain_number(
                    row.record.post_tax_amount.unwrap_or(0.0) - row.advance_amount,
                ),
                f => match row.value(*f) {
                    ReportValue::Text(text) => text.to_string(),
                    ReportValue::Number(n) => plain_number(n),
                },
            })
            .collect();
        writer.write_record(&record)?;
    }

    writer.into_inner().map_err(|e| e.into_error().into())
}

fn plain_number(n: f64) -> String {
    Cell::Number(n).to_text()
}

/// Convert column number to letter (A=1, B=2, etc.)
///
/// # Examples
/// ```
/// use delivery_ledger::downloader::column_to_letter;
///
/// assert_eq!(column_to_letter(1), "A");
/// assert_eq!(column_to_letter(26), "Z");
/// assert_eq!(column_to_letter(27), "AA");
/// assert_eq!(column_to_letter(52), "AZ");
/// ```
pub fn column_to_letter(col: u16) -> String {
    let mut name = String::new();
    let mut n = col;

    while n > 0 {
        n -= 1;
        name.insert(0, (b'A' + (n % 26) as u8) as char);
        n /= 26;
    }

    name
}
