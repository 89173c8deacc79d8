use crate::cell::Cell;
use crate::field::Field;
use crate::normalizer::NormalizedTable;

/// One source line with its canonical values.
///
/// `None` means the source has no such column.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    pub vendor: Option<String>,
    pub order_number: Option<String>,
    pub item_code: Option<String>,
    pub item_name: Option<String>,
    pub quantity: Option<f64>,
    pub pre_tax_amount: Option<f64>,
    pub tax: Option<f64>,
    pub post_tax_amount: Option<f64>,
}

impl Record {
    pub fn text(&self, field: Field) -> Option<&str> {
        match field {
            Field::Vendor => self.vendor.as_deref(),
            Field::OrderNumber => self.order_number.as_deref(),
            Field::ItemCode => self.item_code.as_deref(),
            Field::ItemName => self.item_name.as_deref(),
            _ => None,
        }
    }
}

/// Parse a cell as a number, falling back to zero
///
/// The cell is rendered as text, commas are stripped and the remainder is
/// parsed. Blank cells, stray text and non-finite values all become `0.0`.
///
/// # Examples
/// ```
/// use delivery_ledger::cell::Cell;
/// use delivery_ledger::coerce::coerce_number;
///
/// assert_eq!(coerce_number(&Cell::text("1,234,500")), 1234500.0);
/// assert_eq!(coerce_number(&Cell::text("n/a")), 0.0);
/// ```
pub fn coerce_number(cell: &Cell) -> f64 {
    if let Cell::Number(n) = cell {
        return if n.is_finite() { *n } else { 0.0 };
    }
    let text = cell.to_text().replace(',', "");
    match text.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => n,
        _ => 0.0,
    }
}

/// Convert normalized rows into records.
///
/// Descriptive fields are trimmed text; summed fields go through
/// [`coerce_number`]. This step never fails.
pub fn coerce_records(table: &NormalizedTable) -> Vec<Record> {
    table
        .rows
        .iter()
        .map(|row| {
            let mut record = Record::default();
            for (field, cell) in table.fields.iter().zip(row.iter()) {
                match field {
                    Field::Vendor => record.vendor = Some(key_text(cell)),
                    Field::OrderNumber => record.order_number = Some(key_text(cell)),
                    Field::ItemCode => record.item_code = Some(key_text(cell)),
                    Field::ItemName => record.item_name = Some(key_text(cell)),
                    Field::Quantity => record.quantity = Some(coerce_number(cell)),
                    Field::PreTaxAmount => record.pre_tax_amount = Some(coerce_number(cell)),
                    Field::Tax => record.tax = Some(coerce_number(cell)),
                    Field::PostTaxAmount => record.post_tax_amount = Some(coerce_number(cell)),
                    // unit price is always recomputed after aggregation
                    _ => {}
                }
            }
            record
        })
        .collect()
}

fn key_text(cell: &Cell) -> String {
    cell.to_text().trim().to_string()
}
