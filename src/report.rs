use crate::aggregate::{AggregateRecord, Aggregation};
use crate::field::{DISPLAY_ORDER, Field};
use serde::Serialize;
use serde_json::{Map, Value};

/// A report row: the aggregate plus the manually managed payment fields.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportRow {
    pub record: AggregateRecord,
    pub advance_date: String,
    pub advance_amount: f64,
    pub balance: f64,
}

/// A typed cell of the report, used by the writers and the preview.
#[derive(Clone, Debug, PartialEq)]
pub enum ReportValue<'a> {
    Text(&'a str),
    Number(f64),
}

impl ReportRow {
    pub fn new(record: AggregateRecord) -> Self {
        ReportRow {
            record,
            advance_date: String::new(),
            advance_amount: 0.0,
            balance: 0.0,
        }
    }

    pub fn value(&self, field: Field) -> ReportValue<'_> {
        match field {
            Field::AdvanceDate => ReportValue::Text(&self.advance_date),
            Field::AdvanceAmount => ReportValue::Number(self.advance_amount),
            Field::Balance => ReportValue::Number(self.balance),
            f if f.is_key() => ReportValue::Text(self.record.text(f).unwrap_or_default()),
            f => ReportValue::Number(self.record.number(f).unwrap_or(0.0)),
        }
    }
}

/// Where a report came from.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Provenance {
    pub file_name: String,
    /// 0-based index of the header row in the source sheet.
    pub header_index: usize,
    pub source_rows: usize,
    pub skipped_rows: usize,
}

/// The assembled report for one upload.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub columns: Vec<Field>,
    pub rows: Vec<ReportRow>,
    pub provenance: Provenance,
}

/// Columns found in the source, in display order, followed by the three
/// payment columns. Unit price is shown whenever it can be derived.
fn present_columns(source_fields: &[Field]) -> Vec<Field> {
    DISPLAY_ORDER
        .iter()
        .copied()
        .filter(|field| match field {
            Field::AdvanceDate | Field::AdvanceAmount | Field::Balance => true,
            Field::UnitPrice => {
                source_fields.contains(&Field::Quantity)
                    && source_fields.contains(&Field::PreTaxAmount)
            }
            f => source_fields.contains(f),
        })
        .collect()
}

/// Assemble the report from an aggregation.
///
/// `source_fields` are the canonical fields the normalizer found; they
/// decide which columns appear even when the upload has no data rows.
pub fn assemble(aggregation: Aggregation, source_fields: &[Field], provenance: Provenance) -> Report {
    let columns = present_columns(source_fields);
    let rows = aggregation.records.into_iter().map(ReportRow::new).collect();
    Report {
        columns,
        rows,
        provenance: Provenance {
            skipped_rows: aggregation.skipped,
            ..provenance
        },
    }
}

impl Report {
    pub fn headers(&self) -> Vec<&'static str> {
        self.columns.iter().map(|f| f.label()).collect()
    }

    /// 0-based position of a column.
    pub fn column_index(&self, field: Field) -> Option<usize> {
        self.columns.iter().position(|f| *f == field)
    }

    pub fn total(&self, field: Field) -> f64 {
        self.rows
            .iter()
            .map(|row| match row.value(field) {
                ReportValue::Number(n) => n,
                ReportValue::Text(_) => 0.0,
            })
            .sum()
    }

    /// JSON preview: rows keyed by column label, numbers rendered with
    /// thousands separators.
    pub fn preview_json(&self) -> Value {
        let rows: Vec<Value> = self
            .rows
            .iter()
            .map(|row| {
                let mut object = Map::new();
                for field in &self.columns {
                    let value = match row.value(*field) {
                        ReportValue::Text(s) => Value::String(s.to_string()),
                        ReportValue::Number(n) => Value::String(thousands(n)),
                    };
                    object.insert(field.label().to_string(), value);
                }
                Value::Object(object)
            })
            .collect();

        serde_json::json!({
            "columns": self.headers(),
            "rows": rows,
            "provenance": self.provenance,
        })
    }
}

/// Format a number rounded to a whole value with thousands separators,
/// like the `#,##0` spreadsheet format.
pub fn thousands(value: f64) -> String {
    let rounded = value.round();
    let negative = rounded < 0.0;
    let digits = format!("{:.0}", rounded.abs());

    let mut with_commas = String::new();
    for (i, c) in digits.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            with_commas.push(',');
        }
        with_commas.push(c);
    }
    let with_commas: String = with_commas.chars().rev().collect();

    if negative {
        format!("-{with_commas}")
    } else {
        with_commas
    }
}
