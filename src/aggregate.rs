use crate::coerce::Record;
use crate::field::{Field, KEY_FIELDS};
use indexmap::IndexMap;
use log::debug;
use std::cmp::Ordering;

/// One output row: the key values plus summed amounts.
///
/// Summed fields keep the presence of the source columns. `unit_price` is
/// present whenever both quantity and pre-tax amount are.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AggregateRecord {
    pub vendor: Option<String>,
    pub order_number: Option<String>,
    pub item_code: Option<String>,
    pub item_name: Option<String>,
    pub unit_price: Option<f64>,
    pub quantity: Option<f64>,
    pub pre_tax_amount: Option<f64>,
    pub tax: Option<f64>,
    pub post_tax_amount: Option<f64>,
}

/// Result of grouping one upload.
#[derive(Clone, Debug, PartialEq)]
pub struct Aggregation {
    pub records: Vec<AggregateRecord>,
    /// Rows left out because a key value was blank (subtotal or footer lines).
    pub skipped: usize,
}

type GroupKey = [Option<String>; 4];

fn group_key(record: &Record) -> GroupKey {
    KEY_FIELDS.map(|field| record.text(field).map(str::to_string))
}

fn has_blank_key(record: &Record) -> bool {
    KEY_FIELDS
        .iter()
        .any(|field| matches!(record.text(*field), Some(value) if value.is_empty()))
}

fn add(total: &mut Option<f64>, value: Option<f64>) {
    if let Some(value) = value {
        *total = Some(total.unwrap_or(0.0) + value);
    }
}

/// Group records and sum their amounts
///
/// Rows are grouped by every key field present in the source (vendor,
/// order number, item code, item name), so lines that share an order and
/// item code but differ in vendor or item name stay apart. Quantity and
/// the three amounts are summed, the unit price is recomputed and the
/// groups are sorted by vendor, order number and item code. Groups with
/// equal sort keys keep first-seen order.
///
/// # Arguments
/// * `records` - Coerced source rows
///
/// # Returns
/// * `Aggregation` - One record per distinct key
pub fn aggregate(records: &[Record]) -> Aggregation {
    let mut groups: IndexMap<GroupKey, AggregateRecord> = IndexMap::new();
    let mut skipped = 0;

    for record in records {
        if has_blank_key(record) {
            skipped += 1;
            continue;
        }

        let entry = groups
            .entry(group_key(record))
            .or_insert_with(|| AggregateRecord {
                vendor: record.vendor.clone(),
                order_number: record.order_number.clone(),
                item_code: record.item_code.clone(),
                item_name: record.item_name.clone(),
                ..AggregateRecord::default()
            });

        add(&mut entry.quantity, record.quantity);
        add(&mut entry.pre_tax_amount, record.pre_tax_amount);
        add(&mut entry.tax, record.tax);
        add(&mut entry.post_tax_amount, record.post_tax_amount);
    }

    let mut records: Vec<AggregateRecord> = groups.into_values().collect();
    for record in records.iter_mut() {
        derive_unit_price(record);
    }
    records.sort_by(compare_for_display);

    debug!(
        "Aggregated into {} groups, {} rows skipped",
        records.len(),
        skipped
    );
    Aggregation { records, skipped }
}

/// Recompute the unit price from the aggregated totals.
///
/// `pre_tax_amount / quantity`, or `0` when the quantity is zero. Any
/// earlier value is overwritten.
pub fn derive_unit_price(record: &mut AggregateRecord) {
    record.unit_price = match (record.quantity, record.pre_tax_amount) {
        (Some(quantity), Some(amount)) if quantity != 0.0 => Some(amount / quantity),
        (Some(_), Some(_)) => Some(0.0),
        _ => None,
    };
}

fn compare_for_display(a: &AggregateRecord, b: &AggregateRecord) -> Ordering {
    a.vendor
        .cmp(&b.vendor)
        .then_with(|| a.order_number.cmp(&b.order_number))
        .then_with(|| a.item_code.cmp(&b.item_code))
}

impl AggregateRecord {
    pub fn text(&self, field: Field) -> Option<&str> {
        match field {
            Field::Vendor => self.vendor.as_deref(),
            Field::OrderNumber => self.order_number.as_deref(),
            Field::ItemCode => self.item_code.as_deref(),
            Field::ItemName => self.item_name.as_deref(),
            _ => None,
        }
    }

    pub fn number(&self, field: Field) -> Option<f64> {
        match field {
            Field::UnitPrice => self.unit_price,
            Field::Quantity => self.quantity,
            Field::PreTaxAmount => self.pre_tax_amount,
            Field::Tax => self.tax,
            Field::PostTaxAmount => self.post_tax_amount,
            _ => None,
        }
    }
}
