use serde::Serialize;

/// Canonical output columns, declared in display order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Vendor,
    OrderNumber,
    ItemCode,
    ItemName,
    UnitPrice,
    Quantity,
    PreTaxAmount,
    Tax,
    PostTaxAmount,
    AdvanceDate,
    AdvanceAmount,
    Balance,
}

/// ERP column name to canonical field. Surviving columns keep this order.
pub const COLUMN_MAPPING: [(&str, Field); 9] = [
    ("거래처", Field::Vendor),
    ("발주번호", Field::OrderNumber),
    ("품번", Field::ItemCode),
    ("품명", Field::ItemName),
    ("단가", Field::UnitPrice),
    ("납품수량", Field::Quantity),
    ("금액", Field::PreTaxAmount),
    ("부가세", Field::Tax),
    ("금액계", Field::PostTaxAmount),
];

pub const DISPLAY_ORDER: [Field; 12] = [
    Field::Vendor,
    Field::OrderNumber,
    Field::ItemCode,
    Field::ItemName,
    Field::UnitPrice,
    Field::Quantity,
    Field::PreTaxAmount,
    Field::Tax,
    Field::PostTaxAmount,
    Field::AdvanceDate,
    Field::AdvanceAmount,
    Field::Balance,
];

/// Descriptive fields forming the aggregate key.
pub const KEY_FIELDS: [Field; 4] = [
    Field::Vendor,
    Field::OrderNumber,
    Field::ItemCode,
    Field::ItemName,
];

impl Field {
    /// Column title written to the report.
    pub fn label(self) -> &'static str {
        match self {
            Field::Vendor => "업체",
            Field::OrderNumber => "발주번호",
            Field::ItemCode => "품번",
            Field::ItemName => "품명",
            Field::UnitPrice => "납품단가",
            Field::Quantity => "납품수량",
            Field::PreTaxAmount => "납품금액(세전)",
            Field::Tax => "부가세",
            Field::PostTaxAmount => "납품금액(세후)",
            Field::AdvanceDate => "선금 지급일",
            Field::AdvanceAmount => "선금 금액",
            Field::Balance => "잔여금액",
        }
    }

    pub fn is_key(self) -> bool {
        KEY_FIELDS.contains(&self)
    }
}
