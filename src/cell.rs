use serde::{Deserialize, Serialize};

/// A single untyped value read from an uploaded file.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    /// Builds a text cell, collapsing whitespace-only input to `Empty`.
    pub fn text(value: &str) -> Self {
        if value.trim().is_empty() {
            Cell::Empty
        } else {
            Cell::Text(value.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Text rendering used for header names, keys and keyword matching.
    ///
    /// Whole numbers drop the fractional part so an item code stored as
    /// `1234.0` by the spreadsheet reads back as `1234`.
    pub fn to_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => number_to_text(*n),
            Cell::Bool(b) => b.to_string(),
        }
    }
}

fn number_to_text(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Raw rows as read from the first sheet or the delimited text, with an
/// optional header once one has been chosen.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawTable {
    pub header: Option<Vec<String>>,
    pub rows: Vec<Vec<Cell>>,
}

impl RawTable {
    pub fn new(rows: Vec<Vec<Cell>>) -> Self {
        RawTable { header: None, rows }
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Promotes row `index` to the header and keeps only the rows below it.
    pub fn with_header_at(mut self, index: usize) -> Self {
        let mut below = self.rows.split_off(index.min(self.rows.len()));
        let header = if below.is_empty() {
            Vec::new()
        } else {
            below.remove(0).iter().map(Cell::to_text).collect()
        };
        RawTable {
            header: Some(header),
            rows: below,
        }
    }

    /// One-line summary of a row, used in header diagnostics.
    pub fn describe_row(&self, index: usize) -> String {
        let cells = self
            .rows
            .get(index)
            .map(|row| {
                row.iter()
                    .filter(|c| !c.is_empty())
                    .map(Cell::to_text)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        format!("row {}: {}", index + 1, cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_of_whole_numbers_has_no_fraction() {
        assert_eq!(Cell::Number(1234.0).to_text(), "1234");
        assert_eq!(Cell::Number(12.5).to_text(), "12.5");
        assert_eq!(Cell::Empty.to_text(), "");
    }

    #[test]
    fn blank_text_is_empty() {
        assert_eq!(Cell::text("   "), Cell::Empty);
        assert!(Cell::Text(" ".to_string()).is_empty());
        assert!(!Cell::Number(0.0).is_empty());
    }

    #[test]
    fn header_split_keeps_rows_below() {
        let table = RawTable::new(vec![
            vec![Cell::text("title")],
            vec![Cell::text("발주번호"), Cell::text("품번")],
            vec![Cell::text("PO1"), Cell::text("I1")],
        ]);
        let table = table.with_header_at(1);
        assert_eq!(
            table.header,
            Some(vec!["발주번호".to_string(), "품번".to_string()])
        );
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][0], Cell::text("PO1"));
    }

    #[test]
    fn describe_row_skips_blank_cells() {
        let table = RawTable::new(vec![vec![
            Cell::text("a"),
            Cell::Empty,
            Cell::Number(3.0),
        ]]);
        assert_eq!(table.describe_row(0), "row 1: a, 3");
    }
}
