use crate::cell::{Cell, RawTable};
use crate::error::{ReportError, Result};
use serde::Serialize;

/// Keywords that identify the title row of an ERP delivery export.
pub const DEFAULT_KEYWORDS: &[&str] = &["발주번호", "품명", "거래처", "단가", "납품수량", "금액"];

pub const DEFAULT_SCAN_ROWS: usize = 30;
/// Bounds on the number of rows searched, for configured values.
pub const MIN_SCAN_ROWS: usize = 20;
pub const MAX_SCAN_ROWS: usize = 50;
pub const DEFAULT_MIN_MATCHES: usize = 2;

/// How the header row of an upload is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HeaderMode {
    /// Score the first rows against the keyword list.
    #[default]
    Auto,
    /// Use this 0-based row.
    Fixed(usize),
}

/// Scores rows by the number of distinct keywords they contain.
///
/// Every scanned row is scored; there is no early exit on a single strong
/// keyword. The earliest row with the highest score wins and it must reach
/// `min_matches`, which is never below [`DEFAULT_MIN_MATCHES`].
#[derive(Clone, Debug)]
pub struct HeaderLocator {
    keywords: Vec<String>,
    scan_rows: usize,
    min_matches: usize,
}

/// A located header row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HeaderMatch {
    pub index: usize,
    pub matched: Vec<String>,
}

impl Default for HeaderLocator {
    fn default() -> Self {
        HeaderLocator::new(DEFAULT_KEYWORDS, DEFAULT_SCAN_ROWS, DEFAULT_MIN_MATCHES)
    }
}

impl HeaderLocator {
    pub fn new<S: AsRef<str>>(keywords: &[S], scan_rows: usize, min_matches: usize) -> Self {
        HeaderLocator {
            keywords: keywords.iter().map(|k| k.as_ref().to_string()).collect(),
            scan_rows,
            min_matches: min_matches.max(DEFAULT_MIN_MATCHES),
        }
    }

    pub fn scan_rows(&self) -> usize {
        self.scan_rows
    }

    /// Keywords found in `row`, each counted once.
    pub fn matches(&self, row: &[Cell]) -> Vec<String> {
        let texts: Vec<String> = row.iter().map(Cell::to_text).collect();
        self.keywords
            .iter()
            .filter(|keyword| texts.iter().any(|text| text.contains(keyword.as_str())))
            .cloned()
            .collect()
    }

    /// Find the header row among the first `scan_rows` rows.
    ///
    /// # Returns
    /// * `Option<HeaderMatch>` - The best row, or `None` when no row reaches
    ///   the minimum number of distinct keywords
    pub fn locate(&self, rows: &[Vec<Cell>]) -> Option<HeaderMatch> {
        let mut best: Option<HeaderMatch> = None;

        for (index, row) in rows.iter().take(self.scan_rows).enumerate() {
            let matched = self.matches(row);
            let better = match &best {
                Some(current) => matched.len() > current.matched.len(),
                None => !matched.is_empty(),
            };
            if better {
                best = Some(HeaderMatch { index, matched });
            }
        }

        best.filter(|m| m.matched.len() >= self.min_matches)
    }
}

/// Picks the header row for `table` according to `mode`.
///
/// Both the header preview and the full pipeline go through this function
/// so the preview always shows the row that processing will use.
pub fn resolve_header(
    table: &RawTable,
    mode: HeaderMode,
    locator: &HeaderLocator,
) -> Result<HeaderMatch> {
    match mode {
        HeaderMode::Fixed(index) => {
            let row = table
                .rows
                .get(index)
                .ok_or(ReportError::HeaderOutOfRange {
                    row: index + 1,
                    rows: table.rows.len(),
                })?;
            Ok(HeaderMatch {
                index,
                matched: locator.matches(row),
            })
        }
        HeaderMode::Auto => locator.locate(&table.rows).ok_or_else(|| {
            let scanned = (0..table.rows.len().min(locator.scan_rows()))
                .map(|i| table.describe_row(i))
                .collect();
            ReportError::HeaderNotFound { scanned }
        }),
    }
}
