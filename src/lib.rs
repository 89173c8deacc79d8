/*!
# Delivery Ledger

Turns ERP delivery exports into a payment tracking workbook: one row per
purchase order line, with delivered quantity and amounts summed and empty
columns for recording advance payments.

## Overview

ERP systems export delivery records as spreadsheets with title blocks,
approval boxes and subtotal lines above and below the real table. This
crate finds the header row, keeps the columns it knows, groups the lines by
vendor, order number, item code and item name, and writes the result as an
XLSX file whose balance column is a live formula.

## Pipeline

1. **Loader** - reads `.csv`/`.txt` (UTF-8, falling back to EUC-KR) and
   `.xlsx`, `.xlsm`, `.xlsb`, `.xls`, `.ods` (first sheet)
2. **Header locator** - scores the first rows against known column names
   and picks the best one, or uses a fixed row
3. **Normalizer** - maps the ERP column names onto canonical fields
4. **Coercer** - parses amounts, turning anything unreadable into zero
5. **Aggregator** - groups and sums, then derives the unit price
6. **Report** - appends advance date, advance amount and balance
7. **Downloader** - XLSX with `#,##0` formats and balance formulas, or CSV

## Web Application

With the `web` feature (default) the `website` binary serves an upload page
behind Google sign-in. Only accounts of one e-mail domain are let in, and
each session keeps its latest report for download.

## Modules

- **cell**: raw cell values and tables
- **loader**: file reading and text decoding
- **header**: header row detection
- **field**: canonical columns and their labels
- **normalizer**: column mapping
- **coerce**: numeric parsing
- **aggregate**: grouping and summing
- **report**: report assembly and JSON preview
- **downloader**: XLSX and CSV export
- **pipeline**: the steps above, end to end
- **config**: environment configuration
- **error**: error types
- **login**: sign-in and sessions (web)
- **app**: routing and handlers (web)

## REST API Endpoints

- `GET /` - Upload page, or the sign-in page without a session
- `GET /login`, `GET /auth/callback`, `POST /logout` - Sign-in flow
- `GET /health` - Liveness check
- `GET /api/me` - Signed-in account
- `POST /api/header` - Header row preview for an upload
- `POST /api/report`, `GET /api/report` - Build or fetch the report
- `GET /api/report/xlsx`, `GET /api/report/csv` - Downloads
*/

pub mod aggregate;
pub mod cell;
pub mod coerce;
pub mod config;
pub mod downloader;
pub mod error;
pub mod field;
pub mod header;
pub mod loader;
pub mod normalizer;
pub mod pipeline;
pub mod report;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod login;

pub use config::AppConfig;
pub use error::{AuthError, ConfigError, ReportError, Result};
pub use pipeline::{PipelineConfig, preview_header, process_upload};
pub use report::Report;
