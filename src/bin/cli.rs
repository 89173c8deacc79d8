#![cfg(not(tarpaulin_include))]

use clap::Parser;
use delivery_ledger::downloader::{self, CSV_FILE_NAME, XLSX_FILE_NAME};
use delivery_ledger::field::Field;
use delivery_ledger::header::{DEFAULT_SCAN_ROWS, HeaderMode, MAX_SCAN_ROWS, MIN_SCAN_ROWS};
use delivery_ledger::pipeline::{PipelineConfig, process_upload};
use delivery_ledger::report::thousands;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cli",
    about = "Aggregate an ERP delivery export into a payment tracking workbook."
)]
struct Cli {
    /// ERP export (.xlsx, .xlsm, .xlsb, .xls, .ods, .csv or .txt)
    input: PathBuf,

    /// Output file [default: 납품대금_집계표.xlsx, or .csv with --csv]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Use this 1-based row as the header instead of detecting it
    #[arg(long = "header-row", value_parser = clap::value_parser!(u32).range(1..))]
    header_row: Option<u32>,

    /// Number of leading rows searched for the header (20-50)
    #[arg(
        long = "scan-rows",
        default_value_t = DEFAULT_SCAN_ROWS as u32,
        value_parser = clap::value_parser!(u32).range(MIN_SCAN_ROWS as i64..=MAX_SCAN_ROWS as i64)
    )]
    scan_rows: u32,

    /// Write CSV instead of XLSX
    #[arg(long)]
    csv: bool,
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(&cli.input)?;
    let file_name = cli
        .input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let config = PipelineConfig {
        header_mode: match cli.header_row {
            Some(row) => HeaderMode::Fixed(row as usize - 1),
            None => HeaderMode::Auto,
        },
        scan_rows: cli.scan_rows as usize,
        ..PipelineConfig::default()
    };

    let report = process_upload(&bytes, &file_name, &config)?;

    let (content, default_name) = if cli.csv {
        (downloader::to_csv(&report)?, CSV_FILE_NAME)
    } else {
        (downloader::to_xlsx(&report)?, XLSX_FILE_NAME)
    };
    let output = cli.output.unwrap_or_else(|| PathBuf::from(default_name));
    std::fs::write(&output, content)?;

    let provenance = &report.provenance;
    println!(
        "{}: header at row {}, {} rows read, {} skipped",
        provenance.file_name,
        provenance.header_index + 1,
        provenance.source_rows,
        provenance.skipped_rows
    );
    println!("{} groups", report.rows.len());
    for field in [Field::Quantity, Field::PreTaxAmount, Field::PostTaxAmount] {
        if report.column_index(field).is_some() {
            println!("  {}: {}", field.label(), thousands(report.total(field)));
        }
    }
    println!("Wrote {}", output.display());

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
