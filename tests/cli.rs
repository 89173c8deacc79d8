use assert_cmd::Command;
use calamine::{Data, Reader, Xlsx, open_workbook};
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

const ERP_CSV: &str = "\
2024년 11월 납품 현황,,,,,,,,
,,,,,,,,
거래처,발주번호,품번,품명,납품수량,금액,부가세,금액계
A,PO1,I1,Widget,10,100,10,110
A,PO1,I1,Widget,5,50,5,55
B,PO2,I7,Bolt,\"1,000\",\"3,000\",300,\"3,300\"
";

#[test]
fn converts_csv_export_to_workbook() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("erp.csv");
    let output = dir.path().join("ledger.xlsx");
    fs::write(&input, ERP_CSV).unwrap();

    Command::cargo_bin("cli")
        .unwrap()
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("header at row 3"))
        .stdout(predicate::str::contains("2 groups"));

    let mut workbook: Xlsx<_> = open_workbook(&output).unwrap();
    let values = workbook.worksheet_range("Sheet1").unwrap();
    assert_eq!(values.get_value((0, 0)), Some(&Data::String("업체".into())));
    assert_eq!(values.get_value((1, 5)), Some(&Data::Float(15.0)));
    assert_eq!(values.get_value((2, 4)), Some(&Data::Float(3.0)));

    let formulas = workbook.worksheet_formula("Sheet1").unwrap();
    assert!(formulas.used_cells().any(|(_, _, f)| f == "I2-K2"));
}

#[test]
fn writes_csv_with_fixed_header_row() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("erp.csv");
    let output = dir.path().join("ledger.csv");
    fs::write(&input, ERP_CSV).unwrap();

    Command::cargo_bin("cli")
        .unwrap()
        .arg(&input)
        .args(["--header-row", "3", "--csv", "-o"])
        .arg(&output)
        .assert()
        .success();

    let text = fs::read_to_string(&output).unwrap();
    assert!(text.contains("B,PO2,I7,Bolt,3,1000,3000,300,3300,,0,3300"));
}

#[test]
fn reports_missing_header() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("notes.csv");
    fs::write(&input, "memo,date\nhello,today\n").unwrap();

    Command::cargo_bin("cli")
        .unwrap()
        .arg(&input)
        .arg("-o")
        .arg(dir.path().join("out.xlsx"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Header row not found"));
}

#[test]
fn rejects_unknown_extension() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("erp.pdf");
    fs::write(&input, "x").unwrap();

    Command::cargo_bin("cli")
        .unwrap()
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported file type: .pdf"));
}

#[test]
fn scan_rows_outside_bounds_is_rejected() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("erp.csv");
    fs::write(&input, ERP_CSV).unwrap();

    Command::cargo_bin("cli")
        .unwrap()
        .arg(&input)
        .args(["--scan-rows", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--scan-rows"));

    Command::cargo_bin("cli")
        .unwrap()
        .arg(&input)
        .args(["--scan-rows", "20", "--csv", "-o"])
        .arg(dir.path().join("ledger.csv"))
        .assert()
        .success();
}
