// Voter roll import and export

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;

use diesel_async::AsyncMysqlConnection;
use rocket::serde::Serialize;
use rocket_db_pools::diesel::prelude::*;
use rust_xlsxwriter::Workbook;
use tracing::info;

use crate::db::is_unique_violation;
use crate::error::AppError;
use crate::models::{NewVoter, Voter};
use crate::voters;

pub const TEMPLATE_CSV: &str = "Ahmad Nugroho,XII RPL 1,1234567890
Siti Aminah,XII TKJ 1,1234567891
Budi Santoso,XII OTKP 1,1234567892
Dewi Sartika,XII RPL 2,1234567893
Eko Prasetyo,XII TKJ 2,1234567894
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRow {
    pub line: usize,
    pub name: String,
    pub class_name: String,
    pub nisn: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowProblem {
    ColumnCount(usize),
    Name(String),
    Class(String),
    Nisn(String),
    DuplicateInFile(String),
    AlreadyRegistered(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub line: usize,
    pub problem: RowProblem,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: ", self.line)?;
        match &self.problem {
            RowProblem::ColumnCount(n) => {
                write!(f, "expected 3 columns (name, class, NISN), found {n}")
            }
            RowProblem::Name(m) | RowProblem::Class(m) | RowProblem::Nisn(m) => f.write_str(m),
            RowProblem::DuplicateInFile(nisn) => write!(f, "NISN {nisn} is duplicated in the file"),
            RowProblem::AlreadyRegistered(nisn) => write!(f, "NISN {nisn} is already registered"),
        }
    }
}

/// Streaming row validator over `name,class,nisn` lines. Yields exactly one result
/// per non-blank line and keeps the NISNs accepted so far to catch in-file duplicates.
pub struct RosterRows<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    seen: HashSet<String>,
    first: bool,
}

/// Uploaded rolls are usually UTF-8 but spreadsheet exports are sometimes Latin-1.
/// Undecodable bytes become U+FFFD so the row is still validated and reported.
pub fn decode(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    String::from_utf8_lossy(bytes)
}

pub fn parse(text: &str) -> RosterRows<'_> {
    RosterRows {
        lines: text.lines().enumerate(),
        seen: HashSet::new(),
        first: true,
    }
}

fn split_columns(line: &str) -> Vec<String> {
    line.split(',')
        .map(|col| col.trim().replace('"', ""))
        .collect()
}

impl Iterator for RosterRows<'_> {
    type Item = Result<RosterRow, RowError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (idx, raw) = self.lines.next()?;
            let line = idx + 1;
            let raw = raw.trim().trim_start_matches('\u{feff}');
            if raw.is_empty() {
                continue;
            }

            let columns = split_columns(raw);
            let is_first = std::mem::replace(&mut self.first, false);
            if is_first && columns.len() == 3 && columns[2].eq_ignore_ascii_case("nisn") {
                continue;
            }

            return Some(self.check(line, columns));
        }
    }
}

impl RosterRows<'_> {
    fn check(&mut self, line: usize, columns: Vec<String>) -> Result<RosterRow, RowError> {
        let fail = |problem| RowError { line, problem };

        let [name, class_name, nisn]: [String; 3] = columns
            .try_into()
            .map_err(|cols: Vec<String>| fail(RowProblem::ColumnCount(cols.len())))?;

        voters::validate_name(&name).map_err(|m| fail(RowProblem::Name(m)))?;
        voters::validate_class(&class_name).map_err(|m| fail(RowProblem::Class(m)))?;
        voters::validate_nisn(&nisn).map_err(|m| fail(RowProblem::Nisn(m)))?;

        if !self.seen.insert(nisn.clone()) {
            return Err(fail(RowProblem::DuplicateInFile(nisn)));
        }

        Ok(RosterRow {
            line,
            name,
            class_name,
            nisn,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(crate = "rocket::serde")]
pub struct ImportReport {
    pub success: bool,
    pub message: String,
    pub imported: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Imports every valid row; invalid and duplicate rows are reported, never dropped.
pub async fn import(conn: &mut AsyncMysqlConnection, text: &str) -> Result<ImportReport, AppError> {
    let mut imported = 0;
    let mut errors = Vec::new();
    let mut rows = 0;

    for result in parse(text) {
        rows += 1;
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                errors.push(e.to_string());
                continue;
            }
        };

        let registered = RowError {
            line: row.line,
            problem: RowProblem::AlreadyRegistered(row.nisn.clone()),
        };
        if voters::nisn_exists(conn, &row.nisn).await? {
            errors.push(registered.to_string());
            continue;
        }

        let voter: NewVoter = voters::validated_voter(&row.name, &row.class_name, &row.nisn)?;
        match diesel::insert_into(crate::schema::voters::table)
            .values(&voter)
            .execute(conn)
            .await
        {
            Ok(_) => imported += 1,
            Err(e) if is_unique_violation(&e) => errors.push(registered.to_string()),
            Err(e) => return Err(e.into()),
        }
    }

    if rows == 0 {
        return Err(AppError::Validation("the file contains no rows".into()));
    }
    if imported == 0 && !errors.is_empty() {
        return Err(AppError::InvalidRoster(errors));
    }

    info!(imported, rejected = errors.len(), "Voter roll imported");
    Ok(ImportReport {
        success: true,
        message: format!("Imported {imported} voter(s)"),
        imported,
        errors,
    })
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn export_csv(voters: &[Voter]) -> String {
    let mut out = String::from("name,class,nisn,verified,has_voted,token\n");
    for v in voters {
        let fields = [
            csv_field(&v.name),
            csv_field(&v.class_name),
            csv_field(&v.nisn),
            v.is_verified.to_string(),
            v.has_voted.to_string(),
            csv_field(v.vote_token.as_deref().unwrap_or_default()),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

pub fn export_xlsx(voters: &[Voter]) -> Result<Vec<u8>, AppError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    let headers = ["Name", "Class", "NISN", "Verified", "Voted", "Token", "Registered"];
    for (col, header) in headers.iter().enumerate() {
        worksheet.write_string(0, col as u16, *header)?;
    }

    for (i, v) in voters.iter().enumerate() {
        let row = (i + 1) as u32;
        worksheet.write_string(row, 0, &v.name)?;
        worksheet.write_string(row, 1, &v.class_name)?;
        worksheet.write_string(row, 2, &v.nisn)?;
        worksheet.write_boolean(row, 3, v.is_verified)?;
        worksheet.write_boolean(row, 4, v.has_voted)?;
        worksheet.write_string(row, 5, v.vote_token.as_deref().unwrap_or_default())?;
        worksheet.write_string(row, 6, v.created_at.format("%Y-%m-%d %H:%M:%S").to_string())?;
    }

    worksheet.autofit();

    Ok(workbook.save_to_buffer()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{now, test_db};

    fn collect(text: &str) -> (Vec<RosterRow>, Vec<RowError>) {
        let mut ok = Vec::new();
        let mut bad = Vec::new();
        for row in parse(text) {
            match row {
                Ok(r) => ok.push(r),
                Err(e) => bad.push(e),
            }
        }
        (ok, bad)
    }

    #[test]
    fn template_parses_cleanly() {
        let (ok, bad) = collect(TEMPLATE_CSV);
        assert_eq!(ok.len(), 5);
        assert!(bad.is_empty());
        assert_eq!(ok[0].name, "Ahmad Nugroho");
        assert_eq!(ok[0].class_name, "XII RPL 1");
        assert_eq!(ok[0].nisn, "1234567890");
    }

    #[test]
    fn every_non_blank_row_yields_one_result() {
        let text = "\
Ahmad,XII RPL 1,1234567890

A,XII RPL 1,1234567891
Siti,,1234567892
Budi,XII TKJ 1,12345
Dewi,XII TKJ 2,1234567890
Eko,XII,1234567893,extra
\"Fajar\",\"XII OTKP 1\",\"1234567894\"
";
        let (ok, bad) = collect(text);
        assert_eq!(ok.len() + bad.len(), 7);
        assert_eq!(
            ok.iter().map(|r| r.nisn.as_str()).collect::<Vec<_>>(),
            vec!["1234567890", "1234567894"]
        );

        let problems: Vec<(usize, &RowProblem)> = bad.iter().map(|e| (e.line, &e.problem)).collect();
        assert!(matches!(problems[0], (3, RowProblem::Name(_))));
        assert!(matches!(problems[1], (4, RowProblem::Class(_))));
        assert!(matches!(problems[2], (5, RowProblem::Nisn(_))));
        assert!(matches!(problems[3], (6, RowProblem::DuplicateInFile(n)) if n == "1234567890"));
        assert!(matches!(problems[4], (7, RowProblem::ColumnCount(4))));
    }

    #[test]
    fn header_row_is_skipped_only_first() {
        let text = "name,class,nisn\nAhmad,XII,1234567890\nname,class,nisn\n";
        let (ok, bad) = collect(text);
        assert_eq!(ok.len(), 1);
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].line, 3);
    }

    #[test]
    fn row_errors_name_the_line() {
        let err = RowError {
            line: 4,
            problem: RowProblem::AlreadyRegistered("1234567890".into()),
        };
        assert_eq!(err.to_string(), "Line 4: NISN 1234567890 is already registered");
    }

    #[test]
    fn csv_export_quotes_awkward_fields() {
        let voter = Voter {
            id: "v".into(),
            name: "Nugroho, Ahmad \"Ade\"".into(),
            class_name: "XII RPL 1".into(),
            nisn: "1234567890".into(),
            is_verified: true,
            vote_token: Some("AB12c".into()),
            has_voted: false,
            created_at: now(),
            updated_at: now(),
        };
        let csv = export_csv(&[voter]);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("name,class,nisn,verified,has_voted,token"));
        assert_eq!(
            lines.next(),
            Some("\"Nugroho, Ahmad \"\"Ade\"\"\",XII RPL 1,1234567890,true,false,AB12c")
        );
    }

    #[test]
    fn xlsx_export_produces_a_zip_container() {
        let bytes = export_xlsx(&[]).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn decode_keeps_rows_with_stray_bytes() {
        let text = decode(b"\xef\xbb\xbfJos\xe9 Rizal,XII RPL 1,1234567890\nSiti,XII TKJ 1,1234567891\n");
        let (ok, bad) = collect(&text);
        assert!(bad.is_empty());
        assert_eq!(ok.len(), 2);
        assert_eq!(ok[0].name, "Jos\u{fffd} Rizal");
        assert_eq!(ok[1].nisn, "1234567891");
    }

    #[rocket::async_test]
    async fn import_keeps_good_rows_and_a_second_import_adds_none() {
        let Some(mut db) = test_db::open().await else { return };
        let conn = &mut db.conn;
        let text = "name,class,nisn
Ahmad Nugroho,XII RPL 1,1234567890
Siti Aminah,XII TKJ 1,12345
Budi Santoso,XII OTKP 1,1234567892
Dewi Sartika,XII RPL 2
Eko Prasetyo,XII TKJ 2,1234567892
Rina Wati,XII AKL 1,1234567895
";

        let report = import(conn, text).await.unwrap();
        assert_eq!(report.imported, 3);
        assert_eq!(report.errors.len(), 3);
        assert!(report.errors[0].starts_with("Line 3: "));
        assert_eq!(test_db::voter_rows(conn).await, 3);

        match import(conn, text).await {
            Err(AppError::InvalidRoster(errors)) => {
                assert_eq!(errors.len(), 6);
                let registered = errors.iter().filter(|e| e.ends_with("is already registered"));
                assert_eq!(registered.count(), 3);
            }
            other => panic!("expected InvalidRoster, got {other:?}"),
        }
        assert_eq!(test_db::voter_rows(conn).await, 3);
    }
}
