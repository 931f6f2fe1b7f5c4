// 👥 Roster import - load students from a CSV export
//
// Expected headers: Roll No, Name, Phone Number, Email, Branch, Batch.
// Empty cells and spreadsheet "nan" values count as missing. Rows without a
// roll number or name are recorded as failures; the import keeps going.

use crate::db::SqliteStore;
use crate::error::{RebateError, Result};
use crate::model::Student;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct RosterRow {
    #[serde(rename = "Roll No", default)]
    roll_no: Option<String>,

    #[serde(rename = "Name", default)]
    name: Option<String>,

    #[serde(rename = "Phone Number", default)]
    mobile_no: Option<String>,

    #[serde(rename = "Email", default)]
    email: Option<String>,

    #[serde(rename = "Branch", default)]
    branch: Option<String>,

    #[serde(rename = "Batch", default)]
    batch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportFailure {
    /// CSV line (header is line 1)
    pub line: usize,
    pub roll_no: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RosterReport {
    pub initial_count: usize,
    pub final_count: usize,
    pub added: Vec<String>,
    pub skipped: Vec<String>,
    pub failures: Vec<ImportFailure>,
}

impl RosterReport {
    pub fn summary(&self) -> String {
        format!(
            "{} students in database (was {}): {} added, {} already present, {} failed",
            self.final_count,
            self.initial_count,
            self.added.len(),
            self.skipped.len(),
            self.failures.len()
        )
    }
}

/// "", whitespace and any-case "nan" are treated as absent
fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("nan"))
}

/// Accepts "2023" as well as spreadsheet-style "2023.0"
fn parse_batch(raw: &str) -> Option<i32> {
    if let Ok(year) = raw.parse::<i32>() {
        return Some(year);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.fract() == 0.0 && v.is_finite())
        .map(|v| v as i32)
}

fn validate_row(row: RosterRow, line: usize) -> Result<Student> {
    let roll_no = clean(row.roll_no);
    let name = clean(row.name);

    let (roll_no, name) = match (roll_no, name) {
        (Some(roll_no), Some(name)) => (roll_no, name),
        (roll_no, _) => {
            return Err(RebateError::validation(
                roll_no.unwrap_or_else(|| format!("line {}", line)),
                "missing roll_no or name",
            ))
        }
    };

    let batch = match clean(row.batch) {
        Some(raw) => Some(parse_batch(&raw).ok_or_else(|| {
            RebateError::validation(roll_no.clone(), format!("invalid batch '{}'", raw))
        })?),
        None => None,
    };

    Ok(Student {
        roll_no,
        name,
        mobile_no: clean(row.mobile_no),
        email: clean(row.email),
        branch: clean(row.branch),
        batch,
    })
}

pub fn import_roster(store: &SqliteStore, csv_path: &Path) -> Result<RosterReport> {
    let file = File::open(csv_path)?;
    info!(path = %csv_path.display(), "importing roster");
    import_roster_from_reader(store, file)
}

pub fn import_roster_from_reader<R: Read>(store: &SqliteStore, reader: R) -> Result<RosterReport> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut existing = store.existing_roll_nos()?;

    let mut report = RosterReport {
        initial_count: store.student_count()?,
        ..RosterReport::default()
    };

    // Whole file in one transaction
    let tx = store.connection().unchecked_transaction()?;

    for (index, result) in rdr.deserialize::<RosterRow>().enumerate() {
        let line = index + 2;
        let row = match result {
            Ok(row) => row,
            Err(err) => {
                debug!(line, error = %err, "unreadable roster row");
                report.failures.push(ImportFailure {
                    line,
                    roll_no: None,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        let student = match validate_row(row, line) {
            Ok(student) => student,
            Err(err) if err.is_recoverable() => {
                let roll_no = match &err {
                    RebateError::Validation { record, .. } if !record.starts_with("line ") => {
                        Some(record.clone())
                    }
                    _ => None,
                };
                debug!(line, error = %err, "roster row rejected");
                report.failures.push(ImportFailure {
                    line,
                    roll_no,
                    reason: err.to_string(),
                });
                continue;
            }
            Err(err) => return Err(err),
        };

        if existing.contains(&student.roll_no) {
            report.skipped.push(student.roll_no);
            continue;
        }

        if store.insert_student(&student)? {
            existing.insert(student.roll_no.clone());
            report.added.push(student.roll_no);
        } else {
            report.failures.push(ImportFailure {
                line,
                roll_no: Some(student.roll_no),
                reason: "insert ignored (duplicate or constraint)".to_string(),
            });
        }
    }

    tx.commit()?;
    report.final_count = store.student_count()?;
    info!(
        added = report.added.len(),
        skipped = report.skipped.len(),
        failed = report.failures.len(),
        "roster import finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IntervalStore;
    use std::io::Write;

    const ROSTER: &str = "\
Roll No,Name,Phone Number,Email,Branch,Batch
23B001,Asha Rao,9876543210,asha@example.edu,CSE,2023
23B002,Vikram Shah,nan,,ECE,2023.0
,Nameless,123,,ME,2023
22B010,nan,555,,CE,2022
22B011,Meera Iyer,,,CE,twenty
24B001,Kabir Das,,,EE,
";

    #[test]
    fn test_import_collects_failures_and_continues() {
        let store = SqliteStore::open_in_memory().unwrap();

        let report = import_roster_from_reader(&store, ROSTER.as_bytes()).unwrap();

        println!("{}", report.summary());
        assert_eq!(report.initial_count, 0);
        assert_eq!(report.added, vec!["23B001", "23B002", "24B001"]);
        assert_eq!(report.failures.len(), 3);
        assert_eq!(report.failures[0].line, 4);
        assert_eq!(report.failures[0].roll_no, None);
        assert_eq!(report.failures[1].roll_no.as_deref(), Some("22B010"));
        assert!(report.failures[2].reason.contains("invalid batch"));
        assert_eq!(report.final_count, 3);

        let vikram = store.get_student("23B002").unwrap().unwrap();
        assert_eq!(vikram.batch, Some(2023));
        assert_eq!(vikram.mobile_no, None);
        assert_eq!(vikram.email, None);

        let kabir = store.get_student("24B001").unwrap().unwrap();
        assert_eq!(kabir.batch, None);
    }

    #[test]
    fn test_reimport_skips_existing_students() {
        let store = SqliteStore::open_in_memory().unwrap();
        import_roster_from_reader(&store, ROSTER.as_bytes()).unwrap();

        let second = import_roster_from_reader(&store, ROSTER.as_bytes()).unwrap();

        assert!(second.added.is_empty());
        assert_eq!(second.skipped.len(), 3);
        assert_eq!(second.initial_count, 3);
        assert_eq!(second.final_count, 3);
    }

    #[test]
    fn test_malformed_row_does_not_stop_import() {
        let store = SqliteStore::open_in_memory().unwrap();
        let csv = "\
Roll No,Name,Phone Number,Email,Branch,Batch
23B001,Asha Rao,,,CSE,2023
23B002,Short
23B003,Ravi Kumar,,,ME,2023
";

        let report = import_roster_from_reader(&store, csv.as_bytes()).unwrap();

        println!("{:?}", report.failures);
        assert_eq!(report.added, vec!["23B001", "23B003"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].line, 3);
        assert_eq!(report.failures[0].roll_no, None);
        assert_eq!(report.final_count, 2);
        assert!(store.get_student("23B003").unwrap().is_some());
    }

    #[test]
    fn test_import_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ROSTER.as_bytes()).unwrap();
        let store = SqliteStore::open_in_memory().unwrap();

        let report = import_roster(&store, file.path()).unwrap();

        assert_eq!(report.added.len(), 3);
        // 24B001 has no batch and stays out of the batch grouping
        assert_eq!(store.roll_nos_by_batch().unwrap().len(), 1);
    }
}
