use crate::error::{RebateError, Result};
use crate::model::{IntervalKey, RebateInterval, Student};
use crate::store::{CodeAssignment, IntervalFilter, IntervalStore};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

const MANDATORY_INSERT_TRIGGER: &str = "rebates_gate_pass_required_insert";

/// SQLite-backed rebate store
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a database file and make sure the schema exists
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        setup_database(&conn)?;
        info!(path = %path.display(), "opened rebate database");
        Ok(SqliteStore { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ========================================================================
    // STUDENTS
    // ========================================================================

    /// Returns false when the roll number already existed (insert ignored)
    pub fn insert_student(&self, student: &Student) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO students (roll_no, name, mobile_no, email, branch, batch)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                student.roll_no,
                student.name,
                student.mobile_no,
                student.email,
                student.branch,
                student.batch,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn existing_roll_nos(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT roll_no FROM students")?;
        let roll_nos = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<HashSet<String>, _>>()?;
        Ok(roll_nos)
    }

    pub fn get_student(&self, roll_no: &str) -> Result<Option<Student>> {
        let student = self
            .conn
            .query_row(
                "SELECT roll_no, name, mobile_no, email, branch, batch
                 FROM students WHERE roll_no = ?1",
                [roll_no],
                |row| {
                    Ok(Student {
                        roll_no: row.get(0)?,
                        name: row.get(1)?,
                        mobile_no: row.get(2)?,
                        email: row.get(3)?,
                        branch: row.get(4)?,
                        batch: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(student)
    }

    pub fn student_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases keep "memory")
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Students (roster, written once by import)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students (
            roll_no TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            mobile_no TEXT,
            email TEXT,
            branch TEXT,
            batch INTEGER
        )",
        [],
    )?;

    // ==========================================================================
    // Rebates: identity is (roll_no, start_date), gate pass unique when set
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS rebates (
            roll_no TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            rebate_days INTEGER NOT NULL,
            gate_pass_no TEXT UNIQUE,
            PRIMARY KEY (roll_no, start_date)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rebates_roll_no ON rebates(roll_no)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rebates_start_date ON rebates(start_date)",
        [],
    )?;

    Ok(())
}

/// WHERE clause plus its (at most one) bound parameter
fn filter_clause(filter: &IntervalFilter) -> (&'static str, Option<Value>) {
    match filter {
        IntervalFilter::All => ("1 = 1", None),
        IntervalFilter::MissingCode => ("gate_pass_no IS NULL", None),
        IntervalFilter::HasCode => ("gate_pass_no IS NOT NULL", None),
        IntervalFilter::StartsAfter(date) => (
            "start_date > ?1",
            Some(Value::Text(date.format("%Y-%m-%d").to_string())),
        ),
        IntervalFilter::RollNo(roll_no) => ("roll_no = ?1", Some(Value::Text(roll_no.clone()))),
    }
}

fn interval_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RebateInterval> {
    Ok(RebateInterval {
        roll_no: row.get(0)?,
        start_date: row.get(1)?,
        end_date: row.get(2)?,
        gate_pass_code: row.get(3)?,
    })
}

impl IntervalStore for SqliteStore {
    fn list_intervals(&self, roll_no: &str) -> Result<Vec<RebateInterval>> {
        let mut stmt = self.conn.prepare(
            "SELECT roll_no, start_date, end_date, gate_pass_no
             FROM rebates
             WHERE roll_no = ?1
             ORDER BY start_date",
        )?;
        let intervals = stmt
            .query_map([roll_no], interval_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(intervals)
    }

    fn list_all_intervals(&self) -> Result<Vec<RebateInterval>> {
        let mut stmt = self.conn.prepare(
            "SELECT roll_no, start_date, end_date, gate_pass_no
             FROM rebates
             ORDER BY roll_no, start_date",
        )?;
        let intervals = stmt
            .query_map([], interval_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(intervals)
    }

    fn roll_nos_by_batch(&self) -> Result<BTreeMap<i32, Vec<String>>> {
        let mut stmt = self.conn.prepare(
            "SELECT roll_no, batch FROM students
             WHERE batch IS NOT NULL
             ORDER BY batch, roll_no",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i32>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut by_batch: BTreeMap<i32, Vec<String>> = BTreeMap::new();
        for (roll_no, batch) in rows {
            by_batch.entry(batch).or_default().push(roll_no);
        }
        Ok(by_batch)
    }

    fn bulk_insert(&mut self, intervals: &[RebateInterval]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO rebates (roll_no, start_date, end_date, rebate_days, gate_pass_no)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for interval in intervals {
                inserted += stmt.execute(params![
                    interval.roll_no,
                    interval.start_date,
                    interval.end_date,
                    interval.rebate_days(),
                    interval.gate_pass_code,
                ])?;
            }
        }
        tx.commit()?;
        debug!(requested = intervals.len(), inserted, "bulk insert committed");
        Ok(inserted)
    }

    fn bulk_delete(&mut self, keys: &[IntervalKey]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt =
                tx.prepare("DELETE FROM rebates WHERE roll_no = ?1 AND start_date = ?2")?;
            for key in keys {
                deleted += stmt.execute(params![key.roll_no, key.start_date])?;
            }
        }
        tx.commit()?;
        debug!(requested = keys.len(), deleted, "bulk delete committed");
        Ok(deleted)
    }

    fn list_missing_code(&self, limit: usize) -> Result<Vec<IntervalKey>> {
        let mut stmt = self.conn.prepare(
            "SELECT roll_no, start_date FROM rebates
             WHERE gate_pass_no IS NULL
             ORDER BY roll_no, start_date
             LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let keys = stmt
            .query_map([limit], |row| {
                Ok(IntervalKey {
                    roll_no: row.get(0)?,
                    start_date: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn list_used_codes(&self) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT gate_pass_no FROM rebates WHERE gate_pass_no IS NOT NULL")?;
        let codes = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<HashSet<String>, _>>()?;
        Ok(codes)
    }

    fn assign_codes(&mut self, assignments: &[CodeAssignment]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut updated = 0;
        {
            // OR IGNORE: a code taken meanwhile rejects that row only
            let mut stmt = tx.prepare(
                "UPDATE OR IGNORE rebates SET gate_pass_no = ?1
                 WHERE roll_no = ?2 AND start_date = ?3 AND gate_pass_no IS NULL",
            )?;
            for assignment in assignments {
                updated += stmt.execute(params![
                    assignment.code,
                    assignment.key.roll_no,
                    assignment.key.start_date,
                ])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    fn count_where(&self, filter: &IntervalFilter) -> Result<usize> {
        let (clause, param) = filter_clause(filter);
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM rebates WHERE {}", clause),
            params_from_iter(param),
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn delete_where(&mut self, filter: &IntervalFilter) -> Result<usize> {
        let (clause, param) = filter_clause(filter);
        let tx = self.conn.transaction()?;
        let deleted = tx.execute(
            &format!("DELETE FROM rebates WHERE {}", clause),
            params_from_iter(param),
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    fn mandatory_code_enabled(&self) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'trigger' AND name = ?1",
            [MANDATORY_INSERT_TRIGGER],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn enable_mandatory_code(&mut self) -> Result<bool> {
        if self.mandatory_code_enabled()? {
            return Ok(false);
        }

        let tx = self.conn.transaction()?;
        let missing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM rebates WHERE gate_pass_no IS NULL",
            [],
            |row| row.get(0),
        )?;
        if missing > 0 {
            return Err(RebateError::constraint(
                "rebates.gate_pass_no",
                format!("{} rebates still have no gate pass number", missing),
            ));
        }

        // SQLite cannot add NOT NULL to an existing column; triggers enforce it
        tx.execute_batch(
            "CREATE TRIGGER IF NOT EXISTS rebates_gate_pass_required_insert
             BEFORE INSERT ON rebates
             WHEN NEW.gate_pass_no IS NULL
             BEGIN
                 SELECT RAISE(ABORT, 'gate_pass_no is required');
             END;
             CREATE TRIGGER IF NOT EXISTS rebates_gate_pass_required_update
             BEFORE UPDATE OF gate_pass_no ON rebates
             WHEN NEW.gate_pass_no IS NULL
             BEGIN
                 SELECT RAISE(ABORT, 'gate_pass_no is required');
             END;",
        )?;
        tx.commit()?;
        info!("gate pass number is now mandatory for every rebate");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DateRange;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn rebate(roll_no: &str, start: NaiveDate, end: NaiveDate) -> RebateInterval {
        RebateInterval::new(roll_no, DateRange::new(start, end).unwrap())
    }

    fn student(roll_no: &str, batch: Option<i32>) -> Student {
        Student {
            roll_no: roll_no.to_string(),
            name: format!("Student {}", roll_no),
            mobile_no: None,
            email: None,
            branch: Some("CSE".to_string()),
            batch,
        }
    }

    #[test]
    fn test_bulk_insert_ignores_duplicate_keys() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        let rebates = vec![
            rebate("A1", d(2024, 1, 1), d(2024, 1, 10)),
            rebate("A1", d(2024, 2, 1), d(2024, 2, 3)),
        ];

        let first = store.bulk_insert(&rebates).unwrap();
        let second = store.bulk_insert(&rebates).unwrap();

        assert_eq!(first, 2);
        assert_eq!(second, 0, "Second insert should be a no-op");
        assert_eq!(store.count_where(&IntervalFilter::All).unwrap(), 2);
    }

    #[test]
    fn test_list_intervals_ordered_with_derived_days() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .bulk_insert(&[
                rebate("A1", d(2024, 3, 1), d(2024, 3, 2)),
                rebate("A1", d(2024, 1, 1), d(2024, 1, 10)),
                rebate("B2", d(2024, 1, 1), d(2024, 1, 1)),
            ])
            .unwrap();

        let listed = store.list_intervals("A1").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].start_date, d(2024, 1, 1));
        assert_eq!(listed[1].start_date, d(2024, 3, 1));

        let days: i64 = store
            .connection()
            .query_row(
                "SELECT rebate_days FROM rebates WHERE roll_no = 'A1' AND start_date = '2024-01-01'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(days, 10);
    }

    #[test]
    fn test_roll_nos_grouped_by_batch() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_student(&student("23B002", Some(2023))).unwrap();
        store.insert_student(&student("22B001", Some(2022))).unwrap();
        store.insert_student(&student("23B001", Some(2023))).unwrap();
        store.insert_student(&student("XX", None)).unwrap();

        let by_batch = store.roll_nos_by_batch().unwrap();
        assert_eq!(by_batch.len(), 2);
        assert_eq!(by_batch[&2022], vec!["22B001".to_string()]);
        assert_eq!(by_batch[&2023], vec!["23B001".to_string(), "23B002".to_string()]);
    }

    #[test]
    fn test_assign_codes_only_touches_uncoded_rows() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .bulk_insert(&[
                rebate("A1", d(2024, 1, 1), d(2024, 1, 2)),
                rebate("A2", d(2024, 1, 1), d(2024, 1, 2)),
            ])
            .unwrap();

        let first = vec![CodeAssignment {
            key: IntervalKey::new("A1", d(2024, 1, 1)),
            code: "B-0001".to_string(),
        }];
        assert_eq!(store.assign_codes(&first).unwrap(), 1);

        // Already coded row keeps its code
        let overwrite = vec![CodeAssignment {
            key: IntervalKey::new("A1", d(2024, 1, 1)),
            code: "B-0002".to_string(),
        }];
        assert_eq!(store.assign_codes(&overwrite).unwrap(), 0);

        // Code already taken by another row is rejected, not fatal
        let collide = vec![CodeAssignment {
            key: IntervalKey::new("A2", d(2024, 1, 1)),
            code: "B-0001".to_string(),
        }];
        assert_eq!(store.assign_codes(&collide).unwrap(), 0);

        let used = store.list_used_codes().unwrap();
        assert_eq!(used.len(), 1);
        assert!(used.contains("B-0001"));
        assert_eq!(store.list_missing_code(10).unwrap(), vec![IntervalKey::new("A2", d(2024, 1, 1))]);
    }

    #[test]
    fn test_count_and_delete_after_cutoff() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .bulk_insert(&[
                rebate("A1", d(2025, 4, 30), d(2025, 5, 2)),
                rebate("A1", d(2025, 5, 1), d(2025, 5, 3)),
                rebate("A2", d(2025, 6, 1), d(2025, 6, 3)),
            ])
            .unwrap();

        let filter = IntervalFilter::StartsAfter(d(2025, 4, 30));
        assert_eq!(store.count_where(&filter).unwrap(), 2);
        assert_eq!(store.delete_where(&filter).unwrap(), 2);
        assert_eq!(store.count_where(&IntervalFilter::All).unwrap(), 1);
    }

    #[test]
    fn test_mandatory_code_guarded_and_idempotent() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .bulk_insert(&[rebate("A1", d(2024, 1, 1), d(2024, 1, 2))])
            .unwrap();

        let refused = store.enable_mandatory_code();
        assert!(matches!(refused, Err(RebateError::ConstraintViolation { .. })));
        assert!(!store.mandatory_code_enabled().unwrap());

        store
            .assign_codes(&[CodeAssignment {
                key: IntervalKey::new("A1", d(2024, 1, 1)),
                code: "B-0001".to_string(),
            }])
            .unwrap();

        assert!(store.enable_mandatory_code().unwrap());
        assert!(!store.enable_mandatory_code().unwrap(), "Second enable is a no-op");

        // Codeless rows can no longer be written
        let blocked = store.bulk_insert(&[rebate("A2", d(2024, 1, 1), d(2024, 1, 2))]);
        assert!(blocked.is_err());
        assert_eq!(store.count_where(&IntervalFilter::All).unwrap(), 1);
    }
}
