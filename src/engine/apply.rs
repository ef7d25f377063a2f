//! SQL Applier
//! Replays a dump file statement by statement inside one transaction.

use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use super::database::{Database, DatabaseError, DbConnection};

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Failed to read dump file {0}: {1}")]
    DumpUnreadable(String, std::io::Error),
    #[error("Database unavailable: {0}")]
    Database(#[from] DatabaseError),
    #[error("Transaction failed: {0}")]
    Transaction(#[from] rusqlite::Error),
}

/// Outcome of a single statement. Skips are expected (dropping a table
/// that never existed, schema drift between dump and restore time) and
/// must not abort the rest of the replay.
#[derive(Debug)]
pub enum StatementResult {
    Ok(usize),
    Skipped(String),
}

/// What a replay did, statement by statement.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub executed: usize,
    pub skipped: Vec<(usize, String)>,
}

pub struct SqlApplier<'a> {
    db: &'a Database,
}

impl<'a> SqlApplier<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Apply a dump file. Per-statement failures are logged and skipped;
    /// the transaction commits after every statement has been attempted.
    /// Only a systemic failure (unreadable dump, connection loss, commit
    /// failure) rolls back and propagates.
    pub fn apply_file(&self, dump_path: &Path) -> Result<ApplyReport, ApplyError> {
        let content = fs::read_to_string(dump_path)
            .map_err(|e| ApplyError::DumpUnreadable(dump_path.display().to_string(), e))?;
        self.apply(&content)
    }

    pub fn apply(&self, dump: &str) -> Result<ApplyReport, ApplyError> {
        let statements = split_statements(dump);
        let mut conn = self.db.get_connection()?;

        // SQLite ignores `PRAGMA foreign_keys` inside a transaction, so the
        // pragma lines in the dump itself do nothing. Suspend enforcement on
        // the connection before the transaction opens, and put the previous
        // setting back afterwards.
        let fk_was_on: bool = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        if fk_was_on {
            conn.pragma_update(None, "foreign_keys", false)?;
        }

        let result = replay(&mut conn, &statements);

        if fk_was_on {
            conn.pragma_update(None, "foreign_keys", true).ok();
        }
        result
    }
}

fn replay(conn: &mut DbConnection, statements: &[String]) -> Result<ApplyReport, ApplyError> {
    let mut report = ApplyReport::default();
    // Dropped transactions roll back, so a panic or early return below
    // never leaves a half-applied dump committed.
    let tx = conn.transaction()?;

    for (index, statement) in statements.iter().enumerate() {
        match execute_statement(&tx, statement) {
            StatementResult::Ok(_) => report.executed += 1,
            StatementResult::Skipped(reason) => {
                warn!(statement = index, %reason, "skipping failed dump statement");
                report.skipped.push((index, reason));
            }
        }
    }

    tx.commit()?;
    Ok(report)
}

fn execute_statement(tx: &rusqlite::Transaction<'_>, sql: &str) -> StatementResult {
    match tx.execute(sql, []) {
        Ok(rows) => StatementResult::Ok(rows),
        Err(e) => StatementResult::Skipped(e.to_string()),
    }
}

/// Split a dump into executable statements: comment lines (`--`) are
/// stripped, statements end at a `;` followed by a line break, blanks are
/// discarded.
pub fn split_statements(dump: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in dump.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") {
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
        if trimmed.ends_with(';') {
            let stmt = current.trim().trim_end_matches(';').trim().to_string();
            if !stmt.is_empty() {
                statements.push(stmt);
            }
            current.clear();
        }
    }

    let leftover = current.trim().trim_end_matches(';').trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_strips_comments_and_blanks() {
        let dump = "-- header\nPRAGMA foreign_keys=off;\n\nCREATE TABLE t (\n  id INTEGER\n);\n-- trailing\n;\n";
        let statements = split_statements(dump);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "PRAGMA foreign_keys=off");
        assert!(statements[1].starts_with("CREATE TABLE t"));
    }

    #[test]
    fn test_split_keeps_leftover_without_terminator() {
        let statements = split_statements("INSERT INTO t VALUES (1)");
        assert_eq!(statements, vec!["INSERT INTO t VALUES (1)"]);
    }

    #[test]
    fn test_apply_counts_statements() {
        let db = Database::in_memory().unwrap();
        let dump = "CREATE TABLE t (id INTEGER);\nINSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\n";

        let report = SqlApplier::new(&db).apply(dump).unwrap();
        assert_eq!(report.executed, 3);
        assert!(report.skipped.is_empty());

        let rows = db.fetch_all_rows("t").unwrap();
        assert_eq!(rows.rows.len(), 2);
    }

    #[test]
    fn test_malformed_statement_is_skipped_not_fatal() {
        let db = Database::in_memory().unwrap();
        let dump = "CREATE TABLE t (id INTEGER);\nTHIS IS NOT SQL;\nINSERT INTO t VALUES (1);\n";

        let report = SqlApplier::new(&db).apply(dump).unwrap();
        assert_eq!(report.executed, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, 1);

        // Valid statements around the bad one still committed.
        let rows = db.fetch_all_rows("t").unwrap();
        assert_eq!(rows.rows.len(), 1);
    }

    #[test]
    fn test_replay_succeeds_with_foreign_keys_enabled() {
        let db = Database::in_memory().unwrap();
        db.execute("PRAGMA foreign_keys = ON").unwrap();

        // Dump order references `parent` before it exists; with enforcement
        // live inside the transaction the insert would be rejected.
        let dump = concat!(
            "CREATE TABLE child (id INTEGER, parent_id INTEGER REFERENCES parent(id));\n",
            "INSERT INTO child VALUES (1, 1);\n",
            "CREATE TABLE parent (id INTEGER PRIMARY KEY);\n",
            "INSERT INTO parent VALUES (1);\n",
        );
        let report = SqlApplier::new(&db).apply(dump).unwrap();
        assert_eq!(report.executed, 4);
        assert!(report.skipped.is_empty());

        // Enforcement comes back for ordinary traffic afterwards.
        let conn = db.get_connection().unwrap();
        let fk_on: bool = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert!(fk_on);
    }

    #[test]
    fn test_drop_of_missing_table_is_harmless() {
        let db = Database::in_memory().unwrap();
        // DROP TABLE IF EXISTS never fails; a plain DROP of a missing
        // table is the classic expected skip.
        let dump = "DROP TABLE never_existed;\nCREATE TABLE t (id INTEGER);\n";
        let report = SqlApplier::new(&db).apply(dump).unwrap();
        assert_eq!(report.executed, 1);
        assert_eq!(report.skipped.len(), 1);
    }
}
