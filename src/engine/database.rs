//! Sitekeeper Database Module
//! SQLite collaborator with connection pooling

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use std::path::Path;
use thiserror::Error;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to create database pool: {0}")]
    PoolError(#[from] r2d2::Error),
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
    #[error("Database file not found: {0}")]
    NotFound(String),
}

#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

/// One fetched table: column names plus every row as engine-typed values,
/// in fetch order.
#[derive(Debug)]
pub struct TableRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder().max_size(10).build(manager)?;
        Ok(Self { pool })
    }

    /// Open an existing database only; restoring into a path that does not
    /// exist yet is still allowed through `new`.
    pub fn open_existing(db_path: &Path) -> Result<Self, DatabaseError> {
        if !db_path.exists() {
            return Err(DatabaseError::NotFound(db_path.display().to_string()));
        }
        Self::new(db_path)
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        Ok(Self { pool })
    }

    pub fn get_connection(&self) -> Result<DbConnection, DatabaseError> {
        Ok(self.pool.get()?)
    }

    /// All user tables in the schema, in enumeration order.
    pub fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let tables = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tables)
    }

    /// The CREATE TABLE statement as reported by the engine.
    pub fn create_statement(&self, table: &str) -> Result<String, DatabaseError> {
        let conn = self.get_connection()?;
        let sql: String = conn.query_row(
            "SELECT sql FROM sqlite_master WHERE type='table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(sql)
    }

    /// Full-table scan returning every row with engine-typed values.
    pub fn fetch_all_rows(&self, table: &str) -> Result<TableRows, DatabaseError> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!("SELECT * FROM \"{}\"", escape_ident(table)))?;
        let columns: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|c| c.to_string())
            .collect();

        let column_count = columns.len();
        let rows = stmt
            .query_map([], |row| {
                let mut values = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    values.push(row.get::<_, Value>(i)?);
                }
                Ok(values)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TableRows { columns, rows })
    }

    pub fn execute(&self, sql: &str) -> Result<usize, DatabaseError> {
        let conn = self.get_connection()?;
        Ok(conn.execute(sql, [])?)
    }
}

/// Double embedded quotes so a table name is safe inside `"…"`.
pub(crate) fn escape_ident(ident: &str) -> String {
    ident.replace('"', "\"\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_tables() {
        let db = Database::in_memory().unwrap();
        db.execute("CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT)")
            .unwrap();
        db.execute("CREATE TABLE authors (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();

        let tables = db.list_tables().unwrap();
        assert_eq!(tables, vec!["authors", "posts"]);
    }

    #[test]
    fn test_create_statement() {
        let db = Database::in_memory().unwrap();
        db.execute("CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT)")
            .unwrap();

        let sql = db.create_statement("posts").unwrap();
        assert!(sql.starts_with("CREATE TABLE"));
        assert!(sql.contains("title"));
    }

    #[test]
    fn test_fetch_all_rows() {
        let db = Database::in_memory().unwrap();
        db.execute("CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT)")
            .unwrap();
        db.execute("INSERT INTO posts (id, title) VALUES (1, 'hello')")
            .unwrap();
        db.execute("INSERT INTO posts (id, title) VALUES (2, NULL)")
            .unwrap();

        let fetched = db.fetch_all_rows("posts").unwrap();
        assert_eq!(fetched.columns, vec!["id", "title"]);
        assert_eq!(fetched.rows.len(), 2);
        assert_eq!(fetched.rows[0][0], Value::Integer(1));
        assert_eq!(fetched.rows[1][1], Value::Null);
    }

    #[test]
    fn test_open_existing_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = Database::open_existing(&dir.path().join("nope.db"));
        assert!(matches!(result, Err(DatabaseError::NotFound(_))));
    }
}
