//! SQL Dumper
//! Serializes the live schema and data into a replayable statement sequence.

use chrono::Utc;
use rusqlite::types::Value;

use super::database::{escape_ident, Database, DatabaseError};

/// Produces the logical database dump embedded in every archive.
///
/// Statement order matters: the whole sequence is bracketed by a
/// foreign-key-checks disable/enable pair so tables can be recreated in
/// enumeration order, and each table's CREATE precedes its INSERT.
pub struct SqlDumper<'a> {
    db: &'a Database,
}

impl<'a> SqlDumper<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Dump every table in the schema. Fails fast when the database
    /// cannot be reached; the caller decides whether that degrades the
    /// surrounding backup or aborts it.
    pub fn dump(&self) -> Result<String, DatabaseError> {
        let mut out = String::new();
        out.push_str("-- Sitekeeper database dump\n");
        out.push_str(&format!("-- Generated: {}\n", Utc::now().to_rfc3339()));
        out.push_str("PRAGMA foreign_keys=off;\n");

        for table in self.db.list_tables()? {
            let create = self.db.create_statement(&table)?;
            out.push_str(&format!("DROP TABLE IF EXISTS \"{}\";\n", escape_ident(&table)));
            out.push_str(create.trim_end_matches(';'));
            out.push_str(";\n");

            let fetched = self.db.fetch_all_rows(&table)?;
            if fetched.rows.is_empty() {
                continue;
            }

            let mut insert = format!("INSERT INTO \"{}\" VALUES ", escape_ident(&table));
            for (i, row) in fetched.rows.iter().enumerate() {
                if i > 0 {
                    insert.push(',');
                }
                insert.push('(');
                for (j, value) in row.iter().enumerate() {
                    if j > 0 {
                        insert.push(',');
                    }
                    insert.push_str(&quote_value(value));
                }
                insert.push(')');
            }
            insert.push_str(";\n");
            out.push_str(&insert);
        }

        out.push_str("PRAGMA foreign_keys=on;\n");
        Ok(out)
    }
}

/// One consistent scalar representation: NULL as the literal, numbers
/// unquoted, text quoted with doubled quotes and embedded line breaks
/// turned into char(13)/char(10) concatenations (keeps every statement on
/// a single line and round-trips CRLF data byte for byte), blobs as X'…'
/// hex literals.
fn quote_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => {
            if r.is_finite() {
                r.to_string()
            } else {
                "NULL".to_string()
            }
        }
        Value::Text(t) => {
            let escaped = t
                .replace('\'', "''")
                .replace('\r', "'||char(13)||'")
                .replace('\n', "'||char(10)||'");
            format!("'{}'", escaped)
        }
        Value::Blob(b) => format!("X'{}'", hex::encode(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.execute("CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT, score REAL)")
            .unwrap();
        db.execute("INSERT INTO posts VALUES (1, 'first', 0.5)").unwrap();
        db.execute("INSERT INTO posts VALUES (2, NULL, NULL)").unwrap();
        db.execute("CREATE TABLE empty_table (id INTEGER)").unwrap();
        db
    }

    #[test]
    fn test_dump_structure() {
        let db = seeded_db();
        let dump = SqlDumper::new(&db).dump().unwrap();

        assert!(dump.contains("PRAGMA foreign_keys=off;\n"));
        assert!(dump.trim_end().ends_with("PRAGMA foreign_keys=on;"));
        assert!(dump.contains("DROP TABLE IF EXISTS \"posts\";"));
        assert!(dump.contains("CREATE TABLE posts"));
        // Single batched insert, NULL as literal, numbers unquoted.
        assert!(dump.contains("INSERT INTO \"posts\" VALUES (1,'first',0.5),(2,NULL,NULL);"));
        // Empty tables get schema but no insert.
        assert!(dump.contains("DROP TABLE IF EXISTS \"empty_table\";"));
        assert!(!dump.contains("INSERT INTO \"empty_table\""));
    }

    #[test]
    fn test_quote_embedded_quote_and_line_breaks() {
        assert_eq!(quote_value(&Value::Text("it's".into())), "'it''s'");
        assert_eq!(
            quote_value(&Value::Text("a\nb".into())),
            "'a'||char(10)||'b'"
        );
        assert_eq!(
            quote_value(&Value::Text("a\r\nb".into())),
            "'a'||char(13)||''||char(10)||'b'"
        );
    }

    #[test]
    fn test_quote_blob() {
        assert_eq!(quote_value(&Value::Blob(vec![0xde, 0xad])), "X'dead'");
    }

    #[test]
    fn test_dump_replays_onto_empty_schema() {
        let db = seeded_db();
        db.execute("INSERT INTO posts VALUES (3, 'multi\nline', 1.0)")
            .unwrap();
        db.execute("INSERT INTO posts VALUES (4, 'dos' || char(13) || char(10) || 'text', 2.0)")
            .unwrap();
        let dump = SqlDumper::new(&db).dump().unwrap();

        let target = Database::in_memory().unwrap();
        let conn = target.get_connection().unwrap();
        conn.execute_batch(&dump).unwrap();
        // Return the sole pooled connection so fetch_all_rows can acquire it.
        drop(conn);

        let fetched = target.fetch_all_rows("posts").unwrap();
        assert_eq!(fetched.rows.len(), 4);
        assert_eq!(fetched.rows[2][1], Value::Text("multi\nline".into()));
        assert_eq!(fetched.rows[3][1], Value::Text("dos\r\ntext".into()));
    }
}
