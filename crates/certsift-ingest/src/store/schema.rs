//! Schema for the domains table.
//!
//! Initialization is forward-compatible: the table is created if missing
//! and any expected column absent from an existing database is added
//! additively, so older database files keep working across upgrades.

use rusqlite::{Connection, Result};

/// Columns the current code expects, with the declarations used when one
/// has to be added to an existing table.
const EXPECTED_COLUMNS: &[(&str, &str)] = &[
    ("domain", "TEXT NOT NULL UNIQUE"),
    ("is_apex", "BOOLEAN NOT NULL DEFAULT 0"),
    ("parent_domain", "TEXT"),
    ("not_before", "INTEGER"),
    ("not_after", "INTEGER"),
    ("serial_number", "TEXT"),
    ("fingerprint", "TEXT"),
    ("key_usage", "TEXT"),
    ("extended_key_usage", "TEXT"),
    ("subject_key_id", "TEXT"),
    ("authority_key_id", "TEXT"),
    ("authority_info", "TEXT"),
    ("subject_alt_name", "TEXT"),
    ("certificate_policies", "TEXT"),
    ("wildcard", "BOOLEAN"),
];

/// Initialize the database schema.
///
/// Creates the table and indexes if they don't exist and adds any missing
/// columns.
pub fn init_schema(conn: &Connection) -> Result<()> {
    create_table(conn)?;
    add_missing_columns(conn)?;
    create_indexes(conn)?;
    Ok(())
}

fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS domains (
            id INTEGER PRIMARY KEY,
            domain TEXT NOT NULL UNIQUE,
            is_apex BOOLEAN NOT NULL DEFAULT 0,
            parent_domain TEXT,
            not_before INTEGER,
            not_after INTEGER,
            serial_number TEXT,
            fingerprint TEXT,
            key_usage TEXT,
            extended_key_usage TEXT,
            subject_key_id TEXT,
            authority_key_id TEXT,
            authority_info TEXT,
            subject_alt_name TEXT,
            certificate_policies TEXT,
            wildcard BOOLEAN
        );
        "#,
    )
}

/// Add any expected column missing from an existing table.
fn add_missing_columns(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(domains)")?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<_>>()?;

    for (name, decl) in EXPECTED_COLUMNS {
        if !existing.iter().any(|c| c == name) {
            tracing::info!(column = name, "adding missing column to domains table");
            // ALTER TABLE cannot add a UNIQUE column; the constraint only
            // matters for fresh tables, which get it from CREATE TABLE.
            let decl = decl.trim_end_matches(" UNIQUE");
            conn.execute(
                &format!("ALTER TABLE domains ADD COLUMN {name} {decl}"),
                [],
            )?;
        }
    }

    Ok(())
}

fn create_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_domains_parent ON domains(parent_domain);
        "#,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn column_names(conn: &Connection) -> Vec<String> {
        conn.prepare("PRAGMA table_info(domains)")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap()
    }

    #[test]
    fn fresh_database_has_all_columns() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let columns = column_names(&conn);
        for (name, _) in EXPECTED_COLUMNS {
            assert!(columns.iter().any(|c| c == name), "missing column {name}");
        }
    }

    #[test]
    fn init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn old_table_gains_missing_columns() {
        let conn = Connection::open_in_memory().unwrap();
        // A database from before parent_domain and wildcard existed.
        conn.execute_batch(
            "CREATE TABLE domains (
                id INTEGER PRIMARY KEY,
                domain TEXT NOT NULL UNIQUE,
                is_apex BOOLEAN NOT NULL DEFAULT 0,
                not_before INTEGER,
                not_after INTEGER
            );",
        )
        .unwrap();

        init_schema(&conn).unwrap();

        let columns = column_names(&conn);
        assert!(columns.iter().any(|c| c == "parent_domain"));
        assert!(columns.iter().any(|c| c == "wildcard"));
        assert!(columns.iter().any(|c| c == "certificate_policies"));
    }

    #[test]
    fn domain_uniqueness_is_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        conn.execute("INSERT INTO domains (domain) VALUES ('example.com')", [])
            .unwrap();
        let err = conn.execute("INSERT INTO domains (domain) VALUES ('example.com')", []);
        assert!(err.is_err());
    }
}
