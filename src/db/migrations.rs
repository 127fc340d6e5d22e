use anyhow::{Result, bail};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

pub const SCHEMA_VERSION: i64 = 2;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            origin TEXT NOT NULL,
            hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            modified INTEGER NOT NULL,
            package TEXT NOT NULL DEFAULT '',
            wildcard_imports TEXT NOT NULL DEFAULT '[]',
            content TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_files_name ON files(name);

        CREATE TABLE IF NOT EXISTS declarations (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL,
            qualname TEXT NOT NULL,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            modifiers TEXT NOT NULL,
            package TEXT NOT NULL,
            superclass TEXT,
            interfaces TEXT NOT NULL,
            annotations TEXT NOT NULL,
            outer TEXT,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            start_byte INTEGER NOT NULL,
            end_byte INTEGER NOT NULL,
            FOREIGN KEY(file_id) REFERENCES files(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_declarations_name ON declarations(name);
        CREATE INDEX IF NOT EXISTS idx_declarations_qualname ON declarations(qualname);
        CREATE INDEX IF NOT EXISTS idx_declarations_file ON declarations(file_id);
        CREATE INDEX IF NOT EXISTS idx_declarations_outer ON declarations(outer);

        CREATE TABLE IF NOT EXISTS members (
            id INTEGER PRIMARY KEY,
            decl_id INTEGER NOT NULL,
            file_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            ty TEXT,
            modifiers TEXT NOT NULL,
            params TEXT NOT NULL,
            throws TEXT NOT NULL,
            annotations TEXT NOT NULL,
            has_body INTEGER NOT NULL,
            has_initializer INTEGER NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            start_byte INTEGER NOT NULL,
            end_byte INTEGER NOT NULL,
            FOREIGN KEY(decl_id) REFERENCES declarations(id) ON DELETE CASCADE,
            FOREIGN KEY(file_id) REFERENCES files(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_members_decl ON members(decl_id);
        CREATE INDEX IF NOT EXISTS idx_members_file ON members(file_id);

        CREATE TABLE IF NOT EXISTS refs (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            arg_count INTEGER,
            receiver TEXT NOT NULL,
            receiver_type TEXT,
            receiver_chain TEXT,
            caller_class TEXT,
            line INTEGER NOT NULL,
            start_byte INTEGER NOT NULL,
            end_byte INTEGER NOT NULL,
            call_text TEXT,
            FOREIGN KEY(file_id) REFERENCES files(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_refs_name ON refs(name);
        CREATE INDEX IF NOT EXISTS idx_refs_file ON refs(file_id);

        CREATE TABLE IF NOT EXISTS markers (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL,
            severity TEXT NOT NULL,
            line INTEGER NOT NULL,
            start_byte INTEGER NOT NULL,
            end_byte INTEGER NOT NULL,
            message TEXT NOT NULL,
            FOREIGN KEY(file_id) REFERENCES files(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_markers_file ON markers(file_id);
        COMMIT;
        ",
    )?;

    let current: Option<i64> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .and_then(|value| value.parse().ok());

    match current {
        None => {
            conn.execute(
                "INSERT INTO meta(key, value) VALUES('schema_version', ?1)",
                params![SCHEMA_VERSION.to_string()],
            )?;
            info!(version = SCHEMA_VERSION, "initialized index schema");
        }
        Some(version) if version > SCHEMA_VERSION => {
            bail!(
                "index schema version {version} is newer than supported version {SCHEMA_VERSION}; delete the index to rebuild"
            );
        }
        Some(1) => {
            migrate_v1_to_v2(conn)?;
        }
        Some(_) => {}
    }

    Ok(())
}

/// Adds receiver chains. Stored hashes are cleared so every file is
/// re-extracted on the next sync.
fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;
        ALTER TABLE refs ADD COLUMN receiver_chain TEXT;
        UPDATE files SET hash = '';
        UPDATE meta SET value = '2' WHERE key = 'schema_version';
        COMMIT;
        ",
    )?;
    info!(from = 1, to = 2, "migrated index schema");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_one_index_gains_receiver_chains() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
            INSERT INTO meta(key, value) VALUES('schema_version', '1');
            CREATE TABLE files (
                id INTEGER PRIMARY KEY,
                path TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                origin TEXT NOT NULL,
                hash TEXT NOT NULL,
                size INTEGER NOT NULL,
                modified INTEGER NOT NULL,
                package TEXT NOT NULL DEFAULT '',
                wildcard_imports TEXT NOT NULL DEFAULT '[]',
                content TEXT NOT NULL
            );
            INSERT INTO files(path, name, origin, hash, size, modified, content)
                VALUES('A.java', 'A.java', 'project', 'abc', 1, 1, '');
            CREATE TABLE refs (
                id INTEGER PRIMARY KEY,
                file_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                arg_count INTEGER,
                receiver TEXT NOT NULL,
                receiver_type TEXT,
                caller_class TEXT,
                line INTEGER NOT NULL,
                start_byte INTEGER NOT NULL,
                end_byte INTEGER NOT NULL,
                call_text TEXT
            );
            ",
        )
        .unwrap();

        migrate(&conn).unwrap();
        migrate(&conn).unwrap();

        let version: String = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION.to_string());
        let hash: String = conn
            .query_row("SELECT hash FROM files WHERE path = 'A.java'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(hash.is_empty());
        assert!(conn.prepare("SELECT receiver_chain FROM refs").is_ok());
    }
}
