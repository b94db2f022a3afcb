use anyhow::Result;
use rusqlite::Connection;
use std::collections::HashSet;

type Migration = (i64, &'static str);

fn migrations() -> Vec<Migration> {
    vec![
        (
            1,
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                synopsis TEXT NOT NULL DEFAULT '',
                genre TEXT NOT NULL DEFAULT '',
                style TEXT NOT NULL DEFAULT '',
                aspect_ratio TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chapters (
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                chapter_index INTEGER NOT NULL,
                volume INTEGER NOT NULL DEFAULT 1,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                PRIMARY KEY (project_id, chapter_index)
            );
            "#,
        ),
        (
            2,
            r#"
            CREATE TABLE IF NOT EXISTS storylines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL UNIQUE REFERENCES projects(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS outlines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                episode INTEGER NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (project_id, episode)
            );

            CREATE TABLE IF NOT EXISTS scripts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                outline_id INTEGER NOT NULL UNIQUE REFERENCES outlines(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_outlines_project_episode ON outlines(project_id, episode);
            CREATE INDEX IF NOT EXISTS idx_scripts_project ON scripts(project_id);
            "#,
        ),
        (
            3,
            r#"
            CREATE TABLE IF NOT EXISTS assets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                UNIQUE (project_id, kind, name)
            );
            "#,
        ),
        (
            4,
            r#"
            CREATE TABLE IF NOT EXISTS prompt_templates (
                code TEXT PRIMARY KEY,
                custom_value TEXT,
                default_value TEXT
            );
            "#,
        ),
    ]
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS __schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )?;

    let mut stmt = conn.prepare("SELECT version FROM __schema_version")?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
    let mut applied = HashSet::new();
    for row in rows {
        applied.insert(row?);
    }

    for (version, sql) in migrations() {
        if applied.contains(&version) {
            continue;
        }

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO __schema_version(version, applied_at) VALUES (?1, datetime('now'))",
            [version],
        )?;
        tx.commit()?;
        tracing::debug!(version, "applied store migration");
    }

    Ok(())
}
