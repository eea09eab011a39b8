use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE admins (
                id              TEXT PRIMARY KEY,
                username        TEXT NOT NULL UNIQUE,
                password_hash   TEXT NOT NULL,
                last_login      INTEGER,
                created_at      INTEGER NOT NULL DEFAULT (unixepoch())
            );

            CREATE TABLE plex_users (
                id                  TEXT PRIMARY KEY,
                plex_account_id     INTEGER NOT NULL UNIQUE,
                username            TEXT NOT NULL,
                email               TEXT,
                upstream_token      TEXT,
                home_server_url     TEXT,
                last_login          INTEGER,
                created_at          INTEGER NOT NULL DEFAULT (unixepoch())
            );

            CREATE TABLE sessions (
                id              TEXT PRIMARY KEY,
                principal_id    TEXT NOT NULL,
                token_hash      TEXT NOT NULL UNIQUE,
                created_at      INTEGER NOT NULL,
                expires_at      INTEGER NOT NULL,
                CHECK (expires_at > created_at)
            );

            CREATE INDEX idx_sessions_expires ON sessions(expires_at);

            CREATE TABLE settings (
                key     TEXT PRIMARY KEY,
                value   TEXT NOT NULL
            );

            CREATE TABLE download_logs (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                principal_id    TEXT NOT NULL,
                media_title     TEXT NOT NULL,
                media_key       TEXT NOT NULL,
                file_size       INTEGER,
                downloaded_at   INTEGER NOT NULL
            );

            CREATE INDEX idx_download_logs_principal
                ON download_logs(principal_id, downloaded_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
