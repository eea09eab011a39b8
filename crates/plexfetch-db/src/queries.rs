use crate::Database;
use crate::models::{AdminRow, DownloadLogRow, PlexUserRow, PlexUserUpsert, SessionRow};
use anyhow::Result;
use plexfetch_types::models::ServerSettings;
use rusqlite::{Connection, OptionalExtension, Row, params};

pub const SETTING_SERVER_URL: &str = "server_url";
pub const SETTING_SERVER_TOKEN: &str = "server_token";
pub const SETTING_SERVER_MACHINE_ID: &str = "server_machine_id";
pub const SETTING_SERVER_NAME: &str = "server_name";
pub const SETTING_CLIENT_IDENTIFIER: &str = "client_identifier";

impl Database {
    // -- Admins --

    pub fn admin_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM admins", [], |r| r.get(0))?)
        })
    }

    /// Create the administrator account, but only if none exists yet.
    /// Returns `false` when setup was already done.
    pub fn create_first_admin(&self, id: &str, username: &str, password_hash: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT INTO admins (id, username, password_hash)
                 SELECT ?1, ?2, ?3 WHERE NOT EXISTS (SELECT 1 FROM admins)",
                (id, username, password_hash),
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_admin_by_username(&self, username: &str) -> Result<Option<AdminRow>> {
        self.with_conn(|conn| {
            query_admin(conn, "WHERE username = ?1", username)
        })
    }

    pub fn get_admin_by_id(&self, id: &str) -> Result<Option<AdminRow>> {
        self.with_conn(|conn| query_admin(conn, "WHERE id = ?1", id))
    }

    pub fn touch_admin_login(&self, id: &str, now: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("UPDATE admins SET last_login = ?1 WHERE id = ?2", params![now, id])?;
            Ok(())
        })
    }

    // -- Delegated users --

    /// Insert a delegated user keyed by upstream account id, or refresh the
    /// token and home server of the existing one. Returns the local id.
    pub fn upsert_plex_user(&self, new_id: &str, user: &PlexUserUpsert<'_>, now: i64) -> Result<String> {
        self.with_conn_mut(|conn| {
            let id = conn.query_row(
                "INSERT INTO plex_users
                    (id, plex_account_id, username, email, upstream_token, home_server_url, last_login)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(plex_account_id) DO UPDATE SET
                    username = excluded.username,
                    email = excluded.email,
                    upstream_token = excluded.upstream_token,
                    home_server_url = excluded.home_server_url,
                    last_login = excluded.last_login
                 RETURNING id",
                params![
                    new_id,
                    user.plex_account_id,
                    user.username,
                    user.email,
                    user.upstream_token,
                    user.home_server_url,
                    now,
                ],
                |row| row.get(0),
            )?;
            Ok(id)
        })
    }

    pub fn get_plex_user_by_id(&self, id: &str) -> Result<Option<PlexUserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, plex_account_id, username, email, upstream_token, home_server_url, last_login
                     FROM plex_users WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(PlexUserRow {
                            id: row.get(0)?,
                            plex_account_id: row.get(1)?,
                            username: row.get(2)?,
                            email: row.get(3)?,
                            upstream_token: row.get(4)?,
                            home_server_url: row.get(5)?,
                            last_login: row.get(6)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Sessions --

    pub fn insert_session(&self, session: &SessionRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, principal_id, token_hash, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session.id,
                    session.principal_id,
                    session.token_hash,
                    session.created_at,
                    session.expires_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_session_by_token_hash(&self, token_hash: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, principal_id, token_hash, created_at, expires_at
                     FROM sessions WHERE token_hash = ?1",
                    [token_hash],
                    session_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Returns the number of rows removed (0 or 1).
    pub fn delete_session_by_token_hash(&self, token_hash: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            Ok(conn.execute("DELETE FROM sessions WHERE token_hash = ?1", [token_hash])?)
        })
    }

    pub fn delete_expired_sessions(&self, now: i64) -> Result<usize> {
        self.with_conn_mut(|conn| {
            Ok(conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", [now])?)
        })
    }

    // -- Settings --

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| query_setting(conn, key))
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                (key, value),
            )?;
            Ok(())
        })
    }

    pub fn get_server_settings(&self) -> Result<ServerSettings> {
        self.with_conn(|conn| {
            Ok(ServerSettings {
                server_url: query_setting(conn, SETTING_SERVER_URL)?,
                server_token: query_setting(conn, SETTING_SERVER_TOKEN)?,
                server_machine_id: query_setting(conn, SETTING_SERVER_MACHINE_ID)?,
                server_name: query_setting(conn, SETTING_SERVER_NAME)?,
            })
        })
    }

    /// Replace the server settings in one transaction. `None` values are removed.
    pub fn save_server_settings(&self, settings: &ServerSettings) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let pairs = [
                (SETTING_SERVER_URL, &settings.server_url),
                (SETTING_SERVER_TOKEN, &settings.server_token),
                (SETTING_SERVER_MACHINE_ID, &settings.server_machine_id),
                (SETTING_SERVER_NAME, &settings.server_name),
            ];
            for (key, value) in pairs {
                match value {
                    Some(value) => {
                        tx.execute(
                            "INSERT INTO settings (key, value) VALUES (?1, ?2)
                             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                            (key, value),
                        )?;
                    }
                    None => {
                        tx.execute("DELETE FROM settings WHERE key = ?1", [key])?;
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    // -- Download log --

    pub fn insert_download_log(
        &self,
        principal_id: &str,
        media_title: &str,
        media_key: &str,
        file_size: Option<u64>,
        downloaded_at: i64,
    ) -> Result<i64> {
        let file_size = file_size.and_then(|s| i64::try_from(s).ok());
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO download_logs (principal_id, media_title, media_key, file_size, downloaded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![principal_id, media_title, media_key, file_size, downloaded_at],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Newest first. `principal_id = None` lists every principal's downloads.
    pub fn list_download_logs(&self, principal_id: Option<&str>, limit: u32) -> Result<Vec<DownloadLogRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, principal_id, media_title, media_key, file_size, downloaded_at
                 FROM download_logs
                 WHERE ?1 IS NULL OR principal_id = ?1
                 ORDER BY downloaded_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![principal_id, limit], |row| {
                    Ok(DownloadLogRow {
                        id: row.get(0)?,
                        principal_id: row.get(1)?,
                        media_title: row.get(2)?,
                        media_key: row.get(3)?,
                        file_size: row.get(4)?,
                        downloaded_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_admin(conn: &Connection, filter: &str, value: &str) -> Result<Option<AdminRow>> {
    let sql = format!(
        "SELECT id, username, password_hash, last_login FROM admins {}",
        filter
    );
    let row = conn
        .query_row(&sql, [value], |row| {
            Ok(AdminRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password_hash: row.get(2)?,
                last_login: row.get(3)?,
            })
        })
        .optional()?;
    Ok(row)
}

fn query_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| row.get(0))
        .optional()?;
    Ok(value)
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        principal_id: row.get(1)?,
        token_hash: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn session(principal_id: &str, hash: &str, created_at: i64, expires_at: i64) -> SessionRow {
        SessionRow {
            id: Uuid::new_v4().to_string(),
            principal_id: principal_id.to_string(),
            token_hash: hash.to_string(),
            created_at,
            expires_at,
        }
    }

    #[test]
    fn expired_sessions_are_swept_and_live_ones_kept() {
        let db = Database::open_in_memory().unwrap();
        db.insert_session(&session("p1", "old", 100, 200)).unwrap();
        db.insert_session(&session("p1", "edge", 100, 500)).unwrap();
        db.insert_session(&session("p1", "live", 100, 900)).unwrap();

        assert_eq!(db.delete_expired_sessions(500).unwrap(), 2);
        assert!(db.get_session_by_token_hash("old").unwrap().is_none());
        assert!(db.get_session_by_token_hash("edge").unwrap().is_none());
        assert!(db.get_session_by_token_hash("live").unwrap().is_some());
    }

    #[test]
    fn only_one_admin_can_be_created() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.create_first_admin("a1", "root", "hash").unwrap());
        assert!(!db.create_first_admin("a2", "other", "hash").unwrap());
        assert_eq!(db.admin_count().unwrap(), 1);
        assert!(db.get_admin_by_username("other").unwrap().is_none());

        db.touch_admin_login("a1", 42).unwrap();
        let admin = db.get_admin_by_username("root").unwrap().unwrap();
        assert_eq!(admin.id, "a1");
        assert_eq!(admin.password_hash, "hash");
        assert_eq!(admin.last_login, Some(42));
    }

    #[test]
    fn session_must_expire_after_creation() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.insert_session(&session("p1", "bad", 100, 100)).is_err());
    }

    #[test]
    fn upsert_refreshes_token_and_keeps_local_id() {
        let db = Database::open_in_memory().unwrap();
        let first = db
            .upsert_plex_user(
                "local-1",
                &PlexUserUpsert {
                    plex_account_id: 77,
                    username: "viewer",
                    email: None,
                    upstream_token: "old-token",
                    home_server_url: None,
                },
                10,
            )
            .unwrap();
        let second = db
            .upsert_plex_user(
                "local-2",
                &PlexUserUpsert {
                    plex_account_id: 77,
                    username: "viewer",
                    email: Some("v@example.com"),
                    upstream_token: "new-token",
                    home_server_url: Some("https://relay.example:443"),
                },
                20,
            )
            .unwrap();

        assert_eq!(first, "local-1");
        assert_eq!(second, "local-1");
        let row = db.get_plex_user_by_id("local-1").unwrap().unwrap();
        assert_eq!(row.upstream_token.as_deref(), Some("new-token"));
        assert_eq!(row.last_login, Some(20));
    }

    #[test]
    fn server_settings_round_trip_and_clear() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_server_settings().unwrap(), ServerSettings::default());

        let settings = ServerSettings {
            server_url: Some("http://10.0.0.5:32400".into()),
            server_token: Some("T1".into()),
            server_machine_id: Some("abc".into()),
            server_name: None,
        };
        db.save_server_settings(&settings).unwrap();
        assert_eq!(db.get_server_settings().unwrap(), settings);

        db.save_server_settings(&ServerSettings {
            server_machine_id: None,
            ..settings.clone()
        })
        .unwrap();
        assert_eq!(db.get_setting(SETTING_SERVER_MACHINE_ID).unwrap(), None);
    }

    #[test]
    fn download_log_filters_by_principal() {
        let db = Database::open_in_memory().unwrap();
        db.insert_download_log("a", "Movie", "1", Some(1024), 10).unwrap();
        db.insert_download_log("b", "Show", "2", None, 20).unwrap();
        db.insert_download_log("a", "Album", "3", Some(2048), 30).unwrap();

        let mine = db.list_download_logs(Some("a"), 10).unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].media_title, "Album");

        let all = db.list_download_logs(None, 10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].file_size, None);
    }
}
