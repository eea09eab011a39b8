use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use plexfetch_db::Database;
use plexfetch_db::models::SessionRow;
use plexfetch_types::models::{Principal, Session};

pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("session expired")]
    Expired,

    #[error("session not found")]
    NotFound,

    #[error("session store unavailable: {0}")]
    Store(#[from] anyhow::Error),
}

/// A freshly issued session. `token` is the only copy of the bearer token;
/// the store keeps its SHA-256.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session: Session,
    pub token: String,
}

/// Issues, validates and expires opaque bearer tokens.
#[derive(Clone)]
pub struct SessionAuthority {
    db: Arc<Database>,
    ttl: Duration,
}

impl SessionAuthority {
    pub fn new(db: Arc<Database>, ttl: Duration) -> Self {
        // A session must always expire strictly after it was created.
        let ttl = ttl.max(Duration::minutes(1));
        Self { db, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, principal_id: &str) -> anyhow::Result<IssuedSession> {
        self.issue_at(principal_id, Utc::now())
    }

    pub fn issue_at(&self, principal_id: &str, now: DateTime<Utc>) -> anyhow::Result<IssuedSession> {
        let token = generate_token();
        let row = SessionRow {
            id: Uuid::new_v4().to_string(),
            principal_id: principal_id.to_string(),
            token_hash: hash_token(&token),
            created_at: now.timestamp(),
            expires_at: (now + self.ttl).timestamp(),
        };
        self.db.insert_session(&row)?;

        Ok(IssuedSession {
            session: Session::from(&row),
            token,
        })
    }

    pub fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        self.validate_at(token, Utc::now())
    }

    /// Resolve a token to its principal. Admin accounts are looked up first,
    /// then delegated users; a session whose principal is gone is `NotFound`.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Principal, AuthError> {
        let row = self
            .db
            .get_session_by_token_hash(&hash_token(token))?
            .ok_or(AuthError::NotFound)?;

        if !Session::from(&row).is_usable_at(now) {
            return Err(AuthError::Expired);
        }

        if let Some(admin) = self.db.get_admin_by_id(&row.principal_id)? {
            return Ok(Principal::Admin(admin.into()));
        }
        if let Some(user) = self.db.get_plex_user_by_id(&row.principal_id)? {
            return Ok(Principal::Delegated(user.into()));
        }
        Err(AuthError::NotFound)
    }

    /// Idempotent.
    pub fn revoke(&self, token: &str) -> anyhow::Result<()> {
        self.db.delete_session_by_token_hash(&hash_token(token))?;
        Ok(())
    }

    pub fn sweep_expired(&self) -> anyhow::Result<usize> {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let removed = self.db.delete_expired_sessions(now.timestamp())?;
        if removed > 0 {
            info!("Swept {} expired sessions", removed);
        }
        Ok(removed)
    }
}

/// 256 bits from the thread-local CSPRNG, hex encoded.
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexfetch_db::models::PlexUserUpsert;

    fn authority() -> SessionAuthority {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.create_first_admin("admin-1", "root", "$argon2id$placeholder").unwrap();
        SessionAuthority::new(db, Duration::hours(DEFAULT_SESSION_TTL_HOURS))
    }

    #[test]
    fn issued_token_validates_to_admin() {
        let sessions = authority();
        let issued = sessions.issue("admin-1").unwrap();

        assert_eq!(issued.token.len(), 64);
        assert!(issued.session.expires_at > issued.session.created_at);

        let principal = sessions.validate(&issued.token).unwrap();
        assert!(principal.is_admin());
        assert_eq!(principal.username(), "root");
    }

    #[test]
    fn tokens_are_unique() {
        let sessions = authority();
        let a = sessions.issue("admin-1").unwrap();
        let b = sessions.issue("admin-1").unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn expired_session_never_yields_principal() {
        let sessions = authority();
        let now = Utc::now();
        let issued = sessions.issue_at("admin-1", now).unwrap();

        let at_expiry = now + Duration::hours(DEFAULT_SESSION_TTL_HOURS);
        assert!(matches!(sessions.validate_at(&issued.token, at_expiry), Err(AuthError::Expired)));
        assert!(matches!(
            sessions.validate_at(&issued.token, at_expiry + Duration::days(30)),
            Err(AuthError::Expired)
        ));

        sessions.sweep_expired_at(at_expiry).unwrap();
        assert!(matches!(sessions.validate_at(&issued.token, now), Err(AuthError::NotFound)));
    }

    #[test]
    fn sweep_keeps_live_sessions() {
        let sessions = authority();
        let now = Utc::now();
        let old = sessions.issue_at("admin-1", now - Duration::hours(48)).unwrap();
        let fresh = sessions.issue_at("admin-1", now).unwrap();

        assert_eq!(sessions.sweep_expired_at(now).unwrap(), 1);
        assert!(matches!(sessions.validate_at(&old.token, now), Err(AuthError::NotFound)));
        assert!(sessions.validate_at(&fresh.token, now).is_ok());
    }

    #[test]
    fn revoke_is_idempotent() {
        let sessions = authority();
        let issued = sessions.issue("admin-1").unwrap();

        sessions.revoke(&issued.token).unwrap();
        sessions.revoke(&issued.token).unwrap();
        assert!(matches!(sessions.validate(&issued.token), Err(AuthError::NotFound)));
    }

    #[test]
    fn unknown_token_is_not_found() {
        let sessions = authority();
        assert!(matches!(sessions.validate("deadbeef"), Err(AuthError::NotFound)));
    }

    #[test]
    fn falls_back_to_delegated_principal() {
        let sessions = authority();
        let id = sessions
            .db
            .upsert_plex_user(
                "user-1",
                &PlexUserUpsert {
                    plex_account_id: 9,
                    username: "viewer",
                    email: None,
                    upstream_token: "T2",
                    home_server_url: None,
                },
                0,
            )
            .unwrap();
        let issued = sessions.issue(&id).unwrap();

        let principal = sessions.validate(&issued.token).unwrap();
        assert!(!principal.is_admin());
        assert_eq!(principal.upstream_token(), Some("T2"));
    }

    #[test]
    fn session_for_deleted_principal_is_not_found() {
        let sessions = authority();
        let issued = sessions.issue("nobody").unwrap();
        assert!(matches!(sessions.validate(&issued.token), Err(AuthError::NotFound)));
    }
}
