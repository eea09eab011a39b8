use std::sync::Arc;

use plexfetch_db::Database;
use plexfetch_plex::PlexTv;
use tracing::error;

use crate::error::ApiError;
use crate::fetch::Fetcher;
use crate::pins::ConsumedPins;
use crate::session::SessionAuthority;

pub type AppState = Arc<AppStateInner>;

/// Everything a handler needs, constructed once in `main` and injected.
/// Nothing here is a per-request target; upstream connection parameters are
/// resolved per call.
pub struct AppStateInner {
    pub db: Arc<Database>,
    pub sessions: SessionAuthority,
    pub plex_tv: PlexTv,
    /// Shared connection pool for media server queries.
    pub http: reqwest::Client,
    /// Source of upstream byte streams for downloads.
    pub fetcher: Arc<dyn Fetcher>,
    pub consumed_pins: ConsumedPins,
}

impl AppStateInner {
    /// Run a blocking DB call off the async runtime.
    pub async fn with_db<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        blocking(move || f(&db)).await
    }
}

/// Run blocking work (SQLite, password hashing) on the blocking pool.
pub async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("blocking task failed"))
        })?
        .map_err(ApiError::Internal)
}

#[cfg(test)]
pub(crate) fn test_state_with(fetcher: Arc<dyn Fetcher>) -> AppStateInner {
    let db = Arc::new(Database::open_in_memory().expect("in-memory db"));
    let http = reqwest::Client::new();
    AppStateInner {
        sessions: SessionAuthority::new(db.clone(), chrono::Duration::hours(24)),
        plex_tv: PlexTv::new(http.clone(), "http://127.0.0.1:9", "test-client", "plexfetch").expect("identity url"),
        fetcher,
        consumed_pins: ConsumedPins::default(),
        http,
        db,
    }
}

#[cfg(test)]
pub(crate) fn test_state() -> AppStateInner {
    test_state_with(Arc::new(crate::fetch::HttpFetcher::new(reqwest::Client::new())))
}
