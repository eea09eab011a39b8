mod config;
mod sweep;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, header::{AUTHORIZATION, CONTENT_TYPE}};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use plexfetch_api::fetch::HttpFetcher;
use plexfetch_api::pins::ConsumedPins;
use plexfetch_api::session::SessionAuthority;
use plexfetch_api::state::AppState;
use plexfetch_api::{AppStateInner, router};
use plexfetch_db::Database;
use plexfetch_db::queries::SETTING_CLIENT_IDENTIFIER;
use plexfetch_plex::PlexTv;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plexfetch=debug,plexfetch_api=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);

    // The identity service tracks devices by this id; it must survive restarts.
    let client_identifier = match db.get_setting(SETTING_CLIENT_IDENTIFIER)? {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            db.set_setting(SETTING_CLIENT_IDENTIFIER, &id)?;
            info!("Generated client identifier {}", id);
            id
        }
    };

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.upstream_timeout_secs))
        .build()?;

    let sessions = SessionAuthority::new(db.clone(), chrono::Duration::hours(config.session_ttl_hours));
    let plex_tv = PlexTv::new(http.clone(), &config.identity_url, &client_identifier, &config.product)?;

    tokio::spawn(sweep::run_sweep_loop(sessions.clone(), config.sweep_interval_secs));

    let state: AppState = Arc::new(AppStateInner {
        db,
        sessions,
        plex_tv,
        fetcher: Arc::new(HttpFetcher::new(http.clone())),
        consumed_pins: ConsumedPins::default(),
        http,
    });

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(false);

    let app = router(state).layer(cors).layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("plexfetch listening on {}", addr);
    info!(
        "Identity service: {}, session TTL: {}h",
        config.identity_url, config.session_ttl_hours
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
