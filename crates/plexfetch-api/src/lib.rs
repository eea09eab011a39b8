//! HTTP surface of the download proxy: sessions, credential resolution and
//! the streaming handlers, wired into one axum `Router`.

pub mod archive;
pub mod auth;
pub mod credentials;
pub mod downloads;
pub mod error;
pub mod fetch;
pub mod library;
pub mod middleware;
pub mod pins;
pub mod session;
pub mod settings;
pub mod state;
pub mod stream;

use axum::{
    Json, Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::middleware::{require_auth, require_auth_or_query_token};
use crate::state::AppState;

pub use state::AppStateInner;

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/health", get(health))
        .route("/api/setup", get(auth::setup_status).post(auth::setup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/plex/pin", post(auth::start_pin))
        .route("/api/auth/plex/pin/{id}", get(auth::poll_pin));

    let protected_routes = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/settings", get(settings::get_settings).put(settings::update_settings))
        .route("/api/libraries", get(library::libraries))
        .route("/api/libraries/{key}/items", get(library::library_items))
        .route("/api/metadata/{rating_key}", get(library::metadata))
        .route("/api/metadata/{rating_key}/children", get(library::children))
        .route("/api/search", get(library::search))
        .route("/api/recently-added", get(library::recently_added))
        .route("/api/download/{rating_key}", get(downloads::download_item))
        .route("/api/download/{rating_key}/zip", get(downloads::download_zip))
        .route("/api/downloads", get(downloads::history))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    // Thumbnails are loaded by <img> tags, which cannot send headers.
    let thumb_routes = Router::new()
        .route("/api/thumb", get(downloads::thumbnail))
        .route_layer(from_fn_with_state(state.clone(), require_auth_or_query_token));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(thumb_routes)
        .with_state(state)
}
