use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use mockito::{Matcher, Server, ServerGuard};
use serde_json::{Value, json};
use tower::ServiceExt;

use plexfetch_api::credentials::resolve;
use plexfetch_api::fetch::HttpFetcher;
use plexfetch_api::pins::ConsumedPins;
use plexfetch_api::session::SessionAuthority;
use plexfetch_api::{AppStateInner, router};
use plexfetch_db::Database;
use plexfetch_plex::PlexTv;
use plexfetch_types::models::ServerCredentials;

const RESOURCES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MediaContainer size="2">
  <Device name="Own Server" provides="server" clientIdentifier="own-1" owned="1">
    <Connection uri="http://192.168.7.7:32400" local="1"/>
  </Device>
  <Device name="Admin Server" provides="server" clientIdentifier="machine-1" owned="0" accessToken="T2">
    <Connection uri="https://relay.example.net:8443" local="0" relay="1"/>
    <Connection uri="http://10.0.0.5:32400" local="1"/>
  </Device>
</MediaContainer>"#;

fn app(identity_url: &str) -> (Router, Arc<AppStateInner>) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let http = reqwest::Client::new();
    let state = Arc::new(AppStateInner {
        sessions: SessionAuthority::new(db.clone(), chrono::Duration::hours(24)),
        plex_tv: PlexTv::new(http.clone(), identity_url, "e2e-client", "plexfetch").unwrap(),
        fetcher: Arc::new(HttpFetcher::new(http.clone())),
        consumed_pins: ConsumedPins::default(),
        http,
        db,
    });
    (router(state.clone()), state)
}

async fn call(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn setup_admin(app: &Router) -> String {
    let (status, body) = call(
        app,
        Method::POST,
        "/api/setup",
        None,
        Some(json!({ "username": "admin", "password": "supersecret" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["kind"], "admin");
    body["token"].as_str().unwrap().to_string()
}

async fn mock_media_identity(media: &mut ServerGuard) {
    media
        .mock("GET", "/identity")
        .match_query(Matcher::Any)
        .match_header("X-Plex-Token", "T1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"MediaContainer":{"size":0,"machineIdentifier":"machine-1","friendlyName":"Home"}}"#)
        .create_async()
        .await;
}

async fn configure_media_server(app: &Router, admin_token: &str, media: &ServerGuard) {
    let (status, _) = call(
        app,
        Method::PUT,
        "/api/settings",
        Some(admin_token),
        Some(json!({ "server_url": media.url(), "server_token": "T1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

async fn get_raw(app: &Router, uri: &str, token: Option<&str>) -> axum::response::Response {
    let mut req = Request::builder().uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    app.clone().oneshot(req.body(Body::empty()).unwrap()).await.unwrap()
}

async fn mock_identity_service(identity: &mut ServerGuard) {
    identity
        .mock("POST", "/api/v2/pins")
        .match_query(Matcher::Any)
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id": 99, "code": "PINC", "authToken": null}"#)
        .create_async()
        .await;
    identity
        .mock("GET", "/api/v2/pins/99")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id": 99, "code": "PINC", "authToken": "ACCOUNT-TOKEN"}"#)
        .create_async()
        .await;
    identity
        .mock("GET", "/api/v2/user")
        .match_query(Matcher::Any)
        .match_header("X-Plex-Token", "ACCOUNT-TOKEN")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id": 500, "uuid": "abc", "username": "friend", "email": "friend@example.com"}"#)
        .create_async()
        .await;
    identity
        .mock("GET", "/api/resources")
        .match_query(Matcher::Any)
        .match_header("X-Plex-Token", "ACCOUNT-TOKEN")
        .with_status(200)
        .with_header("content-type", "application/xml")
        .with_body(RESOURCES)
        .create_async()
        .await;
}

#[tokio::test]
async fn health_is_public() {
    let (app, _) = app("http://127.0.0.1:9");
    let (status, body) = call(&app, Method::GET, "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn setup_happens_once_and_login_is_generic() {
    let (app, _) = app("http://127.0.0.1:9");

    let (_, status_body) = call(&app, Method::GET, "/api/setup", None, None).await;
    assert_eq!(status_body["configured"], false);

    setup_admin(&app).await;
    let (status, _) = call(
        &app,
        Method::POST,
        "/api/setup",
        None,
        Some(json!({ "username": "second", "password": "supersecret" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, wrong_password) = call(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "username": "admin", "password": "not-it" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (_, unknown_user) = call(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "username": "nobody", "password": "not-it" })),
    )
    .await;
    assert_eq!(wrong_password, unknown_user);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "username": "admin", "password": "supersecret" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].as_str().is_some());
}

#[tokio::test]
async fn protected_routes_need_a_valid_session() {
    let (app, _) = app("http://127.0.0.1:9");
    let (status, _) = call(&app, Method::GET, "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(&app, Method::GET, "/api/auth/me", Some("made-up"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid or expired session");

    let token = setup_admin(&app).await;
    let (status, _) = call(&app, Method::POST, "/api/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn delegated_login_is_bound_to_admin_server_with_share_token() {
    let mut identity = Server::new_async().await;
    mock_identity_service(&mut identity).await;
    let (app, state) = app(&identity.url());

    let admin_token = setup_admin(&app).await;
    let (status, settings) = call(
        &app,
        Method::PUT,
        "/api/settings",
        Some(&admin_token),
        Some(json!({
            "server_url": "http://10.0.0.5:32400",
            "server_token": "T1",
            "server_machine_id": "machine-1",
            "server_name": "Admin Server"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings["has_token"], true);
    assert!(settings.get("server_token").is_none());

    let (status, pin) = call(&app, Method::POST, "/api/auth/plex/pin", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pin["id"], 99);
    assert!(pin["auth_url"].as_str().unwrap().contains("code=PINC"));

    let (status, _) = call(&app, Method::GET, "/api/auth/plex/pin/99?code=WRONG", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, polled) = call(&app, Method::GET, "/api/auth/plex/pin/99?code=PINC", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(polled["authorized"], true);
    assert_eq!(polled["session"]["user"]["kind"], "delegated");
    assert_eq!(polled["session"]["user"]["username"], "friend");
    let user_token = polled["session"]["token"].as_str().unwrap().to_string();

    let principal = state.sessions.validate(&user_token).unwrap();
    let settings = state.db.get_server_settings().unwrap();
    assert_eq!(
        resolve(&principal, &settings).unwrap(),
        ServerCredentials {
            server_url: "http://10.0.0.5:32400".into(),
            token: "T2".into(),
        }
    );

    let (status, _) = call(&app, Method::GET, "/api/settings", Some(&user_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // An approved pin is exchanged for exactly one session.
    let (status, _) = call(&app, Method::GET, "/api/auth/plex/pin/99?code=PINC", None, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn delegated_login_requires_configured_server() {
    let mut identity = Server::new_async().await;
    mock_identity_service(&mut identity).await;
    let (app, _) = app(&identity.url());
    setup_admin(&app).await;

    let (status, body) = call(&app, Method::GET, "/api/auth/plex/pin/99?code=PINC", None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "no media server has been configured");
}

#[tokio::test]
async fn admin_downloads_through_the_proxy_and_sees_history() {
    let mut media = Server::new_async().await;
    media
        .mock("GET", "/identity")
        .match_query(Matcher::Any)
        .match_header("X-Plex-Token", "T1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"MediaContainer":{"size":0,"machineIdentifier":"machine-1","friendlyName":"Home"}}"#)
        .create_async()
        .await;
    media
        .mock("GET", "/library/metadata/42")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"MediaContainer":{"size":1,"allowSync":1,"Metadata":[{"ratingKey":"42","title":"Film","type":"movie",
                "Media":[{"Part":[{"key":"/library/parts/7/1/file.mkv","file":"/data/Film.mkv","size":5}]}]}]}}"#,
        )
        .create_async()
        .await;
    media
        .mock("GET", "/library/parts/7/1/file.mkv")
        .match_query(Matcher::UrlEncoded("X-Plex-Token".into(), "T1".into()))
        .with_status(200)
        .with_header("content-type", "video/x-matroska")
        .with_body("bytes")
        .create_async()
        .await;

    let (app, _) = app("http://127.0.0.1:9");
    let admin_token = setup_admin(&app).await;

    let (status, settings) = call(
        &app,
        Method::PUT,
        "/api/settings",
        Some(&admin_token),
        Some(json!({ "server_url": media.url(), "server_token": "T1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings["server_machine_id"], "machine-1");
    assert_eq!(settings["server_name"], "Home");

    let req = Request::builder()
        .uri("/api/download/42")
        .header(header::AUTHORIZATION, format!("Bearer {}", admin_token))
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        resp.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("attachment; filename=\"Film.mkv\"")
    );
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"bytes");

    let (status, history) = call(&app, Method::GET, "/api/downloads", Some(&admin_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["entries"][0]["media_title"], "Film");
    assert_eq!(history["entries"][0]["file_size"], 5);
}

#[tokio::test]
async fn thumbnails_take_a_query_token_but_never_serve_media_parts() {
    let mut media = Server::new_async().await;
    mock_media_identity(&mut media).await;
    let thumb = media
        .mock("GET", "/library/metadata/42/thumb/1700000000")
        .match_query(Matcher::UrlEncoded("X-Plex-Token".into(), "T1".into()))
        .with_status(200)
        .with_header("content-type", "image/jpeg")
        .with_body("jpeg")
        .create_async()
        .await;
    let part = media
        .mock("GET", "/library/parts/7/1/file.mkv")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("movie bytes")
        .expect(0)
        .create_async()
        .await;

    let (app, _) = app("http://127.0.0.1:9");
    let admin_token = setup_admin(&app).await;
    configure_media_server(&app, &admin_token, &media).await;

    let uri = format!(
        "/api/thumb?path=%2Flibrary%2Fmetadata%2F42%2Fthumb%2F1700000000&token={}",
        admin_token
    );
    let resp = get_raw(&app, &uri, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/jpeg");
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"jpeg");
    thumb.assert_async().await;

    let (status, _) = call(
        &app,
        Method::GET,
        "/api/thumb?path=%2Flibrary%2Fparts%2F7%2F1%2Ffile.mkv",
        Some(&admin_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    part.assert_async().await;

    let (status, _) = call(&app, Method::GET, "/api/thumb?path=%2Flibrary%2Fmetadata%2F42%2Fthumb", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // The query fallback exists for image tags only.
    let uri = format!("/api/downloads?token={}", admin_token);
    let (status, _) = call(&app, Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn zip_download_streams_every_leaf_when_allowed() {
    let mut media = Server::new_async().await;
    mock_media_identity(&mut media).await;
    media
        .mock("GET", "/library/metadata/10")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"MediaContainer":{"size":1,"Metadata":[{"ratingKey":"10","title":"Season 1","type":"season"}]}}"#)
        .create_async()
        .await;
    media
        .mock("GET", "/library/metadata/10/allLeaves")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"MediaContainer":{"size":2,"allowSync":"1","Metadata":[
                {"ratingKey":"11","title":"Pilot","type":"episode",
                 "Media":[{"Part":[{"key":"/library/parts/11/1/file.mkv","file":"/tv/S01E01.mkv","size":5}]}]},
                {"ratingKey":"12","title":"Second","type":"episode",
                 "Media":[{"Part":[{"key":"/library/parts/12/1/file.mkv","file":"/tv/S01E02.mkv","size":6}]}]}]}}"#,
        )
        .create_async()
        .await;
    for (path, body) in [("/library/parts/11/1/file.mkv", "first"), ("/library/parts/12/1/file.mkv", "second")] {
        media
            .mock("GET", path)
            .match_query(Matcher::UrlEncoded("download".into(), "1".into()))
            .with_status(200)
            .with_header("content-type", "video/x-matroska")
            .with_body(body)
            .create_async()
            .await;
    }

    let (app, _) = app("http://127.0.0.1:9");
    let admin_token = setup_admin(&app).await;
    configure_media_server(&app, &admin_token, &media).await;

    let resp = get_raw(&app, "/api/download/10/zip", Some(&admin_token)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/zip");
    assert!(
        resp.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("Season 1.zip")
    );
    assert_eq!(resp.headers()["x-estimated-content-length"], "12");

    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(body.to_vec())).unwrap();
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    assert_eq!(names, vec!["S01E01.mkv", "S01E02.mkv"]);
    let mut second = String::new();
    std::io::Read::read_to_string(&mut archive.by_name("S01E02.mkv").unwrap(), &mut second).unwrap();
    assert_eq!(second, "second");
}

#[tokio::test]
async fn zip_download_is_refused_without_permission() {
    let mut media = Server::new_async().await;
    mock_media_identity(&mut media).await;
    media
        .mock("GET", "/library/metadata/77")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"MediaContainer":{"size":1,"Metadata":[{"ratingKey":"77","title":"Locked Show","type":"show"}]}}"#)
        .create_async()
        .await;
    media
        .mock("GET", "/library/metadata/77/allLeaves")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"MediaContainer":{"size":1,"Metadata":[{"ratingKey":"78","title":"Pilot","type":"episode",
                "Media":[{"Part":[{"key":"/library/parts/78/1/file.mkv","file":"/tv/Pilot.mkv","size":5}]}]}]}}"#,
        )
        .create_async()
        .await;
    let part = media
        .mock("GET", "/library/parts/78/1/file.mkv")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("bytes")
        .expect(0)
        .create_async()
        .await;

    let (app, _) = app("http://127.0.0.1:9");
    let admin_token = setup_admin(&app).await;
    configure_media_server(&app, &admin_token, &media).await;

    let (status, body) = call(&app, Method::GET, "/api/download/77/zip", Some(&admin_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().is_some());
    part.assert_async().await;
}
