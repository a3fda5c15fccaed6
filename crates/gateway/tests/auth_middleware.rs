#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the admin token gate.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::net::TcpListener;

use {
    paird_gateway::{
        auth::{LoginSessions, ResolvedAuth},
        build_gateway_app,
        state::GatewayState,
    },
    paird_sessions::{
        CredentialStore, FsCredentialStore, LifecycleConfig, LifecycleManager,
        testing::FakeConnector,
    },
};

const TOKEN: &str = "s3cret-admin";

/// Start a test server; `token = None` disables auth.
async fn start_server(token: Option<&str>, protect_reads: bool) -> (SocketAddr, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn CredentialStore> = Arc::new(FsCredentialStore::new(dir.path()));
    let manager = LifecycleManager::new(
        store,
        Arc::new(FakeConnector::new()),
        LifecycleConfig::default(),
    );
    let state = GatewayState::new(
        manager,
        ResolvedAuth::new(token.map(str::to_string), protect_reads),
        LoginSessions::new(Duration::from_secs(60)),
    );
    let app = build_gateway_app(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (addr, dir)
}

#[tokio::test]
async fn health_is_public() {
    let (addr, _dir) = start_server(Some(TOKEN), true).await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn no_token_configured_passes_through() {
    let (addr, _dir) = start_server(None, true).await;
    let resp = reqwest::get(format!("http://{addr}/sessions")).await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn admin_routes_require_token() {
    let (addr, _dir) = start_server(Some(TOKEN), false).await;
    let resp = reqwest::get(format!("http://{addr}/sessions")).await.unwrap();
    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "unauthorized");

    let client = reqwest::Client::new();
    let wrong = client
        .get(format!("http://{addr}/sessions"))
        .header("X-Admin-Token", "nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);
}

#[tokio::test]
async fn every_token_source_is_accepted() {
    let (addr, _dir) = start_server(Some(TOKEN), false).await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/sessions");

    let header = client
        .get(&url)
        .header("X-Admin-Token", TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(header.status(), 200);

    let bearer = client.get(&url).bearer_auth(TOKEN).send().await.unwrap();
    assert_eq!(bearer.status(), 200);

    let query = client
        .get(format!("{url}?token={TOKEN}"))
        .send()
        .await
        .unwrap();
    assert_eq!(query.status(), 200);
}

#[tokio::test]
async fn reads_open_unless_protected() {
    let (open_addr, _a) = start_server(Some(TOKEN), false).await;
    let resp = reqwest::get(format!("http://{open_addr}/sessions/alice/status"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let (closed_addr, _b) = start_server(Some(TOKEN), true).await;
    let resp = reqwest::get(format!("http://{closed_addr}/sessions/alice/status"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let resp = reqwest::get(format!("http://{closed_addr}/sessions/alice/qr"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn login_cookie_grants_access_until_logout() {
    let (addr, _dir) = start_server(Some(TOKEN), false).await;
    let client = reqwest::Client::new();

    let bad = client
        .post(format!("http://{addr}/api/auth/login"))
        .json(&serde_json::json!({ "token": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 401);

    let missing = client
        .post(format!("http://{addr}/api/auth/login"))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 400);
    let body: serde_json::Value = missing.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let login = client
        .post(format!("http://{addr}/api/auth/login"))
        .json(&serde_json::json!({ "token": TOKEN }))
        .send()
        .await
        .unwrap();
    assert_eq!(login.status(), 200);
    let set_cookie = login
        .headers()
        .get("set-cookie")
        .expect("login sets a cookie")
        .to_str()
        .unwrap()
        .to_string();
    let cookie = set_cookie.split(';').next().unwrap().to_string();
    assert!(cookie.starts_with("paird_session="));

    let resp = client
        .get(format!("http://{addr}/sessions"))
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let logout = client
        .post(format!("http://{addr}/api/auth/logout"))
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(logout.status(), 200);

    let resp = client
        .get(format!("http://{addr}/sessions"))
        .header("Cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}
