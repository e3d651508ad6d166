mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{block, doc, settings, setup_pool, FakeNotion};
use serde_json::Value;
use tower::ServiceExt;
use wiki_sync::db;
use wiki_sync::server::{router, AppState};

const SECRET: &str = "test-secret";

fn app(pool: sqlx::SqlitePool, notion: FakeNotion) -> Router {
    router(AppState {
        pool,
        source: Arc::new(notion),
        settings: Arc::new(settings()),
        sync_secret: Arc::from(SECRET),
    })
}

fn sync_request(token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/sync")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn sync_without_token_is_unauthorized() {
    let pool = setup_pool().await;
    let notion = FakeNotion::with_documents(vec![doc("p1", "One", "Guides")]);
    let app = app(pool.clone(), notion.clone());

    for token in [None, Some("wrong")] {
        let resp = app
            .clone()
            .oneshot(sync_request(token, "{}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(resp).await;
        assert_eq!(body["error"], "Unauthorized");
    }

    assert_eq!(db::count_runs(&pool).await.unwrap(), 0);
    assert!(notion.query_calls().await.is_empty());
}

#[tokio::test]
async fn authorized_sync_returns_report() {
    let pool = setup_pool().await;
    let notion = FakeNotion::with_documents(vec![
        doc("p1", "One", "Guides"),
        doc("p2", "Two", "Reference"),
    ]);
    notion
        .set_children("p1", vec![block("a", "1"), block("b", "2")])
        .await;

    let resp = app(pool.clone(), notion)
        .oneshot(sync_request(Some(SECRET), r#"{"pageSize": 1, "debugLog": false}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = json_body(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["pagesCount"], 2);
    assert_eq!(body["blocksCount"], 2);
    assert_eq!(body["totalPagesFetched"], 2);
    assert_eq!(body["processedPages"], 2);
    assert_eq!(body["hasMorePages"], false);
    assert!(body["nextCursor"].is_null());
    assert!(body["errors"].is_null());
    assert!(body["runId"].is_string());
}

#[tokio::test]
async fn empty_body_uses_defaults() {
    let pool = setup_pool().await;
    let notion = FakeNotion::with_documents(vec![doc("p1", "One", "Guides")]);

    let resp = app(pool, notion.clone())
        .oneshot(sync_request(Some(SECRET), ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let calls = notion.query_calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].page_size, 10);
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let pool = setup_pool().await;
    let notion = FakeNotion::with_documents(vec![doc("p1", "One", "Guides")]);

    let resp = app(pool.clone(), notion)
        .oneshot(sync_request(Some(SECRET), "{\"pageSize\": \"ten\""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = json_body(resp).await;
    assert_eq!(body["error"], "Invalid request body");
    assert!(body["details"].is_string());
    assert_eq!(db::count_runs(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn aborted_sync_is_server_error() {
    let pool = setup_pool().await;
    let notion = FakeNotion::with_documents(vec![doc("p1", "One", "Guides")]);
    notion.fail_listing();

    let resp = app(pool, notion)
        .oneshot(sync_request(Some(SECRET), "{}"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(resp).await;
    assert_eq!(body["error"], "Sync failed");
    assert!(body["details"]
        .as_str()
        .unwrap()
        .contains("listing unavailable"));
}

#[tokio::test]
async fn held_lease_is_conflict() {
    let pool = setup_pool().await;
    db::acquire_lease(&pool, common::DATABASE_ID, "other", chrono::Utc::now(), 600)
        .await
        .unwrap();
    let notion = FakeNotion::with_documents(vec![doc("p1", "One", "Guides")]);

    let resp = app(pool, notion)
        .oneshot(sync_request(Some(SECRET), "{}"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn sync_status_reflects_last_run() {
    let pool = setup_pool().await;
    let notion = FakeNotion::with_documents(vec![
        doc("p1", "One", "Guides"),
        doc("p2", "Two", "Guides"),
        doc("p3", "Three", "Reference"),
    ]);
    let app = app(pool, notion);

    let empty = app
        .clone()
        .oneshot(Request::get("/sync-status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::OK);
    let body = json_body(empty).await;
    assert!(body["lastSync"].is_null());
    assert!(body["timeSinceLastSync"].is_null());
    assert_eq!(body["totalPages"], 0);

    let resp = app
        .clone()
        .oneshot(sync_request(Some(SECRET), "{}"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(Request::get("/sync-status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = json_body(resp).await;
    assert_eq!(body["lastSync"]["status"], "completed");
    assert_eq!(body["lastSync"]["pagesCount"], 3);
    assert_eq!(body["timeSinceLastSync"], "just now");
    assert_eq!(body["totalPages"], 3);
    assert_eq!(body["categories"][0]["category"], "Guides");
    assert_eq!(body["categories"][0]["count"], 2);
    assert_eq!(body["categories"][1]["category"], "Reference");
}

#[tokio::test]
async fn health_reports_ok() {
    let pool = setup_pool().await;
    let resp = app(pool, FakeNotion::default())
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}
