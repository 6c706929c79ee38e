//! Route tests driving the router with tower's oneshot

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, NaiveDate, Utc};
use http_body_util::BodyExt;
use tower::ServiceExt;

use brim_core::{
    AccountConnection, ConnectionStatus, Credentials, Direction, EngineConfig, MemoryStore,
    MockFeed, NewTransaction, ServerConfig, Store, SyncEngine,
};

use crate::{build_router, AppState};

fn feed_tx(external_id: &str, date: NaiveDate, cents: i64, desc: &str) -> NewTransaction {
    NewTransaction {
        external_id: external_id.to_string(),
        date,
        description: desc.to_string(),
        amount_cents: cents,
        direction: if cents < 0 {
            Direction::Outgoing
        } else {
            Direction::Incoming
        },
        currency: "USD".into(),
        labels: vec![],
        category_hint: None,
    }
}

fn connection(account_id: i64, user_id: i64) -> AccountConnection {
    AccountConnection {
        account_id,
        user_id,
        status: ConnectionStatus::Active,
        credentials: Credentials {
            access_token: "token".into(),
            refresh_token: Some("refresh".into()),
            expires_at: Utc::now() + Duration::hours(1),
        },
        last_synced_at: None,
        next_recalibration_at: None,
        last_error: None,
    }
}

/// Router + state over a mock feed with the given transactions
async fn test_app(transactions: Vec<NewTransaction>) -> (Router, Arc<AppState>) {
    let store = Arc::new(MemoryStore::new());
    store.upsert_connection(&connection(1, 1)).await.unwrap();
    store.upsert_connection(&connection(2, 1)).await.unwrap();

    let engine = Arc::new(SyncEngine::new(
        store,
        Arc::new(MockFeed::with_transactions(transactions)),
        None,
        EngineConfig::default(),
    ));
    let state = Arc::new(AppState {
        engine,
        config: ServerConfig::default(),
    });
    (build_router(state.clone()), state)
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

async fn post_json(router: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_endpoint_responds() {
    let (router, _) = test_app(vec![]).await;
    let (status, body) = get_json(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn summary_is_404_until_first_sync() {
    let today = Utc::now().date_naive();
    let (router, _) = test_app(vec![feed_tx("a", today, -4_200, "STARBUCKS COFFEE")]).await;

    let (status, _) = get_json(&router, "/api/accounts/1/summary").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = post_json(&router, "/api/accounts/1/sync", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["inserted"], 1);

    let (status, summary) = get_json(&router, "/api/accounts/1/summary").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["account_id"], 1);
    // One coffee this month: no closed history yet
    assert_eq!(summary["closed_months_analyzed"], 0);

    let (status, aggregate) = get_json(&router, "/api/users/1/summary").await;
    assert_eq!(status, StatusCode::OK);
    assert!(aggregate["account_id"].is_null());
}

#[tokio::test]
async fn sync_conflicts_while_claim_is_held() {
    let (router, state) = test_app(vec![]).await;

    let _guard = state.engine.in_flight().try_begin(1).unwrap();
    let (status, body) = post_json(&router, "/api/accounts/1/sync", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already running"));
}

#[tokio::test]
async fn sync_unknown_account_is_404() {
    let (router, _) = test_app(vec![]).await;
    let (status, _) = post_json(&router, "/api/accounts/99/sync", serde_json::json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bills_and_patterns_flow_through_the_api() {
    let today = Utc::now().date_naive();
    let base = today - Duration::days(70);
    let (router, _) = test_app(vec![
        feed_tx("n1", base, -1_499, "NETFLIX.COM"),
        feed_tx("n2", base + Duration::days(30), -1_499, "NETFLIX.COM"),
        feed_tx("n3", base + Duration::days(60), -1_499, "NETFLIX.COM"),
    ])
    .await;

    post_json(&router, "/api/accounts/1/sync", serde_json::json!({})).await;

    let (status, patterns) = get_json(&router, "/api/users/1/patterns").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patterns.as_array().unwrap().len(), 1);
    let merchant = patterns[0]["merchant"].as_str().unwrap().to_string();
    assert_eq!(patterns[0]["frequency"], "monthly");

    let (status, bills) = get_json(&router, "/api/users/1/bills").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bills.as_array().unwrap().len(), 1);
    assert_eq!(bills[0]["merchant"], merchant.as_str());

    // Dismissing removes it from active patterns and bills
    let (status, body) = post_json(
        &router,
        "/api/users/1/patterns/dismiss",
        serde_json::json!({ "merchant": merchant }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, patterns) = get_json(&router, "/api/users/1/patterns").await;
    assert!(patterns.as_array().unwrap().is_empty());
    let (_, bills) = get_json(&router, "/api/users/1/bills").await;
    assert!(bills.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn dismissing_unknown_pattern_is_404() {
    let (router, _) = test_app(vec![]).await;
    let (status, _) = post_json(
        &router,
        "/api/users/1/patterns/dismiss",
        serde_json::json!({ "merchant": "nobody" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn transaction_listing_honors_filters() {
    let today = Utc::now().date_naive();
    let (router, state) = test_app(vec![
        feed_tx("a", today, -4_200, "STARBUCKS COFFEE"),
        feed_tx("b", today, 1_000, "REFUND ACME STORE"),
    ])
    .await;
    post_json(&router, "/api/accounts/1/sync", serde_json::json!({})).await;

    // Seed a second account's transaction directly
    state
        .engine
        .store()
        .upsert_transactions(2, 1, &[feed_tx("c", today, -900, "CORNER CAFE")])
        .await
        .unwrap();

    let (status, all) = get_json(&router, "/api/users/1/transactions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 3);

    let (_, one_account) = get_json(&router, "/api/users/1/transactions?account_id=1").await;
    assert_eq!(one_account.as_array().unwrap().len(), 2);

    // The refund was classified as excluded; analysis_only drops it
    let (_, analysis) =
        get_json(&router, "/api/users/1/transactions?account_id=1&analysis_only=true").await;
    assert_eq!(analysis.as_array().unwrap().len(), 1);
    assert_eq!(analysis[0]["description"], "STARBUCKS COFFEE");
}
