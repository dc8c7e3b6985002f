//! End-to-end gateway tests: real store in a tempdir, scripted relay pool,
//! requests driven through the full router (trace layer and admission
//! controller included).

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use beacon_api::middleware::{AdmissionConfig, AdmissionState};
use beacon_api::routes::feed::FeedResponse;
use beacon_api::routes::resolve::ResolveResponse;
use beacon_api::{create_api_router, ApiError, AppState, ErrorCode};
use beacon_resolver::{Engine, ResolverConfig};
use beacon_storage::{RecordStore, StoreConfig};
use beacon_test_utils::{note, note_at, relay, ScriptedRelayPool};
use chrono::Utc;
use tempfile::TempDir;
use tower::ServiceExt;

fn test_resolver_config(general: &[&str]) -> ResolverConfig {
    ResolverConfig {
        general_pool: general.iter().map(|r| relay(r)).collect(),
        profile_pool: Vec::new(),
        id_pool: Vec::new(),
        min_candidates: 1,
        ..ResolverConfig::default()
    }
}

fn gateway(
    pool: Arc<ScriptedRelayPool>,
    config: ResolverConfig,
) -> (Router, Arc<RecordStore>, TempDir) {
    let dir = TempDir::new().expect("tempdir creation should succeed");
    let mut store_config = StoreConfig::new(dir.path());
    store_config.map_size_mb = 16;
    let store = Arc::new(RecordStore::open(&store_config).expect("store should open"));
    let engine = Engine::new(Arc::clone(&store), pool, config);
    let state = AppState::new(engine, Arc::clone(&store));
    let app = create_api_router(state, AdmissionState::new(AdmissionConfig::default()));
    (app, store, dir)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

fn json(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should read");
    serde_json::from_slice(&bytes).expect("body should be json")
}

#[tokio::test(start_paused = true)]
async fn test_cold_resolve_then_cache_hit() {
    let record = note(1, 2);
    let pool = Arc::new(ScriptedRelayPool::new().with_records(
        "general.example",
        Duration::from_millis(50),
        vec![record.clone()],
    ));
    let config = ResolverConfig {
        id_pool: vec![relay("general.example")],
        ..test_resolver_config(&["general.example"])
    };
    let (app, _store, _dir) = gateway(Arc::clone(&pool), config);
    let uri = format!("/rec-{}", record.id);

    let response = app.clone().oneshot(get(&uri)).await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let body: ResolveResponse = read_json(response).await;
    assert_eq!(body.record, record);
    assert_eq!(body.seen_on, vec![relay("general.example")]);

    // The write-through cache answers the second request alone.
    let queries_after_first = pool.total_queries();
    let response = app.clone().oneshot(get(&uri)).await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(pool.total_queries(), queries_after_first);
}

#[tokio::test(start_paused = true)]
async fn test_hint_parameter_reaches_the_race() {
    let record = note(1, 2);
    let pool = Arc::new(ScriptedRelayPool::new().with_records(
        "hideout.example",
        Duration::from_millis(50),
        vec![record.clone()],
    ));
    let (app, _store, _dir) = gateway(Arc::clone(&pool), test_resolver_config(&[]));

    let response = app
        .clone()
        .oneshot(get(&format!("/rec-{}?hint=hideout.example", record.id)))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let body: ResolveResponse = read_json(response).await;
    assert_eq!(body.seen_on, vec![relay("hideout.example")]);

    let response = app
        .clone()
        .oneshot(get(&format!("/rec-{}?hint=not%20a%20relay", record.id)))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::InvalidInput);
}

#[tokio::test]
async fn test_garbage_identifier_is_rejected() {
    let pool = Arc::new(ScriptedRelayPool::new());
    let (app, _store, _dir) = gateway(pool, test_resolver_config(&[]));

    let response = app.oneshot(get("/junk")).await.expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::InvalidIdentifier);
}

#[tokio::test(start_paused = true)]
async fn test_unresolvable_identifier_suggests_a_hint() {
    let record = note(7, 2);
    let pool = Arc::new(
        ScriptedRelayPool::new().with_empty("empty.example", Duration::from_millis(50)),
    );
    let (app, _store, _dir) = gateway(pool, test_resolver_config(&["empty.example"]));

    let response = app
        .oneshot(get(&format!("/rec-{}", record.id)))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::RecordNotFound);
    assert!(err.message.contains("?hint="));
}

#[tokio::test(start_paused = true)]
async fn test_ban_blocks_resolution_until_unban() {
    let record = note(1, 2);
    let pool = Arc::new(ScriptedRelayPool::new().with_records(
        "general.example",
        Duration::from_millis(50),
        vec![record.clone()],
    ));
    let config = ResolverConfig {
        id_pool: vec![relay("general.example")],
        ..test_resolver_config(&["general.example"])
    };
    let (app, _store, _dir) = gateway(pool, config);
    let admin_uri = format!("/admin/ban/record/{}", record.id);
    let uri = format!("/rec-{}", record.id);

    let response = app
        .clone()
        .oneshot(json("POST", &admin_uri, r#"{"reason":"takedown"}"#))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.clone().oneshot(get(&uri)).await.expect("request");
    assert_eq!(response.status(), StatusCode::GONE);
    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::RecordBanned);
    assert_eq!(err.message, "takedown");

    let response = app
        .clone()
        .oneshot(json("DELETE", &admin_uri, ""))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.clone().oneshot(get(&uri)).await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    // Unbanning twice reports there was nothing to lift.
    let response = app
        .clone()
        .oneshot(json("DELETE", &admin_uri, ""))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_banned_author_blocks_their_feed() {
    let author = beacon_test_utils::author_id(9);
    let pool = Arc::new(ScriptedRelayPool::new());
    let (app, _store, _dir) = gateway(pool, test_resolver_config(&[]));

    let response = app
        .clone()
        .oneshot(json(
            "POST",
            &format!("/admin/ban/author/{author}"),
            r#"{"reason":"spam"}"#,
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(get(&format!("/feed/auth-{author}")))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test(start_paused = true)]
async fn test_feed_returns_notes_newest_first() {
    let author = beacon_test_utils::author_id(9);
    let now = Utc::now();
    let older = note_at(1, 9, now - chrono::Duration::minutes(30));
    let newer = note_at(2, 9, now - chrono::Duration::minutes(5));
    let pool = Arc::new(ScriptedRelayPool::new().with_records(
        "home.example",
        Duration::from_millis(50),
        vec![older.clone(), newer.clone()],
    ));
    let (app, store, _dir) = gateway(pool, test_resolver_config(&["home.example"]));
    store
        .put_outbox_relays(&author, &[relay("home.example")], Duration::from_secs(3600))
        .expect("outbox seed should succeed");

    let response = app
        .oneshot(get(&format!("/feed/auth-{author}?limit=10")))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let body: FeedResponse = read_json(response).await;
    let ids: Vec<_> = body.records.iter().map(|r| r.record.id).collect();
    assert_eq!(ids, vec![newer.id, older.id]);
}

#[tokio::test]
async fn test_relay_listing_reads_the_secondary_index() {
    let pool = Arc::new(ScriptedRelayPool::new());
    let (app, store, _dir) = gateway(pool, test_resolver_config(&[]));

    let record = note(1, 2);
    store.put(&record).expect("put should succeed");
    store
        .attach_relays(&record.id, &[relay("lister.example")])
        .expect("attach should succeed");

    let response = app
        .clone()
        .oneshot(get("/relay/lister.example"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = read_json(response).await;
    assert_eq!(body["relay"], "lister.example");
    assert_eq!(body["ids"][0], record.id.to_string());

    let response = app
        .clone()
        .oneshot(get("/relay/not%20a%20relay"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_endpoints_answer() {
    let pool = Arc::new(ScriptedRelayPool::new());
    let (app, _store, _dir) = gateway(pool, test_resolver_config(&[]));

    for uri in ["/health/ping", "/health/live", "/health/ready"] {
        let response = app.clone().oneshot(get(uri)).await.expect("request");
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
    }
}

#[tokio::test]
async fn test_malformed_ban_id_is_rejected() {
    let pool = Arc::new(ScriptedRelayPool::new());
    let (app, _store, _dir) = gateway(pool, test_resolver_config(&[]));

    let response = app
        .oneshot(json("POST", "/admin/ban/record/zzzz", r#"{"reason":"x"}"#))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::InvalidInput);
}
