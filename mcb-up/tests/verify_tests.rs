//! Title verification integration tests
//!
//! Runs the verifier against a local stub of the repository lookup API so
//! request counting, debounce coalescing and cancellation can be observed
//! end to end.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use mcb_common::config::ApiConfig;
use mcb_common::types::TitleStatus;
use mcb_up::denylist::Denylist;
use mcb_up::store::{SharedStore, Store};
use mcb_up::verify::TitleVerifier;

/// Stub lookup endpoint. Records the `titles` parameter of every request.
/// Titles containing "Taken" exist, titles containing "Nowhere" are left out
/// of the response entirely, everything else is reported missing.
/// Underscores normalize to spaces, as the real API does.
#[derive(Clone, Default)]
struct StubState {
    hits: Arc<Mutex<Vec<String>>>,
    delay_ms: u64,
    failure: Option<Failure>,
}

#[derive(Clone, Copy)]
enum Failure {
    MalformedBody,
    ServerError,
}

async fn lookup(
    State(state): State<StubState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let titles = params.get("titles").cloned().unwrap_or_default();
    state.hits.lock().unwrap().push(titles.clone());

    if state.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(state.delay_ms)).await;
    }

    match state.failure {
        Some(Failure::MalformedBody) => {
            return "this is not the lookup shape".into_response();
        }
        Some(Failure::ServerError) => {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        None => {}
    }

    let mut normalized = Vec::new();
    let mut pages = Vec::new();
    for title in titles.split('|').filter(|t| !t.is_empty()) {
        if title.contains("Nowhere") {
            continue;
        }
        let canonical = title.replace('_', " ");
        if canonical != title {
            normalized.push(json!({ "from": title, "to": canonical }));
        }
        if canonical.contains("Taken") {
            pages.push(json!({ "title": canonical, "revisions": [{ "revid": 1 }] }));
        } else {
            pages.push(json!({ "title": canonical, "missing": true }));
        }
    }
    Json(json!({ "query": { "normalized": normalized, "pages": pages } })).into_response()
}

async fn spawn_stub(state: StubState) -> ApiConfig {
    let app = Router::new()
        .route("/w/api.php", get(lookup))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    ApiConfig {
        base_url: format!("http://{addr}/w/api.php"),
        ..ApiConfig::default()
    }
}

/// Store of selected items with explicit titles.
async fn store_with(titles: &[(&str, &str)]) -> SharedStore {
    let store = Store::shared(Default::default());
    {
        let mut guard = store.write().await;
        guard.replace_with_skeletons(titles.iter().map(|(id, _)| id.to_string()).collect());
        guard.select_all(true);
        for (id, title) in titles {
            guard.item_mut(id).unwrap().meta.title = Some(title.to_string());
        }
    }
    store
}

async fn status_of(store: &SharedStore, id: &str) -> Option<TitleStatus> {
    store.read().await.item(id).unwrap().meta.title_status
}

#[tokio::test]
async fn immediate_mode_classifies_against_the_repository() {
    let state = StubState::default();
    let api = spawn_stub(state.clone()).await;
    let store = store_with(&[
        ("a", "Free picture.jpg"),
        ("b", "Taken picture.jpg"),
        ("c", "Nowhere picture.jpg"),
    ])
    .await;
    let verifier = TitleVerifier::new(store.clone(), Denylist::shared(), &api).unwrap();

    verifier
        .verify(
            &["a".to_string(), "b".to_string(), "c".to_string()],
            false,
        )
        .await;

    assert_eq!(status_of(&store, "a").await, Some(TitleStatus::Available));
    assert_eq!(status_of(&store, "b").await, Some(TitleStatus::Taken));
    assert_eq!(status_of(&store, "c").await, Some(TitleStatus::Unknown));

    // All three fit one chunk
    let hits = state.hits.lock().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(
        hits[0],
        "File:Free picture.jpg|File:Taken picture.jpg|File:Nowhere picture.jpg"
    );
}

#[tokio::test]
async fn normalization_map_resolves_requested_titles() {
    let state = StubState::default();
    let api = spawn_stub(state.clone()).await;
    let store = store_with(&[("a", "Under_scored shot.jpg")]).await;
    let verifier = TitleVerifier::new(store.clone(), Denylist::shared(), &api).unwrap();

    verifier.verify(&["a".to_string()], false).await;

    // The response reports the page under its normalized title; the
    // verifier must still match it back to the requested one.
    assert_eq!(status_of(&store, "a").await, Some(TitleStatus::Available));
}

#[tokio::test]
async fn local_failures_skip_the_network_entirely() {
    let state = StubState::default();
    let api = spawn_stub(state.clone()).await;
    let store = store_with(&[
        ("a", "Same.jpg"),
        ("b", "Same.jpg"),
        ("c", "notes.txt"),
        ("d", "DSC_0001.jpg"),
    ])
    .await;
    let denylist = Arc::new(RwLock::new(Denylist::from_pages("DSC_\n", "")));
    let verifier = TitleVerifier::new(store.clone(), denylist, &api).unwrap();

    verifier
        .verify(
            &[
                "a".to_string(),
                "b".to_string(),
                "c".to_string(),
                "d".to_string(),
            ],
            false,
        )
        .await;

    assert_eq!(status_of(&store, "a").await, Some(TitleStatus::Duplicate));
    assert_eq!(status_of(&store, "b").await, Some(TitleStatus::Duplicate));
    assert_eq!(status_of(&store, "c").await, Some(TitleStatus::Invalid));
    assert_eq!(status_of(&store, "d").await, Some(TitleStatus::Blacklisted));
    assert!(state.hits.lock().unwrap().is_empty());
}

#[tokio::test]
async fn debounced_edits_coalesce_into_one_lookup() {
    let state = StubState::default();
    let api = spawn_stub(state.clone()).await;
    let store = store_with(&[("a", "First try.jpg")]).await;
    let verifier = TitleVerifier::new(store.clone(), Denylist::shared(), &api).unwrap();

    verifier.verify(&["a".to_string()], true).await;
    store.write().await.item_mut("a").unwrap().meta.title = Some("Second try.jpg".to_string());
    verifier.verify(&["a".to_string()], true).await;
    store.write().await.item_mut("a").unwrap().meta.title = Some("Final try.jpg".to_string());
    verifier.verify(&["a".to_string()], true).await;

    tokio::time::sleep(Duration::from_millis(400)).await;

    // Only the trailing edit reaches the network
    let hits = state.hits.lock().unwrap().clone();
    assert_eq!(hits, vec!["File:Final try.jpg".to_string()]);
    assert_eq!(status_of(&store, "a").await, Some(TitleStatus::Available));
}

#[tokio::test]
async fn cancel_stops_chunking_and_resets_checking_items() {
    let state = StubState {
        delay_ms: 300,
        ..StubState::default()
    };
    let api = spawn_stub(state.clone()).await;

    // Two chunks' worth of items against a slow endpoint
    let titles: Vec<(String, String)> = (0..60)
        .map(|i| (format!("img-{i}"), format!("Crossing {i}.jpg")))
        .collect();
    let borrowed: Vec<(&str, &str)> = titles
        .iter()
        .map(|(id, title)| (id.as_str(), title.as_str()))
        .collect();
    let store = store_with(&borrowed).await;
    let verifier = TitleVerifier::new(store.clone(), Denylist::shared(), &api).unwrap();

    let ids: Vec<String> = titles.iter().map(|(id, _)| id.clone()).collect();
    let running = {
        let verifier = verifier.clone();
        tokio::spawn(async move { verifier.verify(&ids, false).await })
    };

    // First chunk is in flight, every item is marked checking
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(status_of(&store, "img-0").await, Some(TitleStatus::Checking));

    verifier.cancel().await;
    running.await.unwrap();

    assert_eq!(status_of(&store, "img-0").await, Some(TitleStatus::Unknown));
    assert_eq!(status_of(&store, "img-59").await, Some(TitleStatus::Unknown));

    // The aborted chunk must not be applied late, and the second chunk
    // must never be requested
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(status_of(&store, "img-0").await, Some(TitleStatus::Unknown));
    assert_eq!(state.hits.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_lookup_body_yields_unknown_for_the_whole_chunk() {
    let state = StubState {
        failure: Some(Failure::MalformedBody),
        ..StubState::default()
    };
    let api = spawn_stub(state.clone()).await;
    let store = store_with(&[("a", "Free one.jpg"), ("b", "Taken one.jpg")]).await;
    let verifier = TitleVerifier::new(store.clone(), Denylist::shared(), &api).unwrap();

    verifier.verify(&["a".to_string(), "b".to_string()], false).await;

    // An unparseable body is never a caller-visible error; every candidate
    // in the chunk lands on unknown.
    assert_eq!(status_of(&store, "a").await, Some(TitleStatus::Unknown));
    assert_eq!(status_of(&store, "b").await, Some(TitleStatus::Unknown));
    assert_eq!(state.hits.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn transport_failure_leaves_items_checking_for_retry() {
    let state = StubState {
        failure: Some(Failure::ServerError),
        ..StubState::default()
    };
    let api = spawn_stub(state.clone()).await;
    let store = store_with(&[("a", "Free one.jpg"), ("b", "Taken one.jpg")]).await;
    let verifier = TitleVerifier::new(store.clone(), Denylist::shared(), &api).unwrap();

    verifier.verify(&["a".to_string(), "b".to_string()], false).await;

    // A failed round trip keeps the checking marker so the caller can retry
    assert_eq!(status_of(&store, "a").await, Some(TitleStatus::Checking));
    assert_eq!(status_of(&store, "b").await, Some(TitleStatus::Checking));
    assert_eq!(state.hits.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn fired_debounce_timers_are_pruned_at_the_next_registration() {
    let state = StubState::default();
    let api = spawn_stub(state.clone()).await;
    let store = store_with(&[("a", "First shot.jpg"), ("b", "Second shot.jpg")]).await;
    let verifier = TitleVerifier::new(store.clone(), Denylist::shared(), &api).unwrap();

    verifier.verify(&["a".to_string()], true).await;
    assert_eq!(verifier.pending_debounces().await, 1);

    // Let the first timer fire and its lookup complete
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(status_of(&store, "a").await, Some(TitleStatus::Available));

    // Registering the next timer prunes the finished handle
    verifier.verify(&["b".to_string()], true).await;
    assert_eq!(verifier.pending_debounces().await, 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(status_of(&store, "b").await, Some(TitleStatus::Available));
}

#[tokio::test]
async fn cancel_when_idle_is_a_no_op_and_does_not_poison_later_checks() {
    let state = StubState::default();
    let api = spawn_stub(state.clone()).await;
    let store = store_with(&[("a", "Quiet street.jpg")]).await;
    let verifier = TitleVerifier::new(store.clone(), Denylist::shared(), &api).unwrap();

    verifier.cancel().await;
    assert_eq!(status_of(&store, "a").await, None);

    // A fresh check after a cancel runs under a fresh signal
    verifier.verify(&["a".to_string()], false).await;
    assert_eq!(status_of(&store, "a").await, Some(TitleStatus::Available));
    assert_eq!(state.hits.lock().unwrap().len(), 1);
}
