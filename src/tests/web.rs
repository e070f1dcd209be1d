use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::corpus::{ClassLabels, Corpus};
use crate::engine::{EngineOptions, RankingEngine};
use crate::web::{router, SharedState};

use super::support::{animals, fixture, MemoryQueryLog};

fn app() -> axum::Router {
    let fx = fixture(EngineOptions::default(), vec![2, 0]);
    router(SharedState::new(Arc::new(fx.engine)))
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn start(app: &axum::Router) -> String {
    let (status, body) = call(app, "POST", "/api/session/start", None).await;
    assert_eq!(status, StatusCode::OK);
    body["session"].as_str().unwrap().to_string()
}

#[test]
fn test_session_start_returns_first_target() {
    block_on(async {
        let app = app();
        let (status, body) = call(&app, "POST", "/api/session/start", None).await;

        assert_eq!(status, StatusCode::OK);
        assert!(!body["session"].as_str().unwrap().is_empty());
        assert_eq!(body["target"], json!(2));
    });
}

#[test]
fn test_text_search_and_feedback() {
    block_on(async {
        let app = app();
        let session = start(&app).await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/search/text",
            Some(json!({"session": session, "query": "cat"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"], json!([0, 1, 2]));

        let (status, body) = call(
            &app,
            "POST",
            "/api/feedback",
            Some(json!({"session": session, "positive": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"][0], json!(2));
    });
}

#[test]
fn test_next_target() {
    block_on(async {
        let app = app();
        let session = start(&app).await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/session/next_target",
            Some(json!({"session": session})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["target"], json!(0));
    });
}

#[test]
fn test_error_statuses() {
    block_on(async {
        let app = app();
        let session = start(&app).await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/feedback",
            Some(json!({"session": "nobody", "positive": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nobody"));

        let (status, _) = call(
            &app,
            "POST",
            "/api/feedback",
            Some(json!({"session": session, "positive": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &app,
            "POST",
            "/api/search/image",
            Some(json!({"session": session, "item": 3})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = call(
            &app,
            "POST",
            "/api/search/temporal",
            Some(json!({"session": session, "query": "cat dog"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            "POST",
            "/api/search/text",
            Some(json!({"session": session, "query": " "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    });
}

#[test]
fn test_temporal_and_image_search() {
    block_on(async {
        let app = app();
        let session = start(&app).await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/search/temporal",
            Some(json!({"session": session, "query": "cat>dog"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"], json!([0, 1, 2]));

        let (status, body) = call(
            &app,
            "POST",
            "/api/search/image",
            Some(json!({"session": session, "item": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"], json!([1, 0, 2]));
    });
}

#[test]
fn test_status() {
    block_on(async {
        let app = app();
        start(&app).await;

        let (status, body) = call(&app, "GET", "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"], json!(3));
        assert_eq!(body["dimensions"], json!(3));
        assert_eq!(body["model"], json!("stub"));
        assert_eq!(body["fusion"], json!("sum"));
        assert_eq!(body["targets"], json!(2));
        assert_eq!(body["sessions"], json!(1));
    });
}

/// Seven cats and a dog, labelled from a three-word noun list.
fn labelled_app() -> axum::Router {
    let mut vectors = vec![vec![1.0, 0.0, 0.0]; 7];
    vectors.push(vec![0.0, 1.0, 0.0]);
    let labels = ClassLabels::parse(
        "id;top\n1;[0]\n2;[0]\n3;[0]\n4;[0]\n5;[0]\n6;[0]\n7;[0]\n8;[1, 2]\n",
        "cat : 87.500\ndog : 12.500\nbird : 12.500\n",
    )
    .unwrap();

    let engine = RankingEngine::new(
        Arc::new(Corpus::from_vectors(vectors).unwrap()),
        Arc::new(animals()),
        Arc::new(MemoryQueryLog::default()),
        EngineOptions::default(),
    )
    .with_labels(labels);
    router(SharedState::new(Arc::new(engine)))
}

#[test]
fn test_search_reports_labels_and_top_classes() {
    block_on(async {
        let app = labelled_app();
        let session = start(&app).await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/search/text",
            Some(json!({"session": session, "query": "cat"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"], json!([0, 1, 2, 3, 4, 5, 6, 7]));
        assert_eq!(body["labels"][0], json!(["cat"]));
        assert_eq!(body["labels"][7], json!(["dog", "bird"]));
        assert_eq!(body["top_classes"], json!(["cat"]));

        let (status, body) = call(&app, "GET", "/api/classes", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["classes"][1], json!({"name": "dog", "frequency": 12.5}));
    });
}

#[test]
fn test_unlabelled_search_has_empty_labels() {
    block_on(async {
        let app = app();
        let session = start(&app).await;

        let (_, body) = call(
            &app,
            "POST",
            "/api/search/image",
            Some(json!({"session": session, "item": 0})),
        )
        .await;
        assert_eq!(body["labels"], json!([[], [], []]));
        assert_eq!(body["top_classes"], json!([]));

        let (_, body) = call(&app, "GET", "/api/classes", None).await;
        assert_eq!(body["classes"], json!([]));
    });
}
