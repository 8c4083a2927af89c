//! Integration tests for groundwork-dispatch API endpoints
//!
//! Tests cover:
//! - Health endpoint
//! - POST /api/actions success envelope
//! - Error envelopes and status codes

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use groundwork_common::db::{init_database, PersistenceGateway};
use groundwork_common::{
    AssociationDefinition, EntityDefinition, EntityRegistry, FieldDefinition, FieldType,
};
use groundwork_dispatch::{build_router, ActionDispatcher, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot` method

/// Test helper: file-backed database with a small author/book model
async fn setup_gateway(dir: &TempDir) -> PersistenceGateway {
    let registry = EntityRegistry::from_definitions(vec![
        EntityDefinition::new("Author")
            .field(FieldDefinition::new("name", FieldType::String).not_null())
            .association(AssociationDefinition::one_to_many("books", "Book", "author"))
            .archivable(),
        EntityDefinition::new("Book")
            .field(FieldDefinition::new("title", FieldType::String).unique())
            .field(FieldDefinition::new("published", FieldType::Date))
            .association(AssociationDefinition::many_to_one("author", "Author").inversed_by("books")),
    ])
    .expect("Should build registry");

    let pool = init_database(&dir.path().join("groundwork.db"))
        .await
        .expect("Should open test database");
    let gateway = PersistenceGateway::new(pool, Arc::new(registry));
    gateway.sync_schema().await.expect("Should create schema");
    gateway
}

/// Test helper: Create app with test state
fn setup_app(gateway: PersistenceGateway) -> axum::Router {
    let state = AppState::new(ActionDispatcher::new(gateway, true));
    build_router(state)
}

fn test_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Test helper: POST an action document
fn post_actions(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/actions")
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

/// Test helper: Extract JSON body from response
async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

// =============================================================================
// Health Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(setup_gateway(&dir).await);

    let response = app.oneshot(test_request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "groundwork-dispatch");
    assert!(body["version"].is_string());
}

// =============================================================================
// Action Endpoint Tests
// =============================================================================

#[tokio::test]
async fn test_actions_success_envelope() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(setup_gateway(&dir).await);

    let document = json!({"actions": {
        "create": {
            "Author": {"le_guin": {"name": "Ursula K. Le Guin"}},
            "Book": {"earthsea": {"title": "A Wizard of Earthsea", "published": "1968-11-01", "author": "le_guin"}}
        },
        "response": {"Author": {"author": {"getter": "le_guin", "includes": ["name", "books"]}}}
    }});
    let response = app.oneshot(post_actions(document.to_string())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["code"], 200);
    assert_eq!(body["message"], "success");
    assert_eq!(body["created"]["le_guin"], json!({"entityName": "Author", "entityId": 1}));
    assert_eq!(body["created"]["earthsea"]["entityName"], "Book");
    assert_eq!(
        body["data"]["author"],
        json!([{"name": "Ursula K. Le Guin", "books": [1]}])
    );
    assert!(body["responseTime"].is_u64());
    assert!(body.get("pagination").is_none());
}

#[tokio::test]
async fn test_actions_commit_across_requests() {
    let dir = TempDir::new().unwrap();
    let gateway = setup_gateway(&dir).await;

    let create = json!({"actions": {"create": {"Author": {"a": {"name": "Octavia Butler"}}}}});
    let response = setup_app(gateway.clone())
        .oneshot(post_actions(create.to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let delete = json!({"actions": {
        "delete": {"Author": {"gone": {"findOneBy": {"name": "Octavia Butler"}}}},
        "response": {"Author": {"all": {"findAll": true, "limit": 10}}}
    }});
    let response = setup_app(gateway)
        .oneshot(post_actions(delete.to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(
        body["removed"]["gone"],
        json!({"type": "soft", "entityName": "Author", "entityId": 1})
    );
    assert_eq!(body["data"]["all"][0]["isArchive"], true);
    assert_eq!(body["pagination"]["totalRecords"], 1);
    assert_eq!(body["pagination"]["totalPages"], 1);
}

// =============================================================================
// Error Envelope Tests
// =============================================================================

#[tokio::test]
async fn test_empty_body_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(setup_gateway(&dir).await);

    let response = app.oneshot(post_actions(Body::empty())).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["code"], 400);
    assert!(body["message"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(setup_gateway(&dir).await);

    let response = app.oneshot(post_actions("{\"actions\": ")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_record_is_not_found() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(setup_gateway(&dir).await);

    let document = json!({"actions": {
        "delete": {"Book": {"b": {"findOneBy": {"title": "Kindred"}}}}
    }});
    let response = app.oneshot(post_actions(document.to_string())).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["code"], 404);
    assert!(body["data"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn test_validation_failure_is_unprocessable_and_rolled_back() {
    let dir = TempDir::new().unwrap();
    let gateway = setup_gateway(&dir).await;

    let document = json!({"actions": {"create": {"Author": {
        "ok": {"name": "Kept Nowhere"},
        "bad": {"name": "Extra", "rating": 5}
    }}}});
    let response = setup_app(gateway.clone())
        .oneshot(post_actions(document.to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["code"], 422);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("This form should not contain extra fields."));

    let check = json!({"actions": {"response": {"Author": {"all": {"findAll": true}}}}});
    let response = setup_app(gateway)
        .oneshot(post_actions(check.to_string()))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["data"]["all"], json!([]));
}

#[tokio::test]
async fn test_ambiguous_update_is_conflict() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(setup_gateway(&dir).await);

    let document = json!({"actions": {"update": {"Author": {"u": {
        "findBy": {"name": "Nobody"},
        "updateRecord": {"name": "Somebody"}
    }}}}});
    let response = app.oneshot(post_actions(document.to_string())).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unknown_action_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let app = setup_app(setup_gateway(&dir).await);

    let document = json!({"actions": {"truncate": {"Author": {}}}});
    let response = app.oneshot(post_actions(document.to_string())).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
