//! Write Operation Tests
//!
//! Create, update, delete and relationship mutations:
//! - Validation failures leave storage untouched
//! - Dangling linkage is 404 with zero writes
//! - Relationship permissions are enforced per collection
//! - A cancelled request issues no writes

mod common;

use serde_json::json;

use apiary::catalog::CollectionOptions;
use apiary::engine::{ApiRequest, CancellationFlag, HookRegistry, Route, CLIENT_CLOSED_REQUEST};

use common::{setup_api, setup_api_with, BASE_URL};

fn linkage_ids(body: &serde_json::Value) -> Vec<String> {
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect()
}

// =============================================================================
// Create
// =============================================================================

/// Server-generated ids, 201 and a Location header
#[tokio::test]
async fn test_create_assigns_id() {
    let fx = setup_api();
    let request = ApiRequest::post(
        Route::collection("people"),
        json!({"data": {"type": "people", "attributes": {"name": "Cy"}}}),
    );

    let response = fx.send(request).await;

    assert_eq!(response.status, 201);
    let body = response.body();
    assert_eq!(body["data"]["id"], json!("3"));
    assert_eq!(body["data"]["attributes"]["name"], json!("Cy"));
    assert_eq!(response.header("Location"), Some(format!("{}/people/3", BASE_URL).as_str()));
    assert_eq!(fx.storage.count("create people"), 1);
}

/// Created relationships are written with the resource
#[tokio::test]
async fn test_create_with_relationship() {
    let fx = setup_api();
    let request = ApiRequest::post(
        Route::collection("articles"),
        json!({"data": {
            "type": "articles",
            "attributes": {"title": "Zig"},
            "relationships": {"author": {"data": {"type": "people", "id": "2"}}}
        }}),
    );

    let response = fx.send(request).await;

    assert_eq!(response.status, 201);
    assert_eq!(
        response.body()["data"]["relationships"]["author"]["data"],
        json!({"type": "people", "id": "2"})
    );

    let linked = fx
        .send(ApiRequest::get(Route::relationship("people", "2", "articles")))
        .await
        .body();
    assert_eq!(linkage_ids(&linked), vec!["3"]);
}

/// Client ids are refused unless the collection allows them
#[tokio::test]
async fn test_client_id_forbidden() {
    let fx = setup_api();
    let request = ApiRequest::post(
        Route::collection("people"),
        json!({"data": {"type": "people", "id": "7", "attributes": {"name": "Cy"}}}),
    );

    let response = fx.send(request).await;

    assert_eq!(response.status, 403);
    assert_eq!(fx.storage.writes(), 0);
}

/// Allowed client ids are kept; reusing one is a conflict
#[tokio::test]
async fn test_client_id_allowed_and_conflict() {
    let options = CollectionOptions {
        allow_client_generated_ids: true,
        ..Default::default()
    };
    let fx = setup_api_with(options, HookRegistry::new());
    let create = |id: &str| {
        ApiRequest::post(
            Route::collection("people"),
            json!({"data": {"type": "people", "id": id, "attributes": {"name": "Cy"}}}),
        )
    };

    let created = fx.send(create("7")).await;
    assert_eq!(created.status, 201);
    assert_eq!(created.body()["data"]["id"], json!("7"));

    fx.storage.reset();
    let conflict = fx.send(create("1")).await;
    assert_eq!(conflict.status, 409);
    assert_eq!(fx.storage.writes(), 0);
}

/// Wrong resource type is a conflict
#[tokio::test]
async fn test_create_type_mismatch() {
    let fx = setup_api();
    let request = ApiRequest::post(
        Route::collection("people"),
        json!({"data": {"type": "articles", "attributes": {"title": "x"}}}),
    );

    let response = fx.send(request).await;

    assert_eq!(response.status, 409);
    assert_eq!(response.body()["errors"][0]["source"]["pointer"], json!("/data/type"));
}

/// Unknown attributes are rejected with a pointer
#[tokio::test]
async fn test_create_unknown_attribute() {
    let fx = setup_api();
    let request = ApiRequest::post(
        Route::collection("people"),
        json!({"data": {"type": "people", "attributes": {"age": 30}}}),
    );

    let response = fx.send(request).await;

    assert_eq!(response.status, 400);
    assert_eq!(fx.storage.writes(), 0);
}

/// A missing body is a 400
#[tokio::test]
async fn test_create_without_body() {
    let fx = setup_api();

    let response = fx
        .send(apiary::engine::ApiRequest::new(
            apiary::engine::Method::Post,
            Route::collection("people"),
        ))
        .await;

    assert_eq!(response.status, 400);
}

/// Linking to a resource that does not exist is 404 and writes nothing
#[tokio::test]
async fn test_dangling_linkage_writes_nothing() {
    let fx = setup_api();
    let request = ApiRequest::post(
        Route::collection("articles"),
        json!({"data": {
            "type": "articles",
            "attributes": {"title": "Zig"},
            "relationships": {"author": {"data": {"type": "people", "id": "99"}}}
        }}),
    );

    let response = fx.send(request).await;

    assert_eq!(response.status, 404);
    assert_eq!(fx.storage.writes(), 0);
}

// =============================================================================
// Update and Delete
// =============================================================================

/// Partial update changes only the named attributes
#[tokio::test]
async fn test_update_attributes() {
    let fx = setup_api();
    let request = ApiRequest::patch(
        Route::resource("people", "1"),
        json!({"data": {"type": "people", "id": "1", "attributes": {"name": "Annie"}}}),
    );

    let response = fx.send(request).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body()["data"]["attributes"]["name"], json!("Annie"));
    assert_eq!(fx.storage.count("update people/1"), 1);
}

/// Body id must match the URL id
#[tokio::test]
async fn test_update_id_mismatch() {
    let fx = setup_api();
    let request = ApiRequest::patch(
        Route::resource("people", "1"),
        json!({"data": {"type": "people", "id": "2", "attributes": {"name": "x"}}}),
    );

    let response = fx.send(request).await;

    assert_eq!(response.status, 409);
    assert_eq!(fx.storage.writes(), 0);
}

/// Updating a missing resource is 404
#[tokio::test]
async fn test_update_missing_resource() {
    let fx = setup_api();
    let request = ApiRequest::patch(
        Route::resource("people", "99"),
        json!({"data": {"type": "people", "id": "99", "attributes": {"name": "x"}}}),
    );

    let response = fx.send(request).await;

    assert_eq!(response.status, 404);
    assert_eq!(fx.storage.writes(), 0);
}

/// Delete returns 204 once, then 404
#[tokio::test]
async fn test_delete_then_missing() {
    let fx = setup_api();

    let first = fx.send(ApiRequest::delete(Route::resource("comments", "1"))).await;
    let second = fx.send(ApiRequest::delete(Route::resource("comments", "1"))).await;

    assert_eq!(first.status, 204);
    assert!(first.document.is_none());
    assert_eq!(second.status, 404);
}

/// DELETE on a collection is not an operation
#[tokio::test]
async fn test_delete_collection_not_allowed() {
    let fx = setup_api();

    let response = fx.send(ApiRequest::delete(Route::collection("people"))).await;

    assert_eq!(response.status, 405);
    assert!(fx.storage.calls().is_empty());
}

// =============================================================================
// Relationship Mutations
// =============================================================================

/// Full replacement of a to-many relationship
#[tokio::test]
async fn test_replace_to_many() {
    let fx = setup_api();
    let request = ApiRequest::patch(
        Route::relationship("people", "2", "articles"),
        json!({"data": [{"type": "articles", "id": "1"}]}),
    );

    let response = fx.send(request).await;
    assert_eq!(response.status, 204);

    let bo = fx
        .send(ApiRequest::get(Route::relationship("people", "2", "articles")))
        .await
        .body();
    let ann = fx
        .send(ApiRequest::get(Route::relationship("people", "1", "articles")))
        .await
        .body();
    assert_eq!(linkage_ids(&bo), vec!["1"]);
    assert_eq!(linkage_ids(&ann), vec!["2"]);
}

/// Adding members keeps existing ones and ignores duplicates
#[tokio::test]
async fn test_add_to_many() {
    let fx = setup_api();
    let request = ApiRequest::post(
        Route::relationship("people", "2", "articles"),
        json!({"data": [{"type": "articles", "id": "2"}, {"type": "articles", "id": "2"}]}),
    );

    assert_eq!(fx.send(request).await.status, 204);

    let again = ApiRequest::post(
        Route::relationship("people", "2", "articles"),
        json!({"data": [{"type": "articles", "id": "1"}]}),
    );
    assert_eq!(fx.send(again).await.status, 204);

    let bo = fx
        .send(ApiRequest::get(Route::relationship("people", "2", "articles")))
        .await
        .body();
    assert_eq!(linkage_ids(&bo), vec!["1", "2"]);
}

/// Adding members is one append write, not a read followed by a full rewrite
#[tokio::test]
async fn test_add_is_single_append() {
    let fx = setup_api();
    let request = ApiRequest::post(
        Route::relationship("people", "2", "articles"),
        json!({"data": [{"type": "articles", "id": "1"}]}),
    );

    assert_eq!(fx.send(request).await.status, 204);

    assert_eq!(fx.storage.count("add_members people/2.articles"), 1);
    assert_eq!(fx.storage.count("fetch_related"), 0);
    assert_eq!(fx.storage.count("update"), 0);
    assert_eq!(fx.storage.writes(), 1);
}

/// Removing members unlinks only the named ones
#[tokio::test]
async fn test_remove_from_to_many() {
    let fx = setup_api();
    let request = ApiRequest::new(
        apiary::engine::Method::Delete,
        Route::relationship("people", "1", "articles"),
    )
    .with_body(json!({"data": [{"type": "articles", "id": "2"}]}));

    assert_eq!(fx.send(request).await.status, 204);

    let ann = fx
        .send(ApiRequest::get(Route::relationship("people", "1", "articles")))
        .await
        .body();
    let orphan = fx
        .send(ApiRequest::get(Route::relationship("articles", "2", "author")))
        .await
        .body();
    assert_eq!(linkage_ids(&ann), vec!["1"]);
    assert_eq!(orphan["data"], serde_json::Value::Null);
}

/// Replacing a to-one relationship, including clearing it
#[tokio::test]
async fn test_replace_to_one() {
    let fx = setup_api();
    let set = ApiRequest::patch(
        Route::relationship("articles", "1", "author"),
        json!({"data": {"type": "people", "id": "2"}}),
    );
    assert_eq!(fx.send(set).await.status, 204);

    let author = fx
        .send(ApiRequest::get(Route::relationship("articles", "1", "author")))
        .await
        .body();
    assert_eq!(author["data"], json!({"type": "people", "id": "2"}));

    let clear = ApiRequest::patch(Route::relationship("articles", "1", "author"), json!({"data": null}));
    assert_eq!(fx.send(clear).await.status, 204);
    let author = fx
        .send(ApiRequest::get(Route::relationship("articles", "1", "author")))
        .await
        .body();
    assert_eq!(author["data"], serde_json::Value::Null);
}

/// POST to a to-one relationship is forbidden
#[tokio::test]
async fn test_add_to_one_forbidden() {
    let fx = setup_api();
    let request = ApiRequest::post(
        Route::relationship("articles", "1", "author"),
        json!({"data": {"type": "people", "id": "2"}}),
    );

    let response = fx.send(request).await;

    assert_eq!(response.status, 403);
    assert_eq!(fx.storage.writes(), 0);
}

/// Collection options can forbid replacement and removal
#[tokio::test]
async fn test_relationship_permissions() {
    let options = CollectionOptions {
        allow_to_many_replacement: false,
        allow_delete_from_to_many: false,
        ..Default::default()
    };
    let fx = setup_api_with(options, HookRegistry::new());

    let replace = ApiRequest::patch(
        Route::relationship("people", "1", "articles"),
        json!({"data": []}),
    );
    let remove = ApiRequest::new(
        apiary::engine::Method::Delete,
        Route::relationship("people", "1", "articles"),
    )
    .with_body(json!({"data": [{"type": "articles", "id": "1"}]}));

    assert_eq!(fx.send(replace).await.status, 403);
    assert_eq!(fx.send(remove).await.status, 403);
    assert_eq!(fx.storage.writes(), 0);
}

/// Linkage to a missing target is 404 with no writes
#[tokio::test]
async fn test_relationship_dangling_target() {
    let fx = setup_api();
    let request = ApiRequest::post(
        Route::relationship("people", "1", "articles"),
        json!({"data": [{"type": "articles", "id": "1"}, {"type": "articles", "id": "42"}]}),
    );

    let response = fx.send(request).await;

    assert_eq!(response.status, 404);
    assert_eq!(fx.storage.writes(), 0);
}

/// Linkage of the wrong type is a conflict
#[tokio::test]
async fn test_relationship_wrong_type() {
    let fx = setup_api();
    let request = ApiRequest::patch(
        Route::relationship("people", "1", "articles"),
        json!({"data": [{"type": "comments", "id": "1"}]}),
    );

    assert_eq!(fx.send(request).await.status, 409);
    assert_eq!(fx.storage.writes(), 0);
}

// =============================================================================
// Cancellation
// =============================================================================

/// A cancelled request stops before its write
#[tokio::test]
async fn test_cancelled_request_writes_nothing() {
    let fx = setup_api();
    let cancel = CancellationFlag::new();
    cancel.cancel();
    let request = ApiRequest::post(
        Route::collection("people"),
        json!({"data": {"type": "people", "attributes": {"name": "Cy"}}}),
    )
    .with_cancellation(cancel);

    let response = fx.send(request).await;

    assert_eq!(response.status, CLIENT_CLOSED_REQUEST);
    assert_eq!(fx.storage.writes(), 0);

    let people = fx.send(ApiRequest::get(Route::collection("people"))).await.body();
    assert_eq!(people["meta"]["total"], json!(2));
}
