//! Read Operation Tests
//!
//! Collection and resource fetches through `Api::handle`:
//! - Filters compile against the catalog and select matching rows
//! - Invalid filters fail with 400 before storage is touched
//! - Sorting, pagination links and `meta.total`
//! - Sparse fieldsets and compound documents
//! - Relationship and related endpoints

mod common;

use serde_json::{json, Value};

use apiary::engine::{ApiRequest, Route};

use common::{column, identifiers, setup_api, BASE_URL};

fn filter(raw: Value) -> String {
    raw.to_string()
}

// =============================================================================
// Filtering
// =============================================================================

/// A like filter selects only matching people
#[tokio::test]
async fn test_like_filter_matches_substring() {
    let fx = setup_api();
    let request = ApiRequest::get(Route::collection("people")).param(
        "filter",
        filter(json!([{"name": "name", "op": "like", "val": "%n%"}])),
    );

    let response = fx.send(request).await;

    assert_eq!(response.status, 200);
    let body = response.body();
    assert_eq!(identifiers(&body), vec![("people".into(), "1".into())]);
    assert_eq!(body["meta"]["total"], json!(1));
}

/// Filters may traverse a to-one relationship
#[tokio::test]
async fn test_filter_through_relationship() {
    let fx = setup_api();
    let request = ApiRequest::get(Route::collection("comments")).param(
        "filter",
        filter(json!({"name": "author.name", "op": "eq", "val": "Bo"})),
    );

    let body = fx.send(request).await.body();

    assert_eq!(column(&body, "body"), vec![json!("nice")]);
}

/// `any` over a to-many relationship
#[tokio::test]
async fn test_filter_any_over_to_many() {
    let fx = setup_api();
    let request = ApiRequest::get(Route::collection("articles")).param(
        "filter",
        filter(json!({"name": "comments", "op": "any", "val": {"name": "body", "op": "eq", "val": "meh"}})),
    );

    let body = fx.send(request).await.body();

    assert_eq!(column(&body, "title"), vec![json!("Go")]);
}

/// Unknown field names fail with 400 and point into the descriptor
#[tokio::test]
async fn test_unknown_filter_field_is_bad_request() {
    let fx = setup_api();
    let request = ApiRequest::get(Route::collection("people")).param(
        "filter",
        filter(json!([{"name": "nope", "op": "eq", "val": 1}])),
    );

    let response = fx.send(request).await;

    assert_eq!(response.status, 400);
    let error = &response.body()["errors"][0];
    assert_eq!(error["status"], json!("400"));
    assert_eq!(error["source"]["parameter"], json!("filter"));
    assert_eq!(error["source"]["pointer"], json!("/0/name"));
    assert_eq!(fx.storage.count("query"), 0, "storage must not be queried");
}

/// Operators that do not fit the field type are rejected
#[tokio::test]
async fn test_operator_type_mismatch_is_bad_request() {
    let fx = setup_api();
    let request = ApiRequest::get(Route::collection("people")).param(
        "filter",
        filter(json!({"name": "id", "op": "like", "val": "%1%"})),
    );

    let response = fx.send(request).await;

    assert_eq!(response.status, 400);
    assert!(fx.storage.calls().is_empty());
}

/// Malformed filter JSON is a parameter error
#[tokio::test]
async fn test_malformed_filter_json() {
    let fx = setup_api();
    let request = ApiRequest::get(Route::collection("people")).param("filter", "[{oops");

    let response = fx.send(request).await;

    assert_eq!(response.status, 400);
    assert_eq!(response.body()["errors"][0]["source"]["parameter"], json!("filter"));
}

// =============================================================================
// Sorting and Pagination
// =============================================================================

/// Descending sort on an attribute
#[tokio::test]
async fn test_sort_descending() {
    let fx = setup_api();
    let request = ApiRequest::get(Route::collection("articles")).param("sort", "-title");

    let body = fx.send(request).await.body();

    assert_eq!(column(&body, "title"), vec![json!("Rust"), json!("Go")]);
}

/// Without a sort parameter rows come back in primary key order
#[tokio::test]
async fn test_default_order_is_primary_key() {
    let fx = setup_api();

    let body = fx.send(ApiRequest::get(Route::collection("articles"))).await.body();

    assert_eq!(
        identifiers(&body),
        vec![("articles".into(), "1".into()), ("articles".into(), "2".into())]
    );
}

/// Unknown sort fields are rejected
#[tokio::test]
async fn test_unknown_sort_field() {
    let fx = setup_api();
    let request = ApiRequest::get(Route::collection("articles")).param("sort", "rating");

    let response = fx.send(request).await;

    assert_eq!(response.status, 400);
    assert_eq!(response.body()["errors"][0]["source"]["parameter"], json!("sort"));
}

/// A one-row page reports the full total and navigation links
#[tokio::test]
async fn test_page_links_and_total() {
    let fx = setup_api();
    let request = ApiRequest::get(Route::collection("people")).param("page[size]", "1");

    let response = fx.send(request).await;
    let body = response.body();

    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["meta"]["total"], json!(2));
    assert_eq!(body["links"]["prev"], Value::Null);
    assert_eq!(
        body["links"]["next"],
        json!(format!("{}/people?page[number]=1&page[size]=1", BASE_URL))
    );
    assert_eq!(
        body["links"]["last"],
        json!(format!("{}/people?page[number]=1&page[size]=1", BASE_URL))
    );
    assert!(response.header("Link").unwrap().contains("rel=\"next\""));
}

/// Page number zero and offset zero select the same window
#[tokio::test]
async fn test_page_number_zero_equals_offset_zero() {
    let fx = setup_api();
    let by_number = ApiRequest::get(Route::collection("articles"))
        .param("page[number]", "0")
        .param("page[size]", "1");
    let by_offset = ApiRequest::get(Route::collection("articles"))
        .param("page[offset]", "0")
        .param("page[limit]", "1");

    let a = fx.send(by_number).await.body();
    let b = fx.send(by_offset).await.body();

    assert_eq!(a["data"], b["data"]);
    assert_eq!(identifiers(&a), vec![("articles".into(), "1".into())]);
}

/// Mixing the two pagination styles is rejected
#[tokio::test]
async fn test_mixed_page_styles_rejected() {
    let fx = setup_api();
    let request = ApiRequest::get(Route::collection("articles"))
        .param("page[number]", "0")
        .param("page[offset]", "1");

    assert_eq!(fx.send(request).await.status, 400);
}

/// A page past the end is empty but still reports the total
#[tokio::test]
async fn test_page_past_end_is_empty() {
    let fx = setup_api();
    let request = ApiRequest::get(Route::collection("people"))
        .param("page[number]", "5")
        .param("page[size]", "1");

    let body = fx.send(request).await.body();

    assert!(body["data"].as_array().unwrap().is_empty());
    assert_eq!(body["meta"]["total"], json!(2));
}

/// An offset at the integer limit yields an empty page without a next link
#[tokio::test]
async fn test_huge_offset_is_empty() {
    let fx = setup_api();
    let request = ApiRequest::get(Route::collection("people"))
        .param("page[offset]", "18446744073709551615")
        .param("page[limit]", "10");

    let response = fx.send(request).await;

    assert_eq!(response.status, 200);
    let body = response.body();
    assert!(body["data"].as_array().unwrap().is_empty());
    assert_eq!(body["links"]["next"], Value::Null);
    assert_eq!(body["meta"]["total"], json!(2));
}

// =============================================================================
// Sparse Fieldsets
// =============================================================================

/// Only requested fields are serialized and unrequested links are not fetched
#[tokio::test]
async fn test_sparse_fieldset_restricts_fields() {
    let fx = setup_api();
    let request = ApiRequest::get(Route::collection("articles")).param("fields[articles]", "title");

    let body = fx.send(request).await.body();

    for resource in body["data"].as_array().unwrap() {
        let attributes = resource["attributes"].as_object().unwrap();
        assert_eq!(attributes.keys().collect::<Vec<_>>(), vec!["title"]);
        assert!(resource.get("relationships").is_none());
    }
    assert_eq!(fx.storage.count("fetch_related"), 0);
}

/// Unknown fields in a fieldset are rejected
#[tokio::test]
async fn test_sparse_fieldset_unknown_field() {
    let fx = setup_api();
    let request = ApiRequest::get(Route::collection("articles")).param("fields[articles]", "rating");

    assert_eq!(fx.send(request).await.status, 400);
}

// =============================================================================
// Single Resources and Relationships
// =============================================================================

/// A resource carries self links and relationship links
#[tokio::test]
async fn test_fetch_resource() {
    let fx = setup_api();

    let response = fx.send(ApiRequest::get(Route::resource("articles", "1"))).await;
    let body = response.body();

    assert_eq!(response.status, 200);
    assert_eq!(body["data"]["attributes"]["title"], json!("Rust"));
    assert_eq!(body["data"]["links"]["self"], json!(format!("{}/articles/1", BASE_URL)));
    assert_eq!(
        body["data"]["relationships"]["author"]["data"],
        json!({"type": "people", "id": "1"})
    );
    assert_eq!(
        body["data"]["relationships"]["author"]["links"]["related"],
        json!(format!("{}/articles/1/author", BASE_URL))
    );
}

/// Missing resources are 404
#[tokio::test]
async fn test_fetch_missing_resource() {
    let fx = setup_api();

    let response = fx.send(ApiRequest::get(Route::resource("articles", "99"))).await;

    assert_eq!(response.status, 404);
    assert_eq!(response.body()["errors"][0]["status"], json!("404"));
}

/// Unknown collections fail before storage is touched
#[tokio::test]
async fn test_unknown_collection() {
    let fx = setup_api();

    let response = fx.send(ApiRequest::get(Route::collection("planets"))).await;

    assert_eq!(response.status, 404);
    assert!(fx.storage.calls().is_empty());
}

/// Relationship endpoint returns linkage and its own links
#[tokio::test]
async fn test_fetch_relationship_linkage() {
    let fx = setup_api();

    let body = fx
        .send(ApiRequest::get(Route::relationship("people", "1", "articles")))
        .await
        .body();

    assert_eq!(
        body["data"],
        json!([{"type": "articles", "id": "1"}, {"type": "articles", "id": "2"}])
    );
    assert_eq!(
        body["links"]["self"],
        json!(format!("{}/people/1/relationships/articles", BASE_URL))
    );
}

/// Unknown relationship names are 404
#[tokio::test]
async fn test_unknown_relationship() {
    let fx = setup_api();

    let response = fx
        .send(ApiRequest::get(Route::relationship("people", "1", "friends")))
        .await;

    assert_eq!(response.status, 404);
}

/// Related to-one endpoint returns the target resource
#[tokio::test]
async fn test_related_to_one() {
    let fx = setup_api();

    let body = fx
        .send(ApiRequest::get(Route::related("comments", "1", "author")))
        .await
        .body();

    assert_eq!(body["data"]["type"], json!("people"));
    assert_eq!(body["data"]["attributes"]["name"], json!("Bo"));
}

/// Related to-many endpoint filters and sorts within the related set
#[tokio::test]
async fn test_related_to_many_with_query() {
    let fx = setup_api();
    let sorted = ApiRequest::get(Route::related("people", "1", "articles")).param("sort", "title");
    let filtered = ApiRequest::get(Route::related("people", "1", "articles")).param(
        "filter",
        filter(json!({"name": "title", "op": "eq", "val": "Rust"})),
    );

    let sorted = fx.send(sorted).await.body();
    let filtered = fx.send(filtered).await.body();

    assert_eq!(column(&sorted, "title"), vec![json!("Go"), json!("Rust")]);
    assert_eq!(sorted["meta"]["total"], json!(2));
    assert_eq!(column(&filtered, "title"), vec![json!("Rust")]);
}

/// A person without articles has an empty related collection
#[tokio::test]
async fn test_related_to_many_empty() {
    let fx = setup_api();

    let body = fx
        .send(ApiRequest::get(Route::related("people", "2", "articles")))
        .await
        .body();

    assert_eq!(body["data"], json!([]));
    assert_eq!(body["meta"]["total"], json!(0));
}
