//! CLI Boot Tests
//!
//! Config file, schema directory and seed file loaded from disk, then
//! served through the engine.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tempfile::TempDir;

use apiary::cli::{boot, CliErrorCode, Config};
use apiary::engine::{ApiRequest, Route};

// =============================================================================
// Helper Functions
// =============================================================================

fn write_json(path: &Path, value: Value) {
    fs::write(path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
}

fn setup_project(dir: &Path) -> PathBuf {
    let schemas = dir.join("schemas");
    fs::create_dir_all(&schemas).unwrap();
    write_json(
        &schemas.join("people.json"),
        json!({
            "collection": "people",
            "primary_key": ["id"],
            "attributes": [
                {"name": "id", "type": "number"},
                {"name": "name", "type": "string"}
            ],
            "relationships": [{
                "name": "articles",
                "cardinality": "to-many",
                "target": "articles",
                "join": {"kind": "remote_key", "column": "author_id"}
            }]
        }),
    );
    write_json(
        &schemas.join("articles.json"),
        json!({
            "collection": "articles",
            "primary_key": ["id"],
            "attributes": [
                {"name": "id", "type": "number"},
                {"name": "title", "type": "string"}
            ],
            "relationships": [{
                "name": "author",
                "cardinality": "to-one",
                "target": "people",
                "join": {"kind": "foreign_key", "column": "author_id"}
            }]
        }),
    );
    write_json(
        &dir.join("seed.json"),
        json!({
            "people": [{"id": 1, "name": "Ann"}],
            "articles": [{"id": 1, "title": "Rust", "author_id": 1}]
        }),
    );

    let config = dir.join("apiary.json");
    write_json(
        &config,
        json!({
            "schema_dir": "schemas",
            "seed_file": "seed.json",
            "base_url": "http://docs.test/",
            "default_page_size": 5,
            "log_level": "warn"
        }),
    );
    config
}

// =============================================================================
// Boot
// =============================================================================

/// Booted engine serves seeded rows with configured links
#[tokio::test]
async fn test_booted_api_serves_seed() {
    let tmp = TempDir::new().unwrap();
    let config = Config::load(&setup_project(tmp.path())).unwrap();

    let booted = boot(config).unwrap();
    assert_eq!(booted.seeded_rows, 2);

    let api = booted.into_api();
    let body = api
        .handle(ApiRequest::get(Route::collection("articles")).param("include", "author"))
        .await
        .body();

    assert_eq!(body["data"][0]["links"]["self"], json!("http://docs.test/articles/1"));
    assert_eq!(body["included"][0]["attributes"]["name"], json!("Ann"));
    assert_eq!(
        body["links"]["first"],
        json!("http://docs.test/articles?include=author&page[number]=0&page[size]=5")
    );
}

/// A relationship naming an unknown collection fails the boot
#[test]
fn test_dangling_schema_target_fails() {
    let tmp = TempDir::new().unwrap();
    let config_path = setup_project(tmp.path());
    fs::remove_file(tmp.path().join("schemas").join("people.json")).unwrap();

    let err = boot(Config::load(&config_path).unwrap()).err().unwrap();

    assert_eq!(err.code(), &CliErrorCode::SchemaError);
}

/// Seed rows for unknown collections fail the boot
#[test]
fn test_bad_seed_fails() {
    let tmp = TempDir::new().unwrap();
    let config_path = setup_project(tmp.path());
    write_json(&tmp.path().join("seed.json"), json!({"planets": [{"id": 1}]}));

    let err = boot(Config::load(&config_path).unwrap()).err().unwrap();

    assert_eq!(err.code(), &CliErrorCode::SeedError);
}
