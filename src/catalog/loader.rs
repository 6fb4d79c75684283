//! Schema loader for entity type files
//!
//! - One JSON file per entity type in the schema directory
//! - Files are read in name order so registration is deterministic
//! - Malformed files or duplicate collections fail the whole load

use std::fs;
use std::path::{Path, PathBuf};

use super::errors::{CatalogError, CatalogResult};
use super::registry::{Catalog, CatalogBuilder};
use super::types::EntityType;

/// Reads entity type definitions from disk
pub struct SchemaLoader {
    schema_dir: PathBuf,
}

impl SchemaLoader {
    pub fn new(schema_dir: impl Into<PathBuf>) -> Self {
        Self {
            schema_dir: schema_dir.into(),
        }
    }

    /// Returns the schema directory path.
    pub fn schema_dir(&self) -> &Path {
        &self.schema_dir
    }

    /// Reads every `*.json` file in the schema directory.
    pub fn read_all(&self) -> CatalogResult<Vec<EntityType>> {
        let dir_label = self.schema_dir.display().to_string();
        let entries = fs::read_dir(&self.schema_dir)
            .map_err(|e| CatalogError::load(&dir_label, format!("cannot read directory: {}", e)))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                CatalogError::load(&dir_label, format!("cannot read directory entry: {}", e))
            })?;
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        paths.iter().map(|p| Self::read_file(p)).collect()
    }

    fn read_file(path: &Path) -> CatalogResult<EntityType> {
        let label = path.display().to_string();
        let content = fs::read_to_string(path)
            .map_err(|e| CatalogError::load(&label, format!("cannot read file: {}", e)))?;
        serde_json::from_str(&content)
            .map_err(|e| CatalogError::load(&label, format!("invalid JSON: {}", e)))
    }

    /// Registers every schema file on `builder`.
    pub fn load_into(&self, builder: &mut CatalogBuilder) -> CatalogResult<usize> {
        let entities = self.read_all()?;
        let count = entities.len();
        for entity in entities {
            builder.register(entity)?;
        }
        Ok(count)
    }

    /// Loads and freezes a catalog from the schema directory alone.
    pub fn load_catalog(&self) -> CatalogResult<Catalog> {
        let mut builder = CatalogBuilder::new();
        self.load_into(&mut builder)?;
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, value: serde_json::Value) {
        fs::write(dir.join(name), serde_json::to_string_pretty(&value).unwrap()).unwrap();
    }

    fn people() -> serde_json::Value {
        json!({
            "collection": "people",
            "primary_key": ["id"],
            "attributes": [{"name": "id", "type": "number"}, {"name": "name", "type": "string"}],
            "relationships": [{"name": "articles", "cardinality": "to-many", "target": "articles",
                               "join": {"kind": "remote_key", "column": "author_id"}}]
        })
    }

    fn articles() -> serde_json::Value {
        json!({
            "collection": "articles",
            "primary_key": ["id"],
            "attributes": [{"name": "id", "type": "number"}, {"name": "title", "type": "string"}],
            "relationships": [{"name": "author", "cardinality": "to-one", "target": "people",
                               "join": {"kind": "foreign_key", "column": "author_id"}}]
        })
    }

    #[test]
    fn test_load_catalog() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "people.json", people());
        write(tmp.path(), "articles.json", articles());
        fs::write(tmp.path().join("README.txt"), "ignored").unwrap();

        let catalog = SchemaLoader::new(tmp.path()).load_catalog().unwrap();
        let collections: Vec<&str> = catalog.collections().collect();
        assert_eq!(collections, vec!["articles", "people"]);
    }

    #[test]
    fn test_malformed_file_fails() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("broken.json"), "{ not json").unwrap();

        let err = SchemaLoader::new(tmp.path()).load_catalog().unwrap_err();
        assert!(matches!(err, CatalogError::Load { .. }));
    }

    #[test]
    fn test_missing_target_fails() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "articles.json", articles());

        let err = SchemaLoader::new(tmp.path()).load_catalog().unwrap_err();
        assert!(matches!(err, CatalogError::UnknownRelationTarget { .. }));
    }

    #[test]
    fn test_missing_directory_fails() {
        let tmp = TempDir::new().unwrap();
        let err = SchemaLoader::new(tmp.path().join("nope")).read_all().unwrap_err();
        assert!(matches!(err, CatalogError::Load { .. }));
    }
}
