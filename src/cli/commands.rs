//! CLI command implementations
//!
//! Both commands share one boot sequence: load config, load the schema
//! catalog, build the in-memory store and load seed data. `check` stops
//! there; `serve` starts the HTTP adapter.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::catalog::{Catalog, SchemaLoader};
use crate::engine::Api;
use crate::http::{HttpConfig, HttpServer};
use crate::observability::{Logger, Severity};
use crate::pagination::{PageDefaults, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::storage::InMemoryStorage;

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory of entity type files (required)
    pub schema_dir: String,

    /// JSON file of rows to load at startup
    #[serde(default)]
    pub seed_file: Option<String>,

    /// Address to bind (default "127.0.0.1")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to bind (default 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Prefix of generated links; defaults to `http://{bind_address}:{port}`
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// One of trace, info, warn, error (default "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// CORS allowed origins; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Directory the config file was read from; relative paths resolve here
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}
fn default_max_page_size() -> usize {
    MAX_PAGE_SIZE
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> CliResult<()> {
        if self.schema_dir.trim().is_empty() {
            return Err(CliError::config_error("schema_dir must not be empty"));
        }
        if self.port == 0 {
            return Err(CliError::config_error("port must be > 0"));
        }
        if self.default_page_size == 0 {
            return Err(CliError::config_error("default_page_size must be > 0"));
        }
        if self.max_page_size < self.default_page_size {
            return Err(CliError::config_error(format!(
                "max_page_size ({}) must be >= default_page_size ({})",
                self.max_page_size, self.default_page_size
            )));
        }
        self.severity()?;
        Ok(())
    }

    pub fn severity(&self) -> CliResult<Severity> {
        self.log_level
            .parse()
            .map_err(|e: String| CliError::config_error(format!("Invalid log_level: {}", e)))
    }

    pub fn schema_path(&self) -> PathBuf {
        self.base_dir.join(&self.schema_dir)
    }

    pub fn seed_path(&self) -> Option<PathBuf> {
        self.seed_file.as_ref().map(|f| self.base_dir.join(f))
    }

    pub fn page_defaults(&self) -> PageDefaults {
        PageDefaults {
            default_size: self.default_page_size,
            max_size: self.max_page_size,
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            host: self.bind_address.clone(),
            port: self.port,
            cors_origins: self.cors_origins.clone(),
        }
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.bind_address, self.port))
    }
}

/// Everything `serve` needs, built by the shared boot sequence
pub struct Boot {
    pub config: Config,
    pub catalog: Arc<Catalog>,
    pub storage: Arc<InMemoryStorage>,
    pub seeded_rows: usize,
}

impl Boot {
    pub fn into_api(self) -> Api {
        Api::new(self.catalog, self.storage)
            .with_page_defaults(self.config.page_defaults())
            .with_base_url(self.config.base_url())
    }
}

/// Main CLI entry point
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Serve { config, port } => serve(&config, port),
        Command::Check { config } => check(&config),
    }
}

/// Load config, schema and seed data
pub fn boot(config: Config) -> CliResult<Boot> {
    Logger::set_min_severity(config.severity()?);

    let schema_dir = config.schema_path();
    let catalog = Arc::new(SchemaLoader::new(&schema_dir).load_catalog()?);
    let collections = catalog.collections().count().to_string();
    let schema_label = schema_dir.display().to_string();
    Logger::info(
        "CATALOG_LOADED",
        &[
            ("collections", collections.as_str()),
            ("schema_dir", schema_label.as_str()),
        ],
    );

    let storage = Arc::new(InMemoryStorage::new(catalog.clone()));
    let seeded_rows = match config.seed_path() {
        Some(path) => load_seed(&storage, &path)?,
        None => 0,
    };

    Ok(Boot {
        config,
        catalog,
        storage,
        seeded_rows,
    })
}

fn load_seed(storage: &InMemoryStorage, path: &Path) -> CliResult<usize> {
    let content = fs::read_to_string(path).map_err(|e| {
        CliError::seed_error(format!("Failed to read seed file {}: {}", path.display(), e))
    })?;
    let seed: Value = serde_json::from_str(&content).map_err(|e| {
        CliError::seed_error(format!("Invalid seed JSON in {}: {}", path.display(), e))
    })?;
    Ok(storage.load_seed(&seed)?)
}

/// Validate everything and print a summary
pub fn check(config_path: &Path) -> CliResult<()> {
    let booted = boot(Config::load(config_path)?)?;
    let collections: Vec<&str> = booted.catalog.collections().collect();
    write_response(json!({
        "collections": collections,
        "seeded_rows": booted.seeded_rows,
    }))
}

/// Boot and serve until the process is stopped
pub fn serve(config_path: &Path, port: Option<u16>) -> CliResult<()> {
    let mut config = Config::load(config_path)?;
    if let Some(port) = port {
        config.port = port;
    }
    let http_config = config.http_config();
    let api = Arc::new(boot(config)?.into_api());
    let server = HttpServer::new(api, http_config);

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        server
            .start()
            .await
            .map_err(|e| CliError::boot_failed(format!("HTTP server failed: {}", e)))
    })
}
