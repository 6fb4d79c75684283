//! CLI-specific error types
//!
//! Every CLI error is fatal: the process prints it and exits non-zero.

use std::io;

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::storage::StorageError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// Schema directory could not be loaded
    SchemaError,
    /// Seed data could not be loaded
    SeedError,
    /// I/O error (stdout)
    IoError,
    /// Server failed to start
    BootFailed,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "APIARY_CONFIG_ERROR",
            Self::SchemaError => "APIARY_SCHEMA_ERROR",
            Self::SeedError => "APIARY_SEED_ERROR",
            Self::IoError => "APIARY_IO_ERROR",
            Self::BootFailed => "APIARY_BOOT_FAILED",
        }
    }
}

/// CLI error
#[derive(Debug, Error)]
#[error("{}: {message}", .code.code())]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn seed_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::SeedError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn boot_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::BootFailed, msg)
    }

    /// Get the error code
    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<CatalogError> for CliError {
    fn from(e: CatalogError) -> Self {
        Self::new(CliErrorCode::SchemaError, e.to_string())
    }
}

impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        Self::seed_error(e.to_string())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code() {
        let err = CliError::config_error("port must be > 0");
        assert_eq!(err.to_string(), "APIARY_CONFIG_ERROR: port must be > 0");
    }

    #[test]
    fn test_catalog_errors_map_to_schema_code() {
        let err = CliError::from(CatalogError::UnknownCollection("x".into()));
        assert_eq!(err.code(), &CliErrorCode::SchemaError);
    }
}
