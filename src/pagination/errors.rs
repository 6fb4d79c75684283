//! Pagination errors

use thiserror::Error;

/// Pagination parameter errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    /// Requested page size is larger than the configured maximum
    #[error("Page size {size} exceeds maximum {max}")]
    PageSizeExceeded {
        parameter: String,
        size: usize,
        max: usize,
    },

    /// Malformed, negative, zero-sized, or mixed-style page parameters
    #[error("Invalid {parameter}: {detail}")]
    InvalidPage { parameter: String, detail: String },
}

impl PageError {
    pub fn invalid(parameter: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidPage {
            parameter: parameter.into(),
            detail: detail.into(),
        }
    }

    /// Query parameter that caused the error
    pub fn parameter(&self) -> &str {
        match self {
            PageError::PageSizeExceeded { parameter, .. } => parameter,
            PageError::InvalidPage { parameter, .. } => parameter,
        }
    }
}
