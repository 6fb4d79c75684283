//! Observability for apiary
//!
//! Structured JSON-line logging. Observability is read-only: a failed write
//! to the log sink never affects request handling.
//!
//! ```ignore
//! use apiary::observability::Logger;
//!
//! Logger::info("REQUEST_COMPLETE", &[("collection", "people"), ("status", "200")]);
//! ```

mod logger;

pub use logger::{Logger, Severity};
