//! Request Context
//!
//! Context carried through the request state machine. Preprocessors receive
//! it mutably; postprocessors read it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::observability::Logger;
use crate::query::RawQuery;

use super::errors::{ApiError, ApiResult};
use super::operation::{Method, OperationKind};

/// Lifecycle of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    Received,
    Preprocessed,
    Executed,
    Serialized,
    Postprocessed,
    Responded,
    Aborted,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Received => "received",
            OperationState::Preprocessed => "preprocessed",
            OperationState::Executed => "executed",
            OperationState::Serialized => "serialized",
            OperationState::Postprocessed => "postprocessed",
            OperationState::Responded => "responded",
            OperationState::Aborted => "aborted",
        }
    }

    /// Whether `next` may follow `self`
    pub fn can_transition(&self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (Received, Preprocessed)
                | (Preprocessed, Executed)
                | (Preprocessed, Responded)
                | (Preprocessed, Aborted)
                | (Executed, Serialized)
                | (Serialized, Postprocessed)
                | (Postprocessed, Responded)
                | (Postprocessed, Aborted)
        )
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared flag a transport sets when the client goes away
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Context carried through the pipeline
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request ID for tracing
    pub request_id: Uuid,

    pub method: Method,
    pub kind: OperationKind,
    pub collection: String,
    pub id: Option<String>,
    pub relation: Option<String>,

    /// Raw query parameters; preprocessors may rewrite them
    pub query: RawQuery,

    /// Request body; preprocessors may rewrite it
    pub body: Option<Value>,

    /// Annotations merged into the response's top-level `meta`
    pub meta: Map<String, Value>,

    cancel: CancellationFlag,
    states: Vec<OperationState>,

    /// Start time for duration tracking
    started_at: Instant,
}

impl RequestContext {
    pub fn new(method: Method, kind: OperationKind, collection: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method,
            kind,
            collection: collection.into(),
            id: None,
            relation: None,
            query: RawQuery::new(),
            body: None,
            meta: Map::new(),
            cancel: CancellationFlag::new(),
            states: vec![OperationState::Received],
            started_at: Instant::now(),
        }
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    pub fn with_relation(mut self, relation: Option<String>) -> Self {
        self.relation = relation;
        self
    }

    pub fn with_query(mut self, query: RawQuery) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> OperationState {
        self.states
            .last()
            .copied()
            .unwrap_or(OperationState::Received)
    }

    /// Every state visited so far, in order
    pub fn states(&self) -> &[OperationState] {
        &self.states
    }

    /// Move to `next`; illegal transitions are internal errors
    pub fn advance(&mut self, next: OperationState) -> ApiResult<()> {
        let current = self.state();
        if !current.can_transition(next) {
            return Err(ApiError::internal(format!(
                "illegal state transition {} -> {}",
                current, next
            )));
        }
        self.states.push(next);

        let request_id = self.request_id.to_string();
        Logger::trace(
            "STATE_TRANSITION",
            &[
                ("from", current.as_str()),
                ("request_id", request_id.as_str()),
                ("to", next.as_str()),
            ],
        );
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails once the request was cancelled; called right before writes
    pub fn ensure_not_cancelled(&self) -> ApiResult<()> {
        if self.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        Ok(())
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }

    /// Add metadata for the response
    pub fn annotate(&mut self, key: impl Into<String>, value: Value) {
        self.meta.insert(key.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> RequestContext {
        RequestContext::new(Method::Get, OperationKind::CollectionFetch, "people")
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut ctx = context();
        for state in [
            OperationState::Preprocessed,
            OperationState::Executed,
            OperationState::Serialized,
            OperationState::Postprocessed,
            OperationState::Responded,
        ] {
            ctx.advance(state).unwrap();
        }
        assert_eq!(ctx.states().len(), 6);
        assert_eq!(ctx.state(), OperationState::Responded);
    }

    #[test]
    fn test_abort_only_after_hooks() {
        let mut ctx = context();
        assert!(ctx.advance(OperationState::Aborted).is_err());

        ctx.advance(OperationState::Preprocessed).unwrap();
        ctx.advance(OperationState::Aborted).unwrap();
        assert_eq!(ctx.state(), OperationState::Aborted);
    }

    #[test]
    fn test_illegal_transition_is_internal_error() {
        let mut ctx = context();
        let err = ctx.advance(OperationState::Serialized).unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
        assert_eq!(err.status_code().as_u16(), 500);
        assert_eq!(ctx.state(), OperationState::Received);
    }

    #[test]
    fn test_no_transition_out_of_terminal_state() {
        let mut ctx = context();
        ctx.advance(OperationState::Preprocessed).unwrap();
        ctx.advance(OperationState::Responded).unwrap();
        assert!(ctx.advance(OperationState::Executed).is_err());
    }

    #[test]
    fn test_cancellation_is_shared() {
        let flag = CancellationFlag::new();
        let ctx = context().with_cancellation(flag.clone());
        assert!(ctx.ensure_not_cancelled().is_ok());

        flag.cancel();
        assert_eq!(ctx.ensure_not_cancelled().unwrap_err(), ApiError::Cancelled);
    }

    #[test]
    fn test_annotate() {
        let mut ctx = context();
        ctx.annotate("source", json!("cache"));
        assert_eq!(ctx.meta["source"], json!("cache"));
    }
}
