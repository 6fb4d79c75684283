//! Hook pipeline
//!
//! Preprocessors run before execution, in registration order, and may
//! rewrite the request context, answer the request themselves, or abort it.
//! Postprocessors run after the response body is built and may only
//! annotate `meta` or abort.
//!
//! The registry is frozen at construction and shared read-only.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::context::RequestContext;
use super::operation::{ApiResponse, OperationKind};

/// Boxed future returned by hooks
pub type HookFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error raised by a hook; status defaults to 400
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookAbort {
    pub status: u16,
    pub title: Option<String>,
    pub detail: String,
}

impl HookAbort {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            status: 400,
            title: None,
            detail: detail.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// What the pipeline does after a preprocessor
#[derive(Debug, Clone)]
pub enum PreOutcome {
    Continue,
    /// Skip execution and send this response
    Respond(ApiResponse),
    /// Fail the request; context changes made by this hook are dropped
    Abort(HookAbort),
}

/// What the pipeline does after a postprocessor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    Continue,
    Abort(HookAbort),
}

/// Runs before execution
pub trait Preprocessor: Send + Sync {
    fn process<'a>(&'a self, ctx: &'a mut RequestContext) -> HookFuture<'a, PreOutcome>;
}

/// Runs after the response body is built
pub trait Postprocessor: Send + Sync {
    /// `meta` is merged into the response's top-level `meta`
    fn process<'a>(
        &'a self,
        ctx: &'a RequestContext,
        meta: &'a mut Map<String, Value>,
    ) -> HookFuture<'a, PostOutcome>;
}

impl<F> Preprocessor for F
where
    F: Fn(&mut RequestContext) -> PreOutcome + Send + Sync,
{
    fn process<'a>(&'a self, ctx: &'a mut RequestContext) -> HookFuture<'a, PreOutcome> {
        let outcome = self(ctx);
        Box::pin(async move { outcome })
    }
}

impl<F> Postprocessor for F
where
    F: Fn(&RequestContext, &mut Map<String, Value>) -> PostOutcome + Send + Sync,
{
    fn process<'a>(
        &'a self,
        ctx: &'a RequestContext,
        meta: &'a mut Map<String, Value>,
    ) -> HookFuture<'a, PostOutcome> {
        let outcome = self(ctx, meta);
        Box::pin(async move { outcome })
    }
}

type HookKey = (String, OperationKind);

/// Ordered hooks keyed by `(collection, kind)`
#[derive(Default, Clone)]
pub struct HookRegistry {
    preprocessors: HashMap<HookKey, Vec<Arc<dyn Preprocessor>>>,
    postprocessors: HashMap<HookKey, Vec<Arc<dyn Postprocessor>>>,
}

impl HookRegistry {
    /// Registry without hooks
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> HookRegistryBuilder {
        HookRegistryBuilder::default()
    }

    pub fn preprocessors(&self, collection: &str, kind: OperationKind) -> &[Arc<dyn Preprocessor>] {
        self.preprocessors
            .get(&(collection.to_string(), kind))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn postprocessors(
        &self,
        collection: &str,
        kind: OperationKind,
    ) -> &[Arc<dyn Postprocessor>] {
        self.postprocessors
            .get(&(collection.to_string(), kind))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("preprocessors", &self.preprocessors.keys().collect::<Vec<_>>())
            .field("postprocessors", &self.postprocessors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Collects hooks before the registry is frozen
#[derive(Default)]
pub struct HookRegistryBuilder {
    registry: HookRegistry,
}

impl HookRegistryBuilder {
    pub fn preprocessor(
        mut self,
        collection: impl Into<String>,
        kind: OperationKind,
        hook: impl Preprocessor + 'static,
    ) -> Self {
        self.registry
            .preprocessors
            .entry((collection.into(), kind))
            .or_default()
            .push(Arc::new(hook));
        self
    }

    pub fn postprocessor(
        mut self,
        collection: impl Into<String>,
        kind: OperationKind,
        hook: impl Postprocessor + 'static,
    ) -> Self {
        self.registry
            .postprocessors
            .entry((collection.into(), kind))
            .or_default()
            .push(Arc::new(hook));
        self
    }

    pub fn build(self) -> HookRegistry {
        self.registry
    }
}
