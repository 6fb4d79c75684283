//! Request state machine and hook pipeline
//!
//! Every inbound operation becomes an [`ApiRequest`], runs through
//! preprocessors, storage and serialization, then postprocessors, and comes
//! back as an [`ApiResponse`]. Transport adapters only translate to and from
//! these two types.

mod api;
mod context;
mod errors;
mod hooks;
mod operation;

pub use api::Api;
pub use context::{CancellationFlag, OperationState, RequestContext};
pub use errors::{ApiError, ApiResult, CLIENT_CLOSED_REQUEST};
pub use hooks::{
    HookAbort, HookFuture, HookRegistry, HookRegistryBuilder, PostOutcome, Postprocessor,
    PreOutcome, Preprocessor,
};
pub use operation::{ApiRequest, ApiResponse, Method, OperationKind, Route};
