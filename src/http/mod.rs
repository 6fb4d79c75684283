//! HTTP adapter
//!
//! Routes:
//! - `GET|POST /{collection}`
//! - `GET|PATCH|DELETE /{collection}/{id}`
//! - `GET|POST|PATCH|DELETE /{collection}/{id}/relationships/{relation}`
//! - `GET /{collection}/{id}/{relation}`

mod config;
mod server;

pub use config::HttpConfig;
pub use server::{router, HttpServer};
