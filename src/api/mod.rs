//! HTTP API Module
//!
//! Client SQL endpoint, write forwarding and the cluster endpoints.

mod forward;
mod http;

pub use forward::WriteRouter;
pub use http::{format_exec, AppState, HttpServer};
