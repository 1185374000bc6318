//! HTTP relay server module.
//!
//! This module provides the HTTP surface that accepts client chat requests
//! and streams upstream completions back to them.

mod handlers;
pub mod relay;
mod server;
pub mod types;

pub use relay::{relay_body, LineFramer};
pub use server::{create_router, run_server, AppState, RequestId};
pub use types::{ChatRequest, UpstreamRequest};
