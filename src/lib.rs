//! chatrelay - Streaming chat-completion relay
//!
//! This library provides the core functionality for the chatrelay server:
//! configuration, error mapping, and the streaming relay between a client
//! connection and an upstream chat-completions API.

pub mod config;
pub mod error;
pub mod proxy;

pub use config::Config;
pub use error::{Error, Result};
