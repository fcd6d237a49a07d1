//! # Core Module
//!
//! Building blocks every other module depends on: the error type, configuration
//! and the remote/collection value types.

pub mod config;
pub mod error;
pub mod types;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use types::{Remote, RemoteCollection, Scheme};
