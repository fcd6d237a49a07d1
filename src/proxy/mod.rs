//! Upstream forwarding: target resolution, request rewriting and context headers.

pub mod context;
pub mod reverse_proxy;

pub use context::{AuthDecision, UpstreamContext, UserDetails};
pub use reverse_proxy::ReverseProxy;
