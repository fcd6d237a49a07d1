//! Path-to-target routing: path parsing, service resolution and wildcard matching.

pub mod matcher;
pub mod path;
pub mod resolver;

pub use matcher::{compile_wildcard, PatternSet};
pub use path::{ApiMarker, PathParts, PathProcessor};
pub use resolver::{RegistryResolver, ServiceResolver};
