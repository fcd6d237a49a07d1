//! Endpoint parsing shared by all discovery clients.
//!
//! Accepted forms: `scheme://host[:port][/path]` for `http`, `https`, `grpc`
//! and `grpcs`, or a bare `host[:port]` which is treated as `http`. A missing
//! port is recorded as `0`; an unparsable port is logged and also becomes `0`.

use tracing::warn;

use crate::core::types::{Remote, Scheme};

/// Turn a raw endpoint string into a [`Remote`] for the given service
pub fn parse_endpoint(app: &str, raw: &str, status: &str) -> Remote {
    let trimmed = raw.trim();

    let (scheme, rest) = match trimmed.split_once("://") {
        Some((scheme, rest)) => match scheme.parse::<Scheme>() {
            Ok(scheme) => (scheme, rest),
            Err(e) => {
                warn!(app = %app, endpoint = %raw, "{}, assuming http", e);
                (Scheme::Http, rest)
            }
        },
        None => (Scheme::Http, trimmed),
    };

    // Anything after the authority is not part of the instance identity.
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let (host, port) = split_authority(authority);

    let port = match port {
        None | Some("") => 0,
        Some(port) => port.parse::<u16>().unwrap_or_else(|e| {
            warn!(app = %app, endpoint = %raw, "invalid port '{}': {}", port, e);
            0
        }),
    };

    Remote::new(app, scheme, host, port, status)
}

fn split_authority(authority: &str) -> (&str, Option<&str>) {
    // Bracketed IPv6 literal, e.g. [::1]:8080
    if authority.starts_with('[') {
        if let Some(end) = authority.find(']') {
            let host = &authority[..=end];
            let port = authority[end + 1..].strip_prefix(':');
            return (host, port);
        }
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    }
}
