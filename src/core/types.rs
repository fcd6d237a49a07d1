//! # Core Types
//!
//! Value types shared by discovery, the registry and the proxy:
//! - [`Scheme`]: transport scheme of a backend instance
//! - [`Remote`]: one backend instance
//! - [`RemoteCollection`]: instances grouped by logical service name
//!
//! `Remote` is immutable after construction. Two remotes are considered the same
//! instance when their rendered form (`scheme://host[:port]`) is equal, which is
//! what the registry uses to de-duplicate instances reported by several backends.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Status reported by discovery backends for an instance that can take traffic
pub const STATUS_UP: &str = "UP";

/// Transport scheme of a backend instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
    Grpc,
    Grpcs,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Grpc => "grpc",
            Scheme::Grpcs => "grpcs",
        }
    }

    /// Port implied by the scheme, omitted when rendering a remote
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Scheme::Http => Some(80),
            Scheme::Https => Some(443),
            Scheme::Grpc | Scheme::Grpcs => None,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            "grpc" => Ok(Scheme::Grpc),
            "grpcs" => Ok(Scheme::Grpcs),
            other => Err(format!("unsupported scheme '{}'", other)),
        }
    }
}

/// One backend service instance
///
/// The application name is canonicalised to upper case, so lookups are
/// case-insensitive. A port of `0` means "not specified".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RemoteFields")]
pub struct Remote {
    app: String,
    scheme: Scheme,
    host: String,
    port: u16,
    status: String,
    /// `scheme://host[:port]`, computed once; identity and ordering use it
    #[serde(skip_serializing)]
    rendered: String,
}

#[derive(Deserialize)]
struct RemoteFields {
    app: String,
    scheme: Scheme,
    host: String,
    port: u16,
    status: String,
}

impl From<RemoteFields> for Remote {
    fn from(fields: RemoteFields) -> Self {
        Remote::new(fields.app, fields.scheme, fields.host, fields.port, fields.status)
    }
}

impl Remote {
    pub fn new(
        app: impl AsRef<str>,
        scheme: Scheme,
        host: impl Into<String>,
        port: u16,
        status: impl Into<String>,
    ) -> Self {
        let host = host.into();
        let rendered = if renders_port(scheme, port) {
            format!("{}://{}:{}", scheme, host, port)
        } else {
            format!("{}://{}", scheme, host)
        };

        Self {
            app: app.as_ref().to_uppercase(),
            scheme,
            host,
            port,
            status: status.into(),
            rendered,
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Whether the instance reported itself as able to take traffic
    pub fn is_up(&self) -> bool {
        self.status.eq_ignore_ascii_case(STATUS_UP)
    }

    /// `host:port`, or just `host` when no port is known
    pub fn authority(&self) -> String {
        if self.port == 0 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Rendered `scheme://host[:port]` form
    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

fn renders_port(scheme: Scheme, port: u16) -> bool {
    port != 0 && scheme.default_port() != Some(port)
}

impl fmt::Display for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

// Identity and ordering follow the rendered form only.
impl PartialEq for Remote {
    fn eq(&self, other: &Self) -> bool {
        self.rendered == other.rendered
    }
}

impl Eq for Remote {}

impl Hash for Remote {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rendered.hash(state);
    }
}

impl PartialOrd for Remote {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Remote {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rendered.cmp(&other.rendered)
    }
}

/// Instances keyed by canonical (upper-cased) service name
#[derive(Debug, Clone, Default)]
pub struct RemoteCollection {
    services: HashMap<String, Vec<Remote>>,
}

impl RemoteCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance under its own application name
    pub fn insert(&mut self, remote: Remote) {
        self.services
            .entry(remote.app().to_string())
            .or_default()
            .push(remote);
    }

    /// Instances known for a service, matched case-insensitively
    pub fn get(&self, service: &str) -> &[Remote] {
        self.services
            .get(&service.to_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<Remote>)> {
        self.services.iter()
    }

    pub fn service_names(&self) -> impl Iterator<Item = &String> {
        self.services.keys()
    }

    pub fn instance_count(&self) -> usize {
        self.services.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.instance_count() == 0
    }
}

impl FromIterator<Remote> for RemoteCollection {
    fn from_iter<I: IntoIterator<Item = Remote>>(iter: I) -> Self {
        let mut collection = Self::new();
        for remote in iter {
            collection.insert(remote);
        }
        collection
    }
}

impl IntoIterator for RemoteCollection {
    type Item = (String, Vec<Remote>);
    type IntoIter = std::collections::hash_map::IntoIter<String, Vec<Remote>>;

    fn into_iter(self) -> Self::IntoIter {
        self.services.into_iter()
    }
}
