//! # Reverse Proxy
//!
//! Resolves an inbound path to an upstream URL and forwards the request there.
//!
//! ## Flow
//!
//! 1. [`ReverseProxy::resolve_target`] runs the [`PathProcessor`] against the
//!    configured [`ServiceResolver`] and parses the result into a [`Url`], carrying
//!    over the inbound query string.
//! 2. [`ReverseProxy::forward`] rebuilds the request against that URL with the
//!    original method, headers and body, minus hop-by-hop headers and `Host`.
//! 3. Upstream responses with status >= 300 are buffered and logged. 5xx bodies are
//!    replaced with a diagnostic JSON body carrying an incident id that also
//!    appears in the log line.
//!
//! Request bodies are buffered up to `max_body_size` and rejected with `413` past
//! it. Error bodies from upstream are captured up to a fixed bound; only the first
//! [`LOGGED_BODY_LIMIT`] bytes reach the log.
//!
//! ## Rust Concepts Used
//!
//! - `Arc<dyn ServiceResolver>` lets the proxy stay independent of the registry type
//! - `reqwest::Client` is cheap to clone and pools connections internally
//! - Successful response bodies are streamed back with `Body::from_stream`

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use metrics::counter;
use serde_json::json;
use http_body_util::LengthLimitError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;
use uuid::Uuid;

use crate::core::config::ProxyConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::proxy::context::UpstreamContext;
use crate::routing::path::PathProcessor;
use crate::routing::resolver::ServiceResolver;

/// Headers that describe a single connection and must not be forwarded
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Upper bound on a 5xx body read for logging; the body itself is never returned
const SERVER_ERROR_CAPTURE_LIMIT: usize = 64 * 1024;

/// Bytes of a captured error body written to the log
pub const LOGGED_BODY_LIMIT: usize = 4 * 1024;

/// Path-based reverse proxy over a pooled HTTP client
#[derive(Clone)]
pub struct ReverseProxy {
    processor: PathProcessor,
    resolver: Arc<dyn ServiceResolver>,
    client: reqwest::Client,
    request_timeout: Duration,
    max_body_size: usize,
}

impl ReverseProxy {
    pub fn new(config: &ProxyConfig, resolver: Arc<dyn ServiceResolver>) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .tcp_keepalive(config.conn_keepalive)
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::config(format!("failed to build upstream client: {}", e)))?;

        Ok(Self {
            processor: PathProcessor::new(config.api_marker),
            resolver,
            client,
            request_timeout: config.request_timeout,
            max_body_size: config.max_body_size,
        })
    }

    pub fn processor(&self) -> &PathProcessor {
        &self.processor
    }

    /// Upstream URL for an inbound path and optional query string
    pub fn resolve_target(&self, path: &str, query: Option<&str>) -> GatewayResult<Url> {
        let resolved = self
            .processor
            .resolve(path, self.resolver.as_ref())
            .and_then(|target| {
                Url::parse(&target).map_err(|e| {
                    GatewayError::internal(format!("resolved target '{}' is not a url: {}", target, e))
                })
            })
            .map(|mut target| {
                target.set_query(query.filter(|q| !q.is_empty()));
                target
            });

        match &resolved {
            Ok(target) => debug!(path = %path, target = %target, "resolved proxy target"),
            Err(e) => warn!(path = %path, error = %e, "failed to resolve proxy target"),
        }
        resolved
    }

    /// Send `request` to `target` and translate the upstream response
    pub async fn forward(&self, request: Request, target: Url) -> GatewayResult<Response> {
        let (parts, body) = request.into_parts();

        let mut headers = strip_hop_by_hop(&parts.headers);
        headers.remove(header::HOST);

        let context = parts
            .extensions
            .get::<UpstreamContext>()
            .cloned()
            .unwrap_or_else(|| UpstreamContext::from_request(&parts.uri, &parts.headers));
        context.apply(&mut headers);

        if let Some(ConnectInfo(peer)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            append_forwarded_for(&mut headers, *peer);
        }

        let body = self.read_body(&parts.headers, body).await?;

        let mut upstream = self
            .client
            .request(parts.method.clone(), target.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                counter!("proxy_requests_total", "outcome" => "failed").increment(1);
                self.upstream_error(&target, e)
            })?;

        let status = upstream.status();
        let response_headers = strip_hop_by_hop(upstream.headers());

        if status.as_u16() < 300 {
            counter!("proxy_requests_total", "outcome" => "success").increment(1);
            let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
            *response.status_mut() = status;
            *response.headers_mut() = response_headers;
            return Ok(response);
        }

        counter!("proxy_requests_total", "outcome" => "upstream_error").increment(1);
        counter!("proxy_upstream_errors_total", "status" => status.as_u16().to_string()).increment(1);

        let limit = if status.is_server_error() {
            SERVER_ERROR_CAPTURE_LIMIT
        } else {
            self.max_body_size
        };
        let captured = capture_body(&mut upstream, limit, &target).await;
        let captured_text = String::from_utf8_lossy(&captured[..captured.len().min(LOGGED_BODY_LIMIT)]);

        if status.is_server_error() {
            let incident = Uuid::new_v4();
            error!(
                target = %target,
                status = status.as_u16(),
                incident = %incident,
                body = %captured_text,
                "upstream server error"
            );
            return Ok(diagnostic_response(status, incident, response_headers));
        }

        warn!(
            target = %target,
            status = status.as_u16(),
            body = %captured_text,
            "upstream returned non-success status"
        );
        let mut response = Response::new(Body::from(captured));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        response.headers_mut().remove(header::CONTENT_LENGTH);
        Ok(response)
    }

    /// Buffer the request body, refusing anything past `max_body_size`
    async fn read_body(&self, headers: &HeaderMap, body: Body) -> GatewayResult<Bytes> {
        let too_large = GatewayError::PayloadTooLarge {
            limit: self.max_body_size,
        };

        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|length| length > self.max_body_size) {
            warn!(limit = self.max_body_size, "declared request body exceeds limit");
            return Err(too_large);
        }

        axum::body::to_bytes(body, self.max_body_size)
            .await
            .map_err(|e| {
                let inner = e.into_inner();
                if inner.downcast_ref::<LengthLimitError>().is_some() {
                    warn!(limit = self.max_body_size, "request body exceeds limit");
                    too_large
                } else {
                    GatewayError::internal(format!("failed to read request body: {}", inner))
                }
            })
    }

    fn upstream_error(&self, target: &Url, err: reqwest::Error) -> GatewayError {
        let backend = target.host_str().unwrap_or_default().to_string();
        if err.is_timeout() {
            warn!(target = %target, "upstream request timed out");
            GatewayError::Timeout {
                timeout_ms: self.request_timeout.as_millis() as u64,
            }
        } else if err.is_connect() {
            warn!(target = %target, error = %err, "upstream connection failed");
            GatewayError::connect(backend, err.to_string())
        } else {
            warn!(target = %target, error = %err, "upstream request failed");
            GatewayError::from(err)
        }
    }
}

/// Read at most `limit` bytes of an upstream body; read failures end the capture early
async fn capture_body(upstream: &mut reqwest::Response, limit: usize, target: &Url) -> Bytes {
    let mut captured = Vec::new();
    loop {
        match upstream.chunk().await {
            Ok(Some(chunk)) => {
                let room = limit - captured.len();
                if chunk.len() > room {
                    captured.extend_from_slice(&chunk[..room]);
                    warn!(target = %target, limit, "upstream error body truncated");
                    break;
                }
                captured.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(target = %target, error = %e, "failed to read upstream error body");
                break;
            }
        }
    }
    Bytes::from(captured)
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in HOP_BY_HOP_HEADERS {
        forwarded.remove(name);
    }
    forwarded
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let ip = peer.ip().to_string();
    let value = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{}, {}", existing, ip),
        _ => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
    }
}

fn diagnostic_response(status: StatusCode, incident: Uuid, mut headers: HeaderMap) -> Response {
    let body = json!({
        "error": {
            "code": status.as_u16(),
            "message": "upstream service failed to process the request",
            "type": "upstream_error",
            "incident": incident.to_string(),
        }
    });

    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::CONTENT_ENCODING);
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ProxyConfig;
    use crate::routing::path::ApiMarker;

    fn proxy(marker: ApiMarker) -> ReverseProxy {
        let config = ProxyConfig {
            api_marker: marker,
            ..ProxyConfig::default()
        };
        let resolver = |service: &str| -> GatewayResult<String> {
            match service {
                "service-a" => Ok("backend:3101".to_string()),
                "secure" => Ok("https://secure:8443".to_string()),
                other => Err(GatewayError::service_unavailable(other)),
            }
        };
        ReverseProxy::new(&config, Arc::new(resolver)).unwrap()
    }

    #[test]
    fn test_resolve_target_keeps_query() {
        let target = proxy(ApiMarker::Strip)
            .resolve_target("/api/service-a/widgets", Some("id=1"))
            .unwrap();
        assert_eq!(target.as_str(), "http://backend:3101/widgets?id=1");
    }

    #[test]
    fn test_resolve_target_preserve_marker() {
        let target = proxy(ApiMarker::Preserve)
            .resolve_target("/api/service-a/widgets", None)
            .unwrap();
        assert_eq!(target.as_str(), "http://backend:3101/api/widgets");
    }

    #[test]
    fn test_resolve_target_keeps_instance_scheme() {
        let target = proxy(ApiMarker::Strip).resolve_target("/secure/x", Some("")).unwrap();
        assert_eq!(target.as_str(), "https://secure:8443/x");
    }

    #[test]
    fn test_resolve_target_errors() {
        let proxy = proxy(ApiMarker::Strip);
        assert!(matches!(
            proxy.resolve_target("/api", None),
            Err(GatewayError::InvalidPath { .. })
        ));
        assert!(matches!(
            proxy.resolve_target("/api/service-c/test", None),
            Err(GatewayError::ServiceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_body_enforces_limit() {
        let config = ProxyConfig {
            max_body_size: 16,
            ..ProxyConfig::default()
        };
        let resolver = |_: &str| -> GatewayResult<String> { Ok("backend:3101".to_string()) };
        let proxy = ReverseProxy::new(&config, Arc::new(resolver)).unwrap();

        let small = proxy.read_body(&HeaderMap::new(), Body::from("tiny")).await.unwrap();
        assert_eq!(&small[..], b"tiny");

        let streamed = proxy
            .read_body(&HeaderMap::new(), Body::from("x".repeat(64)))
            .await;
        assert!(matches!(streamed, Err(GatewayError::PayloadTooLarge { limit: 16 })));

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("1048576"));
        let declared = proxy.read_body(&headers, Body::empty()).await;
        assert!(matches!(declared, Err(GatewayError::PayloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_capture_body_stops_at_limit() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("e".repeat(100 * 1024)))
            .mount(&upstream)
            .await;

        let target = Url::parse(&upstream.uri()).unwrap();
        let mut response = reqwest::get(target.clone()).await.unwrap();
        let captured = capture_body(&mut response, 1024, &target).await;
        assert_eq!(captured.len(), 1024);
    }

    #[test]
    fn test_hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let forwarded = strip_hop_by_hop(&headers);
        assert!(forwarded.get(header::CONNECTION).is_none());
        assert!(forwarded.get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(forwarded[header::ACCEPT], "application/json");
    }

    #[test]
    fn test_forwarded_for_is_appended() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "10.1.1.1:4000".parse().unwrap();
        append_forwarded_for(&mut headers, peer);
        assert_eq!(headers[X_FORWARDED_FOR], "10.1.1.1");

        append_forwarded_for(&mut headers, "10.2.2.2:4000".parse().unwrap());
        assert_eq!(headers[X_FORWARDED_FOR], "10.1.1.1, 10.2.2.2");
    }
}
