//! Typed request context propagated to upstream services as headers.
//!
//! Authentication and user lookup happen outside the gateway core. Whatever
//! produced them stores an [`UpstreamContext`] in the request extensions and the
//! reverse proxy renders it just before forwarding.

use axum::http::header::ACCEPT_LANGUAGE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Uri};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

pub const REQUEST_CONTEXT_AUTH: &str = "x-request-context-auth";
pub const REQUEST_CONTEXT_USER_DETAILS: &str = "x-request-context-user-details";
pub const REQUEST_CONTEXT_LOCALE: &str = "x-request-context-locale";

/// How the caller authenticated
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthDecision {
    #[default]
    Anonymous,
    Bearer,
    Cookie,
}

impl AuthDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthDecision::Anonymous => "anonymous",
            AuthDecision::Bearer => "bearer",
            AuthDecision::Cookie => "cookie",
        }
    }
}

/// Attributes of the authenticated user, forwarded as-is
pub type UserDetails = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamContext {
    pub auth: AuthDecision,
    pub user_details: Option<UserDetails>,
    pub locale: Option<String>,
}

impl UpstreamContext {
    pub fn new(auth: AuthDecision) -> Self {
        Self {
            auth,
            ..Self::default()
        }
    }

    pub fn with_user_details(mut self, details: UserDetails) -> Self {
        self.user_details = Some(details);
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Anonymous context whose locale comes from `lang`, then `locale`, then `Accept-Language`
    pub fn from_request(uri: &Uri, headers: &HeaderMap) -> Self {
        Self {
            locale: locale_of(uri, headers),
            ..Self::default()
        }
    }

    /// Write the context into outbound headers, replacing any caller-supplied values
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(
            HeaderName::from_static(REQUEST_CONTEXT_AUTH),
            HeaderValue::from_static(self.auth.as_str()),
        );

        headers.remove(REQUEST_CONTEXT_USER_DETAILS);
        if let Some(details) = &self.user_details {
            let rendered = serde_json::to_string(details)
                .ok()
                .and_then(|json| HeaderValue::from_str(&json).ok());
            match rendered {
                Some(value) => {
                    headers.insert(HeaderName::from_static(REQUEST_CONTEXT_USER_DETAILS), value);
                }
                None => warn!("user details cannot be rendered as a header, dropped"),
            }
        }

        headers.remove(REQUEST_CONTEXT_LOCALE);
        if let Some(value) = self
            .locale
            .as_deref()
            .and_then(|locale| HeaderValue::from_str(locale).ok())
        {
            headers.insert(HeaderName::from_static(REQUEST_CONTEXT_LOCALE), value.clone());
            headers.insert(ACCEPT_LANGUAGE, value);
        }
    }
}

fn locale_of(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    let query: BTreeMap<String, String> = uri
        .query()
        .map(|query| url::form_urlencoded::parse(query.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    ["lang", "locale"]
        .iter()
        .filter_map(|key| query.get(*key))
        .find(|value| !value.is_empty())
        .cloned()
        .or_else(|| {
            headers
                .get(ACCEPT_LANGUAGE)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("de"));

        let uri: Uri = "/svc/x?locale=fr&lang=en".parse().unwrap();
        assert_eq!(UpstreamContext::from_request(&uri, &headers).locale.as_deref(), Some("en"));

        let uri: Uri = "/svc/x?locale=fr".parse().unwrap();
        assert_eq!(UpstreamContext::from_request(&uri, &headers).locale.as_deref(), Some("fr"));

        let uri: Uri = "/svc/x".parse().unwrap();
        assert_eq!(UpstreamContext::from_request(&uri, &headers).locale.as_deref(), Some("de"));
        assert_eq!(UpstreamContext::from_request(&uri, &HeaderMap::new()).locale, None);
    }

    #[test]
    fn test_apply_renders_headers() {
        let details: UserDetails = [("user-id".to_string(), "42".to_string())].into();
        let context = UpstreamContext::new(AuthDecision::Bearer)
            .with_user_details(details)
            .with_locale("en");

        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_CONTEXT_USER_DETAILS, HeaderValue::from_static("spoofed"));
        context.apply(&mut headers);

        assert_eq!(headers[REQUEST_CONTEXT_AUTH], "bearer");
        assert_eq!(headers[REQUEST_CONTEXT_USER_DETAILS], r#"{"user-id":"42"}"#);
        assert_eq!(headers[REQUEST_CONTEXT_LOCALE], "en");
        assert_eq!(headers[ACCEPT_LANGUAGE], "en");
    }

    #[test]
    fn test_anonymous_context_strips_spoofed_details() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_CONTEXT_USER_DETAILS, HeaderValue::from_static("spoofed"));
        UpstreamContext::default().apply(&mut headers);

        assert_eq!(headers[REQUEST_CONTEXT_AUTH], "anonymous");
        assert!(headers.get(REQUEST_CONTEXT_USER_DETAILS).is_none());
    }
}
