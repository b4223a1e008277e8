//! Requests and responses as seen by the gateway.
//!
//! Both are plain, fully buffered values built on the [`http`] crate's
//! vocabulary types. The gateway never streams: cached entries are stored
//! and served whole.

use bytes::Bytes;
use derive_more::Display;
use http::header::{CONTENT_TYPE, RANGE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use shelter_cache::CachedEntry;

/// How the client issued a request.
#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMode {
    /// A top-level document load.
    #[display("navigate")]
    Navigate,
    #[display("same-origin")]
    SameOrigin,
    #[default]
    #[display("no-cors")]
    NoCors,
    #[display("cors")]
    Cors,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Resource identifier: absolute, scope-relative (`./a.mp3`) or a path.
    pub url: String,
    pub headers: HeaderMap,
    pub mode: RequestMode,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            mode: RequestMode::default(),
        }
    }

    /// A plain subresource `GET`.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// A top-level document load.
    pub fn navigate(url: impl Into<String>) -> Self {
        Self::get(url).with_mode(RequestMode::Navigate)
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The raw `Range` header, if any.
    pub fn range(&self) -> Option<&HeaderValue> {
        self.headers.get(RANGE)
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// The same request asking for the whole resource.
    pub fn without_range(&self) -> Self {
        let mut request = self.clone();
        request.headers.remove(RANGE);
        request
    }

    /// The same request aimed at another URL.
    pub(crate) fn with_url(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// `200 OK` with the given body and no headers.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, HeaderMap::new(), body)
    }

    /// A terse response produced by the gateway itself: the reason phrase as
    /// a plain-text body.
    pub fn synthetic(status: StatusCode) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        Self::new(status, headers, status.canonical_reason().unwrap_or_default())
    }

    /// Canonical reason phrase for the status, e.g. `Partial Content`.
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or_default()
    }

    /// Only complete `200 OK` responses are ever stored.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK
    }

    pub fn into_entry(self) -> CachedEntry {
        CachedEntry::new(self.status, self.headers, self.body)
    }

    pub fn to_entry(&self) -> CachedEntry {
        self.clone().into_entry()
    }
}

impl From<CachedEntry> for Response {
    fn from(entry: CachedEntry) -> Self {
        Self::new(entry.status, entry.headers, entry.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_without_range_keeps_everything_else() {
        let request = Request::get("./a.mp3")
            .with_header(RANGE, HeaderValue::from_static("bytes=0-"))
            .with_header(http::header::ACCEPT, HeaderValue::from_static("audio/*"));
        let full = request.without_range();
        assert!(request.range().is_some());
        assert!(full.range().is_none());
        assert_eq!(full.headers[http::header::ACCEPT], "audio/*");
        assert_eq!(full.url, request.url);
    }

    #[test]
    fn test_synthetic_response() {
        let response = Response::synthetic(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.status_text(), "Service Unavailable");
        assert_eq!(response.body, Bytes::from_static(b"Service Unavailable"));
        assert!(!response.is_cacheable());
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(RequestMode::Navigate.to_string(), "navigate");
        assert_eq!(Request::get("/").mode.to_string(), "no-cors");
        assert!(Request::navigate("/").is_navigation());
    }
}
