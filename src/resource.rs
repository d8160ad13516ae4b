use std::time::SystemTime;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};

/// A request as seen by the cache: method, URL and headers. Bodies are never
/// part of a cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
}

impl CacheRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn key(&self) -> String {
        request_key(&self.url, false)
    }
}

/// A stored or fetched response.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResponse {
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CacheResponse {
    pub fn new(url: impl Into<String>, status: StatusCode) -> Self {
        Self {
            url: url.into(),
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn ok(url: impl Into<String>) -> Self {
        Self::new(url, StatusCode::OK)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Either a bare URL or a full request. Bare URLs carry no headers and are
/// treated as always cacheable.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestRef {
    Url(String),
    Request(CacheRequest),
}

impl RequestRef {
    pub fn url(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::Request(request) => &request.url,
        }
    }

    pub fn to_request(&self) -> CacheRequest {
        match self {
            Self::Url(url) => CacheRequest::get(url.clone()),
            Self::Request(request) => request.clone(),
        }
    }
}

impl From<&str> for RequestRef {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for RequestRef {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<CacheRequest> for RequestRef {
    fn from(request: CacheRequest) -> Self {
        Self::Request(request)
    }
}

impl From<&CacheRequest> for RequestRef {
    fn from(request: &CacheRequest) -> Self {
        Self::Request(request.clone())
    }
}

#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub request_key: String,
    pub response: CacheResponse,
    pub stored_at: SystemTime,
}

/// Matching options for lookups and deletes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryOptions {
    /// Compare URLs without their query string.
    pub ignore_search: bool,
    /// Match regardless of the request method.
    pub ignore_method: bool,
}

impl QueryOptions {
    /// Whether a request with `method` can match anything under these options.
    pub fn method_allowed(&self, method: &Method) -> bool {
        self.ignore_method || method == Method::GET
    }

    pub fn key_for(&self, url: &str) -> String {
        request_key(url, self.ignore_search)
    }
}

/// Normalized key for a request URL: the fragment is always dropped, the
/// query string only when `ignore_search` is set.
pub fn request_key(url: &str, ignore_search: bool) -> String {
    let without_fragment = url.split_once('#').map_or(url, |(head, _)| head);
    if ignore_search {
        without_fragment
            .split_once('?')
            .map_or(without_fragment, |(head, _)| head)
            .to_string()
    } else {
        without_fragment.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_key_drops_fragment() {
        assert_eq!(request_key("/a.js#top", false), "/a.js");
        assert_eq!(request_key("/a.js?v=1#top", false), "/a.js?v=1");
    }

    #[test]
    fn request_key_ignores_search_on_request() {
        assert_eq!(request_key("/a.js?v=1", true), "/a.js");
        assert_eq!(request_key("/a.js", true), "/a.js");
    }

    #[test]
    fn only_get_matches_without_ignore_method() {
        let options = QueryOptions::default();
        assert!(options.method_allowed(&Method::GET));
        assert!(!options.method_allowed(&Method::POST));
        let options = QueryOptions {
            ignore_method: true,
            ..QueryOptions::default()
        };
        assert!(options.method_allowed(&Method::POST));
    }

    #[test]
    fn bare_url_becomes_get_request() {
        let request = RequestRef::from("/a.js").to_request();
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.url, "/a.js");
        assert!(request.headers.is_empty());
    }
}
