//! Incoming HTTP request type.

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};

use crate::method::Method;

/// An incoming HTTP request as seen by the interceptor chain.
///
/// The body is fully buffered before the chain runs.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Vec<u8>,
}

impl Request {
    /// A request with no headers and an empty body.
    ///
    /// ```rust
    /// use tsu_guard::{Method, Request};
    ///
    /// let req = Request::new(Method::Get, "/v1/items")
    ///     .with_header("origin", "https://a.com");
    /// assert_eq!(req.header("Origin"), Some("https://a.com"));
    /// ```
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), headers: HeaderMap::new(), body: Vec::new() }
    }

    /// Appends a header. Names or values that are not legal HTTP are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub(crate) fn from_parts(method: Method, path: String, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self { method, path, headers, body }
    }

    pub fn method(&self) -> Method { self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
