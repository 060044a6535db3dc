//! Cross-origin resource sharing responder.
//!
//! Header values are computed once from [`CorsOptions`] when the responder
//! is built. Per request the only work is echoing the caller's headers when
//! the corresponding list is empty.
//!
//! ```rust
//! use tsu_guard::middleware::{Cors, CorsOptions};
//! use tsu_guard::{Request, Response};
//!
//! async fn items(_req: Request) -> Response { Response::text("[]") }
//!
//! let app = Cors::new(&CorsOptions::default()).wrap(items);
//! ```

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
    ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD, HeaderMap, HeaderName,
    HeaderValue, ORIGIN,
};
use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, interceptor_handler};
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;

const DEFAULT_ALLOW_HEADERS: &[&str] = &[
    "Mobile-Type",
    "Channel",
    "Version-Code",
    "Content-Type",
    "X-Requested-With",
    "User-Id",
    "Session-Id",
    "Peer-Id",
];

const DEFAULT_ALLOW_METHODS: &[Method] = &[
    Method::Get,
    Method::Head,
    Method::Put,
    Method::Post,
    Method::Delete,
    Method::Patch,
];

/// Static CORS policy.
///
/// An empty `allow_origins`, `allow_methods` or `allow_headers` list means
/// "echo what the request asked for".
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsOptions {
    pub allow_origins: Vec<String>,
    pub allow_credentials: bool,
    pub allow_methods: Vec<Method>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    /// Preflight cache duration. Zero disables `Access-Control-Max-Age`.
    #[serde(rename = "max_age_secs", deserialize_with = "secs")]
    pub max_age: Duration,
}

impl Default for CorsOptions {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".to_owned()],
            allow_credentials: false,
            allow_methods: DEFAULT_ALLOW_METHODS.to_vec(),
            allow_headers: DEFAULT_ALLOW_HEADERS.iter().map(|h| (*h).to_owned()).collect(),
            expose_headers: Vec::new(),
            max_age: Duration::ZERO,
        }
    }
}

fn secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

// ── Cors ──────────────────────────────────────────────────────────────────────

/// Pre-rendered policy headers. `None` means "echo the request".
#[derive(Debug)]
struct Policy {
    allow_origin: Option<HeaderValue>,
    allow_credentials: bool,
    expose_headers: Option<HeaderValue>,
    allow_methods: Option<HeaderValue>,
    allow_headers: Option<HeaderValue>,
    max_age: Option<HeaderValue>,
}

/// Builds [`CorsHandler`]s from one shared policy.
#[derive(Debug, Clone)]
pub struct Cors {
    policy: Arc<Policy>,
}

impl Cors {
    pub fn new(options: &CorsOptions) -> Self {
        let methods: Vec<&str> = options.allow_methods.iter().map(|m| m.as_str()).collect();
        let max_age = (options.max_age > Duration::ZERO)
            .then(|| HeaderValue::from(options.max_age.as_secs()));

        let policy = Policy {
            allow_origin: join(ACCESS_CONTROL_ALLOW_ORIGIN, &options.allow_origins, " "),
            allow_credentials: options.allow_credentials,
            expose_headers: join(ACCESS_CONTROL_EXPOSE_HEADERS, &options.expose_headers, ","),
            allow_methods: join(ACCESS_CONTROL_ALLOW_METHODS, &methods, ","),
            allow_headers: join(ACCESS_CONTROL_ALLOW_HEADERS, &options.allow_headers, ","),
            max_age,
        };
        Self { policy: Arc::new(policy) }
    }

    /// Wraps `inner`. Preflight requests never reach it.
    pub fn wrap(&self, inner: impl Handler) -> CorsHandler {
        CorsHandler { policy: Arc::clone(&self.policy), inner: inner.into_boxed_handler() }
    }

    /// Computes the CORS headers for `req`.
    ///
    /// Returns `Some(response)` when the request is a preflight and the chain
    /// must stop here.
    pub fn respond(&self, req: &Request, headers: &mut HeaderMap) -> Option<Response> {
        self.policy.apply(req, headers)
    }
}

/// Joins `values` into one header value, or `None` when the list is empty.
/// A list that does not form a legal header value is dropped with a warning.
fn join<S: AsRef<str>>(name: HeaderName, values: &[S], sep: &str) -> Option<HeaderValue> {
    if values.is_empty() {
        return None;
    }
    let joined = values.iter().map(AsRef::<str>::as_ref).collect::<Vec<_>>().join(sep);
    match HeaderValue::from_str(&joined) {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(header = %name, value = %joined, "invalid CORS header value, falling back to echo");
            None
        }
    }
}

impl Policy {
    fn apply(&self, req: &Request, out: &mut HeaderMap) -> Option<Response> {
        let incoming = req.headers();

        if let Some(origin) = self.allow_origin.as_ref().or_else(|| incoming.get(ORIGIN)) {
            out.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        }
        if self.allow_credentials {
            out.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if let Some(expose) = &self.expose_headers {
            out.insert(ACCESS_CONTROL_EXPOSE_HEADERS, expose.clone());
        }

        if req.method() != Method::Options {
            return None;
        }

        let methods = self.allow_methods.as_ref().or_else(|| non_empty(incoming, ACCESS_CONTROL_REQUEST_METHOD));
        if let Some(methods) = methods {
            out.insert(ACCESS_CONTROL_ALLOW_METHODS, methods.clone());
        }
        let headers = self.allow_headers.as_ref().or_else(|| non_empty(incoming, ACCESS_CONTROL_REQUEST_HEADERS));
        if let Some(headers) = headers {
            out.insert(ACCESS_CONTROL_ALLOW_HEADERS, headers.clone());
        }
        if let Some(max_age) = &self.max_age {
            out.insert(ACCESS_CONTROL_MAX_AGE, max_age.clone());
        }

        Some(Response::status(StatusCode::NO_CONTENT))
    }
}

fn non_empty(headers: &HeaderMap, name: HeaderName) -> Option<&HeaderValue> {
    headers.get(name).filter(|v| !v.is_empty())
}

// ── CorsHandler ───────────────────────────────────────────────────────────────

/// A handler wrapped by [`Cors`].
pub struct CorsHandler {
    policy: Arc<Policy>,
    inner: BoxedHandler,
}

impl ErasedHandler for CorsHandler {
    fn call(&self, req: Request) -> BoxFuture {
        let mut headers = HeaderMap::new();
        if let Some(mut preflight) = self.policy.apply(&req, &mut headers) {
            preflight.headers_mut().extend(headers);
            return Box::pin(async move { preflight });
        }

        let fut = self.inner.call(req);
        Box::pin(async move {
            let mut res = fut.await;
            // Headers set by the inner handler win.
            for (name, value) in &headers {
                res.headers_mut().entry(name).or_insert_with(|| value.clone());
            }
            res
        })
    }
}

interceptor_handler!(CorsHandler);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn preflight() -> Request {
        Request::new(Method::Options, "/v1/items")
            .with_header("origin", "https://a.com")
            .with_header("access-control-request-method", "POST")
            .with_header("access-control-request-headers", "X-Token")
    }

    fn headers_for(options: &CorsOptions, req: &Request) -> (HeaderMap, Option<Response>) {
        let mut out = HeaderMap::new();
        let res = Cors::new(options).respond(req, &mut out);
        (out, res)
    }

    #[test]
    fn default_preflight_uses_configured_lists() {
        let (h, res) = headers_for(&CorsOptions::default(), &preflight());

        assert_eq!(res.map(|r| r.status_code()), Some(StatusCode::NO_CONTENT));
        assert_eq!(h[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(h[ACCESS_CONTROL_ALLOW_METHODS], "GET,HEAD,PUT,POST,DELETE,PATCH");
        assert_eq!(
            h[ACCESS_CONTROL_ALLOW_HEADERS],
            "Mobile-Type,Channel,Version-Code,Content-Type,X-Requested-With,User-Id,Session-Id,Peer-Id"
        );
        assert!(!h.contains_key(ACCESS_CONTROL_ALLOW_CREDENTIALS));
        assert!(!h.contains_key(ACCESS_CONTROL_EXPOSE_HEADERS));
        assert!(!h.contains_key(ACCESS_CONTROL_MAX_AGE));
    }

    #[test]
    fn empty_lists_echo_the_request() {
        let options = CorsOptions {
            allow_origins: Vec::new(),
            allow_methods: Vec::new(),
            allow_headers: Vec::new(),
            ..CorsOptions::default()
        };
        let (h, _) = headers_for(&options, &preflight());

        assert_eq!(h[ACCESS_CONTROL_ALLOW_ORIGIN], "https://a.com");
        assert_eq!(h[ACCESS_CONTROL_ALLOW_METHODS], "POST");
        assert_eq!(h[ACCESS_CONTROL_ALLOW_HEADERS], "X-Token");
    }

    #[test]
    fn optional_headers_follow_configuration() {
        let options = CorsOptions {
            allow_origins: vec!["https://a.com".into(), "https://b.com".into()],
            allow_credentials: true,
            expose_headers: vec!["X-Total".into(), "X-Page".into()],
            max_age: Duration::from_millis(90_500),
            ..CorsOptions::default()
        };
        let (h, _) = headers_for(&options, &preflight());

        assert_eq!(h[ACCESS_CONTROL_ALLOW_ORIGIN], "https://a.com https://b.com");
        assert_eq!(h[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(h[ACCESS_CONTROL_EXPOSE_HEADERS], "X-Total,X-Page");
        assert_eq!(h[ACCESS_CONTROL_MAX_AGE], "90");
    }

    #[test]
    fn simple_requests_get_no_preflight_headers() {
        let req = Request::new(Method::Get, "/v1/items").with_header("origin", "https://a.com");
        let (h, res) = headers_for(&CorsOptions::default(), &req);

        assert!(res.is_none());
        assert_eq!(h[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(!h.contains_key(ACCESS_CONTROL_ALLOW_METHODS));
        assert!(!h.contains_key(ACCESS_CONTROL_ALLOW_HEADERS));
    }

    #[test]
    fn invalid_configured_value_falls_back_to_echo() {
        let options = CorsOptions { allow_origins: vec!["bad\norigin".into()], ..CorsOptions::default() };
        let (h, _) = headers_for(&options, &preflight());

        assert_eq!(h[ACCESS_CONTROL_ALLOW_ORIGIN], "https://a.com");
    }

    #[tokio::test]
    async fn preflight_never_reaches_inner_handler() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        async fn inner(_req: Request) -> Response {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Response::text("inner")
        }
        let h = Cors::new(&CorsOptions::default()).wrap(inner);

        let res = h.call(preflight()).await;
        assert_eq!(res.status_code(), StatusCode::NO_CONTENT);
        assert!(res.body().is_empty());
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);

        let res = h.call(Request::new(Method::Get, "/v1/items")).await;
        assert_eq!(res.body(), b"inner");
        assert_eq!(res.header("access-control-allow-origin"), Some("*"));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inner_handler_headers_are_not_overwritten() {
        async fn inner(_req: Request) -> Response {
            Response::builder().header("access-control-allow-origin", "https://b.com").text("inner")
        }
        let options = CorsOptions { allow_credentials: true, ..CorsOptions::default() };
        let h = Cors::new(&options).wrap(inner);

        let res = h.call(Request::new(Method::Get, "/v1/items")).await;
        assert_eq!(res.header("access-control-allow-origin"), Some("https://b.com"));
        assert_eq!(res.header("access-control-allow-credentials"), Some("true"));
    }
}
