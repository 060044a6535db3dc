//! Request metrics.
//!
//! A [`Monitor`] owns three collectors labelled by `method` and `endpoint`:
//!
//! | Metric | Type | Recorded by |
//! |---|---|---|
//! | `requests_total` | counter | [`Monitored`] on normal return |
//! | `response_latency_millisecond` | histogram | [`Monitored`] on normal return |
//! | `error_total` | counter | [`Recovered`](super::Recovered) on abort |
//!
//! A request that aborts bumps `error_total` only, so the two counters
//! partition the traffic.

use std::sync::Arc;
use std::time::Instant;

use http::StatusCode;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use serde::Deserialize;
use tracing::error;

use crate::error::Error;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, interceptor_handler};
use crate::method::Method;
use crate::request::Request;
use crate::response::{ContentType, Response};

/// Latency buckets, in milliseconds, used when none are configured.
pub const DEFAULT_BUCKETS: &[f64] =
    &[10.0, 20.0, 30.0, 50.0, 80.0, 100.0, 200.0, 300.0, 500.0, 1000.0, 2000.0, 3000.0];

const LABELS: &[&str] = &["method", "endpoint"];

/// Collector naming.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitorOptions {
    /// Metric namespace, e.g. `shop` gives `shop_requests_total`.
    pub application: String,
    /// Value of the constant `process` label (typically the listen port).
    /// Empty omits the label.
    pub process: String,
    /// Histogram bucket boundaries in milliseconds. Empty means
    /// [`DEFAULT_BUCKETS`].
    pub buckets: Vec<f64>,
}

struct Collectors {
    requests: CounterVec,
    errors: CounterVec,
    latency: HistogramVec,
}

/// The metric collector set, registered once against a [`Registry`].
///
/// Cloning is cheap and every clone records into the same collectors.
#[derive(Clone)]
pub struct Monitor {
    collectors: Arc<Collectors>,
}

impl Monitor {
    /// Creates and registers the three collectors.
    ///
    /// Fails with [`Error::Metrics`] when a name is already registered in
    /// `registry` or the options do not form valid metric names. Treat that
    /// as fatal: do not start serving.
    pub fn new(registry: &Registry, options: &MonitorOptions) -> Result<Self, Error> {
        let opts = |name: &str, help: &str| {
            let opts = Opts::new(name, help).namespace(options.application.clone());
            if options.process.is_empty() {
                opts
            } else {
                opts.const_label("process", options.process.clone())
            }
        };
        let buckets = if options.buckets.is_empty() {
            DEFAULT_BUCKETS.to_vec()
        } else {
            options.buckets.clone()
        };

        let requests = CounterVec::new(opts("requests_total", "Total request counts"), LABELS)?;
        registry.register(Box::new(requests.clone()))?;

        let errors = CounterVec::new(opts("error_total", "Total error counts"), LABELS)?;
        registry.register(Box::new(errors.clone()))?;

        let latency = HistogramVec::new(
            HistogramOpts::from(opts("response_latency_millisecond", "Response latency (millisecond)"))
                .buckets(buckets),
            LABELS,
        )?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self { collectors: Arc::new(Collectors { requests, errors, latency }) })
    }

    /// Wraps `inner` so every normal return is counted and timed.
    pub fn wrap(&self, inner: impl Handler) -> Monitored {
        Monitored { monitor: self.clone(), inner: inner.into_boxed_handler() }
    }

    pub fn requests(&self) -> &CounterVec { &self.collectors.requests }
    pub fn errors(&self) -> &CounterVec { &self.collectors.errors }
    pub fn latency(&self) -> &HistogramVec { &self.collectors.latency }

    pub(crate) fn record_error(&self, method: Method, path: &str) {
        self.collectors.errors.with_label_values(&[method.as_str(), path]).inc();
    }

    fn record(&self, method: Method, path: &str, started: Instant) {
        let labels = [method.as_str(), path];
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.collectors.requests.with_label_values(&labels).inc();
        self.collectors.latency.with_label_values(&labels).observe(elapsed_ms);
    }
}

/// A handler wrapped by [`Monitor`].
pub struct Monitored {
    monitor: Monitor,
    inner: BoxedHandler,
}

impl ErasedHandler for Monitored {
    fn call(&self, req: Request) -> BoxFuture {
        let method = req.method();
        let path = req.path().to_owned();
        let monitor = self.monitor.clone();
        let started = Instant::now();
        let fut = self.inner.call(req);

        // An unwind out of `fut` skips the recording below.
        Box::pin(async move {
            let res = fut.await;
            monitor.record(method, &path, started);
            res
        })
    }
}

interceptor_handler!(Monitored);

/// A handler that renders `registry` in the Prometheus text format.
///
/// Mount it wherever the host answers scrapes.
pub fn exposition(registry: Registry) -> impl Handler {
    move |_req: Request| {
        let registry = registry.clone();
        async move {
            let mut buf = Vec::new();
            let encoder = TextEncoder::new();
            match encoder.encode(&registry.gather(), &mut buf) {
                Ok(()) => Response::builder().bytes(ContentType::Custom(prometheus::TEXT_FORMAT), buf),
                Err(e) => {
                    error!(error = %e, "metrics encoding failed");
                    Response::status(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        }
    }
}
