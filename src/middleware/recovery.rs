//! Panic recovery and crash reporting.
//!
//! A [`Recovered`] handler runs its inner handler through the abort
//! boundary ([`invoke`]). When the inner handler aborts it:
//!
//! 1. logs the failure with the panic-site backtrace,
//! 2. answers `500` with `{"error_code":500,"error":"<message>"}`,
//! 3. bumps `error_total` and hands the failure to the [`CrashReporter`].
//!
//! Step 3 runs behind its own `catch_unwind`. A reporter that errors or
//! panics is logged and otherwise ignored; the 500 from step 2 is returned
//! unchanged and the worker keeps serving.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use http::StatusCode;
use serde::Serialize;
use tracing::{error, warn};

use super::metrics::Monitor;
use super::panic::{Aborted, Failure, invoke, take_backtrace};
use crate::error::Error;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, interceptor_handler};
use crate::method::Method;
use crate::report::{CrashReporter, ReportContext, SentryReporter};
use crate::request::Request;
use crate::response::Response;

/// Body of the `500` sent for an aborted request.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error_code: u16,
    pub error: &'a str,
}

struct Shared {
    monitor: Monitor,
    reporter: Arc<dyn CrashReporter>,
}

/// Builds [`Recovered`] handlers sharing one monitor and crash reporter.
#[derive(Clone)]
pub struct Recoverer {
    shared: Arc<Shared>,
}

impl Recoverer {
    /// Recovery that reports to the Sentry project at `dsn`.
    ///
    /// A malformed DSN is a startup error; the process should not serve.
    pub fn new(monitor: &Monitor, dsn: &str) -> Result<Self, Error> {
        let reporter = SentryReporter::new(dsn)?;
        Ok(Self::with_reporter(monitor, Arc::new(reporter)))
    }

    /// Recovery that reports to `reporter`.
    pub fn with_reporter(monitor: &Monitor, reporter: Arc<dyn CrashReporter>) -> Self {
        Self { shared: Arc::new(Shared { monitor: monitor.clone(), reporter }) }
    }

    /// Wraps `inner`. Typically `inner` is a [`Monitored`](super::Monitored)
    /// handler built from the same monitor.
    pub fn wrap(&self, inner: impl Handler) -> Recovered {
        Recovered { shared: Arc::clone(&self.shared), inner: inner.into_boxed_handler() }
    }

    pub fn reporter(&self) -> &Arc<dyn CrashReporter> {
        &self.shared.reporter
    }
}

/// A handler wrapped by [`Recoverer`].
pub struct Recovered {
    shared: Arc<Shared>,
    inner: BoxedHandler,
}

impl ErasedHandler for Recovered {
    fn call(&self, req: Request) -> BoxFuture {
        let shared = Arc::clone(&self.shared);
        let inner = Arc::clone(&self.inner);

        Box::pin(async move {
            let method = req.method();
            let path = req.path().to_owned();

            match invoke(&inner, req).await {
                Ok(res) => res,
                Err(aborted) => shared.recover(method, path, aborted),
            }
        })
    }
}

interceptor_handler!(Recovered);

impl Shared {
    fn recover(&self, method: Method, path: String, aborted: Aborted) -> Response {
        let Aborted { failure, backtrace } = aborted;
        error!(
            method = %method,
            path = %path,
            kind = failure.kind(),
            backtrace = %backtrace,
            "PANIC: {failure}"
        );

        let body = ErrorBody { error_code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(), error: failure.message() };
        let res = match serde_json::to_vec(&body) {
            Ok(json) => Response::builder().status(StatusCode::INTERNAL_SERVER_ERROR).json(json),
            Err(e) => {
                return Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .text(e.to_string());
            }
        };

        self.report(ReportContext { method, path }, &failure);
        res
    }

    /// Counts the error and submits the report. Nothing raised here escapes.
    fn report(&self, context: ReportContext, failure: &Failure) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.monitor.record_error(context.method, &context.path);
            self.reporter.report(failure, &context)
        }));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, method = %context.method, path = %context.path, "crash report not delivered"),
            Err(payload) => {
                let cause = Failure::from_payload(payload);
                error!(
                    error = %cause,
                    backtrace = %take_backtrace(),
                    "Report to crash reporter failed"
                );
            }
        }
    }
}
