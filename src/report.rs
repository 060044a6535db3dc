//! Crash-report sink.
//!
//! The recovery interceptor hands every recovered abort to a
//! [`CrashReporter`]. The shipped implementation forwards to Sentry; tests
//! and hosts can plug in their own.

use std::sync::Arc;
use std::time::Duration;

use sentry::{ClientOptions, TransportFactory};
use sentry::protocol::{Event, Exception, Level};
use sentry::transports::DefaultTransportFactory;
use sentry::types::Dsn;
use tracing::{debug, info};

use crate::error::Error;
use crate::method::Method;
use crate::middleware::Failure;

/// Request context attached to a crash report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportContext {
    pub method: Method,
    pub path: String,
}

/// Why a report was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// The client discarded the event (disabled, rate-limited, queue full).
    #[error("event dropped by crash-report client")]
    Dropped,
    #[error("crash report rejected: {0}")]
    Rejected(String),
}

/// A handle to an external crash-reporting service.
///
/// Shared read-only by every worker; implementations must be callable
/// concurrently. A panic inside `report` is contained by the caller.
pub trait CrashReporter: Send + Sync + 'static {
    fn report(&self, failure: &Failure, context: &ReportContext) -> Result<(), ReportError>;

    /// Blocks until queued reports are sent or `timeout` passes.
    /// Returns `false` on timeout.
    fn flush(&self, _timeout: Duration) -> bool {
        true
    }
}

/// [`CrashReporter`] backed by a Sentry client.
pub struct SentryReporter {
    client: sentry::Client,
}

impl SentryReporter {
    /// Builds a client for `dsn`.
    ///
    /// An empty DSN gives a disabled reporter that accepts and discards every
    /// report. Any other DSN that does not parse is a startup error.
    pub fn new(dsn: &str) -> Result<Self, Error> {
        let dsn = match dsn.trim() {
            "" => None,
            s => Some(s.parse::<Dsn>().map_err(|e| Error::CrashReporter(e.to_string()))?),
        };

        // Without a transport the client treats itself as disabled.
        let transport = dsn.is_some().then(|| Arc::new(DefaultTransportFactory) as Arc<dyn TransportFactory>);
        let reporter = Self::with_options(ClientOptions { dsn, transport, ..Default::default() });

        match reporter.client.dsn() {
            Some(dsn) if reporter.is_enabled() => {
                info!(host = dsn.host(), project = %dsn.project_id(), "crash reporting enabled")
            }
            _ => info!("crash reporting disabled: empty DSN"),
        }
        Ok(reporter)
    }

    pub(crate) fn with_options(options: ClientOptions) -> Self {
        Self { client: sentry::Client::with_options(options) }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_enabled()
    }
}

impl CrashReporter for SentryReporter {
    fn report(&self, failure: &Failure, context: &ReportContext) -> Result<(), ReportError> {
        if !self.client.is_enabled() {
            debug!(error = %failure, "crash reporting disabled, report skipped");
            return Ok(());
        }

        let event = build_event(failure, context);
        let id = self.client.capture_event(event, None);
        if id.is_nil() {
            return Err(ReportError::Dropped);
        }
        debug!(event_id = %id, "crash report queued");
        Ok(())
    }

    fn flush(&self, timeout: Duration) -> bool {
        self.client.flush(Some(timeout))
    }
}

fn build_event(failure: &Failure, context: &ReportContext) -> Event<'static> {
    let mut event = Event {
        level: Level::Error,
        message: Some(failure.message().to_owned()),
        exception: vec![Exception {
            ty: failure.kind().to_owned(),
            value: Some(failure.message().to_owned()),
            ..Default::default()
        }]
        .into(),
        ..Default::default()
    };
    event.tags.insert("method".to_owned(), context.method.as_str().to_owned());
    event.tags.insert("endpoint".to_owned(), context.path.clone());
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentry::{Envelope, Transport};
    use std::sync::Mutex;

    // sentry 0.34 does not re-export this alias; same definition as sentry_core::clientoptions.
    type BeforeCallback<T> = Arc<dyn Fn(T) -> Option<T> + Send + Sync>;

    #[test]
    fn empty_dsn_is_a_disabled_reporter() {
        let reporter = SentryReporter::new("").expect("empty dsn is allowed");
        assert!(!reporter.is_enabled());

        let ctx = ReportContext { method: Method::Get, path: "/".to_owned() };
        assert!(reporter.report(&Failure::Opaque("boom".to_owned()), &ctx).is_ok());
    }

    #[test]
    fn valid_dsn_is_an_enabled_reporter() {
        let reporter = SentryReporter::new("http://key@127.0.0.1:9/1").expect("valid dsn");
        assert!(reporter.is_enabled());
    }

    #[derive(Default)]
    struct Captured(Mutex<Vec<Envelope>>);

    impl Transport for Captured {
        fn send_envelope(&self, envelope: Envelope) {
            if let Ok(mut sent) = self.0.lock() {
                sent.push(envelope);
            }
        }
    }

    fn capturing(captured: &Arc<Captured>, before_send: Option<BeforeCallback<Event<'static>>>) -> SentryReporter {
        let sink = Arc::clone(captured);
        SentryReporter::with_options(ClientOptions {
            dsn: Some("http://key@127.0.0.1:9/1".parse().expect("dsn")),
            transport: Some(Arc::new(move |_: &ClientOptions| -> Arc<dyn Transport> { sink.clone() })),
            before_send,
            ..Default::default()
        })
    }

    #[test]
    fn report_is_handed_to_the_transport() {
        let captured = Arc::new(Captured::default());
        let reporter = capturing(&captured, None);
        let ctx = ReportContext { method: Method::Get, path: "/v1/items/0".to_owned() };

        reporter.report(&Failure::Opaque("boom".to_owned()), &ctx).expect("queued");

        let sent = captured.0.lock().expect("lock");
        let event = sent.iter().find_map(Envelope::event).expect("event sent");
        assert_eq!(event.message.as_deref(), Some("boom"));
        assert_eq!(event.tags.get("endpoint").map(String::as_str), Some("/v1/items/0"));
    }

    #[test]
    fn event_discarded_by_client_is_dropped() {
        let captured = Arc::new(Captured::default());
        let discard: BeforeCallback<Event<'static>> = Arc::new(|_: Event<'static>| -> Option<Event<'static>> { None });
        let reporter = capturing(&captured, Some(discard));
        let ctx = ReportContext { method: Method::Get, path: "/".to_owned() };

        let res = reporter.report(&Failure::Opaque("boom".to_owned()), &ctx);

        assert!(matches!(res, Err(ReportError::Dropped)));
        assert!(captured.0.lock().expect("lock").iter().all(|e| e.event().is_none()));
    }

    #[test]
    fn malformed_dsn_fails_construction() {
        let err = SentryReporter::new("not a dsn").err().expect("must fail");
        assert!(matches!(err, Error::CrashReporter(_)));
    }

    #[test]
    fn event_carries_failure_and_request_context() {
        let ctx = ReportContext { method: Method::Post, path: "/v1/items".to_owned() };
        let event = build_event(&Failure::Structured("db down".to_owned()), &ctx);

        assert_eq!(event.message.as_deref(), Some("db down"));
        assert_eq!(event.exception.values[0].ty, "error");
        assert_eq!(event.tags.get("method").map(String::as_str), Some("POST"));
        assert_eq!(event.tags.get("endpoint").map(String::as_str), Some("/v1/items"));
    }
}
