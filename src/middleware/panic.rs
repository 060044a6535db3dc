//! Abort boundary: turns an unwinding handler into a value.
//!
//! [`invoke`] runs an inner handler and returns `Err(Aborted)` instead of
//! letting a panic travel further up the worker. The panic payload is
//! classified once into a [`Failure`] and the panic-site backtrace rides
//! along with it, so recovery code pattern-matches on a `Result` and never
//! deals with `Box<dyn Any>` itself.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use futures_util::FutureExt;

use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::response::Response;

/// Upper bound, in bytes, on the backtrace kept for a single abort.
pub const MAX_STACK_SIZE: usize = 4096;

// ── Failure ───────────────────────────────────────────────────────────────────

/// What a handler aborted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The payload was an error value; holds its message.
    Structured(String),
    /// Any other payload, rendered as text.
    Opaque(String),
}

impl Failure {
    /// Classifies a panic payload.
    ///
    /// `Box<dyn Error + Send + Sync>` (what [`abort`] raises),
    /// `Box<dyn Error + Send>` and `std::io::Error` are structured. `&str` and `String` are the payloads of
    /// `panic!` and are opaque text.
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<Box<dyn StdError + Send + Sync>>() {
            Ok(err) => return Self::Structured(err.to_string()),
            Err(other) => other,
        };
        let payload = match payload.downcast::<Box<dyn StdError + Send>>() {
            Ok(err) => return Self::Structured(err.to_string()),
            Err(other) => other,
        };
        let payload = match payload.downcast::<std::io::Error>() {
            Ok(err) => return Self::Structured(err.to_string()),
            Err(other) => other,
        };
        if let Some(s) = payload.downcast_ref::<&'static str>() {
            return Self::Opaque((*s).to_owned());
        }
        match payload.downcast::<String>() {
            Ok(s) => Self::Opaque(*s),
            Err(_) => Self::Opaque("Box<dyn Any>".to_owned()),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Structured(m) | Self::Opaque(m) => m,
        }
    }

    /// Short kind tag used in logs and crash reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Structured(_) => "error",
            Self::Opaque(_) => "panic",
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Aborts the current request with a structured error.
///
/// Use inside a handler wrapped by a
/// [`Recoverer`](crate::middleware::Recoverer) when a failure should surface
/// as a 500 with the error's message, the same way a panic would.
pub fn abort(err: impl Into<Box<dyn StdError + Send + Sync>>) -> ! {
    panic::panic_any(err.into())
}

// ── Aborted ───────────────────────────────────────────────────────────────────

/// The abnormal outcome of [`invoke`].
#[derive(Debug)]
pub struct Aborted {
    pub failure: Failure,
    /// Panic-site backtrace, at most [`MAX_STACK_SIZE`] bytes.
    pub backtrace: String,
}

impl Aborted {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        Self { failure: Failure::from_payload(payload), backtrace: take_backtrace() }
    }
}

/// Runs `handler` to completion, catching an unwind raised while building the
/// future or while polling it.
pub async fn invoke(handler: &BoxedHandler, req: Request) -> Result<Response, Aborted> {
    install_hook();

    let fut = panic::catch_unwind(AssertUnwindSafe(|| handler.call(req)))
        .map_err(Aborted::from_payload)?;

    AssertUnwindSafe(fut).catch_unwind().await.map_err(Aborted::from_payload)
}

// ── Backtraces ────────────────────────────────────────────────────────────────

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Installs, once per process, a panic hook that records the panic-site
/// backtrace for the current thread and then defers to the previous hook.
///
/// An unwind is caught on the thread that raised it, before anything else
/// runs there, so the slot always holds the backtrace of the panic being
/// recovered.
pub(crate) fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let trace = capture();
            // The slot is gone once the thread's locals are torn down.
            let _ = LAST_BACKTRACE.try_with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

/// Takes the backtrace recorded by the hook, or captures one here.
pub(crate) fn take_backtrace() -> String {
    LAST_BACKTRACE
        .try_with(|slot| slot.borrow_mut().take())
        .ok()
        .flatten()
        .unwrap_or_else(capture)
}

fn capture() -> String {
    truncate(Backtrace::force_capture().to_string(), MAX_STACK_SIZE)
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use http::StatusCode;

    fn classify(f: impl FnOnce() + panic::UnwindSafe) -> Failure {
        match panic::catch_unwind(f) {
            Ok(()) => panic!("closure did not panic"),
            Err(payload) => Failure::from_payload(payload),
        }
    }

    #[test]
    fn panic_messages_are_opaque() {
        assert_eq!(classify(|| panic!("boom")), Failure::Opaque("boom".to_owned()));
        let id = 7;
        assert_eq!(
            classify(move || panic!("item {id} missing")),
            Failure::Opaque("item 7 missing".to_owned())
        );
    }

    #[test]
    fn error_payloads_are_structured() {
        let f = classify(|| abort("db down"));
        assert_eq!(f, Failure::Structured("db down".to_owned()));
        assert_eq!(f.kind(), "error");

        let f = classify(|| {
            panic::panic_any(std::io::Error::other("disk"))
        });
        assert_eq!(f, Failure::Structured("disk".to_owned()));

        let f = classify(|| {
            let err: Box<dyn StdError + Send> = Box::new(std::io::Error::other("not sync"));
            panic::panic_any(err)
        });
        assert_eq!(f, Failure::Structured("not sync".to_owned()));
    }

    #[test]
    fn unknown_payloads_get_placeholder_text() {
        let f = classify(|| panic::panic_any(42_u32));
        assert_eq!(f, Failure::Opaque("Box<dyn Any>".to_owned()));
    }

    #[test]
    fn hook_tolerates_panics_after_thread_locals_are_gone() {
        struct PanicsOnExit;

        impl Drop for PanicsOnExit {
            fn drop(&mut self) {
                let _ = panic::catch_unwind(|| panic!("late"));
            }
        }

        thread_local! {
            static LATE: PanicsOnExit = PanicsOnExit;
        }

        install_hook();
        // Destructors run in reverse order, so the backtrace slot goes first.
        let worker = std::thread::spawn(|| {
            LATE.with(|_| {});
            LAST_BACKTRACE.with(|slot| slot.borrow_mut().take());
        });
        assert!(worker.join().is_ok());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "é".repeat(10); // 20 bytes
        assert_eq!(truncate(s.clone(), 5).len(), 4);
        assert_eq!(truncate(s.clone(), 64), s);
    }

    #[tokio::test]
    async fn invoke_passes_normal_responses_through() {
        async fn ok(_req: Request) -> StatusCode { StatusCode::ACCEPTED }
        let h = ok.into_boxed_handler();

        let res = invoke(&h, Request::new(crate::Method::Get, "/")).await;
        assert_eq!(res.map(|r| r.status_code()).ok(), Some(StatusCode::ACCEPTED));
    }

    #[tokio::test]
    async fn invoke_catches_panics_while_polling() {
        async fn boom(_req: Request) -> Response { panic!("boom") }
        let h = boom.into_boxed_handler();

        let aborted = invoke(&h, Request::new(crate::Method::Get, "/"))
            .await
            .expect_err("handler panicked");
        assert_eq!(aborted.failure, Failure::Opaque("boom".to_owned()));
        assert!(aborted.backtrace.len() <= MAX_STACK_SIZE);
    }
}
