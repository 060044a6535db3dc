//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! Every interceptor wraps exactly one inner handler, and the inner handler
//! may be a business `async fn` or another interceptor. To hold either behind
//! one field we hide the concrete type behind a trait object
//! (`dyn ErasedHandler`).
//!
//! ```text
//! async fn items(req: Request) -> Response { … }   ← user writes this
//!        ↓ monitor.wrap(items)
//! items.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(items))                       ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! handler.call(req)  at request time               ← one vtable dispatch
//!        ↓
//! Box::pin(async { items(req).await.into_response() })  ← BoxFuture
//! ```
//!
//! Interceptors implement [`ErasedHandler`] directly and become a
//! `BoxedHandler` by moving themselves into an `Arc`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Erased types ──────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future that resolves to a [`Response`].
///
/// `Send + 'static` lets tokio move the future across worker threads.
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Dispatch interface shared by business handlers and interceptors.
///
/// `#[doc(hidden)]` because it appears in the public `Handler` trait but is
/// not meant to be implemented outside this crate.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for everything that can sit inside an interceptor.
///
/// You never implement this yourself. It is satisfied by any `async fn`
/// with the signature
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// and by each interceptor in [`middleware`](crate::middleware), so
/// wrappers nest: `cors.wrap(recoverer.wrap(monitor.wrap(items)))`.
///
/// The trait is sealed via the private `Sealed` supertrait.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

pub(crate) mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Implements [`Handler`] for an interceptor type that already implements
/// [`ErasedHandler`].
macro_rules! interceptor_handler {
    ($ty:ty) => {
        impl $crate::handler::private::Sealed for $ty {}

        impl $crate::handler::Handler for $ty {
            fn into_boxed_handler(self) -> $crate::handler::BoxedHandler {
                ::std::sync::Arc::new(self)
            }
        }
    };
}

pub(crate) use interceptor_handler;

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype that holds a concrete handler `F` and implements [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
