//! # tsu-guard
//!
//! Interceptors that sit in front of a tsu-style request handler:
//!
//! - **CORS** — answers preflight requests and stamps `Access-Control-*`
//!   headers on everything else.
//! - **Metrics** — `requests_total`, `error_total` and
//!   `response_latency_millisecond`, labelled by method and path, in an
//!   explicit [`prometheus::Registry`].
//! - **Recovery** — a panicking handler becomes a JSON `500`, an
//!   `error_total` sample and a crash report. A failure while reporting is
//!   logged and dropped; it never reaches the caller or kills the worker.
//!
//! Each interceptor wraps exactly one inner handler, built once at startup.
//! Anything that can fail does so at construction, before the server binds.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use prometheus::Registry;
//! use tsu_guard::middleware::{Cors, Monitor, Recoverer};
//! use tsu_guard::{Config, Request, Response, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tsu_guard::Error> {
//!     let config = Config::load("tsu-guard.toml")?;
//!     let registry = Registry::new();
//!
//!     let monitor = Monitor::new(&registry, &config.metrics)?;
//!     let recoverer = Recoverer::new(&monitor, &config.crash_report.dsn)?;
//!     let app = Cors::new(&config.cors).wrap(recoverer.wrap(monitor.wrap(items)));
//!
//!     Server::bind(config.listen).serve(app).await
//! }
//!
//! async fn items(req: Request) -> Response {
//!     if req.path() == "/v1/items/0" {
//!         panic!("no item zero"); // → 500 {"error_code":500,"error":"no item zero"}
//!     }
//!     Response::json(br#"[]"#.to_vec())
//! }
//! ```

mod config;
mod error;
mod handler;
mod method;
mod request;
mod response;
mod server;

pub mod middleware;
pub mod report;

pub use config::{Config, CrashReportOptions};
pub use error::Error;
pub use handler::Handler;
#[doc(hidden)]
pub use handler::{BoxFuture, BoxedHandler, ErasedHandler};
pub use method::{Method, UnknownMethod};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use server::Server;
