//! Middleware layer.
//!
//! Three interceptors, each wrapping exactly one inner handler for the life
//! of the process:
//!
//! - [`Cors`] answers preflight requests itself and stamps CORS headers on
//!   everything else.
//! - [`Recoverer`] turns a panicking handler into a JSON `500`, counts it and
//!   forwards it to a [`CrashReporter`](crate::report::CrashReporter).
//! - [`Monitor`] counts and times every request that returns normally.
//!
//! The usual nesting, outermost first:
//!
//! ```rust,no_run
//! use prometheus::Registry;
//! use tsu_guard::middleware::{Cors, CorsOptions, Monitor, MonitorOptions, Recoverer};
//! use tsu_guard::{Request, Response};
//!
//! async fn items(_req: Request) -> Response { Response::text("[]") }
//!
//! # fn main() -> Result<(), tsu_guard::Error> {
//! let registry = Registry::new();
//! let monitor = Monitor::new(&registry, &MonitorOptions::default())?;
//! let recoverer = Recoverer::new(&monitor, "")?;
//!
//! let app = Cors::new(&CorsOptions::default())
//!     .wrap(recoverer.wrap(monitor.wrap(items)));
//! # Ok(())
//! # }
//! ```

mod cors;
mod metrics;
mod panic;
mod recovery;

pub use cors::{Cors, CorsHandler, CorsOptions};
pub use metrics::{DEFAULT_BUCKETS, Monitor, MonitorOptions, Monitored, exposition};
pub use panic::{Aborted, Failure, MAX_STACK_SIZE, abort, invoke};
pub use recovery::{ErrorBody, Recovered, Recoverer};
