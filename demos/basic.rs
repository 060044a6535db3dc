//! Minimal tsu-guard example: one business handler behind the full chain.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/v1/items
//!   curl -i http://localhost:3000/v1/items/0          # panics → JSON 500
//!   curl -i -X OPTIONS http://localhost:3000/v1/items \
//!        -H 'origin: https://a.com' \
//!        -H 'access-control-request-method: POST'     # preflight → 204
//!   curl http://localhost:3000/metrics
//!
//! Pass a config path as the first argument to override the defaults.

use std::time::Duration;

use prometheus::Registry;
use tsu_guard::middleware::{Cors, Monitor, Recoverer, abort, exposition};
use tsu_guard::report::CrashReporter;
use tsu_guard::{Config, ErasedHandler, Handler, Request, Response, Server};

#[tokio::main]
async fn main() -> Result<(), tsu_guard::Error> {
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    // Every failure below is a startup failure: nothing has been bound yet.
    let registry = Registry::new();
    let monitor = Monitor::new(&registry, &config.metrics)?;
    let recoverer = Recoverer::new(&monitor, &config.crash_report.dsn)?;

    let metrics = exposition(registry).into_boxed_handler();
    let app = move |req: Request| {
        let metrics = std::sync::Arc::clone(&metrics);
        async move {
            if req.path() == "/metrics" {
                return metrics.call(req).await;
            }
            items(req).await
        }
    };

    let app = Cors::new(&config.cors).wrap(recoverer.wrap(monitor.wrap(app)));
    let served = Server::bind(config.listen.clone()).serve(app).await;

    if !recoverer.reporter().flush(Duration::from_secs(2)) {
        tracing::warn!("pending crash reports not flushed");
    }
    served
}

// GET /v1/items/0 panics with a plain message, /v1/items/db aborts with an
// error value. Both come back as {"error_code":500,"error":"..."}.
async fn items(req: Request) -> Response {
    match req.path() {
        "/v1/items/0" => panic!("no item zero"),
        "/v1/items/db" => abort(std::io::Error::other("database unreachable")),
        _ => Response::json(br#"[{"id":"1","name":"alice"}]"#.to_vec()),
    }
}
