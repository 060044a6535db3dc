//! Unified error type.

use thiserror::Error;

/// The error type returned by tsu-guard's fallible operations.
///
/// Every variant is a startup failure: binding a port, loading the
/// configuration, registering collectors, building the crash-report client.
/// The process should not start serving when one of these surfaces.
///
/// A request that fails is never an `Error`. It becomes a
/// [`Response`](crate::Response) inside the interceptor chain.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid listen address `{addr}`: {source}")]
    Addr {
        addr: String,
        source: std::net::AddrParseError,
    },

    #[error("config: {0}")]
    Config(#[from] toml::de::Error),

    /// Duplicate registration or invalid collector options.
    #[error("metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The crash-report destination could not be parsed.
    #[error("crash reporter: {0}")]
    CrashReporter(String),
}
