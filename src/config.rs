//! Startup configuration.
//!
//! Read once, before anything is wrapped, and never touched again.
//!
//! ```toml
//! listen = "0.0.0.0:3000"
//!
//! [cors]
//! allow_origins = ["https://a.com"]
//! allow_credentials = true
//! max_age_secs = 600
//!
//! [metrics]
//! application = "shop"
//! process = "3000"
//!
//! [crash_report]
//! dsn = "https://key@sentry.example.com/42"
//! ```
//!
//! Every section and key is optional; missing ones take the defaults of
//! [`CorsOptions`], [`MonitorOptions`] and [`CrashReportOptions`].

use std::path::Path;

use serde::Deserialize;

use crate::error::Error;
use crate::middleware::{CorsOptions, MonitorOptions};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen: String,
    pub cors: CorsOptions,
    pub metrics: MonitorOptions,
    pub crash_report: CrashReportOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_owned(),
            cors: CorsOptions::default(),
            metrics: MonitorOptions::default(),
            crash_report: CrashReportOptions::default(),
        }
    }
}

/// Where recovered aborts are reported. An empty DSN disables reporting.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CrashReportOptions {
    pub dsn: String,
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Self, Error> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;
    use std::time::Duration;

    #[test]
    fn empty_document_is_all_defaults() {
        let cfg = Config::from_toml("").expect("parse");
        assert_eq!(cfg.listen, "0.0.0.0:3000");
        assert_eq!(cfg.cors.allow_origins, vec!["*"]);
        assert_eq!(cfg.cors.allow_methods.len(), 6);
        assert!(cfg.metrics.buckets.is_empty());
        assert!(cfg.crash_report.dsn.is_empty());
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = Config::from_toml(
            r#"
            listen = "127.0.0.1:8080"

            [cors]
            allow_methods = ["GET", "POST"]
            allow_headers = []
            max_age_secs = 600

            [metrics]
            application = "shop"
            buckets = [5.0, 50.0]

            [crash_report]
            dsn = "https://key@sentry.example.com/42"
            "#,
        )
        .expect("parse");

        assert_eq!(cfg.cors.allow_methods, vec![Method::Get, Method::Post]);
        assert!(cfg.cors.allow_headers.is_empty());
        assert_eq!(cfg.cors.max_age, Duration::from_secs(600));
        assert_eq!(cfg.cors.allow_origins, vec!["*"]);
        assert_eq!(cfg.metrics.application, "shop");
        assert_eq!(cfg.metrics.buckets, vec![5.0, 50.0]);
        assert_eq!(cfg.crash_report.dsn, "https://key@sentry.example.com/42");
    }

    #[test]
    fn unknown_method_is_a_config_error() {
        let err = Config::from_toml("[cors]\nallow_methods = [\"BREW\"]").err().expect("must fail");
        assert!(matches!(err, Error::Config(_)));
    }
}
