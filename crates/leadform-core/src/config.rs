//! Pipeline configuration.
//!
//! Read once at start-up from `LEADFORM_*` environment variables. Everything
//! has a default except the collector endpoint: a missing or malformed
//! `LEADFORM_COLLECTOR_URL` is an error, so a misconfigured deployment fails
//! before the form is ever shown instead of posting leads nowhere.

use std::time::Duration;

use reqwest::Url;

use crate::error::ConfigError;

/// Where visitors are sent after a successful submit.
pub const DEFAULT_REDIRECT_URL: &str = "https://smrturl.co/a/sa0356a6983/62?s1=";
/// Public IP-echo service answering `{ "ip": "..." }`.
pub const DEFAULT_LOOKUP_URL: &str = "https://api.ipify.org?format=json";
/// Pause between the success signal and the redirect.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(800);
/// Pause between dispatch and re-enabling submit.
pub const DEFAULT_IN_FLIGHT_DELAY: Duration = Duration::from_millis(800);
const DEFAULT_BEACON_CAPACITY: usize = 64;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Body encoding used by the fallback request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackEncoding {
    /// `application/x-www-form-urlencoded`, same as the background queue.
    #[default]
    UrlEncoded,
    /// `multipart/form-data` with one text part per field.
    Multipart,
}

impl std::str::FromStr for FallbackEncoding {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "urlencoded" | "form" => Ok(Self::UrlEncoded),
            "multipart" | "form-data" => Ok(Self::Multipart),
            other => Err(ConfigError::InvalidValue {
                name: "LEADFORM_FALLBACK_ENCODING",
                value: other.to_owned(),
            }),
        }
    }
}

/// Lead pipeline configuration.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Endpoint that receives lead payloads.
    pub collector_url: Url,
    /// Full-page redirect target after a submit.
    pub redirect_url: Url,
    /// Address lookup service.
    pub lookup_url: Url,
    /// Delay between `on_success` and the redirect.
    pub settle_delay: Duration,
    /// Delay between dispatch and clearing the in-flight flag.
    pub in_flight_delay: Duration,
    /// Encoding for the fallback request.
    pub fallback_encoding: FallbackEncoding,
    /// Bound on the background delivery queue.
    pub beacon_capacity: usize,
    /// Timeout applied to every outbound HTTP request.
    pub request_timeout: Duration,
    /// Whether `phone` takes part in the readiness gate.
    pub require_phone: bool,
    /// Log filter (e.g. `info`, `debug`).
    pub log_level: String,
}

impl CollectorConfig {
    /// Build a configuration for `collector_url` with every other setting at
    /// its default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if the URL is malformed or not
    /// `http`/`https`.
    pub fn new(collector_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            collector_url: parse_url("LEADFORM_COLLECTOR_URL", collector_url)?,
            redirect_url: parse_url("LEADFORM_REDIRECT_URL", DEFAULT_REDIRECT_URL)?,
            lookup_url: parse_url("LEADFORM_LOOKUP_URL", DEFAULT_LOOKUP_URL)?,
            settle_delay: DEFAULT_SETTLE_DELAY,
            in_flight_delay: DEFAULT_IN_FLIGHT_DELAY,
            fallback_encoding: FallbackEncoding::default(),
            beacon_capacity: DEFAULT_BEACON_CAPACITY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            require_phone: false,
            log_level: "info".to_owned(),
        })
    }

    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `LEADFORM_COLLECTOR_URL`: collector endpoint (required)
    /// - `LEADFORM_REDIRECT_URL`: post-submit redirect target
    /// - `LEADFORM_LOOKUP_URL`: IP-echo service (default: ipify)
    /// - `LEADFORM_SETTLE_DELAY_MS`: success-to-redirect delay (default: `800`)
    /// - `LEADFORM_IN_FLIGHT_DELAY_MS`: submit re-enable delay (default: `800`)
    /// - `LEADFORM_FALLBACK_ENCODING`: `urlencoded` or `multipart` (default: `urlencoded`)
    /// - `LEADFORM_BEACON_CAPACITY`: background queue bound (default: `64`)
    /// - `LEADFORM_REQUEST_TIMEOUT_MS`: outbound request timeout (default: `10000`)
    /// - `LEADFORM_REQUIRE_PHONE`: gate submit on `phone` too (default: `false`)
    /// - `LEADFORM_LOG_LEVEL`: log filter (default: `info`)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the collector URL is missing or any URL or
    /// enumerated value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`CollectorConfig::from_env`].
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let collector_url = var("LEADFORM_COLLECTOR_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing {
                name: "LEADFORM_COLLECTOR_URL",
            })?;
        let mut config = Self::new(collector_url.trim())?;

        if let Some(v) = var("LEADFORM_REDIRECT_URL") {
            config.redirect_url = parse_url("LEADFORM_REDIRECT_URL", &v)?;
        }
        if let Some(v) = var("LEADFORM_LOOKUP_URL") {
            config.lookup_url = parse_url("LEADFORM_LOOKUP_URL", &v)?;
        }
        if let Some(v) = var("LEADFORM_FALLBACK_ENCODING") {
            config.fallback_encoding = v.parse()?;
        }

        if let Some(ms) = var("LEADFORM_SETTLE_DELAY_MS").and_then(|v| v.parse().ok()) {
            config.settle_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = var("LEADFORM_IN_FLIGHT_DELAY_MS").and_then(|v| v.parse().ok()) {
            config.in_flight_delay = Duration::from_millis(ms);
        }
        if let Some(cap) = var("LEADFORM_BEACON_CAPACITY")
            .and_then(|v| v.parse().ok())
            .filter(|&cap: &usize| cap > 0)
        {
            config.beacon_capacity = cap;
        }
        if let Some(ms) = var("LEADFORM_REQUEST_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .filter(|&ms: &u64| ms > 0)
        {
            config.request_timeout = Duration::from_millis(ms);
        }

        config.require_phone = var("LEADFORM_REQUIRE_PHONE")
            .is_some_and(|v| v == "true" || v == "1");

        if let Some(level) = var("LEADFORM_LOG_LEVEL") {
            config.log_level = level;
        }

        Ok(config)
    }
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        name,
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidUrl {
            name,
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}
