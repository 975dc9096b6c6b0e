//! Environment-derived configuration, loaded once at startup.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_DOCUMENT_BYTES: usize = 20 * 1024 * 1024;

/// Immutable settings injected into application state at process start.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub model: String,
    pub port: u16,
    /// Timeout for outbound HTTP (document fetch and model call).
    pub fetch_timeout: Duration,
    /// Upper bound on uploaded/fetched document size.
    pub max_document_bytes: usize,
}

impl Settings {
    /// Read settings from environment variables. Only `GEMINI_API_KEY` is
    /// required; everything else has a default.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("GEMINI_API_KEY")
            .context("GEMINI_API_KEY environment variable not set")?;

        let model = env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let port = match env::var("PORT") {
            Ok(v) => v.parse().context("PORT must be a valid port number")?,
            Err(_) => DEFAULT_PORT,
        };

        let fetch_timeout_secs = match env::var("FETCH_TIMEOUT_SECS") {
            Ok(v) => v.parse().context("FETCH_TIMEOUT_SECS must be an integer")?,
            Err(_) => DEFAULT_FETCH_TIMEOUT_SECS,
        };

        let max_document_bytes = match env::var("MAX_DOCUMENT_BYTES") {
            Ok(v) => v.parse().context("MAX_DOCUMENT_BYTES must be an integer")?,
            Err(_) => DEFAULT_MAX_DOCUMENT_BYTES,
        };

        Ok(Self {
            api_key,
            model,
            port,
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            max_document_bytes,
        })
    }
}
