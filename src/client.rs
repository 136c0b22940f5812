use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::utils::parse_headers_with_escapes;

/// Errors raised while building HTTP clients.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid header format in CUSTOM_HEADERS: '{0}'. Expected 'Name:Value'.")]
    HeaderFormat(String),

    #[error("Invalid header name '{name}': {reason}")]
    HeaderName { name: String, reason: String },

    #[error("Invalid header value for '{name}': {reason}")]
    HeaderValue { name: String, reason: String },

    #[error("Failed to set up TLS: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout: Duration,
    pub skip_tls_verify: bool,
    pub custom_headers: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            skip_tls_verify: false,
            custom_headers: None,
        }
    }
}

/// Builds one cookie-jar client per session.
///
/// Custom headers and the TLS configuration are prepared once up front so
/// that every session shares the same defaults, errors surface before the run
/// starts and the native root store is read a single time.
#[derive(Debug, Clone)]
pub struct SessionClientFactory {
    config: ClientConfig,
    headers: HeaderMap,
    /// `None` when certificate verification is skipped.
    tls: Option<rustls::ClientConfig>,
}

impl SessionClientFactory {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let headers = parse_custom_headers(config.custom_headers.as_deref())?;

        let tls = if config.skip_tls_verify {
            warn!("Skipping TLS certificate verification");
            None
        } else {
            Some(native_roots_tls_config()?)
        };
        if !headers.is_empty() {
            info!(header_count = headers.len(), "Configured custom default headers");
        }

        Ok(Self {
            config: config.clone(),
            headers,
            tls,
        })
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Fresh client with an empty cookie jar.
    ///
    /// With `follow_redirects` off, 3xx answers are handed back to the caller.
    pub fn build(&self, follow_redirects: bool) -> Result<reqwest::Client, ClientError> {
        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(self.config.request_timeout);

        if !self.headers.is_empty() {
            builder = builder.default_headers(self.headers.clone());
        }
        if !follow_redirects {
            builder = builder.redirect(Policy::none());
        }
        builder = match &self.tls {
            Some(tls) => builder.use_preconfigured_tls(tls.clone()),
            // Nothing is verified, so there is no root store to load.
            None => builder
                .tls_built_in_root_certs(false)
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true),
        };

        Ok(builder.build()?)
    }
}

/// Rustls client configuration trusting the platform's root certificates.
fn native_roots_tls_config() -> Result<rustls::ClientConfig, ClientError> {
    let loaded = rustls_native_certs::load_native_certs();
    for e in &loaded.errors {
        warn!(error = %e, "Failed to load a native root certificate");
    }

    let mut roots = rustls::RootCertStore::empty();
    let (valid, invalid) = roots.add_parsable_certificates(loaded.certs);
    if valid == 0 {
        warn!("No usable native root certificates, HTTPS targets will fail verification");
    }
    info!(valid, invalid, "Loaded native root certificates");

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(tls)
}

/// Parses `Name:Value` pairs separated by commas (`\,` keeps a literal comma).
pub fn parse_custom_headers(custom_headers_str: Option<&str>) -> Result<HeaderMap, ClientError> {
    let mut parsed_headers = HeaderMap::new();

    let headers_str = match custom_headers_str {
        Some(s) if !s.trim().is_empty() => s,
        _ => return Ok(parsed_headers),
    };

    for header_pair_str in parse_headers_with_escapes(headers_str) {
        let pair = header_pair_str.trim();
        if pair.is_empty() {
            continue;
        }

        let (name_str, value_str) = pair
            .split_once(':')
            .ok_or_else(|| ClientError::HeaderFormat(pair.to_string()))?;
        let name_str = name_str.trim();
        if name_str.is_empty() {
            return Err(ClientError::HeaderFormat(pair.to_string()));
        }

        let header_name = HeaderName::from_str(name_str).map_err(|e| ClientError::HeaderName {
            name: name_str.to_string(),
            reason: e.to_string(),
        })?;
        let header_value =
            HeaderValue::from_str(value_str.trim()).map_err(|e| ClientError::HeaderValue {
                name: name_str.to_string(),
                reason: e.to_string(),
            })?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}
