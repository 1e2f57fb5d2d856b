//! Credential resolution for stream requests.
//!
//! The manager never fetches credentials itself; callers resolve headers
//! through a [`CredentialProvider`] and pass them to `connect` or
//! `update_headers`.

use std::collections::HashMap;

use crate::config::AuthConfig;

/// Source of request headers carrying the current credential.
pub trait CredentialProvider: Send + Sync {
    /// Headers to attach, or None when no credential is available.
    fn headers(&self) -> Option<HashMap<String, String>>;
}

/// Provider backed by a fixed token from configuration.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    header: String,
    scheme: String,
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(
        header: impl Into<String>,
        scheme: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            header: header.into(),
            scheme: scheme.into(),
            token,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.header, &config.scheme, config.token.clone())
    }
}

impl CredentialProvider for StaticTokenProvider {
    fn headers(&self) -> Option<HashMap<String, String>> {
        let token = self.token.as_deref().map(str::trim).filter(|t| !t.is_empty())?;

        let value = if self.scheme.is_empty() {
            token.to_string()
        } else {
            format!("{} {}", self.scheme, token)
        };

        Some(HashMap::from([(self.header.clone(), value)]))
    }
}
