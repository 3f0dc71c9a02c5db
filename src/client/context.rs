//! # `QuickBooks` Online company context
//!
//! `QBContext` holds what every accounting API call needs besides a token:
//! which environment to talk to, the company (realm) the calls address, and the
//! OAuth token endpoint used to renew access.
//!
//! Token state lives in [`RefreshableQBContext`](super::RefreshableQBContext),
//! which wraps a `QBContext` and dereferences to it.
//!
//! ### Rate Limits
//!
//! - Sandbox: 500 requests per minute
//! - Production: 500 requests per minute, 10 requests per second
//!
//! Throttled calls answer `429` and are retried by the request executor.
use std::time::Duration;

use url::Url;

use crate::{APIResult, Environment, REQUEST_TIMEOUT, TOKEN_ENDPOINT, UPLOAD_TIMEOUT};

#[derive(Debug, Clone)]
pub struct QBContext {
    pub(crate) environment: Environment,
    pub(crate) company_id: String,
    pub(crate) base_url: Url,
    pub(crate) token_endpoint: Url,
    pub(crate) request_timeout: Duration,
    pub(crate) upload_timeout: Duration,
}

impl QBContext {
    /// Creates a context for `company_id` against the environment's public endpoints.
    ///
    /// # Errors
    ///
    /// Fails only if the built-in endpoint URLs cannot be parsed.
    pub fn new(environment: Environment, company_id: String) -> APIResult<Self> {
        Ok(Self {
            environment,
            company_id,
            base_url: Url::parse(environment.endpoint_url())?,
            token_endpoint: Url::parse(TOKEN_ENDPOINT)?,
            request_timeout: REQUEST_TIMEOUT,
            upload_timeout: UPLOAD_TIMEOUT,
        })
    }

    /// Points the context at different API and token endpoints.
    #[must_use]
    pub fn with_endpoints(self, base_url: Url, token_endpoint: Url) -> Self {
        Self {
            base_url,
            token_endpoint,
            ..self
        }
    }

    /// Overrides how long a single call, or a single upload, may take.
    #[must_use]
    pub fn with_timeouts(self, request_timeout: Duration, upload_timeout: Duration) -> Self {
        Self {
            request_timeout,
            upload_timeout,
            ..self
        }
    }

    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    #[must_use]
    pub fn company_id(&self) -> &str {
        &self.company_id
    }
}
