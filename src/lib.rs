/*
 * Invoice automation over the QuickBooks Online API.
 *
 * Sends the day's invoices to customers and synthesizes monthly invoices from
 * tracked automation usage, reporting both runs to a bookkeeper by email.
 *
 * For more information on the QuickBooks endpoints, you can check out their documentation at:
 * https://developer.intuit.com/app/developer/qbo/docs/develop
 *
 */
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

pub mod billing;
pub mod clickup;
pub mod client;
pub mod config;
pub mod error;
pub mod functions;
pub mod graph;
pub mod lookup;
pub mod robocorp;
pub mod secrets;
pub mod template;
pub mod types;
pub mod workflows;

pub use client::{QBContext, RefreshableQBContext, RetryPolicy};
use error::APIError;

pub type APIResult<T> = Result<T, APIError>;

/// Intuit's OAuth 2.0 token endpoint, shared by sandbox and production.
pub const TOKEN_ENDPOINT: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";

/// Minor version pinned on every accounting API call.
pub const MINOR_VERSION: &str = "75";

/// Per-request timeout for accounting API calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Attachment uploads carry a file and get longer.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Environment {
    #[default]
    PRODUCTION,
    SANDBOX,
}

impl Environment {
    #[inline]
    #[must_use]
    pub fn endpoint_url(&self) -> &'static str {
        match self {
            Environment::PRODUCTION => "https://quickbooks.api.intuit.com/v3/",
            Environment::SANDBOX => "https://sandbox-quickbooks.api.intuit.com/v3/",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::PRODUCTION),
            "sandbox" => Ok(Environment::SANDBOX),
            other => Err(format!("unknown QuickBooks environment '{other}'")),
        }
    }
}
