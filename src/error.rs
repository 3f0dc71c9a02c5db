//! Error types for every service this crate talks to.

use reqwest::StatusCode;
use serde::Deserialize;

/// Top-level error returned by the workflows.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("QuickBooks error: {0}")]
    Api(#[from] APIError),

    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("Microsoft Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("ClickUp error: {0}")]
    ClickUp(#[from] ClickUpError),

    #[error("Robocorp error: {0}")]
    Robocorp(#[from] RobocorpError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors from the QuickBooks Online API wrapper.
#[derive(Debug, thiserror::Error)]
pub enum APIError {
    /// 401/403 that a refresh could not cure, or the token endpoint rejected the refresh.
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Server error ({status}): {body}")]
    Server { status: u16, body: String },

    #[error("Unexpected response ({status}): {body}")]
    BadRequest { status: u16, body: String },

    /// Tokens were rotated and are in use, but the store still holds the old ones.
    #[error("Failed to persist rotated credentials to secret '{secret}': {source}")]
    CredentialPersist {
        secret: String,
        #[source]
        source: StoreError,
    },

    #[error("Credential blob is missing '{0}'")]
    MissingCredential(&'static str),

    #[error("Queried no objects for query : {0}")]
    NoQueryObjects(String),

    #[error("Object has no ID to send")]
    NoIdOnSend,

    #[error("Object is missing fields required for creation")]
    CreateMissingItems,

    #[error("Upload returned no attachable objects")]
    NoAttachableObjects,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

impl APIError {
    /// Classifies a non-success response from the accounting API.
    #[must_use]
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let body = describe_body(body);
        match status.as_u16() {
            401 | 403 => APIError::Auth(format!("{status} - {body}")),
            429 => APIError::RateLimited(body),
            400 => APIError::Validation(body),
            s if s >= 500 => APIError::Server { status: s, body },
            s => APIError::BadRequest { status: s, body },
        }
    }

    /// Whether a later attempt could succeed without any change on our side.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            APIError::RateLimited(_) | APIError::Server { .. } => true,
            APIError::Reqwest(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, APIError::Auth(_))
    }
}

/// Error body QuickBooks returns on failed requests
#[derive(Debug, Clone, Deserialize)]
pub struct QBErrorResponse {
    #[serde(rename = "Fault")]
    pub fault: Fault,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Fault {
    #[serde(rename = "Error", default)]
    pub error: Vec<FaultError>,
    #[serde(default)]
    pub r#type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaultError {
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "Detail")]
    pub detail: Option<String>,
    #[serde(default)]
    pub code: String,
}

impl std::fmt::Display for QBErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.fault.r#type)?;
        for e in &self.fault.error {
            write!(
                f,
                " [{}] {} : {}",
                e.code,
                e.message,
                e.detail.as_deref().unwrap_or("[[No Detail]]")
            )?;
        }
        Ok(())
    }
}

/// Renders a QuickBooks fault body readably, falling back to the raw text.
fn describe_body(body: &str) -> String {
    match serde_json::from_str::<QBErrorResponse>(body) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// Errors from the secrets store and the client lookup table.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Secret '{0}' not found")]
    NotFound(String),

    #[error("Secret '{0}' has no string value")]
    NoSecretString(String),

    #[error("Invalid JSON in secret '{name}': {source}")]
    InvalidJson {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Secrets Manager request for '{name}' failed: {message}")]
    SecretsManager { name: String, message: String },

    #[error("DynamoDB request for table '{table}' failed: {message}")]
    DynamoDb { table: String, message: String },
}

/// Errors from the Microsoft Graph mail client.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Failed to retrieve access token: {0}")]
    Token(String),

    #[error("Error sending email ({status}): {body}")]
    SendFailed { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors from the ClickUp client and billing-profile extraction.
#[derive(Debug, thiserror::Error)]
pub enum ClickUpError {
    #[error("ClickUp returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Organization with client ID {0} not found in ClickUp")]
    AccountNotFound(String),

    #[error("Task '{task}' is missing custom field '{field}'")]
    MissingField { task: String, field: &'static str },

    #[error("Custom field '{field}' has an unusable value: {value}")]
    InvalidField { field: String, value: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// Errors from the Robocorp Control Room usage client.
#[derive(Debug, thiserror::Error)]
pub enum RobocorpError {
    #[error("No Robocorp API key for client {0}")]
    MissingKey(String),

    #[error("Robocorp returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// Errors from loading and rendering email templates.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Failed to read template {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Template has unfilled tokens: {0:?}")]
    Unfilled(Vec<String>),

    #[error("Invalid placeholder pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
