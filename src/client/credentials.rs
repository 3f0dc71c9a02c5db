use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::APIError, APIResult};

/// Access tokens this close to expiry are treated as expired.
pub(crate) const EXPIRY_SKEW: Duration = Duration::seconds(60);

/// The QuickBooks credential blob as stored in the secrets store.
///
/// Keys this type does not know about are kept in `extra` and written back
/// untouched when the blob is rewritten.
#[derive(Clone, Serialize, Deserialize)]
pub struct QBCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub realm_id: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl QBCredentials {
    /// Checks that every field needed for a refresh is present.
    ///
    /// # Errors
    ///
    /// [`APIError::MissingCredential`] naming the first empty field.
    pub fn validate(&self) -> APIResult<()> {
        for (name, value) in [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("realm_id", &self.realm_id),
            ("refresh_token", &self.refresh_token),
        ] {
            if value.trim().is_empty() {
                return Err(APIError::MissingCredential(name));
            }
        }
        Ok(())
    }

    /// The stored access token, if it is known to outlive `now` by the skew margin.
    ///
    /// A token without a recorded expiry is not trusted.
    #[must_use]
    pub fn access_token_valid_at(&self, now: DateTime<Utc>) -> Option<&str> {
        let token = self.access_token.as_deref().filter(|t| !t.is_empty())?;
        let expires_at = self.access_token_expires_at?;
        (now + EXPIRY_SKEW < expires_at).then_some(token)
    }

    pub(crate) fn apply_refresh(
        &mut self,
        access_token: String,
        refresh_token: String,
        expires_in: u64,
        refresh_expires_in: Option<u64>,
        now: DateTime<Utc>,
    ) {
        self.access_token = Some(access_token);
        self.refresh_token = refresh_token;
        self.access_token_expires_at = Some(now + seconds(expires_in));
        if let Some(secs) = refresh_expires_in {
            self.refresh_token_expires_at = Some(now + seconds(secs));
        }
    }
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
}

impl std::fmt::Debug for QBCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QBCredentials")
            .field("client_id", &self.client_id)
            .field("realm_id", &self.realm_id)
            .field("access_token_expires_at", &self.access_token_expires_at)
            .field("refresh_token_expires_at", &self.refresh_token_expires_at)
            .finish_non_exhaustive()
    }
}
