//! Credential blobs kept in a managed secrets store.
//!
//! Every vendor credential set lives as one JSON object under a known secret
//! name. The QuickBooks blob is the only one this crate writes back, whenever
//! its refresh token rotates.

use async_trait::async_trait;
use aws_sdk_secretsmanager::{error::DisplayErrorContext, Client};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::StoreError;

/// A key-value store of secret strings.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret_string(&self, name: &str) -> Result<String, StoreError>;
    async fn put_secret_string(&self, name: &str, value: &str) -> Result<(), StoreError>;
}

/// Reads the secret `name` and parses it as JSON.
pub async fn get_secret_json<T: DeserializeOwned>(
    store: &dyn SecretStore,
    name: &str,
) -> Result<T, StoreError> {
    log::debug!("Fetching secret: {name}");
    let raw = store.get_secret_string(name).await?;
    serde_json::from_str(&raw).map_err(|source| StoreError::InvalidJson {
        name: name.to_string(),
        source,
    })
}

/// Serializes `value` as JSON and writes it to the secret `name`.
pub async fn put_secret_json<T: Serialize + Sync>(
    store: &dyn SecretStore,
    name: &str,
    value: &T,
) -> Result<(), StoreError> {
    log::debug!("Updating secret: {name}");
    let raw = serde_json::to_string(value).map_err(|source| StoreError::InvalidJson {
        name: name.to_string(),
        source,
    })?;
    store.put_secret_string(name, &raw).await?;
    log::info!("Successfully updated secret: {name}");
    Ok(())
}

/// AWS Secrets Manager backed [`SecretStore`].
#[derive(Debug, Clone)]
pub struct AwsSecretStore {
    client: Client,
}

impl AwsSecretStore {
    #[must_use]
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl SecretStore for AwsSecretStore {
    async fn get_secret_string(&self, name: &str) -> Result<String, StoreError> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(name)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_resource_not_found_exception() {
                    log::error!("Secret '{name}' not found in Secrets Manager");
                    StoreError::NotFound(name.to_string())
                } else {
                    StoreError::SecretsManager {
                        name: name.to_string(),
                        message: DisplayErrorContext(&service_error).to_string(),
                    }
                }
            })?;

        output
            .secret_string()
            .map(str::to_string)
            .ok_or_else(|| StoreError::NoSecretString(name.to_string()))
    }

    async fn put_secret_string(&self, name: &str, value: &str) -> Result<(), StoreError> {
        self.client
            .put_secret_value()
            .secret_id(name)
            .secret_string(value)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_resource_not_found_exception() {
                    StoreError::NotFound(name.to_string())
                } else {
                    StoreError::SecretsManager {
                        name: name.to_string(),
                        message: DisplayErrorContext(&service_error).to_string(),
                    }
                }
            })?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Mutex,
        },
    };

    use super::{async_trait, SecretStore, StoreError};

    /// In-process store for tests; writes can be made to fail on demand.
    #[derive(Default)]
    pub(crate) struct MemorySecretStore {
        values: Mutex<HashMap<String, String>>,
        fail_puts: AtomicBool,
        puts: AtomicUsize,
    }

    impl MemorySecretStore {
        pub(crate) fn with_secret(name: &str, value: serde_json::Value) -> Self {
            let store = Self::default();
            store
                .values
                .lock()
                .unwrap()
                .insert(name.to_string(), value.to_string());
            store
        }

        pub(crate) fn insert(&self, name: &str, value: serde_json::Value) {
            self.values
                .lock()
                .unwrap()
                .insert(name.to_string(), value.to_string());
        }

        pub(crate) fn fail_puts(&self, fail: bool) {
            self.fail_puts.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn put_count(&self) -> usize {
            self.puts.load(Ordering::SeqCst)
        }

        pub(crate) fn json(&self, name: &str) -> Option<serde_json::Value> {
            self.values
                .lock()
                .unwrap()
                .get(name)
                .map(|raw| serde_json::from_str(raw).unwrap())
        }
    }

    #[async_trait]
    impl SecretStore for MemorySecretStore {
        async fn get_secret_string(&self, name: &str) -> Result<String, StoreError> {
            self.values
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(name.to_string()))
        }

        async fn put_secret_string(&self, name: &str, value: &str) -> Result<(), StoreError> {
            if self.fail_puts.load(Ordering::SeqCst) {
                return Err(StoreError::SecretsManager {
                    name: name.to_string(),
                    message: "write rejected".into(),
                });
            }
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.values
                .lock()
                .unwrap()
                .insert(name.to_string(), value.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::{memory::MemorySecretStore, *};

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Blob {
        token: String,
    }

    #[tokio::test]
    async fn json_round_trips_through_the_store() {
        let store = MemorySecretStore::with_secret("clickup", json!({"token": "pk_1"}));
        let blob: Blob = get_secret_json(&store, "clickup").await.unwrap();
        assert_eq!(blob.token, "pk_1");

        put_secret_json(&store, "clickup", &Blob { token: "pk_2".into() })
            .await
            .unwrap();
        assert_eq!(store.json("clickup").unwrap()["token"], "pk_2");
    }

    #[tokio::test]
    async fn missing_and_malformed_secrets_are_distinct() {
        let store = MemorySecretStore::default();
        let err = get_secret_json::<Blob>(&store, "nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref n) if n == "nope"));

        store.insert("bad", json!({"other": 1}));
        let err = get_secret_json::<Blob>(&store, "bad").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidJson { .. }));
    }
}
