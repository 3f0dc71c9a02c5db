//! Read-only table mapping client numbers to automation workspaces.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::{error::DisplayErrorContext, types::AttributeValue, Client};

use crate::error::StoreError;

/// One row of the client lookup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub client_number: String,
    pub workspace_id: String,
    pub organization_id: Option<String>,
}

impl ClientRecord {
    /// Builds a record from a raw item, `None` when a required attribute is absent.
    #[must_use]
    pub fn from_item(item: &HashMap<String, AttributeValue>) -> Option<Self> {
        Some(Self {
            client_number: attribute_string(item, "client_number")?,
            workspace_id: attribute_string(item, "workspace_id")?,
            organization_id: attribute_string(item, "organization_id"),
        })
    }

    /// Numeric form of the client number, used for range filtering.
    #[must_use]
    pub fn number(&self) -> Option<u64> {
        self.client_number.trim().parse().ok()
    }
}

fn attribute_string(item: &HashMap<String, AttributeValue>, key: &str) -> Option<String> {
    match item.get(key)? {
        AttributeValue::S(s) | AttributeValue::N(s) if !s.trim().is_empty() => {
            Some(s.trim().to_string())
        }
        _ => None,
    }
}

/// Source of the clients to bill.
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn list_clients(&self) -> Result<Vec<ClientRecord>, StoreError>;
}

/// DynamoDB backed [`ClientDirectory`].
#[derive(Debug, Clone)]
pub struct DynamoClientDirectory {
    client: Client,
    table: String,
}

impl DynamoClientDirectory {
    #[must_use]
    pub fn new(sdk_config: &aws_config::SdkConfig, table: impl Into<String>) -> Self {
        Self {
            client: Client::new(sdk_config),
            table: table.into(),
        }
    }
}

#[async_trait]
impl ClientDirectory for DynamoClientDirectory {
    async fn list_clients(&self) -> Result<Vec<ClientRecord>, StoreError> {
        log::debug!("Scanning DynamoDB table: {}", self.table);
        let mut records = Vec::new();
        let mut start_key = None;

        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.table)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| StoreError::DynamoDb {
                    table: self.table.clone(),
                    message: DisplayErrorContext(&e).to_string(),
                })?;

            for item in output.items() {
                match ClientRecord::from_item(item) {
                    Some(record) => records.push(record),
                    None => log::warn!(
                        "Skipping item without client_number/workspace_id in {}",
                        self.table
                    ),
                }
            }

            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        records.sort_by(|a, b| {
            a.number()
                .cmp(&b.number())
                .then_with(|| a.client_number.cmp(&b.client_number))
        });
        log::info!("Found {} clients in DynamoDB", records.len());
        Ok(records)
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use super::{async_trait, ClientDirectory, ClientRecord, StoreError};

    pub(crate) struct StaticDirectory(pub(crate) Vec<ClientRecord>);

    #[async_trait]
    impl ClientDirectory for StaticDirectory {
        async fn list_clients(&self) -> Result<Vec<ClientRecord>, StoreError> {
            Ok(self.0.clone())
        }
    }
}
