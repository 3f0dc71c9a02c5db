//! QuickBooks Online entities, limited to the fields this crate reads or writes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Common behaviour of QuickBooks entities addressed through the REST API.
pub trait QBItem: Serialize + for<'de> Deserialize<'de> + Default + Send + Sync {
    /// Entity name as used in queries and response envelopes.
    fn name() -> &'static str;
    /// Path segment of the entity endpoint.
    fn qb_id() -> &'static str;
    fn id(&self) -> Option<&String>;
}

/// Entities that can be checked before a create request.
pub trait QBCreatable {
    fn can_create(&self) -> bool;
}

/// Reference to another entity, `{"value": "11", "name": "..."}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NtRef {
    #[serde(default)]
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl NtRef {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            name: None,
        }
    }

    #[must_use]
    pub fn named(value: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            name: Some(name.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Email {
    #[serde(default)]
    pub address: String,
}

impl Email {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SalesItemLineDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_ref: Option<NtRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Line {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub detail_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sales_item_line_detail: Option<SalesItemLineDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Invoice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_amt: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line: Vec<Line>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_ref: Option<NtRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sales_term_ref: Option<NtRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bill_email: Option<Email>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bill_email_cc: Option<Email>,
    #[serde(rename = "AllowIPNPayment", skip_serializing_if = "Option::is_none")]
    pub allow_ipn_payment: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_online_credit_card_payment: Option<bool>,
    #[serde(rename = "AllowOnlineACHPayment", skip_serializing_if = "Option::is_none")]
    pub allow_online_ach_payment: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_status: Option<String>,
}

impl Invoice {
    /// Customer display name carried on the reference, if QuickBooks included it.
    #[must_use]
    pub fn customer_name(&self) -> Option<&str> {
        self.customer_ref.as_ref()?.name.as_deref()
    }
}

impl QBItem for Invoice {
    fn name() -> &'static str {
        "Invoice"
    }
    fn qb_id() -> &'static str {
        "invoice"
    }
    fn id(&self) -> Option<&String> {
        self.id.as_ref()
    }
}

impl QBCreatable for Invoice {
    fn can_create(&self) -> bool {
        self.customer_ref.as_ref().is_some_and(|c| !c.value.is_empty()) && !self.line.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Customer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fully_qualified_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_email_addr: Option<Email>,
}

impl QBItem for Customer {
    fn name() -> &'static str {
        "Customer"
    }
    fn qb_id() -> &'static str {
        "customer"
    }
    fn id(&self) -> Option<&String> {
        self.id.as_ref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttachableRef {
    pub entity_ref: EntityRef,
    #[serde(default)]
    pub include_on_send: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Attachable {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachable_ref: Vec<AttachableRef>,
}

impl QBItem for Attachable {
    fn name() -> &'static str {
        "Attachable"
    }
    fn qb_id() -> &'static str {
        "attachable"
    }
    fn id(&self) -> Option<&String> {
        self.id.as_ref()
    }
}
