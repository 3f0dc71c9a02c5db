//! ClickUp CRM access: the business list that holds one task per client, and
//! the billing terms kept in each task's custom fields.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::error::ClickUpError;

pub const CLICKUP_API: &str = "https://api.clickup.com/api/v2/";
const MAX_ATTEMPTS: u32 = 3;

pub const ACCOUNT_NUMBER_FIELD: &str = "Account #";

/// ClickUp credential blob.
#[derive(Clone, Deserialize)]
pub struct ClickUpCredentials {
    pub token: String,
    #[serde(rename = "CRM_Business_List")]
    pub crm_list_id: String,
    /// Custom field id of "Account #", used to filter the CRM list.
    #[serde(rename = "CRM_Business_List_Ac_Num_Query")]
    pub account_field_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomField {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub type_config: Option<TypeConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TypeConfig {
    #[serde(default)]
    pub options: Vec<DropdownOption>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DropdownOption {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub orderindex: Option<Value>,
}

#[derive(Deserialize)]
struct TasksPage {
    tasks: Option<Vec<Task>>,
    #[serde(default = "default_last_page")]
    last_page: bool,
}

fn default_last_page() -> bool {
    true
}

pub struct ClickUpClient {
    http: Client,
    token: String,
    base_url: Url,
    crm_list_id: String,
    account_field_id: String,
    retry_base: Duration,
}

impl ClickUpClient {
    /// # Errors
    ///
    /// Never in practice; the built-in API URL always parses.
    pub fn new(creds: &ClickUpCredentials, http: Client) -> Result<Self, url::ParseError> {
        Ok(Self {
            http,
            token: creds.token.clone(),
            base_url: Url::parse(CLICKUP_API)?,
            crm_list_id: creds.crm_list_id.clone(),
            account_field_id: creds.account_field_id.clone(),
            retry_base: Duration::from_secs(1),
        })
    }

    #[must_use]
    pub fn with_base_url(self, base_url: Url) -> Self {
        Self { base_url, ..self }
    }

    /// Base of the per-page backoff, `retry_base * 2^attempt`.
    #[must_use]
    pub fn with_retry_base(self, retry_base: Duration) -> Self {
        Self { retry_base, ..self }
    }

    fn url(&self, path: &str) -> Result<Url, ClickUpError> {
        Ok(self.base_url.join(path)?)
    }

    /// Every task in `list_id`, following `page` until ClickUp reports the last one.
    ///
    /// # Errors
    ///
    /// The last failure once a page has failed three times.
    pub async fn get_tasks(
        &self,
        list_id: &str,
        include_closed: bool,
        extra_query: &[(&str, String)],
    ) -> Result<Vec<Task>, ClickUpError> {
        let url = self.url(&format!("list/{list_id}/task"))?;
        let mut tasks = Vec::new();
        let mut page = 0u32;

        loop {
            let mut params: Vec<(&str, String)> = Vec::new();
            if include_closed {
                params.push(("include_closed", "true".into()));
            }
            params.extend(extra_query.iter().cloned());
            if page > 0 {
                params.push(("page", page.to_string()));
            }

            let data = self.fetch_page(&url, &params).await?;
            let Some(page_tasks) = data.tasks else {
                break;
            };
            tasks.extend(page_tasks);
            if data.last_page {
                break;
            }
            page += 1;
        }

        log::info!("Fetched {} tasks from list {list_id}", tasks.len());
        Ok(tasks)
    }

    async fn fetch_page(&self, url: &Url, params: &[(&str, String)]) -> Result<TasksPage, ClickUpError> {
        let mut attempt = 0;
        loop {
            match self.try_fetch_page(url, params).await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        return Err(e);
                    }
                    let delay = self.retry_base.saturating_mul(2u32.pow(attempt));
                    log::warn!("ClickUp page request failed ({e}), attempt {attempt}/{MAX_ATTEMPTS}");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn try_fetch_page(&self, url: &Url, params: &[(&str, String)]) -> Result<TasksPage, ClickUpError> {
        let response = self
            .http
            .get(url.clone())
            .header(reqwest::header::AUTHORIZATION, &self.token)
            .query(params)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClickUpError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }

    /// Tasks in the CRM list that have an "Account #".
    ///
    /// # Errors
    ///
    /// See [`ClickUpClient::get_tasks`].
    pub async fn get_account_tasks(&self) -> Result<Vec<Task>, ClickUpError> {
        let filter = json!([{
            "field_id": self.account_field_id,
            "operator": "IS NOT NULL"
        }]);
        self.get_tasks(
            &self.crm_list_id,
            true,
            &[("custom_fields", filter.to_string())],
        )
        .await
    }

    /// # Errors
    ///
    /// [`ClickUpError::Status`] on any non-success response.
    pub async fn set_custom_field_value(
        &self,
        task_id: &str,
        field_id: &str,
        value: &Value,
    ) -> Result<(), ClickUpError> {
        let url = self.url(&format!("task/{task_id}/field/{field_id}"))?;
        let response = self
            .http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, &self.token)
            .json(&json!({ "value": value }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClickUpError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        log::debug!("Set field {field_id} on task {task_id}");
        Ok(())
    }
}

impl Task {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&CustomField> {
        self.custom_fields.iter().find(|f| f.name == name)
    }
}

impl CustomField {
    /// The value as text, for string and number fields. Unset fields give `None`.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        match self.value.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn number(&self) -> Option<f64> {
        match self.value.as_ref()? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Name of the selected dropdown option.
    ///
    /// ClickUp stores the option's `orderindex`; options without one are
    /// matched by position.
    #[must_use]
    pub fn dropdown_name(&self) -> Option<String> {
        let selected = self.number()?;
        let options = &self.type_config.as_ref()?.options;
        options
            .iter()
            .find(|o| {
                o.orderindex.as_ref().and_then(|v| match v {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.parse().ok(),
                    _ => None,
                }) == Some(selected)
            })
            .or_else(|| {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let index = selected as usize;
                options.get(index)
            })
            .map(|o| o.name.clone())
    }
}

/// First task whose "Account #" equals `client_number`.
#[must_use]
pub fn find_account_task<'a>(tasks: &'a [Task], client_number: &str) -> Option<&'a Task> {
    tasks.iter().find(|task| {
        task.field(ACCOUNT_NUMBER_FIELD)
            .and_then(CustomField::text)
            .is_some_and(|n| n == client_number)
    })
}

/// Billing terms and usage counters of one client.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingProfile {
    pub task_id: String,
    pub task_name: String,
    pub monthly_rate: f64,
    pub included_minutes: u64,
    pub consumption_rate: f64,
    pub day_to_bill: u32,
    pub service_type: Option<String>,
    pub client_type: Option<String>,
    pub billing_cc: Option<String>,
    pub prior_month_field_id: String,
    pub lifetime_field_id: String,
    pub lifetime_minutes: u64,
}

impl BillingProfile {
    /// Reads the billing custom fields of a CRM task.
    ///
    /// Rate, included minutes and consumption rate default to zero when unset.
    ///
    /// # Errors
    ///
    /// [`ClickUpError::MissingField`] if "Day to Bill" or either usage field is
    /// absent, [`ClickUpError::InvalidField`] for values that are not numbers.
    pub fn from_task(task: &Task) -> Result<Self, ClickUpError> {
        let require = |name: &'static str| {
            task.field(name).ok_or_else(|| ClickUpError::MissingField {
                task: task.name.clone(),
                field: name,
            })
        };

        let day_field = require("Day to Bill")?;
        if day_field.value.is_none() {
            return Err(ClickUpError::MissingField {
                task: task.name.clone(),
                field: "Day to Bill",
            });
        }
        let day_to_bill = whole(day_field)?;
        let day_to_bill = u32::try_from(day_to_bill)
            .ok()
            .filter(|d| (1..=31).contains(d))
            .ok_or_else(|| ClickUpError::InvalidField {
                field: day_field.name.clone(),
                value: day_to_bill.to_string(),
            })?;

        let prior = require("Robocorp Prior Month")?;
        let lifetime = require("Robocorp Lifetime")?;

        Ok(Self {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            monthly_rate: optional_number(task.field("Rate"))?,
            included_minutes: task.field("Included Consumption").map_or(Ok(0), whole)?,
            consumption_rate: optional_number(task.field("Consumption Rate"))?,
            day_to_bill,
            service_type: task.field("Service Type").and_then(CustomField::dropdown_name),
            client_type: task.field("Type").and_then(CustomField::dropdown_name),
            billing_cc: task.field("Billing CC").and_then(CustomField::text),
            prior_month_field_id: prior.id.clone(),
            lifetime_field_id: lifetime.id.clone(),
            lifetime_minutes: whole(lifetime)?,
        })
    }
}

fn optional_number(field: Option<&CustomField>) -> Result<f64, ClickUpError> {
    let Some(field) = field else { return Ok(0.0) };
    if field.value.is_none() {
        return Ok(0.0);
    }
    field
        .number()
        .filter(|n| n.is_finite() && *n >= 0.0)
        .ok_or_else(|| invalid(field))
}

/// Non-negative integer field; unset reads as zero.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole(field: &CustomField) -> Result<u64, ClickUpError> {
    if field.value.is_none() {
        return Ok(0);
    }
    let n = field.number().ok_or_else(|| invalid(field))?;
    if n < 0.0 || n.fract() != 0.0 || n > 1e15 {
        return Err(invalid(field));
    }
    Ok(n as u64)
}

fn invalid(field: &CustomField) -> ClickUpError {
    ClickUpError::InvalidField {
        field: field.name.clone(),
        value: field
            .value
            .as_ref()
            .map_or_else(String::new, Value::to_string),
    }
}
