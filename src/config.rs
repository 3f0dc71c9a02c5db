//! Run settings read from the environment.

use std::ops::Range;

use crate::{billing::BillingPeriod, error::ConfigError, Environment};

const DEFAULT_REGION: &str = "us-west-2";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub aws_region: String,
    pub qbo_secret_name: String,
    pub msgraph_secret_name: String,
    pub bookkeeper_email: String,
    pub sender_email: String,
    pub excluded_customers: Vec<String>,
    pub environment: Environment,
    pub billing_month: Option<BillingPeriod>,
    pub client_range: Option<Range<u64>>,
    pub dry_run: bool,
    pub clickup_secret_name: Option<String>,
    pub robocorp_secret_name: Option<String>,
    pub clients_table: Option<String>,
}

/// Settings only the create flow needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSettings<'a> {
    pub clickup_secret_name: &'a str,
    pub robocorp_secret_name: &'a str,
    pub clients_table: &'a str,
}

impl Config {
    /// # Errors
    ///
    /// [`ConfigError::MissingEnvVar`] when a required variable is unset or blank,
    /// [`ConfigError::InvalidValue`] when one cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required =
            |key: &str| optional(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));

        let environment = match optional("QBO_ENVIRONMENT") {
            Some(value) => value.parse().map_err(|message| ConfigError::InvalidValue {
                key: "QBO_ENVIRONMENT".into(),
                message,
            })?,
            None => Environment::PRODUCTION,
        };

        let billing_month = optional("BILLING_MONTH")
            .map(|value| {
                BillingPeriod::parse(&value).map_err(|e| ConfigError::InvalidValue {
                    key: "BILLING_MONTH".into(),
                    message: format!("expected YYYY-MM, got '{value}': {e}"),
                })
            })
            .transpose()?;

        let client_range = optional("INVOICE_CLIENT_RANGE")
            .map(|value| parse_range(&value))
            .transpose()?;

        let dry_run = optional("CREATE_INVOICES_DRY_RUN")
            .map(|value| parse_bool(&value))
            .transpose()?
            .unwrap_or(false);

        Ok(Self {
            aws_region: optional("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.into()),
            qbo_secret_name: required("QBO_SECRET_NAME")?,
            msgraph_secret_name: required("MSGRAPH_SECRET_NAME")?,
            bookkeeper_email: required("BOOKKEEPER_EMAIL")?,
            sender_email: required("SENDER_EMAIL")?,
            excluded_customers: optional("EXCLUDED_CUSTOMERS")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            environment,
            billing_month,
            client_range,
            dry_run,
            clickup_secret_name: optional("CLICKUP_SECRET_NAME"),
            robocorp_secret_name: optional("ROBOCORP_API_SECRET_NAME"),
            clients_table: optional("DYNAMODB_TABLE_ROBOCORP_CLIENTS"),
        })
    }

    /// # Errors
    ///
    /// [`ConfigError::MissingEnvVar`] naming the first unset create-flow variable.
    pub fn require_create_settings(&self) -> Result<CreateSettings<'_>, ConfigError> {
        fn present<'a>(value: Option<&'a String>, key: &str) -> Result<&'a str, ConfigError> {
            value
                .map(String::as_str)
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        }

        Ok(CreateSettings {
            clickup_secret_name: present(self.clickup_secret_name.as_ref(), "CLICKUP_SECRET_NAME")?,
            robocorp_secret_name: present(
                self.robocorp_secret_name.as_ref(),
                "ROBOCORP_API_SECRET_NAME",
            )?,
            clients_table: present(self.clients_table.as_ref(), "DYNAMODB_TABLE_ROBOCORP_CLIENTS")?,
        })
    }

    /// Case-insensitive match against `EXCLUDED_CUSTOMERS`.
    #[must_use]
    pub fn is_excluded(&self, customer_name: &str) -> bool {
        let name = customer_name.trim();
        self.excluded_customers
            .iter()
            .any(|excluded| excluded.eq_ignore_ascii_case(name))
    }
}

fn parse_range(value: &str) -> Result<Range<u64>, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "INVOICE_CLIENT_RANGE".into(),
        message,
    };
    let (low, high) = value
        .split_once('-')
        .ok_or_else(|| invalid(format!("expected LOW-HIGH, got '{value}'")))?;
    let low: u64 = low
        .trim()
        .parse()
        .map_err(|e| invalid(format!("bad lower bound '{low}': {e}")))?;
    let high: u64 = high
        .trim()
        .parse()
        .map_err(|e| invalid(format!("bad upper bound '{high}': {e}")))?;
    if low >= high {
        return Err(invalid(format!("empty range {low}-{high}")));
    }
    Ok(low..high)
}

fn parse_bool(value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: "CREATE_INVOICES_DRY_RUN".into(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}
