//! Builds each client's monthly invoice from its ClickUp billing terms and
//! Robocorp usage, then mails the bookkeeper a summary of what was created.

use std::{collections::HashMap, sync::Arc};

use chrono::{Local, NaiveDate};
use reqwest::Client;
use serde_json::json;
use url::Url;

use super::{
    connect_graph, connect_quickbooks, error_status, http_client, persist_credentials, send_summary,
};
use crate::{
    billing::{build_invoice, BillingPeriod},
    clickup::{find_account_task, BillingProfile, ClickUpClient, ClickUpCredentials, Task},
    client::RefreshableQBContext,
    config::Config,
    error::{APIError, ClickUpError, Error, RobocorpError},
    functions::{attachment::qb_upload, create::qb_create, query::qb_query},
    graph::GraphClient,
    lookup::{ClientDirectory, ClientRecord, DynamoClientDirectory},
    robocorp::{RobocorpClient, UsageReport, ROBOCORP_API},
    secrets::{get_secret_json, AwsSecretStore, SecretStore},
    template::{format_amount, HtmlTable, HtmlTemplate},
    types::{Customer, EntityRef, Invoice},
    APIResult, REQUEST_TIMEOUT,
};

pub const SUBJECT: &str = "Invoices Created";
pub const STATUS_CREATED: &str = "Created";
pub const STATUS_DRY_RUN: &str = "Skipped: dry run";
pub const STATUS_HOUSE_ACCOUNT: &str = "Skipped: house account";

/// Internal account that is never billed.
pub const HOUSE_ACCOUNT: &str = "10000";

const COLUMNS: [&str; 7] = [
    "Client",
    "Customer",
    "Invoice Num",
    "Invoice Date",
    "Minutes",
    "Amount",
    "Status",
];

/// Everything the create run talks to.
pub struct CreateServices<'a> {
    pub config: &'a Config,
    pub http: &'a Client,
    pub qb: &'a RefreshableQBContext,
    pub graph: &'a GraphClient,
    pub clickup: &'a ClickUpClient,
    pub directory: &'a dyn ClientDirectory,
    /// Robocorp workspace API keys by client number.
    pub robocorp_keys: &'a HashMap<String, String>,
    pub robocorp_api: Url,
}

/// Resolves every service from `config` and creates the month's invoices.
///
/// # Errors
///
/// Missing create settings, unreadable secrets, or failed authentication.
pub async fn run(config: &Config) -> Result<bool, Error> {
    let settings = config.require_create_settings()?;
    let sdk_config = super::load_aws_config(config).await;
    let store: Arc<dyn SecretStore> = Arc::new(AwsSecretStore::new(&sdk_config));
    let directory = DynamoClientDirectory::new(&sdk_config, settings.clients_table);
    let http = http_client(REQUEST_TIMEOUT)?;

    let clickup_creds: ClickUpCredentials =
        get_secret_json(store.as_ref(), settings.clickup_secret_name).await?;
    let clickup = ClickUpClient::new(&clickup_creds, http.clone()).map_err(ClickUpError::from)?;
    let robocorp_keys: HashMap<String, String> =
        get_secret_json(store.as_ref(), settings.robocorp_secret_name).await?;

    let graph = connect_graph(config, store.as_ref(), http.clone()).await?;
    let qb = connect_quickbooks(config, store, &http).await?;

    let today = Local::now().date_naive();
    let period = config
        .billing_month
        .unwrap_or_else(|| BillingPeriod::prior_month(today));

    let services = CreateServices {
        config,
        http: &http,
        qb: &qb,
        graph: &graph,
        clickup: &clickup,
        directory: &directory,
        robocorp_keys: &robocorp_keys,
        robocorp_api: Url::parse(ROBOCORP_API).map_err(RobocorpError::from)?,
    };
    create_monthly_invoices(&services, &period, today).await
}

/// One row of the summary table.
struct Outcome {
    customer: String,
    invoice_num: String,
    invoice_date: String,
    minutes: u64,
    amount: f64,
    status: String,
    /// The invoice exists in QuickBooks.
    created: bool,
    /// Every step after the create succeeded too.
    complete: bool,
}

/// Bills every client in range for `period`.
///
/// Returns `true` only when every client was billed, the summary went out,
/// and rotated credentials were saved.
///
/// # Errors
///
/// If the client list or the ClickUp CRM list cannot be read, or the summary
/// cannot be rendered.
pub async fn create_monthly_invoices(
    services: &CreateServices<'_>,
    period: &BillingPeriod,
    today: NaiveDate,
) -> Result<bool, Error> {
    log::info!("Creating invoices for {}", period.label());
    if services.config.dry_run {
        log::warn!("Dry run: nothing will be written to QuickBooks or ClickUp");
    }

    let clients = services.directory.list_clients().await?;
    let tasks = services.clickup.get_account_tasks().await?;

    let mut table = HtmlTable::new(&COLUMNS);
    let mut all_billed = true;
    let mut created = 0usize;
    let mut total = 0.0;

    for record in clients.iter().filter(|r| in_range(services.config, r)) {
        let client = record.client_number.as_str();
        if client == HOUSE_ACCOUNT {
            log::info!("Skipping house account {client}");
            table.push_row(vec![
                client.to_string(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                STATUS_HOUSE_ACCOUNT.into(),
            ]);
            continue;
        }

        match bill_client(services, record, &tasks, period, today).await {
            Ok(outcome) => {
                if outcome.created {
                    created += 1;
                    total += outcome.amount;
                }
                all_billed &= outcome.complete;
                table.push_row(vec![
                    client.to_string(),
                    outcome.customer,
                    outcome.invoice_num,
                    outcome.invoice_date,
                    outcome.minutes.to_string(),
                    format_amount(outcome.amount),
                    outcome.status,
                ]);
            }
            Err(e) => {
                log::error!("Failed to bill client {client}: {e}");
                all_billed = false;
                let mut row = vec![String::new(); COLUMNS.len()];
                row[0] = client.to_string();
                row[COLUMNS.len() - 1] = error_status(&e);
                table.push_row(row);
            }
        }
    }

    log::info!("Created {created} invoices totalling {}", format_amount(total));
    let html = HtmlTemplate::created_invoices()?.render(&[
        ("invoices_table", table.render()),
        ("total_all_invoices", format_amount(total)),
        ("invoice_count", created.to_string()),
        ("billing_period", period.label()),
    ])?;

    let mailed = send_summary(services.graph, services.config, SUBJECT, html).await;
    let persisted = persist_credentials(services.qb).await;
    Ok(all_billed && mailed && persisted)
}

fn in_range(config: &Config, record: &ClientRecord) -> bool {
    config
        .client_range
        .as_ref()
        .map_or(true, |range| record.number().is_some_and(|n| range.contains(&n)))
}

async fn bill_client(
    services: &CreateServices<'_>,
    record: &ClientRecord,
    tasks: &[Task],
    period: &BillingPeriod,
    today: NaiveDate,
) -> Result<Outcome, Error> {
    let client = record.client_number.as_str();
    log::info!("Billing client {client}");

    let usage = usage(services, record, period).await?;

    let task = find_account_task(tasks, client)
        .ok_or_else(|| ClickUpError::AccountNotFound(client.to_string()))?;
    let profile = BillingProfile::from_task(task)?;

    let query = format!("where FullyQualifiedName LIKE '{client}%'");
    let customers: Vec<Customer> = qb_query(services.qb, services.http, &query, 1, 1).await?;
    let customer = customers
        .first()
        .ok_or_else(|| APIError::NoQueryObjects(query.clone()))?;
    let customer_name = customer.display_name.clone().unwrap_or_default();

    let invoice = build_invoice(customer, &profile, usage.total_minutes, period, today);
    let mut outcome = Outcome {
        customer: customer_name,
        invoice_num: String::new(),
        invoice_date: invoice
            .txn_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        minutes: usage.total_minutes,
        amount: invoice.line.iter().map(|l| l.amount).sum(),
        status: STATUS_DRY_RUN.into(),
        created: false,
        complete: true,
    };

    if services.config.dry_run {
        log::info!(
            "Dry run: would invoice {} for {} ({} minutes)",
            outcome.customer,
            format_amount(outcome.amount),
            usage.total_minutes
        );
        return Ok(outcome);
    }

    let created = qb_create(services.qb, services.http, &invoice).await?;
    outcome.invoice_num = created.doc_number.clone().unwrap_or_default();
    outcome.amount = created.total_amt.unwrap_or(outcome.amount);
    outcome.status = STATUS_CREATED.into();
    outcome.created = true;

    // The invoice exists from here on, so later failures only mark the row.
    let mut failures = Vec::new();
    if let Err(e) = attach_report(services, client, &created, &usage, period).await {
        log::error!(
            "Invoice {} for {client} created, report not attached: {e}",
            outcome.invoice_num
        );
        failures.push(format!("report not attached: {e}"));
    }
    if let Err(e) = record_usage(services.clickup, &profile, &usage).await {
        log::error!(
            "Invoice {} for {client} created, usage not recorded: {e}",
            outcome.invoice_num
        );
        failures.push(format!("usage not recorded: {e}"));
    }
    if !failures.is_empty() {
        outcome.status = error_status(&format!("{STATUS_CREATED}, {}", failures.join("; ")));
        outcome.complete = false;
    }
    Ok(outcome)
}

async fn usage(
    services: &CreateServices<'_>,
    record: &ClientRecord,
    period: &BillingPeriod,
) -> Result<UsageReport, Error> {
    let key = services
        .robocorp_keys
        .get(&record.client_number)
        .ok_or_else(|| RobocorpError::MissingKey(record.client_number.clone()))?;
    let robocorp = RobocorpClient::new(key.as_str(), services.http.clone())
        .map_err(RobocorpError::from)?
        .with_base_url(services.robocorp_api.clone());
    Ok(robocorp
        .usage_for_period(&record.workspace_id, period)
        .await?)
}

/// Attaches the per-run usage report, when there were any runs.
async fn attach_report(
    services: &CreateServices<'_>,
    client: &str,
    invoice: &Invoice,
    usage: &UsageReport,
    period: &BillingPeriod,
) -> APIResult<()> {
    if usage.runs.is_empty() {
        return Ok(());
    }
    let Some(id) = invoice.id.clone() else {
        log::warn!("Created invoice for {client} has no Id, report not attached");
        return Ok(());
    };

    let file_name = format!("{client}_runtime_report_{}.csv", period.key());
    qb_upload(
        services.qb,
        services.http,
        &file_name,
        "text/csv",
        usage.to_csv().as_bytes(),
        EntityRef {
            entity_type: "Invoice".into(),
            value: id,
        },
    )
    .await?;
    Ok(())
}

/// Adds the month to "Robocorp Lifetime" and replaces "Robocorp Prior Month".
async fn record_usage(
    clickup: &ClickUpClient,
    profile: &BillingProfile,
    usage: &UsageReport,
) -> Result<(), ClickUpError> {
    let lifetime = profile.lifetime_minutes + usage.total_minutes;
    clickup
        .set_custom_field_value(&profile.task_id, &profile.lifetime_field_id, &json!(lifetime))
        .await?;
    clickup
        .set_custom_field_value(
            &profile.task_id,
            &profile.prior_month_field_id,
            &json!(usage.total_minutes),
        )
        .await
}
