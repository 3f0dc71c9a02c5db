//! The two scheduled runs: sending today's invoices and creating the monthly ones.
//!
//! Each run resolves its services from the environment in `run`, then hands
//! them to a function that does the work. Per-invoice failures are recorded
//! in the summary table and never abort the run.

pub mod create_invoices;
pub mod send_invoices;

use std::{sync::Arc, time::Duration};

use reqwest::Client;

use crate::{
    client::RefreshableQBContext,
    config::Config,
    error::Error,
    graph::{GraphClient, GraphCredentials, SendMailRequest},
    secrets::{get_secret_json, SecretStore},
};

pub(crate) const ERROR_PREFIX: &str = "Error: ";

/// Client shared by every service a run talks to. `timeout` bounds each
/// request unless the request sets its own.
pub(crate) fn http_client(timeout: Duration) -> Result<Client, Error> {
    Ok(Client::builder().timeout(timeout).build()?)
}

pub(crate) async fn load_aws_config(config: &Config) -> aws_config::SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.aws_region.clone()))
        .load()
        .await
}

/// Loads the QuickBooks blob and makes sure a usable access token is held.
pub(crate) async fn connect_quickbooks(
    config: &Config,
    store: Arc<dyn SecretStore>,
    http: &Client,
) -> Result<RefreshableQBContext, Error> {
    let qb =
        RefreshableQBContext::from_store(config.environment, &config.qbo_secret_name, store).await?;
    qb.ensure_fresh(http).await?;
    Ok(qb)
}

pub(crate) async fn connect_graph(
    config: &Config,
    store: &dyn SecretStore,
    http: Client,
) -> Result<GraphClient, Error> {
    let creds: GraphCredentials = get_secret_json(store, &config.msgraph_secret_name).await?;
    Ok(GraphClient::connect(&creds, http).await?)
}

/// Mails a summary to the bookkeeper. Returns whether Graph accepted it.
pub(crate) async fn send_summary(
    graph: &GraphClient,
    config: &Config,
    subject: &str,
    html: String,
) -> bool {
    let request = SendMailRequest::html(subject, html, &[config.bookkeeper_email.as_str()], &[])
        .save_to_sent_items(true);
    match graph.send_mail(&config.sender_email, &request).await {
        Ok(()) => true,
        Err(e) => {
            log::error!("Failed to send summary email '{subject}': {e}");
            false
        }
    }
}

/// Writes back credentials a refresh could not persist. Returns success.
pub(crate) async fn persist_credentials(qb: &RefreshableQBContext) -> bool {
    match qb.persist_pending().await {
        Ok(()) => true,
        Err(e) => {
            log::error!("{e}");
            false
        }
    }
}

pub(crate) fn error_status(error: &impl std::fmt::Display) -> String {
    format!("{ERROR_PREFIX}{error}")
}
