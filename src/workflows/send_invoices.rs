//! Emails every invoice dated today to its customer and reports to the bookkeeper.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use reqwest::Client;

use super::{
    connect_graph, connect_quickbooks, error_status, http_client, persist_credentials, send_summary,
};
use crate::{
    client::RefreshableQBContext,
    config::Config,
    error::Error,
    functions::{query::qb_query_all, send::qb_send_invoice},
    graph::GraphClient,
    secrets::{AwsSecretStore, SecretStore},
    template::{format_amount, HtmlTable, HtmlTemplate},
    types::Invoice,
    REQUEST_TIMEOUT,
};

pub const SUBJECT: &str = "Invoices Sent Today";
pub const STATUS_SENT: &str = "Sent";
pub const STATUS_ZERO_AMOUNT: &str = "Zero Amount";
pub const STATUS_EXCLUDED: &str = "Excluded - Do Not Send";

const COLUMNS: [&str; 7] = [
    "Id",
    "Invoice Num",
    "Name",
    "Invoice Date",
    "Invoice Due",
    "Amount",
    "Status",
];

/// Resolves every service from `config` and sends today's invoices.
///
/// # Errors
///
/// Setup failures: unreadable secrets, Graph or QuickBooks authentication.
pub async fn run(config: &Config) -> Result<bool, Error> {
    let sdk_config = super::load_aws_config(config).await;
    let store: Arc<dyn SecretStore> = Arc::new(AwsSecretStore::new(&sdk_config));
    let http = http_client(REQUEST_TIMEOUT)?;

    let graph = connect_graph(config, store.as_ref(), http.clone()).await?;
    let qb = connect_quickbooks(config, store, &http).await?;

    send_todays_invoices(config, &qb, &graph, &http, Local::now().date_naive()).await
}

/// Sends the invoices dated `today` and mails the summary.
///
/// Returns whether the summary went out and every rotated credential was saved.
///
/// # Errors
///
/// If the invoice query itself fails, or the summary cannot be rendered.
pub async fn send_todays_invoices(
    config: &Config,
    qb: &RefreshableQBContext,
    graph: &GraphClient,
    http: &Client,
    today: NaiveDate,
) -> Result<bool, Error> {
    let query = format!("where TxnDate = '{}'", today.format("%Y-%m-%d"));
    let invoices: Vec<Invoice> = qb_query_all(qb, http, &query).await?;

    if invoices.is_empty() {
        log::info!("No invoices found for today.");
        return Ok(persist_credentials(qb).await);
    }
    log::info!("Found {} invoices dated {today}", invoices.len());

    let mut table = HtmlTable::new(&COLUMNS);
    let mut total = 0.0;
    for invoice in &invoices {
        let amount = invoice.total_amt.unwrap_or_default();
        total += amount;
        let status = send_one(config, qb, http, invoice, amount).await;
        table.push_row(row(invoice, amount, status));
    }

    let html = HtmlTemplate::sent_invoices()?.render(&[
        ("invoices_table", table.render()),
        ("total_all_invoices", format_amount(total)),
        ("invoice_count", invoices.len().to_string()),
    ])?;

    let mailed = send_summary(graph, config, SUBJECT, html).await;
    let persisted = persist_credentials(qb).await;
    Ok(mailed && persisted)
}

async fn send_one(
    config: &Config,
    qb: &RefreshableQBContext,
    http: &Client,
    invoice: &Invoice,
    amount: f64,
) -> String {
    let id = invoice.id.as_deref().unwrap_or_default();
    let name = invoice.customer_name().unwrap_or_default();

    if amount.abs() < f64::EPSILON {
        log::info!("Invoice {id} for {name} has a zero amount, not sending");
        return STATUS_ZERO_AMOUNT.into();
    }
    if config.is_excluded(name) {
        log::info!("Customer {name} is excluded, not sending invoice {id}");
        return STATUS_EXCLUDED.into();
    }

    match qb_send_invoice(qb, http, invoice, None).await {
        Ok(_) => STATUS_SENT.into(),
        Err(e) => {
            log::error!("Failed to send invoice {id} for {name}: {e}");
            error_status(&e)
        }
    }
}

fn row(invoice: &Invoice, amount: f64, status: String) -> Vec<String> {
    let date = |d: Option<NaiveDate>| d.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default();
    vec![
        invoice.id.clone().unwrap_or_default(),
        invoice.doc_number.clone().unwrap_or_default(),
        invoice.customer_name().unwrap_or_default().to_string(),
        date(invoice.txn_date),
        date(invoice.due_date),
        format_amount(amount),
        status,
    ]
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::Client;
    use serde_json::json;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{
        client::testing::{blob, context, REALM, SECRET},
        secrets::memory::MemorySecretStore,
        workflows::testing::{config, graph, sent_mail, BOOKKEEPER},
    };

    fn invoice(id: &str, name: &str, amount: f64) -> serde_json::Value {
        json!({
            "Id": id,
            "DocNumber": format!("10{id}"),
            "TxnDate": "2025-10-15",
            "DueDate": "2025-10-15",
            "TotalAmt": amount,
            "CustomerRef": { "value": format!("c{id}"), "name": name }
        })
    }

    async fn mount_invoices(server: &MockServer, invoices: Vec<serde_json::Value>) {
        Mock::given(method("GET"))
            .and(path(format!("/v3/company/{REALM}/query")))
            .and(query_param(
                "query",
                "select * from Invoice where TxnDate = '2025-10-15' STARTPOSITION 1 MAXRESULTS 1000",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "QueryResponse": { "Invoice": invoices, "startPosition": 1 }
            })))
            .mount(server)
            .await;
    }

    async fn mount_send(server: &MockServer, id: &str, status: u16) {
        let response = if status == 200 {
            ResponseTemplate::new(200).set_body_json(json!({ "Invoice": { "Id": id } }))
        } else {
            ResponseTemplate::new(status).set_body_string("upstream trouble")
        };
        Mock::given(method("POST"))
            .and(path(format!("/v3/company/{REALM}/invoice/{id}/send")))
            .respond_with(response)
            .mount(server)
            .await;
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 15).unwrap()
    }

    #[tokio::test]
    async fn statuses_follow_amount_exclusion_and_send_result() {
        let server = MockServer::start().await;
        let store = Arc::new(MemorySecretStore::with_secret(SECRET, blob(true)));
        let qb = context(&server, store).await;
        let graph = graph(&server, 202).await;
        let config = config(&[("EXCLUDED_CUSTOMERS", "Globex")]);

        mount_invoices(
            &server,
            vec![
                invoice("1", "Acme Corp", 1500.0),
                invoice("2", "Globex", 900.0),
                invoice("3", "Initech", 0.0),
                invoice("4", "Umbrella", 250.5),
            ],
        )
        .await;
        mount_send(&server, "1", 200).await;
        mount_send(&server, "4", 400).await;

        let ok = send_todays_invoices(&config, &qb, &graph, &Client::new(), today())
            .await
            .unwrap();
        assert!(ok);

        let mail = sent_mail(&server).await;
        assert_eq!(mail.len(), 1);
        let message = &mail[0]["message"];
        assert_eq!(message["subject"], SUBJECT);
        assert_eq!(message["toRecipients"][0]["emailAddress"]["address"], BOOKKEEPER);
        assert_eq!(mail[0]["saveToSentItems"], true);

        let body = message["body"]["content"].as_str().unwrap();
        assert!(body.contains("<td>Sent</td>"));
        assert!(body.contains("<td>Excluded - Do Not Send</td>"));
        assert!(body.contains("<td>Zero Amount</td>"));
        assert!(body.contains("<td>Error: Validation error: upstream trouble</td>"));
        assert!(body.contains("<strong>4</strong>"));
        assert!(body.contains("$2,650.50"));

        let sends: Vec<_> = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.url.path().ends_with("/send"))
            .collect();
        assert_eq!(sends.len(), 2);
    }

    #[tokio::test]
    async fn no_invoices_sends_no_email() {
        let server = MockServer::start().await;
        let store = Arc::new(MemorySecretStore::with_secret(SECRET, blob(true)));
        let qb = context(&server, store).await;
        let graph = graph(&server, 202).await;
        mount_invoices(&server, Vec::new()).await;

        let ok = send_todays_invoices(&config(&[]), &qb, &graph, &Client::new(), today())
            .await
            .unwrap();
        assert!(ok);
        assert!(sent_mail(&server).await.is_empty());
    }

    #[tokio::test]
    async fn rejected_summary_fails_the_run() {
        let server = MockServer::start().await;
        let store = Arc::new(MemorySecretStore::with_secret(SECRET, blob(true)));
        let qb = context(&server, store).await;
        let graph = graph(&server, 500).await;
        mount_invoices(&server, vec![invoice("1", "Acme Corp", 0.0)]).await;

        let ok = send_todays_invoices(&config(&[]), &qb, &graph, &Client::new(), today())
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn unsaved_rotation_fails_the_run() {
        let server = MockServer::start().await;
        let store = Arc::new(MemorySecretStore::with_secret(SECRET, blob(false)));
        crate::client::testing::mount_token_endpoint(&server, "at-new", "rt-new").await;
        let qb = context(&server, store.clone()).await;
        let graph = graph(&server, 202).await;
        mount_invoices(&server, vec![invoice("1", "Acme Corp", 0.0)]).await;

        store.fail_puts(true);
        let ok = send_todays_invoices(&config(&[]), &qb, &graph, &Client::new(), today())
            .await
            .unwrap();
        assert!(!ok);
        assert!(qb.has_unpersisted_credentials().await);
    }
}
