use reqwest::{Client, Method};

use super::{execute_request, QBResponse};
use crate::{
    client::{build_request, build_url, RefreshableQBContext},
    error::APIError,
    types::{Invoice, QBItem},
    APIResult,
};

/// Emails `item` through QuickBooks to `send_to`, or to the entity's own
/// billing address when `None`.
///
/// # Errors
///
/// [`APIError::NoIdOnSend`] if the object has not been saved, or any request failure.
pub async fn qb_send_email<T: QBItem>(
    qb: &RefreshableQBContext,
    client: &Client,
    item: &T,
    send_to: Option<&str>,
) -> APIResult<T> {
    let id = item.id().ok_or(APIError::NoIdOnSend)?;
    let path = format!("company/{}/{}/{id}/send", qb.company_id, T::qb_id());
    let query: Vec<(&str, &str)> = send_to.map(|to| ("sendTo", to)).into_iter().collect();
    let url = build_url(&qb.base_url, &path, Some(query.as_slice()))?;

    let response = execute_request(qb, client, |token| {
        build_request(
            client,
            Method::POST,
            url.clone(),
            None::<&()>,
            "application/octet-stream",
            token,
        )
    })
    .await?;

    let resp: QBResponse<T> = response.json().await?;
    log::info!("Successfully sent {} {id}", T::name());
    Ok(resp.object)
}

/// Sends an invoice to its customer.
///
/// # Errors
///
/// See [`qb_send_email`].
pub async fn qb_send_invoice(
    qb: &RefreshableQBContext,
    client: &Client,
    invoice: &Invoice,
    send_to: Option<&str>,
) -> APIResult<Invoice> {
    qb_send_email(qb, client, invoice, send_to).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::Client;
    use serde_json::json;
    use wiremock::{
        matchers::{header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{client::testing::*, secrets::memory::MemorySecretStore};

    #[tokio::test]
    async fn invoice_is_sent_with_octet_stream_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/company/9130355/invoice/130/send"))
            .and(header("content-type", "application/octet-stream"))
            .and(query_param("sendTo", "ap@client.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Invoice": {"Id": "130", "EmailStatus": "EmailSent"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        let ctx = context(&server, Arc::new(MemorySecretStore::with_secret(SECRET, blob(true)))).await;
        let invoice = Invoice {
            id: Some("130".into()),
            ..Default::default()
        };

        let sent = qb_send_invoice(&ctx, &Client::new(), &invoice, Some("ap@client.test"))
            .await
            .unwrap();
        assert_eq!(sent.email_status.as_deref(), Some("EmailSent"));
    }

    #[tokio::test]
    async fn unsaved_invoice_cannot_be_sent() {
        let server = MockServer::start().await;
        let ctx = context(&server, Arc::new(MemorySecretStore::with_secret(SECRET, blob(true)))).await;
        let err = qb_send_invoice(&ctx, &Client::new(), &Invoice::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, APIError::NoIdOnSend));
    }
}
