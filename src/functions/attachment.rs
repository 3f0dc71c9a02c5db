//! File attachments on QuickBooks Online objects.
//!
//! Uploads go to the company `upload` endpoint as a two-part multipart form:
//! `file_metadata_01` carries the `Attachable` JSON linking the file to its
//! entity, `file_content_01` carries the bytes.

use reqwest::{
    multipart::{Form, Part},
    Client,
};

use super::execute_request;
use crate::{
    client::{build_url, set_headers, RefreshableQBContext},
    error::APIError,
    types::{Attachable, AttachableRef, EntityRef},
    APIResult,
};

/// Uploads `bytes` as `file_name` and links it to `entity`.
///
/// The form is rebuilt from `bytes` for every attempt.
///
/// # Errors
///
/// [`APIError::NoAttachableObjects`] if QuickBooks accepted the upload but
/// returned no attachable, or any request failure.
pub async fn qb_upload(
    qb: &RefreshableQBContext,
    client: &Client,
    file_name: &str,
    content_type: &str,
    bytes: &[u8],
    entity: EntityRef,
) -> APIResult<Attachable> {
    let metadata = Attachable {
        file_name: Some(file_name.to_string()),
        content_type: Some(content_type.to_string()),
        attachable_ref: vec![AttachableRef {
            entity_ref: entity,
            include_on_send: false,
        }],
        ..Default::default()
    };
    let metadata = serde_json::to_string(&metadata)?;

    let path = format!("company/{}/upload", qb.company_id);
    let url = build_url(&qb.base_url, &path, None)?;

    let response = execute_request(qb, client, |token| {
        let form = Form::new()
            .part(
                "file_metadata_01",
                Part::text(metadata.clone()).mime_str("application/json")?,
            )
            .part(
                "file_content_01",
                Part::bytes(bytes.to_vec())
                    .file_name(file_name.to_string())
                    .mime_str(content_type)?,
            );
        let request = set_headers(client.post(url.clone()), "multipart/form-data", token)
            .timeout(qb.upload_timeout)
            .multipart(form)
            .build()?;
        Ok(request)
    })
    .await?;

    let mut qb_response: AttachableResponseExt = response.json().await?;
    if qb_response.ar.is_empty() {
        return Err(APIError::NoAttachableObjects);
    }

    let obj = qb_response.ar.swap_remove(0).attachable;
    log::info!("Successfully uploaded attachment : {file_name}");
    Ok(obj)
}

#[derive(Debug, serde::Deserialize)]
struct AttachableResponseExt {
    #[serde(rename = "AttachableResponse", default)]
    ar: Vec<AttachableResponse>,
}

#[derive(serde::Deserialize, Debug)]
struct AttachableResponse {
    #[serde(rename = "Attachable")]
    attachable: Attachable,
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use reqwest::Client;
    use serde_json::json;
    use wiremock::{
        matchers::{body_string_contains, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{client::testing::*, secrets::memory::MemorySecretStore};

    const UPLOAD_PATH: &str = "/v3/company/9130355/upload";

    fn invoice_ref() -> EntityRef {
        EntityRef {
            entity_type: "Invoice".into(),
            value: "212".into(),
        }
    }

    #[tokio::test]
    async fn upload_survives_a_token_refresh_with_its_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(UPLOAD_PATH))
            .and(header("authorization", "Bearer at-old"))
            .and(body_string_contains("Process,Kind,Started,Minutes"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        mount_token_endpoint(&server, "at-new", "rt-new").await;
        Mock::given(method("POST"))
            .and(path(UPLOAD_PATH))
            .and(header("authorization", "Bearer at-new"))
            .and(body_string_contains("file_metadata_01"))
            .and(body_string_contains("Process,Kind,Started,Minutes"))
            .and(body_string_contains(r#""EntityRef":{"type":"Invoice","value":"212"}"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "AttachableResponse": [{"Attachable": {"Id": "5000000000000", "FileName": "X0005_runtime_report_2025-09.csv"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        let ctx = context(&server, Arc::new(MemorySecretStore::with_secret(SECRET, blob(true)))).await;

        let uploaded = qb_upload(
            &ctx,
            &Client::new(),
            "X0005_runtime_report_2025-09.csv",
            "text/csv",
            b"Process,Kind,Started,Minutes\n",
            invoice_ref(),
        )
        .await
        .unwrap();
        assert_eq!(uploaded.id.as_deref(), Some("5000000000000"));
    }

    #[tokio::test]
    async fn uploads_get_the_longer_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(UPLOAD_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"AttachableResponse": [{"Attachable": {"Id": "5001"}}]}))
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;
        let ctx = context(&server, Arc::new(MemorySecretStore::with_secret(SECRET, blob(true))))
            .await
            .with_timeouts(Duration::from_millis(50), Duration::from_secs(5));

        let uploaded = qb_upload(&ctx, &Client::new(), "a.csv", "text/csv", b"x", invoice_ref())
            .await
            .unwrap();
        assert_eq!(uploaded.id.as_deref(), Some("5001"));
    }

    #[tokio::test]
    async fn empty_upload_response_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(UPLOAD_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"AttachableResponse": []})))
            .mount(&server)
            .await;
        let ctx = context(&server, Arc::new(MemorySecretStore::with_secret(SECRET, blob(true)))).await;

        let err = qb_upload(&ctx, &Client::new(), "a.csv", "text/csv", b"x", invoice_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, APIError::NoAttachableObjects));
    }
}
