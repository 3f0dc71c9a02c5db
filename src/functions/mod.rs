use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Request, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    client::{build_request, build_url, RefreshableQBContext, RetryPolicy},
    error::APIError,
    APIResult,
};

pub mod attachment;
pub mod create;
pub mod query;
pub mod send;

/// Sends a request built by `build`, keeping the access token fresh.
///
/// `build` receives the current access token and is called again for every
/// attempt, so request bodies are never reused after a failure. Requests
/// without their own timeout get the context's request timeout.
///
/// One refresh per call: a `401` triggers a refresh and one retry unless the
/// expired token was already refreshed before the first attempt. Throttling,
/// gateway failures, timeouts and connection errors are retried with backoff
/// up to the context's [`RetryPolicy`].
///
/// # Errors
///
/// [`APIError::Auth`] when the token cannot be refreshed or the API still
/// rejects it, otherwise the classified status of the last attempt.
pub async fn execute_request<F>(
    qb: &RefreshableQBContext,
    client: &Client,
    build: F,
) -> APIResult<Response>
where
    F: Fn(&str) -> APIResult<Request>,
{
    let retry = qb.retry_policy();
    let (mut token, mut generation, mut refreshed) = qb.ensure_fresh_tracked(client).await?;
    let mut attempt = 0;

    loop {
        let mut request = build(&token)?;
        if request.timeout().is_none() {
            *request.timeout_mut() = Some(qb.request_timeout);
        }
        let target = format!("{} {}", request.method(), request.url().path());

        let (error, retryable) = match client.execute(request).await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) if response.status() == StatusCode::UNAUTHORIZED && !refreshed => {
                log::warn!("{target} was unauthorized, refreshing access token");
                (token, generation) = qb.refresh_if_stale(client, generation).await?;
                refreshed = true;
                continue;
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                (
                    APIError::from_status(status, &body),
                    RetryPolicy::is_retryable(status),
                )
            }
            Err(e) => {
                let error = APIError::from(e);
                let retryable = error.is_transient();
                (error, retryable)
            }
        };

        if retryable && attempt < retry.max_retries {
            let delay = retry.backoff(attempt);
            attempt += 1;
            log::warn!(
                "{target} failed ({error}), retry {attempt}/{} in {delay:?}",
                retry.max_retries
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        log::error!("{target} failed: {error}");
        return Err(error);
    }
}

/// Sends a JSON request to `path` under the company's API base and decodes
/// the JSON response.
///
/// # Errors
///
/// See [`execute_request`]; also fails if the response is not the expected JSON.
pub async fn qb_request<B, T>(
    qb: &RefreshableQBContext,
    client: &Client,
    method: Method,
    path: &str,
    body: Option<&B>,
    query: Option<&[(&str, &str)]>,
) -> APIResult<T>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let url = build_url(&qb.base_url, path, query)?;
    let response = execute_request(qb, client, |token| {
        build_request(
            client,
            method.clone(),
            url.clone(),
            body,
            "application/json",
            token,
        )
    })
    .await?;
    Ok(response.json().await?)
}

/// Single-entity envelope, `{"Invoice": {...}, "time": "..."}`.
#[derive(Debug, Clone, Deserialize)]
pub struct QBResponse<T> {
    #[serde(alias = "Invoice", alias = "Customer", alias = "Attachable")]
    pub object: T,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}
