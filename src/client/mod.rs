use reqwest::{Client, Method, Request, RequestBuilder};
use serde::Serialize;
use url::Url;

use crate::{APIResult, MINOR_VERSION};

mod context;
mod credentials;
mod refresh;
mod retry;

pub use context::QBContext;
pub use credentials::QBCredentials;
pub use refresh::RefreshableQBContext;
pub use retry::RetryPolicy;

#[cfg(test)]
pub(crate) use refresh::testing;

pub(crate) fn set_headers(
    request: RequestBuilder,
    content_type: &str,
    access_token: &str,
) -> RequestBuilder {
    let mut request = request.bearer_auth(access_token);
    if content_type != "multipart/form-data" {
        request = request.header(reqwest::header::CONTENT_TYPE, content_type);
    }
    request.header(reqwest::header::ACCEPT, "application/json")
}

pub(crate) fn build_request<B>(
    client: &Client,
    method: Method,
    url: Url,
    body: Option<&B>,
    content_type: &str,
    access_token: &str,
) -> APIResult<Request>
where
    B: Serialize + ?Sized,
{
    let path = url.path().to_string();
    let mut request = set_headers(
        client.request(method.clone(), url),
        content_type,
        access_token,
    );

    if let (false, Some(body)) = (method == Method::GET || method == Method::DELETE, body) {
        request = request.body(serde_json::to_vec(body)?);
    }

    let request = request.build()?;

    log::debug!(
        "Built Request with params: {}-{}-{}",
        path,
        method,
        if body.is_some() {
            "With JSON Body"
        } else {
            "No JSON Body"
        },
    );

    Ok(request)
}

pub(crate) fn build_url(
    base: &Url,
    path: &str,
    query: Option<&[(&str, &str)]>,
) -> APIResult<Url> {
    let mut url = base.join(path)?;
    {
        let mut pairs = url.query_pairs_mut();
        if let Some(q) = query {
            pairs.extend_pairs(q);
        }
        pairs.append_pair("minorversion", MINOR_VERSION);
    }
    Ok(url)
}
