use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use serde::Deserialize;

use super::qb_request;
use crate::{client::RefreshableQBContext, error::APIError, types::QBItem, APIResult};

/// Largest page the query endpoint returns.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Runs `select * from {T} {query_str}` and returns one page of results.
///
/// `start_position` is 1-based, as QuickBooks counts it.
///
/// # Errors
///
/// [`APIError::NoQueryObjects`] if nothing matched, or any request failure.
pub async fn qb_query<T: QBItem>(
    qb: &RefreshableQBContext,
    client: &Client,
    query_str: &str,
    max_results: usize,
    start_position: usize,
) -> APIResult<Vec<T>> {
    let items = query_page(qb, client, query_str, max_results, start_position).await?;
    if items.is_empty() {
        return Err(APIError::NoQueryObjects(query_str.to_string()));
    }
    Ok(items)
}

/// Runs the query page by page until a short page comes back.
///
/// Returns an empty list when nothing matched.
///
/// # Errors
///
/// Any request failure.
pub async fn qb_query_all<T: QBItem>(
    qb: &RefreshableQBContext,
    client: &Client,
    query_str: &str,
) -> APIResult<Vec<T>> {
    let mut all = Vec::new();
    let mut start_position = 1;
    loop {
        let page: Vec<T> = query_page(qb, client, query_str, MAX_PAGE_SIZE, start_position).await?;
        let fetched = page.len();
        all.extend(page);
        if fetched < MAX_PAGE_SIZE {
            break;
        }
        start_position += fetched;
    }
    log::info!("Successfully queried {} {} objects", all.len(), T::name());
    Ok(all)
}

async fn query_page<T: QBItem>(
    qb: &RefreshableQBContext,
    client: &Client,
    query_str: &str,
    max_results: usize,
    start_position: usize,
) -> APIResult<Vec<T>> {
    let query = format!(
        "select * from {} {query_str} STARTPOSITION {start_position} MAXRESULTS {max_results}",
        T::name()
    );
    let resp: QueryResponseExt<T> = qb_request(
        qb,
        client,
        Method::GET,
        &format!("company/{}/query", qb.company_id),
        None::<&()>,
        Some(&[("query", query.as_str())]),
    )
    .await?;
    Ok(resp.query_response.items)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryResponse<T> {
    pub total_count: i64,
    #[serde(alias = "Invoice", alias = "Customer", alias = "Attachable")]
    pub items: Vec<T>,
    pub start_position: i64,
    pub max_results: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponseExt<T> {
    #[serde(default, rename = "QueryResponse")]
    pub query_response: QueryResponse<T>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}
