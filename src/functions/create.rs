use reqwest::{Client, Method};
use uuid::Uuid;

use super::{qb_request, QBResponse};
use crate::{
    client::RefreshableQBContext,
    error::APIError,
    types::{QBCreatable, QBItem},
    APIResult,
};

/// Creates `item` and returns the stored object, with its `Id` and `SyncToken`.
///
/// Every attempt carries the same `requestid`, so QuickBooks answers a retry
/// of an already committed create with the original object.
///
/// # Errors
///
/// [`APIError::CreateMissingItems`] if the object is incomplete, or any request failure.
pub async fn qb_create<T: QBItem + QBCreatable>(
    qb: &RefreshableQBContext,
    client: &Client,
    item: &T,
) -> APIResult<T> {
    if !item.can_create() {
        return Err(APIError::CreateMissingItems);
    }

    let request_id = Uuid::new_v4().to_string();
    let resp: QBResponse<T> = qb_request(
        qb,
        client,
        Method::POST,
        &format!("company/{}/{}", qb.company_id, T::qb_id()),
        Some(item),
        Some(&[("requestid", request_id.as_str())]),
    )
    .await?;

    log::info!(
        "Successfully created {} object {}",
        T::name(),
        resp.object.id().map_or("<no id>", String::as_str)
    );
    Ok(resp.object)
}
