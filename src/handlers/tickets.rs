use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::handlers::{ApiJson, AppState, OptionalBuyerId};
use crate::store::TicketRef;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Debug, Deserialize)]
pub struct DetailQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ScanBody {
    pub token: String,
}

/// With a buyer header the lookup is limited to that buyer's tickets.
pub async fn ticket_detail(
    State(state): State<AppState>,
    OptionalBuyerId(viewer): OptionalBuyerId,
    Path(id_or_code): Path<String>,
    Query(query): Query<DetailQuery>,
) -> Result<Response, AppError> {
    let detail = state
        .tickets
        .detail(TicketRef::parse(&id_or_code), query.date, viewer)
        .await?;

    Ok(success(detail, "Ticket retrieved"))
}

/// Every verified attempt is answered with 200; the outcome is in the body.
pub async fn redeem_scan(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ScanBody>,
) -> Result<Response, AppError> {
    let outcome = state.scans.redeem(&body.token).await?;
    Ok(success(outcome, "Scan processed"))
}
