use axum::extract::{Path, State};
use axum::response::Response;
use serde::Deserialize;

use crate::handlers::{ApiJson, AppState, BuyerId};
use crate::services::courtesy::ClaimRequest;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

#[derive(Debug, Default, Deserialize)]
pub struct ClaimBody {
    pub attendee_name: Option<String>,
    pub attendee_dni: Option<String>,
}

pub async fn verify_courtesy(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, AppError> {
    let preview = state.courtesy.verify(&code).await?;
    Ok(success(preview, "Courtesy code found"))
}

pub async fn claim_courtesy(
    State(state): State<AppState>,
    BuyerId(user_id): BuyerId,
    Path(code): Path<String>,
    body: Option<ApiJson<ClaimBody>>,
) -> Result<Response, AppError> {
    let body = body.map(|ApiJson(body)| body).unwrap_or_default();
    let claimed = state
        .courtesy
        .claim(ClaimRequest {
            code,
            user_id,
            attendee_name: body.attendee_name,
            attendee_dni: body.attendee_dni,
        })
        .await?;

    Ok(created(claimed, "Courtesy ticket claimed"))
}
