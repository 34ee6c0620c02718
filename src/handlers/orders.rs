use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::handlers::{ApiJson, AppState, BuyerId, PAYMENT_SIGNATURE_HEADER};
use crate::models::OrderProvider;
use crate::services::orders::{CreateOrder, LineRequest};
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    pub event_id: Uuid,
    pub items: Vec<LineRequest>,
    pub discount_code_id: Option<Uuid>,
    pub provider: Option<OrderProvider>,
}

#[derive(Debug, Deserialize)]
pub struct DiscountPreviewBody {
    pub discount_code_id: Uuid,
    pub event_id: Uuid,
    pub subtotal: Decimal,
}

pub async fn create_order(
    State(state): State<AppState>,
    BuyerId(user_id): BuyerId,
    ApiJson(body): ApiJson<CreateOrderBody>,
) -> Result<Response, AppError> {
    let receipt = state
        .orders
        .create_order(CreateOrder {
            user_id,
            event_id: body.event_id,
            items: body.items,
            discount_code_id: body.discount_code_id,
            provider: body.provider.unwrap_or(OrderProvider::Mock),
        })
        .await?;

    Ok(created(receipt, "Order created"))
}

/// Called by the payment collaborator once the charge has settled. The
/// request must carry the collaborator's signature over the order id.
pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let signature = headers
        .get(PAYMENT_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::AuthError("payment signature required".to_string()))?;

    if !state.payments.verify(order_id, signature) {
        warn!(order_id = %order_id, "Rejected payment confirmation with a bad signature");
        return Err(AppError::AuthError("invalid payment signature".to_string()));
    }

    let confirmation = state.orders.confirm_payment(order_id).await?;
    Ok(success(confirmation, "Payment confirmed"))
}

pub async fn preview_discount(
    State(state): State<AppState>,
    BuyerId(user_id): BuyerId,
    ApiJson(body): ApiJson<DiscountPreviewBody>,
) -> Result<Response, AppError> {
    let applied = state
        .discounts
        .preview(body.discount_code_id, user_id, body.event_id, body.subtotal)
        .await?;

    Ok(success(applied, "Discount applies"))
}
