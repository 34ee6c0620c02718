use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::request::Parts;
use axum::response::Response;
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::services::{
    CourtesyService, DiscountService, OrderService, PaymentSignatureVerifier, QrSigner,
    ScanService, ServiceContext, TicketService,
};
use crate::utils::error::AppError;
use crate::utils::response::success;

pub mod courtesy;
pub mod orders;
pub mod tickets;

pub use courtesy::{claim_courtesy, verify_courtesy};
pub use orders::{confirm_payment, create_order, preview_discount};
pub use tickets::{redeem_scan, ticket_detail};

/// Set by the upstream session layer once the buyer is authenticated.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Set by the payment collaborator on settlement callbacks.
pub const PAYMENT_SIGNATURE_HEADER: &str = "x-payment-signature";

#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService,
    pub discounts: DiscountService,
    pub courtesy: CourtesyService,
    pub tickets: TicketService,
    pub scans: ScanService,
    pub payments: Arc<PaymentSignatureVerifier>,
}

impl AppState {
    pub fn new(
        ctx: ServiceContext,
        signer: Arc<dyn QrSigner>,
        payments: Arc<PaymentSignatureVerifier>,
    ) -> Self {
        Self {
            orders: OrderService::new(ctx.clone()),
            discounts: DiscountService::new(ctx.clone()),
            courtesy: CourtesyService::new(ctx.clone()),
            tickets: TicketService::new(ctx.clone(), signer.clone()),
            scans: ScanService::new(ctx, signer),
            payments,
        }
    }
}

/// The authenticated buyer, taken from [`USER_ID_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuyerId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for BuyerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::AuthError("authentication required".to_string()))?;

        raw.to_str()
            .ok()
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .map(BuyerId)
            .ok_or_else(|| AppError::AuthError("invalid buyer identity".to_string()))
    }
}

/// Buyer identity that may be absent. A header that is present but malformed
/// is still rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionalBuyerId(pub Option<Uuid>);

#[async_trait]
impl<S> FromRequestParts<S> for OptionalBuyerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if !parts.headers.contains_key(USER_ID_HEADER) {
            return Ok(OptionalBuyerId(None));
        }
        let BuyerId(id) = BuyerId::from_request_parts(parts, state).await?;
        Ok(OptionalBuyerId(Some(id)))
    }
}

/// `Json` whose rejections answer in the API's error envelope (400).
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| ApiJson(value))
            .map_err(|rejection| AppError::ValidationError(rejection.body_text()))
    }
}

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "entrada-api",
    };

    success(payload, "Health check successful")
}
