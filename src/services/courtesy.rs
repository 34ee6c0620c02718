//! Courtesy claim coordinator.
//!
//! A claim turns one PENDING courtesy ticket into a zero-amount PAID order
//! and an ACTIVE ticket. Validity is re-read under the row lock, and the
//! status update is guarded on PENDING, so a code can be claimed at most once.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::types::Json;
use tracing::info;
use uuid::Uuid;

use crate::models::{
    Attendee, CourtesyStatus, CourtesyTicket, Order, OrderItem, OrderProvider, OrderStatus,
    Ticket, TicketStatus,
};
use crate::services::ServiceContext;
use crate::store::{with_timeout, CourtesyContext};
use crate::utils::error::{AppError, Rejection};

#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub code: String,
    pub user_id: Uuid,
    pub attendee_name: Option<String>,
    pub attendee_dni: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventSummary {
    pub id: Uuid,
    pub title: String,
    pub location: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourtesyPreview {
    pub valid: bool,
    pub reason: Option<String>,
    pub event: EventSummary,
    pub ticket_type_name: String,
    pub has_assigned_attendee: bool,
    pub assigned_name: Option<String>,
    pub masked_dni: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimedCourtesy {
    pub ticket_id: Uuid,
    pub ticket_code: String,
    pub order_id: Uuid,
    pub event_title: String,
    pub ticket_type_name: String,
    pub attendee_name: String,
    pub attendee_dni: String,
}

/// The predicate shared by preview and claim.
pub fn check_claimable(courtesy: &CourtesyTicket, now: DateTime<Utc>) -> Result<(), Rejection> {
    match courtesy.status {
        CourtesyStatus::Claimed => Err(Rejection::CourtesyAlreadyClaimed),
        CourtesyStatus::Expired => Err(Rejection::CourtesyExpired),
        CourtesyStatus::Pending if courtesy.is_expired(now) => Err(Rejection::CourtesyExpired),
        CourtesyStatus::Pending => Ok(()),
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Pre-assigned identity wins field by field over what the caller sent.
pub fn resolve_attendee(
    courtesy: &CourtesyTicket,
    name: Option<&str>,
    dni: Option<&str>,
) -> Result<Attendee, Rejection> {
    let name = non_blank(courtesy.assigned_name.as_deref()).or_else(|| non_blank(name));
    let dni = non_blank(courtesy.assigned_dni.as_deref()).or_else(|| non_blank(dni));

    match (name, dni) {
        (Some(name), Some(dni)) => Ok(Attendee { name, dni }),
        _ => Err(Rejection::MissingAttendee),
    }
}

/// Keeps the last three characters: `"45678912"` -> `"*****912"`.
pub fn mask_document(dni: &str) -> String {
    let chars: Vec<char> = dni.trim().chars().collect();
    let visible = chars.len().min(3);
    let hidden = chars.len() - visible;
    let tail: String = chars[hidden..].iter().collect();
    format!("{}{}", "*".repeat(hidden), tail)
}

#[derive(Clone)]
pub struct CourtesyService {
    ctx: ServiceContext,
}

impl CourtesyService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Read-only look at a code. Never mutates, opens no transaction.
    pub async fn verify(&self, code: &str) -> Result<CourtesyPreview, AppError> {
        let code = CourtesyTicket::normalize_code(code);
        let context = self
            .ctx
            .store
            .courtesy_by_code(&code)
            .await?
            .ok_or_else(|| AppError::NotFound("courtesy code not found".to_string()))?;

        let verdict = check_claimable(&context.courtesy, self.ctx.now());
        let CourtesyContext {
            courtesy,
            event,
            ticket_type,
            ..
        } = context;

        Ok(CourtesyPreview {
            valid: verdict.is_ok(),
            reason: verdict.err().map(|rejection| rejection.to_string()),
            has_assigned_attendee: courtesy.has_assigned_attendee(),
            assigned_name: non_blank(courtesy.assigned_name.as_deref()),
            masked_dni: non_blank(courtesy.assigned_dni.as_deref()).map(|dni| mask_document(&dni)),
            event: EventSummary {
                id: event.id,
                title: event.title,
                location: event.location,
                start_date: event.start_date,
                end_date: event.end_date,
            },
            ticket_type_name: ticket_type.name,
        })
    }

    pub async fn claim(&self, request: ClaimRequest) -> Result<ClaimedCourtesy, AppError> {
        if request.code.trim().is_empty() {
            return Err(AppError::ValidationError("claim code is required".to_string()));
        }
        with_timeout(self.ctx.tx_timeout, self.claim_tx(request)).await
    }

    async fn claim_tx(&self, request: ClaimRequest) -> Result<ClaimedCourtesy, AppError> {
        let now = self.ctx.now();
        let code = CourtesyTicket::normalize_code(&request.code);
        let mut tx = self.ctx.store.begin().await?;

        let CourtesyContext {
            courtesy,
            batch,
            event,
            ticket_type,
        } = tx
            .lock_courtesy_by_code(&code)
            .await?
            .ok_or_else(|| AppError::NotFound("courtesy code not found".to_string()))?;

        check_claimable(&courtesy, now)?;
        let attendee = resolve_attendee(
            &courtesy,
            request.attendee_name.as_deref(),
            request.attendee_dni.as_deref(),
        )?;

        let order = Order {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            event_id: batch.event_id,
            status: OrderStatus::Paid,
            subtotal_amount: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            currency: ticket_type.currency.clone(),
            provider: OrderProvider::Courtesy,
            discount_code_id: None,
            created_at: now,
            updated_at: now,
        };
        let item = OrderItem {
            id: Uuid::new_v4(),
            order_id: order.id,
            ticket_type_id: batch.ticket_type_id,
            quantity: 1,
            unit_price: Decimal::ZERO,
            subtotal: Decimal::ZERO,
            attendees: Json(vec![attendee.clone()]),
        };
        tx.insert_order(&order, std::slice::from_ref(&item)).await?;

        let ticket = Ticket {
            id: Uuid::new_v4(),
            order_id: order.id,
            event_id: batch.event_id,
            ticket_type_id: batch.ticket_type_id,
            user_id: request.user_id,
            ticket_code: Ticket::generate_code(),
            status: TicketStatus::Active,
            attendee_name: attendee.name,
            attendee_dni: attendee.dni,
            created_at: now,
            updated_at: now,
        };
        tx.insert_ticket(&ticket).await?;

        if !tx
            .mark_courtesy_claimed(courtesy.id, request.user_id, now, ticket.id)
            .await?
        {
            return Err(Rejection::CourtesyAlreadyClaimed.into());
        }

        tx.commit().await?;

        info!(
            courtesy_id = %courtesy.id,
            batch = %batch.name,
            ticket_id = %ticket.id,
            user_id = %request.user_id,
            "Courtesy code claimed"
        );

        Ok(ClaimedCourtesy {
            ticket_id: ticket.id,
            ticket_code: ticket.ticket_code,
            order_id: order.id,
            event_title: event.title,
            ticket_type_name: ticket_type.name,
            attendee_name: ticket.attendee_name,
            attendee_dni: ticket.attendee_dni,
        })
    }
}
