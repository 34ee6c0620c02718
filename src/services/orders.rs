//! Order transaction coordinator.
//!
//! `create_order` turns a cart into a PENDING order inside one transaction:
//! discount checks, per-line capacity reservation, pricing, persistence. Any
//! rejection drops the transaction, taking every `sold` increment with it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use tracing::info;
use uuid::Uuid;

use crate::models::{
    Attendee, DiscountUsage, Order, OrderItem, OrderProvider, OrderStatus, Ticket, TicketStatus,
};
use crate::services::capacity;
use crate::services::discounts::{self, DiscountRejection, DiscountSnapshot};
use crate::services::ServiceContext;
use crate::store::with_timeout;
use crate::utils::error::{AppError, Rejection};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineRequest {
    pub ticket_type_id: Uuid,
    pub quantity: u32,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
}

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub items: Vec<LineRequest>,
    pub discount_code_id: Option<Uuid>,
    pub provider: OrderProvider,
}

impl CreateOrder {
    /// Shape checks that need no database access.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.items.is_empty() {
            return Err(AppError::ValidationError(
                "an order needs at least one item".to_string(),
            ));
        }
        if self.provider == OrderProvider::Courtesy {
            return Err(AppError::ValidationError(
                "courtesy orders are created by claiming a code".to_string(),
            ));
        }
        for item in &self.items {
            if item.quantity == 0 {
                return Err(AppError::ValidationError(format!(
                    "quantity for ticket type {} must be at least 1",
                    item.ticket_type_id
                )));
            }
            if item.attendees.len() > item.quantity as usize {
                return Err(AppError::ValidationError(format!(
                    "ticket type {} has more attendees than seats",
                    item.ticket_type_id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderReceipt {
    pub order_id: Uuid,
    pub subtotal_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentConfirmation {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub tickets: Vec<Ticket>,
}

#[derive(Clone)]
pub struct OrderService {
    ctx: ServiceContext,
}

impl OrderService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn create_order(&self, request: CreateOrder) -> Result<OrderReceipt, AppError> {
        request.validate()?;
        with_timeout(self.ctx.tx_timeout, self.create_order_tx(request)).await
    }

    async fn create_order_tx(&self, request: CreateOrder) -> Result<OrderReceipt, AppError> {
        let now = self.ctx.now();
        let mut tx = self.ctx.store.begin().await?;

        // The code row stays locked until commit, so concurrent redemptions
        // of the same code count usages one at a time.
        let discount = match request.discount_code_id {
            Some(code_id) => {
                let code = tx
                    .lock_discount_code(code_id)
                    .await?
                    .ok_or(Rejection::Discount(DiscountRejection::NotFound))?;
                let snapshot = DiscountSnapshot {
                    total_uses: tx.count_discount_usages(code.id, None).await?,
                    user_uses: tx
                        .count_discount_usages(code.id, Some(request.user_id))
                        .await?,
                    code,
                };
                discounts::check_eligibility(&snapshot, request.event_id, now)
                    .map_err(Rejection::Discount)?;
                Some(snapshot.code)
            }
            None => None,
        };

        // Lock rows in id order so two multi-line carts cannot deadlock.
        let mut lines = request.items;
        lines.sort_by_key(|line| line.ticket_type_id);

        let order_id = Uuid::new_v4();
        let mut currency: Option<String> = None;
        let mut subtotal = Decimal::ZERO;
        let mut items = Vec::with_capacity(lines.len());

        for line in lines {
            let ticket_type =
                capacity::reserve(tx.as_mut(), request.event_id, line.ticket_type_id, line.quantity)
                    .await?;

            match &currency {
                Some(existing) if *existing != ticket_type.currency => {
                    return Err(AppError::ValidationError(
                        "all ticket types in an order must share a currency".to_string(),
                    ));
                }
                Some(_) => {}
                None => currency = Some(ticket_type.currency.clone()),
            }

            let line_subtotal = ticket_type.price * Decimal::from(line.quantity);
            subtotal += line_subtotal;

            items.push(OrderItem {
                id: Uuid::new_v4(),
                order_id,
                ticket_type_id: ticket_type.id,
                quantity: line.quantity as i32,
                unit_price: ticket_type.price,
                subtotal: line_subtotal,
                attendees: Json(line.attendees),
            });
        }

        let applied = match &discount {
            Some(code) => Some(discounts::apply(code, subtotal).map_err(Rejection::Discount)?),
            None => None,
        };
        let discount_amount = applied.map_or(Decimal::ZERO, |a| a.discount_amount);
        let total_amount = applied.map_or(subtotal, |a| a.final_amount);
        let currency = currency.unwrap_or_default();

        let order = Order {
            id: order_id,
            user_id: request.user_id,
            event_id: request.event_id,
            status: OrderStatus::Pending,
            subtotal_amount: subtotal,
            discount_amount,
            total_amount,
            currency: currency.clone(),
            provider: request.provider,
            discount_code_id: discount.as_ref().map(|code| code.id),
            created_at: now,
            updated_at: now,
        };
        tx.insert_order(&order, &items).await?;

        if let Some(code) = &discount {
            tx.insert_discount_usage(&DiscountUsage {
                id: Uuid::new_v4(),
                discount_code_id: code.id,
                user_id: request.user_id,
                order_id,
                amount_saved: discount_amount,
                created_at: now,
            })
            .await?;
        }

        tx.commit().await?;

        info!(
            order_id = %order_id,
            user_id = %request.user_id,
            event_id = %request.event_id,
            %subtotal,
            %discount_amount,
            %total_amount,
            "Order created"
        );

        Ok(OrderReceipt {
            order_id,
            subtotal_amount: subtotal,
            discount_amount,
            total_amount,
            currency,
        })
    }

    /// Applies an external payment confirmation: PENDING -> PAID plus one
    /// ticket per seat. Repeating it for a PAID order returns the same tickets.
    pub async fn confirm_payment(&self, order_id: Uuid) -> Result<PaymentConfirmation, AppError> {
        with_timeout(self.ctx.tx_timeout, self.confirm_payment_tx(order_id)).await
    }

    async fn confirm_payment_tx(&self, order_id: Uuid) -> Result<PaymentConfirmation, AppError> {
        let now = self.ctx.now();
        let mut tx = self.ctx.store.begin().await?;

        let order = tx
            .lock_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))?;

        match order.status {
            OrderStatus::Paid => {
                let tickets = tx.tickets_for_order(order_id).await?;
                return Ok(PaymentConfirmation {
                    order_id,
                    status: OrderStatus::Paid,
                    tickets,
                });
            }
            OrderStatus::Pending => {}
            other => {
                return Err(Rejection::OrderNotConfirmable {
                    status: format!("{other:?}").to_uppercase(),
                }
                .into());
            }
        }

        let mut tickets = Vec::new();
        for item in tx.order_items(order_id).await? {
            for seat in 0..item.quantity.max(0) as usize {
                let attendee = item.attendees.0.get(seat).cloned().unwrap_or_default();
                let ticket = Ticket {
                    id: Uuid::new_v4(),
                    order_id,
                    event_id: order.event_id,
                    ticket_type_id: item.ticket_type_id,
                    user_id: order.user_id,
                    ticket_code: Ticket::generate_code(),
                    status: TicketStatus::Active,
                    attendee_name: attendee.name,
                    attendee_dni: attendee.dni,
                    created_at: now,
                    updated_at: now,
                };
                tx.insert_ticket(&ticket).await?;
                tickets.push(ticket);
            }
        }

        tx.set_order_status(order_id, OrderStatus::Paid, now).await?;
        tx.commit().await?;

        info!(
            order_id = %order_id,
            tickets = tickets.len(),
            "Payment confirmed, tickets issued"
        );

        Ok(PaymentConfirmation {
            order_id,
            status: OrderStatus::Paid,
            tickets,
        })
    }
}
