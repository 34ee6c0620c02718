//! Persistence seam for the reservation and entitlement engine.
//!
//! Every write path runs inside one [`StoreTx`]. Rows a decision depends on
//! are read through the `lock_*` methods, which hold a row lock until the
//! transaction ends, so concurrent buyers serialize on the rows they share.
//! Dropping a transaction without calling [`StoreTx::commit`] rolls it back.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::{
    CourtesyBatch, CourtesyTicket, DiscountCode, DiscountUsage, Event, Order, OrderItem,
    OrderStatus, Scan, Ticket, TicketDayEntitlement, TicketType,
};
use crate::utils::error::AppError;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// A ticket together with the rows needed to evaluate its entitlements.
#[derive(Debug, Clone)]
pub struct TicketContext {
    pub ticket: Ticket,
    pub event: Event,
    pub ticket_type: TicketType,
}

#[derive(Debug, Clone)]
pub struct CourtesyContext {
    pub courtesy: CourtesyTicket,
    pub batch: CourtesyBatch,
    pub event: Event,
    pub ticket_type: TicketType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketRef {
    Id(Uuid),
    Code(String),
}

impl TicketRef {
    /// Path segments that parse as UUIDs are ids, anything else is a ticket code.
    pub fn parse(raw: &str) -> Self {
        match Uuid::parse_str(raw.trim()) {
            Ok(id) => TicketRef::Id(id),
            Err(_) => TicketRef::Code(raw.trim().to_uppercase()),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError>;

    async fn discount_code(&self, id: Uuid) -> Result<Option<DiscountCode>, AppError>;

    /// Usages of a code, either globally or for one user.
    async fn count_discount_usages(
        &self,
        code_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<i64, AppError>;

    /// Plain read, no lock. `code` must already be normalized.
    async fn courtesy_by_code(&self, code: &str) -> Result<Option<CourtesyContext>, AppError>;
}

#[async_trait]
pub trait StoreTx: Send {
    async fn lock_ticket_type(&mut self, id: Uuid) -> Result<Option<TicketType>, AppError>;

    async fn increment_sold(&mut self, id: Uuid, quantity: i32) -> Result<(), AppError>;

    async fn lock_discount_code(&mut self, id: Uuid) -> Result<Option<DiscountCode>, AppError>;

    async fn count_discount_usages(
        &mut self,
        code_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<i64, AppError>;

    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> Result<(), AppError>;

    async fn insert_discount_usage(&mut self, usage: &DiscountUsage) -> Result<(), AppError>;

    async fn lock_order(&mut self, id: Uuid) -> Result<Option<Order>, AppError>;

    async fn order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>, AppError>;

    async fn set_order_status(
        &mut self,
        id: Uuid,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<(), AppError>;

    async fn tickets_for_order(&mut self, order_id: Uuid) -> Result<Vec<Ticket>, AppError>;

    async fn find_ticket(&mut self, reference: &TicketRef)
        -> Result<Option<TicketContext>, AppError>;

    async fn lock_ticket(&mut self, id: Uuid) -> Result<Option<TicketContext>, AppError>;

    /// `code` must already be normalized.
    async fn lock_courtesy_by_code(
        &mut self,
        code: &str,
    ) -> Result<Option<CourtesyContext>, AppError>;

    /// Transitions PENDING -> CLAIMED. Returns `false` if the row was no
    /// longer PENDING.
    async fn mark_courtesy_claimed(
        &mut self,
        id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
        ticket_id: Uuid,
    ) -> Result<bool, AppError>;

    /// Ordered by date.
    async fn entitlements(&mut self, ticket_id: Uuid)
        -> Result<Vec<TicketDayEntitlement>, AppError>;

    /// Insert-or-ignore on `(ticket_id, date)`. Returns the number of new rows.
    async fn insert_entitlements(&mut self, rows: &[TicketDayEntitlement])
        -> Result<u64, AppError>;

    /// Upserts the day as USED. An existing `used_at` is never overwritten.
    async fn mark_entitlement_used(
        &mut self,
        ticket_id: Uuid,
        date: NaiveDate,
        used_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn valid_scans(&mut self, ticket_id: Uuid) -> Result<Vec<Scan>, AppError>;

    async fn scan_count(&mut self, ticket_id: Uuid) -> Result<i64, AppError>;

    async fn insert_scan(&mut self, scan: &Scan) -> Result<(), AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}

/// Runs `work` under a wall-clock budget. When the budget runs out the
/// future is dropped mid-flight, which drops its transaction and rolls it back.
pub async fn with_timeout<T, F>(budget: Duration, work: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(budget, work).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout),
    }
}
