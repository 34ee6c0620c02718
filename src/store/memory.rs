//! In-memory [`Store`] for tests.
//!
//! A transaction holds an exclusive lock on the whole state and mutates a
//! staged copy; `commit` swaps the copy in, dropping the transaction throws
//! it away. Transactions are therefore fully serialized, which is the
//! strongest behavior the Postgres row locks promise.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::{
    CourtesyBatch, CourtesyStatus, CourtesyTicket, DiscountCode, DiscountUsage, EntitlementStatus,
    Event, Order, OrderItem, OrderStatus, Scan, ScanResult, Ticket, TicketDayEntitlement,
    TicketType,
};
use crate::store::{CourtesyContext, Store, StoreTx, TicketContext, TicketRef};
use crate::utils::error::AppError;

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub events: HashMap<Uuid, Event>,
    pub ticket_types: HashMap<Uuid, TicketType>,
    pub discount_codes: HashMap<Uuid, DiscountCode>,
    pub discount_usages: Vec<DiscountUsage>,
    pub orders: HashMap<Uuid, Order>,
    pub order_items: Vec<OrderItem>,
    pub tickets: HashMap<Uuid, Ticket>,
    pub entitlements: BTreeMap<(Uuid, NaiveDate), TicketDayEntitlement>,
    pub scans: Vec<Scan>,
    pub courtesy_batches: HashMap<Uuid, CourtesyBatch>,
    pub courtesy_tickets: HashMap<Uuid, CourtesyTicket>,
}

impl MemoryState {
    fn count_usages(&self, code_id: Uuid, user_id: Option<Uuid>) -> i64 {
        self.discount_usages
            .iter()
            .filter(|usage| usage.discount_code_id == code_id)
            .filter(|usage| user_id.map_or(true, |user| usage.user_id == user))
            .count() as i64
    }

    fn courtesy_context(&self, code: &str) -> Result<Option<CourtesyContext>, AppError> {
        let Some(courtesy) = self
            .courtesy_tickets
            .values()
            .find(|ct| ct.claim_code == code)
            .cloned()
        else {
            return Ok(None);
        };

        let batch = lookup(&self.courtesy_batches, courtesy.batch_id, "courtesy batch")?;
        let event = lookup(&self.events, batch.event_id, "event")?;
        let ticket_type = lookup(&self.ticket_types, batch.ticket_type_id, "ticket type")?;

        Ok(Some(CourtesyContext {
            courtesy,
            batch,
            event,
            ticket_type,
        }))
    }

    fn ticket_context(&self, ticket: Ticket) -> Result<TicketContext, AppError> {
        let event = lookup(&self.events, ticket.event_id, "event")?;
        let ticket_type = lookup(&self.ticket_types, ticket.ticket_type_id, "ticket type")?;
        Ok(TicketContext {
            ticket,
            event,
            ticket_type,
        })
    }
}

/// Missing parents are a broken foreign key, the same failure Postgres would report.
fn lookup<T: Clone>(rows: &HashMap<Uuid, T>, id: Uuid, what: &str) -> Result<T, AppError> {
    rows.get(&id)
        .cloned()
        .ok_or_else(|| AppError::InternalServerError(format!("dangling {what} reference {id}")))
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state, for assertions.
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    pub async fn insert_event(&self, event: Event) {
        self.state.lock().await.events.insert(event.id, event);
    }

    pub async fn insert_ticket_type(&self, ticket_type: TicketType) {
        self.state
            .lock()
            .await
            .ticket_types
            .insert(ticket_type.id, ticket_type);
    }

    pub async fn insert_discount_code(&self, code: DiscountCode) {
        self.state.lock().await.discount_codes.insert(code.id, code);
    }

    pub async fn insert_courtesy_batch(&self, batch: CourtesyBatch) {
        self.state
            .lock()
            .await
            .courtesy_batches
            .insert(batch.id, batch);
    }

    pub async fn insert_courtesy_ticket(&self, courtesy: CourtesyTicket) {
        self.state
            .lock()
            .await
            .courtesy_tickets
            .insert(courtesy.id, courtesy);
    }

    /// Appends a scan outside any transaction, as the gate scanner would.
    pub async fn record_scan(&self, scan: Scan) {
        self.state.lock().await.scans.push(scan);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn discount_code(&self, id: Uuid) -> Result<Option<DiscountCode>, AppError> {
        Ok(self.state.lock().await.discount_codes.get(&id).cloned())
    }

    async fn count_discount_usages(
        &self,
        code_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<i64, AppError> {
        Ok(self.state.lock().await.count_usages(code_id, user_id))
    }

    async fn courtesy_by_code(&self, code: &str) -> Result<Option<CourtesyContext>, AppError> {
        self.state.lock().await.courtesy_context(code)
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_ticket_type(&mut self, id: Uuid) -> Result<Option<TicketType>, AppError> {
        Ok(self.staged.ticket_types.get(&id).cloned())
    }

    async fn increment_sold(&mut self, id: Uuid, quantity: i32) -> Result<(), AppError> {
        let ticket_type = self
            .staged
            .ticket_types
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("ticket type {id}")))?;

        let sold = ticket_type.sold + quantity;
        if ticket_type.capacity != 0 && sold > ticket_type.capacity {
            return Err(AppError::InternalServerError(
                "ticket_types_no_oversell check constraint violated".to_string(),
            ));
        }
        ticket_type.sold = sold;
        Ok(())
    }

    async fn lock_discount_code(&mut self, id: Uuid) -> Result<Option<DiscountCode>, AppError> {
        Ok(self.staged.discount_codes.get(&id).cloned())
    }

    async fn count_discount_usages(
        &mut self,
        code_id: Uuid,
        user_id: Option<Uuid>,
    ) -> Result<i64, AppError> {
        Ok(self.staged.count_usages(code_id, user_id))
    }

    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> Result<(), AppError> {
        self.staged.orders.insert(order.id, order.clone());
        self.staged.order_items.extend(items.iter().cloned());
        Ok(())
    }

    async fn insert_discount_usage(&mut self, usage: &DiscountUsage) -> Result<(), AppError> {
        if self
            .staged
            .discount_usages
            .iter()
            .any(|existing| existing.order_id == usage.order_id)
        {
            return Err(AppError::InternalServerError(
                "discount_usages_order_id_key violated".to_string(),
            ));
        }
        self.staged.discount_usages.push(usage.clone());
        Ok(())
    }

    async fn lock_order(&mut self, id: Uuid) -> Result<Option<Order>, AppError> {
        Ok(self.staged.orders.get(&id).cloned())
    }

    async fn order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>, AppError> {
        let mut items: Vec<OrderItem> = self
            .staged
            .order_items
            .iter()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| (item.ticket_type_id, item.id));
        Ok(items)
    }

    async fn set_order_status(
        &mut self,
        id: Uuid,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if let Some(order) = self.staged.orders.get_mut(&id) {
            order.status = status;
            order.updated_at = at;
        }
        Ok(())
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<(), AppError> {
        if self
            .staged
            .tickets
            .values()
            .any(|existing| existing.ticket_code == ticket.ticket_code)
        {
            return Err(AppError::InternalServerError(
                "tickets_ticket_code_key violated".to_string(),
            ));
        }
        self.staged.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn tickets_for_order(&mut self, order_id: Uuid) -> Result<Vec<Ticket>, AppError> {
        let mut tickets: Vec<Ticket> = self
            .staged
            .tickets
            .values()
            .filter(|ticket| ticket.order_id == order_id)
            .cloned()
            .collect();
        tickets.sort_by(|a, b| {
            (a.created_at, &a.ticket_code).cmp(&(b.created_at, &b.ticket_code))
        });
        Ok(tickets)
    }

    async fn find_ticket(
        &mut self,
        reference: &TicketRef,
    ) -> Result<Option<TicketContext>, AppError> {
        let ticket = match reference {
            TicketRef::Id(id) => self.staged.tickets.get(id).cloned(),
            TicketRef::Code(code) => self
                .staged
                .tickets
                .values()
                .find(|ticket| &ticket.ticket_code == code)
                .cloned(),
        };

        match ticket {
            Some(ticket) => self.staged.ticket_context(ticket).map(Some),
            None => Ok(None),
        }
    }

    async fn lock_ticket(&mut self, id: Uuid) -> Result<Option<TicketContext>, AppError> {
        self.find_ticket(&TicketRef::Id(id)).await
    }

    async fn lock_courtesy_by_code(
        &mut self,
        code: &str,
    ) -> Result<Option<CourtesyContext>, AppError> {
        self.staged.courtesy_context(code)
    }

    async fn mark_courtesy_claimed(
        &mut self,
        id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
        ticket_id: Uuid,
    ) -> Result<bool, AppError> {
        match self.staged.courtesy_tickets.get_mut(&id) {
            Some(courtesy) if courtesy.status == CourtesyStatus::Pending => {
                courtesy.status = CourtesyStatus::Claimed;
                courtesy.claimed_by_user_id = Some(user_id);
                courtesy.claimed_at = Some(at);
                courtesy.ticket_id = Some(ticket_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn entitlements(
        &mut self,
        ticket_id: Uuid,
    ) -> Result<Vec<TicketDayEntitlement>, AppError> {
        Ok(self
            .staged
            .entitlements
            .range((ticket_id, NaiveDate::MIN)..=(ticket_id, NaiveDate::MAX))
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn insert_entitlements(
        &mut self,
        rows: &[TicketDayEntitlement],
    ) -> Result<u64, AppError> {
        let mut inserted = 0;
        for row in rows {
            let key = (row.ticket_id, row.date);
            if !self.staged.entitlements.contains_key(&key) {
                self.staged.entitlements.insert(key, row.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn mark_entitlement_used(
        &mut self,
        ticket_id: Uuid,
        date: NaiveDate,
        used_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let row = self
            .staged
            .entitlements
            .entry((ticket_id, date))
            .or_insert_with(|| TicketDayEntitlement::available(ticket_id, date));
        row.status = EntitlementStatus::Used;
        row.used_at = row.used_at.or(Some(used_at));
        Ok(())
    }

    async fn valid_scans(&mut self, ticket_id: Uuid) -> Result<Vec<Scan>, AppError> {
        let mut scans: Vec<Scan> = self
            .staged
            .scans
            .iter()
            .filter(|scan| scan.ticket_id == ticket_id && scan.result == ScanResult::Valid)
            .cloned()
            .collect();
        scans.sort_by_key(|scan| scan.scanned_at);
        Ok(scans)
    }

    async fn scan_count(&mut self, ticket_id: Uuid) -> Result<i64, AppError> {
        Ok(self
            .staged
            .scans
            .iter()
            .filter(|scan| scan.ticket_id == ticket_id)
            .count() as i64)
    }

    async fn insert_scan(&mut self, scan: &Scan) -> Result<(), AppError> {
        self.staged.scans.push(scan.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
