//! Fixtures shared by the integration tests: an in-memory store, a pinned
//! clock on Lima time and small builders for catalog rows.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use uuid::Uuid;

use entrada_server::handlers::AppState;
use entrada_server::models::{
    Attendee, CourtesyBatch, CourtesyStatus, CourtesyTicket, DaySchedule, DiscountCode,
    DiscountType, Event, OrderProvider, TicketType,
};
use entrada_server::services::orders::{CreateOrder, LineRequest};
use entrada_server::services::{
    CourtesyService, DiscountService, HmacQrSigner, OrderService, PaymentSignatureVerifier,
    ScanService, ServiceContext, TicketService,
};
use entrada_server::store::InMemoryStore;
use entrada_server::utils::clock::FixedClock;

pub const QR_SECRET: &str = "test-qr-secret";
pub const PAYMENT_SECRET: &str = "test-payment-secret";

pub fn lima() -> FixedOffset {
    FixedOffset::west_opt(5 * 3600).unwrap()
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Noon in Lima on the given day.
pub fn lima_noon(date: NaiveDate) -> DateTime<Utc> {
    lima()
        .from_local_datetime(&date.and_hms_opt(12, 0, 0).unwrap())
        .unwrap()
        .with_timezone(&Utc)
}

pub struct Harness {
    pub store: InMemoryStore,
    pub clock: Arc<FixedClock>,
    pub ctx: ServiceContext,
    pub signer: Arc<HmacQrSigner>,
    pub payments: Arc<PaymentSignatureVerifier>,
}

impl Harness {
    pub fn new(today: NaiveDate) -> Self {
        Self::with_timeout(today, Duration::from_secs(5))
    }

    pub fn with_timeout(today: NaiveDate, tx_timeout: Duration) -> Self {
        let store = InMemoryStore::new();
        let clock = Arc::new(FixedClock::new(lima_noon(today)));
        let ctx = ServiceContext::new(
            Arc::new(store.clone()),
            clock.clone(),
            tx_timeout,
            lima(),
        );
        Self {
            store,
            clock,
            ctx,
            signer: Arc::new(HmacQrSigner::new(QR_SECRET)),
            payments: Arc::new(PaymentSignatureVerifier::new(PAYMENT_SECRET)),
        }
    }

    pub fn set_today(&self, today: NaiveDate) {
        self.clock.set(lima_noon(today));
    }

    pub fn orders(&self) -> OrderService {
        OrderService::new(self.ctx.clone())
    }

    pub fn discounts(&self) -> DiscountService {
        DiscountService::new(self.ctx.clone())
    }

    pub fn courtesy(&self) -> CourtesyService {
        CourtesyService::new(self.ctx.clone())
    }

    pub fn tickets(&self) -> TicketService {
        TicketService::new(self.ctx.clone(), self.signer.clone())
    }

    pub fn scans(&self) -> ScanService {
        ScanService::new(self.ctx.clone(), self.signer.clone())
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.ctx.clone(), self.signer.clone(), self.payments.clone())
    }

    pub async fn event(&self, start: NaiveDate, end: Option<NaiveDate>) -> Event {
        let event = Event {
            id: Uuid::new_v4(),
            title: "Temporada de verano".to_string(),
            location: "Lima".to_string(),
            start_date: start,
            end_date: end,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.insert_event(event.clone()).await;
        event
    }

    pub async fn ticket_type(&self, event: &Event, spec: TicketTypeSpec) -> TicketType {
        let ticket_type = TicketType {
            id: Uuid::new_v4(),
            event_id: event.id,
            name: spec.name.to_string(),
            price: Decimal::from(spec.price),
            currency: "PEN".to_string(),
            capacity: spec.capacity,
            sold: 0,
            is_active: true,
            is_package: spec.package_days.is_some(),
            package_days_count: spec.package_days,
            day_schedule: Json(spec.schedule),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.insert_ticket_type(ticket_type.clone()).await;
        ticket_type
    }

    pub async fn discount_code(&self, code: DiscountCode) -> DiscountCode {
        self.store.insert_discount_code(code.clone()).await;
        code
    }

    /// One PENDING courtesy ticket in a fresh batch.
    pub async fn courtesy_ticket(
        &self,
        event: &Event,
        ticket_type: &TicketType,
        claim_code: &str,
        assigned: Option<(&str, &str)>,
        expires_at: Option<DateTime<Utc>>,
    ) -> CourtesyTicket {
        let batch = CourtesyBatch {
            id: Uuid::new_v4(),
            event_id: event.id,
            ticket_type_id: ticket_type.id,
            name: "Prensa".to_string(),
            quantity: 1,
            created_at: Utc::now(),
        };
        self.store.insert_courtesy_batch(batch.clone()).await;

        let courtesy = CourtesyTicket {
            id: Uuid::new_v4(),
            batch_id: batch.id,
            claim_code: claim_code.to_string(),
            status: CourtesyStatus::Pending,
            assigned_name: assigned.map(|(name, _)| name.to_string()),
            assigned_dni: assigned.map(|(_, dni)| dni.to_string()),
            expires_at,
            claimed_by_user_id: None,
            claimed_at: None,
            ticket_id: None,
            created_at: Utc::now(),
        };
        self.store.insert_courtesy_ticket(courtesy.clone()).await;
        courtesy
    }

    /// Buys `quantity` seats and confirms payment, returning the issued ticket ids.
    pub async fn purchase(
        &self,
        user_id: Uuid,
        event: &Event,
        ticket_type: &TicketType,
        quantity: u32,
    ) -> Vec<Uuid> {
        let receipt = self
            .orders()
            .create_order(order(user_id, event, vec![line(ticket_type, quantity)]))
            .await
            .unwrap();
        self.orders()
            .confirm_payment(receipt.order_id)
            .await
            .unwrap()
            .tickets
            .into_iter()
            .map(|ticket| ticket.id)
            .collect()
    }
}

pub struct TicketTypeSpec {
    pub name: &'static str,
    pub price: i64,
    pub capacity: i32,
    pub package_days: Option<i32>,
    pub schedule: DaySchedule,
}

impl TicketTypeSpec {
    pub fn general(price: i64, capacity: i32) -> Self {
        Self {
            name: "General",
            price,
            capacity,
            package_days: None,
            schedule: DaySchedule::FullRange,
        }
    }
}

pub fn discount(discount_type: DiscountType, value: i64) -> DiscountCode {
    DiscountCode {
        id: Uuid::new_v4(),
        code: "VERANO".to_string(),
        discount_type,
        value: Decimal::from(value),
        event_id: None,
        min_purchase: None,
        max_uses: None,
        max_uses_per_user: None,
        valid_from: None,
        valid_until: None,
        is_active: true,
        created_at: Utc::now(),
    }
}

pub fn line(ticket_type: &TicketType, quantity: u32) -> LineRequest {
    LineRequest {
        ticket_type_id: ticket_type.id,
        quantity,
        attendees: Vec::new(),
    }
}

pub fn attendee(name: &str, dni: &str) -> Attendee {
    Attendee {
        name: name.to_string(),
        dni: dni.to_string(),
    }
}

pub fn order(user_id: Uuid, event: &Event, items: Vec<LineRequest>) -> CreateOrder {
    CreateOrder {
        user_id,
        event_id: event.id,
        items,
        discount_code_id: None,
        provider: OrderProvider::Mock,
    }
}
