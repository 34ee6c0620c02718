//! The reservation and entitlement engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use crate::store::Store;
use crate::utils::clock::{local_date, Clock};

pub mod capacity;
pub mod courtesy;
pub mod discounts;
pub mod entitlements;
pub mod orders;
pub mod payments;
pub mod qr;
pub mod scans;

pub use courtesy::CourtesyService;
pub use discounts::DiscountService;
pub use entitlements::TicketService;
pub use orders::OrderService;
pub use payments::PaymentSignatureVerifier;
pub use qr::{HmacQrSigner, QrSigner};
pub use scans::ScanService;

/// What every service needs: the store, a clock, the transaction budget
/// and the venue's UTC offset.
#[derive(Clone)]
pub struct ServiceContext {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub tx_timeout: Duration,
    pub utc_offset: FixedOffset,
}

impl ServiceContext {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        tx_timeout: Duration,
        utc_offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            clock,
            tx_timeout,
            utc_offset,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        local_date(self.clock.now(), self.utc_offset)
    }
}
