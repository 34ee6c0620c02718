//! Gate-side redemption of QR credentials.
//!
//! Every attempt on a known ticket is recorded as a [`Scan`], valid or not.
//! A VALID scan marks the day's entitlement USED in the same transaction.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Scan, ScanResult, Ticket};
use crate::services::entitlements::{self, EntryState};
use crate::services::qr::{QrPayload, QrSigner};
use crate::services::ServiceContext;
use crate::store::{with_timeout, TicketContext};
use crate::utils::error::AppError;

#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub scan_id: Uuid,
    pub ticket_id: Uuid,
    pub result: ScanResult,
    pub reason: Option<String>,
    pub date: NaiveDate,
    pub attendee_name: String,
    pub ticket_type_name: String,
}

fn payload_matches(payload: &QrPayload, ticket: &Ticket) -> bool {
    payload.ticket_code == ticket.ticket_code
        && payload.event_id == ticket.event_id
        && payload.user_id == ticket.user_id
}

fn scan_result(entry: EntryState) -> ScanResult {
    match entry {
        EntryState::Valid => ScanResult::Valid,
        EntryState::AlreadyUsed | EntryState::SlotsExhausted => ScanResult::AlreadyUsed,
        EntryState::TicketInactive
        | EntryState::NotEntitled
        | EntryState::DatePassed
        | EntryState::OutsideEventRange => ScanResult::Invalid,
    }
}

#[derive(Clone)]
pub struct ScanService {
    ctx: ServiceContext,
    signer: Arc<dyn QrSigner>,
}

impl ScanService {
    pub fn new(ctx: ServiceContext, signer: Arc<dyn QrSigner>) -> Self {
        Self { ctx, signer }
    }

    /// Tokens that fail verification are refused without a scan record,
    /// since nothing in them can be trusted to name a ticket.
    pub async fn redeem(&self, token: &str) -> Result<ScanOutcome, AppError> {
        let payload = self.signer.verify(token).map_err(|e| {
            warn!(error = %e, "Rejected QR token");
            AppError::ValidationError(e.to_string())
        })?;
        with_timeout(self.ctx.tx_timeout, self.redeem_tx(payload)).await
    }

    async fn redeem_tx(&self, payload: QrPayload) -> Result<ScanOutcome, AppError> {
        let now = self.ctx.now();
        let today = self.ctx.today();
        let mut tx = self.ctx.store.begin().await?;

        let TicketContext {
            ticket,
            event,
            ticket_type,
        } = tx
            .lock_ticket(payload.ticket_id)
            .await?
            .ok_or_else(|| AppError::NotFound("ticket not found".to_string()))?;

        let ledger = entitlements::materialize(tx.as_mut(), &ticket, &event, &ticket_type).await?;

        let (result, reason) = if !payload_matches(&payload, &ticket) {
            (ScanResult::Invalid, Some("QR does not belong to this ticket".to_string()))
        } else if payload.date != today {
            (ScanResult::WrongDate, Some(format!("QR is for {}", payload.date)))
        } else {
            let entry = entitlements::assess(
                ticket.status,
                &ledger.shape,
                &event,
                &ledger.rows,
                ledger.used_slots(),
                today,
                today,
            );
            let reason = (entry != EntryState::Valid).then(|| entry.describe().to_string());
            (scan_result(entry), reason)
        };

        let scan = Scan {
            id: Uuid::new_v4(),
            ticket_id: ticket.id,
            result,
            date: today,
            reason: reason.clone(),
            scanned_at: now,
        };
        tx.insert_scan(&scan).await?;
        if result == ScanResult::Valid {
            tx.mark_entitlement_used(ticket.id, today, now).await?;
        }
        tx.commit().await?;

        info!(
            ticket_id = %ticket.id,
            result = ?result,
            date = %today,
            "Scan recorded"
        );

        Ok(ScanOutcome {
            scan_id: scan.id,
            ticket_id: ticket.id,
            result,
            reason,
            date: today,
            attendee_name: ticket.attendee_name,
            ticket_type_name: ticket_type.name,
        })
    }
}
