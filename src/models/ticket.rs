use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Active,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub order_id: Uuid,
    pub event_id: Uuid,
    pub ticket_type_id: Uuid,
    pub user_id: Uuid,
    pub ticket_code: String,
    pub status: TicketStatus,
    pub attendee_name: String,
    pub attendee_dni: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Opaque, human-typable code printed on the ticket.
    pub fn generate_code() -> String {
        let raw = Uuid::new_v4().simple().to_string().to_uppercase();
        format!("TK-{}", &raw[..12])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entitlement_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntitlementStatus {
    Available,
    Used,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TicketDayEntitlement {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub date: NaiveDate,
    pub status: EntitlementStatus,
    pub used_at: Option<DateTime<Utc>>,
}

impl TicketDayEntitlement {
    pub fn available(ticket_id: Uuid, date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            date,
            status: EntitlementStatus::Available,
            used_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "scan_result", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanResult {
    Valid,
    Invalid,
    AlreadyUsed,
    WrongDate,
}

/// Append-only record of a redemption attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Scan {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub result: ScanResult,
    pub date: NaiveDate,
    pub reason: Option<String>,
    pub scanned_at: DateTime<Utc>,
}
