use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "courtesy_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CourtesyStatus {
    Pending,
    Claimed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CourtesyBatch {
    pub id: Uuid,
    pub event_id: Uuid,
    pub ticket_type_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CourtesyTicket {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub claim_code: String,
    pub status: CourtesyStatus,
    pub assigned_name: Option<String>,
    pub assigned_dni: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub claimed_by_user_id: Option<Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub ticket_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl CourtesyTicket {
    /// Claim codes are stored upper-cased; lookups go through this.
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    pub fn has_assigned_attendee(&self) -> bool {
        self.assigned_name.as_deref().is_some_and(|n| !n.trim().is_empty())
            || self.assigned_dni.as_deref().is_some_and(|d| !d.trim().is_empty())
    }
}
