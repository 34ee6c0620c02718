use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "discount_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DiscountCode {
    pub id: Uuid,
    pub code: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    /// Restricts the code to a single event when set.
    pub event_id: Option<Uuid>,
    pub min_purchase: Option<Decimal>,
    pub max_uses: Option<i32>,
    pub max_uses_per_user: Option<i32>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DiscountUsage {
    pub id: Uuid,
    pub discount_code_id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub amount_saved: Decimal,
    pub created_at: DateTime<Utc>,
}
