use chrono::{DateTime, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Which calendar days a scheduled ticket type admits entry on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DaySchedule {
    ExplicitDates { dates: Vec<NaiveDate> },
    WeekdayRecurrence { weekdays: Vec<Weekday> },
    FullRange,
}

impl Default for DaySchedule {
    fn default() -> Self {
        DaySchedule::FullRange
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketType {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub currency: String,
    /// Zero means unlimited.
    pub capacity: i32,
    pub sold: i32,
    pub is_active: bool,
    pub is_package: bool,
    pub package_days_count: Option<i32>,
    pub day_schedule: Json<DaySchedule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
