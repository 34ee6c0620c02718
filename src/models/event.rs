use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub location: String,
    pub start_date: NaiveDate,
    /// Single-day events leave this empty.
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn last_date(&self) -> NaiveDate {
        self.end_date
            .filter(|end| *end >= self.start_date)
            .unwrap_or(self.start_date)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.last_date()
    }

    /// Every calendar day from the first to the last day of the event.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let last = self.last_date();
        self.start_date.iter_days().take_while(move |day| *day <= last)
    }
}
