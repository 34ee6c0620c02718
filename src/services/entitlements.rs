//! Entitlement derivation engine.
//!
//! A ticket either owns a fixed number of uses (package) or a concrete set
//! of calendar days (scheduled). Scheduled days are derived once from the
//! ticket type's [`DaySchedule`] and stored as `ticket_day_entitlements`;
//! confirmed scans are then folded into those rows. Scans are the source of
//! truth, the rows are a projection of them and only ever move to USED.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    DaySchedule, EntitlementStatus, Event, Scan, Ticket, TicketDayEntitlement, TicketStatus,
    TicketType,
};
use crate::services::qr::{QrPayload, QrSigner};
use crate::services::ServiceContext;
use crate::store::{with_timeout, StoreTx, TicketContext, TicketRef};
use crate::utils::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitlementShape {
    Package { total_slots: u32 },
    Scheduled(DaySchedule),
}

impl EntitlementShape {
    pub fn of(ticket_type: &TicketType) -> Self {
        if !ticket_type.is_package {
            return EntitlementShape::Scheduled(ticket_type.day_schedule.0.clone());
        }

        let total_slots = match ticket_type.package_days_count {
            Some(count) if count > 0 => count as u32,
            _ => {
                warn!(
                    ticket_type_id = %ticket_type.id,
                    "Package ticket type has no usable day count, granting a single use"
                );
                1
            }
        };
        EntitlementShape::Package { total_slots }
    }
}

/// Calendar days a scheduled ticket admits, sorted and de-duplicated.
pub fn scheduled_dates(schedule: &DaySchedule, event: &Event) -> Vec<NaiveDate> {
    let days: BTreeSet<NaiveDate> = match schedule {
        DaySchedule::ExplicitDates { dates } => dates.iter().copied().collect(),
        DaySchedule::WeekdayRecurrence { weekdays } => event
            .days()
            .filter(|day| weekdays.contains(&day.weekday()))
            .collect(),
        DaySchedule::FullRange => event.days().collect(),
    };
    days.into_iter().collect()
}

/// Earliest confirmed scan per day; this is what reconciliation writes.
pub fn usage_by_day(scans: &[Scan]) -> BTreeMap<NaiveDate, DateTime<Utc>> {
    let mut used: BTreeMap<NaiveDate, DateTime<Utc>> = BTreeMap::new();
    for scan in scans {
        used.entry(scan.date)
            .and_modify(|at| *at = (*at).min(scan.scanned_at))
            .or_insert(scan.scanned_at);
    }
    used
}

/// Next AVAILABLE day at or after `today`; failing that the next entitled
/// day at all; failing that the earliest one.
pub fn select_display_date(rows: &[TicketDayEntitlement], today: NaiveDate) -> Option<NaiveDate> {
    let upcoming = || rows.iter().filter(move |row| row.date >= today);

    upcoming()
        .filter(|row| row.status == EntitlementStatus::Available)
        .map(|row| row.date)
        .min()
        .or_else(|| upcoming().map(|row| row.date).min())
        .or_else(|| rows.iter().map(|row| row.date).min())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryState {
    Valid,
    TicketInactive,
    NotEntitled,
    AlreadyUsed,
    DatePassed,
    OutsideEventRange,
    SlotsExhausted,
}

impl EntryState {
    pub fn describe(self) -> &'static str {
        match self {
            EntryState::Valid => "entry allowed",
            EntryState::TicketInactive => "ticket is not active",
            EntryState::NotEntitled => "ticket is not valid on this date",
            EntryState::AlreadyUsed => "ticket was already used on this date",
            EntryState::DatePassed => "date has already passed",
            EntryState::OutsideEventRange => "date is outside the event dates",
            EntryState::SlotsExhausted => "all package uses have been consumed",
        }
    }
}

/// Whether `date` is usable for entry. Ticket status is checked first so a
/// deactivated ticket never looks like a scheduling issue. A package use
/// covers the whole day, so a day already reconciled as USED is not
/// usable again.
pub fn assess(
    status: TicketStatus,
    shape: &EntitlementShape,
    event: &Event,
    rows: &[TicketDayEntitlement],
    used_slots: u32,
    date: NaiveDate,
    today: NaiveDate,
) -> EntryState {
    if status != TicketStatus::Active {
        return EntryState::TicketInactive;
    }

    match shape {
        EntitlementShape::Package { total_slots } => {
            if !event.contains(date) {
                EntryState::OutsideEventRange
            } else if used_slots >= *total_slots {
                EntryState::SlotsExhausted
            } else if is_used(rows, date) {
                EntryState::AlreadyUsed
            } else if date < today {
                EntryState::DatePassed
            } else {
                EntryState::Valid
            }
        }
        EntitlementShape::Scheduled(_) => match rows.iter().find(|row| row.date == date) {
            None => EntryState::NotEntitled,
            Some(_) if is_used(rows, date) => EntryState::AlreadyUsed,
            Some(_) if date < today => EntryState::DatePassed,
            Some(_) => EntryState::Valid,
        },
    }
}

fn is_used(rows: &[TicketDayEntitlement], date: NaiveDate) -> bool {
    rows.iter()
        .any(|row| row.date == date && row.status == EntitlementStatus::Used)
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entitlements {
    Package {
        total_slots: u32,
        used_slots: u32,
        remaining_slots: u32,
        days: Vec<TicketDayEntitlement>,
    },
    Scheduled {
        days: Vec<TicketDayEntitlement>,
    },
}

/// Materialized and reconciled entitlement rows for one ticket.
#[derive(Debug, Clone)]
pub struct EntitlementLedger {
    pub shape: EntitlementShape,
    pub rows: Vec<TicketDayEntitlement>,
    pub valid_scans: Vec<Scan>,
}

impl EntitlementLedger {
    pub fn used_slots(&self) -> u32 {
        self.valid_scans.len() as u32
    }

    pub fn into_entitlements(self) -> Entitlements {
        match self.shape {
            EntitlementShape::Package { total_slots } => {
                let used_slots = self.valid_scans.len() as u32;
                Entitlements::Package {
                    total_slots,
                    used_slots,
                    remaining_slots: total_slots.saturating_sub(used_slots),
                    days: self.rows,
                }
            }
            EntitlementShape::Scheduled(_) => Entitlements::Scheduled { days: self.rows },
        }
    }
}

/// Derives missing rows (insert-or-ignore) and folds confirmed scans into
/// them. Safe to run any number of times, concurrently or not.
pub async fn materialize(
    tx: &mut dyn StoreTx,
    ticket: &Ticket,
    event: &Event,
    ticket_type: &TicketType,
) -> Result<EntitlementLedger, AppError> {
    let shape = EntitlementShape::of(ticket_type);

    if let EntitlementShape::Scheduled(schedule) = &shape {
        if tx.entitlements(ticket.id).await?.is_empty() {
            let derived: Vec<TicketDayEntitlement> = scheduled_dates(schedule, event)
                .into_iter()
                .map(|date| TicketDayEntitlement::available(ticket.id, date))
                .collect();
            let inserted = tx.insert_entitlements(&derived).await?;
            debug!(ticket_id = %ticket.id, inserted, "Derived day entitlements");
        }
    }

    let valid_scans = tx.valid_scans(ticket.id).await?;
    for (date, used_at) in usage_by_day(&valid_scans) {
        tx.mark_entitlement_used(ticket.id, date, used_at).await?;
    }

    let rows = tx.entitlements(ticket.id).await?;
    Ok(EntitlementLedger {
        shape,
        rows,
        valid_scans,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketDetail {
    pub ticket: Ticket,
    pub event: Event,
    pub ticket_type: TicketType,
    pub entitlements: Entitlements,
    pub scan_count: i64,
    pub display_date: Option<NaiveDate>,
    pub entry: EntryState,
    pub qr: Option<String>,
}

#[derive(Clone)]
pub struct TicketService {
    ctx: ServiceContext,
    signer: Arc<dyn QrSigner>,
}

impl TicketService {
    pub fn new(ctx: ServiceContext, signer: Arc<dyn QrSigner>) -> Self {
        Self { ctx, signer }
    }

    /// Ticket detail, computed fresh: rows are materialized and reconciled on
    /// every call. `viewer` restricts the lookup to the ticket's owner.
    pub async fn detail(
        &self,
        reference: TicketRef,
        requested_date: Option<NaiveDate>,
        viewer: Option<Uuid>,
    ) -> Result<TicketDetail, AppError> {
        let (context, ledger, scan_count) =
            with_timeout(self.ctx.tx_timeout, self.load(reference, viewer)).await?;
        let TicketContext {
            ticket,
            event,
            ticket_type,
        } = context;

        let today = self.ctx.today();
        let display_date = match (&ledger.shape, requested_date) {
            (_, Some(date)) => Some(date),
            (EntitlementShape::Package { .. }, None) => Some(today.max(event.start_date)),
            (EntitlementShape::Scheduled(_), None) => select_display_date(&ledger.rows, today),
        };

        let entry = match display_date {
            Some(date) => assess(
                ticket.status,
                &ledger.shape,
                &event,
                &ledger.rows,
                ledger.used_slots(),
                date,
                today,
            ),
            None if ticket.status != TicketStatus::Active => EntryState::TicketInactive,
            None => EntryState::NotEntitled,
        };

        let qr = match (entry, display_date) {
            (EntryState::Valid, Some(date)) => Some(self.signer.sign(&QrPayload {
                ticket_id: ticket.id,
                event_id: ticket.event_id,
                user_id: ticket.user_id,
                ticket_code: ticket.ticket_code.clone(),
                date,
            })?),
            _ => None,
        };

        Ok(TicketDetail {
            ticket,
            event,
            ticket_type,
            entitlements: ledger.into_entitlements(),
            scan_count,
            display_date,
            entry,
            qr,
        })
    }

    async fn load(
        &self,
        reference: TicketRef,
        viewer: Option<Uuid>,
    ) -> Result<(TicketContext, EntitlementLedger, i64), AppError> {
        let mut tx = self.ctx.store.begin().await?;

        let context = tx
            .find_ticket(&reference)
            .await?
            .filter(|context| viewer.map_or(true, |user| context.ticket.user_id == user))
            .ok_or_else(|| AppError::NotFound("ticket not found".to_string()))?;

        let ledger = materialize(
            tx.as_mut(),
            &context.ticket,
            &context.event,
            &context.ticket_type,
        )
        .await?;
        let scan_count = tx.scan_count(context.ticket.id).await?;
        tx.commit().await?;

        Ok((context, ledger, scan_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use rust_decimal::Decimal;
    use sqlx::types::Json;

    use crate::models::ScanResult;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn event(start: NaiveDate, end: NaiveDate) -> Event {
        Event {
            id: Uuid::new_v4(),
            title: "Temporada de verano".to_string(),
            location: "Lima".to_string(),
            start_date: start,
            end_date: Some(end),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn ticket_type(is_package: bool, count: Option<i32>, schedule: DaySchedule) -> TicketType {
        TicketType {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            name: "Pase".to_string(),
            price: Decimal::from(30),
            currency: "PEN".to_string(),
            capacity: 0,
            sold: 0,
            is_active: true,
            is_package,
            package_days_count: count,
            day_schedule: Json(schedule),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn rows(dates: &[(NaiveDate, EntitlementStatus)]) -> Vec<TicketDayEntitlement> {
        let ticket_id = Uuid::new_v4();
        dates
            .iter()
            .map(|(date, status)| TicketDayEntitlement {
                status: *status,
                ..TicketDayEntitlement::available(ticket_id, *date)
            })
            .collect()
    }

    #[test]
    fn test_weekday_recurrence_over_two_weeks() {
        // Monday 2 March to Sunday 15 March 2026.
        let e = event(day(2026, 3, 2), day(2026, 3, 15));
        let schedule = DaySchedule::WeekdayRecurrence {
            weekdays: vec![Weekday::Tue, Weekday::Thu],
        };
        assert_eq!(
            scheduled_dates(&schedule, &e),
            vec![
                day(2026, 3, 3),
                day(2026, 3, 5),
                day(2026, 3, 10),
                day(2026, 3, 12)
            ]
        );
    }

    #[test]
    fn test_explicit_dates_win_and_are_deduplicated() {
        let e = event(day(2026, 3, 2), day(2026, 3, 15));
        let schedule = DaySchedule::ExplicitDates {
            dates: vec![day(2026, 3, 9), day(2026, 3, 4), day(2026, 3, 9)],
        };
        assert_eq!(
            scheduled_dates(&schedule, &e),
            vec![day(2026, 3, 4), day(2026, 3, 9)]
        );
    }

    #[test]
    fn test_full_range_fallback() {
        let e = event(day(2026, 3, 2), day(2026, 3, 4));
        assert_eq!(scheduled_dates(&DaySchedule::FullRange, &e).len(), 3);
    }

    #[test]
    fn test_shape_of_package_and_scheduled() {
        assert_eq!(
            EntitlementShape::of(&ticket_type(true, Some(8), DaySchedule::FullRange)),
            EntitlementShape::Package { total_slots: 8 }
        );
        assert_eq!(
            EntitlementShape::of(&ticket_type(true, None, DaySchedule::FullRange)),
            EntitlementShape::Package { total_slots: 1 }
        );
        assert_eq!(
            EntitlementShape::of(&ticket_type(false, Some(8), DaySchedule::FullRange)),
            EntitlementShape::Scheduled(DaySchedule::FullRange)
        );
    }

    #[test]
    fn test_display_date_picks_next_available() {
        let r = rows(&[
            (day(2026, 3, 3), EntitlementStatus::Used),
            (day(2026, 3, 5), EntitlementStatus::Used),
            (day(2026, 3, 10), EntitlementStatus::Available),
            (day(2026, 3, 12), EntitlementStatus::Available),
        ]);
        assert_eq!(select_display_date(&r, day(2026, 3, 5)), Some(day(2026, 3, 10)));
        assert_eq!(select_display_date(&r, day(2026, 3, 11)), Some(day(2026, 3, 12)));
    }

    #[test]
    fn test_display_date_wraps_to_earliest_when_all_past() {
        let r = rows(&[
            (day(2026, 3, 3), EntitlementStatus::Available),
            (day(2026, 3, 5), EntitlementStatus::Used),
        ]);
        assert_eq!(select_display_date(&r, day(2026, 4, 1)), Some(day(2026, 3, 3)));
        assert_eq!(select_display_date(&[], day(2026, 4, 1)), None);
    }

    #[test]
    fn test_display_date_shows_used_today_when_nothing_else_left() {
        let r = rows(&[
            (day(2026, 3, 3), EntitlementStatus::Available),
            (day(2026, 3, 5), EntitlementStatus::Used),
        ]);
        assert_eq!(select_display_date(&r, day(2026, 3, 5)), Some(day(2026, 3, 5)));
    }

    #[test]
    fn test_assess_scheduled() {
        let e = event(day(2026, 3, 2), day(2026, 3, 15));
        let shape = EntitlementShape::Scheduled(DaySchedule::FullRange);
        let r = rows(&[
            (day(2026, 3, 3), EntitlementStatus::Used),
            (day(2026, 3, 5), EntitlementStatus::Available),
        ]);
        let today = day(2026, 3, 4);
        let check = |date| assess(TicketStatus::Active, &shape, &e, &r, 0, date, today);

        assert_eq!(check(day(2026, 3, 5)), EntryState::Valid);
        assert_eq!(check(day(2026, 3, 3)), EntryState::AlreadyUsed);
        assert_eq!(check(day(2026, 3, 4)), EntryState::NotEntitled);
        assert_eq!(
            assess(TicketStatus::Cancelled, &shape, &e, &r, 0, day(2026, 3, 5), today),
            EntryState::TicketInactive
        );
    }

    #[test]
    fn test_assess_package() {
        let e = event(day(2026, 3, 2), day(2026, 3, 15));
        let shape = EntitlementShape::Package { total_slots: 2 };
        let today = day(2026, 3, 4);

        assert_eq!(
            assess(TicketStatus::Active, &shape, &e, &[], 1, today, today),
            EntryState::Valid
        );
        assert_eq!(
            assess(TicketStatus::Active, &shape, &e, &[], 2, today, today),
            EntryState::SlotsExhausted
        );
        assert_eq!(
            assess(TicketStatus::Active, &shape, &e, &[], 0, day(2026, 4, 1), today),
            EntryState::OutsideEventRange
        );

        let used_today = rows(&[(today, EntitlementStatus::Used)]);
        assert_eq!(
            assess(TicketStatus::Active, &shape, &e, &used_today, 1, today, today),
            EntryState::AlreadyUsed
        );
        assert_eq!(
            assess(TicketStatus::Active, &shape, &e, &used_today, 1, day(2026, 3, 5), today),
            EntryState::Valid
        );
    }

    #[test]
    fn test_usage_by_day_keeps_earliest_scan() {
        let ticket_id = Uuid::new_v4();
        let early = Utc::now() - chrono::Duration::hours(2);
        let late = Utc::now();
        let scan = |at| Scan {
            id: Uuid::new_v4(),
            ticket_id,
            result: ScanResult::Valid,
            date: day(2026, 3, 3),
            reason: None,
            scanned_at: at,
        };
        let used = usage_by_day(&[scan(late), scan(early)]);
        assert_eq!(used.len(), 1);
        assert_eq!(used[&day(2026, 3, 3)], early);
    }
}
