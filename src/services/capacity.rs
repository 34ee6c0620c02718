//! Capacity ledger: the only code that moves `TicketType::sold`.

use uuid::Uuid;

use crate::models::TicketType;
use crate::store::StoreTx;
use crate::utils::error::{AppError, Rejection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Unlimited,
    Remaining(u32),
}

impl Availability {
    pub fn of(ticket_type: &TicketType) -> Self {
        if ticket_type.capacity == 0 {
            return Availability::Unlimited;
        }
        let remaining = (ticket_type.capacity - ticket_type.sold).max(0);
        Availability::Remaining(u32::try_from(remaining).unwrap_or(0))
    }

    pub fn admits(self, quantity: u32) -> bool {
        match self {
            Availability::Unlimited => true,
            Availability::Remaining(remaining) => quantity <= remaining,
        }
    }
}

/// Checks a locked ticket-type row against a requested quantity.
pub fn check_reservation(ticket_type: &TicketType, quantity: u32) -> Result<(), Rejection> {
    if !ticket_type.is_active {
        return Err(Rejection::TicketTypeInactive {
            name: ticket_type.name.clone(),
        });
    }

    match Availability::of(ticket_type) {
        availability if availability.admits(quantity) => Ok(()),
        Availability::Remaining(remaining) => Err(Rejection::InsufficientCapacity {
            name: ticket_type.name.clone(),
            remaining,
        }),
        Availability::Unlimited => Ok(()),
    }
}

/// Locks the ticket-type row, checks it and increments `sold` inside `tx`.
/// Returns the row as read under the lock (before the increment).
pub async fn reserve(
    tx: &mut dyn StoreTx,
    event_id: Uuid,
    ticket_type_id: Uuid,
    quantity: u32,
) -> Result<TicketType, AppError> {
    let ticket_type = tx
        .lock_ticket_type(ticket_type_id)
        .await?
        .filter(|ticket_type| ticket_type.event_id == event_id)
        .ok_or(Rejection::UnknownTicketType(ticket_type_id))?;

    check_reservation(&ticket_type, quantity)?;

    let delta = i32::try_from(quantity)
        .map_err(|_| AppError::ValidationError(format!("quantity {quantity} is too large")))?;
    tx.increment_sold(ticket_type.id, delta).await?;

    tracing::debug!(
        ticket_type_id = %ticket_type.id,
        quantity,
        sold_before = ticket_type.sold,
        capacity = ticket_type.capacity,
        "Reserved capacity"
    );

    Ok(ticket_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use sqlx::types::Json;

    use crate::models::DaySchedule;

    fn ticket_type(capacity: i32, sold: i32, is_active: bool) -> TicketType {
        TicketType {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            name: "General".to_string(),
            price: Decimal::from(50),
            currency: "PEN".to_string(),
            capacity,
            sold,
            is_active,
            is_package: false,
            package_days_count: None,
            day_schedule: Json(DaySchedule::FullRange),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_zero_capacity_is_unlimited() {
        let tt = ticket_type(0, 10_000, true);
        assert_eq!(Availability::of(&tt), Availability::Unlimited);
        assert!(check_reservation(&tt, 500).is_ok());
    }

    #[test]
    fn test_rejects_quantity_above_remaining() {
        let tt = ticket_type(10, 8, true);
        assert_eq!(Availability::of(&tt), Availability::Remaining(2));
        assert!(check_reservation(&tt, 2).is_ok());
        assert_eq!(
            check_reservation(&tt, 3),
            Err(Rejection::InsufficientCapacity {
                name: "General".to_string(),
                remaining: 2,
            })
        );
    }

    #[test]
    fn test_inactive_ticket_type_is_rejected_before_capacity() {
        let tt = ticket_type(10, 0, false);
        assert!(matches!(
            check_reservation(&tt, 1),
            Err(Rejection::TicketTypeInactive { .. })
        ));
    }
}
