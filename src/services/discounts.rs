//! Discount validation.
//!
//! Everything here except [`DiscountService`] is pure: callers hand in a
//! snapshot of the code and its usage counters and get back either an amount
//! or the reason the code does not apply. Recording a usage is the order
//! coordinator's job.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{DiscountCode, DiscountType};
use crate::services::ServiceContext;
use crate::utils::error::{AppError, Rejection};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscountRejection {
    #[error("Discount code not found")]
    NotFound,

    #[error("Discount code is not active")]
    Inactive,

    #[error("Discount code is not valid yet")]
    NotYetValid,

    #[error("Discount code has expired")]
    Expired,

    #[error("Discount code has reached its usage limit")]
    Exhausted,

    #[error("You have already used this discount code the maximum number of times")]
    ExhaustedForUser,

    #[error("Discount code does not apply to this event")]
    WrongEvent,

    #[error("Minimum purchase for this discount is {minimum}")]
    BelowMinimum { minimum: Decimal },
}

impl DiscountRejection {
    pub fn code(&self) -> &'static str {
        match self {
            DiscountRejection::NotFound => "DISCOUNT_NOT_FOUND",
            DiscountRejection::Inactive => "DISCOUNT_INACTIVE",
            DiscountRejection::NotYetValid => "DISCOUNT_NOT_YET_VALID",
            DiscountRejection::Expired => "DISCOUNT_EXPIRED",
            DiscountRejection::Exhausted => "DISCOUNT_EXHAUSTED",
            DiscountRejection::ExhaustedForUser => "DISCOUNT_EXHAUSTED_FOR_USER",
            DiscountRejection::WrongEvent => "DISCOUNT_WRONG_EVENT",
            DiscountRejection::BelowMinimum { .. } => "DISCOUNT_BELOW_MINIMUM",
        }
    }
}

/// A code plus the usage counters read alongside it.
#[derive(Debug, Clone)]
pub struct DiscountSnapshot {
    pub code: DiscountCode,
    pub total_uses: i64,
    pub user_uses: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppliedDiscount {
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

/// Non-positive limits mean "no limit", like a zero ticket-type capacity.
fn limit_reached(limit: Option<i32>, used: i64) -> bool {
    matches!(limit, Some(max) if max > 0 && used >= i64::from(max))
}

/// Every rule that does not depend on the order subtotal.
pub fn check_eligibility(
    snapshot: &DiscountSnapshot,
    event_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), DiscountRejection> {
    let code = &snapshot.code;

    if !code.is_active {
        return Err(DiscountRejection::Inactive);
    }
    if code.valid_from.is_some_and(|from| now < from) {
        return Err(DiscountRejection::NotYetValid);
    }
    if code.valid_until.is_some_and(|until| now > until) {
        return Err(DiscountRejection::Expired);
    }
    if limit_reached(code.max_uses, snapshot.total_uses) {
        return Err(DiscountRejection::Exhausted);
    }
    if code.event_id.is_some_and(|scoped| scoped != event_id) {
        return Err(DiscountRejection::WrongEvent);
    }
    if limit_reached(code.max_uses_per_user, snapshot.user_uses) {
        return Err(DiscountRejection::ExhaustedForUser);
    }

    Ok(())
}

/// Applies the minimum-purchase gate and computes the amount taken off.
pub fn apply(code: &DiscountCode, subtotal: Decimal) -> Result<AppliedDiscount, DiscountRejection> {
    if let Some(minimum) = code.min_purchase {
        if subtotal < minimum {
            return Err(DiscountRejection::BelowMinimum { minimum });
        }
    }

    let raw = match code.discount_type {
        DiscountType::Percentage => (subtotal * code.value / Decimal::ONE_HUNDRED).round_dp(2),
        DiscountType::Fixed => code.value.min(subtotal),
    };
    let discount_amount = raw.max(Decimal::ZERO).min(subtotal);
    let final_amount = (subtotal - discount_amount).max(Decimal::ZERO);

    Ok(AppliedDiscount {
        discount_amount,
        final_amount,
    })
}

/// Full evaluation: eligibility, then amount.
pub fn evaluate(
    snapshot: Option<&DiscountSnapshot>,
    event_id: Uuid,
    subtotal: Decimal,
    now: DateTime<Utc>,
) -> Result<AppliedDiscount, DiscountRejection> {
    let snapshot = snapshot.ok_or(DiscountRejection::NotFound)?;
    check_eligibility(snapshot, event_id, now)?;
    apply(&snapshot.code, subtotal)
}

/// Pre-checkout preview. Reads only; nothing is reserved or recorded.
#[derive(Clone)]
pub struct DiscountService {
    ctx: ServiceContext,
}

impl DiscountService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub async fn preview(
        &self,
        code_id: Uuid,
        user_id: Uuid,
        event_id: Uuid,
        subtotal: Decimal,
    ) -> Result<AppliedDiscount, AppError> {
        if subtotal < Decimal::ZERO {
            return Err(AppError::ValidationError(
                "subtotal must not be negative".to_string(),
            ));
        }

        let snapshot = match self.ctx.store.discount_code(code_id).await? {
            Some(code) => Some(DiscountSnapshot {
                total_uses: self.ctx.store.count_discount_usages(code.id, None).await?,
                user_uses: self
                    .ctx
                    .store
                    .count_discount_usages(code.id, Some(user_id))
                    .await?,
                code,
            }),
            None => None,
        };

        evaluate(snapshot.as_ref(), event_id, subtotal, self.ctx.now())
            .map_err(|reason| AppError::Rejected(Rejection::Discount(reason)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn code(discount_type: DiscountType, value: i64) -> DiscountCode {
        DiscountCode {
            id: Uuid::new_v4(),
            code: "PROMO".to_string(),
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

    fn snapshot(code: DiscountCode) -> DiscountSnapshot {
        DiscountSnapshot {
            code,
            total_uses: 0,
            user_uses: 0,
        }
    }

    #[test]
    fn test_fixed_discount_with_minimum_purchase() {
        let mut fixed = code(DiscountType::Fixed, 10);
        fixed.min_purchase = Some(Decimal::from(20));

        assert_eq!(
            apply(&fixed, Decimal::from(15)),
            Err(DiscountRejection::BelowMinimum {
                minimum: Decimal::from(20)
            })
        );

        let applied = apply(&fixed, Decimal::from(25)).unwrap();
        assert_eq!(applied.discount_amount, Decimal::from(10));
        assert_eq!(applied.final_amount, Decimal::from(15));
    }

    #[test]
    fn test_fixed_discount_never_exceeds_subtotal() {
        let applied = apply(&code(DiscountType::Fixed, 100), Decimal::from(30)).unwrap();
        assert_eq!(applied.discount_amount, Decimal::from(30));
        assert_eq!(applied.final_amount, Decimal::ZERO);
    }

    #[test]
    fn test_percentage_discount_rounds_to_cents() {
        let applied = apply(&code(DiscountType::Percentage, 15), Decimal::new(9999, 2)).unwrap();
        assert_eq!(applied.discount_amount, Decimal::new(1500, 2));
        assert_eq!(applied.final_amount, Decimal::new(8499, 2));
    }

    #[test]
    fn test_eligibility_rules() {
        let now = Utc::now();
        let event_id = Uuid::new_v4();

        let mut inactive = code(DiscountType::Fixed, 5);
        inactive.is_active = false;
        assert_eq!(
            check_eligibility(&snapshot(inactive), event_id, now),
            Err(DiscountRejection::Inactive)
        );

        let mut future = code(DiscountType::Fixed, 5);
        future.valid_from = Some(now + Duration::days(1));
        assert_eq!(
            check_eligibility(&snapshot(future), event_id, now),
            Err(DiscountRejection::NotYetValid)
        );

        let mut past = code(DiscountType::Fixed, 5);
        past.valid_until = Some(now - Duration::hours(1));
        assert_eq!(
            check_eligibility(&snapshot(past), event_id, now),
            Err(DiscountRejection::Expired)
        );

        let mut scoped = code(DiscountType::Fixed, 5);
        scoped.event_id = Some(Uuid::new_v4());
        assert_eq!(
            check_eligibility(&snapshot(scoped), event_id, now),
            Err(DiscountRejection::WrongEvent)
        );

        let mut capped = code(DiscountType::Fixed, 5);
        capped.max_uses = Some(3);
        let mut exhausted = snapshot(capped);
        exhausted.total_uses = 3;
        assert_eq!(
            check_eligibility(&exhausted, event_id, now),
            Err(DiscountRejection::Exhausted)
        );

        let mut per_user = code(DiscountType::Fixed, 5);
        per_user.max_uses_per_user = Some(1);
        let mut used_once = snapshot(per_user);
        used_once.user_uses = 1;
        assert_eq!(
            check_eligibility(&used_once, event_id, now),
            Err(DiscountRejection::ExhaustedForUser)
        );
    }

    #[test]
    fn test_zero_limits_mean_unlimited() {
        let mut unlimited = code(DiscountType::Fixed, 5);
        unlimited.max_uses = Some(0);
        unlimited.max_uses_per_user = Some(0);
        let mut snap = snapshot(unlimited);
        snap.total_uses = 1_000;
        snap.user_uses = 50;
        assert!(check_eligibility(&snap, Uuid::new_v4(), Utc::now()).is_ok());
    }

    #[test]
    fn test_missing_code_is_not_found() {
        assert_eq!(
            evaluate(None, Uuid::new_v4(), Decimal::from(10), Utc::now()),
            Err(DiscountRejection::NotFound)
        );
    }

    proptest! {
        #[test]
        fn prop_discount_stays_within_subtotal(
            cents in 0i64..10_000_000,
            value in 0i64..500,
            percentage in any::<bool>(),
        ) {
            let subtotal = Decimal::new(cents, 2);
            let kind = if percentage { DiscountType::Percentage } else { DiscountType::Fixed };
            let applied = apply(&code(kind, value), subtotal).unwrap();

            prop_assert!(applied.discount_amount >= Decimal::ZERO);
            prop_assert!(applied.discount_amount <= subtotal);
            prop_assert!(applied.final_amount >= Decimal::ZERO);
            prop_assert_eq!(applied.final_amount + applied.discount_amount, subtotal);
        }
    }
}
