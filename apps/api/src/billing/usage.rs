//! Credit/usage ledger and subscription plan resolver.
//!
//! Every quota-consuming action is admitted here first. Free accounts get a
//! small monthly allowance plus any purchased credits; active paid plans are
//! uncapped. The debit policy is consume-then-refund: the ledger is debited
//! before the action's side effects, and the caller refunds on failure.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::subscription::{SubscriptionPlan, SubscriptionRow, SubscriptionStatus};
use crate::models::user::UserRow;

/// Monthly allowance for the free plan.
pub const FREE_MONTHLY_LIMIT: i32 = 3;

/// Sentinel reported for uncapped plans.
pub const UNLIMITED: i32 = -1;

/// Snapshot of a user's quota position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReport {
    pub plan: SubscriptionPlan,
    pub limit: i32,
    pub used: i32,
    pub remaining: i32,
    pub unlimited: bool,
    pub credits_remaining: i32,
}

/// What a successful admission actually debited. Passed back to `refund`
/// when the consuming action fails after the debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumption {
    /// Uncapped plan, nothing counted.
    Unlimited,
    /// One unit of the monthly allowance.
    MonthlyAllowance,
    /// One purchased credit.
    PurchasedCredit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit(Consumption),
    Reject,
}

/// Effective plan for quota purposes. Only an active (or trialing)
/// subscription confers its nominal paid plan; canceled, past-due, or absent
/// subscriptions all resolve to free.
pub fn resolve_plan(subscription: Option<&SubscriptionRow>) -> SubscriptionPlan {
    match subscription {
        Some(sub) => match sub.status {
            SubscriptionStatus::Active | SubscriptionStatus::Trialing => sub.plan,
            SubscriptionStatus::Canceled | SubscriptionStatus::PastDue => SubscriptionPlan::Free,
        },
        None => SubscriptionPlan::Free,
    }
}

/// Monthly ceiling for a plan. `None` means uncapped.
pub fn plan_ceiling(plan: SubscriptionPlan) -> Option<i32> {
    match plan {
        SubscriptionPlan::Free => Some(FREE_MONTHLY_LIMIT),
        SubscriptionPlan::Basic | SubscriptionPlan::Pro => None,
    }
}

/// True when the usage window must be zeroed before reading or debiting.
pub fn window_needs_reset(month_reset_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match month_reset_at {
        Some(reset_at) => reset_at <= now,
        None => true,
    }
}

/// First instant of the month after `now` (UTC).
pub fn next_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .expect("first of month is a valid UTC timestamp")
}

/// Admission decision, in order: uncapped plan, monthly allowance,
/// purchased credits, reject.
pub fn decide_admission(ceiling: Option<i32>, used: i32, credits_remaining: i32) -> Admission {
    match ceiling {
        None => Admission::Admit(Consumption::Unlimited),
        Some(limit) if used < limit => Admission::Admit(Consumption::MonthlyAllowance),
        Some(_) if credits_remaining > 0 => Admission::Admit(Consumption::PurchasedCredit),
        Some(_) => Admission::Reject,
    }
}

pub fn build_report(plan: SubscriptionPlan, used: i32, credits_remaining: i32) -> UsageReport {
    match plan_ceiling(plan) {
        None => UsageReport {
            plan,
            limit: UNLIMITED,
            used,
            remaining: UNLIMITED,
            unlimited: true,
            credits_remaining,
        },
        Some(limit) => UsageReport {
            plan,
            limit,
            used,
            remaining: (limit - used).max(0),
            unlimited: false,
            credits_remaining,
        },
    }
}

/// Returns the user's current quota position, applying the month-boundary
/// reset inside the same transaction as the read.
pub async fn get_usage(
    pool: &PgPool,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<UsageReport, AppError> {
    let mut tx = pool.begin().await?;
    let user = lock_user(&mut tx, user_id).await?;
    let used = reset_window_if_due(&mut tx, &user, now).await?;
    let subscription = fetch_subscription(&mut tx, user_id).await?;
    tx.commit().await?;

    let plan = resolve_plan(subscription.as_ref());
    Ok(build_report(plan, used, user.credits_remaining))
}

/// Debits one unit of quota, or rejects with `AppError::QuotaExceeded`
/// before any side effect. The whole check-reset-debit runs in one
/// transaction with the user row locked, so concurrent requests serialize.
pub async fn consume(
    pool: &PgPool,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Consumption, AppError> {
    let mut tx = pool.begin().await?;
    let user = lock_user(&mut tx, user_id).await?;
    let used = reset_window_if_due(&mut tx, &user, now).await?;
    let subscription = fetch_subscription(&mut tx, user_id).await?;
    let plan = resolve_plan(subscription.as_ref());

    match decide_admission(plan_ceiling(plan), used, user.credits_remaining) {
        Admission::Admit(Consumption::Unlimited) => {
            tx.commit().await?;
            Ok(Consumption::Unlimited)
        }
        Admission::Admit(Consumption::MonthlyAllowance) => {
            sqlx::query(
                "UPDATE users SET applications_this_month = applications_this_month + 1 WHERE id = $1",
            )
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(Consumption::MonthlyAllowance)
        }
        Admission::Admit(Consumption::PurchasedCredit) => {
            let result = sqlx::query(
                "UPDATE users SET credits_remaining = credits_remaining - 1 \
                 WHERE id = $1 AND credits_remaining > 0",
            )
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                // Lost the balance between read and write; treat as exhausted.
                let report = build_report(plan, used, 0);
                return Err(AppError::QuotaExceeded(report));
            }
            tx.commit().await?;
            Ok(Consumption::PurchasedCredit)
        }
        Admission::Reject => {
            let report = build_report(plan, used, user.credits_remaining);
            tracing::info!(%user_id, plan = plan.as_str(), used, "usage rejected: quota exhausted");
            Err(AppError::QuotaExceeded(report))
        }
    }
}

/// Compensating rollback for a debit whose consuming action failed.
pub async fn refund(
    pool: &PgPool,
    user_id: Uuid,
    consumption: Consumption,
) -> Result<(), AppError> {
    match consumption {
        Consumption::Unlimited => Ok(()),
        Consumption::MonthlyAllowance => {
            sqlx::query(
                "UPDATE users SET applications_this_month = GREATEST(applications_this_month - 1, 0) \
                 WHERE id = $1",
            )
            .bind(user_id)
            .execute(pool)
            .await?;
            Ok(())
        }
        Consumption::PurchasedCredit => {
            sqlx::query("UPDATE users SET credits_remaining = credits_remaining + 1 WHERE id = $1")
                .bind(user_id)
                .execute(pool)
                .await?;
            Ok(())
        }
    }
}

/// Grants purchased credits (one-time checkout purchases).
pub async fn add_credits(pool: &PgPool, user_id: Uuid, amount: i32) -> Result<(), AppError> {
    sqlx::query("UPDATE users SET credits_remaining = credits_remaining + $2 WHERE id = $1")
        .bind(user_id)
        .bind(amount)
        .execute(pool)
        .await?;
    tracing::info!(%user_id, amount, "credits granted");
    Ok(())
}

async fn lock_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<UserRow, AppError> {
    sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))
}

async fn fetch_subscription(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<Option<SubscriptionRow>, AppError> {
    Ok(
        sqlx::query_as::<_, SubscriptionRow>("SELECT * FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?,
    )
}

/// Zeroes the monthly counter and advances the reset marker when the window
/// has lapsed. Returns the effective used count for this window.
async fn reset_window_if_due(
    tx: &mut Transaction<'_, Postgres>,
    user: &UserRow,
    now: DateTime<Utc>,
) -> Result<i32, AppError> {
    if window_needs_reset(user.month_reset_at, now) {
        sqlx::query("UPDATE users SET applications_this_month = 0, month_reset_at = $2 WHERE id = $1")
            .bind(user.id)
            .bind(next_month_start(now))
            .execute(&mut **tx)
            .await?;
        Ok(0)
    } else {
        Ok(user.applications_this_month)
    }
}
