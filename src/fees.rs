//! Fee payment ledger.
//!
//! A fee record is either `paid` (payment date, mode and receipt set) or
//! outstanding (`due` / `overdue`). Status is asserted at write time and is
//! not recomputed as days pass; [`refresh_overdue`] is the explicit,
//! caller-triggered way to move stale `due` records to `overdue`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{Capability, EffectiveScope, User, authorize_center};
use crate::error::AppError;
use crate::models::{DbFeePayment, FeePayment, FeeStatus, PaymentMode};
use crate::repository::{check_scope, get_student};
use crate::stats::percentage;

const PAYMENT_SELECT: &str = "SELECT f.id, f.student_id, s.full_name AS student_name, f.amount,
        f.due_date, f.payment_date, f.payment_mode, f.status, f.receipt_number, f.center_id
     FROM fee_payments f
     JOIN students s ON s.id = f.student_id";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewPayment {
    pub student_id: i64,
    #[validate(range(exclusive_min = 0.0, message = "Amount must be positive"))]
    pub amount: f64,
    pub mode: PaymentMode,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewDue {
    pub student_id: i64,
    #[validate(range(exclusive_min = 0.0, message = "Amount must be positive"))]
    pub amount: f64,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FeeTotals {
    pub paid: f64,
    pub outstanding: f64,
    pub overdue: f64,
}

impl FeeTotals {
    pub fn collection_rate(&self) -> f64 {
        percentage(self.paid, self.paid + self.outstanding)
    }
}

fn check_amount(amount: f64) -> Result<(), AppError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "amount must be a positive number, got {}",
            amount
        )))
    }
}

fn receipt_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("RCPT-{}-{}", now.format("%Y%m%d"), suffix)
}

#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn get_payment(pool: &Pool<Sqlite>, user: &User, id: i64) -> Result<FeePayment, AppError> {
    let row = sqlx::query_as::<_, DbFeePayment>(&format!("{} WHERE f.id = ?", PAYMENT_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    let payment = row
        .map(FeePayment::try_from)
        .transpose()?
        .ok_or_else(|| AppError::NotFound(format!("Fee payment {} not found", id)))?;

    authorize_center(user, payment.center_id)?;
    Ok(payment)
}

/// Records a completed payment, stamped paid as of `now`.
#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn record_payment(
    pool: &Pool<Sqlite>,
    user: &User,
    payment: &NewPayment,
    now: DateTime<Utc>,
) -> Result<FeePayment, AppError> {
    info!("Recording fee payment");
    user.require_capability(Capability::MutateFinance)?;
    payment.validate()?;
    check_amount(payment.amount)?;

    let student = get_student(pool, user, payment.student_id).await?;

    let res = sqlx::query(
        "INSERT INTO fee_payments
            (student_id, amount, payment_date, payment_mode, status, due_date, receipt_number, center_id)
         VALUES (?, ?, ?, ?, 'paid', ?, ?, ?)",
    )
    .bind(student.id)
    .bind(payment.amount)
    .bind(now)
    .bind(payment.mode.as_str())
    .bind(payment.due_date)
    .bind(receipt_number(now))
    .bind(student.center_id)
    .execute(pool)
    .await?;

    get_payment(pool, user, res.last_insert_rowid()).await
}

/// Creates or updates the open due of a student for `due_date`.
///
/// The status is `overdue` when `due_date` is already before `today`, `due`
/// otherwise, and stays that way until rewritten.
#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn upsert_due(
    pool: &Pool<Sqlite>,
    user: &User,
    due: &NewDue,
    today: NaiveDate,
) -> Result<FeePayment, AppError> {
    info!("Upserting fee due");
    user.require_capability(Capability::MutateFinance)?;
    due.validate()?;
    check_amount(due.amount)?;

    let student = get_student(pool, user, due.student_id).await?;
    let status = FeeStatus::for_due_date(due.due_date, today);

    let mut tx = pool.begin().await?;

    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM fee_payments
         WHERE student_id = ? AND due_date = ? AND status IN ('due', 'overdue')
         ORDER BY id LIMIT 1",
    )
    .bind(student.id)
    .bind(due.due_date)
    .fetch_optional(&mut *tx)
    .await?;

    let id = match existing {
        Some(id) => {
            sqlx::query("UPDATE fee_payments SET amount = ?, status = ?, center_id = ? WHERE id = ?")
                .bind(due.amount)
                .bind(status.as_str())
                .bind(student.center_id)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            id
        }
        None => sqlx::query(
            "INSERT INTO fee_payments (student_id, amount, status, due_date, center_id)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(student.id)
        .bind(due.amount)
        .bind(status.as_str())
        .bind(due.due_date)
        .bind(student.center_id)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid(),
    };

    tx.commit().await?;

    get_payment(pool, user, id).await
}

/// Moves an outstanding record to `paid`.
#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn settle_due(
    pool: &Pool<Sqlite>,
    user: &User,
    payment_id: i64,
    mode: PaymentMode,
    now: DateTime<Utc>,
) -> Result<FeePayment, AppError> {
    info!("Settling fee due");
    user.require_capability(Capability::MutateFinance)?;

    let payment = get_payment(pool, user, payment_id).await?;
    if !payment.status.is_outstanding() {
        return Err(AppError::Validation(format!(
            "fee payment {} is already {}",
            payment.id, payment.status
        )));
    }

    let res = sqlx::query(
        "UPDATE fee_payments
         SET status = 'paid', payment_date = ?, payment_mode = ?, receipt_number = ?
         WHERE id = ? AND status IN ('due', 'overdue')",
    )
    .bind(now)
    .bind(mode.as_str())
    .bind(receipt_number(now))
    .bind(payment.id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::Validation(format!(
            "fee payment {} was settled concurrently",
            payment.id
        )));
    }

    get_payment(pool, user, payment.id).await
}

/// Re-derives `due -> overdue` for records in scope whose due date is before `today`.
///
/// Returns the number of records that changed.
#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn refresh_overdue(
    pool: &Pool<Sqlite>,
    user: &User,
    scope: &EffectiveScope,
    today: NaiveDate,
) -> Result<u64, AppError> {
    user.require_capability(Capability::MutateFinance)?;
    check_scope(pool, user, scope).await?;

    let center = scope.center_id();
    let res = sqlx::query(
        "UPDATE fee_payments SET status = 'overdue'
         WHERE status = 'due' AND due_date IS NOT NULL AND due_date < ?
            AND (? IS NULL OR center_id = ?)",
    )
    .bind(today)
    .bind(center)
    .bind(center)
    .execute(pool)
    .await?;

    info!(updated = res.rows_affected(), "Refreshed overdue fees");
    Ok(res.rows_affected())
}

#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn delete_payment(pool: &Pool<Sqlite>, user: &User, id: i64) -> Result<(), AppError> {
    info!("Deleting fee payment");
    user.require_capability(Capability::MutateFinance)?;

    let payment = get_payment(pool, user, id).await?;

    sqlx::query("DELETE FROM fee_payments WHERE id = ?")
        .bind(payment.id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn list_payments(
    pool: &Pool<Sqlite>,
    user: &User,
    scope: &EffectiveScope,
    status: Option<FeeStatus>,
) -> Result<Vec<FeePayment>, AppError> {
    info!("Listing fee payments");
    user.require_capability(Capability::ViewReports)?;
    scoped_payments(pool, user, scope, status).await
}

/// Fee records in scope, optionally narrowed to one status.
pub(crate) async fn scoped_payments(
    pool: &Pool<Sqlite>,
    user: &User,
    scope: &EffectiveScope,
    status: Option<FeeStatus>,
) -> Result<Vec<FeePayment>, AppError> {
    check_scope(pool, user, scope).await?;

    let center = scope.center_id();
    let status = status.map(|s| s.as_str());
    let rows = sqlx::query_as::<_, DbFeePayment>(&format!(
        "{} JOIN centers c ON c.id = f.center_id
         WHERE c.retired = 0
            AND (? IS NULL OR f.center_id = ?)
            AND (? IS NULL OR f.status = ?)
         ORDER BY COALESCE(f.payment_date, f.due_date) DESC, f.id DESC",
        PAYMENT_SELECT
    ))
    .bind(center)
    .bind(center)
    .bind(status)
    .bind(status)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(FeePayment::try_from).collect()
}

/// Latest paid records in scope, newest first.
#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn recent_payments(
    pool: &Pool<Sqlite>,
    user: &User,
    scope: &EffectiveScope,
    limit: i64,
) -> Result<Vec<FeePayment>, AppError> {
    scope.authorize(user)?;

    let center = scope.center_id();
    let rows = sqlx::query_as::<_, DbFeePayment>(&format!(
        "{} JOIN centers c ON c.id = f.center_id
         WHERE f.status = 'paid' AND c.retired = 0 AND (? IS NULL OR f.center_id = ?)
         ORDER BY f.payment_date DESC, f.id DESC
         LIMIT ?",
        PAYMENT_SELECT
    ))
    .bind(center)
    .bind(center)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(FeePayment::try_from).collect()
}

#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn fee_totals(
    pool: &Pool<Sqlite>,
    user: &User,
    scope: &EffectiveScope,
) -> Result<FeeTotals, AppError> {
    check_scope(pool, user, scope).await?;

    let center = scope.center_id();
    let totals = sqlx::query_as::<_, FeeTotals>(
        "SELECT
            COALESCE(SUM(CASE WHEN f.status = 'paid' THEN f.amount END), 0.0) AS paid,
            COALESCE(SUM(CASE WHEN f.status IN ('due', 'overdue') THEN f.amount END), 0.0) AS outstanding,
            COALESCE(SUM(CASE WHEN f.status = 'overdue' THEN f.amount END), 0.0) AS overdue
         FROM fee_payments f
         JOIN centers c ON c.id = f.center_id
         WHERE c.retired = 0 AND (? IS NULL OR f.center_id = ?)",
    )
    .bind(center)
    .bind(center)
    .fetch_one(pool)
    .await?;

    Ok(totals)
}

/// Paid amount as a percentage of paid plus outstanding; 0 when both are 0.
#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn collection_rate(
    pool: &Pool<Sqlite>,
    user: &User,
    scope: &EffectiveScope,
) -> Result<f64, AppError> {
    Ok(fee_totals(pool, user, scope).await?.collection_rate())
}
