//! Dashboard aggregation.
//!
//! [`aggregate`] is a pure reduction over the scoped result sets. The sets are
//! fetched concurrently and may not agree with each other (a student created
//! between two queries shows up in one and not the other), so the reduction
//! only ever joins on ids and drops rows it cannot place.

use chrono::NaiveDate;
use rocket::tokio;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::collections::HashSet;
use tracing::{info, instrument, warn};

use crate::attendance::list_attendance;
use crate::auth::{CenterFilter, EffectiveScope, User, resolve};
use crate::error::AppError;
use crate::fees::{recent_payments, scoped_payments};
use crate::models::{AttendanceRecord, AttendanceStatus, Batch, Center, Coach, FeePayment, Student};
use crate::repository::{check_scope, list_batches, list_centers, list_coaches, list_students};

const RECENT_PAYMENTS: i64 = 5;

/// `part / whole` as a percentage, 0 when `whole` is 0, clamped to 0..=100.
pub fn percentage(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        return 0.0;
    }
    (part / whole * 100.0).clamp(0.0, 100.0)
}

fn round_percent(value: f64) -> i64 {
    value.round() as i64
}

#[derive(Debug, Clone, Default)]
pub struct StatsInputs {
    pub centers: Vec<Center>,
    pub students: Vec<Student>,
    pub batches: Vec<Batch>,
    pub coaches: Vec<Coach>,
    pub attendance: Vec<AttendanceRecord>,
    pub payments: Vec<FeePayment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CenterBreakdown {
    pub center_id: i64,
    pub center_name: String,
    pub total_students: usize,
    pub total_batches: usize,
    pub total_coaches: usize,
    pub attendance_rate: i64,
    pub total_revenue: f64,
    pub pending_fees: f64,
    pub collection_rate: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub scope: EffectiveScope,
    pub total_students: usize,
    pub total_batches: usize,
    pub total_coaches: usize,
    pub attendance_rate: i64,
    pub total_revenue: f64,
    pub pending_fees: f64,
    pub collection_rate: i64,
    pub per_center_breakdown: Vec<CenterBreakdown>,
    pub recent_payments: Vec<FeePayment>,
}

struct Tally {
    students: usize,
    present: usize,
    revenue: f64,
    pending: f64,
}

impl Tally {
    fn attendance_rate(&self) -> i64 {
        round_percent(percentage(self.present as f64, self.students as f64))
    }

    fn collection_rate(&self) -> i64 {
        round_percent(percentage(self.revenue, self.revenue + self.pending))
    }
}

/// Counts students, present students and money for the rows matching `in_center`.
fn tally(inputs: &StatsInputs, in_center: impl Fn(i64) -> bool) -> Tally {
    let students: HashSet<i64> = inputs
        .students
        .iter()
        .filter(|s| in_center(s.center_id))
        .map(|s| s.id)
        .collect();

    let present: HashSet<i64> = inputs
        .attendance
        .iter()
        .filter(|a| a.status == AttendanceStatus::Present && students.contains(&a.student_id))
        .map(|a| a.student_id)
        .collect();

    let (revenue, pending) = inputs
        .payments
        .iter()
        .filter(|p| in_center(p.center_id))
        .fold((0.0, 0.0), |(revenue, pending), p| {
            if p.status.is_outstanding() {
                (revenue, pending + p.amount)
            } else {
                (revenue + p.amount, pending)
            }
        });

    Tally {
        students: students.len(),
        present: present.len(),
        revenue,
        pending,
    }
}

pub fn aggregate(scope: EffectiveScope, inputs: &StatsInputs) -> DashboardStats {
    let totals = tally(inputs, |_| true);

    let per_center_breakdown = match scope {
        EffectiveScope::SingleCenter(_) => Vec::new(),
        EffectiveScope::AllCenters => inputs
            .centers
            .iter()
            .map(|center| {
                let center_tally = tally(inputs, |id| id == center.id);
                CenterBreakdown {
                    center_id: center.id,
                    center_name: center.name.clone(),
                    total_students: center_tally.students,
                    total_batches: inputs
                        .batches
                        .iter()
                        .filter(|b| b.center_id == center.id)
                        .count(),
                    total_coaches: inputs
                        .coaches
                        .iter()
                        .filter(|c| c.center_id == Some(center.id))
                        .count(),
                    attendance_rate: center_tally.attendance_rate(),
                    total_revenue: center_tally.revenue,
                    pending_fees: center_tally.pending,
                    collection_rate: center_tally.collection_rate(),
                }
            })
            .collect(),
    };

    DashboardStats {
        scope,
        total_students: totals.students,
        total_batches: inputs.batches.len(),
        total_coaches: inputs.coaches.len(),
        attendance_rate: totals.attendance_rate(),
        total_revenue: totals.revenue,
        pending_fees: totals.pending,
        collection_rate: totals.collection_rate(),
        per_center_breakdown,
        recent_payments: Vec::new(),
    }
}

/// Resolves the caller's scope, fetches every input concurrently and aggregates.
///
/// The recent-payments feed is optional: if it fails the dashboard is still
/// served with an empty feed. Any other failure is returned.
#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn dashboard_stats(
    pool: &Pool<Sqlite>,
    user: &User,
    filter: CenterFilter,
    date: NaiveDate,
) -> Result<DashboardStats, AppError> {
    let scope = resolve(user, filter)?;
    info!(scope = %scope, "Building dashboard stats");
    check_scope(pool, user, &scope).await?;

    let (centers, students, batches, coaches, attendance, payments) = tokio::try_join!(
        list_centers(pool, user, &scope),
        list_students(pool, user, &scope, None),
        list_batches(pool, user, &scope),
        list_coaches(pool, user, &scope),
        list_attendance(pool, user, &scope, date, None),
        scoped_payments(pool, user, &scope, None),
    )?;

    let inputs = StatsInputs {
        centers,
        students,
        batches,
        coaches,
        attendance,
        payments,
    };

    let mut stats = aggregate(scope, &inputs);

    stats.recent_payments = match recent_payments(pool, user, &scope, RECENT_PAYMENTS).await {
        Ok(payments) => payments,
        Err(e) => {
            warn!(error = %e, "Recent payments unavailable, serving dashboard without them");
            Vec::new()
        }
    };

    Ok(stats)
}
