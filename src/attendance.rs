use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite, Transaction};
use std::collections::{BTreeMap, HashSet};
use tracing::{error, info, instrument};
use validator::Validate;

use crate::auth::{Capability, EffectiveScope, User};
use crate::error::AppError;
use crate::models::{AttendanceRecord, AttendanceStatus, DbAttendanceRecord};
use crate::repository::{check_scope, get_batch, get_student};
use crate::stats::percentage;

const RECORD_SELECT: &str = "SELECT a.id, a.student_id, s.full_name AS student_name, a.batch_id,
        a.date, a.status, a.marked_by, a.marked_at, a.center_id
     FROM attendance a
     JOIN students s ON s.id = a.student_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceMark {
    pub student_id: i64,
    pub status: AttendanceStatus,
}

/// One attendance row as submitted on its own.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AttendanceEntry {
    pub student_id: i64,
    pub batch_id: i64,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub marked_by: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAttendance {
    pub batch_id: i64,
    pub batch_name: String,
    pub center_id: i64,
    pub students: i64,
    pub present: i64,
    pub absent: i64,
    pub unmarked: i64,
    pub attendance_rate: f64,
}

#[derive(sqlx::FromRow)]
struct DbBatchAttendance {
    batch_id: i64,
    batch_name: String,
    center_id: i64,
    students: i64,
    present: i64,
    absent: i64,
}

impl From<DbBatchAttendance> for BatchAttendance {
    fn from(row: DbBatchAttendance) -> Self {
        Self {
            batch_id: row.batch_id,
            batch_name: row.batch_name,
            center_id: row.center_id,
            students: row.students,
            present: row.present,
            absent: row.absent,
            unmarked: (row.students - row.present - row.absent).max(0),
            attendance_rate: percentage(row.present as f64, row.students as f64),
        }
    }
}

fn map_rows(rows: Vec<DbAttendanceRecord>) -> Result<Vec<AttendanceRecord>, AppError> {
    rows.into_iter().map(AttendanceRecord::try_from).collect()
}

/// Replaces the full attendance set of `batch_id` on `date`.
///
/// The previous set is deleted and the new one inserted inside a single
/// transaction: if any statement fails the transaction is rolled back and the
/// earlier marks stay in place. Repeated entries for one student collapse to
/// the last one. Two concurrent marks for the same batch and date are
/// serialized by SQLite's write lock; whichever commits last wins.
#[instrument(skip(pool, user, marks), fields(user_id = user.id, marks = marks.len()))]
pub async fn mark_attendance(
    pool: &Pool<Sqlite>,
    user: &User,
    batch_id: i64,
    date: NaiveDate,
    marks: &[AttendanceMark],
) -> Result<Vec<AttendanceRecord>, AppError> {
    info!("Marking attendance");
    user.require_capability(Capability::MarkAttendance)?;

    let batch = get_batch(pool, user, batch_id).await?;

    let marks: BTreeMap<i64, AttendanceStatus> = marks
        .iter()
        .map(|mark| (mark.student_id, mark.status))
        .collect();

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::AttendanceWrite(format!("could not start transaction: {}", e)))?;

    let roster = enrolled_students(&mut tx, batch.id).await?;

    if let Some(stranger) = marks.keys().find(|id| !roster.contains(id)) {
        return Err(AppError::Validation(format!(
            "student {} is not enrolled in batch {}",
            stranger, batch.id
        )));
    }

    match replace_marks(&mut tx, batch.id, batch.center_id, date, user.id, &marks).await {
        Ok(inserted) => {
            tx.commit()
                .await
                .map_err(|e| AppError::AttendanceWrite(format!("commit failed: {}", e)))?;
            info!(inserted, "Attendance marked");
        }
        Err(e) => {
            error!(error = %e, "Attendance write failed, rolling back");
            if let Err(rollback) = tx.rollback().await {
                error!(error = %rollback, "Rollback failed");
            }
            return Err(AppError::AttendanceWrite(format!(
                "batch {} on {}: {}",
                batch.id, date, e
            )));
        }
    }

    let rows = sqlx::query_as::<_, DbAttendanceRecord>(&format!(
        "{} WHERE a.batch_id = ? AND a.date = ? ORDER BY s.full_name, a.id",
        RECORD_SELECT
    ))
    .bind(batch.id)
    .bind(date)
    .fetch_all(pool)
    .await?;

    map_rows(rows)
}

/// Read inside the write transaction so a concurrent move cannot slip a
/// former student into the new set.
async fn enrolled_students(
    tx: &mut Transaction<'_, Sqlite>,
    batch_id: i64,
) -> Result<HashSet<i64>, sqlx::Error> {
    let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM students WHERE batch_id = ?")
        .bind(batch_id)
        .fetch_all(&mut **tx)
        .await?;

    Ok(ids.into_iter().collect())
}

async fn replace_marks(
    tx: &mut Transaction<'_, Sqlite>,
    batch_id: i64,
    center_id: i64,
    date: NaiveDate,
    marked_by: i64,
    marks: &BTreeMap<i64, AttendanceStatus>,
) -> Result<u64, sqlx::Error> {
    sqlx::query("DELETE FROM attendance WHERE batch_id = ? AND date = ?")
        .bind(batch_id)
        .bind(date)
        .execute(&mut **tx)
        .await?;

    let marked_at = Utc::now();
    let mut inserted = 0;
    for (student_id, status) in marks {
        inserted += sqlx::query(
            "INSERT INTO attendance (student_id, batch_id, date, status, marked_by, marked_at, center_id)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(student_id)
        .bind(batch_id)
        .bind(date)
        .bind(status.as_str())
        .bind(marked_by)
        .bind(marked_at)
        .bind(center_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();
    }

    Ok(inserted)
}

/// Upserts a single mark keyed by (student, batch, date).
#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn record_attendance(
    pool: &Pool<Sqlite>,
    user: &User,
    entry: &AttendanceEntry,
) -> Result<AttendanceRecord, AppError> {
    info!("Recording attendance entry");
    user.require_capability(Capability::MarkAttendance)?;

    if entry.marked_by.is_some_and(|marker| marker != user.id) {
        return Err(AppError::Permission(format!(
            "user {} cannot mark attendance on behalf of user {}",
            user.id,
            entry.marked_by.unwrap_or_default()
        )));
    }

    let batch = get_batch(pool, user, entry.batch_id).await?;
    let student = get_student(pool, user, entry.student_id).await?;

    if student.batch_id != batch.id {
        return Err(AppError::Validation(format!(
            "student {} is not enrolled in batch {}",
            student.id, batch.id
        )));
    }

    sqlx::query(
        "INSERT INTO attendance (student_id, batch_id, date, status, marked_by, marked_at, center_id)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (student_id, batch_id, date) DO UPDATE SET
            status = excluded.status,
            marked_by = excluded.marked_by,
            marked_at = excluded.marked_at,
            center_id = excluded.center_id",
    )
    .bind(student.id)
    .bind(batch.id)
    .bind(entry.date)
    .bind(entry.status.as_str())
    .bind(user.id)
    .bind(Utc::now())
    .bind(batch.center_id)
    .execute(pool)
    .await
    .map_err(|e| AppError::AttendanceWrite(e.to_string()))?;

    let row = sqlx::query_as::<_, DbAttendanceRecord>(&format!(
        "{} WHERE a.student_id = ? AND a.batch_id = ? AND a.date = ?",
        RECORD_SELECT
    ))
    .bind(student.id)
    .bind(batch.id)
    .bind(entry.date)
    .fetch_one(pool)
    .await?;

    AttendanceRecord::try_from(row)
}

#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn list_attendance(
    pool: &Pool<Sqlite>,
    user: &User,
    scope: &EffectiveScope,
    date: NaiveDate,
    batch_id: Option<i64>,
) -> Result<Vec<AttendanceRecord>, AppError> {
    info!("Listing attendance");
    check_scope(pool, user, scope).await?;

    let center = scope.center_id();
    let rows = sqlx::query_as::<_, DbAttendanceRecord>(&format!(
        "{} JOIN centers c ON c.id = a.center_id
         WHERE a.date = ? AND c.retired = 0
            AND (? IS NULL OR a.center_id = ?)
            AND (? IS NULL OR a.batch_id = ?)
         ORDER BY s.full_name, a.id",
        RECORD_SELECT
    ))
    .bind(date)
    .bind(center)
    .bind(center)
    .bind(batch_id)
    .bind(batch_id)
    .fetch_all(pool)
    .await?;

    map_rows(rows)
}

/// Present students on `date` as a percentage of all students in scope.
///
/// Only marks for students currently enrolled in the scope count, so the
/// result stays within 0..=100. An empty scope yields 0.
#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn attendance_rate(
    pool: &Pool<Sqlite>,
    user: &User,
    scope: &EffectiveScope,
    date: NaiveDate,
) -> Result<f64, AppError> {
    check_scope(pool, user, scope).await?;

    let center = scope.center_id();
    let total = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM students s
         JOIN centers c ON c.id = s.center_id
         WHERE c.retired = 0 AND (? IS NULL OR s.center_id = ?)",
    )
    .bind(center)
    .bind(center)
    .fetch_one(pool)
    .await?;

    let present = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(DISTINCT a.student_id) FROM attendance a
         JOIN students s ON s.id = a.student_id
         JOIN centers c ON c.id = s.center_id
         WHERE a.date = ? AND a.status = 'present' AND c.retired = 0
            AND (? IS NULL OR s.center_id = ?)",
    )
    .bind(date)
    .bind(center)
    .bind(center)
    .fetch_one(pool)
    .await?;

    Ok(percentage(present as f64, total as f64))
}

/// Per-batch present/absent/unmarked counts for `date`.
#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn batch_summary(
    pool: &Pool<Sqlite>,
    user: &User,
    scope: &EffectiveScope,
    date: NaiveDate,
) -> Result<Vec<BatchAttendance>, AppError> {
    info!("Summarising attendance by batch");
    user.require_capability(Capability::ViewReports)?;
    check_scope(pool, user, scope).await?;

    let center = scope.center_id();
    let rows = sqlx::query_as::<_, DbBatchAttendance>(
        "SELECT b.id AS batch_id, b.name AS batch_name, b.center_id,
            (SELECT COUNT(*) FROM students s WHERE s.batch_id = b.id) AS students,
            (SELECT COUNT(*) FROM attendance a JOIN students s ON s.id = a.student_id
              WHERE a.batch_id = b.id AND s.batch_id = b.id AND a.date = ? AND a.status = 'present') AS present,
            (SELECT COUNT(*) FROM attendance a JOIN students s ON s.id = a.student_id
              WHERE a.batch_id = b.id AND s.batch_id = b.id AND a.date = ? AND a.status = 'absent') AS absent
         FROM batches b
         JOIN centers c ON c.id = b.center_id
         WHERE c.retired = 0 AND (? IS NULL OR b.center_id = ?)
         ORDER BY b.name, b.id",
    )
    .bind(date)
    .bind(date)
    .bind(center)
    .bind(center)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(BatchAttendance::from).collect())
}
