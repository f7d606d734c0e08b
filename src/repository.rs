//! Scoped reads and writes over centers, batches, students and coaches.
//!
//! Every list query binds the resolved scope into its `WHERE` clause; rows
//! outside the caller's centers are never fetched.

use chrono::NaiveTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};
use validator::Validate;

use crate::auth::{Capability, EffectiveScope, User, authorize_center};
use crate::db::get_user;
use crate::error::AppError;
use crate::models::{Batch, Center, Coach, DbBatch, DbCenter, DbCoach, DbStudent, Student};

static PHONE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9][0-9 \-]{6,18}[0-9]$").unwrap());

const BATCH_SELECT: &str = "SELECT b.id, b.name, b.coach_id, u.full_name AS coach_name,
        b.center_id, c.name AS center_name, b.start_time, b.end_time
     FROM batches b
     JOIN centers c ON c.id = b.center_id
     LEFT JOIN users u ON u.id = b.coach_id";

const STUDENT_SELECT: &str = "SELECT s.id, s.full_name, s.age, s.batch_id, b.name AS batch_name,
        s.center_id, c.name AS center_name, s.parent_name, s.parent_phone
     FROM students s
     JOIN batches b ON b.id = s.batch_id
     JOIN centers c ON c.id = s.center_id";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewCenter {
    #[validate(length(min = 1, max = 120, message = "Center name is required"))]
    pub name: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewBatch {
    #[validate(length(min = 1, max = 120, message = "Batch name is required"))]
    pub name: String,
    pub center_id: i64,
    pub coach_id: Option<i64>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewStudent {
    #[validate(length(min = 1, max = 120, message = "Student name is required"))]
    pub full_name: String,
    #[validate(range(min = 1, max = 99, message = "Age must be between 1 and 99"))]
    pub age: i64,
    pub batch_id: i64,
    #[serde(default)]
    pub parent_name: String,
    #[validate(regex(path = *PHONE_NUMBER, message = "Invalid phone number"))]
    pub parent_phone: Option<String>,
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

/// Authorizes `scope` for `user` and, for a single center, checks that it exists.
#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn check_scope(
    pool: &Pool<Sqlite>,
    user: &User,
    scope: &EffectiveScope,
) -> Result<(), AppError> {
    scope.authorize(user)?;

    if let EffectiveScope::SingleCenter(center_id) = scope {
        get_center(pool, *center_id).await?;
    }

    Ok(())
}

#[instrument]
pub async fn get_center(pool: &Pool<Sqlite>, id: i64) -> Result<Center, AppError> {
    let row =
        sqlx::query_as::<_, DbCenter>("SELECT id, name, location FROM centers WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    row.map(Center::from)
        .ok_or_else(|| AppError::NotFound(format!("Center {} not found", id)))
}

/// A center that can still take new batches and students.
#[instrument]
async fn get_active_center(pool: &Pool<Sqlite>, id: i64) -> Result<Center, AppError> {
    let center = get_center(pool, id).await?;

    let (retired,): (bool,) = sqlx::query_as("SELECT retired FROM centers WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;

    if retired {
        return Err(AppError::Validation(format!(
            "center {} is retired",
            center.name
        )));
    }

    Ok(center)
}

#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn list_centers(
    pool: &Pool<Sqlite>,
    user: &User,
    scope: &EffectiveScope,
) -> Result<Vec<Center>, AppError> {
    info!("Listing centers");
    check_scope(pool, user, scope).await?;

    let center = scope.center_id();
    let rows = sqlx::query_as::<_, DbCenter>(
        "SELECT id, name, location FROM centers
         WHERE retired = 0 AND (? IS NULL OR id = ?)
         ORDER BY name, id",
    )
    .bind(center)
    .bind(center)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Center::from).collect())
}

#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn create_center(
    pool: &Pool<Sqlite>,
    user: &User,
    center: &NewCenter,
) -> Result<Center, AppError> {
    info!("Creating center");
    user.require_capability(Capability::ManageCenters)?;
    center.validate()?;

    let res = sqlx::query("INSERT INTO centers (name, location) VALUES (?, ?)")
        .bind(&center.name)
        .bind(&center.location)
        .execute(pool)
        .await?;

    get_center(pool, res.last_insert_rowid()).await
}

/// Hides a center from listings. Its batches, students and ledgers are kept.
#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn retire_center(pool: &Pool<Sqlite>, user: &User, id: i64) -> Result<(), AppError> {
    info!("Retiring center");
    user.require_capability(Capability::ManageCenters)?;

    let res = sqlx::query("UPDATE centers SET retired = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Center {} not found", id)));
    }

    Ok(())
}

#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn get_batch(pool: &Pool<Sqlite>, user: &User, id: i64) -> Result<Batch, AppError> {
    let row = sqlx::query_as::<_, DbBatch>(&format!("{} WHERE b.id = ?", BATCH_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    let batch = row
        .map(Batch::from)
        .ok_or_else(|| AppError::NotFound(format!("Batch {} not found", id)))?;

    authorize_center(user, batch.center_id)?;
    Ok(batch)
}

#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn list_batches(
    pool: &Pool<Sqlite>,
    user: &User,
    scope: &EffectiveScope,
) -> Result<Vec<Batch>, AppError> {
    info!("Listing batches");
    check_scope(pool, user, scope).await?;

    let center = scope.center_id();
    let rows = sqlx::query_as::<_, DbBatch>(&format!(
        "{} WHERE c.retired = 0 AND (? IS NULL OR b.center_id = ?) ORDER BY b.name, b.id",
        BATCH_SELECT
    ))
    .bind(center)
    .bind(center)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Batch::from).collect())
}

/// A coach may lead a batch only if their role allows it and, when bound to a
/// center, only batches in that center.
async fn check_coach(pool: &Pool<Sqlite>, coach_id: i64, center_id: i64) -> Result<(), AppError> {
    let coach = get_user(pool, coach_id).await?;

    if !coach.role.can_lead_batch() {
        return Err(AppError::Validation(format!(
            "user {} with role {} cannot lead a batch",
            coach.id, coach.role
        )));
    }

    match coach.center_id {
        Some(home) if home != center_id => Err(AppError::ScopeViolation(format!(
            "coach {} belongs to center {}, not center {}",
            coach.id, home, center_id
        ))),
        _ => Ok(()),
    }
}

#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn create_batch(
    pool: &Pool<Sqlite>,
    user: &User,
    batch: &NewBatch,
) -> Result<Batch, AppError> {
    info!("Creating batch");
    user.require_capability(Capability::ManageRoster)?;
    batch.validate()?;
    authorize_center(user, batch.center_id)?;
    get_active_center(pool, batch.center_id).await?;

    if let (Some(start), Some(end)) = (batch.start_time, batch.end_time) {
        if start >= end {
            return Err(AppError::Validation(format!(
                "batch start {} must be before end {}",
                start, end
            )));
        }
    }

    if let Some(coach_id) = batch.coach_id {
        check_coach(pool, coach_id, batch.center_id).await?;
    }

    let res = sqlx::query(
        "INSERT INTO batches (name, coach_id, center_id, start_time, end_time)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&batch.name)
    .bind(batch.coach_id)
    .bind(batch.center_id)
    .bind(batch.start_time)
    .bind(batch.end_time)
    .execute(pool)
    .await?;

    get_batch(pool, user, res.last_insert_rowid()).await
}

/// Puts `coach_id` in charge of the batch, or clears the coach when `None`.
#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn assign_coach(
    pool: &Pool<Sqlite>,
    user: &User,
    batch_id: i64,
    coach_id: Option<i64>,
) -> Result<Batch, AppError> {
    info!("Assigning coach to batch");
    user.require_capability(Capability::ManageRoster)?;

    let batch = get_batch(pool, user, batch_id).await?;

    if let Some(coach_id) = coach_id {
        check_coach(pool, coach_id, batch.center_id).await?;
    }

    sqlx::query("UPDATE batches SET coach_id = ? WHERE id = ?")
        .bind(coach_id)
        .bind(batch_id)
        .execute(pool)
        .await?;

    get_batch(pool, user, batch_id).await
}

#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn list_coaches(
    pool: &Pool<Sqlite>,
    user: &User,
    scope: &EffectiveScope,
) -> Result<Vec<Coach>, AppError> {
    info!("Listing coaches");
    check_scope(pool, user, scope).await?;

    let center = scope.center_id();
    let rows = sqlx::query_as::<_, DbCoach>(
        "SELECT u.id, u.full_name, u.email, u.role, u.center_id,
            (SELECT COUNT(*) FROM batches b WHERE b.coach_id = u.id) AS batch_count
         FROM users u
         LEFT JOIN centers c ON c.id = u.center_id
         WHERE u.role IN ('coach', 'head_coach')
            AND (u.center_id IS NULL OR c.retired = 0)
            AND (? IS NULL OR u.center_id = ?)
         ORDER BY u.full_name, u.id",
    )
    .bind(center)
    .bind(center)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Coach::from).collect())
}

#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn get_student(pool: &Pool<Sqlite>, user: &User, id: i64) -> Result<Student, AppError> {
    let row = sqlx::query_as::<_, DbStudent>(&format!("{} WHERE s.id = ?", STUDENT_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    let student = row
        .map(Student::from)
        .ok_or_else(|| AppError::NotFound(format!("Student {} not found", id)))?;

    authorize_center(user, student.center_id)?;
    Ok(student)
}

#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn list_students(
    pool: &Pool<Sqlite>,
    user: &User,
    scope: &EffectiveScope,
    batch_id: Option<i64>,
) -> Result<Vec<Student>, AppError> {
    info!("Listing students");
    check_scope(pool, user, scope).await?;

    let center = scope.center_id();
    let rows = sqlx::query_as::<_, DbStudent>(&format!(
        "{} WHERE c.retired = 0
            AND (? IS NULL OR s.center_id = ?)
            AND (? IS NULL OR s.batch_id = ?)
         ORDER BY s.full_name, s.id",
        STUDENT_SELECT
    ))
    .bind(center)
    .bind(center)
    .bind(batch_id)
    .bind(batch_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Student::from).collect())
}

/// Inserts a student, copying the center from its batch.
#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn create_student(
    pool: &Pool<Sqlite>,
    user: &User,
    student: &NewStudent,
) -> Result<Student, AppError> {
    info!("Creating student");
    user.require_capability(Capability::ManageRoster)?;
    student.validate()?;

    let batch = get_batch(pool, user, student.batch_id).await?;
    get_active_center(pool, batch.center_id).await?;

    let res = sqlx::query(
        "INSERT INTO students (full_name, age, batch_id, center_id, parent_name, parent_phone)
         SELECT ?, ?, b.id, b.center_id, ?, ?
         FROM batches b WHERE b.id = ?",
    )
    .bind(&student.full_name)
    .bind(student.age)
    .bind(&student.parent_name)
    .bind(student.parent_phone.as_deref().unwrap_or_default())
    .bind(batch.id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Batch {} not found", batch.id)));
    }

    get_student(pool, user, res.last_insert_rowid()).await
}

/// Moves a student to another batch, carrying the batch's center along.
#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn move_student(
    pool: &Pool<Sqlite>,
    user: &User,
    student_id: i64,
    batch_id: i64,
) -> Result<Student, AppError> {
    info!("Moving student to batch");
    user.require_capability(Capability::ManageRoster)?;

    get_student(pool, user, student_id).await?;
    let batch = get_batch(pool, user, batch_id).await?;
    get_active_center(pool, batch.center_id).await?;

    sqlx::query(
        "UPDATE students
         SET batch_id = ?, center_id = (SELECT center_id FROM batches WHERE id = ?)
         WHERE id = ?",
    )
    .bind(batch.id)
    .bind(batch.id)
    .bind(student_id)
    .execute(pool)
    .await?;

    get_student(pool, user, student_id).await
}
