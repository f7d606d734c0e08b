use chrono::{NaiveDate, Utc};
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::json::{self, Json};
use rocket::serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::attendance::{
    AttendanceEntry, AttendanceMark, BatchAttendance, attendance_rate, batch_summary,
    list_attendance, mark_attendance, record_attendance,
};
use crate::auth::{
    Capabilities, Capability, CenterFilter, EffectiveScope, Role, SESSION_COOKIE, User,
    UserSession, resolve,
};
use crate::db::{NewUser, authenticate_user, create_user, create_user_session, get_user, invalidate_session};
use crate::env::AppConfig;
use crate::error::AppError;
use crate::fees::{
    FeeTotals, NewDue, NewPayment, delete_payment, fee_totals, list_payments, record_payment,
    refresh_overdue, settle_due, upsert_due,
};
use crate::models::{AttendanceRecord, Batch, Center, Coach, FeePayment, FeeStatus, PaymentMode, Student};
use crate::repository::{
    NewBatch, NewCenter, NewStudent, assign_coach, create_batch, create_center, create_student,
    list_batches, list_centers, list_coaches, list_students, move_student, retire_center,
};
use crate::stats::{DashboardStats, dashboard_stats};
use crate::validation::{ApiResult, AppErrorExt, JsonValidateExt, ValidationResponse};

fn scope_for(user: &User, center: Option<&str>) -> Result<EffectiveScope, AppError> {
    resolve(user, CenterFilter::parse(center)?)
}

/// `"all"` or missing means no filter.
fn parse_id_filter(name: &str, raw: Option<&str>) -> Result<Option<i64>, AppError> {
    match raw.map(str::trim) {
        None | Some("") | Some("all") => Ok(None),
        Some(value) => value
            .parse::<i64>()
            .map(Some)
            .map_err(|_| AppError::Validation(format!("invalid {} filter '{}'", name, value))),
    }
}

/// ISO date, defaulting to today (UTC).
fn parse_date(raw: Option<&str>) -> Result<NaiveDate, AppError> {
    match raw {
        None | Some("") => Ok(Utc::now().date_naive()),
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map_err(|_| AppError::Validation(format!("invalid date '{}'", value))),
    }
}

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Email is required"))]
    email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub center_id: Option<i64>,
    pub capabilities: Capabilities,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            capabilities: user.role.capabilities(),
            role: user.role.to_string(),
            email: user.email,
            full_name: user.full_name,
            center_id: user.center_id,
        }
    }
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Result<Json<LoginRequest>, json::Error<'_>>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ApiResult<Json<LoginResponse>> {
    let validated = login.validate_custom()?;

    match authenticate_user(db, &validated.email, &validated.password)
        .await
        .or_respond()?
    {
        Some(user) => {
            let token = UserSession::generate_token();
            let expires_at = Utc::now() + chrono::Duration::hours(config.session_hours);

            create_user_session(db, user.id, &token, expires_at.naive_utc())
                .await
                .or_respond()?;

            cookies.add_private(
                Cookie::build((SESSION_COOKIE, token))
                    .same_site(SameSite::Lax)
                    .http_only(true)
                    .max_age(rocket::time::Duration::hours(config.session_hours)),
            );

            Ok(Json(LoginResponse {
                success: true,
                user: Some(UserData::from(user)),
                error: None,
            }))
        }
        None => Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid email or password".to_string()),
        })),
    }
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Status {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(e) = invalidate_session(db, &token).await {
            e.log_and_record("Logout");
        }
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));

    Status::Ok
}

#[get("/me")]
pub async fn api_me(user: User) -> Json<UserData> {
    Json(UserData::from(user))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

#[derive(Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(email(message = "Invalid email address"))]
    email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
    #[validate(length(min = 1, message = "Name is required"))]
    full_name: String,
    role: String,
    center_id: Option<i64>,
}

#[post("/users", data = "<request>")]
pub async fn api_create_user(
    request: Result<Json<CreateUserRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<UserData>>> {
    let validated = request.validate_custom()?;
    user.require_capability(Capability::MutateUsers)
        .or_respond()?;

    let role = validated
        .role
        .parse::<Role>()
        .map_err(|e| AppError::Validation(e.to_string()))
        .or_respond()?;

    let id = create_user(
        db,
        &NewUser {
            email: &validated.email,
            password: &validated.password,
            full_name: &validated.full_name,
            role,
            center_id: validated.center_id,
        },
    )
    .await
    .or_respond()?;

    let created = get_user(db, id).await.or_respond()?;
    Ok(Custom(Status::Created, Json(UserData::from(created))))
}

#[get("/centers?<center>")]
pub async fn api_get_centers(
    center: Option<String>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<Center>>> {
    let scope = scope_for(&user, center.as_deref()).or_respond()?;
    let centers = list_centers(db, &user, &scope).await.or_respond()?;
    Ok(Json(centers))
}

#[post("/centers", data = "<request>")]
pub async fn api_create_center(
    request: Result<Json<NewCenter>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<Center>>> {
    let validated = request.validate_custom()?;
    let center = create_center(db, &user, &validated).await.or_respond()?;
    Ok(Custom(Status::Created, Json(center)))
}

#[delete("/centers/<id>")]
pub async fn api_retire_center(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Status> {
    retire_center(db, &user, id).await.or_respond()?;
    Ok(Status::Ok)
}

#[get("/students?<center>&<batch>")]
pub async fn api_get_students(
    center: Option<String>,
    batch: Option<String>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<Student>>> {
    let scope = scope_for(&user, center.as_deref()).or_respond()?;
    let batch = parse_id_filter("batch", batch.as_deref()).or_respond()?;
    let students = list_students(db, &user, &scope, batch).await.or_respond()?;
    Ok(Json(students))
}

#[post("/students", data = "<request>")]
pub async fn api_create_student(
    request: Result<Json<NewStudent>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<Student>>> {
    let validated = request.validate_custom()?;
    let student = create_student(db, &user, &validated).await.or_respond()?;
    Ok(Custom(Status::Created, Json(student)))
}

#[derive(Deserialize, Validate)]
pub struct MoveStudentRequest {
    batch_id: i64,
}

#[put("/students/<id>/batch", data = "<request>")]
pub async fn api_move_student(
    id: i64,
    request: Result<Json<MoveStudentRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Student>> {
    let validated = request.validate_custom()?;
    let student = move_student(db, &user, id, validated.batch_id)
        .await
        .or_respond()?;
    Ok(Json(student))
}

#[get("/batches?<center>")]
pub async fn api_get_batches(
    center: Option<String>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<Batch>>> {
    let scope = scope_for(&user, center.as_deref()).or_respond()?;
    let batches = list_batches(db, &user, &scope).await.or_respond()?;
    Ok(Json(batches))
}

#[post("/batches", data = "<request>")]
pub async fn api_create_batch(
    request: Result<Json<NewBatch>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<Batch>>> {
    let validated = request.validate_custom()?;
    let batch = create_batch(db, &user, &validated).await.or_respond()?;
    Ok(Custom(Status::Created, Json(batch)))
}

#[derive(Deserialize, Validate)]
pub struct AssignCoachRequest {
    coach_id: Option<i64>,
}

#[put("/batches/<id>/coach", data = "<request>")]
pub async fn api_assign_coach(
    id: i64,
    request: Result<Json<AssignCoachRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Batch>> {
    let validated = request.validate_custom()?;
    let batch = assign_coach(db, &user, id, validated.coach_id)
        .await
        .or_respond()?;
    Ok(Json(batch))
}

#[get("/coaches?<center>")]
pub async fn api_get_coaches(
    center: Option<String>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<Coach>>> {
    let scope = scope_for(&user, center.as_deref()).or_respond()?;
    let coaches = list_coaches(db, &user, &scope).await.or_respond()?;
    Ok(Json(coaches))
}

#[derive(Serialize, Deserialize)]
pub struct AttendanceResponse {
    pub date: NaiveDate,
    pub attendance_rate: f64,
    pub records: Vec<AttendanceRecord>,
}

#[get("/attendance?<center>&<date>&<batch>")]
pub async fn api_get_attendance(
    center: Option<String>,
    date: Option<String>,
    batch: Option<String>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<AttendanceResponse>> {
    let scope = scope_for(&user, center.as_deref()).or_respond()?;
    let date = parse_date(date.as_deref()).or_respond()?;
    let batch = parse_id_filter("batch", batch.as_deref()).or_respond()?;

    let records = list_attendance(db, &user, &scope, date, batch)
        .await
        .or_respond()?;
    let attendance_rate = attendance_rate(db, &user, &scope, date)
        .await
        .or_respond()?;

    Ok(Json(AttendanceResponse {
        date,
        attendance_rate,
        records,
    }))
}

#[post("/attendance", data = "<entry>")]
pub async fn api_record_attendance(
    entry: Result<Json<AttendanceEntry>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<AttendanceRecord>> {
    let entry = entry.validate_custom()?;
    let record = record_attendance(db, &user, &entry).await.or_respond()?;
    Ok(Json(record))
}

#[derive(Deserialize, Validate)]
pub struct AttendanceSubmission {
    marks: Vec<AttendanceMark>,
}

#[put("/attendance/batch/<batch_id>/<date>", data = "<submission>")]
pub async fn api_mark_attendance(
    batch_id: i64,
    date: &str,
    submission: Result<Json<AttendanceSubmission>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<AttendanceRecord>>> {
    let submission = submission.validate_custom()?;
    let date = parse_date(Some(date)).or_respond()?;

    let records = mark_attendance(db, &user, batch_id, date, &submission.marks)
        .await
        .or_respond()?;
    Ok(Json(records))
}

#[get("/attendance/summary?<center>&<date>")]
pub async fn api_attendance_summary(
    center: Option<String>,
    date: Option<String>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<Vec<BatchAttendance>>> {
    let scope = scope_for(&user, center.as_deref()).or_respond()?;
    let date = parse_date(date.as_deref()).or_respond()?;
    let summary = batch_summary(db, &user, &scope, date).await.or_respond()?;
    Ok(Json(summary))
}

#[derive(Serialize, Deserialize)]
pub struct FeePaymentsResponse {
    pub payments: Vec<FeePayment>,
    pub totals: FeeTotals,
    pub collection_rate: f64,
}

#[get("/fee_payments?<center>&<status>")]
pub async fn api_get_fee_payments(
    center: Option<String>,
    status: Option<String>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<FeePaymentsResponse>> {
    let scope = scope_for(&user, center.as_deref()).or_respond()?;
    let status = status
        .as_deref()
        .map(str::parse::<FeeStatus>)
        .transpose()
        .or_respond()?;

    let payments = list_payments(db, &user, &scope, status)
        .await
        .or_respond()?;
    let totals = fee_totals(db, &user, &scope).await.or_respond()?;

    Ok(Json(FeePaymentsResponse {
        payments,
        collection_rate: totals.collection_rate(),
        totals,
    }))
}

#[post("/fee_payments", data = "<request>")]
pub async fn api_record_payment(
    request: Result<Json<NewPayment>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Custom<Json<FeePayment>>> {
    let validated = request.validate_custom()?;
    let payment = record_payment(db, &user, &validated, Utc::now())
        .await
        .or_respond()?;
    Ok(Custom(Status::Created, Json(payment)))
}

#[post("/fee_payments/dues", data = "<request>")]
pub async fn api_upsert_due(
    request: Result<Json<NewDue>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<FeePayment>> {
    let validated = request.validate_custom()?;
    let payment = upsert_due(db, &user, &validated, Utc::now().date_naive())
        .await
        .or_respond()?;
    Ok(Json(payment))
}

#[derive(Deserialize, Validate)]
pub struct SettleRequest {
    mode: PaymentMode,
}

#[put("/fee_payments/<id>/settle", data = "<request>")]
pub async fn api_settle_due(
    id: i64,
    request: Result<Json<SettleRequest>, json::Error<'_>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<FeePayment>> {
    let validated = request.validate_custom()?;
    let payment = settle_due(db, &user, id, validated.mode, Utc::now())
        .await
        .or_respond()?;
    Ok(Json(payment))
}

#[derive(Serialize, Deserialize)]
pub struct RefreshOverdueResponse {
    pub updated: u64,
}

#[post("/fee_payments/refresh_overdue?<center>")]
pub async fn api_refresh_overdue(
    center: Option<String>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<RefreshOverdueResponse>> {
    let scope = scope_for(&user, center.as_deref()).or_respond()?;
    let updated = refresh_overdue(db, &user, &scope, Utc::now().date_naive())
        .await
        .or_respond()?;
    Ok(Json(RefreshOverdueResponse { updated }))
}

#[delete("/fee_payments/<id>")]
pub async fn api_delete_payment(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Status> {
    delete_payment(db, &user, id).await.or_respond()?;
    Ok(Status::Ok)
}

#[get("/dashboard/stats?<center>&<date>")]
pub async fn api_dashboard_stats(
    center: Option<String>,
    date: Option<String>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ApiResult<Json<DashboardStats>> {
    let filter = CenterFilter::parse(center.as_deref()).or_respond()?;
    let date = parse_date(date.as_deref()).or_respond()?;
    let stats = dashboard_stats(db, &user, filter, date)
        .await
        .or_respond()?;
    Ok(Json(stats))
}

#[catch(422)]
pub fn unprocessable_api() -> Custom<Json<ValidationResponse>> {
    Custom(
        Status::UnprocessableEntity,
        Json(ValidationResponse::with_error("request", "Validation failed")),
    )
}
