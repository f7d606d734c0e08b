use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Center {
    pub id: i64,
    pub name: String,
    pub location: String,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbCenter {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub location: Option<String>,
}

impl From<DbCenter> for Center {
    fn from(center: DbCenter) -> Self {
        Self {
            id: center.id.unwrap_or_default(),
            name: center.name.unwrap_or_default(),
            location: center.location.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Batch {
    pub id: i64,
    pub name: String,
    pub coach_id: Option<i64>,
    pub coach_name: Option<String>, // Joined from users
    pub center_id: i64,
    pub center_name: String,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbBatch {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub coach_id: Option<i64>,
    pub coach_name: Option<String>,
    pub center_id: Option<i64>,
    pub center_name: Option<String>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
}

impl From<DbBatch> for Batch {
    fn from(batch: DbBatch) -> Self {
        Self {
            id: batch.id.unwrap_or_default(),
            name: batch.name.unwrap_or_default(),
            coach_id: batch.coach_id,
            coach_name: batch.coach_name,
            center_id: batch.center_id.unwrap_or_default(),
            center_name: batch.center_name.unwrap_or_default(),
            start_time: batch.start_time,
            end_time: batch.end_time,
        }
    }
}

/// A student joined with the names of its batch and center.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Student {
    pub id: i64,
    pub full_name: String,
    pub age: i64,
    pub batch_id: i64,
    pub batch_name: String,
    pub center_id: i64,
    pub center_name: String,
    pub parent_name: String,
    pub parent_phone: String,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbStudent {
    pub id: Option<i64>,
    pub full_name: Option<String>,
    pub age: Option<i64>,
    pub batch_id: Option<i64>,
    pub batch_name: Option<String>,
    pub center_id: Option<i64>,
    pub center_name: Option<String>,
    pub parent_name: Option<String>,
    pub parent_phone: Option<String>,
}

impl From<DbStudent> for Student {
    fn from(student: DbStudent) -> Self {
        Self {
            id: student.id.unwrap_or_default(),
            full_name: student.full_name.unwrap_or_default(),
            age: student.age.unwrap_or_default(),
            batch_id: student.batch_id.unwrap_or_default(),
            batch_name: student.batch_name.unwrap_or_default(),
            center_id: student.center_id.unwrap_or_default(),
            center_name: student.center_name.unwrap_or_default(),
            parent_name: student.parent_name.unwrap_or_default(),
            parent_phone: student.parent_phone.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Coach {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub role: String,
    pub center_id: Option<i64>,
    pub batch_count: i64,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbCoach {
    pub id: Option<i64>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub center_id: Option<i64>,
    pub batch_count: Option<i64>,
}

impl From<DbCoach> for Coach {
    fn from(coach: DbCoach) -> Self {
        Self {
            id: coach.id.unwrap_or_default(),
            full_name: coach.full_name.unwrap_or_default(),
            email: coach.email.unwrap_or_default(),
            role: coach.role.unwrap_or_default(),
            center_id: coach.center_id,
            batch_count: coach.batch_count.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            _ => Err(AppError::Validation(format!(
                "unknown attendance status '{}'",
                s
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub batch_id: i64,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub marked_by: i64,
    pub marked_at: DateTime<Utc>,
    pub center_id: i64,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbAttendanceRecord {
    pub id: Option<i64>,
    pub student_id: Option<i64>,
    pub student_name: Option<String>,
    pub batch_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub status: Option<String>,
    pub marked_by: Option<i64>,
    pub marked_at: Option<DateTime<Utc>>,
    pub center_id: Option<i64>,
}

impl TryFrom<DbAttendanceRecord> for AttendanceRecord {
    type Error = AppError;

    fn try_from(record: DbAttendanceRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record.id.unwrap_or_default(),
            student_id: record.student_id.unwrap_or_default(),
            student_name: record.student_name.unwrap_or_default(),
            batch_id: record.batch_id.unwrap_or_default(),
            date: record.date.unwrap_or_default(),
            status: record.status.unwrap_or_default().parse()?,
            marked_by: record.marked_by.unwrap_or_default(),
            marked_at: record.marked_at.unwrap_or_else(Utc::now),
            center_id: record.center_id.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeStatus {
    Paid,
    Due,
    Overdue,
}

impl FeeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeStatus::Paid => "paid",
            FeeStatus::Due => "due",
            FeeStatus::Overdue => "overdue",
        }
    }

    pub fn is_outstanding(&self) -> bool {
        matches!(self, FeeStatus::Due | FeeStatus::Overdue)
    }

    /// Status of an unpaid record as of `today`.
    pub fn for_due_date(due_date: NaiveDate, today: NaiveDate) -> Self {
        if due_date < today {
            FeeStatus::Overdue
        } else {
            FeeStatus::Due
        }
    }
}

impl FromStr for FeeStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paid" => Ok(FeeStatus::Paid),
            "due" => Ok(FeeStatus::Due),
            "overdue" => Ok(FeeStatus::Overdue),
            _ => Err(AppError::Validation(format!("unknown fee status '{}'", s))),
        }
    }
}

impl fmt::Display for FeeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Cash,
    Upi,
    Card,
    BankTransfer,
    Cheque,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Cash => "cash",
            PaymentMode::Upi => "upi",
            PaymentMode::Card => "card",
            PaymentMode::BankTransfer => "bank_transfer",
            PaymentMode::Cheque => "cheque",
        }
    }
}

impl FromStr for PaymentMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(PaymentMode::Cash),
            "upi" => Ok(PaymentMode::Upi),
            "card" => Ok(PaymentMode::Card),
            "bank_transfer" => Ok(PaymentMode::BankTransfer),
            "cheque" => Ok(PaymentMode::Cheque),
            _ => Err(AppError::Validation(format!("unknown payment mode '{}'", s))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FeePayment {
    pub id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub amount: f64,
    pub due_date: Option<NaiveDate>,
    pub payment_date: Option<DateTime<Utc>>,
    pub payment_mode: Option<PaymentMode>,
    pub status: FeeStatus,
    pub receipt_number: Option<String>,
    pub center_id: i64,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbFeePayment {
    pub id: Option<i64>,
    pub student_id: Option<i64>,
    pub student_name: Option<String>,
    pub amount: Option<f64>,
    pub due_date: Option<NaiveDate>,
    pub payment_date: Option<DateTime<Utc>>,
    pub payment_mode: Option<String>,
    pub status: Option<String>,
    pub receipt_number: Option<String>,
    pub center_id: Option<i64>,
}

impl TryFrom<DbFeePayment> for FeePayment {
    type Error = AppError;

    fn try_from(payment: DbFeePayment) -> Result<Self, Self::Error> {
        let status: FeeStatus = payment.status.unwrap_or_default().parse()?;
        let payment_mode = payment
            .payment_mode
            .as_deref()
            .map(str::parse::<PaymentMode>)
            .transpose()?;

        if status == FeeStatus::Paid && (payment.payment_date.is_none() || payment_mode.is_none())
        {
            return Err(AppError::Internal(format!(
                "fee payment {} is paid without payment date or mode",
                payment.id.unwrap_or_default()
            )));
        }

        Ok(Self {
            id: payment.id.unwrap_or_default(),
            student_id: payment.student_id.unwrap_or_default(),
            student_name: payment.student_name.unwrap_or_default(),
            amount: payment.amount.unwrap_or_default(),
            due_date: payment.due_date,
            payment_date: payment.payment_date,
            payment_mode,
            status,
            receipt_number: payment.receipt_number,
            center_id: payment.center_id.unwrap_or_default(),
        })
    }
}
