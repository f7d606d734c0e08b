use opentelemetry_semantic_conventions::{attribute::OTEL_STATUS_CODE, trace::ERROR_TYPE};
use rocket::http::Status;
use thiserror::Error;
use tracing::{Span, error, warn};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Scope violation: {0}")]
    ScopeViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Attendance write failed: {0}")]
    AttendanceWrite(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Authentication(_) => "authentication_error",
            AppError::Permission(_) => "permission_error",
            AppError::ScopeViolation(_) => "scope_violation_error",
            AppError::NotFound(_) => "not_found_error",
            AppError::Validation(_) => "validation_error",
            AppError::UnknownRole(_) => "unknown_role_error",
            AppError::AttendanceWrite(_) => "attendance_write_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Writes that failed for transient reasons can be resubmitted as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::AttendanceWrite(_))
    }

    pub fn log_and_record(&self, ctx: &str) {
        let current_span = Span::current();
        let is_valid_span = !current_span.is_none();

        let message = self.to_string();
        match self {
            AppError::Database(err) => {
                error!(error = %message, context = %ctx, db_error = %err, "Database error");
            }
            AppError::AttendanceWrite(msg) => {
                error!(message = %msg, context = %ctx, "Attendance write error");
            }
            AppError::UnknownRole(msg) | AppError::Internal(msg) => {
                error!(message = %msg, context = %ctx, "Internal server error");
            }
            AppError::ScopeViolation(msg) => {
                warn!(message = %msg, context = %ctx, "Scope violation");
            }
            AppError::Authentication(msg)
            | AppError::Permission(msg)
            | AppError::NotFound(msg)
            | AppError::Validation(msg) => {
                warn!(message = %msg, context = %ctx, kind = self.kind(), "Request rejected");
            }
        }

        if is_valid_span {
            current_span.record("error", tracing::field::display(true));
            current_span.record(ERROR_TYPE, tracing::field::display(self.kind()));
            current_span.record("error.message", tracing::field::display(&message));

            if self.status_code().code >= 500 {
                current_span.record(OTEL_STATUS_CODE, tracing::field::display("ERROR"));
            }
        }
    }

    pub fn status_code(&self) -> Status {
        match self {
            AppError::Database(_) => Status::InternalServerError,
            AppError::Authentication(_) => Status::Unauthorized,
            AppError::Permission(_) => Status::Forbidden,
            AppError::ScopeViolation(_) => Status::Forbidden,
            AppError::NotFound(_) => Status::NotFound,
            AppError::Validation(_) => Status::BadRequest,
            AppError::UnknownRole(_) => Status::InternalServerError,
            AppError::AttendanceWrite(_) => Status::ServiceUnavailable,
            AppError::Internal(_) => Status::InternalServerError,
        }
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(error: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("Cryptography error: {}", error))
    }
}
