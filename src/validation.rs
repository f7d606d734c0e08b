use crate::error::AppError;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::{self, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::instrument;
use validator::Validate;

pub type ApiResult<T> = Result<T, Custom<Json<ValidationResponse>>>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ValidationResponse {
    pub status: String,
    pub errors: HashMap<String, Vec<String>>,
    /// Set when the same request may succeed if sent again.
    #[serde(default)]
    pub retry: bool,
}

impl ValidationResponse {
    pub fn new(errors: HashMap<String, Vec<String>>) -> Self {
        Self {
            status: "error".to_string(),
            errors,
            retry: false,
        }
    }

    pub fn with_error(field: &str, message: &str) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.to_string(), vec![message.to_string()]);
        Self::new(errors)
    }
}

pub trait ToValidationResponse {
    fn to_validation_response(self) -> Custom<Json<ValidationResponse>>;
}

impl ToValidationResponse for AppError {
    #[instrument]
    fn to_validation_response(self) -> Custom<Json<ValidationResponse>> {
        self.log_and_record("API error");
        let status = self.status_code();

        let (field, message) = match &self {
            AppError::Database(_) => (
                "database",
                "Could not reach the database, please retry".to_string(),
            ),
            AppError::Authentication(msg) => ("authentication", msg.clone()),
            AppError::Permission(msg) => ("permission", msg.clone()),
            AppError::ScopeViolation(msg) => ("center", msg.clone()),
            AppError::NotFound(msg) => ("resource", msg.clone()),
            AppError::Validation(msg) => ("request", msg.clone()),
            AppError::AttendanceWrite(_) => (
                "attendance",
                "Attendance was not saved, please retry".to_string(),
            ),
            AppError::UnknownRole(_) | AppError::Internal(_) => {
                ("server", "Internal server error".to_string())
            }
        };

        let mut response = ValidationResponse::with_error(field, &message);
        response.retry = self.is_retryable();
        Custom(status, Json(response))
    }
}

#[derive(Debug)]
pub struct ValidationErrorWrapper(pub validator::ValidationErrors);

impl From<ValidationErrorWrapper> for Custom<Json<ValidationResponse>> {
    #[instrument]
    fn from(wrapper: ValidationErrorWrapper) -> Self {
        let errors = wrapper.0;
        let mut error_map = HashMap::new();

        for (field, field_errors) in errors.field_errors() {
            let error_messages: Vec<String> = field_errors
                .iter()
                .map(|error| {
                    error
                        .message
                        .clone()
                        .unwrap_or_else(|| "Invalid value".into())
                        .to_string()
                })
                .collect();

            error_map.insert(field.to_string(), error_messages);
        }

        Custom(
            Status::UnprocessableEntity,
            Json(ValidationResponse::new(error_map)),
        )
    }
}

/// Unwraps a JSON body, turning malformed payloads and failed field checks into 422s.
pub trait JsonValidateExt<T> {
    fn validate_custom(self) -> ApiResult<T>;
}

impl<'r, T: Validate> JsonValidateExt<T> for Result<Json<T>, json::Error<'r>> {
    fn validate_custom(self) -> ApiResult<T> {
        let value = match self {
            Ok(body) => body.into_inner(),
            Err(json::Error::Parse(_, err)) => {
                tracing::warn!(error = %err, "Malformed request body");
                return Err(Custom(
                    Status::UnprocessableEntity,
                    Json(ValidationResponse::with_error("body", &err.to_string())),
                ));
            }
            Err(json::Error::Io(err)) => {
                tracing::warn!(error = %err, "Could not read request body");
                return Err(Custom(
                    Status::BadRequest,
                    Json(ValidationResponse::with_error("body", "Could not read request body")),
                ));
            }
        };

        value
            .validate()
            .map_err(|e| Custom::from(ValidationErrorWrapper(e)))?;

        Ok(value)
    }
}

pub trait AppErrorExt<T> {
    fn or_respond(self) -> ApiResult<T>;
}

impl<T> AppErrorExt<T> for Result<T, AppError> {
    fn or_respond(self) -> ApiResult<T> {
        self.map_err(AppError::to_validation_response)
    }
}
