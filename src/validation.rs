use crate::error::AppError;
use rocket::Request;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::http::Status;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::instrument;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ValidationResponse {
    pub status: String,
    pub errors: HashMap<String, Vec<String>>,
}

impl ValidationResponse {
    pub fn new(errors: HashMap<String, Vec<String>>) -> Self {
        Self {
            status: "error".to_string(),
            errors,
        }
    }

    pub fn with_error(field: &str, message: &str) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.to_string(), vec![message.to_string()]);
        Self::new(errors)
    }

    /// A refusal the user can act on, such as no team leader taking a new
    /// student yet.
    pub fn warning(field: &str, message: &str) -> Self {
        Self {
            status: "warning".to_string(),
            ..Self::with_error(field, message)
        }
    }
}

pub type ApiError = Custom<Json<ValidationResponse>>;

pub trait ToValidationResponse {
    fn to_validation_response(self) -> ApiError;
}

impl ToValidationResponse for AppError {
    #[instrument]
    fn to_validation_response(self) -> ApiError {
        self.log_and_record("API request");
        let status = self.status_code();

        let (field, message) = match &self {
            AppError::Database(_) => ("database", "Database error".to_string()),
            AppError::Authentication(msg) => ("authentication", msg.clone()),
            AppError::NotFound(msg) => ("resource", msg.clone()),
            AppError::Validation(msg) => ("validation", msg.clone()),
            AppError::NoEligibleTeam { .. } => ("team_leader", self.to_string()),
            AppError::InconsistentRoster(msg) => ("roster", msg.clone()),
            AppError::Transient(_) => ("service", "Please try again shortly".to_string()),
            AppError::ExternalService(msg) => ("service", msg.clone()),
            AppError::Internal(_) => ("server", "Internal server error".to_string()),
        };

        let response = match &self {
            AppError::NoEligibleTeam { .. } => ValidationResponse::warning(field, &message),
            _ => ValidationResponse::with_error(field, &message),
        };

        Custom(status, Json(response))
    }
}

impl ToValidationResponse for Status {
    #[instrument]
    fn to_validation_response(self) -> ApiError {
        let (field, message) = match self {
            s if s == Status::Forbidden => (
                "permission",
                "You don't have permission to perform this action",
            ),
            s if s == Status::Unauthorized => ("authentication", "Authentication required"),
            s if s == Status::NotFound => ("resource", "Resource not found"),
            s if s == Status::Conflict => ("resource", "Resource already exists"),
            s if s == Status::BadRequest => ("request", "Bad request"),
            s if s == Status::UnprocessableEntity => ("validation", "Validation failed"),
            s if s == Status::ServiceUnavailable => ("service", "Service unavailable"),
            _ => ("error", "An error occurred"),
        };

        Custom(self, Json(ValidationResponse::with_error(field, message)))
    }
}

impl ToValidationResponse for validator::ValidationErrors {
    fn to_validation_response(self) -> ApiError {
        let errors = self
            .field_errors()
            .into_iter()
            .map(|(field, field_errors)| {
                let messages = field_errors
                    .iter()
                    .map(|error| {
                        error
                            .message
                            .clone()
                            .unwrap_or_else(|| "Invalid value".into())
                            .to_string()
                    })
                    .collect();
                (field.to_string(), messages)
            })
            .collect();

        Custom(Status::UnprocessableEntity, Json(ValidationResponse::new(errors)))
    }
}

/// Runs the `validator` rules of a JSON body and unwraps it.
pub trait JsonValidateExt<T> {
    fn validate_custom(self) -> Result<T, ApiError>;
}

impl<T: Validate> JsonValidateExt<T> for Json<T> {
    fn validate_custom(self) -> Result<T, ApiError> {
        let inner = self.into_inner();
        inner.validate().map_err(|e| e.to_validation_response())?;
        Ok(inner)
    }
}

pub trait AppErrorExt<T> {
    fn validate_custom(self) -> Result<T, ApiError>;
}

impl<T> AppErrorExt<T> for Result<T, AppError> {
    fn validate_custom(self) -> Result<T, ApiError> {
        self.map_err(|e| e.to_validation_response())
    }
}

pub trait PermissionCheckExt<T> {
    fn validate_custom(self) -> Result<T, ApiError>;
}

impl<T> PermissionCheckExt<T> for Result<T, Status> {
    fn validate_custom(self) -> Result<T, ApiError> {
        self.map_err(|status| status.to_validation_response())
    }
}

#[catch(400)]
pub fn bad_request_api(_req: &Request) -> ApiError {
    Status::BadRequest.to_validation_response()
}

/// Bodies that parse as JSON but not as the expected type land here.
#[catch(422)]
pub fn unprocessable_api(_req: &Request) -> ApiError {
    Custom(
        Status::UnprocessableEntity,
        Json(ValidationResponse::with_error(
            "request",
            "Request body has missing or invalid fields",
        )),
    )
}
