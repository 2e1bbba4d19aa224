use opentelemetry_semantic_conventions::{attribute::OTEL_STATUS_CODE, trace::ERROR_TYPE};
use rocket::http::Status;
use thiserror::Error;
use tracing::{Span, error, warn};

use crate::models::Gender;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),


    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No suitable team leader found for age {age} and gender {gender}")]
    NoEligibleTeam { age: i64, gender: Gender },

    #[error("Inconsistent roster: {0}")]
    InconsistentRoster(String),

    #[error("Transient store failure: {0}")]
    Transient(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// SQLite primary/extended result codes that mean "someone else holds the lock".
const CONTENTION_CODES: &[&str] = &["5", "6", "261", "262", "517"];

impl AppError {
    /// Stable identifier recorded as `error.type` on the request span.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Authentication(_) => "authentication_error",
            AppError::NotFound(_) => "not_found_error",
            AppError::Validation(_) => "validation_error",
            AppError::NoEligibleTeam { .. } => "no_eligible_team",
            AppError::InconsistentRoster(_) => "inconsistent_roster",
            AppError::Transient(_) => "transient_store_failure",
            AppError::ExternalService(_) => "external_service_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Failures of the service itself, as opposed to bad or unlucky requests.
    fn is_server_fault(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Internal(_)
                | AppError::ExternalService(_)
                | AppError::InconsistentRoster(_)
        )
    }

    pub fn log_and_record(&self, ctx: &str) {
        let kind = self.kind();
        let message = self.to_string();

        if self.is_server_fault() {
            error!(kind, context = %ctx, "{}", message);
        } else {
            warn!(kind, context = %ctx, "{}", message);
        }

        let span = Span::current();
        if span.is_none() {
            return;
        }
        span.record("error", tracing::field::display(true));
        span.record(ERROR_TYPE, tracing::field::display(kind));
        span.record("error.message", tracing::field::display(&message));
        if self.is_server_fault() {
            span.record(OTEL_STATUS_CODE, tracing::field::display("ERROR"));
        }
    }

    pub fn status_code(&self) -> Status {
        match self {
            AppError::Database(_) => Status::InternalServerError,
            AppError::Authentication(_) => Status::Unauthorized,
            AppError::NotFound(_) => Status::NotFound,
            AppError::Validation(_) => Status::UnprocessableEntity,
            AppError::NoEligibleTeam { .. } => Status::UnprocessableEntity,
            AppError::InconsistentRoster(_) => Status::Conflict,
            AppError::Transient(_) => Status::ServiceUnavailable,
            AppError::ExternalService(_) => Status::ServiceUnavailable,
            AppError::Internal(_) => Status::InternalServerError,
        }
    }

    pub fn to_status_with_log(&self, context: &str) -> Status {
        self.log_and_record(context);
        self.status_code()
    }

    /// True when retrying the same operation may succeed: lock contention in
    /// SQLite or an exhausted connection pool.
    pub fn is_contention(&self) -> bool {
        match self {
            AppError::Database(sqlx::Error::PoolTimedOut) => true,
            AppError::Database(sqlx::Error::Database(db_err)) => db_err
                .code()
                .map(|code| CONTENTION_CODES.contains(&&*code))
                .unwrap_or(false),
            AppError::Transient(_) => true,
            _ => false,
        }
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        self.to_status_with_log(&format!("Request to {} {}", req.method(), req.uri()))
            .respond_to(req)
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(error: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("Cryptography error: {}", error))
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        err.to_status_with_log("Error conversion into Status")
    }
}
