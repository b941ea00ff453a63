//! Uniform response envelope and error mapping
//!
//! Every response is `{success, message?, data?, error?: {message,
//! statusCode}}`. Service errors collapse into one `ApiError` whose status
//! mapping is fixed here; conflicts surface as 400 to match the wire
//! contract.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::auth::AuthError;
use crate::patients::RegistryError;
use crate::pharmacy::RedemptionError;
use crate::prescriptions::PrescriptionError;

pub fn success<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": data }))
}

pub fn success_message<T: Serialize>(message: &str, data: T) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "message": message, "data": data }))
}

pub fn created<T: Serialize>(message: &str, data: T) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": message, "data": data })),
    )
}

#[derive(Clone, Debug, PartialEq)]
pub enum ApiError {
    Validation(String),
    NotFound(String),
    Unauthenticated(String),
    Forbidden(String),
    Conflict(String),
    State(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            // Conflicts are surfaced as 400, not 409.
            ApiError::Validation(_) | ApiError::Conflict(_) | ApiError::State(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::Validation(m)
            | ApiError::NotFound(m)
            | ApiError::Unauthenticated(m)
            | ApiError::Forbidden(m)
            | ApiError::Conflict(m)
            | ApiError::State(m)
            | ApiError::Internal(m) => m,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(message = %self.message(), "Internal error");
        }
        let body = Json(json!({
            "success": false,
            "error": {
                "message": self.message(),
                "statusCode": status.as_u16(),
            }
        }));
        (status, body).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Validation(_) => ApiError::Validation(err.to_string()),
            AuthError::InvalidCredentials => ApiError::Unauthenticated(err.to_string()),
            AuthError::EmailTaken(_) | AuthError::ProfileExists | AuthError::LicenseTaken(_) => {
                ApiError::Conflict(err.to_string())
            }
            AuthError::UserNotFound | AuthError::DoctorProfileNotFound => {
                ApiError::NotFound(err.to_string())
            }
            AuthError::Token(_) => ApiError::Unauthenticated(err.to_string()),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Validation(_) => ApiError::Validation(err.to_string()),
            RegistryError::EmailTaken(_) | RegistryError::InsuranceTaken(_) => {
                ApiError::Conflict(err.to_string())
            }
            RegistryError::PatientNotFound | RegistryError::DoctorNotFound => {
                ApiError::NotFound(err.to_string())
            }
            RegistryError::ReferenceGenerationExhausted => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<PrescriptionError> for ApiError {
    fn from(err: PrescriptionError) -> Self {
        match err {
            PrescriptionError::PatientNotFound
            | PrescriptionError::DoctorNotFound
            | PrescriptionError::VisitNotFound
            | PrescriptionError::PrescriptionNotFound => ApiError::NotFound(err.to_string()),
            PrescriptionError::InvalidItems(_) | PrescriptionError::Validation(_) => {
                ApiError::Validation(err.to_string())
            }
            PrescriptionError::ReferenceGenerationExhausted | PrescriptionError::Sealing(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<RedemptionError> for ApiError {
    fn from(err: RedemptionError) -> Self {
        match err {
            RedemptionError::CodeNotFound | RedemptionError::PrescriptionNotFound => {
                ApiError::NotFound(err.to_string())
            }
            RedemptionError::CodeExpired
            | RedemptionError::CodeAlreadyUsed
            | RedemptionError::PrescriptionCancelled
            | RedemptionError::AlreadyFulfilled
            | RedemptionError::ValidationRequired
            | RedemptionError::PayloadMismatch => ApiError::State(err.to_string()),
            RedemptionError::Internal(_) => ApiError::Internal(err.to_string()),
        }
    }
}
