//! API Layer - HTTP surface over the services
//!
//! One router: auth, patients, pharmacy. Bearer-token middleware guards
//! everything except health and the two public auth endpoints; services
//! ride in as extensions the way the engine does elsewhere.

pub mod auth;
pub mod middleware;
pub mod patients;
pub mod pharmacy;
pub mod response;

use std::sync::Arc;

use axum::routing::get;
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{AuthService, TokenSigner};
use crate::patients::PatientService;
use crate::pharmacy::RedemptionService;
use crate::prescriptions::PrescriptionService;

/// Build the full application router.
pub fn router(
    auth_service: Arc<AuthService>,
    patient_service: Arc<PatientService>,
    prescription_service: Arc<PrescriptionService>,
    redemption_service: Arc<RedemptionService>,
    signer: TokenSigner,
) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth::routes())
        .nest("/api/patients", patients::routes())
        .nest("/api/pharmacy", pharmacy::routes())
        .layer(axum::middleware::from_fn(middleware::auth_middleware))
        .layer(Extension(auth_service))
        .layer(Extension(patient_service))
        .layer(Extension(prescription_service))
        .layer(Extension(redemption_service))
        .layer(Extension(signer))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "data": {
            "status": "ok",
            "timestamp": Utc::now(),
        }
    }))
}
