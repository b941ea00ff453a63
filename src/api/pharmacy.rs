//! Pharmacy endpoints - scan, validate, fulfill, cancel, audit logs

use std::sync::Arc;

use axum::extract::Path;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::{require_role, AuthContext};
use crate::api::response::{self, ApiError};
use crate::model::Role;
use crate::pharmacy::RedemptionService;

pub fn routes() -> Router {
    Router::new()
        .route("/scan", post(scan))
        .route("/validate", post(validate))
        .route("/fulfill", post(fulfill))
        .route("/prescriptions/:id/cancel", put(cancel))
        .route("/prescriptions/:id/logs", get(logs))
}

/// Code hash as presented by a pharmacy terminal after decoding the QR.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodeActionRequest {
    code_hash: String,
    #[serde(default)]
    notes: Option<String>,
}

async fn scan(
    Extension(redemption): Extension<Arc<RedemptionService>>,
    Extension(context): Extension<AuthContext>,
    Json(request): Json<CodeActionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&context, &[Role::Pharmacist, Role::Admin])?;
    let report = redemption
        .scan(&request.code_hash, context.user_id, request.notes)
        .await?;
    Ok(response::success(report))
}

async fn validate(
    Extension(redemption): Extension<Arc<RedemptionService>>,
    Extension(context): Extension<AuthContext>,
    Json(request): Json<CodeActionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&context, &[Role::Pharmacist, Role::Admin])?;
    let report = redemption
        .validate(&request.code_hash, context.user_id, request.notes)
        .await?;
    Ok(response::success_message("Prescription validated", report))
}

async fn fulfill(
    Extension(redemption): Extension<Arc<RedemptionService>>,
    Extension(context): Extension<AuthContext>,
    Json(request): Json<CodeActionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&context, &[Role::Pharmacist, Role::Admin])?;
    let report = redemption
        .fulfill(&request.code_hash, context.user_id, request.notes)
        .await?;
    Ok(response::success_message("Prescription fulfilled", report))
}

async fn cancel(
    Extension(redemption): Extension<Arc<RedemptionService>>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&context, &[Role::Admin, Role::Doctor])?;
    let prescription = redemption.cancel(id).await?;
    Ok(response::success_message("Prescription cancelled", prescription))
}

async fn logs(
    Extension(redemption): Extension<Arc<RedemptionService>>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&context, &[Role::Pharmacist, Role::Admin])?;
    let entries = redemption.logs(id).await?;
    Ok(response::success(entries))
}
