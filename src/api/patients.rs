//! Patient endpoints - registry, search, visits, prescriptions, history

use std::sync::Arc;

use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::{require_role, AuthContext};
use crate::api::response::{self, ApiError};
use crate::model::Role;
use crate::patients::{PatientDraft, PatientService, PatientUpdate, VisitDraft};
use crate::prescriptions::{PrescriptionDraft, PrescriptionService};

pub fn routes() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/search", get(search))
        .route("/reference/:reference", get(by_reference))
        .route("/:id", get(get_patient).put(update_patient))
        .route("/:id/history", get(history))
        .route("/:id/visits", post(create_visit))
        .route(
            "/:id/prescriptions",
            post(issue_prescription).get(list_prescriptions),
        )
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    query: String,
}

async fn register(
    Extension(patients): Extension<Arc<PatientService>>,
    Extension(context): Extension<AuthContext>,
    Json(draft): Json<PatientDraft>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    require_role(&context, &[Role::Admin, Role::Doctor])?;
    let registered = patients.register(draft).await?;
    Ok(response::created("Patient registered", registered))
}

async fn search(
    Extension(patients): Extension<Arc<PatientService>>,
    Extension(context): Extension<AuthContext>,
    Query(params): Query<SearchParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&context, &[Role::Admin, Role::Doctor])?;
    let matches = patients.search(&params.query).await?;
    Ok(response::success(matches))
}

/// Cross-facility lookup; any authenticated caller may resolve a reference.
async fn by_reference(
    Extension(patients): Extension<Arc<PatientService>>,
    Extension(_context): Extension<AuthContext>,
    Path(reference): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let patient = patients.by_reference(&reference).await?;
    Ok(response::success(patient))
}

async fn get_patient(
    Extension(patients): Extension<Arc<PatientService>>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&context, &[Role::Admin, Role::Doctor])?;
    let patient = patients.get(id).await?;
    Ok(response::success(patient))
}

async fn update_patient(
    Extension(patients): Extension<Arc<PatientService>>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(update): Json<PatientUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&context, &[Role::Admin, Role::Doctor])?;
    let patient = patients.update(id, update).await?;
    Ok(response::success_message("Patient updated", patient))
}

/// Patients may read their own history; staff may read any.
async fn history(
    Extension(patients): Extension<Arc<PatientService>>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&context, &[Role::Doctor, Role::Admin, Role::Patient])?;
    let record = patients.history(id).await?;
    if context.role == Role::Patient && record.patient.user_id != context.user_id {
        return Err(ApiError::Forbidden(
            "Patients may only access their own history".to_string(),
        ));
    }
    Ok(response::success(record))
}

async fn create_visit(
    Extension(patients): Extension<Arc<PatientService>>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(draft): Json<VisitDraft>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    require_role(&context, &[Role::Doctor, Role::Admin])?;
    // Doctors record their own visits; admins must name the doctor.
    let doctor_id = draft.doctor_id.unwrap_or(context.user_id);
    let visit = patients.create_visit(id, doctor_id, draft).await?;
    Ok(response::created("Visit recorded", visit))
}

async fn issue_prescription(
    Extension(prescriptions): Extension<Arc<PrescriptionService>>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(draft): Json<PrescriptionDraft>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    require_role(&context, &[Role::Doctor, Role::Admin])?;
    let doctor_id = draft.doctor_id.unwrap_or(context.user_id);
    let bundle = prescriptions.issue(id, doctor_id, draft).await?;
    Ok(response::created("Prescription issued", bundle))
}

async fn list_prescriptions(
    Extension(prescriptions): Extension<Arc<PrescriptionService>>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&context, &[Role::Doctor, Role::Admin])?;
    let bundles = prescriptions.list_for_patient(id).await?;
    Ok(response::success(bundles))
}
