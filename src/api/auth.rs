//! Auth endpoints - registration, login, profiles, account administration

use std::sync::Arc;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::{require_role, AuthContext};
use crate::api::response::{self, ApiError};
use crate::auth::{AuthService, DoctorProfileInput, ProfileUpdate, RegisterInput};
use crate::model::Role;

pub fn routes() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/profile", get(profile).put(update_profile))
        .route("/change-password", put(change_password))
        .route("/users/:id/deactivate", put(deactivate))
        .route("/users/:id/reactivate", put(reactivate))
        .route("/doctors", post(create_doctor_profile))
        .route("/doctors/:user_id", get(doctor_profile))
        .route("/doctors/:user_id/verify", put(verify_doctor))
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

async fn register(
    Extension(auth): Extension<Arc<AuthService>>,
    Json(input): Json<RegisterInput>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let session = auth.register(input).await?;
    Ok(response::created("Account registered", session))
}

async fn login(
    Extension(auth): Extension<Arc<AuthService>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = auth.login(&request.email, &request.password).await?;
    Ok(response::success_message("Login successful", session))
}

async fn profile(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&context, &[Role::Doctor, Role::Admin])?;
    let view = auth.profile(context.user_id).await?;
    Ok(response::success(view))
}

async fn update_profile(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(context): Extension<AuthContext>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&context, &[Role::Doctor, Role::Admin])?;
    let user = auth.update_profile(context.user_id, update).await?;
    Ok(response::success_message("Profile updated", user))
}

async fn change_password(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(context): Extension<AuthContext>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth.change_password(
        context.user_id,
        &request.current_password,
        &request.new_password,
    )
    .await?;
    Ok(response::success_message(
        "Password changed",
        serde_json::json!({}),
    ))
}

async fn deactivate(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&context, &[Role::Admin])?;
    if id == context.user_id {
        return Err(ApiError::Validation(
            "Admins cannot deactivate their own account".to_string(),
        ));
    }
    let user = auth.set_active(id, false).await?;
    Ok(response::success_message("Account deactivated", user))
}

async fn reactivate(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&context, &[Role::Admin])?;
    let user = auth.set_active(id, true).await?;
    Ok(response::success_message("Account reactivated", user))
}

async fn create_doctor_profile(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(context): Extension<AuthContext>,
    Json(input): Json<DoctorProfileInput>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    require_role(&context, &[Role::Admin])?;
    let profile = auth.create_doctor_profile(input).await?;
    Ok(response::created("Doctor profile created", profile))
}

async fn doctor_profile(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(_context): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let profile = auth.doctor_profile(user_id).await?;
    Ok(response::success(profile))
}

async fn verify_doctor(
    Extension(auth): Extension<Arc<AuthService>>,
    Extension(context): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_role(&context, &[Role::Admin])?;
    let profile = auth.verify_doctor(user_id).await?;
    Ok(response::success_message("Doctor verified", profile))
}
