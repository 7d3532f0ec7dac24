use std::sync::Arc;
use std::time::Duration;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{info, warn};
use uuid::Uuid;

use plaza_auth::password::{hash_password, verify_password_or_dummy};
use plaza_auth::{AuthGate, Identity};
use plaza_db::Database;
use plaza_db::queries::NewUser;
use plaza_gateway::dispatcher::Dispatcher;
use plaza_types::api::{
    AuthResponse, LoginRequest, ProfileResponse, RegisterRequest, UpdateProfileRequest,
};
use plaza_types::validate;

use crate::error::{ApiError, ApiResult};
use crate::extract::JsonBody;
use crate::store::blocking;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub gate: AuthGate,
    pub dispatcher: Dispatcher,
    /// Upper bound on any single store call.
    pub store_timeout: Duration,
}

pub async fn register(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = validate::display_name(&req.name)?;
    let email = validate::email(&req.email)?;
    validate::password(&req.password)?;
    let bio = validate::bio(req.bio.as_deref())?;

    let user_id = Uuid::new_v4();
    let password = req.password;
    let created = blocking(&state, move |db| {
        let password_hash = hash_password(&password)?;
        let inserted = db.create_user(&NewUser {
            id: user_id,
            name: &name,
            email: &email,
            password_hash: &password_hash,
            bio: bio.as_deref(),
        })?;
        if !inserted {
            return Ok(None);
        }
        db.get_user_by_id(user_id)?.map(|row| row.profile()).transpose()
    })
    .await?;

    let Some(user) = created else {
        return Err(ApiError::BadRequest("User already exists"));
    };

    let token = state.gate.issue(user.id, &user.name)?;
    info!("Registered user {} ({})", user.name, user.id);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            token,
            user,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    const INVALID: ApiError = ApiError::BadRequest("Invalid credentials");

    let Ok(email) = validate::email(&req.email) else {
        return Err(INVALID);
    };

    let password = req.password;
    let user = blocking(&state, move |db| {
        let row = db.get_user_by_email(&email)?;
        let stored = row.as_ref().map(|r| r.password.as_str());
        if !verify_password_or_dummy(&password, stored)? {
            return Ok(None);
        }
        row.map(|r| r.profile()).transpose()
    })
    .await?;

    let Some(user) = user else {
        warn!("Failed login for {}", req.email.trim());
        return Err(INVALID);
    };

    let token = state.gate.issue(user.id, &user.name)?;

    Ok(Json(AuthResponse {
        success: true,
        token,
        user,
    }))
}

pub async fn profile(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<ProfileResponse>> {
    let user = blocking(&state, move |db| {
        db.get_user_by_id(identity.user_id)?
            .map(|row| row.profile())
            .transpose()
    })
    .await?
    .ok_or(ApiError::NotFound("User not found"))?;

    Ok(Json(ProfileResponse { success: true, user }))
}

/// Update display name and/or bio. An empty bio clears it.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    JsonBody(req): JsonBody<UpdateProfileRequest>,
) -> ApiResult<Json<ProfileResponse>> {
    let name = req.name.as_deref().map(validate::display_name).transpose()?;
    let bio = req
        .bio
        .as_deref()
        .map(|b| validate::bio(Some(b)))
        .transpose()?;

    let user = blocking(&state, move |db| {
        db.update_profile(
            identity.user_id,
            name.as_deref(),
            bio.as_ref().map(|b| b.as_deref()),
        )?
        .map(|row| row.profile())
        .transpose()
    })
    .await?
    .ok_or(ApiError::NotFound("User not found"))?;

    Ok(Json(ProfileResponse { success: true, user }))
}
