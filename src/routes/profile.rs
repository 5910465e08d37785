use axum::{extract::State, Json};

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::UserProfile;
use crate::profiles::{get_profile as load_profile, upsert_profile, ProfileUpdate};
use crate::state::AppState;

pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserProfile>> {
    let profile = load_profile(state.store(), &user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("profile not found"))?;
    Ok(Json(profile))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ProfileUpdate>,
) -> AppResult<Json<UserProfile>> {
    let profile = upsert_profile(
        state.store(),
        &user.user_id,
        user.email.as_deref(),
        payload,
    )
    .await?;
    Ok(Json(profile))
}
