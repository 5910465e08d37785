use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::auth::AuthenticatedUser;
use crate::campaigns::authorize;
use crate::channel::resolve_channel;
use crate::error::AppResult;
use crate::invites::{
    accept_invite, create_invite, decline_invite, get_invite, inviter_name, CreatedInvite,
    InviteRequest, InviteView,
};
use crate::models::Invite;
use crate::profiles::get_profile;
use crate::routes::messaging::Device;
use crate::state::AppState;

pub async fn send_invite(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    user: AuthenticatedUser,
    device: Device,
    Json(payload): Json<InviteRequest>,
) -> AppResult<(StatusCode, Json<CreatedInvite>)> {
    let (campaign, _) = authorize(state.store(), &campaign_id, &user.user_id).await?;
    let profile = get_profile(state.store(), &user.user_id).await?;
    let name = inviter_name(profile.as_ref(), user.email.as_deref());

    let created = create_invite(
        state.store(),
        &campaign,
        &user.user_id,
        &name,
        payload,
        state.origin(),
        resolve_channel(device.platform),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn show_invite(
    State(state): State<AppState>,
    Path((campaign_id, invite_id)): Path<(String, String)>,
    _user: AuthenticatedUser,
) -> AppResult<Json<InviteView>> {
    Ok(Json(get_invite(state.store(), &campaign_id, &invite_id).await?))
}

pub async fn accept(
    State(state): State<AppState>,
    Path((campaign_id, invite_id)): Path<(String, String)>,
    user: AuthenticatedUser,
) -> AppResult<Json<Invite>> {
    let invite = accept_invite(state.store(), &campaign_id, &invite_id, &user.user_id).await?;
    Ok(Json(invite))
}

pub async fn decline(
    State(state): State<AppState>,
    Path((campaign_id, invite_id)): Path<(String, String)>,
    user: AuthenticatedUser,
) -> AppResult<Json<Invite>> {
    let invite = decline_invite(state.store(), &campaign_id, &invite_id, &user.user_id).await?;
    Ok(Json(invite))
}
