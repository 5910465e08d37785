use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthenticatedUser;
use crate::campaigns::authorize;
use crate::contacts::{
    self, add_participant, delete_participant, edit_participant, import_participants,
    list_donors, list_guardians, NewContact, ParticipantPatch,
};
use crate::error::AppResult;
use crate::models::{Donor, Guardian, Participant};
use crate::onboarding::GateState;
use crate::recipient::load_participant;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantDetail {
    pub participant: Participant,
    pub onboarding: GateState,
    pub guardians: Vec<Guardian>,
    pub donors: Vec<Donor>,
}

pub async fn list_participants(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<Participant>>> {
    authorize(state.store(), &campaign_id, &user.user_id).await?;
    Ok(Json(
        contacts::list_participants(state.store(), &campaign_id).await?,
    ))
}

pub async fn create_participant(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    user: AuthenticatedUser,
    Json(payload): Json<NewContact>,
) -> AppResult<(StatusCode, Json<Participant>)> {
    authorize(state.store(), &campaign_id, &user.user_id).await?;
    let participant = add_participant(state.store(), &campaign_id, payload).await?;
    Ok((StatusCode::CREATED, Json(participant)))
}

#[derive(Deserialize)]
pub struct ImportRequest {
    /// Tab-separated `first, last, phone` rows, as pasted from a spreadsheet.
    pub tsv: String,
}

#[derive(Serialize)]
pub struct ImportResponse {
    pub imported: Vec<Participant>,
}

pub async fn import_participant_rows(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    user: AuthenticatedUser,
    Json(payload): Json<ImportRequest>,
) -> AppResult<(StatusCode, Json<ImportResponse>)> {
    authorize(state.store(), &campaign_id, &user.user_id).await?;
    let imported = import_participants(state.store(), &campaign_id, &payload.tsv).await?;
    Ok((StatusCode::CREATED, Json(ImportResponse { imported })))
}

pub async fn get_participant(
    State(state): State<AppState>,
    Path((campaign_id, participant_id)): Path<(String, String)>,
    user: AuthenticatedUser,
) -> AppResult<Json<ParticipantDetail>> {
    authorize(state.store(), &campaign_id, &user.user_id).await?;
    let participant = load_participant(state.store(), &campaign_id, &participant_id).await?;
    let guardians = list_guardians(state.store(), &campaign_id, &participant_id).await?;
    let donors = list_donors(state.store(), &campaign_id, &participant_id).await?;
    Ok(Json(ParticipantDetail {
        onboarding: GateState::of(&participant),
        participant,
        guardians,
        donors,
    }))
}

pub async fn update_participant(
    State(state): State<AppState>,
    Path((campaign_id, participant_id)): Path<(String, String)>,
    user: AuthenticatedUser,
    Json(payload): Json<ParticipantPatch>,
) -> AppResult<Json<Participant>> {
    authorize(state.store(), &campaign_id, &user.user_id).await?;
    let participant =
        edit_participant(state.store(), &campaign_id, &participant_id, payload).await?;
    Ok(Json(participant))
}

pub async fn remove_participant(
    State(state): State<AppState>,
    Path((campaign_id, participant_id)): Path<(String, String)>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    authorize(state.store(), &campaign_id, &user.user_id).await?;
    delete_participant(state.store(), &campaign_id, &participant_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
