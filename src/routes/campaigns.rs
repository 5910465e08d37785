use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::audit::{campaign_log_report, CampaignLogReport};
use crate::auth::AuthenticatedUser;
use crate::campaigns::{
    self, activate_donor_message, add_donor_message, authorize, delete_donor_message,
    edit_donor_message, modify_donor_messages, outreach_template, save_outreach_template,
    CampaignDraft, CampaignPatch, OutreachTemplate,
};
use crate::error::{AppError, AppResult};
use crate::models::{Campaign, DonorMessage, ManagerRole, MessageKind, MessageTemplate};
use crate::progress::{compute_progress, CampaignProgress};
use crate::state::AppState;
use crate::template::{preview, unknown_placeholders, PreviewContext};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDetail {
    pub campaign: Campaign,
    pub role: ManagerRole,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignRequest {
    #[serde(default = "default_role")]
    pub role: ManagerRole,
    #[serde(flatten)]
    pub draft: CampaignDraft,
}

fn default_role() -> ManagerRole {
    ManagerRole::Owner
}

pub async fn list_campaigns(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<Campaign>>> {
    Ok(Json(
        campaigns::list_campaigns(state.store(), &user.user_id).await?,
    ))
}

pub async fn create_campaign(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateCampaignRequest>,
) -> AppResult<(StatusCode, Json<CampaignDetail>)> {
    let campaign =
        campaigns::create_campaign(state.store(), &user.user_id, payload.role, payload.draft)
            .await?;
    Ok((
        StatusCode::CREATED,
        Json(CampaignDetail {
            campaign,
            role: payload.role,
        }),
    ))
}

pub async fn get_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    user: AuthenticatedUser,
) -> AppResult<Json<CampaignDetail>> {
    let (campaign, role) = authorize(state.store(), &campaign_id, &user.user_id).await?;
    Ok(Json(CampaignDetail { campaign, role }))
}

pub async fn update_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    user: AuthenticatedUser,
    Json(payload): Json<CampaignPatch>,
) -> AppResult<Json<Campaign>> {
    let campaign =
        campaigns::update_campaign(state.store(), &campaign_id, &user.user_id, payload).await?;
    Ok(Json(campaign))
}

#[derive(Deserialize)]
pub struct DonorMessageRequest {
    pub content: String,
}

impl DonorMessageRequest {
    fn content(self) -> AppResult<String> {
        if self.content.trim().is_empty() {
            return Err(AppError::bad_request("content must not be empty"));
        }
        Ok(self.content)
    }
}

pub async fn create_donor_message(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    user: AuthenticatedUser,
    Json(payload): Json<DonorMessageRequest>,
) -> AppResult<(StatusCode, Json<DonorMessage>)> {
    let content = payload.content()?;
    let (_, created) = modify_donor_messages(state.store(), &campaign_id, &user.user_id, |list| {
        Ok(add_donor_message(list, content))
    })
    .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_donor_message(
    State(state): State<AppState>,
    Path((campaign_id, message_id)): Path<(String, String)>,
    user: AuthenticatedUser,
    Json(payload): Json<DonorMessageRequest>,
) -> AppResult<Json<Vec<DonorMessage>>> {
    let content = payload.content()?;
    let (messages, ()) = modify_donor_messages(state.store(), &campaign_id, &user.user_id, |list| {
        edit_donor_message(list, &message_id, content)
    })
    .await?;
    Ok(Json(messages))
}

pub async fn activate_message(
    State(state): State<AppState>,
    Path((campaign_id, message_id)): Path<(String, String)>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<DonorMessage>>> {
    let (messages, ()) = modify_donor_messages(state.store(), &campaign_id, &user.user_id, |list| {
        activate_donor_message(list, &message_id)
    })
    .await?;
    Ok(Json(messages))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path((campaign_id, message_id)): Path<(String, String)>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<DonorMessage>>> {
    let (messages, ()) = modify_donor_messages(state.store(), &campaign_id, &user.user_id, |list| {
        delete_donor_message(list, &message_id)
    })
    .await?;
    Ok(Json(messages))
}

#[derive(Deserialize)]
pub struct PreviewRequest {
    pub template: String,
    #[serde(default)]
    pub sample: usize,
    /// Donor messages unless stated.
    pub kind: Option<MessageKind>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub preview: String,
    pub unknown_placeholders: Vec<String>,
}

pub async fn preview_message(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    user: AuthenticatedUser,
    Json(payload): Json<PreviewRequest>,
) -> AppResult<Json<PreviewResponse>> {
    let (campaign, _) = authorize(state.store(), &campaign_id, &user.user_id).await?;
    let context = PreviewContext::from_campaign(&campaign);
    let kind = payload.kind.unwrap_or(MessageKind::Donor);
    Ok(Json(PreviewResponse {
        preview: preview(&payload.template, &context, payload.sample),
        unknown_placeholders: unknown_placeholders(&payload.template, kind),
    }))
}

pub async fn campaign_progress(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    user: AuthenticatedUser,
) -> AppResult<Json<CampaignProgress>> {
    let (campaign, _) = authorize(state.store(), &campaign_id, &user.user_id).await?;
    Ok(Json(compute_progress(state.store(), &campaign).await?))
}

pub async fn campaign_logs(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    user: AuthenticatedUser,
) -> AppResult<Json<CampaignLogReport>> {
    let (campaign, _) = authorize(state.store(), &campaign_id, &user.user_id).await?;
    Ok(Json(campaign_log_report(state.store(), &campaign).await?))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path((campaign_id, kind)): Path<(String, MessageKind)>,
    user: AuthenticatedUser,
) -> AppResult<Json<OutreachTemplate>> {
    let (campaign, role) = authorize(state.store(), &campaign_id, &user.user_id).await?;
    let template = outreach_template(state.store(), &campaign, &user.user_id, role, kind).await?;
    Ok(Json(template))
}

#[derive(Deserialize)]
pub struct SaveTemplateRequest {
    pub content: String,
}

pub async fn save_template(
    State(state): State<AppState>,
    Path((campaign_id, kind)): Path<(String, MessageKind)>,
    user: AuthenticatedUser,
    Json(payload): Json<SaveTemplateRequest>,
) -> AppResult<Json<MessageTemplate>> {
    authorize(state.store(), &campaign_id, &user.user_id).await?;
    if payload.content.trim().is_empty() {
        return Err(AppError::bad_request("content must not be empty"));
    }
    let template = save_outreach_template(
        state.store(),
        &campaign_id,
        &user.user_id,
        kind,
        payload.content,
    )
    .await?;
    Ok(Json(template))
}
