use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{header::USER_AGENT, request::Parts},
    Json,
};
use serde::Deserialize;

use crate::audit::message_history;
use crate::auth::AuthenticatedUser;
use crate::campaigns::{authorize, outreach_template};
use crate::channel::Platform;
use crate::contacts::list_guardians;
use crate::error::{AppError, AppResult};
use crate::models::{Actor, ActorKind, MessageKind, MessageRecord, UserProfile};
use crate::profiles::get_profile;
use crate::recipient::{load_participant, Recipient};
use crate::send::{ClientPreferences, SendContext, SendOrchestrator, SendOutcome, TemplateChoice};
use crate::state::AppState;

pub const HIDE_INSTRUCTIONS_HEADER: &str = "x-hide-messaging-instructions";

/// The sending device's platform and stored messaging preference.
#[derive(Debug, Clone, Copy)]
pub struct Device {
    pub platform: Platform,
    pub preferences: ClientPreferences,
}

impl Device {
    pub fn orchestrator<'a>(&self, state: &'a AppState) -> SendOrchestrator<'a> {
        SendOrchestrator::new(state.store(), self.platform, &self.preferences)
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Device {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let platform = parts
            .headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(Platform::from_user_agent)
            .unwrap_or_else(Platform::desktop);
        let hide_messaging_instructions = parts
            .headers
            .get(HIDE_INSTRUCTIONS_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Ok(Self {
            platform,
            preferences: ClientPreferences {
                hide_messaging_instructions,
            },
        })
    }
}

fn organizer(profile: Option<&UserProfile>) -> Actor {
    match profile {
        Some(profile) => Actor::new(
            ActorKind::Organizer,
            profile.first_name.clone(),
            profile.last_name.clone(),
        ),
        None => Actor::new(ActorKind::Organizer, "", ""),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub participant_id: String,
    pub recipient_id: Option<String>,
    /// Overrides the sender's saved outreach template for this send.
    pub template: Option<String>,
}

/// Organizer outreach to one guardian, donor or participant.
pub async fn send_outreach(
    State(state): State<AppState>,
    Path((campaign_id, kind)): Path<(String, MessageKind)>,
    user: AuthenticatedUser,
    device: Device,
    Json(payload): Json<SendRequest>,
) -> AppResult<Json<SendOutcome>> {
    let (campaign, role) = authorize(state.store(), &campaign_id, &user.user_id).await?;
    let recipient = Recipient::load(
        state.store(),
        &campaign_id,
        &payload.participant_id,
        kind,
        payload.recipient_id.as_deref(),
    )
    .await?;
    let template = match payload.template {
        Some(template) => template,
        None => {
            outreach_template(state.store(), &campaign, &user.user_id, role, kind)
                .await?
                .content
        }
    };
    let profile = get_profile(state.store(), &user.user_id).await?;

    let context = SendContext {
        campaign: &campaign,
        sender_id: &user.user_id,
        sender_profile: profile.as_ref(),
        actor: organizer(profile.as_ref()),
        origin: state.origin(),
    };
    let outcome = device
        .orchestrator(&state)
        .send(&context, &recipient, &TemplateChoice::Outreach(template))
        .await?;
    Ok(Json(outcome))
}

/// Organizer group text to all of a participant's guardians.
pub async fn send_to_guardians(
    State(state): State<AppState>,
    Path((campaign_id, participant_id)): Path<(String, String)>,
    user: AuthenticatedUser,
    device: Device,
) -> AppResult<Json<SendOutcome>> {
    let (campaign, _) = authorize(state.store(), &campaign_id, &user.user_id).await?;
    let participant = load_participant(state.store(), &campaign_id, &participant_id).await?;
    let guardians = list_guardians(state.store(), &campaign_id, &participant_id).await?;
    let profile = get_profile(state.store(), &user.user_id).await?;

    let context = SendContext {
        campaign: &campaign,
        sender_id: &user.user_id,
        sender_profile: profile.as_ref(),
        actor: organizer(profile.as_ref()),
        origin: state.origin(),
    };
    let outcome = device
        .orchestrator(&state)
        .send_group(&context, &participant, &guardians)
        .await?;
    Ok(Json(outcome))
}

async fn history_for(
    state: &AppState,
    user: &AuthenticatedUser,
    campaign_id: &str,
    participant_id: &str,
    kind: MessageKind,
    recipient_id: Option<&str>,
) -> AppResult<Vec<MessageRecord>> {
    authorize(state.store(), campaign_id, &user.user_id).await?;
    let recipient =
        Recipient::load(state.store(), campaign_id, participant_id, kind, recipient_id).await?;
    message_history(state.store(), &recipient.history(campaign_id)?).await
}

pub async fn guardian_history(
    State(state): State<AppState>,
    Path((campaign_id, participant_id, guardian_id)): Path<(String, String, String)>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<MessageRecord>>> {
    let records = history_for(
        &state,
        &user,
        &campaign_id,
        &participant_id,
        MessageKind::Guardian,
        Some(&guardian_id),
    )
    .await?;
    Ok(Json(records))
}

pub async fn donor_history(
    State(state): State<AppState>,
    Path((campaign_id, participant_id, donor_id)): Path<(String, String, String)>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<MessageRecord>>> {
    let records = history_for(
        &state,
        &user,
        &campaign_id,
        &participant_id,
        MessageKind::Donor,
        Some(&donor_id),
    )
    .await?;
    Ok(Json(records))
}

pub async fn participant_history(
    State(state): State<AppState>,
    Path((campaign_id, participant_id)): Path<(String, String)>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<MessageRecord>>> {
    let records = history_for(
        &state,
        &user,
        &campaign_id,
        &participant_id,
        MessageKind::Participant,
        None,
    )
    .await?;
    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn device(request: Request<()>) -> Device {
        let (mut parts, _) = request.into_parts();
        Device::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn reads_platform_and_preference_headers() {
        let iphone = device(
            Request::builder()
                .header(USER_AGENT, "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)")
                .header(HIDE_INSTRUCTIONS_HEADER, "true")
                .body(())
                .unwrap(),
        )
        .await;
        assert!(iphone.platform.is_ios);
        assert!(iphone.preferences.hide_messaging_instructions);

        let bare = device(Request::builder().body(()).unwrap()).await;
        assert_eq!(bare.platform, Platform::desktop());
        assert!(!bare.preferences.hide_messaging_instructions);
    }
}
