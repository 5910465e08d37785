//! Routes behind a participant's shareable link. The link itself is the
//! credential; callers identify themselves (participant, guardian, other)
//! but are not authenticated.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::contacts::{
    add_donor, add_guardian, find_participant, import_donors, list_donors, list_guardians,
    record_access, NewContact, PickedContact,
};
use crate::error::AppResult;
use crate::models::{AccessEntry, Actor, Campaign, Donor, DonorMessage, Guardian, MessageStatus, Participant};
use crate::onboarding::{mark_guardians_messaged, skip_guardians, GateState};
use crate::routes::messaging::Device;
use crate::send::{SendContext, SendOutcome, TemplateChoice};
use crate::state::AppState;
use crate::store::{paths, query_as, CollectionPath, DocumentStore, Query};

/// The slice of a campaign a participant's page shows.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicCampaign {
    pub id: String,
    pub name: String,
    pub organization_name: String,
    pub owner_title: String,
    pub target_donor_count: u32,
    pub donation_url: String,
    pub donor_messages: Vec<DonorMessage>,
}

impl From<&Campaign> for PublicCampaign {
    fn from(campaign: &Campaign) -> Self {
        let mut donor_messages = campaign.donor_messages.clone();
        donor_messages.sort_by_key(|message| message.order);
        Self {
            id: campaign.id.clone(),
            name: campaign.name.clone(),
            organization_name: campaign.organization_name.clone(),
            owner_title: campaign.owner_title.clone(),
            target_donor_count: campaign.effective_target_donor_count(),
            donation_url: campaign.donation_url.clone(),
            donor_messages,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicParticipantView {
    pub campaign: PublicCampaign,
    pub participant: Participant,
    pub onboarding: GateState,
    pub guardians: Vec<Guardian>,
    pub donors: Vec<Donor>,
}

/// Who is acting on the page. Absent means the participant themself.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identified<T> {
    #[serde(default)]
    pub added_by: Option<Actor>,
    #[serde(flatten)]
    pub body: T,
}

fn actor_or_participant(actor: Option<Actor>, participant: &Participant) -> Actor {
    actor.unwrap_or_else(|| Actor::participant(participant))
}

pub async fn show_participant(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
) -> AppResult<Json<PublicParticipantView>> {
    let (campaign, participant) = find_participant(state.store(), &participant_id).await?;
    let guardians = list_guardians(state.store(), &campaign.id, &participant.id).await?;
    let donors = list_donors(state.store(), &campaign.id, &participant.id).await?;
    Ok(Json(PublicParticipantView {
        campaign: PublicCampaign::from(&campaign),
        onboarding: GateState::of(&participant),
        participant,
        guardians,
        donors,
    }))
}

pub async fn create_guardian(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
    Json(payload): Json<Identified<NewContact>>,
) -> AppResult<(StatusCode, Json<Guardian>)> {
    let (campaign, participant) = find_participant(state.store(), &participant_id).await?;
    let actor = actor_or_participant(payload.added_by, &participant);
    let guardian = add_guardian(
        state.store(),
        &campaign.id,
        &participant.id,
        payload.body,
        &actor,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(guardian)))
}

pub async fn create_donor(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
    Json(payload): Json<Identified<NewContact>>,
) -> AppResult<(StatusCode, Json<Donor>)> {
    let (campaign, participant) = find_participant(state.store(), &participant_id).await?;
    let actor = actor_or_participant(payload.added_by, &participant);
    let donor = add_donor(
        state.store(),
        &campaign.id,
        &participant.id,
        payload.body,
        &actor,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(donor)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorImport {
    pub contacts: Vec<PickedContact>,
    #[serde(default = "first_name_first")]
    pub first_name_first: bool,
}

fn first_name_first() -> bool {
    true
}

pub async fn import_donor_contacts(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
    Json(payload): Json<Identified<DonorImport>>,
) -> AppResult<(StatusCode, Json<Vec<Donor>>)> {
    let (campaign, participant) = find_participant(state.store(), &participant_id).await?;
    let actor = actor_or_participant(payload.added_by, &participant);
    let donors = import_donors(
        state.store(),
        &campaign.id,
        &participant.id,
        payload.body.contacts,
        payload.body.first_name_first,
        &actor,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(donors)))
}

pub async fn record_page_access(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
    Json(identity): Json<Actor>,
) -> AppResult<(StatusCode, Json<AccessEntry>)> {
    let (campaign, participant) = find_participant(state.store(), &participant_id).await?;
    let entry = record_access(state.store(), &campaign.id, &participant.id, &identity).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(Serialize)]
pub struct GateResponse {
    pub onboarding: GateState,
}

pub async fn guardians_messaged(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
) -> AppResult<Json<GateResponse>> {
    let (campaign, participant) = find_participant(state.store(), &participant_id).await?;
    let onboarding = mark_guardians_messaged(state.store(), &campaign.id, &participant.id).await?;
    Ok(Json(GateResponse { onboarding }))
}

pub async fn guardians_skipped(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
) -> AppResult<Json<GateResponse>> {
    let (campaign, participant) = find_participant(state.store(), &participant_id).await?;
    let onboarding = skip_guardians(state.store(), &campaign.id, &participant.id).await?;
    Ok(Json(GateResponse { onboarding }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAs {
    #[serde(default)]
    pub added_by: Option<Actor>,
}

/// The participant texts all their guardians for help with the donor list.
pub async fn message_guardians(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
    device: Device,
    payload: Option<Json<SendAs>>,
) -> AppResult<Json<SendOutcome>> {
    let (campaign, participant) = find_participant(state.store(), &participant_id).await?;
    let guardians = list_guardians(state.store(), &campaign.id, &participant.id).await?;
    let added_by = payload.and_then(|Json(body)| body.added_by);

    let context = SendContext {
        campaign: &campaign,
        sender_id: &participant.id,
        sender_profile: None,
        actor: actor_or_participant(added_by, &participant),
        origin: state.origin(),
    };
    let outcome = device
        .orchestrator(&state)
        .send_group(&context, &participant, &guardians)
        .await?;
    Ok(Json(outcome))
}

pub async fn send_donor_message(
    State(state): State<AppState>,
    Path((participant_id, donor_id, message_id)): Path<(String, String, String)>,
    device: Device,
    payload: Option<Json<SendAs>>,
) -> AppResult<Json<SendOutcome>> {
    let (campaign, participant) = find_participant(state.store(), &participant_id).await?;
    let recipient = crate::recipient::Recipient::load(
        state.store(),
        &campaign.id,
        &participant.id,
        crate::models::MessageKind::Donor,
        Some(&donor_id),
    )
    .await?;
    let added_by = payload.and_then(|Json(body)| body.added_by);

    let context = SendContext {
        campaign: &campaign,
        sender_id: &participant.id,
        sender_profile: None,
        actor: actor_or_participant(added_by, &participant),
        origin: state.origin(),
    };
    let outcome = device
        .orchestrator(&state)
        .send(
            &context,
            &recipient,
            &TemplateChoice::DonorMessage(Some(message_id)),
        )
        .await?;
    Ok(Json(outcome))
}

/// Confirmation from the sender that the text really went out.
pub async fn mark_donor_message_sent(
    State(state): State<AppState>,
    Path((participant_id, donor_id, message_id)): Path<(String, String, String)>,
    device: Device,
) -> AppResult<Json<MessageStatus>> {
    let (campaign, participant) = find_participant(state.store(), &participant_id).await?;
    let status = device
        .orchestrator(&state)
        .mark_sent(&campaign, &participant.id, &donor_id, &message_id)
        .await?;
    Ok(Json(status))
}

pub async fn stream_guardians(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let (campaign, participant) = find_participant(state.store(), &participant_id).await?;
    Ok(snapshot_stream(
        state.store.clone(),
        paths::guardians(&campaign.id, &participant.id)?,
    ))
}

pub async fn stream_donors(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let (campaign, participant) = find_participant(state.store(), &participant_id).await?;
    Ok(snapshot_stream(
        state.store.clone(),
        paths::donors(&campaign.id, &participant.id)?,
    ))
}

/// Sends the whole collection once, then again after every change to it.
/// The subscription lives as long as the response stream.
fn snapshot_stream(
    store: Arc<dyn DocumentStore>,
    collection: CollectionPath,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(collection = %collection, "live listener opened");
    let subscription = store.subscribe(&collection);
    let events = stream::unfold(
        (store, subscription, true),
        |(store, mut subscription, first)| async move {
            if !first && subscription.changed().await.is_none() {
                return None;
            }
            let event = snapshot_event(store.as_ref(), subscription.collection()).await;
            Some((Ok::<_, Infallible>(event), (store, subscription, false)))
        },
    );
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn snapshot_event(store: &dyn DocumentStore, collection: &CollectionPath) -> Event {
    let documents: Vec<Value> = match query_as(store, collection, &Query::new()).await {
        Ok(documents) => documents,
        Err(err) => {
            warn!(collection = %collection, error = %err, "failed to read live collection");
            return Event::default().event("error").data(err.to_string());
        }
    };
    Event::default()
        .event("snapshot")
        .json_data(&documents)
        .unwrap_or_else(|err| Event::default().event("error").data(err.to_string()))
}
