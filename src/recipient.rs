use crate::error::{AppError, AppResult};
use crate::models::{Campaign, Donor, Guardian, MessageKind, Participant, UserProfile};
use crate::store::{get_as, paths, CollectionPath, DocumentStore, StoreResult};
use crate::template::{placeholder, TemplateVars};

/// Anyone the app can text. The three variants share one send flow and differ
/// only in their variables, their history location and the link appended to
/// outreach.
#[derive(Debug, Clone, PartialEq)]
pub enum Recipient {
    Guardian {
        participant: Participant,
        guardian: Guardian,
    },
    Donor {
        participant: Participant,
        donor: Donor,
    },
    Participant(Participant),
}

pub fn participant_url(origin: &str, participant_id: &str) -> String {
    format!("{}/participants/{participant_id}", origin.trim_end_matches('/'))
}

impl Recipient {
    pub fn kind(&self) -> MessageKind {
        match self {
            Recipient::Guardian { .. } => MessageKind::Guardian,
            Recipient::Donor { .. } => MessageKind::Donor,
            Recipient::Participant(_) => MessageKind::Participant,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Recipient::Guardian { guardian, .. } => &guardian.id,
            Recipient::Donor { donor, .. } => &donor.id,
            Recipient::Participant(participant) => &participant.id,
        }
    }

    pub fn first_name(&self) -> &str {
        match self {
            Recipient::Guardian { guardian, .. } => &guardian.first_name,
            Recipient::Donor { donor, .. } => &donor.first_name,
            Recipient::Participant(participant) => &participant.first_name,
        }
    }

    pub fn phone_number(&self) -> &str {
        match self {
            Recipient::Guardian { guardian, .. } => &guardian.phone_number,
            Recipient::Donor { donor, .. } => &donor.phone_number,
            Recipient::Participant(participant) => &participant.phone_number,
        }
    }

    /// The participant the recipient belongs to (or is).
    pub fn participant(&self) -> &Participant {
        match self {
            Recipient::Guardian { participant, .. }
            | Recipient::Donor { participant, .. }
            | Recipient::Participant(participant) => participant,
        }
    }

    pub fn donor_id(&self) -> Option<&str> {
        match self {
            Recipient::Donor { donor, .. } => Some(&donor.id),
            _ => None,
        }
    }

    /// Collection holding this recipient's message history.
    pub fn history(&self, campaign_id: &str) -> StoreResult<CollectionPath> {
        let participant_id = &self.participant().id;
        match self {
            Recipient::Guardian { guardian, .. } => {
                paths::guardian(campaign_id, participant_id, &guardian.id)?.child("messages")
            }
            Recipient::Donor { donor, .. } => {
                paths::donor(campaign_id, participant_id, &donor.id)?.child("messages")
            }
            Recipient::Participant(_) => {
                paths::participant(campaign_id, participant_id)?.child("messages")
            }
        }
    }

    pub fn vars(&self, campaign: &Campaign, sender: Option<&UserProfile>, origin: &str) -> TemplateVars {
        let participant = self.participant();
        let mut vars = TemplateVars::for_campaign(campaign)
            .with(
                placeholder::PARTICIPANT_FIRST_NAME,
                participant.first_name.clone(),
            )
            .with(
                placeholder::PARTICIPANT_LAST_NAME,
                participant.last_name.clone(),
            )
            .with(placeholder::PARTICIPANT_NAME, participant.full_name())
            .with(
                placeholder::PARTICIPANT_URL,
                participant_url(origin, &participant.id),
            );

        match self {
            Recipient::Guardian { guardian, .. } => {
                vars.insert(placeholder::GUARDIAN_FIRST_NAME, guardian.first_name.clone());
            }
            Recipient::Donor { donor, .. } => {
                vars.insert(placeholder::DONOR_FIRST_NAME, donor.first_name.clone());
                vars.insert(placeholder::DONOR_LAST_NAME, donor.last_name.clone());
            }
            Recipient::Participant(_) => {}
        }

        if let Some(profile) = sender {
            vars.insert(placeholder::USER_FIRST_NAME, profile.first_name.clone());
            vars.insert(placeholder::USER_LAST_NAME, profile.last_name.clone());
        }
        vars
    }

    /// Appended to organizer outreach so the recipient can act on it.
    pub fn outreach_link(&self, campaign: &Campaign, origin: &str) -> Option<String> {
        match self {
            Recipient::Guardian { participant, .. } => {
                Some(participant_url(origin, &participant.id))
            }
            Recipient::Donor { .. } if !campaign.donation_url.is_empty() => {
                Some(campaign.donation_url.clone())
            }
            Recipient::Donor { .. } | Recipient::Participant(_) => None,
        }
    }

    pub async fn load(
        store: &dyn DocumentStore,
        campaign_id: &str,
        participant_id: &str,
        kind: MessageKind,
        recipient_id: Option<&str>,
    ) -> AppResult<Self> {
        let participant = load_participant(store, campaign_id, participant_id).await?;
        match kind {
            MessageKind::Participant => Ok(Recipient::Participant(participant)),
            MessageKind::Guardian => {
                let guardian_id = recipient_id
                    .ok_or_else(|| AppError::bad_request("guardianId is required"))?;
                let guardian: Guardian = get_as(
                    store,
                    &paths::guardian(campaign_id, participant_id, guardian_id)?,
                )
                .await?
                .ok_or_else(|| AppError::not_found("guardian not found"))?;
                Ok(Recipient::Guardian {
                    participant,
                    guardian,
                })
            }
            MessageKind::Donor => {
                let donor_id =
                    recipient_id.ok_or_else(|| AppError::bad_request("donorId is required"))?;
                let donor: Donor =
                    get_as(store, &paths::donor(campaign_id, participant_id, donor_id)?)
                        .await?
                        .ok_or_else(|| AppError::not_found("donor not found"))?;
                Ok(Recipient::Donor { participant, donor })
            }
        }
    }
}

pub async fn load_participant(
    store: &dyn DocumentStore,
    campaign_id: &str,
    participant_id: &str,
) -> AppResult<Participant> {
    get_as(store, &paths::participant(campaign_id, participant_id)?)
        .await?
        .ok_or_else(|| AppError::not_found("participant not found"))
}
