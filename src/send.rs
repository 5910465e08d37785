//! Composes a message for a recipient, records it, and hands back what the
//! client needs to deliver it.
//!
//! The audit batch (history record plus participant log entry) is committed
//! before any payload exists. If that write fails the caller gets an error and
//! no link, so the messaging app is never opened for an unrecorded send.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::channel::{build_payload, resolve_channel, ChannelKind, ChannelPayload, Platform};
use crate::error::{AppError, AppResult};
use crate::models::{
    Actor, Campaign, Guardian, LogAction, LogEntry, MessageRecord, MessageStatus, Participant,
    UserProfile,
};
use crate::recipient::{participant_url, Recipient};
use crate::store::{get_as, paths, to_body, DocumentStore, WriteBatch};
use crate::template::render;

/// Client-side settings the orchestrator consults.
pub trait PreferencePort: Send + Sync {
    fn hide_messaging_instructions(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientPreferences {
    pub hide_messaging_instructions: bool,
}

impl PreferencePort for ClientPreferences {
    fn hide_messaging_instructions(&self) -> bool {
        self.hide_messaging_instructions
    }
}

/// Where the text of a single send comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateChoice {
    /// Organizer outreach text; the recipient's link is appended.
    Outreach(String),
    /// A campaign donor message by id, or the active one when `None`.
    DonorMessage(Option<String>),
}

/// Who is sending and on whose behalf.
#[derive(Debug, Clone)]
pub struct SendContext<'a> {
    pub campaign: &'a Campaign,
    pub sender_id: &'a str,
    pub sender_profile: Option<&'a UserProfile>,
    pub actor: Actor,
    pub origin: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub message: String,
    pub channel: ChannelKind,
    pub payload: ChannelPayload,
    /// True when the client should explain how to come back from the
    /// messaging app.
    pub show_return_instructions: bool,
    pub record_ids: Vec<String>,
}

pub struct SendOrchestrator<'a> {
    store: &'a dyn DocumentStore,
    platform: Platform,
    hide_instructions: bool,
}

impl<'a> SendOrchestrator<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        platform: Platform,
        preferences: &dyn PreferencePort,
    ) -> Self {
        Self {
            store,
            platform,
            hide_instructions: preferences.hide_messaging_instructions(),
        }
    }

    pub fn channel(&self) -> ChannelKind {
        resolve_channel(self.platform)
    }

    pub async fn send(
        &self,
        context: &SendContext<'_>,
        recipient: &Recipient,
        choice: &TemplateChoice,
    ) -> AppResult<SendOutcome> {
        let vars = recipient.vars(context.campaign, context.sender_profile, context.origin);
        let message = match choice {
            TemplateChoice::Outreach(template) => {
                let body = render(template, &vars);
                match recipient.outreach_link(context.campaign, context.origin) {
                    Some(link) => format!("{body}\n\n{link}"),
                    None => body,
                }
            }
            TemplateChoice::DonorMessage(message_id) => {
                let selected = match message_id {
                    Some(id) => context.campaign.donor_message(id),
                    None => context.campaign.active_donor_message(),
                }
                .ok_or_else(|| AppError::not_found("donor message not found"))?;
                render(&selected.content, &vars)
            }
        };

        let mut batch = WriteBatch::new();
        let record_id = stage_audit(&mut batch, context, recipient, &message)?;
        self.commit_audit(context, batch).await?;

        info!(
            campaign_id = %context.campaign.id,
            participant_id = %recipient.participant().id,
            recipient_id = %recipient.id(),
            kind = %recipient.kind(),
            channel = self.channel().as_str(),
            "message recorded"
        );

        Ok(self.outcome(
            message,
            vec![recipient.phone_number().to_string()],
            vec![record_id],
        ))
    }

    /// One message to all of a participant's guardians, recorded once per
    /// guardian and delivered as a single group text.
    pub async fn send_group(
        &self,
        context: &SendContext<'_>,
        participant: &Participant,
        guardians: &[Guardian],
    ) -> AppResult<SendOutcome> {
        if guardians.is_empty() {
            return Err(AppError::bad_request("No guardians available to message"));
        }

        let vars = Recipient::Participant(participant.clone()).vars(
            context.campaign,
            context.sender_profile,
            context.origin,
        );
        let body = render(&context.campaign.template_message_to_guardians, &vars);
        let message = format!(
            "{body}\n\nYou can add potential donors here: {}",
            participant_url(context.origin, &participant.id)
        );

        let mut batch = WriteBatch::new();
        let mut record_ids = Vec::with_capacity(guardians.len());
        for guardian in guardians {
            let recipient = Recipient::Guardian {
                participant: participant.clone(),
                guardian: guardian.clone(),
            };
            record_ids.push(stage_audit(&mut batch, context, &recipient, &message)?);
        }
        self.commit_audit(context, batch).await?;

        info!(
            campaign_id = %context.campaign.id,
            participant_id = %participant.id,
            guardians = guardians.len(),
            "group message recorded"
        );

        let numbers = guardians
            .iter()
            .map(|guardian| guardian.phone_number.clone())
            .collect();
        Ok(self.outcome(message, numbers, record_ids))
    }

    /// Records the sender's confirmation that a donor message actually went
    /// out. Navigation alone never implies this.
    pub async fn mark_sent(
        &self,
        campaign: &Campaign,
        participant_id: &str,
        donor_id: &str,
        message_id: &str,
    ) -> AppResult<MessageStatus> {
        if campaign.donor_message(message_id).is_none() {
            return Err(AppError::not_found("donor message not found"));
        }
        let path = paths::donor(&campaign.id, participant_id, donor_id)?;
        if get_as::<Value>(self.store, &path).await?.is_none() {
            return Err(AppError::not_found("donor not found"));
        }

        let status = MessageStatus {
            sent: true,
            sent_at: Some(Utc::now()),
        };
        let mut patch = Map::new();
        patch.insert(
            format!("messageStatuses.{message_id}"),
            serde_json::to_value(&status)?,
        );
        self.store.update(&path, patch).await.map_err(|err| {
            error!(error = %err, donor = %path, "failed to mark message sent");
            AppError::from(err)
        })?;
        Ok(status)
    }

    async fn commit_audit(&self, context: &SendContext<'_>, batch: WriteBatch) -> AppResult<()> {
        self.store.commit(batch).await.map_err(|err| {
            error!(
                error = %err,
                campaign_id = %context.campaign.id,
                "failed to record message; not handing off to messaging app"
            );
            AppError::from(err)
        })
    }

    fn outcome(
        &self,
        message: String,
        phone_numbers: Vec<String>,
        record_ids: Vec<String>,
    ) -> SendOutcome {
        let channel = self.channel();
        let payload = build_payload(channel, &phone_numbers, &message);
        SendOutcome {
            message,
            channel,
            payload,
            show_return_instructions: channel.is_deep_link() && !self.hide_instructions,
            record_ids,
        }
    }
}

fn stage_audit(
    batch: &mut WriteBatch,
    context: &SendContext<'_>,
    recipient: &Recipient,
    message: &str,
) -> AppResult<String> {
    let now = Utc::now();
    let record_path = recipient.history(&context.campaign.id)?.new_doc();
    let record = MessageRecord {
        id: record_path.id().to_string(),
        message: message.to_string(),
        sent_at: now,
        sent_by: context.sender_id.to_string(),
    };
    let log = LogEntry {
        id: String::new(),
        action: LogAction::SendMessage,
        timestamp: now,
        added_by: context.actor.clone(),
        donor_id: recipient.donor_id().map(str::to_string),
        recipient_id: Some(recipient.id().to_string()),
    };

    let record_id = record.id.clone();
    batch.set(record_path, to_body(&record)?);
    batch.set(
        paths::logs(&context.campaign.id, &recipient.participant().id)?.new_doc(),
        to_body(&log)?,
    );
    Ok(record_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActorKind;
    use crate::store::{query_as, MemoryStore, Query};
    use serde_json::json;

    fn campaign() -> Campaign {
        serde_json::from_value(json!({
            "id": "c1",
            "name": "Drive",
            "organizationName": "Tigers",
            "ownerTitle": "Coach Kim",
            "ownerId": "u1",
            "donationUrl": "https://give.example/t",
            "templateMessageToGuardians": "Help {participantFirstName} reach {targetDonorCount} donors",
            "donorMessages": [
                { "id": "1", "order": 1, "content": "Hi {donorFirstName}, {donationUrl}", "isActive": true }
            ]
        }))
        .unwrap()
    }

    fn participant() -> Participant {
        serde_json::from_value(json!({
            "id": "p1", "firstName": "Jo", "lastName": "Park", "phoneNumber": "5550100"
        }))
        .unwrap()
    }

    fn guardian(id: &str, phone: &str) -> Guardian {
        Guardian {
            id: id.into(),
            first_name: "Lee".into(),
            last_name: "Park".into(),
            phone_number: phone.into(),
        }
    }

    fn context(campaign: &Campaign) -> SendContext<'_> {
        SendContext {
            campaign,
            sender_id: "u1",
            sender_profile: None,
            actor: Actor::new(ActorKind::Organizer, "Coach", "Kim"),
            origin: "https://app.example",
        }
    }

    #[tokio::test]
    async fn outreach_appends_link_and_records_history() {
        let store = MemoryStore::new();
        let campaign = campaign();
        let orchestrator = SendOrchestrator::new(
            &store,
            Platform {
                is_ios: true,
                is_mobile: true,
            },
            &ClientPreferences::default(),
        );
        let recipient = Recipient::Guardian {
            participant: participant(),
            guardian: guardian("g1", "5550101"),
        };

        let outcome = orchestrator
            .send(
                &context(&campaign),
                &recipient,
                &TemplateChoice::Outreach("Hi {guardianFirstName}".into()),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome.message,
            "Hi Lee\n\nhttps://app.example/participants/p1"
        );
        assert!(outcome.show_return_instructions);
        assert!(outcome
            .payload
            .deep_link()
            .unwrap()
            .starts_with("sms://open?addresses=5550101&body=Hi%20Lee"));

        let history: Vec<MessageRecord> =
            query_as(&store, &recipient.history("c1").unwrap(), &Query::new())
                .await
                .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sent_by, "u1");
        assert_eq!(history[0].id, outcome.record_ids[0]);
    }

    #[tokio::test]
    async fn preference_suppresses_return_instructions() {
        let store = MemoryStore::new();
        let campaign = campaign();
        let orchestrator = SendOrchestrator::new(
            &store,
            Platform {
                is_ios: false,
                is_mobile: true,
            },
            &ClientPreferences {
                hide_messaging_instructions: true,
            },
        );
        let outcome = orchestrator
            .send(
                &context(&campaign),
                &Recipient::Participant(participant()),
                &TemplateChoice::Outreach("Hi {participantFirstName}".into()),
            )
            .await
            .unwrap();
        assert_eq!(outcome.channel, ChannelKind::GenericSmsDeepLink);
        assert!(!outcome.show_return_instructions);
    }

    #[tokio::test]
    async fn group_send_records_each_guardian() {
        let store = MemoryStore::new();
        let campaign = campaign();
        let orchestrator =
            SendOrchestrator::new(&store, Platform::desktop(), &ClientPreferences::default());

        let outcome = orchestrator
            .send_group(
                &context(&campaign),
                &participant(),
                &[guardian("g1", "5550101"), guardian("g2", "5550102")],
            )
            .await
            .unwrap();

        assert_eq!(outcome.channel, ChannelKind::ManualClipboard);
        assert!(!outcome.show_return_instructions);
        assert!(outcome.message.starts_with("Help Jo reach 10 donors"));
        assert_eq!(outcome.record_ids.len(), 2);

        let logs: Vec<LogEntry> = query_as(&store, &paths::logs("c1", "p1").unwrap(), &Query::new())
            .await
            .unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|log| log.action == LogAction::SendMessage));
    }

    #[tokio::test]
    async fn empty_group_is_rejected() {
        let store = MemoryStore::new();
        let campaign = campaign();
        let orchestrator =
            SendOrchestrator::new(&store, Platform::desktop(), &ClientPreferences::default());
        let err = orchestrator
            .send_group(&context(&campaign), &participant(), &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }

    #[tokio::test]
    async fn mark_sent_requires_known_message() {
        let store = MemoryStore::new();
        let campaign = campaign();
        store
            .set(
                &paths::donor("c1", "p1", "d1").unwrap(),
                json!({ "firstName": "Rae", "phoneNumber": "555" }),
            )
            .await
            .unwrap();
        let orchestrator =
            SendOrchestrator::new(&store, Platform::desktop(), &ClientPreferences::default());

        let err = orchestrator
            .mark_sent(&campaign, "p1", "d1", "9")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");

        let status = orchestrator.mark_sent(&campaign, "p1", "d1", "1").await.unwrap();
        assert!(status.sent);
        let donor = store.get(&paths::donor("c1", "p1", "d1").unwrap()).await.unwrap().unwrap();
        assert_eq!(donor.data["messageStatuses"]["1"]["sent"], json!(true));
    }
}
