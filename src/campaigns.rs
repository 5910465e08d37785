use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{Campaign, CreatedBy, DonorMessage, ManagerRole, MessageKind, MessageTemplate};
use crate::store::{get_as, new_document_id, paths, query_as, to_body, DocumentStore, Query};
use crate::template::{
    default_follow_up_donor_message, default_guardian_campaign_message,
    default_initial_donor_message, default_outreach_template, unknown_placeholders,
};

/// Loads a campaign and checks that `user_id` manages it. A missing campaign
/// and a campaign the user may not touch are reported differently.
pub async fn authorize(
    store: &dyn DocumentStore,
    campaign_id: &str,
    user_id: &str,
) -> AppResult<(Campaign, ManagerRole)> {
    let campaign = load_campaign(store, campaign_id).await?;
    let role = campaign
        .role_of(user_id)
        .ok_or_else(|| AppError::forbidden("you are not a manager of this campaign"))?;
    Ok((campaign, role))
}

pub async fn load_campaign(store: &dyn DocumentStore, campaign_id: &str) -> AppResult<Campaign> {
    get_as(store, &paths::campaign(campaign_id)?)
        .await?
        .ok_or_else(|| AppError::not_found("campaign not found"))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub organization_name: String,
    #[serde(default)]
    pub owner_title: String,
    pub target_donor_count: Option<u32>,
    #[serde(default)]
    pub donation_url: String,
    pub template_message_to_guardians: Option<String>,
    pub donor_messages: Option<Vec<DonorMessage>>,
}

/// The two donor messages every new campaign starts with.
pub fn default_donor_messages() -> Vec<DonorMessage> {
    vec![
        DonorMessage {
            id: "1".to_string(),
            order: 1,
            content: default_initial_donor_message().to_string(),
            is_active: true,
        },
        DonorMessage {
            id: "2".to_string(),
            order: 2,
            content: default_follow_up_donor_message().to_string(),
            is_active: false,
        },
    ]
}

fn validate_target(target: u32) -> AppResult<u32> {
    if target == 0 {
        return Err(AppError::bad_request("targetDonorCount must be positive"));
    }
    Ok(target)
}

pub async fn create_campaign(
    store: &dyn DocumentStore,
    user_id: &str,
    role: ManagerRole,
    draft: CampaignDraft,
) -> AppResult<Campaign> {
    let name = draft.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    let target_donor_count = match draft.target_donor_count {
        Some(target) => validate_target(target)?,
        None => crate::models::DEFAULT_TARGET_DONOR_COUNT,
    };
    let donor_messages = match draft.donor_messages {
        Some(messages) => normalize_donor_messages(messages),
        None => default_donor_messages(),
    };

    let path = paths::campaigns().new_doc();
    let campaign = Campaign {
        id: path.id().to_string(),
        name: name.to_string(),
        description: draft.description,
        organization_name: draft.organization_name,
        owner_id: (role == ManagerRole::Owner).then(|| user_id.to_string()),
        facilitator_ids: match role {
            ManagerRole::Owner => Vec::new(),
            ManagerRole::Facilitator => vec![user_id.to_string()],
        },
        owner_title: draft.owner_title,
        template_message_to_guardians: draft
            .template_message_to_guardians
            .unwrap_or_else(|| default_guardian_campaign_message().to_string()),
        target_donor_count,
        donation_url: draft.donation_url,
        donor_messages,
        created_at: Some(Utc::now()),
        created_by: Some(CreatedBy {
            id: user_id.to_string(),
            role,
        }),
        previous_owner_id: None,
        updated_at: None,
    };
    store.set(&path, to_body(&campaign)?).await?;

    info!(campaign_id = %campaign.id, role = role.as_str(), "campaign created");
    Ok(campaign)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub organization_name: Option<String>,
    pub owner_title: Option<String>,
    pub target_donor_count: Option<u32>,
    pub donation_url: Option<String>,
    pub template_message_to_guardians: Option<String>,
}

impl CampaignPatch {
    fn into_fields(self) -> AppResult<Map<String, Value>> {
        let mut fields = Map::new();
        if let Some(name) = self.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(AppError::bad_request("name must not be empty"));
            }
            fields.insert("name".into(), Value::String(name));
        }
        if let Some(target) = self.target_donor_count {
            fields.insert(
                "targetDonorCount".into(),
                Value::from(validate_target(target)?),
            );
        }
        let text_fields = [
            ("description", self.description),
            ("organizationName", self.organization_name),
            ("ownerTitle", self.owner_title),
            ("donationUrl", self.donation_url),
            ("templateMessageToGuardians", self.template_message_to_guardians),
        ];
        for (key, value) in text_fields {
            if let Some(value) = value {
                fields.insert(key.into(), Value::String(value));
            }
        }
        Ok(fields)
    }
}

pub async fn update_campaign(
    store: &dyn DocumentStore,
    campaign_id: &str,
    user_id: &str,
    patch: CampaignPatch,
) -> AppResult<Campaign> {
    authorize(store, campaign_id, user_id).await?;
    let mut fields = patch.into_fields()?;
    if fields.is_empty() {
        return load_campaign(store, campaign_id).await;
    }
    fields.insert("updatedAt".into(), Value::String(Utc::now().to_rfc3339()));
    store.update(&paths::campaign(campaign_id)?, fields).await?;
    load_campaign(store, campaign_id).await
}

/// Campaigns the user owns or facilitates, newest first.
pub async fn list_campaigns(store: &dyn DocumentStore, user_id: &str) -> AppResult<Vec<Campaign>> {
    let owned: Vec<Campaign> = query_as(
        store,
        &paths::campaigns(),
        &Query::new().where_eq("ownerId", user_id),
    )
    .await?;
    let facilitated: Vec<Campaign> = query_as(
        store,
        &paths::campaigns(),
        &Query::new().array_contains("facilitatorIds", user_id),
    )
    .await?;

    let mut merged: BTreeMap<String, Campaign> = BTreeMap::new();
    for campaign in owned.into_iter().chain(facilitated) {
        merged.entry(campaign.id.clone()).or_insert(campaign);
    }
    let mut campaigns: Vec<Campaign> = merged.into_values().collect();
    campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(campaigns)
}

/// Sorts by `order`, renumbers densely from 1 and keeps at most the first
/// active message active.
pub fn normalize_donor_messages(mut messages: Vec<DonorMessage>) -> Vec<DonorMessage> {
    messages.sort_by_key(|message| message.order);
    let mut seen_active = false;
    for (index, message) in messages.iter_mut().enumerate() {
        message.order = index as u32 + 1;
        if message.is_active {
            message.is_active = !seen_active;
            seen_active = true;
        }
        if message.id.is_empty() {
            message.id = new_document_id();
        }
    }
    messages
}

pub fn add_donor_message(messages: &mut Vec<DonorMessage>, content: String) -> DonorMessage {
    let message = DonorMessage {
        id: new_document_id(),
        order: messages.len() as u32 + 1,
        content,
        is_active: false,
    };
    messages.push(message.clone());
    message
}

fn position(messages: &[DonorMessage], message_id: &str) -> AppResult<usize> {
    messages
        .iter()
        .position(|message| message.id == message_id)
        .ok_or_else(|| AppError::not_found("donor message not found"))
}

pub fn edit_donor_message(
    messages: &mut [DonorMessage],
    message_id: &str,
    content: String,
) -> AppResult<()> {
    let index = position(messages, message_id)?;
    messages[index].content = content;
    Ok(())
}

/// Makes `message_id` the only active message.
pub fn activate_donor_message(messages: &mut [DonorMessage], message_id: &str) -> AppResult<()> {
    position(messages, message_id)?;
    for message in messages.iter_mut() {
        message.is_active = message.id == message_id;
    }
    Ok(())
}

/// Removes a message and closes the gap so orders stay 1..N.
pub fn delete_donor_message(messages: &mut Vec<DonorMessage>, message_id: &str) -> AppResult<()> {
    let index = position(messages, message_id)?;
    messages.remove(index);
    messages.sort_by_key(|message| message.order);
    for (index, message) in messages.iter_mut().enumerate() {
        message.order = index as u32 + 1;
    }
    Ok(())
}

/// Applies `edit` to a campaign's donor messages and stores the result.
pub async fn modify_donor_messages<F, T>(
    store: &dyn DocumentStore,
    campaign_id: &str,
    user_id: &str,
    edit: F,
) -> AppResult<(Vec<DonorMessage>, T)>
where
    F: FnOnce(&mut Vec<DonorMessage>) -> AppResult<T>,
{
    let (campaign, _) = authorize(store, campaign_id, user_id).await?;
    let mut messages = campaign.donor_messages;
    messages.sort_by_key(|message| message.order);
    let outcome = edit(&mut messages)?;

    let mut fields = Map::new();
    fields.insert("donorMessages".into(), serde_json::to_value(&messages)?);
    fields.insert("updatedAt".into(), Value::String(Utc::now().to_rfc3339()));
    store.update(&paths::campaign(campaign_id)?, fields).await?;
    Ok((messages, outcome))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutreachTemplate {
    pub kind: MessageKind,
    pub content: String,
    /// False when `content` is the default for the user's role.
    pub saved: bool,
}

/// The user's saved template for `kind`, or the default for their role.
pub async fn outreach_template(
    store: &dyn DocumentStore,
    campaign: &Campaign,
    user_id: &str,
    role: ManagerRole,
    kind: MessageKind,
) -> AppResult<OutreachTemplate> {
    let saved: Option<MessageTemplate> =
        get_as(store, &paths::message_template(&campaign.id, user_id, kind)?).await?;
    Ok(match saved {
        Some(template) => OutreachTemplate {
            kind,
            content: template.content,
            saved: true,
        },
        None => OutreachTemplate {
            kind,
            content: default_outreach_template(kind, role).to_string(),
            saved: false,
        },
    })
}

pub async fn save_outreach_template(
    store: &dyn DocumentStore,
    campaign_id: &str,
    user_id: &str,
    kind: MessageKind,
    content: String,
) -> AppResult<MessageTemplate> {
    let unknown = unknown_placeholders(&content, kind);
    if !unknown.is_empty() {
        warn!(
            campaign_id,
            user_id,
            kind = kind.as_str(),
            unknown = ?unknown,
            "template uses placeholders that are never filled"
        );
    }
    let template = MessageTemplate {
        content,
        kind,
        updated_at: Utc::now(),
        updated_by: user_id.to_string(),
    };
    store
        .set(
            &paths::message_template(campaign_id, user_id, kind)?,
            to_body(&template)?,
        )
        .await?;
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn messages(count: u32) -> Vec<DonorMessage> {
        (1..=count)
            .map(|order| DonorMessage {
                id: format!("m{order}"),
                order,
                content: format!("message {order}"),
                is_active: order == 1,
            })
            .collect()
    }

    #[test]
    fn activation_is_exclusive() {
        for count in 1..=5 {
            let mut list = messages(count);
            let target = format!("m{count}");
            activate_donor_message(&mut list, &target).unwrap();
            let active: Vec<&str> = list
                .iter()
                .filter(|message| message.is_active)
                .map(|message| message.id.as_str())
                .collect();
            assert_eq!(active, vec![target.as_str()]);
        }
    }

    #[test]
    fn delete_keeps_orders_dense() {
        let mut list = messages(4);
        delete_donor_message(&mut list, "m2").unwrap();
        let layout: Vec<(&str, u32)> = list
            .iter()
            .map(|message| (message.id.as_str(), message.order))
            .collect();
        assert_eq!(layout, vec![("m1", 1), ("m3", 2), ("m4", 3)]);
    }

    #[test]
    fn unknown_message_is_not_found() {
        let mut list = messages(2);
        let err = activate_donor_message(&mut list, "nope").unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn normalize_repairs_order_and_activation() {
        let mut list = messages(3);
        list[2].is_active = true;
        list[0].order = 9;
        let normalized = normalize_donor_messages(list);
        let ids: Vec<&str> = normalized.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3", "m1"]);
        assert_eq!(
            normalized.iter().filter(|message| message.is_active).count(),
            1
        );
        assert!(normalized[1].is_active);
    }

    #[tokio::test]
    async fn listing_unions_owned_and_facilitated() {
        let store = MemoryStore::new();
        let draft = |name: &str| CampaignDraft {
            name: name.to_string(),
            ..CampaignDraft::default()
        };
        let owned = create_campaign(&store, "u1", ManagerRole::Owner, draft("Owned"))
            .await
            .unwrap();
        let helped = create_campaign(&store, "u1", ManagerRole::Facilitator, draft("Helped"))
            .await
            .unwrap();
        create_campaign(&store, "u2", ManagerRole::Owner, draft("Other"))
            .await
            .unwrap();

        let listed = list_campaigns(&store, "u1").await.unwrap();
        let mut ids: Vec<String> = listed.into_iter().map(|c| c.id).collect();
        ids.sort();
        let mut expected = vec![owned.id, helped.id];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn new_campaign_gets_default_messages() {
        let store = MemoryStore::new();
        let campaign = create_campaign(
            &store,
            "u1",
            ManagerRole::Owner,
            CampaignDraft {
                name: "Drive".into(),
                ..CampaignDraft::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(campaign.target_donor_count, 10);
        assert_eq!(campaign.donor_messages.len(), 2);
        assert_eq!(campaign.active_donor_message().unwrap().id, "1");
        assert!(campaign
            .template_message_to_guardians
            .contains("{targetDonorCount} potential donors"));

        let zero = create_campaign(
            &store,
            "u1",
            ManagerRole::Owner,
            CampaignDraft {
                name: "Drive".into(),
                target_donor_count: Some(0),
                ..CampaignDraft::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(zero.code(), "bad_request");
    }

    #[tokio::test]
    async fn outreach_template_falls_back_to_role_default() {
        let store = MemoryStore::new();
        let campaign = create_campaign(
            &store,
            "u1",
            ManagerRole::Owner,
            CampaignDraft {
                name: "Drive".into(),
                ..CampaignDraft::default()
            },
        )
        .await
        .unwrap();

        let fallback = outreach_template(
            &store,
            &campaign,
            "u1",
            ManagerRole::Facilitator,
            MessageKind::Donor,
        )
        .await
        .unwrap();
        assert!(!fallback.saved);
        assert!(fallback.content.contains("{userFirstName}"));

        save_outreach_template(&store, &campaign.id, "u1", MessageKind::Donor, "Mine".into())
            .await
            .unwrap();
        let saved = outreach_template(
            &store,
            &campaign,
            "u1",
            ManagerRole::Facilitator,
            MessageKind::Donor,
        )
        .await
        .unwrap();
        assert!(saved.saved);
        assert_eq!(saved.content, "Mine");
    }
}
