//! Co-management invitations.
//!
//! An invite is created `pending` and resolved exactly once, to `accepted` or
//! `declined`. Resolution runs in a store transaction that re-reads the
//! invite, so of two racing accepts only one sees `pending`; the other fails
//! with a stale-invite error and changes nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::channel::{build_payload, ChannelKind, ChannelPayload};
use crate::error::{AppError, AppResult};
use crate::models::{Campaign, Invite, InviteStatus, ManagerRole, UserProfile};
use crate::store::{get_as, paths, to_body, DocumentStore, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Decline,
}

/// Field updates produced by resolving an invite.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub invite_patch: Map<String, Value>,
    pub campaign_patch: Option<Map<String, Value>>,
}

fn timestamp(now: DateTime<Utc>) -> Value {
    Value::String(now.to_rfc3339())
}

/// Computes the writes for `actor` resolving `invite`. Fails with a
/// stale-invite error unless the invite is still pending.
pub fn apply_transition(
    invite: &Invite,
    campaign: &Campaign,
    decision: Decision,
    actor: &str,
    now: DateTime<Utc>,
) -> AppResult<Transition> {
    if invite.status != InviteStatus::Pending {
        return Err(AppError::stale_invite());
    }

    let mut invite_patch = Map::new();
    match decision {
        Decision::Decline => {
            invite_patch.insert("status".into(), Value::from("declined"));
            invite_patch.insert("declinedAt".into(), timestamp(now));
            invite_patch.insert("declinedBy".into(), Value::from(actor));
            return Ok(Transition {
                invite_patch,
                campaign_patch: None,
            });
        }
        Decision::Accept => {
            invite_patch.insert("status".into(), Value::from("accepted"));
            invite_patch.insert("acceptedAt".into(), timestamp(now));
            invite_patch.insert("acceptedBy".into(), Value::from(actor));
        }
    }

    let campaign_patch = match invite.role {
        ManagerRole::Owner => {
            let mut patch = Map::new();
            patch.insert(
                "previousOwnerId".into(),
                campaign
                    .owner_id
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            );
            patch.insert("ownerId".into(), Value::from(actor));
            if campaign.is_facilitator(actor) {
                let remaining: Vec<Value> = campaign
                    .facilitator_ids
                    .iter()
                    .filter(|id| id.as_str() != actor)
                    .map(|id| Value::from(id.as_str()))
                    .collect();
                patch.insert("facilitatorIds".into(), Value::Array(remaining));
            }
            patch.insert("updatedAt".into(), timestamp(now));
            Some(patch)
        }
        ManagerRole::Facilitator if campaign.is_manager(actor) => None,
        ManagerRole::Facilitator => {
            let mut ids: Vec<Value> = campaign
                .facilitator_ids
                .iter()
                .map(|id| Value::from(id.as_str()))
                .collect();
            ids.push(Value::from(actor));
            let mut patch = Map::new();
            patch.insert("facilitatorIds".into(), Value::Array(ids));
            patch.insert("updatedAt".into(), timestamp(now));
            Some(patch)
        }
    };

    Ok(Transition {
        invite_patch,
        campaign_patch,
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteRequest {
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub phone_number: String,
    pub role: ManagerRole,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedInvite {
    pub invite: Invite,
    pub invite_url: String,
    pub message: String,
    pub payload: ChannelPayload,
}

pub fn invite_url(origin: &str, campaign_id: &str, invite_id: &str) -> String {
    format!(
        "{}/invites/{campaign_id}/{invite_id}",
        origin.trim_end_matches('/')
    )
}

/// Name shown to the invitee: the inviter's profile name, else the local part
/// of their email, else "Someone".
pub fn inviter_name(profile: Option<&UserProfile>, email: Option<&str>) -> String {
    if let Some(profile) = profile {
        let name = format!("{} {}", profile.first_name, profile.last_name);
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    email
        .and_then(|email| email.split('@').next())
        .filter(|local| !local.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "Someone".to_string())
}

/// Records a pending invite and composes the invitation text for `channel`.
/// The caller must already have checked that `inviter_id` manages `campaign`.
pub async fn create_invite(
    store: &dyn DocumentStore,
    campaign: &Campaign,
    inviter_id: &str,
    inviter_name: &str,
    request: InviteRequest,
    origin: &str,
    channel: ChannelKind,
) -> AppResult<CreatedInvite> {
    let first_name = request.first_name.trim();
    let phone_number = request.phone_number.trim();
    if first_name.is_empty() {
        return Err(AppError::bad_request("firstName must not be empty"));
    }
    if phone_number.is_empty() {
        return Err(AppError::bad_request("phoneNumber must not be empty"));
    }

    let path = paths::invites(&campaign.id)?.new_doc();
    let invite = Invite {
        id: path.id().to_string(),
        first_name: first_name.to_string(),
        last_name: request.last_name.trim().to_string(),
        phone_number: phone_number.to_string(),
        role: request.role,
        status: InviteStatus::Pending,
        created_at: Utc::now(),
        created_by: inviter_id.to_string(),
        accepted_at: None,
        accepted_by: None,
        declined_at: None,
        declined_by: None,
    };
    store.set(&path, to_body(&invite)?).await?;

    let url = invite_url(origin, &campaign.id, &invite.id);
    let message = format!(
        "{inviter_name} is inviting you to manage {}. Click the following link to accept the invitation:\n\n{url}",
        campaign.name
    );
    let payload = build_payload(channel, &[invite.phone_number.clone()], &message);

    info!(
        campaign_id = %campaign.id,
        invite_id = %invite.id,
        role = invite.role.as_str(),
        "invite created"
    );

    Ok(CreatedInvite {
        invite,
        invite_url: url,
        message,
        payload,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteView {
    pub invite: Invite,
    pub campaign_id: String,
    pub campaign_name: String,
}

/// Loads an invite for its landing page. Missing and already-resolved
/// invites are reported differently.
pub async fn get_invite(
    store: &dyn DocumentStore,
    campaign_id: &str,
    invite_id: &str,
) -> AppResult<InviteView> {
    let invite: Invite = get_as(store, &paths::invite(campaign_id, invite_id)?)
        .await?
        .ok_or_else(|| AppError::not_found("invitation not found"))?;
    if invite.status != InviteStatus::Pending {
        return Err(AppError::stale_invite());
    }
    let campaign: Campaign = get_as(store, &paths::campaign(campaign_id)?)
        .await?
        .ok_or_else(|| AppError::not_found("campaign not found"))?;
    Ok(InviteView {
        invite,
        campaign_id: campaign.id,
        campaign_name: campaign.name,
    })
}

pub async fn accept_invite(
    store: &dyn DocumentStore,
    campaign_id: &str,
    invite_id: &str,
    actor: &str,
) -> AppResult<Invite> {
    resolve(store, campaign_id, invite_id, actor, Decision::Accept).await
}

pub async fn decline_invite(
    store: &dyn DocumentStore,
    campaign_id: &str,
    invite_id: &str,
    actor: &str,
) -> AppResult<Invite> {
    resolve(store, campaign_id, invite_id, actor, Decision::Decline).await
}

async fn resolve(
    store: &dyn DocumentStore,
    campaign_id: &str,
    invite_id: &str,
    actor: &str,
    decision: Decision,
) -> AppResult<Invite> {
    let invite_path = paths::invite(campaign_id, invite_id)?;
    let campaign_path = paths::campaign(campaign_id)?;

    {
        let invite_path = invite_path.clone();
        let actor = actor.to_string();
        store
            .run_transaction(Box::new(move |txn: &mut dyn Transaction| -> AppResult<()> {
                let invite: Invite = txn
                    .get(&invite_path)?
                    .ok_or_else(|| AppError::not_found("invitation not found"))?
                    .decode()?;
                let campaign: Campaign = txn
                    .get(&campaign_path)?
                    .ok_or_else(|| AppError::not_found("campaign not found"))?
                    .decode()?;

                let transition = apply_transition(&invite, &campaign, decision, &actor, Utc::now())?;
                if let Some(patch) = transition.campaign_patch {
                    txn.update(&campaign_path, patch);
                }
                txn.update(&invite_path, transition.invite_patch);
                Ok(())
            }))
            .await?;
    }

    info!(campaign_id, invite_id, actor, decision = ?decision, "invite resolved");

    get_as(store, &invite_path)
        .await?
        .ok_or_else(|| AppError::not_found("invitation not found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invite(role: ManagerRole, status: InviteStatus) -> Invite {
        Invite {
            id: "i1".into(),
            first_name: "Dana".into(),
            last_name: "Ruiz".into(),
            phone_number: "5550199".into(),
            role,
            status,
            created_at: Utc::now(),
            created_by: "u-owner".into(),
            accepted_at: None,
            accepted_by: None,
            declined_at: None,
            declined_by: None,
        }
    }

    fn campaign() -> Campaign {
        serde_json::from_value(json!({
            "id": "c1",
            "name": "Drive",
            "ownerId": "u-owner",
            "facilitatorIds": ["u-help"]
        }))
        .unwrap()
    }

    #[test]
    fn owner_accept_moves_previous_owner() {
        let transition = apply_transition(
            &invite(ManagerRole::Owner, InviteStatus::Pending),
            &campaign(),
            Decision::Accept,
            "u-new",
            Utc::now(),
        )
        .unwrap();
        let patch = transition.campaign_patch.unwrap();
        assert_eq!(patch["previousOwnerId"], json!("u-owner"));
        assert_eq!(patch["ownerId"], json!("u-new"));
        assert_eq!(transition.invite_patch["status"], json!("accepted"));
        assert_eq!(transition.invite_patch["acceptedBy"], json!("u-new"));
    }

    #[test]
    fn facilitator_accept_is_idempotent_append() {
        let new_member = apply_transition(
            &invite(ManagerRole::Facilitator, InviteStatus::Pending),
            &campaign(),
            Decision::Accept,
            "u-new",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(
            new_member.campaign_patch.unwrap()["facilitatorIds"],
            json!(["u-help", "u-new"])
        );

        let existing = apply_transition(
            &invite(ManagerRole::Facilitator, InviteStatus::Pending),
            &campaign(),
            Decision::Accept,
            "u-help",
            Utc::now(),
        )
        .unwrap();
        assert!(existing.campaign_patch.is_none());
    }

    #[test]
    fn decline_touches_only_the_invite() {
        let transition = apply_transition(
            &invite(ManagerRole::Owner, InviteStatus::Pending),
            &campaign(),
            Decision::Decline,
            "u-new",
            Utc::now(),
        )
        .unwrap();
        assert!(transition.campaign_patch.is_none());
        assert_eq!(transition.invite_patch["status"], json!("declined"));
        assert_eq!(transition.invite_patch["declinedBy"], json!("u-new"));
    }

    #[test]
    fn resolved_invites_are_stale() {
        for status in [InviteStatus::Accepted, InviteStatus::Declined] {
            let err = apply_transition(
                &invite(ManagerRole::Facilitator, status),
                &campaign(),
                Decision::Accept,
                "u-new",
                Utc::now(),
            )
            .unwrap_err();
            assert_eq!(err.code(), "stale_invite");
        }
    }

    #[test]
    fn inviter_name_falls_back_to_email() {
        assert_eq!(inviter_name(None, Some("coach.kim@example.com")), "coach.kim");
        assert_eq!(inviter_name(None, None), "Someone");
    }
}
