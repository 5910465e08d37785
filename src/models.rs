use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Target used when a campaign has none recorded.
pub const DEFAULT_TARGET_DONOR_COUNT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerRole {
    Owner,
    Facilitator,
}

impl ManagerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ManagerRole::Owner => "owner",
            ManagerRole::Facilitator => "facilitator",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedBy {
    pub id: String,
    pub role: ManagerRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorMessage {
    pub id: String,
    pub order: u32,
    pub content: String,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub organization_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub facilitator_ids: Vec<String>,
    #[serde(default)]
    pub owner_title: String,
    #[serde(default)]
    pub template_message_to_guardians: String,
    #[serde(default)]
    pub target_donor_count: u32,
    #[serde(default)]
    pub donation_url: String,
    #[serde(default)]
    pub donor_messages: Vec<DonorMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<CreatedBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id.as_deref() == Some(user_id)
    }

    pub fn is_facilitator(&self, user_id: &str) -> bool {
        self.facilitator_ids.iter().any(|id| id == user_id)
    }

    pub fn is_manager(&self, user_id: &str) -> bool {
        self.role_of(user_id).is_some()
    }

    /// Ownership wins when a user somehow holds both roles.
    pub fn role_of(&self, user_id: &str) -> Option<ManagerRole> {
        if self.is_owner(user_id) {
            Some(ManagerRole::Owner)
        } else if self.is_facilitator(user_id) {
            Some(ManagerRole::Facilitator)
        } else {
            None
        }
    }

    pub fn active_donor_message(&self) -> Option<&DonorMessage> {
        self.donor_messages.iter().find(|message| message.is_active)
    }

    pub fn donor_message(&self, message_id: &str) -> Option<&DonorMessage> {
        self.donor_messages
            .iter()
            .find(|message| message.id == message_id)
    }

    pub fn effective_target_donor_count(&self) -> u32 {
        if self.target_donor_count == 0 {
            DEFAULT_TARGET_DONOR_COUNT
        } else {
            self.target_donor_count
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(default)]
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub campaign_id: String,
    #[serde(default)]
    pub has_messaged_guardians: bool,
    #[serde(default)]
    pub has_skipped_guardians: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Participant {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guardian {
    #[serde(default)]
    pub id: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub phone_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatus {
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Donor {
    #[serde(default)]
    pub id: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub phone_number: String,
    #[serde(default)]
    pub message_statuses: BTreeMap<String, MessageStatus>,
}

impl Donor {
    pub fn sent_count(&self) -> usize {
        self.message_statuses
            .values()
            .filter(|status| status.sent)
            .count()
    }
}

/// One entry in a recipient's message history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(default)]
    pub id: String,
    pub message: String,
    pub sent_at: DateTime<Utc>,
    pub sent_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    Participant,
    Guardian,
    Other,
    Organizer,
}

/// Who performed a logged action, as they identified themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    #[serde(rename = "type")]
    pub kind: ActorKind,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl Actor {
    pub fn new(kind: ActorKind, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            kind,
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    pub fn participant(participant: &Participant) -> Self {
        Self::new(
            ActorKind::Participant,
            participant.first_name.clone(),
            participant.last_name.clone(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    AddDonor,
    AddGuardian,
    SendMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(default)]
    pub id: String,
    pub action: LogAction,
    pub timestamp: DateTime<Utc>,
    pub added_by: Actor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub donor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessEntry {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActorKind,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Declined,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    #[serde(default)]
    pub id: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub phone_number: String,
    pub role: ManagerRole,
    pub status: InviteStatus,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declined_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declined_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Guardian,
    Donor,
    Participant,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Guardian => "guardian",
            MessageKind::Donor => "donor",
            MessageKind::Participant => "participant",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "guardian" => Ok(MessageKind::Guardian),
            "donor" => Ok(MessageKind::Donor),
            "participant" => Ok(MessageKind::Participant),
            other => Err(format!("unknown message kind `{other}`")),
        }
    }
}

/// A user's saved outreach template for one message kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTemplate {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}
