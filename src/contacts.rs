//! Participants, guardians and donors: adding, importing and editing them,
//! plus the activity log written alongside.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{
    AccessEntry, Actor, Campaign, Donor, Guardian, LogAction, LogEntry, Participant,
};
use crate::recipient::load_participant;
use crate::store::{paths, query_as, to_body, DocumentStore, Query, WriteBatch};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub phone_number: String,
}

impl NewContact {
    fn trimmed(self) -> Self {
        Self {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            phone_number: self.phone_number.trim().to_string(),
        }
    }

    fn require_first_and_phone(&self) -> AppResult<()> {
        if self.first_name.is_empty() || self.phone_number.is_empty() {
            return Err(AppError::bad_request(
                "firstName and phoneNumber are required",
            ));
        }
        Ok(())
    }
}

fn log_entry(action: LogAction, actor: &Actor, donor_id: Option<String>, now: DateTime<Utc>) -> LogEntry {
    LogEntry {
        id: String::new(),
        action,
        timestamp: now,
        added_by: actor.clone(),
        donor_id,
        recipient_id: None,
    }
}

fn stage_log(
    batch: &mut WriteBatch,
    campaign_id: &str,
    participant_id: &str,
    entry: &LogEntry,
) -> AppResult<()> {
    batch.set(paths::logs(campaign_id, participant_id)?.new_doc(), to_body(entry)?);
    Ok(())
}

fn participant_record(campaign_id: &str, contact: NewContact, now: DateTime<Utc>) -> Participant {
    Participant {
        id: String::new(),
        first_name: contact.first_name,
        last_name: contact.last_name,
        phone_number: contact.phone_number,
        campaign_id: campaign_id.to_string(),
        has_messaged_guardians: false,
        has_skipped_guardians: false,
        created_at: Some(now),
    }
}

pub async fn add_participant(
    store: &dyn DocumentStore,
    campaign_id: &str,
    contact: NewContact,
) -> AppResult<Participant> {
    let contact = contact.trimmed();
    if contact.first_name.is_empty() || contact.last_name.is_empty() || contact.phone_number.is_empty() {
        return Err(AppError::bad_request(
            "firstName, lastName and phoneNumber are required",
        ));
    }
    let path = paths::participants(campaign_id)?.new_doc();
    let mut participant = participant_record(campaign_id, contact, Utc::now());
    store.set(&path, to_body(&participant)?).await?;
    participant.id = path.id().to_string();
    Ok(participant)
}

/// Parses tab-separated `first, last, phone` rows. Blank lines and rows
/// missing any of the three cells are dropped; extra cells are ignored.
pub fn parse_participant_rows(tsv: &str) -> Vec<NewContact> {
    tsv.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let mut cells = line.split('\t').map(str::trim);
            let first_name = cells.next().unwrap_or_default();
            let last_name = cells.next().unwrap_or_default();
            let phone_number = cells.next().unwrap_or_default();
            if first_name.is_empty() || last_name.is_empty() || phone_number.is_empty() {
                return None;
            }
            Some(NewContact {
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                phone_number: phone_number.to_string(),
            })
        })
        .collect()
}

/// Imports every complete row in one batch.
pub async fn import_participants(
    store: &dyn DocumentStore,
    campaign_id: &str,
    tsv: &str,
) -> AppResult<Vec<Participant>> {
    let rows = parse_participant_rows(tsv);
    if rows.is_empty() {
        return Err(AppError::bad_request("no complete participant rows to import"));
    }

    let now = Utc::now();
    let mut batch = WriteBatch::new();
    let mut imported = Vec::with_capacity(rows.len());
    for row in rows {
        let path = paths::participants(campaign_id)?.new_doc();
        let mut participant = participant_record(campaign_id, row, now);
        batch.set(path.clone(), to_body(&participant)?);
        participant.id = path.id().to_string();
        imported.push(participant);
    }
    store.commit(batch).await?;

    info!(campaign_id, count = imported.len(), "participants imported");
    Ok(imported)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

pub async fn edit_participant(
    store: &dyn DocumentStore,
    campaign_id: &str,
    participant_id: &str,
    patch: ParticipantPatch,
) -> AppResult<Participant> {
    load_participant(store, campaign_id, participant_id).await?;

    let mut fields = Map::new();
    let edits = [
        ("firstName", patch.first_name),
        ("lastName", patch.last_name),
        ("phoneNumber", patch.phone_number),
    ];
    for (key, value) in edits {
        if let Some(value) = value {
            let value = value.trim().to_string();
            if value.is_empty() {
                return Err(AppError::bad_request(format!("{key} must not be empty")));
            }
            fields.insert(key.to_string(), Value::String(value));
        }
    }
    if !fields.is_empty() {
        store
            .update(&paths::participant(campaign_id, participant_id)?, fields)
            .await?;
    }
    load_participant(store, campaign_id, participant_id).await
}

pub async fn delete_participant(
    store: &dyn DocumentStore,
    campaign_id: &str,
    participant_id: &str,
) -> AppResult<()> {
    load_participant(store, campaign_id, participant_id).await?;
    store
        .delete(&paths::participant(campaign_id, participant_id)?)
        .await?;
    info!(campaign_id, participant_id, "participant deleted");
    Ok(())
}

pub async fn list_participants(
    store: &dyn DocumentStore,
    campaign_id: &str,
) -> AppResult<Vec<Participant>> {
    let mut participants: Vec<Participant> =
        query_as(store, &paths::participants(campaign_id)?, &Query::new()).await?;
    participants.sort_by(|a, b| {
        (a.last_name.as_str(), a.first_name.as_str()).cmp(&(b.last_name.as_str(), b.first_name.as_str()))
    });
    Ok(participants)
}

pub async fn list_guardians(
    store: &dyn DocumentStore,
    campaign_id: &str,
    participant_id: &str,
) -> AppResult<Vec<Guardian>> {
    Ok(query_as(store, &paths::guardians(campaign_id, participant_id)?, &Query::new()).await?)
}

pub async fn list_donors(
    store: &dyn DocumentStore,
    campaign_id: &str,
    participant_id: &str,
) -> AppResult<Vec<Donor>> {
    Ok(query_as(store, &paths::donors(campaign_id, participant_id)?, &Query::new()).await?)
}

pub async fn add_guardian(
    store: &dyn DocumentStore,
    campaign_id: &str,
    participant_id: &str,
    contact: NewContact,
    actor: &Actor,
) -> AppResult<Guardian> {
    let contact = contact.trimmed();
    contact.require_first_and_phone()?;
    load_participant(store, campaign_id, participant_id).await?;

    let path = paths::guardians(campaign_id, participant_id)?.new_doc();
    let guardian = Guardian {
        id: path.id().to_string(),
        first_name: contact.first_name,
        last_name: contact.last_name,
        phone_number: contact.phone_number,
    };
    let mut body = to_body(&guardian)?;
    if let Value::Object(fields) = &mut body {
        fields.insert("createdAt".into(), Value::String(Utc::now().to_rfc3339()));
    }

    let mut batch = WriteBatch::new();
    batch.set(path, body);
    stage_log(
        &mut batch,
        campaign_id,
        participant_id,
        &log_entry(LogAction::AddGuardian, actor, None, Utc::now()),
    )?;
    store.commit(batch).await?;
    Ok(guardian)
}

fn donor_record(id: &str, contact: NewContact) -> Donor {
    Donor {
        id: id.to_string(),
        first_name: contact.first_name,
        last_name: contact.last_name,
        phone_number: contact.phone_number,
        message_statuses: Default::default(),
    }
}

fn stage_donor(
    batch: &mut WriteBatch,
    campaign_id: &str,
    participant_id: &str,
    contact: NewContact,
    actor: &Actor,
    now: DateTime<Utc>,
) -> AppResult<Donor> {
    let path = paths::donors(campaign_id, participant_id)?.new_doc();
    let donor = donor_record(path.id(), contact);
    let mut body = to_body(&donor)?;
    if let Value::Object(fields) = &mut body {
        fields.insert("createdAt".into(), Value::String(now.to_rfc3339()));
    }
    batch.set(path, body);
    stage_log(
        batch,
        campaign_id,
        participant_id,
        &log_entry(LogAction::AddDonor, actor, Some(donor.id.clone()), now),
    )?;
    Ok(donor)
}

pub async fn add_donor(
    store: &dyn DocumentStore,
    campaign_id: &str,
    participant_id: &str,
    contact: NewContact,
    actor: &Actor,
) -> AppResult<Donor> {
    let contact = contact.trimmed();
    contact.require_first_and_phone()?;
    load_participant(store, campaign_id, participant_id).await?;

    let mut batch = WriteBatch::new();
    let donor = stage_donor(&mut batch, campaign_id, participant_id, contact, actor, Utc::now())?;
    store.commit(batch).await?;
    Ok(donor)
}

/// A contact picked from the device's address book.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickedContact {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone_number: String,
}

/// Splits an address-book display name into `(first, last)`.
///
/// `"Last, First"` is always honored. Otherwise the first word is the first
/// name when `first_name_first` is set, and the last name when it is not.
pub fn parse_contact_name(name: &str, first_name_first: bool) -> (String, String) {
    let name = name.trim();
    if name.is_empty() {
        return (String::new(), String::new());
    }
    if let Some((last, first)) = name.split_once(',') {
        let (last, first) = (last.trim(), first.trim());
        if first.is_empty() {
            return (last.to_string(), String::new());
        }
        return (first.to_string(), last.to_string());
    }
    let words: Vec<&str> = name.split_whitespace().collect();
    if words.len() == 1 {
        return (words[0].to_string(), String::new());
    }
    let head = words[0].to_string();
    let rest = words[1..].join(" ");
    if first_name_first {
        (head, rest)
    } else {
        (rest, head)
    }
}

fn digits_only(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

/// Adds every picked contact that has both a name and a phone number, in one
/// batch with one `add_donor` log entry each.
pub async fn import_donors(
    store: &dyn DocumentStore,
    campaign_id: &str,
    participant_id: &str,
    contacts: Vec<PickedContact>,
    first_name_first: bool,
    actor: &Actor,
) -> AppResult<Vec<Donor>> {
    load_participant(store, campaign_id, participant_id).await?;

    let now = Utc::now();
    let mut batch = WriteBatch::new();
    let mut donors = Vec::new();
    let mut skipped = 0usize;
    for picked in contacts {
        let phone_number = digits_only(&picked.phone_number);
        let (first_name, last_name) = parse_contact_name(&picked.name, first_name_first);
        if first_name.is_empty() || phone_number.is_empty() {
            skipped += 1;
            continue;
        }
        let contact = NewContact {
            first_name,
            last_name,
            phone_number,
        };
        donors.push(stage_donor(
            &mut batch,
            campaign_id,
            participant_id,
            contact,
            actor,
            now,
        )?);
    }
    if skipped > 0 {
        warn!(campaign_id, participant_id, skipped, "skipped contacts without name or phone");
    }
    if donors.is_empty() {
        return Err(AppError::bad_request("no contacts with a name and phone number"));
    }
    store.commit(batch).await?;
    info!(campaign_id, participant_id, count = donors.len(), "donors imported");
    Ok(donors)
}

/// Records who opened a participant's shareable page.
pub async fn record_access(
    store: &dyn DocumentStore,
    campaign_id: &str,
    participant_id: &str,
    identity: &Actor,
) -> AppResult<AccessEntry> {
    load_participant(store, campaign_id, participant_id).await?;
    let mut entry = AccessEntry {
        id: String::new(),
        kind: identity.kind,
        first_name: identity.first_name.trim().to_string(),
        last_name: identity.last_name.trim().to_string(),
        timestamp: Utc::now(),
    };
    let path = store
        .add(&paths::accesses(campaign_id, participant_id)?, to_body(&entry)?)
        .await?;
    entry.id = path.id().to_string();
    Ok(entry)
}

/// Finds a participant by id alone, as shareable links carry no campaign.
pub async fn find_participant(
    store: &dyn DocumentStore,
    participant_id: &str,
) -> AppResult<(Campaign, Participant)> {
    let campaigns: Vec<Campaign> = query_as(store, &paths::campaigns(), &Query::new()).await?;
    for campaign in campaigns {
        let path = paths::participant(&campaign.id, participant_id)
            .map_err(|_| AppError::not_found("participant not found"))?;
        let found: Option<Participant> = crate::store::get_as(store, &path).await?;
        if let Some(participant) = found {
            return Ok((campaign, participant));
        }
    }
    Err(AppError::not_found("participant not found"))
}
