//! Read side of the activity trail: message history per recipient and the
//! campaign-wide log report.

use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use serde::Serialize;

use crate::error::AppResult;
use crate::models::{AccessEntry, Campaign, LogEntry, MessageRecord, Participant};
use crate::store::{paths, query_as, CollectionPath, Direction, DocumentStore, Query};

/// Messages sent to one recipient, newest first.
pub async fn message_history(
    store: &dyn DocumentStore,
    history: &CollectionPath,
) -> AppResult<Vec<MessageRecord>> {
    Ok(query_as(
        store,
        history,
        &Query::new().order_by("sentAt", Direction::Descending),
    )
    .await?)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantActivity {
    pub participant_id: String,
    pub participant_name: String,
    pub logs: Vec<LogEntry>,
    pub accesses: Vec<AccessEntry>,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignLogReport {
    pub campaign_id: String,
    pub participants: Vec<ParticipantActivity>,
}

/// Every participant's logs and page accesses. Participants with the most
/// recent activity come first; those with none sort last by name.
pub async fn campaign_log_report(
    store: &dyn DocumentStore,
    campaign: &Campaign,
) -> AppResult<CampaignLogReport> {
    let participants: Vec<Participant> =
        query_as(store, &paths::participants(&campaign.id)?, &Query::new()).await?;

    let mut activity = try_join_all(
        participants
            .iter()
            .map(|participant| participant_activity(store, &campaign.id, participant)),
    )
    .await?;
    activity.sort_by(|a, b| {
        b.last_activity
            .cmp(&a.last_activity)
            .then_with(|| a.participant_name.cmp(&b.participant_name))
    });

    Ok(CampaignLogReport {
        campaign_id: campaign.id.clone(),
        participants: activity,
    })
}

async fn participant_activity(
    store: &dyn DocumentStore,
    campaign_id: &str,
    participant: &Participant,
) -> AppResult<ParticipantActivity> {
    let newest_first = Query::new().order_by("timestamp", Direction::Descending);
    let logs: Vec<LogEntry> =
        query_as(store, &paths::logs(campaign_id, &participant.id)?, &newest_first).await?;
    let accesses: Vec<AccessEntry> =
        query_as(store, &paths::accesses(campaign_id, &participant.id)?, &newest_first).await?;

    let last_activity = logs
        .first()
        .map(|log| log.timestamp)
        .max(accesses.first().map(|access| access.timestamp));
    Ok(ParticipantActivity {
        participant_id: participant.id.clone(),
        participant_name: participant.full_name(),
        logs,
        accesses,
        last_activity,
    })
}
