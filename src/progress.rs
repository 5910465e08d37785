use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tracing::warn;

use crate::error::AppResult;
use crate::models::{Campaign, Donor, Participant};
use crate::onboarding::GateState;
use crate::store::{paths, query_as, Direction, DocumentStore, Query};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantProgress {
    pub participant_id: String,
    pub first_name: String,
    pub last_name: String,
    pub guardian_count: usize,
    pub donor_count: usize,
    pub messages_sent: usize,
    pub total_message_count: usize,
    pub last_activity: Option<DateTime<Utc>>,
    pub onboarding: GateState,
    /// Set when this participant's records could not be read; the counts are
    /// then zero rather than real.
    pub load_failed: bool,
}

impl ParticipantProgress {
    fn empty(participant: &Participant) -> Self {
        Self {
            participant_id: participant.id.clone(),
            first_name: participant.first_name.clone(),
            last_name: participant.last_name.clone(),
            guardian_count: 0,
            donor_count: 0,
            messages_sent: 0,
            total_message_count: 0,
            last_activity: None,
            onboarding: GateState::of(participant),
            load_failed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignProgress {
    pub campaign_id: String,
    pub target_donor_count: u32,
    pub participant_count: usize,
    pub total_donors: usize,
    pub overall_percent: u32,
    pub per_participant: Vec<ParticipantProgress>,
}

/// `round(100 * donors / (participants * target))`, or 0 with no participants.
pub fn overall_percent(total_donors: usize, participant_count: usize, target: u32) -> u32 {
    let goal = participant_count as f64 * f64::from(target);
    if goal <= 0.0 {
        return 0;
    }
    (100.0 * total_donors as f64 / goal).round() as u32
}

/// Rolls up donor collection and messaging progress for every participant.
/// Participants are read concurrently; one participant failing to load does
/// not affect the others.
pub async fn compute_progress(
    store: &dyn DocumentStore,
    campaign: &Campaign,
) -> AppResult<CampaignProgress> {
    let participants: Vec<Participant> =
        query_as(store, &paths::participants(&campaign.id)?, &Query::new()).await?;

    let per_participant: Vec<ParticipantProgress> = join_all(
        participants
            .iter()
            .map(|participant| participant_progress(store, &campaign.id, participant)),
    )
    .await;

    let target = campaign.effective_target_donor_count();
    let total_donors = per_participant.iter().map(|p| p.donor_count).sum();
    Ok(CampaignProgress {
        campaign_id: campaign.id.clone(),
        target_donor_count: target,
        participant_count: per_participant.len(),
        total_donors,
        overall_percent: overall_percent(total_donors, per_participant.len(), target),
        per_participant,
    })
}

async fn participant_progress(
    store: &dyn DocumentStore,
    campaign_id: &str,
    participant: &Participant,
) -> ParticipantProgress {
    match load_counts(store, campaign_id, participant).await {
        Ok(progress) => progress,
        Err(err) => {
            warn!(
                campaign_id,
                participant_id = %participant.id,
                error = %err,
                "failed to load participant progress"
            );
            ParticipantProgress {
                load_failed: true,
                ..ParticipantProgress::empty(participant)
            }
        }
    }
}

async fn load_counts(
    store: &dyn DocumentStore,
    campaign_id: &str,
    participant: &Participant,
) -> AppResult<ParticipantProgress> {
    let guardians = store
        .query(&paths::guardians(campaign_id, &participant.id)?, &Query::new())
        .await?;
    let donors: Vec<Donor> = query_as(
        store,
        &paths::donors(campaign_id, &participant.id)?,
        &Query::new(),
    )
    .await?;
    let latest_log = store
        .query(
            &paths::logs(campaign_id, &participant.id)?,
            &Query::new()
                .order_by("timestamp", Direction::Descending)
                .limit(1),
        )
        .await?;

    let last_activity = latest_log
        .first()
        .and_then(|log| log.data.get("timestamp"))
        .and_then(|value| value.as_str())
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|stamp| stamp.with_timezone(&Utc));

    Ok(ParticipantProgress {
        guardian_count: guardians.len(),
        donor_count: donors.len(),
        messages_sent: donors.iter().map(Donor::sent_count).sum(),
        total_message_count: donors.iter().map(|d| d.message_statuses.len()).sum(),
        last_activity,
        ..ParticipantProgress::empty(participant)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_and_handles_empty_campaigns() {
        assert_eq!(overall_percent(5, 2, 10), 25);
        assert_eq!(overall_percent(1, 3, 10), 3);
        assert_eq!(overall_percent(0, 0, 10), 0);
        assert_eq!(overall_percent(25, 2, 10), 125);
    }
}
