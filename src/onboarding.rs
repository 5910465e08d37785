//! Guardian step of participant onboarding.
//!
//! A participant first asks their guardians for help building a donor list.
//! Saying they have messaged them, or skipping the step, bypasses it for good:
//! nothing ever clears either flag.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::AppResult;
use crate::models::Participant;
use crate::recipient::load_participant;
use crate::store::{paths, DocumentStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateState {
    NeedsGuardianStep,
    Bypassed,
}

impl GateState {
    pub fn of(participant: &Participant) -> Self {
        if participant.has_messaged_guardians || participant.has_skipped_guardians {
            GateState::Bypassed
        } else {
            GateState::NeedsGuardianStep
        }
    }

    pub fn is_bypassed(self) -> bool {
        self == GateState::Bypassed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bypass {
    Messaged,
    Skipped,
}

impl Bypass {
    fn field(self) -> &'static str {
        match self {
            Bypass::Messaged => "hasMessagedGuardians",
            Bypass::Skipped => "hasSkippedGuardians",
        }
    }
}

pub async fn mark_guardians_messaged(
    store: &dyn DocumentStore,
    campaign_id: &str,
    participant_id: &str,
) -> AppResult<GateState> {
    bypass(store, campaign_id, participant_id, Bypass::Messaged).await
}

pub async fn skip_guardians(
    store: &dyn DocumentStore,
    campaign_id: &str,
    participant_id: &str,
) -> AppResult<GateState> {
    bypass(store, campaign_id, participant_id, Bypass::Skipped).await
}

// Only ever sets one flag to true, so concurrent bypasses cannot undo each other.
async fn bypass(
    store: &dyn DocumentStore,
    campaign_id: &str,
    participant_id: &str,
    how: Bypass,
) -> AppResult<GateState> {
    let participant = load_participant(store, campaign_id, participant_id).await?;
    let mut patch = Map::new();
    patch.insert(how.field().to_string(), Value::Bool(true));
    store
        .update(&paths::participant(campaign_id, participant_id)?, patch)
        .await?;

    info!(
        campaign_id,
        participant_id,
        was = ?GateState::of(&participant),
        via = how.field(),
        "guardian step bypassed"
    );
    Ok(GateState::Bypassed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{get_as, MemoryStore};
    use serde_json::json;

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .set(
                &paths::participant("c1", "p1").unwrap(),
                json!({ "firstName": "Jo", "lastName": "Park", "campaignId": "c1" }),
            )
            .await
            .unwrap();
        store
    }

    async fn state(store: &MemoryStore) -> GateState {
        let participant: Participant = get_as(store, &paths::participant("c1", "p1").unwrap())
            .await
            .unwrap()
            .unwrap();
        GateState::of(&participant)
    }

    #[tokio::test]
    async fn starts_at_guardian_step() {
        let store = seeded().await;
        assert_eq!(state(&store).await, GateState::NeedsGuardianStep);
    }

    #[tokio::test]
    async fn either_path_bypasses_permanently() {
        let store = seeded().await;
        skip_guardians(&store, "c1", "p1").await.unwrap();
        assert_eq!(state(&store).await, GateState::Bypassed);

        mark_guardians_messaged(&store, "c1", "p1").await.unwrap();
        let raw = store.get(&paths::participant("c1", "p1").unwrap()).await.unwrap().unwrap();
        assert_eq!(raw.data["hasSkippedGuardians"], json!(true));
        assert_eq!(raw.data["hasMessagedGuardians"], json!(true));
        assert_eq!(state(&store).await, GateState::Bypassed);
    }

    #[tokio::test]
    async fn unknown_participant_is_not_found() {
        let store = MemoryStore::new();
        let err = skip_guardians(&store, "c1", "nope").await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
