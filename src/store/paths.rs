//! Where each kind of record lives in the document hierarchy.
//!
//! Every builder that takes an id is fallible: ids come from request paths
//! and must stay a single segment.

use super::{CollectionPath, DocPath, StoreResult};
use crate::models::MessageKind;

pub const CAMPAIGNS: &str = "campaigns";
pub const USER_PROFILES: &str = "userProfiles";

pub fn campaigns() -> CollectionPath {
    CollectionPath::root(CAMPAIGNS)
}

pub fn campaign(campaign_id: &str) -> StoreResult<DocPath> {
    campaigns().doc(campaign_id)
}

pub fn participants(campaign_id: &str) -> StoreResult<CollectionPath> {
    campaign(campaign_id)?.child("participants")
}

pub fn participant(campaign_id: &str, participant_id: &str) -> StoreResult<DocPath> {
    participants(campaign_id)?.doc(participant_id)
}

pub fn guardians(campaign_id: &str, participant_id: &str) -> StoreResult<CollectionPath> {
    participant(campaign_id, participant_id)?.child("guardians")
}

pub fn guardian(campaign_id: &str, participant_id: &str, guardian_id: &str) -> StoreResult<DocPath> {
    guardians(campaign_id, participant_id)?.doc(guardian_id)
}

pub fn donors(campaign_id: &str, participant_id: &str) -> StoreResult<CollectionPath> {
    participant(campaign_id, participant_id)?.child("donors")
}

pub fn donor(campaign_id: &str, participant_id: &str, donor_id: &str) -> StoreResult<DocPath> {
    donors(campaign_id, participant_id)?.doc(donor_id)
}

pub fn logs(campaign_id: &str, participant_id: &str) -> StoreResult<CollectionPath> {
    participant(campaign_id, participant_id)?.child("logs")
}

pub fn accesses(campaign_id: &str, participant_id: &str) -> StoreResult<CollectionPath> {
    participant(campaign_id, participant_id)?.child("accesses")
}

pub fn invites(campaign_id: &str) -> StoreResult<CollectionPath> {
    campaign(campaign_id)?.child("invites")
}

pub fn invite(campaign_id: &str, invite_id: &str) -> StoreResult<DocPath> {
    invites(campaign_id)?.doc(invite_id)
}

/// `campaigns/{c}/messageTemplates/{user}/{kind}/default`
pub fn message_template(
    campaign_id: &str,
    user_id: &str,
    kind: MessageKind,
) -> StoreResult<DocPath> {
    campaign(campaign_id)?
        .child("messageTemplates")?
        .doc(user_id)?
        .child(kind.as_str())?
        .doc("default")
}

pub fn user_profile(user_id: &str) -> StoreResult<DocPath> {
    CollectionPath::root(USER_PROFILES).doc(user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_path_nests_per_user_and_kind() {
        assert_eq!(
            message_template("c1", "u1", MessageKind::Donor).unwrap().as_str(),
            "campaigns/c1/messageTemplates/u1/donor/default"
        );
    }

    #[test]
    fn donor_history_sits_under_the_donor() {
        assert_eq!(
            donor("c1", "p1", "d1").unwrap().child("messages").unwrap().as_str(),
            "campaigns/c1/participants/p1/donors/d1/messages"
        );
    }

    #[test]
    fn slashed_participant_id_cannot_reach_a_guardian() {
        assert!(participant("c1", "p1/guardians/g1").is_err());
        assert!(guardians("c1", "p1/donors").is_err());
        assert!(user_profile("u1/../u2").is_err());
    }
}
