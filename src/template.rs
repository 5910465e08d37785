//! Placeholder substitution for outreach messages.
//!
//! Templates reference variables as `{name}`. Rendering is a single
//! left-to-right pass: substituted values are never scanned again, so a value
//! that happens to contain `{...}` cannot trigger further expansion.
//! Placeholders without a value are left exactly as written.

use std::collections::BTreeMap;

use crate::models::{Campaign, ManagerRole, MessageKind};

pub mod placeholder {
    pub const GUARDIAN_FIRST_NAME: &str = "guardianFirstName";
    pub const DONOR_FIRST_NAME: &str = "donorFirstName";
    pub const DONOR_LAST_NAME: &str = "donorLastName";
    pub const PARTICIPANT_FIRST_NAME: &str = "participantFirstName";
    pub const PARTICIPANT_LAST_NAME: &str = "participantLastName";
    pub const PARTICIPANT_NAME: &str = "participantName";
    pub const PARTICIPANT_URL: &str = "participantUrl";
    pub const ORGANIZATION_NAME: &str = "organizationName";
    pub const OWNER_TITLE: &str = "ownerTitle";
    pub const TARGET_DONOR_COUNT: &str = "targetDonorCount";
    pub const DONATION_URL: &str = "donationUrl";
    pub const USER_FIRST_NAME: &str = "userFirstName";
    pub const USER_LAST_NAME: &str = "userLastName";
}

use placeholder::*;

/// Variable bag handed to [`render`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    values: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_string(), value.into());
    }

    /// Inserts only when the value is non-empty.
    pub fn insert_present(&mut self, name: &str, value: &str) {
        if !value.is_empty() {
            self.insert(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Campaign-scoped values shared by every message kind.
    pub fn for_campaign(campaign: &Campaign) -> Self {
        Self::new()
            .with(ORGANIZATION_NAME, campaign.organization_name.clone())
            .with(OWNER_TITLE, campaign.owner_title.clone())
            .with(
                TARGET_DONOR_COUNT,
                campaign.effective_target_donor_count().to_string(),
            )
            .with(DONATION_URL, campaign.donation_url.clone())
    }
}

pub fn render(template: &str, vars: &TemplateVars) -> String {
    substitute(template, |name| vars.get(name))
}

/// Like [`render`], but consults `defaults` for names missing from `vars`.
pub fn render_with_defaults(template: &str, vars: &TemplateVars, defaults: &TemplateVars) -> String {
    substitute(template, |name| vars.get(name).or_else(|| defaults.get(name)))
}

fn substitute<'a, F>(template: &str, resolve: F) -> String
where
    F: Fn(&str) -> Option<&'a str>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let resolved = after.find('}').and_then(|close| {
            let name = &after[..close];
            if name.is_empty() || name.contains('{') {
                return None;
            }
            resolve(name).map(|value| (value, close))
        });
        match resolved {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Every placeholder name in `template`, in order of first appearance.
pub fn placeholders_in(template: &str) -> Vec<&str> {
    let mut found: Vec<&str> = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if close > 0 && !after[..close].contains('{') => {
                let name = &after[..close];
                if !found.contains(&name) {
                    found.push(name);
                }
                rest = &after[close + 1..];
            }
            _ => rest = after,
        }
    }
    found
}

/// Placeholders in `template` that messages of `kind` never fill. They would
/// reach the recipient verbatim.
pub fn unknown_placeholders(template: &str, kind: MessageKind) -> Vec<String> {
    let known = kind.placeholders();
    placeholders_in(template)
        .into_iter()
        .filter(|name| !known.contains(name))
        .map(str::to_string)
        .collect()
}

impl MessageKind {
    /// Placeholders documented for templates of this kind.
    pub fn placeholders(self) -> &'static [&'static str] {
        match self {
            MessageKind::Guardian => &[
                GUARDIAN_FIRST_NAME,
                PARTICIPANT_FIRST_NAME,
                PARTICIPANT_LAST_NAME,
                ORGANIZATION_NAME,
                OWNER_TITLE,
                TARGET_DONOR_COUNT,
                USER_FIRST_NAME,
                USER_LAST_NAME,
            ],
            MessageKind::Donor => &[
                DONOR_FIRST_NAME,
                DONOR_LAST_NAME,
                PARTICIPANT_FIRST_NAME,
                PARTICIPANT_LAST_NAME,
                PARTICIPANT_NAME,
                ORGANIZATION_NAME,
                OWNER_TITLE,
                DONATION_URL,
                USER_FIRST_NAME,
                USER_LAST_NAME,
            ],
            MessageKind::Participant => &[
                PARTICIPANT_FIRST_NAME,
                PARTICIPANT_LAST_NAME,
                PARTICIPANT_URL,
                ORGANIZATION_NAME,
                OWNER_TITLE,
                USER_FIRST_NAME,
                USER_LAST_NAME,
            ],
        }
    }
}

const SAMPLE_PARTICIPANTS: [(&str, &str); 4] = [
    ("Emily", "Johnson"),
    ("Michael", "Chen"),
    ("Sofia", "Garcia"),
    ("James", "Williams"),
];

const SAMPLE_DONORS: [(&str, &str); 4] = [
    ("Robert", "Smith"),
    ("Maria", "Rodriguez"),
    ("David", "Kim"),
    ("Sarah", "Brown"),
];

fn bracket_defaults() -> TemplateVars {
    TemplateVars::new()
        .with(ORGANIZATION_NAME, "[Organization Name]")
        .with(OWNER_TITLE, "[Owner Title]")
        .with(DONATION_URL, "[Donation URL]")
        .with(TARGET_DONOR_COUNT, "[Target Donor Count]")
        .with(GUARDIAN_FIRST_NAME, "[Guardian First Name]")
        .with(USER_FIRST_NAME, "[Your First Name]")
        .with(USER_LAST_NAME, "[Your Last Name]")
        .with(PARTICIPANT_URL, "[Participant Link]")
}

/// Campaign fields shown in a preview. Usually the stored campaign, but a
/// draft form may preview values it has not saved yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewContext {
    pub organization_name: String,
    pub owner_title: String,
    pub target_donor_count: u32,
    pub donation_url: String,
}

impl PreviewContext {
    pub fn from_campaign(campaign: &Campaign) -> Self {
        Self {
            organization_name: campaign.organization_name.clone(),
            owner_title: campaign.owner_title.clone(),
            target_donor_count: campaign.effective_target_donor_count(),
            donation_url: campaign.donation_url.clone(),
        }
    }
}

/// Renders a template for display to its author. Blank campaign fields fall
/// back to bracketed labels and recipients get sample names, so the result
/// never shows a raw documented placeholder.
pub fn preview(template: &str, context: &PreviewContext, sample: usize) -> String {
    let (participant_first, participant_last) = SAMPLE_PARTICIPANTS[sample % SAMPLE_PARTICIPANTS.len()];
    let (donor_first, donor_last) = SAMPLE_DONORS[sample % SAMPLE_DONORS.len()];

    let mut vars = TemplateVars::new()
        .with(PARTICIPANT_FIRST_NAME, participant_first)
        .with(PARTICIPANT_LAST_NAME, participant_last)
        .with(
            PARTICIPANT_NAME,
            format!("{participant_first} {participant_last}"),
        )
        .with(DONOR_FIRST_NAME, donor_first)
        .with(DONOR_LAST_NAME, donor_last);
    vars.insert_present(ORGANIZATION_NAME, &context.organization_name);
    vars.insert_present(OWNER_TITLE, &context.owner_title);
    vars.insert_present(DONATION_URL, &context.donation_url);
    if context.target_donor_count > 0 {
        vars.insert(TARGET_DONOR_COUNT, context.target_donor_count.to_string());
    }

    render_with_defaults(template, &vars, &bracket_defaults())
}

pub fn default_guardian_campaign_message() -> &'static str {
    "Hi, {ownerTitle} has asked us to get {targetDonorCount} potential donors for the {organizationName} fundraiser. Can you help me make a list of family members or friends who might want to donate?"
}

pub fn default_initial_donor_message() -> &'static str {
    "Hi {donorFirstName}, this is {participantFirstName} {participantLastName} and I'm participating in the {organizationName} fundraiser. Would you consider making a donation to support our program? You can learn more and donate here:\n\n{donationUrl}"
}

pub fn default_follow_up_donor_message() -> &'static str {
    "Hi {donorFirstName}, this is {participantFirstName} {participantLastName} and I'm following up about the {organizationName} fundraiser. I noticed you haven't had a chance to donate yet. Any amount would help us reach our goal. Here's the link again:\n\n{donationUrl}"
}

/// Outreach template used until a manager saves their own for `kind`.
pub fn default_outreach_template(kind: MessageKind, role: ManagerRole) -> &'static str {
    match (kind, role) {
        (MessageKind::Guardian, ManagerRole::Owner) => {
            "Hi {guardianFirstName} this is {ownerTitle} and I am running a donation campaign for the {organizationName} and would like you to help {participantFirstName} enter a list of potential donors. Please click the link below to help. Thanks!"
        }
        (MessageKind::Guardian, ManagerRole::Facilitator) => {
            "Hi {guardianFirstName}, this is {userFirstName} {userLastName} and I am helping {ownerTitle} with their {organizationName} donation campaign. We would like you to help {participantFirstName} enter a list of potential donors. Please click the link below to help. Thanks!"
        }
        (MessageKind::Donor, ManagerRole::Owner) => {
            "Hi {donorFirstName}, this is {ownerTitle} and I am running a donation campaign for the {organizationName} and would like you to consider donating on behalf of {participantFirstName} {participantLastName}. Please click the link below to learn more and make a donation. Thanks!"
        }
        (MessageKind::Donor, ManagerRole::Facilitator) => {
            "Hi {donorFirstName}, this is {userFirstName} {userLastName} and I am helping {ownerTitle} with the {organizationName} donation campaign. We would like you to consider donating on behalf of {participantFirstName} {participantLastName}. Please click the link below to learn more and make a donation. Thanks!"
        }
        (MessageKind::Participant, ManagerRole::Owner) => {
            "Hi {participantFirstName}, this is {ownerTitle}. Please help us with the {organizationName} fundraiser by adding potential donors to your list. You can also invite your parents/guardians to help create the list. Click the link below to get started:\n\n{participantUrl}"
        }
        (MessageKind::Participant, ManagerRole::Facilitator) => {
            "Hi {participantFirstName}, this is {userFirstName} {userLastName} helping {ownerTitle} with the {organizationName} fundraiser. Please help us by adding potential donors to your list. You can also invite your parents/guardians to help create the list. Click the link below to get started:\n\n{participantUrl}"
        }
    }
}
