//! Picks how a message leaves the device and builds what the client needs to
//! hand it off: an `sms:` deep link on handsets, copy-paste instructions
//! everywhere else.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

/// Characters `encodeURIComponent` leaves alone.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

const PHONE_NUMBER: &AsciiSet = &URI_COMPONENT.remove(b'+');

const IOS_MARKERS: [&str; 3] = ["iPad", "iPhone", "iPod"];
const HANDSET_MARKERS: [&str; 8] = [
    "iphone",
    "ipad",
    "ipod",
    "android",
    "mobi",
    "windows phone",
    "blackberry",
    "opera mini",
];

/// What the requesting device can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Platform {
    pub is_ios: bool,
    pub is_mobile: bool,
}

impl Platform {
    pub fn from_user_agent(user_agent: &str) -> Self {
        let is_ios = IOS_MARKERS
            .iter()
            .any(|marker| user_agent.contains(marker));
        let lowered = user_agent.to_ascii_lowercase();
        let is_mobile = is_ios
            || HANDSET_MARKERS
                .iter()
                .any(|marker| lowered.contains(marker));
        Self { is_ios, is_mobile }
    }

    pub fn desktop() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    #[serde(rename = "ios-sms-deeplink")]
    IosSmsDeepLink,
    #[serde(rename = "generic-sms-deeplink")]
    GenericSmsDeepLink,
    #[serde(rename = "manual-clipboard")]
    ManualClipboard,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::IosSmsDeepLink => "ios-sms-deeplink",
            ChannelKind::GenericSmsDeepLink => "generic-sms-deeplink",
            ChannelKind::ManualClipboard => "manual-clipboard",
        }
    }

    pub fn is_deep_link(self) -> bool {
        !matches!(self, ChannelKind::ManualClipboard)
    }
}

pub fn resolve_channel(platform: Platform) -> ChannelKind {
    match (platform.is_mobile, platform.is_ios) {
        (true, true) => ChannelKind::IosSmsDeepLink,
        (true, false) => ChannelKind::GenericSmsDeepLink,
        (false, _) => ChannelKind::ManualClipboard,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel")]
pub enum ChannelPayload {
    #[serde(rename = "ios-sms-deeplink")]
    IosDeepLink { url: String },
    #[serde(rename = "generic-sms-deeplink")]
    GenericDeepLink { url: String },
    #[serde(rename = "manual-clipboard", rename_all = "camelCase")]
    Clipboard {
        message: String,
        phone_numbers: Vec<String>,
        instructions: Vec<String>,
    },
}

impl ChannelPayload {
    pub fn kind(&self) -> ChannelKind {
        match self {
            ChannelPayload::IosDeepLink { .. } => ChannelKind::IosSmsDeepLink,
            ChannelPayload::GenericDeepLink { .. } => ChannelKind::GenericSmsDeepLink,
            ChannelPayload::Clipboard { .. } => ChannelKind::ManualClipboard,
        }
    }

    pub fn deep_link(&self) -> Option<&str> {
        match self {
            ChannelPayload::IosDeepLink { url } | ChannelPayload::GenericDeepLink { url } => {
                Some(url)
            }
            ChannelPayload::Clipboard { .. } => None,
        }
    }
}

pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

fn address_list(phone_numbers: &[String]) -> String {
    phone_numbers
        .iter()
        .map(|number| utf8_percent_encode(number.trim(), PHONE_NUMBER).to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Builds the hand-off for `message` to one or more numbers. Several numbers
/// become a single group message.
pub fn build_payload(kind: ChannelKind, phone_numbers: &[String], message: &str) -> ChannelPayload {
    match kind {
        ChannelKind::IosSmsDeepLink => ChannelPayload::IosDeepLink {
            url: format!(
                "sms://open?addresses={}&body={}",
                address_list(phone_numbers),
                encode_component(message)
            ),
        },
        ChannelKind::GenericSmsDeepLink => ChannelPayload::GenericDeepLink {
            url: format!(
                "sms:{}?body={}",
                address_list(phone_numbers),
                encode_component(message)
            ),
        },
        ChannelKind::ManualClipboard => ChannelPayload::Clipboard {
            message: message.to_string(),
            phone_numbers: phone_numbers.to_vec(),
            instructions: manual_instructions(phone_numbers),
        },
    }
}

fn manual_instructions(phone_numbers: &[String]) -> Vec<String> {
    match phone_numbers {
        [single] => vec![
            "Open your messaging app".to_string(),
            format!("Create a new message to: {single}"),
            "Copy and paste this message:".to_string(),
        ],
        many => vec![
            "Open your phone's messaging app".to_string(),
            "Create a new group message".to_string(),
            format!("Add these phone numbers: {}", many.join(", ")),
            "Copy and paste this message:".to_string(),
        ],
    }
}
