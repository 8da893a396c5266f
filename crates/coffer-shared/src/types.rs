use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::PACK_ID_HEX_LEN;
use crate::error::SharedError;

/// Which storage root a file lives under. Every disposition maps to its own
/// directory below the user data directory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Disposition {
    Attachment,
    AvatarData,
    Download,
    Draft,
    Temporary,
    Sticker,
}

impl Disposition {
    pub const ALL: [Disposition; 6] = [
        Disposition::Attachment,
        Disposition::AvatarData,
        Disposition::Download,
        Disposition::Draft,
        Disposition::Temporary,
        Disposition::Sticker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Attachment => "attachment",
            Disposition::AvatarData => "avatarData",
            Disposition::Download => "download",
            Disposition::Draft => "draft",
            Disposition::Temporary => "temporary",
            Disposition::Sticker => "sticker",
        }
    }

    /// Directory name below the user data directory.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Disposition::Attachment => "attachments.noindex",
            Disposition::AvatarData => "avatars.noindex",
            Disposition::Download => "downloads.noindex",
            Disposition::Draft => "drafts.noindex",
            Disposition::Temporary => "temp",
            Disposition::Sticker => "stickers.noindex",
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Disposition {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Disposition::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| SharedError::UnknownDisposition(s.to_string()))
    }
}

// Sticker pack id = 16 random bytes, hex encoded by the sender
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct PackId(String);

impl PackId {
    pub fn parse(s: &str) -> Result<Self, SharedError> {
        if s.len() == PACK_ID_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(SharedError::InvalidPackId(redact(s)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Log-safe form: only the last three characters survive.
    pub fn redacted(&self) -> String {
        redact(&self.0)
    }
}

fn redact(s: &str) -> String {
    let tail: String = s
        .chars()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("[REDACTED]{tail}")
}

impl std::fmt::Display for PackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PackId {
    type Error = SharedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PackId> for String {
    fn from(id: PackId) -> Self {
        id.0
    }
}
