//! `attachment://` URLs handed to the UI instead of raw paths and keys.
//!
//! ```text
//! attachment://v1/<path>?disposition=..&contentType=..&size=..
//! attachment://v2/<path>?disposition=..&contentType=..&size=..&key=..
//! ```
//!
//! `v1` serves a legacy plaintext file, `v2` decrypts with `key` and trims the
//! result to `size`.

use coffer_shared::Disposition;
use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{Result, StoreError};
use crate::models::{AttachmentDescriptor, AttachmentStorage};

pub const SCHEME: &str = "attachment";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlVersion {
    V1,
    V2,
}

impl UrlVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlVersion::V1 => "v1",
            UrlVersion::V2 => "v2",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "v1" => Some(UrlVersion::V1),
            "v2" => Some(UrlVersion::V2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAttachmentUrl {
    pub version: UrlVersion,
    pub path: String,
    pub disposition: Disposition,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub key: Option<String>,
}

impl LocalAttachmentUrl {
    /// Bare URL for `path`; query parameters are filled in by [`Self::set_param`].
    pub fn new(version: UrlVersion, path: impl Into<String>) -> Self {
        Self {
            version,
            path: path.into(),
            disposition: Disposition::Attachment,
            content_type: None,
            size: None,
            key: None,
        }
    }

    /// URL for a locally saved descriptor; `None` if it has no file yet.
    pub fn for_descriptor(
        descriptor: &AttachmentDescriptor,
        disposition: Disposition,
    ) -> Option<Self> {
        let (version, path, key) = match &descriptor.storage {
            AttachmentStorage::LocalV1 { path } => (UrlVersion::V1, path, None),
            AttachmentStorage::LocalV2 {
                path, local_key, ..
            } => (UrlVersion::V2, path, Some(local_key.clone())),
            _ => return None,
        };
        Some(Self {
            disposition,
            content_type: (!descriptor.content_type.is_empty())
                .then(|| descriptor.content_type.clone()),
            size: Some(descriptor.size),
            key,
            ..Self::new(version, path.clone())
        })
    }

    /// Apply one query parameter. Unknown names are ignored and an
    /// unparsable size counts as absent.
    pub fn set_param(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "disposition" => self.disposition = value.parse()?,
            "contentType" => self.content_type = Some(value.to_string()),
            "size" => self.size = value.parse().ok(),
            "key" => self.key = Some(value.to_string()),
            _ => {}
        }
        Ok(())
    }

    pub fn to_url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!("{SCHEME}://{}/", self.version.as_str()))
            .map_err(|e| StoreError::InvalidPath(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidPath(self.path.clone()))?
            .pop_if_empty()
            .extend(self.path.split('/'));

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("disposition", self.disposition.as_str());
            if let Some(content_type) = &self.content_type {
                query.append_pair("contentType", content_type);
            }
            if let Some(size) = self.size {
                query.append_pair("size", &size.to_string());
            }
            if let Some(key) = &self.key {
                query.append_pair("key", key);
            }
        }
        Ok(url)
    }

    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || StoreError::InvalidPath(input.to_string());

        let url = Url::parse(input).map_err(|_| invalid())?;
        if url.scheme() != SCHEME {
            return Err(invalid());
        }
        let version = url
            .host_str()
            .and_then(UrlVersion::parse)
            .ok_or_else(invalid)?;
        let path = url
            .path_segments()
            .ok_or_else(invalid)?
            .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let mut parsed = Self::new(version, path);
        for (name, value) in url.query_pairs() {
            parsed.set_param(&name, &value)?;
        }
        Ok(parsed)
    }
}
