//! [`RemoteSource`] over HTTPS.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use coffer_shared::PackId;
use tracing::debug;
use url::Url;

use crate::error::{NetError, Result};
use crate::remote::RemoteSource;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// CDN layout:
///
/// ```text
/// {base}/attachments/{cdn_key}
/// {base}/stickers/{pack_id}/manifest
/// {base}/stickers/{pack_id}/full/{sticker_id}
/// ```
pub struct HttpRemoteSource {
    client: reqwest::Client,
    base_url: Url,
    online: AtomicBool,
}

impl HttpRemoteSource {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(NetError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url,
            online: AtomicBool::new(true),
        })
    }

    /// Connectivity as reported by the host.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// The key is one path segment; `/` inside it is escaped.
    pub fn attachment_url(&self, cdn_key: &str) -> Result<Url> {
        if cdn_key.is_empty() || cdn_key == "." || cdn_key == ".." {
            return Err(NetError::InvalidCdnKey);
        }
        Ok(self.url_with(&["attachments", cdn_key]))
    }

    pub fn manifest_url(&self, pack_id: &PackId) -> Url {
        self.url_with(&["stickers", pack_id.as_str(), "manifest"])
    }

    pub fn sticker_url(&self, pack_id: &PackId, sticker_id: u32) -> Url {
        self.url_with(&["stickers", pack_id.as_str(), "full", &sticker_id.to_string()])
    }

    fn url_with(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejected cannot-be-a-base URLs, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn fetch(&self, url: Url) -> Result<Vec<u8>> {
        if !self.is_online() {
            return Err(NetError::Offline);
        }

        let resp = self.client.get(url.clone()).send().await?;
        if !resp.status().is_success() {
            return Err(NetError::Status {
                status: resp.status().as_u16(),
                url: url.to_string(),
            });
        }

        let body: bytes::Bytes = resp.bytes().await?;
        debug!(size = body.len(), "fetched remote bytes");
        Ok(body.to_vec())
    }
}

#[async_trait]
impl RemoteSource for HttpRemoteSource {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn get_attachment(&self, cdn_key: &str) -> Result<Vec<u8>> {
        self.fetch(self.attachment_url(cdn_key)?).await
    }

    async fn get_sticker_pack_manifest(&self, pack_id: &PackId) -> Result<Vec<u8>> {
        self.fetch(self.manifest_url(pack_id)).await
    }

    async fn get_sticker(&self, pack_id: &PackId, sticker_id: u32) -> Result<Vec<u8>> {
        self.fetch(self.sticker_url(pack_id, sticker_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let source = HttpRemoteSource::new("https://cdn.example.org/").unwrap();
        let id = PackId::parse("9acc9e8aba563d26a4994e69263e3b25").unwrap();
        assert_eq!(
            source.manifest_url(&id).as_str(),
            "https://cdn.example.org/stickers/9acc9e8aba563d26a4994e69263e3b25/manifest"
        );
        assert_eq!(
            source.sticker_url(&id, 4).as_str(),
            "https://cdn.example.org/stickers/9acc9e8aba563d26a4994e69263e3b25/full/4"
        );
        assert_eq!(
            source.attachment_url("abc").unwrap().as_str(),
            "https://cdn.example.org/attachments/abc"
        );
    }

    #[test]
    fn test_base_path_is_kept() {
        let source = HttpRemoteSource::new("https://example.org/cdn2").unwrap();
        assert_eq!(
            source.attachment_url("abc").unwrap().as_str(),
            "https://example.org/cdn2/attachments/abc"
        );
    }

    #[test]
    fn test_cdn_key_stays_one_segment() {
        let source = HttpRemoteSource::new("https://cdn.example.org").unwrap();
        let url = source.attachment_url("../../admin/x").unwrap();
        assert_eq!(url.path(), "/attachments/..%2F..%2Fadmin%2Fx");
        assert_eq!(url.path_segments().unwrap().count(), 2);

        assert!(matches!(source.attachment_url(".."), Err(NetError::InvalidCdnKey)));
        assert!(matches!(source.attachment_url(""), Err(NetError::InvalidCdnKey)));
    }

    #[test]
    fn test_rejects_bad_base() {
        assert!(HttpRemoteSource::new("not a url").is_err());
        assert!(HttpRemoteSource::new("mailto:cdn@example.org").is_err());
    }

    #[tokio::test]
    async fn test_offline_short_circuits() {
        let source = HttpRemoteSource::new("https://cdn.example.org").unwrap();
        source.set_online(false);
        assert!(matches!(
            source.get_attachment("abc").await,
            Err(NetError::Offline)
        ));
    }
}
