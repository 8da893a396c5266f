//! Fetching message attachments from the CDN into the attachment store.

use std::sync::Arc;

use coffer_shared::constants::NONCE_SIZE;
use coffer_shared::crypto;
use coffer_store::schema::process_new_attachment;
use coffer_store::{AttachmentDescriptor, MigrationContext};
use tracing::{debug, info, warn};

use crate::error::{NetError, Result};
use crate::queue::{AcquisitionQueue, Priority, QueueConfig};
use crate::remote::RemoteSource;
use crate::retry::RetryPolicy;

/// What a finished download job hands back to every waiter.
pub type DownloadOutcome = std::result::Result<AttachmentDescriptor, Arc<NetError>>;

/// Where on a message an attachment sits. Part of the job key so the same
/// file attached twice to one message downloads once per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentSlot {
    Attachment,
    LongBody,
    Preview,
    Quote,
    Contact,
    Sticker,
}

impl AttachmentSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentSlot::Attachment => "attachment",
            AttachmentSlot::LongBody => "long-body",
            AttachmentSlot::Preview => "preview",
            AttachmentSlot::Quote => "quote",
            AttachmentSlot::Contact => "contact",
            AttachmentSlot::Sticker => "sticker",
        }
    }
}

pub struct AttachmentDownloader {
    remote: Arc<dyn RemoteSource>,
    ctx: MigrationContext,
    queue: AcquisitionQueue<DownloadOutcome>,
    policy: RetryPolicy,
}

impl AttachmentDownloader {
    pub fn new(remote: Arc<dyn RemoteSource>, ctx: MigrationContext) -> Self {
        Self::with_config(remote, ctx, QueueConfig::attachments(), RetryPolicy::ATTACHMENT)
    }

    pub fn with_config(
        remote: Arc<dyn RemoteSource>,
        ctx: MigrationContext,
        config: QueueConfig,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            remote,
            ctx,
            queue: AcquisitionQueue::new(config),
            policy,
        }
    }

    pub fn job_key(
        message_id: &str,
        slot: AttachmentSlot,
        attachment: &AttachmentDescriptor,
    ) -> String {
        let digest = attachment
            .transit
            .as_ref()
            .map(|t| t.digest.as_str())
            .unwrap_or_default();
        format!("{message_id}.{}.{digest}", slot.as_str())
    }

    /// Download `attachment` and return its local descriptor.
    ///
    /// Transient failures are retried with backoff inside the job. A
    /// descriptor that cannot be fetched ends up with `error` set, which is
    /// still an `Ok`: the caller saves it like any other result. `Err` means
    /// the job never ran (queue timeout) or broke on local storage.
    pub async fn download(
        &self,
        message_id: &str,
        slot: AttachmentSlot,
        attachment: AttachmentDescriptor,
        priority: Priority,
    ) -> Result<AttachmentDescriptor> {
        if attachment.is_locally_saved() {
            return Ok(attachment);
        }

        let key = Self::job_key(message_id, slot, &attachment);
        let flight = self.queue.enqueue(&key, priority, || {
            let remote = Arc::clone(&self.remote);
            let ctx = self.ctx.clone();
            let policy = self.policy;
            async move {
                run_with_retries(remote.as_ref(), &ctx, policy, attachment)
                    .await
                    .map_err(Arc::new)
            }
        });

        let outcome = flight.clone().await;
        let failed = !matches!(&outcome, Ok(Ok(a)) if !a.error);
        if failed {
            self.queue.forget(&key, &flight);
        }

        outcome?.map_err(NetError::Job)
    }

    pub fn queue(&self) -> &AcquisitionQueue<DownloadOutcome> {
        &self.queue
    }
}

async fn run_with_retries(
    remote: &dyn RemoteSource,
    ctx: &MigrationContext,
    policy: RetryPolicy,
    attachment: AttachmentDescriptor,
) -> Result<AttachmentDescriptor> {
    let mut attempts = 0;
    loop {
        let next = policy.next_attempt(attempts, remote.is_online());
        attempts = next.attempts;
        if !next.allowed {
            warn!(attempts, "attachment download out of attempts");
            return Ok(errored(attachment));
        }

        match fetch_and_store(remote, ctx, &attachment).await {
            Ok(downloaded) => {
                info!(attempts, size = downloaded.size, "attachment downloaded");
                return Ok(downloaded);
            }
            Err(e @ NetError::Store(_)) => return Err(e),
            Err(e) if e.is_permanent() => {
                warn!(error = %e, "attachment download failed permanently");
                return Ok(errored(attachment));
            }
            Err(e) => {
                if policy.is_exhausted(attempts) {
                    warn!(attempts, error = %e, "attachment download out of attempts");
                    return Ok(errored(attachment));
                }
                let wait = policy.backoff(attempts);
                debug!(attempts, ?wait, error = %e, "attachment download failed, retrying");
                tokio::time::sleep(wait).await;
            }
        }
    }
}

fn errored(mut attachment: AttachmentDescriptor) -> AttachmentDescriptor {
    attachment.pending = false;
    attachment.error = true;
    attachment
}

async fn fetch_and_store(
    remote: &dyn RemoteSource,
    ctx: &MigrationContext,
    attachment: &AttachmentDescriptor,
) -> Result<AttachmentDescriptor> {
    let transit = attachment.transit.as_ref().ok_or(NetError::MissingTransit)?;
    let ciphertext = remote.get_attachment(&transit.cdn_key).await?;

    if hex::encode(crypto::attachment_digest(&ciphertext)) != transit.digest {
        return Err(NetError::DigestMismatch);
    }
    let key = crypto::key_from_hex(&transit.key)?;
    let plaintext = crypto::decrypt(&key, &ciphertext)?;
    if attachment.size > 0 && plaintext.len() as u64 != attachment.size {
        return Err(NetError::SizeMismatch {
            expected: attachment.size,
            actual: plaintext.len() as u64,
        });
    }

    let written = ctx.attachments.write(&plaintext).await?;
    let mut downloaded = attachment.clone();
    downloaded.apply_local_write(&written);
    downloaded.pending = false;
    downloaded.error = false;
    if let Some(transit) = downloaded.transit.as_mut() {
        transit.iv = Some(hex::encode(&ciphertext[..NONCE_SIZE]));
    }

    Ok(process_new_attachment(downloaded, ctx).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, FakeRemote};
    use coffer_store::{AttachmentStorage, TransitInfo};
    use tempfile::TempDir;

    const PDF: &[u8] = b"%PDF-1.4 hello";

    fn remote_attachment(
        remote: &FakeRemote,
        cdn_key: &str,
        plaintext: &[u8],
    ) -> AttachmentDescriptor {
        let key = crypto::generate_symmetric_key();
        let ciphertext = crypto::encrypt(&key, plaintext).unwrap();
        let digest = hex::encode(crypto::attachment_digest(&ciphertext));
        remote.insert(cdn_key, ciphertext);
        AttachmentDescriptor {
            content_type: "application/pdf".into(),
            file_name: Some("doc.pdf".into()),
            size: plaintext.len() as u64,
            pending: true,
            transit: Some(TransitInfo {
                cdn_key: cdn_key.into(),
                key: hex::encode(key),
                digest,
                iv: None,
            }),
            ..Default::default()
        }
    }

    fn downloader(remote: &Arc<FakeRemote>, dir: &TempDir) -> AttachmentDownloader {
        AttachmentDownloader::new(remote.clone(), context(dir))
    }

    #[tokio::test]
    async fn test_download_writes_encrypted_file() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::new();
        let attachment = remote_attachment(&remote, "cdn-1", PDF);
        let downloader = downloader(&remote, &dir);

        let local = downloader
            .download("m1", AttachmentSlot::Attachment, attachment, Priority::Normal)
            .await
            .unwrap();

        assert!(matches!(local.storage, AttachmentStorage::LocalV2 { .. }));
        assert!(!local.pending && !local.error);
        assert!(local.transit.as_ref().unwrap().iv.is_some());
        // The recorded iv reproduces the digest, so no fresh material is needed.
        assert!(local.reencryption.is_none());
        let ctx = context(&dir);
        assert_eq!(ctx.attachments.read_attachment(&local).await.unwrap(), PDF);
    }

    #[tokio::test]
    async fn test_digest_mismatch_is_permanent() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::new();
        let mut attachment = remote_attachment(&remote, "cdn-1", PDF);
        attachment.transit.as_mut().unwrap().digest = "00".repeat(32);

        let local = downloader(&remote, &dir)
            .download("m1", AttachmentSlot::Attachment, attachment, Priority::Normal)
            .await
            .unwrap();
        assert!(local.error);
        assert_eq!(remote.calls(), 1);
    }

    #[tokio::test]
    async fn test_size_mismatch_is_permanent() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::new();
        let mut attachment = remote_attachment(&remote, "cdn-1", PDF);
        attachment.size = 3;

        let local = downloader(&remote, &dir)
            .download("m1", AttachmentSlot::Attachment, attachment, Priority::Normal)
            .await
            .unwrap();
        assert!(local.error);
        assert!(!local.is_locally_saved());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::new();
        let attachment = remote_attachment(&remote, "cdn-1", PDF);
        remote.fail_next(2);

        let local = downloader(&remote, &dir)
            .download("m1", AttachmentSlot::Attachment, attachment, Priority::High)
            .await
            .unwrap();
        assert!(!local.error);
        assert_eq!(remote.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ceiling_marks_error() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::new();
        let attachment = remote_attachment(&remote, "cdn-1", PDF);
        remote.fail_next(100);

        let local = downloader(&remote, &dir)
            .download("m1", AttachmentSlot::Attachment, attachment, Priority::Normal)
            .await
            .unwrap();
        assert!(local.error);
        assert_eq!(remote.calls(), RetryPolicy::ATTACHMENT.max_attempts);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::new();
        let attachment = remote_attachment(&remote, "cdn-1", PDF);
        let downloader = downloader(&remote, &dir);

        let (a, b) = tokio::join!(
            downloader.download("m1", AttachmentSlot::Attachment, attachment.clone(), Priority::Normal),
            downloader.download("m1", AttachmentSlot::Attachment, attachment, Priority::High),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(remote.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_job_can_be_requested_again() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::new();
        let attachment = remote_attachment(&remote, "cdn-1", PDF);
        let good = remote.fetch("cdn-1").unwrap();
        remote.insert("cdn-1", b"corrupted".to_vec());
        let downloader = downloader(&remote, &dir);

        let failed = downloader
            .download("m1", AttachmentSlot::Attachment, attachment.clone(), Priority::Normal)
            .await
            .unwrap();
        assert!(failed.error);

        remote.insert("cdn-1", good);
        let retried = downloader
            .download("m1", AttachmentSlot::Attachment, attachment, Priority::Normal)
            .await
            .unwrap();
        assert!(!retried.error);
        assert!(retried.is_locally_saved());
    }

    #[tokio::test]
    async fn test_local_attachment_is_returned_untouched() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::new();
        let ctx = context(&dir);
        let written = ctx.attachments.write(PDF).await.unwrap();
        let local = AttachmentDescriptor::from_local_write("application/pdf", &written);

        let same = downloader(&remote, &dir)
            .download("m1", AttachmentSlot::Attachment, local.clone(), Priority::Normal)
            .await
            .unwrap();
        assert_eq!(same, local);
        assert_eq!(remote.calls(), 0);
    }
}
