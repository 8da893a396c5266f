//! Orphan accounting for legacy attachment upgrades.
//!
//! Upgrading a plaintext file writes an encrypted copy under a new name and
//! leaves the old file behind. [`OrphanTracker`] counts those leftovers and
//! schedules a sweep: immediately once too many pile up, otherwise after a
//! delay armed by the first upgrade of the session. The "sweep needed" flag
//! is persisted so a crash before the timer fires is recovered on next launch.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::attachment_store::AttachmentStore;
use crate::error::Result;

/// Upgrades since the last sweep that force an immediate sweep.
pub const DEFAULT_SWEEP_THRESHOLD: u64 = 10_000;

/// Delay between the first upgrade of a session and the deferred sweep.
pub const DEFAULT_SWEEP_DELAY: Duration = Duration::from_secs(15 * 60);

/// Deletes files nothing references any more.
#[async_trait]
pub trait OrphanSweep: Send + Sync {
    /// Returns the number of files removed.
    async fn cleanup_orphaned_attachments(&self) -> Result<usize>;
}

/// Persists the "sweep needed" flag across restarts.
#[async_trait]
pub trait SweepFlagStore: Send + Sync {
    async fn sweep_needed(&self) -> Result<bool>;
    async fn set_sweep_needed(&self, needed: bool) -> Result<()>;
}

/// Everything under one storage root that is still in use.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    async fn referenced_paths(&self) -> Result<HashSet<String>>;
}

/// Flag store for hosts without durable settings. Lost on restart.
#[derive(Debug, Default)]
pub struct InMemorySweepFlag(AtomicBool);

#[async_trait]
impl SweepFlagStore for InMemorySweepFlag {
    async fn sweep_needed(&self) -> Result<bool> {
        Ok(self.0.load(Ordering::SeqCst))
    }

    async fn set_sweep_needed(&self, needed: bool) -> Result<()> {
        self.0.store(needed, Ordering::SeqCst);
        Ok(())
    }
}

/// Sweep = files on disk under one root minus the referenced set.
pub struct ReferenceSweep {
    store: AttachmentStore,
    references: Arc<dyn ReferenceSource>,
}

impl ReferenceSweep {
    pub fn new(store: AttachmentStore, references: Arc<dyn ReferenceSource>) -> Self {
        Self { store, references }
    }
}

#[async_trait]
impl OrphanSweep for ReferenceSweep {
    async fn cleanup_orphaned_attachments(&self) -> Result<usize> {
        let on_disk = self.store.list_relative_paths().await?;
        let referenced = self.references.referenced_paths().await?;

        let missing = referenced
            .iter()
            .filter(|p| !on_disk.iter().any(|d| d == *p))
            .count();
        if missing > 0 {
            warn!(
                disposition = %self.store.disposition(),
                missing,
                "referenced files not found on disk"
            );
        }

        let mut removed = 0;
        for path in on_disk.iter().filter(|p| !referenced.contains(*p)) {
            self.store.delete(path).await?;
            removed += 1;
        }

        info!(
            disposition = %self.store.disposition(),
            found = on_disk.len(),
            referenced = referenced.len(),
            removed,
            "orphan sweep finished"
        );
        Ok(removed)
    }
}

#[derive(Debug, Clone)]
pub struct OrphanConfig {
    pub sweep_threshold: u64,
    pub sweep_delay: Duration,
}

impl Default for OrphanConfig {
    fn default() -> Self {
        Self {
            sweep_threshold: DEFAULT_SWEEP_THRESHOLD,
            sweep_delay: DEFAULT_SWEEP_DELAY,
        }
    }
}

pub struct OrphanTracker {
    config: OrphanConfig,
    count: AtomicU64,
    armed: AtomicBool,
    flag: Arc<dyn SweepFlagStore>,
    sweeper: Arc<dyn OrphanSweep>,
}

impl OrphanTracker {
    pub fn new(
        config: OrphanConfig,
        flag: Arc<dyn SweepFlagStore>,
        sweeper: Arc<dyn OrphanSweep>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            count: AtomicU64::new(0),
            armed: AtomicBool::new(false),
            flag,
            sweeper,
        })
    }

    pub fn orphan_count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    pub fn should_sweep_now(&self) -> bool {
        self.orphan_count() > self.config.sweep_threshold
    }

    /// Count one orphaned file and react. Never fails; errors are logged.
    pub async fn record(self: &Arc<Self>) {
        self.count.fetch_add(1, Ordering::SeqCst);

        if self.should_sweep_now() {
            info!(
                count = self.orphan_count(),
                "orphan threshold exceeded, sweeping now"
            );
            if let Err(e) = self.sweep().await {
                error!(error = %e, "immediate orphan sweep failed");
            }
            return;
        }

        if let Err(e) = self.arm_delayed_sweep().await {
            error!(error = %e, "failed to arm delayed orphan sweep");
        }
    }

    /// Persist the flag and schedule one sweep after the configured delay.
    /// Only the first call per process does anything.
    pub async fn arm_delayed_sweep(self: &Arc<Self>) -> Result<()> {
        if self.armed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.flag.set_sweep_needed(true).await {
            self.armed.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let delay = self.config.sweep_delay;
        debug!(delay_secs = delay.as_secs(), "armed delayed orphan sweep");

        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tracker.sweep().await {
                error!(error = %e, "delayed orphan sweep failed");
            }
        });
        Ok(())
    }

    /// Run a sweep left pending by a previous process. Returns whether one ran.
    pub async fn resume_pending_sweep(&self) -> Result<bool> {
        if !self.flag.sweep_needed().await? {
            return Ok(false);
        }
        info!("resuming orphan sweep from previous session");
        self.sweep().await?;
        Ok(true)
    }

    async fn sweep(&self) -> Result<usize> {
        let removed = self.sweeper.cleanup_orphaned_attachments().await?;
        self.count.store(0, Ordering::SeqCst);
        self.armed.store(false, Ordering::SeqCst);
        self.flag.set_sweep_needed(false).await?;
        Ok(removed)
    }
}
