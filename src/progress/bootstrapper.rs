use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::{Phase, ProgressTracker};
use crate::node::CONSENSUS_DIR;

pub const CONSENSUS_DB: &str = "consensus.db";

/// Where a consensus snapshot comes from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Writes the snapshot to `dest`, reporting bytes through `tracker`.
    async fn fetch(&self, dest: &Path, tracker: &ProgressTracker) -> Result<(), String>;
}

pub struct HttpSnapshotSource {
    url: String,
    client: reqwest::Client,
}

impl HttpSnapshotSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self, dest: &Path, tracker: &ProgressTracker) -> Result<(), String> {
        info!("Downloading consensus snapshot from {}", self.url);
        let mut resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("Snapshot server answered {}", resp.status()));
        }
        tracker.set_total(resp.content_length());

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| format!("Unable to create {}: {}", dest.display(), e))?;
        let mut written = 0u64;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| format!("Download interrupted: {}", e))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| format!("Write failed: {}", e))?;
            written += chunk.len() as u64;
            tracker.advance(written);
        }
        file.flush().await.map_err(|e| format!("Write failed: {}", e))?;
        Ok(())
    }
}

/// Replaces the local consensus database with a downloaded snapshot once
/// the user asks for it.
pub struct Bootstrapper {
    tracker: Arc<ProgressTracker>,
    source: Arc<dyn SnapshotSource>,
    dir: PathBuf,
    enabled: bool,
    stale_after: Duration,
}

impl Bootstrapper {
    pub fn new(
        tracker: Arc<ProgressTracker>,
        source: Arc<dyn SnapshotSource>,
        dir: PathBuf,
        enabled: bool,
        stale_after: Duration,
    ) -> Self {
        Self {
            tracker,
            source,
            dir,
            enabled,
            stale_after,
        }
    }

    pub fn consensus_db_path(dir: &Path) -> PathBuf {
        dir.join(CONSENSUS_DIR).join(CONSENSUS_DB)
    }

    /// Size of the local consensus database, 0 when there is none.
    pub fn local_consensus_size(dir: &Path) -> u64 {
        std::fs::metadata(Self::consensus_db_path(dir))
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn local_is_fresh(&self) -> bool {
        std::fs::metadata(Self::consensus_db_path(&self.dir))
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| SystemTime::now().duration_since(t).ok())
            .map(|age| age < self.stale_after)
            .unwrap_or(false)
    }

    /// Runs until the tracker reaches a terminal phase and returns it.
    pub async fn run(&self) -> Phase {
        if !self.enabled || self.local_is_fresh() {
            info!("Bootstrapping skipped");
            let _ = self.tracker.skip();
            return self.tracker.phase();
        }

        let phase = self.tracker.wait_until(|p| *p != Phase::NotStarted).await;
        if phase != Phase::Running {
            return phase;
        }

        let db = Self::consensus_db_path(&self.dir);
        let part = db.with_extension("db.part");
        if let Some(parent) = db.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                let _ = self.tracker.fail(e.to_string());
                return self.tracker.phase();
            }
        }

        tokio::select! {
            res = self.source.fetch(&part, &self.tracker) => match res {
                Ok(()) => match tokio::fs::rename(&part, &db).await {
                    Ok(()) => {
                        if self.tracker.complete().is_ok() {
                            info!("Consensus snapshot installed at {}", db.display());
                        }
                    }
                    Err(e) => {
                        warn!("Unable to install consensus snapshot: {}", e);
                        let _ = self.tracker.fail(e.to_string());
                    }
                },
                Err(e) => {
                    warn!("Bootstrapping failed: {}", e);
                    let _ = tokio::fs::remove_file(&part).await;
                    let _ = self.tracker.fail(e);
                }
            },
            phase = self.tracker.wait_until(|p| *p != Phase::Running) => {
                info!("Bootstrapping stopped: {:?}", phase);
                let _ = tokio::fs::remove_file(&part).await;
            }
        }
        self.tracker.phase()
    }
}
