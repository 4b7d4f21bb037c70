use crate::services::staging::StagingArea;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;

/// Deletes leftover staging files.
///
/// With `older_than = None` every staging artifact is removed; that is only
/// safe before the server accepts requests. Otherwise only files whose
/// modification time is older than the given age go.
pub async fn sweep_staging(
    staging: &StagingArea,
    older_than: Option<Duration>,
) -> std::io::Result<usize> {
    sweep_dir(staging.dir(), StagingArea::is_staging_artifact, older_than).await
}

/// Deletes hidden commit siblings a crash left next to published assets.
///
/// Startup only: a running cross-volume commit owns its sibling.
pub async fn sweep_commit_siblings(public_dir: &Path) -> std::io::Result<usize> {
    sweep_dir(public_dir, StagingArea::is_commit_sibling, None).await
}

async fn sweep_dir(
    dir: &Path,
    is_orphan: fn(&str) -> bool,
    older_than: Option<Duration>,
) -> std::io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = Utc::now();
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_orphan(&name) {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            // removed by its owner since read_dir
            Err(_) => continue,
        };

        if let Some(max_age) = older_than {
            let modified: DateTime<Utc> = match metadata.modified() {
                Ok(t) => t.into(),
                Err(_) => continue,
            };
            let age = now.signed_duration_since(modified);
            if age.to_std().map(|a| a <= max_age).unwrap_or(true) {
                continue;
            }
        }

        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => {
                tracing::info!("🧹 Removed orphaned file {}", entry.path().display());
                removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", entry.path().display(), e),
        }
    }

    Ok(removed)
}

/// Periodically sweeps stale staging files until shutdown is signalled.
pub struct BackgroundWorker {
    staging: Arc<StagingArea>,
    interval: Duration,
    max_age: Duration,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundWorker {
    pub fn new(
        staging: Arc<StagingArea>,
        interval: Duration,
        max_age: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            staging,
            interval,
            max_age,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            "🚀 Staging sweeper started (every {:?}, max age {:?})",
            self.interval,
            self.max_age
        );

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Staging sweeper shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.perform_cleanup().await;
                }
            }
        }
    }

    async fn perform_cleanup(&self) {
        match sweep_staging(&self.staging, Some(self.max_age)).await {
            Ok(0) => tracing::debug!("Staging sweep found nothing to remove"),
            Ok(n) => tracing::info!("✅ Staging sweep removed {} file(s)", n),
            Err(e) => tracing::error!("Staging sweep failed: {}", e),
        }
    }
}
