use crate::config::StoreConfig;
use crate::services::slot_store::SlotStore;
use crate::services::sweeper::{sweep_commit_siblings, sweep_staging};
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

/// Builds the slot store and clears staging files left by a previous run.
pub async fn setup_store(config: &StoreConfig) -> anyhow::Result<Arc<SlotStore>> {
    let store = SlotStore::from_config(config).await.with_context(|| {
        format!(
            "failed to prepare {} and {}",
            config.public_dir.display(),
            config.staging_dir.display()
        )
    })?;

    info!(
        "🖼️  Slots: [{}] in {}",
        store.allowlist().iter().collect::<Vec<_>>().join(", "),
        store.public_dir().display()
    );

    // Nothing is in flight yet, so every staging artifact is an orphan.
    let removed = sweep_staging(store.staging(), None)
        .await
        .context("failed to sweep staging directory")?;
    info!(
        "📂 Staging: {} ({} orphaned file(s) removed)",
        store.staging().dir().display(),
        removed
    );

    let siblings = sweep_commit_siblings(store.public_dir())
        .await
        .context("failed to sweep public directory")?;
    if siblings > 0 {
        info!("📂 Public: {} interrupted commit(s) cleaned up", siblings);
    }

    if store.allowlist().is_empty() {
        tracing::warn!("⚠️  ALLOWED_SLOTS is empty, every request will be rejected");
    }

    Ok(Arc::new(store))
}
