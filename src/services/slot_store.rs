use crate::config::StoreConfig;
use crate::services::content_type::{ContentTypeGuard, ContentTypeRejection};
use crate::services::name_validator::{InvalidName, NameValidator, SlotAllowlist, SlotName};
use crate::services::staging::{StagingArea, StagingError};
use crate::utils::keyed_mutex::KeyedMutex;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Error, Debug)]
pub enum SlotError {
    #[error(transparent)]
    InvalidName(#[from] InvalidName),

    #[error("Image not found")]
    NotFound(SlotName),

    #[error(transparent)]
    UnsupportedContentType(#[from] ContentTypeRejection),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("Storage I/O failure: {0}")]
    Io(#[from] io::Error),
}

impl SlotError {
    /// Stable reason code for clients and logs.
    pub fn code(&self) -> &'static str {
        match self {
            SlotError::InvalidName(_) => "invalid_name",
            SlotError::NotFound(_) => "not_found",
            SlotError::UnsupportedContentType(_) => "unsupported_content_type",
            SlotError::Staging(_) | SlotError::Io(_) => "io_failure",
        }
    }
}

/// A populated slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAsset {
    pub slot: SlotName,
    pub path: PathBuf,
}

impl SlotAsset {
    pub fn file_name(&self) -> String {
        self.slot.file_name()
    }
}

/// Result of a successful replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replaced {
    pub slot: SlotName,
    pub bytes: u64,
    /// Best effort unless replaces are serialized; a concurrent replace of
    /// the same slot can race with the check.
    pub did_exist_before: bool,
}

impl Replaced {
    pub fn action(&self) -> &'static str {
        if self.did_exist_before {
            "replaced"
        } else {
            "uploaded"
        }
    }

    pub fn file_name(&self) -> String {
        self.slot.file_name()
    }
}

/// Fixed set of named image slots, each backed by `<public_dir>/<name>.jpg`.
///
/// Commits go through an atomic rename, so a concurrent `resolve` (or a
/// static file read) never sees a partial asset. Concurrent replaces of one
/// slot are last-writer-wins unless `serialize_replaces` is set.
#[derive(Debug)]
pub struct SlotStore {
    public_dir: PathBuf,
    validator: NameValidator,
    staging: StagingArea,
    guard: ContentTypeGuard,
    slot_locks: Option<KeyedMutex<SlotName>>,
}

impl SlotStore {
    pub fn new(
        public_dir: impl Into<PathBuf>,
        validator: NameValidator,
        staging: StagingArea,
    ) -> Self {
        Self {
            public_dir: public_dir.into(),
            validator,
            staging,
            guard: ContentTypeGuard::new(),
            slot_locks: None,
        }
    }

    /// Serialize replaces per slot instead of last-writer-wins.
    pub fn with_serialized_replaces(mut self) -> Self {
        self.slot_locks = Some(KeyedMutex::new());
        self
    }

    /// Builds the store described by `config`, creating both directories.
    pub async fn from_config(config: &StoreConfig) -> io::Result<Self> {
        tokio::fs::create_dir_all(&config.public_dir).await?;
        let staging = StagingArea::open(&config.staging_dir, config.max_file_size).await?;
        let validator = NameValidator::new(SlotAllowlist::new(&config.allowed_slots));

        let store = Self::new(&config.public_dir, validator, staging);
        Ok(if config.serialize_replaces {
            store.with_serialized_replaces()
        } else {
            store
        })
    }

    pub fn public_dir(&self) -> &Path {
        &self.public_dir
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn allowlist(&self) -> &SlotAllowlist {
        self.validator.allowlist()
    }

    pub fn validate(&self, raw: &str) -> Result<SlotName, InvalidName> {
        self.validator.validate(raw)
    }

    /// Canonical path of a slot. Depends on the validated name only.
    pub fn canonical_path(&self, slot: &SlotName) -> PathBuf {
        self.public_dir.join(slot.file_name())
    }

    pub async fn resolve(&self, slot: &SlotName) -> Result<SlotAsset, SlotError> {
        let path = self.canonical_path(slot);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(SlotAsset {
                slot: slot.clone(),
                path,
            }),
            Ok(_) => Err(SlotError::NotFound(slot.clone())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(SlotError::NotFound(slot.clone())),
            Err(e) => {
                tracing::error!("Failed to stat {}: {}", path.display(), e);
                Err(SlotError::Io(e))
            }
        }
    }

    /// Validates `raw_name`, then resolves it.
    pub async fn lookup(&self, raw_name: &str) -> Result<SlotAsset, SlotError> {
        let slot = self.validate(raw_name)?;
        self.resolve(&slot).await
    }

    /// Validates `raw_name`, then replaces the slot's content with `reader`.
    pub async fn replace<R>(
        &self,
        raw_name: &str,
        reader: R,
        declared_type: Option<&str>,
    ) -> Result<Replaced, SlotError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let slot = self.validate(raw_name)?;
        self.replace_slot(&slot, reader, declared_type).await
    }

    /// Stages, type-checks and commits new content for an already validated slot.
    ///
    /// No staging artifact survives this call, whatever the outcome.
    pub async fn replace_slot<R>(
        &self,
        slot: &SlotName,
        reader: R,
        declared_type: Option<&str>,
    ) -> Result<Replaced, SlotError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let upload = self.staging.stage(reader, declared_type).await?;

        if let Err(rejection) = self.guard.check(upload.declared_type()) {
            tracing::warn!("Rejected upload for '{}': {}", slot, rejection);
            if let Err(e) = self.staging.discard(upload).await {
                tracing::error!("Failed to discard rejected upload: {}", e);
            }
            return Err(rejection.into());
        }

        let slot_guard = match &self.slot_locks {
            Some(locks) => Some(locks.lock(slot).await),
            None => None,
        };

        let destination = self.canonical_path(slot);
        let did_exist_before = tokio::fs::try_exists(&destination).await.unwrap_or(false);
        let bytes = upload.len();

        let committed = self.staging.commit(upload, &destination).await;

        drop(slot_guard);
        if let Some(locks) = &self.slot_locks {
            locks.cleanup();
        }

        if let Err(e) = committed {
            tracing::error!("Failed to commit '{}': {}", slot, e);
            if let Some(upload) = e.upload
                && let Err(discard_err) = self.staging.discard(upload).await
            {
                tracing::error!("Failed to discard uncommitted upload: {}", discard_err);
            }
            return Err(SlotError::Io(e.source));
        }

        tracing::info!(
            "{} slot '{}' ({} bytes)",
            if did_exist_before { "Replaced" } else { "Uploaded" },
            slot,
            bytes
        );

        Ok(Replaced {
            slot: slot.clone(),
            bytes,
            did_exist_before,
        })
    }
}
