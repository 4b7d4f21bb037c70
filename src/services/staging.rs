use std::io;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, PersistError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

pub const STAGING_PREFIX: &str = "upload-";
pub const STAGING_SUFFIX: &str = ".part";

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Staging I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Upload stream failed: {0}")]
    Stream(io::Error),

    #[error("File exceeds the {limit} byte upload limit")]
    TooLarge { limit: usize },

    #[error("Staging task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failed commit. `upload` is handed back so the caller can discard it;
/// it is `None` only if the blocking task died, in which case the temp
/// file was already dropped.
#[derive(Error, Debug)]
#[error("Commit to {} failed: {source}", .destination.display())]
pub struct CommitError {
    pub destination: PathBuf,
    #[source]
    pub source: io::Error,
    pub upload: Option<StagedUpload>,
}

/// Bytes received for one request but not yet trusted.
///
/// Owns its staging file: dropping a `StagedUpload` deletes the file, so an
/// upload that is neither committed nor discarded still never outlives its
/// request.
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
    declared_type: Option<String>,
    len: u64,
}

impl StagedUpload {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn declared_type(&self) -> Option<&str> {
        self.declared_type.as_deref()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Dedicated directory for incoming uploads.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
    max_bytes: usize,
}

impl StagingArea {
    /// Creates the staging directory if needed.
    pub async fn open(dir: impl Into<PathBuf>, max_bytes: usize) -> io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir, max_bytes })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// True for file names this area creates.
    pub fn is_staging_artifact(name: &str) -> bool {
        name.starts_with(STAGING_PREFIX) && name.ends_with(STAGING_SUFFIX)
    }

    /// True for the hidden sibling a cross-volume commit writes next to its
    /// destination.
    pub fn is_commit_sibling(name: &str) -> bool {
        name.strip_prefix('.').is_some_and(Self::is_staging_artifact)
    }

    /// Drains `reader` into a fresh staging file.
    ///
    /// A read error, or more than `max_bytes` of input, discards the partial
    /// file before returning the error.
    pub async fn stage<R>(
        &self,
        mut reader: R,
        declared_type: Option<&str>,
    ) -> Result<StagedUpload, StagingError>
    where
        R: AsyncRead + Unpin + Send,
    {
        tokio::fs::create_dir_all(&self.dir).await?;

        let file = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(&self.dir)?;
        let mut writer = tokio::fs::File::from_std(file.reopen()?);

        let mut upload = StagedUpload {
            file,
            declared_type: declared_type.map(str::to_string),
            len: 0,
        };

        match self.copy_into(&mut reader, &mut writer).await {
            Ok(len) => {
                upload.len = len;
                drop(writer);
                tracing::debug!(
                    "Staged {} bytes at {}",
                    upload.len,
                    upload.path().display()
                );
                Ok(upload)
            }
            Err(e) => {
                drop(writer);
                tracing::warn!("Staging failed, discarding partial upload: {}", e);
                if let Err(discard_err) = self.discard(upload).await {
                    tracing::error!("Failed to discard partial upload: {}", discard_err);
                }
                Err(e)
            }
        }
    }

    async fn copy_into<R>(
        &self,
        reader: &mut R,
        writer: &mut tokio::fs::File,
    ) -> Result<u64, StagingError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut total: u64 = 0;

        loop {
            let n = reader.read(&mut buffer).await.map_err(StagingError::Stream)?;
            if n == 0 {
                break;
            }

            total += n as u64;
            if total > self.max_bytes as u64 {
                return Err(StagingError::TooLarge {
                    limit: self.max_bytes,
                });
            }

            writer.write_all(&buffer[..n]).await?;
        }

        writer.flush().await?;
        writer.sync_all().await?;
        Ok(total)
    }

    /// Removes a staged upload that will not be committed.
    pub async fn discard(&self, upload: StagedUpload) -> Result<(), StagingError> {
        let path = upload.path().to_path_buf();
        tokio::task::spawn_blocking(move || upload.file.close()).await??;
        tracing::debug!("Discarded staged upload {}", path.display());
        Ok(())
    }

    /// Moves `upload` to `destination` in one atomic step.
    ///
    /// Readers of `destination` see either the previous file or the complete
    /// new one. When the staging directory sits on another volume, the bytes
    /// are first copied to a sibling temp file next to `destination` and that
    /// file is renamed into place.
    pub async fn commit(
        &self,
        upload: StagedUpload,
        destination: &Path,
    ) -> Result<(), CommitError> {
        let dest = destination.to_path_buf();
        let task_dest = dest.clone();

        match tokio::task::spawn_blocking(move || persist_atomically(upload, &task_dest)).await {
            Ok(result) => result,
            Err(join_err) => Err(CommitError {
                destination: dest,
                source: io::Error::other(join_err),
                upload: None,
            }),
        }
    }
}

fn persist_atomically(upload: StagedUpload, destination: &Path) -> Result<(), CommitError> {
    let StagedUpload {
        file,
        declared_type,
        len,
    } = upload;

    let fail = |source: io::Error, file: NamedTempFile| CommitError {
        destination: destination.to_path_buf(),
        source,
        upload: Some(StagedUpload {
            file,
            declared_type: declared_type.clone(),
            len,
        }),
    };

    let parent = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if let Err(e) = std::fs::create_dir_all(&parent) {
        return Err(fail(e, file));
    }
    if let Err(e) = make_public(file.as_file()) {
        return Err(fail(e, file));
    }

    match file.persist(destination) {
        Ok(_) => Ok(()),
        Err(PersistError { error, file }) if error.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(
                "Staging and {} are on different volumes, committing via sibling file",
                parent.display()
            );
            commit_by_copy(file, &parent, destination).map_err(|(e, file)| fail(e, file))
        }
        Err(PersistError { error, file }) => Err(fail(error, file)),
    }
}

/// Cross-volume commit. The staged file is consumed and deleted on success,
/// and handed back with the error otherwise.
fn commit_by_copy(
    staged: NamedTempFile,
    parent: &Path,
    destination: &Path,
) -> Result<(), (io::Error, NamedTempFile)> {
    match copy_then_rename(&staged, parent, destination) {
        Ok(()) => Ok(()),
        Err(e) => Err((e, staged)),
    }
}

fn copy_then_rename(
    staged: &NamedTempFile,
    parent: &Path,
    destination: &Path,
) -> io::Result<()> {
    let mut sibling = tempfile::Builder::new()
        .prefix(&format!(".{STAGING_PREFIX}"))
        .suffix(STAGING_SUFFIX)
        .tempfile_in(parent)?;

    let mut source = staged.reopen()?;
    std::io::copy(&mut source, sibling.as_file_mut())?;
    sibling.as_file().sync_all()?;
    make_public(sibling.as_file())?;

    sibling.persist(destination).map_err(|e| e.error)?;
    Ok(())
}

/// Temp files are created owner-only; committed assets are world-readable.
#[cfg(unix)]
fn make_public(file: &std::fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn make_public(_file: &std::fs::File) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    fn staging_entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    /// Yields some bytes, then fails like a dropped client connection.
    struct BrokenReader {
        sent: bool,
    }

    impl AsyncRead for BrokenReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.sent {
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "client disconnected",
                )))
            } else {
                self.sent = true;
                buf.put_slice(b"partial-bytes");
                Poll::Ready(Ok(()))
            }
        }
    }

    #[tokio::test]
    async fn test_stage_then_commit() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = StagingArea::open(tmp.path().join("staging"), 1024)
            .await
            .unwrap();

        let upload = staging
            .stage(&b"hello image"[..], Some("image/png"))
            .await
            .unwrap();
        assert_eq!(upload.len(), 11);
        assert_eq!(upload.declared_type(), Some("image/png"));
        let name = upload.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(StagingArea::is_staging_artifact(&name));
        assert!(!StagingArea::is_commit_sibling(&name));
        assert!(StagingArea::is_commit_sibling(&format!(".{name}")));

        let dest = tmp.path().join("public").join("tom.jpg");
        staging.commit(upload, &dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"hello image");
        assert!(staging_entries(staging.dir()).is_empty());
    }

    #[tokio::test]
    async fn test_commit_replaces_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = StagingArea::open(tmp.path().join("staging"), 1024)
            .await
            .unwrap();
        let dest = tmp.path().join("dog.jpg");
        std::fs::write(&dest, b"old").unwrap();

        let upload = staging.stage(&b"new"[..], None).await.unwrap();
        staging.commit(upload, &dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_oversized_upload_is_discarded() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = StagingArea::open(tmp.path(), 4).await.unwrap();

        let err = staging.stage(&b"too many bytes"[..], None).await.unwrap_err();
        assert!(matches!(err, StagingError::TooLarge { limit: 4 }));
        assert!(staging_entries(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_broken_stream_is_discarded() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = StagingArea::open(tmp.path(), 1024).await.unwrap();

        let err = staging
            .stage(BrokenReader { sent: false }, Some("image/jpeg"))
            .await
            .unwrap_err();
        assert!(matches!(err, StagingError::Stream(_)));
        assert!(staging_entries(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_discard_and_drop_remove_files() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = StagingArea::open(tmp.path(), 1024).await.unwrap();

        let first = staging.stage(&b"a"[..], None).await.unwrap();
        let second = staging.stage(&b"b"[..], None).await.unwrap();
        assert_ne!(first.path(), second.path());
        assert_eq!(staging_entries(tmp.path()).len(), 2);

        staging.discard(first).await.unwrap();
        drop(second);
        assert!(staging_entries(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_stage_recreates_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("staging");
        let staging = StagingArea::open(&dir, 1024).await.unwrap();
        std::fs::remove_dir(&dir).unwrap();

        let upload = staging.stage(&b"x"[..], None).await.unwrap();
        assert!(upload.path().starts_with(&dir));
    }

    #[tokio::test]
    async fn test_failed_commit_returns_upload() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = StagingArea::open(tmp.path().join("staging"), 1024)
            .await
            .unwrap();
        // a directory in the way makes the rename fail
        let dest = tmp.path().join("blocked.jpg");
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(dest.join("keep"), b"x").unwrap();

        let upload = staging.stage(&b"data"[..], None).await.unwrap();
        let err = staging.commit(upload, &dest).await.unwrap_err();
        let upload = err.upload.expect("upload handed back");
        assert!(upload.path().exists());

        staging.discard(upload).await.unwrap();
        assert!(staging_entries(staging.dir()).is_empty());
    }

    #[tokio::test]
    async fn test_commit_by_copy_replaces_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = StagingArea::open(tmp.path().join("staging"), 1024)
            .await
            .unwrap();
        let public = tmp.path().join("public");
        std::fs::create_dir(&public).unwrap();
        let dest = public.join("tom.jpg");
        std::fs::write(&dest, b"old").unwrap();

        let upload = staging.stage(&b"cross-volume"[..], None).await.unwrap();
        let staged_path = upload.path().to_path_buf();

        commit_by_copy(upload.file, &public, &dest).unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"cross-volume");
        assert_eq!(staging_entries(&public), vec!["tom.jpg".to_string()]);
        assert!(!staged_path.exists());
        assert!(staging_entries(staging.dir()).is_empty());
    }

    #[tokio::test]
    async fn test_commit_by_copy_failure_hands_file_back() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = StagingArea::open(tmp.path().join("staging"), 1024)
            .await
            .unwrap();
        let dest = tmp.path().join("blocked.jpg");
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(dest.join("keep"), b"x").unwrap();

        let upload = staging.stage(&b"data"[..], None).await.unwrap();
        let (_, file) = commit_by_copy(upload.file, tmp.path(), &dest).unwrap_err();

        assert!(file.path().exists());
        let siblings: Vec<_> = staging_entries(tmp.path())
            .into_iter()
            .filter(|name| name.starts_with('.'))
            .collect();
        assert!(siblings.is_empty());
    }

    /// Commits from tmpfs onto the temp dir when they are different devices.
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_commit_across_devices() {
        use std::os::unix::fs::MetadataExt;

        let shm = Path::new("/dev/shm");
        if !shm.is_dir() {
            return;
        }
        let staging_root = tempfile::tempdir_in(shm).unwrap();
        let public_root = tempfile::tempdir().unwrap();
        let staging_dev = std::fs::metadata(staging_root.path()).unwrap().dev();
        let public_dev = std::fs::metadata(public_root.path()).unwrap().dev();
        if staging_dev == public_dev {
            return;
        }

        let staging = StagingArea::open(staging_root.path(), 1024).await.unwrap();
        let dest = public_root.path().join("tom.jpg");

        for body in [&b"first"[..], &b"second"[..]] {
            let upload = staging.stage(body, Some("image/png")).await.unwrap();
            staging.commit(upload, &dest).await.unwrap();
            assert_eq!(std::fs::read(&dest).unwrap(), body);
        }

        assert!(staging_entries(staging.dir()).is_empty());
        assert_eq!(staging_entries(public_root.path()), vec!["tom.jpg".to_string()]);
    }
}
