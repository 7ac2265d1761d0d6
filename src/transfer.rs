//! Transfer manager
//!
//! Whole-file and stream transfers. The managed variants hand the stream to
//! the backend, which chooses between a single PUT and a multipart upload;
//! the single-shot variants issue one PUT/GET and report a plain success flag.
//! Nothing is retried.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{info, warn};

use crate::storage::{with_timeout, ObjectBackend, ObjectRef};
use crate::types::{StorageError, StorageResult};

#[derive(Clone)]
pub struct TransferManager {
    backend: Arc<dyn ObjectBackend>,
    timeout: Duration,
}

impl TransferManager {
    pub fn new(backend: Arc<dyn ObjectBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Managed upload of a local file.
    pub async fn upload_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<()> {
        let object = ObjectRef::new(bucket, key)?;
        let mut file = File::open(path)
            .await
            .map_err(|e| StorageError::local_file(path, e))?;
        with_timeout(self.timeout, "upload", self.backend.put_stream(&object, &mut file)).await?;
        info!(bucket, key, path = %path.display(), "File uploaded successfully");
        Ok(())
    }

    /// Managed upload from any reader.
    pub async fn upload_stream<R>(&self, bucket: &str, key: &str, reader: &mut R) -> StorageResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let object = ObjectRef::new(bucket, key)?;
        with_timeout(self.timeout, "upload", self.backend.put_stream(&object, reader)).await?;
        info!(bucket, key, "File uploaded successfully to S3 bucket: {}, Key: {}", bucket, key);
        Ok(())
    }

    /// Managed download streamed into `destination`.
    ///
    /// The body lands in a `<name>.part` sibling that is renamed over
    /// `destination` only once complete, so a failed transfer leaves any
    /// existing file untouched.
    pub async fn download_file(&self, bucket: &str, key: &str, destination: &Path) -> StorageResult<()> {
        let object = ObjectRef::new(bucket, key)?;
        let partial = partial_path(destination)?;
        let mut file = create_file(&partial).await?;

        let result = with_timeout(
            self.timeout,
            "download",
            self.backend.get_to_writer(&object, &mut file),
        )
        .await;
        let result = match result {
            Ok(()) => file
                .flush()
                .await
                .map_err(|e| StorageError::local_file(&partial, e)),
            Err(e) => Err(e),
        };
        drop(file);

        let result = match result {
            Ok(()) => fs::rename(&partial, destination)
                .await
                .map_err(|e| StorageError::local_file(destination, e)),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            if let Err(rm) = fs::remove_file(&partial).await {
                warn!(path = %partial.display(), error = %rm, "Could not remove partial download");
            }
            return Err(e);
        }

        info!(bucket, key, path = %destination.display(), "File downloaded successfully");
        Ok(())
    }

    /// Single PUT of the whole file. A backend rejection comes back as
    /// [`TransferOutcome::Rejected`], not as an error.
    pub async fn upload_object(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<TransferOutcome> {
        let object = ObjectRef::new(bucket, key)?;
        let data = fs::read(path)
            .await
            .map_err(|e| StorageError::local_file(path, e))?;
        let content_type = mime_guess::from_path(path).first_or_octet_stream();

        let result = with_timeout(
            self.timeout,
            "put object",
            self.backend.put_object(&object, &data, content_type.essence_str()),
        )
        .await;
        status_outcome(result, &object, "upload")
    }

    /// Single GET written to `directory/key`. A backend rejection comes back as
    /// [`TransferOutcome::Rejected`], not as an error.
    pub async fn download_object(
        &self,
        bucket: &str,
        key: &str,
        directory: &Path,
    ) -> StorageResult<TransferOutcome> {
        let object = ObjectRef::new(bucket, key)?;
        let result = with_timeout(self.timeout, "get object", self.backend.get_object(&object)).await;

        let data = match result {
            Ok(data) => data,
            Err(e) => return status_outcome::<Bytes>(Err(e), &object, "download"),
        };

        let destination = object_path(directory, key);
        let mut file = create_file(&destination).await?;
        file.write_all(&data)
            .await
            .map_err(|e| StorageError::local_file(&destination, e))?;
        file.flush()
            .await
            .map_err(|e| StorageError::local_file(&destination, e))?;

        info!(bucket, key, path = %destination.display(), "Saved object");
        Ok(TransferOutcome::Completed)
    }
}

/// Result of a single-shot transfer that reached the backend.
#[derive(Debug)]
pub enum TransferOutcome {
    Completed,
    /// The backend answered with an error status; carries its reason.
    Rejected(StorageError),
}

impl TransferOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, TransferOutcome::Completed)
    }
}

/// `directory/key`, with the key's `/` separators becoming subdirectories.
pub fn object_path(directory: &Path, key: &str) -> PathBuf {
    key.split('/')
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .fold(directory.to_path_buf(), |path, part| path.join(part))
}

/// `destination` with `.part` appended to its file name.
fn partial_path(destination: &Path) -> StorageResult<PathBuf> {
    let name = destination.file_name().ok_or_else(|| {
        StorageError::InvalidInput(format!("{} is not a file path", destination.display()))
    })?;
    let mut partial = name.to_os_string();
    partial.push(".part");
    Ok(destination.with_file_name(partial))
}

async fn create_file(path: &Path) -> StorageResult<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::local_file(parent, e))?;
    }
    File::create(path)
        .await
        .map_err(|e| StorageError::local_file(path, e))
}

/// Fold a backend status rejection into [`TransferOutcome::Rejected`];
/// everything else passes through.
fn status_outcome<T>(
    result: StorageResult<T>,
    object: &ObjectRef,
    action: &str,
) -> StorageResult<TransferOutcome> {
    match result {
        Ok(_) => {
            info!(%object, "Successfully completed {} of {}", action, object);
            Ok(TransferOutcome::Completed)
        }
        Err(e) if e.status().is_some() => {
            warn!(%object, error = %e, "Could not {} {}", action, object);
            Ok(TransferOutcome::Rejected(e))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use tempfile::TempDir;

    fn manager() -> (TransferManager, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (TransferManager::new(backend.clone(), Duration::from_secs(5)), backend)
    }

    #[tokio::test]
    async fn test_upload_then_download_file() {
        let (manager, _) = manager();
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.bin");
        let content: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        tokio::fs::write(&source, &content).await.unwrap();

        manager.upload_file("bucket", "data/source.bin", &source).await.unwrap();

        let target = dir.path().join("nested/out/copy.bin");
        manager.download_file("bucket", "data/source.bin", &target).await.unwrap();
        assert_eq!(tokio::fs::read(&target).await.unwrap(), content);
    }

    #[tokio::test]
    async fn test_upload_stream() {
        let (manager, backend) = manager();
        let mut reader = std::io::Cursor::new(b"streamed".to_vec());
        manager.upload_stream("bucket", "s.txt", &mut reader).await.unwrap();

        let object = ObjectRef::new("bucket", "s.txt").unwrap();
        assert_eq!(backend.get_object(&object).await.unwrap().as_ref(), b"streamed");
    }

    #[tokio::test]
    async fn test_upload_missing_file_is_local_error() {
        let (manager, _) = manager();
        let err = manager
            .upload_file("bucket", "k", Path::new("/definitely/not/here.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::LocalFile { .. }));

        let err = manager
            .upload_object("bucket", "k", Path::new("/definitely/not/here.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::LocalFile { .. }));
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_partial_file() {
        let (manager, _) = manager();
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("missing.bin");

        let err = manager.download_file("bucket", "missing", &target).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(!target.exists());
        assert!(!dir.path().join("missing.bin.part").exists());
    }

    #[tokio::test]
    async fn test_failed_download_keeps_existing_file() {
        let (manager, _) = manager();
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("keep.txt");
        tokio::fs::write(&target, "precious").await.unwrap();

        let err = manager.download_file("bucket", "ghost", &target).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert_eq!(tokio::fs::read_to_string(&target).await.unwrap(), "precious");
        assert!(!dir.path().join("keep.txt.part").exists());
    }

    #[tokio::test]
    async fn test_download_replaces_existing_file() {
        let (manager, backend) = manager();
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("report.txt");
        tokio::fs::write(&target, "old contents that are longer").await.unwrap();

        let object = ObjectRef::new("bucket", "report.txt").unwrap();
        backend.put_object(&object, b"new", "text/plain").await.unwrap();

        manager.download_file("bucket", "report.txt", &target).await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&target).await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_single_shot_round_trip() {
        let (manager, _) = manager();
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("report.csv");
        tokio::fs::write(&source, "a,b\n1,2\n").await.unwrap();

        assert!(manager
            .upload_object("bucket", "reports/report.csv", &source)
            .await
            .unwrap()
            .succeeded());

        let out = dir.path().join("downloads");
        assert!(manager
            .download_object("bucket", "reports/report.csv", &out)
            .await
            .unwrap()
            .succeeded());
        let saved = out.join("reports").join("report.csv");
        assert_eq!(tokio::fs::read_to_string(saved).await.unwrap(), "a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_single_shot_download_of_missing_object_is_rejected() {
        let (manager, _) = manager();
        let dir = TempDir::new().unwrap();
        let outcome = manager.download_object("bucket", "ghost", dir.path()).await.unwrap();
        match outcome {
            TransferOutcome::Rejected(reason) => {
                assert!(matches!(reason, StorageError::NotFound(_)));
                assert_eq!(reason.to_string(), "Object not found: bucket/ghost");
            }
            TransferOutcome::Completed => panic!("missing object reported as downloaded"),
        }
        assert!(!dir.path().join("ghost").exists());
    }

    #[test]
    fn test_object_path_stays_under_directory() {
        let base = Path::new("/data");
        assert_eq!(object_path(base, "a/b.txt"), PathBuf::from("/data/a/b.txt"));
        assert_eq!(object_path(base, "../../etc/passwd"), PathBuf::from("/data/etc/passwd"));
    }
}
