//! File operations: read, write, append, delete, move, copy, stat.

use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{Agfs, Entry};
use crate::error::{VikingError, VikingResult};

impl Agfs {
    /// Read file contents. `size < 0` reads to EOF; `offset = 0, size = -1`
    /// is the common whole-file case.
    pub async fn read(&self, uri: &str, offset: u64, size: i64) -> VikingResult<Vec<u8>> {
        let _g = self.lock.read().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| self.io_error(e, &uri))?;
        if meta.is_dir() {
            return Err(VikingError::IsADirectory(uri));
        }

        let mut file = tokio::fs::File::open(&path).await?;
        if offset > 0 {
            file.seek(std::io::SeekFrom::Start(offset)).await?;
        }

        let mut data = Vec::new();
        if size < 0 {
            file.read_to_end(&mut data).await?;
        } else {
            file.take(size as u64).read_to_end(&mut data).await?;
        }
        Ok(data)
    }

    /// Write data to a file, creating missing parents. The write is atomic:
    /// a temporary sibling is written and renamed into place.
    pub async fn write(&self, uri: &str, data: &[u8]) -> VikingResult<()> {
        let _g = self.lock.write().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;
        Self::write_file_inner(&path, data).await
    }

    pub(crate) async fn write_file_inner(path: &Path, data: &[u8]) -> VikingResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = match path.file_name() {
            Some(name) => path.with_file_name(format!(".{}.tmp", name.to_string_lossy())),
            None => return Err(VikingError::InvalidUri(path.display().to_string())),
        };
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Append data to a file, creating it (and parents) if absent.
    pub async fn append(&self, uri: &str, data: &[u8]) -> VikingResult<()> {
        let _g = self.lock.write().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;

        let existing = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(VikingError::Io(err)),
        };

        let mut combined = existing;
        combined.extend_from_slice(data);
        Self::write_file_inner(&path, &combined).await
    }

    /// Delete a file or directory. Directories follow `rmdir` semantics.
    pub async fn delete(&self, uri: &str, recursive: bool) -> VikingResult<()> {
        let _g = self.lock.write().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| self.io_error(e, &uri))?;

        if meta.is_dir() {
            if recursive {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_dir(&path).await?;
            }
        } else {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    /// Move a file or directory. The destination must not exist; its parent
    /// is created.
    pub async fn mv(&self, old_uri: &str, new_uri: &str) -> VikingResult<()> {
        let _g = self.lock.write().await;
        let old_uri = self.normalize_uri(old_uri);
        let new_uri = self.normalize_uri(new_uri);
        let old_path = self.uri_to_path(&old_uri)?;
        let new_path = self.uri_to_path(&new_uri)?;

        tokio::fs::metadata(&old_path)
            .await
            .map_err(|e| self.io_error(e, &old_uri))?;

        if tokio::fs::metadata(&new_path).await.is_ok() {
            return Err(VikingError::AlreadyExists(new_uri));
        }
        if let Some(parent) = new_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&old_path, &new_path).await?;
        Ok(())
    }

    /// Copy a file or (recursively) a directory. The destination must not
    /// exist.
    pub async fn copy(&self, old_uri: &str, new_uri: &str) -> VikingResult<()> {
        let _g = self.lock.write().await;
        let old_uri = self.normalize_uri(old_uri);
        let new_uri = self.normalize_uri(new_uri);
        let old_path = self.uri_to_path(&old_uri)?;
        let new_path = self.uri_to_path(&new_uri)?;

        let meta = tokio::fs::metadata(&old_path)
            .await
            .map_err(|e| self.io_error(e, &old_uri))?;

        if tokio::fs::metadata(&new_path).await.is_ok() {
            return Err(VikingError::AlreadyExists(new_uri));
        }
        if let Some(parent) = new_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if meta.is_dir() {
            copy_dir(&old_path, &new_path)?;
        } else {
            tokio::fs::copy(&old_path, &new_path).await?;
        }
        Ok(())
    }

    /// Stat a file or directory.
    pub async fn stat(&self, uri: &str) -> VikingResult<Entry> {
        let _g = self.lock.read().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| self.io_error(e, &uri))?;
        Ok(self.entry_from_metadata(&path, &meta))
    }

    /// Existence check. Invalid URIs and missing targets both report false.
    pub async fn exists(&self, uri: &str) -> bool {
        let uri = self.normalize_uri(uri);
        match self.uri_to_path(&uri) {
            Ok(path) => tokio::fs::metadata(&path).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Directory check with the same non-surfacing semantics as `exists`.
    pub async fn is_dir(&self, uri: &str) -> bool {
        let uri = self.normalize_uri(uri);
        match self.uri_to_path(&uri) {
            Ok(path) => tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Create an empty file or refresh the modification time of an existing
    /// one.
    pub async fn touch(&self, uri: &str) -> VikingResult<()> {
        let _g = self.lock.write().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Err(VikingError::IsADirectory(uri)),
            Ok(_) => {
                let file = std::fs::OpenOptions::new().append(true).open(&path)?;
                file.set_modified(std::time::SystemTime::now())?;
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Self::write_file_inner(&path, b"").await
            }
            Err(err) => Err(VikingError::Io(err)),
        }
    }
}

fn copy_dir(src: &Path, dst: &Path) -> VikingResult<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}
