//! Directory operations: mkdir, rmdir, list, tree.

use std::path::Path;

use super::{determine_file_type, is_hidden, Agfs, Entry, TreeEntry};
use crate::error::{VikingError, VikingResult};

impl Agfs {
    /// Create a directory (and missing ancestors) at the given URI.
    ///
    /// With `exist_ok = false` an existing target fails with `AlreadyExists`.
    pub async fn mkdir(&self, uri: &str, exist_ok: bool) -> VikingResult<()> {
        let _g = self.lock.write().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;
        self.mkdir_inner(&uri, &path, exist_ok).await
    }

    /// Lock-free mkdir for callers already holding the write lock.
    pub(crate) async fn mkdir_inner(
        &self,
        uri: &str,
        path: &Path,
        exist_ok: bool,
    ) -> VikingResult<()> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => {
                if exist_ok && meta.is_dir() {
                    Ok(())
                } else {
                    Err(VikingError::AlreadyExists(uri.to_string()))
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(path).await?;
                Ok(())
            }
            Err(err) => Err(VikingError::Io(err)),
        }
    }

    /// Remove a directory. Non-recursive removal requires it to be empty.
    pub async fn rmdir(&self, uri: &str, recursive: bool) -> VikingResult<()> {
        let _g = self.lock.write().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| self.io_error(e, &uri))?;
        if !meta.is_dir() {
            return Err(VikingError::NotADirectory(uri));
        }

        if recursive {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_dir(&path).await?;
        }
        Ok(())
    }

    /// List the direct children of a directory. Hidden entries (leading dot)
    /// are filtered unless `show_hidden` is set.
    pub async fn list(&self, uri: &str, show_hidden: bool) -> VikingResult<Vec<Entry>> {
        let _g = self.lock.read().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| self.io_error(e, &uri))?;
        if !meta.is_dir() {
            return Err(VikingError::NotADirectory(uri));
        }

        let mut result = Vec::new();
        let mut entries = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !show_hidden && is_hidden(&name) {
                continue;
            }
            let entry_path = entry.path();
            let Ok(meta) = tokio::fs::metadata(&entry_path).await else {
                continue;
            };
            result.push(self.entry_from_metadata(&entry_path, &meta));
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    /// Return the directory tree below `uri` in pre-order. Directory nodes
    /// carry their abstract and overview when available. `max_depth <= 0`
    /// walks the full subtree.
    pub async fn tree(&self, uri: &str, max_depth: i32) -> VikingResult<Vec<TreeEntry>> {
        let _g = self.lock.read().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| self.io_error(e, &uri))?;
        if !meta.is_dir() {
            return Err(VikingError::NotADirectory(uri));
        }

        Ok(self.walk_tree(&path, 0, max_depth))
    }

    fn walk_tree(&self, path: &Path, depth: i32, max_depth: i32) -> Vec<TreeEntry> {
        if max_depth > 0 && depth >= max_depth {
            return Vec::new();
        }

        let Ok(read_dir) = std::fs::read_dir(path) else {
            return Vec::new();
        };

        let mut names: Vec<(String, bool)> = read_dir
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                let is_dir = e.file_type().ok()?.is_dir();
                Some((name, is_dir))
            })
            .filter(|(name, _)| !is_hidden(name))
            .collect();
        names.sort();

        let mut entries = Vec::with_capacity(names.len());
        for (name, is_dir) in names {
            let entry_path = path.join(&name);
            let mut node = TreeEntry {
                name,
                uri: self.path_to_uri(&entry_path),
                is_dir,
                children: Vec::new(),
                abstract_text: String::new(),
                overview: String::new(),
            };
            if is_dir {
                node.abstract_text =
                    std::fs::read_to_string(entry_path.join(".abstract.md")).unwrap_or_default();
                node.overview =
                    std::fs::read_to_string(entry_path.join(".overview.md")).unwrap_or_default();
                node.children = self.walk_tree(&entry_path, depth + 1, max_depth);
            }
            entries.push(node);
        }
        entries
    }

    pub(crate) fn entry_from_metadata(&self, path: &Path, meta: &std::fs::Metadata) -> Entry {
        use std::os::unix::fs::PermissionsExt;

        let uri = self.path_to_uri(path);
        let is_dir = meta.is_dir();
        Entry {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            path: path.to_path_buf(),
            file_type: determine_file_type(&uri, is_dir),
            uri,
            size: meta.len(),
            mode: meta.permissions().mode(),
            modified: meta
                .modified()
                .map(chrono::DateTime::from)
                .unwrap_or_else(|_| chrono::Utc::now()),
            is_dir,
        }
    }
}
