//! Tiered context files and content search.
//!
//! Every directory may carry three summary levels: `.abstract.md` (L0, read
//! by the retrieval engine for ranking), `.overview.md` (L1, surfaced in tree
//! views), and `content.md` (L2, loaded on demand). Leaf content may also be
//! a plain file named by the URI's last component.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{determine_file_type, is_hidden, Agfs, FileType};
use crate::error::{VikingError, VikingResult};

pub(crate) const ABSTRACT_FILE: &str = ".abstract.md";
pub(crate) const OVERVIEW_FILE: &str = ".overview.md";
pub(crate) const CONTENT_FILE: &str = "content.md";

/// The three summary levels of a context node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextFile {
    pub uri: String,
    /// L0 summary.
    pub abstract_text: String,
    /// L1 description.
    pub overview: String,
    /// L2 body.
    pub content: String,
    pub is_leaf: bool,
    pub file_type: FileType,
}

/// A single grep match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepMatch {
    pub uri: String,
    pub line: usize,
    pub content: String,
}

impl Agfs {
    /// Write a context node: ensure the directory exists and write exactly
    /// the non-empty levels among abstract, overview, and content.
    pub async fn write_context(
        &self,
        uri: &str,
        abstract_text: &str,
        overview: &str,
        content: &str,
        is_leaf: bool,
    ) -> VikingResult<()> {
        let _g = self.lock.write().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;
        self.mkdir_inner(&uri, &path, true).await?;

        if !abstract_text.is_empty() {
            Self::write_file_inner(&path.join(ABSTRACT_FILE), abstract_text.as_bytes()).await?;
        }
        if !overview.is_empty() {
            Self::write_file_inner(&path.join(OVERVIEW_FILE), overview.as_bytes()).await?;
        }
        if !content.is_empty() {
            Self::write_file_inner(&path.join(CONTENT_FILE), content.as_bytes()).await?;
        }
        let _ = is_leaf; // leafness is an entity property; the fs shape is identical
        Ok(())
    }

    /// Read all context levels for a URI. Missing levels come back as empty
    /// strings, never as errors.
    pub async fn read_context(&self, uri: &str) -> VikingResult<ContextFile> {
        let _g = self.lock.read().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| self.io_error(e, &uri))?;
        let is_dir = meta.is_dir();

        let mut ctx = ContextFile {
            file_type: determine_file_type(&uri, is_dir),
            uri: uri.clone(),
            is_leaf: !is_dir,
            ..Default::default()
        };

        if is_dir {
            ctx.abstract_text = read_or_empty(&path.join(ABSTRACT_FILE)).await;
            ctx.overview = read_or_empty(&path.join(OVERVIEW_FILE)).await;
            ctx.content = read_or_empty(&path.join(CONTENT_FILE)).await;
        } else {
            ctx.content = read_or_empty(&path).await;
        }
        Ok(ctx)
    }

    /// Read the L0 abstract of a directory.
    pub async fn read_abstract(&self, uri: &str) -> VikingResult<String> {
        self.read_tier_file(uri, ABSTRACT_FILE).await
    }

    /// Read the L1 overview of a directory.
    pub async fn read_overview(&self, uri: &str) -> VikingResult<String> {
        self.read_tier_file(uri, OVERVIEW_FILE).await
    }

    /// Read the L2 content of a directory or the body of a leaf file.
    pub async fn read_content(&self, uri: &str) -> VikingResult<String> {
        let _g = self.lock.read().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| self.io_error(e, &uri))?;
        let content_path = if meta.is_dir() {
            path.join(CONTENT_FILE)
        } else {
            path
        };
        tokio::fs::read_to_string(&content_path)
            .await
            .map_err(|e| self.io_error(e, &uri))
    }

    async fn read_tier_file(&self, uri: &str, file: &str) -> VikingResult<String> {
        let _g = self.lock.read().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| self.io_error(e, &uri))?;
        if !meta.is_dir() {
            return Err(VikingError::NotADirectory(uri));
        }
        tokio::fs::read_to_string(path.join(file))
            .await
            .map_err(|_| VikingError::NotFound(format!("{uri}/{file}")))
    }

    /// Write the L0 abstract for a directory, creating it if needed.
    pub async fn write_abstract(&self, uri: &str, abstract_text: &str) -> VikingResult<()> {
        self.write_tier_file(uri, ABSTRACT_FILE, abstract_text).await
    }

    /// Write the L1 overview for a directory, creating it if needed.
    pub async fn write_overview(&self, uri: &str, overview: &str) -> VikingResult<()> {
        self.write_tier_file(uri, OVERVIEW_FILE, overview).await
    }

    /// Write the L2 content for a directory, or the body of a leaf file.
    pub async fn write_content(&self, uri: &str, content: &str) -> VikingResult<()> {
        let _g = self.lock.write().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;

        let content_path = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => path.join(CONTENT_FILE),
            Ok(_) => path,
            Err(e) => return Err(self.io_error(e, &uri)),
        };
        Self::write_file_inner(&content_path, content.as_bytes()).await
    }

    async fn write_tier_file(&self, uri: &str, file: &str, text: &str) -> VikingResult<()> {
        let _g = self.lock.write().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;
        self.mkdir_inner(&uri, &path, true).await?;
        Self::write_file_inner(&path.join(file), text.as_bytes()).await
    }

    /// Recursive substring search over non-hidden files under `uri`.
    /// A pattern that matches nothing returns an empty vec, never an error.
    pub async fn grep(
        &self,
        uri: &str,
        pattern: &str,
        case_insensitive: bool,
    ) -> VikingResult<Vec<GrepMatch>> {
        let _g = self.lock.read().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| self.io_error(e, &uri))?;
        if !meta.is_dir() {
            return Err(VikingError::NotADirectory(uri));
        }

        let needle = if case_insensitive {
            pattern.to_lowercase()
        } else {
            pattern.to_string()
        };
        let mut matches = Vec::new();
        self.grep_recursive(&path, &needle, case_insensitive, &mut matches);
        Ok(matches)
    }

    fn grep_recursive(
        &self,
        dir: &Path,
        needle: &str,
        case_insensitive: bool,
        matches: &mut Vec<GrepMatch>,
    ) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let mut entries: Vec<_> = entries.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().to_string();
            let entry_path = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

            if is_dir {
                self.grep_recursive(&entry_path, needle, case_insensitive, matches);
                continue;
            }
            if is_hidden(&name) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&entry_path) else {
                continue; // binary or unreadable
            };
            let uri = self.path_to_uri(&entry_path);
            for (i, line) in content.lines().enumerate() {
                let haystack = if case_insensitive {
                    line.to_lowercase()
                } else {
                    line.to_string()
                };
                if haystack.contains(needle) {
                    matches.push(GrepMatch {
                        uri: uri.clone(),
                        line: i + 1,
                        content: line.trim_end_matches('\r').to_string(),
                    });
                }
            }
        }
    }

    /// Pre-order walk matching `*` wildcards against each entry's base name.
    pub async fn glob(&self, uri: &str, pattern: &str) -> VikingResult<Vec<String>> {
        let _g = self.lock.read().await;
        let uri = self.normalize_uri(uri);
        let path = self.uri_to_path(&uri)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| self.io_error(e, &uri))?;
        if !meta.is_dir() {
            return Err(VikingError::NotADirectory(uri));
        }

        let mut results = Vec::new();
        self.glob_recursive(&path, pattern, &mut results);
        Ok(results)
    }

    fn glob_recursive(&self, dir: &Path, pattern: &str, results: &mut Vec<String>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let mut entries: Vec<_> = entries.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().to_string();
            let entry_path = entry.path();
            if match_pattern(&name, pattern) {
                results.push(self.path_to_uri(&entry_path));
            }
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                self.glob_recursive(&entry_path, pattern, results);
            }
        }
    }
}

async fn read_or_empty(path: &Path) -> String {
    tokio::fs::read_to_string(path).await.unwrap_or_default()
}

/// Match a name against a pattern where `*` matches any substring.
fn match_pattern(name: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return name == pattern;
    }
    let parts: Vec<&str> = pattern.split('*').collect();

    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !name.starts_with(part) {
                return false;
            }
            pos = part.len();
            continue;
        }
        match name[pos..].find(part) {
            Some(found) => pos = pos + found + part.len(),
            None => return false,
        }
    }
    // a pattern not ending in '*' must consume the tail
    if let Some(last) = parts.last() {
        if !last.is_empty() && !name.ends_with(last) {
            return false;
        }
    }
    true
}
