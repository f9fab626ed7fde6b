//! Filesystem loader: walks a file or project tree and yields source documents.
//!
//! Documents are read lazily, one per `next()` call. Files that cannot be
//! indexed produce a [`LoadWarning`] instead of aborting the walk.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::languages::{Lang, default_extensions, detect_language};

/// Default upper bound for a single file: 50 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Bytes inspected for NUL when sniffing binary content.
const BINARY_SNIFF_LEN: usize = 8000;

/// One ingested file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Path relative to the load base, `/`-separated; absolute outside it.
    pub path: String,
    pub raw_text: String,
    pub language: Lang,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum LoadWarningReason {
    #[error("binary content")]
    Binary,
    #[error("not valid UTF-8")]
    NotUtf8,
    #[error("file too large ({size} bytes, limit {limit})")]
    TooLarge { size: u64, limit: u64 },
    #[error("unreadable: {0}")]
    Unreadable(String),
    #[error("walk error: {0}")]
    Walk(String),
}

/// A file skipped by the loader. The batch continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{path}: {reason}")]
pub struct LoadWarning {
    pub path: String,
    pub reason: LoadWarningReason,
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Accepted extensions, lowercase, without the leading dot.
    pub extensions: Vec<String>,
    pub max_file_size: u64,
    pub include_hidden: bool,
    pub respect_gitignore: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            include_hidden: false,
            respect_gitignore: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Loader {
    config: LoaderConfig,
}

impl Loader {
    #[must_use]
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    /// Start loading `root`, which may be a single file or a directory.
    ///
    /// A directory is its own base; a lone file is recorded by its absolute
    /// path. See [`Loader::load_under`] to share a base across runs.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` does not exist or cannot be inspected.
    pub fn load(&self, root: &Path) -> Result<Documents> {
        self.load_under(root, None)
    }

    /// Start loading `root` with document paths relative to `base`.
    ///
    /// Files outside `base` are recorded by their absolute path, so two
    /// distinct files never share a document path.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` or `base` does not exist or cannot be inspected.
    pub fn load_under(&self, root: &Path, base: Option<&Path>) -> Result<Documents> {
        let root = std::fs::canonicalize(root)?;
        let meta = std::fs::metadata(&root)?;
        let base = match base {
            Some(base) => Some(std::fs::canonicalize(base)?),
            None if meta.is_dir() => Some(root.clone()),
            None => None,
        };
        let walk = ignore::WalkBuilder::new(&root)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .ignore(self.config.respect_gitignore)
            .parents(self.config.respect_gitignore)
            .require_git(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();
        Ok(Documents {
            root,
            base,
            walk,
            config: self.config.clone(),
        })
    }
}

/// Document path of `path`: relative to `base` and `/`-separated when it lies
/// under it, otherwise the path as given. Both should be canonical.
#[must_use]
pub fn document_path(path: &Path, base: Option<&Path>) -> String {
    match base.and_then(|b| path.strip_prefix(b).ok()) {
        Some(rel) => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        None => path.display().to_string(),
    }
}

/// Lazy sequence of loaded documents and per-file warnings.
pub struct Documents {
    root: PathBuf,
    base: Option<PathBuf>,
    walk: ignore::Walk,
    config: LoaderConfig,
}

impl std::fmt::Debug for Documents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Documents")
            .field("root", &self.root)
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl Documents {
    fn relative_path(&self, path: &Path) -> String {
        document_path(path, self.base.as_deref())
    }

    fn accepts(&self, path: &Path) -> Option<Lang> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if !self.config.extensions.iter().any(|e| *e == ext) {
            return None;
        }
        detect_language(path)
    }

    fn read(
        &self,
        path: &Path,
        rel: String,
        language: Lang,
    ) -> Option<std::result::Result<SourceDocument, LoadWarning>> {
        let warn = |reason| Some(Err(LoadWarning { path: rel.clone(), reason }));

        let size = match std::fs::metadata(path) {
            Ok(m) => m.len(),
            Err(e) => return warn(LoadWarningReason::Unreadable(e.to_string())),
        };
        if size > self.config.max_file_size {
            return warn(LoadWarningReason::TooLarge {
                size,
                limit: self.config.max_file_size,
            });
        }
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => return warn(LoadWarningReason::Unreadable(e.to_string())),
        };
        if bytes[..bytes.len().min(BINARY_SNIFF_LEN)].contains(&0) {
            return warn(LoadWarningReason::Binary);
        }
        let Ok(raw_text) = String::from_utf8(bytes) else {
            return warn(LoadWarningReason::NotUtf8);
        };
        Some(Ok(SourceDocument {
            path: rel,
            raw_text,
            language,
        }))
    }
}

impl Iterator for Documents {
    type Item = std::result::Result<SourceDocument, LoadWarning>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walk.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    return Some(Err(LoadWarning {
                        path: self.root.display().to_string(),
                        reason: LoadWarningReason::Walk(e.to_string()),
                    }));
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.path();
            let Some(language) = self.accepts(path) else {
                continue;
            };
            let rel = self.relative_path(path);
            if let Some(item) = self.read(path, rel, language) {
                return Some(item);
            }
        }
    }
}
