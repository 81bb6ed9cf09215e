use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::SystemTime,
};

use parking_lot::RwLock;

use crate::error::{HashlateError, HashlateResult};

/// Where template text comes from.
pub trait Source: Send + Sync + fmt::Debug {
    fn content(&self) -> HashlateResult<Arc<str>>;

    /// Name used for resolving relative includes and in error locations.
    fn file_name(&self) -> Option<&str>;

    /// Key the engine caches the compiled template under, `None` to skip
    /// caching.
    fn cache_key(&self) -> Option<&str>;

    /// Whether the backing content changed since this source was created.
    fn is_modified(&self) -> bool;
}

/// Creates sources by name, for top level templates, `#include`, `#render`
/// and shared function files.
pub trait SourceFactory: Send + Sync + fmt::Debug {
    fn get_source(&self, base_path: Option<&Path>, file_name: &str) -> HashlateResult<Arc<dyn Source>>;
}

/// A template file on disk. Modification is detected through the file's
/// modified timestamp.
#[derive(Debug)]
pub struct FileSource {
    file_name: String,
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl FileSource {
    pub fn new(base_path: Option<&Path>, file_name: &str) -> HashlateResult<Self> {
        let relative = file_name.trim_start_matches('/');
        let path = base_path.map_or_else(|| PathBuf::from(file_name), |base| base.join(relative));
        let metadata = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HashlateError::missing_template(&path.display().to_string())
            } else {
                HashlateError::Io(e)
            }
        })?;
        if !metadata.is_file() {
            return Err(HashlateError::missing_template(&path.display().to_string()));
        }
        Ok(Self {
            file_name: file_name.to_owned(),
            last_modified: metadata.modified().ok(),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Source for FileSource {
    fn content(&self) -> HashlateResult<Arc<str>> {
        Ok(Arc::from(std::fs::read_to_string(&self.path)?))
    }

    fn file_name(&self) -> Option<&str> {
        Some(&self.file_name)
    }

    fn cache_key(&self) -> Option<&str> {
        Some(&self.file_name)
    }

    fn is_modified(&self) -> bool {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_or(true, |modified| Some(modified) != self.last_modified)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FileSourceFactory;

impl SourceFactory for FileSourceFactory {
    fn get_source(&self, base_path: Option<&Path>, file_name: &str) -> HashlateResult<Arc<dyn Source>> {
        Ok(Arc::new(FileSource::new(base_path, file_name)?))
    }
}

/// Template text held in memory. Never modified.
#[derive(Debug)]
pub struct StringSource {
    content: Arc<str>,
    cache: bool,
}

impl StringSource {
    /// With `cache` set, the content itself is the cache key, so equal strings
    /// share one compiled template.
    pub fn new<S: Into<Arc<str>>>(content: S, cache: bool) -> Self {
        Self {
            content: content.into(),
            cache,
        }
    }
}

impl Source for StringSource {
    fn content(&self) -> HashlateResult<Arc<str>> {
        Ok(self.content.clone())
    }

    fn file_name(&self) -> Option<&str> {
        None
    }

    fn cache_key(&self) -> Option<&str> {
        self.cache.then_some(&*self.content)
    }

    fn is_modified(&self) -> bool {
        false
    }
}

#[derive(Debug)]
struct MemoryEntry {
    content: RwLock<Arc<str>>,
    version: AtomicU64,
}

/// An in-memory file system of named templates. Clones share the same
/// files, so a handle kept after configuring an engine can update templates
/// and have dev mode pick the change up.
#[derive(Debug, Default, Clone)]
pub struct MemorySourceFactory {
    files: Arc<RwLock<HashMap<String, Arc<MemoryEntry>>>>,
}

impl MemorySourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a file. Replacing bumps the file's version, which
    /// marks every source created from it as modified.
    pub fn insert<N: Into<String>, C: Into<Arc<str>>>(&self, name: N, content: C) -> &Self {
        let name = name.into();
        let content = content.into();
        let mut files = self.files.write();
        match files.get(&name) {
            Some(entry) => {
                *entry.content.write() = content;
                entry.version.fetch_add(1, Ordering::SeqCst);
            }
            None => {
                files.insert(
                    name,
                    Arc::new(MemoryEntry {
                        content: RwLock::new(content),
                        version: AtomicU64::new(0),
                    }),
                );
            }
        }
        self
    }

    pub fn remove(&self, name: &str) -> bool {
        self.files.write().remove(name).is_some()
    }
}

#[derive(Debug)]
struct MemorySource {
    file_name: String,
    entry: Arc<MemoryEntry>,
    content: Arc<str>,
    version: u64,
}

impl Source for MemorySource {
    fn content(&self) -> HashlateResult<Arc<str>> {
        Ok(self.content.clone())
    }

    fn file_name(&self) -> Option<&str> {
        Some(&self.file_name)
    }

    fn cache_key(&self) -> Option<&str> {
        Some(&self.file_name)
    }

    fn is_modified(&self) -> bool {
        self.entry.version.load(Ordering::SeqCst) != self.version
    }
}

impl SourceFactory for MemorySourceFactory {
    fn get_source(&self, _base_path: Option<&Path>, file_name: &str) -> HashlateResult<Arc<dyn Source>> {
        let key = file_name.trim_start_matches('/');
        let entry = self
            .files
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| HashlateError::missing_template(file_name))?;
        let content = entry.content.read().clone();
        let version = entry.version.load(Ordering::SeqCst);
        Ok(Arc::new(MemorySource {
            file_name: key.to_owned(),
            entry,
            content,
            version,
        }))
    }
}

/// Resolves an `#include`/`#render` target against the including file.
/// Targets starting with `/` are taken from the template root.
pub(crate) fn resolve_path(current: Option<&str>, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_owned();
    }
    match current.and_then(|current| current.rfind('/').map(|i| current.get(..=i))) {
        Some(Some(dir)) => format!("{dir}{target}"),
        _ => target.to_owned(),
    }
}
