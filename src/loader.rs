//! Include/import path resolution (§4.7) and the optional process-wide
//! template cache (§5, §9 — "a design wart, not a requirement").

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::MextError;

/// Resolves an `@include` target: direct path, `.mext`-suffixed, or
/// relative to the including file's directory (with the same suffix
/// fallback retried there).
pub fn resolve_include_path(name: &str, template_fn: Option<&Path>) -> Option<PathBuf> {
    resolve_path(name, template_fn, true)
}

/// Resolves an `@import` target: direct path, or relative to the
/// including file's directory. No `.mext` suffix fallback for imports.
pub fn resolve_import_path(name: &str, template_fn: Option<&Path>) -> Option<PathBuf> {
    resolve_path(name, template_fn, false)
}

fn resolve_path(name: &str, template_fn: Option<&Path>, allow_mext_suffix: bool) -> Option<PathBuf> {
    let direct = PathBuf::from(name);
    if direct.exists() {
        return Some(direct);
    }
    if allow_mext_suffix && !name.ends_with(".mext") {
        let with_suffix = PathBuf::from(format!("{name}.mext"));
        if with_suffix.exists() {
            return Some(with_suffix);
        }
    }
    if let Some(base_dir) = template_fn.and_then(Path::parent) {
        let joined = base_dir.join(name);
        if joined.exists() {
            return Some(joined);
        }
        if allow_mext_suffix && !name.ends_with(".mext") {
            let joined_suffix = base_dir.join(format!("{name}.mext"));
            if joined_suffix.exists() {
                return Some(joined_suffix);
            }
        }
    }
    None
}

/// Loads raw file contents. Implementations can swap in a different
/// loader (e.g. one backed by an in-memory map for tests) via
/// `Parser::with_loader`.
pub trait TemplateLoader {
    fn load(&self, path: &Path) -> Result<String, MextError>;
}

/// The default loader: a plain filesystem read, optionally going through
/// a shared, thread-guarded, process-wide cache.
pub struct FileTemplateLoader {
    cache: Option<TemplateCache>,
}

impl FileTemplateLoader {
    pub fn new() -> Self {
        Self { cache: None }
    }

    pub fn with_cache(cache: TemplateCache) -> Self {
        Self { cache: Some(cache) }
    }
}

impl Default for FileTemplateLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateLoader for FileTemplateLoader {
    fn load(&self, path: &Path) -> Result<String, MextError> {
        if let Some(cache) = &self.cache {
            return cache.get_or_load(path);
        }
        read_file(path)
    }
}

fn read_file(path: &Path) -> Result<String, MextError> {
    std::fs::read_to_string(path).map_err(|source| MextError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// An unbounded, thread-guarded `path -> contents` cache. Optional: the
/// engine works correctly without it.
#[derive(Default)]
pub struct TemplateCache {
    entries: Mutex<HashMap<PathBuf, String>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(&self, path: &Path) -> Result<String, MextError> {
        if let Some(contents) = self.entries.lock().get(path) {
            return Ok(contents.clone());
        }
        let contents = read_file(path)?;
        self.entries.lock().insert(path.to_path_buf(), contents.clone());
        Ok(contents)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn resolves_direct_path() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let resolved = resolve_include_path(f.path().to_str().unwrap(), None);
        assert_eq!(resolved.as_deref(), Some(f.path()));
    }

    #[test]
    fn resolves_with_mext_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("partial.mext");
        std::fs::write(&target, "body").unwrap();
        let resolved = resolve_include_path(dir.path().join("partial").to_str().unwrap(), None);
        assert_eq!(resolved, Some(target));
    }

    #[test]
    fn resolves_relative_to_including_file() {
        let dir = tempfile::tempdir().unwrap();
        let including_file = dir.path().join("main.mext");
        std::fs::write(&including_file, "root").unwrap();
        let target = dir.path().join("child.mext");
        std::fs::write(&target, "child").unwrap();
        let resolved = resolve_include_path("child.mext", Some(&including_file));
        assert_eq!(resolved, Some(target));
    }

    #[test]
    fn missing_file_resolves_to_none() {
        assert_eq!(resolve_include_path("/definitely/not/here.mext", None), None);
    }

    #[test]
    fn cache_returns_same_contents_without_rereading() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "version one").unwrap();
        let cache = TemplateCache::new();
        let first = cache.get_or_load(f.path()).unwrap();
        assert_eq!(first, "version one");
        assert_eq!(cache.len(), 1);
    }
}
