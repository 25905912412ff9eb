use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dirs_next::home_dir;

use crate::scheme::Scheme;

const REFERRERS_FILE: &str = ".referrers";

/// One entry of the shared package cache: a full install of a wheel's
/// payload, owned once on disk and consumed by any number of
/// environments through pointer records.
///
/// The entry directory name is the wheel filename stem, which already
/// encodes name, version and tags, so keys are collision-free by
/// construction.
#[derive(Debug, Clone)]
pub struct CachedPackage {
    path: PathBuf,
}

impl CachedPackage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scheme whose every root is confined to this entry's directory.
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        Scheme {
            purelib: self.path.join("lib"),
            platlib: self.path.join("lib"),
            scripts: self.path.join("bin"),
            data: self.path.join("data"),
            headers: self.path.join("include"),
            prefix: self.path.clone(),
        }
    }

    /// The metadata-directory identifiers (absolute dist-info paths)
    /// of every environment currently consuming this entry.
    pub fn referrers(&self) -> Result<BTreeSet<String>> {
        let ledger = self.path.join(REFERRERS_FILE);
        if !ledger.is_file() {
            return Ok(BTreeSet::new());
        }
        let text = fs::read_to_string(&ledger)
            .with_context(|| format!("failed to read {}", ledger.display()))?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    pub fn add_referrer(&self, dist_info_dir: &str) -> Result<()> {
        let mut referrers = self.referrers()?;
        if referrers.insert(dist_info_dir.to_string()) {
            self.write_referrers(&referrers)?;
        }
        Ok(())
    }

    pub fn remove_referrer(&self, dist_info_dir: &str) -> Result<()> {
        let mut referrers = self.referrers()?;
        if referrers.remove(dist_info_dir) {
            self.write_referrers(&referrers)?;
        }
        Ok(())
    }

    /// Whether the ledger is empty, the precondition for a maintenance
    /// pass to reclaim the entry. Nothing here deletes automatically.
    pub fn is_evictable(&self) -> Result<bool> {
        Ok(self.referrers()?.is_empty())
    }

    fn write_referrers(&self, referrers: &BTreeSet<String>) -> Result<()> {
        fs::create_dir_all(&self.path)
            .with_context(|| format!("failed to create {}", self.path.display()))?;
        let ledger = self.path.join(REFERRERS_FILE);
        let mut text = referrers.iter().cloned().collect::<Vec<_>>().join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        fs::write(&ledger, text).with_context(|| format!("failed to write {}", ledger.display()))
    }
}

/// Determine the root directory holding shared package cache entries.
///
/// # Errors
///
/// Returns an error if the override path cannot be made absolute.
pub fn resolve_cache_root() -> Result<PathBuf> {
    if let Some(override_path) = env::var_os("WHARF_CACHE_PATH") {
        return absolutize(PathBuf::from(override_path));
    }
    let base = match home_dir() {
        Some(home) => home.join(".cache"),
        None => PathBuf::from("/tmp/wharf-cache"),
    };
    Ok(base.join("wharf").join("packages"))
}

fn absolutize(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(env::current_dir()
            .context("failed to resolve WHARF_CACHE_PATH")?
            .join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_tracks_referrers_in_both_directions() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let package = CachedPackage::new(temp.path().join("foo-1.0-py3-none-any"));

        assert!(package.is_evictable()?);
        package.add_referrer("/env-a/lib/foo-1.0.dist-info")?;
        package.add_referrer("/env-a/lib/foo-1.0.dist-info")?;
        package.add_referrer("/env-b/lib/foo-1.0.dist-info")?;
        assert_eq!(package.referrers()?.len(), 2);
        assert!(!package.is_evictable()?);

        package.remove_referrer("/env-a/lib/foo-1.0.dist-info")?;
        assert_eq!(package.referrers()?.len(), 1);
        package.remove_referrer("missing")?;
        assert_eq!(package.referrers()?.len(), 1);
        Ok(())
    }

    #[test]
    fn scheme_roots_stay_inside_the_entry() {
        let package = CachedPackage::new("/cache/foo-1.0-py3-none-any");
        let scheme = package.scheme();
        assert_eq!(scheme.purelib, PathBuf::from("/cache/foo-1.0-py3-none-any/lib"));
        assert_eq!(scheme.scripts, PathBuf::from("/cache/foo-1.0-py3-none-any/bin"));
        assert_eq!(scheme.prefix, PathBuf::from("/cache/foo-1.0-py3-none-any"));
    }
}
