use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use tempfile::TempDir;

use crate::cache::CachedPackage;
use crate::destination::resolve_record_path;
use crate::error::InstallError;
use crate::install::REFER_TO_FILE;
use crate::record::read_record;
use crate::scheme::Scheme;
use crate::wheel::{normalize_name, parse_entry_points, ScriptSection};

const PTH_REGISTRY: &str = "easy-install.pth";

/// How a distribution got into the environment, dispatched on by the
/// removal planner instead of ad hoc file probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallMode {
    /// A regular install owning everything its RECORD lists.
    Direct,
    /// An editable install: a pointer file redirects the loader at a
    /// source tree that must never be removed.
    Link { pointer: PathBuf },
}

/// An installed distribution as the removal planner sees it.
#[derive(Debug, Clone)]
pub struct InstalledDistribution {
    pub name: String,
    /// Recorded install location: the site directory for direct
    /// installs, the source tree for link installs.
    pub location: PathBuf,
    pub dist_info: PathBuf,
    pub mode: InstallMode,
}

impl InstalledDistribution {
    /// Locate a directly-installed distribution in the environment's
    /// site directory.
    ///
    /// # Errors
    ///
    /// Returns an error when no matching `.dist-info` directory exists.
    pub fn discover(name: &str, scheme: &Scheme) -> Result<Self> {
        let dist_info = find_dist_info(&scheme.purelib, name)?;
        Ok(Self {
            name: name.to_string(),
            location: scheme.purelib.clone(),
            dist_info,
            mode: InstallMode::Direct,
        })
    }

    /// Describe a link-mode (editable) install. The recorded location
    /// is the source tree the caller knows this install points at; the
    /// planner cross-checks it against the pointer file.
    #[must_use]
    pub fn linked(
        name: &str,
        location: impl Into<PathBuf>,
        pointer: impl Into<PathBuf>,
        dist_info: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.to_string(),
            location: location.into(),
            dist_info: dist_info.into(),
            mode: InstallMode::Link {
                pointer: pointer.into(),
            },
        }
    }
}

/// Everything an installed distribution owns: filesystem paths to
/// delete and registry lines to drop from the shared pth file, plus
/// the cache linkage discovered while scanning. Built once, consumed
/// once.
#[derive(Debug, Default)]
pub struct RemovalPlan {
    paths: BTreeSet<PathBuf>,
    pth_entries: BTreeSet<String>,
    cache_link: Option<CacheLink>,
}

#[derive(Debug, Clone)]
struct CacheLink {
    cache_dir: PathBuf,
    referrer: String,
}

impl RemovalPlan {
    #[must_use]
    pub fn paths(&self) -> &BTreeSet<PathBuf> {
        &self.paths
    }

    #[must_use]
    pub fn pth_entries(&self) -> &BTreeSet<String> {
        &self.pth_entries
    }

    /// The shared cache entry this install points at, if any.
    #[must_use]
    pub fn refers_to(&self) -> Option<&Path> {
        self.cache_link.as_ref().map(|link| link.cache_dir.as_path())
    }

    /// Add one owned path. A `.py` source also contributes its
    /// bytecode cache artifacts; a cache-linkage pointer file records
    /// the linkage on the plan.
    pub fn add_path(&mut self, path: &Path) -> Result<()> {
        let path = normalize_path(path);
        if path.extension().is_some_and(|ext| ext == "py") {
            for artifact in bytecode_artifacts(&path)? {
                self.paths.insert(artifact);
            }
        } else if path.file_name().is_some_and(|name| name == REFER_TO_FILE) && path.is_file() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let line = text.lines().next().unwrap_or("").trim();
            if !line.is_empty() {
                self.cache_link = Some(CacheLink {
                    cache_dir: PathBuf::from(line),
                    referrer: path
                        .parent()
                        .map(|parent| parent.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                });
            }
        }
        self.paths.insert(path);
        Ok(())
    }

    pub fn add_pth_entry(&mut self, line: impl Into<String>) {
        self.pth_entries.insert(line.into());
    }
}

/// Derive the full removal plan for an installed distribution.
///
/// # Errors
///
/// Returns [`InstallError::LinkMismatch`] when a link pointer's target
/// disagrees with the distribution's recorded location. Removing the
/// registry line anyway could corrupt other installs, so nothing is
/// removed.
pub fn plan_removal(dist: &InstalledDistribution, scheme: &Scheme) -> Result<RemovalPlan> {
    let mut plan = RemovalPlan::default();

    match &dist.mode {
        InstallMode::Link { pointer } => {
            let text = fs::read_to_string(pointer)
                .with_context(|| format!("failed to read link pointer {}", pointer.display()))?;
            let target = text.lines().next().unwrap_or("").trim().to_string();
            if normalize_path(Path::new(&target)) != normalize_path(&dist.location) {
                return Err(InstallError::LinkMismatch {
                    pointer: pointer.clone(),
                    recorded: dist.location.clone(),
                }
                .into());
            }
            plan.add_path(pointer)?;
            plan.add_pth_entry(target);
        }
        InstallMode::Direct => {
            let record_file = File::open(dist.dist_info.join("RECORD")).with_context(|| {
                format!("failed to open RECORD in {}", dist.dist_info.display())
            })?;
            for row in read_record(record_file)? {
                let location = resolve_record_path(&dist.location, &row.path);
                plan.add_path(&location)?;
                if location.extension().is_some_and(|ext| ext == "py") {
                    plan.add_path(&location.with_extension("pyo"))?;
                }
            }
        }
    }

    let bin_dir = &scheme.scripts;

    // Files declared through a metadata scripts directory.
    let scripts_meta = dist.dist_info.join("scripts");
    if scripts_meta.is_dir() {
        for entry in fs::read_dir(&scripts_meta)
            .with_context(|| format!("failed to list {}", scripts_meta.display()))?
        {
            let name = entry?.file_name();
            plan.add_path(&bin_dir.join(&name))?;
            if cfg!(windows) {
                let mut batch = name.clone();
                batch.push(".bat");
                plan.add_path(&bin_dir.join(batch))?;
            }
        }
    }

    // Wrappers generated for console and GUI entry points.
    let entry_points_file = dist.dist_info.join("entry_points.txt");
    if entry_points_file.is_file() {
        let text = fs::read_to_string(&entry_points_file)
            .with_context(|| format!("failed to read {}", entry_points_file.display()))?;
        for point in parse_entry_points(&text) {
            for wrapper in script_names(&point.name, point.section == ScriptSection::Gui) {
                plan.add_path(&bin_dir.join(wrapper))?;
            }
        }
    }

    Ok(plan)
}

/// An entry of the minimal rename set: either a single file or an
/// entire directory tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum RenameEntry {
    File(PathBuf),
    Tree(PathBuf),
}

impl RenameEntry {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::File(path) | Self::Tree(path) => path,
        }
    }
}

/// Collapse a set of files into the minimal set of rename operations.
///
/// A directory is substituted for its files only when every file
/// actually present under it is in the input set; a directory holding
/// anything else must keep its files listed individually so unrelated
/// content is never swept away. Shallower directories are evaluated
/// first, and directories already covered by a wildcard are skipped.
pub fn compress_for_rename(paths: &BTreeSet<PathBuf>) -> Result<BTreeSet<RenameEntry>> {
    let mut remaining = paths.clone();
    let mut parents: Vec<PathBuf> = paths
        .iter()
        .filter_map(|path| path.parent().map(Path::to_path_buf))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    parents.sort_by_key(|parent| parent.as_os_str().len());

    let mut wildcards: Vec<PathBuf> = Vec::new();
    for root in parents {
        if wildcards.iter().any(|wildcard| root.starts_with(wildcard)) {
            continue;
        }
        let on_disk = files_under(&root)?;
        if on_disk.is_subset(&remaining) {
            for file in &on_disk {
                remaining.remove(file);
            }
            wildcards.push(root);
        }
    }

    let mut entries: BTreeSet<RenameEntry> = remaining.into_iter().map(RenameEntry::File).collect();
    entries.extend(wildcards.into_iter().map(RenameEntry::Tree));
    Ok(entries)
}

/// Two-phase removal: stash everything reversibly, then commit or roll
/// back. `Planned → Stashed → {Committed, RolledBack}`.
pub struct StashedRemover {
    plan: RemovalPlan,
    scheme: Scheme,
    pth_file: PathBuf,
    saved_pth: Option<Vec<u8>>,
    stashed: Vec<(PathBuf, PathBuf)>,
    holding: HashMap<PathBuf, TempDir>,
    phase: Phase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Planned,
    Stashed,
    Committed,
    RolledBack,
}

impl StashedRemover {
    #[must_use]
    pub fn new(plan: RemovalPlan, scheme: Scheme) -> Self {
        let pth_file = scheme.purelib.join(PTH_REGISTRY);
        Self {
            plan,
            scheme,
            pth_file,
            saved_pth: None,
            stashed: Vec::new(),
            holding: HashMap::new(),
            phase: Phase::Planned,
        }
    }

    /// Reversibly remove everything in the plan: drop the registry
    /// lines (saving the original bytes first) and move owned paths
    /// into temporary holding areas.
    pub fn stash(&mut self) -> Result<()> {
        if self.phase != Phase::Planned {
            bail!("stash may only run once, from the planned state");
        }
        self.remove_pth_entries()?;
        self.stash_files()?;
        self.phase = Phase::Stashed;
        Ok(())
    }

    /// Make the removal permanent and release the cache linkage.
    pub fn commit(&mut self) -> Result<()> {
        if self.phase != Phase::Stashed {
            bail!("commit requires a completed stash");
        }
        self.discard_holding();
        self.saved_pth = None;
        self.stashed.clear();
        if let Some(link) = self.plan.cache_link.take() {
            tracing::debug!(cache = %link.cache_dir.display(), "unlinking from shared package cache");
            CachedPackage::new(link.cache_dir).remove_referrer(&link.referrer)?;
        }
        self.phase = Phase::Committed;
        Ok(())
    }

    /// Restore the registry file and every stashed path byte-for-byte.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::NotStashed`] when nothing has been
    /// stashed yet; the remover stays in the planned state.
    pub fn rollback(&mut self) -> Result<()> {
        match self.phase {
            Phase::Planned => {
                tracing::error!("rollback requested but nothing has been stashed");
                return Err(InstallError::NotStashed.into());
            }
            Phase::Stashed => {}
            Phase::Committed | Phase::RolledBack => bail!("removal already finished"),
        }
        if let Some(saved) = self.saved_pth.take() {
            fs::write(&self.pth_file, saved)
                .with_context(|| format!("failed to restore {}", self.pth_file.display()))?;
        }
        for (original, stashed_path) in std::mem::take(&mut self.stashed) {
            tracing::debug!(path = %original.display(), "restoring stashed path");
            match fs::symlink_metadata(&original) {
                Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(&original)
                    .with_context(|| format!("failed to clear {}", original.display()))?,
                Ok(_) => fs::remove_file(&original)
                    .with_context(|| format!("failed to clear {}", original.display()))?,
                Err(_) => {}
            }
            renames(&stashed_path, &original)?;
        }
        self.discard_holding();
        self.phase = Phase::RolledBack;
        Ok(())
    }

    fn remove_pth_entries(&mut self) -> Result<()> {
        if self.plan.pth_entries.is_empty() {
            return Ok(());
        }
        let saved = fs::read(&self.pth_file)
            .with_context(|| format!("failed to read {}", self.pth_file.display()))?;
        // Original bytes are captured before any mutation so rollback
        // can restore them exactly.
        self.saved_pth = Some(saved.clone());

        let endline = if saved.windows(2).any(|pair| pair == b"\r\n") {
            "\r\n"
        } else {
            "\n"
        };
        let text = String::from_utf8(saved)
            .with_context(|| format!("{} is not UTF-8", self.pth_file.display()))?;
        let mut lines: Vec<&str> = text.lines().collect();
        for entry in &self.plan.pth_entries {
            tracing::debug!(entry = %entry, "removing pth registry entry");
            let Some(position) = lines.iter().position(|line| line == entry) else {
                bail!(
                    "pth entry {entry} is missing from {}",
                    self.pth_file.display()
                );
            };
            lines.remove(position);
        }
        let mut output = lines.join(endline);
        output.push_str(endline);
        fs::write(&self.pth_file, output)
            .with_context(|| format!("failed to rewrite {}", self.pth_file.display()))?;
        Ok(())
    }

    fn stash_files(&mut self) -> Result<()> {
        let prefix = normalize_path(&self.scheme.prefix);
        for entry in compress_for_rename(&self.plan.paths)? {
            let path = entry.path().to_path_buf();
            if fs::symlink_metadata(&path).is_err() {
                continue;
            }
            let is_dir = path.is_dir() && !path.is_symlink();
            if !is_dir
                && path
                    .extension()
                    .is_some_and(|ext| ext == "pyc" || ext == "pyo")
            {
                // Disposable and cheap to regenerate, so never stashed.
                tracing::debug!(path = %path.display(), "deleting bytecode cache file");
                fs::remove_file(&path)
                    .with_context(|| format!("failed to delete {}", path.display()))?;
                continue;
            }
            let Some(root) = file_root(&path, &prefix) else {
                tracing::debug!(
                    path = %path.display(),
                    "path is outside the environment prefix, skipping"
                );
                continue;
            };
            if !self.holding.contains_key(&root) {
                let holding = tempfile::Builder::new()
                    .prefix("wharf-")
                    .suffix("-uninstall")
                    .tempdir()
                    .context("failed to create stash directory")?;
                self.holding.insert(root.clone(), holding);
            }
            let relative = path.strip_prefix(&root).unwrap_or(&path).to_path_buf();
            let stashed_path = self.holding[&root].path().join(relative);
            if is_dir && stashed_path.is_dir() {
                fs::remove_dir(&stashed_path)
                    .with_context(|| format!("failed to clear {}", stashed_path.display()))?;
            }
            tracing::debug!(
                from = %path.display(),
                to = %stashed_path.display(),
                "stashing for removal"
            );
            renames(&path, &stashed_path)?;
            self.stashed.push((path, stashed_path));
        }
        Ok(())
    }

    fn discard_holding(&mut self) {
        for (_, holding) in self.holding.drain() {
            if let Err(err) = holding.close() {
                tracing::debug!(error = %err, "failed to clean up stash directory");
            }
        }
    }
}

/// Every file currently on disk under `dir`, empty when `dir` does not
/// exist.
fn files_under(dir: &Path) -> Result<BTreeSet<PathBuf>> {
    let mut files = BTreeSet::new();
    if !dir.exists() {
        return Ok(files);
    }
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in
            fs::read_dir(&current).with_context(|| format!("failed to list {}", current.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                stack.push(entry.path());
            } else {
                files.insert(entry.path());
            }
        }
    }
    Ok(files)
}

/// The top-level directory under `base` that `path` falls under, `base`
/// itself for direct children, `None` for paths outside `base`.
fn file_root(path: &Path, base: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix(base).ok()?;
    let mut components = relative.components();
    let first = components.next()?;
    if components.next().is_some() {
        Some(base.join(first))
    } else {
        Some(base.to_path_buf())
    }
}

/// Bytecode caches paired with a `.py` source: the legacy sibling
/// `.pyc` plus any interpreter-tagged caches under `__pycache__/`.
fn bytecode_artifacts(source: &Path) -> Result<Vec<PathBuf>> {
    let mut artifacts = vec![source.with_extension("pyc")];
    let (Some(parent), Some(stem)) = (
        source.parent(),
        source.file_stem().and_then(|stem| stem.to_str()),
    ) else {
        return Ok(artifacts);
    };
    let cache_dir = parent.join("__pycache__");
    if !cache_dir.is_dir() {
        return Ok(artifacts);
    }
    let prefix = format!("{stem}.");
    for entry in fs::read_dir(&cache_dir)
        .with_context(|| format!("failed to list {}", cache_dir.display()))?
    {
        let path = entry?.path();
        let tagged = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(".pyc"));
        if tagged {
            artifacts.push(path);
        }
    }
    Ok(artifacts)
}

/// Lexically normalize a path: drop `.` segments and resolve `..`.
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Like a plain rename, but creates the target's parents, survives
/// filesystem-device boundaries, and prunes emptied parents of the
/// source.
fn renames(old: &Path, new: &Path) -> Result<()> {
    if let Some(parent) = new.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    move_path(old, new)?;
    if let Some(parent) = old.parent() {
        remove_empty_ancestors(parent);
    }
    Ok(())
}

fn move_path(old: &Path, new: &Path) -> Result<()> {
    match fs::rename(old, new) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => copy_then_delete(old, new),
        Err(err) => Err(err).with_context(|| {
            format!("failed to move {} to {}", old.display(), new.display())
        }),
    }
}

fn copy_then_delete(old: &Path, new: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(old)
        .with_context(|| format!("failed to stat {}", old.display()))?;
    if metadata.is_dir() {
        copy_tree(old, new)?;
        fs::remove_dir_all(old).with_context(|| format!("failed to delete {}", old.display()))
    } else {
        fs::copy(old, new)
            .with_context(|| format!("failed to copy {} to {}", old.display(), new.display()))?;
        fs::remove_file(old).with_context(|| format!("failed to delete {}", old.display()))
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("failed to list {}", src.display()))? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("failed to copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

fn remove_empty_ancestors(dir: &Path) {
    let mut current = Some(dir);
    while let Some(dir) = current {
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

fn script_names(name: &str, is_gui: bool) -> Vec<String> {
    let mut names = vec![name.to_string()];
    if cfg!(windows) {
        names.push(format!("{name}.exe"));
        names.push(format!("{name}.exe.manifest"));
        if is_gui {
            names.push(format!("{name}-script.pyw"));
        } else {
            names.push(format!("{name}-script.py"));
        }
    }
    names
}

fn find_dist_info(site: &Path, name: &str) -> Result<PathBuf> {
    let wanted = normalize_name(name);
    if site.is_dir() {
        for entry in
            fs::read_dir(site).with_context(|| format!("failed to list {}", site.display()))?
        {
            let path = entry?.path();
            if !path.is_dir() || path.extension().is_none_or(|ext| ext != "dist-info") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let dist_name = stem.rsplit_once('-').map_or(stem, |(name, _)| name);
            if normalize_name(dist_name) == wanted {
                return Ok(path);
            }
        }
    }
    bail!("{name} is not installed in {}", site.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn touch(path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        file.write_all(contents)?;
        Ok(())
    }

    #[test]
    fn compressor_wildcards_fully_owned_directories() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let dir = temp.path().join("pkg");
        let a = dir.join("a.py");
        let b = dir.join("sub/b.py");
        touch(&a, b"")?;
        touch(&b, b"")?;

        let paths: BTreeSet<PathBuf> = [a, b].into_iter().collect();
        let entries = compress_for_rename(&paths)?;
        assert_eq!(
            entries,
            [RenameEntry::Tree(dir)].into_iter().collect::<BTreeSet<_>>()
        );
        Ok(())
    }

    #[test]
    fn compressor_never_wildcards_a_directory_with_unowned_files() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let dir = temp.path().join("pkg");
        let a = dir.join("a.py");
        let b = dir.join("b.py");
        touch(&a, b"")?;
        touch(&b, b"")?;
        touch(&dir.join("keep.py"), b"")?;

        let paths: BTreeSet<PathBuf> = [a.clone(), b.clone()].into_iter().collect();
        let entries = compress_for_rename(&paths)?;
        assert_eq!(
            entries,
            [RenameEntry::File(a), RenameEntry::File(b)]
                .into_iter()
                .collect::<BTreeSet<_>>()
        );
        Ok(())
    }

    #[test]
    fn stash_then_rollback_restores_everything_byte_for_byte() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let env = temp.path().join("env");
        let scheme = crate::testutil::env_scheme(&env);
        let module = env.join("lib/pkg/mod.py");
        touch(&module, b"print('original')\n")?;
        touch(&env.join("lib/pkg/keep.py"), b"stays\n")?;
        let original_pth = b"/src/foo\r\n/src/other\r\n";
        touch(&env.join("lib/easy-install.pth"), original_pth)?;

        let mut plan = RemovalPlan::default();
        plan.add_path(&module)?;
        plan.add_pth_entry("/src/foo");

        let mut remover = StashedRemover::new(plan, scheme);
        remover.stash()?;
        assert!(!module.exists());
        let rewritten = fs::read(env.join("lib/easy-install.pth"))?;
        assert_eq!(rewritten, b"/src/other\r\n");

        remover.rollback()?;
        assert_eq!(fs::read(&module)?, b"print('original')\n");
        assert_eq!(fs::read(env.join("lib/easy-install.pth"))?, original_pth);
        Ok(())
    }

    #[test]
    fn rollback_before_stash_is_an_operator_error() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let env = temp.path().join("env");
        let scheme = crate::testutil::env_scheme(&env);
        let target = env.join("lib/solo.py");
        touch(&target, b"x\n")?;
        let mut plan = RemovalPlan::default();
        plan.add_path(&target)?;

        let mut remover = StashedRemover::new(plan, scheme);
        let err = remover.rollback().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InstallError>(),
            Some(InstallError::NotStashed)
        ));

        // The failed rollback leaves the remover usable.
        remover.stash()?;
        remover.commit()?;
        assert!(!target.exists());
        Ok(())
    }

    #[test]
    fn link_mode_uninstall_removes_pointer_and_registry_line_only() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let env = temp.path().join("env");
        let scheme = crate::testutil::env_scheme(&env);
        let source_tree = temp.path().join("src/foo");
        touch(&source_tree.join("foo/__init__.py"), b"lives here\n")?;

        let pointer = env.join("lib/foo.egg-link");
        touch(&pointer, format!("{}\n", source_tree.display()).as_bytes())?;
        touch(
            &env.join("lib/easy-install.pth"),
            format!("{}\n/src/unrelated\n", source_tree.display()).as_bytes(),
        )?;

        let dist = InstalledDistribution::linked(
            "foo",
            &source_tree,
            &pointer,
            env.join("lib/foo.egg-info"),
        );
        let plan = plan_removal(&dist, &scheme)?;
        let mut remover = StashedRemover::new(plan, scheme);
        remover.stash()?;
        remover.commit()?;

        assert!(!pointer.exists());
        let registry = fs::read_to_string(env.join("lib/easy-install.pth"))?;
        assert!(!registry.contains(&source_tree.display().to_string()));
        assert!(registry.contains("/src/unrelated"));
        // The link target itself is untouched.
        assert!(source_tree.join("foo/__init__.py").is_file());
        Ok(())
    }

    #[test]
    fn mismatched_link_pointer_aborts_before_any_removal() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let env = temp.path().join("env");
        let scheme = crate::testutil::env_scheme(&env);
        let pointer = env.join("lib/foo.egg-link");
        touch(&pointer, b"/somewhere/else\n")?;

        let dist = InstalledDistribution::linked(
            "foo",
            "/src/foo",
            &pointer,
            env.join("lib/foo.egg-info"),
        );
        let err = plan_removal(&dist, &scheme).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InstallError>(),
            Some(InstallError::LinkMismatch { .. })
        ));
        assert!(pointer.exists());
        Ok(())
    }

    #[test]
    fn paths_outside_the_prefix_are_skipped_not_deleted() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let env = temp.path().join("env");
        let scheme = crate::testutil::env_scheme(&env);
        let inside = env.join("lib/gone.py");
        let outside = temp.path().join("elsewhere/stays.txt");
        touch(&inside, b"")?;
        touch(&outside, b"do not touch\n")?;

        let mut plan = RemovalPlan::default();
        plan.add_path(&inside)?;
        plan.add_path(&outside)?;

        let mut remover = StashedRemover::new(plan, scheme);
        remover.stash()?;
        assert!(outside.is_file());
        remover.commit()?;
        assert!(outside.is_file());
        assert!(!inside.exists());
        Ok(())
    }

    #[test]
    fn bytecode_caches_are_deleted_immediately_and_never_restored() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let env = temp.path().join("env");
        let scheme = crate::testutil::env_scheme(&env);
        let module = env.join("lib/pkg/mod.py");
        let legacy = env.join("lib/pkg/mod.pyc");
        let versioned = env.join("lib/pkg/__pycache__/mod.cpython-311.pyc");
        touch(&module, b"source\n")?;
        touch(&legacy, b"legacy cache\n")?;
        touch(&versioned, b"versioned cache\n")?;
        // Unowned neighbours keep both directories from being
        // wildcarded, so the cache files are handled individually.
        touch(&env.join("lib/pkg/keep.py"), b"")?;
        touch(&env.join("lib/pkg/__pycache__/keep.cpython-311.pyc"), b"")?;

        let mut plan = RemovalPlan::default();
        plan.add_path(&module)?;
        assert!(plan.paths().contains(&legacy));
        assert!(plan.paths().contains(&versioned));

        let mut remover = StashedRemover::new(plan, scheme);
        remover.stash()?;
        assert!(!legacy.exists());
        assert!(!versioned.exists());

        remover.rollback()?;
        assert!(module.is_file());
        assert!(!legacy.exists());
        assert!(!versioned.exists());
        Ok(())
    }

    #[test]
    fn discovers_a_direct_install_by_normalized_name() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let env = temp.path().join("env");
        let scheme = crate::testutil::env_scheme(&env);
        fs::create_dir_all(env.join("lib/Foo_Bar-1.0.dist-info"))?;

        let dist = InstalledDistribution::discover("foo-bar", &scheme)?;
        assert_eq!(dist.dist_info, env.join("lib/Foo_Bar-1.0.dist-info"));
        assert_eq!(dist.mode, InstallMode::Direct);
        assert!(InstalledDistribution::discover("missing", &scheme).is_err());
        Ok(())
    }

    #[test]
    fn normalizes_paths_lexically() {
        assert_eq!(
            normalize_path(Path::new("/env/lib/../bin/./tool")),
            PathBuf::from("/env/bin/tool")
        );
    }
}
