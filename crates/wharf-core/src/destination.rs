use std::fs::{self, File};
use std::io::{Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use base64::prelude::{Engine as _, BASE64_URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

use crate::record::{self, RecordEntry};
use crate::scheme::{Scheme, SchemeRoot};
use crate::wheel::ScriptSection;

/// Script convention of the target interpreter's platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Posix,
    WinIa32,
    WinAmd64,
}

/// Writes byte streams into a target scheme and accumulates the
/// manifest records of everything written.
///
/// Overwrites are unconditional: a pre-existing file at a target path
/// is removed before the new bytes land, so a stale file from an
/// earlier install never lingers as an extra inode.
pub struct InstallDestination {
    scheme: Scheme,
    interpreter: String,
    script_kind: ScriptKind,
    record_root: SchemeRoot,
}

impl InstallDestination {
    #[must_use]
    pub fn new(
        scheme: Scheme,
        interpreter: impl Into<String>,
        script_kind: ScriptKind,
        record_root: SchemeRoot,
    ) -> Self {
        Self {
            scheme,
            interpreter: interpreter.into(),
            script_kind,
            record_root,
        }
    }

    #[must_use]
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Stream `reader` to `relative_path` under the named root.
    ///
    /// Returns the manifest record with the content hash and size; the
    /// record path is relative to the destination's record root.
    pub fn write_file(
        &self,
        root: SchemeRoot,
        relative_path: &str,
        reader: &mut dyn Read,
        mode: Option<u32>,
    ) -> Result<RecordEntry> {
        let target = self.scheme.root(root).join(relative_path);
        if fs::symlink_metadata(&target).is_ok() {
            fs::remove_file(&target)
                .with_context(|| format!("failed to replace {}", target.display()))?;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut output = File::create(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut buffer = vec![0_u8; 32 * 1024];
        loop {
            let read = reader
                .read(&mut buffer)
                .with_context(|| format!("failed to read source for {relative_path}"))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            output
                .write_all(&buffer[..read])
                .with_context(|| format!("failed to write {}", target.display()))?;
            size += read as u64;
        }

        #[cfg(unix)]
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode))
                .with_context(|| format!("failed to set mode on {}", target.display()))?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        Ok(RecordEntry {
            path: self.record_path_for(&target),
            hash: Some(format!(
                "sha256={}",
                BASE64_URL_SAFE_NO_PAD.encode(hasher.finalize())
            )),
            size: Some(size),
        })
    }

    /// Synthesize a launcher for one entry point.
    ///
    /// On posix this is a single executable file named after the entry
    /// point with the interpreter on its shebang line. On Windows the
    /// body lands in `<name>-script.py` (`.pyw` for GUI entry points);
    /// pairing it with a trampoline executable is the platform
    /// packager's concern.
    pub fn write_script(
        &self,
        name: &str,
        module: &str,
        attr: &str,
        section: ScriptSection,
    ) -> Result<RecordEntry> {
        let import_name = attr.split('.').next().unwrap_or(attr);
        let body = format!(
            "#!{interpreter}\n\
             # -*- coding: utf-8 -*-\n\
             import re\n\
             import sys\n\
             from {module} import {import_name}\n\
             if __name__ == \"__main__\":\n\
            \x20   sys.argv[0] = re.sub(r\"(-script\\.pyw|\\.exe)?$\", \"\", sys.argv[0])\n\
            \x20   sys.exit({attr}())\n",
            interpreter = self.interpreter,
        );
        let (filename, mode) = match (self.script_kind, section) {
            (ScriptKind::Posix, _) => (name.to_string(), Some(0o755)),
            (_, ScriptSection::Console) => (format!("{name}-script.py"), None),
            (_, ScriptSection::Gui) => (format!("{name}-script.pyw"), None),
        };
        self.write_file(
            SchemeRoot::Scripts,
            &filename,
            &mut Cursor::new(body.into_bytes()),
            mode,
        )
    }

    /// Write an installer-generated metadata file into the metadata
    /// directory.
    pub fn write_metadata_file(
        &self,
        root: SchemeRoot,
        dist_info_dir: &str,
        filename: &str,
        contents: &[u8],
    ) -> Result<RecordEntry> {
        self.write_file(
            root,
            &format!("{dist_info_dir}/{filename}"),
            &mut Cursor::new(contents.to_vec()),
            None,
        )
    }

    /// Write the RECORD manifest as the final artifact of an install.
    ///
    /// The manifest's own self-referential entry is appended last with
    /// no hash or size.
    pub fn finalize_installation(
        &self,
        record_path: &str,
        mut records: Vec<RecordEntry>,
    ) -> Result<()> {
        records.push(RecordEntry::untracked(record_path));
        let target = self.scheme.root(self.record_root).join(record_path);
        if fs::symlink_metadata(&target).is_ok() {
            fs::remove_file(&target)
                .with_context(|| format!("failed to replace {}", target.display()))?;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let output = File::create(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        record::write_record(output, &records)
    }

    fn record_path_for(&self, target: &Path) -> String {
        relative_path_string(self.scheme.root(self.record_root), target)
    }
}

/// Lexical relative path from `base` to `target`, joined with `/` the
/// way RECORD rows spell paths.
fn relative_path_string(base: &Path, target: &Path) -> String {
    let base: Vec<Component<'_>> = base.components().collect();
    let target: Vec<Component<'_>> = target.components().collect();
    let common = base
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<String> = Vec::new();
    for _ in common..base.len() {
        parts.push("..".to_string());
    }
    for component in &target[common..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }
    parts.join("/")
}

/// Resolve a RECORD row's path back to an absolute filesystem path.
pub(crate) fn resolve_record_path(base: &Path, record_path: &str) -> PathBuf {
    let mut resolved = base.to_path_buf();
    for part in record_path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                resolved.pop();
            }
            other => resolved.push(other),
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::env_scheme;

    fn destination(root: &Path) -> InstallDestination {
        InstallDestination::new(
            env_scheme(root),
            "/usr/bin/python3",
            ScriptKind::Posix,
            SchemeRoot::Purelib,
        )
    }

    #[test]
    fn second_write_fully_replaces_the_first() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let dest = destination(temp.path());

        let first = dest.write_file(
            SchemeRoot::Purelib,
            "foo/mod.py",
            &mut Cursor::new(b"first version".to_vec()),
            None,
        )?;
        let second = dest.write_file(
            SchemeRoot::Purelib,
            "foo/mod.py",
            &mut Cursor::new(b"v2".to_vec()),
            None,
        )?;

        assert_eq!(first.path, second.path);
        assert_eq!(second.size, Some(2));
        let on_disk = fs::read(temp.path().join("lib/foo/mod.py"))?;
        assert_eq!(on_disk, b"v2");
        Ok(())
    }

    #[test]
    fn records_scripts_relative_to_the_record_root() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let dest = destination(temp.path());
        let entry = dest.write_script("foo-cli", "foo.cli", "main", ScriptSection::Console)?;
        assert_eq!(entry.path, "../bin/foo-cli");

        let script = fs::read_to_string(temp.path().join("bin/foo-cli"))?;
        assert!(script.starts_with("#!/usr/bin/python3\n"));
        assert!(script.contains("from foo.cli import main"));
        assert!(script.contains("sys.exit(main())"));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(temp.path().join("bin/foo-cli"))?.permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
        Ok(())
    }

    #[test]
    fn windows_gui_scripts_use_the_pyw_suffix() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let dest = InstallDestination::new(
            env_scheme(temp.path()),
            "C:\\python\\python.exe",
            ScriptKind::WinAmd64,
            SchemeRoot::Purelib,
        );
        dest.write_script("foo-gui", "foo.gui", "run", ScriptSection::Gui)?;
        assert!(temp.path().join("bin/foo-gui-script.pyw").is_file());
        Ok(())
    }

    #[test]
    fn finalize_appends_the_untracked_self_entry_last() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let dest = destination(temp.path());
        let written = dest.write_file(
            SchemeRoot::Purelib,
            "foo/__init__.py",
            &mut Cursor::new(b"x = 1\n".to_vec()),
            None,
        )?;
        dest.finalize_installation("foo-1.0.dist-info/RECORD", vec![written])?;

        let record_file = File::open(temp.path().join("lib/foo-1.0.dist-info/RECORD"))?;
        let rows = record::read_record(record_file)?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].path, "foo/__init__.py");
        assert!(rows[0].hash.as_deref().is_some_and(|h| h.starts_with("sha256=")));
        assert_eq!(rows.last().map(|r| r.path.as_str()), Some("foo-1.0.dist-info/RECORD"));
        assert_eq!(rows[1].hash, None);
        assert_eq!(rows[1].size, None);
        Ok(())
    }

    #[test]
    fn resolves_record_paths_with_parent_segments() {
        let resolved = resolve_record_path(Path::new("/env/lib"), "../bin/foo-cli");
        assert_eq!(resolved, PathBuf::from("/env/bin/foo-cli"));
    }
}
