use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use zip::ZipArchive;

use crate::error::InstallError;
use crate::scheme::SchemeRoot;

const DIST_INFO_SUFFIX: &str = ".dist-info";

/// One `name = module:attr` declaration from `entry_points.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub module: String,
    pub attr: String,
    pub section: ScriptSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptSection {
    Console,
    Gui,
}

/// A wheel opened for random access.
///
/// Validation happens at open time: the archive must contain exactly
/// one top-level `.dist-info` directory.
#[derive(Debug)]
pub struct WheelFile {
    path: PathBuf,
    archive: ZipArchive<File>,
    names: Vec<String>,
    dist_info_dir: String,
}

impl WheelFile {
    /// Open a wheel and resolve its metadata directory.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::InvalidWheel`] when no top-level
    /// `.dist-info` directory exists or when more than one does.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open wheel {}", path.display()))?;
        let archive = ZipArchive::new(file)
            .with_context(|| format!("failed to read wheel {}", path.display()))?;
        let names: Vec<String> = archive.file_names().map(String::from).collect();

        let candidates: BTreeSet<&str> = names
            .iter()
            .filter_map(|name| name.split('/').next())
            .filter(|top| top.ends_with(DIST_INFO_SUFFIX))
            .collect();
        let dist_info_dir = match candidates.len() {
            1 => (*candidates.iter().next().unwrap_or(&"")).to_string(),
            0 => {
                return Err(InstallError::InvalidWheel(format!(
                    "{} contains no .dist-info directory",
                    path.display()
                ))
                .into())
            }
            _ => {
                return Err(InstallError::InvalidWheel(format!(
                    "{} contains multiple .dist-info directories: {}",
                    path.display(),
                    candidates.into_iter().collect::<Vec<_>>().join(", ")
                ))
                .into())
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            archive,
            names,
            dist_info_dir,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn dist_info_dir(&self) -> &str {
        &self.dist_info_dir
    }

    /// Name of the `.data` directory paired with the metadata directory.
    #[must_use]
    pub fn data_dir(&self) -> String {
        format!(
            "{}.data",
            self.dist_info_dir.trim_end_matches(DIST_INFO_SUFFIX)
        )
    }

    /// Archive-relative path of the RECORD manifest.
    #[must_use]
    pub fn record_path(&self) -> String {
        format!("{}/RECORD", self.dist_info_dir)
    }

    /// Whether the metadata directory carries the named file.
    #[must_use]
    pub fn has_dist_info_file(&self, name: &str) -> bool {
        let wanted = format!("{}/{}", self.dist_info_dir, name);
        self.names.iter().any(|entry| *entry == wanted)
    }

    /// Read a metadata-directory-relative file in full.
    pub fn read_dist_info(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry_name = format!("{}/{}", self.dist_info_dir, name);
        let mut entry = self
            .archive
            .by_name(&entry_name)
            .with_context(|| format!("wheel entry {entry_name} is missing"))?;
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read wheel entry {entry_name}"))?;
        Ok(bytes)
    }

    /// Resolve the root scheme from the WHEEL tag file.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::InvalidWheel`] when the declared
    /// Wheel-Version major is unsupported.
    pub fn root_scheme(&mut self) -> Result<SchemeRoot> {
        let bytes = self.read_dist_info("WHEEL")?;
        let fields = parse_key_value_file(bytes.as_slice(), "WHEEL")?;

        let version = fields
            .get("Wheel-Version")
            .and_then(|values| values.first())
            .ok_or_else(|| {
                InstallError::InvalidWheel("WHEEL file is missing Wheel-Version".to_string())
            })?;
        let (major, _minor) = version.split_once('.').ok_or_else(|| {
            InstallError::InvalidWheel(format!("malformed Wheel-Version {version}"))
        })?;
        if major != "1" && major != "0" {
            return Err(InstallError::InvalidWheel(format!(
                "unsupported Wheel-Version {version}"
            ))
            .into());
        }

        let root_is_purelib = fields
            .get("Root-Is-Purelib")
            .and_then(|values| values.first())
            .is_some_and(|value| value.eq_ignore_ascii_case("true"));
        Ok(if root_is_purelib {
            SchemeRoot::Purelib
        } else {
            SchemeRoot::Platlib
        })
    }

    /// Console and GUI script declarations, empty when the wheel has
    /// no `entry_points.txt`.
    pub fn entry_points(&mut self) -> Result<Vec<EntryPoint>> {
        if !self.has_dist_info_file("entry_points.txt") {
            return Ok(Vec::new());
        }
        let bytes = self.read_dist_info("entry_points.txt")?;
        let text = String::from_utf8(bytes).context("entry_points.txt is not UTF-8")?;
        Ok(parse_entry_points(&text))
    }

    /// Visit every content entry except the RECORD manifest, in archive
    /// order. The visitor receives the archive-relative path, a reader
    /// over the entry's bytes, and the entry's unix mode when recorded.
    pub fn visit_contents<F>(&mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(&str, &mut dyn Read, Option<u32>) -> Result<()>,
    {
        let record_path = self.record_path();
        for index in 0..self.archive.len() {
            let mut entry = self
                .archive
                .by_index(index)
                .with_context(|| format!("failed to read wheel entry #{index}"))?;
            if entry.is_dir() || entry.name().ends_with('/') {
                continue;
            }
            let name = entry.name().to_string();
            if name == record_path {
                continue;
            }
            let mode = entry.unix_mode();
            visit(&name, &mut entry, mode)?;
        }
        Ok(())
    }
}

/// Canonical form of a distribution name: lowercase, with runs of
/// `-`, `_` and `.` collapsed to a single `-`.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut previous_was_separator = false;
    for ch in name.chars() {
        if matches!(ch, '-' | '_' | '.') {
            previous_was_separator = true;
        } else {
            if previous_was_separator && !normalized.is_empty() {
                normalized.push('-');
            }
            previous_was_separator = false;
            normalized.extend(ch.to_lowercase());
        }
    }
    normalized
}

/// Distribution name segment of a wheel filename stem.
#[must_use]
pub(crate) fn stem_distribution_name(stem: &str) -> &str {
    stem.split('-').next().unwrap_or(stem)
}

/// Parse a file of `Key: value` lines such as WHEEL or METADATA.
pub(crate) fn parse_key_value_file(
    reader: impl Read,
    filename: &str,
) -> Result<HashMap<String, Vec<String>>> {
    let mut fields: HashMap<String, Vec<String>> = HashMap::new();
    for (line_number, line) in BufReader::new(reader).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {filename}"))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once(':').ok_or_else(|| {
            InstallError::InvalidWheel(format!(
                "line {} of {filename} is not a key: value pair",
                line_number + 1
            ))
        })?;
        fields
            .entry(key.trim().to_string())
            .or_default()
            .push(value.trim().to_string());
    }
    Ok(fields)
}

/// Parse `entry_points.txt`: ini-like sections, each line
/// `name = module:attr`. Only the console and GUI script sections are
/// significant; an extras suffix on the target is tolerated.
pub(crate) fn parse_entry_points(text: &str) -> Vec<EntryPoint> {
    let mut points = Vec::new();
    let mut section = None;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = match header.trim() {
                "console_scripts" => Some(ScriptSection::Console),
                "gui_scripts" => Some(ScriptSection::Gui),
                _ => None,
            };
            continue;
        }
        let Some(current) = section else {
            continue;
        };
        let Some((name, target)) = line.split_once('=') else {
            continue;
        };
        let target = target.split('[').next().unwrap_or_default().trim();
        let Some((module, attr)) = target.split_once(':') else {
            continue;
        };
        points.push(EntryPoint {
            name: name.trim().to_string(),
            module: module.trim().to_string(),
            attr: attr.trim().to_string(),
            section: current,
        });
    }
    points
}
