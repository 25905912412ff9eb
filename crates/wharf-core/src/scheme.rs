use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::error::InstallError;

/// Logical destination roots of a target environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemeRoot {
    Purelib,
    Platlib,
    Scripts,
    Data,
    Headers,
    Prefix,
}

impl SchemeRoot {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Purelib => "purelib",
            Self::Platlib => "platlib",
            Self::Scripts => "scripts",
            Self::Data => "data",
            Self::Headers => "headers",
            Self::Prefix => "prefix",
        }
    }

    fn from_data_dir_key(key: &str) -> Option<Self> {
        match key {
            "purelib" => Some(Self::Purelib),
            "platlib" => Some(Self::Platlib),
            "scripts" => Some(Self::Scripts),
            "data" => Some(Self::Data),
            "headers" => Some(Self::Headers),
            _ => None,
        }
    }
}

/// Absolute directory roots for one environment, supplied externally
/// and immutable for the duration of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheme {
    pub purelib: PathBuf,
    pub platlib: PathBuf,
    pub scripts: PathBuf,
    pub data: PathBuf,
    pub headers: PathBuf,
    pub prefix: PathBuf,
}

impl Scheme {
    #[must_use]
    pub fn root(&self, root: SchemeRoot) -> &Path {
        match root {
            SchemeRoot::Purelib => &self.purelib,
            SchemeRoot::Platlib => &self.platlib,
            SchemeRoot::Scripts => &self.scripts,
            SchemeRoot::Data => &self.data,
            SchemeRoot::Headers => &self.headers,
            SchemeRoot::Prefix => &self.prefix,
        }
    }
}

/// Map a wheel entry onto the scheme root it installs under.
///
/// Entries inside `<name>-<version>.data/<key>/` install under the
/// named root with that prefix stripped; everything else installs
/// under the wheel's declared root scheme.
///
/// # Errors
///
/// Returns [`InstallError::InvalidWheel`] for an unrecognized data
/// subdirectory.
pub fn determine_scheme(
    path: &str,
    data_dir: &str,
    root_scheme: SchemeRoot,
) -> Result<(SchemeRoot, String)> {
    let Some(rest) = path.strip_prefix(data_dir).and_then(|p| p.strip_prefix('/')) else {
        return Ok((root_scheme, path.to_string()));
    };
    let Some((key, relative)) = rest.split_once('/') else {
        return Err(InstallError::InvalidWheel(format!(
            "entry {path} sits directly inside the data directory"
        ))
        .into());
    };
    match SchemeRoot::from_data_dir_key(key) {
        Some(root) => Ok((root, relative.to_string())),
        None => Err(InstallError::InvalidWheel(format!(
            "unknown scheme key {key} in data directory entry {path}"
        ))
        .into()),
    }
}
