use std::fs;
use std::io::Cursor;
use std::path::Path;

use anyhow::{anyhow, Result};

use crate::cache::CachedPackage;
use crate::destination::{InstallDestination, ScriptKind};
use crate::scheme::{determine_scheme, Scheme};
use crate::wheel::{normalize_name, stem_distribution_name, WheelFile};

const INSTALLER_NAME: &str = concat!("wharf ", env!("CARGO_PKG_VERSION"));
pub(crate) const REFER_TO_FILE: &str = "REFER_TO";

/// Install a wheel directly into the given scheme.
///
/// Streams every content entry into place, generates launcher scripts
/// for declared entry points, records the installer identity, and
/// finalizes the RECORD manifest last. An interrupted run leaves the
/// environment with an unfinalized manifest; the caller should treat
/// that as needing reinstall.
pub fn install_wheel(
    wheel: &Path,
    scheme: &Scheme,
    interpreter: &str,
    script_kind: ScriptKind,
) -> Result<()> {
    tracing::debug!(wheel = %wheel.display(), "installing wheel");
    let mut source = WheelFile::open(wheel)?;
    let root_scheme = source.root_scheme()?;
    let destination =
        InstallDestination::new(scheme.clone(), interpreter, script_kind, root_scheme);
    let dist_info_dir = source.dist_info_dir().to_string();
    let data_dir = source.data_dir();
    let mut records = Vec::new();

    for point in source.entry_points()? {
        records.push(destination.write_script(
            &point.name,
            &point.module,
            &point.attr,
            point.section,
        )?);
    }

    source.visit_contents(|path, reader, mode| {
        let (root, relative) = determine_scheme(path, &data_dir, root_scheme)?;
        records.push(destination.write_file(root, &relative, reader, mode)?);
        Ok(())
    })?;

    records.push(destination.write_metadata_file(
        root_scheme,
        &dist_info_dir,
        "INSTALLER",
        INSTALLER_NAME.as_bytes(),
    )?);
    destination.finalize_installation(&source.record_path(), records)
}

/// Install a wheel through the shared package cache.
///
/// The payload is materialized into the cache entry at most once; the
/// requesting environment then receives only a `.pth` pointer at the
/// cache's library root, its own launcher scripts, and the per-env
/// metadata files. Installing the same wheel into N environments keeps
/// exactly one on-disk copy of the payload.
pub fn install_wheel_with_cache(
    wheel: &Path,
    scheme: &Scheme,
    cache_root: &Path,
    interpreter: &str,
    script_kind: ScriptKind,
) -> Result<()> {
    let stem = wheel
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| anyhow!("wheel path {} has no usable filename stem", wheel.display()))?;
    let package = CachedPackage::new(cache_root.join(stem));
    if !package.path().is_dir() {
        tracing::debug!(
            cache = %package.path().display(),
            "materializing wheel payload into the shared cache"
        );
        fs::create_dir_all(package.path())?;
        install_wheel(wheel, &package.scheme(), interpreter, script_kind)?;
    }
    install_from_cache(wheel, stem, scheme, &package, interpreter, script_kind)
}

fn install_from_cache(
    wheel: &Path,
    stem: &str,
    scheme: &Scheme,
    package: &CachedPackage,
    interpreter: &str,
    script_kind: ScriptKind,
) -> Result<()> {
    let mut source = WheelFile::open(wheel)?;
    let root_scheme = source.root_scheme()?;
    let destination =
        InstallDestination::new(scheme.clone(), interpreter, script_kind, root_scheme);
    let dist_info_dir = source.dist_info_dir().to_string();
    let dist_info_prefix = format!("{dist_info_dir}/");
    let data_dir = source.data_dir();
    let mut records = Vec::new();

    // Scripts are never shared: interpreter paths differ per env.
    for point in source.entry_points()? {
        records.push(destination.write_script(
            &point.name,
            &point.module,
            &point.attr,
            point.section,
        )?);
    }

    // Only .pth entries and the metadata directory are copied verbatim;
    // the bulk payload stays in the cache.
    source.visit_contents(|path, reader, mode| {
        if !(path.ends_with(".pth") || path.starts_with(&dist_info_prefix)) {
            return Ok(());
        }
        let (root, relative) = determine_scheme(path, &data_dir, root_scheme)?;
        records.push(destination.write_file(root, &relative, reader, mode)?);
        Ok(())
    })?;

    // The pointer record that redirects the module loader into the
    // cache payload.
    let pointer_name = format!("{}.pth", normalize_name(stem_distribution_name(stem)));
    let cache_lib = package.scheme().purelib;
    records.push(destination.write_file(
        root_scheme,
        &pointer_name,
        &mut Cursor::new(format!("{}\n", cache_lib.display()).into_bytes()),
        None,
    )?);

    records.push(destination.write_metadata_file(
        root_scheme,
        &dist_info_dir,
        "INSTALLER",
        INSTALLER_NAME.as_bytes(),
    )?);
    records.push(destination.write_metadata_file(
        root_scheme,
        &dist_info_dir,
        REFER_TO_FILE,
        package.path().to_string_lossy().as_bytes(),
    )?);

    destination.finalize_installation(&source.record_path(), records)?;

    let referrer = scheme.root(root_scheme).join(&dist_info_dir);
    package.add_referrer(&referrer.to_string_lossy())?;
    Ok(())
}
