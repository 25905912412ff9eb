use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::scheme::Scheme;

/// Write a zip archive with the given entries, in order.
pub(crate) fn write_wheel(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default();
    for (name, bytes) in entries {
        writer.start_file(*name, options)?;
        writer.write_all(bytes)?;
    }
    writer.finish()?;
    Ok(())
}

/// A small but complete wheel: payload, WHEEL tags, a console entry
/// point, and a RECORD.
pub(crate) fn foo_wheel(dir: &Path) -> Result<PathBuf> {
    let wheel = dir.join("foo-1.0-py3-none-any.whl");
    write_wheel(
        &wheel,
        &[
            ("foo/__init__.py", b"def hello():\n    return \"hi\"\n"),
            ("foo/cli.py", b"def main():\n    return 0\n"),
            (
                "foo-1.0.dist-info/METADATA",
                b"Metadata-Version: 2.1\nName: foo\nVersion: 1.0\n",
            ),
            (
                "foo-1.0.dist-info/WHEEL",
                b"Wheel-Version: 1.0\nGenerator: wharf-testutil\nRoot-Is-Purelib: true\nTag: py3-none-any\n",
            ),
            (
                "foo-1.0.dist-info/entry_points.txt",
                b"[console_scripts]\nfoo-cli = foo.cli:main\n",
            ),
            (
                "foo-1.0.dist-info/RECORD",
                b"foo/__init__.py,,\nfoo/cli.py,,\nfoo-1.0.dist-info/METADATA,,\nfoo-1.0.dist-info/WHEEL,,\nfoo-1.0.dist-info/entry_points.txt,,\nfoo-1.0.dist-info/RECORD,,\n",
            ),
        ],
    )?;
    Ok(wheel)
}

/// The conventional scheme layout used by the tests.
pub(crate) fn env_scheme(root: &Path) -> Scheme {
    Scheme {
        purelib: root.join("lib"),
        platlib: root.join("lib"),
        scripts: root.join("bin"),
        data: root.join("data"),
        headers: root.join("include"),
        prefix: root.to_path_buf(),
    }
}
