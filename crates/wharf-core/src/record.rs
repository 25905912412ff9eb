use std::io::{Read, Write};

use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};

/// One row of a distribution's RECORD manifest.
///
/// ```csv
/// foo/__init__.py,sha256=x_c8nmc4Huc-lKEsAXj78ZiyqSJ9hJ71j7vltY67icw,10509
/// foo-1.0.dist-info/RECORD,,
/// ```
///
/// A row with empty hash and size is either the RECORD file's own
/// self-referential entry or a file deliberately excluded from
/// integrity tracking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordEntry {
    pub path: String,
    pub hash: Option<String>,
    pub size: Option<u64>,
}

impl RecordEntry {
    /// An entry excluded from integrity tracking.
    #[must_use]
    pub fn untracked(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: None,
            size: None,
        }
    }
}

/// Parse a RECORD stream.
///
/// # Errors
///
/// Returns an error if a row is not valid three-column CSV.
pub fn read_record(reader: impl Read) -> Result<Vec<RecordEntry>> {
    ReaderBuilder::new()
        .has_headers(false)
        .escape(Some(b'"'))
        .from_reader(reader)
        .deserialize()
        .map(|row| {
            let entry: RecordEntry = row.context("malformed RECORD row")?;
            Ok(RecordEntry {
                // Some distributions ship absolute paths; strip the root.
                path: entry.path.trim_start_matches('/').to_string(),
                ..entry
            })
        })
        .collect()
}

/// Serialize records as RECORD CSV.
///
/// # Errors
///
/// Returns an error if the underlying writer fails.
pub fn write_record(writer: impl Write, records: &[RecordEntry]) -> Result<()> {
    let mut csv_writer = WriterBuilder::new().has_headers(false).from_writer(writer);
    for entry in records {
        csv_writer
            .serialize(entry)
            .with_context(|| format!("failed to serialize RECORD row for {}", entry.path))?;
    }
    csv_writer.flush().context("failed to flush RECORD")?;
    Ok(())
}
