use std::path::PathBuf;

/// Failures with install/uninstall-specific meaning.
///
/// Everything else (permissions, missing files, short reads) propagates
/// as plain I/O context through `anyhow`.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// The wheel fails structural validation before anything is written.
    #[error("invalid wheel: {0}")]
    InvalidWheel(String),
    /// An editable install's link pointer disagrees with the recorded
    /// location of the distribution. Removing the registry line anyway
    /// could corrupt an unrelated install, so the removal aborts.
    #[error(
        "link pointer in {pointer} does not match the recorded location {recorded}"
    )]
    LinkMismatch { pointer: PathBuf, recorded: PathBuf },
    /// Rollback was requested before anything had been stashed.
    #[error("nothing has been stashed yet; there is nothing to roll back")]
    NotStashed,
}
