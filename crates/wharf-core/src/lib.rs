#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod cache;
pub mod destination;
pub mod error;
pub mod install;
pub mod record;
pub mod scheme;
pub mod uninstall;
pub mod wheel;

#[cfg(test)]
pub(crate) mod testutil;

pub use cache::{resolve_cache_root, CachedPackage};
pub use destination::{InstallDestination, ScriptKind};
pub use error::InstallError;
pub use install::{install_wheel, install_wheel_with_cache};
pub use record::RecordEntry;
pub use scheme::{Scheme, SchemeRoot};
pub use uninstall::{
    compress_for_rename, plan_removal, InstallMode, InstalledDistribution, RemovalPlan,
    RenameEntry, StashedRemover,
};
pub use wheel::{normalize_name, EntryPoint, ScriptSection, WheelFile};
