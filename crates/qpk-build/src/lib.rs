//! Producer side of QPK asset bundles
//!
//! Builds versioned bundles from analyzed assets, records every build in a
//! JSON ledger, and packages minimal patches between recorded builds.
//!
//! ```no_run
//! use qpk_build::{BuildOptions, BundleBuilder, DirectorySource, PatchOptions, VersionLedger};
//! use qpk_build::patch::generate_patch_between;
//!
//! # fn main() -> Result<(), qpk_build::LedgerError> {
//! let ledger = VersionLedger::new("dist", "main");
//! let builder = BundleBuilder::new(&ledger, BuildOptions::default());
//! let outcome = builder.build(Vec::new())?;
//!
//! if outcome.version.bundle_version > 1 {
//!     let source = DirectorySource::new("assets");
//!     generate_patch_between(
//!         &ledger,
//!         outcome.version.bundle_version - 1,
//!         outcome.version.bundle_version,
//!         &source,
//!         &PatchOptions::default(),
//!     )?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod builder;
pub mod diff;
pub mod error;
pub mod ledger;
pub mod patch;

pub use builder::{BuildOptions, BuildOutcome, BundleBuilder, SourceAsset};
pub use diff::{DiffSummary, analyze_differences};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{BuildLog, LoggedAsset, VersionInfo, VersionLedger, generate_build_number};
pub use patch::{
    ContainerSource, DirectorySource, PatchOptions, PatchOutcome, PayloadSource, generate_patch,
    patch_file_name,
};
