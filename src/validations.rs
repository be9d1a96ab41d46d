//! Seam to the compiler-artifact validation pipeline and safety engine.
//!
//! The crate never inspects validation data or storage layouts itself; it
//! only decides when the checks run relative to network-mutating actions.
//! Tooling supplies an implementation of [`Validations`] backed by its
//! compilation artifacts.

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::version::VersionKey;

/// Which proxy pattern the upgrade targets.
///
/// Only used to select the applicable unsafe-pattern rules in
/// [`Validations::assert_upgrade_safe`]; the upgrade path itself is always
/// derived from on-chain state, never from this hint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Transparent,
    Uups,
    #[default]
    Auto,
}

/// Per-call configuration. Each flag disables exactly one safety check;
/// the default runs them all.
#[derive(Clone, Debug, Default)]
pub struct UpgradeOptions {
    /// Unsafe code pattern tags the caller explicitly allows
    /// (e.g. "delegatecall", "selfdestruct").
    pub unsafe_allow: Vec<String>,
    /// Allow user-defined types in storage even when their layout cannot be
    /// compared structurally.
    pub unsafe_allow_custom_types: bool,
    /// Skip the storage layout compatibility gate entirely. The layouts are
    /// not fetched, the comparator is not invoked.
    pub unsafe_skip_storage_check: bool,
    pub kind: ProxyKind,
}

/// Opaque structural descriptor of a contract's persistent storage slots.
///
/// Produced and interpreted by the validation pipeline; this crate only
/// stores it in the manifest and hands it to the comparator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageLayout(pub serde_json::Value);

/// Validation registry plus safety engine, read from the tooling's compiler
/// artifacts.
pub trait Validations {
    /// Recovers the unlinked creation bytecode (link placeholders intact)
    /// that produced the given linked bytecode.
    fn unlinked_bytecode(&self, linked: &[u8]) -> Vec<u8>;

    /// Storage layout recorded for the given implementation version.
    fn storage_layout(&self, version: &VersionKey) -> Result<StorageLayout>;

    /// Fails with [`UpgradeError::UnsafeUpgrade`] if the implementation
    /// contains a disallowed pattern not covered by `opts.unsafe_allow`.
    fn assert_upgrade_safe(&self, version: &VersionKey, opts: &UpgradeOptions) -> Result<()>;

    /// Fails with [`UpgradeError::StorageCollision`] if replacing `old` with
    /// `new` would rearrange live storage incompatibly.
    fn assert_storage_upgrade_safe(
        &self,
        old: &StorageLayout,
        new: &StorageLayout,
        opts: &UpgradeOptions,
    ) -> Result<()>;
}
