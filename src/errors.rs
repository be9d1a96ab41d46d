//! Error types for the evm-proxy-upgrades crate.

use thiserror::Error;
use ethers_core::types::{Address, H256};

use crate::version::VersionKey;

/// Errors that can occur while preparing or dispatching a proxy upgrade.
///
/// Every variant is fatal for the current call: the remaining pipeline is
/// aborted and nothing is retried, since an earlier step may already have
/// submitted an irrevocable transaction.
#[derive(Error, Debug)]
pub enum UpgradeError {
    /// The on-chain proxy admin differs from the admin registered in the
    /// network manifest. The local registry is stale, corrupted or tampered
    /// with; no transaction is prepared.
    #[error("proxy admin {chain_admin} is not the admin registered in the network manifest ({manifest_admin})")]
    ManifestMismatch {
        chain_admin: Address,
        manifest_admin: Address,
    },

    /// The safety engine rejected the new implementation's code pattern.
    #[error("implementation {version} is not upgrade safe: {reason}")]
    UnsafeUpgrade {
        version: VersionKey,
        reason: String,
    },

    /// The new storage layout is incompatible with the active one.
    #[error("incompatible storage layout: {reason}")]
    StorageCollision { reason: String },

    /// The proxy's admin slot does not hold an address.
    #[error("storage slot {slot} of proxy {proxy} does not hold an address")]
    SlotNotAddress { proxy: Address, slot: H256 },

    /// No storage layout is recorded for a deployed implementation.
    #[error("no storage layout registered for implementation at {address}")]
    MissingLayout { address: Address },

    /// Manifest read/write failure.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// Implementation deployment failure.
    #[error("deployment failed: {0}")]
    Deploy(String),

    /// Transport/RPC failure, surfaced verbatim. Retriable only as a whole
    /// call, by the caller.
    #[error("RPC error: {0}")]
    Network(String),
}

/// Result type for upgrade operations
pub type Result<T> = std::result::Result<T, UpgradeError>;
