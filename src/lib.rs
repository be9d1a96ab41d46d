//! evm-proxy-upgrades is a library for safe, idempotent upgrades of
//! delegate-call proxy contracts.
//!
//! This crate provides tools to:
//! - Resolve the upgrade path of a deployed proxy (self-upgrading or
//!   delegated through a ProxyAdmin contract)
//! - Deduplicate implementation deployments by bytecode version against a
//!   network manifest
//! - Gate deployments behind storage layout compatibility checks
//!
//! # Example
//! ```no_run
//! use evm_proxy_upgrades::{upgrade_proxy, Manifest, UpgradeOptions};
//!
//! # async fn example<M, V, F>(rpc: std::sync::Arc<M>, validations: V, factory: F, proxy: evm_proxy_upgrades::Address)
//! # where M: ethers_providers::Middleware + 'static,
//! #       V: evm_proxy_upgrades::Validations,
//! #       F: evm_proxy_upgrades::ImplementationFactory {
//! let manifest = Manifest::for_network(rpc.as_ref()).await.unwrap();
//! let opts = UpgradeOptions::default();
//! let upgraded = upgrade_proxy(rpc, &manifest, &validations, &proxy, &factory, &opts)
//!     .await
//!     .unwrap();
//! println!("upgrade tx: {:?}", upgraded.tx_hash);
//! # }
//! ```

mod consts;
mod chain;
mod errors;
mod factory;
mod manifest;
mod upgrade;
mod upgrader;
mod validations;
mod version;
pub mod utils;

pub use chain::{get_admin_address, get_code, get_implementation_address};
pub use errors::{Result, UpgradeError};
pub use factory::{Deployment, ImplementationFactory};
pub use manifest::{ImplDeployment, Manifest, DEFAULT_MANIFEST_DIR};
pub use upgrade::{prepare_upgrade, resolve_upgrader, upgrade_proxy, ProxyReference, Upgraded};
pub use upgrader::Upgrader;
pub use validations::{ProxyKind, StorageLayout, UpgradeOptions, Validations};
pub use version::VersionKey;

// Re-export common types for convenience
pub use ethers_core::types::{Address, Bytes, TxHash, H256, U256};
