//! Network-scoped registry of implementation deployments.
//!
//! One JSON file per chain id records every implementation deployed through
//! this tooling, keyed by [`VersionKey`], together with the storage layout it
//! was validated against and the admin identity trusted for delegated
//! upgrades.
//!
//! The manifest is the single shared mutable resource of the crate. Two
//! locking layers keep it consistent within a process:
//! - a per-(chain, version) async mutex serializes [`Manifest::fetch_or_deploy`]
//!   callers, so at most one deployment per version key is ever in flight;
//! - a per-chain mutex makes each read-modify-write of the file atomic, so
//!   writers for different version keys never lose each other's records.
//!
//! Writes land in a temp file renamed over the manifest, so readers never
//! observe a torn file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::{env, fs};

use ethers_core::types::Address;
use ethers_providers::Middleware;
use futures::Future;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::chain::get_code;
use crate::errors::{Result, UpgradeError};
use crate::factory::Deployment;
use crate::validations::StorageLayout;
use crate::version::VersionKey;

/// Directory holding the per-network manifest files, unless overridden by
/// the `UPGRADES_MANIFEST_DIR` environment variable.
pub const DEFAULT_MANIFEST_DIR: &str = ".upgrades";

static VERSION_LOCKS: Lazy<StdMutex<HashMap<(u64, VersionKey), Arc<Mutex<()>>>>> =
    Lazy::new(|| StdMutex::new(HashMap::new()));

static NETWORK_LOCKS: Lazy<StdMutex<HashMap<u64, Arc<StdMutex<()>>>>> =
    Lazy::new(|| StdMutex::new(HashMap::new()));

fn version_lock(chain_id: u64, version: &VersionKey) -> Result<Arc<Mutex<()>>> {
    let mut locks = VERSION_LOCKS
        .lock()
        .map_err(|_| UpgradeError::Manifest("version lock table poisoned".to_string()))?;
    Ok(locks
        .entry((chain_id, *version))
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone())
}

fn network_lock(chain_id: u64) -> Result<Arc<StdMutex<()>>> {
    let mut locks = NETWORK_LOCKS
        .lock()
        .map_err(|_| UpgradeError::Manifest("network lock table poisoned".to_string()))?;
    Ok(locks
        .entry(chain_id)
        .or_insert_with(|| Arc::new(StdMutex::new(())))
        .clone())
}

/// Drops the caller's lock handle and removes the table entry when nobody
/// else holds it, so the tables do not grow with every version ever seen.
///
/// Two handles left means ours plus the table's; a waiter would hold a
/// third. The check runs under the table mutex, which is the only way to
/// obtain a new handle, so the entry cannot be revived concurrently.
fn release_version_lock(chain_id: u64, version: &VersionKey, lock: Arc<Mutex<()>>) {
    if let Ok(mut locks) = VERSION_LOCKS.lock() {
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&(chain_id, *version));
        }
    }
}

fn release_network_lock(chain_id: u64, lock: Arc<StdMutex<()>>) {
    if let Ok(mut locks) = NETWORK_LOCKS.lock() {
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&chain_id);
        }
    }
}

/// One implementation deployment recorded under a version key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImplDeployment {
    #[serde(flatten)]
    pub deployment: Deployment,
    pub layout: StorageLayout,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ManifestData {
    /// Admin identity trusted for delegated upgrades on this network.
    #[serde(skip_serializing_if = "Option::is_none")]
    admin: Option<Address>,
    /// Known implementation deployments, keyed by version key hex.
    #[serde(default)]
    impls: HashMap<String, ImplDeployment>,
}

/// Handle to the manifest file of one network.
#[derive(Clone, Debug)]
pub struct Manifest {
    chain_id: u64,
    path: PathBuf,
}

impl Manifest {
    /// Opens the manifest for the network the client is connected to, under
    /// the default manifest directory (or `UPGRADES_MANIFEST_DIR`).
    pub async fn for_network<M>(rpc: &M) -> Result<Self>
    where
        M: Middleware,
    {
        let root = env::var_os("UPGRADES_MANIFEST_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST_DIR));
        Self::for_network_in(rpc, root).await
    }

    /// Opens the manifest for the connected network under an explicit root
    /// directory.
    pub async fn for_network_in<M>(rpc: &M, root: impl AsRef<Path>) -> Result<Self>
    where
        M: Middleware,
    {
        let chain_id = rpc
            .get_chainid()
            .await
            .map_err(|e| UpgradeError::Network(e.to_string()))?
            .as_u64();
        let path = root.as_ref().join(format!("chain-{}.json", chain_id));
        debug!("manifest for chain {} at {:?}", chain_id, path);
        Ok(Self { chain_id, path })
    }

    /// Chain id this manifest is scoped to.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn read(&self) -> Result<ManifestData> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                UpgradeError::Manifest(format!("failed to parse {:?}: {}", self.path, e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ManifestData::default()),
            Err(e) => Err(UpgradeError::Manifest(format!(
                "failed to read {:?}: {}",
                self.path, e
            ))),
        }
    }

    fn write(&self, data: &ManifestData) -> Result<()> {
        let parent = self.path.parent().ok_or_else(|| {
            UpgradeError::Manifest(format!("manifest path {:?} has no parent", self.path))
        })?;
        fs::create_dir_all(parent)
            .map_err(|e| UpgradeError::Manifest(format!("failed to create {:?}: {}", parent, e)))?;

        let json = serde_json::to_vec_pretty(data)
            .map_err(|e| UpgradeError::Manifest(format!("failed to serialize manifest: {}", e)))?;

        // Temp file in the same directory, then rename: readers never see a
        // half-written manifest.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .map_err(|e| UpgradeError::Manifest(format!("failed to write {:?}: {}", tmp, e)))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| UpgradeError::Manifest(format!("failed to rename {:?}: {}", tmp, e)))
    }

    /// Atomic read-modify-write of this network's file.
    fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut ManifestData),
    {
        let lock = network_lock(self.chain_id)?;
        let result = match lock.lock() {
            Ok(_guard) => self.read().and_then(|mut data| {
                mutate(&mut data);
                self.write(&data)
            }),
            Err(_) => Err(UpgradeError::Manifest("manifest lock poisoned".to_string())),
        };
        release_network_lock(self.chain_id, lock);
        result
    }

    /// Admin identity trusted for delegated upgrades, if one is registered.
    pub fn get_admin(&self) -> Result<Option<Address>> {
        Ok(self.read()?.admin)
    }

    /// Registers the trusted admin for this network. Written by the proxy
    /// deployment flow; upgrades only read it.
    pub fn set_admin(&self, admin: Address) -> Result<()> {
        self.update(|data| data.admin = Some(admin))
    }

    /// Deployment recorded for a version key, if any.
    pub fn deployment_of(&self, version: &VersionKey) -> Result<Option<ImplDeployment>> {
        Ok(self.read()?.impls.get(&version.to_hex()).cloned())
    }

    /// Storage layout recorded for a deployed implementation address.
    pub fn storage_layout_for(&self, address: Address) -> Result<StorageLayout> {
        let data = self.read()?;
        data.impls
            .values()
            .find(|record| record.deployment.address == address)
            .map(|record| record.layout.clone())
            .ok_or(UpgradeError::MissingLayout { address })
    }

    /// Returns the implementation address for `version`, deploying it first
    /// if the manifest has no live record.
    ///
    /// A recorded address whose on-chain code has disappeared (network reset)
    /// counts as a miss and is overwritten. Concurrent callers for the same
    /// version key are serialized; the second observes the first's result
    /// instead of deploying again.
    pub async fn fetch_or_deploy<M, F, Fut>(
        &self,
        version: &VersionKey,
        rpc: &M,
        deploy: F,
    ) -> Result<Address>
    where
        M: Middleware,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(Deployment, StorageLayout)>>,
    {
        let lock = version_lock(self.chain_id, version)?;
        let result = {
            let _guard = lock.lock().await;
            self.fetch_or_deploy_locked(version, rpc, deploy).await
        };
        release_version_lock(self.chain_id, version, lock);
        result
    }

    async fn fetch_or_deploy_locked<M, F, Fut>(
        &self,
        version: &VersionKey,
        rpc: &M,
        deploy: F,
    ) -> Result<Address>
    where
        M: Middleware,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(Deployment, StorageLayout)>>,
    {
        if let Some(record) = self.read()?.impls.get(&version.to_hex()) {
            let code = get_code(rpc, record.deployment.address).await?;
            if !code.is_empty() {
                debug!(
                    "reusing implementation {:?} for version {}",
                    record.deployment.address, version
                );
                return Ok(record.deployment.address);
            }
            info!(
                "implementation {:?} recorded for version {} has no code on chain, redeploying",
                record.deployment.address, version
            );
        }

        let (deployment, layout) = deploy().await?;
        info!(
            "deployed implementation {:?} for version {}",
            deployment.address, version
        );
        let address = deployment.address;
        self.update(|data| {
            data.impls
                .insert(version.to_hex(), ImplDeployment { deployment, layout });
        })?;
        Ok(address)
    }
}
