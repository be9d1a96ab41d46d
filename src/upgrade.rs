//! Upgrade orchestration.
//!
//! The full flow for one call, in order: resolve the version key, run the
//! safety gates, fetch or deploy the implementation, resolve the upgrade
//! path from on-chain state, verify the manifest admin (delegated path
//! only), dispatch the upgrade transaction. Any failure aborts the rest of
//! the pipeline; nothing is retried.

use std::sync::Arc;

use ethers_contract::Contract;
use ethers_core::types::{Address, TxHash};
use ethers_providers::Middleware;
use tracing::{debug, info};

use crate::chain::{get_admin_address, get_code, get_implementation_address};
use crate::errors::{Result, UpgradeError};
use crate::factory::ImplementationFactory;
use crate::manifest::Manifest;
use crate::upgrader::Upgrader;
use crate::validations::{UpgradeOptions, Validations};
use crate::version::VersionKey;

/// Anything that can stand for a proxy: a raw address or a live contract
/// handle.
pub trait ProxyReference {
    fn proxy_address(&self) -> Address;
}

impl ProxyReference for Address {
    fn proxy_address(&self) -> Address {
        *self
    }
}

impl<M: Middleware> ProxyReference for Contract<M> {
    fn proxy_address(&self) -> Address {
        self.address()
    }
}

/// Result of [`upgrade_proxy`]: the proxy attached to the new
/// implementation's ABI, carrying the upgrade transaction so the caller can
/// await confirmation independently.
#[derive(Clone, Debug)]
pub struct Upgraded<H> {
    pub contract: H,
    pub tx_hash: TxHash,
}

/// Selects the upgrade path for a proxy from on-chain state.
///
/// The admin slot holding a plain account (no code) means the proxy manages
/// its own upgrades; a contract there is a ProxyAdmin and the call must be
/// delegated through it, but only if it matches the admin registered in the
/// network manifest. The path is never assumed from configuration.
pub async fn resolve_upgrader<M>(rpc: &M, manifest: &Manifest, proxy: Address) -> Result<Upgrader>
where
    M: Middleware,
{
    let chain_admin = get_admin_address(rpc, proxy).await?;
    let admin_code = get_code(rpc, chain_admin).await?;

    if admin_code.is_empty() {
        debug!("admin slot of {:?} holds a plain account, direct path", proxy);
        return Ok(Upgrader::Direct { proxy });
    }

    let manifest_admin = manifest.get_admin()?;
    if manifest_admin != Some(chain_admin) {
        return Err(UpgradeError::ManifestMismatch {
            chain_admin,
            manifest_admin: manifest_admin.unwrap_or_default(),
        });
    }

    debug!(
        "admin slot of {:?} holds ProxyAdmin {:?}, delegated path",
        proxy, chain_admin
    );
    Ok(Upgrader::Delegated {
        admin: chain_admin,
        proxy,
    })
}

/// Runs version resolution, the safety gates and the deployment cache for
/// one implementation. Returns its address without touching the proxy.
async fn deploy_impl<M, V, F>(
    rpc: &M,
    manifest: &Manifest,
    validations: &V,
    factory: &F,
    opts: &UpgradeOptions,
    proxy: Option<Address>,
) -> Result<Address>
where
    M: Middleware,
    V: Validations,
    F: ImplementationFactory,
{
    let linked = factory.bytecode();
    let unlinked = validations.unlinked_bytecode(&linked);
    let version = VersionKey::of(&unlinked, &linked);
    debug!("implementation version {}", version);

    let layout = validations.storage_layout(&version)?;
    validations.assert_upgrade_safe(&version, opts)?;

    if let Some(proxy) = proxy {
        if !opts.unsafe_skip_storage_check {
            let current_impl = get_implementation_address(rpc, proxy).await?;
            let current_layout = manifest.storage_layout_for(current_impl)?;
            validations.assert_storage_upgrade_safe(&current_layout, &layout, opts)?;
        }
    }

    manifest
        .fetch_or_deploy(&version, rpc, || async move {
            let deployment = factory.deploy().await?;
            Ok((deployment, layout))
        })
        .await
}

/// Deploys (or reuses) the new implementation for a proxy without issuing
/// the upgrade transaction. Returns the implementation address.
pub async fn prepare_upgrade<M, V, F, P>(
    rpc: &M,
    manifest: &Manifest,
    validations: &V,
    proxy: &P,
    factory: &F,
    opts: &UpgradeOptions,
) -> Result<Address>
where
    M: Middleware,
    V: Validations,
    F: ImplementationFactory,
    P: ProxyReference,
{
    let proxy_address = proxy.proxy_address();
    deploy_impl(rpc, manifest, validations, factory, opts, Some(proxy_address)).await
}

/// Runs the full upgrade flow for a proxy: safety gates, implementation
/// deployment, path resolution, manifest guard and transaction dispatch.
pub async fn upgrade_proxy<M, V, F, P>(
    rpc: Arc<M>,
    manifest: &Manifest,
    validations: &V,
    proxy: &P,
    factory: &F,
    opts: &UpgradeOptions,
) -> Result<Upgraded<F::Handle>>
where
    M: Middleware + 'static,
    V: Validations,
    F: ImplementationFactory,
    P: ProxyReference,
{
    let proxy_address = proxy.proxy_address();

    let next_impl = deploy_impl(
        rpc.as_ref(),
        manifest,
        validations,
        factory,
        opts,
        Some(proxy_address),
    )
    .await?;

    let upgrader = resolve_upgrader(rpc.as_ref(), manifest, proxy_address).await?;
    let tx_hash = upgrader.apply(rpc, next_impl).await?;
    info!(
        "upgraded proxy {:?} to implementation {:?} in tx {:?}",
        proxy_address, next_impl, tx_hash
    );

    Ok(attach_upgraded(factory, proxy_address, tx_hash))
}

/// Binds the dispatched transaction to the proxy handle handed back to the
/// caller. The handle is attached at the proxy address, not the new
/// implementation: the proxy keeps its address and storage across upgrades.
fn attach_upgraded<F>(factory: &F, proxy: Address, tx_hash: TxHash) -> Upgraded<F::Handle>
where
    F: ImplementationFactory,
{
    Upgraded {
        contract: factory.attach(proxy),
        tx_hash,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::factory::Deployment;
    use crate::utils::address_to_h256;
    use crate::validations::StorageLayout;
    use async_trait::async_trait;
    use ethers_core::types::{Bytes, U256};
    use ethers_providers::{MockProvider, Provider};

    struct TestValidations {
        layouts: HashMap<String, StorageLayout>,
        unsafe_pattern: Option<String>,
    }

    impl TestValidations {
        fn new() -> Self {
            Self {
                layouts: HashMap::new(),
                unsafe_pattern: None,
            }
        }

        fn with_layout(mut self, version: &VersionKey, layout: serde_json::Value) -> Self {
            self.layouts.insert(version.to_hex(), StorageLayout(layout));
            self
        }
    }

    impl Validations for TestValidations {
        fn unlinked_bytecode(&self, linked: &[u8]) -> Vec<u8> {
            linked.to_vec()
        }

        fn storage_layout(&self, version: &VersionKey) -> Result<StorageLayout> {
            self.layouts
                .get(&version.to_hex())
                .cloned()
                .ok_or_else(|| UpgradeError::Manifest(format!("no layout for {}", version)))
        }

        fn assert_upgrade_safe(&self, version: &VersionKey, opts: &UpgradeOptions) -> Result<()> {
            match &self.unsafe_pattern {
                Some(pattern) if !opts.unsafe_allow.contains(pattern) => {
                    Err(UpgradeError::UnsafeUpgrade {
                        version: *version,
                        reason: pattern.clone(),
                    })
                }
                _ => Ok(()),
            }
        }

        fn assert_storage_upgrade_safe(
            &self,
            old: &StorageLayout,
            new: &StorageLayout,
            _opts: &UpgradeOptions,
        ) -> Result<()> {
            // Append-only comparison: every old slot must survive unchanged.
            let old_slots = old.0.as_object().cloned().unwrap_or_default();
            let new_slots = new.0.as_object().cloned().unwrap_or_default();
            for (slot, ty) in &old_slots {
                match new_slots.get(slot) {
                    Some(new_ty) if new_ty == ty => {}
                    Some(new_ty) => {
                        return Err(UpgradeError::StorageCollision {
                            reason: format!("{} changed from {} to {}", slot, ty, new_ty),
                        })
                    }
                    None => {
                        return Err(UpgradeError::StorageCollision {
                            reason: format!("{} was deleted", slot),
                        })
                    }
                }
            }
            Ok(())
        }
    }

    struct TestFactory {
        bytecode: Vec<u8>,
        address: Address,
        deploys: AtomicUsize,
    }

    impl TestFactory {
        fn new(bytecode: &[u8], address: Address) -> Self {
            Self {
                bytecode: bytecode.to_vec(),
                address,
                deploys: AtomicUsize::new(0),
            }
        }

        fn version(&self) -> VersionKey {
            // TestValidations returns the linked bytecode unchanged.
            VersionKey::of(&self.bytecode, &self.bytecode)
        }
    }

    #[async_trait]
    impl ImplementationFactory for TestFactory {
        type Handle = Address;

        fn bytecode(&self) -> Vec<u8> {
            self.bytecode.clone()
        }

        async fn deploy(&self) -> Result<Deployment> {
            self.deploys.fetch_add(1, Ordering::SeqCst);
            Ok(Deployment {
                address: self.address,
                tx_hash: TxHash::repeat_byte(0x77),
            })
        }

        fn attach(&self, address: Address) -> Address {
            address
        }
    }

    async fn manifest_at(
        root: &std::path::Path,
        chain_id: u64,
    ) -> (Manifest, MockProvider, Provider<MockProvider>) {
        let (provider, mock) = Provider::mocked();
        mock.push(U256::from(chain_id)).unwrap();
        let manifest = Manifest::for_network_in(&provider, root).await.unwrap();
        (manifest, mock, provider)
    }

    /// Records an already-deployed implementation so the storage gate can
    /// find the proxy's current layout.
    async fn seed_current_impl(
        manifest: &Manifest,
        provider: &Provider<MockProvider>,
        address: Address,
        layout: serde_json::Value,
    ) {
        manifest
            .fetch_or_deploy(&VersionKey::of(b"v1", b"v1"), provider, || async move {
                Ok((
                    Deployment {
                        address,
                        tx_hash: TxHash::repeat_byte(0x11),
                    },
                    StorageLayout(layout),
                ))
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_direct_path_for_plain_account_admin() {
        let dir = tempfile::tempdir().unwrap();
        let (manifest, mock, provider) = manifest_at(dir.path(), 201).await;

        let proxy = Address::repeat_byte(0x10);
        let admin = Address::repeat_byte(0xad);
        // Popped in call order: admin slot read, then code at the admin.
        mock.push::<Bytes, _>(Bytes::new()).unwrap();
        mock.push(address_to_h256(&admin)).unwrap();

        let upgrader = resolve_upgrader(&provider, &manifest, proxy).await.unwrap();
        assert_eq!(upgrader, Upgrader::Direct { proxy });
    }

    #[tokio::test]
    async fn test_delegated_path_for_contract_admin() {
        let dir = tempfile::tempdir().unwrap();
        let (manifest, mock, provider) = manifest_at(dir.path(), 202).await;

        let proxy = Address::repeat_byte(0x10);
        let admin = Address::repeat_byte(0xad);
        manifest.set_admin(admin).unwrap();
        mock.push::<Bytes, _>(Bytes::from(vec![0x60, 0x80])).unwrap();
        mock.push(address_to_h256(&admin)).unwrap();

        let upgrader = resolve_upgrader(&provider, &manifest, proxy).await.unwrap();
        assert_eq!(upgrader, Upgrader::Delegated { admin, proxy });
    }

    #[tokio::test]
    async fn test_delegated_path_rejects_unregistered_admin() {
        let dir = tempfile::tempdir().unwrap();
        let (manifest, mock, provider) = manifest_at(dir.path(), 203).await;

        let proxy = Address::repeat_byte(0x10);
        let chain_admin = Address::repeat_byte(0xad);
        manifest.set_admin(Address::repeat_byte(0xee)).unwrap();
        mock.push::<Bytes, _>(Bytes::from(vec![0x60, 0x80])).unwrap();
        mock.push(address_to_h256(&chain_admin)).unwrap();

        let err = resolve_upgrader(&provider, &manifest, proxy)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UpgradeError::ManifestMismatch { chain_admin: c, manifest_admin: m }
                if c == chain_admin && m == Address::repeat_byte(0xee)
        ));
    }

    #[tokio::test]
    async fn test_prepare_upgrade_deploys_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (manifest, mock, provider) = manifest_at(dir.path(), 204).await;

        let proxy = Address::repeat_byte(0x10);
        let current_impl = Address::repeat_byte(0x11);
        seed_current_impl(&manifest, &provider, current_impl, serde_json::json!({"slot0": "uint256"})).await;

        let factory = TestFactory::new(b"v2 bytecode", Address::repeat_byte(0x22));
        // Append-only superset of the current layout.
        let validations = TestValidations::new().with_layout(
            &factory.version(),
            serde_json::json!({"slot0": "uint256", "slot1": "address"}),
        );
        let opts = UpgradeOptions::default();

        mock.push(address_to_h256(&current_impl)).unwrap();
        let first = prepare_upgrade(&provider, &manifest, &validations, &proxy, &factory, &opts)
            .await
            .unwrap();
        assert_eq!(first, Address::repeat_byte(0x22));
        assert_eq!(factory.deploys.load(Ordering::SeqCst), 1);

        // Second call: implementation slot read, then the staleness check on
        // the cached deployment.
        mock.push::<Bytes, _>(Bytes::from(vec![0x60])).unwrap();
        mock.push(address_to_h256(&current_impl)).unwrap();
        let second = prepare_upgrade(&provider, &manifest, &validations, &proxy, &factory, &opts)
            .await
            .unwrap();
        assert_eq!(second, first);
        assert_eq!(factory.deploys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prepare_upgrade_blocks_storage_collision() {
        let dir = tempfile::tempdir().unwrap();
        let (manifest, mock, provider) = manifest_at(dir.path(), 205).await;

        let proxy = Address::repeat_byte(0x10);
        let current_impl = Address::repeat_byte(0x11);
        seed_current_impl(&manifest, &provider, current_impl, serde_json::json!({"slot0": "uint256"})).await;

        let factory = TestFactory::new(b"v2 bytecode", Address::repeat_byte(0x22));
        let validations = TestValidations::new()
            .with_layout(&factory.version(), serde_json::json!({"slot0": "address"}));
        let opts = UpgradeOptions::default();

        mock.push(address_to_h256(&current_impl)).unwrap();
        let err = prepare_upgrade(&provider, &manifest, &validations, &proxy, &factory, &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, UpgradeError::StorageCollision { .. }));
        // Blocked before any deployment.
        assert_eq!(factory.deploys.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prepare_upgrade_skips_storage_gate_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let (manifest, _mock, provider) = manifest_at(dir.path(), 206).await;

        let proxy = Address::repeat_byte(0x10);
        // Same incompatible layout as above, gate skipped entirely: the
        // current implementation is never even fetched.
        let factory = TestFactory::new(b"v2 bytecode", Address::repeat_byte(0x22));
        let validations = TestValidations::new()
            .with_layout(&factory.version(), serde_json::json!({"slot0": "address"}));
        let opts = UpgradeOptions {
            unsafe_skip_storage_check: true,
            ..Default::default()
        };

        let address = prepare_upgrade(&provider, &manifest, &validations, &proxy, &factory, &opts)
            .await
            .unwrap();
        assert_eq!(address, Address::repeat_byte(0x22));
        assert_eq!(factory.deploys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prepare_upgrade_rejects_unsafe_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let (manifest, mock, provider) = manifest_at(dir.path(), 207).await;

        let proxy = Address::repeat_byte(0x10);
        let current_impl = Address::repeat_byte(0x11);
        seed_current_impl(&manifest, &provider, current_impl, serde_json::json!({})).await;

        let factory = TestFactory::new(b"v2 bytecode", Address::repeat_byte(0x22));
        let mut validations =
            TestValidations::new().with_layout(&factory.version(), serde_json::json!({}));
        validations.unsafe_pattern = Some("delegatecall".to_string());

        let err = prepare_upgrade(
            &provider,
            &manifest,
            &validations,
            &proxy,
            &factory,
            &UpgradeOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UpgradeError::UnsafeUpgrade { .. }));
        assert_eq!(factory.deploys.load(Ordering::SeqCst), 0);

        // Explicitly allowing the pattern lets the call proceed.
        let opts = UpgradeOptions {
            unsafe_allow: vec!["delegatecall".to_string()],
            ..Default::default()
        };
        mock.push(address_to_h256(&current_impl)).unwrap();
        let address = prepare_upgrade(&provider, &manifest, &validations, &proxy, &factory, &opts)
            .await
            .unwrap();
        assert_eq!(address, Address::repeat_byte(0x22));
    }

    #[tokio::test]
    async fn test_upgrade_proxy_reaches_dispatch_with_version_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (manifest, mock, provider) = manifest_at(dir.path(), 208).await;

        let proxy = Address::repeat_byte(0x10);
        let admin = Address::repeat_byte(0xad);
        let current_impl = Address::repeat_byte(0x11);
        seed_current_impl(&manifest, &provider, current_impl, serde_json::json!({"slot0": "uint256"})).await;

        let factory = TestFactory::new(b"v2 bytecode", Address::repeat_byte(0x22));
        let validations = TestValidations::new().with_layout(
            &factory.version(),
            serde_json::json!({"slot0": "uint256", "slot1": "address"}),
        );

        // Popped in call order: implementation slot, admin slot, code at the
        // admin (empty: direct path). The send itself has no mocked signer
        // behind it and fails, which proves the pipeline reached dispatch.
        mock.push::<Bytes, _>(Bytes::new()).unwrap();
        mock.push(address_to_h256(&admin)).unwrap();
        mock.push(address_to_h256(&current_impl)).unwrap();

        let err = upgrade_proxy(
            Arc::new(provider),
            &manifest,
            &validations,
            &proxy,
            &factory,
            &UpgradeOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UpgradeError::Network(_)));

        // By dispatch time the implementation is deployed and the manifest
        // maps its version key to the deployed address.
        assert_eq!(factory.deploys.load(Ordering::SeqCst), 1);
        let record = manifest.deployment_of(&factory.version()).unwrap().unwrap();
        assert_eq!(record.deployment.address, Address::repeat_byte(0x22));
    }

    #[test]
    fn test_upgraded_handle_is_attached_at_the_proxy() {
        let factory = TestFactory::new(b"v2 bytecode", Address::repeat_byte(0x22));
        let proxy = Address::repeat_byte(0x10);
        let tx_hash = TxHash::repeat_byte(0x99);

        let upgraded = attach_upgraded(&factory, proxy, tx_hash);
        assert_eq!(upgraded.contract, proxy);
        assert_eq!(upgraded.tx_hash, tx_hash);
    }

    #[test]
    fn test_proxy_reference_for_address() {
        let address = Address::repeat_byte(0x42);
        assert_eq!(address.proxy_address(), address);
    }
}
