//! Upgrade call strategies.

use std::sync::Arc;

use ethers_contract::abigen;
use ethers_contract::builders::ContractCall;
use ethers_core::types::{Address, TxHash};
use ethers_providers::Middleware;
use tracing::debug;

use crate::errors::{Result, UpgradeError};

abigen!(
    ITransparentUpgradeableProxy, r"[
    function upgradeTo(address newImplementation) external
]",
);

abigen!(
    IProxyAdmin, r"[
    function upgrade(address proxy, address implementation) external
]",
);

/// Resolved upgrade strategy for one proxy.
///
/// Carries only the data needed to issue the call, so path selection happens
/// exactly once and the dispatcher stays branch-free at call sites.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upgrader {
    /// The admin slot holds a plain account: the proxy manages its own
    /// upgrades through its `upgradeTo` function.
    Direct { proxy: Address },

    /// The admin slot holds a ProxyAdmin contract; the upgrade call is
    /// routed through its `upgrade` function.
    Delegated { admin: Address, proxy: Address },
}

impl Upgrader {
    /// Builds the upgrade call for this path without sending it: `upgradeTo`
    /// on the proxy itself, or `upgrade(proxy, newImpl)` on the ProxyAdmin.
    pub fn call<M>(&self, rpc: Arc<M>, new_impl: Address) -> ContractCall<M, ()>
    where
        M: Middleware,
    {
        match *self {
            Upgrader::Direct { proxy } => {
                ITransparentUpgradeableProxy::new(proxy, rpc).upgrade_to(new_impl)
            }
            Upgrader::Delegated { admin, proxy } => {
                IProxyAdmin::new(admin, rpc).upgrade(proxy, new_impl)
            }
        }
    }

    /// Broadcasts the upgrade transaction pointing the proxy at `new_impl`.
    ///
    /// Returns the transaction hash once the call is submitted; confirmation
    /// is awaited by the caller. Submission is irrevocable.
    pub async fn apply<M>(&self, rpc: Arc<M>, new_impl: Address) -> Result<TxHash>
    where
        M: Middleware + 'static,
    {
        debug!("dispatching upgrade to {:?} via {:?}", new_impl, self);
        let call = self.call(rpc, new_impl);
        let pending = call
            .send()
            .await
            .map_err(|e| UpgradeError::Network(e.to_string()))?;
        Ok(*pending)
    }
}
