//! On-chain reads used during upgrade resolution.
//!
//! Thin wrappers over [`Middleware`] that surface RPC failures as
//! [`UpgradeError::Network`] without retrying: by the time a read fails, an
//! earlier step may already have submitted an irrevocable transaction, so
//! retry policy belongs to the caller.

use ethers_core::types::{Address, Bytes, H256};
use ethers_providers::Middleware;
use tracing::debug;

use crate::consts::{EIP1967_ADMIN_SLOT, EIP1967_IMPLEMENTATION_SLOT};
use crate::errors::{Result, UpgradeError};
use crate::utils::{h256_is_address, h256_to_address_unchecked};

async fn read_address_slot<M>(rpc: &M, proxy: Address, slot: H256) -> Result<Address>
where
    M: Middleware,
{
    let word = rpc
        .get_storage_at(proxy, slot, None)
        .await
        .map_err(|e| UpgradeError::Network(e.to_string()))?;

    debug!("slot {:?} of {:?} holds {:?}", slot, proxy, word);
    if h256_is_address(&word) {
        Ok(h256_to_address_unchecked(&word))
    } else {
        Err(UpgradeError::SlotNotAddress { proxy, slot })
    }
}

/// Reads the admin address from the proxy's EIP-1967 admin slot.
pub async fn get_admin_address<M>(rpc: &M, proxy: Address) -> Result<Address>
where
    M: Middleware,
{
    read_address_slot(rpc, proxy, *EIP1967_ADMIN_SLOT).await
}

/// Reads the currently active implementation address from the proxy's
/// EIP-1967 implementation slot.
pub async fn get_implementation_address<M>(rpc: &M, proxy: Address) -> Result<Address>
where
    M: Middleware,
{
    read_address_slot(rpc, proxy, *EIP1967_IMPLEMENTATION_SLOT).await
}

/// Fetches the bytecode deployed at `address`. Empty bytes means a plain
/// account with no code.
pub async fn get_code<M>(rpc: &M, address: Address) -> Result<Bytes>
where
    M: Middleware,
{
    rpc.get_code(address, None)
        .await
        .map_err(|e| UpgradeError::Network(e.to_string()))
}
