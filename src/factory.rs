//! Contract factory abstraction.

use async_trait::async_trait;
use ethers_core::types::{Address, TxHash};
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Result of broadcasting an implementation's creation transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub address: Address,
    pub tx_hash: TxHash,
}

/// A factory for one implementation contract, bound to a signing identity.
///
/// Mirrors the shape of an ethers `ContractFactory`: it exposes the creation
/// bytecode, can broadcast a deployment, and can attach to an already
/// deployed address to obtain a callable handle.
#[async_trait]
pub trait ImplementationFactory {
    /// Callable handle type returned by [`ImplementationFactory::attach`].
    type Handle;

    /// Fully linked creation bytecode of the implementation.
    fn bytecode(&self) -> Vec<u8>;

    /// Broadcasts the creation transaction and waits for the contract
    /// address to be known.
    async fn deploy(&self) -> Result<Deployment>;

    /// Binds the factory's ABI and signer to an existing deployment.
    fn attach(&self, address: Address) -> Self::Handle;
}
