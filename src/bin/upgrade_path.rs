use std::str::FromStr;

use anyhow::Context;
use clap::Parser;
use ethers_core::types::Address;
use ethers_providers::{Http, Provider};
use evm_proxy_upgrades::{get_admin_address, resolve_upgrader, Manifest, Upgrader};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Shows which upgrade path applies to a deployed proxy and whether the
/// network manifest agrees with the chain.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[clap(value_parser = Address::from_str)]
    proxy: Address,

    #[clap(short = 'r', long = "rpc-url", env = "ETH_RPC_URL")]
    pub url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env();

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .init();

    let args = Args::parse();

    let provider = Provider::<Http>::try_from(args.url.as_str())
        .context("failed to parse RPC URL")?;

    let admin = get_admin_address(&provider, args.proxy).await?;
    println!("admin slot of {:?} holds {:?}", args.proxy, admin);

    let manifest = Manifest::for_network(&provider).await?;
    // Same resolution the upgrade flow uses, manifest guard included; a
    // mismatch surfaces here as the error an upgrade call would hit.
    let upgrader = resolve_upgrader(&provider, &manifest, args.proxy).await?;
    match upgrader {
        Upgrader::Direct { .. } => {
            println!("no code at the admin address: the proxy upgrades itself");
        }
        Upgrader::Delegated { admin, .. } => {
            println!(
                "ProxyAdmin {:?} matches the manifest for chain {}",
                admin,
                manifest.chain_id()
            );
        }
    }
    println!("path: {:?}", upgrader);
    Ok(())
}
