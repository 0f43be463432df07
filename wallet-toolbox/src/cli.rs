//! The `wallet-toolbox` binary's command surface, modeled on the node's own
//! `argh`-derived `Args`/`Command` split: each subcommand builds its own
//! tokio runtime and owns its own collaborators.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use argh::FromArgs;

use wallet_toolbox_crypto::key_deriver::Secp256k1KeyDeriver;
use wallet_toolbox_monitor::defaults::default_monitor;
use wallet_toolbox_monitor::retry_queue::ReorgRetryQueue;
use wallet_toolbox_services::whatsonchain::WhatsOnChainProvider;
use wallet_toolbox_services::{Services, ServiceProvider};
use wallet_toolbox_storage::{SqliteStorageProvider, StorageProvider};

use crate::args::{GetPublicKeyArgs, ListOutputsArgs};
use crate::config::WalletToolboxConfig;
use crate::wallet::Wallet;

/// the wallet-toolbox CLI
#[derive(Debug, FromArgs)]
pub struct Args {
    /// path to a TOML config file, layered under environment variables
    #[argh(option)]
    pub config: Option<String>,

    #[argh(subcommand)]
    cmd: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Start(StartCommand),
    Balance(BalanceCommand),
    GetPublicKey(GetPublicKeyCommand),
}

/// Run the Monitor loop against the configured storage and chain services.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "start")]
struct StartCommand {
    /// identity key of the wallet to service; derives the root key
    /// deterministically from it for this local demo deployment
    #[argh(option)]
    identity_key: String,

    /// stop after this many monitor ticks instead of running forever
    #[argh(option)]
    ticks: Option<u32>,
}

/// Print the wallet-balance SpecOp result for a wallet.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "balance")]
struct BalanceCommand {
    #[argh(option)]
    identity_key: String,
}

/// Print a derived public key.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "get-public-key")]
struct GetPublicKeyCommand {
    #[argh(option)]
    identity_key: String,

    /// print the wallet's identity (root) key instead of a derived one
    #[argh(switch)]
    identity: bool,

    #[argh(option)]
    key_id: Option<String>,
}

fn root_secret_key(identity_key: &str) -> secp256k1::SecretKey {
    let digest = wallet_toolbox_common::hash::sha256(identity_key.as_bytes());
    secp256k1::SecretKey::from_slice(&digest).expect("sha256 output is a valid scalar with overwhelming probability")
}

async fn open_wallet(config: &WalletToolboxConfig, identity_key: &str) -> anyhow::Result<(Wallet, Arc<dyn StorageProvider>, Arc<dyn ServiceProvider>)> {
    let storage: Arc<dyn StorageProvider> = Arc::new(
        SqliteStorageProvider::connect(&config.storage_dsn)
            .await
            .context("failed to open storage")?,
    );
    let http = reqwest::Client::builder()
        .timeout(config.chain_service_timeout())
        .build()
        .context("failed to build HTTP client")?;
    let whats_on_chain_base = match config.network {
        crate::config::Network::Mainnet => "https://api.whatsonchain.com/v1/bsv/main",
        crate::config::Network::Testnet => "https://api.whatsonchain.com/v1/bsv/test",
    };
    let services: Arc<dyn ServiceProvider> = Arc::new(Services::new(vec![Arc::new(WhatsOnChainProvider::new(
        whats_on_chain_base,
        http,
    ))]));
    let key_deriver = Arc::new(Secp256k1KeyDeriver::new(root_secret_key(identity_key)));

    let wallet = Wallet::open(storage.clone(), services.clone(), key_deriver, config.clone(), identity_key)
        .await
        .context("failed to open wallet")?;
    Ok((wallet, storage, services))
}

impl Args {
    pub fn run(self) -> anyhow::Result<()> {
        let config = WalletToolboxConfig::load(self.config.as_deref().map(std::path::Path::new))
            .context("failed to load configuration")?;

        match self.cmd {
            Command::Start(cmd) => {
                let rt = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .context("failed to build tokio runtime")?;
                rt.block_on(run_start(config, cmd))
            }
            Command::Balance(cmd) => {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context("failed to build tokio runtime")?;
                rt.block_on(run_balance(config, cmd))
            }
            Command::GetPublicKey(cmd) => {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context("failed to build tokio runtime")?;
                rt.block_on(run_get_public_key(config, cmd))
            }
        }
    }
}

/// Runs the Monitor loop until either `cmd.ticks` is reached or a ctrl-c
/// signal arrives, in which case the in-flight tick is allowed to finish
/// before the loop exits.
async fn run_start(config: WalletToolboxConfig, cmd: StartCommand) -> anyhow::Result<()> {
    let (_wallet, storage, services) = open_wallet(&config, &cmd.identity_key).await?;
    let reorg_queue = Arc::new(Mutex::new(ReorgRetryQueue::new()));
    let monitor = default_monitor(storage.clone(), services, reorg_queue);

    let mut shutdown = wallet_toolbox_tokio::notify_once::NotifyOnce::new();
    let ctrlc_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, shutting down after the current tick");
            ctrlc_shutdown.send();
        }
    });

    let mut tick: u32 = 0;
    loop {
        let now = chrono::Utc::now().timestamp_millis();
        let outcomes = monitor.run_once(storage.as_ref(), now).await;
        for outcome in &outcomes {
            match &outcome.error {
                Some(err) => tracing::warn!(task = outcome.task_name, %err, "monitor task failed"),
                None => tracing::info!(task = outcome.task_name, log = %outcome.log, "monitor task ran"),
            }
        }
        tick += 1;
        if cmd.ticks.map(|limit| tick >= limit).unwrap_or(false) {
            break;
        }
        tokio::select! {
            () = tokio::time::sleep(std::time::Duration::from_secs(config.monitor_clock_interval_secs)) => {}
            () = shutdown.recv() => break,
        }
    }
    Ok(())
}

async fn run_balance(config: WalletToolboxConfig, cmd: BalanceCommand) -> anyhow::Result<()> {
    let (wallet, _storage, _services) = open_wallet(&config, &cmd.identity_key).await?;
    let result = wallet
        .list_outputs(
            ListOutputsArgs {
                basket: Some("wallet-balance".to_string()),
                ..Default::default()
            },
            None,
        )
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("{}", result.total_outputs);
    Ok(())
}

async fn run_get_public_key(config: WalletToolboxConfig, cmd: GetPublicKeyCommand) -> anyhow::Result<()> {
    let (wallet, _storage, _services) = open_wallet(&config, &cmd.identity_key).await?;
    let result = wallet
        .get_public_key(
            GetPublicKeyArgs {
                identity_key: cmd.identity,
                protocol_id: Some((2, "get-public-key cli".to_string())),
                key_id: cmd.key_id,
                counterparty: None,
                for_self: true,
                privileged: false,
            },
            None,
        )
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("{}", result.public_key);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_secret_key_is_deterministic_per_identity_key() {
        let a = root_secret_key("02aabb");
        let b = root_secret_key("02aabb");
        assert_eq!(a.secret_bytes(), b.secret_bytes());
    }

    #[test]
    fn root_secret_key_differs_across_identity_keys() {
        let a = root_secret_key("02aabb");
        let b = root_secret_key("03ccdd");
        assert_ne!(a.secret_bytes(), b.secret_bytes());
    }

    #[test]
    fn args_parses_balance_subcommand() {
        let args = Args::from_args(&["wallet-toolbox"], &["balance", "--identity-key", "02aabb"])
            .expect("balance subcommand should parse");
        match args.cmd {
            Command::Balance(cmd) => assert_eq!(cmd.identity_key, "02aabb"),
            other => panic!("expected Balance, got {other:?}"),
        }
    }
}
