//! End-to-end harness against a local dev node
//!
//! Walks the whole pipeline without a browser wallet: establish a
//! session over a node-backed transport, resolve signers, bring up the
//! local simulation engine, draft and finalize an encrypted input, then
//! sign a decryption authorization and read the value back.

use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cipherwave::wallet::registry;
use cipherwave::{
    chains, decryption_message, ChainBindings, ClientConfig, DecryptionAuth, EncryptionManager,
    EngineStatus, Error, NodeBackedTransport, Result, SessionManager, SignerResolver,
    WalletTransport,
};

#[derive(Parser)]
#[command(name = "local-harness")]
#[command(about = "Exercise the encrypted-input pipeline against a dev node")]
struct Cli {
    /// Dev node JSON-RPC endpoint
    #[arg(long, default_value = "http://127.0.0.1:8545")]
    rpc_url: String,

    /// Chain ID the node runs (must be a recognized local chain)
    #[arg(long, default_value_t = chains::HARDHAT)]
    chain_id: u64,

    /// 64-bit payload value to encrypt
    #[arg(long, default_value_t = 42)]
    value: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let mut urls = HashMap::new();
    urls.insert(cli.chain_id, cli.rpc_url.clone());
    let bindings = ChainBindings::with_urls(urls);
    let config = ClientConfig {
        bindings: bindings.clone(),
        gateway_url: ClientConfig::from_env().gateway_url,
    };

    // Pose as an injected wallet holding the first dev account
    let (first_account, _) = registry::entries()[0];
    let account = first_account
        .parse()
        .map_err(|e| Error::Config(format!("bad registry address: {e}")))?;
    let transport: Arc<dyn WalletTransport> = Arc::new(NodeBackedTransport::new(
        cli.rpc_url.clone(),
        cli.chain_id,
        vec![account],
    ));

    let sessions = Arc::new(SessionManager::new(Some(transport)));
    let _events = sessions.spawn_event_loop();
    let session = sessions.connect().await?;
    info!(
        chain_id = ?session.chain_id,
        account = %account,
        "session established"
    );

    let resolver = SignerResolver::new(bindings);
    let signers = resolver.require(&session)?;
    let block = signers.read.block_number().await?;
    info!(
        direct_write = signers.direct_write.is_some(),
        block,
        "signers resolved"
    );

    let engines = EncryptionManager::with_gateway(config);
    let _watcher = engines.spawn_session_watcher(sessions.subscribe());
    let mut states = engines.subscribe();
    let state = states
        .wait_for(|s| s.status == EngineStatus::Ready)
        .await
        .map_err(|e| Error::Provisioning(e.to_string()))?
        .clone();
    info!(chain_id = ?state.chain_id, "engine ready");

    // Draft a payload + timestamp pair, as a submission would
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Config(e.to_string()))?
        .as_secs() as u32;
    let contract = "0x5fbdb2315678afecb367f032d93f642f64180aa3"
        .parse()
        .map_err(|e| Error::Config(format!("bad contract address: {e}")))?;

    let mut draft = engines.create_encrypted_input(contract, account)?;
    draft.add64(cli.value)?;
    draft.add32(timestamp)?;
    let input = draft.finalize().await?;
    println!("handles: {:?}", input.handles);
    println!("proof:   {} bytes", input.proof.len());

    // Sign the decryption authorization; the bypass signer avoids a
    // wallet round trip when the account is in the dev registry
    let message = decryption_message(input.handles[0], cli.chain_id);
    let signature = match &signers.direct_write {
        Some(direct) => direct.sign_message(&message)?,
        None => signers.write.sign_message(&message).await?,
    };

    let engine = state.engine.ok_or(Error::EngineNotReady)?;
    let auth = DecryptionAuth { account, signature };
    let plaintext = engine.user_decrypt(input.handles[0], &auth).await?;
    println!("decrypted value: {plaintext}");

    Ok(())
}
