use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use bitcoin::Network;
use clap::Parser as _;
use onchain_ln_swap::config::SettlementArgs;
use onchain_ln_swap::lightning::ldk::LdkLightningClient;
use onchain_ln_swap::lightning::payout::PayoutExecutor;
use onchain_ln_swap::logging::LogFormat;
use onchain_ln_swap::onchain::bitcoind::{BitcoindAuth, BitcoindClient};
use onchain_ln_swap::onchain::detector::FundingDetector;
use onchain_ln_swap::proto::v1::swap_service_server::SwapServiceServer;
use onchain_ln_swap::swap::gateway::SwapGateway;
use onchain_ln_swap::swap::monitor::SettlementMonitor;
use onchain_ln_swap::swap::service::SwapServiceImpl;
use onchain_ln_swap::swap::store::SqliteSwapStore;
use tokio::sync::watch;
use tonic::transport::Server;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:50051")]
    listen_addr: String,

    #[arg(long)]
    bitcoind_rpc_url: String,

    #[arg(long, requires = "bitcoind_rpc_password")]
    bitcoind_rpc_user: Option<String>,

    #[arg(long)]
    bitcoind_rpc_password: Option<String>,

    #[arg(long, conflicts_with = "bitcoind_rpc_user")]
    bitcoind_cookie_file: Option<PathBuf>,

    #[arg(long, default_value = "regtest")]
    network: Network,

    #[arg(long)]
    ldk_rest_addr: String,

    #[arg(long)]
    store_path: PathBuf,

    #[arg(long)]
    log_json: bool,

    #[command(flatten)]
    settlement: SettlementArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_format = if args.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    onchain_ln_swap::logging::init_with(log_format).ok();

    let listen_addr: SocketAddr = args.listen_addr.parse().context("parse listen_addr")?;
    let cfg = args
        .settlement
        .into_config()
        .context("invalid settlement config")?;

    let auth = match (
        args.bitcoind_rpc_user,
        args.bitcoind_rpc_password,
        args.bitcoind_cookie_file,
    ) {
        (Some(user), Some(password), None) => BitcoindAuth::UserPass { user, password },
        (None, None, Some(path)) => BitcoindAuth::CookieFile(path),
        _ => anyhow::bail!(
            "pass either --bitcoind-rpc-user/--bitcoind-rpc-password or --bitcoind-cookie-file"
        ),
    };
    let onchain = Arc::new(
        BitcoindClient::new(&args.bitcoind_rpc_url, auth, args.network)
            .context("create bitcoind client")?,
    );
    let lightning = Arc::new(LdkLightningClient::new(args.ldk_rest_addr));

    let store = SqliteSwapStore::open(args.store_path).context("open sqlite store")?;
    tracing::info!(store_path = %store.path().display(), network = %args.network, "swap store ready");
    let store = Arc::new(Mutex::new(store));

    let gateway = SwapGateway::new(cfg.fee, onchain.clone(), store.clone(), cfg.backend_timeout);
    let monitor = SettlementMonitor::new(
        cfg.monitor,
        store,
        FundingDetector::new(onchain, cfg.confirmations, cfg.backend_timeout),
        PayoutExecutor::new(lightning, cfg.backend_timeout, cfg.payment_timeout),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_task = tokio::spawn(monitor.run(shutdown_rx));

    tracing::info!(
        %listen_addr,
        fee_rate_bps = cfg.fee.fee_rate_bps(),
        minimum_amount_sat = cfg.fee.minimum_amount_sat(),
        "starting swap gRPC server"
    );

    Server::builder()
        .add_service(SwapServiceServer::new(SwapServiceImpl::new(gateway)))
        .serve_with_shutdown(listen_addr, async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "listen for shutdown signal");
            }
            tracing::info!("shutdown requested");
            shutdown_tx.send_replace(true);
        })
        .await
        .context("serve gRPC")?;

    monitor_task.await.context("join settlement monitor")?;
    Ok(())
}
