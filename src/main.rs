use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use scp_webwallet::cli::Cli;
use scp_webwallet::config::WebWalletConfig;
use scp_webwallet::node::memory::MemoryFactory;
use scp_webwallet::orchestrator::probe_port;
use scp_webwallet::progress::HttpSnapshotSource;
use scp_webwallet::server::RpcServer;
use scp_webwallet::wallet::WebWallet;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut config = WebWalletConfig::load_or_default(&cli.config);
    if let Err(e) = cli.apply(&mut config) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level)),
        )
        .init();

    if let Err(e) = run(config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: WebWalletConfig) -> Result<(), Box<dyn std::error::Error>> {
    let port = config.server.port;
    probe_port(port).await?;

    let snapshots = Arc::new(HttpSnapshotSource::new(config.node.bootstrap_url.clone()));
    let wallet = Arc::new(WebWallet::new(config, Arc::new(MemoryFactory::new()), snapshots)?);

    let server = RpcServer::new(wallet.clone(), port);
    let url = format!("http://localhost:{}", port);
    let mut server_task = tokio::spawn(server.start());
    if wallet.config().server.headless {
        info!("Running headless, wallet available at {}", url);
    } else {
        info!("Open {} in your browser", url);
    }

    // Startup can wait on the user choosing a consensus source, so it runs
    // alongside the server.
    let starter = wallet.clone();
    let mut startup = tokio::spawn(async move { starter.start().await });

    let mut started = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Caught interrupt, shutting down...");
                break;
            }
            _ = wallet.wait_for_shutdown() => break,
            res = &mut server_task => {
                match res {
                    Ok(Ok(())) => info!("Server stopped"),
                    Ok(Err(e)) => error!("Server failed: {}", e),
                    Err(e) => error!("Server task failed: {}", e),
                }
                break;
            }
            res = &mut startup, if !started => {
                started = true;
                match res {
                    Ok(Ok(report)) => info!("Node started in {} steps", report.steps.len()),
                    Ok(Err(e)) => {
                        error!("Unable to start node: {}", e);
                        break;
                    }
                    Err(e) => {
                        error!("Startup task failed: {}", e);
                        break;
                    }
                }
            }
        }
    }

    if !started {
        startup.abort();
    }
    if let Err(e) = wallet.shutdown() {
        warn!("{}", e);
    }
    if !server_task.is_finished() {
        let _ = server_task.await;
    }
    Ok(())
}
