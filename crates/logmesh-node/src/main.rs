//! logmesh-node: serves one replicated log over HTTP/JSON and joins the mesh.
//!
//! The node starts uninitialized; `POST /v1/init` opens the log and brings
//! the mesh up.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use logmesh_core::Keypair;
use logmesh_node::{Config, Service, rpc};

#[derive(Parser, Debug)]
#[command(name = "logmesh-node")]
#[command(about = "Replicated append-only log node")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the node
    Serve {
        /// JSON config file
        #[arg(long, env = "LOGMESH_CONFIG")]
        config: Option<PathBuf>,

        /// Address for the RPC surface (overrides the config file)
        #[arg(long, env = "LOGMESH_RPC_LISTEN")]
        rpc_listen: Option<String>,

        /// Address for mesh connections (overrides the config file)
        #[arg(long, env = "LOGMESH_MESH_LISTEN")]
        mesh_listen: Option<String>,

        /// ws:// URL of a node to dial; repeatable, added to the config file's seeds
        #[arg(long = "seed")]
        seeds: Vec<String>,

        /// Enable verbose logging
        #[arg(long)]
        verbose: bool,
    },

    /// Print a fresh keypair
    Keygen,
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Serve {
            config,
            rpc_listen,
            mesh_listen,
            seeds,
            verbose,
        } => {
            init_tracing(verbose);

            let mut config = Config::load(config.as_deref())?;
            if let Some(addr) = rpc_listen {
                config.rpc_listen = addr;
            }
            if let Some(addr) = mesh_listen {
                config.mesh_listen = addr;
            }
            config.seeds.extend(seeds);

            serve(config).await
        }
        Command::Keygen => {
            let keypair = Keypair::generate();
            let public = keypair.public_key();
            println!("private:        {}", keypair.secret_hex());
            println!("public (hex):   {}", public);
            println!("public (base64): {}", STANDARD.encode(public.as_bytes()));
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    // RUST_LOG wins; --verbose only changes the fallback
    let default_filter = if verbose {
        "debug,logmesh_node=debug,logmesh_core=debug"
    } else {
        "info,logmesh_node=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting logmesh-node");
    info!("RPC address: {}", config.rpc_listen);
    info!("Mesh address: {}", config.mesh_listen);
    if !config.seeds.is_empty() {
        info!("Seeds: {:?}", config.seeds);
    }

    let listener = tokio::net::TcpListener::bind(&config.rpc_listen)
        .await
        .with_context(|| format!("failed to bind RPC address {}", config.rpc_listen))?;

    let service = Arc::new(Service::new(config));
    let app = rpc::router(service.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("RPC server failed")?;

    service.shutdown().await;
    info!("logmesh-node shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
