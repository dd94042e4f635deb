use std::path::PathBuf;

use clap::Parser;

use meshgate_node::{Node, NodeConfig};

#[derive(Parser)]
#[command(name = "meshgate", about = "Multi-interface Reticulum mesh gateway node")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/meshgate/config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        meshgate_node::logging::init_json();
    } else {
        meshgate_node::logging::init();
    }

    let config = match NodeConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config from {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };

    let mut node = match Node::bootstrap(config).await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!("failed to bootstrap node: {e}");
            std::process::exit(1);
        }
    };

    // Spawn SIGINT handler
    let handle = node.shutdown_handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received SIGINT, shutting down");
        handle.shutdown();
    });

    // Spawn SIGTERM handler (Docker sends SIGTERM on `docker stop`)
    #[cfg(unix)]
    {
        let handle2 = node.shutdown_handle();
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            sigterm.recv().await;
            tracing::info!("received SIGTERM, shutting down");
            handle2.shutdown();
        });
    }

    if let Err(e) = node.start().await {
        tracing::error!("failed to start node: {e}");
        std::process::exit(1);
    }

    node.run().await;
    node.shutdown().await;
}
