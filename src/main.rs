//! docker-ssh-tunnel - Entry point
//!
//! Parses CLI arguments, then either validates the host, runs diagnostics, or
//! holds a tunnel open until Ctrl+C or SIGTERM.

use clap::Parser;
use tracing::{error, info, info_span};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use docker_ssh_tunnel::config::{Args, Config, Mode};
use docker_ssh_tunnel::error::Result;
use docker_ssh_tunnel::{diagnose_connection, SshTunnel};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only the DOCKER_HOST line
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::from_args(args)?;

    info!("docker-ssh-tunnel v{} starting...", env!("CARGO_PKG_VERSION"));

    match config.mode {
        Mode::Check => {
            // from_args already ran the offline host validation
            println!("Host specification OK: {}", config.host);
            return Ok(());
        }
        Mode::Diagnose => {
            let span = info_span!("diagnose", host = %config.host);
            return diagnose_connection(&config.tunnel_config(), span).await;
        }
        Mode::Tunnel => {}
    }

    let span = info_span!("tunnel", host = %config.host);
    let mut tunnel = match SshTunnel::connect(config.tunnel_config(), span).await {
        Ok(tunnel) => tunnel,
        Err(e) => {
            error!("Failed to establish tunnel: {}", e);
            return Err(e);
        }
    };

    println!("DOCKER_HOST={}", tunnel.local_proxy_host());
    println!("{}", tunnel.connection_method());
    info!("{}", tunnel.connection_info());

    // Wait for Ctrl+C or SIGTERM
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ).expect("Failed to register SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    tunnel.close().await?;
    info!("docker-ssh-tunnel stopped");

    Ok(())
}
