//! Ladder CLI
//!
//! Runs the tunnel server or a tunnel client from a TOML configuration file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ladder_engine::{ClientAgent, Config, VpnServer};
use ladder_tun::{TunConfig, TunDevice};

/// Ladder - IP over TCP tunnel
#[derive(Parser)]
#[command(name = "ladder")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "ladder.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace); defaults to the config file's
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as tunnel server
    Server,

    /// Run as tunnel client
    Client,

    /// Generate a sample configuration file
    GenConfig {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "ladder.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server => {
            let config = load_config(&cli.config)?;
            init_logging(cli.log_level.as_deref().unwrap_or(&config.common.log_level));
            run_server(config).await
        }
        Commands::Client => {
            let config = load_config(&cli.config)?;
            init_logging(cli.log_level.as_deref().unwrap_or(&config.common.log_level));
            run_client(config).await
        }
        Commands::GenConfig { output } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            generate_config(output)
        }
    }
}

/// `RUST_LOG` wins over the level given here
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load configuration from {:?}", path))
}

async fn create_tun(config: TunConfig) -> Result<Arc<TunDevice>> {
    #[cfg(target_os = "linux")]
    if let Err(e) = ladder_tun::linux::load_tun_module() {
        warn!("Cannot load the tun module: {}", e);
    }

    let device = TunDevice::create(config).await.map_err(|e| {
        if e.is_permission_denied() {
            error!("Creating a TUN device needs root or CAP_NET_ADMIN");
        }
        e
    });
    let device = device.context("Failed to create TUN device")?;
    info!("TUN device {} up, MTU {}", device.name(), device.mtu());
    Ok(Arc::new(device))
}

fn tun_builder(config: &Config) -> ladder_tun::TunConfigBuilder {
    let builder = TunConfig::builder().mtu(config.common.mtu);
    match &config.common.tun_device {
        Some(name) => builder.name(name.as_str()),
        None => builder,
    }
}

async fn run_server(config: Config) -> Result<()> {
    info!("Starting Ladder server...");
    let server_config = config.server_config()?;

    let tun_config = tun_builder(&config)
        .ipv4_str(&server_config.tunnel_address)
        .context("Invalid tunnel_address")?
        .build()?;
    let tun = create_tun(tun_config).await?;

    let dns_servers = server_config.resolve_dns_servers();
    if dns_servers.is_empty() {
        warn!("No DNS servers to push to clients");
    }

    let listen = server_config.listen_addr();
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to listen on {}", listen))?;

    let server = VpnServer::new(server_config, dns_servers, tun)
        .context("Failed to create server engine")?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut engine_handle = tokio::spawn(server.run(listener, shutdown_rx));

    tokio::select! {
        _ = wait_for_shutdown() => {}
        result = &mut engine_handle => {
            return result
                .context("Server task panicked")?
                .context("Server stopped");
        }
    }

    info!("Shutting down server...");
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(std::time::Duration::from_secs(5), engine_handle).await {
        Ok(result) => result.context("Server task panicked")??,
        Err(_) => warn!("Server did not stop within 5s"),
    }
    Ok(())
}

async fn run_client(config: Config) -> Result<()> {
    info!("Starting Ladder client...");
    let client_config = config.client_config()?;

    let mut agent = ClientAgent::new(client_config);
    let registration = agent
        .init(&client_config.server, client_config.port)
        .await
        .with_context(|| {
            format!(
                "Failed to register with {}:{}",
                client_config.server, client_config.port
            )
        })?;
    info!("Assigned {}", registration.assignment);

    let tun_config = tun_builder(&config)
        .ipv4(registration.assignment.address, 32)
        .build()?;
    let tun = create_tun(tun_config).await?;
    agent.start(tun)?;

    let stats_every = client_config.stats_interval();
    let stats_loop = async {
        let Some(every) = stats_every else {
            return std::future::pending::<()>().await;
        };
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            info!("Traffic {}", agent.stats());
        }
    };

    tokio::select! {
        _ = wait_for_shutdown() => info!("Shutting down client..."),
        _ = agent.closed() => warn!("Session with the server ended"),
        _ = stats_loop => {}
    }

    agent.stop().await;
    Ok(())
}

fn generate_config(output: PathBuf) -> Result<()> {
    let sample = Config::sample();

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write configuration to {:?}", output))?;

    info!("Generated sample configuration at {:?}", output);
    println!("Sample configuration written to {:?}", output);
    println!("\nSet [client] server to your server's address before running a client.");

    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let (mut sigterm, mut sigint) = match (
            signal::unix::signal(signal::unix::SignalKind::terminate()),
            signal::unix::signal(signal::unix::SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!("Cannot install signal handlers: {}", e);
                return std::future::pending().await;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = signal::ctrl_c().await {
            error!("Cannot listen for Ctrl+C: {}", e);
            return std::future::pending().await;
        }
        info!("Received Ctrl+C");
    }
}
