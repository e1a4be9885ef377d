//! mnode storage server daemon.

mod cli;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use mnode_storage::types::{
    Ed25519Seckey, LegacySeckey, NodeRecord, X25519Pubkey, X25519Seckey,
};
use mnode_storage::{
    collab::{UnattachedBus, UnattachedHandler},
    Collaborators, HttpProxyClient, HttpsListener, MasterNodeService, Node, SwarmMap, VERSION,
};

use cli::Cli;

/// How long in-flight requests may keep running once draining starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let data_dir = match resolve_data_dir(&cli) {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return std::process::ExitCode::FAILURE;
        }
    };

    if let Err(err) = std::fs::create_dir_all(&data_dir) {
        eprintln!("Error: could not create data directory {data_dir:?}: {err}");
        return std::process::ExitCode::FAILURE;
    }

    init_logging(&cli, &data_dir);

    match run(cli, data_dir) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn resolve_data_dir(cli: &Cli) -> Result<PathBuf> {
    if let Some(dir) = &cli.data_dir {
        return Ok(dir.clone());
    }
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .context("could not determine your home directory; use --data-dir")?;
    Ok(if cli.testnet {
        home.join(".mnode-storage").join("testnet")
    } else {
        home.join(".mnode-storage")
    })
}

/// Console layer at the requested level plus a trace-level file under the
/// data directory.
fn init_logging(cli: &Cli, data_dir: &std::path::Path) {
    let console_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.to_string()));
    let console_layer = tracing_subscriber::fmt::layer().with_filter(console_filter);

    let file_appender = tracing_appender::rolling::never(data_dir, "storage.log");
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_filter(tracing_subscriber::EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();
}

fn run(cli: Cli, data_dir: PathBuf) -> Result<()> {
    if cli.testnet {
        tracing::warn!("Starting in testnet mode, make sure this is intentional!");
    }

    tracing::info!("mnode storage server v{VERSION}");
    tracing::info!(data_dir = %data_dir.display(), "Using data directory");
    tracing::info!(beldexd = %cli.beldexd_rpc, "Message-bus RPC target");

    let bind_ip: IpAddr = cli
        .ip
        .parse()
        .with_context(|| format!("invalid bind address '{}'", cli.ip))?;
    if bind_ip.is_loopback() {
        bail!(
            "tried to bind the storage server to localhost, \
             please bind to an outward facing address"
        );
    }

    // No public port opens until the keystore has produced all three
    // private keys.
    let (seckey_legacy, seckey_ed25519, seckey_x25519) = load_privkeys(&cli)?;

    let record = NodeRecord {
        ip: "0.0.0.0".to_string(),
        https_port: cli.port,
        bus_port: cli.bus_port,
        pubkey_legacy: seckey_legacy.pubkey(),
        pubkey_ed25519: seckey_ed25519.pubkey(),
        pubkey_x25519: seckey_x25519.pubkey(),
    };

    tracing::info!("Our MN pubkeys are:");
    tracing::info!("- legacy:  {}", record.pubkey_legacy);
    tracing::info!("- ed25519: {}", record.pubkey_ed25519);
    tracing::info!("- x25519:  {}", record.pubkey_x25519);
    tracing::info!("- address: {}", record.pubkey_ed25519.mnode_address());

    // The bus subsystem consumes these for its stats endpoints when it
    // attaches.
    for key in &cli.stats_access_keys {
        let key = X25519Pubkey::from_hex(key)
            .with_context(|| format!("invalid stats access key '{key}'"))?;
        tracing::info!("Stats access key: {key}");
    }

    // Certificate material lives under the data dir; the TLS front-end
    // generates anything missing.
    let ssl_cert = data_dir.join("cert.pem");
    let ssl_key = data_dir.join("key.pem");
    let ssl_dh = data_dir.join("dh.pem");
    tracing::debug!(cert = %ssl_cert.display(), key = %ssl_key.display(),
        dh = %ssl_dh.display(), "Certificate paths");

    if cli.force_start {
        tracing::warn!("--force-start given; skipping master-node registration checks");
    }

    let swarm = Arc::new(SwarmMap::new());
    let node = Arc::new(Node::new(
        record,
        seckey_x25519,
        Collaborators {
            swarm,
            bus: Arc::new(UnattachedBus),
            handler: Arc::new(UnattachedHandler),
            proxy: Arc::new(HttpProxyClient::new()?),
        },
    ));

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_daemon(node, None, None))
}

/// All three node private keys must be present before anything opens a
/// public port. They normally come from the beldexd keystore over the
/// message bus; the key options exist for integration setups where that
/// is not possible.
fn load_privkeys(cli: &Cli) -> Result<(LegacySeckey, Ed25519Seckey, X25519Seckey)> {
    match (
        &cli.beldexd_key,
        &cli.beldexd_ed25519_key,
        &cli.beldexd_x25519_key,
    ) {
        (Some(legacy), Some(ed25519), Some(x25519)) => Ok((
            LegacySeckey::from_hex(legacy).context("invalid --beldexd-key")?,
            Ed25519Seckey::from_hex(ed25519).context("invalid --beldexd-ed25519-key")?,
            X25519Seckey::from_hex(x25519).context("invalid --beldexd-x25519-key")?,
        )),
        _ => bail!(
            "node private keys unavailable: the beldexd keystore has not provided them; \
             pass --beldexd-key, --beldexd-ed25519-key, and --beldexd-x25519-key"
        ),
    }
}

async fn run_daemon(
    node: Arc<Node>,
    https: Option<Arc<dyn HttpsListener>>,
    master: Option<Arc<dyn MasterNodeService>>,
) -> Result<()> {
    tracing::info!("{}", node.status_line());

    // Watchdog heartbeat for supervised deployments.
    if std::env::var_os("NOTIFY_SOCKET").is_some() {
        let node = node.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                tracing::trace!(status = %node.status_line(), "Watchdog heartbeat");
            }
        });
    }

    // General status line every hour.
    {
        let node = node.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            interval.tick().await; // the startup line was already logged
            loop {
                interval.tick().await;
                tracing::info!("{}", node.status_line());
            }
        });
    }

    wait_for_termination().await;

    tracing::warn!("Received termination signal; shutting down...");
    node.begin_shutdown();
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    tracing::info!("Stopping https server");
    if let Some(https) = https {
        https.stop();
    }
    tracing::info!("Stopping master node subsystem");
    if let Some(master) = master {
        master.stop();
    }
    tracing::info!("Stopping bus transport");
    node.stop_bus();

    tracing::info!("Shutting down");
    Ok(())
}

async fn wait_for_termination() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
