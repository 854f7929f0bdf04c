//! `ccapi-control` binary: CLI, logging, component wiring, shutdown.

use ccapi_control::camera::PrimaryCamera;
use ccapi_control::config::{Config, Ipv4Network};
use ccapi_control::discovery::registry::{tasks as discovery_tasks, CameraRegistry};
use ccapi_control::events::EventBus;
use ccapi_control::server::broadcast::{BroadcastFabric, ClientRegistry};
use ccapi_control::server::{self, AppState};
use ccapi_control::session::manager::SessionManager;
use ccapi_control::session::report::ReportStore;
use ccapi_control::timesync::{host_clock, TimeRequester, TimeSyncService};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ccapi-control", version, about = "CCAPI camera control service")]
struct Cli {
    /// Address for the REST/WebSocket server.
    #[arg(long, default_value = "0.0.0.0:3000")]
    listen: SocketAddr,

    /// Directory for persisted reports.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Network served by the host's access point; clients from it outrank
    /// wlan clients for time sync.
    #[arg(long, default_value = "192.168.4.0/24")]
    ap_network: Ipv4Network,

    /// Seconds between active SSDP searches.
    #[arg(long, default_value_t = 60)]
    search_interval: u64,

    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let default = if debug { "ccapi_control=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = Config {
        listen_addr: cli.listen,
        data_dir: cli.data_dir,
        ap_network: cli.ap_network,
        ssdp_search_interval: Duration::from_secs(cli.search_interval.max(5)),
        ..Config::default()
    };
    tracing::info!(?config, "starting ccapi-control");

    // Composition root: construct and wire every subsystem explicitly.
    let bus = EventBus::new();
    let registry = CameraRegistry::new(bus.clone());
    let camera: Arc<dyn PrimaryCamera> = Arc::clone(&registry) as Arc<dyn PrimaryCamera>;
    let store = ReportStore::open(&config.data_dir).await?;
    let manager = SessionManager::new(store, Arc::clone(&camera), bus.clone());
    let clients = ClientRegistry::new(config.ap_network);
    let timesync = TimeSyncService::new(
        host_clock(),
        Arc::clone(&camera),
        Arc::clone(&clients) as Arc<dyn TimeRequester>,
        bus.clone(),
    );
    let fabric = BroadcastFabric::new(
        Arc::clone(&clients),
        Arc::clone(&registry),
        Arc::clone(&manager),
        Arc::clone(&timesync),
        Arc::clone(&camera),
        bus.clone(),
        config.clone(),
    );

    // Long-running loops. The SSDP bind is load-bearing: failing it is a
    // startup failure and the process exits non-zero.
    let ssdp_listener = discovery_tasks::spawn_listener(&registry)?;
    let search_timer = discovery_tasks::spawn_search(&registry, config.ssdp_search_interval);
    let monitor_timer = discovery_tasks::spawn_monitor(&registry, config.monitor_interval);
    let terminal_handler = manager.spawn_terminal_handler();
    let camera_watcher = timesync.spawn_camera_watcher();
    let (event_pump, status_timer) = fabric.spawn();
    manager.check_unsaved_on_startup().await;

    let state = Arc::new(AppState {
        config,
        camera,
        registry,
        manager: Arc::clone(&manager),
        timesync: Arc::clone(&timesync),
        clients: Arc::clone(&clients),
        fabric,
    });

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    let server_task = tokio::spawn(server::serve(Arc::clone(&state), async move {
        // Only an actual shutdown flips the flag; a dropped sender would
        // otherwise stop the server silently.
        while shutdown_rx.changed().await.is_ok() {
            if *shutdown_rx.borrow() {
                return;
            }
        }
    }));

    shutdown_signal().await;
    tracing::info!("shutdown requested");

    // Stop the active session and give its terminal report a moment to land.
    manager.shutdown().await;
    for _ in 0..50 {
        let done = manager
            .current_snapshot()
            .await
            .is_none_or(|snapshot| snapshot.state.is_terminal());
        if done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    // A beat for the terminal handler to persist the report.
    tokio::time::sleep(Duration::from_millis(200)).await;

    timesync.shutdown();
    search_timer.cancel();
    monitor_timer.cancel();
    status_timer.cancel();
    ssdp_listener.abort();
    camera_watcher.abort();
    terminal_handler.abort();
    event_pump.abort();
    // Dropping the client channels makes every socket close with 1000.
    clients.shutdown();

    let _ = shutdown_tx.send(true);
    server_task.await??;
    tracing::info!("bye");
    Ok(())
}
