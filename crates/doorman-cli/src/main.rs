//! doorman - command-line device control for pdk.io access-control systems.
//!
//! Lists cloud nodes and devices, opens and closes doors, and shows the
//! cached session state. Credentials come from the local credentials file;
//! tokens are cached and refreshed transparently by the core library.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use doorman_core::{
    cache_dir, system_api, Credentials, Environment, EntityCache, HttpAuthProvider, RetryPolicy,
    SystemApi, TokenState, TokenStore,
};

/// Overall budget for one command, backoff sleeps included.
const OPERATION_TIMEOUT_SECS: u64 = 120;

fn print_usage() {
    eprintln!("doorman - device control for pdk.io access-control systems");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  doorman nodes                          List cloud nodes");
    eprintln!("  doorman devices <node-id>              List devices on a cloud node");
    eprintln!("  doorman open <node-id> <device-id> [dwell]");
    eprintln!("                                         Open a device (dwell in tenths of a second)");
    eprintln!("  doorman close <node-id> <device-id>    Close a device");
    eprintln!("  doorman status                         Show cached session state");
    eprintln!("  doorman login                          Force a fresh login");
    eprintln!();
    eprintln!("Credentials: ~/.config/doorman/credentials.json or $DOORMAN_CREDENTIALS");
    eprintln!("Environment: set DOORMAN_ENV=beta for the provider's beta stack");
}

fn log_dir() -> Option<PathBuf> {
    let dir = dirs::state_dir().or_else(dirs::cache_dir)?.join("doorman");
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Initialize the tracing subscriber: stderr plus a daily rolling file.
/// Use RUST_LOG to control the level (e.g. RUST_LOG=debug).
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_dir() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "doorman.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1).map(String::as_str) else {
        print_usage();
        std::process::exit(2);
    };

    if matches!(command, "-h" | "--help" | "help") {
        print_usage();
        return Ok(());
    }
    if !matches!(command, "nodes" | "devices" | "open" | "close" | "status" | "login") {
        eprintln!("unknown command: {}", command);
        print_usage();
        std::process::exit(2);
    }

    let credentials = Credentials::load()?;
    let environment = Environment::from_env();
    let data_dir = cache_dir(&credentials.system_id)?;
    let store = TokenStore::new(data_dir.clone())?;
    let cache = EntityCache::new(data_dir)?;

    let policy = RetryPolicy {
        operation_timeout: Some(Duration::from_secs(OPERATION_TIMEOUT_SECS)),
        ..RetryPolicy::default()
    };
    let api = system_api(environment, credentials, store, policy)?;
    info!(environment = ?environment, "doorman starting");

    match command {
        "nodes" => cmd_nodes(&api, &cache).await,
        "devices" => {
            let node_id = args
                .get(2)
                .context("usage: doorman devices <node-id>")?;
            cmd_devices(&api, &cache, node_id).await
        }
        "open" => {
            let node_id = args
                .get(2)
                .context("usage: doorman open <node-id> <device-id> [dwell]")?;
            let device_id = args
                .get(3)
                .context("usage: doorman open <node-id> <device-id> [dwell]")?;
            let dwell = match args.get(4) {
                Some(raw) => Some(
                    raw.parse::<u16>()
                        .context("dwell must be a number of tenths of a second")?,
                ),
                None => None,
            };
            cmd_open(&api, node_id, device_id, dwell).await
        }
        "close" => {
            let node_id = args
                .get(2)
                .context("usage: doorman close <node-id> <device-id>")?;
            let device_id = args
                .get(3)
                .context("usage: doorman close <node-id> <device-id>")?;
            cmd_close(&api, node_id, device_id).await
        }
        "status" => cmd_status(&api),
        "login" => cmd_login(&api).await,
        _ => unreachable!("command validated above"),
    }
}

async fn cmd_nodes(api: &SystemApi<HttpAuthProvider>, cache: &EntityCache) -> Result<()> {
    let nodes = match api.list_cloud_nodes().await {
        Ok(nodes) => {
            if let Err(e) = cache.save_cloud_nodes(&nodes) {
                warn!(error = %e, "could not cache cloud nodes");
            }
            nodes
        }
        Err(e) => {
            // Offline fallback: show what we last saw.
            match cache.load_cloud_nodes() {
                Ok(Some(cached)) => {
                    eprintln!(
                        "fetch failed ({}), showing cached list from {}",
                        e,
                        cached.age_display()
                    );
                    cached.data
                }
                _ => return Err(e.into()),
            }
        }
    };

    if nodes.is_empty() {
        println!("No cloud nodes available.");
        return Ok(());
    }

    println!("Cloud Nodes:");
    println!("{}", "-".repeat(50));
    for (idx, node) in nodes.iter().enumerate() {
        println!(
            "{}. {} ({})",
            idx + 1,
            node.name,
            node.serial_number.as_deref().unwrap_or("no serial")
        );
        println!(
            "   Status: {}",
            if node.is_connected() { "Connected" } else { "Disconnected" }
        );
        println!("   ID: {}", node.id);
        if let Some(ref ip) = node.ipv4_address {
            println!("   IP: {}", ip);
        }
    }
    Ok(())
}

async fn cmd_devices(
    api: &SystemApi<HttpAuthProvider>,
    cache: &EntityCache,
    node_id: &str,
) -> Result<()> {
    let devices = match api.list_devices(node_id).await {
        Ok(devices) => {
            if let Err(e) = cache.save_devices(node_id, &devices) {
                warn!(error = %e, "could not cache devices");
            }
            devices
        }
        Err(e) => match cache.load_devices(node_id) {
            Ok(Some(cached)) => {
                eprintln!(
                    "fetch failed ({}), showing cached list from {}",
                    e,
                    cached.age_display()
                );
                cached.data
            }
            _ => return Err(e.into()),
        },
    };

    if devices.is_empty() {
        println!("No devices on this cloud node.");
        return Ok(());
    }

    println!("Devices on {}:", node_id);
    println!("{}", "-".repeat(50));
    for (idx, device) in devices.iter().enumerate() {
        println!(
            "{}. {} (type: {})",
            idx + 1,
            device.display_name(),
            device.device_type.as_deref().unwrap_or("unknown")
        );
        println!("   ID: {}", device.id);
        if let Some(dwell) = device.dwell {
            println!("   Default dwell: {} tenths of a second", dwell);
        }
        if let Some(ref firmware) = device.firmware_version {
            println!("   Firmware: {}", firmware);
        }
    }
    Ok(())
}

async fn cmd_open(
    api: &SystemApi<HttpAuthProvider>,
    node_id: &str,
    device_id: &str,
    dwell: Option<u16>,
) -> Result<()> {
    api.try_open_device(node_id, device_id, dwell).await?;
    match dwell {
        Some(dwell) => println!(
            "Opened {} (holding for {:.1}s)",
            device_id,
            f64::from(dwell) / 10.0
        ),
        None => println!("Opened {} (default dwell)", device_id),
    }
    Ok(())
}

async fn cmd_close(
    api: &SystemApi<HttpAuthProvider>,
    node_id: &str,
    device_id: &str,
) -> Result<()> {
    api.close_device(node_id, device_id).await?;
    println!("Closed {}", device_id);
    Ok(())
}

fn cmd_status(api: &SystemApi<HttpAuthProvider>) -> Result<()> {
    let sessions = api.pipeline().sessions();
    println!("System: {}", sessions.system_id());

    match sessions.peek()? {
        Some(record) => {
            let now = chrono::Utc::now();
            let state = record.state(now);
            println!("Session state: {:?}", state);
            println!("Last updated: {}", record.last_updated.format("%Y-%m-%d %H:%M:%S UTC"));
            if matches!(state, TokenState::Complete) {
                println!(
                    "Business tokens valid for another {}m",
                    record.minutes_until_business_expiry(now)
                );
            }
        }
        None => println!("Session state: Empty (no stored tokens)"),
    }

    let rate_limit = api.pipeline().rate_limit_state();
    if rate_limit.consecutive_hits > 0 {
        println!("Rate limited {} times this run", rate_limit.consecutive_hits);
    }
    Ok(())
}

async fn cmd_login(api: &SystemApi<HttpAuthProvider>) -> Result<()> {
    let record = api.pipeline().sessions().reauthenticate().await?;
    println!("Login successful for system {}", record.system_id);
    println!(
        "Business tokens valid for {}m",
        record.minutes_until_business_expiry(chrono::Utc::now())
    );
    Ok(())
}
