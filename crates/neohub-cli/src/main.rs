//! Command-line interface for the NeoHub gateway.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use neohub_core::config::env_vars;
use neohub_core::{CommandListeners, CommandParser, Envelope, MessageSink, RawListeners};
use neohub_devices::{DeviceAgent, DeviceRegistry, Discovery, HttpGadgetFamily};
use neohub_relay::{
    CloudLink, HttpCloudLink, HubAgent, RelayClient, RelayClientConfig, RelayServer,
};
use neohub_storage::{HubSettings, RedbSettings};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::GatewayConfig;

/// NeoHub - local IoT gateway bridging devices to the cloud.
#[derive(Parser, Debug)]
#[command(name = "neohub")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set (overrides the config file).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay, the hub agent and the gadget agent in one process.
    Run,
    /// Run the relay and the hub agent only.
    Relay {
        /// Relay port.
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run the gadget agent against a running relay.
    Agent {
        /// Relay address (defaults to the configured bind address and port).
        #[arg(long)]
        relay: Option<String>,
    },
    /// Run one discovery pass and print the devices found.
    Discover,
    /// Print the hub identity.
    HubId,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = GatewayConfig::load(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    init_logging(&config.log_level);
    if let Some(path) = &config.source {
        info!(category = "config", path = %path.display(), "Configuration loaded");
    }

    match args.command {
        Command::Run => run_gateway(config, true).await,
        Command::Relay { port } => {
            if let Some(port) = port {
                config.relay.port = port;
            }
            run_gateway(config, false).await
        }
        Command::Agent { relay } => run_agent(config, relay).await,
        Command::Discover => discover(config).await,
        Command::HubId => {
            println!("{}", config.hub_id()?);
            Ok(())
        }
    }
}

fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }
}

/// Cancel `cancel` on Ctrl-C.
fn shutdown_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        cancel.cancel();
    });
}

fn gadget_agent(
    config: &GatewayConfig,
    sink: Arc<dyn MessageSink>,
) -> Arc<DeviceAgent<HttpGadgetFamily>> {
    let family = HttpGadgetFamily::new(
        config.agent.device_type.to_string(),
        config.agent.device_http_timeout(),
    );
    Arc::new(DeviceAgent::new(
        family,
        Discovery::new(config.agent.discovery()),
        sink,
        config.agent.periods.clone(),
    ))
}

async fn run_gateway(config: GatewayConfig, with_gadgets: bool) -> Result<()> {
    let hub_id = config.hub_id()?;
    info!(category = "relay", hub_id = %hub_id, "Starting gateway");

    let link: Arc<dyn CloudLink> = Arc::new(HttpCloudLink::new(&config.cloud, hub_id.clone()));
    let server = RelayServer::bind(
        config.relay.clone(),
        link,
        Arc::new(Envelope::new(hub_id.clone())),
    )
    .await
    .with_context(|| format!("Cannot bind relay on {}", config.relay.address()))?;

    let listeners = Arc::new(CommandListeners::new());
    server
        .raw_listeners()
        .add(Arc::new(CommandParser::new(Arc::clone(&listeners))))?;

    let store = RedbSettings::open(&config.hub.settings_path)
        .with_context(|| format!("Cannot open settings at {}", config.hub.settings_path))?;
    let settings = HubSettings::new(Arc::new(store));

    let cancel = CancellationToken::new();
    shutdown_on_ctrl_c(cancel.clone());

    let sink: Arc<dyn MessageSink> = Arc::new(server.handle());
    let hub = Arc::new(HubAgent::start(
        hub_id,
        config.hub.firmware_version.clone(),
        settings,
        Arc::clone(&sink),
    ));
    hub.subscribe(&listeners)?;
    let hub_task = tokio::spawn(hub.run(cancel.clone()));

    let agent_task = if with_gadgets {
        let agent = gadget_agent(&config, sink);
        let commands = agent.subscribe(&listeners)?;
        Some(tokio::spawn(agent.run(commands, cancel.clone())))
    } else {
        None
    };

    let result = server.run(cancel.clone()).await;
    if let Err(e) = &result {
        error!(category = "relay", error = %e, "Relay failed");
    }
    cancel.cancel();
    let _ = hub_task.await;
    if let Some(task) = agent_task {
        let _ = task.await;
    }
    Ok(result?)
}

async fn run_agent(config: GatewayConfig, relay: Option<String>) -> Result<()> {
    let address = relay.unwrap_or_else(|| config.relay.address());
    info!(category = "agent", relay = %address, "Starting gadget agent");

    let cancel = CancellationToken::new();
    shutdown_on_ctrl_c(cancel.clone());

    let listeners = Arc::new(CommandListeners::new());
    let inbound = Arc::new(RawListeners::new());
    inbound.add(Arc::new(CommandParser::new(Arc::clone(&listeners))))?;

    let mut client_config = RelayClientConfig::new(address);
    client_config.max_message_len = config.relay.max_message_len;
    let client = RelayClient::spawn(client_config, inbound, cancel.clone());

    let agent = gadget_agent(&config, Arc::new(client));
    let commands = agent.subscribe(&listeners)?;
    agent.run(commands, cancel).await;
    Ok(())
}

async fn discover(config: GatewayConfig) -> Result<()> {
    let family = HttpGadgetFamily::new(
        config.agent.device_type.to_string(),
        config.agent.device_http_timeout(),
    );
    let discovery = Discovery::new(config.agent.discovery());
    let mut registry = DeviceRegistry::new(config.agent.periods.registry_capacity);

    let report = discovery
        .run(&family, &mut registry)
        .await
        .context("Discovery failed")?;

    println!("{}", serde_json::to_string_pretty(&report.confirmed)?);
    Ok(())
}
