//! Kaula MCP Client - Main entrypoint.
//!
//! Connects to the configured server, performs the handshake and runs one
//! command against it. Results go to stdout; logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;
use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use kaula_mcp_lib::config::{self, ConfigLoader, KaulaConfig, LogConfig};
use kaula_mcp_lib::error::{set_error_reporter, TracingErrorReporter};
use kaula_mcp_lib::protocol::model::{JsonObject, ListRootsResult};
use kaula_mcp_lib::service::{ClientOptions, Peer};
use kaula_mcp_lib::transport;

/// Command line arguments for the Kaula MCP client.
#[derive(Parser, Debug)]
#[clap(name = "kaula_mcp", version, author, about)]
struct Args {
    /// Path to configuration file
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,

    /// Command to execute
    #[clap(subcommand)]
    command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Print what the server declared during the handshake
    Info,

    /// List the server's tools
    Tools,

    /// Call a tool
    Call {
        /// Tool name
        name: String,

        /// Arguments as a JSON object
        #[clap(short, long)]
        arguments: Option<String>,
    },

    /// Check the server responds
    Ping,

    /// Validate the configuration file
    Validate,

    /// Generate a default configuration file
    GenConfig {
        /// Path to output configuration file
        #[clap(short, long, value_parser)]
        output: PathBuf,
    },
}

/// Initialize the logging system. Logs always go to stderr.
fn init_logging(log: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_file(log.source_location)
        .with_line_number(log.source_location)
        .with_target(false);
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default());

    let result = if log.json {
        registry.with(fmt_layer.json()).try_init()
    } else {
        registry.with(fmt_layer).try_init()
    };
    result.map_err(|e| anyhow!("Failed to set global tracing subscriber: {e}"))
}

fn main() -> ExitCode {
    let args = Args::parse();
    let loader = ConfigLoader::new(args.config.as_deref(), config::ENV_PREFIX);
    let loaded = loader.load();

    let log = loaded
        .as_ref()
        .map(|config| config.log.clone())
        .unwrap_or_default();
    if let Err(e) = init_logging(&log) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }
    set_error_reporter(Arc::new(TracingErrorReporter));

    match run(args.command, loaded) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(
    command: Command,
    loaded: Result<KaulaConfig, kaula_mcp_lib::error::config::ConfigError>,
) -> anyhow::Result<()> {
    // gen-config needs no existing configuration
    if let Command::GenConfig { output } = &command {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        KaulaConfig::default().write_toml(output)?;
        info!("Default configuration written to {:?}", output);
        return Ok(());
    }

    let config = loaded.context("loading configuration")?;
    if let Command::Validate = command {
        config.transport.ensure_complete()?;
        info!("Configuration validated successfully");
        return Ok(());
    }

    config.transport.ensure_complete()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.session.worker_threads)
        .enable_all()
        .build()
        .context("building runtime")?;

    config::init_global_config(config.clone());
    runtime.block_on(session(command, &config))
}

async fn session(command: Command, config: &KaulaConfig) -> anyhow::Result<()> {
    let transport = transport::connect(&config.transport)
        .await
        .context("connecting to server")?;
    let peer = Peer::new(transport, client_options(config));

    let roots = config.client.root_list();
    if !roots.is_empty() {
        peer.on_list_roots(move || {
            let roots = roots.clone();
            async move { Ok(ListRootsResult { roots }) }
        });
    }

    let info = peer.initialize().await.context("initializing session")?;
    info!(server = %info.server_info.name, "Connected");

    let outcome = execute(&peer, command).await;
    if let Err(e) = peer.close().await {
        tracing::warn!(error = %e, "Error closing session");
    }
    outcome
}

// The binary has no model to sample, so it never declares sampling
fn client_options(config: &KaulaConfig) -> ClientOptions {
    let mut options = ClientOptions::from_config(config);
    if options.capabilities.sampling.take().is_some() {
        tracing::warn!(
            "client.sampling is set but this binary cannot answer sampling requests; not declaring it"
        );
    }
    options
}

async fn execute(peer: &Peer, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Info => {
            let info = peer.peer_info()?;
            print_json(&json!({
                "serverInfo": info.server_info,
                "protocolVersion": info.protocol_version,
                "capabilities": info.capabilities,
                "instructions": info.instructions,
            }))
        }
        Command::Tools => {
            for tool in peer.list_tools().await? {
                match tool.description {
                    Some(description) => println!("{}\t{}", tool.name, description),
                    None => println!("{}", tool.name),
                }
            }
            Ok(())
        }
        Command::Call { name, arguments } => {
            let arguments = arguments
                .map(|raw| parse_arguments(&raw))
                .transpose()?;
            let result = peer.call_tool(&name, arguments).await?;
            print_json(&serde_json::to_value(&result)?)?;
            if result.is_error == Some(true) {
                bail!("tool `{name}` reported an error");
            }
            Ok(())
        }
        Command::Ping => {
            peer.ping().await?;
            println!("pong");
            Ok(())
        }
        Command::Validate | Command::GenConfig { .. } => Ok(()),
    }
}

fn parse_arguments(raw: &str) -> anyhow::Result<JsonObject> {
    match serde_json::from_str(raw).context("parsing --arguments")? {
        Value::Object(map) => Ok(map),
        other => bail!("--arguments must be a JSON object, got {other}"),
    }
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_options_never_declare_sampling() {
        let mut config = KaulaConfig::default();
        config.client.sampling = true;
        config.client.roots_list_changed = true;

        let options = client_options(&config);
        assert!(options.capabilities.sampling.is_none());
        assert!(options.capabilities.roots.is_some());
    }
}
