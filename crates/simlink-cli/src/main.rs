//! SimLink CLI
//!
//! Remote-control entry point for a running SimLink daemon. Provides:
//! - `daemon`: run the daemon in the foreground
//! - `attach`/`exchange`: connect to an endpoint and trade documents
//! - `status`, `config`: inspection and setup utilities

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use simlink_core::config::{Config, default_config_path};
use simlink_rpc::{ClientError, RemoteClient};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tokio::time::sleep;

/// Find a binary, preferring the dev build in target/debug if it exists
fn find_binary(name: &str) -> PathBuf {
    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        let dev_binary = dir.join(name);
        if dev_binary.exists() {
            return dev_binary;
        }
    }
    PathBuf::from(name)
}

/// SimLink CLI
#[derive(Parser)]
#[command(name = "simlink")]
#[command(about = "SimLink - remote control for simulation endpoints")]
#[command(version)]
#[command(after_help = "\
Examples:
  simlink daemon                         Run the daemon in foreground
  simlink status                         Check whether the hub is listening
  simlink attach Echo                    Attach and print the first document
  simlink exchange Echo '{\"echo\": 1}'    Send one document, print the reply
  simlink exchange 'Robot*' --count 0    Stream documents until Ctrl-C
  simlink config init                    Write the default config file
")]
struct Cli {
    /// Config file used for defaults (hub port, handshake)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Hub host
    #[arg(long, global = true, default_value = "127.0.0.1")]
    host: String,

    /// Hub port (defaults to the config value)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Seconds to wait for each reply
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon in foreground
    Daemon,

    /// Show whether the hub accepts connections
    Status,

    /// Attach to an endpoint and wait for its next document
    Attach {
        /// Endpoint name or ?/* pattern
        pattern: String,
    },

    /// Attach to an endpoint and exchange documents in lock-step
    Exchange {
        /// Endpoint name or ?/* pattern
        pattern: String,

        /// Document to send each step
        #[arg(default_value = "{}")]
        document: String,

        /// Number of exchanges, 0 for no limit
        #[arg(long, default_value_t = 1)]
        count: u64,

        /// Milliseconds to wait between exchanges
        #[arg(long, default_value_t = 0)]
        interval: u64,
    },

    /// Config file management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Print the effective config
    Show,

    /// Write the default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Connection settings resolved from flags and the config file
struct Target {
    addr: String,
    handshake: String,
    timeout: Duration,
}

impl Target {
    fn resolve(cli: &Cli, config: &Config) -> Self {
        let port = cli.port.unwrap_or(config.hub.listen_port);
        Self {
            addr: format!("{}:{port}", cli.host),
            handshake: config.hub.handshake.clone(),
            timeout: Duration::from_secs(cli.timeout),
        }
    }

    async fn connect(&self) -> Result<RemoteClient> {
        let client = RemoteClient::connect(self.addr.as_str())
            .await
            .with_context(|| format!("Failed to connect to hub at {}. Is it running?", self.addr))?;
        Ok(client.with_reply_timeout(self.timeout))
    }

    async fn attach(&self, pattern: &str) -> Result<RemoteClient> {
        let mut client = self.connect().await?;
        match client.attach(&self.handshake, pattern).await {
            Ok(()) => Ok(client),
            Err(ClientError::Rejected(_)) => bail!(
                "Hub refused '{pattern}': no matching endpoint, not remote controllable, or wrong handshake"
            ),
            Err(e) => Err(e).context("Attach failed"),
        }
    }
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .unwrap_or_else(|| default_config_path())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = config_path(&cli);
    let config = Config::load(&path).with_context(|| format!("Failed to load {}", path.display()))?;
    let target = Target::resolve(&cli, &config);

    match cli.command {
        Commands::Daemon => run_daemon(cli.config.as_deref()),
        Commands::Status => run_status(&target).await,
        Commands::Attach { pattern } => run_attach(&target, &pattern).await,
        Commands::Exchange {
            pattern,
            document,
            count,
            interval,
        } => run_exchange(&target, &pattern, &document, count, interval).await,
        Commands::Config { command } => run_config_command(command, &path, &config),
    }
}

fn run_daemon(config: Option<&Path>) -> Result<()> {
    let binary = find_binary("simlink-daemon");
    let mut command = Command::new(&binary);
    if let Some(config) = config {
        command.arg("--config").arg(config);
    }
    let status = command
        .status()
        .with_context(|| format!("Failed to start {}. Is it installed?", binary.display()))?;
    if !status.success() {
        bail!("simlink-daemon exited with status: {status}");
    }
    Ok(())
}

async fn run_status(target: &Target) -> Result<()> {
    match target.connect().await {
        Ok(client) => {
            let peer: SocketAddr = client.peer_addr();
            println!("Status: Running");
            println!("Hub: {peer}");
            println!("Handshake: {:?}", target.handshake);
        }
        Err(e) => {
            println!("Status: Not running");
            println!("Hub: {}", target.addr);
            println!("Error: {e:#}");
        }
    }
    Ok(())
}

/// Attach without sending; endpoints whose schedule sends first reply at once.
async fn run_attach(target: &Target, pattern: &str) -> Result<()> {
    let mut client = target.attach(pattern).await?;
    println!("Attached to '{pattern}'");

    let document = client
        .recv_document()
        .await
        .context("No document received")?;
    print_document(&document)?;
    client.close().await?;
    Ok(())
}

async fn run_exchange(
    target: &Target,
    pattern: &str,
    document: &str,
    count: u64,
    interval: u64,
) -> Result<()> {
    let outbound: Value =
        serde_json::from_str(document).context("Document argument is not valid JSON")?;
    let mut client = target.attach(pattern).await?;

    let mut done = 0u64;
    while count == 0 || done < count {
        let reply = client
            .exchange(outbound.clone())
            .await
            .with_context(|| format!("Exchange {} failed", done + 1))?;
        print_document(&reply)?;
        done += 1;

        if interval > 0 {
            sleep(Duration::from_millis(interval)).await;
        }
    }

    client.close().await?;
    Ok(())
}

fn print_document(document: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(document)?);
    Ok(())
}

fn run_config_command(command: ConfigCommand, path: &Path, config: &Config) -> Result<()> {
    match command {
        ConfigCommand::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigCommand::Show => print_document(&serde_json::to_value(config)?),
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default()
                .save(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}
