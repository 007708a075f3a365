//! The `burrow` command line: share a directory, connect to one, or run the
//! relay. The interactive browser here is deliberately small; the real
//! protocol surface lives in the library.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use burrow::connector::{Connector, ConnectorError};
use burrow::relay::{CreateSessionRequest, CreateSessionResponse, RelayState};
use burrow::sandbox::SecureFs;

const DEFAULT_RELAY: &str = "http://127.0.0.1:8080";

#[derive(Parser)]
#[command(
    name = "burrow",
    version,
    about = "Zero-trust folder tunneling through a blind relay"
)]
struct Cli {
    /// Verbose logging (or set BURROW_DEBUG=true).
    #[arg(long, global = true, env = "BURROW_DEBUG")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Share a local directory with one remote peer.
    Share {
        /// Directory to export.
        path: PathBuf,

        /// Relay base URL.
        #[arg(long, env = "BURROW_RELAY", default_value = DEFAULT_RELAY)]
        relay: String,

        /// Reject every mutating operation.
        #[arg(long)]
        readonly: bool,
    },

    /// Connect to a shared directory and browse it.
    Connect {
        /// Session id from the sharer's banner.
        session_id: String,

        /// Relay base URL.
        #[arg(long, env = "BURROW_RELAY", default_value = DEFAULT_RELAY)]
        relay: String,

        /// Passcode; prompted on stdin when absent.
        #[arg(long)]
        passcode: Option<String>,
    },

    /// Run the blind relay.
    Relay {
        /// Listen address.
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: SocketAddr,
    },

    /// Print version and build information.
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Command::Share {
            path,
            relay,
            readonly,
        } => share(path, relay, readonly).await,
        Command::Connect {
            session_id,
            relay,
            passcode,
        } => connect(session_id, relay, passcode).await,
        Command::Relay { listen } => run_relay(listen).await,
        Command::Version => {
            print_version();
            Ok(())
        }
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "burrow=debug" } else { "burrow=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn print_version() {
    println!("burrow {}", env!("CARGO_PKG_VERSION"));
    println!("commit: {}", option_env!("BURROW_COMMIT").unwrap_or("unknown"));
    println!(
        "built:  {}",
        option_env!("BURROW_BUILD_DATE").unwrap_or("unknown")
    );
}

async fn share(path: PathBuf, relay: String, readonly: bool) -> Result<()> {
    let fs = SecureFs::new(&path, readonly)
        .with_context(|| format!("cannot share {}", path.display()))?;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/session/create", relay.trim_end_matches('/')))
        .json(&CreateSessionRequest {
            shared_path: path.display().to_string(),
        })
        .send()
        .await
        .with_context(|| format!("relay unreachable at {relay}"))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("session create failed ({status}): {body}");
    }
    let created: CreateSessionResponse = response
        .json()
        .await
        .context("malformed relay response")?;

    let mode = if readonly { "read-only" } else { "read/write" };
    println!("----------------------------------------------");
    println!("  Sharing:  {} ({mode})", path.display());
    println!("  Session:  {}", created.session_id);
    println!("  Passcode: {}", created.passcode);
    println!("  Relay:    {relay}");
    println!();
    println!("  Give the session id and passcode to your peer.");
    println!("  Waiting for them to connect; Ctrl-C to stop.");
    println!("----------------------------------------------");

    burrow::sharer::serve_share(&relay, &created.session_id, &created.passcode, fs)
        .await
        .context("share ended with an error")?;
    println!("Share finished.");
    Ok(())
}

async fn connect(session_id: String, relay: String, passcode: Option<String>) -> Result<()> {
    let passcode = match passcode {
        Some(code) => code,
        None => tokio::task::spawn_blocking(|| rpassword::prompt_password("Passcode: "))
            .await?
            .context("cannot read passcode")?,
    };

    println!("Connecting to session {session_id} ...");
    let connector = Connector::open(&relay, &session_id, &passcode)
        .await
        .context("could not establish the tunnel (wrong passcode or stale session?)")?;
    println!("Connected. Type 'help' for commands.");

    let result = browse(&connector).await;
    connector.close().await;
    result
}

/// Minimal line-oriented browser standing in for a richer UI.
async fn browse(connector: &Connector) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // While the user thinks, keep the tunnel and the relay's idle timers
    // fed. Pings only fire between commands, so the one-outstanding-request
    // rule holds.
    let mut keepalive = tokio::time::interval(std::time::Duration::from_secs(30));

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = keepalive.tick() => {
                connector.ping().await.context("session ended")?;
                continue;
            }
        };
        let Some(line) = line else {
            return Ok(());
        };
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            continue;
        };
        let args: Vec<&str> = parts.collect();

        let outcome = match (command, args.as_slice()) {
            ("help", _) => {
                println!("commands:");
                println!("  ls [path]           list a directory");
                println!("  stat <path>         show one entry");
                println!("  cat <path>          print a file");
                println!("  get <remote> [to]   download a file");
                println!("  put <local> [to]    upload a file");
                println!("  rm <path>           delete (recursive)");
                println!("  mv <old> <new>      rename");
                println!("  mkdir <path>        create a directory");
                println!("  ping                probe the sharer");
                println!("  quit                leave");
                Ok(())
            }
            ("quit" | "exit", _) => return Ok(()),
            ("ls", args) => cmd_ls(connector, args.first().copied().unwrap_or("/")).await,
            ("stat", [path]) => cmd_stat(connector, path).await,
            ("cat", [path]) => cmd_cat(connector, path).await,
            ("get", [remote]) => cmd_get(connector, remote, None).await,
            ("get", [remote, local]) => cmd_get(connector, remote, Some(local)).await,
            ("put", [local]) => cmd_put(connector, local, None).await,
            ("put", [local, remote]) => cmd_put(connector, local, Some(remote)).await,
            ("rm", [path]) => connector.delete(path).await,
            ("mv", [old, new]) => connector.rename(old, new).await,
            ("mkdir", [path]) => connector.mkdir(path, 0o755).await,
            ("ping", _) => {
                let started = std::time::Instant::now();
                connector.ping().await.map(|_| {
                    println!("pong in {:?}", started.elapsed());
                })
            }
            _ => {
                println!("unknown command; try 'help'");
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {}
            // Remote errors are conversational; tunnel errors are final.
            Err(e @ ConnectorError::Remote { .. }) => println!("error: {e}"),
            Err(e) => return Err(e).context("session ended"),
        }
    }
}

async fn cmd_ls(connector: &Connector, path: &str) -> Result<(), ConnectorError> {
    let files = connector.list(path).await?;
    for f in files {
        let kind = if f.is_dir { "d" } else { "-" };
        println!("{kind} {:>10}  {}", f.size, f.name);
    }
    Ok(())
}

async fn cmd_stat(connector: &Connector, path: &str) -> Result<(), ConnectorError> {
    let info = connector.stat(path).await?;
    println!(
        "{}  size={}  mode={:o}  mtime={}  dir={}",
        info.name, info.size, info.mode, info.mtime, info.is_dir
    );
    Ok(())
}

async fn cmd_cat(connector: &Connector, path: &str) -> Result<(), ConnectorError> {
    let mut buf = Vec::new();
    connector.download(path, &mut buf).await?;
    println!("{}", String::from_utf8_lossy(&buf));
    Ok(())
}

async fn cmd_get(
    connector: &Connector,
    remote: &str,
    local: Option<&str>,
) -> Result<(), ConnectorError> {
    let target = local
        .map(str::to_string)
        .unwrap_or_else(|| basename(remote));
    match tokio::fs::File::create(&target).await {
        Ok(mut file) => {
            // A failed transfer leaves no partial artifact behind.
            match connector.download(remote, &mut file).await {
                Ok(n) => {
                    println!("{n} bytes -> {target}");
                    Ok(())
                }
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&target).await;
                    Err(e)
                }
            }
        }
        Err(e) => {
            println!("cannot create {target}: {e}");
            Ok(())
        }
    }
}

async fn cmd_put(
    connector: &Connector,
    local: &str,
    remote: Option<&str>,
) -> Result<(), ConnectorError> {
    let data = match tokio::fs::read(local).await {
        Ok(data) => data,
        Err(e) => {
            println!("cannot read {local}: {e}");
            return Ok(());
        }
    };
    let target = remote
        .map(str::to_string)
        .unwrap_or_else(|| basename(local));

    let mut offset: i64 = 0;
    for chunk in data.chunks(burrow::core::DOWNLOAD_CHUNK_SIZE) {
        connector.write(&target, offset, chunk.to_vec()).await?;
        offset += chunk.len() as i64;
    }
    println!("{offset} bytes -> {target}");
    Ok(())
}

fn basename(path: &str) -> String {
    path.rsplit('/')
        .find(|part| !part.is_empty())
        .unwrap_or("download")
        .to_string()
}

async fn run_relay(listen: SocketAddr) -> Result<()> {
    println!("----------------------------------------------");
    println!("  burrow relay {}", env!("CARGO_PKG_VERSION"));
    println!("  Listening on {listen}");
    println!("  Sessions and frames stay in memory only.");
    println!("----------------------------------------------");

    burrow::relay::serve(listen, RelayState::new())
        .await
        .context("relay failed")?;
    Ok(())
}
