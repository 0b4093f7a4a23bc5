//! Anonfly CLI: identity management and terminal chat.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use anonfly_client::config::{
    default_identity_path, ENV_API_URL, ENV_IDENTITY_PATH, ENV_RECONNECT_DELAY_MS, ENV_WS_URL,
};
use anonfly_client::servers::{self, ServerCache, GEOLOCATION_URL};
use anonfly_client::{
    ChatClient, ChatEvent, ChatRuntime, ClientConfig, DisplayedMessage, HandshakeClient,
    HttpVerificationService, IdentityStore, MessageKind, SessionCache, WsConnector,
};
use anonfly_common::helpers::DEFAULT_API_URL;

#[derive(Parser, Debug)]
#[command(name = "anonfly")]
#[command(about = "Anonymous end-to-end encrypted group chat")]
struct Cli {
    #[command(flatten)]
    conn: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Identity-verification server
    #[arg(long, global = true, env = ENV_API_URL, default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Chat websocket endpoint (derived from --api-url when omitted)
    #[arg(long, global = true, env = ENV_WS_URL)]
    ws_url: Option<String>,

    /// Identity file
    #[arg(long, global = true, env = ENV_IDENTITY_PATH)]
    identity: Option<PathBuf>,

    /// Delay before the single reconnect attempt
    #[arg(long, global = true, env = ENV_RECONNECT_DELAY_MS, default_value_t = 3000)]
    reconnect_delay_ms: u64,
}

impl ConnectionArgs {
    fn config(&self, api_url: &str) -> Result<ClientConfig> {
        let mut config = ClientConfig::for_server(api_url)?;
        if let Some(ws_url) = &self.ws_url {
            config.ws_url = ws_url.clone();
        }
        config.identity_path = self
            .identity
            .clone()
            .unwrap_or_else(default_identity_path);
        config.reconnect_delay = Duration::from_millis(self.reconnect_delay_ms);
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new identity, replacing any existing one
    Keygen {
        /// Display name (3-32 letters or digits)
        #[arg(short, long)]
        name: String,
    },

    /// Show the stored identity
    Whoami,

    /// Delete the stored identity
    Reset {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },

    /// List regional servers
    Servers {
        /// Look up the nearest server by IP location (cached for 24h)
        #[arg(long)]
        select: bool,
    },

    /// Join a room and chat
    Chat {
        /// Room id
        #[arg(short, long)]
        room: String,

        /// Use the nearest regional server instead of --api-url
        #[arg(long)]
        auto_server: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    anonfly_common::init_tracing_with_default("warn");

    let cli = Cli::parse();

    match cli.command {
        Command::Keygen { name } => {
            let config = cli.conn.config(&cli.conn.api_url)?;
            let store = IdentityStore::open(&config.identity_path);
            let identity = store.generate(&name)?;

            println!("Identity:  {}", config.identity_path.display());
            println!("Name:      {}", identity.display_name());
            println!("AID:       {}", identity.aid());
        }
        Command::Whoami => {
            let config = cli.conn.config(&cli.conn.api_url)?;
            match IdentityStore::open(&config.identity_path).load()? {
                Some(identity) => {
                    println!("Name:      {}", identity.display_name());
                    println!("AID:       {}", identity.aid());
                    println!("Signing:   {}", identity.signing_public_spki());
                    println!("Exchange:  {}", identity.exchange_public_spki());
                }
                None => println!("No identity. Run `anonfly keygen --name <name>`."),
            }
        }
        Command::Reset { yes } => {
            let config = cli.conn.config(&cli.conn.api_url)?;
            if !yes && !confirm("Delete your identity? This cannot be undone. [y/N] ").await? {
                println!("Aborted.");
                return Ok(());
            }
            IdentityStore::open(&config.identity_path).clear()?;
            println!("Identity deleted.");
        }
        Command::Servers { select } => {
            for server in &servers::SERVERS {
                println!("{:<5} {:<20} {}", server.id, server.region, server.url);
            }
            if select {
                let best = pick_server().await?;
                println!("Nearest: {} ({})", best.id, best.region);
            }
        }
        Command::Chat { room, auto_server } => {
            let api_url = if auto_server {
                pick_server().await?.url.to_string()
            } else {
                cli.conn.api_url.clone()
            };
            let config = cli.conn.config(&api_url)?;
            chat(config, room).await?;
        }
        Command::Version => {
            println!("anonfly {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

async fn pick_server() -> Result<&'static servers::ServerInfo> {
    let cache_path = dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("anonfly")
        .join("server.json");
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    Ok(servers::select_best_server(&ServerCache::new(cache_path), &client, GEOLOCATION_URL).await)
}

async fn confirm(prompt: &str) -> Result<bool> {
    use tokio::io::AsyncWriteExt;

    let mut stdout = tokio::io::stdout();
    stdout.write_all(prompt.as_bytes()).await?;
    stdout.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

async fn chat(config: ClientConfig, room: String) -> Result<()> {
    let identity = IdentityStore::open(&config.identity_path)
        .load()?
        .ok_or_else(|| anyhow!("no identity, run `anonfly keygen --name <name>` first"))?;
    let identity = Arc::new(identity);

    let service = HttpVerificationService::new(&config.api_base_url, config.request_timeout)?;
    let handshake = HandshakeClient::new(Arc::new(service), SessionCache::new());
    let session = handshake
        .establish(&identity)
        .await
        .with_context(|| format!("login to {} failed", config.api_base_url))?;
    println!("Logged in as {} ({})", session.display_name, session.aid);

    let connector = Arc::new(WsConnector::new(config.ws_url.clone()));
    let (mut handle, task) = ChatRuntime::start(
        connector,
        session,
        ChatClient::new(identity.clone()),
        config.reconnect_delay,
    )
    .await
    .context("could not open chat connection")?;

    handle.join(&room)?;
    println!("Commands: /join <room>, /leave, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                match line.split_once(' ').unwrap_or((line, "")) {
                    ("", _) => {}
                    ("/quit", _) => break,
                    ("/leave", _) => handle.leave()?,
                    ("/join", room) if !room.trim().is_empty() => handle.join(room.trim())?,
                    (cmd, _) if cmd.starts_with('/') => println!("Unknown command {cmd}"),
                    _ => handle.send(line)?,
                }
            }
            event = handle.events.recv() => {
                let Some(event) = event else { break };
                print_event(&event, identity.aid().as_str());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // Best effort: let the runtime send the leave frame.
    if handle.shutdown().is_ok()
        && tokio::time::timeout(Duration::from_secs(2), task).await.is_err()
    {
        debug!("Runtime did not stop in time");
    }
    handshake.sessions().clear();
    Ok(())
}

fn print_event(event: &ChatEvent, self_id: &str) {
    match event {
        ChatEvent::Connected => println!("* connected"),
        ChatEvent::Disconnected => println!("* disconnected"),
        ChatEvent::Joined { room_id } => println!("* joined {room_id}"),
        ChatEvent::KeyStatusChanged { room_id, status } => {
            println!("* room key for {room_id}: {status}")
        }
        ChatEvent::Message(message) => print_message(message, self_id),
        ChatEvent::MessageRetracted { message_id } => println!("* message {message_id} deleted"),
        ChatEvent::ParticipantJoined(_) | ChatEvent::ParticipantLeft { .. } => {}
        ChatEvent::Left { room_id } => println!("* left {room_id}"),
        ChatEvent::Error(message) => println!("! {message}"),
    }
}

fn print_message(message: &DisplayedMessage, self_id: &str) {
    if message.kind == MessageKind::System {
        println!("* {}", message.content);
        return;
    }
    let who = if message.sender_id == self_id {
        "you"
    } else {
        message.sender_display_name.as_str()
    };
    let mut flags = String::new();
    if !message.encrypted {
        flags.push_str(" [unencrypted]");
    }
    if message.signature_valid == Some(false) {
        flags.push_str(" [bad signature]");
    }
    println!("{who}:{flags} {}", message.content);
}
