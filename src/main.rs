//! `roomcast` binary: serves the chat API and manages users, rooms and tokens.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use roomcast_core::{ChatStore, Identity, TokenVerifier, UserId};
use roomcast_server::{JwtVerifier, ServerConfig};
use roomcast_store::rooms::RoomRepo;
use roomcast_store::users::UserRepo;
use roomcast_store::{Database, SqliteChatStore};
use roomcast_telemetry::{LogFormat, TelemetryConfig};
use secrecy::SecretString;
use tracing::Level;

#[derive(Parser)]
#[command(name = "roomcast", version, about = "Real-time chat fan-out server")]
struct Cli {
    /// SQLite database file (default: ~/.roomcast/chat.db).
    #[arg(long, env = "DATABASE_PATH", global = true)]
    database: Option<PathBuf>,

    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: Level,

    #[arg(long, env = "LOG_FORMAT", default_value = "pretty", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP and WebSocket server.
    Serve(ServeArgs),
    /// Mint a bearer token for an existing user.
    Token(TokenArgs),
    /// Manage users.
    #[command(subcommand)]
    User(UserCommand),
    /// Manage rooms.
    #[command(subcommand)]
    Room(RoomCommand),
}

#[derive(Args)]
struct SecretArg {
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    #[command(flatten)]
    secret: SecretArg,

    /// Events buffered by the broadcast dispatcher before publishes are rejected.
    #[arg(long, env = "BROADCAST_QUEUE")]
    broadcast_queue: Option<usize>,

    /// Per-session write timeout in milliseconds.
    #[arg(long, env = "WRITE_TIMEOUT_MS")]
    write_timeout_ms: Option<u64>,

    /// Prefix for attachment URLs in outbound frames.
    #[arg(long, env = "ATTACHMENT_BASE_URL")]
    attachment_base_url: Option<String>,
}

#[derive(Args)]
struct TokenArgs {
    #[arg(long)]
    user: i64,

    /// Lifetime in seconds; omit for a token without `exp`.
    #[arg(long)]
    ttl: Option<u64>,

    #[command(flatten)]
    secret: SecretArg,
}

#[derive(Subcommand)]
enum UserCommand {
    Add { username: String },
}

#[derive(Subcommand)]
enum RoomCommand {
    Add {
        name: String,
        #[arg(long)]
        group: bool,
        /// Member user ids.
        #[arg(long = "member")]
        members: Vec<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    roomcast_telemetry::init_telemetry(&TelemetryConfig {
        log_level: cli.log_level,
        format: cli.log_format,
        ..TelemetryConfig::default()
    })?;

    let db_path = cli.database.unwrap_or_else(default_db_path);
    let db = Database::open(&db_path).with_context(|| format!("open database {}", db_path.display()))?;

    match cli.command {
        Command::Serve(args) => serve(db, args).await,
        Command::Token(args) => {
            let user = UserRepo::new(db).get(UserId::new(args.user))?;
            let verifier = JwtVerifier::new(&SecretString::from(args.secret.jwt_secret));
            let token = verifier.issue(&Identity::new(user.id, user.username), args.ttl.map(Duration::from_secs))?;
            println!("{token}");
            Ok(())
        }
        Command::User(UserCommand::Add { username }) => {
            let user = UserRepo::new(db).create(&username)?;
            println!("{}", user.id);
            Ok(())
        }
        Command::Room(RoomCommand::Add { name, group, members }) => {
            let rooms = RoomRepo::new(db);
            let room = rooms.create(&name, group)?;
            for member in members {
                rooms.add_member(room.id, UserId::new(member))?;
            }
            println!("{}", room.id);
            Ok(())
        }
    }
}

async fn serve(db: Database, args: ServeArgs) -> Result<()> {
    let mut config = ServerConfig {
        host: args.host,
        port: args.port,
        ..ServerConfig::default()
    };
    if let Some(capacity) = args.broadcast_queue {
        config.hub.dispatcher.queue_capacity = capacity;
    }
    if let Some(ms) = args.write_timeout_ms {
        config.hub.dispatcher.write_timeout = Duration::from_millis(ms);
    }
    if let Some(url) = args.attachment_base_url {
        config.hub.attachment_base_url = url;
    }

    let store: Arc<dyn ChatStore> = Arc::new(SqliteChatStore::new(db));
    let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtVerifier::new(&SecretString::from(args.secret.jwt_secret)));
    let metrics = roomcast_server::metrics::install_recorder().context("install metrics recorder")?;
    let handle = roomcast_server::start(config, store, verifier, metrics)
        .await
        .context("start server")?;
    tracing::info!(port = handle.port(), "roomcast ready");

    tokio::signal::ctrl_c().await.context("listen for ctrl+c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn default_db_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".roomcast")
        .join("chat.db")
}
