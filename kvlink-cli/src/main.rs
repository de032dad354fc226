//! kvlink: run single storage commands from the shell.
//!
//! Connection and pool settings come from `{PREFIX}_REDIS_*` / `REDIS_*`
//! environment variables, with a few command line overrides. Logs go to
//! stderr and are filtered with `RUST_LOG`.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kvlink_client::{
    parse_duration, ConnectionConfig, ConnectionPool, Dialer, PoolSettings, StorageClient,
    TtlPolicy,
};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "kvlink",
    version,
    about = "Pooled command line client for Redis-compatible stores",
    after_help = r#"EXAMPLES
  $ kvlink set greeting hello --ttl 30s
  $ kvlink get greeting
  $ APP_REDIS_ADDRESS=10.0.0.5:6379 kvlink --prefix APP keys 'user:*'
  $ kvlink config"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        default_value = "",
        help = "Environment prefix: {PREFIX}_REDIS_* is read before REDIS_*"
    )]
    prefix: String,
    #[arg(long, help = "Server address (host:port), overrides the environment")]
    address: Option<String>,
    #[arg(long, help = "Logical database, overrides the environment")]
    database: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    #[command(about = "Check that the server answers")]
    Ping,
    #[command(about = "Print a value; missing keys print an empty line")]
    Get { key: String },
    #[command(about = "Store a value, optionally with an expiry")]
    Set {
        key: String,
        value: String,
        #[arg(long, value_parser = parse_ttl, help = "Expiry, e.g. 30, 500ms, 2m (whole seconds are kept)")]
        ttl: Option<Duration>,
    },
    #[command(about = "Delete keys and print how many existed")]
    Del {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    #[command(about = "Increment an integer value")]
    Incr {
        key: String,
        #[arg(long, default_value_t = 1, allow_hyphen_values = true)]
        by: i64,
    },
    #[command(about = "List keys matching a glob pattern")]
    Keys {
        #[arg(default_value = "*")]
        pattern: String,
    },
    #[command(about = "List the members of a set")]
    Members { key: String },
    #[command(about = "Publish a message and print the number of receivers")]
    Publish { channel: String, message: String },
    #[command(about = "Print the effective settings as JSON")]
    Config,
}

#[derive(Debug, Serialize)]
struct Settings {
    connection: ConnectionConfig,
    pool: PoolSettings,
}

impl Settings {
    fn load(cli: &Cli) -> Self {
        let mut connection = ConnectionConfig::from_env(&cli.prefix);
        if let Some(address) = &cli.address {
            connection.address = address.clone();
        }
        if let Some(database) = cli.database {
            connection.database = database;
        }
        Settings {
            connection,
            pool: PoolSettings::from_env(&cli.prefix),
        }
    }

    fn redacted(&self) -> Settings {
        let mut connection = self.connection.clone();
        if connection.password.is_some() {
            connection.password = Some("***".to_string());
        }
        Settings {
            connection,
            pool: self.pool.clone(),
        }
    }

    fn connect(self) -> StorageClient {
        debug!(address = %self.connection.address, sentinel = self.connection.uses_sentinel(), "building client");
        let dialer = Dialer::new(self.connection);
        let pool = ConnectionPool::new(self.pool, dialer.into_factory());
        StorageClient::builder().namespace("kvlink").pool(pool).build()
    }
}

fn parse_ttl(value: &str) -> Result<Duration, String> {
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    parse_duration(value).ok_or_else(|| format!("invalid duration `{value}` (e.g. 30, 500ms, 2m)"))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = Settings::load(&cli);

    if cli.command == Command::Config {
        let json = serde_json::to_string_pretty(&settings.redacted())?;
        println!("{json}");
        return Ok(());
    }

    let client = settings.connect();
    run(&client, cli.command)
}

fn run(client: &StorageClient, command: Command) -> Result<()> {
    match command {
        Command::Ping => {
            client.ping().context("ping failed")?;
            println!("PONG");
        }
        Command::Get { key } => {
            let value = client.get(&key).with_context(|| format!("get {key}"))?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        Command::Set { key, value, ttl } => {
            let policy = ttl.map(TtlPolicy::Duration).unwrap_or_default();
            client
                .set_with_ttl(&key, value.as_bytes(), &policy)
                .with_context(|| format!("set {key}"))?;
            println!("OK");
        }
        Command::Del { keys } => {
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            println!("{}", client.delete(&keys).context("delete failed")?);
        }
        Command::Incr { key, by } => {
            let value = client.increment(&key, by).with_context(|| format!("incr {key}"))?;
            println!("{value}");
        }
        Command::Keys { pattern } => {
            for key in client.keys(&pattern).context("scan failed")? {
                println!("{}", String::from_utf8_lossy(&key));
            }
        }
        Command::Members { key } => {
            let members = client
                .get_all_from_set(&key)
                .with_context(|| format!("members of {key}"))?;
            for member in members {
                println!("{}", String::from_utf8_lossy(&member));
            }
        }
        Command::Publish { channel, message } => {
            let receivers = client
                .publish(&channel, message.as_bytes())
                .with_context(|| format!("publish to {channel}"))?;
            println!("{receivers}");
        }
        Command::Config => unreachable!("handled before connecting"),
    }
    Ok(())
}
