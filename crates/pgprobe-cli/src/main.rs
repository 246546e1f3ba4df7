use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pgprobe_client::{Client, ConnConfig, Protocol};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod blocks;

use blocks::Settings;

#[derive(Parser)]
#[command(name = "pgprobe")]
#[command(version)]
#[command(about = "pgprobe - PostgreSQL parameter binding and cursor smoke tests")]
struct Cli {
    #[command(flatten)]
    conn: ConnArgs,

    /// Don't print status messages
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use the binary cursor
    #[arg(short, long, global = true)]
    binary: bool,

    /// How many times repeated blocks run
    #[arg(
        short = 'n',
        long,
        global = true,
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    repeat: u32,

    /// Run the stress block
    #[arg(long, global = true)]
    stress: bool,

    /// Skip the regular demonstration blocks
    #[arg(long, global = true)]
    no_regular: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct ConnArgs {
    /// Full libpq connection string, overrides the other connection options
    #[arg(long, env = "PGPROBE_DSN", global = true)]
    dsn: Option<String>,

    /// Database name
    #[arg(long, env = "PGPROBE_TESTDB", default_value = pgprobe_client::config::DEFAULT_DBNAME, global = true)]
    dbname: String,

    /// Server host
    #[arg(long, env = "PGPROBE_TESTDB_HOST", global = true)]
    host: Option<String>,

    /// Server port
    #[arg(long, env = "PGPROBE_TESTDB_PORT", global = true)]
    port: Option<u16>,

    /// User name
    #[arg(long, env = "PGPROBE_TESTDB_USER", global = true)]
    user: Option<String>,

    /// Password
    #[arg(long, env = "PGPROBE_TESTDB_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,
}

impl ConnArgs {
    fn config(&self) -> ConnConfig {
        ConnConfig {
            dbname: self.dbname.clone(),
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Bind parameters of many types and print the results (default)
    Params,
    /// Fetch one result set as lists, dicts, ordered dicts and custom rows
    Dictfetch {
        /// Query to run
        #[arg(long, conflicts_with = "file")]
        query: Option<String>,
        /// File holding the query to run
        #[arg(short, long, conflicts_with = "query")]
        file: Option<PathBuf>,
    },
    /// Show quoted and bound forms of sample values (no database needed)
    Adapt,
    /// Bind 1499 parameters into one SELECT, --repeat times
    Stress,
    /// Run params and dictfetch, then stress when --stress is set
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.quiet {
        "warn"
    } else {
        "pgprobe=info,pgprobe_client=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings {
        verbose: !cli.quiet,
        protocol: if cli.binary {
            Protocol::Binary
        } else {
            Protocol::Text
        },
        repeat: cli.repeat,
    };

    match cli.command.unwrap_or(Commands::Params) {
        Commands::Adapt => blocks::adapt(&settings)?,
        Commands::Dictfetch { query, file } => {
            let sql = load_query(query, file)?;
            let client = connect(&cli.conn, &settings).await?;
            blocks::dictfetch(&client, &settings, &sql).await?;
            client.close().await?;
        }
        Commands::Stress => {
            let client = connect(&cli.conn, &settings).await?;
            blocks::stress(&client, &settings).await?;
            client.close().await?;
        }
        Commands::Params => {
            let client = connect(&cli.conn, &settings).await?;
            if !cli.no_regular {
                blocks::params(&client, &settings).await?;
            }
            if cli.stress {
                blocks::stress(&client, &settings).await?;
            }
            client.close().await?;
        }
        Commands::All => {
            let client = connect(&cli.conn, &settings).await?;
            if !cli.no_regular {
                blocks::params(&client, &settings).await?;
                blocks::dictfetch(&client, &settings, blocks::DEFAULT_DICTFETCH_QUERY).await?;
            }
            if cli.stress {
                blocks::stress(&client, &settings).await?;
            }
            client.close().await?;
        }
    }

    Ok(())
}

async fn connect(args: &ConnArgs, settings: &Settings) -> Result<Client> {
    let client = match &args.dsn {
        Some(dsn) => Client::connect(dsn).await,
        None => Client::connect_config(&args.config()).await,
    }
    .context("Failed to connect to the test database")?;

    settings.status("Connection established");
    if settings.protocol == Protocol::Binary {
        settings.status("Using a binary cursor");
    }
    let version = client
        .server_version()
        .await
        .context("Failed to read server version")?;
    info!("Server version {}", version);
    Ok(client)
}

fn load_query(query: Option<String>, file: Option<PathBuf>) -> Result<String> {
    let sql = match (query, file) {
        (Some(query), _) => query,
        (None, Some(path)) => fs::read_to_string(&path)
            .with_context(|| format!("Failed to read SQL file {}", path.display()))?,
        (None, None) => return Ok(blocks::DEFAULT_DICTFETCH_QUERY.to_string()),
    };
    if sql.trim().is_empty() {
        anyhow::bail!("No query to run: the query text is empty");
    }
    Ok(sql)
}
