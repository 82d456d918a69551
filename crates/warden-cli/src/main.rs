//! Warden Command-Line Client
//!
//! Compiles, explains, and runs permission-aware reads from the shell.

mod commands;
mod formatter;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};
use formatter::OutputFormat;
use tracing_subscriber::EnvFilter;
use warden_core::config::DEFAULT_QUERY_TIMEOUT_SECS;
use warden_core::sql::Dialect;
use warden_core::EngineConfig;

/// Warden Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version, about = "Permission-aware query compiler and executor")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Output format
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the root statement and its parameters without running it
    Compile {
        #[command(flatten)]
        request: RequestArgs,

        /// SQL dialect to compile for
        #[arg(long, default_value = "postgres")]
        dialect: Dialect,
    },

    /// Print the annotated query tree and the root statement
    Explain {
        #[command(flatten)]
        request: RequestArgs,

        /// SQL dialect to compile for
        #[arg(long, default_value = "postgres")]
        dialect: Dialect,
    },

    /// Run a read against an SQLite database
    Query {
        #[command(flatten)]
        request: RequestArgs,

        /// SQLite database file
        #[arg(long)]
        database: PathBuf,
    },
}

/// Everything that describes one read and its caller.
#[derive(ClapArgs, Debug)]
pub struct RequestArgs {
    /// Root collection
    pub collection: String,

    /// Schema snapshot (JSON)
    #[arg(short = 's', long)]
    pub schema: PathBuf,

    /// Query as inline JSON
    #[arg(short = 'q', long, conflicts_with = "query_file")]
    pub query: Option<String>,

    /// Query JSON file
    #[arg(long)]
    pub query_file: Option<PathBuf>,

    /// Permission records (JSON list); without it the caller must be admin
    #[arg(short = 'p', long)]
    pub permissions: Option<PathBuf>,

    /// Caller user id
    #[arg(long)]
    pub user: Option<String>,

    /// Caller role id
    #[arg(long)]
    pub role: Option<String>,

    /// Caller policy ids
    #[arg(long = "policy")]
    pub policies: Vec<String>,

    /// Run as admin, bypassing permissions
    #[arg(long)]
    pub admin: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

/// Engine tuning knobs.
#[derive(ClapArgs, Debug)]
pub struct EngineArgs {
    /// Limit applied to root queries that do not set one
    #[arg(long)]
    pub default_limit: Option<u64>,

    /// Maximum nesting depth of relational fields
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Parent keys per nested sub-query
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Sibling sub-queries in flight at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Request timeout in seconds, 0 to disable
    #[arg(long, default_value_t = DEFAULT_QUERY_TIMEOUT_SECS)]
    pub timeout: u64,
}

impl EngineArgs {
    /// Map the flags onto an engine configuration.
    pub fn into_config(self) -> EngineConfig {
        let mut config = EngineConfig::new();
        if let Some(limit) = self.default_limit {
            config = config.with_default_limit(limit);
        }
        if let Some(depth) = self.max_depth {
            config = config.with_max_relational_depth(depth);
        }
        if let Some(size) = self.batch_size {
            config = config.with_relational_batch_size(size);
        }
        if let Some(count) = self.concurrency {
            config = config.with_max_concurrent_subqueries(count);
        }
        if self.timeout == 0 {
            config.without_query_timeout()
        } else {
            config.with_query_timeout(Duration::from_secs(self.timeout))
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warden_cli=info,warden_core=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let formatter = formatter::create_formatter(args.format);

    match commands::run(args.command, &*formatter).await {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e));
            std::process::exit(1);
        }
    }
}
