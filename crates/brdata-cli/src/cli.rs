use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "brdata",
    about = "brdata: Brazilian real-estate datasets from local cache, remote artifacts, or the source",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand; each overrides the config file.
#[derive(Args, Clone, Debug)]
pub struct EngineArgs {
    /// Config file (default: <config dir>/brdata/config.toml when present)
    #[arg(long, global = true, env = "BRDATA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Local cache directory
    #[arg(long, global = true, env = "BRDATA_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Remote artifact store base URL
    #[arg(long, global = true, env = "BRDATA_REMOTE_URL")]
    pub remote_url: Option<String>,

    /// Directory mirroring the remote artifact store (wins over --remote-url)
    #[arg(long, global = true, env = "BRDATA_REMOTE_DIR")]
    pub remote_dir: Option<PathBuf>,

    /// Directory of source documents served by the directory fetcher
    #[arg(long, global = true, env = "BRDATA_SOURCE_DIR")]
    pub source_dir: Option<PathBuf>,

    /// Registry TOML replacing the built-in catalog
    #[arg(long, global = true, env = "BRDATA_REGISTRY")]
    pub registry: Option<PathBuf>,

    /// Retry budget for remote requests and fetch bindings
    #[arg(long, global = true, env = "BRDATA_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Format for newly cached payloads
    #[arg(long, global = true, env = "BRDATA_CACHE_FORMAT")]
    pub cache_format: Option<CacheFormatArg>,

    /// Only log warnings and errors
    #[arg(long, short, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered datasets
    List {
        /// Filter by publishing organization (substring, case-insensitive)
        #[arg(long)]
        org: Option<String>,

        /// Filter by geography
        #[arg(long)]
        geography: Option<String>,

        /// Filter by category tag
        #[arg(long)]
        category: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one dataset's descriptor and cache state
    Info {
        /// Dataset name
        name: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Retrieve a dataset table
    Get {
        /// Dataset name
        name: String,

        /// Sub-table (multi-table datasets; default table when omitted)
        #[arg(long)]
        table: Option<String>,

        /// Tier selection
        #[arg(long, default_value = "auto")]
        source: SourceArg,

        /// First date to keep (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last date to keep (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Maximum cache age in days (overrides twice the update frequency)
        #[arg(long)]
        max_age_days: Option<u32>,

        /// What a miss does with --source cache|github
        #[arg(long)]
        miss_policy: Option<MissPolicyArg>,

        /// Rows to print in text mode
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect and maintain the local cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Inspect the remote artifact store
    Remote {
        #[command(subcommand)]
        command: RemoteCommands,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum CacheCommands {
    /// Age and staleness of every registered dataset
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inventory of cached payloads
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove cached payloads
    Clear {
        /// Dataset names to remove
        names: Vec<String>,

        /// Remove every cached payload
        #[arg(long, conflicts_with = "names")]
        all: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Refresh cached payloads from the remote artifact store
    Update {
        /// Dataset names (all registered datasets when omitted)
        names: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum RemoteCommands {
    /// Artifacts available in the remote store
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SourceArg {
    #[value(name = "auto")]
    Auto,
    #[value(name = "cache")]
    Cache,
    #[value(name = "github")]
    Github,
    #[value(name = "fresh")]
    Fresh,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum MissPolicyArg {
    #[value(name = "return-null")]
    ReturnNull,
    #[value(name = "error")]
    Error,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum CacheFormatArg {
    #[value(name = "json")]
    Json,
    #[value(name = "jsonl")]
    Jsonl,
}
