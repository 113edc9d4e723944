//! Clap derive structures for the `fleetwatch` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

use fleetwatch_core::RefetchPolicy;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// fleetwatch -- live dashboard for sensor fleets
#[derive(Debug, Parser)]
#[command(
    name = "fleetwatch",
    version,
    about = "Watch sensor fleets and their telemetry from the command line",
    long_about = "Reads devices and telemetry samples from a hosted Postgres project,\n\
        classifies each device as online or offline, and keeps the view live\n\
        through change notifications.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Backend profile to use
    #[arg(long, short = 'p', env = "FLEETWATCH_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Project URL (overrides profile)
    #[arg(long, env = "FLEETWATCH_URL", global = true)]
    pub url: Option<String>,

    /// Project API key
    #[arg(long, env = "FLEETWATCH_API_KEY", global = true, hide_env = true)]
    pub api_key: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "FLEETWATCH_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "FLEETWATCH_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "FLEETWATCH_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List devices or show one device with its latest reading
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Online / offline counts for the whole fleet
    Summary,

    /// Map markers for every device
    #[command(alias = "map")]
    Markers,

    /// Keep a live view open and print every update
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  DEVICES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: DevicesCommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List devices with online status (table output is paginated)
    #[command(alias = "ls")]
    List {
        /// Page to show (1-based, clamped to the last page)
        #[arg(long, default_value = "1")]
        page: usize,

        /// Rows per page
        #[arg(long, default_value = "5", value_parser = clap::value_parser!(u64).range(1..=500))]
        page_size: u64,

        /// Show every row without paging
        #[arg(long, conflicts_with_all = ["page", "page_size"])]
        all: bool,
    },

    /// Show one device and its newest telemetry sample
    Get {
        /// Device id (numeric or text)
        id: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  WATCH
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Watch a single device instead of the whole fleet
    #[arg(long, short = 'd')]
    pub device: Option<String>,

    /// How notifications arriving mid-refetch are handled (overrides profile)
    #[arg(long)]
    pub refetch: Option<RefetchArg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RefetchArg {
    /// Every notification starts its own refetch
    Independent,
    /// Collapse notifications during a refetch into one follow-up
    Coalesce,
}

impl From<RefetchArg> for RefetchPolicy {
    fn from(arg: RefetchArg) -> Self {
        match arg {
            RefetchArg::Independent => Self::Independent,
            RefetchArg::Coalesce => Self::Coalesce,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or replace a profile and make it the default
    Init {
        /// Project URL
        #[arg(long)]
        project_url: String,

        /// Read the API key from this environment variable at runtime
        #[arg(long)]
        api_key_env: Option<String>,

        /// Store --api-key in the system keyring instead of the config file
        #[arg(long)]
        keyring: bool,
    },

    /// Display current configuration (secrets masked)
    Show,

    /// Set a profile value
    Set {
        /// Profile key, e.g. "telemetry_table" or "refetch"
        key: String,

        /// Value to set
        value: String,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store an API key (read from stdin) in the system keyring for the
    /// active profile
    SetKey,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
