//! CLI definitions for feedstore.
//!
//! Uses clap for argument parsing with derive macros.

use crate::model::PageVariant;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;

/// feedstore - merge fetched timeline pages into a local store
#[derive(Parser, Debug)]
#[command(name = "feedstore")]
#[command(version)]
#[command(about = "Merge fetched social timeline pages into a local SQLite store")]
#[command(long_about = r"
feedstore keeps a local copy of timelines fetched from a federated social
server. Each page you merge is reconciled against what is already stored:
statuses and authors are created once per (domain, id), re-observed statuses
have their changed fields updated, and home timeline pages maintain a
per-viewer index with markers for gaps between fetched pages.

Quick start:
  1. Save a page:   curl -H 'Authorization: ...' https://example.social/api/v1/timelines/home > page.json
  2. Merge it:      feedstore merge page.json --domain example.social --viewer 1
  3. Read it back:  feedstore timeline --domain example.social --viewer 1
")]
pub struct Cli {
    /// Path to the database file
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Output format (defaults to the configured format)
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Be quiet (suppress non-error output)
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Merge one fetched page into the store
    Merge(MergeArgs),

    /// Show a viewer's stored home timeline
    Timeline(TimelineArgs),

    /// Show one stored status
    Status(StatusArgs),

    /// Show store statistics
    Stats,

    /// Show or manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Page file: a JSON array of statuses or {"max_id": ..., "statuses": [...]}
    pub page: PathBuf,

    /// Server domain the ids belong to
    #[arg(long, short = 'd')]
    pub domain: Option<String>,

    /// Viewer the page was fetched for
    #[arg(long)]
    pub viewer: Option<String>,

    /// Feed the page came from
    #[arg(long, default_value = "home")]
    pub variant: VariantArg,

    /// Pagination anchor (max_id) the page was requested with
    #[arg(long)]
    pub anchor: Option<String>,

    /// Observation time (RFC 3339); defaults to now
    #[arg(long)]
    pub observed_at: Option<String>,
}

#[derive(Args, Debug)]
pub struct TimelineArgs {
    /// Server domain
    #[arg(long, short = 'd')]
    pub domain: Option<String>,

    /// Viewer whose timeline to show
    #[arg(long)]
    pub viewer: Option<String>,

    /// Maximum number of entries
    #[arg(long, short = 'n', default_value = "20")]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Status id
    pub id: String,

    /// Server domain
    #[arg(long, short = 'd')]
    pub domain: Option<String>,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Show current configuration
    #[arg(long)]
    pub show: bool,

    /// Print the config file path
    #[arg(long)]
    pub path: bool,

    /// Write a default config file if none exists
    #[arg(long)]
    pub init: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonPretty,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

/// Page variants a caller can merge. `wrapped` only arises inside a page.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VariantArg {
    #[default]
    Home,
    Public,
    Account,
    Favourites,
    Lookup,
}

impl From<VariantArg> for PageVariant {
    fn from(value: VariantArg) -> Self {
        match value {
            VariantArg::Home => Self::Home,
            VariantArg::Public => Self::Public,
            VariantArg::Account => Self::Account,
            VariantArg::Favourites => Self::Favourites,
            VariantArg::Lookup => Self::Lookup,
        }
    }
}
