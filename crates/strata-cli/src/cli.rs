use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use strata_types::ContentKind;

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Strata: content ingestion into a database and a sharded blob tree",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file
    #[arg(short, long, global = true, default_value = "strata.toml")]
    pub config: PathBuf,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the database and every configured shard root
    Init(InitArgs),
    /// Reserve the next blob location for a kind
    Allocate(AllocateArgs),
    /// Ingest one file (or one JSON payload for row-only kinds)
    Ingest(IngestArgs),
    /// Ingest every entry of a JSON manifest in one transaction
    Batch(BatchArgs),
    /// Show a record and optionally extract its blob
    Read(ReadArgs),
    /// Delete a record and its files
    Delete(DeleteArgs),
    /// Show record counts and shard cursors per kind
    Status(StatusArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// Owner to register
    #[arg(long, default_value = "default")]
    pub owner: String,
}

#[derive(Args)]
pub struct AllocateArgs {
    pub kind: ContentKind,
}

#[derive(Args)]
pub struct IngestArgs {
    pub kind: ContentKind,
    pub file: PathBuf,
    /// Client-supplied id; generated when absent
    #[arg(long)]
    pub id: Option<String>,
    #[arg(long, default_value = "default")]
    pub owner: String,
    /// Original file name; defaults to the name of FILE
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args)]
pub struct BatchArgs {
    /// JSON array of `{ "id", "kind", "file", "name", "payload" }` entries
    pub manifest: PathBuf,
    #[arg(long, default_value = "default")]
    pub owner: String,
}

#[derive(Args)]
pub struct ReadArgs {
    pub id: String,
    /// Write the blob to this path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub id: String,
}

#[derive(Args)]
pub struct StatusArgs {}
