use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "blockfile",
    about = "Blockfile: part-split byte files grouped by block",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store directory
    #[arg(long, global = true, default_value = ".blockfile")]
    pub root: PathBuf,

    /// TOML store configuration
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

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
    /// Create a file
    Make(MakeArgs),
    /// Show a file header
    Stat(FileArgs),
    /// Write a file's contents to stdout
    Cat(FileArgs),
    /// Read a byte range
    Read(ReadArgs),
    /// Append to a file
    Append(AppendArgs),
    /// Write at an offset
    Write(WriteArgs),
    /// Update file metadata from a JSON object
    Meta(MetaArgs),
    /// Delete a file
    Rm(FileArgs),
    /// Delete every file in a block
    RmBlock(BlockArgs),
    /// List the files of a block
    Ls(BlockArgs),
    /// List blocks
    Blocks,
}

#[derive(Args)]
pub struct FileArgs {
    pub block: String,
    pub name: String,
}

#[derive(Args)]
pub struct BlockArgs {
    pub block: String,
}

/// Bytes to write: a literal, a file, or stdin when neither is given.
#[derive(Args)]
pub struct DataArgs {
    pub data: Option<String>,
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
}

#[derive(Args)]
pub struct MakeArgs {
    #[command(flatten)]
    pub target: FileArgs,
    /// Initial contents
    #[arg(long)]
    pub data: Option<String>,
    /// Keep only the newest `--max-size` bytes
    #[arg(long, requires = "max_size")]
    pub circular: bool,
    #[arg(long, requires = "circular")]
    pub max_size: Option<u64>,
    /// Contents are JSON
    #[arg(long)]
    pub ijson: bool,
}

#[derive(Args)]
pub struct ReadArgs {
    #[command(flatten)]
    pub target: FileArgs,
    #[arg(long, default_value = "0")]
    pub offset: u64,
    #[arg(long)]
    pub len: u64,
}

#[derive(Args)]
pub struct AppendArgs {
    #[command(flatten)]
    pub target: FileArgs,
    #[command(flatten)]
    pub input: DataArgs,
}

#[derive(Args)]
pub struct WriteArgs {
    #[command(flatten)]
    pub target: FileArgs,
    #[arg(long)]
    pub offset: u64,
    #[command(flatten)]
    pub input: DataArgs,
}

#[derive(Args)]
pub struct MetaArgs {
    #[command(flatten)]
    pub target: FileArgs,
    /// JSON object; null values delete keys
    pub json: String,
    /// Replace the metadata instead of merging
    #[arg(long)]
    pub replace: bool,
}
