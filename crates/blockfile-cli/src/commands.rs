use std::io::{Read, Write};
use std::sync::Arc;

use anyhow::Context;
use blockfile_core::{BlockStore, StoreConfig};
use blockfile_store::FsBackend;
use blockfile_types::{BlockFile, BlockId, FileOpts};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde_json::json;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => StoreConfig::from_file(path)?,
        None => StoreConfig::default(),
    };
    let backend = FsBackend::open(&cli.root)
        .await
        .with_context(|| format!("opening store at {}", cli.root.display()))?;
    let store = BlockStore::open(Arc::new(backend), config)?;

    let result = dispatch(&store, cli.command, cli.format).await;
    let flushed = store.shutdown().await;
    result?;
    flushed?;
    Ok(())
}

async fn dispatch(store: &BlockStore, command: Command, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        Command::Make(args) => cmd_make(store, args, format).await,
        Command::Stat(args) => cmd_stat(store, args, format).await,
        Command::Cat(args) => cmd_cat(store, args).await,
        Command::Read(args) => cmd_read(store, args, format).await,
        Command::Append(args) => {
            let (block, name) = target(&args.target)?;
            let data = input_bytes(&args.input)?;
            store.append_data(&block, &name, &data).await?;
            report_write(store, &block, &name, data.len(), format).await
        }
        Command::Write(args) => {
            let (block, name) = target(&args.target)?;
            let data = input_bytes(&args.input)?;
            store.write_at(&block, &name, args.offset, &data).await?;
            report_write(store, &block, &name, data.len(), format).await
        }
        Command::Meta(args) => {
            let (block, name) = target(&args.target)?;
            let value: serde_json::Value =
                serde_json::from_str(&args.json).context("metadata must be a JSON object")?;
            store.write_meta_json(&block, &name, value, !args.replace).await?;
            cmd_stat(store, args.target, format).await
        }
        Command::Rm(args) => {
            let (block, name) = target(&args)?;
            store.delete_file(&block, &name).await?;
            if format == OutputFormat::Text {
                println!("{} Deleted {}/{}", "✓".green(), block.as_str().cyan(), name.bold());
            }
            Ok(())
        }
        Command::RmBlock(args) => {
            let block = BlockId::new(args.block)?;
            store.delete_block(&block).await?;
            if format == OutputFormat::Text {
                println!("{} Deleted block {}", "✓".green(), block.as_str().cyan());
            }
            Ok(())
        }
        Command::Ls(args) => cmd_ls(store, args, format).await,
        Command::Blocks => {
            let ids = store.list_block_ids().await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ids)?),
                OutputFormat::Text if ids.is_empty() => println!("No blocks."),
                OutputFormat::Text => {
                    for id in ids {
                        println!("{}", id.as_str().cyan());
                    }
                }
            }
            Ok(())
        }
    }
}

async fn cmd_make(store: &BlockStore, args: MakeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let (block, name) = target(&args.target)?;
    let opts = FileOpts {
        max_size: args.max_size.unwrap_or(0),
        circular: args.circular,
        ijson: args.ijson,
    };
    let initial = args.data.unwrap_or_default();
    let file = store.make_file(&block, &name, initial.as_bytes(), opts).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&file)?),
        OutputFormat::Text => {
            println!("{} Created {}/{}", "✓".green().bold(), block.as_str().cyan(), name.bold());
            print_header(&file);
        }
    }
    Ok(())
}

async fn cmd_stat(store: &BlockStore, args: FileArgs, format: OutputFormat) -> anyhow::Result<()> {
    let (block, name) = target(&args)?;
    let Some(file) = store.stat(&block, &name).await? else {
        anyhow::bail!("no such file: {block}/{name}");
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&file)?),
        OutputFormat::Text => {
            println!("{}/{}", block.as_str().cyan(), name.bold());
            print_header(&file);
        }
    }
    Ok(())
}

async fn cmd_cat(store: &BlockStore, args: FileArgs) -> anyhow::Result<()> {
    let (block, name) = target(&args)?;
    let (_, data) = store.read_file(&block, &name).await?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&data)?;
    stdout.flush()?;
    Ok(())
}

async fn cmd_read(store: &BlockStore, args: ReadArgs, format: OutputFormat) -> anyhow::Result<()> {
    let (block, name) = target(&args.target)?;
    let data = store.read_at(&block, &name, args.offset, args.len).await?;
    match format {
        OutputFormat::Json => {
            let out = json!({
                "offset": args.offset,
                "len": data.len(),
                "hex": hex::encode(&data),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => println!("{}", String::from_utf8_lossy(&data)),
    }
    Ok(())
}

async fn cmd_ls(store: &BlockStore, args: BlockArgs, format: OutputFormat) -> anyhow::Result<()> {
    let block = BlockId::new(args.block)?;
    let files = store.list_files(&block).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&files)?),
        OutputFormat::Text if files.is_empty() => println!("No files in {}.", block.as_str().cyan()),
        OutputFormat::Text => {
            for file in &files {
                let kind = if file.is_circular() { "ring" } else { "file" };
                println!(
                    "{:>10}  {}  {}  {}",
                    file.size,
                    kind.dimmed(),
                    timestamp(file.mod_ts).dimmed(),
                    file.name.bold()
                );
            }
        }
    }
    Ok(())
}

async fn report_write(
    store: &BlockStore,
    block: &BlockId,
    name: &str,
    written: usize,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let size = store.stat(block, name).await?.map(|f| f.size).unwrap_or(0);
    match format {
        OutputFormat::Json => println!("{}", json!({ "written": written, "size": size })),
        OutputFormat::Text => println!(
            "{} Wrote {} bytes to {}/{} (size {})",
            "✓".green(),
            written,
            block.as_str().cyan(),
            name.bold(),
            size
        ),
    }
    Ok(())
}

fn print_header(file: &BlockFile) {
    println!("  Size: {}", file.size.to_string().bold());
    if file.is_circular() {
        println!(
            "  Ring: {} bytes, cursor {}",
            file.opts.max_size,
            file.write_cursor.to_string().yellow()
        );
    }
    if file.opts.ijson {
        println!("  Format: {}", "json".cyan());
    }
    println!("  Created: {}", timestamp(file.created_ts));
    println!("  Modified: {}", timestamp(file.mod_ts));
    for (key, value) in &file.meta {
        println!("  {}: {}", key.blue(), value);
    }
}

fn timestamp(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn target(args: &FileArgs) -> anyhow::Result<(BlockId, String)> {
    Ok((BlockId::new(args.block.clone())?, args.name.clone()))
}

fn input_bytes(args: &DataArgs) -> anyhow::Result<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.clone().into_bytes());
    }
    if let Some(path) = &args.file {
        return std::fs::read(path).with_context(|| format!("reading {}", path.display()));
    }
    let mut buf = Vec::new();
    std::io::stdin().read_to_end(&mut buf)?;
    Ok(buf)
}
