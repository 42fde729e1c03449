//! Repository inspection and import tool.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use noema::logging::init_logging;
use noema::{Memory, MemoryParams};

#[derive(Parser)]
#[command(name = "noema", about = "Semantic graph memory tool", version)]
struct Cli {
    /// Repository directory.
    #[arg(long, default_value = "repo")]
    repo: PathBuf,

    /// Segment cap for the loaded store.
    #[arg(long, default_value_t = 64)]
    max_segments: u16,

    /// Log filter, e.g. "info" or "noema=debug".
    #[arg(long, default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print element population counters.
    Stats {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Parse a notation file and materialize its triples, then save.
    Import { file: PathBuf },
    /// Search link contents by substring.
    Find {
        needle: String,
        /// Needles up to this length match by prefix.
        #[arg(long, default_value_t = 0)]
        prefix_limit: u32,
    },
}

fn run(cli: Cli) -> noema::Result<()> {
    let params = MemoryParams {
        repo_path: cli.repo,
        max_loaded_segments: cli.max_segments,
        ..MemoryParams::default()
    };
    let memory = Memory::initialize(params)?;
    let ctx = memory.context();

    match cli.command {
        Command::Stats { json } => {
            let stat = ctx.stat();
            if json {
                let rendered =
                    serde_json::to_string_pretty(&stat).map_err(std::io::Error::other)?;
                println!("{rendered}");
            } else {
                println!("segments:   {}", stat.segments);
                println!("nodes:      {}", stat.nodes);
                println!("links:      {}", stat.links);
                println!("connectors: {}", stat.connectors);
                println!("free slots: {}", stat.free_slots);
            }
            memory.shutdown(false)?;
        }
        Command::Import { file } => {
            let text = std::fs::read_to_string(&file)?;
            let addrs = ctx.generate_from_text(&text)?;
            println!("created {} elements from {}", addrs.len(), file.display());
            memory.shutdown(true)?;
        }
        Command::Find { needle, prefix_limit } => {
            for content in ctx.find_link_contents_by_substring(needle.as_bytes(), prefix_limit) {
                println!("{}", String::from_utf8_lossy(&content));
            }
            memory.shutdown(false)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if init_logging(&cli.log).is_err() {
        eprintln!("warning: logging not initialized");
    }
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}
