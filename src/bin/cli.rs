//! seglog CLI
//!
//! Command-line interface for a local seglog data directory.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use seglog::{Config, Engine};
use tracing_subscriber::{fmt, EnvFilter};

/// seglog CLI
#[derive(Parser, Debug)]
#[command(name = "seglog")]
#[command(about = "CLI for the seglog key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./seglog_data")]
    data_dir: String,

    /// Segment size limit in bytes before rotation
    #[arg(short, long, default_value = "1048576")]
    segment_size: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Show segment files and sizes
    Stats,

    /// Merge all sealed segments now
    Compact,
}

fn main() -> ExitCode {
    // Initialize tracing/logging (stderr, so values on stdout stay clean)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,seglog=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .segment_size_limit(args.segment_size)
        .build();

    let engine = match Engine::open(config) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let status = match run(&engine, args.command) {
        Ok(status) => status,
        Err(e) => {
            tracing::error!("Command failed: {}", e);
            ExitCode::FAILURE
        }
    };

    if let Err(e) = engine.close() {
        tracing::error!("Failed to close engine: {}", e);
        return ExitCode::FAILURE;
    }

    status
}

fn run(engine: &Engine, command: Commands) -> seglog::Result<ExitCode> {
    match command {
        Commands::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => {
                println!("{}", String::from_utf8_lossy(&value));
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("(not found)");
                Ok(ExitCode::from(1))
            }
        },
        Commands::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Stats => {
            let paths = engine.segment_paths();
            println!("segments: {}", paths.len());
            for path in paths {
                let size = std::fs::metadata(&path)?.len();
                println!("  {} ({} bytes)", path.display(), size);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Compact => {
            match engine.compact()? {
                Some(stats) => println!(
                    "merged {} segments into segment {}: {} records kept, {} dropped, {} bytes",
                    stats.inputs,
                    stats.output_id,
                    stats.records_written,
                    stats.records_dropped,
                    stats.bytes_written
                ),
                None => println!("nothing to compact"),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
