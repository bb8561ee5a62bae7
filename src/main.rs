use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cxxgraph::ast::{AstProvider, TreeSitterProvider};
use cxxgraph::cli;

#[derive(Parser)]
#[command(name = "cxxgraph")]
#[command(version)]
#[command(about = "Cached symbol index for C and C++ projects", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging and unhandled node kind diagnostics
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every file of the compilation database
    Index {
        /// Project root (discovered from the working directory by default)
        #[arg(short, long)]
        project: Option<String>,

        /// Worker count (0 for available parallelism)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Cache key strategy: path, content
        #[arg(short, long)]
        key_strategy: Option<String>,

        /// Drop the existing index first
        #[arg(short, long)]
        rebuild: bool,
    },

    /// Show index statistics
    Stats {
        /// Project root
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Print the stored record of one source file
    Show {
        /// Source file
        file: String,

        /// Project root
        #[arg(short, long)]
        project: Option<String>,

        /// Output format: text, json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print version information, including the AST provider
    Version,
}

fn init_logging(debug: bool, verbose: bool) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };

    // RUST_LOG wins over the flags
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug, cli.verbose);

    info!("cxxgraph v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Index {
            project,
            jobs,
            key_strategy,
            rebuild,
        } => {
            cli::index::index_project(project, jobs, key_strategy, rebuild, cli.debug).await?;
        }

        Commands::Stats { project } => {
            cli::stats::show_stats(project).await?;
        }

        Commands::Show { file, project, format } => {
            cli::show::show_record(file, project, format).await?;
        }

        Commands::Version => {
            println!("cxxgraph {}", env!("CARGO_PKG_VERSION"));
            println!("AST provider: {}", TreeSitterProvider::new().version());
        }
    }

    Ok(())
}
