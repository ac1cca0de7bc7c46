//! CLI binary entry point for retail-etl

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use retail_etl::cli::commands::check::{CheckArgs, handle_check};
#[cfg(all(feature = "cli", feature = "api-fetch"))]
use retail_etl::cli::commands::fetch::handle_fetch;
#[cfg(feature = "cli")]
use retail_etl::cli::commands::load::{LoadArgs, handle_full_load, handle_update};
#[cfg(feature = "cli")]
use retail_etl::cli::commands::sample::handle_sample_config;
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "retail-etl")]
#[command(about = "Load retail CSV snapshots into PostgreSQL")]
#[command(version)]
struct Cli {
    /// Configuration file (default: $RETAIL_ETL_CONFIG, then config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Drop, recreate and load every table from its CSV snapshot
    FullLoad {
        /// Keep going after a database error
        #[arg(long)]
        continue_on_error: bool,
        /// Leave input files in place
        #[arg(long)]
        no_archive: bool,
    },
    /// Upsert and prune tables from the CSV snapshots present
    Update {
        /// Keep going after a database error
        #[arg(long)]
        continue_on_error: bool,
        /// Leave input files in place
        #[arg(long)]
        no_archive: bool,
    },
    /// Validate the configuration and print the load order
    Check {
        /// Count foreign-key orphans in the database
        #[arg(long)]
        integrity: bool,
    },
    /// Download configured API sources as CSV inputs
    #[cfg(feature = "api-fetch")]
    Fetch,
    /// Print the sample configuration, or write it to a file
    SampleConfig {
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite existing files without prompting
        #[arg(short, long)]
        force: bool,
    },
}

#[cfg(feature = "cli")]
fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "cli")]
fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let result = match cli.command {
        Commands::FullLoad {
            continue_on_error,
            no_archive,
        } => handle_full_load(&LoadArgs {
            config: cli.config,
            continue_on_error,
            no_archive,
        }),
        Commands::Update {
            continue_on_error,
            no_archive,
        } => handle_update(&LoadArgs {
            config: cli.config,
            continue_on_error,
            no_archive,
        }),
        Commands::Check { integrity } => handle_check(&CheckArgs {
            config: cli.config,
            integrity,
        }),
        #[cfg(feature = "api-fetch")]
        Commands::Fetch => handle_fetch(cli.config),
        Commands::SampleConfig { output, force } => {
            handle_sample_config(output.as_deref(), force)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature is not enabled. Build with --features cli");
    std::process::exit(1);
}
