mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "docmig",
    about = "Versioned document-shape migrations for the service document store",
    version
)]
struct Cli {
    /// Config file (the store path inside it is relative to this file)
    #[arg(long, global = true, env = "DOCMIG_CONFIG", default_value = "docmig.yaml")]
    config: PathBuf,

    /// Log every step and document-level decision
    #[arg(long, global = true)]
    debug: bool,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply migration versions in declared order
    Run {
        /// Only apply this version (repeatable; default: all)
        #[arg(long = "version", value_name = "ID")]
        versions: Vec<String>,

        /// Worker threads for steps on disjoint collections (default: runner.workers)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// List versions and their steps
    List,

    /// Load documents from a JSON array or JSON-lines file
    Import {
        namespace: String,
        collection: String,
        file: PathBuf,
    },

    /// Print every document of a collection
    Dump {
        namespace: String,
        collection: String,
    },

    /// Create, show or validate the config file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        match &cli.command {
            Commands::Run { .. } => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_path();

    let result = match cli.command {
        Commands::Run { versions, workers } => cmd::run::run(config, &versions, workers, cli.json),
        Commands::List => cmd::list::run(config, cli.json),
        Commands::Import {
            namespace,
            collection,
            file,
        } => cmd::data::import(config, &namespace, &collection, &file, cli.json),
        Commands::Dump {
            namespace,
            collection,
        } => cmd::data::dump(config, &namespace, &collection, cli.json),
        Commands::Config { subcommand } => cmd::config::run(config, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
