use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use leadflow::app;
use leadflow::config::{ServeArgs, ServerConfig};

#[derive(Parser)]
#[command(
    name = "leadflow",
    about = "Lead round-robin distribution and pool redistribution engine"
)]
struct Cli {
    /// Log filter, e.g. `info` or `leadflow=debug,tower_http=info`
    #[arg(long, global = true, env = "LEADFLOW_LOG", default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server and the pool sweeper
    Serve(ServeArgs),
    /// Initialize the database
    Init {
        #[arg(long, env = "LEADFLOW_DB", default_value = "leadflow.db")]
        db: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match cli.command {
        Commands::Serve(args) => {
            let config = match ServerConfig::try_from(args) {
                Ok(config) => config,
                Err(e) => {
                    tracing::error!("invalid configuration: {e}");
                    return ExitCode::FAILURE;
                }
            };
            if let Err(e) = app::run_server(config).await {
                tracing::error!("server error: {e}");
                return ExitCode::FAILURE;
            }
        }
        Commands::Init { db } => match leadflow::db::init_db(&db) {
            Ok(_) => tracing::info!("database initialized at {db}"),
            Err(e) => {
                tracing::error!("failed to initialize {db}: {e}");
                return ExitCode::FAILURE;
            }
        },
    }
    ExitCode::SUCCESS
}
