//! casegate CLI entry point.
//!
//! Binary name: `casegate`
//!
//! Parses CLI arguments, sets up tracing, opens the database and dispatches
//! to the matching command handler.

mod cli;
mod state;

use clap::Parser;
use casegate_observe::tracing_setup::{init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli.tracing_options()) {
        eprintln!("Warning: tracing setup failed: {e}");
    }

    // Printing the schema needs no database.
    if let Commands::Schema { action } = &cli.command {
        let result = cli::schema::handle_schema_command(action);
        shutdown_tracing();
        return result;
    }

    let state = AppState::init().await?;

    let result = match cli.command {
        Commands::Facility { action } => {
            cli::facility::handle_facility_command(action, &state, cli.json).await
        }
        Commands::Run { action } => cli::run::handle_run_command(action, &state, cli.json).await,
        Commands::Review { action } => {
            cli::review::handle_review_command(action, &state, cli.json).await
        }
        Commands::Schema { .. } => Ok(()),
    };

    shutdown_tracing();
    result
}
