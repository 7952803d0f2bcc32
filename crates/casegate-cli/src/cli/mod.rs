//! CLI command definitions for the `casegate` binary.
//!
//! Uses clap derive macros. Commands are grouped by noun
//! (e.g. `casegate run start`, `casegate review decide`).

pub mod facility;
pub mod review;
pub mod run;
pub mod schema;

use casegate_observe::tracing_setup::TracingOptions;
use casegate_types::run::RunStatus;
use clap::{Parser, Subcommand};
use console::style;

/// Drive facility qualification, analysis and human review.
#[derive(Parser)]
#[command(name = "casegate", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans to stdout via OpenTelemetry.
    #[arg(long, global = true, env = "CASEGATE_OTEL")]
    pub otel: bool,

    /// Emit log lines on stderr as JSON.
    #[arg(long, global = true, env = "CASEGATE_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store and inspect facility profiles.
    Facility {
        #[command(subcommand)]
        action: facility::FacilityCommand,
    },

    /// Start, advance and inspect pipeline runs.
    Run {
        #[command(subcommand)]
        action: run::RunCommand,
    },

    /// Work the human review queue.
    Review {
        #[command(subcommand)]
        action: review::ReviewCommand,
    },

    /// Print JSON Schemas for external tool integrations.
    Schema {
        #[command(subcommand)]
        action: schema::SchemaCommand,
    },
}

impl Cli {
    /// Tracing settings derived from the global flags.
    pub fn tracing_options(&self) -> TracingOptions {
        TracingOptions::from_verbosity(self.verbose, self.quiet)
            .json(self.log_json)
            .otel(self.otel)
    }
}

/// Run status colored by outcome.
pub fn styled_status(status: RunStatus) -> String {
    let text = status.to_string();
    match status {
        RunStatus::Approved => style(text).green().bold().to_string(),
        RunStatus::Rejected | RunStatus::Disqualified => style(text).red().to_string(),
        RunStatus::PendingReview => style(text).yellow().bold().to_string(),
        _ => style(text).cyan().to_string(),
    }
}

/// Truncate `text` to `max` characters with an ellipsis.
pub fn preview(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_review_decide() {
        let cli = Cli::try_parse_from([
            "casegate",
            "--json",
            "review",
            "decide",
            "0192f1a0-0000-7000-8000-000000000000",
            "revision_requested",
            "--feedback",
            "recheck load",
            "--reviewer",
            "r1",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Review { .. }));
    }

    const RUN_ID: &str = "0192f1a0-0000-7000-8000-000000000000";

    #[test]
    fn test_log_json_is_separate_from_output_json() {
        let cli = Cli::try_parse_from(["casegate", "--json", "run", "show", RUN_ID]).unwrap();
        let options = cli.tracing_options();
        assert!(cli.json);
        assert!(!options.json);

        let cli =
            Cli::try_parse_from(["casegate", "--log-json", "-v", "run", "show", RUN_ID]).unwrap();
        let options = cli.tracing_options();
        assert!(!cli.json);
        assert!(options.json);
        assert!(!options.otel);
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("Emergency-Only — Low Priority", 12), "Emergency...");
    }
}
