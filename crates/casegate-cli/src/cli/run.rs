//! Pipeline run subcommands.

use anyhow::{Context, Result};
use casegate_types::run::Run;
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use super::{preview, styled_status};
use crate::state::AppState;

/// Run subcommands.
#[derive(Subcommand)]
pub enum RunCommand {
    /// Start a run for a facility and drive it until it blocks.
    Start {
        /// Facility identifier.
        subject_id: String,

        /// Re-enter an existing run instead of creating one.
        #[arg(long = "run")]
        run_id: Option<Uuid>,

        /// Only create the run; do not advance it.
        #[arg(long)]
        no_advance: bool,
    },

    /// Advance a run by one step, or until it blocks with --all.
    Advance {
        run_id: Uuid,

        #[arg(long)]
        all: bool,
    },

    /// Show a run and its payload.
    Show { run_id: Uuid },

    /// Show a run's decision ledger.
    Ledger { run_id: Uuid },
}

/// Handle a run subcommand.
pub async fn handle_run_command(cmd: RunCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        RunCommand::Start {
            subject_id,
            run_id,
            no_advance,
        } => start_run(state, &subject_id, run_id, no_advance, json).await,
        RunCommand::Advance { run_id, all } => advance_run(state, run_id, all, json).await,
        RunCommand::Show { run_id } => show_run(state, run_id, json).await,
        RunCommand::Ledger { run_id } => show_ledger(state, run_id, json).await,
    }
}

async fn start_run(
    state: &AppState,
    subject_id: &str,
    existing: Option<Uuid>,
    no_advance: bool,
    json: bool,
) -> Result<()> {
    let run_id = state
        .engine
        .start(subject_id, existing)
        .await
        .with_context(|| format!("could not start a run for '{subject_id}'"))?;

    let run = if no_advance {
        state.engine.get_run(run_id).await?
    } else {
        state.engine.advance_until_blocked(run_id).await?
    };
    print_run_summary(&run, json)
}

async fn advance_run(state: &AppState, run_id: Uuid, all: bool, json: bool) -> Result<()> {
    let run = if all {
        state.engine.advance_until_blocked(run_id).await?
    } else {
        state.engine.advance(run_id).await?
    };
    print_run_summary(&run, json)
}

fn print_run_summary(run: &Run, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(run)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Run {} for '{}' is {}",
        style("ok").green(),
        style(run.id).dim(),
        style(&run.subject_id).cyan(),
        styled_status(run.status),
    );
    if let Some(reason) = &run.disqualifier_reason {
        println!("     reason: {reason}");
    }
    if let Some(review) = &run.payload.review
        && run.payload.decision.is_none()
    {
        println!(
            "     ticket {} awaits review (urgency {})",
            style(review.ticket_id).yellow(),
            review.urgency_score
        );
    }
    println!();
    Ok(())
}

async fn show_run(state: &AppState, run_id: Uuid, json: bool) -> Result<()> {
    let run = state.engine.get_run(run_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    let mut row = |label: &str, value: String| {
        table.add_row(vec![Cell::new(label).fg(Color::White), Cell::new(value)]);
    };
    row("id", run.id.to_string());
    row("subject", run.subject_id.clone());
    row("status", styled_status(run.status));
    row("revision", run.revision_count.to_string());
    row("version", run.version.to_string());
    row("created", run.created_at.format("%Y-%m-%d %H:%M:%S").to_string());
    row("updated", run.updated_at.format("%Y-%m-%d %H:%M:%S").to_string());
    if let Some(q) = &run.payload.qualification {
        let text = match &q.reason {
            Some(reason) => format!("no ({reason})"),
            None => "yes".to_string(),
        };
        row("qualified", text);
    }
    for (name, analysis) in &run.payload.analyses {
        row(
            &format!("analysis.{name}"),
            format!("{} [{}]", preview(&analysis.data.to_string(), 60), analysis.confidence),
        );
    }
    if let Some(review) = &run.payload.review {
        row("ticket", review.ticket_id.to_string());
        row("urgency", review.urgency_score.to_string());
    }
    if let Some(decision) = &run.payload.decision {
        row(
            "decision",
            format!("{} by {}", decision.status, decision.reviewer_id),
        );
        if let Some(feedback) = &decision.feedback_text {
            row("feedback", feedback.clone());
        }
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn show_ledger(state: &AppState, run_id: Uuid, json: bool) -> Result<()> {
    let entries = state.engine.ledger(run_id).await?;

    if json {
        let result = serde_json::json!({
            "run_id": run_id,
            "entries": entries,
            "count": entries.len(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!();
        println!(
            "  {} No ledger entries yet for run {}.",
            style("i").blue().bold(),
            style(run_id).dim()
        );
        println!("     Advance it with: casegate run advance {run_id}");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("#").fg(Color::White),
        Cell::new("Time").fg(Color::White),
        Cell::new("Actor").fg(Color::White),
        Cell::new("Action").fg(Color::White),
        Cell::new("Confidence").fg(Color::White),
        Cell::new("Rationale").fg(Color::White),
    ]);
    for entry in &entries {
        table.add_row(vec![
            Cell::new(entry.sequence),
            Cell::new(entry.timestamp.format("%H:%M:%S%.3f").to_string()).fg(Color::DarkGrey),
            Cell::new(&entry.actor).fg(Color::Cyan),
            Cell::new(entry.action.to_string()),
            Cell::new(entry.confidence.to_string()),
            Cell::new(preview(&entry.rationale, 60)).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("  Ledger for run {} ({} entries)", style(run_id).dim(), entries.len());
    println!();
    println!("{table}");
    println!();
    Ok(())
}
