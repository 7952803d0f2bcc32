//! Human review subcommands: the awaiting-review queue, open tickets and
//! decision submission.

use anyhow::{Context, Result, bail};
use casegate_types::ticket::DecisionSubmission;
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use super::{preview, styled_status};
use crate::state::AppState;

/// Review subcommands.
#[derive(Subcommand)]
pub enum ReviewCommand {
    /// List runs awaiting review, most urgent first.
    List,

    /// Show the open tickets for a run.
    Tickets { run_id: Uuid },

    /// Submit a decision for a run awaiting review.
    Decide {
        run_id: Uuid,

        /// approved, rejected or revision_requested.
        status: String,

        /// Feedback for the revision, or notes for the record.
        #[arg(long)]
        feedback: Option<String>,

        /// Reviewer identity recorded in the ledger.
        #[arg(long, env = "CASEGATE_REVIEWER")]
        reviewer: Option<String>,
    },
}

/// Handle a review subcommand.
pub async fn handle_review_command(cmd: ReviewCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        ReviewCommand::List => list_awaiting(state, json).await,
        ReviewCommand::Tickets { run_id } => list_tickets(state, run_id, json).await,
        ReviewCommand::Decide {
            run_id,
            status,
            feedback,
            reviewer,
        } => decide(state, run_id, status, feedback, reviewer, json).await,
    }
}

async fn list_awaiting(state: &AppState, json: bool) -> Result<()> {
    let runs = state.engine.list_awaiting_review_by_urgency().await?;

    if json {
        let queue: Vec<serde_json::Value> = runs
            .iter()
            .map(|run| {
                serde_json::json!({
                    "run_id": run.id,
                    "subject_id": run.subject_id,
                    "urgency_score": run.payload.urgency_score(),
                    "revision_count": run.revision_count,
                    "ticket_id": run.payload.review.as_ref().map(|r| r.ticket_id),
                    "updated_at": run.updated_at,
                })
            })
            .collect();
        let result = serde_json::json!({ "runs": queue, "count": runs.len() });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!();
        println!("  {} Nothing is awaiting review.", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Urgency").fg(Color::White),
        Cell::new("Facility").fg(Color::White),
        Cell::new("Run").fg(Color::White),
        Cell::new("Revision").fg(Color::White),
        Cell::new("Waiting since").fg(Color::White),
    ]);
    for run in &runs {
        let urgency = run.payload.urgency_score().unwrap_or(0);
        let color = match urgency {
            8.. => Color::Red,
            5..=7 => Color::Yellow,
            _ => Color::Green,
        };
        table.add_row(vec![
            Cell::new(urgency).fg(color),
            Cell::new(&run.subject_id).fg(Color::Cyan),
            Cell::new(run.id),
            Cell::new(run.revision_count),
            Cell::new(run.updated_at.format("%Y-%m-%d %H:%M").to_string()).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("  Awaiting review ({} runs)", runs.len());
    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn list_tickets(state: &AppState, run_id: Uuid, json: bool) -> Result<()> {
    let tickets = state.engine.open_tickets(run_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tickets)?);
        return Ok(());
    }

    if tickets.is_empty() {
        println!();
        println!(
            "  {} Run {} has no open tickets.",
            style("i").blue().bold(),
            style(run_id).dim()
        );
        println!();
        return Ok(());
    }

    for ticket in &tickets {
        let options: Vec<String> = ticket.options.iter().map(ToString::to_string).collect();
        println!();
        println!("  {} {}", style("?").yellow().bold(), style(&ticket.question).bold());
        println!("     ticket:  {}", style(ticket.id).dim());
        println!("     opened:  {}", ticket.created_at.format("%Y-%m-%d %H:%M:%S"));
        println!("     options: {}", options.join(" | "));
        println!(
            "     context: {}",
            preview(&ticket.context.to_string(), 120)
        );
    }
    println!();
    Ok(())
}

async fn decide(
    state: &AppState,
    run_id: Uuid,
    status: String,
    feedback: Option<String>,
    reviewer: Option<String>,
    json: bool,
) -> Result<()> {
    let Some(reviewer) = reviewer else {
        bail!("a reviewer is required; pass --reviewer or set CASEGATE_REVIEWER");
    };
    let submission = DecisionSubmission {
        status,
        feedback_text: feedback,
    };

    let run = state
        .engine
        .resume(run_id, &submission, &reviewer)
        .await
        .with_context(|| format!("decision for run {run_id} was not applied"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Recorded {} from {}; run is now {}",
        style("ok").green(),
        style(&submission.status).bold(),
        style(&reviewer).cyan(),
        styled_status(run.status),
    );
    if run.revision_count > 0 && run.payload.decision.is_some() && !run.status.is_terminal() {
        println!(
            "     Revision {}. Continue with: casegate run advance {} --all",
            run.revision_count, run.id
        );
    }
    println!();
    Ok(())
}
