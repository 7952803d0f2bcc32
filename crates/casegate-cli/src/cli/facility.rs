//! Facility profile subcommands.
//!
//! `set` merges fields into a subject's profile (creating it on first use);
//! `show` prints the stored profile and how it fares against the configured
//! qualification thresholds.

use anyhow::{Context, Result, bail};
use casegate_core::pipeline::qualification::{Qualification, Verdict};
use casegate_core::repository::subject::SubjectRepository;
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::{Map, Value};

use crate::state::AppState;

/// Facility subcommands.
#[derive(Subcommand)]
pub enum FacilityCommand {
    /// Merge fields into a facility profile.
    Set {
        /// Facility identifier (e.g. FAC-001).
        subject_id: String,

        /// Fields as key=value; values are parsed as JSON, `key=null` removes.
        #[arg(value_name = "KEY=VALUE")]
        fields: Vec<String>,

        /// A JSON object merged before the key=value fields.
        #[arg(long = "from-json", value_name = "JSON")]
        from_json: Option<String>,
    },

    /// Show a facility profile.
    Show {
        /// Facility identifier.
        subject_id: String,
    },
}

/// Handle a facility subcommand.
pub async fn handle_facility_command(cmd: FacilityCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        FacilityCommand::Set {
            subject_id,
            fields,
            from_json,
        } => set_profile(state, &subject_id, &fields, from_json.as_deref(), json).await,
        FacilityCommand::Show { subject_id } => show_profile(state, &subject_id, json).await,
    }
}

/// Build a merge patch from an optional JSON object and key=value pairs.
///
/// A value that is not valid JSON is stored as a string, so
/// `name=Plant 1` works without quoting.
pub fn build_patch(fields: &[String], from_json: Option<&str>) -> Result<Map<String, Value>> {
    let mut patch = match from_json {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("--from-json is not valid JSON")? {
            Value::Object(map) => map,
            _ => bail!("--from-json must be a JSON object"),
        },
        None => Map::new(),
    };

    for field in fields {
        let Some((key, raw)) = field.split_once('=') else {
            bail!("expected KEY=VALUE, got '{field}'");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("empty key in '{field}'");
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        patch.insert(key.to_string(), value);
    }

    if patch.is_empty() {
        bail!("nothing to set; pass KEY=VALUE fields or --from-json");
    }
    Ok(patch)
}

async fn set_profile(
    state: &AppState,
    subject_id: &str,
    fields: &[String],
    from_json: Option<&str>,
    json: bool,
) -> Result<()> {
    let patch = build_patch(fields, from_json)?;
    let subject = state
        .engine
        .subjects()
        .upsert_profile(subject_id, &patch)
        .await
        .with_context(|| format!("failed to save profile for '{subject_id}'"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&subject)?);
    } else {
        println!();
        println!(
            "  {} Saved {} field(s) for '{}'",
            style("ok").green(),
            patch.len(),
            style(subject_id).cyan(),
        );
        let missing = subject.profile.missing_threshold_fields();
        if !missing.is_empty() {
            println!(
                "     {} still missing: {}",
                style("!").yellow().bold(),
                missing.join(", ")
            );
        }
        println!();
    }

    Ok(())
}

async fn show_profile(state: &AppState, subject_id: &str, json: bool) -> Result<()> {
    let Some(subject) = state.engine.subjects().get_subject(subject_id).await? else {
        bail!("Facility '{subject_id}' not found");
    };

    let verdict = Qualification::new(state.config.qualification.clone()).evaluate(&subject.profile);

    if json {
        let result = serde_json::json!({
            "subject": subject,
            "qualifies": verdict == Verdict::Qualified,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let thresholds = &state.config.qualification;
    let rows = [
        (
            "annual_operating_hours",
            subject.profile.annual_operating_hours,
            thresholds.min_annual_operating_hours,
        ),
        (
            "monthly_demand_charge",
            subject.profile.monthly_demand_charge,
            thresholds.min_monthly_demand_charge,
        ),
        (
            "facility_power_load",
            subject.profile.facility_power_load,
            thresholds.min_facility_power_load,
        ),
    ];

    println!();
    println!(
        "  {} {}",
        style(&subject.id).cyan().bold(),
        subject.profile.name.as_deref().unwrap_or("")
    );
    println!();

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Field").fg(Color::White),
        Cell::new("Value").fg(Color::White),
        Cell::new("Minimum").fg(Color::White),
    ]);
    for (field, value, minimum) in rows {
        let (text, color) = match value {
            Some(v) if v >= minimum => (v.to_string(), Color::Green),
            Some(v) => (v.to_string(), Color::Red),
            None => ("(missing)".to_string(), Color::DarkGrey),
        };
        table.add_row(vec![
            Cell::new(field),
            Cell::new(text).fg(color),
            Cell::new(minimum.to_string()).fg(Color::DarkGrey),
        ]);
    }
    for (key, value) in &subject.profile.extra {
        table.add_row(vec![
            Cell::new(key),
            Cell::new(value.to_string()).fg(Color::DarkGrey),
            Cell::new(""),
        ]);
    }
    println!("{table}");

    match verdict {
        Verdict::Qualified => println!("  {} Meets all thresholds", style("✓").green()),
        Verdict::Disqualified { reason, .. } => {
            println!("  {} Would be disqualified: {}", style("✗").red(), reason)
        }
    }
    println!();

    Ok(())
}
