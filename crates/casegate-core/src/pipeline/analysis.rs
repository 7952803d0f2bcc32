//! Built-in analysis stages.
//!
//! Both are deterministic preliminary estimates computed from the facility
//! profile. They stand in for heavier models and carry `low`/`medium`
//! confidence accordingly.

use casegate_types::ledger::{Confidence, LedgerAction};
use casegate_types::run::{AnalysisOutput, PayloadFragment, PayloadNamespace};
use chrono::Utc;
use serde_json::json;

use super::stage::{LedgerNote, Stage, StageContext, StageError, StageKind, StageOutput};

/// Hours of discharge the preliminary battery sizing targets.
pub const BATTERY_DURATION_HOURS: f64 = 4.0;

fn revision_note(ctx: &StageContext) -> String {
    match &ctx.feedback {
        Some(feedback) => format!(" (revision {}: {feedback})", ctx.revision_count),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Energy load
// ---------------------------------------------------------------------------

/// Peak load and annual energy from the facility profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnergyLoadStage;

impl EnergyLoadStage {
    pub const NAME: &'static str = "energy_load";
}

impl Stage for EnergyLoadStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> StageKind {
        StageKind::Analysis
    }

    fn namespace(&self) -> PayloadNamespace {
        PayloadNamespace::Analysis(Self::NAME.to_string())
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let profile = ctx.payload.profile.clone().unwrap_or_default();
        let peak_load_kw = profile.facility_power_load.unwrap_or(0.0);
        let hours = profile.annual_operating_hours.unwrap_or(0.0);
        let annual_energy_kwh = peak_load_kw * hours;

        let data = json!({
            "status": "complete",
            "peak_load_kw": peak_load_kw,
            "annual_operating_hours": hours,
            "annual_energy_kwh": annual_energy_kwh,
        });
        let rationale = format!(
            "annual energy = peak load x operating hours{}",
            revision_note(ctx)
        );

        let output = AnalysisOutput {
            data: data.clone(),
            confidence: Confidence::Medium,
            rationale: rationale.clone(),
            completed_at: Utc::now(),
        };
        let note = LedgerNote {
            action: LedgerAction::Analyzed,
            input_summary: format!("load={peak_load_kw}kW hours={hours}"),
            output: data,
            confidence: Confidence::Medium,
            rationale,
        };

        Ok(StageOutput::new(
            PayloadFragment::Analysis {
                stage: Self::NAME.to_string(),
                output,
            },
            note,
        ))
    }
}

// ---------------------------------------------------------------------------
// Battery sizing
// ---------------------------------------------------------------------------

/// Preliminary battery capacity covering peak load for a fixed duration.
///
/// Reads the `energy_load` output, so it must run after that stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatterySizingStage;

impl BatterySizingStage {
    pub const NAME: &'static str = "battery_sizing";
}

impl Stage for BatterySizingStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> StageKind {
        StageKind::Analysis
    }

    fn namespace(&self) -> PayloadNamespace {
        PayloadNamespace::Analysis(Self::NAME.to_string())
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let energy = ctx
            .payload
            .analyses
            .get(EnergyLoadStage::NAME)
            .ok_or_else(|| StageError::MissingInput {
                stage: Self::NAME.to_string(),
                input: EnergyLoadStage::NAME.to_string(),
            })?;

        let peak_load_kw = energy
            .data
            .get("peak_load_kw")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let capacity_kwh = peak_load_kw * BATTERY_DURATION_HOURS;

        let data = json!({
            "status": "complete",
            "power_kw": peak_load_kw,
            "duration_hours": BATTERY_DURATION_HOURS,
            "capacity_kwh": capacity_kwh,
        });
        let rationale = format!(
            "{BATTERY_DURATION_HOURS}-hour system sized to peak load{}",
            revision_note(ctx)
        );

        let output = AnalysisOutput {
            data: data.clone(),
            confidence: Confidence::Low,
            rationale: rationale.clone(),
            completed_at: Utc::now(),
        };
        let note = LedgerNote {
            action: LedgerAction::Analyzed,
            input_summary: format!("peak_load={peak_load_kw}kW"),
            output: data,
            confidence: Confidence::Low,
            rationale,
        };

        Ok(StageOutput::new(
            PayloadFragment::Analysis {
                stage: Self::NAME.to_string(),
                output,
            },
            note,
        ))
    }
}
