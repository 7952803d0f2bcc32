//! Hard-threshold qualification.
//!
//! Three checks run in a fixed order and stop at the first failure, so a
//! profile failing several thresholds always reports the earliest one.

use casegate_types::config::{MissingFieldPolicy, QualificationConfig};
use casegate_types::ledger::{Confidence, LedgerAction};
use casegate_types::run::{PayloadFragment, PayloadNamespace, QualificationOutput};
use casegate_types::subject::FacilityProfile;
use chrono::Utc;
use serde_json::json;

use super::stage::{LedgerNote, Stage, StageContext, StageError, StageKind, StageOutput};

pub const REASON_EMERGENCY_ONLY: &str = "Emergency-Only — Low Priority";
pub const REASON_LOW_DEMAND_CHARGE: &str = "Low Demand Charge — Monitor";
pub const REASON_BELOW_MINIMUM_SCALE: &str = "Below Minimum Scale";

/// Result of evaluating the thresholds.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Qualified,
    Disqualified {
        check: &'static str,
        reason: &'static str,
    },
}

/// The qualification stage.
#[derive(Debug, Clone, Default)]
pub struct Qualification {
    config: QualificationConfig,
}

impl Qualification {
    pub const NAME: &'static str = "qualification";

    pub fn new(config: QualificationConfig) -> Self {
        Self { config }
    }

    /// Evaluate the checks in order. A missing value counts as 0.
    pub fn evaluate(&self, profile: &FacilityProfile) -> Verdict {
        let checks = [
            (
                "annual_operating_hours",
                profile.annual_operating_hours,
                self.config.min_annual_operating_hours,
                REASON_EMERGENCY_ONLY,
            ),
            (
                "monthly_demand_charge",
                profile.monthly_demand_charge,
                self.config.min_monthly_demand_charge,
                REASON_LOW_DEMAND_CHARGE,
            ),
            (
                "facility_power_load",
                profile.facility_power_load,
                self.config.min_facility_power_load,
                REASON_BELOW_MINIMUM_SCALE,
            ),
        ];

        for (check, value, minimum, reason) in checks {
            if value.unwrap_or(0.0) < minimum {
                return Verdict::Disqualified { check, reason };
            }
        }
        Verdict::Qualified
    }
}

impl Stage for Qualification {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> StageKind {
        StageKind::Qualification
    }

    fn namespace(&self) -> PayloadNamespace {
        PayloadNamespace::Qualification
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let profile = ctx.payload.profile.clone().unwrap_or_default();
        let missing: Vec<String> = profile
            .missing_threshold_fields()
            .into_iter()
            .map(String::from)
            .collect();

        if !missing.is_empty() && self.config.missing_fields == MissingFieldPolicy::Reject {
            return Err(StageError::IncompleteProfile(missing));
        }

        let verdict = self.evaluate(&profile);
        let input_summary = format!(
            "hours={:?} demand={:?} load={:?}",
            profile.annual_operating_hours,
            profile.monthly_demand_charge,
            profile.facility_power_load
        );

        let (output, note) = match verdict {
            Verdict::Qualified => (
                QualificationOutput {
                    qualified: true,
                    reason: None,
                    failed_check: None,
                    missing_fields: missing,
                    evaluated_at: Utc::now(),
                },
                LedgerNote {
                    action: LedgerAction::Qualified,
                    input_summary,
                    output: json!({"qualified": true}),
                    confidence: Confidence::High,
                    rationale: "all hard thresholds met".to_string(),
                },
            ),
            Verdict::Disqualified { check, reason } => {
                let rationale = if missing.iter().any(|m| m == check) {
                    format!("{check} missing from profile; treated as 0")
                } else {
                    format!("{check} below threshold")
                };
                (
                    QualificationOutput {
                        qualified: false,
                        reason: Some(reason.to_string()),
                        failed_check: Some(check.to_string()),
                        missing_fields: missing,
                        evaluated_at: Utc::now(),
                    },
                    LedgerNote {
                        action: LedgerAction::Disqualified,
                        input_summary,
                        output: json!({
                            "qualified": false,
                            "reason": reason,
                            "failed_check": check,
                        }),
                        confidence: Confidence::High,
                        rationale,
                    },
                )
            }
        };

        Ok(StageOutput::new(PayloadFragment::Qualification(output), note))
    }
}
