//! Engine configuration types.
//!
//! `EngineConfig` represents `config.toml` in the casegate data directory:
//! qualification thresholds, the missing-field policy, and the review
//! question template. Every field has a default.

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub qualification: QualificationConfig,
    #[serde(default)]
    pub review: ReviewConfig,
}

/// Hard thresholds applied by the qualification stage, in check order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualificationConfig {
    #[serde(default = "default_min_annual_operating_hours")]
    pub min_annual_operating_hours: f64,
    #[serde(default = "default_min_monthly_demand_charge")]
    pub min_monthly_demand_charge: f64,
    #[serde(default = "default_min_facility_power_load")]
    pub min_facility_power_load: f64,
    #[serde(default)]
    pub missing_fields: MissingFieldPolicy,
}

fn default_min_annual_operating_hours() -> f64 {
    200.0
}

fn default_min_monthly_demand_charge() -> f64 {
    2000.0
}

fn default_min_facility_power_load() -> f64 {
    100.0
}

impl Default for QualificationConfig {
    fn default() -> Self {
        Self {
            min_annual_operating_hours: default_min_annual_operating_hours(),
            min_monthly_demand_charge: default_min_monthly_demand_charge(),
            min_facility_power_load: default_min_facility_power_load(),
            missing_fields: MissingFieldPolicy::default(),
        }
    }
}

/// What qualification does with an absent threshold field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFieldPolicy {
    /// A missing value counts as 0 and fails its threshold.
    #[default]
    TreatAsZero,
    /// Refuse to qualify; the run is left untouched.
    Reject,
}

/// Review gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Ticket question. `{subject_id}` is replaced with the run's subject.
    #[serde(default = "default_question")]
    pub question: String,
}

fn default_question() -> String {
    "Approve the draft proposal for {subject_id}?".to_string()
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            question: default_question(),
        }
    }
}

impl ReviewConfig {
    pub fn render_question(&self, subject_id: &str) -> String {
        self.question.replace("{subject_id}", subject_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert!((config.qualification.min_annual_operating_hours - 200.0).abs() < f64::EPSILON);
        assert!((config.qualification.min_monthly_demand_charge - 2000.0).abs() < f64::EPSILON);
        assert!((config.qualification.min_facility_power_load - 100.0).abs() < f64::EPSILON);
        assert_eq!(
            config.qualification.missing_fields,
            MissingFieldPolicy::TreatAsZero
        );
    }

    #[test]
    fn test_engine_config_deserialize_empty() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_deserialize_partial() {
        let toml_str = r#"
[qualification]
min_monthly_demand_charge = 3500
missing_fields = "reject"

[review]
question = "Sign off on {subject_id}?"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert!((config.qualification.min_monthly_demand_charge - 3500.0).abs() < f64::EPSILON);
        assert!((config.qualification.min_annual_operating_hours - 200.0).abs() < f64::EPSILON);
        assert_eq!(config.qualification.missing_fields, MissingFieldPolicy::Reject);
        assert_eq!(config.review.render_question("FAC-9"), "Sign off on FAC-9?");
    }
}
