//! Subject (facility) types.
//!
//! A subject is the external entity a run is about. For the energy proposal
//! pipeline this is a facility, described by a [`FacilityProfile`] that the
//! qualification and analysis stages read.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Legacy field names accepted on input, mapped to their canonical names.
pub const FIELD_ALIASES: &[(&str, &str)] = &[
    ("annual_diesel_runtime_hours", "annual_operating_hours"),
    ("monthly_demand_charge_usd", "monthly_demand_charge"),
    ("facility_power_load_kw", "facility_power_load"),
];

/// Measured characteristics of a facility.
///
/// The three threshold fields are optional so that an incomplete profile can
/// be stored and reported; how a missing value is treated during
/// qualification is decided by `MissingFieldPolicy`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FacilityProfile {
    /// Display name of the facility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Hours per year the backup generation actually runs.
    #[serde(
        default,
        alias = "annual_diesel_runtime_hours",
        skip_serializing_if = "Option::is_none"
    )]
    pub annual_operating_hours: Option<f64>,
    /// Monthly demand charge in USD.
    #[serde(
        default,
        alias = "monthly_demand_charge_usd",
        skip_serializing_if = "Option::is_none"
    )]
    pub monthly_demand_charge: Option<f64>,
    /// Facility power load in kW.
    #[serde(
        default,
        alias = "facility_power_load_kw",
        skip_serializing_if = "Option::is_none"
    )]
    pub facility_power_load: Option<f64>,
    /// Any further attributes (climate zone, tariff, ESG mandate, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl FacilityProfile {
    /// Apply a JSON merge patch at the top level.
    ///
    /// Keys present in `patch` replace the current value, `null` removes the
    /// key, and keys absent from `patch` are left untouched. Legacy field
    /// names are canonicalized first.
    pub fn merge_patch(&self, patch: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        let mut current = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        for (key, value) in patch {
            let key = canonical_field(key);
            if value.is_null() {
                current.remove(key);
            } else {
                current.insert(key.to_string(), value.clone());
            }
        }

        serde_json::from_value(Value::Object(current))
    }

    /// Names of the threshold fields that are absent.
    pub fn missing_threshold_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.annual_operating_hours.is_none() {
            missing.push("annual_operating_hours");
        }
        if self.monthly_demand_charge.is_none() {
            missing.push("monthly_demand_charge");
        }
        if self.facility_power_load.is_none() {
            missing.push("facility_power_load");
        }
        missing
    }
}

fn canonical_field(key: &str) -> &str {
    FIELD_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(key)
}

/// A stored subject record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    /// External identifier (e.g. "FAC-001").
    pub id: String,
    pub profile: FacilityProfile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_accepts_legacy_field_names() {
        let profile: FacilityProfile = serde_json::from_value(json!({
            "annual_diesel_runtime_hours": 5800,
            "monthly_demand_charge_usd": 8000,
            "facility_power_load_kw": 500,
            "climate_zone": "4A"
        }))
        .unwrap();

        assert_eq!(profile.annual_operating_hours, Some(5800.0));
        assert_eq!(profile.monthly_demand_charge, Some(8000.0));
        assert_eq!(profile.facility_power_load, Some(500.0));
        assert_eq!(profile.extra.get("climate_zone"), Some(&json!("4A")));
    }

    #[test]
    fn test_merge_patch_keeps_unspecified_fields() {
        let profile = FacilityProfile {
            name: Some("Plant 7".to_string()),
            annual_operating_hours: Some(400.0),
            monthly_demand_charge: Some(5000.0),
            facility_power_load: Some(250.0),
            extra: BTreeMap::new(),
        };

        let patch = json!({"monthly_demand_charge_usd": 9000, "esg_mandate": true});
        let merged = profile.merge_patch(patch.as_object().unwrap()).unwrap();

        assert_eq!(merged.name.as_deref(), Some("Plant 7"));
        assert_eq!(merged.annual_operating_hours, Some(400.0));
        assert_eq!(merged.monthly_demand_charge, Some(9000.0));
        assert_eq!(merged.extra.get("esg_mandate"), Some(&json!(true)));
    }

    #[test]
    fn test_merge_patch_null_removes_field() {
        let profile = FacilityProfile {
            facility_power_load: Some(250.0),
            ..Default::default()
        };
        let patch = json!({"facility_power_load": null});
        let merged = profile.merge_patch(patch.as_object().unwrap()).unwrap();
        assert_eq!(merged.facility_power_load, None);
        assert_eq!(
            merged.missing_threshold_fields(),
            vec![
                "annual_operating_hours",
                "monthly_demand_charge",
                "facility_power_load"
            ]
        );
    }
}
