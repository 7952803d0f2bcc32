//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.casegate/` in production)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use casegate_types::config::EngineConfig;

/// Resolve the casegate data directory.
///
/// `CASEGATE_DATA_DIR` wins, then `~/.casegate`, then `./.casegate`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CASEGATE_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".casegate");
    }

    PathBuf::from(".casegate")
}

/// SQLite URL for the database inside `data_dir`.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join("casegate.db").display())
}

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegate_types::config::MissingFieldPolicy;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.qualification.min_annual_operating_hours, 200.0);
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
[qualification]
min_monthly_demand_charge = 3500.0
missing_fields = "reject"

[review]
question = "Sign off {subject_id}?"
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.qualification.min_monthly_demand_charge, 3500.0);
        assert_eq!(config.qualification.min_facility_power_load, 100.0);
        assert_eq!(config.qualification.missing_fields, MissingFieldPolicy::Reject);
        assert_eq!(config.review.render_question("FAC-9"), "Sign off FAC-9?");
    }

    #[tokio::test]
    async fn load_engine_config_malformed_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "[qualification\nbroken")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn database_url_points_into_data_dir() {
        let url = database_url(Path::new("/tmp/cg"));
        assert_eq!(url, "sqlite:///tmp/cg/casegate.db?mode=rwc");
    }
}
