//! JSON Schema output for the decision submission contract.

use anyhow::Result;
use casegate_types::ticket::DecisionSubmission;
use clap::Subcommand;

/// Schema subcommands.
#[derive(Subcommand)]
pub enum SchemaCommand {
    /// Schema of the body an external tool sends to resume a run.
    Decision,
}

pub fn handle_schema_command(cmd: &SchemaCommand) -> Result<()> {
    match cmd {
        SchemaCommand::Decision => {
            let schema = schemars::schema_for!(DecisionSubmission);
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_schema_lists_fields() {
        let schema = serde_json::to_value(schemars::schema_for!(DecisionSubmission)).unwrap();
        let properties = &schema["properties"];
        assert!(properties.get("status").is_some());
        assert!(properties.get("feedback_text").is_some());
        assert_eq!(schema["required"], serde_json::json!(["status"]));
    }
}
