//! Validate command - check targets without scanning.

use std::process::ExitCode;

use anyhow::Result;
use scanrunner_core::{validator, TargetValidator};

pub fn run(targets: &str, json: bool) -> Result<ExitCode> {
    let mut validator = TargetValidator::new();
    let invalid = validator.validate_all(targets);

    if json {
        println!("{}", serde_json::to_string_pretty(&invalid)?);
    } else if invalid.is_empty() {
        for target in validator::split_targets(targets) {
            let kind = validator::classify(target)
                .map(|k| format!("{:?}", k).to_lowercase())
                .unwrap_or_default();
            println!("{:<40} {}", target, kind);
        }
    } else {
        for target in &invalid {
            println!("invalid: {}", target);
        }
    }

    Ok(if invalid.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
