//! Configuration validation.

use crate::schema::{ChatRelayConfig, VALID_EFFORTS};
use chatrelay_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &ChatRelayConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    if config.server.port == 0 {
        errors.push("server.port must be non-zero".into());
    }
    validate_not_empty(&mut errors, "server.host", &config.server.host);
    if let Some(ref origin) = config.server.cors_origin {
        validate_not_empty(&mut errors, "server.cors_origin", origin);
    }
    validate_not_empty(&mut errors, "database.url", &config.database.url);

    let generator = &config.generator;
    validate_not_empty(&mut errors, "generator.program", &generator.program);
    validate_not_empty(&mut errors, "generator.output_format", &generator.output_format);

    if let Some(ref effort) = generator.effort {
        if !VALID_EFFORTS.contains(&effort.as_str()) {
            errors.push(format!(
                "generator.effort = '{effort}' must be one of {}",
                VALID_EFFORTS.join(", ")
            ));
        }
    }

    if let Some(budget) = generator.max_budget_usd {
        if !budget.is_finite() || budget < 0.0 {
            errors.push(format!(
                "generator.max_budget_usd = {budget} must be a non-negative number"
            ));
        }
    }

    validate_not_empty(&mut errors, "logging.level", &config.logging.level);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_not_empty(errors: &mut Vec<String>, name: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(format!("{name} must not be empty"));
    }
}
