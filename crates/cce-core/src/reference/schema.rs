//! JSON Schema validation for baseline documents.
//!
//! Baselines are validated against schema/cce_baseline.schema.json before
//! typed decoding, so malformed check definitions are reported with the
//! offending location instead of a serde position.

use std::sync::OnceLock;

/// Embedded baseline schema (loaded at compile time).
const BASELINE_SCHEMA_JSON: &str = include_str!("../../schema/cce_baseline.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

fn get_validator() -> Result<&'static jsonschema::Validator, String> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(BASELINE_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result.as_ref().map_err(Clone::clone)
}

/// Validate a baseline document against the schema.
///
/// Returns every violation as `"<message> at <location>"`.
pub fn validate_baseline_schema(document: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e])?;

    let errors: Vec<String> = validator
        .iter_errors(document)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
