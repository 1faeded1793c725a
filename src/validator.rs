//! Pluggable schema validation invoked by writers before a transaction
//! opens. Schema *documents* are supplied by the operator; this module
//! only applies them.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// One `(pattern -> schema name)` association plus the named schema
/// documents themselves.
pub struct Validator {
    schemas: HashMap<String, Value>,
    /// Checked in registration order; first match wins.
    patterns: Vec<(Regex, String)>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
            patterns: Vec::new(),
        }
    }

    pub fn register_schema(&mut self, name: impl Into<String>, schema: Value) {
        self.schemas.insert(name.into(), schema);
    }

    pub fn register_pattern(&mut self, pattern: Regex, schema_name: impl Into<String>) {
        self.patterns.push((pattern, schema_name.into()));
    }

    /// Find the first registered pattern matching `file_name`; if none
    /// match, the file is accepted unconditionally. Otherwise parse `bytes`
    /// as JSON and validate it against the associated schema, accumulating
    /// every violation into a single readable message.
    pub fn validate(&self, file_name: &str, bytes: &[u8]) -> StoreResult<()> {
        let Some((_, schema_name)) = self.patterns.iter().find(|(re, _)| re.is_match(file_name))
        else {
            return Ok(());
        };

        let Some(schema) = self.schemas.get(schema_name) else {
            return Err(StoreError::generic(format!(
                "no schema registered under name {schema_name:?}"
            )));
        };

        let instance: Value = serde_json::from_slice(bytes).map_err(|e| {
            StoreError::ValidationFailed(format!("{file_name}: invalid JSON: {e}"))
        })?;

        let validator = jsonschema::validator_for(schema)
            .map_err(|e| StoreError::generic(format!("invalid schema {schema_name:?}: {e}")))?;

        let violations: Vec<String> = validator
            .iter_errors(&instance)
            .map(|e| format!("{} at {}: {e}", e.instance_path, e.schema_path))
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(StoreError::ValidationFailed(format!(
                "{file_name}: {}",
                violations.join("; ")
            )))
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
