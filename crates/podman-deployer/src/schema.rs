use jsonschema::{Draft, JSONSchema};
use once_cell::sync::OnceCell;
use serde_json::{json, Value};

use crate::error::{ConfigError, ValidationError};

static COMPILED: OnceCell<JSONSchema> = OnceCell::new();

/// The JSON schema (Draft 7) accepted by [`crate::config::Config`].
pub fn schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "Podman deployer configuration",
        "type": "object",
        "properties": {
            "podman": {
                "type": "object",
                "properties": {
                    "path": { "type": "string", "minLength": 1 },
                    "containerNamePrefix": { "type": "string" },
                    "containerName": { "type": "string" },
                    "cgroupNs": { "type": "string" },
                    "networkMode": { "type": "string" },
                    "rngSeed": { "type": "integer", "minimum": 0 }
                },
                "additionalProperties": false
            },
            "deployment": {
                "type": "object",
                "properties": {
                    "container": {
                        "type": "object",
                        "properties": {
                            "Env": { "type": "array", "items": { "type": "string" } }
                        }
                    },
                    "host": {
                        "type": "object",
                        "properties": {
                            "Binds": { "type": "array", "items": { "type": "string" } },
                            "CgroupnsMode": { "type": "string" },
                            "NetworkMode": { "type": "string" }
                        }
                    },
                    "platform": { "type": "string", "minLength": 1 },
                    "imagePullPolicy": {
                        "type": "string",
                        "enum": ["Always", "IfNotPresent", "Never"]
                    }
                },
                "additionalProperties": false
            }
        },
        "additionalProperties": false
    })
}

fn compiled() -> Result<&'static JSONSchema, ConfigError> {
    COMPILED.get_or_try_init(|| {
        JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema())
            .map_err(|e| ConfigError::SchemaCompilationFailed {
                message: e.to_string(),
            })
    })
}

/// Validates a raw configuration document, reporting every violation.
pub fn validate(config: &Value) -> Result<(), ConfigError> {
    let schema = compiled()?;

    if let Err(errors) = schema.validate(config) {
        let errors: Vec<ValidationError> = errors
            .map(|error| ValidationError {
                json_pointer: error.instance_path.to_string(),
                message: error.to_string(),
                schema_path: error.schema_path.to_string(),
            })
            .collect();
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(())
}
