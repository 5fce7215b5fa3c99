//! Deserialization of interchange JSON into typed IR structs, gated on
//! `axon_ir_version`.
//!
//! Unknown fields are ignored. A missing or major-incompatible version, or a
//! bundle missing required fields, is a `VersionMismatch` -- consumers must
//! not guess at the shape of a bundle they do not understand.

use std::fmt;

use crate::types::IrProgram;
use crate::AXON_IR_VERSION;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterchangeError {
    /// The bundle's `axon_ir_version` is absent, unparsable, or from an
    /// incompatible major version -- or a required field is missing.
    VersionMismatch { found: String, message: String },
    /// The value is not a JSON object at all.
    NotAnObject,
}

impl fmt::Display for InterchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterchangeError::VersionMismatch { found, message } => {
                write!(
                    f,
                    "IR version mismatch (found '{}', supported '{}'): {}",
                    found, AXON_IR_VERSION, message
                )
            }
            InterchangeError::NotAnObject => write!(f, "IR bundle is not a JSON object"),
        }
    }
}

impl std::error::Error for InterchangeError {}

fn major(version: &str) -> Option<&str> {
    version.split('.').next().filter(|m| !m.is_empty())
}

/// Deserialize an interchange bundle into an `IrProgram`.
pub fn from_interchange(value: &serde_json::Value) -> Result<IrProgram, InterchangeError> {
    let obj = value.as_object().ok_or(InterchangeError::NotAnObject)?;

    let version = obj
        .get("axon_ir_version")
        .and_then(|v| v.as_str())
        .ok_or_else(|| InterchangeError::VersionMismatch {
            found: "(absent)".to_string(),
            message: "bundle has no axon_ir_version field".to_string(),
        })?;

    if major(version) != major(AXON_IR_VERSION) {
        return Err(InterchangeError::VersionMismatch {
            found: version.to_string(),
            message: "major version is incompatible".to_string(),
        });
    }

    serde_json::from_value(value.clone()).map_err(|e| InterchangeError::VersionMismatch {
        found: version.to_string(),
        message: format!("required field missing or malformed: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_bundle() -> serde_json::Value {
        serde_json::json!({
            "axon_ir_version": "1.0",
            "program_id": "00000000-0000-0000-0000-000000000000",
            "declarations": {},
            "flows": {
                "F": { "params": [], "steps": [] }
            },
            "entrypoint": { "flow": "F" }
        })
    }

    #[test]
    fn accepts_current_version() {
        let program = from_interchange(&minimal_bundle()).unwrap();
        assert_eq!(program.axon_ir_version, "1.0");
        assert_eq!(program.entrypoint.flow, "F");
        assert!(program.flows.contains_key("F"));
    }

    #[test]
    fn accepts_minor_version_drift() {
        let mut bundle = minimal_bundle();
        bundle["axon_ir_version"] = serde_json::json!("1.7");
        assert!(from_interchange(&bundle).is_ok());
    }

    #[test]
    fn rejects_major_version_drift() {
        let mut bundle = minimal_bundle();
        bundle["axon_ir_version"] = serde_json::json!("2.0");
        let err = from_interchange(&bundle).unwrap_err();
        assert!(matches!(err, InterchangeError::VersionMismatch { .. }));
    }

    #[test]
    fn rejects_missing_version() {
        let mut bundle = minimal_bundle();
        bundle.as_object_mut().unwrap().remove("axon_ir_version");
        let err = from_interchange(&bundle).unwrap_err();
        assert!(matches!(
            err,
            InterchangeError::VersionMismatch { ref found, .. } if found == "(absent)"
        ));
    }

    #[test]
    fn missing_required_field_is_version_mismatch() {
        let mut bundle = minimal_bundle();
        bundle.as_object_mut().unwrap().remove("entrypoint");
        let err = from_interchange(&bundle).unwrap_err();
        assert!(matches!(err, InterchangeError::VersionMismatch { .. }));
    }

    #[test]
    fn ignores_unknown_top_level_fields() {
        let mut bundle = minimal_bundle();
        bundle["an_extension_field"] = serde_json::json!({"x": 1});
        assert!(from_interchange(&bundle).is_ok());
    }
}
