//! Semantic validation of step outputs against declared types.
//!
//! The validator observes and judges; it never modifies an output. Checks,
//! in order: epistemic type compatibility, range bounds for ranged
//! numerics, required structured fields, and the most restrictive
//! confidence floor in scope. Violations feed the retry engine's failure
//! context.

use axon_core::semtype::{assignable, Assignability, Epistemic, SemType};
use axon_interchange::{TypeDecl, TypeRef};
use std::collections::BTreeMap;

use crate::context::TypedValue;
use crate::error::{ErrorContext, RuntimeError};

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Violation {
    pub rule: String,
    pub message: String,
}

impl Violation {
    fn new(rule: &str, message: impl Into<String>) -> Self {
        Violation {
            rule: rule.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub violations: Vec<Violation>,
}

/// What a step output must satisfy.
#[derive(Debug, Clone, Default)]
pub struct ValidationSpec {
    pub expected_type: Option<TypeRef>,
    pub confidence_floor: Option<f64>,
    pub range: Option<(f64, f64)>,
}

fn resolve(type_ref: &TypeRef, types: &BTreeMap<String, TypeDecl>) -> SemType {
    let base = if type_ref.name == "List" {
        let inner = type_ref
            .generic
            .as_deref()
            .map(|g| resolve_name(g, types))
            .unwrap_or(SemType::Nominal("String".to_string()));
        SemType::List(Box::new(inner))
    } else {
        resolve_name(&type_ref.name, types)
    };
    if type_ref.optional {
        SemType::Optional(Box::new(base))
    } else {
        base
    }
}

fn resolve_name(name: &str, types: &BTreeMap<String, TypeDecl>) -> SemType {
    if let Some(e) = Epistemic::from_name(name) {
        return SemType::Epistemic(e);
    }
    if let Some((lo, hi)) = axon_core::semtype::builtin_range(name) {
        return SemType::Refined {
            base: Box::new(SemType::Nominal(name.to_string())),
            lo,
            hi,
        };
    }
    if let Some(decl) = types.get(name) {
        if let Some([lo, hi]) = decl.range {
            return SemType::Refined {
                base: Box::new(SemType::Nominal(name.to_string())),
                lo,
                hi,
            };
        }
    }
    SemType::Nominal(name.to_string())
}

/// Run every applicable check against an output.
pub fn validate(
    output: &TypedValue,
    spec: &ValidationSpec,
    types: &BTreeMap<String, TypeDecl>,
) -> ValidationOutcome {
    let mut violations = Vec::new();

    if let Some(expected) = &spec.expected_type {
        check_type_category(output, expected, types, &mut violations);
        check_required_fields(output, expected, types, &mut violations);
    }

    let range = spec.range.or_else(|| {
        spec.expected_type.as_ref().and_then(|t| {
            match resolve(t, types) {
                SemType::Refined { lo, hi, .. } => Some((lo, hi)),
                _ => None,
            }
        })
    });
    if let Some((lo, hi)) = range {
        check_range(output, lo, hi, &mut violations);
    }

    if let Some(floor) = spec.confidence_floor {
        if output.confidence < floor {
            violations.push(Violation::new(
                "confidence_floor",
                format!(
                    "confidence {:.2} is below the floor of {:.2}",
                    output.confidence, floor
                ),
            ));
        }
    }

    ValidationOutcome {
        is_valid: violations.is_empty(),
        violations,
    }
}

/// An output that self-declares its epistemic type (a `type` or `_type`
/// field) must be compatible with the expected one.
fn check_type_category(
    output: &TypedValue,
    expected: &TypeRef,
    types: &BTreeMap<String, TypeDecl>,
    violations: &mut Vec<Violation>,
) {
    let declared = output
        .value
        .get("type")
        .or_else(|| output.value.get("_type"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| output.type_name.clone());

    let Some(declared) = declared else { return };
    if declared == expected.name {
        return;
    }

    let source = resolve_name(&declared, types);
    let target = resolve(expected, types);
    match assignable(&source, &target) {
        Assignability::Ok | Assignability::Taint => {}
        Assignability::Reject => {
            let rule = if Epistemic::from_name(&declared).is_some()
                && Epistemic::from_name(&expected.name).is_some()
            {
                "epistemic_exclusion"
            } else {
                "type_mismatch"
            };
            violations.push(Violation::new(
                rule,
                format!(
                    "expected '{}' but output declares '{}'",
                    expected.name, declared
                ),
            ));
        }
    }
}

fn check_required_fields(
    output: &TypedValue,
    expected: &TypeRef,
    types: &BTreeMap<String, TypeDecl>,
    violations: &mut Vec<Violation>,
) {
    let Some(decl) = types.get(&expected.name) else {
        return;
    };
    let required: Vec<&str> = decl
        .fields
        .iter()
        .filter(|f| !f.type_ref.optional)
        .map(|f| f.name.as_str())
        .collect();
    if required.is_empty() {
        return;
    }

    let Some(object) = output.value.as_object() else {
        violations.push(Violation::new(
            "structured_type",
            format!(
                "expected structured output with fields {:?}, got a non-object value",
                required
            ),
        ));
        return;
    };

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|f| !object.contains_key(*f))
        .collect();
    if !missing.is_empty() {
        violations.push(Violation::new(
            "missing_fields",
            format!("missing required fields: {:?}", missing),
        ));
    }
}

fn check_range(output: &TypedValue, lo: f64, hi: f64, violations: &mut Vec<Violation>) {
    let value = match &output.value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::Object(map) => map
            .get("value")
            .or_else(|| map.get("score"))
            .and_then(|v| v.as_f64()),
        _ => None,
    };
    let Some(value) = value else { return };

    if value < lo {
        violations.push(Violation::new(
            "range_below_min",
            format!("value {} is below minimum {}", value, lo),
        ));
    }
    if value > hi {
        violations.push(Violation::new(
            "range_above_max",
            format!("value {} exceeds maximum {}", value, hi),
        ));
    }
}

/// Validate and convert failures to typed errors: confidence-floor
/// violations become `Confidence`, everything else `Validation`.
pub fn validate_and_raise(
    output: &TypedValue,
    spec: &ValidationSpec,
    types: &BTreeMap<String, TypeDecl>,
    context: ErrorContext,
) -> Result<ValidationOutcome, RuntimeError> {
    let outcome = validate(output, spec, types);
    if outcome.is_valid {
        return Ok(outcome);
    }

    let confidence_only = outcome
        .violations
        .iter()
        .all(|v| v.rule == "confidence_floor");
    let message = outcome
        .violations
        .iter()
        .map(|v| v.message.clone())
        .collect::<Vec<_>>()
        .join("; ");

    if confidence_only {
        Err(RuntimeError::Confidence { message, context })
    } else {
        Err(RuntimeError::Validation { message, context })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_for(name: &str) -> ValidationSpec {
        ValidationSpec {
            expected_type: Some(TypeRef::plain(name)),
            confidence_floor: None,
            range: None,
        }
    }

    #[test]
    fn opinion_never_satisfies_factual_claim() {
        let output = TypedValue::new(
            json!({"type": "Opinion", "text": "seems fine"}),
            Some("Opinion".to_string()),
            0.9,
        );
        let outcome = validate(&output, &spec_for("FactualClaim"), &BTreeMap::new());
        assert!(!outcome.is_valid);
        assert_eq!(outcome.violations[0].rule, "epistemic_exclusion");
    }

    #[test]
    fn factual_claim_satisfies_string() {
        let output = TypedValue::new(
            json!({"type": "FactualClaim", "text": "the sky is blue"}),
            Some("FactualClaim".to_string()),
            0.9,
        );
        let outcome = validate(&output, &spec_for("String"), &BTreeMap::new());
        assert!(outcome.is_valid, "{:?}", outcome.violations);
    }

    #[test]
    fn confidence_floor_violation() {
        let output = TypedValue::text("ok", 0.5);
        let spec = ValidationSpec {
            confidence_floor: Some(0.9),
            ..ValidationSpec::default()
        };
        let outcome = validate(&output, &spec, &BTreeMap::new());
        assert!(!outcome.is_valid);
        assert_eq!(outcome.violations[0].rule, "confidence_floor");

        let err = validate_and_raise(&output, &spec, &BTreeMap::new(), ErrorContext::default())
            .unwrap_err();
        assert_eq!(err.code(), "AXON_002");
    }

    #[test]
    fn range_bounds_inclusive() {
        let spec = ValidationSpec {
            range: Some((0.0, 1.0)),
            ..ValidationSpec::default()
        };
        let at_hi = TypedValue::new(json!(1.0), None, 1.0);
        assert!(validate(&at_hi, &spec, &BTreeMap::new()).is_valid);

        let above = TypedValue::new(json!(1.01), None, 1.0);
        let outcome = validate(&above, &spec, &BTreeMap::new());
        assert_eq!(outcome.violations[0].rule, "range_above_max");
    }

    #[test]
    fn ranged_type_bounds_inferred_from_declaration() {
        let mut types = BTreeMap::new();
        types.insert(
            "Score".to_string(),
            TypeDecl {
                range: Some([0.0, 1.0]),
                ..TypeDecl::default()
            },
        );
        let bad = TypedValue::new(json!({"value": 2.5}), Some("Score".to_string()), 1.0);
        let outcome = validate(&bad, &spec_for("Score"), &types);
        assert!(!outcome.is_valid);
    }

    #[test]
    fn required_fields_enforced() {
        let mut types = BTreeMap::new();
        types.insert(
            "Party".to_string(),
            TypeDecl {
                fields: vec![
                    axon_interchange::FieldDecl {
                        name: "name".to_string(),
                        type_ref: TypeRef::plain("FactualClaim"),
                    },
                    axon_interchange::FieldDecl {
                        name: "standing".to_string(),
                        type_ref: TypeRef {
                            name: "Opinion".to_string(),
                            generic: None,
                            optional: true,
                        },
                    },
                ],
                ..TypeDecl::default()
            },
        );
        // Optional field may be absent; required may not.
        let ok = TypedValue::new(json!({"name": "Acme"}), None, 1.0);
        assert!(validate(&ok, &spec_for("Party"), &types).is_valid);

        let missing = TypedValue::new(json!({"standing": "good"}), None, 1.0);
        let outcome = validate(&missing, &spec_for("Party"), &types);
        assert_eq!(outcome.violations[0].rule, "missing_fields");

        let err = validate_and_raise(&missing, &spec_for("Party"), &types, ErrorContext::default());
        assert_eq!(err.unwrap_err().code(), "AXON_001");
    }
}
