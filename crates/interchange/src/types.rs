//! Typed structs for the AXON interchange JSON.
//!
//! Field order in these structs IS the canonical JSON field order; maps are
//! `BTreeMap` so two compilations of identical source serialize to
//! byte-identical bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────
// Program root
// ──────────────────────────────────────────────

/// The complete compiled program: `{ axon_ir_version, program_id,
/// declarations, flows, entrypoint }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrProgram {
    pub axon_ir_version: String,
    pub program_id: String,
    pub declarations: Declarations,
    pub flows: BTreeMap<String, IrFlow>,
    pub entrypoint: Entrypoint,
}

/// Per-category declaration maps, keyed by declared name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Declarations {
    #[serde(default)]
    pub personas: BTreeMap<String, PersonaDecl>,
    #[serde(default)]
    pub contexts: BTreeMap<String, ContextDecl>,
    #[serde(default)]
    pub anchors: BTreeMap<String, AnchorDecl>,
    #[serde(default)]
    pub memories: BTreeMap<String, MemoryDecl>,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolDecl>,
    #[serde(default)]
    pub types: BTreeMap<String, TypeDecl>,
    #[serde(default)]
    pub intents: BTreeMap<String, IntentDecl>,
}

// ──────────────────────────────────────────────
// Type references
// ──────────────────────────────────────────────

/// A reference to a semantic type: `Document`, `List<Party>`, `FactualClaim?`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

impl TypeRef {
    pub fn plain(name: impl Into<String>) -> Self {
        TypeRef {
            name: name.into(),
            generic: None,
            optional: false,
        }
    }
}

// ──────────────────────────────────────────────
// Declarations
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PersonaDecl {
    #[serde(default)]
    pub domain: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cite_sources: Option<bool>,
    #[serde(default)]
    pub refuse_if: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContextDecl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cite_sources: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnchorDecl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require: Option<String>,
    #[serde(default)]
    pub reject: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_floor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unknown_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_violation: Option<ViolationAction>,
}

/// What an anchor does when breached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ViolationAction {
    Raise { error: String },
    Warn,
    Log,
    Escalate,
    Fallback { value: String },
    Retry { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MemoryDecl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decay: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolDecl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Tool timeout in milliseconds, lowered from the duration literal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TypeDecl {
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    /// `[lo, hi]` for ranged types like `type RiskScore(0.0..1.0)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "where")]
    pub where_clause: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub type_ref: TypeRef,
}

/// A structural `where` predicate. Only forms decidable without inference
/// are representable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pred", rename_all = "snake_case")]
pub enum Predicate {
    Compare {
        subject: String,
        op: String,
        value: f64,
    },
    InSet {
        subject: String,
        values: Vec<String>,
    },
    NonEmpty {
        subject: String,
    },
    And {
        clauses: Vec<Predicate>,
    },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IntentDecl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TypeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_floor: Option<f64>,
}

// ──────────────────────────────────────────────
// Flows and steps
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrFlow {
    #[serde(default)]
    pub params: Vec<IrParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<TypeRef>,
    pub steps: Vec<IrStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrParam {
    pub name: String,
    #[serde(rename = "type")]
    pub type_ref: TypeRef,
}

/// Step kinds in the execution DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Ask,
    Probe,
    Reason,
    Validate,
    Weave,
    UseTool,
    Remember,
    Recall,
    Conditional,
}

/// A reference a step consumes: either a flow input or an earlier step's
/// output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum IrInput {
    Param { name: String },
    Step { id: String, name: String },
}

/// One node of the step DAG. `depends_on` is the edge set and must be
/// acyclic; every id in it belongs to a prior step of the same flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrStep {
    pub id: String,
    pub kind: StepKind,
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<IrInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<TypeRef>,
    pub config: serde_json::Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub line: u32,
    pub column: u32,
}

// ──────────────────────────────────────────────
// Entrypoint
// ──────────────────────────────────────────────

/// The `run` statement: flow + persona + context + anchors + strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entrypoint {
    pub flow: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub anchors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<FailureStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
}

/// What the flow does when a step error reaches the top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum FailureStrategy {
    Log,
    Retry {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backoff: Option<String>,
    },
    Escalate,
    Raise {
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_ref_round_trips() {
        let t = TypeRef {
            name: "List".to_string(),
            generic: Some("Party".to_string()),
            optional: true,
        };
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["name"], "List");
        assert_eq!(json["generic"], "Party");
        let back: TypeRef = serde_json::from_value(json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn violation_action_tagging() {
        let v = ViolationAction::Raise {
            error: "AnchorBreachError".to_string(),
        };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["action"], "raise");
        assert_eq!(json["error"], "AnchorBreachError");

        let f: ViolationAction =
            serde_json::from_value(serde_json::json!({"action": "fallback", "value": "n/a"}))
                .unwrap();
        assert_eq!(
            f,
            ViolationAction::Fallback {
                value: "n/a".to_string()
            }
        );
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = serde_json::json!({
            "name": "S1",
            "id": "x",
            "kind": "ask",
            "config": {},
            "line": 1,
            "column": 1,
            "some_future_field": true,
        });
        let step: IrStep = serde_json::from_value(json).unwrap();
        assert_eq!(step.kind, StepKind::Ask);
        assert!(step.depends_on.is_empty());
    }
}
