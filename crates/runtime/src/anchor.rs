//! Anchor enforcement: predicates, not prompts.
//!
//! An anchor holds preconditions (`requires`), postconditions (`ensures`),
//! and relational invariants, plus a confidence floor, a refusal message,
//! and a violation strategy. Multiple anchors compose by conjunction: all
//! of them must hold. Structural enforcement (confidence bounds, reject
//! patterns, field presence) happens in-process; semantic enforcement is
//! delegated to an external judge and marked as delegated in the trace.

use async_trait::async_trait;

use axon_interchange::{AnchorDecl, ViolationAction};

use crate::context::{RunContext, TypedValue};

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AnchorViolation {
    pub anchor: String,
    pub reason: String,
}

/// An anchor bound to a run.
#[derive(Debug, Clone)]
pub struct BoundAnchor {
    pub name: String,
    pub decl: AnchorDecl,
}

impl BoundAnchor {
    pub fn new(name: impl Into<String>, decl: AnchorDecl) -> Self {
        BoundAnchor {
            name: name.into(),
            decl,
        }
    }

    /// Pre-execution gate: may the step run given the current context?
    /// The default is yes; anchors restricting inputs hook in here.
    pub fn allows_start(&self, _ctx: &RunContext) -> bool {
        true
    }

    /// Post-execution structural checks over a step output.
    pub fn check_output(&self, output: &TypedValue) -> Vec<AnchorViolation> {
        let mut violations = Vec::new();

        if let Some(floor) = self.decl.confidence_floor {
            if output.confidence < floor {
                violations.push(AnchorViolation {
                    anchor: self.name.clone(),
                    reason: format!(
                        "ensures confidence >= {}, output confidence is {}",
                        floor, output.confidence
                    ),
                });
            }
        }

        if !self.decl.reject.is_empty() {
            let content = rendered_content(output).to_lowercase();
            for pattern in &self.decl.reject {
                let needle = pattern.replace('_', " ");
                if content.contains(&pattern.to_lowercase()) || content.contains(&needle.to_lowercase())
                {
                    violations.push(AnchorViolation {
                        anchor: self.name.clone(),
                        reason: format!("output matches rejected pattern '{}'", pattern),
                    });
                }
            }
        }

        violations
    }

    /// The declared violation strategy; raise-and-halt when unset.
    pub fn strategy(&self) -> ViolationAction {
        self.decl.on_violation.clone().unwrap_or(ViolationAction::Raise {
            error: "AnchorBreachError".to_string(),
        })
    }
}

fn rendered_content(output: &TypedValue) -> String {
    match &output.value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Check a step output against every bound anchor. Conjunction: the step
/// passes iff no anchor reports a violation.
pub fn check_all(anchors: &[BoundAnchor], output: &TypedValue) -> Vec<AnchorViolation> {
    anchors
        .iter()
        .flat_map(|a| a.check_output(output))
        .collect()
}

/// External judge for anchor clauses that require inference to evaluate
/// (`enforce: factual_only` and friends). The core ships a pass-through;
/// real judges live outside and their use is marked in the trace.
#[async_trait]
pub trait SemanticJudge: Send + Sync {
    /// Does the output satisfy the anchor's semantic requirement?
    async fn holds(&self, anchor: &AnchorDecl, output: &TypedValue) -> bool;
}

/// Default judge: accepts everything. Steps checked through it are marked
/// `delegated` in the trace so the gap is visible.
pub struct PassThroughJudge;

#[async_trait]
impl SemanticJudge for PassThroughJudge {
    async fn holds(&self, _anchor: &AnchorDecl, _output: &TypedValue) -> bool {
        true
    }
}
