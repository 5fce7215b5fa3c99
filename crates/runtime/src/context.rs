//! Mutable per-run execution state.
//!
//! One `RunContext` per flow invocation. Step outputs commit atomically on
//! success; a failed step leaves the context at its last committed state.
//! `snapshot()` produces a deep immutable copy for tracing.

use std::collections::BTreeMap;

use axon_interchange::{AnchorDecl, ContextDecl, PersonaDecl};

/// A step output with its semantic type and confidence.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TypedValue {
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub confidence: f64,
}

impl TypedValue {
    pub fn new(value: serde_json::Value, type_name: Option<String>, confidence: f64) -> Self {
        TypedValue {
            value,
            type_name,
            confidence,
        }
    }

    pub fn text(content: impl Into<String>, confidence: f64) -> Self {
        TypedValue {
            value: serde_json::Value::String(content.into()),
            type_name: None,
            confidence,
        }
    }
}

/// Immutable point-in-time capture of the run state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ContextSnapshot {
    pub outputs: BTreeMap<String, TypedValue>,
    pub steps_completed: u64,
}

/// Mutable state for one flow invocation.
#[derive(Debug, Default)]
pub struct RunContext {
    pub persona_name: Option<String>,
    pub persona: Option<PersonaDecl>,
    pub context: Option<ContextDecl>,
    /// Bound anchors in declaration order: (name, declaration).
    pub anchors: Vec<(String, AnchorDecl)>,
    /// Flow arguments: parameter name → literal value.
    pub arguments: BTreeMap<String, String>,
    outputs: BTreeMap<String, TypedValue>,
    by_name: BTreeMap<String, String>,
    commit_order: Vec<String>,
    steps_completed: u64,
}

impl RunContext {
    /// Commit a step's output. Visible to subsequent steps only after this
    /// returns; there is no partial commit.
    pub fn commit(&mut self, step_id: &str, step_name: &str, value: TypedValue) {
        self.outputs.insert(step_id.to_string(), value);
        self.by_name.insert(step_name.to_string(), step_id.to_string());
        self.commit_order.push(step_id.to_string());
        self.steps_completed += 1;
    }

    pub fn output(&self, step_id: &str) -> Option<&TypedValue> {
        self.outputs.get(step_id)
    }

    pub fn output_by_name(&self, step_name: &str) -> Option<&TypedValue> {
        self.by_name.get(step_name).and_then(|id| self.outputs.get(id))
    }

    /// The most recently committed output, if any.
    pub fn last_output(&self) -> Option<&TypedValue> {
        self.commit_order
            .last()
            .and_then(|id| self.outputs.get(id))
    }

    pub fn steps_completed(&self) -> u64 {
        self.steps_completed
    }

    /// The most restrictive confidence floor in scope: the highest among
    /// persona threshold and all anchor floors, combined with an optional
    /// per-step floor.
    pub fn confidence_floor(&self, step_floor: Option<f64>) -> Option<f64> {
        let mut floor = step_floor;
        if let Some(p) = &self.persona {
            floor = max_floor(floor, p.confidence_threshold);
        }
        for (_, anchor) in &self.anchors {
            floor = max_floor(floor, anchor.confidence_floor);
        }
        floor
    }

    /// Default confidence when the backend reports none: the persona's
    /// threshold, else 1.0. Never invented silently -- callers record the
    /// source in the trace.
    pub fn default_confidence(&self) -> f64 {
        self.persona
            .as_ref()
            .and_then(|p| p.confidence_threshold)
            .unwrap_or(1.0)
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            outputs: self.outputs.clone(),
            steps_completed: self.steps_completed,
        }
    }
}

fn max_floor(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commits_are_visible_and_counted() {
        let mut ctx = RunContext::default();
        assert!(ctx.output_by_name("S").is_none());
        ctx.commit("id-1", "S", TypedValue::text("hello", 0.9));
        assert_eq!(ctx.output("id-1").unwrap().confidence, 0.9);
        assert_eq!(
            ctx.output_by_name("S").unwrap().value,
            serde_json::json!("hello")
        );
        assert_eq!(ctx.steps_completed(), 1);
    }

    #[test]
    fn snapshot_is_independent_of_later_mutation() {
        let mut ctx = RunContext::default();
        ctx.commit("id-1", "A", TypedValue::text("a", 1.0));
        let snap = ctx.snapshot();
        ctx.commit("id-2", "B", TypedValue::text("b", 1.0));
        assert_eq!(snap.outputs.len(), 1);
        assert_eq!(snap.steps_completed, 1);
        assert_eq!(ctx.steps_completed(), 2);
    }

    #[test]
    fn most_restrictive_floor_wins() {
        let mut ctx = RunContext::default();
        ctx.persona = Some(PersonaDecl {
            confidence_threshold: Some(0.6),
            ..PersonaDecl::default()
        });
        ctx.anchors.push((
            "A".to_string(),
            AnchorDecl {
                confidence_floor: Some(0.9),
                ..AnchorDecl::default()
            },
        ));
        assert_eq!(ctx.confidence_floor(Some(0.7)), Some(0.9));
        assert_eq!(ctx.confidence_floor(None), Some(0.9));
    }

    #[test]
    fn default_confidence_prefers_persona_threshold() {
        let mut ctx = RunContext::default();
        assert_eq!(ctx.default_confidence(), 1.0);
        ctx.persona = Some(PersonaDecl {
            confidence_threshold: Some(0.8),
            ..PersonaDecl::default()
        });
        assert_eq!(ctx.default_confidence(), 0.8);
    }
}
