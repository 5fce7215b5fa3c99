//! IR generation: checked AST → interchange structs.
//!
//! Step ids are UUID v5 names derived from the program id, flow name, step
//! index, and step name, and the program id is derived from the source
//! text, so identical source compiles to byte-identical IR JSON.
//!
//! A `refine { … }` flow step is not a DAG node: it attaches to the
//! immediately preceding step as retry configuration.

use std::collections::BTreeMap;

use serde_json::json;
use uuid::Uuid;

use axon_interchange::{
    AnchorDecl, ContextDecl, Declarations, Entrypoint, FailureStrategy as IrFailureStrategy,
    FieldDecl, IntentDecl, IrFlow, IrInput, IrParam, IrProgram, IrStep, MemoryDecl, PersonaDecl,
    Predicate, StepKind, ToolDecl, TypeDecl, TypeRef, ViolationAction as IrViolationAction,
    AXON_IR_VERSION,
};

use crate::ast::*;
use crate::error::IrError;

pub fn generate(program: &Program, source: &str) -> Result<IrProgram, IrError> {
    let program_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, source.as_bytes());

    let mut declarations = Declarations::default();
    let mut flows = BTreeMap::new();
    let mut entrypoint: Option<Entrypoint> = None;

    for decl in &program.declarations {
        match decl {
            Declaration::Persona(d) => {
                declarations.personas.insert(d.name.clone(), lower_persona(d));
            }
            Declaration::Context(d) => {
                declarations.contexts.insert(d.name.clone(), lower_context(d));
            }
            Declaration::Anchor(d) => {
                declarations.anchors.insert(d.name.clone(), lower_anchor(d));
            }
            Declaration::Memory(d) => {
                declarations.memories.insert(d.name.clone(), lower_memory(d));
            }
            Declaration::Tool(d) => {
                declarations.tools.insert(d.name.clone(), lower_tool(d));
            }
            Declaration::Type(d) => {
                declarations.types.insert(d.name.clone(), lower_typedef(d));
            }
            Declaration::Intent(d) => {
                declarations.intents.insert(d.name.clone(), lower_intent(d));
            }
            Declaration::Flow(d) => {
                flows.insert(d.name.clone(), lower_flow(d, &program_id)?);
            }
            Declaration::Run(d) => {
                if entrypoint.is_some() {
                    return Err(IrError::MultipleEntrypoints {
                        line: d.line,
                        column: d.column,
                    });
                }
                entrypoint = Some(lower_run(d));
            }
            Declaration::Import(_) => {}
        }
    }

    let entrypoint = entrypoint.ok_or(IrError::NoEntrypoint)?;

    Ok(IrProgram {
        axon_ir_version: AXON_IR_VERSION.to_string(),
        program_id: program_id.to_string(),
        declarations,
        flows,
        entrypoint,
    })
}

// ──────────────────────────────────────────────
// Declaration lowering
// ──────────────────────────────────────────────

fn lower_persona(d: &PersonaDef) -> PersonaDecl {
    PersonaDecl {
        domain: d.domain.clone(),
        tone: d.tone.clone(),
        confidence_threshold: d.confidence_threshold,
        cite_sources: d.cite_sources,
        refuse_if: d.refuse_if.clone(),
        language: d.language.clone(),
        description: d.description.clone(),
    }
}

fn lower_context(d: &ContextDef) -> ContextDecl {
    ContextDecl {
        memory: d.memory_scope.clone(),
        language: d.language.clone(),
        depth: d.depth.clone(),
        max_tokens: d.max_tokens,
        temperature: d.temperature,
        cite_sources: d.cite_sources,
    }
}

fn lower_violation(a: &ViolationAction) -> IrViolationAction {
    match a {
        ViolationAction::Raise(e) => IrViolationAction::Raise { error: e.clone() },
        ViolationAction::Warn => IrViolationAction::Warn,
        ViolationAction::Log => IrViolationAction::Log,
        ViolationAction::Escalate => IrViolationAction::Escalate,
        ViolationAction::Fallback(v) => IrViolationAction::Fallback { value: v.clone() },
        ViolationAction::Retry(n) => IrViolationAction::Retry { attempts: *n },
    }
}

fn lower_anchor(d: &AnchorDef) -> AnchorDecl {
    AnchorDecl {
        require: d.require.clone(),
        reject: d.reject.clone(),
        enforce: d.enforce.clone(),
        confidence_floor: d.confidence_floor,
        unknown_response: d.unknown_response.clone(),
        on_violation: d.on_violation.as_ref().map(lower_violation),
    }
}

fn lower_memory(d: &MemoryDef) -> MemoryDecl {
    MemoryDecl {
        store: d.store.clone(),
        backend: d.backend.clone(),
        retrieval: d.retrieval.clone(),
        decay: d.decay.clone(),
    }
}

/// `"10s"` → 10_000. Lexing guarantees the shape `<digits><suffix>`.
pub fn duration_to_millis(lexeme: &str) -> Option<u64> {
    let digits_end = lexeme.find(|c: char| !c.is_ascii_digit())?;
    let value: u64 = lexeme[..digits_end].parse().ok()?;
    let factor = match &lexeme[digits_end..] {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return None,
    };
    Some(value * factor)
}

fn lower_tool(d: &ToolDef) -> ToolDecl {
    ToolDecl {
        provider: d.provider.clone(),
        max_results: d.max_results,
        filter: d.filter.clone(),
        timeout_ms: d.timeout.as_deref().and_then(duration_to_millis),
        runtime: d.runtime.clone(),
        sandbox: d.sandbox,
    }
}

fn lower_type_expr(t: &TypeExpr) -> TypeRef {
    TypeRef {
        name: t.name.clone(),
        generic: t.generic.clone(),
        optional: t.optional,
    }
}

fn lower_predicate(p: &PredicateExpr) -> Predicate {
    match p {
        PredicateExpr::Compare {
            subject, op, value, ..
        } => Predicate::Compare {
            subject: subject.clone(),
            op: op.clone(),
            value: *value,
        },
        PredicateExpr::InSet {
            subject, values, ..
        } => Predicate::InSet {
            subject: subject.clone(),
            values: values.clone(),
        },
        PredicateExpr::NonEmpty { subject, .. } => Predicate::NonEmpty {
            subject: subject.clone(),
        },
        PredicateExpr::And(clauses) => Predicate::And {
            clauses: clauses.iter().map(lower_predicate).collect(),
        },
    }
}

fn lower_typedef(d: &TypeDef) -> TypeDecl {
    TypeDecl {
        fields: d
            .fields
            .iter()
            .map(|f| FieldDecl {
                name: f.name.clone(),
                type_ref: lower_type_expr(&f.type_expr),
            })
            .collect(),
        range: d.range.map(|(lo, hi)| [lo, hi]),
        where_clause: d.where_clause.as_ref().map(lower_predicate),
    }
}

fn lower_intent(d: &IntentDef) -> IntentDecl {
    IntentDecl {
        given: d.given.clone(),
        ask: d.ask.clone(),
        output: d.output.as_ref().map(lower_type_expr),
        confidence_floor: d.confidence_floor,
    }
}

fn lower_run(d: &RunStatement) -> Entrypoint {
    Entrypoint {
        flow: d.flow.clone(),
        arguments: d.arguments.clone(),
        persona: d.persona.clone(),
        context: d.context.clone(),
        anchors: d.anchors.clone(),
        on_failure: d.on_failure.as_ref().map(|s| match s {
            FailureStrategy::Log => IrFailureStrategy::Log,
            FailureStrategy::Escalate => IrFailureStrategy::Escalate,
            FailureStrategy::Raise(e) => IrFailureStrategy::Raise { error: e.clone() },
            FailureStrategy::Retry(params) => IrFailureStrategy::Retry {
                backoff: params
                    .iter()
                    .find(|(k, _)| k == "backoff")
                    .map(|(_, v)| v.clone()),
            },
        }),
        output_to: d.output_to.clone(),
        effort: d.effort.clone(),
    }
}

// ──────────────────────────────────────────────
// Flow lowering
// ──────────────────────────────────────────────

struct PendingStep {
    name: String,
    kind: StepKind,
    refs: Vec<String>,
    output_type: Option<TypeRef>,
    config: serde_json::Value,
    line: u32,
    column: u32,
}

fn lower_flow(flow: &FlowDef, program_id: &Uuid) -> Result<IrFlow, IrError> {
    let mut pending: Vec<PendingStep> = Vec::new();

    for step in &flow.steps {
        lower_step(step, &mut pending);
    }

    // Phase 2: assign deterministic ids, then resolve references.
    let ids: Vec<String> = pending
        .iter()
        .enumerate()
        .map(|(index, step)| {
            Uuid::new_v5(
                program_id,
                format!("{}/{}/{}", flow.name, index, step.name).as_bytes(),
            )
            .to_string()
        })
        .collect();

    let name_to_index: BTreeMap<&str, usize> = pending
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    let mut steps: Vec<IrStep> = Vec::with_capacity(pending.len());
    for (index, step) in pending.iter().enumerate() {
        let mut inputs = Vec::new();
        let mut depends_on = Vec::new();
        for reference in &step.refs {
            let head = reference.split('.').next().unwrap_or(reference);
            match name_to_index.get(head) {
                Some(&target) if target != index => {
                    let id = ids[target].clone();
                    if !depends_on.contains(&id) {
                        depends_on.push(id.clone());
                    }
                    inputs.push(IrInput::Step {
                        id,
                        name: head.to_string(),
                    });
                }
                _ => inputs.push(IrInput::Param {
                    name: head.to_string(),
                }),
            }
        }
        steps.push(IrStep {
            id: ids[index].clone(),
            kind: step.kind,
            name: step.name.clone(),
            inputs,
            output_type: step.output_type.clone(),
            config: step.config.clone(),
            depends_on,
            line: step.line,
            column: step.column,
        });
    }

    let sorted = topo_sort(steps, &flow.name)?;

    Ok(IrFlow {
        params: flow
            .params
            .iter()
            .map(|p| IrParam {
                name: p.name.clone(),
                type_ref: lower_type_expr(&p.type_expr),
            })
            .collect(),
        return_type: flow.return_type.as_ref().map(lower_type_expr),
        steps: sorted,
    })
}

fn lower_step(step: &FlowStep, pending: &mut Vec<PendingStep>) {
    let ordinal = pending.len() + 1;
    match step {
        FlowStep::Step(s) => {
            let mut refs = s.given.clone();
            let kind;
            let mut config = serde_json::Map::new();
            if let Some(a) = &s.ask {
                config.insert("ask".to_string(), json!(a));
            }
            if let Some(f) = s.confidence_floor {
                config.insert("confidence_floor".to_string(), json!(f));
            }
            if let Some(u) = &s.use_tool {
                kind = StepKind::UseTool;
                config.insert("tool".to_string(), json!(u.tool_name));
                config.insert("argument".to_string(), json!(u.argument));
            } else if let Some(p) = &s.probe {
                kind = StepKind::Probe;
                refs.push(p.target.clone());
                config.insert("target".to_string(), json!(p.target));
                config.insert("fields".to_string(), json!(p.fields));
            } else if let Some(r) = &s.reason {
                kind = StepKind::Reason;
                refs.extend(r.given.iter().cloned());
                config.insert("reason".to_string(), reason_config(r));
            } else if let Some(w) = &s.weave {
                kind = StepKind::Weave;
                refs.extend(w.sources.iter().cloned());
                config.insert("weave".to_string(), weave_config(w));
            } else {
                kind = StepKind::Ask;
            }
            pending.push(PendingStep {
                name: s.name.clone(),
                kind,
                refs,
                output_type: s.output_type.as_deref().map(TypeRef::plain),
                config: serde_json::Value::Object(config),
                line: s.line,
                column: s.column,
            });
        }
        FlowStep::Probe(p) => {
            pending.push(PendingStep {
                name: format!("probe_{}", ordinal),
                kind: StepKind::Probe,
                refs: vec![p.target.clone()],
                output_type: Some(TypeRef::plain("EntityMap")),
                config: json!({ "target": p.target, "fields": p.fields }),
                line: p.line,
                column: p.column,
            });
        }
        FlowStep::Reason(r) => {
            let name = r
                .about
                .clone()
                .or_else(|| r.name.clone())
                .unwrap_or_else(|| format!("reason_{}", ordinal));
            pending.push(PendingStep {
                name,
                kind: StepKind::Reason,
                refs: r.given.clone(),
                output_type: r.output_type.as_deref().map(TypeRef::plain),
                config: json!({ "reason": reason_config(r) }),
                line: r.line,
                column: r.column,
            });
        }
        FlowStep::Validate(v) => {
            let rules: Vec<serde_json::Value> = v.rules.iter().map(rule_config).collect();
            pending.push(PendingStep {
                name: format!("validate_{}", ordinal),
                kind: StepKind::Validate,
                refs: vec![v.target.clone()],
                output_type: None,
                config: json!({ "target": v.target, "schema": v.schema, "rules": rules }),
                line: v.line,
                column: v.column,
            });
        }
        FlowStep::Refine(r) => {
            // Retry configuration for the step before it, not a DAG node.
            if let Some(previous) = pending.last_mut() {
                if let serde_json::Value::Object(map) = &mut previous.config {
                    map.insert("refine".to_string(), refine_config(r));
                }
            }
        }
        FlowStep::Weave(w) => {
            pending.push(PendingStep {
                name: w.target.clone(),
                kind: StepKind::Weave,
                refs: w.sources.clone(),
                output_type: Some(TypeRef::plain(
                    w.format.as_deref().unwrap_or("StructuredReport"),
                )),
                config: json!({ "weave": weave_config(w) }),
                line: w.line,
                column: w.column,
            });
        }
        FlowStep::UseTool(u) => {
            pending.push(PendingStep {
                name: format!("use_{}", ordinal),
                kind: StepKind::UseTool,
                refs: Vec::new(),
                output_type: None,
                config: json!({ "tool": u.tool_name, "argument": u.argument }),
                line: u.line,
                column: u.column,
            });
        }
        FlowStep::Remember(r) => {
            pending.push(PendingStep {
                name: format!("remember_{}", ordinal),
                kind: StepKind::Remember,
                refs: vec![r.expression.clone()],
                output_type: None,
                config: json!({ "expression": r.expression, "memory": r.memory_target }),
                line: r.line,
                column: r.column,
            });
        }
        FlowStep::Recall(r) => {
            pending.push(PendingStep {
                name: format!("recall_{}", ordinal),
                kind: StepKind::Recall,
                refs: Vec::new(),
                output_type: None,
                config: json!({ "query": r.query, "memory": r.memory_source }),
                line: r.line,
                column: r.column,
            });
        }
        FlowStep::If(c) => {
            // Branches lower into embedded configs; the conditional itself
            // is one DAG node whose deps come from the branch inputs.
            let mut branch_pending: Vec<PendingStep> = Vec::new();
            lower_step(&c.then_step, &mut branch_pending);
            let then_config = branch_pending.pop().map(embedded_step);
            let mut else_config = None;
            if let Some(else_step) = &c.else_step {
                let mut else_pending: Vec<PendingStep> = Vec::new();
                lower_step(else_step, &mut else_pending);
                else_config = else_pending.pop().map(embedded_step);
            }

            let mut refs = Vec::new();
            collect_branch_refs(&c.then_step, &mut refs);
            if let Some(else_step) = &c.else_step {
                collect_branch_refs(else_step, &mut refs);
            }
            // The condition may reference a prior step directly.
            if c.condition.contains('.') {
                refs.push(c.condition.clone());
            }

            pending.push(PendingStep {
                name: format!("if_{}", ordinal),
                kind: StepKind::Conditional,
                refs,
                output_type: None,
                config: json!({
                    "condition": c.condition,
                    "op": c.op,
                    "value": c.value,
                    "then": then_config,
                    "else": else_config,
                }),
                line: c.line,
                column: c.column,
            });
        }
    }
}

fn embedded_step(step: PendingStep) -> serde_json::Value {
    json!({
        "name": step.name,
        "kind": step.kind,
        "output_type": step.output_type,
        "config": step.config,
        "refs": step.refs,
    })
}

fn collect_branch_refs(step: &FlowStep, refs: &mut Vec<String>) {
    match step {
        FlowStep::Step(s) => refs.extend(s.given.iter().cloned()),
        FlowStep::Probe(p) => refs.push(p.target.clone()),
        FlowStep::Reason(r) => refs.extend(r.given.iter().cloned()),
        FlowStep::Validate(v) => refs.push(v.target.clone()),
        FlowStep::Weave(w) => refs.extend(w.sources.iter().cloned()),
        FlowStep::Remember(r) => refs.push(r.expression.clone()),
        FlowStep::If(c) => {
            collect_branch_refs(&c.then_step, refs);
            if let Some(e) = &c.else_step {
                collect_branch_refs(e, refs);
            }
        }
        FlowStep::Refine(_) | FlowStep::UseTool(_) | FlowStep::Recall(_) => {}
    }
}

fn reason_config(r: &ReasonStep) -> serde_json::Value {
    json!({
        "name": r.name,
        "about": r.about,
        "depth": r.depth,
        "show_work": r.show_work,
        "chain_of_thought": r.chain_of_thought,
        "ask": r.ask,
    })
}

fn weave_config(w: &WeaveStep) -> serde_json::Value {
    json!({
        "sources": w.sources,
        "target": w.target,
        "format": w.format,
        "priority": w.priority,
        "style": w.style,
    })
}

fn rule_config(rule: &ValidateRule) -> serde_json::Value {
    let action = match &rule.action {
        RuleAction::Refine(params) => {
            let map: BTreeMap<&str, &str> =
                params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            json!({ "action": "refine", "params": map })
        }
        RuleAction::Raise(e) => json!({ "action": "raise", "error": e }),
        RuleAction::Warn(m) => json!({ "action": "warn", "message": m }),
        RuleAction::Pass => json!({ "action": "pass" }),
    };
    json!({
        "condition": rule.condition,
        "op": rule.op,
        "value": rule.value,
        "action": action,
    })
}

fn refine_config(r: &RefineBlock) -> serde_json::Value {
    json!({
        "max_attempts": r.max_attempts,
        "pass_failure_context": r.pass_failure_context,
        "backoff": r.backoff,
        "on_exhaustion": r.on_exhaustion.as_ref().map(lower_violation),
    })
}

// ──────────────────────────────────────────────
// Topological sort
// ──────────────────────────────────────────────

/// Kahn's algorithm with original declaration order as the tie-break, so
/// the emitted order is deterministic. A cycle names every step id still
/// unplaced.
fn topo_sort(steps: Vec<IrStep>, flow_name: &str) -> Result<Vec<IrStep>, IrError> {
    let index_of: BTreeMap<String, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.clone(), i))
        .collect();

    let mut in_degree = vec![0usize; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (i, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            if let Some(&d) = index_of.get(dep) {
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut placed = vec![false; steps.len()];
    let mut order = Vec::with_capacity(steps.len());
    loop {
        // Lowest original index among the ready steps.
        let next = (0..steps.len()).find(|&i| !placed[i] && in_degree[i] == 0);
        match next {
            Some(i) => {
                placed[i] = true;
                order.push(i);
                for &d in &dependents[i] {
                    in_degree[d] -= 1;
                }
            }
            None => break,
        }
    }

    if order.len() != steps.len() {
        let step_ids: Vec<String> = steps
            .iter()
            .enumerate()
            .filter(|(i, _)| !placed[*i])
            .map(|(_, s)| s.id.clone())
            .collect();
        return Err(IrError::CyclicDependency {
            flow: flow_name.to_string(),
            step_ids,
        });
    }

    let mut by_index: Vec<Option<IrStep>> = steps.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .map(|i| by_index[i].take().expect("each index placed once"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;
    use crate::parser;

    fn generate_source(source: &str) -> Result<IrProgram, IrError> {
        let tokens = lexer::lex(source).unwrap();
        let program = parser::parse(&tokens).unwrap();
        generate(&program, source)
    }

    #[test]
    fn minimal_program_lowers() {
        let ir = generate_source(
            "persona P { domain: [\"x\"] tone: precise }\nflow F() -> String { step S { ask: \"hi\" output: String } }\nrun F() as P",
        )
        .unwrap();
        assert_eq!(ir.axon_ir_version, "1.0");
        assert_eq!(ir.flows.len(), 1);
        let flow = &ir.flows["F"];
        assert_eq!(flow.steps.len(), 1);
        assert!(flow.steps[0].depends_on.is_empty());
        assert_eq!(flow.steps[0].kind, StepKind::Ask);
        assert_eq!(ir.entrypoint.persona.as_deref(), Some("P"));
    }

    #[test]
    fn no_entrypoint_is_an_error() {
        let err = generate_source("flow F() { step S { ask: \"x\" } }").unwrap_err();
        assert_eq!(err, IrError::NoEntrypoint);
    }

    #[test]
    fn multiple_entrypoints_are_an_error() {
        let err =
            generate_source("flow F() { step S { ask: \"x\" } }\nrun F()\nrun F()").unwrap_err();
        assert!(matches!(err, IrError::MultipleEntrypoints { line: 3, .. }));
    }

    #[test]
    fn dependencies_follow_output_references() {
        let ir = generate_source(
            r#"
flow F(doc: Document) {
  step A { given: doc ask: "a" output: Summary }
  step B { given: A.output ask: "b" output: Summary }
  weave [A.output, B.output] into Report
}
run F("d")
"#,
        )
        .unwrap();
        let steps = &ir.flows["F"].steps;
        assert_eq!(steps.len(), 3);
        let a = &steps[0];
        let b = &steps[1];
        let report = &steps[2];
        assert!(a.depends_on.is_empty());
        assert_eq!(b.depends_on, vec![a.id.clone()]);
        assert_eq!(report.depends_on, vec![a.id.clone(), b.id.clone()]);
        assert!(matches!(&a.inputs[0], IrInput::Param { name } if name == "doc"));
        assert!(matches!(&b.inputs[0], IrInput::Step { name, .. } if name == "A"));
    }

    #[test]
    fn cyclic_dependency_names_both_steps() {
        let err = generate_source(
            r#"
flow F() {
  step A { given: B.output ask: "a" }
  step B { given: A.output ask: "b" }
}
run F()
"#,
        )
        .unwrap_err();
        match err {
            IrError::CyclicDependency { flow, step_ids } => {
                assert_eq!(flow, "F");
                assert_eq!(step_ids.len(), 2);
            }
            other => panic!("expected CyclicDependency, got {}", other),
        }
    }

    #[test]
    fn identical_source_produces_identical_ir_bytes() {
        let source = r#"
persona P { domain: ["x"] }
tool WebSearch { timeout: 10s }
flow F(q: String) -> Summary {
  use WebSearch("rust")
  step S { given: q ask: "summarize" output: Summary }
}
run F("topic") as P effort: low
"#;
        let a = serde_json::to_string(&generate_source(source).unwrap()).unwrap();
        let b = serde_json::to_string(&generate_source(source).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_source_produces_different_program_id() {
        let a = generate_source("flow F() { step S { ask: \"x\" } }\nrun F()").unwrap();
        let b = generate_source("flow F() { step S { ask: \"y\" } }\nrun F()").unwrap();
        assert_ne!(a.program_id, b.program_id);
    }

    #[test]
    fn refine_attaches_to_preceding_step() {
        let ir = generate_source(
            r#"
flow F() {
  step S { ask: "x" output: Summary }
  refine { max_attempts: 2 backoff: none }
}
run F()
"#,
        )
        .unwrap();
        let steps = &ir.flows["F"].steps;
        assert_eq!(steps.len(), 1, "refine must not be a DAG node");
        assert_eq!(steps[0].config["refine"]["max_attempts"], 2);
    }

    #[test]
    fn tool_timeout_lowered_to_millis() {
        let ir = generate_source(
            "tool T { timeout: 2s }\nflow F() { use T(\"x\") }\nrun F()",
        )
        .unwrap();
        assert_eq!(ir.declarations.tools["T"].timeout_ms, Some(2_000));
    }

    #[test]
    fn duration_conversions() {
        assert_eq!(duration_to_millis("0s"), Some(0));
        assert_eq!(duration_to_millis("500ms"), Some(500));
        assert_eq!(duration_to_millis("3m"), Some(180_000));
        assert_eq!(duration_to_millis("2h"), Some(7_200_000));
        assert_eq!(duration_to_millis("1d"), Some(86_400_000));
    }

    #[test]
    fn validate_gate_becomes_a_step_with_rules() {
        let ir = generate_source(
            r#"
flow F() {
  step S { ask: "x" output: RiskScore }
  validate S.output against RiskScore {
    if confidence < 0.8 -> refine(max_attempts: 2)
  }
}
run F()
"#,
        )
        .unwrap();
        let steps = &ir.flows["F"].steps;
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].kind, StepKind::Validate);
        assert_eq!(steps[1].depends_on, vec![steps[0].id.clone()]);
        assert_eq!(steps[1].config["rules"][0]["action"]["action"], "refine");
    }
}
