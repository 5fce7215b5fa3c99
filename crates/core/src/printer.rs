//! Canonical source renderer for the cognitive AST.
//!
//! `print_program` emits source that the parser accepts and that parses to a
//! structurally equivalent tree. Printing is deterministic, so
//! print(parse(print(p))) == print(p) -- the round-trip property is checked
//! against the printed form because positions differ between parses.

use std::fmt::Write;

use crate::ast::*;

pub fn print_program(program: &Program) -> String {
    let mut out = String::new();
    for (i, decl) in program.declarations.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        print_declaration(&mut out, decl);
    }
    out
}

fn print_declaration(out: &mut String, decl: &Declaration) {
    match decl {
        Declaration::Import(d) => {
            let _ = write!(out, "import {}", d.module_path.join("."));
            if !d.names.is_empty() {
                let _ = write!(out, ".{{{}}}", d.names.join(", "));
            }
            out.push('\n');
        }
        Declaration::Persona(d) => print_persona(out, d),
        Declaration::Context(d) => print_context(out, d),
        Declaration::Anchor(d) => print_anchor(out, d),
        Declaration::Memory(d) => print_memory(out, d),
        Declaration::Tool(d) => print_tool(out, d),
        Declaration::Type(d) => print_typedef(out, d),
        Declaration::Intent(d) => print_intent(out, d),
        Declaration::Flow(d) => print_flow(out, d),
        Declaration::Run(d) => print_run(out, d),
    }
}

// ── value rendering ───────────────────────────

fn quoted(s: &str) -> String {
    let mut q = String::with_capacity(s.len() + 2);
    q.push('"');
    for c in s.chars() {
        match c {
            '"' => q.push_str("\\\""),
            '\\' => q.push_str("\\\\"),
            '\n' => q.push_str("\\n"),
            '\t' => q.push_str("\\t"),
            '\r' => q.push_str("\\r"),
            other => q.push(other),
        }
    }
    q.push('"');
    q
}

fn number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

fn string_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| quoted(s)).collect();
    format!("[{}]", quoted.join(", "))
}

fn word_list(items: &[String]) -> String {
    format!("[{}]", items.join(", "))
}

fn type_expr(t: &TypeExpr) -> String {
    let mut s = t.name.clone();
    if let Some(g) = &t.generic {
        let _ = write!(s, "<{}>", g);
    }
    if t.optional {
        s.push('?');
    }
    s
}

fn violation_action(a: &ViolationAction) -> String {
    match a {
        ViolationAction::Raise(e) => format!("raise {}", e),
        ViolationAction::Warn => "warn".to_string(),
        ViolationAction::Log => "log".to_string(),
        ViolationAction::Escalate => "escalate".to_string(),
        ViolationAction::Fallback(v) => format!("fallback({})", quoted(v)),
        ViolationAction::Retry(n) => format!("retry({})", n),
    }
}

fn predicate(p: &PredicateExpr) -> String {
    match p {
        PredicateExpr::Compare {
            subject, op, value, ..
        } => format!("{} {} {}", subject, op, number(*value)),
        PredicateExpr::InSet {
            subject, values, ..
        } => format!("{} in {}", subject, word_list(values)),
        PredicateExpr::NonEmpty { subject, .. } => format!("non_empty({})", subject),
        PredicateExpr::And(clauses) => {
            let parts: Vec<String> = clauses.iter().map(predicate).collect();
            parts.join(" and ")
        }
    }
}

// ── declarations ──────────────────────────────

fn print_persona(out: &mut String, d: &PersonaDef) {
    let _ = writeln!(out, "persona {} {{", d.name);
    if d.domain_present {
        let _ = writeln!(out, "  domain: {}", string_list(&d.domain));
    }
    if let Some(v) = &d.tone {
        let _ = writeln!(out, "  tone: {}", v);
    }
    if let Some(v) = d.confidence_threshold {
        let _ = writeln!(out, "  confidence_threshold: {}", number(v));
    }
    if let Some(v) = d.cite_sources {
        let _ = writeln!(out, "  cite_sources: {}", v);
    }
    if !d.refuse_if.is_empty() {
        let _ = writeln!(out, "  refuse_if: {}", word_list(&d.refuse_if));
    }
    if let Some(v) = &d.language {
        let _ = writeln!(out, "  language: {}", quoted(v));
    }
    if let Some(v) = &d.description {
        let _ = writeln!(out, "  description: {}", quoted(v));
    }
    out.push_str("}\n");
}

fn print_context(out: &mut String, d: &ContextDef) {
    let _ = writeln!(out, "context {} {{", d.name);
    if let Some(v) = &d.memory_scope {
        let _ = writeln!(out, "  memory: {}", v);
    }
    if let Some(v) = &d.language {
        let _ = writeln!(out, "  language: {}", quoted(v));
    }
    if let Some(v) = &d.depth {
        let _ = writeln!(out, "  depth: {}", v);
    }
    if let Some(v) = d.max_tokens {
        let _ = writeln!(out, "  max_tokens: {}", v);
    }
    if let Some(v) = d.temperature {
        let _ = writeln!(out, "  temperature: {}", number(v));
    }
    if let Some(v) = d.cite_sources {
        let _ = writeln!(out, "  cite_sources: {}", v);
    }
    out.push_str("}\n");
}

fn print_anchor(out: &mut String, d: &AnchorDef) {
    let _ = writeln!(out, "anchor {} {{", d.name);
    if let Some(v) = &d.require {
        let _ = writeln!(out, "  require: {}", v);
    }
    if !d.reject.is_empty() {
        let _ = writeln!(out, "  reject: {}", word_list(&d.reject));
    }
    if let Some(v) = &d.enforce {
        let _ = writeln!(out, "  enforce: {}", v);
    }
    if let Some(v) = d.confidence_floor {
        let _ = writeln!(out, "  confidence_floor: {}", number(v));
    }
    if let Some(v) = &d.unknown_response {
        let _ = writeln!(out, "  unknown_response: {}", quoted(v));
    }
    if let Some(v) = &d.on_violation {
        let _ = writeln!(out, "  on_violation: {}", violation_action(v));
    }
    out.push_str("}\n");
}

fn print_memory(out: &mut String, d: &MemoryDef) {
    let _ = writeln!(out, "memory {} {{", d.name);
    if let Some(v) = &d.store {
        let _ = writeln!(out, "  store: {}", v);
    }
    if let Some(v) = &d.backend {
        let _ = writeln!(out, "  backend: {}", v);
    }
    if let Some(v) = &d.retrieval {
        let _ = writeln!(out, "  retrieval: {}", v);
    }
    if let Some(v) = &d.decay {
        let _ = writeln!(out, "  decay: {}", v);
    }
    out.push_str("}\n");
}

fn print_tool(out: &mut String, d: &ToolDef) {
    let _ = writeln!(out, "tool {} {{", d.name);
    if let Some(v) = &d.provider {
        let _ = writeln!(out, "  provider: {}", v);
    }
    if let Some(v) = d.max_results {
        let _ = writeln!(out, "  max_results: {}", v);
    }
    if let Some(v) = &d.filter {
        let _ = writeln!(out, "  filter: {}", v);
    }
    if let Some(v) = &d.timeout {
        let _ = writeln!(out, "  timeout: {}", v);
    }
    if let Some(v) = &d.runtime {
        let _ = writeln!(out, "  runtime: {}", v);
    }
    if let Some(v) = d.sandbox {
        let _ = writeln!(out, "  sandbox: {}", v);
    }
    out.push_str("}\n");
}

fn print_typedef(out: &mut String, d: &TypeDef) {
    let _ = write!(out, "type {}", d.name);
    if let Some((lo, hi)) = d.range {
        let _ = write!(out, "({}..{})", number(lo), number(hi));
    }
    if let Some(p) = &d.where_clause {
        let _ = write!(out, " where {}", predicate(p));
    }
    if !d.fields.is_empty() {
        out.push_str(" {\n");
        for f in &d.fields {
            let _ = writeln!(out, "  {}: {},", f.name, type_expr(&f.type_expr));
        }
        out.push('}');
    }
    out.push('\n');
}

fn print_intent(out: &mut String, d: &IntentDef) {
    let _ = writeln!(out, "intent {} {{", d.name);
    if let Some(v) = &d.given {
        let _ = writeln!(out, "  given: {}", v);
    }
    if let Some(v) = &d.ask {
        let _ = writeln!(out, "  ask: {}", quoted(v));
    }
    if let Some(v) = &d.output {
        let _ = writeln!(out, "  output: {}", type_expr(v));
    }
    if let Some(v) = d.confidence_floor {
        let _ = writeln!(out, "  confidence_floor: {}", number(v));
    }
    out.push_str("}\n");
}

// ── flows ─────────────────────────────────────

fn print_flow(out: &mut String, d: &FlowDef) {
    let params: Vec<String> = d
        .params
        .iter()
        .map(|p| format!("{}: {}", p.name, type_expr(&p.type_expr)))
        .collect();
    let _ = write!(out, "flow {}({})", d.name, params.join(", "));
    if let Some(rt) = &d.return_type {
        let _ = write!(out, " -> {}", type_expr(rt));
    }
    out.push_str(" {\n");
    for step in &d.steps {
        print_step(out, step, 1);
    }
    out.push_str("}\n");
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn given_refs(refs: &[String]) -> String {
    if refs.len() == 1 {
        refs[0].clone()
    } else {
        format!("[{}]", refs.join(", "))
    }
}

fn print_step(out: &mut String, step: &FlowStep, depth: usize) {
    match step {
        FlowStep::Step(s) => {
            indent(out, depth);
            let _ = writeln!(out, "step {} {{", s.name);
            if !s.given.is_empty() {
                indent(out, depth + 1);
                let _ = writeln!(out, "given: {}", given_refs(&s.given));
            }
            if let Some(a) = &s.ask {
                indent(out, depth + 1);
                let _ = writeln!(out, "ask: {}", quoted(a));
            }
            if let Some(u) = &s.use_tool {
                indent(out, depth + 1);
                let _ = writeln!(out, "use {}({})", u.tool_name, quoted(&u.argument));
            }
            if let Some(p) = &s.probe {
                indent(out, depth + 1);
                let _ = writeln!(out, "probe {} for {}", p.target, word_list(&p.fields));
            }
            if let Some(r) = &s.reason {
                print_reason(out, r, depth + 1);
            }
            if let Some(w) = &s.weave {
                print_weave(out, w, depth + 1);
            }
            if let Some(t) = &s.output_type {
                indent(out, depth + 1);
                let _ = writeln!(out, "output: {}", t);
            }
            if let Some(f) = s.confidence_floor {
                indent(out, depth + 1);
                let _ = writeln!(out, "confidence_floor: {}", number(f));
            }
            indent(out, depth);
            out.push_str("}\n");
        }
        FlowStep::Probe(p) => {
            indent(out, depth);
            let _ = writeln!(out, "probe {} for {}", p.target, word_list(&p.fields));
        }
        FlowStep::Reason(r) => print_reason(out, r, depth),
        FlowStep::Validate(v) => {
            indent(out, depth);
            let _ = writeln!(out, "validate {} against {} {{", v.target, v.schema);
            for rule in &v.rules {
                indent(out, depth + 1);
                let _ = write!(out, "if {}", rule.condition);
                if let (Some(op), Some(value)) = (&rule.op, &rule.value) {
                    let _ = write!(out, " {} {}", op, value);
                }
                out.push_str(" -> ");
                match &rule.action {
                    RuleAction::Refine(params) => {
                        if params.is_empty() {
                            out.push_str("refine");
                        } else {
                            let kv: Vec<String> =
                                params.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                            let _ = write!(out, "refine({})", kv.join(", "));
                        }
                    }
                    RuleAction::Raise(e) => {
                        let _ = write!(out, "raise {}", e);
                    }
                    RuleAction::Warn(m) => {
                        let _ = write!(out, "warn {}", quoted(m));
                    }
                    RuleAction::Pass => out.push_str("pass"),
                }
                out.push('\n');
            }
            indent(out, depth);
            out.push_str("}\n");
        }
        FlowStep::Refine(r) => {
            indent(out, depth);
            out.push_str("refine {\n");
            indent(out, depth + 1);
            let _ = writeln!(out, "max_attempts: {}", r.max_attempts);
            indent(out, depth + 1);
            let _ = writeln!(out, "pass_failure_context: {}", r.pass_failure_context);
            indent(out, depth + 1);
            let _ = writeln!(out, "backoff: {}", r.backoff);
            if let Some(a) = &r.on_exhaustion {
                indent(out, depth + 1);
                let _ = writeln!(out, "on_exhaustion: {}", violation_action(a));
            }
            indent(out, depth);
            out.push_str("}\n");
        }
        FlowStep::Weave(w) => print_weave(out, w, depth),
        FlowStep::UseTool(u) => {
            indent(out, depth);
            let _ = writeln!(out, "use {}({})", u.tool_name, quoted(&u.argument));
        }
        FlowStep::Remember(r) => {
            indent(out, depth);
            let _ = writeln!(out, "remember({}) -> {}", r.expression, r.memory_target);
        }
        FlowStep::Recall(r) => {
            indent(out, depth);
            let _ = writeln!(out, "recall({}) from {}", quoted(&r.query), r.memory_source);
        }
        FlowStep::If(c) => {
            indent(out, depth);
            let _ = write!(out, "if {}", c.condition);
            if let (Some(op), Some(value)) = (&c.op, &c.value) {
                let _ = write!(out, " {} {}", op, value);
            }
            out.push_str(" ->\n");
            print_step(out, &c.then_step, depth + 1);
            if let Some(e) = &c.else_step {
                indent(out, depth);
                out.push_str("else ->\n");
                print_step(out, e, depth + 1);
            }
        }
    }
}

fn print_reason(out: &mut String, r: &ReasonStep, depth: usize) {
    indent(out, depth);
    out.push_str("reason");
    if let Some(about) = &r.about {
        let _ = write!(out, " about {}", about);
    } else if let Some(name) = &r.name {
        let _ = write!(out, " {}", name);
    }
    out.push_str(" {\n");
    if !r.given.is_empty() {
        indent(out, depth + 1);
        let _ = writeln!(out, "given: {}", given_refs(&r.given));
    }
    indent(out, depth + 1);
    let _ = writeln!(out, "depth: {}", r.depth);
    if r.show_work {
        indent(out, depth + 1);
        out.push_str("show_work: true\n");
    }
    if r.chain_of_thought {
        indent(out, depth + 1);
        out.push_str("chain_of_thought: true\n");
    }
    if let Some(a) = &r.ask {
        indent(out, depth + 1);
        let _ = writeln!(out, "ask: {}", quoted(a));
    }
    if let Some(t) = &r.output_type {
        indent(out, depth + 1);
        let _ = writeln!(out, "output: {}", t);
    }
    indent(out, depth);
    out.push_str("}\n");
}

fn print_weave(out: &mut String, w: &WeaveStep, depth: usize) {
    indent(out, depth);
    let _ = write!(out, "weave [{}] into {}", w.sources.join(", "), w.target);
    let has_body = w.format.is_some() || !w.priority.is_empty() || w.style.is_some();
    if !has_body {
        out.push('\n');
        return;
    }
    out.push_str(" {\n");
    if let Some(f) = &w.format {
        indent(out, depth + 1);
        let _ = writeln!(out, "format: {}", f);
    }
    if !w.priority.is_empty() {
        indent(out, depth + 1);
        let _ = writeln!(out, "priority: {}", word_list(&w.priority));
    }
    if let Some(s) = &w.style {
        indent(out, depth + 1);
        let _ = writeln!(out, "style: {}", quoted(s));
    }
    indent(out, depth);
    out.push_str("}\n");
}

fn print_run(out: &mut String, d: &RunStatement) {
    let _ = write!(out, "run {}({})", d.flow, d.arguments.iter().map(|a| render_run_arg(a)).collect::<Vec<_>>().join(", "));
    if let Some(p) = &d.persona {
        let _ = write!(out, "\n  as {}", p);
    }
    if let Some(c) = &d.context {
        let _ = write!(out, "\n  within {}", c);
    }
    if !d.anchors.is_empty() {
        let _ = write!(out, "\n  constrained_by {}", word_list(&d.anchors));
    }
    if let Some(s) = &d.on_failure {
        let rendered = match s {
            FailureStrategy::Log => "log".to_string(),
            FailureStrategy::Escalate => "escalate".to_string(),
            FailureStrategy::Raise(e) => format!("raise {}", e),
            FailureStrategy::Retry(params) => {
                if params.is_empty() {
                    "retry".to_string()
                } else {
                    let kv: Vec<String> =
                        params.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                    format!("retry({})", kv.join(", "))
                }
            }
        };
        let _ = write!(out, "\n  on_failure: {}", rendered);
    }
    if let Some(o) = &d.output_to {
        let _ = write!(out, "\n  output_to: {}", quoted(o));
    }
    if let Some(e) = &d.effort {
        let _ = write!(out, "\n  effort: {}", e);
    }
    out.push('\n');
}

fn render_run_arg(arg: &str) -> String {
    let identifier_like = arg
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        && arg.chars().next().map_or(false, |c| c.is_alphabetic() || c == '_');
    let numeric = arg.parse::<f64>().is_ok();
    if identifier_like || numeric {
        arg.to_string()
    } else {
        quoted(arg)
    }
}
