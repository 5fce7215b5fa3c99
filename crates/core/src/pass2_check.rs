//! Pass 2: epistemic type checking and wiring validation.
//!
//! Walks every declaration after pass 1 has collected the symbol tables.
//! All diagnostics accumulate; the checker never stops at the first error
//! and returns them in source order.
//!
//! The epistemic rules enforced here:
//! - a fixed compatibility matrix (see `semtype`);
//! - `Uncertainty` is infectious: any step consuming an uncertain input
//!   must declare (or is inferred to produce) `Uncertainty`;
//! - hard exclusions (`Opinion`/`Speculation` into fact slots) are rejected
//!   even across model-mediated steps, including into fields of structured
//!   target types;
//! - refinement-range literals must lie inside their declared bounds.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::ast::*;
use crate::error::{Diagnostic, DiagnosticKind};
use crate::pass1_collect::{SymbolKind, Symbols};
use crate::semtype::{self, assignable, Assignability, SemType};

const VALID_TONES: [&str; 6] = [
    "precise",
    "friendly",
    "technical",
    "conversational",
    "formal",
    "creative",
];
const VALID_CONTEXT_MEMORY: [&str; 3] = ["session", "persistent", "none"];
const VALID_MEMORY_STORE: [&str; 3] = ["session", "persistent", "ephemeral"];
const VALID_DEPTHS: [&str; 4] = ["shallow", "standard", "deep", "exhaustive"];
const VALID_BACKOFFS: [&str; 3] = ["none", "linear", "exponential"];
const VALID_EFFORTS: [&str; 4] = ["low", "medium", "high", "max"];
const VALID_RETRIEVALS: [&str; 3] = ["semantic", "exact", "hybrid"];

pub fn check(program: &Program, symbols: &Symbols) -> Vec<Diagnostic> {
    // Parameter types per flow, resolved up front so a run statement can
    // validate its literal arguments regardless of declaration order.
    let mut flow_param_types: HashMap<String, Vec<SemType>> = HashMap::new();
    for decl in &program.declarations {
        if let Declaration::Flow(f) = decl {
            let resolved = f
                .params
                .iter()
                .map(|p| semtype::resolve(&p.type_expr, &symbols.types))
                .collect();
            flow_param_types.insert(f.name.clone(), resolved);
        }
    }

    let mut checker = Checker {
        symbols,
        flow_param_types,
        diagnostics: Vec::new(),
    };
    for decl in &program.declarations {
        checker.check_declaration(decl);
    }
    checker.check_type_cycles();
    let mut diagnostics = checker.diagnostics;
    diagnostics.sort_by_key(|d| (d.line, d.column));
    diagnostics
}

struct Checker<'a> {
    symbols: &'a Symbols,
    flow_param_types: HashMap<String, Vec<SemType>>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Checker<'a> {
    fn emit(&mut self, kind: DiagnosticKind, message: impl Into<String>, line: u32, column: u32) {
        self.diagnostics.push(Diagnostic::new(kind, message, line, column));
    }

    fn user_types(&self) -> &BTreeMap<String, TypeDef> {
        &self.symbols.types
    }

    fn resolve_named(&self, name: &str) -> SemType {
        let expr = TypeExpr {
            name: name.to_string(),
            generic: None,
            optional: false,
            line: 0,
            column: 0,
        };
        semtype::resolve(&expr, self.user_types())
    }

    fn check_type_known(&mut self, name: &str, line: u32, column: u32) {
        if !semtype::is_builtin(name) && !self.symbols.types.contains_key(name) {
            self.emit(
                DiagnosticKind::UnknownType,
                format!("unknown type '{}'", name),
                line,
                column,
            );
        }
    }

    fn check_type_expr_known(&mut self, expr: &TypeExpr) {
        self.check_type_known(&expr.name, expr.line, expr.column);
        if let Some(generic) = &expr.generic {
            self.check_type_known(generic, expr.line, expr.column);
        }
    }

    fn check_unit_range(&mut self, value: f64, field: &str, line: u32, column: u32) {
        if !(0.0..=1.0).contains(&value) {
            self.emit(
                DiagnosticKind::RangeViolation,
                format!("{} must be between 0.0 and 1.0, got {}", field, value),
                line,
                column,
            );
        }
    }

    fn check_value_set(&mut self, value: &str, valid: &[&str], field: &str, line: u32, column: u32) {
        if !valid.contains(&value) {
            let mut sorted: Vec<&str> = valid.to_vec();
            sorted.sort_unstable();
            self.emit(
                DiagnosticKind::InvalidValue,
                format!(
                    "unknown {} '{}'. Valid: {}",
                    field,
                    value,
                    sorted.join(", ")
                ),
                line,
                column,
            );
        }
    }

    // ── declaration dispatch ──────────────────────

    fn check_declaration(&mut self, decl: &Declaration) {
        match decl {
            Declaration::Persona(d) => self.check_persona(d),
            Declaration::Context(d) => self.check_context(d),
            Declaration::Anchor(d) => self.check_anchor(d),
            Declaration::Memory(d) => self.check_memory(d),
            Declaration::Tool(d) => self.check_tool(d),
            Declaration::Type(d) => self.check_typedef(d),
            Declaration::Intent(d) => self.check_intent(d),
            Declaration::Flow(d) => self.check_flow(d),
            Declaration::Run(d) => self.check_run(d),
            Declaration::Import(_) => {}
        }
    }

    fn check_persona(&mut self, d: &PersonaDef) {
        if d.domain_present && d.domain.is_empty() {
            self.emit(
                DiagnosticKind::InvalidValue,
                format!("persona '{}' declares an empty domain", d.name),
                d.line,
                d.column,
            );
        }
        if let Some(tone) = &d.tone {
            self.check_value_set(tone, &VALID_TONES, "tone", d.line, d.column);
        }
        if let Some(v) = d.confidence_threshold {
            self.check_unit_range(v, "confidence_threshold", d.line, d.column);
        }
    }

    fn check_context(&mut self, d: &ContextDef) {
        if let Some(scope) = &d.memory_scope {
            self.check_value_set(scope, &VALID_CONTEXT_MEMORY, "memory scope", d.line, d.column);
        }
        if let Some(depth) = &d.depth {
            self.check_value_set(depth, &VALID_DEPTHS, "depth", d.line, d.column);
        }
        if let Some(v) = d.temperature {
            self.check_unit_range(v, "temperature", d.line, d.column);
        }
        if let Some(v) = d.max_tokens {
            if v == 0 {
                self.emit(
                    DiagnosticKind::InvalidValue,
                    format!("max_tokens must be positive in context '{}'", d.name),
                    d.line,
                    d.column,
                );
            }
        }
    }

    fn check_anchor(&mut self, d: &AnchorDef) {
        if let Some(v) = d.confidence_floor {
            self.check_unit_range(v, "confidence_floor", d.line, d.column);
        }
        if let Some(ViolationAction::Retry(0)) = d.on_violation {
            self.emit(
                DiagnosticKind::InvalidValue,
                format!("anchor '{}' retry attempts must be >= 1", d.name),
                d.line,
                d.column,
            );
        }
    }

    fn check_memory(&mut self, d: &MemoryDef) {
        if let Some(store) = &d.store {
            self.check_value_set(store, &VALID_MEMORY_STORE, "store", d.line, d.column);
        }
        if let Some(retrieval) = &d.retrieval {
            self.check_value_set(retrieval, &VALID_RETRIEVALS, "retrieval strategy", d.line, d.column);
        }
    }

    fn check_tool(&mut self, d: &ToolDef) {
        if d.max_results == Some(0) {
            self.emit(
                DiagnosticKind::InvalidValue,
                format!("max_results must be positive in tool '{}'", d.name),
                d.line,
                d.column,
            );
        }
    }

    fn check_typedef(&mut self, d: &TypeDef) {
        if let Some((lo, hi)) = d.range {
            if lo > hi {
                self.emit(
                    DiagnosticKind::RangeViolation,
                    format!(
                        "invalid range in type '{}': lo ({}) must not exceed hi ({})",
                        d.name, lo, hi
                    ),
                    d.line,
                    d.column,
                );
            }
        }
        for field in &d.fields {
            self.check_type_expr_known(&field.type_expr);
        }
        if let Some(pred) = &d.where_clause {
            self.check_predicate(pred, &d.name);
        }
    }

    fn check_predicate(&mut self, pred: &PredicateExpr, type_name: &str) {
        match pred {
            PredicateExpr::Compare { .. } | PredicateExpr::NonEmpty { .. } => {}
            PredicateExpr::InSet {
                values,
                line,
                column,
                ..
            } => {
                if values.is_empty() {
                    self.emit(
                        DiagnosticKind::InvalidPredicate,
                        format!(
                            "membership predicate in type '{}' requires a non-empty finite set",
                            type_name
                        ),
                        *line,
                        *column,
                    );
                }
            }
            PredicateExpr::And(clauses) => {
                for clause in clauses {
                    self.check_predicate(clause, type_name);
                }
            }
        }
    }

    /// Cycles through structured type fields would require inference to
    /// resolve, so they are declaration errors.
    fn check_type_cycles(&mut self) {
        let declared: Vec<(String, u32, u32)> = self
            .symbols
            .types
            .iter()
            .map(|(name, def)| (name.clone(), def.line, def.column))
            .collect();
        for (name, line, column) in declared {
            let mut visiting = HashSet::new();
            if let Some(cycle_at) = self.find_type_cycle(&name, &mut visiting) {
                self.emit(
                    DiagnosticKind::CyclicType,
                    format!(
                        "type '{}' participates in a field cycle through '{}'",
                        name, cycle_at
                    ),
                    line,
                    column,
                );
            }
        }
    }

    fn find_type_cycle(&self, name: &str, visiting: &mut HashSet<String>) -> Option<String> {
        if !visiting.insert(name.to_string()) {
            return Some(name.to_string());
        }
        if let Some(def) = self.symbols.types.get(name) {
            for field in &def.fields {
                let mut referenced = vec![field.type_expr.name.as_str()];
                if let Some(g) = &field.type_expr.generic {
                    referenced.push(g.as_str());
                }
                for target in referenced {
                    if self.symbols.types.contains_key(target) {
                        if let Some(hit) = self.find_type_cycle(target, visiting) {
                            return Some(hit);
                        }
                    }
                }
            }
        }
        visiting.remove(name);
        None
    }

    fn check_intent(&mut self, d: &IntentDef) {
        if d.ask.is_none() {
            self.emit(
                DiagnosticKind::MissingField,
                format!("intent '{}' is missing the required 'ask' field", d.name),
                d.line,
                d.column,
            );
        }
        if let Some(output) = &d.output {
            self.check_type_expr_known(output);
            let resolved = semtype::resolve(output, self.user_types());
            if resolved.is_uncertainty() {
                self.emit(
                    DiagnosticKind::InvalidValue,
                    format!("intent '{}' may not declare Uncertainty as its output", d.name),
                    d.line,
                    d.column,
                );
            }
        }
        if let Some(v) = d.confidence_floor {
            self.check_unit_range(v, "confidence_floor", d.line, d.column);
        }
    }

    // ── flows ─────────────────────────────────────

    fn check_flow(&mut self, d: &FlowDef) {
        let mut env: HashMap<String, SemType> = HashMap::new();

        for param in &d.params {
            self.check_type_expr_known(&param.type_expr);
            let resolved = semtype::resolve(&param.type_expr, self.user_types());
            if resolved.is_uncertainty() {
                self.emit(
                    DiagnosticKind::InvalidValue,
                    format!(
                        "parameter '{}' of flow '{}' may not be typed Uncertainty",
                        param.name, d.name
                    ),
                    param.line,
                    param.column,
                );
            }
            env.insert(param.name.clone(), resolved);
        }

        if let Some(rt) = &d.return_type {
            self.check_type_expr_known(rt);
            let resolved = semtype::resolve(rt, self.user_types());
            if resolved.is_uncertainty() {
                self.emit(
                    DiagnosticKind::InvalidValue,
                    format!("flow '{}' may not declare Uncertainty as its return type", d.name),
                    d.line,
                    d.column,
                );
            }
        }

        let mut step_names: HashSet<String> = HashSet::new();
        for step in &d.steps {
            self.check_flow_step(step, d, &mut env, &mut step_names);
        }
    }

    fn check_flow_step(
        &mut self,
        step: &FlowStep,
        flow: &FlowDef,
        env: &mut HashMap<String, SemType>,
        step_names: &mut HashSet<String>,
    ) {
        match step {
            FlowStep::Step(s) => self.check_step_block(s, flow, env, step_names),
            FlowStep::Probe(p) => self.check_probe(p, env),
            FlowStep::Reason(r) => self.check_reason(r, env, step_names),
            FlowStep::Validate(v) => self.check_validate(v, env),
            FlowStep::Refine(r) => self.check_refine(r),
            FlowStep::Weave(w) => self.check_weave(w, env, step_names),
            FlowStep::UseTool(u) => self.check_use_tool(u),
            FlowStep::Remember(r) => self.check_remember(r, env),
            FlowStep::Recall(r) => self.check_recall(r),
            FlowStep::If(c) => {
                self.check_flow_step(&c.then_step, flow, env, step_names);
                if let Some(else_step) = &c.else_step {
                    self.check_flow_step(else_step, flow, env, step_names);
                }
            }
        }
    }

    /// Resolve an input reference (`doc` or `Extract.output`) against the
    /// local environment. Forward references are errors.
    fn resolve_input(
        &mut self,
        reference: &str,
        env: &HashMap<String, SemType>,
        line: u32,
        column: u32,
    ) -> Option<SemType> {
        let head = reference.split('.').next().unwrap_or(reference);
        match env.get(head) {
            Some(t) => Some(t.clone()),
            None => {
                self.emit(
                    DiagnosticKind::UnknownSymbol,
                    format!(
                        "'{}' does not name a flow parameter or previously declared step",
                        head
                    ),
                    line,
                    column,
                );
                None
            }
        }
    }

    fn check_step_block(
        &mut self,
        s: &StepBlock,
        flow: &FlowDef,
        env: &mut HashMap<String, SemType>,
        step_names: &mut HashSet<String>,
    ) {
        if !step_names.insert(s.name.clone()) {
            self.emit(
                DiagnosticKind::DuplicateDeclaration,
                format!("duplicate step name '{}' in flow '{}'", s.name, flow.name),
                s.line,
                s.column,
            );
        }

        if let Some(v) = s.confidence_floor {
            self.check_unit_range(v, "confidence_floor", s.line, s.column);
        }

        let mut input_types = Vec::new();
        for reference in &s.given {
            if let Some(t) = self.resolve_input(reference, env, s.line, s.column) {
                input_types.push(t);
            }
        }

        if let Some(u) = &s.use_tool {
            self.check_use_tool(u);
        }
        if let Some(p) = &s.probe {
            self.check_probe(p, env);
        }
        if let Some(r) = &s.reason {
            let mut scratch = HashSet::new();
            self.check_reason(r, env, &mut scratch);
        }
        if let Some(w) = &s.weave {
            let mut scratch = HashSet::new();
            self.check_weave(w, env, &mut scratch);
        }

        let declared = s.output_type.as_deref();
        if let Some(name) = declared {
            self.check_type_known(name, s.line, s.column);
        }

        let output = self.settle_output(declared, &input_types, &s.name, s.line, s.column);
        env.insert(s.name.clone(), output);
    }

    /// Apply uncertainty propagation and the hard epistemic exclusions to a
    /// step's declared output, returning the type recorded for downstream
    /// steps.
    fn settle_output(
        &mut self,
        declared: Option<&str>,
        input_types: &[SemType],
        step_name: &str,
        line: u32,
        column: u32,
    ) -> SemType {
        let tainted = input_types.iter().any(|t| t.carries_uncertainty());

        let declared_type = declared.map(|n| self.resolve_named(n));

        if let Some(out) = &declared_type {
            for input in input_types {
                if !input.carries_uncertainty() && self.hard_incompatible(input, out) {
                    self.emit(
                        DiagnosticKind::IncompatibleAssignment,
                        format!(
                            "step '{}' assigns {} into a slot expecting {}",
                            step_name,
                            input.display_name(),
                            out.display_name()
                        ),
                        line,
                        column,
                    );
                }
            }
        }

        if tainted {
            match &declared_type {
                Some(out) if !out.is_uncertainty() => {
                    self.emit(
                        DiagnosticKind::UncertaintyPropagationRequired,
                        format!(
                            "step '{}' consumes an uncertain input; its output type '{}' widens to Uncertainty (a List input widens the whole list)",
                            step_name,
                            out.display_name()
                        ),
                        line,
                        column,
                    );
                }
                _ => {}
            }
            return SemType::Epistemic(crate::semtype::Epistemic::Uncertainty);
        }

        declared_type.unwrap_or_else(|| SemType::Nominal("String".to_string()))
    }

    /// True when assigning `source` where `target` is expected is one of
    /// the hard epistemic exclusions -- directly or into a field of a
    /// structured target type.
    fn hard_incompatible(&self, source: &SemType, target: &SemType) -> bool {
        if let SemType::List(inner) = target {
            return self.hard_incompatible(source, inner);
        }
        if let SemType::Optional(inner) = target {
            return self.hard_incompatible(source, inner);
        }
        if let SemType::List(inner) = source {
            return self.hard_incompatible(inner, target);
        }
        if let SemType::Optional(inner) = source {
            return self.hard_incompatible(inner, target);
        }

        let src = source.display_name();
        let dst = target.display_name();
        let fact_slot = |name: &str| name == "FactualClaim" || name == "CitedFact";
        let opinionated = |name: &str| name == "Opinion" || name == "Speculation";

        if opinionated(&src) && fact_slot(&dst) {
            return true;
        }
        if src == "Float" && matches!(dst.as_str(), "RiskScore" | "ConfidenceScore" | "SentimentScore") {
            return true;
        }

        // Structured targets: an excluded source cannot feed a fact field.
        if let SemType::Nominal(name) = target {
            if let Some(def) = self.symbols.types.get(name) {
                for field in &def.fields {
                    let field_type = self.resolve_named(&field.type_expr.name);
                    if opinionated(&src) && fact_slot(&field_type.display_name()) {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn check_probe(&mut self, p: &ProbeStep, env: &HashMap<String, SemType>) {
        if p.fields.is_empty() {
            self.emit(
                DiagnosticKind::MissingField,
                "probe directive has no extraction fields",
                p.line,
                p.column,
            );
        }
        self.resolve_input(&p.target, env, p.line, p.column);
    }

    fn check_reason(
        &mut self,
        r: &ReasonStep,
        env: &mut HashMap<String, SemType>,
        step_names: &mut HashSet<String>,
    ) {
        if r.depth < 1 {
            self.emit(
                DiagnosticKind::InvalidValue,
                format!("reasoning depth must be >= 1, got {}", r.depth),
                r.line,
                r.column,
            );
        }

        let mut input_types = Vec::new();
        for reference in &r.given {
            if let Some(t) = self.resolve_input(reference, env, r.line, r.column) {
                input_types.push(t);
            }
        }

        if let Some(name) = r.output_type.as_deref() {
            self.check_type_known(name, r.line, r.column);
        }

        if let Some(name) = r.about.as_ref().or(r.name.as_ref()) {
            if !step_names.insert(name.clone()) {
                self.emit(
                    DiagnosticKind::DuplicateDeclaration,
                    format!("duplicate step name '{}'", name),
                    r.line,
                    r.column,
                );
            }
            let output = self.settle_output(
                r.output_type.as_deref(),
                &input_types,
                name,
                r.line,
                r.column,
            );
            env.insert(name.clone(), output);
        }
    }

    fn check_validate(&mut self, v: &ValidateGate, env: &HashMap<String, SemType>) {
        self.check_type_known(&v.schema, v.line, v.column);

        if v.rules.is_empty() {
            self.emit(
                DiagnosticKind::MissingField,
                "validate gate has no rules; at least one is required",
                v.line,
                v.column,
            );
        }

        let target_type = self.resolve_input(&v.target, env, v.line, v.column);
        if let Some(target_type) = target_type {
            let schema_type = self.resolve_named(&v.schema);
            if assignable(&target_type, &schema_type) == Assignability::Reject {
                self.emit(
                    DiagnosticKind::IncompatibleAssignment,
                    format!(
                        "'{}' of type {} cannot satisfy schema '{}'",
                        v.target,
                        target_type.display_name(),
                        v.schema
                    ),
                    v.line,
                    v.column,
                );
            }
        }
    }

    fn check_refine(&mut self, r: &RefineBlock) {
        if r.max_attempts < 1 {
            self.emit(
                DiagnosticKind::InvalidValue,
                format!("refine max_attempts must be >= 1, got {}", r.max_attempts),
                r.line,
                r.column,
            );
        }
        self.check_value_set(&r.backoff, &VALID_BACKOFFS, "backoff strategy", r.line, r.column);
    }

    fn check_weave(
        &mut self,
        w: &WeaveStep,
        env: &mut HashMap<String, SemType>,
        step_names: &mut HashSet<String>,
    ) {
        if w.sources.len() < 2 {
            self.emit(
                DiagnosticKind::InvalidValue,
                format!("weave requires at least 2 sources to synthesize, got {}", w.sources.len()),
                w.line,
                w.column,
            );
        }

        let mut input_types = Vec::new();
        for source in &w.sources {
            if let Some(t) = self.resolve_input(source, env, w.line, w.column) {
                input_types.push(t);
            }
        }

        if let Some(format) = &w.format {
            self.check_type_known(format, w.line, w.column);
        }

        if !step_names.insert(w.target.clone()) {
            self.emit(
                DiagnosticKind::DuplicateDeclaration,
                format!("duplicate step name '{}'", w.target),
                w.line,
                w.column,
            );
        }

        let declared = w
            .format
            .clone()
            .or_else(|| {
                self.symbols
                    .types
                    .contains_key(&w.target)
                    .then(|| w.target.clone())
            })
            .unwrap_or_else(|| "StructuredReport".to_string());
        let output =
            self.settle_output(Some(declared.as_str()), &input_types, &w.target, w.line, w.column);
        env.insert(w.target.clone(), output);
    }

    fn check_use_tool(&mut self, u: &UseToolStep) {
        match self.symbols.kind_of(&u.tool_name) {
            Some(SymbolKind::Tool) => {}
            Some(other) => self.emit(
                DiagnosticKind::UnknownSymbol,
                format!("'{}' is a {}, not a tool", u.tool_name, other.label()),
                u.line,
                u.column,
            ),
            None => self.emit(
                DiagnosticKind::UnknownSymbol,
                format!("use of undeclared tool '{}'", u.tool_name),
                u.line,
                u.column,
            ),
        }
    }

    fn check_remember(&mut self, r: &RememberStep, env: &HashMap<String, SemType>) {
        self.resolve_input(&r.expression, env, r.line, r.column);
        self.check_memory_ref(&r.memory_target, "remember target", r.line, r.column);
    }

    fn check_recall(&mut self, r: &RecallStep) {
        self.check_memory_ref(&r.memory_source, "recall source", r.line, r.column);
    }

    fn check_memory_ref(&mut self, name: &str, role: &str, line: u32, column: u32) {
        match self.symbols.kind_of(name) {
            Some(SymbolKind::Memory) => {}
            Some(other) => self.emit(
                DiagnosticKind::UnknownSymbol,
                format!("{} '{}' is a {}, not a memory store", role, name, other.label()),
                line,
                column,
            ),
            None => self.emit(
                DiagnosticKind::UnknownSymbol,
                format!("{} references undeclared memory '{}'", role, name),
                line,
                column,
            ),
        }
    }

    // ── run wiring ────────────────────────────────

    fn check_run(&mut self, d: &RunStatement) {
        self.check_category_ref(&d.flow, SymbolKind::Flow, d.line, d.column);
        if let Some(p) = &d.persona {
            self.check_category_ref(p, SymbolKind::Persona, d.line, d.column);
        }
        if let Some(c) = &d.context {
            self.check_category_ref(c, SymbolKind::Context, d.line, d.column);
        }
        for anchor in &d.anchors {
            self.check_category_ref(anchor, SymbolKind::Anchor, d.line, d.column);
        }
        if let Some(effort) = &d.effort {
            self.check_value_set(effort, &VALID_EFFORTS, "effort level", d.line, d.column);
        }
        if let Some(FailureStrategy::Retry(params)) = &d.on_failure {
            for (key, value) in params {
                if key == "backoff" {
                    self.check_value_set(value, &VALID_BACKOFFS, "backoff strategy", d.line, d.column);
                }
            }
        }
        self.check_run_arguments(d);
    }

    fn check_category_ref(&mut self, name: &str, expected: SymbolKind, line: u32, column: u32) {
        match self.symbols.kind_of(name) {
            Some(kind) if kind == expected => {}
            Some(kind) => self.emit(
                DiagnosticKind::UnknownSymbol,
                format!(
                    "'{}' is a {}, not a {}",
                    name,
                    kind.label(),
                    expected.label()
                ),
                line,
                column,
            ),
            None => self.emit(
                DiagnosticKind::UnknownSymbol,
                format!("undefined {} '{}' in run statement", expected.label(), name),
                line,
                column,
            ),
        }
    }

    /// Literal arguments against the flow's parameter types: count must
    /// match, and numeric literals bound for ranged types must lie inside
    /// the declared range (inclusive at both edges).
    fn check_run_arguments(&mut self, d: &RunStatement) {
        let flow = match self.flow_param_types.get(&d.flow) {
            Some(params) => params.clone(),
            None => return,
        };

        if d.arguments.len() != flow.len() {
            self.emit(
                DiagnosticKind::InvalidValue,
                format!(
                    "run passes {} argument(s) but flow '{}' declares {} parameter(s)",
                    d.arguments.len(),
                    d.flow,
                    flow.len()
                ),
                d.line,
                d.column,
            );
            return;
        }

        for (argument, param_type) in d.arguments.iter().zip(flow.iter()) {
            if let Ok(value) = argument.parse::<f64>() {
                if let SemType::Refined { lo, hi, .. } = param_type {
                    if value < *lo || value > *hi {
                        self.emit(
                            DiagnosticKind::RangeViolation,
                            format!(
                                "literal {} lies outside the declared range {}..{}",
                                value, lo, hi
                            ),
                            d.line,
                            d.column,
                        );
                    }
                }
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;
    use crate::parser;
    use crate::pass1_collect;

    fn check_source(source: &str) -> Vec<Diagnostic> {
        let tokens = lexer::lex(source).unwrap();
        let program = parser::parse(&tokens).unwrap();
        let (symbols, mut diags) = pass1_collect::collect(&program);
        diags.extend(check(&program, &symbols));
        diags.sort_by_key(|d| (d.line, d.column));
        diags
    }

    fn kinds(diags: &[Diagnostic]) -> Vec<DiagnosticKind> {
        diags.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn clean_program_has_no_diagnostics() {
        let diags = check_source(
            r#"
persona P { domain: ["x"] tone: precise }
flow F() -> String { step S { ask: "hi" output: String } }
run F() as P
"#,
        );
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
    }

    #[test]
    fn empty_domain_rejected() {
        let diags = check_source("persona P { domain: [] }");
        assert_eq!(kinds(&diags), vec![DiagnosticKind::InvalidValue]);
        assert!(diags[0].message.contains("empty domain"));
    }

    #[test]
    fn tone_set_is_closed() {
        for tone in ["precise", "friendly", "technical", "conversational", "formal", "creative"] {
            let source = format!("persona P {{ domain: [\"x\"] tone: {} }}", tone);
            assert!(check_source(&source).is_empty(), "tone '{}' must be valid", tone);
        }
        for tone in ["analytical", "diplomatic", "wistful"] {
            let source = format!("persona P {{ domain: [\"x\"] tone: {} }}", tone);
            let diags = check_source(&source);
            assert_eq!(kinds(&diags), vec![DiagnosticKind::InvalidValue], "tone '{}'", tone);
        }
    }

    #[test]
    fn context_memory_and_memory_store_are_distinct_sets() {
        // context.memory admits none but not ephemeral.
        assert!(check_source("context C { memory: none }").is_empty());
        let diags = check_source("context C { memory: ephemeral }");
        assert_eq!(kinds(&diags), vec![DiagnosticKind::InvalidValue]);

        // memory.store admits ephemeral but not none.
        assert!(check_source("memory M { store: ephemeral }").is_empty());
        let diags = check_source("memory M { store: none }");
        assert_eq!(kinds(&diags), vec![DiagnosticKind::InvalidValue]);
    }

    #[test]
    fn opinion_into_fact_slot_rejected() {
        let diags = check_source(
            r#"
type R { fact: FactualClaim }
flow F() {
  step Opine { ask: "What do you think?" output: Opinion }
  step Record { given: Opine.output ask: "Record it." output: R }
}
run F()
"#,
        );
        assert!(
            kinds(&diags).contains(&DiagnosticKind::IncompatibleAssignment),
            "expected IncompatibleAssignment, got {:?}",
            diags
        );
    }

    #[test]
    fn speculation_into_cited_fact_rejected() {
        let diags = check_source(
            r#"
flow F() {
  step Guess { ask: "Speculate." output: Speculation }
  step Cite { given: Guess.output ask: "Cite it." output: CitedFact }
}
run F()
"#,
        );
        assert!(kinds(&diags).contains(&DiagnosticKind::IncompatibleAssignment));
    }

    #[test]
    fn uncertainty_propagation_required() {
        let diags = check_source(
            r#"
flow F() {
  step Fuzzy { ask: "Unsure." output: Uncertainty }
  step Downstream { given: Fuzzy.output ask: "Build on it." output: FactualClaim }
}
run F()
"#,
        );
        assert!(
            kinds(&diags).contains(&DiagnosticKind::UncertaintyPropagationRequired),
            "got {:?}",
            diags
        );
    }

    #[test]
    fn uncertainty_propagates_transitively() {
        // Downstream2 never names Uncertainty, but its input was inferred
        // uncertain; its declared FactualClaim output must widen too.
        let diags = check_source(
            r#"
flow F() {
  step Fuzzy { ask: "Unsure." output: Uncertainty }
  step Mid { given: Fuzzy.output ask: "Chain." }
  step Last { given: Mid.output ask: "Done." output: FactualClaim }
}
run F()
"#,
        );
        assert!(kinds(&diags).contains(&DiagnosticKind::UncertaintyPropagationRequired));
    }

    #[test]
    fn uncertainty_banned_in_parameter_position() {
        let diags = check_source("flow F(x: Uncertainty) { step S { ask: \"y\" } }\nrun F(\"v\")");
        assert!(kinds(&diags).contains(&DiagnosticKind::InvalidValue));
    }

    #[test]
    fn forward_step_reference_is_an_error() {
        let diags = check_source(
            r#"
flow F() {
  step A { given: B.output ask: "a" }
  step B { ask: "b" }
}
run F()
"#,
        );
        assert!(kinds(&diags).contains(&DiagnosticKind::UnknownSymbol));
    }

    #[test]
    fn run_wiring_checks_categories() {
        let diags = check_source(
            r#"
persona P { domain: ["x"] }
flow F() { step S { ask: "x" } }
run F() as P within P constrained_by [Missing]
"#,
        );
        let msgs: Vec<&str> = diags.iter().map(|d| d.message.as_str()).collect();
        assert!(msgs.iter().any(|m| m.contains("not a context")), "{:?}", msgs);
        assert!(msgs.iter().any(|m| m.contains("undefined anchor")), "{:?}", msgs);
    }

    #[test]
    fn tool_and_memory_wiring() {
        let diags = check_source(
            r#"
memory M { store: session }
flow F() {
  use WebSearch("q")
  remember(x) -> WebSearch
  recall("q") from M
}
run F()
"#,
        );
        let msgs: Vec<&str> = diags.iter().map(|d| d.message.as_str()).collect();
        assert!(msgs.iter().any(|m| m.contains("undeclared tool")), "{:?}", msgs);
        assert!(msgs.iter().any(|m| m.contains("not a memory store")) || msgs.iter().any(|m| m.contains("undeclared memory")), "{:?}", msgs);
    }

    #[test]
    fn range_edges_accepted_epsilon_rejected() {
        let accepted = check_source(
            "type Score(0.0..1.0)\nflow F(s: Score) { step S { ask: \"x\" } }\nrun F(1.0)",
        );
        assert!(accepted.is_empty(), "{:?}", accepted);

        let low_edge = check_source(
            "type Score(0.0..1.0)\nflow F(s: Score) { step S { ask: \"x\" } }\nrun F(0.0)",
        );
        assert!(low_edge.is_empty(), "{:?}", low_edge);

        let rejected = check_source(
            "type Score(0.0..1.0)\nflow F(s: Score) { step S { ask: \"x\" } }\nrun F(1.001)",
        );
        assert_eq!(kinds(&rejected), vec![DiagnosticKind::RangeViolation]);
    }

    #[test]
    fn inverted_range_rejected() {
        let diags = check_source("type Bad(1.0..0.0)");
        assert_eq!(kinds(&diags), vec![DiagnosticKind::RangeViolation]);
    }

    #[test]
    fn type_field_cycle_rejected() {
        let diags = check_source(
            "type A { other: B }\ntype B { back: A? }",
        );
        assert!(kinds(&diags).contains(&DiagnosticKind::CyclicType), "{:?}", diags);
    }

    #[test]
    fn diagnostics_accumulate_in_source_order() {
        let diags = check_source(
            r#"
persona P { domain: [] tone: wistful }
context C { memory: galactic }
flow F() { step S { ask: "x" output: Missing } }
run F() as Ghost
"#,
        );
        assert!(diags.len() >= 4, "expected several diagnostics, got {:?}", diags);
        let positions: Vec<(u32, u32)> = diags.iter().map(|d| (d.line, d.column)).collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn validate_gate_needs_rules_and_known_schema() {
        let diags = check_source(
            r#"
flow F() {
  step S { ask: "x" output: String }
  validate S.output against Phantom {
  }
}
run F()
"#,
        );
        assert!(kinds(&diags).contains(&DiagnosticKind::UnknownType));
        assert!(kinds(&diags).contains(&DiagnosticKind::MissingField));
    }

    #[test]
    fn weave_needs_two_sources() {
        let diags = check_source(
            r#"
flow F() {
  step A { ask: "a" output: Summary }
  weave [A.output] into Report
}
run F()
"#,
        );
        assert!(kinds(&diags).contains(&DiagnosticKind::InvalidValue));
    }
}
