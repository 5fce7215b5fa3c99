//! Cognitive AST for the AXON language.
//!
//! Every node names a cognitive primitive -- personas, anchors, probes,
//! reason chains, weaves -- never a mechanical construct. All nodes carry the
//! `(line, column)` of their introducing token for diagnostics, and derive
//! `PartialEq` so parse → print → parse round-trips can be compared
//! structurally.

// ──────────────────────────────────────────────
// Program root and declarations
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Import(ImportDecl),
    Persona(PersonaDef),
    Context(ContextDef),
    Anchor(AnchorDef),
    Memory(MemoryDef),
    Tool(ToolDef),
    Type(TypeDef),
    Intent(IntentDef),
    Flow(FlowDef),
    Run(RunStatement),
}

impl Declaration {
    /// Source position of the declaration's introducing token.
    pub fn position(&self) -> (u32, u32) {
        match self {
            Declaration::Import(d) => (d.line, d.column),
            Declaration::Persona(d) => (d.line, d.column),
            Declaration::Context(d) => (d.line, d.column),
            Declaration::Anchor(d) => (d.line, d.column),
            Declaration::Memory(d) => (d.line, d.column),
            Declaration::Tool(d) => (d.line, d.column),
            Declaration::Type(d) => (d.line, d.column),
            Declaration::Intent(d) => (d.line, d.column),
            Declaration::Flow(d) => (d.line, d.column),
            Declaration::Run(d) => (d.line, d.column),
        }
    }
}

/// `import axon.anchors.{NoHallucination, NoBias}`
#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub module_path: Vec<String>,
    /// Named imports; empty means import-all.
    pub names: Vec<String>,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersonaDef {
    pub name: String,
    pub domain: Vec<String>,
    pub domain_present: bool,
    pub tone: Option<String>,
    pub confidence_threshold: Option<f64>,
    pub cite_sources: Option<bool>,
    pub refuse_if: Vec<String>,
    pub language: Option<String>,
    pub description: Option<String>,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextDef {
    pub name: String,
    pub memory_scope: Option<String>,
    pub language: Option<String>,
    pub depth: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub cite_sources: Option<bool>,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnchorDef {
    pub name: String,
    pub require: Option<String>,
    pub reject: Vec<String>,
    pub enforce: Option<String>,
    pub confidence_floor: Option<f64>,
    pub unknown_response: Option<String>,
    pub on_violation: Option<ViolationAction>,
    pub line: u32,
    pub column: u32,
}

/// `raise <Err> | warn | log | escalate | fallback("…") | retry(n)`
#[derive(Debug, Clone, PartialEq)]
pub enum ViolationAction {
    Raise(String),
    Warn,
    Log,
    Escalate,
    Fallback(String),
    Retry(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryDef {
    pub name: String,
    pub store: Option<String>,
    pub backend: Option<String>,
    pub retrieval: Option<String>,
    pub decay: Option<String>,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDef {
    pub name: String,
    pub provider: Option<String>,
    pub max_results: Option<u32>,
    pub filter: Option<String>,
    /// Duration lexeme, e.g. `"10s"`.
    pub timeout: Option<String>,
    pub runtime: Option<String>,
    pub sandbox: Option<bool>,
    pub line: u32,
    pub column: u32,
}

// ──────────────────────────────────────────────
// Types
// ──────────────────────────────────────────────

/// A type reference: `Document`, `List<Party>`, `FactualClaim?`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub name: String,
    pub generic: Option<String>,
    pub optional: bool,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeField {
    pub name: String,
    pub type_expr: TypeExpr,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: String,
    pub fields: Vec<TypeField>,
    /// `(lo, hi)` from `type RiskScore(0.0..1.0)`.
    pub range: Option<(f64, f64)>,
    pub where_clause: Option<PredicateExpr>,
    pub line: u32,
    pub column: u32,
}

/// A structural `where` predicate tree. Predicates requiring inference are
/// not representable; the checker rejects anything the parser had to force
/// into these shapes incorrectly.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateExpr {
    /// `confidence >= 0.85`, `sources.length > 0`
    Compare {
        subject: String,
        op: String,
        value: f64,
        line: u32,
        column: u32,
    },
    /// `status in [draft, final]`
    InSet {
        subject: String,
        values: Vec<String>,
        line: u32,
        column: u32,
    },
    /// `non_empty(sources)`
    NonEmpty {
        subject: String,
        line: u32,
        column: u32,
    },
    /// `p and q`
    And(Vec<PredicateExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntentDef {
    pub name: String,
    pub given: Option<String>,
    pub ask: Option<String>,
    pub output: Option<TypeExpr>,
    pub confidence_floor: Option<f64>,
    pub line: u32,
    pub column: u32,
}

// ──────────────────────────────────────────────
// Flows and steps
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub type_expr: TypeExpr,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowDef {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeExpr>,
    pub steps: Vec<FlowStep>,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowStep {
    Step(StepBlock),
    Probe(ProbeStep),
    Reason(ReasonStep),
    Validate(ValidateGate),
    Refine(RefineBlock),
    Weave(WeaveStep),
    UseTool(UseToolStep),
    Remember(RememberStep),
    Recall(RecallStep),
    If(ConditionalStep),
}

impl FlowStep {
    pub fn position(&self) -> (u32, u32) {
        match self {
            FlowStep::Step(s) => (s.line, s.column),
            FlowStep::Probe(s) => (s.line, s.column),
            FlowStep::Reason(s) => (s.line, s.column),
            FlowStep::Validate(s) => (s.line, s.column),
            FlowStep::Refine(s) => (s.line, s.column),
            FlowStep::Weave(s) => (s.line, s.column),
            FlowStep::UseTool(s) => (s.line, s.column),
            FlowStep::Remember(s) => (s.line, s.column),
            FlowStep::Recall(s) => (s.line, s.column),
            FlowStep::If(s) => (s.line, s.column),
        }
    }
}

/// `step Extract { given: doc  ask: "…"  output: EntityMap }`
#[derive(Debug, Clone, PartialEq)]
pub struct StepBlock {
    pub name: String,
    /// Input references: dotted step-output refs or flow parameter names.
    pub given: Vec<String>,
    pub ask: Option<String>,
    pub use_tool: Option<UseToolStep>,
    pub probe: Option<ProbeStep>,
    pub reason: Option<ReasonStep>,
    pub weave: Option<WeaveStep>,
    pub output_type: Option<String>,
    pub confidence_floor: Option<f64>,
    pub line: u32,
    pub column: u32,
}

/// `probe doc for [parties, dates]`
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeStep {
    pub target: String,
    pub fields: Vec<String>,
    pub line: u32,
    pub column: u32,
}

/// `reason about Risks { given: Extract.output  depth: 3  … }`
#[derive(Debug, Clone, PartialEq)]
pub struct ReasonStep {
    pub name: Option<String>,
    pub about: Option<String>,
    pub given: Vec<String>,
    pub depth: u32,
    pub show_work: bool,
    pub chain_of_thought: bool,
    pub ask: Option<String>,
    pub output_type: Option<String>,
    pub line: u32,
    pub column: u32,
}

/// One `if condition -> action` rule inside a validate gate.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidateRule {
    pub condition: String,
    pub op: Option<String>,
    pub value: Option<String>,
    pub action: RuleAction,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleAction {
    Refine(Vec<(String, String)>),
    Raise(String),
    Warn(String),
    Pass,
}

/// `validate Assess.output against RiskSchema { … }`
#[derive(Debug, Clone, PartialEq)]
pub struct ValidateGate {
    pub target: String,
    pub schema: String,
    pub rules: Vec<ValidateRule>,
    pub line: u32,
    pub column: u32,
}

/// `refine { max_attempts: 3  backoff: exponential  … }`
#[derive(Debug, Clone, PartialEq)]
pub struct RefineBlock {
    pub max_attempts: u32,
    pub pass_failure_context: bool,
    pub backoff: String,
    pub on_exhaustion: Option<ViolationAction>,
    pub line: u32,
    pub column: u32,
}

impl Default for RefineBlock {
    fn default() -> Self {
        RefineBlock {
            max_attempts: 3,
            pass_failure_context: true,
            backoff: "none".to_string(),
            on_exhaustion: None,
            line: 0,
            column: 0,
        }
    }
}

/// `weave [A.output, B.output] into Report { … }`
#[derive(Debug, Clone, PartialEq)]
pub struct WeaveStep {
    pub sources: Vec<String>,
    pub target: String,
    pub format: Option<String>,
    pub priority: Vec<String>,
    pub style: Option<String>,
    pub line: u32,
    pub column: u32,
}

/// `use WebSearch("quantum computing 2025")`
#[derive(Debug, Clone, PartialEq)]
pub struct UseToolStep {
    pub tool_name: String,
    pub argument: String,
    pub line: u32,
    pub column: u32,
}

/// `remember(Summary) -> ResearchKnowledge`
#[derive(Debug, Clone, PartialEq)]
pub struct RememberStep {
    pub expression: String,
    pub memory_target: String,
    pub line: u32,
    pub column: u32,
}

/// `recall("quantum computing") from ResearchKnowledge`
#[derive(Debug, Clone, PartialEq)]
pub struct RecallStep {
    pub query: String,
    pub memory_source: String,
    pub line: u32,
    pub column: u32,
}

/// `if confidence < 0.5 -> step Retry { … } else -> step Skip { … }`
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalStep {
    pub condition: String,
    pub op: Option<String>,
    pub value: Option<String>,
    pub then_step: Box<FlowStep>,
    pub else_step: Option<Box<FlowStep>>,
    pub line: u32,
    pub column: u32,
}

// ──────────────────────────────────────────────
// Run statement
// ──────────────────────────────────────────────

/// `log | retry(backoff: …) | escalate | raise <Err>`
#[derive(Debug, Clone, PartialEq)]
pub enum FailureStrategy {
    Log,
    Retry(Vec<(String, String)>),
    Escalate,
    Raise(String),
}

/// `run F(args) as P within C constrained_by [A] on_failure: … effort: high`
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatement {
    pub flow: String,
    pub arguments: Vec<String>,
    pub persona: Option<String>,
    pub context: Option<String>,
    pub anchors: Vec<String>,
    pub on_failure: Option<FailureStrategy>,
    pub output_to: Option<String>,
    pub effort: Option<String>,
    pub line: u32,
    pub column: u32,
}
