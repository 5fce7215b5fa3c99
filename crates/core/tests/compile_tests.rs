//! End-to-end front-end tests: source → IR, covering the language-level
//! invariants (round-trips, nominal identity, uncertainty propagation,
//! DAG shape, idempotent bytes).

use axon_core::error::{CompileError, DiagnosticKind};
use axon_core::{compile, compile_to_json, lexer, parser, print_program};
use axon_interchange::{from_interchange, StepKind};

fn reparse_print(source: &str) -> String {
    let tokens = lexer::lex(source).unwrap();
    let ast = parser::parse(&tokens).unwrap();
    print_program(&ast)
}

#[test]
fn minimal_compile_scenario() {
    let source = "persona P { domain: [\"x\"] tone: precise }\nflow F() -> String { step S { ask: \"hi\" output: String } }\nrun F() as P";
    let ir = compile(source).unwrap();

    assert_eq!(ir.flows.len(), 1);
    let flow = &ir.flows["F"];
    assert_eq!(flow.steps.len(), 1);
    assert!(flow.steps[0].depends_on.is_empty());
    assert_eq!(ir.entrypoint.persona.as_deref(), Some("P"));
    assert_eq!(ir.entrypoint.flow, "F");
}

#[test]
fn opinion_into_fact_is_rejected_with_position() {
    let source = r#"
type R { fact: FactualClaim }
flow F() {
  step Opine { ask: "Your view?" output: Opinion }
  step Record { given: Opine.output ask: "Store it." output: R }
}
run F()
"#;
    let err = compile(source).unwrap_err();
    match err {
        CompileError::Check(diags) => {
            let hit = diags
                .iter()
                .find(|d| d.kind == DiagnosticKind::IncompatibleAssignment)
                .expect("expected an IncompatibleAssignment diagnostic");
            assert_eq!(hit.line, 5, "position should be the offending step");
        }
        other => panic!("expected Check, got {:?}", other),
    }
}

#[test]
fn comments_do_not_change_the_parsed_program() {
    let bare = "flow F() -> String { step S { ask: \"hi\" output: String } }\nrun F()";
    let commented =
        "// entry\nflow F() -> String { /* body */ step S { ask: \"hi\" output: String } }\nrun F()";
    assert_eq!(reparse_print(bare), reparse_print(commented));
}

#[test]
fn print_parse_round_trip_is_stable() {
    let source = r#"
import axon.anchors.{NoHallucination}
persona Analyst {
  domain: ["markets"]
  tone: technical
  confidence_threshold: 0.8
}
context Session { memory: session depth: standard max_tokens: 2048 temperature: 0.2 }
anchor NoHallucination { require: source_citation confidence_floor: 0.75 on_violation: raise AnchorBreachError }
memory Notes { store: session retrieval: exact }
tool WebSearch { provider: brave max_results: 3 timeout: 10s }
type RiskScore(0.0..1.0)
type Party { name: FactualClaim, role: FactualClaim }
flow Analyze(doc: Document) -> StructuredReport {
  step Extract { given: doc ask: "Extract the parties." output: EntityMap }
  reason about Risks { given: Extract.output depth: 2 ask: "Assess risk." output: RiskScore }
  validate Risks.output against RiskScore { if confidence < 0.8 -> refine(max_attempts: 2) }
  weave [Extract.output, Risks.output] into Report { format: StructuredReport }
}
run Analyze("contract.pdf") as Analyst within Session constrained_by [NoHallucination] effort: high
"#;
    let printed1 = reparse_print(source);
    let printed2 = reparse_print(&printed1);
    assert_eq!(printed1, printed2);
}

#[test]
fn nominal_types_with_identical_structure_are_distinct() {
    // PartyA and PartyB have identical fields; assigning one into a slot
    // typed as the other must fail in both directions.
    let forward = r#"
type PartyA { name: String }
type PartyB { name: String }
flow F() {
  step MakeA { ask: "a" output: PartyA }
  validate MakeA.output against PartyB { if structural_mismatch -> raise ValidationError }
}
run F()
"#;
    let err = compile(forward).unwrap_err();
    match err {
        CompileError::Check(diags) => {
            assert!(diags
                .iter()
                .any(|d| d.kind == DiagnosticKind::IncompatibleAssignment));
        }
        other => panic!("expected Check, got {:?}", other),
    }

    let reverse = forward.replace("output: PartyA", "output: PartyB").replace("against PartyB", "against PartyA");
    assert!(matches!(compile(&reverse), Err(CompileError::Check(_))));
}

#[test]
fn uncertainty_propagates_through_every_downstream_step() {
    let source = r#"
flow F() {
  step Seed { ask: "guess" output: Uncertainty }
  step A { given: Seed.output ask: "a" output: Summary }
}
run F()
"#;
    let err = compile(source).unwrap_err();
    match err {
        CompileError::Check(diags) => {
            assert!(diags
                .iter()
                .any(|d| d.kind == DiagnosticKind::UncertaintyPropagationRequired));
        }
        other => panic!("expected Check, got {:?}", other),
    }

    // Declaring the widened type everywhere compiles.
    let widened = r#"
flow F() {
  step Seed { ask: "guess" output: Uncertainty }
  step A { given: Seed.output ask: "a" output: Uncertainty }
}
run F()
"#;
    compile(widened).unwrap();
}

#[test]
fn acyclic_flows_compile_and_cycles_do_not() {
    let acyclic = r#"
flow F(doc: Document) {
  step A { given: doc ask: "a" output: Summary }
  step B { given: A.output ask: "b" output: Summary }
  step C { given: [A.output, B.output] ask: "c" output: Summary }
}
run F("d")
"#;
    let ir = compile(acyclic).unwrap();
    let steps = &ir.flows["F"].steps;
    assert_eq!(steps[2].depends_on.len(), 2);

    // A cycle is only expressible with forward references, which the
    // checker rejects before IR generation; the irgen-level cycle guard is
    // covered by its own unit tests.
    let cyclic = r#"
flow F() {
  step A { given: B.output ask: "a" }
  step B { given: A.output ask: "b" }
}
run F()
"#;
    assert!(matches!(compile(cyclic), Err(CompileError::Check(_))));
}

#[test]
fn compile_is_byte_idempotent() {
    let source = r#"
persona P { domain: ["x"] }
context C { memory: none }
anchor A { confidence_floor: 0.9 }
memory M { store: session }
tool T { timeout: 1s }
flow F(q: String) -> Summary {
  use T("probe")
  step S { given: q ask: "sum" output: Summary }
  remember(S.output) -> M
  recall("sum") from M
}
run F("x") as P within C constrained_by [A] on_failure: log effort: medium
"#;
    let a = serde_json::to_string(&compile(source).unwrap()).unwrap();
    let b = serde_json::to_string(&compile(source).unwrap()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn compiled_ir_round_trips_through_interchange() {
    let json = compile_to_json(
        "tool T { timeout: 1s }\nflow F() { use T(\"x\") }\nrun F() effort: low",
    )
    .unwrap();
    let program = from_interchange(&json).unwrap();
    assert_eq!(program.entrypoint.effort.as_deref(), Some("low"));
    let steps = &program.flows["F"].steps;
    assert_eq!(steps[0].kind, StepKind::UseTool);
    assert_eq!(steps[0].config["tool"], "T");
}

#[test]
fn boundary_durations() {
    // 0s accepted.
    assert!(compile("tool T { timeout: 0s }\nflow F() { use T(\"x\") }\nrun F()").is_ok());
    // Negative durations rejected at lex time.
    let err = compile("tool T { timeout: -1s }\nflow F() { use T(\"x\") }\nrun F()").unwrap_err();
    assert!(matches!(err, CompileError::Lex(_)));
}

#[test]
fn empty_persona_domain_is_a_declaration_error() {
    let err = compile("persona P { domain: [] }\nflow F() { step S { ask: \"x\" } }\nrun F() as P")
        .unwrap_err();
    match err {
        CompileError::Check(diags) => {
            assert!(diags.iter().any(|d| d.message.contains("empty domain")));
        }
        other => panic!("expected Check, got {:?}", other),
    }
}
