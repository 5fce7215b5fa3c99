//! End-to-end executor tests: compiled programs driven against scripted
//! mock clients and stub tools.

use std::sync::Arc;

use axon_core::compile;
use axon_interchange::{from_interchange, IrProgram};
use axon_runtime::tools::{RegistryMode, ToolRegistry};
use axon_runtime::{
    CancelToken, Executor, MockModelClient, ModelError, ModelResponse, TraceEventKind,
};

fn program(source: &str) -> IrProgram {
    compile(source).expect("program compiles")
}

fn executor_with(
    responses: Vec<Result<ModelResponse, ModelError>>,
) -> (Executor, Arc<MockModelClient>) {
    let client = Arc::new(MockModelClient::new(responses));
    (Executor::new(client.clone()), client)
}

fn stub_tools(program: &IrProgram) -> ToolRegistry {
    ToolRegistry::from_declarations(&program.declarations.tools, RegistryMode::Stub)
        .expect("stub registry")
}

#[tokio::test]
async fn minimal_flow_executes() {
    let ir = program(
        "persona P { domain: [\"x\"] tone: precise }\nflow F() -> String { step S { ask: \"hi\" output: String } }\nrun F() as P",
    );
    let (executor, client) = executor_with(vec![Ok(ModelResponse::text("hello").with_confidence(0.9))]);

    let outcome = executor.execute(&ir, &CancelToken::new()).await;
    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(outcome.status, "success");
    assert_eq!(
        outcome.output.as_ref().unwrap().value,
        serde_json::json!("hello")
    );
    assert_eq!(outcome.trace.events_of_kind(TraceEventKind::FlowStart), 1);
    assert_eq!(outcome.trace.events_of_kind(TraceEventKind::FlowEnd), 1);
    assert_eq!(outcome.trace.events_of_kind(TraceEventKind::StepStart), 1);
    assert_eq!(outcome.trace.steps.len(), 1);
    assert_eq!(outcome.trace.steps[0].status, "success");

    // The system prompt carries the persona identity.
    let request = &client.requests()[0];
    assert!(request.system_prompt.contains("You are P"));
    assert!(request.user_prompt.contains("hi"));
}

#[tokio::test]
async fn refine_retries_with_failure_context_then_passes() {
    // Scenario: validate fails once on confidence, refine retries, the
    // second attempt passes. The second model request must carry the first
    // rejected output and the validation reason.
    let ir = program(
        r#"
flow Check() {
  step Assess { ask: "Assess the risk." output: Summary }
  validate Assess.output against Summary {
    if confidence < 0.8 -> refine(max_attempts: 2)
  }
  refine { max_attempts: 2 pass_failure_context: true backoff: none }
}
run Check()
"#,
    );
    let (executor, client) = executor_with(vec![
        Ok(ModelResponse::text("first answer").with_confidence(0.5)),
        Ok(ModelResponse::text("second answer").with_confidence(0.9)),
    ]);

    let outcome = executor.execute(&ir, &CancelToken::new()).await;
    assert!(outcome.success, "error: {:?}", outcome.error);

    let requests = client.requests();
    assert_eq!(requests.len(), 2, "one retry expected");
    assert!(requests[0].failure_context.is_none());
    let carried = requests[1]
        .failure_context
        .as_ref()
        .expect("second attempt carries the failure context");
    assert!(carried.why_rejected.contains("confidence"));
    assert!(carried
        .previous_attempt
        .to_string()
        .contains("first answer"));

    // The failed attempt and the scheduled retry both appear in the trace.
    assert_eq!(outcome.trace.events_of_kind(TraceEventKind::RefineAttempt), 1);
    assert_eq!(outcome.trace.events_of_kind(TraceEventKind::Retry), 1);
    assert!(outcome.trace.events_of_kind(TraceEventKind::ValidationPass) >= 1);
}

#[tokio::test]
async fn refine_exhaustion_raises_axon_004() {
    let ir = program(
        r#"
flow Check() {
  step Assess { ask: "Assess." output: Summary }
  validate Assess.output against Summary {
    if confidence < 0.8 -> refine(max_attempts: 2)
  }
}
run Check()
"#,
    );
    let (executor, _client) = executor_with(vec![
        Ok(ModelResponse::text("weak").with_confidence(0.2)),
        Ok(ModelResponse::text("still weak").with_confidence(0.3)),
    ]);

    let outcome = executor.execute(&ir, &CancelToken::new()).await;
    assert!(!outcome.success);
    assert_eq!(outcome.error.as_ref().unwrap().code(), "AXON_004");
}

#[tokio::test]
async fn anchor_breach_halts_the_flow_with_axon_003() {
    // Scenario: ensures confidence >= 0.9 against an output of 0.5.
    let ir = program(
        r#"
anchor Strict { confidence_floor: 0.9 }
flow F() {
  step First { ask: "a" output: Summary }
  step Second { given: First.output ask: "b" output: Summary }
}
run F() constrained_by [Strict]
"#,
    );
    let (executor, client) = executor_with(vec![
        Ok(ModelResponse::text("shaky answer").with_confidence(0.5)),
        Ok(ModelResponse::text("never reached").with_confidence(0.99)),
    ]);

    let outcome = executor.execute(&ir, &CancelToken::new()).await;
    assert!(!outcome.success);
    let err = outcome.error.as_ref().unwrap();
    assert_eq!(err.code(), "AXON_003");
    assert!(err.to_string().contains("Strict"));

    assert!(outcome.trace.events_of_kind(TraceEventKind::AnchorBreach) >= 1);
    assert_eq!(outcome.trace.events_of_kind(TraceEventKind::FatalError), 1);
    // The flow halted: the second step never ran.
    assert_eq!(client.requests().len(), 1);
    assert_eq!(outcome.trace.steps.len(), 1);
    assert_eq!(outcome.trace.steps[0].status, "failed");
}

#[tokio::test]
async fn anchor_fallback_substitutes_the_declared_value() {
    let ir = program(
        r#"
anchor Guarded { confidence_floor: 0.9 on_violation: fallback("insufficient confidence") }
flow F() { step S { ask: "a" output: Summary } }
run F() constrained_by [Guarded]
"#,
    );
    let (executor, _client) =
        executor_with(vec![Ok(ModelResponse::text("shaky").with_confidence(0.4))]);

    let outcome = executor.execute(&ir, &CancelToken::new()).await;
    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(
        outcome.output.unwrap().value,
        serde_json::json!("insufficient confidence")
    );
}

#[tokio::test]
async fn tool_timeout_yields_axon_006_naming_the_step() {
    // Scenario: a 1s tool budget against a stub that sleeps 2s.
    let ir = program(
        "tool Sleep { timeout: 1s }\nflow F() { use Sleep(\"q\") }\nrun F()",
    );
    let tools = stub_tools(&ir);
    let (executor, _client) = executor_with(vec![]);
    let executor = executor.with_tools(tools);

    let outcome = executor.execute(&ir, &CancelToken::new()).await;
    assert!(!outcome.success);
    let err = outcome.error.as_ref().unwrap();
    assert_eq!(err.code(), "AXON_006");
    assert!(err.context().step_name.is_some());
    assert!(outcome.trace.events_of_kind(TraceEventKind::ToolCallStart) >= 1);
    assert!(outcome.trace.events_of_kind(TraceEventKind::ToolCallEnd) >= 1);
}

#[tokio::test]
async fn tool_steps_dispatch_through_the_registry() {
    let ir = program(
        "tool WebSearch { max_results: 2 timeout: 10s }\nflow F() -> String { use WebSearch(\"rust 2026\") }\nrun F()",
    );
    let tools = stub_tools(&ir);
    let (executor, _client) = executor_with(vec![]);
    let executor = executor.with_tools(tools);

    let outcome = executor.execute(&ir, &CancelToken::new()).await;
    assert!(outcome.success, "error: {:?}", outcome.error);
    let value = outcome.output.unwrap().value;
    assert_eq!(value["query"], serde_json::json!("rust 2026"));
    assert_eq!(value["results"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn remember_and_recall_round_trip_through_memory() {
    let ir = program(
        r#"
memory Notes { store: session retrieval: exact }
flow F() {
  step Summarize { ask: "Summarize." output: Summary }
  remember(Summarize.output) -> Notes
  recall("Summarize") from Notes
}
run F()
"#,
    );
    let (executor, _client) =
        executor_with(vec![Ok(ModelResponse::text("the summary").with_confidence(0.9))]);

    let outcome = executor.execute(&ir, &CancelToken::new()).await;
    assert!(outcome.success, "error: {:?}", outcome.error);
    let hits = outcome.output.unwrap().value;
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["value"], serde_json::json!("the summary"));
}

#[tokio::test]
async fn conditional_takes_the_matching_branch() {
    let ir = program(
        r#"
flow F() {
  step First { ask: "try" output: Summary }
  if confidence < 0.5 -> step Retry { ask: "try harder" output: Summary }
  else -> step Accept { ask: "accept" output: Summary }
}
run F()
"#,
    );
    // First answer is confident, so the else branch (Accept) runs.
    let (executor, client) = executor_with(vec![
        Ok(ModelResponse::text("good answer").with_confidence(0.9)),
        Ok(ModelResponse::text("accepted").with_confidence(0.9)),
    ]);

    let outcome = executor.execute(&ir, &CancelToken::new()).await;
    assert!(outcome.success, "error: {:?}", outcome.error);
    let prompts: Vec<String> = client
        .requests()
        .iter()
        .map(|r| r.user_prompt.clone())
        .collect();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("accept"), "else branch expected, got {:?}", prompts);
}

#[tokio::test]
async fn on_failure_retry_re_runs_the_flow_once() {
    let ir = program(
        "flow F() -> String { step S { ask: \"hi\" output: String } }\nrun F() on_failure: retry",
    );
    let (executor, client) = executor_with(vec![
        Err(ModelError::Network("connection refused".to_string())),
        Ok(ModelResponse::text("recovered").with_confidence(0.9)),
    ]);

    let outcome = executor.execute(&ir, &CancelToken::new()).await;
    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(client.requests().len(), 2);
    assert_eq!(
        outcome.output.unwrap().value,
        serde_json::json!("recovered")
    );
}

#[tokio::test]
async fn cancellation_is_observed_at_the_step_boundary() {
    let ir = program("flow F() { step S { ask: \"hi\" } }\nrun F()");
    let (executor, client) = executor_with(vec![Ok(ModelResponse::text("never"))]);

    let cancel = CancelToken::new();
    cancel.cancel();
    let outcome = executor.execute(&ir, &cancel).await;
    assert!(!outcome.success);
    assert_eq!(outcome.status, "cancelled");
    assert!(outcome.error.is_none());
    assert!(client.requests().is_empty(), "no step may run after cancel");
    assert_eq!(outcome.trace.status, "cancelled");
}

#[tokio::test]
async fn weave_synthesizes_its_declared_sources() {
    let ir = program(
        r#"
flow F(doc: Document) -> StructuredReport {
  step A { given: doc ask: "part one" output: Summary }
  step B { given: doc ask: "part two" output: Summary }
  weave [A.output, B.output] into Report {
    format: StructuredReport
    priority: [risks, summary]
  }
}
run F("contract text")
"#,
    );
    let (executor, client) = executor_with(vec![
        Ok(ModelResponse::text("alpha").with_confidence(0.9)),
        Ok(ModelResponse::text("beta").with_confidence(0.9)),
        Ok(ModelResponse::text("woven").with_confidence(0.9)),
    ]);

    let outcome = executor.execute(&ir, &CancelToken::new()).await;
    assert!(outcome.success, "error: {:?}", outcome.error);

    let weave_request = &client.requests()[2];
    assert!(weave_request.user_prompt.contains("Synthesize"));
    assert!(weave_request.user_prompt.contains("alpha"));
    assert!(weave_request.user_prompt.contains("beta"));
    assert!(weave_request.user_prompt.contains("risks, summary"));
}

#[tokio::test]
async fn interchange_round_trip_then_execute() {
    let json = axon_core::compile_to_json(
        "flow F() -> String { step S { ask: \"hi\" output: String } }\nrun F()",
    )
    .unwrap();
    let ir = from_interchange(&json).unwrap();

    let (executor, _client) =
        executor_with(vec![Ok(ModelResponse::text("via interchange").with_confidence(1.0))]);
    let outcome = executor.execute(&ir, &CancelToken::new()).await;
    assert!(outcome.success);
    assert_eq!(
        outcome.output.unwrap().value,
        serde_json::json!("via interchange")
    );
}

#[tokio::test]
async fn default_confidence_comes_from_the_persona_threshold() {
    let ir = program(
        "persona P { domain: [\"x\"] confidence_threshold: 0.7 }\nflow F() { step S { ask: \"hi\" output: Summary } }\nrun F() as P",
    );
    // The backend reports no confidence.
    let (executor, _client) = executor_with(vec![Ok(ModelResponse::text("answer"))]);

    let outcome = executor.execute(&ir, &CancelToken::new()).await;
    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(outcome.output.unwrap().confidence, 0.7);
}

#[tokio::test]
async fn trace_json_has_the_contract_shape() {
    let ir = program(
        "persona P { domain: [\"x\"] }\nflow F() { step S { ask: \"hi\" output: Summary } }\nrun F() as P",
    );
    let (executor, _client) =
        executor_with(vec![Ok(ModelResponse::text("answer").with_confidence(0.8))]);
    let outcome = executor.execute(&ir, &CancelToken::new()).await;

    let json = outcome.trace.to_json();
    assert!(json["trace_id"].is_string());
    assert_eq!(json["program"], "F");
    assert_eq!(json["persona"], "P");
    assert!(json["started_at"].is_string());
    assert!(json["completed_at"].is_string());
    assert_eq!(json["status"], "success");
    let step = &json["steps"][0];
    assert_eq!(step["step_name"], "S");
    assert_eq!(step["output_type"], "Summary");
    assert_eq!(step["confidence"], 0.8);
}
