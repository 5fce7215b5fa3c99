//! The executor: walks a compiled plan's step DAG against the abstract
//! model client, tool registry, and memory store.
//!
//! Per step: cancellation check → anchor pre-gate → execution by kind →
//! anchor post-gate (conjunction) → semantic validation → validate-gate
//! rules, with validation and confidence failures handed to the refine
//! engine. Outputs commit atomically on success; on failure the context
//! stays at its last committed state. Every termination path emits a
//! terminal trace event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use axon_interchange::{
    Entrypoint, FailureStrategy, IrFlow, IrInput, IrProgram, IrStep, StepKind, TypeDecl, TypeRef,
    ViolationAction,
};

use crate::anchor::{BoundAnchor, PassThroughJudge, SemanticJudge};
use crate::client::{FailureContext, ModelClient, ModelRequest};
use crate::context::{RunContext, TypedValue};
use crate::error::{ErrorContext, RuntimeError};
use crate::memory::{InMemoryStore, MemoryStore};
use crate::retry::{run_with_refine, Backoff, RefinePlan, StepState};
use crate::tools::ToolRegistry;
use crate::tracer::{ExecutionTrace, StepRecord, TraceEventKind, Tracer};
use crate::validator::{self, ValidationSpec};

// ──────────────────────────────────────────────
// Cancellation
// ──────────────────────────────────────────────

/// Host-propagated cancellation signal, observed at every step boundary
/// and between retry backoffs.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ──────────────────────────────────────────────
// Outcome
// ──────────────────────────────────────────────

/// Result of one program execution. The trace is always present; no
/// unchecked panic escapes the executor.
#[derive(Debug)]
pub struct RunOutcome {
    pub success: bool,
    /// `"success"`, `"failed"`, or `"cancelled"`.
    pub status: String,
    pub output: Option<TypedValue>,
    pub error: Option<RuntimeError>,
    pub trace: ExecutionTrace,
}

enum FlowResult {
    Success(Option<TypedValue>),
    Failed(RuntimeError),
    Cancelled,
}

/// A validate gate folded onto its producing step.
struct Gate {
    schema: String,
    rules: Vec<serde_json::Value>,
    refine: Option<RefinePlan>,
}

// ──────────────────────────────────────────────
// Executor
// ──────────────────────────────────────────────

pub struct Executor {
    client: Arc<dyn ModelClient>,
    tools: ToolRegistry,
    memory: Arc<dyn MemoryStore>,
    judge: Arc<dyn SemanticJudge>,
}

impl Executor {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Executor {
            client,
            tools: ToolRegistry::empty(),
            memory: Arc::new(InMemoryStore::new()),
            judge: Arc::new(PassThroughJudge),
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_judge(mut self, judge: Arc<dyn SemanticJudge>) -> Self {
        self.judge = judge;
        self
    }

    /// Execute a program, routing terminal failures through the
    /// entrypoint's `on_failure` strategy.
    pub async fn execute(&self, program: &IrProgram, cancel: &CancelToken) -> RunOutcome {
        let mut retried = false;
        loop {
            let (result, trace) = self.execute_flow(program, cancel).await;
            match result {
                FlowResult::Success(output) => {
                    return RunOutcome {
                        success: true,
                        status: "success".to_string(),
                        output,
                        error: None,
                        trace,
                    }
                }
                FlowResult::Cancelled => {
                    return RunOutcome {
                        success: false,
                        status: "cancelled".to_string(),
                        output: None,
                        error: None,
                        trace,
                    }
                }
                FlowResult::Failed(err) => {
                    match &program.entrypoint.on_failure {
                        Some(FailureStrategy::Retry { backoff }) if !retried => {
                            retried = true;
                            tracing::warn!(error = %err, "flow failed; retrying per on_failure");
                            let delay = Backoff::parse(backoff.as_deref().unwrap_or("none"))
                                .delay_ms(1);
                            if delay > 0 {
                                tokio::time::sleep(Duration::from_millis(delay)).await;
                            }
                            if cancel.is_cancelled() {
                                return RunOutcome {
                                    success: false,
                                    status: "cancelled".to_string(),
                                    output: None,
                                    error: None,
                                    trace,
                                };
                            }
                            continue;
                        }
                        Some(FailureStrategy::Log) => {
                            tracing::error!(code = err.code(), error = %err, "flow failed");
                        }
                        _ => {}
                    }
                    return RunOutcome {
                        success: false,
                        status: "failed".to_string(),
                        output: None,
                        error: Some(err),
                        trace,
                    };
                }
            }
        }
    }

    async fn execute_flow(
        &self,
        program: &IrProgram,
        cancel: &CancelToken,
    ) -> (FlowResult, ExecutionTrace) {
        let entry = &program.entrypoint;
        let tracer = Mutex::new(Tracer::new(entry.flow.clone(), entry.persona.clone()));

        let flow = match program.flows.get(&entry.flow) {
            Some(flow) => flow,
            None => {
                let err = RuntimeError::Runtime {
                    message: format!("entrypoint references unknown flow '{}'", entry.flow),
                    context: ErrorContext::default(),
                };
                let trace = tracer.into_inner().unwrap_or_else(|e| e.into_inner()).finalize("failed");
                return (FlowResult::Failed(err), trace);
            }
        };

        let mut ctx = match self.build_context(program, entry, flow) {
            Ok(ctx) => ctx,
            Err(err) => {
                let trace = tracer.into_inner().unwrap_or_else(|e| e.into_inner()).finalize("failed");
                return (FlowResult::Failed(err), trace);
            }
        };
        let anchors: Vec<BoundAnchor> = ctx
            .anchors
            .iter()
            .map(|(name, decl)| BoundAnchor::new(name.clone(), decl.clone()))
            .collect();
        let gates = collect_gates(flow);

        {
            let mut t = tracer.lock().unwrap_or_else(|e| e.into_inner());
            t.start_span(format!("flow:{}", entry.flow));
            t.emit(
                TraceEventKind::FlowStart,
                None,
                json!({
                    "flow": entry.flow,
                    "arguments": entry.arguments,
                    "effort": entry.effort,
                    "anchors": entry.anchors,
                }),
            );
        }

        let mut last_output: Option<TypedValue> = None;

        for step in &flow.steps {
            if cancel.is_cancelled() {
                let mut t = tracer.lock().unwrap_or_else(|e| e.into_inner());
                t.emit(
                    TraceEventKind::FlowEnd,
                    Some(&step.id),
                    json!({"status": "cancelled"}),
                );
                drop(t);
                let trace = tracer.into_inner().unwrap_or_else(|e| e.into_inner()).finalize("cancelled");
                return (FlowResult::Cancelled, trace);
            }

            // Pre-execution anchor gate.
            if let Some(blocked) = anchors.iter().find(|a| !a.allows_start(&ctx)) {
                let err = RuntimeError::AnchorBreach {
                    anchor: blocked.name.clone(),
                    message: "precondition rejected step inputs".to_string(),
                    context: ErrorContext::for_step(&entry.flow, &step.id, &step.name),
                };
                return self.fail_flow(tracer, err);
            }

            match self
                .execute_step(step, program, entry, &ctx, &anchors, &gates, &tracer, cancel)
                .await
            {
                Ok(value) => {
                    ctx.commit(&step.id, &step.name, value.clone());
                    last_output = Some(value);
                }
                Err(err) => return self.fail_flow(tracer, err),
            }
        }

        {
            let mut t = tracer.lock().unwrap_or_else(|e| e.into_inner());
            t.emit(TraceEventKind::FlowEnd, None, json!({"status": "success"}));
        }
        let trace = tracer.into_inner().unwrap_or_else(|e| e.into_inner()).finalize("success");
        (FlowResult::Success(last_output), trace)
    }

    fn fail_flow(
        &self,
        tracer: Mutex<Tracer>,
        err: RuntimeError,
    ) -> (FlowResult, ExecutionTrace) {
        {
            let mut t = tracer.lock().unwrap_or_else(|e| e.into_inner());
            t.emit(
                TraceEventKind::FatalError,
                err.context().step_id.as_deref(),
                json!({"code": err.code(), "message": err.to_string()}),
            );
            t.emit(
                TraceEventKind::FlowEnd,
                None,
                json!({"status": "failed", "code": err.code()}),
            );
        }
        let trace = tracer.into_inner().unwrap_or_else(|e| e.into_inner()).finalize("failed");
        (FlowResult::Failed(err), trace)
    }

    fn build_context(
        &self,
        program: &IrProgram,
        entry: &Entrypoint,
        flow: &IrFlow,
    ) -> Result<RunContext, RuntimeError> {
        let mut ctx = RunContext::default();

        if let Some(name) = &entry.persona {
            let decl = program.declarations.personas.get(name).ok_or_else(|| {
                RuntimeError::Runtime {
                    message: format!("entrypoint references unknown persona '{}'", name),
                    context: ErrorContext::default(),
                }
            })?;
            ctx.persona_name = Some(name.clone());
            ctx.persona = Some(decl.clone());
        }
        if let Some(name) = &entry.context {
            let decl = program.declarations.contexts.get(name).ok_or_else(|| {
                RuntimeError::Runtime {
                    message: format!("entrypoint references unknown context '{}'", name),
                    context: ErrorContext::default(),
                }
            })?;
            ctx.context = Some(decl.clone());
        }
        for name in &entry.anchors {
            let decl = program.declarations.anchors.get(name).ok_or_else(|| {
                RuntimeError::Runtime {
                    message: format!("entrypoint references unknown anchor '{}'", name),
                    context: ErrorContext::default(),
                }
            })?;
            ctx.anchors.push((name.clone(), decl.clone()));
        }
        for (param, argument) in flow.params.iter().zip(entry.arguments.iter()) {
            ctx.arguments.insert(param.name.clone(), argument.clone());
        }
        Ok(ctx)
    }

    // ── single step ───────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn execute_step(
        &self,
        step: &IrStep,
        program: &IrProgram,
        entry: &Entrypoint,
        ctx: &RunContext,
        anchors: &[BoundAnchor],
        gates: &HashMap<String, Gate>,
        tracer: &Mutex<Tracer>,
        cancel: &CancelToken,
    ) -> Result<TypedValue, RuntimeError> {
        {
            let mut t = tracer.lock().unwrap_or_else(|e| e.into_inner());
            t.start_span(format!("step:{}", step.name));
            t.emit(
                TraceEventKind::StepStart,
                Some(&step.id),
                json!({"name": step.name, "kind": step.kind}),
            );
        }

        let plan = self.step_plan(step, anchors, gates);
        let error_context = ErrorContext::for_step(&entry.flow, &step.id, &step.name);
        let tokens_used = Mutex::new(0u64);

        let result = run_with_refine(
            &plan,
            cancel,
            error_context.clone(),
            |failure| {
                self.attempt_step(
                    step,
                    program,
                    entry,
                    ctx,
                    anchors,
                    gates,
                    tracer,
                    &tokens_used,
                    failure,
                )
            },
            |state| {
                let mut t = tracer.lock().unwrap_or_else(|e| e.into_inner());
                match state {
                    StepState::Failed { attempt, reason } => t.emit(
                        TraceEventKind::RefineAttempt,
                        Some(&step.id),
                        json!({"attempt": attempt, "reason": reason}),
                    ),
                    StepState::Refining { next_attempt } => t.emit(
                        TraceEventKind::Retry,
                        Some(&step.id),
                        json!({"next_attempt": next_attempt}),
                    ),
                    _ => {}
                }
            },
        )
        .await;

        let mut t = tracer.lock().unwrap_or_else(|e| e.into_inner());
        match &result {
            Ok(outcome) => {
                t.emit(
                    TraceEventKind::StepEnd,
                    Some(&step.id),
                    json!({"status": "success", "attempts": outcome.attempts.len()}),
                );
                t.record_step(StepRecord {
                    step_id: step.id.clone(),
                    step_name: step.name.clone(),
                    input_types: input_type_names(step, ctx),
                    output_type: step.output_type.as_ref().map(|t| t.name.clone()),
                    confidence: Some(outcome.value.confidence),
                    anchors_checked: anchors.iter().map(|a| a.name.clone()).collect(),
                    anchor_violations: Vec::new(),
                    tokens_used: *tokens_used.lock().unwrap_or_else(|e| e.into_inner()),
                    reasoning_trace: reasoning_of(step, &outcome.value),
                    status: "success".to_string(),
                });
            }
            Err(err) => {
                t.emit(
                    TraceEventKind::StepEnd,
                    Some(&step.id),
                    json!({"status": "failed", "code": err.code()}),
                );
                t.record_step(StepRecord {
                    step_id: step.id.clone(),
                    step_name: step.name.clone(),
                    input_types: input_type_names(step, ctx),
                    output_type: step.output_type.as_ref().map(|t| t.name.clone()),
                    confidence: None,
                    anchors_checked: anchors.iter().map(|a| a.name.clone()).collect(),
                    anchor_violations: vec![err.to_string()],
                    tokens_used: *tokens_used.lock().unwrap_or_else(|e| e.into_inner()),
                    reasoning_trace: None,
                    status: "failed".to_string(),
                });
            }
        }
        t.end_span();
        drop(t);

        result.map(|outcome| outcome.value)
    }

    /// The refine plan for a step: its own `refine` config, widened by any
    /// gate refine rule targeting it and any anchor `retry(n)` strategy.
    fn step_plan(
        &self,
        step: &IrStep,
        anchors: &[BoundAnchor],
        gates: &HashMap<String, Gate>,
    ) -> RefinePlan {
        let mut plan = RefinePlan::from_config(&step.config);
        if let Some(gate) = gates.get(&step.name) {
            if let Some(gate_plan) = &gate.refine {
                if gate_plan.max_attempts > plan.max_attempts {
                    plan = gate_plan.clone();
                }
            }
        }
        for anchor in anchors {
            if let ViolationAction::Retry { attempts } = anchor.strategy() {
                plan.max_attempts = plan.max_attempts.max(attempts);
            }
        }
        plan
    }

    /// One attempt at a step: execute by kind, then anchor post-gate,
    /// semantic validation, and gate rules.
    #[allow(clippy::too_many_arguments)]
    fn attempt_step<'a>(
        &'a self,
        step: &'a IrStep,
        program: &'a IrProgram,
        entry: &'a Entrypoint,
        ctx: &'a RunContext,
        anchors: &'a [BoundAnchor],
        gates: &'a HashMap<String, Gate>,
        tracer: &'a Mutex<Tracer>,
        tokens_used: &'a Mutex<u64>,
        failure: Option<FailureContext>,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<TypedValue, RuntimeError>> + Send + 'a>,
    > {
        Box::pin(self.attempt_step_inner(
            step, program, entry, ctx, anchors, gates, tracer, tokens_used, failure,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt_step_inner(
        &self,
        step: &IrStep,
        program: &IrProgram,
        entry: &Entrypoint,
        ctx: &RunContext,
        anchors: &[BoundAnchor],
        gates: &HashMap<String, Gate>,
        tracer: &Mutex<Tracer>,
        tokens_used: &Mutex<u64>,
        failure: Option<FailureContext>,
    ) -> Result<TypedValue, RuntimeError> {
        let error_context = ErrorContext::for_step(&entry.flow, &step.id, &step.name);
        let inputs = self.gather_inputs(step, ctx, &error_context)?;

        let mut value = match step.kind {
            StepKind::Ask | StepKind::Probe | StepKind::Reason | StepKind::Weave => {
                self.model_step(step, program, entry, ctx, &inputs, tokens_used, failure)
                    .await?
            }
            StepKind::UseTool => {
                self.tool_step(step, program, ctx, &inputs, tracer, &error_context)
                    .await?
            }
            StepKind::Remember => self.remember_step(step, &inputs, &error_context).await?,
            StepKind::Recall => self.recall_step(step).await?,
            StepKind::Validate => {
                return self
                    .validate_step(step, program, ctx, &inputs, tracer, &error_context)
                    .await;
            }
            StepKind::Conditional => {
                return self
                    .conditional_step(
                        step,
                        program,
                        entry,
                        ctx,
                        anchors,
                        gates,
                        tracer,
                        tokens_used,
                        &error_context,
                    )
                    .await;
            }
        };

        // Post-execution anchor gate: conjunction over every bound anchor.
        for anchor in anchors {
            let violations = anchor.check_output(&value);
            let delegated = anchor.decl.enforce.is_some();
            let semantically_ok = if delegated {
                self.judge.holds(&anchor.decl, &value).await
            } else {
                true
            };
            {
                let mut t = tracer.lock().unwrap_or_else(|e| e.into_inner());
                t.emit(
                    TraceEventKind::AnchorCheck,
                    Some(&step.id),
                    json!({"anchor": anchor.name, "delegated": delegated}),
                );
                if violations.is_empty() && semantically_ok {
                    t.emit(
                        TraceEventKind::AnchorPass,
                        Some(&step.id),
                        json!({"anchor": anchor.name}),
                    );
                } else {
                    t.emit(
                        TraceEventKind::AnchorBreach,
                        Some(&step.id),
                        json!({
                            "anchor": anchor.name,
                            "violations": violations,
                        }),
                    );
                }
            }
            if violations.is_empty() && semantically_ok {
                continue;
            }
            let reason = violations
                .first()
                .map(|v| v.reason.clone())
                .unwrap_or_else(|| "semantic judge rejected the output".to_string());
            match anchor.strategy() {
                ViolationAction::Warn | ViolationAction::Log => {
                    tracing::warn!(anchor = %anchor.name, reason = %reason, "anchor violation tolerated");
                }
                ViolationAction::Fallback { value: fallback } => {
                    value = TypedValue::text(fallback, 1.0);
                }
                ViolationAction::Retry { .. } => {
                    return Err(RuntimeError::Validation {
                        message: format!("anchor '{}': {}", anchor.name, reason),
                        context: error_context.clone().with_details(value.value.to_string()),
                    });
                }
                ViolationAction::Escalate | ViolationAction::Raise { .. } => {
                    return Err(RuntimeError::AnchorBreach {
                        anchor: anchor.name.clone(),
                        message: reason,
                        context: error_context.clone().with_details(value.value.to_string()),
                    });
                }
            }
        }

        // Semantic validation against the declared output type.
        let spec = ValidationSpec {
            expected_type: step.output_type.clone(),
            confidence_floor: ctx.confidence_floor(step.config["confidence_floor"].as_f64()),
            range: None,
        };
        let validation = validator::validate(&value, &spec, &program.declarations.types);
        {
            let mut t = tracer.lock().unwrap_or_else(|e| e.into_inner());
            let kind = if validation.is_valid {
                TraceEventKind::ValidationPass
            } else {
                TraceEventKind::ValidationFail
            };
            t.emit(
                kind,
                Some(&step.id),
                json!({"violations": validation.violations}),
            );
        }
        if !validation.is_valid {
            validator::validate_and_raise(
                &value,
                &spec,
                &program.declarations.types,
                error_context
                    .clone()
                    .with_details(value.value.to_string()),
            )?;
        }

        // Gate rules folded from a downstream validate step.
        if let Some(gate) = gates.get(&step.name) {
            self.apply_gate(gate, &value, program, tracer, &error_context, &step.id)?;
        }

        Ok(value)
    }

    fn gather_inputs(
        &self,
        step: &IrStep,
        ctx: &RunContext,
        error_context: &ErrorContext,
    ) -> Result<Vec<(String, TypedValue)>, RuntimeError> {
        let mut inputs = Vec::new();
        for input in &step.inputs {
            match input {
                IrInput::Param { name } => {
                    let value = ctx.arguments.get(name).cloned().unwrap_or_default();
                    inputs.push((name.clone(), TypedValue::text(value, 1.0)));
                }
                IrInput::Step { id, name } => {
                    // Embedded conditional branches reference by name.
                    let value = ctx
                        .output(id)
                        .or_else(|| ctx.output_by_name(name))
                        .cloned()
                        .ok_or_else(|| RuntimeError::Runtime {
                            message: format!("step input '{}' has no committed output", name),
                            context: error_context.clone(),
                        })?;
                    inputs.push((name.clone(), value));
                }
            }
        }
        Ok(inputs)
    }

    #[allow(clippy::too_many_arguments)]
    async fn model_step(
        &self,
        step: &IrStep,
        program: &IrProgram,
        entry: &Entrypoint,
        ctx: &RunContext,
        inputs: &[(String, TypedValue)],
        tokens_used: &Mutex<u64>,
        failure: Option<FailureContext>,
    ) -> Result<TypedValue, RuntimeError> {
        let request = ModelRequest {
            system_prompt: system_prompt(ctx),
            user_prompt: user_prompt(step, inputs),
            output_schema: output_schema(step.output_type.as_ref(), &program.declarations.types),
            max_tokens: ctx.context.as_ref().and_then(|c| c.max_tokens),
            effort: entry.effort.clone(),
            failure_context: failure,
        };

        let response = self.client.complete(request).await.map_err(|e| {
            RuntimeError::Runtime {
                message: format!("model call failed: {}", e),
                context: ErrorContext::for_step(&entry.flow, &step.id, &step.name),
            }
        })?;

        *tokens_used.lock().unwrap_or_else(|e| e.into_inner()) += response.usage.total();

        let (confidence, _defaulted) = match response.confidence {
            Some(c) => (c, false),
            None => (ctx.default_confidence(), true),
        };
        let value = response
            .structured
            .clone()
            .unwrap_or_else(|| serde_json::Value::String(response.content.clone()));

        Ok(TypedValue::new(
            value,
            step.output_type.as_ref().map(|t| t.name.clone()),
            confidence,
        ))
    }

    async fn tool_step(
        &self,
        step: &IrStep,
        program: &IrProgram,
        ctx: &RunContext,
        inputs: &[(String, TypedValue)],
        tracer: &Mutex<Tracer>,
        error_context: &ErrorContext,
    ) -> Result<TypedValue, RuntimeError> {
        let tool_name = step.config["tool"].as_str().unwrap_or_default().to_string();
        let declaration = program
            .declarations
            .tools
            .get(&tool_name)
            .cloned()
            .ok_or_else(|| RuntimeError::Runtime {
                message: format!("step uses undeclared tool '{}'", tool_name),
                context: error_context.clone(),
            })?;

        let mut argument = step.config["argument"].as_str().unwrap_or_default().to_string();
        if argument.is_empty() {
            if let Some((_, first)) = inputs.first() {
                argument = match &first.value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
            }
        }
        // Literal arguments may reference a flow parameter by name.
        if let Some(bound) = ctx.arguments.get(&argument) {
            argument = bound.clone();
        }

        {
            let mut t = tracer.lock().unwrap_or_else(|e| e.into_inner());
            t.start_span(format!("tool:{}", tool_name));
            t.emit(
                TraceEventKind::ToolCallStart,
                Some(&step.id),
                json!({"tool": tool_name, "argument": argument}),
            );
        }

        let dispatched = self
            .tools
            .dispatch(&tool_name, &declaration, &argument, error_context.clone())
            .await;

        {
            let mut t = tracer.lock().unwrap_or_else(|e| e.into_inner());
            match &dispatched {
                Ok(result) => t.emit(
                    TraceEventKind::ToolCallEnd,
                    Some(&step.id),
                    json!({"tool": tool_name, "ok": result.ok, "metadata": result.metadata}),
                ),
                Err(err) => t.emit(
                    TraceEventKind::ToolCallEnd,
                    Some(&step.id),
                    json!({"tool": tool_name, "ok": false, "code": err.code()}),
                ),
            }
            t.end_span();
        }

        let result = dispatched?;
        if !result.ok {
            return Err(RuntimeError::Runtime {
                message: format!(
                    "tool '{}' failed: {}",
                    tool_name,
                    result.error.as_deref().unwrap_or("unknown error")
                ),
                context: error_context.clone(),
            });
        }
        Ok(TypedValue::new(result.value, None, 1.0))
    }

    async fn remember_step(
        &self,
        step: &IrStep,
        inputs: &[(String, TypedValue)],
        error_context: &ErrorContext,
    ) -> Result<TypedValue, RuntimeError> {
        let expression = step.config["expression"].as_str().unwrap_or_default();
        let memory = step.config["memory"].as_str().unwrap_or_default();
        let value = inputs
            .first()
            .map(|(_, v)| v.value.clone())
            .ok_or_else(|| RuntimeError::Runtime {
                message: format!("remember has no value to store for '{}'", expression),
                context: error_context.clone(),
            })?;
        let entry = self.memory.store(expression, value, Some(memory)).await;
        Ok(TypedValue::new(json!({"stored": entry.key, "memory": memory}), None, 1.0))
    }

    async fn recall_step(&self, step: &IrStep) -> Result<TypedValue, RuntimeError> {
        let query = step.config["query"].as_str().unwrap_or_default();
        let memory = step.config["memory"].as_str().unwrap_or_default();
        let hits = self.memory.retrieve(query, 5, Some(memory)).await;
        let values: Vec<serde_json::Value> = hits
            .iter()
            .map(|h| json!({"key": h.key, "value": h.value, "score": h.score}))
            .collect();
        Ok(TypedValue::new(json!(values), None, 1.0))
    }

    /// A validate step reached in DAG order re-checks its (already gated)
    /// target and records the verdict.
    async fn validate_step(
        &self,
        step: &IrStep,
        program: &IrProgram,
        ctx: &RunContext,
        inputs: &[(String, TypedValue)],
        tracer: &Mutex<Tracer>,
        error_context: &ErrorContext,
    ) -> Result<TypedValue, RuntimeError> {
        let schema = step.config["schema"].as_str().unwrap_or_default().to_string();
        let target = inputs
            .first()
            .map(|(_, v)| v.clone())
            .or_else(|| ctx.last_output().cloned())
            .ok_or_else(|| RuntimeError::Runtime {
                message: "validate gate has no target output".to_string(),
                context: error_context.clone(),
            })?;

        let gate = Gate {
            schema: schema.clone(),
            rules: step.config["rules"].as_array().cloned().unwrap_or_default(),
            refine: None,
        };
        self.apply_gate(&gate, &target, program, tracer, error_context, &step.id)?;

        {
            let mut t = tracer.lock().unwrap_or_else(|e| e.into_inner());
            t.emit(
                TraceEventKind::ValidationPass,
                Some(&step.id),
                json!({"schema": schema}),
            );
        }
        Ok(TypedValue::new(
            json!({"validated": true, "schema": schema}),
            None,
            target.confidence,
        ))
    }

    fn apply_gate(
        &self,
        gate: &Gate,
        target: &TypedValue,
        program: &IrProgram,
        tracer: &Mutex<Tracer>,
        error_context: &ErrorContext,
        step_id: &str,
    ) -> Result<(), RuntimeError> {
        for rule in &gate.rules {
            let condition = rule["condition"].as_str().unwrap_or_default();
            let tripped = match condition {
                "confidence" => {
                    let op = rule["op"].as_str().unwrap_or("<");
                    let bound: f64 = rule["value"]
                        .as_str()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0.0);
                    compare(target.confidence, op, bound)
                }
                "structural_mismatch" => {
                    let spec = ValidationSpec {
                        expected_type: Some(TypeRef::plain(&gate.schema)),
                        confidence_floor: None,
                        range: None,
                    };
                    !validator::validate(target, &spec, &program.declarations.types).is_valid
                }
                _ => false,
            };
            if !tripped {
                continue;
            }

            let action = &rule["action"];
            match action["action"].as_str().unwrap_or("raise") {
                "pass" => {}
                "warn" => {
                    let mut t = tracer.lock().unwrap_or_else(|e| e.into_inner());
                    t.emit(
                        TraceEventKind::ValidationFail,
                        Some(step_id),
                        json!({
                            "condition": condition,
                            "severity": "warning",
                            "message": action["message"],
                        }),
                    );
                }
                // refine and raise both reject the output; refine failures
                // are refinable and picked up by the step's plan.
                _ => {
                    {
                        let mut t = tracer.lock().unwrap_or_else(|e| e.into_inner());
                        t.emit(
                            TraceEventKind::ValidationFail,
                            Some(step_id),
                            json!({"condition": condition, "schema": gate.schema}),
                        );
                    }
                    return Err(RuntimeError::Validation {
                        message: format!(
                            "validate rule tripped: {} (confidence {:.2})",
                            condition, target.confidence
                        ),
                        context: error_context
                            .clone()
                            .with_details(target.value.to_string()),
                    });
                }
            }
        }
        Ok(())
    }

    /// A conditional evaluates its comparison against the referenced
    /// confidence and executes exactly one branch.
    #[allow(clippy::too_many_arguments)]
    async fn conditional_step(
        &self,
        step: &IrStep,
        program: &IrProgram,
        entry: &Entrypoint,
        ctx: &RunContext,
        anchors: &[BoundAnchor],
        gates: &HashMap<String, Gate>,
        tracer: &Mutex<Tracer>,
        tokens_used: &Mutex<u64>,
        error_context: &ErrorContext,
    ) -> Result<TypedValue, RuntimeError> {
        let condition = step.config["condition"].as_str().unwrap_or("confidence");
        let observed = if let Some(head) = condition.strip_suffix(".confidence") {
            ctx.output_by_name(head).map(|v| v.confidence)
        } else if condition == "confidence" {
            ctx.last_output().map(|v| v.confidence)
        } else {
            ctx.output_by_name(condition.split('.').next().unwrap_or(condition))
                .map(|v| v.confidence)
        }
        .unwrap_or(1.0);

        let taken = match (step.config["op"].as_str(), step.config["value"].as_str()) {
            (Some(op), Some(value)) => {
                let bound: f64 = value.parse().unwrap_or(0.0);
                compare(observed, op, bound)
            }
            _ => observed > 0.0,
        };

        let branch = if taken {
            &step.config["then"]
        } else {
            &step.config["else"]
        };
        if branch.is_null() {
            return Ok(TypedValue::new(
                json!({"condition": condition, "taken": taken, "branch": "none"}),
                None,
                observed,
            ));
        }

        let _ = error_context;
        let embedded = embedded_to_step(step, branch, ctx);
        self.attempt_step(
            &embedded,
            program,
            entry,
            ctx,
            anchors,
            gates,
            tracer,
            tokens_used,
            None,
        )
        .await
    }
}

// ──────────────────────────────────────────────
// Free helpers
// ──────────────────────────────────────────────

fn compare(observed: f64, op: &str, bound: f64) -> bool {
    match op {
        "<" => observed < bound,
        ">" => observed > bound,
        "<=" => observed <= bound,
        ">=" => observed >= bound,
        "==" => (observed - bound).abs() < f64::EPSILON,
        "!=" => (observed - bound).abs() >= f64::EPSILON,
        _ => false,
    }
}

fn collect_gates(flow: &IrFlow) -> HashMap<String, Gate> {
    let mut gates = HashMap::new();
    for step in &flow.steps {
        if step.kind != StepKind::Validate {
            continue;
        }
        let target = step.config["target"]
            .as_str()
            .unwrap_or_default()
            .split('.')
            .next()
            .unwrap_or_default()
            .to_string();
        let rules = step.config["rules"].as_array().cloned().unwrap_or_default();

        // The gate's refine plan: an explicit refine block attached to the
        // validate step, else the first refine-action rule's parameters.
        let mut refine = None;
        if !step.config["refine"].is_null() {
            refine = Some(RefinePlan::from_config(&step.config));
        } else if let Some(rule) = rules
            .iter()
            .find(|r| r["action"]["action"].as_str() == Some("refine"))
        {
            refine = Some(RefinePlan::from_rule_params(&rule["action"]["params"]));
        }

        gates.insert(
            target,
            Gate {
                schema: step.config["schema"].as_str().unwrap_or_default().to_string(),
                rules,
                refine,
            },
        );
    }
    gates
}

fn input_type_names(step: &IrStep, ctx: &RunContext) -> Vec<String> {
    step.inputs
        .iter()
        .map(|input| match input {
            IrInput::Param { name } => format!("param:{}", name),
            IrInput::Step { id, name } => ctx
                .output(id)
                .and_then(|v| v.type_name.clone())
                .unwrap_or_else(|| format!("step:{}", name)),
        })
        .collect()
}

fn reasoning_of(step: &IrStep, value: &TypedValue) -> Option<String> {
    if step.kind == StepKind::Reason {
        match &value.value {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    } else {
        None
    }
}

/// System instructions derived from persona + context + anchors.
fn system_prompt(ctx: &RunContext) -> String {
    let mut out = String::new();
    if let Some(p) = &ctx.persona {
        if let Some(name) = &ctx.persona_name {
            out.push_str(&format!("You are {}.", name));
        }
        if !p.domain.is_empty() {
            out.push_str(&format!(" Your domains of expertise: {}.", p.domain.join(", ")));
        }
        if let Some(tone) = &p.tone {
            out.push_str(&format!(" Respond in a {} tone.", tone));
        }
        if let Some(language) = &p.language {
            out.push_str(&format!(" Respond in language '{}'.", language));
        }
        if p.cite_sources == Some(true) {
            out.push_str(" Cite sources for every factual claim.");
        }
        if !p.refuse_if.is_empty() {
            out.push_str(&format!(
                " Refuse to answer when the request involves: {}.",
                p.refuse_if.join(", ")
            ));
        }
        if let Some(description) = &p.description {
            out.push_str(&format!(" {}", description));
        }
    }
    if let Some(c) = &ctx.context {
        if let Some(depth) = &c.depth {
            out.push_str(&format!(" Analysis depth: {}.", depth));
        }
        if let Some(language) = &c.language {
            out.push_str(&format!(" Session language: '{}'.", language));
        }
    }
    for (name, anchor) in &ctx.anchors {
        out.push_str(&format!(" Constraint '{}':", name));
        if let Some(require) = &anchor.require {
            out.push_str(&format!(" require {};", require));
        }
        if !anchor.reject.is_empty() {
            out.push_str(&format!(" never produce {};", anchor.reject.join(", ")));
        }
        if let Some(unknown) = &anchor.unknown_response {
            out.push_str(&format!(" when unsure respond \"{}\";", unknown));
        }
    }
    if out.is_empty() {
        out.push_str("You are a careful assistant executing a typed cognitive plan.");
    }
    out
}

/// User content derived from the step and only its declared inputs.
fn user_prompt(step: &IrStep, inputs: &[(String, TypedValue)]) -> String {
    let mut out = String::new();
    match step.kind {
        StepKind::Probe => {
            let fields: Vec<String> = step.config["fields"]
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            out.push_str(&format!(
                "Extract exactly these fields from the input: {}.",
                fields.join(", ")
            ));
        }
        StepKind::Reason => {
            let reason = &step.config["reason"];
            if let Some(about) = reason["about"].as_str() {
                out.push_str(&format!("Reason carefully about {}.", about));
            }
            if let Some(depth) = reason["depth"].as_u64() {
                out.push_str(&format!(" Use {} distinct reasoning steps.", depth));
            }
            if reason["show_work"].as_bool() == Some(true)
                || reason["chain_of_thought"].as_bool() == Some(true)
            {
                out.push_str(" Show your reasoning explicitly.");
            }
            if let Some(ask) = reason["ask"].as_str() {
                out.push_str(&format!(" {}", ask));
            }
        }
        StepKind::Weave => {
            let weave = &step.config["weave"];
            out.push_str("Synthesize the inputs into one coherent result.");
            if let Some(format) = weave["format"].as_str() {
                out.push_str(&format!(" Output format: {}.", format));
            }
            if let Some(priority) = weave["priority"].as_array() {
                if !priority.is_empty() {
                    let order: Vec<String> = priority
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect();
                    out.push_str(&format!(" Priority order: {}.", order.join(", ")));
                }
            }
            if let Some(style) = weave["style"].as_str() {
                out.push_str(&format!(" Style: {}.", style));
            }
        }
        _ => {}
    }
    if let Some(ask) = step.config["ask"].as_str() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(ask);
    }
    for (name, value) in inputs {
        out.push_str(&format!("\n\n{}:\n{}", name, value.value));
    }
    out
}

/// Output schema derived from the declared step output type.
fn output_schema(
    output_type: Option<&TypeRef>,
    types: &std::collections::BTreeMap<String, TypeDecl>,
) -> serde_json::Value {
    let Some(output_type) = output_type else {
        return serde_json::Value::Null;
    };
    if let Some(decl) = types.get(&output_type.name) {
        if !decl.fields.is_empty() {
            let mut properties = serde_json::Map::new();
            let mut required = Vec::new();
            for field in &decl.fields {
                properties.insert(
                    field.name.clone(),
                    json!({"semantic_type": field.type_ref.name}),
                );
                if !field.type_ref.optional {
                    required.push(field.name.clone());
                }
            }
            return json!({
                "type": "object",
                "semantic_type": output_type.name,
                "properties": properties,
                "required": required,
            });
        }
        if let Some([lo, hi]) = decl.range {
            return json!({
                "type": "number",
                "semantic_type": output_type.name,
                "minimum": lo,
                "maximum": hi,
            });
        }
    }
    json!({"semantic_type": output_type.name, "optional": output_type.optional})
}

fn embedded_to_step(parent: &IrStep, branch: &serde_json::Value, ctx: &RunContext) -> IrStep {
    let name = branch["name"].as_str().unwrap_or("branch").to_string();
    let refs: Vec<String> = branch["refs"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    let inputs = refs
        .iter()
        .map(|reference| {
            let head = reference.split('.').next().unwrap_or(reference).to_string();
            match ctx.output_by_name(&head) {
                Some(_) => IrInput::Step {
                    // The executor reads embedded inputs by name.
                    id: head.clone(),
                    name: head,
                },
                None => IrInput::Param { name: head },
            }
        })
        .collect();

    IrStep {
        id: format!("{}/{}", parent.id, name),
        kind: serde_json::from_value(branch["kind"].clone()).unwrap_or(StepKind::Ask),
        name,
        inputs,
        output_type: serde_json::from_value(branch["output_type"].clone()).ok(),
        config: branch["config"].clone(),
        depends_on: Vec::new(),
        line: parent.line,
        column: parent.column,
    }
}
