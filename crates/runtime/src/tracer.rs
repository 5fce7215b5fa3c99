//! Structured execution trace: an append-only span tree of semantic events.
//!
//! Fourteen event kinds cover the flow lifecycle, anchor enforcement,
//! validation, retries, and tool calls. Events carry RFC 3339 timestamps
//! and parent-span ids matching nesting (flow → step → retry attempt →
//! tool call). The tracer is an observer: it never fails and never
//! participates in control flow.

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventKind {
    FlowStart,
    FlowEnd,
    StepStart,
    StepEnd,
    AnchorCheck,
    AnchorPass,
    AnchorBreach,
    ToolCallStart,
    ToolCallEnd,
    ValidationPass,
    ValidationFail,
    RefineAttempt,
    Retry,
    FatalError,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub kind: TraceEventKind,
    pub timestamp: String,
    pub span_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceSpan {
    pub id: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub events: Vec<TraceEvent>,
    pub children: Vec<TraceSpan>,
}

/// Per-step record in the finalized trace.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StepRecord {
    pub step_id: String,
    pub step_name: String,
    pub input_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub anchors_checked: Vec<String>,
    pub anchor_violations: Vec<String>,
    pub tokens_used: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_trace: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionTrace {
    pub trace_id: String,
    pub program: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub status: String,
    pub steps: Vec<StepRecord>,
    pub spans: Vec<TraceSpan>,
}

impl ExecutionTrace {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("trace serialization is infallible")
    }

    /// All events across every span, in emission order.
    pub fn events(&self) -> Vec<&TraceEvent> {
        fn walk<'a>(spans: &'a [TraceSpan], out: &mut Vec<&'a TraceEvent>) {
            for span in spans {
                out.extend(span.events.iter());
                walk(&span.children, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.spans, &mut out);
        out.sort_by_key(|e| e.span_id);
        out
    }

    pub fn events_of_kind(&self, kind: TraceEventKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// The recorder. Maintains a stack of open spans; events append to the
/// innermost one. Events emitted with no open span are dropped -- the
/// tracer observes, it never raises.
pub struct Tracer {
    trace_id: String,
    program: String,
    persona: Option<String>,
    started_at: String,
    next_span_id: u64,
    open: Vec<TraceSpan>,
    closed_roots: Vec<TraceSpan>,
    steps: Vec<StepRecord>,
}

impl Tracer {
    pub fn new(program: impl Into<String>, persona: Option<String>) -> Self {
        Tracer {
            trace_id: uuid::Uuid::new_v4().to_string(),
            program: program.into(),
            persona,
            started_at: now_rfc3339(),
            next_span_id: 1,
            open: Vec::new(),
            closed_roots: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn start_span(&mut self, name: impl Into<String>) -> u64 {
        let id = self.next_span_id;
        self.next_span_id += 1;
        let parent_id = self.open.last().map(|s| s.id);
        self.open.push(TraceSpan {
            id,
            name: name.into(),
            parent_id,
            started_at: now_rfc3339(),
            completed_at: None,
            events: Vec::new(),
            children: Vec::new(),
        });
        id
    }

    pub fn end_span(&mut self) {
        if let Some(mut span) = self.open.pop() {
            span.completed_at = Some(now_rfc3339());
            match self.open.last_mut() {
                Some(parent) => parent.children.push(span),
                None => self.closed_roots.push(span),
            }
        }
    }

    pub fn emit(&mut self, kind: TraceEventKind, step_id: Option<&str>, payload: serde_json::Value) {
        let (span_id, parent_span_id) = match self.open.last() {
            Some(span) => (span.id, span.parent_id),
            None => return,
        };
        let event = TraceEvent {
            kind,
            timestamp: now_rfc3339(),
            span_id,
            parent_span_id,
            step_id: step_id.map(|s| s.to_string()),
            payload,
        };
        if let Some(span) = self.open.last_mut() {
            span.events.push(event);
        }
    }

    pub fn record_step(&mut self, record: StepRecord) {
        self.steps.push(record);
    }

    /// Close any spans still open and return the finished trace.
    pub fn finalize(mut self, status: impl Into<String>) -> ExecutionTrace {
        while !self.open.is_empty() {
            self.end_span();
        }
        ExecutionTrace {
            trace_id: self.trace_id,
            program: self.program,
            persona: self.persona,
            started_at: self.started_at,
            completed_at: Some(now_rfc3339()),
            status: status.into(),
            steps: self.steps,
            spans: self.closed_roots,
        }
    }
}
