//! axon-runtime: executes compiled AXON plans against an abstract LLM
//! backend.
//!
//! The executor consumes interchange IR (not source), walks the step DAG
//! in topological order, enforces anchors by conjunction, validates
//! outputs semantically, retries with failure context via the refine
//! engine, dispatches tools through a config-keyed registry, serves
//! `remember`/`recall` from a memory store, and emits a structured
//! span-tree trace.
//!
//! Everything I/O-shaped is injected: the model client, tool registry,
//! memory store, and semantic judge are constructor dependencies with
//! explicit lifetimes -- no process-wide singletons.

pub mod anchor;
pub mod client;
pub mod context;
pub mod error;
pub mod executor;
pub mod memory;
pub mod retry;
pub mod tools;
pub mod tracer;
pub mod validator;

pub use anchor::{BoundAnchor, PassThroughJudge, SemanticJudge};
pub use client::{
    FailureContext, MockModelClient, ModelClient, ModelError, ModelRequest, ModelResponse,
    TokenUsage,
};
pub use context::{ContextSnapshot, RunContext, TypedValue};
pub use error::{ErrorContext, RuntimeError};
pub use executor::{CancelToken, Executor, RunOutcome};
pub use memory::{InMemoryStore, MemoryEntry, MemoryStore};
pub use retry::{Backoff, RefinePlan, StepState};
pub use tools::{RegistryMode, Tool, ToolRegistry, ToolResult};
pub use tracer::{ExecutionTrace, StepRecord, TraceEvent, TraceEventKind, Tracer};

#[cfg(feature = "anthropic")]
pub use client::AnthropicClient;
