//! The refine engine: adaptive retry with failure-context injection.
//!
//! Refinement is not a blind retry. Each refining step walks an explicit
//! state machine -- `Fresh → Attempting → Passed | Failed(reason) →
//! Refining(n) → … → Exhausted` -- and every failed attempt's output and
//! rejection reason are handed to the next attempt. Only validation and
//! confidence failures are refinable; other errors propagate immediately.

use std::future::Future;
use std::time::Duration;

use axon_interchange::ViolationAction;

use crate::client::FailureContext;
use crate::context::TypedValue;
use crate::error::{ErrorContext, RuntimeError};
use crate::executor::CancelToken;

const LINEAR_BASE_DELAY_MS: u64 = 1_000;
const EXPONENTIAL_BASE_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 30_000;

/// Backoff between refine attempts. Waiting is cooperative
/// (`tokio::time::sleep`), so the executor stays single-threaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    None,
    Linear(u64),
    Exponential(u64),
}

impl Backoff {
    pub fn parse(name: &str) -> Backoff {
        match name {
            "linear" => Backoff::Linear(LINEAR_BASE_DELAY_MS),
            "exponential" => Backoff::Exponential(EXPONENTIAL_BASE_DELAY_MS),
            _ => Backoff::None,
        }
    }

    /// Delay after the given 1-based failed attempt.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let delay = match self {
            Backoff::None => 0,
            Backoff::Linear(base) => base.saturating_mul(attempt as u64),
            Backoff::Exponential(base) => base.saturating_mul(1u64 << attempt.min(16)),
        };
        delay.min(MAX_DELAY_MS)
    }
}

/// What to do when every attempt has been spent.
#[derive(Debug, Clone, PartialEq)]
pub enum Exhaustion {
    Raise,
    Escalate,
    Fallback(String),
}

/// Runtime configuration of a `refine { … }` block.
#[derive(Debug, Clone, PartialEq)]
pub struct RefinePlan {
    pub max_attempts: u32,
    pub pass_failure_context: bool,
    pub backoff: Backoff,
    pub on_exhaustion: Exhaustion,
}

impl Default for RefinePlan {
    fn default() -> Self {
        RefinePlan {
            max_attempts: 1,
            pass_failure_context: true,
            backoff: Backoff::None,
            on_exhaustion: Exhaustion::Raise,
        }
    }
}

impl RefinePlan {
    /// Parse from the IR step's `refine` config blob. Absent → single
    /// attempt, no refinement.
    pub fn from_config(config: &serde_json::Value) -> RefinePlan {
        let refine = &config["refine"];
        if refine.is_null() {
            return RefinePlan::default();
        }
        let on_exhaustion = match serde_json::from_value::<ViolationAction>(
            refine["on_exhaustion"].clone(),
        ) {
            Ok(ViolationAction::Escalate) => Exhaustion::Escalate,
            Ok(ViolationAction::Fallback { value }) => Exhaustion::Fallback(value),
            _ => Exhaustion::Raise,
        };
        RefinePlan {
            max_attempts: refine["max_attempts"].as_u64().unwrap_or(3).max(1) as u32,
            pass_failure_context: refine["pass_failure_context"].as_bool().unwrap_or(true),
            backoff: Backoff::parse(refine["backoff"].as_str().unwrap_or("none")),
            on_exhaustion,
        }
    }

    /// A plan derived from a validate-gate rule: `refine(max_attempts: 2)`.
    pub fn from_rule_params(params: &serde_json::Value) -> RefinePlan {
        RefinePlan {
            max_attempts: params["max_attempts"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .or_else(|| params["max_attempts"].as_u64().map(|v| v as u32))
                .unwrap_or(2)
                .max(1),
            pass_failure_context: params["pass_failure_context"]
                .as_str()
                .map(|s| s == "true")
                .unwrap_or(true),
            backoff: Backoff::parse(params["backoff"].as_str().unwrap_or("none")),
            on_exhaustion: Exhaustion::Raise,
        }
    }
}

/// The per-step refinement state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum StepState {
    Fresh,
    Attempting { attempt: u32 },
    Passed,
    Failed { attempt: u32, reason: String },
    Refining { next_attempt: u32 },
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of driving a step through the machine.
#[derive(Debug)]
pub struct RefineOutcome {
    pub value: TypedValue,
    pub attempts: Vec<AttemptRecord>,
    /// Every state the machine passed through, for tracing.
    pub states: Vec<StepState>,
}

/// Drive one step through its refinement state machine.
///
/// `attempt_fn` receives the failure context of the previous attempt (or
/// `None` on the first) and produces the attempt's result. The `observe`
/// hook fires on each transition so the executor can emit trace events.
pub async fn run_with_refine<F, Fut>(
    plan: &RefinePlan,
    cancel: &CancelToken,
    context: ErrorContext,
    mut attempt_fn: F,
    mut observe: impl FnMut(&StepState),
) -> Result<RefineOutcome, RuntimeError>
where
    F: FnMut(Option<FailureContext>) -> Fut,
    Fut: Future<Output = Result<TypedValue, RuntimeError>>,
{
    let mut states = vec![StepState::Fresh];
    observe(&StepState::Fresh);
    let mut attempts: Vec<AttemptRecord> = Vec::new();
    let mut failure: Option<(TypedValue, String)> = None;

    for attempt in 1..=plan.max_attempts {
        let state = StepState::Attempting { attempt };
        observe(&state);
        states.push(state);

        let carried = if plan.pass_failure_context {
            failure.as_ref().map(|(value, reason)| FailureContext {
                previous_attempt: value.value.clone(),
                why_rejected: reason.clone(),
            })
        } else {
            None
        };

        match attempt_fn(carried).await {
            Ok(value) => {
                attempts.push(AttemptRecord {
                    attempt,
                    success: true,
                    error: None,
                });
                observe(&StepState::Passed);
                states.push(StepState::Passed);
                return Ok(RefineOutcome {
                    value,
                    attempts,
                    states,
                });
            }
            Err(err) if err.is_refinable() && attempt < plan.max_attempts => {
                let reason = err.to_string();
                attempts.push(AttemptRecord {
                    attempt,
                    success: false,
                    error: Some(reason.clone()),
                });
                let failed = StepState::Failed {
                    attempt,
                    reason: reason.clone(),
                };
                observe(&failed);
                states.push(failed);

                // The rejected output itself travels with the reason.
                let rejected = rejected_value(&err);
                failure = Some((rejected, reason));

                let refining = StepState::Refining {
                    next_attempt: attempt + 1,
                };
                observe(&refining);
                states.push(refining);

                let delay = plan.backoff.delay_ms(attempt);
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                if cancel.is_cancelled() {
                    return Err(RuntimeError::Runtime {
                        message: "execution cancelled".to_string(),
                        context,
                    });
                }
            }
            Err(err) if err.is_refinable() => {
                // Final attempt failed: exhausted.
                let reason = err.to_string();
                attempts.push(AttemptRecord {
                    attempt,
                    success: false,
                    error: Some(reason.clone()),
                });
                let failed = StepState::Failed {
                    attempt,
                    reason: reason.clone(),
                };
                observe(&failed);
                states.push(failed);
                observe(&StepState::Exhausted);
                states.push(StepState::Exhausted);

                return match &plan.on_exhaustion {
                    Exhaustion::Fallback(value) => Ok(RefineOutcome {
                        value: TypedValue::text(value.clone(), 1.0),
                        attempts,
                        states,
                    }),
                    Exhaustion::Escalate => Err(RuntimeError::RefineExhausted {
                        attempts: plan.max_attempts,
                        message: format!("escalating: {}", reason),
                        context: context.with_attempt(attempt),
                    }),
                    Exhaustion::Raise => Err(RuntimeError::RefineExhausted {
                        attempts: plan.max_attempts,
                        message: reason,
                        context: context.with_attempt(attempt),
                    }),
                };
            }
            Err(err) => {
                // Not refinable: propagate unchanged.
                attempts.push(AttemptRecord {
                    attempt,
                    success: false,
                    error: Some(err.to_string()),
                });
                return Err(err);
            }
        }
    }

    // Only reachable with max_attempts == 0, which plan parsing clamps away.
    Err(RuntimeError::RefineExhausted {
        attempts: 0,
        message: "no attempts configured".to_string(),
        context,
    })
}

/// The value an error carries for failure-context injection, when any.
fn rejected_value(err: &RuntimeError) -> TypedValue {
    let details = err
        .context()
        .details
        .clone()
        .unwrap_or_else(|| err.message().to_string());
    TypedValue::text(details, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn plan(max_attempts: u32) -> RefinePlan {
        RefinePlan {
            max_attempts,
            ..RefinePlan::default()
        }
    }

    fn validation_error(msg: &str) -> RuntimeError {
        RuntimeError::Validation {
            message: msg.to_string(),
            context: ErrorContext::default(),
        }
    }

    #[tokio::test]
    async fn first_attempt_success_touches_no_refinement() {
        let cancel = CancelToken::new();
        let outcome = run_with_refine(
            &plan(3),
            &cancel,
            ErrorContext::default(),
            |_fc| async { Ok(TypedValue::text("ok", 1.0)) },
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(
            outcome.states,
            vec![
                StepState::Fresh,
                StepState::Attempting { attempt: 1 },
                StepState::Passed
            ]
        );
    }

    #[tokio::test]
    async fn failure_context_reaches_the_second_attempt() {
        let calls = AtomicU32::new(0);
        let cancel = CancelToken::new();
        let outcome = run_with_refine(
            &plan(2),
            &cancel,
            ErrorContext::default(),
            |fc| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        assert!(fc.is_none());
                        Err(validation_error("too vague"))
                    } else {
                        let fc = fc.expect("second attempt must carry failure context");
                        assert!(fc.why_rejected.contains("too vague"));
                        Ok(TypedValue::text("better", 0.95))
                    }
                }
            },
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(outcome.attempts.len(), 2);
        assert!(!outcome.attempts[0].success);
        assert!(outcome.attempts[1].success);
    }

    #[tokio::test]
    async fn exhaustion_raises_axon_004() {
        let cancel = CancelToken::new();
        let err = run_with_refine(
            &plan(2),
            &cancel,
            ErrorContext::default(),
            |_fc| async { Err(validation_error("never good enough")) },
            |_| {},
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "AXON_004");
    }

    #[tokio::test]
    async fn exhaustion_fallback_substitutes_the_safe_value() {
        let cancel = CancelToken::new();
        let mut p = plan(2);
        p.on_exhaustion = Exhaustion::Fallback("n/a".to_string());
        let outcome = run_with_refine(
            &p,
            &cancel,
            ErrorContext::default(),
            |_fc| async { Err(validation_error("nope")) },
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(outcome.value.value, json!("n/a"));
        assert!(outcome.states.contains(&StepState::Exhausted));
    }

    #[tokio::test]
    async fn non_refinable_errors_propagate_immediately() {
        let calls = AtomicU32::new(0);
        let cancel = CancelToken::new();
        let err = run_with_refine(
            &plan(3),
            &cancel,
            ErrorContext::default(),
            |_fc| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(RuntimeError::Timeout {
                        timeout_ms: 5,
                        message: "tool too slow".to_string(),
                        context: ErrorContext::default(),
                    })
                }
            },
            |_| {},
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "AXON_006");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_schedules() {
        assert_eq!(Backoff::None.delay_ms(3), 0);
        assert_eq!(Backoff::parse("linear").delay_ms(2), 2_000);
        assert_eq!(Backoff::parse("exponential").delay_ms(1), 1_000);
        assert_eq!(Backoff::parse("exponential").delay_ms(2), 2_000);
        // Capped.
        assert_eq!(Backoff::parse("exponential").delay_ms(16), MAX_DELAY_MS);
    }

    #[test]
    fn plan_parses_from_config() {
        let config = json!({
            "refine": {
                "max_attempts": 2,
                "pass_failure_context": true,
                "backoff": "none",
                "on_exhaustion": { "action": "escalate" }
            }
        });
        let plan = RefinePlan::from_config(&config);
        assert_eq!(plan.max_attempts, 2);
        assert_eq!(plan.on_exhaustion, Exhaustion::Escalate);

        let absent = RefinePlan::from_config(&json!({}));
        assert_eq!(absent.max_attempts, 1);
    }

    #[test]
    fn plan_parses_from_gate_rule_params() {
        let plan = RefinePlan::from_rule_params(&json!({"max_attempts": "2"}));
        assert_eq!(plan.max_attempts, 2);
        assert!(plan.pass_failure_context);
    }
}
