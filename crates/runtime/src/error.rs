//! Runtime error taxonomy with stable user-visible codes.
//!
//! Six kinds, AXON_001 through AXON_006. Every error carries an
//! `ErrorContext` naming the step so diagnostics and the trace agree on
//! what failed.

use std::fmt;

/// Structured context attached to every runtime error.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorContext {
    pub fn for_step(flow: &str, step_id: &str, step_name: &str) -> Self {
        ErrorContext {
            flow: Some(flow.to_string()),
            step_id: Some(step_id.to_string()),
            step_name: Some(step_name.to_string()),
            attempt: None,
            details: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// Output does not conform to the declared semantic type (AXON_001).
    Validation { message: String, context: ErrorContext },
    /// Confidence fell below the configured floor (AXON_002).
    Confidence { message: String, context: ErrorContext },
    /// A hard constraint anchor was violated (AXON_003).
    AnchorBreach {
        anchor: String,
        message: String,
        context: ErrorContext,
    },
    /// All refine attempts were used without success (AXON_004).
    RefineExhausted {
        attempts: u32,
        message: String,
        context: ErrorContext,
    },
    /// The model backend or a tool failed (AXON_005).
    Runtime { message: String, context: ErrorContext },
    /// A step or tool exceeded its time budget (AXON_006).
    Timeout {
        timeout_ms: u64,
        message: String,
        context: ErrorContext,
    },
}

impl RuntimeError {
    /// The stable user-visible code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            RuntimeError::Validation { .. } => "AXON_001",
            RuntimeError::Confidence { .. } => "AXON_002",
            RuntimeError::AnchorBreach { .. } => "AXON_003",
            RuntimeError::RefineExhausted { .. } => "AXON_004",
            RuntimeError::Runtime { .. } => "AXON_005",
            RuntimeError::Timeout { .. } => "AXON_006",
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            RuntimeError::Validation { context, .. }
            | RuntimeError::Confidence { context, .. }
            | RuntimeError::AnchorBreach { context, .. }
            | RuntimeError::RefineExhausted { context, .. }
            | RuntimeError::Runtime { context, .. }
            | RuntimeError::Timeout { context, .. } => context,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RuntimeError::Validation { message, .. }
            | RuntimeError::Confidence { message, .. }
            | RuntimeError::AnchorBreach { message, .. }
            | RuntimeError::RefineExhausted { message, .. }
            | RuntimeError::Runtime { message, .. }
            | RuntimeError::Timeout { message, .. } => message,
        }
    }

    /// Recoverable through `refine`; everything else propagates.
    pub fn is_refinable(&self) -> bool {
        matches!(
            self,
            RuntimeError::Validation { .. } | RuntimeError::Confidence { .. }
        )
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.code())?;
        match self {
            RuntimeError::AnchorBreach { anchor, message, .. } => {
                write!(f, "anchor '{}' breached: {}", anchor, message)?;
            }
            RuntimeError::RefineExhausted { attempts, message, .. } => {
                write!(f, "refine exhausted after {} attempt(s): {}", attempts, message)?;
            }
            RuntimeError::Timeout { timeout_ms, message, .. } => {
                write!(f, "timed out after {}ms: {}", timeout_ms, message)?;
            }
            other => {
                write!(f, "{}", other.message())?;
            }
        }
        let ctx = self.context();
        if let Some(step) = &ctx.step_name {
            write!(f, " (step: {})", step)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let ctx = ErrorContext::default();
        let cases = [
            (
                RuntimeError::Validation {
                    message: "m".to_string(),
                    context: ctx.clone(),
                },
                "AXON_001",
            ),
            (
                RuntimeError::Confidence {
                    message: "m".to_string(),
                    context: ctx.clone(),
                },
                "AXON_002",
            ),
            (
                RuntimeError::AnchorBreach {
                    anchor: "A".to_string(),
                    message: "m".to_string(),
                    context: ctx.clone(),
                },
                "AXON_003",
            ),
            (
                RuntimeError::RefineExhausted {
                    attempts: 3,
                    message: "m".to_string(),
                    context: ctx.clone(),
                },
                "AXON_004",
            ),
            (
                RuntimeError::Runtime {
                    message: "m".to_string(),
                    context: ctx.clone(),
                },
                "AXON_005",
            ),
            (
                RuntimeError::Timeout {
                    timeout_ms: 10,
                    message: "m".to_string(),
                    context: ctx,
                },
                "AXON_006",
            ),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code);
            assert!(err.to_string().contains(code));
        }
    }

    #[test]
    fn only_validation_and_confidence_are_refinable() {
        let ctx = ErrorContext::default();
        assert!(RuntimeError::Validation {
            message: String::new(),
            context: ctx.clone()
        }
        .is_refinable());
        assert!(!RuntimeError::Timeout {
            timeout_ms: 1,
            message: String::new(),
            context: ctx
        }
        .is_refinable());
    }

    #[test]
    fn display_names_the_step() {
        let err = RuntimeError::Timeout {
            timeout_ms: 1000,
            message: "tool 'WebSearch' exceeded its budget".to_string(),
            context: ErrorContext::for_step("F", "id-1", "search"),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("AXON_006"));
        assert!(rendered.contains("step: search"));
    }
}
