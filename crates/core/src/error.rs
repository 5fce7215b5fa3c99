//! Compile-time error types: lexical, parse, type diagnostics, IR errors.
//!
//! Lexical and parse errors stop the pipeline at the first occurrence; type
//! diagnostics accumulate so a user sees every front-end issue at once.

use std::fmt;

// ──────────────────────────────────────────────
// Lexical
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl LexError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        LexError {
            message: message.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lexical error [line {}, col {}]: {}",
            self.line, self.column, self.message
        )
    }
}

impl std::error::Error for LexError {}

// ──────────────────────────────────────────────
// Parse
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub expected: String,
    pub found: String,
    pub line: u32,
    pub column: u32,
}

impl ParseError {
    pub fn new(
        expected: impl Into<String>,
        found: impl Into<String>,
        line: u32,
        column: u32,
    ) -> Self {
        ParseError {
            expected: expected.into(),
            found: found.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parse error [line {}, col {}]: expected {}, found {}",
            self.line, self.column, self.expected, self.found
        )
    }
}

impl std::error::Error for ParseError {}

// ──────────────────────────────────────────────
// Type diagnostics
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    UnknownType,
    UnknownSymbol,
    IncompatibleAssignment,
    RangeViolation,
    DuplicateDeclaration,
    UncertaintyPropagationRequired,
    InvalidPredicate,
    CyclicType,
    InvalidValue,
    MissingField,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::UnknownType => "UnknownType",
            DiagnosticKind::UnknownSymbol => "UnknownSymbol",
            DiagnosticKind::IncompatibleAssignment => "IncompatibleAssignment",
            DiagnosticKind::RangeViolation => "RangeViolation",
            DiagnosticKind::DuplicateDeclaration => "DuplicateDeclaration",
            DiagnosticKind::UncertaintyPropagationRequired => "UncertaintyPropagationRequired",
            DiagnosticKind::InvalidPredicate => "InvalidPredicate",
            DiagnosticKind::CyclicType => "CyclicType",
            DiagnosticKind::InvalidValue => "InvalidValue",
            DiagnosticKind::MissingField => "MissingField",
        };
        f.write_str(name)
    }
}

/// A single type-checking diagnostic with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>, line: u32, column: u32) -> Self {
        Diagnostic {
            kind,
            message: message.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Type Error: {} [line {}, col {}]: {}",
            self.kind, self.line, self.column, self.message
        )
    }
}

// ──────────────────────────────────────────────
// IR
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrError {
    /// The step DAG of `flow` contains a cycle through the named step ids.
    CyclicDependency { flow: String, step_ids: Vec<String> },
    /// The program has no `run` statement.
    NoEntrypoint,
    /// The program has more than one `run` statement.
    MultipleEntrypoints { line: u32, column: u32 },
}

impl fmt::Display for IrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrError::CyclicDependency { flow, step_ids } => {
                write!(
                    f,
                    "cyclic step dependency in flow '{}' involving steps: {}",
                    flow,
                    step_ids.join(", ")
                )
            }
            IrError::NoEntrypoint => write!(f, "program has no run statement"),
            IrError::MultipleEntrypoints { line, column } => {
                write!(
                    f,
                    "program has more than one run statement [line {}, col {}]",
                    line, column
                )
            }
        }
    }
}

impl std::error::Error for IrError {}

// ──────────────────────────────────────────────
// Combined compile error
// ──────────────────────────────────────────────

/// Everything `compile()` can fail with.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    Lex(LexError),
    Parse(ParseError),
    /// The full ordered diagnostic batch from the type checker.
    Check(Vec<Diagnostic>),
    Ir(IrError),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Lex(e) => e.fmt(f),
            CompileError::Parse(e) => e.fmt(f),
            CompileError::Check(diags) => {
                for (i, d) in diags.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    d.fmt(f)?;
                }
                Ok(())
            }
            CompileError::Ir(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError::Lex(e)
    }
}

impl From<ParseError> for CompileError {
    fn from(e: ParseError) -> Self {
        CompileError::Parse(e)
    }
}

impl From<IrError> for CompileError {
    fn from(e: IrError) -> Self {
        CompileError::Ir(e)
    }
}
