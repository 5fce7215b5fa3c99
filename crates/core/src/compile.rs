//! Compile orchestrator: source text → IR, calling each stage in order.
//!
//! Data flows strictly left to right: text → tokens → AST → diagnostics →
//! IR. Lexical and parse errors stop at the first occurrence; the checker's
//! diagnostics are returned as one ordered batch.

use axon_interchange::IrProgram;

use crate::error::CompileError;
use crate::{irgen, lexer, parser, pass1_collect, pass2_check};

/// Compile AXON source to its intermediate representation.
pub fn compile(source: &str) -> Result<IrProgram, CompileError> {
    let tokens = lexer::lex(source)?;
    let program = parser::parse(&tokens)?;

    let (symbols, mut diagnostics) = pass1_collect::collect(&program);
    diagnostics.extend(pass2_check::check(&program, &symbols));
    diagnostics.sort_by_key(|d| (d.line, d.column));
    if !diagnostics.is_empty() {
        return Err(CompileError::Check(diagnostics));
    }

    let ir = irgen::generate(&program, source)?;
    Ok(ir)
}

/// Compile to the canonical interchange JSON value.
pub fn compile_to_json(source: &str) -> Result<serde_json::Value, CompileError> {
    let ir = compile(source)?;
    Ok(serde_json::to_value(&ir).expect("IR serialization is infallible"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiagnosticKind;

    #[test]
    fn lex_error_stops_the_pipeline() {
        let err = compile("flow F @").unwrap_err();
        assert!(matches!(err, CompileError::Lex(_)));
    }

    #[test]
    fn parse_error_stops_the_pipeline() {
        let err = compile("flow F() { step }").unwrap_err();
        assert!(matches!(err, CompileError::Parse(_)));
    }

    #[test]
    fn check_errors_are_batched() {
        let err = compile(
            "persona P { domain: [] }\nflow F() { step S { ask: \"x\" output: Ghost } }\nrun F() as Q",
        )
        .unwrap_err();
        match err {
            CompileError::Check(diags) => {
                assert!(diags.len() >= 3, "{:?}", diags);
                assert!(diags.iter().any(|d| d.kind == DiagnosticKind::UnknownType));
                assert!(diags.iter().any(|d| d.kind == DiagnosticKind::UnknownSymbol));
            }
            other => panic!("expected Check, got {:?}", other),
        }
    }

    #[test]
    fn successful_compile_produces_versioned_json() {
        let json = compile_to_json(
            "flow F() -> String { step S { ask: \"hi\" output: String } }\nrun F()",
        )
        .unwrap();
        assert_eq!(json["axon_ir_version"], "1.0");
        assert!(json["program_id"].is_string());
        assert!(json["flows"]["F"]["steps"].is_array());
    }
}
