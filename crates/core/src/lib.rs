//! axon-core: AXON language front-end.
//!
//! Provides the pipeline from `.axon` source text to the backend-agnostic
//! intermediate representation:
//!
//! text → [`lexer`] → [`parser`] → [`pass1_collect`] → [`pass2_check`] →
//! [`irgen`] → [`axon_interchange::IrProgram`]
//!
//! Key entry points are re-exported at the crate root:
//!
//! - [`compile()`] / [`compile_to_json()`] -- run the full pipeline
//! - [`lexer::lex`], [`parser::parse`] -- individual stages
//! - [`printer::print_program`] -- canonical source rendering
//! - [`CompileError`], [`Diagnostic`] -- error types

pub mod ast;
pub mod compile;
pub mod error;
pub mod irgen;
pub mod lexer;
pub mod parser;
pub mod pass1_collect;
pub mod pass2_check;
pub mod printer;
pub mod semtype;
pub mod token;

pub use compile::{compile, compile_to_json};
pub use error::{CompileError, Diagnostic, DiagnosticKind, IrError, LexError, ParseError};
pub use printer::print_program;
pub use semtype::{assignable, Assignability, Epistemic, SemType};
pub use token::{Token, TokenKind};
