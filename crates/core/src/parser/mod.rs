//! Recursive-descent parser: token stream → cognitive AST.
//!
//! One function per grammar production, single-token lookahead, no error
//! recovery -- the first parse error stops the parse. Field vocabularies
//! inside every block are closed: an unknown field name is a parse error,
//! not something to skip.

mod declarations;
mod flow;
mod types;

use crate::ast::{Declaration, FailureStrategy, ImportDecl, Program, RunStatement};
use crate::error::ParseError;
use crate::token::{Token, TokenKind};

pub fn parse(tokens: &[Token]) -> Result<Program, ParseError> {
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}

pub(crate) struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Parser { tokens, pos: 0 }
    }

    // ── token helpers ─────────────────────────────

    pub(crate) fn cur(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    pub(crate) fn kind(&self) -> TokenKind {
        self.cur().kind
    }

    pub(crate) fn check(&self, kind: TokenKind) -> bool {
        self.kind() == kind
    }

    pub(crate) fn advance(&mut self) -> Token {
        let tok = self.cur().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    pub(crate) fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.err(format!("{:?}", kind)))
        }
    }

    pub(crate) fn err(&self, expected: impl Into<String>) -> ParseError {
        let tok = self.cur();
        ParseError::new(
            expected,
            format!("{:?}('{}')", tok.kind, tok.lexeme),
            tok.line,
            tok.column,
        )
    }

    pub(crate) fn take_identifier(&mut self) -> Result<Token, ParseError> {
        if self.check(TokenKind::Identifier) {
            Ok(self.advance())
        } else {
            Err(self.err("identifier"))
        }
    }

    pub(crate) fn take_string(&mut self) -> Result<String, ParseError> {
        if self.check(TokenKind::Str) {
            Ok(self.advance().lexeme)
        } else {
            Err(self.err("string literal"))
        }
    }

    /// An identifier or a keyword used as a value (e.g. `tone: precise`,
    /// `memory: session` -- `memory` positions clash with the keyword).
    pub(crate) fn take_word(&mut self) -> Result<Token, ParseError> {
        let tok = self.cur();
        let starts_like_word = tok
            .lexeme
            .chars()
            .next()
            .map_or(false, |c| c.is_alphabetic() || c == '_');
        let word_like = tok.kind == TokenKind::Identifier
            || tok.kind == TokenKind::Bool
            || (starts_like_word && tok.lexeme.chars().all(|c| c.is_alphanumeric() || c == '_'));
        if word_like && tok.kind != TokenKind::Eof {
            Ok(self.advance())
        } else {
            Err(self.err("identifier or keyword value"))
        }
    }

    pub(crate) fn take_number(&mut self) -> Result<f64, ParseError> {
        match self.kind() {
            TokenKind::Float | TokenKind::Integer => {
                let tok = self.advance();
                tok.lexeme
                    .parse::<f64>()
                    .map_err(|_| ParseError::new("number", tok.lexeme.clone(), tok.line, tok.column))
            }
            _ => Err(self.err("number")),
        }
    }

    pub(crate) fn take_integer(&mut self) -> Result<u32, ParseError> {
        let tok = self.expect(TokenKind::Integer)?;
        tok.lexeme
            .parse::<u32>()
            .map_err(|_| ParseError::new("non-negative integer", tok.lexeme.clone(), tok.line, tok.column))
    }

    pub(crate) fn take_bool(&mut self) -> Result<bool, ParseError> {
        let tok = self.expect(TokenKind::Bool)?;
        Ok(tok.lexeme == "true")
    }

    pub(crate) fn check_comparison(&self) -> bool {
        matches!(
            self.kind(),
            TokenKind::Lt
                | TokenKind::Gt
                | TokenKind::Lte
                | TokenKind::Gte
                | TokenKind::Eq
                | TokenKind::Neq
        )
    }

    // ── shared list forms ─────────────────────────

    /// `[Ident1, Ident2, …]` -- keywords admitted as values.
    pub(crate) fn bracketed_words(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(TokenKind::LBracket)?;
        let mut items = Vec::new();
        if !self.check(TokenKind::RBracket) {
            items.push(self.take_word()?.lexeme);
            while self.check(TokenKind::Comma) {
                self.advance();
                items.push(self.take_word()?.lexeme);
            }
        }
        self.expect(TokenKind::RBracket)?;
        Ok(items)
    }

    /// `["str1", "str2", …]`
    pub(crate) fn bracketed_strings(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(TokenKind::LBracket)?;
        let mut items = Vec::new();
        if !self.check(TokenKind::RBracket) {
            items.push(self.take_string()?);
            while self.check(TokenKind::Comma) {
                self.advance();
                items.push(self.take_string()?);
            }
        }
        self.expect(TokenKind::RBracket)?;
        Ok(items)
    }

    /// `Foo` or `Foo.bar` (dots joined back into one reference string).
    pub(crate) fn dotted_identifier(&mut self) -> Result<String, ParseError> {
        let mut parts = vec![self.take_identifier()?.lexeme];
        while self.check(TokenKind::Dot) {
            self.advance();
            parts.push(self.take_word()?.lexeme);
        }
        Ok(parts.join("."))
    }

    /// `[Extract.output, Assess.output]` -- dotted names allowed.
    pub(crate) fn bracketed_dotted(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(TokenKind::LBracket)?;
        let mut items = vec![self.dotted_identifier()?];
        while self.check(TokenKind::Comma) {
            self.advance();
            items.push(self.dotted_identifier()?);
        }
        self.expect(TokenKind::RBracket)?;
        Ok(items)
    }

    /// Input references: a single dotted ref or a bracketed list of them.
    pub(crate) fn input_refs(&mut self) -> Result<Vec<String>, ParseError> {
        if self.check(TokenKind::LBracket) {
            self.bracketed_dotted()
        } else {
            Ok(vec![self.dotted_identifier()?])
        }
    }

    // ── program ───────────────────────────────────

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut declarations = Vec::new();
        while !self.check(TokenKind::Eof) {
            declarations.push(self.parse_declaration()?);
        }
        Ok(Program { declarations })
    }

    fn parse_declaration(&mut self) -> Result<Declaration, ParseError> {
        match self.kind() {
            TokenKind::Import => self.parse_import().map(Declaration::Import),
            TokenKind::Persona => self.parse_persona().map(Declaration::Persona),
            TokenKind::Context => self.parse_context().map(Declaration::Context),
            TokenKind::Anchor => self.parse_anchor().map(Declaration::Anchor),
            TokenKind::Memory => self.parse_memory().map(Declaration::Memory),
            TokenKind::Tool => self.parse_tool().map(Declaration::Tool),
            TokenKind::Type => self.parse_typedef().map(Declaration::Type),
            TokenKind::Intent => self.parse_intent().map(Declaration::Intent),
            TokenKind::Flow => self.parse_flow().map(Declaration::Flow),
            TokenKind::Run => self.parse_run().map(Declaration::Run),
            _ => Err(self.err(
                "declaration (import, persona, context, anchor, memory, tool, type, intent, flow, run)",
            )),
        }
    }

    // ── import ────────────────────────────────────

    fn parse_import(&mut self) -> Result<ImportDecl, ParseError> {
        let tok = self.expect(TokenKind::Import)?;
        let mut module_path = vec![self.take_identifier()?.lexeme];
        let mut names = Vec::new();

        while self.check(TokenKind::Dot) {
            self.advance();
            // The dot immediately before `{` separates the path from the
            // named-import list, not another path segment.
            if self.check(TokenKind::LBrace) {
                break;
            }
            module_path.push(self.take_word()?.lexeme);
        }

        if self.check(TokenKind::LBrace) {
            self.advance();
            names.push(self.take_identifier()?.lexeme);
            while self.check(TokenKind::Comma) {
                self.advance();
                names.push(self.take_identifier()?.lexeme);
            }
            self.expect(TokenKind::RBrace)?;
        }

        Ok(ImportDecl {
            module_path,
            names,
            line: tok.line,
            column: tok.column,
        })
    }

    // ── run ───────────────────────────────────────

    fn parse_run(&mut self) -> Result<RunStatement, ParseError> {
        let tok = self.expect(TokenKind::Run)?;
        let flow = self.take_identifier()?.lexeme;

        self.expect(TokenKind::LParen)?;
        let arguments = self.parse_run_arguments()?;
        self.expect(TokenKind::RParen)?;

        let mut run = RunStatement {
            flow,
            arguments,
            persona: None,
            context: None,
            anchors: Vec::new(),
            on_failure: None,
            output_to: None,
            effort: None,
            line: tok.line,
            column: tok.column,
        };

        loop {
            match self.kind() {
                TokenKind::As => {
                    self.advance();
                    run.persona = Some(self.take_identifier()?.lexeme);
                }
                TokenKind::Within => {
                    self.advance();
                    run.context = Some(self.take_identifier()?.lexeme);
                }
                TokenKind::ConstrainedBy => {
                    self.advance();
                    run.anchors = self.bracketed_words()?;
                }
                TokenKind::OnFailure => {
                    self.advance();
                    self.expect(TokenKind::Colon)?;
                    run.on_failure = Some(self.parse_failure_strategy()?);
                }
                TokenKind::OutputTo => {
                    self.advance();
                    self.expect(TokenKind::Colon)?;
                    run.output_to = Some(self.take_string()?);
                }
                TokenKind::Effort => {
                    self.advance();
                    self.expect(TokenKind::Colon)?;
                    run.effort = Some(self.take_word()?.lexeme);
                }
                _ => break,
            }
        }

        Ok(run)
    }

    fn parse_run_arguments(&mut self) -> Result<Vec<String>, ParseError> {
        let mut args = Vec::new();
        while !self.check(TokenKind::RParen) {
            match self.kind() {
                TokenKind::Str | TokenKind::Integer | TokenKind::Float | TokenKind::Duration => {
                    args.push(self.advance().lexeme);
                }
                TokenKind::Identifier => {
                    let mut value = self.advance().lexeme;
                    // Dotted argument such as a file name: contract.pdf
                    while self.check(TokenKind::Dot) {
                        self.advance();
                        value.push('.');
                        value.push_str(&self.take_word()?.lexeme);
                    }
                    args.push(value);
                }
                _ => return Err(self.err("run argument (string, number, or identifier)")),
            }
            if self.check(TokenKind::Comma) {
                self.advance();
            }
        }
        Ok(args)
    }

    fn parse_failure_strategy(&mut self) -> Result<FailureStrategy, ParseError> {
        let tok = self.cur().clone();
        match tok.lexeme.as_str() {
            "log" => {
                self.advance();
                Ok(FailureStrategy::Log)
            }
            "escalate" => {
                self.advance();
                Ok(FailureStrategy::Escalate)
            }
            "raise" => {
                self.advance();
                let target = self.take_identifier()?.lexeme;
                Ok(FailureStrategy::Raise(target))
            }
            "retry" => {
                self.advance();
                let mut params = Vec::new();
                if self.check(TokenKind::LParen) {
                    self.advance();
                    while !self.check(TokenKind::RParen) {
                        let key = self.take_word()?.lexeme;
                        self.expect(TokenKind::Colon)?;
                        let value = self.take_word()?.lexeme;
                        params.push((key, value));
                        if self.check(TokenKind::Comma) {
                            self.advance();
                        }
                    }
                    self.expect(TokenKind::RParen)?;
                }
                Ok(FailureStrategy::Retry(params))
            }
            _ => Err(self.err("failure strategy (log, retry, escalate, raise)")),
        }
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::lexer;

    fn parse_ok(source: &str) -> Program {
        let tokens = lexer::lex(source).expect("lex");
        parse(&tokens).expect("parse")
    }

    fn parse_err(source: &str) -> ParseError {
        let tokens = lexer::lex(source).expect("lex");
        parse(&tokens).expect_err("expected parse error")
    }

    #[test]
    fn import_with_named_list() {
        let program = parse_ok("import axon.anchors.{NoHallucination, NoBias}");
        match &program.declarations[0] {
            Declaration::Import(i) => {
                assert_eq!(i.module_path, vec!["axon", "anchors"]);
                assert_eq!(i.names, vec!["NoHallucination", "NoBias"]);
            }
            other => panic!("expected import, got {:?}", other),
        }
    }

    #[test]
    fn import_without_names() {
        let program = parse_ok("import axon.stdlib");
        match &program.declarations[0] {
            Declaration::Import(i) => {
                assert_eq!(i.module_path, vec!["axon", "stdlib"]);
                assert!(i.names.is_empty());
            }
            other => panic!("expected import, got {:?}", other),
        }
    }

    #[test]
    fn run_with_all_modifiers() {
        let source = r#"
flow F() -> String { step S { ask: "hi" output: String } }
persona P { domain: ["x"] }
run F("doc.pdf")
  as P
  within C
  constrained_by [NoHallucination, NoBias]
  on_failure: retry(backoff: exponential)
  output_to: "report.json"
  effort: high
"#;
        let program = parse_ok(source);
        let run = match program.declarations.last().unwrap() {
            Declaration::Run(r) => r,
            other => panic!("expected run, got {:?}", other),
        };
        assert_eq!(run.flow, "F");
        assert_eq!(run.arguments, vec!["doc.pdf"]);
        assert_eq!(run.persona.as_deref(), Some("P"));
        assert_eq!(run.context.as_deref(), Some("C"));
        assert_eq!(run.anchors, vec!["NoHallucination", "NoBias"]);
        assert_eq!(
            run.on_failure,
            Some(FailureStrategy::Retry(vec![(
                "backoff".to_string(),
                "exponential".to_string()
            )]))
        );
        assert_eq!(run.output_to.as_deref(), Some("report.json"));
        assert_eq!(run.effort.as_deref(), Some("high"));
    }

    #[test]
    fn run_argument_with_dotted_name() {
        let program = parse_ok("flow F() { step S { ask: \"x\" } }\nrun F(myContract.pdf)");
        let run = match program.declarations.last().unwrap() {
            Declaration::Run(r) => r,
            other => panic!("expected run, got {:?}", other),
        };
        assert_eq!(run.arguments, vec!["myContract.pdf"]);
    }

    #[test]
    fn top_level_garbage_is_an_error() {
        let err = parse_err("widget W {}");
        assert!(err.expected.contains("declaration"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn error_positions_point_at_the_offending_token() {
        let err = parse_err("persona P {\n  domain: [\"x\"]\n  tone precise\n}");
        // missing ':' after tone
        assert_eq!(err.line, 3);
    }
}
