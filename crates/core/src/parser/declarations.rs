//! Parsers for the configuration-block declarations: persona, context,
//! anchor, memory, tool, intent. Each block is a brace-delimited field list;
//! fields may appear in any order; the vocabulary per block is closed.

use super::Parser;
use crate::ast::{
    AnchorDef, ContextDef, IntentDef, MemoryDef, PersonaDef, ToolDef, ViolationAction,
};
use crate::error::ParseError;
use crate::token::TokenKind;

impl<'a> Parser<'a> {
    pub(super) fn parse_persona(&mut self) -> Result<PersonaDef, ParseError> {
        let tok = self.expect(TokenKind::Persona)?;
        let name = self.take_identifier()?.lexeme;
        let mut node = PersonaDef {
            name,
            domain: Vec::new(),
            domain_present: false,
            tone: None,
            confidence_threshold: None,
            cite_sources: None,
            refuse_if: Vec::new(),
            language: None,
            description: None,
            line: tok.line,
            column: tok.column,
        };

        self.expect(TokenKind::LBrace)?;
        while !self.check(TokenKind::RBrace) {
            let field = self.take_word()?;
            self.expect(TokenKind::Colon)?;
            match field.lexeme.as_str() {
                "domain" => {
                    node.domain = self.bracketed_strings()?;
                    node.domain_present = true;
                }
                "tone" => node.tone = Some(self.take_word()?.lexeme),
                "confidence_threshold" => node.confidence_threshold = Some(self.take_number()?),
                "cite_sources" => node.cite_sources = Some(self.take_bool()?),
                "refuse_if" => node.refuse_if = self.bracketed_words()?,
                "language" => node.language = Some(self.take_string()?),
                "description" => node.description = Some(self.take_string()?),
                other => {
                    return Err(ParseError::new(
                        "persona field (domain, tone, confidence_threshold, cite_sources, refuse_if, language, description)",
                        format!("'{}'", other),
                        field.line,
                        field.column,
                    ))
                }
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(node)
    }

    pub(super) fn parse_context(&mut self) -> Result<ContextDef, ParseError> {
        let tok = self.expect(TokenKind::Context)?;
        let name = self.take_identifier()?.lexeme;
        let mut node = ContextDef {
            name,
            memory_scope: None,
            language: None,
            depth: None,
            max_tokens: None,
            temperature: None,
            cite_sources: None,
            line: tok.line,
            column: tok.column,
        };

        self.expect(TokenKind::LBrace)?;
        while !self.check(TokenKind::RBrace) {
            let field = self.take_word()?;
            self.expect(TokenKind::Colon)?;
            match field.lexeme.as_str() {
                "memory" => node.memory_scope = Some(self.take_word()?.lexeme),
                "language" => node.language = Some(self.take_string()?),
                "depth" => node.depth = Some(self.take_word()?.lexeme),
                "max_tokens" => node.max_tokens = Some(self.take_integer()?),
                "temperature" => node.temperature = Some(self.take_number()?),
                "cite_sources" => node.cite_sources = Some(self.take_bool()?),
                other => {
                    return Err(ParseError::new(
                        "context field (memory, language, depth, max_tokens, temperature, cite_sources)",
                        format!("'{}'", other),
                        field.line,
                        field.column,
                    ))
                }
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(node)
    }

    pub(super) fn parse_anchor(&mut self) -> Result<AnchorDef, ParseError> {
        let tok = self.expect(TokenKind::Anchor)?;
        let name = self.take_identifier()?.lexeme;
        let mut node = AnchorDef {
            name,
            require: None,
            reject: Vec::new(),
            enforce: None,
            confidence_floor: None,
            unknown_response: None,
            on_violation: None,
            line: tok.line,
            column: tok.column,
        };

        self.expect(TokenKind::LBrace)?;
        while !self.check(TokenKind::RBrace) {
            let field = self.take_word()?;
            self.expect(TokenKind::Colon)?;
            match field.lexeme.as_str() {
                "require" => node.require = Some(self.take_word()?.lexeme),
                "reject" => node.reject = self.bracketed_words()?,
                "enforce" => node.enforce = Some(self.take_word()?.lexeme),
                "confidence_floor" => node.confidence_floor = Some(self.take_number()?),
                "unknown_response" => node.unknown_response = Some(self.take_string()?),
                "on_violation" => node.on_violation = Some(self.parse_violation_action()?),
                other => {
                    return Err(ParseError::new(
                        "anchor field (require, reject, enforce, confidence_floor, unknown_response, on_violation)",
                        format!("'{}'", other),
                        field.line,
                        field.column,
                    ))
                }
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(node)
    }

    /// `raise ErrorName | warn | log | escalate | fallback("…") | retry(n)`
    pub(super) fn parse_violation_action(&mut self) -> Result<ViolationAction, ParseError> {
        let tok = self.cur().clone();
        match tok.lexeme.as_str() {
            "raise" => {
                self.advance();
                let target = self.take_identifier()?.lexeme;
                Ok(ViolationAction::Raise(target))
            }
            "warn" => {
                self.advance();
                Ok(ViolationAction::Warn)
            }
            "log" => {
                self.advance();
                Ok(ViolationAction::Log)
            }
            "escalate" => {
                self.advance();
                Ok(ViolationAction::Escalate)
            }
            "fallback" => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let value = self.take_string()?;
                self.expect(TokenKind::RParen)?;
                Ok(ViolationAction::Fallback(value))
            }
            "retry" => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let attempts = self.take_integer()?;
                self.expect(TokenKind::RParen)?;
                Ok(ViolationAction::Retry(attempts))
            }
            _ => Err(self.err("violation action (raise, warn, log, escalate, fallback, retry)")),
        }
    }

    pub(super) fn parse_memory(&mut self) -> Result<MemoryDef, ParseError> {
        let tok = self.expect(TokenKind::Memory)?;
        let name = self.take_identifier()?.lexeme;
        let mut node = MemoryDef {
            name,
            store: None,
            backend: None,
            retrieval: None,
            decay: None,
            line: tok.line,
            column: tok.column,
        };

        self.expect(TokenKind::LBrace)?;
        while !self.check(TokenKind::RBrace) {
            let field = self.take_word()?;
            self.expect(TokenKind::Colon)?;
            match field.lexeme.as_str() {
                "store" => node.store = Some(self.take_word()?.lexeme),
                "backend" => node.backend = Some(self.take_word()?.lexeme),
                "retrieval" => node.retrieval = Some(self.take_word()?.lexeme),
                "decay" => {
                    // `none | daily | weekly | <duration>`
                    if self.check(TokenKind::Duration) {
                        node.decay = Some(self.advance().lexeme);
                    } else {
                        node.decay = Some(self.take_word()?.lexeme);
                    }
                }
                other => {
                    return Err(ParseError::new(
                        "memory field (store, backend, retrieval, decay)",
                        format!("'{}'", other),
                        field.line,
                        field.column,
                    ))
                }
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(node)
    }

    pub(super) fn parse_tool(&mut self) -> Result<ToolDef, ParseError> {
        let tok = self.expect(TokenKind::Tool)?;
        let name = self.take_identifier()?.lexeme;
        let mut node = ToolDef {
            name,
            provider: None,
            max_results: None,
            filter: None,
            timeout: None,
            runtime: None,
            sandbox: None,
            line: tok.line,
            column: tok.column,
        };

        self.expect(TokenKind::LBrace)?;
        while !self.check(TokenKind::RBrace) {
            let field = self.take_word()?;
            self.expect(TokenKind::Colon)?;
            match field.lexeme.as_str() {
                "provider" => node.provider = Some(self.take_word()?.lexeme),
                "max_results" => node.max_results = Some(self.take_integer()?),
                "filter" => node.filter = Some(self.parse_filter_expr()?),
                "timeout" => {
                    let dur = self.expect(TokenKind::Duration)?;
                    node.timeout = Some(dur.lexeme);
                }
                "runtime" => node.runtime = Some(self.take_word()?.lexeme),
                "sandbox" => node.sandbox = Some(self.take_bool()?),
                other => {
                    return Err(ParseError::new(
                        "tool field (provider, max_results, filter, timeout, runtime, sandbox)",
                        format!("'{}'", other),
                        field.line,
                        field.column,
                    ))
                }
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(node)
    }

    /// `filter: recent(days: 30)` or a bare identifier.
    fn parse_filter_expr(&mut self) -> Result<String, ParseError> {
        let name = self.take_word()?.lexeme;
        if !self.check(TokenKind::LParen) {
            return Ok(name);
        }
        self.advance();
        let mut rendered = format!("{}(", name);
        while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
            rendered.push_str(&self.advance().lexeme);
        }
        self.expect(TokenKind::RParen)?;
        rendered.push(')');
        Ok(rendered)
    }

    pub(super) fn parse_intent(&mut self) -> Result<IntentDef, ParseError> {
        let tok = self.expect(TokenKind::Intent)?;
        let name = self.take_identifier()?.lexeme;
        let mut node = IntentDef {
            name,
            given: None,
            ask: None,
            output: None,
            confidence_floor: None,
            line: tok.line,
            column: tok.column,
        };

        self.expect(TokenKind::LBrace)?;
        while !self.check(TokenKind::RBrace) {
            let field = self.take_word()?;
            self.expect(TokenKind::Colon)?;
            match field.lexeme.as_str() {
                "given" => node.given = Some(self.take_identifier()?.lexeme),
                "ask" => node.ask = Some(self.take_string()?),
                "output" => node.output = Some(self.parse_type_expr()?),
                "confidence_floor" => node.confidence_floor = Some(self.take_number()?),
                other => {
                    return Err(ParseError::new(
                        "intent field (given, ask, output, confidence_floor)",
                        format!("'{}'", other),
                        field.line,
                        field.column,
                    ))
                }
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(node)
    }
}
