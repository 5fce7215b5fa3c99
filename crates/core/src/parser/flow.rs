//! Parsers for flow definitions and the ten flow-step forms.
//!
//! A flow step dispatches on its leading keyword; step-block fields may
//! appear in any order.

use super::Parser;
use crate::ast::{
    ConditionalStep, FlowDef, FlowStep, Param, ProbeStep, ReasonStep, RecallStep, RefineBlock,
    RememberStep, RuleAction, StepBlock, UseToolStep, ValidateGate, ValidateRule, WeaveStep,
};
use crate::error::ParseError;
use crate::token::TokenKind;

impl<'a> Parser<'a> {
    pub(super) fn parse_flow(&mut self) -> Result<FlowDef, ParseError> {
        let tok = self.expect(TokenKind::Flow)?;
        let name = self.take_identifier()?.lexeme;

        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(TokenKind::RParen) {
            let name_tok = self.take_identifier()?;
            self.expect(TokenKind::Colon)?;
            let type_expr = self.parse_type_expr()?;
            params.push(Param {
                name: name_tok.lexeme,
                type_expr,
                line: name_tok.line,
                column: name_tok.column,
            });
            if self.check(TokenKind::Comma) {
                self.advance();
            }
        }
        self.expect(TokenKind::RParen)?;

        let return_type = if self.check(TokenKind::Arrow) {
            self.advance();
            Some(self.parse_type_expr()?)
        } else {
            None
        };

        self.expect(TokenKind::LBrace)?;
        let mut steps = Vec::new();
        while !self.check(TokenKind::RBrace) {
            steps.push(self.parse_flow_step()?);
        }
        self.expect(TokenKind::RBrace)?;

        Ok(FlowDef {
            name,
            params,
            return_type,
            steps,
            line: tok.line,
            column: tok.column,
        })
    }

    pub(super) fn parse_flow_step(&mut self) -> Result<FlowStep, ParseError> {
        match self.kind() {
            TokenKind::Step => self.parse_step_block().map(FlowStep::Step),
            TokenKind::Probe => self.parse_probe().map(FlowStep::Probe),
            TokenKind::Reason => self.parse_reason().map(FlowStep::Reason),
            TokenKind::Validate => self.parse_validate().map(FlowStep::Validate),
            TokenKind::Refine => self.parse_refine().map(FlowStep::Refine),
            TokenKind::Weave => self.parse_weave().map(FlowStep::Weave),
            TokenKind::Use => self.parse_use_tool().map(FlowStep::UseTool),
            TokenKind::Remember => self.parse_remember().map(FlowStep::Remember),
            TokenKind::Recall => self.parse_recall().map(FlowStep::Recall),
            TokenKind::If => self.parse_conditional().map(FlowStep::If),
            _ => Err(self.err(
                "flow step (step, probe, reason, validate, refine, weave, use, remember, recall, if)",
            )),
        }
    }

    fn parse_step_block(&mut self) -> Result<StepBlock, ParseError> {
        let tok = self.expect(TokenKind::Step)?;
        let name = self.take_identifier()?.lexeme;
        let mut node = StepBlock {
            name,
            given: Vec::new(),
            ask: None,
            use_tool: None,
            probe: None,
            reason: None,
            weave: None,
            output_type: None,
            confidence_floor: None,
            line: tok.line,
            column: tok.column,
        };

        self.expect(TokenKind::LBrace)?;
        while !self.check(TokenKind::RBrace) {
            match self.kind() {
                TokenKind::Given => {
                    self.advance();
                    self.expect(TokenKind::Colon)?;
                    node.given = self.input_refs()?;
                }
                TokenKind::Ask => {
                    self.advance();
                    self.expect(TokenKind::Colon)?;
                    node.ask = Some(self.take_string()?);
                }
                TokenKind::Use => {
                    node.use_tool = Some(self.parse_use_tool()?);
                }
                TokenKind::Probe => {
                    node.probe = Some(self.parse_probe()?);
                }
                TokenKind::Reason => {
                    node.reason = Some(self.parse_reason()?);
                }
                TokenKind::Weave => {
                    node.weave = Some(self.parse_weave()?);
                }
                TokenKind::Output => {
                    self.advance();
                    self.expect(TokenKind::Colon)?;
                    node.output_type = Some(self.take_identifier()?.lexeme);
                }
                TokenKind::Identifier if self.cur().lexeme == "confidence_floor" => {
                    self.advance();
                    self.expect(TokenKind::Colon)?;
                    node.confidence_floor = Some(self.take_number()?);
                }
                _ => {
                    return Err(self.err(
                        "step field (given, ask, use, probe, reason, weave, output, confidence_floor)",
                    ))
                }
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(node)
    }

    /// `probe doc for [parties, dates]`
    fn parse_probe(&mut self) -> Result<ProbeStep, ParseError> {
        let tok = self.expect(TokenKind::Probe)?;
        let target = self.take_identifier()?.lexeme;
        self.expect(TokenKind::For)?;
        let fields = self.bracketed_words()?;
        Ok(ProbeStep {
            target,
            fields,
            line: tok.line,
            column: tok.column,
        })
    }

    /// `reason about Risks { … }` or `reason Risks { … }`
    fn parse_reason(&mut self) -> Result<ReasonStep, ParseError> {
        let tok = self.expect(TokenKind::Reason)?;
        let mut node = ReasonStep {
            name: None,
            about: None,
            given: Vec::new(),
            depth: 1,
            show_work: false,
            chain_of_thought: false,
            ask: None,
            output_type: None,
            line: tok.line,
            column: tok.column,
        };

        if self.check(TokenKind::About) {
            self.advance();
            node.about = Some(self.take_identifier()?.lexeme);
        } else if self.check(TokenKind::Identifier) {
            node.name = Some(self.advance().lexeme);
        }

        self.expect(TokenKind::LBrace)?;
        while !self.check(TokenKind::RBrace) {
            let field = self.take_word()?;
            self.expect(TokenKind::Colon)?;
            match field.lexeme.as_str() {
                "given" => node.given = self.input_refs()?,
                "about" => node.about = Some(self.take_string()?),
                "ask" => node.ask = Some(self.take_string()?),
                "depth" => node.depth = self.take_integer()?,
                "show_work" => node.show_work = self.take_bool()?,
                "chain_of_thought" => node.chain_of_thought = self.take_bool()?,
                "output" => node.output_type = Some(self.take_identifier()?.lexeme),
                other => {
                    return Err(ParseError::new(
                        "reason field (given, about, ask, depth, show_work, chain_of_thought, output)",
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

    /// `validate Assess.output against RiskSchema { if … -> … }`
    fn parse_validate(&mut self) -> Result<ValidateGate, ParseError> {
        let tok = self.expect(TokenKind::Validate)?;
        let target = self.dotted_identifier()?;
        self.expect(TokenKind::Against)?;
        let schema = self.take_identifier()?.lexeme;
        let mut node = ValidateGate {
            target,
            schema,
            rules: Vec::new(),
            line: tok.line,
            column: tok.column,
        };

        self.expect(TokenKind::LBrace)?;
        while !self.check(TokenKind::RBrace) {
            node.rules.push(self.parse_validate_rule()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(node)
    }

    /// `if condition [op value] -> refine(…) | raise X | warn "…" | pass`
    fn parse_validate_rule(&mut self) -> Result<ValidateRule, ParseError> {
        let tok = self.expect(TokenKind::If)?;
        let condition = self.take_word()?.lexeme;

        let mut op = None;
        let mut value = None;
        if self.check_comparison() {
            op = Some(self.advance().lexeme);
            value = Some(self.advance().lexeme);
        }

        self.expect(TokenKind::Arrow)?;

        let action_tok = self.cur().clone();
        let action = match action_tok.lexeme.as_str() {
            "refine" => {
                self.advance();
                let mut params = Vec::new();
                if self.check(TokenKind::LParen) {
                    self.advance();
                    while !self.check(TokenKind::RParen) {
                        let key = self.take_word()?.lexeme;
                        self.expect(TokenKind::Colon)?;
                        let val = self.advance().lexeme;
                        params.push((key, val));
                        if self.check(TokenKind::Comma) {
                            self.advance();
                        }
                    }
                    self.expect(TokenKind::RParen)?;
                }
                RuleAction::Refine(params)
            }
            "raise" => {
                self.advance();
                RuleAction::Raise(self.take_identifier()?.lexeme)
            }
            "warn" => {
                self.advance();
                RuleAction::Warn(self.take_string()?)
            }
            "pass" => {
                self.advance();
                RuleAction::Pass
            }
            _ => return Err(self.err("validate action (refine, raise, warn, pass)")),
        };

        Ok(ValidateRule {
            condition,
            op,
            value,
            action,
            line: tok.line,
            column: tok.column,
        })
    }

    /// `refine { max_attempts: 3  backoff: exponential  … }`
    fn parse_refine(&mut self) -> Result<RefineBlock, ParseError> {
        let tok = self.expect(TokenKind::Refine)?;
        let mut node = RefineBlock {
            line: tok.line,
            column: tok.column,
            ..RefineBlock::default()
        };

        self.expect(TokenKind::LBrace)?;
        while !self.check(TokenKind::RBrace) {
            let field = self.take_word()?;
            self.expect(TokenKind::Colon)?;
            match field.lexeme.as_str() {
                "max_attempts" => node.max_attempts = self.take_integer()?,
                "pass_failure_context" => node.pass_failure_context = self.take_bool()?,
                "backoff" => node.backoff = self.take_word()?.lexeme,
                "on_exhaustion" => node.on_exhaustion = Some(self.parse_violation_action()?),
                other => {
                    return Err(ParseError::new(
                        "refine field (max_attempts, pass_failure_context, backoff, on_exhaustion)",
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

    /// `weave [A.output, B.output] into Report { format: … }`
    fn parse_weave(&mut self) -> Result<WeaveStep, ParseError> {
        let tok = self.expect(TokenKind::Weave)?;
        let sources = self.bracketed_dotted()?;
        self.expect(TokenKind::Into)?;
        let target = self.take_identifier()?.lexeme;
        let mut node = WeaveStep {
            sources,
            target,
            format: None,
            priority: Vec::new(),
            style: None,
            line: tok.line,
            column: tok.column,
        };

        if self.check(TokenKind::LBrace) {
            self.advance();
            while !self.check(TokenKind::RBrace) {
                let field = self.take_word()?;
                self.expect(TokenKind::Colon)?;
                match field.lexeme.as_str() {
                    "format" => node.format = Some(self.take_identifier()?.lexeme),
                    "priority" => node.priority = self.bracketed_words()?,
                    "style" => node.style = Some(self.take_string()?),
                    other => {
                        return Err(ParseError::new(
                            "weave field (format, priority, style)",
                            format!("'{}'", other),
                            field.line,
                            field.column,
                        ))
                    }
                }
            }
            self.expect(TokenKind::RBrace)?;
        }
        Ok(node)
    }

    /// `use WebSearch("query")` -- the argument may be a string or a name.
    pub(super) fn parse_use_tool(&mut self) -> Result<UseToolStep, ParseError> {
        let tok = self.expect(TokenKind::Use)?;
        let tool_name = self.take_identifier()?.lexeme;
        self.expect(TokenKind::LParen)?;
        let argument = if self.check(TokenKind::Str) {
            self.take_string()?
        } else if self.check(TokenKind::RParen) {
            String::new()
        } else {
            self.dotted_identifier()?
        };
        self.expect(TokenKind::RParen)?;
        Ok(UseToolStep {
            tool_name,
            argument,
            line: tok.line,
            column: tok.column,
        })
    }

    /// `remember(Summary) -> ResearchKnowledge`
    fn parse_remember(&mut self) -> Result<RememberStep, ParseError> {
        let tok = self.expect(TokenKind::Remember)?;
        self.expect(TokenKind::LParen)?;
        let expression = self.dotted_identifier()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Arrow)?;
        let memory_target = self.take_identifier()?.lexeme;
        Ok(RememberStep {
            expression,
            memory_target,
            line: tok.line,
            column: tok.column,
        })
    }

    /// `recall("query") from ResearchKnowledge`
    fn parse_recall(&mut self) -> Result<RecallStep, ParseError> {
        let tok = self.expect(TokenKind::Recall)?;
        self.expect(TokenKind::LParen)?;
        let query = if self.check(TokenKind::Str) {
            self.take_string()?
        } else {
            self.take_identifier()?.lexeme
        };
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::From)?;
        let memory_source = self.take_identifier()?.lexeme;
        Ok(RecallStep {
            query,
            memory_source,
            line: tok.line,
            column: tok.column,
        })
    }

    /// `if confidence < 0.5 -> <step> [else -> <step>]`
    fn parse_conditional(&mut self) -> Result<ConditionalStep, ParseError> {
        let tok = self.expect(TokenKind::If)?;
        let condition = self.take_word()?.lexeme;

        let mut op = None;
        let mut value = None;
        if self.check_comparison() {
            op = Some(self.advance().lexeme);
            value = Some(self.advance().lexeme);
        }

        self.expect(TokenKind::Arrow)?;
        let then_step = Box::new(self.parse_flow_step()?);

        let else_step = if self.check(TokenKind::Else) {
            self.advance();
            self.expect(TokenKind::Arrow)?;
            Some(Box::new(self.parse_flow_step()?))
        } else {
            None
        };

        Ok(ConditionalStep {
            condition,
            op,
            value,
            then_step,
            else_step,
            line: tok.line,
            column: tok.column,
        })
    }
}
