//! Parsers for type declarations, type expressions, and `where` predicates.

use super::Parser;
use crate::ast::{PredicateExpr, TypeDef, TypeExpr, TypeField};
use crate::error::ParseError;
use crate::token::TokenKind;

impl<'a> Parser<'a> {
    /// `type Name`, optionally `(lo..hi)`, optionally `where <pred>`,
    /// optionally `{ field: Type, … }`.
    pub(super) fn parse_typedef(&mut self) -> Result<TypeDef, ParseError> {
        let tok = self.expect(TokenKind::Type)?;
        let name = self.take_identifier()?.lexeme;
        let mut node = TypeDef {
            name,
            fields: Vec::new(),
            range: None,
            where_clause: None,
            line: tok.line,
            column: tok.column,
        };

        if self.check(TokenKind::LParen) {
            self.advance();
            let lo = self.take_number()?;
            self.expect(TokenKind::DotDot)?;
            let hi = self.take_number()?;
            self.expect(TokenKind::RParen)?;
            node.range = Some((lo, hi));
        }

        if self.check(TokenKind::Where) {
            self.advance();
            node.where_clause = Some(self.parse_predicate()?);
        }

        if self.check(TokenKind::LBrace) {
            self.advance();
            while !self.check(TokenKind::RBrace) {
                let field_tok = self.take_identifier()?;
                self.expect(TokenKind::Colon)?;
                let type_expr = self.parse_type_expr()?;
                node.fields.push(TypeField {
                    name: field_tok.lexeme,
                    type_expr,
                    line: field_tok.line,
                    column: field_tok.column,
                });
                if self.check(TokenKind::Comma) {
                    self.advance();
                }
            }
            self.expect(TokenKind::RBrace)?;
        }

        Ok(node)
    }

    /// `Identifier`, `List<T>`, or `Type?`.
    pub(super) fn parse_type_expr(&mut self) -> Result<TypeExpr, ParseError> {
        let name_tok = self.take_identifier()?;
        let mut node = TypeExpr {
            name: name_tok.lexeme,
            generic: None,
            optional: false,
            line: name_tok.line,
            column: name_tok.column,
        };

        if self.check(TokenKind::Lt) {
            self.advance();
            node.generic = Some(self.take_identifier()?.lexeme);
            self.expect(TokenKind::Gt)?;
        }

        if self.check(TokenKind::Question) {
            self.advance();
            node.optional = true;
        }

        Ok(node)
    }

    // ── where predicates ──────────────────────────
    //
    // predicate := atom ("and" atom)*
    // atom      := subject cmp number
    //            | subject "in" "[" word, … "]"
    //            | "non_empty" "(" subject ")"
    // subject   := dotted identifier

    pub(super) fn parse_predicate(&mut self) -> Result<PredicateExpr, ParseError> {
        let mut clauses = vec![self.parse_predicate_atom()?];
        while self.cur().lexeme == "and" && self.check(TokenKind::Identifier) {
            self.advance();
            clauses.push(self.parse_predicate_atom()?);
        }
        if clauses.len() == 1 {
            Ok(clauses.pop().unwrap())
        } else {
            Ok(PredicateExpr::And(clauses))
        }
    }

    fn parse_predicate_atom(&mut self) -> Result<PredicateExpr, ParseError> {
        let tok = self.cur().clone();

        if tok.lexeme == "non_empty" && self.check(TokenKind::Identifier) {
            self.advance();
            self.expect(TokenKind::LParen)?;
            let subject = self.dotted_identifier()?;
            self.expect(TokenKind::RParen)?;
            return Ok(PredicateExpr::NonEmpty {
                subject,
                line: tok.line,
                column: tok.column,
            });
        }

        let subject = self.dotted_identifier()?;

        if self.cur().lexeme == "in" && self.check(TokenKind::Identifier) {
            self.advance();
            let values = self.bracketed_words()?;
            return Ok(PredicateExpr::InSet {
                subject,
                values,
                line: tok.line,
                column: tok.column,
            });
        }

        if self.check_comparison() {
            let op = self.advance().lexeme;
            let value = self.take_number()?;
            return Ok(PredicateExpr::Compare {
                subject,
                op,
                value,
                line: tok.line,
                column: tok.column,
            });
        }

        Err(self.err("comparison, 'in [...]', or non_empty(...) predicate"))
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{Declaration, PredicateExpr};
    use crate::lexer;
    use crate::parser::parse;

    fn first_decl(source: &str) -> Declaration {
        let tokens = lexer::lex(source).unwrap();
        parse(&tokens).unwrap().declarations.remove(0)
    }

    #[test]
    fn ranged_type() {
        match first_decl("type RiskScore(0.0..1.0)") {
            Declaration::Type(t) => assert_eq!(t.range, Some((0.0, 1.0))),
            other => panic!("expected type, got {:?}", other),
        }
    }

    #[test]
    fn structured_type_with_optional_and_generic_fields() {
        match first_decl(
            "type Party { name: FactualClaim, role: FactualClaim, standing: Opinion?, aliases: List<String> }",
        ) {
            Declaration::Type(t) => {
                assert_eq!(t.fields.len(), 4);
                assert!(t.fields[2].type_expr.optional);
                assert_eq!(t.fields[3].type_expr.generic.as_deref(), Some("String"));
            }
            other => panic!("expected type, got {:?}", other),
        }
    }

    #[test]
    fn where_clause_comparison() {
        match first_decl("type HighConfidence where confidence >= 0.85") {
            Declaration::Type(t) => match t.where_clause.unwrap() {
                PredicateExpr::Compare { subject, op, value, .. } => {
                    assert_eq!(subject, "confidence");
                    assert_eq!(op, ">=");
                    assert_eq!(value, 0.85);
                }
                other => panic!("expected compare, got {:?}", other),
            },
            other => panic!("expected type, got {:?}", other),
        }
    }

    #[test]
    fn where_clause_conjunction_and_membership() {
        match first_decl(
            "type Publishable where confidence >= 0.8 and status in [draft, final] and non_empty(sources)",
        ) {
            Declaration::Type(t) => match t.where_clause.unwrap() {
                PredicateExpr::And(clauses) => {
                    assert_eq!(clauses.len(), 3);
                    assert!(matches!(clauses[1], PredicateExpr::InSet { .. }));
                    assert!(matches!(clauses[2], PredicateExpr::NonEmpty { .. }));
                }
                other => panic!("expected conjunction, got {:?}", other),
            },
            other => panic!("expected type, got {:?}", other),
        }
    }

    #[test]
    fn where_clause_dotted_subject() {
        match first_decl("type Sourced where sources.length > 0") {
            Declaration::Type(t) => match t.where_clause.unwrap() {
                PredicateExpr::Compare { subject, .. } => assert_eq!(subject, "sources.length"),
                other => panic!("expected compare, got {:?}", other),
            },
            other => panic!("expected type, got {:?}", other),
        }
    }
}
