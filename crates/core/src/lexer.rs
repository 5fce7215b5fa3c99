//! Hand-written single-pass lexer: source text → token list.
//!
//! Whitespace and comments are skipped but advance the position. The lexer
//! never recovers: the first invalid character fails with an exact position.

use crate::error::LexError;
use crate::token::{keyword_kind, Token, TokenKind, DURATION_SUFFIXES};

pub fn lex(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).tokenize()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        while !self.at_end() {
            self.skip_whitespace_and_comments()?;
            if self.at_end() {
                break;
            }
            self.scan_token()?;
        }
        self.tokens
            .push(Token::new(TokenKind::Eof, "", self.line, self.column));
        Ok(self.tokens)
    }

    // ── character helpers ─────────────────────────

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> char {
        if self.at_end() {
            '\0'
        } else {
            self.chars[self.pos]
        }
    }

    fn peek_next(&self) -> char {
        if self.pos + 1 >= self.chars.len() {
            '\0'
        } else {
            self.chars[self.pos + 1]
        }
    }

    fn advance(&mut self) -> char {
        let c = self.chars[self.pos];
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.at_end() || self.chars[self.pos] != expected {
            return false;
        }
        self.advance();
        true
    }

    fn emit(&mut self, kind: TokenKind, lexeme: impl Into<String>, line: u32, column: u32) {
        self.tokens.push(Token::new(kind, lexeme, line, column));
    }

    // ── whitespace & comments ─────────────────────

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance();
                }
                '/' if self.peek_next() == '/' => {
                    while !self.at_end() && self.peek() != '\n' {
                        self.advance();
                    }
                }
                '/' if self.peek_next() == '*' => {
                    let start_line = self.line;
                    let start_col = self.column;
                    self.advance();
                    self.advance();
                    loop {
                        if self.at_end() {
                            return Err(LexError::new(
                                "unterminated block comment",
                                start_line,
                                start_col,
                            ));
                        }
                        if self.peek() == '*' && self.peek_next() == '/' {
                            self.advance();
                            self.advance();
                            break;
                        }
                        self.advance();
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    // ── scanner dispatch ──────────────────────────

    fn scan_token(&mut self) -> Result<(), LexError> {
        let line = self.line;
        let col = self.column;
        let c = self.advance();

        match c {
            '{' => self.emit(TokenKind::LBrace, "{", line, col),
            '}' => self.emit(TokenKind::RBrace, "}", line, col),
            '(' => self.emit(TokenKind::LParen, "(", line, col),
            ')' => self.emit(TokenKind::RParen, ")", line, col),
            '[' => self.emit(TokenKind::LBracket, "[", line, col),
            ']' => self.emit(TokenKind::RBracket, "]", line, col),
            ':' => self.emit(TokenKind::Colon, ":", line, col),
            ',' => self.emit(TokenKind::Comma, ",", line, col),
            '?' => self.emit(TokenKind::Question, "?", line, col),

            '.' => {
                if self.matches('.') {
                    self.emit(TokenKind::DotDot, "..", line, col);
                } else {
                    self.emit(TokenKind::Dot, ".", line, col);
                }
            }

            '-' => {
                if self.matches('>') {
                    self.emit(TokenKind::Arrow, "->", line, col);
                } else if self.peek().is_ascii_digit() {
                    self.scan_number(line, col, None, true)?;
                } else {
                    return Err(LexError::new("unexpected character '-'", line, col));
                }
            }

            '<' => {
                if self.matches('=') {
                    self.emit(TokenKind::Lte, "<=", line, col);
                } else {
                    self.emit(TokenKind::Lt, "<", line, col);
                }
            }
            '>' => {
                if self.matches('=') {
                    self.emit(TokenKind::Gte, ">=", line, col);
                } else {
                    self.emit(TokenKind::Gt, ">", line, col);
                }
            }
            '=' => {
                if self.matches('=') {
                    self.emit(TokenKind::Eq, "==", line, col);
                } else {
                    return Err(LexError::new("unexpected '='. Did you mean '=='?", line, col));
                }
            }
            '!' => {
                if self.matches('=') {
                    self.emit(TokenKind::Neq, "!=", line, col);
                } else {
                    return Err(LexError::new("unexpected '!'. Did you mean '!='?", line, col));
                }
            }

            '"' => self.scan_string(line, col)?,

            _ => {
                if c.is_ascii_digit() {
                    self.scan_number(line, col, Some(c), false)?;
                } else if c.is_alphabetic() || c == '_' {
                    self.scan_identifier(line, col, c);
                } else {
                    return Err(LexError::new(
                        format!("unexpected character '{}'", c),
                        line,
                        col,
                    ));
                }
            }
        }

        Ok(())
    }

    // ── literal scanners ──────────────────────────

    fn scan_string(&mut self, start_line: u32, start_col: u32) -> Result<(), LexError> {
        let mut value = String::new();
        loop {
            if self.at_end() {
                return Err(LexError::new("unterminated string", start_line, start_col));
            }
            match self.peek() {
                '"' => {
                    self.advance();
                    break;
                }
                '\n' => {
                    return Err(LexError::new(
                        "unterminated string (newline before closing quote)",
                        start_line,
                        start_col,
                    ));
                }
                '\\' => {
                    self.advance();
                    if self.at_end() {
                        return Err(LexError::new(
                            "unterminated escape sequence",
                            self.line,
                            self.column,
                        ));
                    }
                    match self.advance() {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        '\\' => value.push('\\'),
                        '"' => value.push('"'),
                        other => {
                            value.push('\\');
                            value.push(other);
                        }
                    }
                }
                _ => value.push(self.advance()),
            }
        }
        self.emit(TokenKind::Str, value, start_line, start_col);
        Ok(())
    }

    fn scan_number(
        &mut self,
        start_line: u32,
        start_col: u32,
        first: Option<char>,
        negative: bool,
    ) -> Result<(), LexError> {
        let mut digits = String::new();
        if negative {
            digits.push('-');
        }
        if let Some(c) = first {
            digits.push(c);
        }

        while !self.at_end() && self.peek().is_ascii_digit() {
            digits.push(self.advance());
        }

        let mut is_float = false;
        // A '.' starts a fraction only when not the '..' range operator.
        if self.peek() == '.' && self.peek_next() != '.' {
            is_float = true;
            digits.push(self.advance());
            if self.at_end() || !self.peek().is_ascii_digit() {
                return Err(LexError::new(
                    "expected digit after decimal point",
                    self.line,
                    self.column,
                ));
            }
            while !self.at_end() && self.peek().is_ascii_digit() {
                digits.push(self.advance());
            }
        }

        // Duration: an integer immediately followed by a known suffix.
        if !is_float && self.peek().is_alphabetic() {
            let suffix_pos = self.pos;
            let suffix_col = self.column;
            let mut suffix = String::new();
            while !self.at_end() && self.peek().is_alphabetic() {
                suffix.push(self.advance());
            }
            if DURATION_SUFFIXES.contains(&suffix.as_str()) {
                if negative {
                    return Err(LexError::new(
                        format!("negative duration '{}{}'", digits, suffix),
                        start_line,
                        start_col,
                    ));
                }
                self.emit(
                    TokenKind::Duration,
                    format!("{}{}", digits, suffix),
                    start_line,
                    start_col,
                );
                return Ok(());
            }
            // Not a duration suffix: rewind and let the next scan see it.
            self.pos = suffix_pos;
            self.column = suffix_col;
        }

        let kind = if is_float {
            TokenKind::Float
        } else {
            TokenKind::Integer
        };
        self.emit(kind, digits, start_line, start_col);
        Ok(())
    }

    fn scan_identifier(&mut self, start_line: u32, start_col: u32, first: char) {
        let mut word = String::new();
        word.push(first);
        while !self.at_end() && (self.peek().is_alphanumeric() || self.peek() == '_') {
            word.push(self.advance());
        }
        let kind = keyword_kind(&word).unwrap_or(TokenKind::Identifier);
        self.emit(kind, word, start_line, start_col);
    }
}
