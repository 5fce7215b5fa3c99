//! Token model for the AXON lexer.
//!
//! Keywords are recognised by a final table lookup after an identifier has
//! been lexed, so the scanner itself has a single identifier path.

/// Every token kind the lexer can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Declaration keywords
    Persona,
    Context,
    Intent,
    Flow,
    Reason,
    Anchor,
    Validate,
    Refine,
    Memory,
    Tool,
    Probe,
    Weave,
    Step,
    Type,
    Import,
    Run,
    If,
    Else,
    Use,
    Remember,
    Recall,

    // Run-statement modifiers
    As,
    Within,
    ConstrainedBy,
    OnFailure,
    OutputTo,
    Effort,

    // Contextual keywords
    For,
    Into,
    Against,
    About,
    From,
    Where,

    // Field keywords
    Given,
    Ask,
    Output,

    // Literals
    Identifier,
    Str,
    Integer,
    Float,
    Duration,
    Bool,

    // Symbols
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Colon,
    Comma,
    Dot,
    DotDot,
    Arrow,
    Question,

    // Comparisons
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
    Neq,

    Eof,
}

/// A single token with its source position (line and column of the first
/// character, both 1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: u32,
    pub column: u32,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: u32, column: u32) -> Self {
        Token {
            kind,
            lexeme: lexeme.into(),
            line,
            column,
        }
    }
}

/// Keyword table: raw text → TokenKind. `true`/`false` lex as `Bool`.
pub fn keyword_kind(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "persona" => TokenKind::Persona,
        "context" => TokenKind::Context,
        "intent" => TokenKind::Intent,
        "flow" => TokenKind::Flow,
        "reason" => TokenKind::Reason,
        "anchor" => TokenKind::Anchor,
        "validate" => TokenKind::Validate,
        "refine" => TokenKind::Refine,
        "memory" => TokenKind::Memory,
        "tool" => TokenKind::Tool,
        "probe" => TokenKind::Probe,
        "weave" => TokenKind::Weave,
        "step" => TokenKind::Step,
        "type" => TokenKind::Type,
        "import" => TokenKind::Import,
        "run" => TokenKind::Run,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "use" => TokenKind::Use,
        "remember" => TokenKind::Remember,
        "recall" => TokenKind::Recall,
        "as" => TokenKind::As,
        "within" => TokenKind::Within,
        "constrained_by" => TokenKind::ConstrainedBy,
        "on_failure" => TokenKind::OnFailure,
        "output_to" => TokenKind::OutputTo,
        "effort" => TokenKind::Effort,
        "for" => TokenKind::For,
        "into" => TokenKind::Into,
        "against" => TokenKind::Against,
        "about" => TokenKind::About,
        "from" => TokenKind::From,
        "where" => TokenKind::Where,
        "given" => TokenKind::Given,
        "ask" => TokenKind::Ask,
        "output" => TokenKind::Output,
        "true" | "false" => TokenKind::Bool,
        _ => return None,
    };
    Some(kind)
}

/// Duration suffixes recognised by the lexer, longest first so `ms` wins
/// over `m`.
pub const DURATION_SUFFIXES: [&str; 5] = ["ms", "s", "m", "h", "d"];
