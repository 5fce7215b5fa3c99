//! Pass 1: declaration collection -- build per-category symbol tables and
//! detect duplicate names within a category.
//!
//! All declarations live in the program scope; there is no nested scope
//! above flow parameters, so a single walk suffices.

use std::collections::BTreeMap;

use crate::ast::*;
use crate::error::{Diagnostic, DiagnosticKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Persona,
    Context,
    Anchor,
    Memory,
    Tool,
    Type,
    Intent,
    Flow,
}

impl SymbolKind {
    pub fn label(&self) -> &'static str {
        match self {
            SymbolKind::Persona => "persona",
            SymbolKind::Context => "context",
            SymbolKind::Anchor => "anchor",
            SymbolKind::Memory => "memory",
            SymbolKind::Tool => "tool",
            SymbolKind::Type => "type",
            SymbolKind::Intent => "intent",
            SymbolKind::Flow => "flow",
        }
    }
}

/// Per-category symbol tables keyed by declared name, each value the
/// position of the first declaration.
#[derive(Debug, Default)]
pub struct Symbols {
    pub personas: BTreeMap<String, (u32, u32)>,
    pub contexts: BTreeMap<String, (u32, u32)>,
    pub anchors: BTreeMap<String, (u32, u32)>,
    pub memories: BTreeMap<String, (u32, u32)>,
    pub tools: BTreeMap<String, (u32, u32)>,
    pub types: BTreeMap<String, TypeDef>,
    pub intents: BTreeMap<String, (u32, u32)>,
    pub flows: BTreeMap<String, (u32, u32)>,
}

impl Symbols {
    /// The category a name resolves to, if any. Used for "is a X, not a Y"
    /// diagnostics.
    pub fn kind_of(&self, name: &str) -> Option<SymbolKind> {
        if self.personas.contains_key(name) {
            Some(SymbolKind::Persona)
        } else if self.contexts.contains_key(name) {
            Some(SymbolKind::Context)
        } else if self.anchors.contains_key(name) {
            Some(SymbolKind::Anchor)
        } else if self.memories.contains_key(name) {
            Some(SymbolKind::Memory)
        } else if self.tools.contains_key(name) {
            Some(SymbolKind::Tool)
        } else if self.types.contains_key(name) {
            Some(SymbolKind::Type)
        } else if self.intents.contains_key(name) {
            Some(SymbolKind::Intent)
        } else if self.flows.contains_key(name) {
            Some(SymbolKind::Flow)
        } else {
            None
        }
    }
}

pub fn collect(program: &Program) -> (Symbols, Vec<Diagnostic>) {
    let mut symbols = Symbols::default();
    let mut diagnostics = Vec::new();

    for decl in &program.declarations {
        match decl {
            Declaration::Persona(d) => {
                register(&mut symbols.personas, &d.name, "persona", d.line, d.column, &mut diagnostics)
            }
            Declaration::Context(d) => {
                register(&mut symbols.contexts, &d.name, "context", d.line, d.column, &mut diagnostics)
            }
            Declaration::Anchor(d) => {
                register(&mut symbols.anchors, &d.name, "anchor", d.line, d.column, &mut diagnostics)
            }
            Declaration::Memory(d) => {
                register(&mut symbols.memories, &d.name, "memory", d.line, d.column, &mut diagnostics)
            }
            Declaration::Tool(d) => {
                register(&mut symbols.tools, &d.name, "tool", d.line, d.column, &mut diagnostics)
            }
            Declaration::Intent(d) => {
                register(&mut symbols.intents, &d.name, "intent", d.line, d.column, &mut diagnostics)
            }
            Declaration::Flow(d) => {
                register(&mut symbols.flows, &d.name, "flow", d.line, d.column, &mut diagnostics)
            }
            Declaration::Type(d) => {
                if let Some(first) = symbols.types.get(&d.name) {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::DuplicateDeclaration,
                        format!(
                            "duplicate type '{}': first declared at line {}",
                            d.name, first.line
                        ),
                        d.line,
                        d.column,
                    ));
                } else {
                    symbols.types.insert(d.name.clone(), d.clone());
                }
            }
            Declaration::Import(_) | Declaration::Run(_) => {}
        }
    }

    (symbols, diagnostics)
}

fn register(
    table: &mut BTreeMap<String, (u32, u32)>,
    name: &str,
    category: &str,
    line: u32,
    column: u32,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if let Some((first_line, _)) = table.get(name) {
        diagnostics.push(Diagnostic::new(
            DiagnosticKind::DuplicateDeclaration,
            format!(
                "duplicate {} '{}': first declared at line {}",
                category, name, first_line
            ),
            line,
            column,
        ));
    } else {
        table.insert(name.to_string(), (line, column));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;
    use crate::parser;

    fn collect_source(source: &str) -> (Symbols, Vec<Diagnostic>) {
        let tokens = lexer::lex(source).unwrap();
        let program = parser::parse(&tokens).unwrap();
        collect(&program)
    }

    #[test]
    fn registers_each_category() {
        let (symbols, diags) = collect_source(
            r#"
persona P { domain: ["x"] }
context C { memory: session }
anchor A { confidence_floor: 0.5 }
memory M { store: session }
tool T { timeout: 5s }
type Score(0.0..1.0)
flow F() { step S { ask: "x" } }
"#,
        );
        assert!(diags.is_empty());
        assert_eq!(symbols.kind_of("P"), Some(SymbolKind::Persona));
        assert_eq!(symbols.kind_of("C"), Some(SymbolKind::Context));
        assert_eq!(symbols.kind_of("A"), Some(SymbolKind::Anchor));
        assert_eq!(symbols.kind_of("M"), Some(SymbolKind::Memory));
        assert_eq!(symbols.kind_of("T"), Some(SymbolKind::Tool));
        assert_eq!(symbols.kind_of("Score"), Some(SymbolKind::Type));
        assert_eq!(symbols.kind_of("F"), Some(SymbolKind::Flow));
        assert_eq!(symbols.kind_of("Nope"), None);
    }

    #[test]
    fn duplicate_in_same_category_is_reported() {
        let (_, diags) = collect_source(
            "persona P { domain: [\"a\"] }\npersona P { domain: [\"b\"] }",
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::DuplicateDeclaration);
        assert_eq!(diags[0].line, 2);
        assert!(diags[0].message.contains("first declared at line 1"));
    }

    #[test]
    fn same_name_in_different_categories_is_allowed() {
        let (_, diags) =
            collect_source("persona Shared { domain: [\"a\"] }\ncontext Shared { memory: none }");
        assert!(diags.is_empty());
    }
}
