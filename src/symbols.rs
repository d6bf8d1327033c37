//! Document symbols
//!
//! Discovery consumes function-level symbols through [`SymbolProvider`].
//! [`GoSymbolProvider`] is the tree-sitter backed provider used by the CLI.

use std::sync::Mutex;

use tree_sitter::{Node, Parser};

use crate::error::{ExplorerError, Result};
use crate::test_model::{Position, Range};
use crate::workspace::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Method,
    Struct,
    Interface,
    Variable,
    Constant,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSymbol {
    pub name: String,
    pub kind: SymbolKind,
    /// Signature text, e.g. `func(t *testing.T)`
    pub detail: String,
    pub range: Range,
    pub children: Vec<DocumentSymbol>,
}

impl DocumentSymbol {
    pub fn function(name: &str, detail: &str, range: Range) -> Self {
        Self {
            name: name.to_string(),
            kind: SymbolKind::Function,
            detail: detail.to_string(),
            range,
            children: Vec::new(),
        }
    }
}

pub trait SymbolProvider {
    fn provide_symbols(&self, doc: &Document) -> Result<Vec<DocumentSymbol>>;
}

/// Go symbols via tree-sitter
pub struct GoSymbolProvider {
    parser: Mutex<Parser>,
}

impl GoSymbolProvider {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .map_err(|e| ExplorerError::Symbols {
                path: Default::default(),
                message: format!("failed to load Go grammar: {}", e),
            })?;
        Ok(Self {
            parser: Mutex::new(parser),
        })
    }

    fn node_text<'a>(node: &Node, content: &'a str) -> &'a str {
        &content[node.byte_range()]
    }

    fn node_range(node: &Node) -> Range {
        let start = node.start_position();
        let end = node.end_position();
        Range::new(
            Position::new(start.row as u32, start.column as u32),
            Position::new(end.row as u32, end.column as u32),
        )
    }

    fn extract(node: &Node, content: &str) -> Option<DocumentSymbol> {
        let kind = match node.kind() {
            "function_declaration" => SymbolKind::Function,
            "method_declaration" => SymbolKind::Method,
            _ => return None,
        };

        let name = Self::node_text(&node.child_by_field_name("name")?, content);
        let params = node
            .child_by_field_name("parameters")
            .map(|p| Self::node_text(&p, content))
            .unwrap_or("()");

        Some(DocumentSymbol {
            name: name.to_string(),
            kind,
            detail: format!("func{}", params),
            range: Self::node_range(node),
            children: Vec::new(),
        })
    }
}

impl SymbolProvider for GoSymbolProvider {
    fn provide_symbols(&self, doc: &Document) -> Result<Vec<DocumentSymbol>> {
        let tree = {
            let mut parser = self.parser.lock().map_err(|_| ExplorerError::Symbols {
                path: doc.path.clone(),
                message: "parser lock poisoned".to_string(),
            })?;
            parser.parse(&doc.text, None)
        }
        .ok_or_else(|| ExplorerError::Symbols {
            path: doc.path.clone(),
            message: "failed to parse content".to_string(),
        })?;

        let root = tree.root_node();
        let mut cursor = root.walk();
        let symbols = root
            .children(&mut cursor)
            .filter_map(|node| Self::extract(&node, &doc.text))
            .collect();
        Ok(symbols)
    }
}
