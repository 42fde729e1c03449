//! Surface syntax for describing triples as text.
//!
//! The parser lowers a textual description into a flat list of
//! [`ParsedElement`]s and [`ParsedTriple`]s; the storage core consumes only
//! this lowered form. Six nesting levels are supported: explicit
//! `source | edge | target` triples, parenthesized sub-triples, attribute
//! pairs on connectors, semicolon continuations sharing a source, inline
//! `(* ... *)` bodies, and the `{ ... }` / `[ ... ]` / `[* ... *]` literals
//! for sets, link contents and structures.

mod lexer;
mod parser;

use crate::error::Result;
use crate::types::ElementType;

/// Index of a parsed element within its [`ParseResult`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ElementHandle(pub usize);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Visibility {
    /// A plain named identifier, resolvable across texts.
    System,
    /// Scoped to the parsed text; all generated elements are local.
    Local,
    /// A `.name` identifier.
    Global,
}

#[derive(Clone, Debug)]
pub struct ParsedElement {
    pub ty: ElementType,
    pub idtf: String,
    pub visibility: Visibility,
    /// Link payload or URL for content elements.
    pub value: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParsedTriple {
    pub source: ElementHandle,
    pub connector: ElementHandle,
    pub target: ElementHandle,
}

#[derive(Clone, Debug, Default)]
pub struct ParseResult {
    pub(crate) elements: Vec<ParsedElement>,
    pub(crate) triples: Vec<ParsedTriple>,
}

impl ParseResult {
    pub fn element(&self, handle: ElementHandle) -> &ParsedElement {
        &self.elements[handle.0]
    }

    pub fn elements(&self) -> &[ParsedElement] {
        &self.elements
    }

    pub fn triples(&self) -> &[ParsedTriple] {
        &self.triples
    }
}

/// Parses a text into its lowered form.
pub fn parse(input: &str) -> Result<ParseResult> {
    parser::parse(input)
}
