//! Recursive-descent parser lowering the triple notation to a flat list of
//! parsed elements and triples.

use std::collections::{HashMap, HashSet};

use crate::error::{MemoryError, Result};
use crate::types::ElementType;

use super::lexer::{Connector, Lexer, Token};
use super::{ElementHandle, ParseResult, ParsedElement, ParsedTriple, Visibility};

/// Subtype annotations applied by `keyword -> element` sentences.
const TYPE_KEYWORDS: &[(&str, ElementType)] = &[
    ("sc_node", ElementType::EMPTY),
    ("sc_node_tuple", ElementType::TUPLE),
    ("sc_node_struct", ElementType::STRUCT),
    ("sc_node_role_relation", ElementType::ROLE),
    ("sc_node_norole_relation", ElementType::NOROLE),
    ("sc_node_class", ElementType::CLASS),
    ("sc_node_abstract", ElementType::ABSTRACT),
    ("sc_node_material", ElementType::MATERIAL),
    // Compatibility names.
    ("sc_node_not_relation", ElementType::CLASS),
    ("sc_node_not_binary_tuple", ElementType::TUPLE),
];

/// Element kinds usable in the explicit `kind#name | edge | kind#name` form.
const HASH_KINDS: &[(&str, ElementType)] = &[
    ("sc_node", ElementType::NODE_CONST),
    ("sc_link", ElementType::LINK_CONST),
    ("sc_edge", ElementType::EDGE_COMMON_CONST),
    ("sc_arc_common", ElementType::ARC_COMMON_CONST),
    ("sc_arc_access", ElementType::ARC_ACCESS_CONST_POS_PERM),
];

#[derive(Clone, Copy)]
enum Atom {
    Element(ElementHandle),
    /// A type keyword; only legal as the class side of a membership
    /// annotation sentence.
    Keyword(ElementType),
}

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    elements: Vec<ParsedElement>,
    triples: Vec<ParsedTriple>,
    names: HashMap<String, ElementHandle>,
    aliases: HashMap<String, ElementHandle>,
    /// One frame per open structure contour: member handles in first-seen
    /// order, with a set alongside for dedup.
    frames: Vec<(Vec<ElementHandle>, HashSet<ElementHandle>)>,
}

pub(crate) fn parse(input: &str) -> Result<ParseResult> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        elements: Vec::new(),
        triples: Vec::new(),
        names: HashMap::new(),
        aliases: HashMap::new(),
        frames: Vec::new(),
    };
    parser.run()?;
    Ok(ParseResult {
        elements: parser.elements,
        triples: parser.triples,
    })
}

impl Parser {
    fn run(&mut self) -> Result<()> {
        while self.peek().is_some() {
            self.sentence()?;
            self.expect(Token::SentenceEnd, "';;' to end the sentence")?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> MemoryError {
        MemoryError::Parse(message.into())
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<()> {
        match self.bump() {
            Some(found) if found == token => Ok(()),
            Some(found) => Err(self.error(format!("expected {what}, found {found:?}"))),
            None => Err(self.error(format!("expected {what}, found end of input"))),
        }
    }

    // ------------------------------------------------------------------
    // Element bookkeeping
    // ------------------------------------------------------------------

    fn new_element(&mut self, element: ParsedElement) -> ElementHandle {
        let handle = ElementHandle(self.elements.len());
        self.elements.push(element);
        self.touch(handle);
        handle
    }

    /// Records a handle as a member of every open contour.
    fn touch(&mut self, handle: ElementHandle) {
        for (order, seen) in &mut self.frames {
            if seen.insert(handle) {
                order.push(handle);
            }
        }
    }

    fn emit(&mut self, source: ElementHandle, connector: ElementHandle, target: ElementHandle) {
        self.touch(source);
        self.touch(connector);
        self.touch(target);
        self.triples.push(ParsedTriple {
            source,
            connector,
            target,
        });
    }

    fn anonymous(&mut self, ty: ElementType) -> ElementHandle {
        self.new_element(ParsedElement {
            ty,
            idtf: String::new(),
            visibility: Visibility::Local,
            value: None,
        })
    }

    fn named(&mut self, name: &str) -> ElementHandle {
        if let Some(&handle) = self.names.get(name) {
            self.touch(handle);
            return handle;
        }
        let visibility = if name.starts_with("..") {
            Visibility::Local
        } else if name.starts_with('.') {
            Visibility::Global
        } else {
            Visibility::System
        };
        let constancy = if name.trim_start_matches('.').starts_with('_') {
            ElementType::VAR
        } else {
            ElementType::CONST
        };
        let handle = self.new_element(ParsedElement {
            ty: ElementType::NODE.with(constancy),
            idtf: name.to_string(),
            visibility,
            value: None,
        });
        self.names.insert(name.to_string(), handle);
        handle
    }

    fn annotate(&mut self, handle: ElementHandle, subtype: ElementType) -> Result<()> {
        let element = &mut self.elements[handle.0];
        let current = element.ty.intersect(ElementType::MASK_NODE_KIND);
        if !current.is_empty() && current != subtype && !subtype.is_empty() {
            return Err(MemoryError::Parse(format!(
                "conflicting subtype annotations on '{}'",
                element.idtf
            )));
        }
        element.ty = element.ty.with(subtype);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Grammar
    // ------------------------------------------------------------------

    fn sentence(&mut self) -> Result<()> {
        // Alias binding: @name = <element expression>.
        if let (Some(Token::Alias(_)), Some(Token::Assign)) = (self.peek(), self.peek_at(1)) {
            let Some(Token::Alias(name)) = self.bump() else {
                unreachable!()
            };
            self.bump();
            let atom = self.atom()?;
            let Atom::Element(handle) = atom else {
                return Err(self.error("a type keyword cannot be aliased"));
            };
            self.aliases.insert(name, handle);
            return Ok(());
        }

        let source = self.atom()?;

        // Level 1: explicit source | edge | target.
        if self.peek() == Some(&Token::Pipe) {
            self.bump();
            let edge = self.atom()?;
            self.expect(Token::Pipe, "'|' before the target")?;
            let target = self.atom()?;
            let (Atom::Element(source), Atom::Element(edge), Atom::Element(target)) =
                (source, edge, target)
            else {
                return Err(self.error("type keywords cannot form an explicit triple"));
            };
            self.emit(source, edge, target);
            return Ok(());
        }

        self.segments(source)
    }

    /// Connector-attribute-target segments sharing one source, separated by
    /// ';'. A segment without its own connector reuses the previous one;
    /// naming a connector resets the inherited attribute set.
    fn segments(&mut self, source: Atom) -> Result<()> {
        let mut connector: Option<Connector> = None;
        let mut attrs: Vec<(ElementHandle, bool)> = Vec::new();

        loop {
            if let Some(Token::Connector(found)) = self.peek() {
                connector = Some(*found);
                attrs.clear();
                self.bump();
            } else if connector.is_none() {
                return Err(self.error("expected a connector"));
            }

            let new_attrs = self.attr_list()?;
            if !new_attrs.is_empty() {
                attrs = new_attrs;
            }

            let target = self.atom()?;
            let glyph = connector.ok_or_else(|| self.error("expected a connector"))?;
            self.emit_segment(source, glyph, target, &attrs)?;

            if self.peek() == Some(&Token::Semicolon) {
                self.bump();
                continue;
            }
            return Ok(());
        }
    }

    fn attr_list(&mut self) -> Result<Vec<(ElementHandle, bool)>> {
        let mut attrs = Vec::new();
        loop {
            let is_attr = matches!(self.peek(), Some(Token::Idtf(_) | Token::Alias(_)))
                && matches!(self.peek_at(1), Some(Token::Colon | Token::DblColon));
            if !is_attr {
                return Ok(attrs);
            }
            let attr = match self.bump() {
                Some(Token::Idtf(name)) => {
                    if Self::keyword(&name).is_some() {
                        return Err(self.error("a type keyword cannot be an attribute"));
                    }
                    self.named(&name)
                }
                Some(Token::Alias(name)) => self.alias(&name)?,
                _ => unreachable!(),
            };
            let var = matches!(self.bump(), Some(Token::DblColon));
            attrs.push((attr, var));
        }
    }

    fn emit_segment(
        &mut self,
        source: Atom,
        glyph: Connector,
        target: Atom,
        attrs: &[(ElementHandle, bool)],
    ) -> Result<()> {
        let (from, to) = if glyph.reversed {
            (target, source)
        } else {
            (source, target)
        };

        match (from, to) {
            (Atom::Keyword(subtype), Atom::Element(element)) => {
                if glyph.ty != ElementType::ARC_ACCESS_CONST_POS_PERM || !attrs.is_empty() {
                    return Err(self.error("a type keyword only annotates plain membership"));
                }
                self.annotate(element, subtype)
            }
            (Atom::Element(from), Atom::Element(to)) => {
                let edge = self.anonymous(glyph.ty);
                self.emit(from, edge, to);
                for &(attr, var) in attrs {
                    let attr_ty = if var {
                        ElementType::ARC_ACCESS_VAR_POS_PERM
                    } else {
                        ElementType::ARC_ACCESS_CONST_POS_PERM
                    };
                    let attr_edge = self.anonymous(attr_ty);
                    self.emit(attr, attr_edge, edge);
                }
                Ok(())
            }
            _ => Err(self.error("a type keyword cannot stand for an element")),
        }
    }

    fn keyword(name: &str) -> Option<ElementType> {
        TYPE_KEYWORDS
            .iter()
            .find(|(keyword, _)| *keyword == name)
            .map(|&(_, subtype)| subtype)
    }

    fn alias(&mut self, name: &str) -> Result<ElementHandle> {
        let handle = self
            .aliases
            .get(name)
            .copied()
            .ok_or_else(|| MemoryError::Parse(format!("alias '@{name}' used before assignment")))?;
        self.touch(handle);
        Ok(handle)
    }

    fn atom(&mut self) -> Result<Atom> {
        let atom = match self.bump() {
            Some(Token::Idtf(name)) => {
                if let Some(subtype) = Self::keyword(&name) {
                    Atom::Keyword(subtype)
                } else if let Some((kind, idtf)) = name.split_once('#') {
                    Atom::Element(self.hash_kind_element(kind, idtf)?)
                } else {
                    Atom::Element(self.named(&name))
                }
            }
            Some(Token::Alias(name)) => Atom::Element(self.alias(&name)?),
            Some(Token::LParen) => Atom::Element(self.sub_triple()?),
            Some(Token::Content { data, var }) => {
                let constancy = if var {
                    ElementType::VAR
                } else {
                    ElementType::CONST
                };
                Atom::Element(self.new_element(ParsedElement {
                    ty: ElementType::LINK.with(constancy),
                    idtf: String::new(),
                    visibility: Visibility::Local,
                    value: Some(data),
                }))
            }
            Some(Token::Url(data)) => Atom::Element(self.new_element(ParsedElement {
                ty: ElementType::LINK,
                idtf: String::new(),
                visibility: Visibility::Local,
                value: Some(data),
            })),
            Some(Token::ContourOpen) => Atom::Element(self.contour()?),
            Some(Token::LBrace) => Atom::Element(self.set_literal()?),
            Some(found) => return Err(self.error(format!("expected an element, found {found:?}"))),
            None => return Err(self.error("expected an element, found end of input")),
        };

        // Optional inline body: sentences whose elided source is this atom.
        if self.peek() == Some(&Token::BodyOpen) {
            let Atom::Element(owner) = atom else {
                return Err(self.error("a type keyword cannot own an inline body"));
            };
            self.bump();
            while self.peek() != Some(&Token::BodyClose) {
                self.segments(Atom::Element(owner))?;
                self.expect(Token::SentenceEnd, "';;' inside the inline body")?;
            }
            self.bump();
        }
        Ok(atom)
    }

    fn hash_kind_element(&mut self, kind: &str, idtf: &str) -> Result<ElementHandle> {
        let ty = HASH_KINDS
            .iter()
            .find(|(name, _)| *name == kind)
            .map(|&(_, ty)| ty)
            .ok_or_else(|| MemoryError::Parse(format!("unknown element kind '{kind}'")))?;
        if let Some(&handle) = self.names.get(idtf) {
            self.touch(handle);
            return Ok(handle);
        }
        let handle = self.new_element(ParsedElement {
            ty,
            idtf: idtf.to_string(),
            visibility: Visibility::System,
            value: None,
        });
        self.names.insert(idtf.to_string(), handle);
        Ok(handle)
    }

    /// A parenthesized triple; the value of the expression is its connector.
    fn sub_triple(&mut self) -> Result<ElementHandle> {
        let source = self.atom()?;
        let Some(Token::Connector(glyph)) = self.bump() else {
            return Err(self.error("expected a connector inside '(...)'"));
        };
        let attrs = self.attr_list()?;
        let target = self.atom()?;
        self.expect(Token::RParen, "')'")?;

        let (from, to) = if glyph.reversed {
            (target, source)
        } else {
            (source, target)
        };
        let (Atom::Element(from), Atom::Element(to)) = (from, to) else {
            return Err(self.error("type keywords cannot appear inside '(...)'"));
        };
        let edge = self.anonymous(glyph.ty);
        self.emit(from, edge, to);
        for (attr, var) in attrs {
            let attr_ty = if var {
                ElementType::ARC_ACCESS_VAR_POS_PERM
            } else {
                ElementType::ARC_ACCESS_CONST_POS_PERM
            };
            let attr_edge = self.anonymous(attr_ty);
            self.emit(attr, attr_edge, edge);
        }
        Ok(edge)
    }

    /// A `[* ... *]` structure literal: a const struct node plus membership
    /// arcs to every element created or referenced inside.
    fn contour(&mut self) -> Result<ElementHandle> {
        let structure = self.new_element(ParsedElement {
            ty: ElementType::NODE_CONST_STRUCT,
            idtf: String::new(),
            visibility: Visibility::Local,
            value: None,
        });
        self.frames.push((Vec::new(), HashSet::new()));

        let result = (|| -> Result<()> {
            while self.peek() != Some(&Token::ContourClose) {
                if self.peek().is_none() {
                    return Err(self.error("unterminated structure literal"));
                }
                self.sentence()?;
                self.expect(Token::SentenceEnd, "';;' inside the structure literal")?;
            }
            self.bump();
            Ok(())
        })();
        let (members, _) = self.frames.pop().unwrap_or_default();
        result?;

        for member in members {
            let edge = self.anonymous(ElementType::ARC_ACCESS_CONST_POS_PERM);
            self.emit(structure, edge, member);
        }
        Ok(structure)
    }

    /// A `{ ... }` set literal: a const tuple node with membership arcs to
    /// each item, plus attribute arcs onto those memberships.
    fn set_literal(&mut self) -> Result<ElementHandle> {
        let tuple = self.anonymous(ElementType::NODE_CONST_TUPLE);
        loop {
            let attrs = self.attr_list()?;
            let item = self.atom()?;
            let Atom::Element(item) = item else {
                return Err(self.error("type keywords cannot appear inside '{...}'"));
            };
            let edge = self.anonymous(ElementType::ARC_ACCESS_CONST_POS_PERM);
            self.emit(tuple, edge, item);
            for (attr, var) in attrs {
                let attr_ty = if var {
                    ElementType::ARC_ACCESS_VAR_POS_PERM
                } else {
                    ElementType::ARC_ACCESS_CONST_POS_PERM
                };
                let attr_edge = self.anonymous(attr_ty);
                self.emit(attr, attr_edge, edge);
            }
            if self.peek() == Some(&Token::Semicolon) {
                self.bump();
                continue;
            }
            self.expect(Token::RBrace, "'}' to close the set")?;
            return Ok(tuple);
        }
    }
}
