//! Tokenizer for the triple notation.

use crate::error::{MemoryError, Result};
use crate::types::ElementType;

/// Connector glyph resolved to a type code and a direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Connector {
    pub ty: ElementType,
    /// True for the `<-` style glyphs: source and target swap.
    pub reversed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Token {
    Idtf(String),
    Alias(String),
    Connector(Connector),
    Colon,
    DblColon,
    Semicolon,
    SentenceEnd,
    Assign,
    Pipe,
    LParen,
    RParen,
    /// `(*`, opening an inline body owned by the preceding element.
    BodyOpen,
    /// `*)`
    BodyClose,
    /// `[*`, opening a structure contour.
    ContourOpen,
    /// `*]`
    ContourClose,
    LBrace,
    RBrace,
    Content { data: String, var: bool },
    Url(String),
}

/// Forward glyph table, longest first so the lexer can munch maximally.
/// Each row: glyph, base type without constancy, whether the glyph family
/// carries constancy, reversed flag.
const GLYPHS: &[(&str, ElementType, bool, bool)] = &[
    ("<=>", ElementType::EDGE_COMMON, true, false),
    ("-|>", ElementType::ARC_ACCESS.with(ElementType::NEG).with(ElementType::PERM), true, false),
    ("<|-", ElementType::ARC_ACCESS.with(ElementType::NEG).with(ElementType::PERM), true, true),
    ("-/>", ElementType::ARC_ACCESS.with(ElementType::FUZ).with(ElementType::PERM), true, false),
    ("</-", ElementType::ARC_ACCESS.with(ElementType::FUZ).with(ElementType::PERM), true, true),
    ("~|>", ElementType::ARC_ACCESS.with(ElementType::NEG).with(ElementType::TEMP), true, false),
    ("<|~", ElementType::ARC_ACCESS.with(ElementType::NEG).with(ElementType::TEMP), true, true),
    ("~/>", ElementType::ARC_ACCESS.with(ElementType::FUZ).with(ElementType::TEMP), true, false),
    ("</~", ElementType::ARC_ACCESS.with(ElementType::FUZ).with(ElementType::TEMP), true, true),
    ("..>", ElementType::ARC_ACCESS, false, false),
    ("<..", ElementType::ARC_ACCESS, false, true),
    ("=>", ElementType::ARC_COMMON, true, false),
    ("<=", ElementType::ARC_COMMON, true, true),
    ("->", ElementType::ARC_ACCESS.with(ElementType::POS).with(ElementType::PERM), true, false),
    ("<-", ElementType::ARC_ACCESS.with(ElementType::POS).with(ElementType::PERM), true, true),
    ("~>", ElementType::ARC_ACCESS.with(ElementType::POS).with(ElementType::TEMP), true, false),
    ("<~", ElementType::ARC_ACCESS.with(ElementType::POS).with(ElementType::TEMP), true, true),
    ("<>", ElementType::EDGE_COMMON, false, false),
    (">", ElementType::ARC_COMMON, false, false),
    ("<", ElementType::ARC_COMMON, false, true),
];

pub(crate) struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn error(&self, message: &str) -> MemoryError {
        MemoryError::Parse(format!("line {}: {}", self.line, message))
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    #[inline]
    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.input.get(self.pos + ahead).copied()
    }

    #[inline]
    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
        }
        Some(byte)
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(byte) if byte.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(byte) = self.peek() {
                        if byte == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            None => return Err(self.error("unterminated block comment")),
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            _ => {
                                self.bump();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn is_idtf_byte(byte: u8) -> bool {
        byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'#'
    }

    fn try_glyph(&mut self) -> Option<Connector> {
        for &(glyph, base, has_constancy, reversed) in GLYPHS {
            if self.input[self.pos..].starts_with(glyph.as_bytes()) {
                self.pos += glyph.len();
                let ty = if has_constancy {
                    base.with(ElementType::CONST)
                } else {
                    base
                };
                return Some(Connector { ty, reversed });
            }
        }
        None
    }

    fn var_glyph(connector: Connector, has_constancy: bool) -> Connector {
        let ty = if has_constancy {
            connector.ty.without(ElementType::CONST).with(ElementType::VAR)
        } else {
            connector.ty.with(ElementType::VAR)
        };
        Connector { ty, reversed: connector.reversed }
    }

    fn lex_idtf(&mut self) -> Token {
        let start = self.pos;
        // Optional dot prefix marking visibility.
        while self.peek() == Some(b'.') {
            self.bump();
        }
        while let Some(byte) = self.peek() {
            if Self::is_idtf_byte(byte) {
                self.bump();
            } else {
                break;
            }
        }
        Token::Idtf(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }

    fn lex_content(&mut self, var: bool) -> Result<Token> {
        // Opening bracket already consumed.
        let mut data = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated link content")),
                Some(b']') => break,
                Some(b'\\') => match self.bump() {
                    Some(b'[') => data.push('['),
                    Some(b']') => data.push(']'),
                    Some(b'\\') => data.push('\\'),
                    _ => return Err(self.error("bad escape in link content")),
                },
                Some(byte) => data.push(byte as char),
            }
        }
        Ok(Token::Content { data, var })
    }

    fn lex_url(&mut self) -> Result<Token> {
        let mut data = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(b'"') => break,
                Some(byte) => data.push(byte as char),
            }
        }
        Ok(Token::Url(data))
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        self.skip_trivia()?;
        let Some(byte) = self.peek() else {
            return Ok(None);
        };

        let token = match byte {
            b';' => {
                self.bump();
                if self.peek() == Some(b';') {
                    self.bump();
                    Token::SentenceEnd
                } else {
                    Token::Semicolon
                }
            }
            b':' => {
                self.bump();
                if self.peek() == Some(b':') {
                    self.bump();
                    Token::DblColon
                } else {
                    Token::Colon
                }
            }
            b'|' => {
                self.bump();
                Token::Pipe
            }
            b'(' => {
                self.bump();
                if self.peek() == Some(b'*') {
                    self.bump();
                    Token::BodyOpen
                } else {
                    Token::LParen
                }
            }
            b')' => {
                self.bump();
                Token::RParen
            }
            b'{' => {
                self.bump();
                Token::LBrace
            }
            b'}' => {
                self.bump();
                Token::RBrace
            }
            b'*' => {
                self.bump();
                match self.bump() {
                    Some(b')') => Token::BodyClose,
                    Some(b']') => Token::ContourClose,
                    _ => return Err(self.error("stray '*'")),
                }
            }
            b'[' => {
                self.bump();
                if self.peek() == Some(b'*') {
                    self.bump();
                    Token::ContourOpen
                } else {
                    self.lex_content(false)?
                }
            }
            b'"' => {
                self.bump();
                self.lex_url()?
            }
            b'@' => {
                self.bump();
                match self.lex_idtf() {
                    Token::Idtf(name) if !name.is_empty() => Token::Alias(name),
                    _ => return Err(self.error("'@' must be followed by an alias name")),
                }
            }
            b'_' => {
                match self.peek_at(1) {
                    Some(b'[') => {
                        self.bump();
                        self.bump();
                        self.lex_content(true)?
                    }
                    Some(next) if Self::is_idtf_byte(next) || next == b'.' => self.lex_idtf(),
                    Some(_) => {
                        // Variable connector.
                        self.bump();
                        let connector = self
                            .try_glyph()
                            .ok_or_else(|| self.error("'_' must prefix a connector or name"))?;
                        let has_constancy = connector.ty.is_const();
                        Token::Connector(Self::var_glyph(connector, has_constancy))
                    }
                    None => return Err(self.error("dangling '_'")),
                }
            }
            b'=' => {
                if let Some(connector) = self.try_glyph() {
                    Token::Connector(connector)
                } else {
                    self.bump();
                    Token::Assign
                }
            }
            b'.' => {
                if let Some(connector) = self.try_glyph() {
                    Token::Connector(connector)
                } else if matches!(self.peek_at(1), Some(next) if Self::is_idtf_byte(next))
                    || matches!(self.peek_at(1), Some(b'.'))
                {
                    self.lex_idtf()
                } else {
                    return Err(self.error("stray '.'"));
                }
            }
            b'<' | b'>' | b'-' | b'~' => match self.try_glyph() {
                Some(connector) => Token::Connector(connector),
                None => return Err(self.error("unknown connector glyph")),
            },
            _ if Self::is_idtf_byte(byte) => self.lex_idtf(),
            _ => return Err(self.error("unexpected character")),
        };
        Ok(Some(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        Lexer::new(input).tokenize().unwrap()
    }

    #[test]
    fn simple_sentence() {
        let tokens = lex("a -> b;;");
        assert_eq!(
            tokens,
            vec![
                Token::Idtf("a".into()),
                Token::Connector(Connector {
                    ty: ElementType::ARC_ACCESS_CONST_POS_PERM,
                    reversed: false
                }),
                Token::Idtf("b".into()),
                Token::SentenceEnd,
            ]
        );
    }

    #[test]
    fn var_marker_binds_to_names_and_glyphs() {
        let tokens = lex("_a _-> b");
        assert_eq!(tokens[0], Token::Idtf("_a".into()));
        assert_eq!(
            tokens[1],
            Token::Connector(Connector {
                ty: ElementType::ARC_ACCESS_VAR_POS_PERM,
                reversed: false
            })
        );
    }

    #[test]
    fn contour_and_content_brackets() {
        let tokens = lex("[* y;; *] [test*] _[v] [**]");
        assert_eq!(tokens[0], Token::ContourOpen);
        assert_eq!(tokens[3], Token::ContourClose);
        assert_eq!(
            tokens[4],
            Token::Content {
                data: "test*".into(),
                var: false
            }
        );
        assert_eq!(
            tokens[5],
            Token::Content {
                data: "v".into(),
                var: true
            }
        );
        assert_eq!(tokens[6], Token::ContourOpen);
        assert_eq!(tokens[7], Token::ContourClose);
    }

    #[test]
    fn escapes() {
        let tokens = lex(r"x -> _[\[test\]];;");
        assert_eq!(
            tokens[2],
            Token::Content {
                data: "[test]".into(),
                var: true
            }
        );
        assert!(Lexer::new(r"x -> _[\test];;").tokenize().is_err());
    }

    #[test]
    fn comments_are_trivia() {
        let tokens = lex("//Level1\na -> b;;/* example */\nc <> d;;");
        assert_eq!(tokens.len(), 8);
    }

    #[test]
    fn glyph_table_spot_checks() {
        let check = |text: &str, ty: ElementType, reversed: bool| {
            let tokens = lex(text);
            assert_eq!(tokens[0], Token::Connector(Connector { ty, reversed }), "{text}");
        };
        check(">", ElementType::ARC_COMMON, false);
        check("<>", ElementType::EDGE_COMMON, false);
        check("..>", ElementType::ARC_ACCESS, false);
        check("<=>", ElementType::EDGE_COMMON_CONST, false);
        check("_<=>", ElementType::EDGE_COMMON_VAR, false);
        check("=>", ElementType::ARC_COMMON_CONST, false);
        check("<=", ElementType::ARC_COMMON_CONST, true);
        check("_=>", ElementType::ARC_COMMON_VAR, false);
        check("-|>", ElementType::ARC_ACCESS_CONST_NEG_PERM, false);
        check("_-|>", ElementType::ARC_ACCESS_VAR_NEG_PERM, false);
        check("-/>", ElementType::ARC_ACCESS_CONST_FUZ_PERM, false);
        check("~>", ElementType::ARC_ACCESS_CONST_POS_TEMP, false);
        check("_~>", ElementType::ARC_ACCESS_VAR_POS_TEMP, false);
        check("~|>", ElementType::ARC_ACCESS_CONST_NEG_TEMP, false);
        check("~/>", ElementType::ARC_ACCESS_CONST_FUZ_TEMP, false);
        check("_~/>", ElementType::ARC_ACCESS_VAR_FUZ_TEMP, false);
        check("<-", ElementType::ARC_ACCESS_CONST_POS_PERM, true);
        check("</~", ElementType::ARC_ACCESS_CONST_FUZ_TEMP, true);
    }
}
