//! Tokenizer for the Cypher read subset.

use crate::error::{CgcError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Bare word: keyword, label, variable or function name.
    Ident(String),
    /// `backtick quoted` identifier, never a keyword.
    Quoted(String),
    Str(String),
    Int(i64),
    Float(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Dot,
    DotDot,
    Pipe,
    Star,
    Slash,
    Percent,
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
    Plus,
    Minus,
    /// `->`
    Arrow,
    /// `<-`
    LeftArrow,
    Semicolon,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offsets into the query text.
    pub start: usize,
    pub end: usize,
}

impl Token {
    /// The bare word, upper-cased, if this is an unquoted identifier.
    pub fn keyword(&self) -> Option<String> {
        match &self.kind {
            TokenKind::Ident(word) => Some(word.to_ascii_uppercase()),
            _ => None,
        }
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(word) if word.eq_ignore_ascii_case(keyword))
    }
}

pub fn tokenize(text: &str) -> Result<Vec<Token>> {
    Lexer {
        text,
        bytes: text.as_bytes(),
        pos: 0,
    }
    .run()
}

struct Lexer<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl Lexer<'_> {
    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn run(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let start = self.pos;
            let Some(c) = self.peek(0) else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    start,
                    end: start,
                });
                return Ok(tokens);
            };
            let kind = match c {
                b'(' => self.single(TokenKind::LParen),
                b')' => self.single(TokenKind::RParen),
                b'[' => self.single(TokenKind::LBracket),
                b']' => self.single(TokenKind::RBracket),
                b'{' => self.single(TokenKind::LBrace),
                b'}' => self.single(TokenKind::RBrace),
                b':' => self.single(TokenKind::Colon),
                b',' => self.single(TokenKind::Comma),
                b'|' => self.single(TokenKind::Pipe),
                b'*' => self.single(TokenKind::Star),
                b'/' => self.single(TokenKind::Slash),
                b'%' => self.single(TokenKind::Percent),
                b'+' => self.single(TokenKind::Plus),
                b'=' => self.single(TokenKind::Eq),
                b';' => self.single(TokenKind::Semicolon),
                b'.' if self.peek(1) == Some(b'.') => self.double(TokenKind::DotDot),
                b'.' if self.peek(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                b'.' => self.single(TokenKind::Dot),
                b'-' if self.peek(1) == Some(b'>') => self.double(TokenKind::Arrow),
                b'-' => self.single(TokenKind::Minus),
                b'<' => match self.peek(1) {
                    Some(b'>') => self.double(TokenKind::Neq),
                    Some(b'=') => self.double(TokenKind::Le),
                    Some(b'-') => self.double(TokenKind::LeftArrow),
                    _ => self.single(TokenKind::Lt),
                },
                b'>' if self.peek(1) == Some(b'=') => self.double(TokenKind::Ge),
                b'>' => self.single(TokenKind::Gt),
                b'!' if self.peek(1) == Some(b'=') => self.double(TokenKind::Neq),
                b'\'' | b'"' => self.string(c)?,
                b'`' => self.quoted()?,
                b'$' => {
                    return Err(CgcError::syntax(start, "query parameters are not supported"));
                }
                d if d.is_ascii_digit() => self.number()?,
                w if w == b'_' || w.is_ascii_alphabetic() || w >= 0x80 => self.word(),
                other => {
                    return Err(CgcError::syntax(
                        start,
                        format!("unexpected character '{}'", other as char),
                    ));
                }
            };
            tokens.push(Token {
                kind,
                start,
                end: self.pos,
            });
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.pos += 1;
        kind
    }

    fn double(&mut self, kind: TokenKind) -> TokenKind {
        self.pos += 2;
        kind
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match (self.peek(0), self.peek(1)) {
                (Some(c), _) if c.is_ascii_whitespace() => self.pos += 1,
                (Some(b'/'), Some(b'/')) => {
                    while self.peek(0).is_some_and(|c| c != b'\n') {
                        self.pos += 1;
                    }
                }
                (Some(b'/'), Some(b'*')) => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        match (self.peek(0), self.peek(1)) {
                            (Some(b'*'), Some(b'/')) => {
                                self.pos += 2;
                                break;
                            }
                            (Some(_), _) => self.pos += 1,
                            (None, _) => return Err(CgcError::syntax(start, "unterminated comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn word(&mut self) -> TokenKind {
        let start = self.pos;
        while self
            .peek(0)
            .is_some_and(|c| c == b'_' || c.is_ascii_alphanumeric() || c >= 0x80)
        {
            self.pos += 1;
        }
        TokenKind::Ident(self.text[start..self.pos].to_string())
    }

    fn number(&mut self) -> Result<TokenKind> {
        let start = self.pos;
        let mut is_float = false;
        while let Some(c) = self.peek(0) {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == b'.' && !is_float && self.peek(1).is_some_and(|d| d.is_ascii_digit()) {
                is_float = true;
                self.pos += 1;
            } else if (c == b'e' || c == b'E')
                && (self.peek(1).is_some_and(|d| d.is_ascii_digit())
                    || (matches!(self.peek(1), Some(b'-' | b'+'))
                        && self.peek(2).is_some_and(|d| d.is_ascii_digit())))
            {
                is_float = true;
                self.pos += 2;
            } else {
                break;
            }
        }
        let literal = &self.text[start..self.pos];
        if is_float {
            literal
                .parse()
                .map(TokenKind::Float)
                .map_err(|_| CgcError::syntax(start, format!("invalid number '{literal}'")))
        } else {
            literal
                .parse()
                .map(TokenKind::Int)
                .map_err(|_| CgcError::syntax(start, format!("integer out of range '{literal}'")))
        }
    }

    fn string(&mut self, quote: u8) -> Result<TokenKind> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();
        loop {
            let Some(c) = self.peek(0) else {
                return Err(CgcError::syntax(start, "unterminated string literal"));
            };
            if c == quote {
                self.pos += 1;
                return Ok(TokenKind::Str(value));
            }
            if c == b'\\' {
                let escaped = self
                    .peek(1)
                    .ok_or_else(|| CgcError::syntax(start, "unterminated string literal"))?;
                value.push(match escaped {
                    b'n' => '\n',
                    b't' => '\t',
                    b'r' => '\r',
                    b'\\' => '\\',
                    b'\'' => '\'',
                    b'"' => '"',
                    other => {
                        return Err(CgcError::syntax(
                            self.pos,
                            format!("unknown escape '\\{}'", other as char),
                        ))
                    }
                });
                self.pos += 2;
                continue;
            }
            // Copy one UTF-8 character.
            let rest = &self.text[self.pos..];
            if let Some(ch) = rest.chars().next() {
                value.push(ch);
                self.pos += ch.len_utf8();
            }
        }
    }

    fn quoted(&mut self) -> Result<TokenKind> {
        let start = self.pos;
        self.pos += 1;
        let Some(len) = self.text[self.pos..].find('`') else {
            return Err(CgcError::syntax(start, "unterminated backtick identifier"));
        };
        let name = self.text[self.pos..self.pos + len].to_string();
        self.pos += len + 1;
        Ok(TokenKind::Quoted(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize(text).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn patterns_and_operators() {
        assert_eq!(
            kinds("(a)-[:CALLS*1..3]->(b)<--(c) WHERE a.x <> 2.5"),
            vec![
                TokenKind::LParen,
                TokenKind::Ident("a".into()),
                TokenKind::RParen,
                TokenKind::Minus,
                TokenKind::LBracket,
                TokenKind::Colon,
                TokenKind::Ident("CALLS".into()),
                TokenKind::Star,
                TokenKind::Int(1),
                TokenKind::DotDot,
                TokenKind::Int(3),
                TokenKind::RBracket,
                TokenKind::Arrow,
                TokenKind::LParen,
                TokenKind::Ident("b".into()),
                TokenKind::RParen,
                TokenKind::LeftArrow,
                TokenKind::Minus,
                TokenKind::LParen,
                TokenKind::Ident("c".into()),
                TokenKind::RParen,
                TokenKind::Ident("WHERE".into()),
                TokenKind::Ident("a".into()),
                TokenKind::Dot,
                TokenKind::Ident("x".into()),
                TokenKind::Neq,
                TokenKind::Float(2.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_comments_and_backticks() {
        assert_eq!(
            kinds("'it\\'s' // trailing\n\"create\" /* block */ `DELETE`"),
            vec![
                TokenKind::Str("it's".into()),
                TokenKind::Str("create".into()),
                TokenKind::Quoted("DELETE".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn identifiers_keep_underscored_keywords_whole() {
        assert_eq!(
            kinds("create_user_function"),
            vec![TokenKind::Ident("create_user_function".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn errors_carry_offsets() {
        let err = tokenize("MATCH (n) WHERE n.name = 'open").unwrap_err();
        assert!(matches!(err, CgcError::QuerySyntax { offset: 25, .. }));
        assert!(matches!(
            tokenize("RETURN $param").unwrap_err(),
            CgcError::QuerySyntax { offset: 7, .. }
        ));
    }
}
