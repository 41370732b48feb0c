//! Recursive-descent parser for the supported read grammar.
//!
//! ```text
//! query   := match* RETURN [DISTINCT] items [ORDER BY order] [SKIP n] [LIMIT n] [;]
//! match   := [OPTIONAL] MATCH pattern (, pattern)* [WHERE expr]
//! pattern := node (rel node)*
//! ```

use super::lexer::{Token, TokenKind};
use crate::error::{CgcError, Result};

pub const AGGREGATES: &[&str] = &["count", "collect", "min", "max", "sum", "avg"];
pub const SCALARS: &[&str] = &[
    "tolower", "toupper", "size", "labels", "type", "id", "coalesce", "tostring",
];

/// Default upper bound of `*` and `*n..` relationship ranges.
pub const MAX_HOPS: u32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub matches: Vec<MatchClause>,
    pub ret: ReturnClause,
    pub order_by: Vec<OrderItem>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchClause {
    pub optional: bool,
    pub patterns: Vec<PathPattern>,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    pub start: NodePattern,
    pub steps: Vec<(RelPattern, NodePattern)>,
}

impl PathPattern {
    /// Every variable the pattern binds.
    pub fn variables(&self) -> Vec<String> {
        let mut vars: Vec<String> = self.start.var.iter().cloned().collect();
        for (rel, node) in &self.steps {
            vars.extend(rel.var.iter().cloned());
            vars.extend(node.var.iter().cloned());
        }
        vars
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodePattern {
    pub var: Option<String>,
    pub labels: Vec<String>,
    pub props: Vec<(String, Expr)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelDirection {
    Outgoing,
    Incoming,
    Either,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelPattern {
    pub var: Option<String>,
    pub types: Vec<String>,
    pub direction: RelDirection,
    /// `Some((min, max))` for variable-length relationships.
    pub range: Option<(u32, u32)>,
    pub props: Vec<(String, Expr)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnClause {
    pub distinct: bool,
    /// `RETURN *`
    pub star: bool,
    pub items: Vec<ReturnItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnItem {
    pub expr: Expr,
    /// Column name: the alias, or the expression text as written.
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    /// Expression text as written, for matching against return columns.
    pub text: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOp {
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Variable(String),
    Property(Box<Expr>, String),
    List(Vec<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Xor(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Str(StringOp, Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
    IsNull { expr: Box<Expr>, negated: bool },
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    /// Function call; `args` is empty for `count(*)`.
    Call {
        name: String,
        distinct: bool,
        star: bool,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn is_aggregate(&self) -> bool {
        match self {
            Expr::Call { name, args, .. } => {
                AGGREGATES.contains(&name.as_str()) || args.iter().any(Expr::is_aggregate)
            }
            Expr::Literal(_) | Expr::Variable(_) => false,
            Expr::Property(inner, _) | Expr::Not(inner) | Expr::Neg(inner) => inner.is_aggregate(),
            Expr::IsNull { expr, .. } => expr.is_aggregate(),
            Expr::List(items) => items.iter().any(Expr::is_aggregate),
            Expr::And(a, b)
            | Expr::Or(a, b)
            | Expr::Xor(a, b)
            | Expr::Compare(_, a, b)
            | Expr::Str(_, a, b)
            | Expr::In(a, b)
            | Expr::Arith(_, a, b) => a.is_aggregate() || b.is_aggregate(),
        }
    }
}

pub fn parse(text: &str, tokens: &[Token]) -> Result<Query> {
    let mut parser = Parser {
        text,
        tokens,
        pos: 0,
    };
    let query = parser.query()?;
    Ok(query)
}

struct Parser<'a> {
    text: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &'a Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_at(&self, ahead: usize) -> &'a Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + ahead).min(last)]
    }

    fn advance(&mut self) -> &'a Token {
        let token = self.peek();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.peek().is_keyword(keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> CgcError {
        CgcError::syntax(self.peek().start, message)
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected {keyword}")))
        }
    }

    /// Identifier: bare word or backtick-quoted.
    fn name(&mut self, what: &str) -> Result<String> {
        match &self.peek().kind {
            TokenKind::Ident(word) | TokenKind::Quoted(word) => {
                let word = word.clone();
                self.advance();
                Ok(word)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn unsigned(&mut self, what: &str) -> Result<usize> {
        match self.peek().kind {
            TokenKind::Int(n) if n >= 0 => {
                self.advance();
                Ok(n as usize)
            }
            _ => Err(self.error(format!("expected a non-negative integer after {what}"))),
        }
    }

    fn query(&mut self) -> Result<Query> {
        let mut matches = Vec::new();
        loop {
            let optional = if self.at_keyword("OPTIONAL") {
                self.advance();
                true
            } else {
                false
            };
            if !self.eat_keyword("MATCH") {
                if optional {
                    return Err(self.error("expected MATCH after OPTIONAL"));
                }
                break;
            }
            matches.push(self.match_clause(optional)?);
        }

        if !self.eat_keyword("RETURN") {
            return Err(self.error(match self.peek().keyword() {
                Some(word) => format!("unsupported clause '{word}'; expected MATCH or RETURN"),
                None => "expected MATCH or RETURN".to_string(),
            }));
        }
        let ret = self.return_clause()?;

        let mut order_by = Vec::new();
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let start = self.peek().start;
                let expr = self.expr()?;
                let text = self.source_since(start);
                let descending = if self.eat_keyword("DESC") || self.eat_keyword("DESCENDING") {
                    true
                } else {
                    if !self.eat_keyword("ASC") {
                        self.eat_keyword("ASCENDING");
                    }
                    false
                };
                order_by.push(OrderItem {
                    expr,
                    text,
                    descending,
                });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }

        let skip = if self.eat_keyword("SKIP") {
            Some(self.unsigned("SKIP")?)
        } else {
            None
        };
        let limit = if self.eat_keyword("LIMIT") {
            Some(self.unsigned("LIMIT")?)
        } else {
            None
        };
        self.eat(&TokenKind::Semicolon);
        if !self.at(&TokenKind::Eof) {
            return Err(self.error("unexpected input after end of query"));
        }

        Ok(Query {
            matches,
            ret,
            order_by,
            skip,
            limit,
        })
    }

    fn source_since(&self, start: usize) -> String {
        let end = self
            .pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or(start, |t| t.end);
        self.text.get(start..end).unwrap_or_default().trim().to_string()
    }

    fn match_clause(&mut self, optional: bool) -> Result<MatchClause> {
        let mut patterns = vec![self.path_pattern()?];
        while self.eat(&TokenKind::Comma) {
            patterns.push(self.path_pattern()?);
        }
        let filter = if self.eat_keyword("WHERE") {
            Some(self.expr()?)
        } else {
            None
        };
        Ok(MatchClause {
            optional,
            patterns,
            filter,
        })
    }

    fn path_pattern(&mut self) -> Result<PathPattern> {
        if matches!(self.peek_at(1).kind, TokenKind::Eq) && !self.at(&TokenKind::LParen) {
            return Err(self.error("named paths are not supported"));
        }
        let start = self.node_pattern()?;
        let mut steps = Vec::new();
        while matches!(self.peek().kind, TokenKind::Minus | TokenKind::LeftArrow) {
            let rel = self.rel_pattern()?;
            let node = self.node_pattern()?;
            steps.push((rel, node));
        }
        Ok(PathPattern { start, steps })
    }

    fn node_pattern(&mut self) -> Result<NodePattern> {
        self.expect(&TokenKind::LParen, "'(' to start a node pattern")?;
        let var = match self.peek().kind {
            TokenKind::Ident(_) | TokenKind::Quoted(_) => Some(self.name("variable")?),
            _ => None,
        };
        let mut labels = Vec::new();
        while self.eat(&TokenKind::Colon) {
            labels.push(self.name("label")?);
        }
        let props = if self.at(&TokenKind::LBrace) {
            self.property_map()?
        } else {
            Vec::new()
        };
        self.expect(&TokenKind::RParen, "')' to close the node pattern")?;
        Ok(NodePattern { var, labels, props })
    }

    fn property_map(&mut self) -> Result<Vec<(String, Expr)>> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut props = Vec::new();
        if !self.eat(&TokenKind::RBrace) {
            loop {
                let key = self.name("property name")?;
                self.expect(&TokenKind::Colon, "':' after property name")?;
                props.push((key, self.expr()?));
                if self.eat(&TokenKind::RBrace) {
                    break;
                }
                self.expect(&TokenKind::Comma, "',' or '}'")?;
            }
        }
        Ok(props)
    }

    fn rel_pattern(&mut self) -> Result<RelPattern> {
        let incoming = match self.advance().kind {
            TokenKind::LeftArrow => true,
            TokenKind::Minus => false,
            _ => return Err(self.error("expected relationship")),
        };

        let mut var = None;
        let mut types = Vec::new();
        let mut range = None;
        let mut props = Vec::new();
        if self.eat(&TokenKind::LBracket) {
            if matches!(self.peek().kind, TokenKind::Ident(_) | TokenKind::Quoted(_)) {
                var = Some(self.name("variable")?);
            }
            if self.eat(&TokenKind::Colon) {
                types.push(self.name("relationship type")?);
                while self.eat(&TokenKind::Pipe) {
                    self.eat(&TokenKind::Colon);
                    types.push(self.name("relationship type")?);
                }
            }
            if self.eat(&TokenKind::Star) {
                range = Some(self.hop_range()?);
            }
            if self.at(&TokenKind::LBrace) {
                props = self.property_map()?;
            }
            self.expect(&TokenKind::RBracket, "']' to close the relationship")?;
        }

        let outgoing = match self.advance().kind {
            TokenKind::Arrow => true,
            TokenKind::Minus => false,
            _ => return Err(self.error("expected '-' or '->' after relationship")),
        };
        let direction = match (incoming, outgoing) {
            (true, false) => RelDirection::Incoming,
            (false, true) => RelDirection::Outgoing,
            (false, false) => RelDirection::Either,
            (true, true) => return Err(self.error("relationship cannot point both ways")),
        };
        Ok(RelPattern {
            var,
            types,
            direction,
            range,
            props,
        })
    }

    /// After `*`: `*`, `*n`, `*n..`, `*..m`, `*n..m`.
    fn hop_range(&mut self) -> Result<(u32, u32)> {
        let hop = |p: &mut Self| -> Result<Option<u32>> {
            match p.peek().kind {
                TokenKind::Int(n) if (0..=i64::from(u32::MAX)).contains(&n) => {
                    p.advance();
                    Ok(Some(n as u32))
                }
                _ => Ok(None),
            }
        };
        let min = hop(self)?;
        if self.eat(&TokenKind::DotDot) {
            let max = hop(self)?;
            let (min, max) = (min.unwrap_or(1), max.unwrap_or(MAX_HOPS));
            if min > max {
                return Err(self.error("relationship range minimum exceeds maximum"));
            }
            Ok((min, max))
        } else {
            Ok(match min {
                Some(n) => (n, n),
                None => (1, MAX_HOPS),
            })
        }
    }

    fn return_clause(&mut self) -> Result<ReturnClause> {
        let distinct = self.eat_keyword("DISTINCT");
        if self.eat(&TokenKind::Star) {
            return Ok(ReturnClause {
                distinct,
                star: true,
                items: Vec::new(),
            });
        }
        let mut items = Vec::new();
        loop {
            let start = self.peek().start;
            let expr = self.expr()?;
            let text = self.source_since(start);
            let alias = if self.eat_keyword("AS") {
                self.name("alias")?
            } else {
                text
            };
            items.push(ReturnItem { expr, alias });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(ReturnClause {
            distinct,
            star: false,
            items,
        })
    }

    // ─── Expressions ────────────────────────────────────────────

    fn expr(&mut self) -> Result<Expr> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.xor_expr()?;
        while self.eat_keyword("OR") {
            left = Expr::Or(Box::new(left), Box::new(self.xor_expr()?));
        }
        Ok(left)
    }

    fn xor_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("XOR") {
            left = Expr::Xor(Box::new(left), Box::new(self.and_expr()?));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("AND") {
            left = Expr::And(Box::new(left), Box::new(self.not_expr()?));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.eat_keyword("NOT") {
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Eq => Some(CompareOp::Eq),
                TokenKind::Neq => Some(CompareOp::Neq),
                TokenKind::Lt => Some(CompareOp::Lt),
                TokenKind::Gt => Some(CompareOp::Gt),
                TokenKind::Le => Some(CompareOp::Le),
                TokenKind::Ge => Some(CompareOp::Ge),
                _ => None,
            };
            if let Some(op) = op {
                self.advance();
                left = Expr::Compare(op, Box::new(left), Box::new(self.additive()?));
                continue;
            }
            if self.eat_keyword("CONTAINS") {
                left = Expr::Str(StringOp::Contains, Box::new(left), Box::new(self.additive()?));
            } else if self.at_keyword("STARTS") {
                self.advance();
                self.expect_keyword("WITH")?;
                left = Expr::Str(StringOp::StartsWith, Box::new(left), Box::new(self.additive()?));
            } else if self.at_keyword("ENDS") {
                self.advance();
                self.expect_keyword("WITH")?;
                left = Expr::Str(StringOp::EndsWith, Box::new(left), Box::new(self.additive()?));
            } else if self.eat_keyword("IN") {
                left = Expr::In(Box::new(left), Box::new(self.additive()?));
            } else if self.eat_keyword("IS") {
                let negated = self.eat_keyword("NOT");
                self.expect_keyword("NULL")?;
                left = Expr::IsNull {
                    expr: Box::new(left),
                    negated,
                };
            } else if self.at(&TokenKind::LeftArrow) {
                return Err(self.error("pattern predicates are not supported"));
            } else {
                return Ok(left);
            }
        }
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => ArithOp::Add,
                TokenKind::Minus => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            left = Expr::Arith(op, Box::new(left), Box::new(self.multiplicative()?));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => ArithOp::Mul,
                TokenKind::Slash => ArithOp::Div,
                TokenKind::Percent => ArithOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            left = Expr::Arith(op, Box::new(left), Box::new(self.unary()?));
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&TokenKind::Minus) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat(&TokenKind::Plus) {
            return self.unary();
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.atom()?;
        while self.eat(&TokenKind::Dot) {
            let key = self.name("property name")?;
            expr = Expr::Property(Box::new(expr), key);
        }
        Ok(expr)
    }

    fn atom(&mut self) -> Result<Expr> {
        let token = self.peek();
        match &token.kind {
            TokenKind::Int(n) => {
                let n = *n;
                self.advance();
                Ok(Expr::Literal(Literal::Int(n)))
            }
            TokenKind::Float(f) => {
                let f = *f;
                self.advance();
                Ok(Expr::Literal(Literal::Float(f)))
            }
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance();
                Ok(Expr::Literal(Literal::Str(s)))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.eat(&TokenKind::RBracket) {
                    loop {
                        items.push(self.expr()?);
                        if self.eat(&TokenKind::RBracket) {
                            break;
                        }
                        self.expect(&TokenKind::Comma, "',' or ']'")?;
                    }
                }
                Ok(Expr::List(items))
            }
            TokenKind::Quoted(name) => {
                let name = name.clone();
                self.advance();
                Ok(Expr::Variable(name))
            }
            TokenKind::Ident(word) => {
                let word = word.clone();
                match word.to_ascii_lowercase().as_str() {
                    "true" => {
                        self.advance();
                        return Ok(Expr::Literal(Literal::Bool(true)));
                    }
                    "false" => {
                        self.advance();
                        return Ok(Expr::Literal(Literal::Bool(false)));
                    }
                    "null" => {
                        self.advance();
                        return Ok(Expr::Literal(Literal::Null));
                    }
                    _ => {}
                }
                if matches!(self.peek_at(1).kind, TokenKind::LParen) {
                    return self.call(word);
                }
                self.advance();
                Ok(Expr::Variable(word))
            }
            TokenKind::LBrace => Err(self.error("map literals are not supported")),
            _ => Err(self.error("expected an expression")),
        }
    }

    fn call(&mut self, name: String) -> Result<Expr> {
        let lower = name.to_ascii_lowercase();
        if !AGGREGATES.contains(&lower.as_str()) && !SCALARS.contains(&lower.as_str()) {
            return Err(self.error(format!("unknown function '{name}'")));
        }
        self.advance();
        self.expect(&TokenKind::LParen, "'('")?;

        if self.eat(&TokenKind::Star) {
            if lower != "count" {
                return Err(self.error("only count(*) accepts '*'"));
            }
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(Expr::Call {
                name: lower,
                distinct: false,
                star: true,
                args: Vec::new(),
            });
        }

        let distinct = self.eat_keyword("DISTINCT");
        let mut args = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                args.push(self.expr()?);
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                self.expect(&TokenKind::Comma, "',' or ')'")?;
            }
        }
        let expected = match lower.as_str() {
            "coalesce" => None,
            _ => Some(1),
        };
        if expected.is_some_and(|n| args.len() != n) || args.is_empty() {
            return Err(self.error(format!("wrong number of arguments to {name}()")));
        }
        Ok(Expr::Call {
            name: lower,
            distinct,
            star: false,
            args,
        })
    }
}
