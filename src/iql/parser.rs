//! Recursive-descent parser for IQL.
//!
//! Grammar (keywords case-insensitive):
//!
//! ```text
//! query     := find | summarize
//! find      := "FIND" ( "resources" | "DOWNSTREAM" "OF" str | "UPSTREAM" "OF" str
//!                      | "PATH" "FROM" str "TO" str )
//!              [ "DEPTH" int ] [ "WHERE" expr ] [ "LIMIT" int ]
//! summarize := "SUMMARIZE" ident "BY" field [ "WHERE" expr ]
//! expr      := or_term { "OR" or_term }
//! or_term   := and_term { "AND" and_term }
//! and_term  := [ "NOT" ] primary
//! primary   := "(" expr ")" | call | compare
//! ```

use super::ast::{CompareOp, Expr, FieldPath, FindSource, Func, Literal, Query};
use super::lexer::{tokenize, Token, TokenKind};
use super::IqlError;

/// Parse a query string into an AST.
pub fn parse(input: &str) -> Result<Query, IqlError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
    };
    let query = parser.parse_query()?;
    if let Some(extra) = parser.peek() {
        return Err(IqlError::syntax(
            format!("unexpected trailing input near '{}'", describe(&extra.kind)),
            extra.offset,
        ));
    }
    Ok(query)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.peek().map(|t| t.offset).unwrap_or(self.end)
    }

    /// Consume the next token if it is the given keyword.
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(
            self.peek(),
            Some(Token { kind: TokenKind::Ident(word), .. }) if word.eq_ignore_ascii_case(keyword)
        )
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), IqlError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(IqlError::syntax(
                format!("expected '{}'", keyword.to_uppercase()),
                self.offset(),
            ))
        }
    }

    fn expect_string(&mut self, what: &str) -> Result<String, IqlError> {
        let offset = self.offset();
        match self.next() {
            Some(Token { kind: TokenKind::Str(text), .. }) => Ok(text),
            _ => Err(IqlError::syntax(format!("expected {what} string"), offset)),
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, IqlError> {
        let offset = self.offset();
        match self.next() {
            Some(Token { kind: TokenKind::Ident(word), .. }) => Ok(word),
            _ => Err(IqlError::syntax(format!("expected {what}"), offset)),
        }
    }

    fn expect_integer(&mut self, what: &str) -> Result<i64, IqlError> {
        let offset = self.offset();
        match self.next() {
            Some(Token { kind: TokenKind::Number(n), .. }) if n.fract() == 0.0 => Ok(n as i64),
            _ => Err(IqlError::syntax(format!("expected integer {what}"), offset)),
        }
    }

    fn parse_query(&mut self) -> Result<Query, IqlError> {
        if self.eat_keyword("find") {
            self.parse_find()
        } else if self.eat_keyword("summarize") {
            self.parse_summarize()
        } else {
            Err(IqlError::syntax(
                "query must start with FIND or SUMMARIZE",
                self.offset(),
            ))
        }
    }

    fn parse_find(&mut self) -> Result<Query, IqlError> {
        let source = if self.eat_keyword("resources") {
            FindSource::Resources
        } else if self.eat_keyword("downstream") {
            self.expect_keyword("of")?;
            FindSource::Downstream(self.expect_string("node id")?)
        } else if self.eat_keyword("upstream") {
            self.expect_keyword("of")?;
            FindSource::Upstream(self.expect_string("node id")?)
        } else if self.eat_keyword("path") {
            self.expect_keyword("from")?;
            let from = self.expect_string("node id")?;
            self.expect_keyword("to")?;
            let to = self.expect_string("node id")?;
            FindSource::Path { from, to }
        } else {
            return Err(IqlError::syntax(
                "expected 'resources', 'DOWNSTREAM OF', 'UPSTREAM OF', or 'PATH FROM'",
                self.offset(),
            ));
        };

        let mut depth = None;
        if self.eat_keyword("depth") {
            let offset = self.offset();
            let n = self.expect_integer("depth")?;
            if n < 0 {
                return Err(IqlError::syntax("depth must be non-negative", offset));
            }
            depth = Some(n as u32);
        }

        let filter = if self.eat_keyword("where") {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let mut limit = None;
        if self.eat_keyword("limit") {
            let offset = self.offset();
            let n = self.expect_integer("limit")?;
            if n < 1 {
                return Err(IqlError::syntax("limit must be positive", offset));
            }
            limit = Some(n as usize);
        }

        Ok(Query::Find {
            source,
            depth,
            filter,
            limit,
        })
    }

    fn parse_summarize(&mut self) -> Result<Query, IqlError> {
        let metric = self.expect_ident("metric")?;
        self.expect_keyword("by")?;
        let by = self.parse_field_path()?;
        let filter = if self.eat_keyword("where") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Query::Summarize { metric, by, filter })
    }

    fn parse_expr(&mut self) -> Result<Expr, IqlError> {
        let mut left = self.parse_or_term()?;
        while self.eat_keyword("or") {
            let right = self.parse_or_term()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_or_term(&mut self) -> Result<Expr, IqlError> {
        let mut left = self.parse_and_term()?;
        while self.eat_keyword("and") {
            let right = self.parse_and_term()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and_term(&mut self) -> Result<Expr, IqlError> {
        if self.eat_keyword("not") {
            let inner = self.parse_primary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, IqlError> {
        if matches!(self.peek(), Some(Token { kind: TokenKind::LParen, .. })) {
            self.pos += 1;
            let inner = self.parse_expr()?;
            let offset = self.offset();
            match self.next() {
                Some(Token { kind: TokenKind::RParen, .. }) => return Ok(inner),
                _ => return Err(IqlError::syntax("expected ')'", offset)),
            }
        }

        // Function call: known name followed by '('.
        if let Some(Token { kind: TokenKind::Ident(word), .. }) = self.peek() {
            if Func::from_name(word).is_some()
                && matches!(
                    self.tokens.get(self.pos + 1),
                    Some(Token { kind: TokenKind::LParen, .. })
                )
            {
                return self.parse_call();
            }
        }

        self.parse_compare()
    }

    fn parse_call(&mut self) -> Result<Expr, IqlError> {
        let offset = self.offset();
        let name = self.expect_ident("function name")?;
        let func = Func::from_name(&name)
            .ok_or_else(|| IqlError::syntax(format!("unknown function '{name}'"), offset))?;

        // '('
        self.pos += 1;
        let mut args = Vec::new();
        if !matches!(self.peek(), Some(Token { kind: TokenKind::RParen, .. })) {
            loop {
                args.push(self.parse_literal()?);
                if matches!(self.peek(), Some(Token { kind: TokenKind::Comma, .. })) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        let close = self.offset();
        match self.next() {
            Some(Token { kind: TokenKind::RParen, .. }) => {}
            _ => return Err(IqlError::syntax("expected ')' after arguments", close)),
        }

        Ok(Expr::Call { func, args })
    }

    fn parse_compare(&mut self) -> Result<Expr, IqlError> {
        let field = self.parse_field_path()?;
        let op = self.parse_op()?;
        let value = self.parse_literal()?;
        Ok(Expr::Compare { field, op, value })
    }

    fn parse_field_path(&mut self) -> Result<FieldPath, IqlError> {
        let mut segments = vec![self.expect_ident("field")?];
        while matches!(self.peek(), Some(Token { kind: TokenKind::Dot, .. })) {
            self.pos += 1;
            segments.push(self.expect_ident("field segment")?);
        }
        Ok(FieldPath(segments))
    }

    fn parse_op(&mut self) -> Result<CompareOp, IqlError> {
        let offset = self.offset();
        match self.next() {
            Some(Token { kind, .. }) => match kind {
                TokenKind::Eq => Ok(CompareOp::Eq),
                TokenKind::Neq => Ok(CompareOp::Neq),
                TokenKind::Gt => Ok(CompareOp::Gt),
                TokenKind::Lt => Ok(CompareOp::Lt),
                TokenKind::Gte => Ok(CompareOp::Gte),
                TokenKind::Lte => Ok(CompareOp::Lte),
                TokenKind::Ident(word) if word.eq_ignore_ascii_case("like") => Ok(CompareOp::Like),
                TokenKind::Ident(word) if word.eq_ignore_ascii_case("in") => Ok(CompareOp::In),
                TokenKind::Ident(word) if word.eq_ignore_ascii_case("matches") => {
                    Ok(CompareOp::Matches)
                }
                other => Err(IqlError::syntax(
                    format!("expected comparison operator, found '{}'", describe(&other)),
                    offset,
                )),
            },
            None => Err(IqlError::syntax("expected comparison operator", offset)),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal, IqlError> {
        let offset = self.offset();
        match self.next() {
            Some(Token { kind: TokenKind::Str(text), .. }) => Ok(Literal::Str(text)),
            Some(Token { kind: TokenKind::Number(n), .. }) => Ok(Literal::Number(n)),
            Some(Token { kind: TokenKind::Ident(word), .. })
                if word.eq_ignore_ascii_case("true") =>
            {
                Ok(Literal::Bool(true))
            }
            Some(Token { kind: TokenKind::Ident(word), .. })
                if word.eq_ignore_ascii_case("false") =>
            {
                Ok(Literal::Bool(false))
            }
            Some(Token { kind: TokenKind::LBracket, .. }) => {
                let mut items = Vec::new();
                if !matches!(self.peek(), Some(Token { kind: TokenKind::RBracket, .. })) {
                    loop {
                        items.push(self.parse_literal()?);
                        if matches!(self.peek(), Some(Token { kind: TokenKind::Comma, .. })) {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                let close = self.offset();
                match self.next() {
                    Some(Token { kind: TokenKind::RBracket, .. }) => Ok(Literal::List(items)),
                    _ => Err(IqlError::syntax("expected ']'", close)),
                }
            }
            _ => Err(IqlError::syntax("expected value", offset)),
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(word) => word.clone(),
        TokenKind::Str(text) => format!("'{text}'"),
        TokenKind::Number(n) => n.to_string(),
        TokenKind::Eq => "=".into(),
        TokenKind::Neq => "!=".into(),
        TokenKind::Gt => ">".into(),
        TokenKind::Lt => "<".into(),
        TokenKind::Gte => ">=".into(),
        TokenKind::Lte => "<=".into(),
        TokenKind::LParen => "(".into(),
        TokenKind::RParen => ")".into(),
        TokenKind::LBracket => "[".into(),
        TokenKind::RBracket => "]".into(),
        TokenKind::Comma => ",".into(),
        TokenKind::Dot => ".".into(),
    }
}
