//! Tokenizer for IQL.
//!
//! Every token carries its byte offset so parse errors can point at the
//! offending position.

use super::IqlError;

/// Token kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifier or keyword (keywords are matched case-insensitively by
    /// the parser).
    Ident(String),
    /// Quoted string literal (single or double quotes).
    Str(String),
    /// Numeric literal.
    Number(f64),
    /// `=`
    Eq,
    /// `!=`
    Neq,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Gte,
    /// `<=`
    Lte,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `,`
    Comma,
    /// `.`
    Dot,
}

/// One token with its source offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// What was lexed.
    pub kind: TokenKind,
    /// Byte offset into the query text.
    pub offset: usize,
}

/// Tokenize a query string.
pub fn tokenize(input: &str) -> Result<Vec<Token>, IqlError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push(Token { kind: TokenKind::LParen, offset: i });
                i += 1;
            }
            ')' => {
                tokens.push(Token { kind: TokenKind::RParen, offset: i });
                i += 1;
            }
            '[' => {
                tokens.push(Token { kind: TokenKind::LBracket, offset: i });
                i += 1;
            }
            ']' => {
                tokens.push(Token { kind: TokenKind::RBracket, offset: i });
                i += 1;
            }
            ',' => {
                tokens.push(Token { kind: TokenKind::Comma, offset: i });
                i += 1;
            }
            '.' => {
                tokens.push(Token { kind: TokenKind::Dot, offset: i });
                i += 1;
            }
            '=' => {
                tokens.push(Token { kind: TokenKind::Eq, offset: i });
                i += 1;
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Neq, offset: i });
                    i += 2;
                } else {
                    return Err(IqlError::syntax("expected '=' after '!'", i));
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Gte, offset: i });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Gt, offset: i });
                    i += 1;
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Lte, offset: i });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Lt, offset: i });
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let start = i;
                i += 1;
                let mut text = String::new();
                loop {
                    match bytes.get(i) {
                        None => return Err(IqlError::syntax("unterminated string", start)),
                        Some(&b) if b as char == quote => {
                            i += 1;
                            break;
                        }
                        Some(&b) => {
                            text.push(b as char);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token { kind: TokenKind::Str(text), offset: start });
            }
            '0'..='9' | '-' => {
                let start = i;
                i += 1;
                while i < bytes.len()
                    && (bytes[i].is_ascii_digit() || bytes[i] == b'.' || bytes[i] == b'e')
                {
                    i += 1;
                }
                let text = &input[start..i];
                let number = text
                    .parse::<f64>()
                    .map_err(|_| IqlError::syntax(format!("bad number '{text}'"), start))?;
                tokens.push(Token { kind: TokenKind::Number(number), offset: start });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric()
                        || bytes[i] == b'_'
                        || bytes[i] == b'-')
                {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(input[start..i].to_string()),
                    offset: start,
                });
            }
            other => {
                return Err(IqlError::syntax(format!("unexpected character '{other}'"), i));
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_find_query() {
        let tokens =
            tokenize("FIND resources WHERE type = 'database' LIMIT 5").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Ident("FIND".into()));
        assert_eq!(tokens[4].kind, TokenKind::Eq);
        assert_eq!(tokens[5].kind, TokenKind::Str("database".into()));
        assert_eq!(tokens[7].kind, TokenKind::Number(5.0));
    }

    #[test]
    fn test_tokenize_dotted_field() {
        let tokens = tokenize("tag.env != \"prod\"").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Ident("tag".into()));
        assert_eq!(tokens[1].kind, TokenKind::Dot);
        assert_eq!(tokens[2].kind, TokenKind::Ident("env".into()));
        assert_eq!(tokens[3].kind, TokenKind::Neq);
    }

    #[test]
    fn test_offsets_point_at_tokens() {
        let query = "FIND resources";
        let tokens = tokenize(query).unwrap();
        assert_eq!(tokens[0].offset, 0);
        assert_eq!(tokens[1].offset, 5);
    }

    #[test]
    fn test_unterminated_string_errors_at_open_quote() {
        let err = tokenize("name = 'api").unwrap_err();
        match err {
            IqlError::Syntax { offset, .. } => assert_eq!(offset, 7),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_list_literal() {
        let tokens = tokenize("status IN ['running', 'stopped']").unwrap();
        assert_eq!(tokens[2].kind, TokenKind::LBracket);
        assert_eq!(tokens[4].kind, TokenKind::Comma);
        assert_eq!(tokens[6].kind, TokenKind::RBracket);
    }
}
