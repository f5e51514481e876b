//! SQL Lexer - Tokenizes SQL input text into a stream of positioned tokens

use std::{fmt::Display, iter::Peekable, str::Chars};

use crate::error::{Error, Result};

/// Represents a single lexical token in the SQL input
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// SQL keyword
    Keyword(Keyword),
    /// Identifier such as table name or column name. Unquoted identifiers
    /// are lower-cased, quoted ones are kept verbatim.
    Ident(String),
    /// String literal
    String(String),
    /// Numeric literal (integer, decimal or exponent form)
    Number(String),
    OpenParen,
    CloseParen,
    Comma,
    Semicolon,
    Period,
    Asterisk,
    Plus,
    Minus,
    Slash,
    Percent,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    /// `||`
    Concat,
    /// `@>`
    Contains,
    /// `<@`
    ContainedBy,
    /// `->`
    Arrow,
    /// `->>`
    LongArrow,
    /// `::`
    DoubleColon,
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Token::Keyword(keyword) => keyword.to_str(),
            Token::Ident(ident) => ident,
            Token::String(v) => return write!(f, "'{}'", v),
            Token::Number(n) => n,
            Token::OpenParen => "(",
            Token::CloseParen => ")",
            Token::Comma => ",",
            Token::Semicolon => ";",
            Token::Period => ".",
            Token::Asterisk => "*",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Equal => "=",
            Token::NotEqual => "<>",
            Token::LessThan => "<",
            Token::LessThanOrEqual => "<=",
            Token::GreaterThan => ">",
            Token::GreaterThanOrEqual => ">=",
            Token::Concat => "||",
            Token::Contains => "@>",
            Token::ContainedBy => "<@",
            Token::Arrow => "->",
            Token::LongArrow => "->>",
            Token::DoubleColon => "::",
        })
    }
}

macro_rules! keywords {
    ($($variant:ident => $text:literal,)*) => {
        /// SQL keywords
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Keyword {
            $($variant,)*
        }

        impl Keyword {
            /// Attempts to parse a string as a keyword (case-insensitive)
            pub fn from_str(ident: &str) -> Option<Keyword> {
                Some(match ident.to_uppercase().as_ref() {
                    $($text => Keyword::$variant,)*
                    _ => return None,
                })
            }

            /// Returns the uppercase string representation of the keyword
            pub fn to_str(&self) -> &'static str {
                match self {
                    $(Keyword::$variant => $text,)*
                }
            }
        }
    };
}

keywords! {
    All => "ALL",
    And => "AND",
    As => "AS",
    Asc => "ASC",
    Begin => "BEGIN",
    Between => "BETWEEN",
    By => "BY",
    Case => "CASE",
    Cast => "CAST",
    Commit => "COMMIT",
    Create => "CREATE",
    Cross => "CROSS",
    Default => "DEFAULT",
    Delete => "DELETE",
    Desc => "DESC",
    Distinct => "DISTINCT",
    Drop => "DROP",
    Else => "ELSE",
    End => "END",
    Exists => "EXISTS",
    False => "FALSE",
    First => "FIRST",
    From => "FROM",
    Full => "FULL",
    Group => "GROUP",
    Having => "HAVING",
    If => "IF",
    Ilike => "ILIKE",
    In => "IN",
    Inner => "INNER",
    Insert => "INSERT",
    Into => "INTO",
    Is => "IS",
    Isolation => "ISOLATION",
    Join => "JOIN",
    Key => "KEY",
    Last => "LAST",
    Left => "LEFT",
    Level => "LEVEL",
    Like => "LIKE",
    Limit => "LIMIT",
    Natural => "NATURAL",
    Not => "NOT",
    Null => "NULL",
    Nulls => "NULLS",
    Offset => "OFFSET",
    On => "ON",
    Or => "OR",
    Order => "ORDER",
    Outer => "OUTER",
    Primary => "PRIMARY",
    Right => "RIGHT",
    Rollback => "ROLLBACK",
    Schema => "SCHEMA",
    Select => "SELECT",
    Set => "SET",
    Start => "START",
    Table => "TABLE",
    Then => "THEN",
    Transaction => "TRANSACTION",
    True => "TRUE",
    Unique => "UNIQUE",
    Update => "UPDATE",
    Using => "USING",
    Values => "VALUES",
    When => "WHEN",
    Where => "WHERE",
}

impl Keyword {
    /// Non-reserved keywords may also be used as plain identifiers.
    pub fn is_reserved(&self) -> bool {
        !matches!(
            self,
            Keyword::Begin
                | Keyword::Commit
                | Keyword::First
                | Keyword::Isolation
                | Keyword::Key
                | Keyword::Last
                | Keyword::Level
                | Keyword::Nulls
                | Keyword::Rollback
                | Keyword::Schema
                | Keyword::Start
                | Keyword::Transaction
        )
    }
}

impl Display for Keyword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_str())
    }
}

/// SQL lexical analyzer (lexer/tokenizer)
///
/// Yields each token together with the character offset it starts at.
#[derive(Clone)]
pub struct Lexer<'a> {
    iter: Peekable<Chars<'a>>,
    position: usize,
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<(Token, usize)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(err) = self.erase_whitespace() {
            return Some(Err(err));
        }
        let start = self.position;
        match self.scan() {
            Ok(Some(token)) => Some(Ok((token, start))),
            Ok(None) => self.iter.peek().map(|c| {
                Err(Error::parse(
                    format!("[Lexer] Unexpected character {}", c),
                    start,
                ))
            }),
            Err(err) => Some(Err(err)),
        }
    }
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given SQL text
    pub fn new(sql_text: &'a str) -> Self {
        Self {
            iter: sql_text.chars().peekable(),
            position: 0,
        }
    }

    /// Consumes one character, tracking the offset
    fn bump(&mut self) -> Option<char> {
        let c = self.iter.next()?;
        self.position += 1;
        Some(c)
    }

    /// Looks one character past the next one
    fn peek_second(&self) -> Option<char> {
        self.iter.clone().nth(1)
    }

    /// Consumes the next character if it satisfies the predicate
    fn next_if<F: Fn(char) -> bool>(&mut self, predicate: F) -> Option<char> {
        self.iter.peek().filter(|&c| predicate(*c))?;
        self.bump()
    }

    /// Consumes consecutive characters while they satisfy the predicate
    fn next_while<F: Fn(char) -> bool>(&mut self, predicate: F) -> Option<String> {
        let mut value = String::new();
        while let Some(c) = self.next_if(&predicate) {
            value.push(c);
        }
        Some(value).filter(|v| !v.is_empty())
    }

    /// Removes whitespace and comments from the input stream
    fn erase_whitespace(&mut self) -> Result<()> {
        loop {
            self.next_while(|c| c.is_whitespace());
            match (self.iter.peek().copied(), self.peek_second()) {
                (Some('-'), Some('-')) => {
                    self.next_while(|c| c != '\n');
                }
                (Some('/'), Some('*')) => {
                    let start = self.position;
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.next_if(|c| c == '/').is_some() => break,
                            Some(_) => {}
                            None => {
                                return Err(Error::parse(
                                    "[Lexer] Unterminated block comment",
                                    start,
                                ));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Scans and returns the next token
    fn scan(&mut self) -> Result<Option<Token>> {
        match self.iter.peek().copied() {
            Some('\'') => self.scan_string(),
            Some('"') => self.scan_quoted_ident(),
            Some(c) if c.is_ascii_digit() => Ok(self.scan_number()),
            Some('.') if self.peek_second().is_some_and(|c| c.is_ascii_digit()) => {
                Ok(self.scan_number())
            }
            Some(c) if c.is_alphabetic() || c == '_' => Ok(self.scan_ident()),
            Some(_) => Ok(self.scan_symbol()),
            None => Ok(None),
        }
    }

    /// Scans a string literal (enclosed in single quotes, '' escapes a quote)
    fn scan_string(&mut self) -> Result<Option<Token>> {
        let start = self.position;
        self.bump();
        let mut val = String::new();
        loop {
            match self.bump() {
                Some('\'') if self.next_if(|c| c == '\'').is_some() => val.push('\''),
                Some('\'') => break,
                Some(c) => val.push(c),
                None => return Err(Error::parse("[Lexer] Unexpected end of string", start)),
            }
        }
        Ok(Some(Token::String(val)))
    }

    /// Scans a double-quoted identifier, preserving its case
    fn scan_quoted_ident(&mut self) -> Result<Option<Token>> {
        let start = self.position;
        self.bump();
        let mut val = String::new();
        loop {
            match self.bump() {
                Some('"') if self.next_if(|c| c == '"').is_some() => val.push('"'),
                Some('"') => break,
                Some(c) => val.push(c),
                None => {
                    return Err(Error::parse(
                        "[Lexer] Unterminated quoted identifier",
                        start,
                    ));
                }
            }
        }
        if val.is_empty() {
            return Err(Error::parse("[Lexer] Zero-length quoted identifier", start));
        }
        Ok(Some(Token::Ident(val)))
    }

    /// Scans a numeric literal: digits, optional fraction, optional exponent
    fn scan_number(&mut self) -> Option<Token> {
        let mut val = self.next_while(|c| c.is_ascii_digit()).unwrap_or_default();
        if let Some(sep) = self.next_if(|c| c == '.') {
            val.push(sep);
            while let Some(c) = self.next_if(|c| c.is_ascii_digit()) {
                val.push(c);
            }
        }
        let exponent_follows = matches!(self.iter.peek(), Some('e' | 'E'))
            && self
                .peek_second()
                .is_some_and(|c| c.is_ascii_digit() || c == '+' || c == '-');
        if exponent_follows {
            val.push(self.bump()?);
            if let Some(sign) = self.next_if(|c| c == '+' || c == '-') {
                val.push(sign);
            }
            while let Some(c) = self.next_if(|c| c.is_ascii_digit()) {
                val.push(c);
            }
        }
        Some(Token::Number(val))
    }

    /// Scans an identifier or keyword
    fn scan_ident(&mut self) -> Option<Token> {
        let mut val = self.next_if(|c| c.is_alphabetic() || c == '_')?.to_string();
        while let Some(c) = self.next_if(|c| c.is_alphanumeric() || c == '_' || c == '$') {
            val.push(c);
        }
        // Returns Keyword if matched, otherwise returns as a regular Ident
        Some(Keyword::from_str(&val).map_or(Token::Ident(val.to_lowercase()), Token::Keyword))
    }

    /// Scans a one- or multi-character operator/punctuation token
    fn scan_symbol(&mut self) -> Option<Token> {
        let token = match self.iter.peek().copied()? {
            '*' => Token::Asterisk,
            '(' => Token::OpenParen,
            ')' => Token::CloseParen,
            ',' => Token::Comma,
            ';' => Token::Semicolon,
            '.' => Token::Period,
            '+' => Token::Plus,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '=' => Token::Equal,
            '-' => {
                self.bump();
                return Some(if self.next_if(|c| c == '>').is_some() {
                    if self.next_if(|c| c == '>').is_some() {
                        Token::LongArrow
                    } else {
                        Token::Arrow
                    }
                } else {
                    Token::Minus
                });
            }
            '<' => {
                self.bump();
                return Some(match self.next_if(|c| c == '=' || c == '>' || c == '@') {
                    Some('=') => Token::LessThanOrEqual,
                    Some('>') => Token::NotEqual,
                    Some(_) => Token::ContainedBy,
                    None => Token::LessThan,
                });
            }
            '>' => {
                self.bump();
                return Some(match self.next_if(|c| c == '=') {
                    Some(_) => Token::GreaterThanOrEqual,
                    None => Token::GreaterThan,
                });
            }
            '!' if self.peek_second() == Some('=') => {
                self.bump();
                self.bump();
                return Some(Token::NotEqual);
            }
            '|' if self.peek_second() == Some('|') => {
                self.bump();
                self.bump();
                return Some(Token::Concat);
            }
            '@' if self.peek_second() == Some('>') => {
                self.bump();
                self.bump();
                return Some(Token::Contains);
            }
            ':' if self.peek_second() == Some(':') => {
                self.bump();
                self.bump();
                return Some(Token::DoubleColon);
            }
            _ => return None,
        };
        self.bump();
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::Lexer;
    use crate::{
        error::{Error, Result},
        sql::parser::lexer::{Keyword, Token},
    };

    fn tokens(sql: &str) -> Result<Vec<Token>> {
        Lexer::new(sql)
            .map(|r| r.map(|(token, _)| token))
            .collect::<Result<Vec<_>>>()
    }

    #[test]
    fn test_lexer_create_table() -> Result<()> {
        let tokens1 = tokens(
            "CREATE table tbl
                (
                    id1 int primary key,
                    id2 integer
                );
                ",
        )?;

        assert_eq!(
            tokens1,
            vec![
                Token::Keyword(Keyword::Create),
                Token::Keyword(Keyword::Table),
                Token::Ident("tbl".to_string()),
                Token::OpenParen,
                Token::Ident("id1".to_string()),
                Token::Ident("int".to_string()),
                Token::Keyword(Keyword::Primary),
                Token::Keyword(Keyword::Key),
                Token::Comma,
                Token::Ident("id2".to_string()),
                Token::Ident("integer".to_string()),
                Token::CloseParen,
                Token::Semicolon
            ]
        );
        Ok(())
    }

    #[test]
    fn test_lexer_insert_into() -> Result<()> {
        let tokens1 = tokens("insert into tbl values (1, 2, 'it''s', true, false, 4.55, 1e3);")?;

        assert_eq!(
            tokens1,
            vec![
                Token::Keyword(Keyword::Insert),
                Token::Keyword(Keyword::Into),
                Token::Ident("tbl".to_string()),
                Token::Keyword(Keyword::Values),
                Token::OpenParen,
                Token::Number("1".to_string()),
                Token::Comma,
                Token::Number("2".to_string()),
                Token::Comma,
                Token::String("it's".to_string()),
                Token::Comma,
                Token::Keyword(Keyword::True),
                Token::Comma,
                Token::Keyword(Keyword::False),
                Token::Comma,
                Token::Number("4.55".to_string()),
                Token::Comma,
                Token::Number("1e3".to_string()),
                Token::CloseParen,
                Token::Semicolon,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_lexer_operators_and_comments() -> Result<()> {
        let tokens1 = tokens(
            "select a->>'k', b->0, c::text -- trailing
             from \"MixedCase\" /* block */ where x <> 1 and y != 2 and d @> e and e <@ d and s || t <= 3",
        )?;
        assert_eq!(
            tokens1,
            vec![
                Token::Keyword(Keyword::Select),
                Token::Ident("a".into()),
                Token::LongArrow,
                Token::String("k".into()),
                Token::Comma,
                Token::Ident("b".into()),
                Token::Arrow,
                Token::Number("0".into()),
                Token::Comma,
                Token::Ident("c".into()),
                Token::DoubleColon,
                Token::Ident("text".into()),
                Token::Keyword(Keyword::From),
                Token::Ident("MixedCase".into()),
                Token::Keyword(Keyword::Where),
                Token::Ident("x".into()),
                Token::NotEqual,
                Token::Number("1".into()),
                Token::Keyword(Keyword::And),
                Token::Ident("y".into()),
                Token::NotEqual,
                Token::Number("2".into()),
                Token::Keyword(Keyword::And),
                Token::Ident("d".into()),
                Token::Contains,
                Token::Ident("e".into()),
                Token::Keyword(Keyword::And),
                Token::Ident("e".into()),
                Token::ContainedBy,
                Token::Ident("d".into()),
                Token::Keyword(Keyword::And),
                Token::Ident("s".into()),
                Token::Concat,
                Token::Ident("t".into()),
                Token::LessThanOrEqual,
                Token::Number("3".into()),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_lexer_positions_and_errors() {
        let positions = Lexer::new("select  x")
            .map(|r| r.map(|(_, pos)| pos))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(positions, vec![0, 8]);

        assert_eq!(
            tokens("select 'abc"),
            Err(Error::parse("[Lexer] Unexpected end of string", 7))
        );
        assert!(matches!(
            tokens("select #"),
            Err(Error::Parse { position: 7, .. })
        ));
    }
}
