use std::{iter::Peekable, ops::Add};

use rust_decimal::Decimal;

use crate::{
    error::{Error, Result},
    sql::{
        parser::{
            ast::{
                AggregateFunction, BinaryOperator, Column, Expression, FromItem, InsertSource,
                JoinConstraint, JoinType, ObjectName, OrderDirection, OrderItem, Select,
                SelectItem, Statement, UnaryOperator,
            },
            lexer::{Keyword, Lexer, Token},
        },
        types::{DataType, TypeName, Value},
    },
    storage::IsolationLevel,
};

pub mod ast;
mod lexer;

/// Parses `;`-separated SQL text into statements.
pub fn parse(sql: &str) -> Result<Vec<Statement>> {
    Parser::new(sql).parse()
}

/// Operator precedence; higher binds tighter.
type Precedence = u8;

const PRECEDENCE_OR: Precedence = 1;
const PRECEDENCE_AND: Precedence = 2;
const PRECEDENCE_COMPARISON: Precedence = 3;
const PRECEDENCE_CONCAT: Precedence = 4;
const PRECEDENCE_ADDITIVE: Precedence = 5;
const PRECEDENCE_MULTIPLICATIVE: Precedence = 6;
const PRECEDENCE_LIKE: Precedence = 7;
const PRECEDENCE_BETWEEN: Precedence = 8;
const PRECEDENCE_IN: Precedence = 9;
const PRECEDENCE_IS: Precedence = 10;
const PRECEDENCE_NOT: Precedence = 11;
const PRECEDENCE_SIGN: Precedence = 12;
const PRECEDENCE_CAST: Precedence = 13;

/// BETWEEN bounds and LIKE patterns may be arithmetic or concatenations,
/// but never comparisons or boolean connectives.
const PRECEDENCE_OPERAND: Precedence = PRECEDENCE_COMPARISON + 1;

/// Operator associativity.
enum Associativity {
    Left,
    Right,
}

impl Add<Associativity> for Precedence {
    type Output = Self;

    fn add(self, rhs: Associativity) -> Self {
        self + match rhs {
            Associativity::Left => 1,
            Associativity::Right => 0,
        }
    }
}

/// Prefix operators
enum PrefixOperator {
    Not,
    Minus,
    Plus,
}

impl PrefixOperator {
    fn precedence(&self) -> Precedence {
        match self {
            Self::Not => PRECEDENCE_NOT,
            Self::Minus | Self::Plus => PRECEDENCE_SIGN,
        }
    }

    fn into_expression(self, rhs: Expression) -> Expression {
        let op = match self {
            Self::Not => UnaryOperator::Not,
            Self::Minus => UnaryOperator::Minus,
            Self::Plus => UnaryOperator::Plus,
        };
        Expression::Unary(op, Box::new(rhs))
    }
}

/// Infix operators, all left-associative
struct InfixOperator(BinaryOperator);

impl InfixOperator {
    fn from_token(token: &Token) -> Option<Self> {
        Some(Self(match token {
            Token::Keyword(Keyword::Or) => BinaryOperator::Or,
            Token::Keyword(Keyword::And) => BinaryOperator::And,
            Token::Equal => BinaryOperator::Equal,
            Token::NotEqual => BinaryOperator::NotEqual,
            Token::LessThan => BinaryOperator::LessThan,
            Token::LessThanOrEqual => BinaryOperator::LessThanOrEqual,
            Token::GreaterThan => BinaryOperator::GreaterThan,
            Token::GreaterThanOrEqual => BinaryOperator::GreaterThanOrEqual,
            Token::Concat => BinaryOperator::Concat,
            Token::Contains => BinaryOperator::Contains,
            Token::ContainedBy => BinaryOperator::ContainedBy,
            Token::Arrow => BinaryOperator::JsonGet,
            Token::LongArrow => BinaryOperator::JsonGetText,
            Token::Plus => BinaryOperator::Add,
            Token::Minus => BinaryOperator::Subtract,
            Token::Asterisk => BinaryOperator::Multiply,
            Token::Slash => BinaryOperator::Divide,
            Token::Percent => BinaryOperator::Remainder,
            _ => return None,
        }))
    }

    fn precedence(&self) -> Precedence {
        match self.0 {
            BinaryOperator::Or => PRECEDENCE_OR,
            BinaryOperator::And => PRECEDENCE_AND,
            BinaryOperator::Equal
            | BinaryOperator::NotEqual
            | BinaryOperator::LessThan
            | BinaryOperator::LessThanOrEqual
            | BinaryOperator::GreaterThan
            | BinaryOperator::GreaterThanOrEqual => PRECEDENCE_COMPARISON,
            BinaryOperator::Concat
            | BinaryOperator::Contains
            | BinaryOperator::ContainedBy
            | BinaryOperator::JsonGet
            | BinaryOperator::JsonGetText => PRECEDENCE_CONCAT,
            BinaryOperator::Add | BinaryOperator::Subtract => PRECEDENCE_ADDITIVE,
            BinaryOperator::Multiply | BinaryOperator::Divide | BinaryOperator::Remainder => {
                PRECEDENCE_MULTIPLICATIVE
            }
        }
    }
}

/// Postfix operator families, recognized before their operands are parsed
enum PostfixOperator {
    Is,
    In { negated: bool },
    Between { negated: bool },
    Like { negated: bool },
    Cast,
}

impl PostfixOperator {
    fn precedence(&self) -> Precedence {
        match self {
            Self::Is => PRECEDENCE_IS,
            Self::In { .. } => PRECEDENCE_IN,
            Self::Between { .. } => PRECEDENCE_BETWEEN,
            Self::Like { .. } => PRECEDENCE_LIKE,
            Self::Cast => PRECEDENCE_CAST,
        }
    }
}

/// SQL Parser - Converts tokens into Abstract Syntax Tree (AST)
pub struct Parser<'a> {
    lexer: Peekable<Lexer<'a>>,
    /// Offset of the most recently consumed token
    position: usize,
    /// Offset just past the input, reported for unexpected end of input
    end: usize,
}

impl<'a> Parser<'a> {
    /// Creates a new parser for the given SQL input
    pub fn new(input: &'a str) -> Self {
        Parser {
            lexer: Lexer::new(input).peekable(),
            position: 0,
            end: input.chars().count(),
        }
    }

    /// Parses the whole input. Statements are separated by `;`, the last
    /// separator is optional.
    pub fn parse(&mut self) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        loop {
            while self.next_if_token(Token::Semicolon).is_some() {}
            if self.peek()?.is_none() {
                break;
            }
            statements.push(self.parse_statement()?);
            match self.peek()? {
                None | Some(Token::Semicolon) => {}
                Some(token) => {
                    return Err(Error::parse(
                        format!("[Parser] Unexpected token {}", token),
                        self.peek_position(),
                    ));
                }
            }
        }
        Ok(statements)
    }

    /// Parses a statement based on the first token
    fn parse_statement(&mut self) -> Result<Statement> {
        match self.peek()? {
            Some(Token::Keyword(Keyword::Create)) => self.parse_create(),
            Some(Token::Keyword(Keyword::Drop)) => self.parse_drop(),
            Some(Token::Keyword(Keyword::Select)) => {
                Ok(Statement::Select(Box::new(self.parse_select()?)))
            }
            Some(Token::Keyword(Keyword::Insert)) => self.parse_insert(),
            Some(Token::Keyword(Keyword::Update)) => self.parse_update(),
            Some(Token::Keyword(Keyword::Delete)) => self.parse_delete(),
            Some(Token::Keyword(Keyword::Begin | Keyword::Start)) => self.parse_begin(),
            Some(Token::Keyword(Keyword::Commit | Keyword::End)) => {
                self.next()?;
                self.next_if_token(Token::Keyword(Keyword::Transaction));
                Ok(Statement::Commit)
            }
            Some(Token::Keyword(Keyword::Rollback)) => {
                self.next()?;
                self.next_if_token(Token::Keyword(Keyword::Transaction));
                Ok(Statement::Rollback)
            }
            Some(token) => Err(Error::parse(
                format!("[Parser] Unexpected token {}", token),
                self.peek_position(),
            )),
            None => Err(Error::parse("[Parser] Unexpected end of input", self.end)),
        }
    }

    /// Parses BEGIN [TRANSACTION] / START TRANSACTION with an optional
    /// isolation level
    fn parse_begin(&mut self) -> Result<Statement> {
        match self.next()? {
            Token::Keyword(Keyword::Start) => {
                self.next_expect(Token::Keyword(Keyword::Transaction))?
            }
            _ => {
                self.next_if_token(Token::Keyword(Keyword::Transaction));
            }
        }
        let mut isolation = None;
        if self.next_if_token(Token::Keyword(Keyword::Isolation)).is_some() {
            self.next_expect(Token::Keyword(Keyword::Level))?;
            let level = match self.next_ident()?.as_str() {
                "read" => match self.next_ident()?.as_str() {
                    "uncommitted" => IsolationLevel::ReadUncommitted,
                    "committed" => IsolationLevel::ReadCommitted,
                    other => return Err(self.unexpected_word(other)),
                },
                "repeatable" => {
                    self.expect_word("read")?;
                    IsolationLevel::RepeatableRead
                }
                "serializable" => IsolationLevel::Serializable,
                other => return Err(self.unexpected_word(other)),
            };
            isolation = Some(level);
        }
        Ok(Statement::Begin { isolation })
    }

    /// Parses CREATE TABLE / CREATE SCHEMA
    fn parse_create(&mut self) -> Result<Statement> {
        self.next_expect(Token::Keyword(Keyword::Create))?;
        match self.next()? {
            Token::Keyword(Keyword::Table) => self.parse_create_table(),
            Token::Keyword(Keyword::Schema) => {
                let if_not_exists = self.parse_if_not_exists()?;
                Ok(Statement::CreateSchema {
                    name: self.next_ident()?,
                    if_not_exists,
                })
            }
            token => Err(self.unexpected(&token)),
        }
    }

    /// Parses CREATE TABLE statement
    fn parse_create_table(&mut self) -> Result<Statement> {
        let if_not_exists = self.parse_if_not_exists()?;
        let name = self.parse_object_name()?;
        self.next_expect(Token::OpenParen)?;

        let mut columns = Vec::new();
        loop {
            columns.push(self.parse_column()?);
            if self.next_if_token(Token::Comma).is_none() {
                break;
            }
        }
        self.next_expect(Token::CloseParen)?;
        Ok(Statement::CreateTable {
            name,
            columns,
            if_not_exists,
        })
    }

    /// Parses column definition in CREATE TABLE
    fn parse_column(&mut self) -> Result<Column> {
        let mut column = Column {
            name: self.next_ident()?,
            datatype: self.parse_type_name()?,
            nullable: None,
            default: None,
            primary_key: false,
            unique: false,
        };

        // Parse column constraints (NULL, NOT NULL, DEFAULT, PRIMARY KEY, UNIQUE)
        loop {
            match self.peek()? {
                Some(Token::Keyword(Keyword::Null)) => {
                    self.next()?;
                    column.nullable = Some(true);
                }
                Some(Token::Keyword(Keyword::Not)) => {
                    self.next()?;
                    self.next_expect(Token::Keyword(Keyword::Null))?;
                    column.nullable = Some(false);
                }
                Some(Token::Keyword(Keyword::Default)) => {
                    self.next()?;
                    column.default = Some(self.parse_expression()?);
                }
                Some(Token::Keyword(Keyword::Primary)) => {
                    self.next()?;
                    self.next_expect(Token::Keyword(Keyword::Key))?;
                    column.primary_key = true;
                }
                Some(Token::Keyword(Keyword::Unique)) => {
                    self.next()?;
                    column.unique = true;
                }
                _ => break,
            }
        }

        Ok(column)
    }

    /// Parses a type name such as `integer`, `varchar(20)`, `numeric(10, 2)`,
    /// `double precision` or `timestamp with time zone`
    fn parse_type_name(&mut self) -> Result<TypeName> {
        let position = self.peek_position();
        let mut name = self.next_ident()?;
        match name.as_str() {
            "double" if self.next_if_word("precision") => name.push_str(" precision"),
            "character" if self.next_if_word("varying") => name.push_str(" varying"),
            "timestamp" | "time" => {
                for qualifier in ["with", "without"] {
                    if self.next_if_word(qualifier) {
                        self.expect_word("time")?;
                        self.expect_word("zone")?;
                        name = format!("{} {} time zone", name, qualifier);
                        break;
                    }
                }
            }
            _ => {}
        }

        let mut args = Vec::new();
        if self.next_if_token(Token::OpenParen).is_some() {
            loop {
                match self.next()? {
                    Token::Number(n) => args.push(n.parse::<u32>().map_err(|_| {
                        Error::parse(
                            format!("[Parser] Invalid type modifier {}", n),
                            self.position,
                        )
                    })?),
                    token => return Err(self.unexpected(&token)),
                }
                if self.next_if_token(Token::Comma).is_none() {
                    break;
                }
            }
            self.next_expect(Token::CloseParen)?;
        }

        DataType::from_name(&name, &args).ok_or_else(|| {
            Error::parse(format!("[Parser] type \"{}\" does not exist", name), position)
        })
    }

    /// Parses DROP TABLE / DROP SCHEMA
    fn parse_drop(&mut self) -> Result<Statement> {
        self.next_expect(Token::Keyword(Keyword::Drop))?;
        match self.next()? {
            Token::Keyword(Keyword::Table) => {
                let if_exists = self.parse_if_exists()?;
                let mut names = vec![self.parse_object_name()?];
                while self.next_if_token(Token::Comma).is_some() {
                    names.push(self.parse_object_name()?);
                }
                Ok(Statement::DropTable { names, if_exists })
            }
            Token::Keyword(Keyword::Schema) => {
                let if_exists = self.parse_if_exists()?;
                Ok(Statement::DropSchema {
                    name: self.next_ident()?,
                    if_exists,
                })
            }
            token => Err(self.unexpected(&token)),
        }
    }

    fn parse_if_not_exists(&mut self) -> Result<bool> {
        if self.next_if_token(Token::Keyword(Keyword::If)).is_none() {
            return Ok(false);
        }
        self.next_expect(Token::Keyword(Keyword::Not))?;
        self.next_expect(Token::Keyword(Keyword::Exists))?;
        Ok(true)
    }

    fn parse_if_exists(&mut self) -> Result<bool> {
        if self.next_if_token(Token::Keyword(Keyword::If)).is_none() {
            return Ok(false);
        }
        self.next_expect(Token::Keyword(Keyword::Exists))?;
        Ok(true)
    }

    /// Parses `name` or `schema.name`
    fn parse_object_name(&mut self) -> Result<ObjectName> {
        let first = self.next_ident()?;
        if self.next_if_token(Token::Period).is_some() {
            return Ok(ObjectName {
                schema: Some(first),
                name: self.next_ident()?,
            });
        }
        Ok(ObjectName::new(first))
    }

    /// Parses SELECT statement
    fn parse_select(&mut self) -> Result<Select> {
        self.next_expect(Token::Keyword(Keyword::Select))?;
        let mut select = Select::default();

        if self.next_if_token(Token::Keyword(Keyword::Distinct)).is_some() {
            select.distinct = true;
        } else {
            self.next_if_token(Token::Keyword(Keyword::All));
        }

        loop {
            select.projection.push(self.parse_select_item()?);
            if self.next_if_token(Token::Comma).is_none() {
                break;
            }
        }

        if self.next_if_token(Token::Keyword(Keyword::From)).is_some() {
            loop {
                select.from.push(self.parse_from_item()?);
                if self.next_if_token(Token::Comma).is_none() {
                    break;
                }
            }
        }

        select.where_clause = self.parse_where_clause()?;

        if self.next_if_token(Token::Keyword(Keyword::Group)).is_some() {
            self.next_expect(Token::Keyword(Keyword::By))?;
            loop {
                select.group_by.push(self.parse_expression()?);
                if self.next_if_token(Token::Comma).is_none() {
                    break;
                }
            }
        }

        if self.next_if_token(Token::Keyword(Keyword::Having)).is_some() {
            select.having = Some(self.parse_expression()?);
        }

        if self.next_if_token(Token::Keyword(Keyword::Order)).is_some() {
            self.next_expect(Token::Keyword(Keyword::By))?;
            loop {
                select.order_by.push(self.parse_order_item()?);
                if self.next_if_token(Token::Comma).is_none() {
                    break;
                }
            }
        }

        // LIMIT and OFFSET may come in either order
        loop {
            if select.limit.is_none()
                && self.next_if_token(Token::Keyword(Keyword::Limit)).is_some()
            {
                if self.next_if_token(Token::Keyword(Keyword::All)).is_none() {
                    select.limit = Some(self.parse_expression()?);
                }
            } else if select.offset.is_none()
                && self.next_if_token(Token::Keyword(Keyword::Offset)).is_some()
            {
                select.offset = Some(self.parse_expression()?);
                if !self.next_if_word("rows") {
                    self.next_if_word("row");
                }
            } else {
                break;
            }
        }

        Ok(select)
    }

    fn parse_select_item(&mut self) -> Result<SelectItem> {
        if self.next_if_token(Token::Asterisk).is_some() {
            return Ok(SelectItem::Wildcard);
        }
        if matches!(self.peek()?, Some(Token::Ident(_)))
            && self.peek_nth(1) == Some(Token::Period)
            && self.peek_nth(2) == Some(Token::Asterisk)
        {
            let table = self.next_ident()?;
            self.next()?;
            self.next()?;
            return Ok(SelectItem::QualifiedWildcard(table));
        }
        let expr = self.parse_expression()?;
        let alias = self.parse_alias()?;
        Ok(SelectItem::Expr { expr, alias })
    }

    /// Parses `[AS] alias`; a bare alias must be a plain identifier
    fn parse_alias(&mut self) -> Result<Option<String>> {
        if self.next_if_token(Token::Keyword(Keyword::As)).is_some() {
            return Ok(Some(self.next_ident()?));
        }
        if let Some(Token::Ident(_)) = self.peek()? {
            return Ok(Some(self.next_ident()?));
        }
        Ok(None)
    }

    fn parse_order_item(&mut self) -> Result<OrderItem> {
        let expr = self.parse_expression()?;
        let direction = if self.next_if_token(Token::Keyword(Keyword::Desc)).is_some() {
            OrderDirection::Desc
        } else {
            self.next_if_token(Token::Keyword(Keyword::Asc));
            OrderDirection::Asc
        };
        let nulls_first = if self.next_if_token(Token::Keyword(Keyword::Nulls)).is_some() {
            match self.next()? {
                Token::Keyword(Keyword::First) => Some(true),
                Token::Keyword(Keyword::Last) => Some(false),
                token => return Err(self.unexpected(&token)),
            }
        } else {
            None
        };
        Ok(OrderItem {
            expr,
            direction,
            nulls_first,
        })
    }

    /// Parses a FROM item followed by any number of JOIN clauses
    fn parse_from_item(&mut self) -> Result<FromItem> {
        let mut item = self.parse_from_table()?;
        loop {
            let natural = self.next_if_token(Token::Keyword(Keyword::Natural)).is_some();
            let Some(join_type) = self.parse_join_type()? else {
                if natural {
                    let token = self.next()?;
                    return Err(self.unexpected(&token));
                }
                break;
            };
            let right = self.parse_from_table()?;
            let constraint = if natural {
                if join_type == JoinType::Cross {
                    return Err(Error::parse(
                        "[Parser] NATURAL cannot be combined with CROSS JOIN",
                        self.position,
                    ));
                }
                JoinConstraint::Natural
            } else if join_type == JoinType::Cross {
                JoinConstraint::None
            } else if self.next_if_token(Token::Keyword(Keyword::On)).is_some() {
                JoinConstraint::On(self.parse_expression()?)
            } else if self.next_if_token(Token::Keyword(Keyword::Using)).is_some() {
                JoinConstraint::Using(self.parse_ident_list()?)
            } else {
                return Err(Error::parse(
                    "[Parser] Expected ON or USING after JOIN",
                    self.peek_position(),
                ));
            };
            item = FromItem::Join {
                left: Box::new(item),
                right: Box::new(right),
                join_type,
                constraint,
            };
        }
        Ok(item)
    }

    fn parse_join_type(&mut self) -> Result<Option<JoinType>> {
        let join_type = match self.peek()? {
            Some(Token::Keyword(Keyword::Join)) => JoinType::Inner,
            Some(Token::Keyword(Keyword::Inner)) => JoinType::Inner,
            Some(Token::Keyword(Keyword::Cross)) => JoinType::Cross,
            Some(Token::Keyword(Keyword::Left)) => JoinType::Left,
            Some(Token::Keyword(Keyword::Right)) => JoinType::Right,
            Some(Token::Keyword(Keyword::Full)) => JoinType::Full,
            _ => return Ok(None),
        };
        if self.next()? != Token::Keyword(Keyword::Join) {
            if matches!(join_type, JoinType::Left | JoinType::Right | JoinType::Full) {
                self.next_if_token(Token::Keyword(Keyword::Outer));
            }
            self.next_expect(Token::Keyword(Keyword::Join))?;
        }
        Ok(Some(join_type))
    }

    /// Parses a table reference or a derived table
    fn parse_from_table(&mut self) -> Result<FromItem> {
        if self.next_if_token(Token::OpenParen).is_some() {
            let query = self.parse_select()?;
            self.next_expect(Token::CloseParen)?;
            return Ok(FromItem::Subquery {
                query: Box::new(query),
                alias: self.parse_alias()?,
            });
        }
        Ok(FromItem::Table {
            name: self.parse_object_name()?,
            alias: self.parse_alias()?,
        })
    }

    /// Parses `(a, b, c)`
    fn parse_ident_list(&mut self) -> Result<Vec<String>> {
        self.next_expect(Token::OpenParen)?;
        let mut idents = Vec::new();
        loop {
            idents.push(self.next_ident()?);
            match self.next()? {
                Token::CloseParen => break,
                Token::Comma => {}
                token => return Err(self.unexpected(&token)),
            }
        }
        Ok(idents)
    }

    /// Parses INSERT statement
    fn parse_insert(&mut self) -> Result<Statement> {
        self.next_expect(Token::Keyword(Keyword::Insert))?;
        self.next_expect(Token::Keyword(Keyword::Into))?;

        let table = self.parse_object_name()?;

        // Check if specific columns are specified
        let columns = if matches!(self.peek()?, Some(Token::OpenParen)) {
            Some(self.parse_ident_list()?)
        } else {
            None
        };

        if matches!(self.peek()?, Some(Token::Keyword(Keyword::Select))) {
            return Ok(Statement::Insert {
                table,
                columns,
                source: InsertSource::Select(Box::new(self.parse_select()?)),
            });
        }

        self.next_expect(Token::Keyword(Keyword::Values))?;
        // Parse multiple value rows: INSERT INTO tbl VALUES (1,2),(3,4);
        let mut values = Vec::new();
        loop {
            self.next_expect(Token::OpenParen)?;
            let mut row = Vec::new();
            loop {
                if self.next_if_token(Token::Keyword(Keyword::Default)).is_some() {
                    row.push(None);
                } else {
                    row.push(Some(self.parse_expression()?));
                }
                match self.next()? {
                    Token::CloseParen => break,
                    Token::Comma => {}
                    token => return Err(self.unexpected(&token)),
                }
            }
            values.push(row);
            if self.next_if_token(Token::Comma).is_none() {
                break;
            }
        }
        Ok(Statement::Insert {
            table,
            columns,
            source: InsertSource::Values(values),
        })
    }

    /// Parses UPDATE statement
    fn parse_update(&mut self) -> Result<Statement> {
        self.next_expect(Token::Keyword(Keyword::Update))?;
        let table = self.parse_object_name()?;
        let alias = self.parse_alias()?;
        self.next_expect(Token::Keyword(Keyword::Set))?;

        let mut assignments: Vec<(String, Expression)> = Vec::new();
        loop {
            let column = self.next_ident()?;
            let position = self.position;
            self.next_expect(Token::Equal)?;
            let value = self.parse_expression()?;
            if assignments.iter().any(|(c, _)| *c == column) {
                return Err(Error::parse(
                    format!("[Parser] multiple assignments to same column \"{}\"", column),
                    position,
                ));
            }
            assignments.push((column, value));
            if self.next_if_token(Token::Comma).is_none() {
                break;
            }
        }
        Ok(Statement::Update {
            table,
            alias,
            assignments,
            where_clause: self.parse_where_clause()?,
        })
    }

    /// Parses DELETE statement
    fn parse_delete(&mut self) -> Result<Statement> {
        self.next_expect(Token::Keyword(Keyword::Delete))?;
        self.next_expect(Token::Keyword(Keyword::From))?;
        let table = self.parse_object_name()?;
        let alias = self.parse_alias()?;
        Ok(Statement::Delete {
            table,
            alias,
            where_clause: self.parse_where_clause()?,
        })
    }

    fn parse_where_clause(&mut self) -> Result<Option<Expression>> {
        if self.next_if_token(Token::Keyword(Keyword::Where)).is_none() {
            return Ok(None);
        }
        Ok(Some(self.parse_expression()?))
    }

    /// Parses an expression
    pub fn parse_expression(&mut self) -> Result<Expression> {
        self.parse_expression_at(0)
    }

    /// Precedence climbing: parses an expression whose operators all bind at
    /// least as tightly as `min_precedence`.
    fn parse_expression_at(&mut self, min_precedence: Precedence) -> Result<Expression> {
        let mut lhs = if let Some(prefix) = self.next_prefix_operator()? {
            let next_precedence = prefix.precedence() + Associativity::Right;
            prefix.into_expression(self.parse_expression_at(next_precedence)?)
        } else {
            self.parse_expression_atom()?
        };

        loop {
            if let Some(postfix) = self.peek_postfix_operator()? {
                if postfix.precedence() < min_precedence {
                    break;
                }
                lhs = self.parse_postfix(lhs, postfix)?;
                continue;
            }
            let Some(infix) = self.peek()?.as_ref().and_then(InfixOperator::from_token) else {
                break;
            };
            if infix.precedence() < min_precedence {
                break;
            }
            self.next()?;
            let next_precedence = infix.precedence() + Associativity::Left;
            let rhs = self.parse_expression_at(next_precedence)?;
            lhs = Expression::binary(infix.0, lhs, rhs);
        }
        Ok(lhs)
    }

    fn next_prefix_operator(&mut self) -> Result<Option<PrefixOperator>> {
        let op = match self.peek()? {
            Some(Token::Keyword(Keyword::Not)) => PrefixOperator::Not,
            Some(Token::Minus) => PrefixOperator::Minus,
            Some(Token::Plus) => PrefixOperator::Plus,
            _ => return Ok(None),
        };
        self.next()?;
        Ok(Some(op))
    }

    /// Recognizes a postfix operator without consuming it. `NOT` only counts
    /// when it negates IN, BETWEEN or LIKE.
    fn peek_postfix_operator(&mut self) -> Result<Option<PostfixOperator>> {
        Ok(Some(match self.peek()? {
            Some(Token::Keyword(Keyword::Is)) => PostfixOperator::Is,
            Some(Token::Keyword(Keyword::In)) => PostfixOperator::In { negated: false },
            Some(Token::Keyword(Keyword::Between)) => PostfixOperator::Between { negated: false },
            Some(Token::Keyword(Keyword::Like | Keyword::Ilike)) => {
                PostfixOperator::Like { negated: false }
            }
            Some(Token::DoubleColon) => PostfixOperator::Cast,
            Some(Token::Keyword(Keyword::Not)) => match self.peek_nth(1) {
                Some(Token::Keyword(Keyword::In)) => PostfixOperator::In { negated: true },
                Some(Token::Keyword(Keyword::Between)) => {
                    PostfixOperator::Between { negated: true }
                }
                Some(Token::Keyword(Keyword::Like | Keyword::Ilike)) => {
                    PostfixOperator::Like { negated: true }
                }
                _ => return Ok(None),
            },
            _ => return Ok(None),
        }))
    }

    /// Consumes a postfix operator recognized by `peek_postfix_operator`
    /// together with its operands
    fn parse_postfix(&mut self, lhs: Expression, op: PostfixOperator) -> Result<Expression> {
        let expr = Box::new(lhs);
        Ok(match op {
            PostfixOperator::Is => {
                self.next()?;
                let negated = self.next_if_token(Token::Keyword(Keyword::Not)).is_some();
                self.next_expect(Token::Keyword(Keyword::Null))?;
                Expression::IsNull { expr, negated }
            }
            PostfixOperator::In { negated } => {
                if negated {
                    self.next()?;
                }
                self.next()?;
                self.next_expect(Token::OpenParen)?;
                if matches!(self.peek()?, Some(Token::Keyword(Keyword::Select))) {
                    let query = Box::new(self.parse_select()?);
                    self.next_expect(Token::CloseParen)?;
                    return Ok(Expression::InSubquery {
                        expr,
                        query,
                        negated,
                    });
                }
                let mut list = Vec::new();
                loop {
                    list.push(self.parse_expression()?);
                    match self.next()? {
                        Token::CloseParen => break,
                        Token::Comma => {}
                        token => return Err(self.unexpected(&token)),
                    }
                }
                Expression::InList {
                    expr,
                    list,
                    negated,
                }
            }
            PostfixOperator::Between { negated } => {
                if negated {
                    self.next()?;
                }
                self.next()?;
                let low = self.parse_expression_at(PRECEDENCE_OPERAND)?;
                self.next_expect(Token::Keyword(Keyword::And))?;
                let high = self.parse_expression_at(PRECEDENCE_OPERAND)?;
                Expression::Between {
                    expr,
                    low: Box::new(low),
                    high: Box::new(high),
                    negated,
                }
            }
            PostfixOperator::Like { negated } => {
                if negated {
                    self.next()?;
                }
                let case_insensitive = self.next()? == Token::Keyword(Keyword::Ilike);
                let pattern = self.parse_expression_at(PRECEDENCE_OPERAND)?;
                Expression::Like {
                    expr,
                    pattern: Box::new(pattern),
                    negated,
                    case_insensitive,
                }
            }
            PostfixOperator::Cast => {
                self.next()?;
                Expression::Cast {
                    expr,
                    datatype: self.parse_type_name()?.datatype,
                }
            }
        })
    }

    /// Parses an expression atom: literal, column, function call,
    /// parenthesized expression or subquery, CASE, CAST, EXISTS
    fn parse_expression_atom(&mut self) -> Result<Expression> {
        Ok(match self.next()? {
            Token::Number(n) => self.parse_number(&n)?,
            Token::String(s) => Value::Text(s).into(),
            Token::Keyword(Keyword::True) => Value::Boolean(true).into(),
            Token::Keyword(Keyword::False) => Value::Boolean(false).into(),
            Token::Keyword(Keyword::Null) => Value::Null.into(),
            Token::OpenParen => {
                let expr = if matches!(self.peek()?, Some(Token::Keyword(Keyword::Select))) {
                    Expression::Subquery(Box::new(self.parse_select()?))
                } else {
                    self.parse_expression()?
                };
                self.next_expect(Token::CloseParen)?;
                expr
            }
            Token::Keyword(Keyword::Exists) => {
                self.next_expect(Token::OpenParen)?;
                let query = self.parse_select()?;
                self.next_expect(Token::CloseParen)?;
                Expression::Exists(Box::new(query))
            }
            Token::Keyword(Keyword::Case) => self.parse_case()?,
            Token::Keyword(Keyword::Cast) => {
                self.next_expect(Token::OpenParen)?;
                let expr = self.parse_expression()?;
                self.next_expect(Token::Keyword(Keyword::As))?;
                let datatype = self.parse_type_name()?.datatype;
                self.next_expect(Token::CloseParen)?;
                Expression::Cast {
                    expr: Box::new(expr),
                    datatype,
                }
            }
            Token::Ident(name) => self.parse_name_expression(name)?,
            Token::Keyword(keyword) if !keyword.is_reserved() => {
                self.parse_name_expression(keyword.to_str().to_lowercase())?
            }
            token => {
                return Err(Error::parse(
                    format!("[Parser] Unexpected expression token {}", token),
                    self.position,
                ));
            }
        })
    }

    /// Parses what follows an identifier in expression position: a function
    /// call, a qualified column, a typed literal or a plain column.
    fn parse_name_expression(&mut self, name: String) -> Result<Expression> {
        if self.next_if_token(Token::OpenParen).is_some() {
            return self.parse_function_call(name);
        }
        if self.next_if_token(Token::Period).is_some() {
            return Ok(Expression::Column {
                table: Some(name),
                name: self.next_ident()?,
            });
        }
        if let Some(Token::String(literal)) = self.peek()? {
            if let Some(type_name) = DataType::from_name(&name, &[]) {
                self.next()?;
                return Ok(Expression::Cast {
                    expr: Box::new(Value::Text(literal).into()),
                    datatype: type_name.datatype,
                });
            }
        }
        if matches!(
            name.as_str(),
            "current_timestamp" | "current_date" | "current_time" | "localtimestamp"
        ) {
            return Ok(Expression::Function { name, args: vec![] });
        }
        Ok(Expression::Column { table: None, name })
    }

    /// Parses the argument list of `name(`
    fn parse_function_call(&mut self, name: String) -> Result<Expression> {
        if let Some(func) = AggregateFunction::from_name(&name) {
            if func == AggregateFunction::Count && self.next_if_token(Token::Asterisk).is_some() {
                self.next_expect(Token::CloseParen)?;
                return Ok(Expression::Aggregate {
                    func,
                    arg: None,
                    distinct: false,
                });
            }
            let distinct = self.next_if_token(Token::Keyword(Keyword::Distinct)).is_some();
            if !distinct {
                self.next_if_token(Token::Keyword(Keyword::All));
            }
            let arg = self.parse_expression()?;
            self.next_expect(Token::CloseParen)?;
            return Ok(Expression::Aggregate {
                func,
                arg: Some(Box::new(arg)),
                distinct,
            });
        }

        let mut args = Vec::new();
        if self.next_if_token(Token::CloseParen).is_none() {
            loop {
                args.push(self.parse_expression()?);
                match self.next()? {
                    Token::CloseParen => break,
                    Token::Comma => {}
                    token => return Err(self.unexpected(&token)),
                }
            }
        }
        Ok(Expression::Function { name, args })
    }

    /// Parses `CASE [operand] WHEN .. THEN .. [ELSE ..] END` after CASE
    fn parse_case(&mut self) -> Result<Expression> {
        let operand = match self.peek()? {
            Some(Token::Keyword(Keyword::When)) => None,
            _ => Some(Box::new(self.parse_expression()?)),
        };
        let mut branches = Vec::new();
        while self.next_if_token(Token::Keyword(Keyword::When)).is_some() {
            let when = self.parse_expression()?;
            self.next_expect(Token::Keyword(Keyword::Then))?;
            branches.push((when, self.parse_expression()?));
        }
        if branches.is_empty() {
            return Err(Error::parse(
                "[Parser] CASE requires at least one WHEN clause",
                self.peek_position(),
            ));
        }
        let else_result = match self.next_if_token(Token::Keyword(Keyword::Else)) {
            Some(_) => Some(Box::new(self.parse_expression()?)),
            None => None,
        };
        self.next_expect(Token::Keyword(Keyword::End))?;
        Ok(Expression::Case {
            operand,
            branches,
            else_result,
        })
    }

    /// Integer literals take the narrowest of integer/bigint/numeric that
    /// holds them, fractions are numeric, exponent forms are double.
    fn parse_number(&self, n: &str) -> Result<Expression> {
        let invalid = || Error::parse(format!("[Parser] Invalid number {}", n), self.position);
        let value = if n.contains(['e', 'E']) {
            Value::Double(n.parse().map_err(|_| invalid())?)
        } else if n.contains('.') {
            let normalized = format!(
                "{}{}{}",
                if n.starts_with('.') { "0" } else { "" },
                n,
                if n.ends_with('.') { "0" } else { "" }
            );
            Value::Decimal(normalized.parse::<Decimal>().map_err(|_| invalid())?)
        } else if let Ok(i) = n.parse::<i32>() {
            Value::Integer(i)
        } else if let Ok(i) = n.parse::<i64>() {
            Value::BigInt(i)
        } else {
            Value::Decimal(n.parse::<Decimal>().map_err(|_| invalid())?)
        };
        Ok(value.into())
    }

    /// Peeks at the next token
    fn peek(&mut self) -> Result<Option<Token>> {
        Ok(self.lexer.peek().cloned().transpose()?.map(|(token, _)| token))
    }

    /// Looks `n` tokens ahead without consuming anything
    fn peek_nth(&self, n: usize) -> Option<Token> {
        self.lexer.clone().nth(n)?.ok().map(|(token, _)| token)
    }

    /// Offset of the next token, or of the end of input
    fn peek_position(&mut self) -> usize {
        match self.lexer.peek() {
            Some(Ok((_, position))) => *position,
            _ => self.end,
        }
    }

    /// Consumes and returns the next token
    fn next(&mut self) -> Result<Token> {
        let end = self.end;
        let (token, position) = self
            .lexer
            .next()
            .unwrap_or_else(|| Err(Error::parse("[Parser] Unexpected end of input", end)))?;
        self.position = position;
        Ok(token)
    }

    /// Expects and consumes an identifier. Non-reserved keywords are
    /// accepted as identifiers.
    fn next_ident(&mut self) -> Result<String> {
        match self.next()? {
            Token::Ident(ident) => Ok(ident),
            Token::Keyword(keyword) if !keyword.is_reserved() => {
                Ok(keyword.to_str().to_lowercase())
            }
            token => Err(Error::parse(
                format!("[Parser] Expected ident, got token {}", token),
                self.position,
            )),
        }
    }

    /// Expects a specific token, returns error if different
    fn next_expect(&mut self, expect: Token) -> Result<()> {
        let token = self.next()?;
        if token != expect {
            return Err(Error::parse(
                format!("[Parser] Expected token {}, got {}", expect, token),
                self.position,
            ));
        }
        Ok(())
    }

    /// Consumes next token if it satisfies the predicate
    fn next_if<F: Fn(&Token) -> bool>(&mut self, predicate: F) -> Option<Token> {
        self.peek().unwrap_or(None).filter(|t| predicate(t))?;
        self.next().ok()
    }

    /// Consumes next token if it matches the given token
    fn next_if_token(&mut self, token: Token) -> Option<Token> {
        self.next_if(|t| t == &token)
    }

    /// Consumes the next token if it is the given unquoted word
    fn next_if_word(&mut self, word: &str) -> bool {
        self.next_if(|t| matches!(t, Token::Ident(ident) if ident == word))
            .is_some()
    }

    fn expect_word(&mut self, word: &str) -> Result<()> {
        let found = self.next_ident()?;
        if found != word {
            return Err(self.unexpected_word(&found));
        }
        Ok(())
    }

    fn unexpected(&self, token: &Token) -> Error {
        Error::parse(format!("[Parser] Unexpected token {}", token), self.position)
    }

    fn unexpected_word(&self, word: &str) -> Error {
        Error::parse(format!("[Parser] Unexpected word {}", word), self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::{Parser, parse};
    use crate::{
        error::{Error, Result},
        sql::{
            parser::ast::{
                BinaryOperator, Expression, FromItem, InsertSource, JoinConstraint, JoinType,
                ObjectName, SelectItem, Statement, UnaryOperator,
            },
            types::{DataType, Value},
        },
        storage::IsolationLevel,
    };

    fn expr(sql: &str) -> Result<Expression> {
        Parser::new(sql).parse_expression()
    }

    #[test]
    fn test_parser_create_table() -> Result<()> {
        let sql1 = "
            create table tbl1 (
                a int default 100,
                b double precision not null,
                c varchar(20) null,
                d bool default true
            );
        ";
        let stmt1 = parse(sql1)?;

        let sql2 = "
        create            table tbl1 (
            a int default     100,
            b double   precision not null     ,
            c varchar( 20 )      null,
            d       bool default        true
        )
        ";
        let stmt2 = parse(sql2)?;
        assert_eq!(stmt1, stmt2);

        let Statement::CreateTable { name, columns, .. } = &stmt1[0] else {
            panic!("expected CREATE TABLE");
        };
        assert_eq!(name, &ObjectName::new("tbl1"));
        assert_eq!(columns[1].datatype.datatype, DataType::Double);
        assert_eq!(columns[1].nullable, Some(false));
        assert_eq!(columns[2].datatype.length, Some(20));

        let stmt3 = parse("create table tbl1 (a int default 100, b float not null");
        assert!(stmt3.is_err());
        Ok(())
    }

    #[test]
    fn test_parser_invalid_type_name() {
        let result = parse("create table t (a int, b widget)");
        assert_eq!(
            result,
            Err(Error::parse("[Parser] type \"widget\" does not exist", 25))
        );
    }

    #[test]
    fn test_parser_insert() -> Result<()> {
        let stmt = parse("insert into s.tbl2 (c1, c2) values (3, 'a'),(DEFAULT, -1.5);")?;
        assert_eq!(
            stmt,
            vec![Statement::Insert {
                table: ObjectName {
                    schema: Some("s".into()),
                    name: "tbl2".into()
                },
                columns: Some(vec!["c1".to_string(), "c2".to_string()]),
                source: InsertSource::Values(vec![
                    vec![
                        Some(Value::Integer(3).into()),
                        Some(Value::Text("a".into()).into()),
                    ],
                    vec![
                        None,
                        Some(Expression::Unary(
                            UnaryOperator::Minus,
                            Box::new(Value::Decimal("1.5".parse().unwrap()).into())
                        )),
                    ],
                ]),
            }]
        );

        let stmt = parse("insert into t select * from u")?;
        assert!(matches!(
            &stmt[0],
            Statement::Insert {
                source: InsertSource::Select(_),
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn test_parser_select() -> Result<()> {
        let stmt = parse(
            "select distinct a.x, b.* , count(*) as n from a left join b on a.x = b.x
             join c using (y) where a.x > 1 group by a.x having count(*) > 1
             order by n desc nulls last limit 10 offset 2",
        )?;
        let Statement::Select(select) = &stmt[0] else {
            panic!("expected SELECT");
        };
        assert!(select.distinct);
        assert_eq!(select.projection.len(), 3);
        assert_eq!(select.projection[1], SelectItem::QualifiedWildcard("b".into()));
        assert_eq!(select.order_by[0].nulls_first, Some(false));
        assert_eq!(select.limit, Some(Value::Integer(10).into()));
        assert_eq!(select.offset, Some(Value::Integer(2).into()));
        let FromItem::Join {
            left,
            join_type,
            constraint,
            ..
        } = &select.from[0]
        else {
            panic!("expected JOIN");
        };
        assert_eq!(*join_type, JoinType::Inner);
        assert_eq!(*constraint, JoinConstraint::Using(vec!["y".into()]));
        assert!(matches!(
            left.as_ref(),
            FromItem::Join {
                join_type: JoinType::Left,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn test_parser_precedence() -> Result<()> {
        // NOT binds tighter than AND
        assert_eq!(
            expr("NOT a AND b")?,
            Expression::binary(
                BinaryOperator::And,
                Expression::Unary(UnaryOperator::Not, Box::new(Expression::column("a"))),
                Expression::column("b"),
            )
        );

        // BETWEEN binds tighter than OR, and its AND is not a conjunction
        assert_eq!(
            expr("a BETWEEN 1 AND 2 OR b")?,
            Expression::binary(
                BinaryOperator::Or,
                Expression::Between {
                    expr: Box::new(Expression::column("a")),
                    low: Box::new(Value::Integer(1).into()),
                    high: Box::new(Value::Integer(2).into()),
                    negated: false,
                },
                Expression::column("b"),
            )
        );

        // Left associativity and arithmetic tiers
        assert_eq!(
            expr("1 - 2 - 3 * 4")?,
            Expression::binary(
                BinaryOperator::Subtract,
                Expression::binary(
                    BinaryOperator::Subtract,
                    Value::Integer(1).into(),
                    Value::Integer(2).into()
                ),
                Expression::binary(
                    BinaryOperator::Multiply,
                    Value::Integer(3).into(),
                    Value::Integer(4).into()
                ),
            )
        );

        assert_eq!(
            expr("x IS NOT NULL AND y NOT IN (1, 2)")?,
            Expression::binary(
                BinaryOperator::And,
                Expression::IsNull {
                    expr: Box::new(Expression::column("x")),
                    negated: true
                },
                Expression::InList {
                    expr: Box::new(Expression::column("y")),
                    list: vec![Value::Integer(1).into(), Value::Integer(2).into()],
                    negated: true,
                },
            )
        );
        Ok(())
    }

    #[test]
    fn test_parser_literals_and_casts() -> Result<()> {
        assert_eq!(
            expr("DATE '2024-01-02'")?,
            Expression::Cast {
                expr: Box::new(Value::Text("2024-01-02".into()).into()),
                datatype: DataType::Date,
            }
        );
        assert_eq!(
            expr("'1'::int")?,
            Expression::Cast {
                expr: Box::new(Value::Text("1".into()).into()),
                datatype: DataType::Integer,
            }
        );
        assert_eq!(expr("1e3")?, Value::Double(1000.0).into());
        assert_eq!(expr("3000000000")?, Value::BigInt(3_000_000_000).into());
        assert_eq!(
            expr("current_date")?,
            Expression::Function {
                name: "current_date".into(),
                args: vec![]
            }
        );
        assert!(matches!(expr("CASE WHEN a THEN 1 END")?, Expression::Case { .. }));
        Ok(())
    }

    #[test]
    fn test_parser_transactions_and_batches() -> Result<()> {
        let stmts = parse(
            "BEGIN ISOLATION LEVEL REPEATABLE READ; select 1;; commit; START TRANSACTION; rollback",
        )?;
        assert_eq!(
            stmts[0],
            Statement::Begin {
                isolation: Some(IsolationLevel::RepeatableRead)
            }
        );
        assert_eq!(stmts[2], Statement::Commit);
        assert_eq!(stmts[3], Statement::Begin { isolation: None });
        assert_eq!(stmts[4], Statement::Rollback);
        assert_eq!(stmts.len(), 5);
        assert!(parse("")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_parser_errors_carry_position() {
        assert_eq!(
            parse("select 1 2"),
            Err(Error::parse("[Parser] Unexpected token 2", 9))
        );
        assert_eq!(
            parse("select from"),
            Err(Error::parse("[Parser] Unexpected expression token FROM", 7))
        );
        assert!(matches!(parse("update t set a = 1, a = 2"), Err(Error::Parse { .. })));
    }
}
