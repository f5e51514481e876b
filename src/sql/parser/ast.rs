use crate::{
    sql::types::{DataType, TypeName, Value},
    storage::IsolationLevel,
};

/// Abstract Syntax Tree (AST) node definitions for SQL statements
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// BEGIN / START TRANSACTION
    Begin {
        isolation: Option<IsolationLevel>,
    },
    /// COMMIT / END
    Commit,
    Rollback,
    CreateSchema {
        name: String,
        if_not_exists: bool,
    },
    DropSchema {
        name: String,
        if_exists: bool,
    },
    /// CREATE TABLE statement
    CreateTable {
        name: ObjectName,
        columns: Vec<Column>,
        if_not_exists: bool,
    },
    DropTable {
        names: Vec<ObjectName>,
        if_exists: bool,
    },
    /// INSERT statement
    Insert {
        table: ObjectName,
        columns: Option<Vec<String>>,
        source: InsertSource,
    },
    /// SELECT statement
    Select(Box<Select>),
    /// UPDATE statement
    Update {
        table: ObjectName,
        alias: Option<String>,
        assignments: Vec<(String, Expression)>,
        where_clause: Option<Expression>,
    },
    /// DELETE statement
    Delete {
        table: ObjectName,
        alias: Option<String>,
        where_clause: Option<Expression>,
    },
}

/// A possibly schema-qualified table name
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectName {
    pub schema: Option<String>,
    pub name: String,
}

impl ObjectName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }
}

/// Row source of an INSERT
#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    /// VALUES tuples; `None` marks the DEFAULT keyword
    Values(Vec<Vec<Option<Expression>>>),
    Select(Box<Select>),
}

/// A SELECT query body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Select {
    pub distinct: bool,
    pub projection: Vec<SelectItem>,
    /// Comma-separated FROM items, cross-joined
    pub from: Vec<FromItem>,
    pub where_clause: Option<Expression>,
    pub group_by: Vec<Expression>,
    pub having: Option<Expression>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
}

/// One entry of the projection list
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    /// `t.*`
    QualifiedWildcard(String),
    Expr {
        expr: Expression,
        alias: Option<String>,
    },
}

/// FROM clause item - represents a table, derived table or join expression
#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    /// Single table reference
    Table {
        name: ObjectName,
        alias: Option<String>,
    },
    /// Derived table `(SELECT ...) [AS] alias`
    Subquery {
        query: Box<Select>,
        alias: Option<String>,
    },
    /// Join expression (two items joined together)
    Join {
        left: Box<FromItem>,
        right: Box<FromItem>,
        join_type: JoinType,
        constraint: JoinConstraint,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JoinType {
    Cross,
    Inner,
    Left,
    Right,
    Full,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinConstraint {
    /// CROSS JOIN
    None,
    On(Expression),
    Using(Vec<String>),
    /// NATURAL JOIN: equality over every column name both sides share
    Natural,
}

/// Sort direction (ascending or descending)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expression,
    pub direction: OrderDirection,
    /// Explicit NULLS FIRST (true) / NULLS LAST (false)
    pub nulls_first: Option<bool>,
}

/// Column definition for CREATE TABLE statements
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub datatype: TypeName,
    pub nullable: Option<bool>,
    pub default: Option<Expression>,
    pub primary_key: bool,
    pub unique: bool,
}

/// Expression types
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Constant value. String literals stay `Text` until coerced.
    Literal(Value),
    /// Column reference, optionally qualified by table name or alias
    Column {
        table: Option<String>,
        name: String,
    },
    Unary(UnaryOperator, Box<Expression>),
    Binary(BinaryOperator, Box<Expression>, Box<Expression>),
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    InList {
        expr: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expression>,
        query: Box<Select>,
        negated: bool,
    },
    Between {
        expr: Box<Expression>,
        low: Box<Expression>,
        high: Box<Expression>,
        negated: bool,
    },
    Like {
        expr: Box<Expression>,
        pattern: Box<Expression>,
        negated: bool,
        case_insensitive: bool,
    },
    Case {
        operand: Option<Box<Expression>>,
        branches: Vec<(Expression, Expression)>,
        else_result: Option<Box<Expression>>,
    },
    Cast {
        expr: Box<Expression>,
        datatype: DataType,
    },
    Exists(Box<Select>),
    /// Scalar subquery
    Subquery(Box<Select>),
    /// Scalar function call, built-in or host-registered
    Function {
        name: String,
        args: Vec<Expression>,
    },
    Aggregate {
        func: AggregateFunction,
        /// `None` for `COUNT(*)`
        arg: Option<Box<Expression>>,
        distinct: bool,
    },
}

impl From<Value> for Expression {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl Expression {
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column {
            table: None,
            name: name.into(),
        }
    }

    pub fn binary(op: BinaryOperator, lhs: Expression, rhs: Expression) -> Self {
        Self::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    /// Visits this expression and its children depth-first, without
    /// descending into subqueries. Stops early when the visitor returns true.
    pub fn walk(&self, visitor: &mut impl FnMut(&Expression) -> bool) -> bool {
        if visitor(self) {
            return true;
        }
        match self {
            Expression::Literal(_)
            | Expression::Column { .. }
            | Expression::Exists(_)
            | Expression::Subquery(_) => false,
            Expression::Unary(_, expr)
            | Expression::IsNull { expr, .. }
            | Expression::Cast { expr, .. }
            | Expression::InSubquery { expr, .. } => expr.walk(visitor),
            Expression::Binary(_, lhs, rhs) => lhs.walk(visitor) || rhs.walk(visitor),
            Expression::InList { expr, list, .. } => {
                expr.walk(visitor) || list.iter().any(|e| e.walk(visitor))
            }
            Expression::Between {
                expr, low, high, ..
            } => expr.walk(visitor) || low.walk(visitor) || high.walk(visitor),
            Expression::Like { expr, pattern, .. } => {
                expr.walk(visitor) || pattern.walk(visitor)
            }
            Expression::Case {
                operand,
                branches,
                else_result,
            } => {
                operand.as_ref().is_some_and(|e| e.walk(visitor))
                    || branches
                        .iter()
                        .any(|(when, then)| when.walk(visitor) || then.walk(visitor))
                    || else_result.as_ref().is_some_and(|e| e.walk(visitor))
            }
            Expression::Function { args, .. } => args.iter().any(|e| e.walk(visitor)),
            Expression::Aggregate { arg, .. } => arg.as_ref().is_some_and(|e| e.walk(visitor)),
        }
    }

    /// Whether an aggregate call appears outside any subquery
    pub fn contains_aggregate(&self) -> bool {
        self.walk(&mut |e| matches!(e, Expression::Aggregate { .. }))
    }

    /// The output column name PostgreSQL would give this expression
    pub fn output_name(&self) -> String {
        match self {
            Expression::Column { name, .. } => name.clone(),
            Expression::Function { name, .. } => name.clone(),
            Expression::Aggregate { func, .. } => func.to_string(),
            Expression::Cast { expr, datatype } => match expr.output_name().as_str() {
                "?column?" => datatype.to_string(),
                name => name.to_string(),
            },
            Expression::Case { .. } => "case".to_string(),
            Expression::Exists(_) => "exists".to_string(),
            _ => "?column?".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOperator {
    Not,
    Minus,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOperator {
    Or,
    And,
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
    JsonGet,
    /// `->>`
    JsonGetText,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "count" => Self::Count,
            "sum" => Self::Sum,
            "avg" => Self::Avg,
            "min" => Self::Min,
            "max" => Self::Max,
            _ => return None,
        })
    }
}

impl std::fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        })
    }
}
