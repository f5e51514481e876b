use std::collections::HashSet;

use crate::{
    error::{Error, Result},
    sql::{
        engine::Transaction,
        eval::{Scope, evaluate, resolve, unknown_column},
        executor::{Context, ResultColumn},
        parser::ast::{
            self, AggregateFunction, BinaryOperator, Expression, FromItem, JoinConstraint,
            JoinType, ObjectName, OrderDirection, SelectItem, Statement,
        },
        plan::{InsertSource, Node, OrderKey, Plan},
        schema::{Column, Table},
        types::{DataType, Value},
    },
};

/// Query planner - converts AST into execution plan nodes, resolving table
/// names and checking column references on the way
pub struct Planner<'a, T: Transaction> {
    ctx: &'a Context<'a, T>,
}

impl<'a, T: Transaction> Planner<'a, T> {
    pub fn new(ctx: &'a Context<'a, T>) -> Self {
        Self { ctx }
    }

    /// Builds an execution plan from an AST statement
    pub fn build(&self, statement: Statement) -> Result<Plan> {
        Ok(Plan(self.build_statement(statement)?))
    }

    fn build_statement(&self, statement: Statement) -> Result<Node> {
        Ok(match statement {
            Statement::Begin { .. } | Statement::Commit | Statement::Rollback => {
                return Err(Error::Internal(
                    "transaction control has no execution plan".into(),
                ));
            }
            Statement::CreateSchema {
                name,
                if_not_exists,
            } => Node::CreateSchema {
                name,
                if_not_exists,
            },
            Statement::DropSchema { name, if_exists } => Node::DropSchema { name, if_exists },
            Statement::CreateTable {
                name,
                columns,
                if_not_exists,
            } => {
                let schema = self.schema_of(&name);
                if !self.ctx.txn.has_schema(&schema)? {
                    return Err(Error::Execution(format!(
                        "schema \"{}\" does not exist",
                        schema
                    )));
                }
                let table = Table {
                    schema,
                    name: name.name,
                    columns: columns
                        .into_iter()
                        .map(|c| self.build_column(c))
                        .collect::<Result<_>>()?,
                };
                table.validate()?;
                Node::CreateTable {
                    table,
                    if_not_exists,
                }
            }
            Statement::DropTable { names, if_exists } => Node::DropTable {
                tables: names
                    .into_iter()
                    .map(|name| (self.schema_of(&name), name.name))
                    .collect(),
                if_exists,
            },
            Statement::Insert {
                table,
                columns,
                source,
            } => self.build_insert(&table, columns, source)?,
            Statement::Select(query) => self.build_select(&query, None)?,
            Statement::Update {
                table,
                alias,
                assignments,
                where_clause,
            } => {
                let table = self.table(&table)?;
                let columns = table_columns(&table, alias.as_deref());
                let scope = Scope::new(&columns, &[]);
                if let Some(predicate) = &where_clause {
                    check_clause(predicate, &scope, "WHERE")?;
                }
                let mut seen = HashSet::new();
                let assignments = assignments
                    .into_iter()
                    .map(|(name, expr)| {
                        let index = table.get_col_index(&name)?;
                        if !seen.insert(index) {
                            return Err(Error::Execution(format!(
                                "multiple assignments to same column \"{}\"",
                                name
                            )));
                        }
                        check_clause(&expr, &scope, "UPDATE")?;
                        Ok((index, expr))
                    })
                    .collect::<Result<_>>()?;
                Node::Update {
                    table,
                    alias,
                    predicate: where_clause,
                    assignments,
                }
            }
            Statement::Delete {
                table,
                alias,
                where_clause,
            } => {
                let table = self.table(&table)?;
                if let Some(predicate) = &where_clause {
                    let columns = table_columns(&table, alias.as_deref());
                    check_clause(predicate, &Scope::new(&columns, &[]), "WHERE")?;
                }
                Node::Delete {
                    table,
                    alias,
                    predicate: where_clause,
                }
            }
        })
    }

    fn schema_of(&self, name: &ObjectName) -> String {
        name.schema
            .clone()
            .unwrap_or_else(|| self.ctx.schema.to_string())
    }

    fn table(&self, name: &ObjectName) -> Result<Table> {
        self.ctx.txn.must_get_table(&self.schema_of(name), &name.name)
    }

    // Serial columns are NOT NULL and filled from the table's sequence.
    // A DEFAULT is evaluated once, here, and stored converted.
    fn build_column(&self, c: ast::Column) -> Result<Column> {
        let serial = c.datatype.serial;
        let mut column = Column::new(c.name, c.datatype.datatype);
        column.max_length = c.datatype.length;
        column.primary_key = c.primary_key;
        column.unique = c.unique;
        column.auto_increment = serial;
        column.nullable = c.nullable.unwrap_or(!c.primary_key && !serial);
        if let Some(expr) = c.default {
            check_clause(&expr, &Scope::empty(), "DEFAULT expressions")?;
            column.default = match evaluate(&expr, &Scope::empty(), self.ctx)? {
                Value::Null => None,
                value => Some(column.validate_value(value)?),
            };
        }
        Ok(column)
    }

    fn build_insert(
        &self,
        table: &ObjectName,
        columns: Option<Vec<String>>,
        source: ast::InsertSource,
    ) -> Result<Node> {
        let table = self.table(table)?;
        let explicit = columns.is_some();
        let targets: Vec<usize> = match columns {
            Some(names) => {
                let mut seen = HashSet::new();
                names
                    .iter()
                    .map(|name| {
                        let index = table.get_col_index(name)?;
                        if !seen.insert(index) {
                            return Err(Error::Execution(format!(
                                "column \"{}\" specified more than once",
                                name
                            )));
                        }
                        Ok(index)
                    })
                    .collect::<Result<_>>()?
            }
            None => (0..table.columns.len()).collect(),
        };
        let check_width = |width: usize| -> Result<()> {
            if width > targets.len() {
                return Err(Error::Execution(
                    "INSERT has more expressions than target columns".into(),
                ));
            }
            if explicit && width < targets.len() {
                return Err(Error::Execution(
                    "INSERT has more target columns than expressions".into(),
                ));
            }
            Ok(())
        };
        let source = match source {
            ast::InsertSource::Values(rows) => {
                for row in &rows {
                    check_width(row.len())?;
                    for expr in row.iter().flatten() {
                        check_clause(expr, &Scope::empty(), "VALUES")?;
                    }
                }
                InsertSource::Values(rows)
            }
            ast::InsertSource::Select(query) => {
                let node = self.build_select(&query, None)?;
                check_width(node.columns().len())?;
                InsertSource::Query(Box::new(node))
            }
        };
        Ok(Node::Insert {
            table,
            columns: targets,
            source,
        })
    }

    /// Builds a SELECT. `outer` holds the enclosing query's bindings when the
    /// SELECT is a subquery, so correlated references check out.
    pub fn build_select(&self, query: &ast::Select, outer: Option<&Scope>) -> Result<Node> {
        // FROM: comma-separated items are cross joined
        let mut node = Node::SingleRow;
        for (i, item) in query.from.iter().enumerate() {
            let right = self.build_from(item, outer)?;
            node = match i {
                0 => right,
                _ => Node::NestedLoopJoin {
                    left: Box::new(node),
                    right: Box::new(right),
                    join_type: JoinType::Cross,
                    predicate: None,
                    using: Vec::new(),
                },
            };
        }
        let columns = node.columns();
        let scope = Scope::new(&columns, &[]).with_outer(outer);

        if let Some(predicate) = &query.where_clause {
            check_clause(predicate, &scope, "WHERE")?;
            node = Node::Filter {
                source: Box::new(node),
                predicate: predicate.clone(),
            };
        }

        let mut exprs = self.expand_projection(query, &columns, &scope)?;
        let width = exprs.len();

        let grouped = !query.group_by.is_empty()
            || query.having.is_some()
            || exprs.iter().any(|(e, _)| e.contains_aggregate())
            || query.order_by.iter().any(|o| o.expr.contains_aggregate());

        let group_by = query
            .group_by
            .iter()
            .map(|expr| {
                let expr = match expr {
                    Expression::Literal(Value::Integer(n)) => {
                        position(*n, width, "GROUP BY").map(|i| exprs[i].0.clone())?
                    }
                    Expression::Column { table: None, name }
                        if resolve(&columns, None, name)?.is_none() =>
                    {
                        exprs
                            .iter()
                            .find(|(_, c)| &c.name == name)
                            .map(|(e, _)| e.clone())
                            .unwrap_or_else(|| expr.clone())
                    }
                    expr => expr.clone(),
                };
                if expr.contains_aggregate() {
                    return Err(Error::Execution(
                        "aggregate functions are not allowed in GROUP BY".into(),
                    ));
                }
                check_columns(&expr, &scope)?;
                Ok(expr)
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(having) = &query.having {
            check_columns(having, &scope)?;
            check_nesting(having)?;
        }
        if grouped {
            for (expr, _) in &exprs {
                check_grouped(expr, &group_by, &columns)?;
            }
            if let Some(having) = &query.having {
                check_grouped(having, &group_by, &columns)?;
            }
        }

        // ORDER BY keys may add hidden columns after the projection
        let mut keys = Vec::with_capacity(query.order_by.len());
        for item in &query.order_by {
            let index = match &item.expr {
                Expression::Literal(Value::Integer(n)) => position(*n, width, "ORDER BY")?,
                expr => match output_index(expr, &exprs[..width]) {
                    Some(index) => index,
                    None => {
                        if query.distinct {
                            return Err(Error::Execution(
                                "for SELECT DISTINCT, ORDER BY expressions must appear in select list"
                                    .into(),
                            ));
                        }
                        check_columns(expr, &scope)?;
                        check_nesting(expr)?;
                        if grouped {
                            check_grouped(expr, &group_by, &columns)?;
                        }
                        let datatype = infer_type(expr, &columns);
                        exprs.push((expr.clone(), ResultColumn::new(None, "?column?", datatype)));
                        exprs.len() - 1
                    }
                },
            };
            keys.push(OrderKey {
                index,
                direction: item.direction,
                // NULLs sort as larger than any value
                nulls_first: item
                    .nulls_first
                    .unwrap_or(item.direction == OrderDirection::Desc),
            });
        }
        let hidden = exprs.len() > width;

        node = if grouped {
            Node::Aggregate {
                source: Box::new(node),
                group_by,
                having: query.having.clone(),
                exprs,
            }
        } else {
            Node::Projection {
                source: Box::new(node),
                exprs,
            }
        };
        if query.distinct {
            node = Node::Distinct {
                source: Box::new(node),
            };
        }
        if !keys.is_empty() {
            node = Node::Order {
                source: Box::new(node),
                keys,
            };
        }
        if let Some(offset) = &query.offset {
            check_clause(offset, &Scope::empty(), "OFFSET")?;
            node = Node::Offset {
                source: Box::new(node),
                offset: offset.clone(),
            };
        }
        if let Some(limit) = &query.limit {
            check_clause(limit, &Scope::empty(), "LIMIT")?;
            node = Node::Limit {
                source: Box::new(node),
                limit: limit.clone(),
            };
        }
        if hidden {
            node = Node::Truncate {
                source: Box::new(node),
                width,
            };
        }
        Ok(node)
    }

    fn build_from(&self, item: &FromItem, outer: Option<&Scope>) -> Result<Node> {
        Ok(match item {
            FromItem::Table { name, alias } => Node::Scan {
                table: self.table(name)?,
                alias: alias.clone(),
            },
            FromItem::Subquery { query, alias } => Node::Subquery {
                source: Box::new(self.build_select(query, outer)?),
                alias: alias.clone(),
            },
            FromItem::Join {
                left,
                right,
                join_type,
                constraint,
            } => {
                // Recursively build join nodes (base case: single table)
                let left = self.build_from(left, outer)?;
                let right = self.build_from(right, outer)?;
                let (lcols, rcols) = (left.columns(), right.columns());
                let (predicate, using) = match constraint {
                    JoinConstraint::None => (None, Vec::new()),
                    JoinConstraint::On(expr) => {
                        let both: Vec<ResultColumn> = lcols.iter().chain(&rcols).cloned().collect();
                        check_clause(expr, &Scope::new(&both, &[]).with_outer(outer), "JOIN conditions")?;
                        (Some(expr.clone()), Vec::new())
                    }
                    JoinConstraint::Using(names) => {
                        let using = names
                            .iter()
                            .map(|name| {
                                let side = |columns: &[ResultColumn], which: &str| {
                                    resolve(columns, None, name)?.ok_or_else(|| {
                                        Error::Execution(format!(
                                            "column \"{}\" specified in USING clause does not exist in {} table",
                                            name, which
                                        ))
                                    })
                                };
                                Ok((side(&lcols, "left")?, side(&rcols, "right")?))
                            })
                            .collect::<Result<_>>()?;
                        (None, using)
                    }
                    // No common column leaves a cross join
                    JoinConstraint::Natural => (
                        None,
                        lcols
                            .iter()
                            .enumerate()
                            .filter_map(|(l, c)| {
                                rcols.iter().position(|r| r.name == c.name).map(|r| (l, r))
                            })
                            .collect(),
                    ),
                };
                Node::NestedLoopJoin {
                    left: Box::new(left),
                    right: Box::new(right),
                    join_type: *join_type,
                    predicate,
                    using,
                }
            }
        })
    }

    /// Expands `*` and `t.*` and names every output column
    fn expand_projection(
        &self,
        query: &ast::Select,
        columns: &[ResultColumn],
        scope: &Scope,
    ) -> Result<Vec<(Expression, ResultColumn)>> {
        let mut exprs = Vec::new();
        for item in &query.projection {
            match item {
                SelectItem::Wildcard => {
                    if query.from.is_empty() {
                        return Err(Error::Execution(
                            "SELECT * with no tables specified is not valid".into(),
                        ));
                    }
                    exprs.extend(columns.iter().map(|c| (column_ref(c), c.clone())));
                }
                SelectItem::QualifiedWildcard(table) => {
                    let before = exprs.len();
                    exprs.extend(
                        columns
                            .iter()
                            .filter(|c| c.table.as_deref() == Some(table.as_str()))
                            .map(|c| (column_ref(c), c.clone())),
                    );
                    if exprs.len() == before {
                        return Err(Error::Execution(format!(
                            "missing FROM-clause entry for table \"{}\"",
                            table
                        )));
                    }
                }
                SelectItem::Expr { expr, alias } => {
                    check_columns(expr, scope)?;
                    check_nesting(expr)?;
                    let table = match expr {
                        Expression::Column { table, name } => resolve(columns, table.as_deref(), name)?
                            .and_then(|i| columns[i].table.clone()),
                        _ => None,
                    };
                    let column = ResultColumn {
                        table,
                        name: alias.clone().unwrap_or_else(|| expr.output_name()),
                        datatype: infer_type(expr, columns),
                    };
                    exprs.push((expr.clone(), column));
                }
            }
        }
        Ok(exprs)
    }
}

/// Output columns of a table under its alias, or its name without one
fn table_columns(table: &Table, alias: Option<&str>) -> Vec<ResultColumn> {
    let qualifier = alias.unwrap_or(&table.name);
    table
        .columns
        .iter()
        .map(|c| ResultColumn::new(Some(qualifier), &c.name, Some(c.datatype.clone())))
        .collect()
}

fn column_ref(column: &ResultColumn) -> Expression {
    Expression::Column {
        table: column.table.clone(),
        name: column.name.clone(),
    }
}

/// A 1-based select list position
fn position(n: i32, width: usize, clause: &str) -> Result<usize> {
    match usize::try_from(n) {
        Ok(n) if n >= 1 && n <= width => Ok(n - 1),
        _ => Err(Error::Execution(format!(
            "{} position {} is not in select list",
            clause, n
        ))),
    }
}

/// An ORDER BY item naming an output column, by alias or by repeating its
/// expression
fn output_index(expr: &Expression, outputs: &[(Expression, ResultColumn)]) -> Option<usize> {
    if let Expression::Column { table: None, name } = expr {
        if let Some(index) = outputs.iter().position(|(_, c)| &c.name == name) {
            return Some(index);
        }
    }
    outputs.iter().position(|(e, _)| e == expr)
}

/// Every column reference must bind here or in an enclosing query
fn check_columns(expr: &Expression, scope: &Scope) -> Result<()> {
    let mut error = None;
    expr.walk(&mut |e| {
        if let Expression::Column { table, name } = e {
            match scope.binds(table.as_deref(), name) {
                Ok(true) => {}
                Ok(false) => {
                    error = Some(unknown_column(table.as_deref(), name));
                    return true;
                }
                Err(err) => {
                    error = Some(err);
                    return true;
                }
            }
        }
        false
    });
    error.map_or(Ok(()), Err)
}

/// Checks a clause that must not aggregate
fn check_clause(expr: &Expression, scope: &Scope, clause: &str) -> Result<()> {
    if expr.contains_aggregate() {
        return Err(Error::Execution(format!(
            "aggregate functions are not allowed in {}",
            clause
        )));
    }
    check_columns(expr, scope)
}

fn check_nesting(expr: &Expression) -> Result<()> {
    let nested = expr.walk(&mut |e| {
        matches!(e, Expression::Aggregate { arg: Some(arg), .. } if arg.contains_aggregate())
    });
    if nested {
        return Err(Error::Execution(
            "aggregate function calls cannot be nested".into(),
        ));
    }
    Ok(())
}

/// Outside aggregate calls, a grouped query may only read columns it groups
/// by. References to enclosing queries are constant per group.
fn check_grouped(expr: &Expression, group_by: &[Expression], columns: &[ResultColumn]) -> Result<()> {
    if group_by.contains(expr) {
        return Ok(());
    }
    let check = |e: &Expression| check_grouped(e, group_by, columns);
    match expr {
        Expression::Literal(_)
        | Expression::Aggregate { .. }
        | Expression::Exists(_)
        | Expression::Subquery(_) => Ok(()),
        Expression::Column { table, name } => {
            let Some(index) = resolve(columns, table.as_deref(), name)? else {
                return Ok(());
            };
            let grouped = group_by.iter().any(|g| match g {
                Expression::Column { table, name } => {
                    matches!(resolve(columns, table.as_deref(), name), Ok(Some(i)) if i == index)
                }
                _ => false,
            });
            if grouped {
                return Ok(());
            }
            let qualified = match &columns[index].table {
                Some(table) => format!("{}.{}", table, name),
                None => name.clone(),
            };
            Err(Error::Execution(format!(
                "column \"{}\" must appear in the GROUP BY clause or be used in an aggregate function",
                qualified
            )))
        }
        Expression::Unary(_, e)
        | Expression::IsNull { expr: e, .. }
        | Expression::Cast { expr: e, .. }
        | Expression::InSubquery { expr: e, .. } => check(e.as_ref()),
        Expression::Binary(_, lhs, rhs) => {
            check(lhs.as_ref())?;
            check(rhs.as_ref())
        }
        Expression::InList { expr, list, .. } => {
            check(expr.as_ref())?;
            list.iter().try_for_each(check)
        }
        Expression::Between {
            expr, low, high, ..
        } => {
            check(expr.as_ref())?;
            check(low.as_ref())?;
            check(high.as_ref())
        }
        Expression::Like { expr, pattern, .. } => {
            check(expr.as_ref())?;
            check(pattern.as_ref())
        }
        Expression::Case {
            operand,
            branches,
            else_result,
        } => {
            if let Some(operand) = operand {
                check(operand.as_ref())?;
            }
            for (when, then) in branches {
                check(when)?;
                check(then)?;
            }
            match else_result {
                Some(e) => check(e.as_ref()),
                None => Ok(()),
            }
        }
        Expression::Function { args, .. } => args.iter().try_for_each(check),
    }
}

/// The type an expression produces, when it is known before evaluation
fn infer_type(expr: &Expression, columns: &[ResultColumn]) -> Option<DataType> {
    match expr {
        Expression::Literal(value) => value.datatype(),
        Expression::Column { table, name } => resolve(columns, table.as_deref(), name)
            .ok()
            .flatten()
            .and_then(|i| columns[i].datatype.clone()),
        Expression::Cast { datatype, .. } => Some(datatype.clone()),
        Expression::IsNull { .. }
        | Expression::InList { .. }
        | Expression::InSubquery { .. }
        | Expression::Between { .. }
        | Expression::Like { .. }
        | Expression::Exists(_) => Some(DataType::Boolean),
        Expression::Unary(ast::UnaryOperator::Not, _) => Some(DataType::Boolean),
        Expression::Unary(_, expr) => infer_type(expr, columns),
        Expression::Binary(op, lhs, rhs) => match op {
            BinaryOperator::And
            | BinaryOperator::Or
            | BinaryOperator::Equal
            | BinaryOperator::NotEqual
            | BinaryOperator::LessThan
            | BinaryOperator::LessThanOrEqual
            | BinaryOperator::GreaterThan
            | BinaryOperator::GreaterThanOrEqual
            | BinaryOperator::Contains
            | BinaryOperator::ContainedBy => Some(DataType::Boolean),
            BinaryOperator::JsonGet => Some(DataType::Jsonb),
            BinaryOperator::JsonGetText => Some(DataType::Text),
            BinaryOperator::Concat => {
                match (infer_type(lhs, columns), infer_type(rhs, columns)) {
                    (Some(DataType::Jsonb), _) | (_, Some(DataType::Jsonb)) => Some(DataType::Jsonb),
                    (Some(DataType::Bytea), Some(DataType::Bytea)) => Some(DataType::Bytea),
                    _ => Some(DataType::Text),
                }
            }
            // Arithmetic result types depend on both operands; leave them
            // to the values
            _ => None,
        },
        Expression::Aggregate { func, arg, .. } => match func {
            AggregateFunction::Count => Some(DataType::BigInt),
            AggregateFunction::Min | AggregateFunction::Max => {
                arg.as_ref().and_then(|arg| infer_type(arg, columns))
            }
            AggregateFunction::Sum | AggregateFunction::Avg => None,
        },
        Expression::Function { name, .. } => match name.as_str() {
            "lower" | "upper" | "concat" | "jsonb_typeof" => Some(DataType::Text),
            "length" => Some(DataType::Integer),
            "gen_random_uuid" | "uuid_generate_v4" | "uuid_generate_v7" => Some(DataType::Uuid),
            "now" | "current_timestamp" | "transaction_timestamp" => Some(DataType::TimestampTz),
            "localtimestamp" => Some(DataType::Timestamp),
            "current_date" => Some(DataType::Date),
            "current_time" | "localtime" => Some(DataType::Time),
            _ => None,
        },
        Expression::Case { .. } | Expression::Subquery(_) => None,
    }
}
