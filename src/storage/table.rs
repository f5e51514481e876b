use std::{cmp::Ordering, collections::BTreeMap};

use crate::{
    error::{Error, Result},
    sql::{
        schema,
        types::{Tuple, Value},
    },
    storage::row::{Row, RowId},
};

/// A stored table: its definition plus rows keyed by id
#[derive(Debug, Clone)]
pub struct Table {
    definition: schema::Table,
    rows: BTreeMap<RowId, Row>,
    next_id: RowId,
    /// Last value handed out per serial column
    sequences: BTreeMap<String, i64>,
    last_generated_keys: Vec<Tuple>,
}

impl Table {
    pub fn new(definition: schema::Table) -> Self {
        Self {
            definition,
            rows: BTreeMap::new(),
            next_id: 1,
            sequences: BTreeMap::new(),
            last_generated_keys: Vec::new(),
        }
    }

    pub fn definition(&self) -> &schema::Table {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// All rows in id order
    pub fn all_rows(&self) -> Vec<Row> {
        self.rows.values().cloned().collect()
    }

    pub fn get_row(&self, id: RowId) -> Option<&Row> {
        self.rows.get(&id)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Keys generated by the most recent INSERT into this table, one tuple
    /// per inserted row
    pub fn last_generated_keys(&self) -> &[Tuple] {
        &self.last_generated_keys
    }

    pub(crate) fn next_id(&self) -> RowId {
        self.next_id
    }

    pub(crate) fn sequences(&self) -> &BTreeMap<String, i64> {
        &self.sequences
    }

    pub(crate) fn allocate_id(&mut self) -> RowId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn next_sequence_value(&mut self, column: &str) -> Result<i64> {
        let current = self.sequences.entry(column.to_string()).or_insert(0);
        *current = current.checked_add(1).ok_or_else(|| {
            Error::Execution(format!(
                "sequence for column {} of relation {} reached its maximum",
                column, self.definition.name
            ))
        })?;
        Ok(*current)
    }

    /// The generated key of a freshly inserted row: its serial column
    /// values, or the row id when the table has no serial column.
    pub(crate) fn generated_key(&self, row: &Row) -> Tuple {
        let serials: Tuple = self
            .definition
            .columns
            .iter()
            .zip(&row.values)
            .filter(|(column, _)| column.auto_increment)
            .map(|(_, value)| value.clone())
            .collect();
        if serials.is_empty() {
            vec![Value::BigInt(row.id as i64)]
        } else {
            serials
        }
    }

    /// Replaces the recorded keys, returning the previous ones
    pub(crate) fn set_last_generated_keys(&mut self, keys: Vec<Tuple>) -> Vec<Tuple> {
        std::mem::replace(&mut self.last_generated_keys, keys)
    }

    /// Full-scan uniqueness check for PRIMARY KEY and UNIQUE columns. NULLs
    /// never conflict. `skip` excludes the row being replaced.
    pub(crate) fn check_unique(&self, values: &[Value], skip: Option<RowId>) -> Result<()> {
        for (index, column) in self.definition.columns.iter().enumerate() {
            if !column.is_unique() {
                continue;
            }
            let Some(value) = values.get(index).filter(|v| !v.is_null()) else {
                continue;
            };
            for row in self.rows.values() {
                if Some(row.id) == skip {
                    continue;
                }
                if row.values[index].compare(value)? == Some(Ordering::Equal) {
                    return Err(Error::Validation(format!(
                        "duplicate key value violates unique constraint on {}.{}: {}",
                        self.definition.name, column.name, value
                    )));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn put_row(&mut self, row: Row) -> Option<Row> {
        self.rows.insert(row.id, row)
    }

    pub(crate) fn remove_row(&mut self, id: RowId) -> Option<Row> {
        self.rows.remove(&id)
    }

    /// Replaces the whole content with a captured image
    pub(crate) fn restore(
        &mut self,
        rows: Vec<Row>,
        next_id: RowId,
        sequences: BTreeMap<String, i64>,
        last_generated_keys: Vec<Tuple>,
    ) {
        self.rows = rows.into_iter().map(|row| (row.id, row)).collect();
        self.next_id = next_id;
        self.sequences = sequences;
        self.last_generated_keys = last_generated_keys;
    }

    /// Drops every row. Ids and sequences keep counting from where they were.
    pub(crate) fn truncate(&mut self) {
        self.rows.clear();
        self.last_generated_keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::Table;
    use crate::{
        error::{Error, Result},
        sql::{
            schema::{self, Column},
            types::{DataType, Value},
        },
        storage::row::Row,
    };

    fn table() -> Table {
        let mut id = Column::new("id", DataType::Integer);
        id.primary_key = true;
        id.nullable = false;
        let mut email = Column::new("email", DataType::Text);
        email.unique = true;
        Table::new(schema::Table {
            schema: "public".into(),
            name: "users".into(),
            columns: vec![id, email],
        })
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut t = table();
        assert_eq!(t.allocate_id(), 1);
        assert_eq!(t.allocate_id(), 2);
        t.put_row(Row::new(1, vec![Value::Integer(1), Value::Null]));
        t.remove_row(1);
        assert_eq!(t.allocate_id(), 3);
    }

    #[test]
    fn test_check_unique() -> Result<()> {
        let mut t = table();
        t.put_row(Row::new(1, vec![Value::Integer(1), Value::Null]));
        t.put_row(Row::new(2, vec![Value::Integer(2), Value::Text("a@x".into())]));

        // NULLs never conflict
        t.check_unique(&[Value::Integer(3), Value::Null], None)?;
        assert!(matches!(
            t.check_unique(&[Value::Integer(1), Value::Null], None),
            Err(Error::Validation(_))
        ));
        assert!(t
            .check_unique(&[Value::Integer(3), Value::Text("a@x".into())], None)
            .is_err());
        // A row does not conflict with itself
        t.check_unique(&[Value::Integer(2), Value::Text("a@x".into())], Some(2))?;
        Ok(())
    }

    #[test]
    fn test_generated_keys() -> Result<()> {
        let mut t = table();
        let row = Row::new(9, vec![Value::Integer(1), Value::Null]);
        assert_eq!(t.generated_key(&row), vec![Value::BigInt(9)]);
        assert_eq!(t.next_sequence_value("id")?, 1);
        assert_eq!(t.next_sequence_value("id")?, 2);
        Ok(())
    }
}
