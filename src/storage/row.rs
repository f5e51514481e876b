use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    sql::types::{Tuple, Value},
};

/// Row identity, unique within its table and never reused
pub type RowId = u64;

/// A stored row: an identity plus values aligned with the table's columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    pub values: Tuple,
}

impl Row {
    pub fn new(id: RowId, values: Tuple) -> Self {
        Self { id, values }
    }

    /// The value at column position `index`
    pub fn get_value(&self, index: usize) -> Result<&Value> {
        self.values.get(index).ok_or_else(|| {
            Error::Execution(format!(
                "column index {} out of range for row with {} columns",
                index,
                self.values.len()
            ))
        })
    }

    /// A new row with the same identity and the given values
    pub fn with_values(&self, values: Tuple) -> Row {
        Row {
            id: self.id,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Row;
    use crate::{
        error::{Error, Result},
        sql::types::Value,
    };

    #[test]
    fn test_get_value_bounds() -> Result<()> {
        let row = Row::new(7, vec![Value::Integer(42), Value::Text("a".into())]);
        assert_eq!(row.get_value(0)?, &Value::Integer(42));
        assert_eq!(row.get_value(1)?, &Value::Text("a".into()));
        assert!(matches!(row.get_value(2), Err(Error::Execution(_))));
        assert!(matches!(row.get_value(usize::MAX), Err(Error::Execution(_))));
        Ok(())
    }

    #[test]
    fn test_with_values_keeps_identity() {
        let row = Row::new(3, vec![Value::Integer(1), Value::Integer(2)]);
        let updated = row.with_values(vec![Value::Integer(1), Value::Integer(5)]);
        assert_eq!(updated.id, 3);
        assert_eq!(updated.values, vec![Value::Integer(1), Value::Integer(5)]);
        assert_eq!(row.values, vec![Value::Integer(1), Value::Integer(2)]);
    }
}
