use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    sql::types::{DataType, Tuple, Value},
};

/// Table schema definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    /// Validates table schema
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::Execution(format!(
                "table {} has no columns",
                self.name
            )));
        }

        let mut names = HashSet::new();
        for column in &self.columns {
            if !names.insert(column.name.as_str()) {
                return Err(Error::Execution(format!(
                    "column {} specified more than once",
                    column.name
                )));
            }
            column.validate()?;
        }

        if self.columns.iter().filter(|c| c.primary_key).count() > 1 {
            return Err(Error::Execution(format!(
                "multiple primary keys for table {} are not allowed",
                self.name
            )));
        }

        Ok(())
    }

    /// Returns the column index for a given column name
    pub fn get_col_index(&self, col_name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == col_name)
            .ok_or_else(|| {
                Error::Execution(format!(
                    "column {} of relation {} does not exist",
                    col_name, self.name
                ))
            })
    }

    /// Coerces and checks a full candidate row against every column.
    pub fn validate_row(&self, row: Tuple) -> Result<Tuple> {
        if row.len() != self.columns.len() {
            return Err(Error::Validation(format!(
                "row has {} values but table {} has {} columns",
                row.len(),
                self.name,
                self.columns.len()
            )));
        }
        self.columns
            .iter()
            .zip(row)
            .map(|(column, value)| column.validate_value(value))
            .collect()
    }
}

/// Column schema definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub datatype: DataType,
    pub nullable: bool,
    pub default: Option<Value>,
    /// Whether this column is the primary key (implies NOT NULL and UNIQUE)
    pub primary_key: bool,
    pub unique: bool,
    /// Upper bound for varchar(n)/char(n)
    pub max_length: Option<u32>,
    /// Filled from the table's sequence when omitted (serial types)
    pub auto_increment: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Self {
            name: name.into(),
            datatype,
            nullable: true,
            default: None,
            primary_key: false,
            unique: false,
            max_length: None,
            auto_increment: false,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.primary_key && self.nullable {
            return Err(Error::Execution(format!(
                "primary key column {} cannot be nullable",
                self.name
            )));
        }
        if let Some(default) = &self.default {
            if !self.datatype.is_valid_value(default) {
                return Err(Error::Validation(format!(
                    "default value {} is not valid for column {} of type {}",
                    default, self.name, self.datatype
                )));
            }
            if default.is_null() && !self.nullable {
                return Err(Error::Validation(format!(
                    "default NULL not allowed for NOT NULL column {}",
                    self.name
                )));
            }
        }
        if self.auto_increment && !matches!(
            self.datatype,
            DataType::SmallInt | DataType::Integer | DataType::BigInt
        ) {
            return Err(Error::Execution(format!(
                "serial column {} must be an integer type",
                self.name
            )));
        }
        Ok(())
    }

    /// Whether values in this column must be distinct
    pub fn is_unique(&self) -> bool {
        self.primary_key || self.unique
    }

    /// Converts a value to the column type and checks nullability and length.
    pub fn validate_value(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            if !self.nullable {
                return Err(Error::Validation(format!(
                    "null value in column \"{}\" violates not-null constraint",
                    self.name
                )));
            }
            return Ok(Value::Null);
        }
        let value = self.datatype.convert_value(value).map_err(|err| match err {
            Error::Validation(msg) => {
                Error::Validation(format!("column \"{}\": {}", self.name, msg))
            }
            err => err,
        })?;
        match (&value, self.max_length) {
            (Value::Text(s), Some(max)) if self.datatype == DataType::Char => {
                let trimmed = s.trim_end_matches(' ');
                let len = trimmed.chars().count();
                if len > max as usize {
                    return Err(self.too_long(max));
                }
                Ok(Value::Text(format!("{:<width$}", trimmed, width = max as usize)))
            }
            (Value::Text(s), Some(max)) if s.chars().count() > max as usize => {
                Err(self.too_long(max))
            }
            _ => Ok(value),
        }
    }

    fn too_long(&self, max: u32) -> Error {
        Error::Validation(format!(
            "value too long for type {}({}) in column \"{}\"",
            self.datatype, max, self.name
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{Column, Table};
    use crate::{
        error::{Error, Result},
        sql::types::{DataType, Value},
    };

    fn table() -> Table {
        let mut id = Column::new("id", DataType::Integer);
        id.primary_key = true;
        id.nullable = false;
        let mut code = Column::new("code", DataType::Char);
        code.max_length = Some(3);
        let mut name = Column::new("name", DataType::Varchar);
        name.max_length = Some(5);
        Table {
            schema: "public".into(),
            name: "t".into(),
            columns: vec![id, code, name],
        }
    }

    #[test]
    fn test_validate_row() -> Result<()> {
        let t = table();
        t.validate()?;
        let row = t.validate_row(vec![
            Value::Text("7".into()),
            Value::Text("ab".into()),
            Value::Text("hello".into()),
        ])?;
        assert_eq!(
            row,
            vec![
                Value::Integer(7),
                Value::Text("ab ".into()),
                Value::Text("hello".into())
            ]
        );

        assert!(matches!(
            t.validate_row(vec![Value::Null, Value::Null, Value::Null]),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            t.validate_row(vec![Value::Integer(1), Value::Null, Value::Text("toolong".into())]),
            Err(Error::Validation(_))
        ));
        assert!(t.validate_row(vec![Value::Integer(1)]).is_err());
        Ok(())
    }

    #[test]
    fn test_validate_schema() {
        let mut t = table();
        t.columns[2].name = "id".into();
        assert!(t.validate().is_err());

        let mut t = table();
        t.columns[0].nullable = true;
        assert!(t.validate().is_err());

        let mut t = table();
        t.columns[1].default = Some(Value::Integer(3));
        assert!(t.validate().is_err());
    }
}
