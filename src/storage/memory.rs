use std::collections::BTreeMap;

use crate::{
    error::{Error, Result},
    sql::schema,
    storage::table::Table,
};

/// A named namespace of tables
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    tables: BTreeMap<String, Table>,
}

impl Schema {
    fn new(name: String) -> Self {
        Self {
            name,
            tables: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// In-memory catalog and row store
///
/// Holds every schema, table and row of an engine instance. Access goes
/// through one coarse lock owned by the transaction manager.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    schemas: BTreeMap<String, Schema>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_schema(&mut self, name: &str) -> Result<()> {
        if self.schemas.contains_key(name) {
            return Err(Error::Execution(format!("schema \"{}\" already exists", name)));
        }
        self.schemas
            .insert(name.to_string(), Schema::new(name.to_string()));
        Ok(())
    }

    /// Drops an empty schema
    pub fn drop_schema(&mut self, name: &str) -> Result<()> {
        let schema = self.must_get_schema(name)?;
        if !schema.is_empty() {
            return Err(Error::Execution(format!(
                "cannot drop schema {} because other objects depend on it",
                name
            )));
        }
        self.schemas.remove(name);
        Ok(())
    }

    pub fn get_schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    pub fn must_get_schema(&self, name: &str) -> Result<&Schema> {
        self.schemas
            .get(name)
            .ok_or_else(|| Error::Execution(format!("schema \"{}\" does not exist", name)))
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.values()
    }

    /// Registers a validated table definition
    pub fn create_table(&mut self, definition: schema::Table) -> Result<()> {
        definition.validate()?;
        let schema = self.schemas.get_mut(&definition.schema).ok_or_else(|| {
            Error::Execution(format!("schema \"{}\" does not exist", definition.schema))
        })?;
        if schema.tables.contains_key(&definition.name) {
            return Err(Error::Execution(format!(
                "relation \"{}\" already exists",
                definition.name
            )));
        }
        schema
            .tables
            .insert(definition.name.clone(), Table::new(definition));
        Ok(())
    }

    pub fn drop_table(&mut self, schema: &str, name: &str) -> Result<Table> {
        self.schemas
            .get_mut(schema)
            .and_then(|s| s.tables.remove(name))
            .ok_or_else(|| Self::no_such_table(name))
    }

    pub fn get_table(&self, schema: &str, name: &str) -> Option<&Table> {
        self.schemas.get(schema)?.get_table(name)
    }

    pub fn must_get_table(&self, schema: &str, name: &str) -> Result<&Table> {
        self.get_table(schema, name)
            .ok_or_else(|| Self::no_such_table(name))
    }

    pub(crate) fn must_get_table_mut(&mut self, schema: &str, name: &str) -> Result<&mut Table> {
        self.schemas
            .get_mut(schema)
            .and_then(|s| s.tables.get_mut(name))
            .ok_or_else(|| Self::no_such_table(name))
    }

    pub(crate) fn tables_mut(&mut self) -> impl Iterator<Item = &mut Table> {
        self.schemas.values_mut().flat_map(|s| s.tables.values_mut())
    }

    fn no_such_table(name: &str) -> Error {
        Error::Execution(format!("relation \"{}\" does not exist", name))
    }
}
