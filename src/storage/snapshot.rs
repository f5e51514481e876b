use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::Result,
    sql::{schema, types::Tuple},
    storage::{
        memory::MemoryStorage,
        row::{Row, RowId},
    },
};

/// Captured content of one table. The definition identifies the table: a
/// table of the same name with other columns is a different table.
#[derive(Debug, Serialize, Deserialize)]
struct TableImage {
    definition: schema::Table,
    rows: Vec<Row>,
    next_id: RowId,
    sequences: BTreeMap<String, i64>,
    last_generated_keys: Vec<Tuple>,
}

/// A deep copy of every row of every table, taken before a transaction's
/// first data change and used to restore that state on rollback.
///
/// The image is kept bincode-encoded so nothing in it can alias live rows.
#[derive(Debug)]
pub struct Snapshot {
    image: Vec<u8>,
}

impl Snapshot {
    pub fn capture(storage: &MemoryStorage) -> Result<Self> {
        let images: BTreeMap<(String, String), TableImage> = storage
            .schemas()
            .flat_map(|schema| schema.tables())
            .map(|table| {
                let definition = table.definition();
                (
                    (definition.schema.clone(), definition.name.clone()),
                    TableImage {
                        definition: definition.clone(),
                        rows: table.all_rows(),
                        next_id: table.next_id(),
                        sequences: table.sequences().clone(),
                        last_generated_keys: table.last_generated_keys().to_vec(),
                    },
                )
            })
            .collect();
        let image = bincode::serialize(&images)?;
        debug!(tables = images.len(), bytes = image.len(), "captured snapshot");
        Ok(Self { image })
    }

    /// Puts every table captured by the snapshot back into its captured
    /// state. Tables created since lose their rows, including a table
    /// dropped and recreated under a captured name with other columns.
    /// Dropped tables stay dropped.
    pub fn restore(&self, storage: &mut MemoryStorage) -> Result<()> {
        let mut images: BTreeMap<(String, String), TableImage> =
            bincode::deserialize(&self.image)?;
        for table in storage.tables_mut() {
            let key = (
                table.definition().schema.clone(),
                table.definition().name.clone(),
            );
            match images.remove(&key) {
                Some(image) if image.definition == *table.definition() => table.restore(
                    image.rows,
                    image.next_id,
                    image.sequences,
                    image.last_generated_keys,
                ),
                _ => table.truncate(),
            }
        }
        debug!("restored snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Snapshot;
    use crate::{
        error::Result,
        sql::{
            schema::{Column, Table},
            types::{DataType, Value},
        },
        storage::{memory::MemoryStorage, row::Row},
    };

    fn create(storage: &mut MemoryStorage, name: &str) -> Result<()> {
        storage.create_table(Table {
            schema: "public".into(),
            name: name.into(),
            columns: vec![
                Column::new("a", DataType::Integer),
                Column::new("b", DataType::Jsonb),
            ],
        })
    }

    #[test]
    fn test_restore_across_tables() -> Result<()> {
        let mut storage = MemoryStorage::new();
        storage.create_schema("public")?;
        create(&mut storage, "t1")?;
        create(&mut storage, "t2")?;
        let t1 = storage.must_get_table_mut("public", "t1")?;
        let id = t1.allocate_id();
        t1.put_row(Row::new(
            id,
            vec![Value::Integer(1), Value::Json(serde_json::json!({"k": [1, 2]}))],
        ));

        let snapshot = Snapshot::capture(&storage)?;

        let t1 = storage.must_get_table_mut("public", "t1")?;
        t1.remove_row(id);
        let id2 = t1.allocate_id();
        t1.put_row(Row::new(id2, vec![Value::Integer(2), Value::Null]));
        let t2 = storage.must_get_table_mut("public", "t2")?;
        let id3 = t2.allocate_id();
        t2.put_row(Row::new(id3, vec![Value::Integer(3), Value::Null]));
        create(&mut storage, "t3")?;
        let t3 = storage.must_get_table_mut("public", "t3")?;
        let id4 = t3.allocate_id();
        t3.put_row(Row::new(id4, vec![Value::Integer(4), Value::Null]));

        snapshot.restore(&mut storage)?;

        let t1 = storage.must_get_table("public", "t1")?;
        assert_eq!(
            t1.all_rows(),
            vec![Row::new(
                1,
                vec![Value::Integer(1), Value::Json(serde_json::json!({"k": [1, 2]}))]
            )]
        );
        assert_eq!(t1.next_id(), 2);
        let t2 = storage.must_get_table("public", "t2")?;
        assert_eq!(t2.row_count(), 0);
        assert_eq!(t2.next_id(), 1);
        assert_eq!(storage.must_get_table("public", "t3")?.row_count(), 0);
        Ok(())
    }

    #[test]
    fn test_recreated_table_is_not_refilled() -> Result<()> {
        let mut storage = MemoryStorage::new();
        storage.create_schema("public")?;
        create(&mut storage, "t")?;
        let t = storage.must_get_table_mut("public", "t")?;
        let id = t.allocate_id();
        t.put_row(Row::new(id, vec![Value::Integer(1), Value::Null]));
        t.set_last_generated_keys(vec![vec![Value::BigInt(1)]]);

        let snapshot = Snapshot::capture(&storage)?;

        storage.drop_table("public", "t")?;
        storage.create_table(Table {
            schema: "public".into(),
            name: "t".into(),
            columns: vec![Column::new("a", DataType::Integer)],
        })?;
        let t = storage.must_get_table_mut("public", "t")?;
        let id = t.allocate_id();
        t.put_row(Row::new(id, vec![Value::Integer(9)]));

        snapshot.restore(&mut storage)?;

        let t = storage.must_get_table("public", "t")?;
        assert_eq!(t.row_count(), 0);
        assert!(t.last_generated_keys().is_empty());
        assert_eq!(t.definition().columns.len(), 1);
        Ok(())
    }
}
