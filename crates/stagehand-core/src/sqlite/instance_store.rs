use rusqlite::{OptionalExtension, Row, params};

use crate::models::{
    Database, DatabaseFind, DatabaseId, EnvironmentId, Instance, InstanceId, NewDatabase,
    NewInstance, invalid_input, not_found,
};
use crate::persistence::{InstanceStore, PersistenceResult};
use crate::sqlite::store::{
    SqliteStore, StoreError, from_unix_seconds, is_unique_violation, now_unix, parse_column,
};

const INSTANCE_COLUMNS: &str = "id, name, environment_id, engine, host, port, username, password";

impl InstanceStore for SqliteStore {
    fn create_instance(&self, instance: &NewInstance) -> PersistenceResult<Instance> {
        self.with_write_transaction("create_instance", |transaction| {
            transaction.execute(
                "
INSERT INTO instances (name, environment_id, engine, host, port, username, password)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
",
                params![
                    instance.name,
                    instance.environment_id.0,
                    instance.engine.as_str(),
                    instance.host,
                    instance.port,
                    instance.username,
                    instance.password
                ],
            )?;
            let id = transaction.last_insert_rowid();
            Ok(transaction.query_row(
                &format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = ?1"),
                [id],
                instance_from_row,
            )?)
        })
    }

    fn find_instance(&self, id: InstanceId) -> PersistenceResult<Option<Instance>> {
        self.with_reader("find_instance", |connection| {
            Ok(connection
                .query_row(
                    &format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = ?1"),
                    [id.0],
                    instance_from_row,
                )
                .optional()?)
        })
    }

    fn create_database(&self, database: &NewDatabase) -> PersistenceResult<Database> {
        self.with_write_transaction("create_database", |transaction| {
            let instance_exists: bool = transaction.query_row(
                "SELECT EXISTS (SELECT 1 FROM instances WHERE id = ?1)",
                [database.instance_id.0],
                |row| row.get(0),
            )?;
            if !instance_exists {
                return Err(
                    not_found(format!("instance {} not found", database.instance_id)).into(),
                );
            }

            let inserted = transaction.execute(
                "INSERT INTO databases (instance_id, name, created_at_unix) VALUES (?1, ?2, ?3)",
                params![database.instance_id.0, database.name, now_unix()?],
            );
            match inserted {
                Ok(_) => {}
                Err(error) if is_unique_violation(&error) => {
                    return Err(StoreError::Domain(invalid_input(format!(
                        "database '{}' already exists on instance {}",
                        database.name, database.instance_id
                    ))));
                }
                Err(error) => return Err(error.into()),
            }

            let id = transaction.last_insert_rowid();
            Ok(transaction.query_row(
                "SELECT id, instance_id, name, created_at_unix FROM databases WHERE id = ?1",
                [id],
                database_from_row,
            )?)
        })
    }

    fn find_databases(&self, find: &DatabaseFind) -> PersistenceResult<Vec<Database>> {
        self.with_reader("find_databases", |connection| {
            let mut statement = connection.prepare(
                "
SELECT id, instance_id, name, created_at_unix FROM databases
WHERE (?1 IS NULL OR id = ?1)
  AND (?2 IS NULL OR instance_id = ?2)
  AND (?3 IS NULL OR name = ?3)
ORDER BY id
",
            )?;
            let rows = statement.query_map(
                params![
                    find.id.map(|id| id.0),
                    find.instance_id.map(|id| id.0),
                    find.name.as_deref()
                ],
                database_from_row,
            )?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}

fn instance_from_row(row: &Row<'_>) -> rusqlite::Result<Instance> {
    let engine: String = row.get(3)?;
    Ok(Instance {
        id: InstanceId(row.get(0)?),
        name: row.get(1)?,
        environment_id: EnvironmentId(row.get(2)?),
        engine: parse_column(&engine, "engine")?,
        host: row.get(4)?,
        port: row.get(5)?,
        username: row.get(6)?,
        password: row.get(7)?,
    })
}

fn database_from_row(row: &Row<'_>) -> rusqlite::Result<Database> {
    Ok(Database {
        id: DatabaseId(row.get(0)?),
        instance_id: InstanceId(row.get(1)?),
        name: row.get(2)?,
        created_at: from_unix_seconds(row.get(3)?)?,
    })
}
