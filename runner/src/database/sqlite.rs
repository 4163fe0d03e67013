use super::{ConnectionError, RunRecord};
use crate::{config::DatabaseConfig, matrix::ConfigurationMatrix};
use parking_lot::{lock_api::ArcMutexGuard, FairMutex, RawFairMutex};
use rusqlite::{params, Connection};
use std::{collections::BTreeMap, fmt::Debug, sync::Arc};
use tracing::{debug, error, info};
use tracing_unwrap::ResultExt;

type IDMap = BTreeMap<String, i64>;

#[derive(Debug)]
/// Transparent, thread safe wrapper over `InnerConnection`
pub struct SharedConnection(Arc<FairMutex<InnerConnection>>);

#[derive(Debug)]
pub struct InnerConnection {
    connection: Connection,
    configurations: IDMap,
    sweep: Option<i64>,
}

impl SharedConnection {
    pub fn new(inner_connection: InnerConnection) -> Self {
        Self(Arc::new(FairMutex::new(inner_connection)))
    }

    fn lock(&self) -> ArcMutexGuard<RawFairMutex, InnerConnection> {
        self.0.lock_arc()
    }

    pub fn load(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        Ok(Self::new(InnerConnection::load(config)?))
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self, ConnectionError> {
        Ok(Self::new(InnerConnection::with_connection(
            Connection::open_in_memory()?,
        )))
    }

    pub fn init(
        &self,
        matrix: &ConfigurationMatrix,
        comment: Option<String>,
    ) -> Result<i64, ConnectionError> {
        self.lock().init(matrix, comment)
    }

    pub fn store_iter<'a, I: Iterator<Item = &'a RunRecord>>(
        &self,
        records: I,
    ) -> Result<usize, ConnectionError> {
        self.lock().store_iter(records)
    }

    pub fn close(self) -> Result<(), ConnectionError> {
        Arc::try_unwrap(self.0).unwrap_or_log().into_inner().close()
    }

    #[cfg(test)]
    fn count_runs(&self, status: &str) -> Result<i64, ConnectionError> {
        Ok(self
            .lock()
            .connection
            .query_row("select count(*) from runs where status = ?", [status], |row| {
                row.get(0)
            })?)
    }
}

impl InnerConnection {
    fn with_connection(connection: Connection) -> Self {
        Self {
            connection,
            configurations: IDMap::new(),
            sweep: None,
        }
    }

    pub fn load(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        let connection = Connection::open(&config.path)?;
        info!(path = ?config.path, "Opened SQLite database");

        Ok(Self::with_connection(connection))
    }

    /// Apply the schema, open a new sweep and register every configuration of the matrix
    pub fn init(
        &mut self,
        matrix: &ConfigurationMatrix,
        comment: Option<String>,
    ) -> Result<i64, ConnectionError> {
        let mut counter = 1;

        for table in SQL_SCHEMA {
            match self.connection.execute(table, []) {
                Ok(_) => debug!("Applied SQL schema ({counter}/{SQL_SCHEMA_NUMBER})"),
                Err(error) => {
                    error!(error = ?error, table = table, "Failed to apply SQL schema ({counter}/{SQL_SCHEMA_NUMBER}): {error}");

                    return Err(ConnectionError::SQLite(error));
                }
            };

            counter += 1;
        }

        let sweep: i64 = self
            .connection
            .prepare_cached(
                "insert into sweeps
                 (comment) values (?)
                 returning id",
            )?
            .query_row(params![comment.unwrap_or_default()], |row| row.get(0))?;
        info!(id = sweep, "Created new sweep");
        self.sweep = Some(sweep);

        for configuration in matrix.iter() {
            let id: i64 = self
                .connection
                .prepare_cached(
                    "insert into configurations
                     (sweep, name, variant, segment_bits, toggles)
                     values (?, ?, ?, ?, ?)
                     returning id",
                )?
                .query_row(
                    params![
                        sweep,
                        configuration.name,
                        configuration.variant,
                        configuration.segment_bits,
                        configuration.describe_toggles()
                    ],
                    |row| row.get(0),
                )?;

            debug!(name = %configuration.name, id = id, "Created configuration entry");
            self.configurations.insert(configuration.name.clone(), id);
        }

        Ok(sweep)
    }

    pub fn store_iter<'a, I: Iterator<Item = &'a RunRecord>>(
        &self,
        mut records: I,
    ) -> Result<usize, ConnectionError> {
        let sweep = self.sweep.ok_or(ConnectionError::Uninitialised)?;
        let mut counter = 0;

        // NOTE: only one connection exists at a time, so no nested transactions are possible
        let mut tx = self.connection.unchecked_transaction()?;
        tx.set_drop_behavior(rusqlite::DropBehavior::Rollback);
        records.try_for_each(|record| -> Result<(), ConnectionError> {
            counter += 1;
            let metrics = record.metrics.unwrap_or_default();

            tx.prepare_cached(
                "insert into runs
                (sweep, configuration, binary, test_case, run, status,
                 throughput, hit_ratio, run_time, failure)
                values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?
            .execute(params![
                sweep,
                self.configurations.get(&record.configuration),
                record.binary,
                record.test_case,
                record.run,
                record.status.as_str(),
                metrics.throughput,
                metrics.hit_ratio,
                metrics.elapsed,
                record.failure,
            ])?;

            Ok(())
        })?;
        tx.commit()?;

        info!("Stored {counter} run records");

        Ok(counter)
    }

    pub fn close(mut self) -> Result<(), ConnectionError> {
        let mut counter = 0;
        while let Err((connection, error)) = self.connection.close() {
            counter += 1;
            self.connection = connection;
            error!(error = ?error, "Failed to close SQLite connection: {error}, trying again {counter}/3");

            if counter == 3 {
                error!("Failed to close SQLite connection, giving up");

                return Err(ConnectionError::SQLite(error));
            }
        }

        info!("Closed SQLite connection");

        Ok(())
    }
}

pub const SQL_SCHEMA: [&str; 3] = [
    "create table if not exists sweeps (
    id integer primary key,
    comment text,
    started text not null default current_timestamp
);",
    "create table if not exists configurations (
    id integer primary key,
    sweep integer not null references sweeps (id),
    name text not null,
    variant text not null,
    segment_bits integer not null,
    toggles text not null
);",
    "create table if not exists runs (
    id integer primary key,
    sweep integer not null references sweeps (id),
    configuration integer references configurations (id),
    binary text not null,
    test_case text not null,
    run integer not null,
    status text not null,

    throughput real,
    hit_ratio real,
    run_time real,
    failure text
);",
];
pub const SQL_SCHEMA_NUMBER: usize = SQL_SCHEMA.len();
