//! The persistence layer as seen by the drainers.
//!
//! The drainers never talk to the database directly, they go through a [Store]. The daemon uses
//! the SQLite one, tests use an in-memory one.

use crate::{
    database::{
        actions::{
            db_write_action, db_write_collectible_output, db_write_collectible_transaction,
            db_write_output, db_write_property, db_write_transaction,
        },
        interface::{db_collectible_transaction, db_property, db_transaction},
        schema::{DbCollectibleOutput, DbOutput, DbTransaction},
        DatabaseError,
    },
    mtgsyncd::ActionState,
};

use std::path::PathBuf;

/// Point reads and writes of the local state. Every write is an upsert.
pub trait Store: Send + Sync {
    fn read_property(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError>;

    fn write_property(&self, key: &[u8], value: &[u8]) -> Result<(), DatabaseError>;

    fn write_output(&self, output: &DbOutput) -> Result<(), DatabaseError>;

    fn read_transaction(&self, trace_id: &str) -> Result<Option<DbTransaction>, DatabaseError>;

    fn write_transaction(&self, transaction: &DbTransaction) -> Result<(), DatabaseError>;

    fn write_collectible_output(&self, output: &DbCollectibleOutput) -> Result<(), DatabaseError>;

    fn read_collectible_transaction(
        &self,
        trace_id: &str,
    ) -> Result<Option<DbTransaction>, DatabaseError>;

    fn write_collectible_transaction(
        &self,
        transaction: &DbTransaction,
    ) -> Result<(), DatabaseError>;

    /// Notify the consumer of fungible outputs about this observation of an output.
    fn write_action(&self, output: &DbOutput, state: ActionState) -> Result<(), DatabaseError>;
}

/// A [Store] backed by our SQLite database. It holds no connection, each operation opens its own
/// so that it can be shared between threads.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn new(db_path: PathBuf) -> SqliteStore {
        SqliteStore { db_path }
    }
}

impl Store for SqliteStore {
    fn read_property(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        db_property(&self.db_path, key)
    }

    fn write_property(&self, key: &[u8], value: &[u8]) -> Result<(), DatabaseError> {
        db_write_property(&self.db_path, key, value)
    }

    fn write_output(&self, output: &DbOutput) -> Result<(), DatabaseError> {
        db_write_output(&self.db_path, output)
    }

    fn read_transaction(&self, trace_id: &str) -> Result<Option<DbTransaction>, DatabaseError> {
        db_transaction(&self.db_path, trace_id)
    }

    fn write_transaction(&self, transaction: &DbTransaction) -> Result<(), DatabaseError> {
        db_write_transaction(&self.db_path, transaction)
    }

    fn write_collectible_output(&self, output: &DbCollectibleOutput) -> Result<(), DatabaseError> {
        db_write_collectible_output(&self.db_path, output)
    }

    fn read_collectible_transaction(
        &self,
        trace_id: &str,
    ) -> Result<Option<DbTransaction>, DatabaseError> {
        db_collectible_transaction(&self.db_path, trace_id)
    }

    fn write_collectible_transaction(
        &self,
        transaction: &DbTransaction,
    ) -> Result<(), DatabaseError> {
        db_write_collectible_transaction(&self.db_path, transaction)
    }

    fn write_action(&self, output: &DbOutput, state: ActionState) -> Result<(), DatabaseError> {
        db_write_action(&self.db_path, &output.output_id, output.updated_at, state)
    }
}
