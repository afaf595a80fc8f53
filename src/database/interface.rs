use crate::{
    database::{
        schema::{DbAction, DbCollectibleOutput, DbGroup, DbOutput, DbTransaction},
        DatabaseError,
    },
    mtgsyncd::{ActionState, OutputState, Timestamp, TransactionState},
};

use std::{
    boxed::Box,
    convert::{TryFrom, TryInto},
    path::Path,
};

use rusqlite::{
    params, types::FromSqlError, Connection, Params, Row, Transaction, TransactionBehavior,
};

// As the bundled sqlite is compiled with SQLITE_THREADSAFE, quoting sqlite.org:
// > Multi-thread. In this mode, SQLite can be safely used by multiple threads provided that
// > no single database connection is used simultaneously in two or more threads.
// Therefore the below routines create a new connection and can be used from any thread, in
// particular from both drainer threads at once.
// For concurrent write accesses, we rely on the 'unlock_notify' feature of SQLite: https://sqlite.org/unlock_notify.html

/// Perform a set of modifications to the database inside a single transaction
pub fn db_exec<F>(path: &Path, modifications: F) -> Result<(), DatabaseError>
where
    F: FnOnce(&Transaction) -> Result<(), DatabaseError>,
{
    let mut conn = Connection::open(path)
        .map_err(|e| DatabaseError(format!("Opening database: {}", e.to_string())))?;
    conn.busy_timeout(std::time::Duration::from_secs(60))?;
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| DatabaseError(format!("Creating transaction: {}", e.to_string())))?;

    modifications(&tx)?;
    tx.commit()
        .map_err(|e| DatabaseError(format!("Comitting transaction: {}", e.to_string())))?;

    Ok(())
}

// Internal helper for queries boilerplate
fn db_query<P, F, T>(path: &Path, stmt_str: &str, params: P, f: F) -> Result<Vec<T>, DatabaseError>
where
    P: Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let conn = Connection::open(path)
        .map_err(|e| DatabaseError(format!("Opening database for query: {}", e.to_string())))?;

    conn.busy_timeout(std::time::Duration::from_secs(60))?;

    // rustc says 'borrowed value does not live long enough'
    let x = conn
        .prepare(stmt_str)
        .map_err(|e| DatabaseError(format!("Preparing query: '{}'", e.to_string())))?
        .query_map(params, f)
        .map_err(|e| DatabaseError(format!("Mapping query: '{}'", e.to_string())))?
        .collect::<rusqlite::Result<Vec<T>>>()
        .map_err(|e| DatabaseError(format!("Executing query: '{}'", e.to_string())));

    x
}

/// Get the database version
pub fn db_version(db_path: &Path) -> Result<u32, DatabaseError> {
    let mut rows = db_query(db_path, "SELECT version FROM version", [], |row| {
        row.get::<_, u32>(0)
    })?;

    rows.pop()
        .ok_or_else(|| DatabaseError("No row in version table?".to_string()))
}

/// Get the database group. We only support a single group, so this always return the first row.
pub fn db_group(db_path: &Path) -> Result<DbGroup, DatabaseError> {
    let mut rows = db_query(
        db_path,
        "SELECT id, timestamp, members, threshold FROM groups",
        [],
        |row| {
            Ok(DbGroup {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                members: members_from_row(row, 2)?,
                threshold: row.get(3)?,
            })
        },
    )?;

    rows.pop()
        .ok_or_else(|| DatabaseError("No row in groups table?".to_string()))
}

/// Get the value stored under this key, if any
pub fn db_property(db_path: &Path, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
    db_query(
        db_path,
        "SELECT value FROM properties WHERE key = (?1)",
        params![key],
        |row| row.get::<_, Vec<u8>>(0),
    )
    .map(|mut rows| rows.pop())
}

fn members_from_row(row: &Row, index: usize) -> rusqlite::Result<Vec<String>> {
    let members_str: String = row.get(index)?;
    serde_json::from_str(&members_str).map_err(|e| FromSqlError::Other(Box::new(e)).into())
}

fn output_state_from_row(row: &Row, index: usize, id: &str) -> rusqlite::Result<OutputState> {
    row.get::<_, u32>(index)?.try_into().map_err(|_| {
        FromSqlError::Other(Box::new(DatabaseError(format!(
            "Unknown state for output id '{}'",
            id
        ))))
        .into()
    })
}

impl TryFrom<&Row<'_>> for DbOutput {
    type Error = rusqlite::Error;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        let output_id: String = row.get(0)?;
        let state = output_state_from_row(row, 9, &output_id)?;

        Ok(DbOutput {
            trace_id: row.get(1)?,
            transaction_hash: row.get(2)?,
            output_index: row.get(3)?,
            asset_id: row.get(4)?,
            amount: row.get(5)?,
            threshold: row.get(6)?,
            members: members_from_row(row, 7)?,
            memo: row.get(8)?,
            state,
            signed_tx: row.get(10)?,
            updated_at: Timestamp::from_nanos(row.get(11)?),
            sender: row.get(12)?,
            output_id,
        })
    }
}

impl TryFrom<&Row<'_>> for DbCollectibleOutput {
    type Error = rusqlite::Error;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        let output_id: String = row.get(0)?;
        let state = output_state_from_row(row, 9, &output_id)?;

        Ok(DbCollectibleOutput {
            trace_id: row.get(1)?,
            token_id: row.get(2)?,
            transaction_hash: row.get(3)?,
            output_index: row.get(4)?,
            amount: row.get(5)?,
            threshold: row.get(6)?,
            members: members_from_row(row, 7)?,
            memo: row.get(8)?,
            state,
            signed_tx: row.get(10)?,
            updated_at: Timestamp::from_nanos(row.get(11)?),
            sender: row.get(12)?,
            output_id,
        })
    }
}

impl TryFrom<&Row<'_>> for DbTransaction {
    type Error = rusqlite::Error;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(DbTransaction {
            trace_id: row.get(0)?,
            state: TransactionState::from_u32(row.get(1)?),
            raw: row.get(2)?,
        })
    }
}

impl TryFrom<&Row<'_>> for DbAction {
    type Error = rusqlite::Error;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        let id: i64 = row.get(0)?;
        let state: ActionState = row.get::<_, u32>(2)?.try_into().map_err(|_| {
            FromSqlError::Other(Box::new(DatabaseError(format!(
                "Unknown state for action id '{}'",
                id
            ))))
        })?;

        Ok(DbAction {
            id,
            output_id: row.get(1)?,
            state,
            updated_at: Timestamp::from_nanos(row.get(3)?),
        })
    }
}

/// Get an output by its id
pub fn db_output(db_path: &Path, output_id: &str) -> Result<Option<DbOutput>, DatabaseError> {
    db_query(
        db_path,
        "SELECT output_id, trace_id, transaction_hash, output_index, asset_id, amount, \
         threshold, members, memo, state, signed_tx, updated_at, sender \
         FROM outputs WHERE output_id = (?1)",
        params![output_id],
        |row| row.try_into(),
    )
    .map(|mut rows| rows.pop())
}

/// Get a collectible output by its id
pub fn db_collectible_output(
    db_path: &Path,
    output_id: &str,
) -> Result<Option<DbCollectibleOutput>, DatabaseError> {
    db_query(
        db_path,
        "SELECT output_id, trace_id, token_id, transaction_hash, output_index, amount, \
         threshold, members, memo, state, signed_tx, updated_at, sender \
         FROM collectible_outputs WHERE output_id = (?1)",
        params![output_id],
        |row| row.try_into(),
    )
    .map(|mut rows| rows.pop())
}

/// Get a transaction by its trace id
pub fn db_transaction(
    db_path: &Path,
    trace_id: &str,
) -> Result<Option<DbTransaction>, DatabaseError> {
    db_query(
        db_path,
        "SELECT trace_id, state, raw FROM transactions WHERE trace_id = (?1)",
        params![trace_id],
        |row| row.try_into(),
    )
    .map(|mut rows| rows.pop())
}

/// Get a collectible transaction by its trace id
pub fn db_collectible_transaction(
    db_path: &Path,
    trace_id: &str,
) -> Result<Option<DbTransaction>, DatabaseError> {
    db_query(
        db_path,
        "SELECT trace_id, state, raw FROM collectible_transactions WHERE trace_id = (?1)",
        params![trace_id],
        |row| row.try_into(),
    )
    .map(|mut rows| rows.pop())
}

/// Get the actions in a given state, in the order they were emitted
pub fn db_actions(db_path: &Path, state: ActionState) -> Result<Vec<DbAction>, DatabaseError> {
    let state: u32 = state.into();
    db_query(
        db_path,
        "SELECT id, output_id, state, updated_at FROM actions WHERE state = (?1) ORDER BY id ASC",
        params![state],
        |row| row.try_into(),
    )
}
