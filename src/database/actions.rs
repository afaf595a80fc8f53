use crate::{
    database::{
        interface::*,
        schema::{DbCollectibleOutput, DbOutput, DbTransaction, SCHEMA},
        DatabaseError, DB_VERSION,
    },
    mtgsyncd::{ActionState, MtgSyncD, Timestamp},
};

use std::{
    convert::TryInto,
    fs,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use rusqlite::params;

// The group creation time is stored in seconds as an u32, refuse to silently truncate it.
fn timestamp_to_u32(n: u64) -> u32 {
    n.try_into()
        .expect("Is this the year 2106 yet? Misconfigured system clock.")
}

// Create the db file with RW permissions only for the user
fn create_db_file(db_path: &Path) -> Result<(), std::io::Error> {
    let mut options = fs::OpenOptions::new();
    let options = options.read(true).write(true).create_new(true);

    #[cfg(unix)]
    return {
        use std::os::unix::fs::OpenOptionsExt;

        options.mode(0o600).open(db_path)?;
        Ok(())
    };

    #[cfg(not(unix))]
    return {
        options.open(db_path)?;
        Ok(())
    };
}

// No database yet ? In a single tx, create a new one from the schema and populate with current
// information
fn create_db(mtgsyncd: &MtgSyncD) -> Result<(), DatabaseError> {
    let db_path = mtgsyncd.db_file();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| timestamp_to_u32(dur.as_secs()))
        .map_err(|e| DatabaseError(format!("Computing time since epoch: {}", e.to_string())))?;
    let members = serde_json::to_string(&mtgsyncd.group.members)?;

    // Rusqlite could create it for us, but we want custom permissions
    create_db_file(&db_path)
        .map_err(|e| DatabaseError(format!("Creating db file: {}", e.to_string())))?;

    db_exec(&db_path, |tx| {
        tx.execute_batch(SCHEMA)
            .map_err(|e| DatabaseError(format!("Creating database: {}", e.to_string())))?;
        tx.execute(
            "INSERT INTO version (version) VALUES (?1)",
            params![DB_VERSION],
        )
        .map_err(|e| DatabaseError(format!("Inserting version: {}", e.to_string())))?;
        tx.execute(
            "INSERT INTO groups (timestamp, members, threshold) VALUES (?1, ?2, ?3)",
            params![timestamp, members, mtgsyncd.group.threshold],
        )
        .map_err(|e| DatabaseError(format!("Inserting group: {}", e.to_string())))?;

        Ok(())
    })
}

// Called on startup to check database integrity
fn check_db(mtgsyncd: &MtgSyncD) -> Result<(), DatabaseError> {
    let db_path = mtgsyncd.db_file();

    // Check if their database is not from the future.
    // We'll eventually do migration here if version < VERSION, but be strict until then.
    let version = db_version(&db_path)?;
    if version != DB_VERSION {
        return Err(DatabaseError(format!(
            "Unexpected database version: got '{}', expected '{}'",
            version, DB_VERSION
        )));
    }

    // The checkpoints are only meaningful for the group we drained the outputs of.
    let group = db_group(&db_path)?;
    if group.members != mtgsyncd.group.members || group.threshold != mtgsyncd.group.threshold {
        return Err(DatabaseError(format!(
            "Database group mismatch: '{:?}' ({}) (config) vs '{:?}' ({}) (database)",
            mtgsyncd.group.members, mtgsyncd.group.threshold, group.members, group.threshold
        )));
    }

    Ok(())
}

/// This integrity checks the database and creates it if it doesn't exist.
pub fn setup_db(mtgsyncd: &MtgSyncD) -> Result<(), DatabaseError> {
    let db_path = mtgsyncd.db_file();
    if !db_path.exists() {
        log::info!("No database at {:?}, creating a new one.", db_path);
        create_db(mtgsyncd)?;
    }

    check_db(mtgsyncd)
}

/// Set the value stored under this key, overwriting any previous one
pub fn db_write_property(db_path: &Path, key: &[u8], value: &[u8]) -> Result<(), DatabaseError> {
    db_exec(db_path, |tx| {
        tx.execute(
            "INSERT INTO properties (key, value) VALUES (?1, ?2) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| DatabaseError(format!("Writing property: {}", e.to_string())))?;

        Ok(())
    })
}

/// Insert an output, or overwrite it with what we last heard about it.
pub fn db_write_output(db_path: &Path, output: &DbOutput) -> Result<(), DatabaseError> {
    let members = serde_json::to_string(&output.members)?;

    db_exec(db_path, |tx| {
        tx.execute(
            "INSERT INTO outputs (output_id, trace_id, transaction_hash, output_index, asset_id, \
             amount, threshold, members, memo, state, signed_tx, updated_at, sender) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
             ON CONFLICT (output_id) DO UPDATE SET trace_id = excluded.trace_id, \
             transaction_hash = excluded.transaction_hash, output_index = excluded.output_index, \
             asset_id = excluded.asset_id, amount = excluded.amount, \
             threshold = excluded.threshold, members = excluded.members, memo = excluded.memo, \
             state = excluded.state, signed_tx = excluded.signed_tx, \
             updated_at = excluded.updated_at, sender = excluded.sender",
            params![
                output.output_id,
                output.trace_id,
                output.transaction_hash,
                output.output_index,
                output.asset_id,
                output.amount,
                output.threshold,
                members,
                output.memo,
                u32::from(output.state),
                output.signed_tx,
                output.updated_at.as_nanos(),
                output.sender,
            ],
        )
        .map_err(|e| DatabaseError(format!("Writing output: {}", e.to_string())))?;

        Ok(())
    })
}

/// Insert a collectible output, or overwrite it with what we last heard about it.
pub fn db_write_collectible_output(
    db_path: &Path,
    output: &DbCollectibleOutput,
) -> Result<(), DatabaseError> {
    let members = serde_json::to_string(&output.members)?;

    db_exec(db_path, |tx| {
        tx.execute(
            "INSERT INTO collectible_outputs (output_id, trace_id, token_id, transaction_hash, \
             output_index, amount, threshold, members, memo, state, signed_tx, updated_at, sender) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
             ON CONFLICT (output_id) DO UPDATE SET trace_id = excluded.trace_id, \
             token_id = excluded.token_id, transaction_hash = excluded.transaction_hash, \
             output_index = excluded.output_index, amount = excluded.amount, \
             threshold = excluded.threshold, members = excluded.members, memo = excluded.memo, \
             state = excluded.state, signed_tx = excluded.signed_tx, \
             updated_at = excluded.updated_at, sender = excluded.sender",
            params![
                output.output_id,
                output.trace_id,
                output.token_id,
                output.transaction_hash,
                output.output_index,
                output.amount,
                output.threshold,
                members,
                output.memo,
                u32::from(output.state),
                output.signed_tx,
                output.updated_at.as_nanos(),
                output.sender,
            ],
        )
        .map_err(|e| DatabaseError(format!("Writing collectible output: {}", e.to_string())))?;

        Ok(())
    })
}

fn db_write_transaction_in(
    db_path: &Path,
    table: &str,
    transaction: &DbTransaction,
) -> Result<(), DatabaseError> {
    let query = format!(
        "INSERT INTO {} (trace_id, state, raw) VALUES (?1, ?2, ?3) \
         ON CONFLICT (trace_id) DO UPDATE SET state = excluded.state, raw = excluded.raw",
        table
    );

    db_exec(db_path, |tx| {
        tx.execute(
            &query,
            params![
                transaction.trace_id,
                transaction.state.as_u32(),
                transaction.raw
            ],
        )
        .map_err(|e| {
            DatabaseError(format!(
                "Writing transaction '{}' in '{}': {}",
                transaction.trace_id,
                table,
                e.to_string()
            ))
        })?;

        Ok(())
    })
}

/// Insert a transaction, or overwrite the one with the same trace id.
///
/// This does not check the state transition, it's up to the caller to not regress it.
pub fn db_write_transaction(
    db_path: &Path,
    transaction: &DbTransaction,
) -> Result<(), DatabaseError> {
    db_write_transaction_in(db_path, "transactions", transaction)
}

/// Insert a collectible transaction, or overwrite the one with the same trace id.
///
/// This does not check the state transition, it's up to the caller to not regress it.
pub fn db_write_collectible_transaction(
    db_path: &Path,
    transaction: &DbTransaction,
) -> Result<(), DatabaseError> {
    db_write_transaction_in(db_path, "collectible_transactions", transaction)
}

/// Record a notification for this observation of an output. Notifying twice the same
/// observation is a no-op.
pub fn db_write_action(
    db_path: &Path,
    output_id: &str,
    updated_at: Timestamp,
    state: ActionState,
) -> Result<(), DatabaseError> {
    let state: u32 = state.into();
    db_exec(db_path, |tx| {
        tx.execute(
            "INSERT OR IGNORE INTO actions (output_id, state, updated_at) VALUES (?1, ?2, ?3)",
            params![output_id, state, updated_at.as_nanos()],
        )
        .map_err(|e| DatabaseError(format!("Writing action: {}", e.to_string())))?;

        Ok(())
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        database::schema::DbOutput,
        mtgsyncd::{OutputState, TransactionState},
        utils::test_utils::{dummy_mtgsyncd, test_datadir},
    };

    fn dummy_output(id: &str, updated_at: i64) -> DbOutput {
        DbOutput {
            output_id: id.to_string(),
            trace_id: String::new(),
            transaction_hash: "d3a4b1e9c3f8".to_string(),
            output_index: 1,
            asset_id: "c6d0c728-2624-429b-8e0d-d9d19b6592fa".to_string(),
            amount: "0.01".to_string(),
            threshold: 2,
            members: vec!["alice".to_string(), "bob".to_string(), "carol".to_string()],
            memo: "".to_string(),
            state: OutputState::Unspent,
            signed_tx: vec![],
            updated_at: Timestamp::from_nanos(updated_at),
            sender: "alice".to_string(),
        }
    }

    #[test]
    fn test_db_creation() {
        let datadir = test_datadir();
        let mut mtgsyncd = dummy_mtgsyncd(datadir.clone());

        create_db(&mtgsyncd).unwrap();
        // There must be a group entry now, and there is only one so its id must be 1.
        assert_eq!(db_group(&mtgsyncd.db_file()).unwrap().id, 1);
        // We can't create it twice
        create_db(&mtgsyncd).unwrap_err();
        // The version is right
        check_db(&mtgsyncd).unwrap();
        // And setting it up again is fine
        setup_db(&mtgsyncd).unwrap();

        // But it would not open a database created for a different group
        mtgsyncd.group.threshold = 3;
        check_db(&mtgsyncd).unwrap_err();
        mtgsyncd.group.threshold = 2;
        mtgsyncd.group.members.pop();
        check_db(&mtgsyncd).unwrap_err();
        mtgsyncd = dummy_mtgsyncd(datadir.clone());
        setup_db(&mtgsyncd).unwrap();

        // Neither would it accept to open a database from the future!
        db_exec(&mtgsyncd.db_file(), |tx| {
            tx.execute("UPDATE version SET version = (?1)", params![DB_VERSION + 1])
                .unwrap();
            Ok(())
        })
        .unwrap();
        check_db(&mtgsyncd).unwrap_err();

        fs::remove_dir_all(&datadir).unwrap_or_else(|_| ());
    }

    #[test]
    fn test_db_properties() {
        let datadir = test_datadir();
        let mtgsyncd = dummy_mtgsyncd(datadir.clone());
        let db_path = mtgsyncd.db_file();
        setup_db(&mtgsyncd).unwrap();

        let key = b"outputs-draining-checkpoint";
        assert_eq!(db_property(&db_path, key).unwrap(), None);

        db_write_property(&db_path, key, &[0, 0, 0, 0, 0, 0, 0, 1]).unwrap();
        assert_eq!(
            db_property(&db_path, key).unwrap(),
            Some(vec![0, 0, 0, 0, 0, 0, 0, 1])
        );

        // Overwriting
        db_write_property(&db_path, key, &[0, 0, 0, 0, 0, 0, 1, 0]).unwrap();
        assert_eq!(
            db_property(&db_path, key).unwrap(),
            Some(vec![0, 0, 0, 0, 0, 0, 1, 0])
        );
        // The keys are disjoint
        assert_eq!(
            db_property(&db_path, b"collectible-outputs-draining-checkpoint").unwrap(),
            None
        );

        fs::remove_dir_all(&datadir).unwrap_or_else(|_| ());
    }

    #[test]
    fn test_db_outputs_upsert() {
        let datadir = test_datadir();
        let mtgsyncd = dummy_mtgsyncd(datadir.clone());
        let db_path = mtgsyncd.db_file();
        setup_db(&mtgsyncd).unwrap();

        assert_eq!(db_output(&db_path, "out-1").unwrap(), None);

        let mut output = dummy_output("out-1", 1_000);
        db_write_output(&db_path, &output).unwrap();
        assert_eq!(db_output(&db_path, "out-1").unwrap(), Some(output.clone()));

        // Writing it twice is fine, and the last write wins
        db_write_output(&db_path, &output).unwrap();
        output.state = OutputState::Spent;
        output.trace_id = "trace-1".to_string();
        output.signed_tx = vec![1, 2, 3];
        output.updated_at = Timestamp::from_nanos(2_000);
        db_write_output(&db_path, &output).unwrap();
        assert_eq!(db_output(&db_path, "out-1").unwrap(), Some(output.clone()));

        // Collectibles are stored apart
        assert_eq!(db_collectible_output(&db_path, "out-1").unwrap(), None);
        let collectible = DbCollectibleOutput {
            output_id: "out-1".to_string(),
            trace_id: String::new(),
            token_id: "3d8b5a0e-1f1c-4d8b-8a55-5b0b0e4d6c1a".to_string(),
            transaction_hash: "aa".to_string(),
            output_index: 0,
            amount: "1".to_string(),
            threshold: 2,
            members: output.members.clone(),
            memo: "nft".to_string(),
            state: OutputState::Signed,
            signed_tx: vec![4, 5],
            updated_at: Timestamp::from_nanos(3_000),
            sender: "bob".to_string(),
        };
        db_write_collectible_output(&db_path, &collectible).unwrap();
        assert_eq!(
            db_collectible_output(&db_path, "out-1").unwrap(),
            Some(collectible)
        );
        assert_eq!(db_output(&db_path, "out-1").unwrap(), Some(output));

        fs::remove_dir_all(&datadir).unwrap_or_else(|_| ());
    }

    #[test]
    fn test_db_transactions() {
        let datadir = test_datadir();
        let mtgsyncd = dummy_mtgsyncd(datadir.clone());
        let db_path = mtgsyncd.db_file();
        setup_db(&mtgsyncd).unwrap();

        assert_eq!(db_transaction(&db_path, "trace-1").unwrap(), None);

        let mut transaction = DbTransaction {
            trace_id: "trace-1".to_string(),
            state: TransactionState::INITIAL,
            raw: vec![0xde, 0xad],
        };
        db_write_transaction(&db_path, &transaction).unwrap();
        assert_eq!(
            db_transaction(&db_path, "trace-1").unwrap(),
            Some(transaction.clone())
        );

        transaction.state = TransactionState::SIGNED;
        transaction.raw = vec![0xbe, 0xef];
        db_write_transaction(&db_path, &transaction).unwrap();
        assert_eq!(
            db_transaction(&db_path, "trace-1").unwrap(),
            Some(transaction.clone())
        );

        // States we don't know about are preserved as is
        transaction.state = TransactionState::from_u32(12);
        db_write_transaction(&db_path, &transaction).unwrap();
        assert_eq!(
            db_transaction(&db_path, "trace-1").unwrap().unwrap().state,
            TransactionState::from_u32(12)
        );

        // Collectibles are stored apart
        assert_eq!(db_collectible_transaction(&db_path, "trace-1").unwrap(), None);
        db_write_collectible_transaction(&db_path, &transaction).unwrap();
        assert_eq!(
            db_collectible_transaction(&db_path, "trace-1").unwrap(),
            Some(transaction)
        );

        fs::remove_dir_all(&datadir).unwrap_or_else(|_| ());
    }

    #[test]
    fn test_db_actions() {
        let datadir = test_datadir();
        let mtgsyncd = dummy_mtgsyncd(datadir.clone());
        let db_path = mtgsyncd.db_file();
        setup_db(&mtgsyncd).unwrap();

        db_write_action(
            &db_path,
            "out-2",
            Timestamp::from_nanos(10),
            ActionState::Initial,
        )
        .unwrap();
        db_write_action(
            &db_path,
            "out-1",
            Timestamp::from_nanos(20),
            ActionState::Initial,
        )
        .unwrap();
        // Notifying the same observation twice is a no-op
        db_write_action(
            &db_path,
            "out-2",
            Timestamp::from_nanos(10),
            ActionState::Initial,
        )
        .unwrap();
        // But a new observation of the same output isn't
        db_write_action(
            &db_path,
            "out-2",
            Timestamp::from_nanos(30),
            ActionState::Initial,
        )
        .unwrap();

        let actions = db_actions(&db_path, ActionState::Initial).unwrap();
        let ids: Vec<(&str, i64)> = actions
            .iter()
            .map(|a| (a.output_id.as_str(), a.updated_at.as_nanos()))
            .collect();
        assert_eq!(ids, vec![("out-2", 10), ("out-1", 20), ("out-2", 30)]);
        assert!(actions.windows(2).all(|w| w[0].id < w[1].id));
        assert!(db_actions(&db_path, ActionState::Done).unwrap().is_empty());

        fs::remove_dir_all(&datadir).unwrap_or_else(|_| ());
    }

    // Both drainer threads write to the same database at the same time. It should be fine and one
    // of them just lock thanks to the unlock_notify feature of SQLite.
    #[test]
    fn test_db_concurrent_write() {
        let datadir = test_datadir();
        let mtgsyncd = dummy_mtgsyncd(datadir.clone());
        let db_path = mtgsyncd.db_file();
        setup_db(&mtgsyncd).unwrap();

        let handle = std::thread::spawn({
            let db_path = db_path.clone();
            move || {
                for i in 0..20 {
                    db_write_output(&db_path, &dummy_output(&format!("a-{}", i), i)).unwrap();
                    db_write_property(&db_path, b"outputs-draining-checkpoint", &[i as u8; 8])
                        .unwrap();
                }
            }
        });
        for i in 0..20 {
            db_write_transaction(
                &db_path,
                &DbTransaction {
                    trace_id: format!("t-{}", i),
                    state: TransactionState::INITIAL,
                    raw: vec![i as u8],
                },
            )
            .unwrap();
            db_write_property(
                &db_path,
                b"collectible-outputs-draining-checkpoint",
                &[i as u8; 8],
            )
            .unwrap();
        }
        handle.join().unwrap();

        for i in 0..20 {
            assert!(db_output(&db_path, &format!("a-{}", i)).unwrap().is_some());
            assert!(db_transaction(&db_path, &format!("t-{}", i))
                .unwrap()
                .is_some());
        }

        fs::remove_dir_all(&datadir).unwrap_or_else(|_| ());
    }
}
