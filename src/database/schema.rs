use crate::{
    mtgsyncd::{ActionState, OutputState, Timestamp, TransactionState},
    source::{CollectibleOutput, MultisigOutput},
};

pub const SCHEMA: &str = "\
CREATE TABLE version (
    version INTEGER NOT NULL
);

/* The multisig group this database was created for. We only support a
 * single group, and it MUST NOT change over the lifetime of the database.
 */
CREATE TABLE groups (
    id INTEGER PRIMARY KEY NOT NULL,
    timestamp INTEGER NOT NULL,
    members TEXT NOT NULL,
    threshold INTEGER NOT NULL
);

/* Opaque key-value pairs, for instance the draining checkpoints. */
CREATE TABLE properties (
    key BLOB PRIMARY KEY NOT NULL,
    value BLOB NOT NULL
);

/* The outputs of the group, as last seen on the network service.
 * The trace_id is the one of the transaction spending this output, if any,
 * and is the empty string otherwise.
 */
CREATE TABLE outputs (
    output_id TEXT PRIMARY KEY NOT NULL,
    trace_id TEXT NOT NULL,
    transaction_hash TEXT NOT NULL,
    output_index INTEGER NOT NULL,
    asset_id TEXT NOT NULL,
    amount TEXT NOT NULL,
    threshold INTEGER NOT NULL,
    members TEXT NOT NULL,
    memo TEXT NOT NULL,
    state INTEGER NOT NULL,
    signed_tx BLOB NOT NULL,
    updated_at INTEGER NOT NULL,
    sender TEXT NOT NULL
);

/* The transactions spending the outputs. The state only ever increases. */
CREATE TABLE transactions (
    trace_id TEXT PRIMARY KEY NOT NULL,
    state INTEGER NOT NULL,
    raw BLOB NOT NULL
);

/* Same as above, for non-fungible outputs. */
CREATE TABLE collectible_outputs (
    output_id TEXT PRIMARY KEY NOT NULL,
    trace_id TEXT NOT NULL,
    token_id TEXT NOT NULL,
    transaction_hash TEXT NOT NULL,
    output_index INTEGER NOT NULL,
    amount TEXT NOT NULL,
    threshold INTEGER NOT NULL,
    members TEXT NOT NULL,
    memo TEXT NOT NULL,
    state INTEGER NOT NULL,
    signed_tx BLOB NOT NULL,
    updated_at INTEGER NOT NULL,
    sender TEXT NOT NULL
);

CREATE TABLE collectible_transactions (
    trace_id TEXT PRIMARY KEY NOT NULL,
    state INTEGER NOT NULL,
    raw BLOB NOT NULL
);

/* Notifications for the consumer of newly observed fungible outputs.
 * A given observation of an output (its id at a given update time) is only
 * ever notified once.
 */
CREATE TABLE actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    output_id TEXT NOT NULL,
    state INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (output_id, updated_at)
);

CREATE INDEX actions_state ON actions (state);
";

/// A row in the "groups" table
#[derive(Debug, Clone)]
pub struct DbGroup {
    pub id: u32,
    pub timestamp: u32,
    pub members: Vec<String>,
    pub threshold: u8,
}

/// A row of the "outputs" table
#[derive(Debug, Clone, PartialEq)]
pub struct DbOutput {
    pub output_id: String,
    pub trace_id: String,
    pub transaction_hash: String,
    pub output_index: u32,
    pub asset_id: String,
    pub amount: String,
    pub threshold: u8,
    pub members: Vec<String>,
    pub memo: String,
    pub state: OutputState,
    pub signed_tx: Vec<u8>,
    pub updated_at: Timestamp,
    pub sender: String,
}

impl From<&MultisigOutput> for DbOutput {
    fn from(utxo: &MultisigOutput) -> Self {
        DbOutput {
            output_id: utxo.output_id.clone(),
            trace_id: String::new(),
            transaction_hash: utxo.transaction_hash.clone(),
            output_index: utxo.output_index,
            asset_id: utxo.asset_id.clone(),
            amount: utxo.amount.clone(),
            threshold: utxo.threshold,
            members: utxo.members.clone(),
            memo: utxo.memo.clone(),
            state: utxo.state,
            signed_tx: utxo.signed_tx.clone(),
            updated_at: utxo.updated_at,
            sender: utxo.sender.clone(),
        }
    }
}

/// A row of the "collectible_outputs" table
#[derive(Debug, Clone, PartialEq)]
pub struct DbCollectibleOutput {
    pub output_id: String,
    pub trace_id: String,
    pub token_id: String,
    pub transaction_hash: String,
    pub output_index: u32,
    pub amount: String,
    pub threshold: u8,
    pub members: Vec<String>,
    pub memo: String,
    pub state: OutputState,
    pub signed_tx: Vec<u8>,
    pub updated_at: Timestamp,
    pub sender: String,
}

impl From<&CollectibleOutput> for DbCollectibleOutput {
    fn from(out: &CollectibleOutput) -> Self {
        DbCollectibleOutput {
            output_id: out.output_id.clone(),
            trace_id: String::new(),
            token_id: out.token_id.clone(),
            transaction_hash: out.transaction_hash.clone(),
            output_index: out.output_index,
            amount: out.amount.clone(),
            threshold: out.threshold,
            members: out.members.clone(),
            memo: out.memo.clone(),
            state: out.state,
            signed_tx: out.signed_tx.clone(),
            updated_at: out.updated_at,
            sender: out.sender.clone(),
        }
    }
}

/// A row of the "transactions" or "collectible_transactions" table
#[derive(Debug, Clone, PartialEq)]
pub struct DbTransaction {
    pub trace_id: String,
    pub state: TransactionState,
    pub raw: Vec<u8>,
}

/// A row of the "actions" table
#[derive(Debug, Clone, PartialEq)]
pub struct DbAction {
    pub id: i64,
    pub output_id: String,
    pub state: ActionState,
    pub updated_at: Timestamp,
}
