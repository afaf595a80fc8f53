//! The two kinds of outputs we drain. They only differ in how they are fetched and stored.

use crate::{
    config::GroupConfig,
    database::{
        schema::{DbCollectibleOutput, DbOutput, DbTransaction},
        DatabaseError,
    },
    drainer::checkpoint::{COLLECTIBLE_OUTPUTS_CHECKPOINT_KEY, OUTPUTS_CHECKPOINT_KEY},
    mtgsyncd::{ActionState, OutputState, Timestamp},
    source::{CollectibleOutput, MultisigOutput, OutputsSource, SourceError},
    store::Store,
};

/// What we need to know about an output given by the network service in order to reconcile it.
pub trait RemoteOutput {
    fn output_id(&self) -> &str;
    fn updated_at(&self) -> Timestamp;
    fn state(&self) -> OutputState;
    fn set_state(&mut self, state: OutputState);
    fn signed_tx(&self) -> &[u8];
}

macro_rules! impl_remote_output {
    ($type:ty) => {
        impl RemoteOutput for $type {
            fn output_id(&self) -> &str {
                &self.output_id
            }

            fn updated_at(&self) -> Timestamp {
                self.updated_at
            }

            fn state(&self) -> OutputState {
                self.state
            }

            fn set_state(&mut self, state: OutputState) {
                self.state = state;
            }

            fn signed_tx(&self) -> &[u8] {
                &self.signed_tx
            }
        }
    };
}

impl_remote_output!(MultisigOutput);
impl_remote_output!(CollectibleOutput);

/// A stream of outputs to drain, with its own checkpoint and its own tables.
pub trait DrainStream: Send + 'static {
    type Record: RemoteOutput;

    /// For logging
    fn name(&self) -> &'static str;

    /// Where to store our progress
    fn checkpoint_key(&self) -> &'static [u8];

    fn fetch(
        &self,
        source: &dyn OutputsSource,
        group: &GroupConfig,
        offset: Timestamp,
        limit: usize,
    ) -> Result<Vec<Self::Record>, SourceError>;

    /// Store the output, along with the trace id of the transaction spending it (if any)
    fn write_output(
        &self,
        store: &dyn Store,
        record: &Self::Record,
        trace_id: &str,
    ) -> Result<(), DatabaseError>;

    fn read_transaction(
        &self,
        store: &dyn Store,
        trace_id: &str,
    ) -> Result<Option<DbTransaction>, DatabaseError>;

    fn write_transaction(
        &self,
        store: &dyn Store,
        transaction: &DbTransaction,
    ) -> Result<(), DatabaseError>;

    /// Called once all the outputs of a page were stored.
    fn page_reconciled(&self, _store: &dyn Store, _records: &[Self::Record]) {}
}

/// The fungible outputs. Every new output is notified through an action.
#[derive(Debug, Clone, Copy)]
pub struct FungibleStream;

impl DrainStream for FungibleStream {
    type Record = MultisigOutput;

    fn name(&self) -> &'static str {
        "outputs"
    }

    fn checkpoint_key(&self) -> &'static [u8] {
        OUTPUTS_CHECKPOINT_KEY
    }

    fn fetch(
        &self,
        source: &dyn OutputsSource,
        group: &GroupConfig,
        offset: Timestamp,
        limit: usize,
    ) -> Result<Vec<MultisigOutput>, SourceError> {
        source.read_multisig_outputs(&group.members, group.threshold, offset, limit)
    }

    fn write_output(
        &self,
        store: &dyn Store,
        record: &MultisigOutput,
        trace_id: &str,
    ) -> Result<(), DatabaseError> {
        let mut output = DbOutput::from(record);
        output.trace_id = trace_id.to_string();
        store.write_output(&output)
    }

    fn read_transaction(
        &self,
        store: &dyn Store,
        trace_id: &str,
    ) -> Result<Option<DbTransaction>, DatabaseError> {
        store.read_transaction(trace_id)
    }

    fn write_transaction(
        &self,
        store: &dyn Store,
        transaction: &DbTransaction,
    ) -> Result<(), DatabaseError> {
        store.write_transaction(transaction)
    }

    fn page_reconciled(&self, store: &dyn Store, records: &[MultisigOutput]) {
        for record in records {
            let output = DbOutput::from(record);
            if let Err(e) = store.write_action(&output, ActionState::Initial) {
                log::error!(
                    "Error writing action for output '{}': '{}'",
                    output.output_id,
                    e
                );
            }
        }
    }
}

/// The non-fungible outputs.
#[derive(Debug, Clone, Copy)]
pub struct CollectibleStream;

impl DrainStream for CollectibleStream {
    type Record = CollectibleOutput;

    fn name(&self) -> &'static str {
        "collectible outputs"
    }

    fn checkpoint_key(&self) -> &'static [u8] {
        COLLECTIBLE_OUTPUTS_CHECKPOINT_KEY
    }

    fn fetch(
        &self,
        source: &dyn OutputsSource,
        group: &GroupConfig,
        offset: Timestamp,
        limit: usize,
    ) -> Result<Vec<CollectibleOutput>, SourceError> {
        source.read_collectible_outputs(&group.members, group.threshold, offset, limit)
    }

    fn write_output(
        &self,
        store: &dyn Store,
        record: &CollectibleOutput,
        trace_id: &str,
    ) -> Result<(), DatabaseError> {
        let mut output = DbCollectibleOutput::from(record);
        output.trace_id = trace_id.to_string();
        store.write_collectible_output(&output)
    }

    fn read_transaction(
        &self,
        store: &dyn Store,
        trace_id: &str,
    ) -> Result<Option<DbTransaction>, DatabaseError> {
        store.read_collectible_transaction(trace_id)
    }

    fn write_transaction(
        &self,
        store: &dyn Store,
        transaction: &DbTransaction,
    ) -> Result<(), DatabaseError> {
        store.write_collectible_transaction(transaction)
    }
}
