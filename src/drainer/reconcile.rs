use crate::{
    database::schema::DbTransaction,
    decoder::{DecodedTransaction, TransactionDecoder},
    drainer::{
        stream::{DrainStream, RemoteOutput},
        DrainerError,
    },
    mtgsyncd::{OutputState, Timestamp, TransactionState},
    store::Store,
};

// Get the transaction spending this output from its payload, if there is one.
fn decode_signed_tx<R: RemoteOutput>(
    decoder: &dyn TransactionDecoder,
    record: &R,
) -> Result<Option<DecodedTransaction>, DrainerError> {
    if record.signed_tx().is_empty() {
        return Ok(None);
    }

    decoder
        .decode(record.signed_tx())
        .map(Some)
        .map_err(|error| DrainerError::Decode {
            output_id: record.output_id().to_string(),
            error,
        })
}

// Store the output and, unless it would make it go backward, the transaction spending it.
fn store_output<S: DrainStream>(
    stream: &S,
    store: &dyn Store,
    record: &S::Record,
    transaction: Option<&DbTransaction>,
) -> Result<(), DrainerError> {
    let transaction = match transaction {
        Some(tx) => tx,
        None => return Ok(stream.write_output(store, record, "")?),
    };

    stream.write_output(store, record, &transaction.trace_id)?;
    if let Some(stored) = stream.read_transaction(store, &transaction.trace_id)? {
        if stored.state >= TransactionState::SIGNED {
            log::trace!(
                "Not overwriting transaction '{}' at state '{}'",
                stored.trace_id,
                stored.state
            );
            return Ok(());
        }
    }
    stream.write_transaction(store, transaction)?;

    Ok(())
}

/// Merge a page of outputs into our local state, in order. Returns the new checkpoint, which is
/// the update time of the last output (or the current checkpoint if the page is empty).
///
/// The outputs are updated in place to reflect what was stored: an output whose spending
/// transaction was fully signed is considered spent.
pub fn reconcile_page<S: DrainStream>(
    stream: &S,
    store: &dyn Store,
    decoder: &dyn TransactionDecoder,
    mut checkpoint: Timestamp,
    records: &mut [S::Record],
) -> Result<Timestamp, DrainerError> {
    for record in records.iter_mut() {
        checkpoint = record.updated_at();
        let decoded = decode_signed_tx(decoder, &*record)?;

        if record.state() == OutputState::Unspent {
            store_output(stream, store, record, None)?;
            continue;
        }

        let decoded = decoded.ok_or_else(|| {
            DrainerError::MissingSpendingTransaction(record.output_id().to_string())
        })?;
        let mut transaction = DbTransaction {
            trace_id: decoded.extra.trace_id,
            state: TransactionState::INITIAL,
            raw: decoded.version.marshal(),
        };
        if decoded.version.aggregated_signature.is_some() {
            record.set_state(OutputState::Spent);
            transaction.state = TransactionState::SIGNED;
        }
        store_output(stream, store, record, Some(&transaction))?;
    }

    stream.page_reconciled(store, records);

    Ok(checkpoint)
}
