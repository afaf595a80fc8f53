//! Background threads draining the outputs of the group from the network service.
//!
//! There is one thread per stream (fungible and collectible outputs). Each of them periodically
//! fetches the outputs updated since its checkpoint, page per page, until it caught up with the
//! network service.

pub mod checkpoint;
pub mod reconcile;
pub mod stream;

use crate::{
    config::GroupConfig,
    database::DatabaseError,
    decoder::{DecodeError, TransactionDecoder},
    mtgsyncd::Timestamp,
    source::{OutputsSource, SourceError},
    store::Store,
    threadmessages::DrainerMessageOut,
};
use checkpoint::{read_checkpoint, write_checkpoint};
use reconcile::reconcile_page;
use stream::DrainStream;

use std::{
    sync::{mpsc, Arc},
    time::Duration,
};

/// An error in a drainer thread
#[derive(Debug)]
pub enum DrainerError {
    /// We could not get a page of outputs from the network service
    Source(SourceError),
    /// We could not persist our progress
    CheckpointWrite(DatabaseError),
    /// We tried to persist a checkpoint before the epoch
    NegativeCheckpoint(Timestamp),
    /// The network service gave us a transaction we can't make sense of
    Decode {
        output_id: String,
        error: DecodeError,
    },
    /// The network service told us an output was spent, without telling us by what
    MissingSpendingTransaction(String),
    /// We could not persist an output or a transaction
    Database(DatabaseError),
    /// Our communication channel with the main thread is gone
    ChannelDisconnected,
}

impl DrainerError {
    /// Whether the error is temporary, in which case we can try draining again later. Otherwise
    /// the local state can't be trusted anymore and we must stop.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Source(_) | Self::CheckpointWrite(_) | Self::ChannelDisconnected => true,
            Self::NegativeCheckpoint(_)
            | Self::Decode { .. }
            | Self::MissingSpendingTransaction(_)
            | Self::Database(_) => false,
        }
    }
}

impl std::fmt::Display for DrainerError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Source(ref e) => write!(f, "Fetching outputs: '{}'", e),
            Self::CheckpointWrite(ref e) => write!(f, "Writing checkpoint: '{}'", e),
            Self::NegativeCheckpoint(ref t) => {
                write!(f, "Checkpoint '{}' is before the epoch", t)
            }
            Self::Decode {
                ref output_id,
                ref error,
            } => write!(
                f,
                "Decoding the signed transaction of output '{}': '{}'",
                output_id, error
            ),
            Self::MissingSpendingTransaction(ref output_id) => write!(
                f,
                "Output '{}' is not unspent but has no signed transaction",
                output_id
            ),
            Self::Database(ref e) => write!(f, "Database error in drainer thread: '{}'", e),
            Self::ChannelDisconnected => write!(f, "Channel disconnected error in drainer thread"),
        }
    }
}

impl std::error::Error for DrainerError {}

impl From<SourceError> for DrainerError {
    fn from(e: SourceError) -> Self {
        Self::Source(e)
    }
}

impl From<DatabaseError> for DrainerError {
    fn from(e: DatabaseError) -> Self {
        Self::Database(e)
    }
}

/// How to retry a failed fetch: at a fixed interval, forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            interval: Duration::from_secs(3),
        }
    }
}

/// What a drainer needs to do its job
#[derive(Clone)]
pub struct DrainerContext {
    pub store: Arc<dyn Store>,
    pub source: Arc<dyn OutputsSource>,
    pub decoder: Arc<dyn TransactionDecoder>,
    pub group: GroupConfig,
    /// Size of the pages we ask the network service for
    pub batch: usize,
    pub retry: RetryPolicy,
}

/// How a draining round ended, if not in error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drained {
    /// We got everything the network service had for us
    CaughtUp,
    /// We were asked to stop
    Shutdown,
}

// Check for a shutdown request without blocking
fn shutdown_requested(rx: &mpsc::Receiver<DrainerMessageOut>) -> Result<bool, DrainerError> {
    match rx.try_recv() {
        Ok(DrainerMessageOut::Shutdown) => Ok(true),
        Err(mpsc::TryRecvError::Empty) => Ok(false),
        Err(mpsc::TryRecvError::Disconnected) => Err(DrainerError::ChannelDisconnected),
    }
}

// Sleep, unless we are asked to stop in the meantime
fn wait_or_shutdown(
    rx: &mpsc::Receiver<DrainerMessageOut>,
    duration: Duration,
) -> Result<bool, DrainerError> {
    match rx.recv_timeout(duration) {
        Ok(DrainerMessageOut::Shutdown) => Ok(true),
        Err(mpsc::RecvTimeoutError::Timeout) => Ok(false),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(DrainerError::ChannelDisconnected),
    }
}

/// Drain this stream until we caught up with the network service.
///
/// A page is fetched at the stored checkpoint, reconciled with our local state, and the
/// checkpoint is advanced to the last output of the page. We stop once a page is less than half
/// full. Failure to fetch a page is retried forever according to the retry policy.
pub fn drain_outputs<S: DrainStream>(
    stream: &S,
    ctx: &DrainerContext,
    rx: &mpsc::Receiver<DrainerMessageOut>,
) -> Result<Drained, DrainerError> {
    let key = stream.checkpoint_key();

    loop {
        if shutdown_requested(rx)? {
            return Ok(Drained::Shutdown);
        }

        let checkpoint = read_checkpoint(ctx.store.as_ref(), key);
        let mut records = loop {
            match stream.fetch(ctx.source.as_ref(), &ctx.group, checkpoint, ctx.batch) {
                Ok(records) => break records,
                Err(e) => {
                    log::warn!(
                        "Error fetching {} at '{}': '{}'. Retrying in {:?}.",
                        stream.name(),
                        checkpoint,
                        e,
                        ctx.retry.interval
                    );
                    if wait_or_shutdown(rx, ctx.retry.interval)? {
                        return Ok(Drained::Shutdown);
                    }
                }
            }
        };
        log::debug!(
            "Got {} {} updated since '{}'",
            records.len(),
            stream.name(),
            checkpoint
        );

        let new_checkpoint = reconcile_page(
            stream,
            ctx.store.as_ref(),
            ctx.decoder.as_ref(),
            checkpoint,
            &mut records,
        )?;
        write_checkpoint(ctx.store.as_ref(), key, new_checkpoint)?;

        // An empty page always means we are done, whatever the batch size.
        if records.is_empty() || records.len() < ctx.batch / 2 {
            return Ok(Drained::CaughtUp);
        }
    }
}

/// The main loop of a drainer thread. Drains the stream, then waits for the poll interval before
/// doing it again. Only returns on shutdown or if the local state can't be trusted anymore.
pub fn drainer_loop<S: DrainStream>(
    rx: mpsc::Receiver<DrainerMessageOut>,
    stream: S,
    ctx: DrainerContext,
    poll_interval: Duration,
) -> Result<(), DrainerError> {
    log::info!("Drainer thread for {} started.", stream.name());

    loop {
        match drain_outputs(&stream, &ctx, &rx) {
            Ok(Drained::Shutdown) => {
                log::info!(
                    "Drainer thread for {} received shutdown. Exiting.",
                    stream.name()
                );
                return Ok(());
            }
            Ok(Drained::CaughtUp) => {}
            Err(DrainerError::ChannelDisconnected) => {
                log::info!(
                    "Drainer thread for {} lost its channel. Exiting.",
                    stream.name()
                );
                return Ok(());
            }
            Err(e) if e.is_transient() => {
                log::warn!("Error draining {}: '{}'", stream.name(), e);
            }
            Err(e) => {
                log::error!("Fatal error draining {}: '{}'", stream.name(), e);
                return Err(e);
            }
        }

        match wait_or_shutdown(&rx, poll_interval) {
            Ok(false) => {}
            Ok(true) | Err(DrainerError::ChannelDisconnected) => {
                log::info!(
                    "Drainer thread for {} received shutdown. Exiting.",
                    stream.name()
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}
