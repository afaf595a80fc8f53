//! Where we are at in draining a stream, persisted as an 8 bytes big-endian timestamp.

use crate::{drainer::DrainerError, mtgsyncd::Timestamp, store::Store};

use std::convert::TryInto;

pub const OUTPUTS_CHECKPOINT_KEY: &[u8] = b"outputs-draining-checkpoint";
pub const COLLECTIBLE_OUTPUTS_CHECKPOINT_KEY: &[u8] = b"collectible-outputs-draining-checkpoint";

/// Encode a timestamp as nanoseconds since the epoch, big-endian.
pub fn encode_timestamp(timestamp: Timestamp) -> Result<[u8; 8], DrainerError> {
    let nanos: u64 = timestamp
        .as_nanos()
        .try_into()
        .map_err(|_| DrainerError::NegativeCheckpoint(timestamp))?;
    Ok(nanos.to_be_bytes())
}

/// Decode a timestamp encoded with [encode_timestamp]. None if it's not one.
pub fn decode_timestamp(bytes: &[u8]) -> Option<Timestamp> {
    let bytes: [u8; 8] = bytes.try_into().ok()?;
    let nanos: i64 = u64::from_be_bytes(bytes).try_into().ok()?;
    Some(Timestamp::from_nanos(nanos))
}

/// Get the checkpoint stored under this key. If there is none, or we can't read it, start
/// from the beginning: reconciliation is idempotent.
pub fn read_checkpoint(store: &dyn Store, key: &[u8]) -> Timestamp {
    let key_str = String::from_utf8_lossy(key);
    match store.read_property(key) {
        Ok(Some(value)) if value.is_empty() => Timestamp::ZERO,
        Ok(Some(value)) => decode_timestamp(&value).unwrap_or_else(|| {
            log::warn!(
                "Invalid checkpoint '{:x?}' under '{}', draining from the beginning",
                value,
                key_str
            );
            Timestamp::ZERO
        }),
        Ok(None) => {
            log::debug!("No checkpoint under '{}' yet", key_str);
            Timestamp::ZERO
        }
        Err(e) => {
            log::warn!(
                "Error reading checkpoint under '{}': '{}', draining from the beginning",
                key_str,
                e
            );
            Timestamp::ZERO
        }
    }
}

/// Store this checkpoint under this key.
pub fn write_checkpoint(
    store: &dyn Store,
    key: &[u8],
    timestamp: Timestamp,
) -> Result<(), DrainerError> {
    let value = encode_timestamp(timestamp)?;
    store
        .write_property(key, &value)
        .map_err(DrainerError::CheckpointWrite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::MemoryStore;

    #[test]
    fn timestamp_codec() {
        for nanos in &[0, 1, 255, 256, 1_638_403_200_123_456_789, i64::MAX] {
            let timestamp = Timestamp::from_nanos(*nanos);
            let encoded = encode_timestamp(timestamp).unwrap();
            assert_eq!(decode_timestamp(&encoded), Some(timestamp));
        }

        // Big-endian
        assert_eq!(
            encode_timestamp(Timestamp::from_nanos(258)).unwrap(),
            [0, 0, 0, 0, 0, 0, 1, 2]
        );

        // Before the epoch
        assert!(matches!(
            encode_timestamp(Timestamp::from_nanos(-1)),
            Err(DrainerError::NegativeCheckpoint(_))
        ));
        assert!(!encode_timestamp(Timestamp::from_nanos(i64::MIN))
            .unwrap_err()
            .is_transient());

        // Not a checkpoint
        assert_eq!(decode_timestamp(&[0, 1, 2]), None);
        assert_eq!(decode_timestamp(&[0; 9]), None);
        assert_eq!(decode_timestamp(&[0xff; 8]), None);
    }

    #[test]
    fn checkpoint_store() {
        let store = MemoryStore::new();

        // Nothing stored yet: beginning of time
        assert_eq!(
            read_checkpoint(&store, OUTPUTS_CHECKPOINT_KEY),
            Timestamp::ZERO
        );

        let timestamp = Timestamp::from_nanos(1_638_403_200_000_000_042);
        write_checkpoint(&store, OUTPUTS_CHECKPOINT_KEY, timestamp).unwrap();
        assert_eq!(read_checkpoint(&store, OUTPUTS_CHECKPOINT_KEY), timestamp);
        // The streams don't share their checkpoint
        assert_eq!(
            read_checkpoint(&store, COLLECTIBLE_OUTPUTS_CHECKPOINT_KEY),
            Timestamp::ZERO
        );

        // A negative one is never written
        write_checkpoint(&store, OUTPUTS_CHECKPOINT_KEY, Timestamp::from_nanos(-5)).unwrap_err();
        assert_eq!(read_checkpoint(&store, OUTPUTS_CHECKPOINT_KEY), timestamp);

        // Empty or corrupted values are the same as no value
        store.write_property(OUTPUTS_CHECKPOINT_KEY, &[]).unwrap();
        assert_eq!(
            read_checkpoint(&store, OUTPUTS_CHECKPOINT_KEY),
            Timestamp::ZERO
        );
        store.write_property(OUTPUTS_CHECKPOINT_KEY, &[1, 2, 3]).unwrap();
        assert_eq!(
            read_checkpoint(&store, OUTPUTS_CHECKPOINT_KEY),
            Timestamp::ZERO
        );

        // So is a failure to read it
        write_checkpoint(&store, OUTPUTS_CHECKPOINT_KEY, timestamp).unwrap();
        store.fail_reads(true);
        assert_eq!(
            read_checkpoint(&store, OUTPUTS_CHECKPOINT_KEY),
            Timestamp::ZERO
        );
        store.fail_reads(false);

        // But a failure to write it is reported
        store.fail_property_writes(true);
        assert!(matches!(
            write_checkpoint(&store, OUTPUTS_CHECKPOINT_KEY, timestamp),
            Err(DrainerError::CheckpointWrite(_))
        ));
    }
}
