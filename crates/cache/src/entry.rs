//! Fixed-width index record codec
//!
//! Each action key owns one index file holding exactly one record:
//!
//! ```text
//! v1 <hex action, 64> <hex output, 64> <size, %20d> <unixnano, %20d>\n
//! ```
//!
//! The record length is constant, so readers decode at fixed offsets
//! without scanning, and writers can truncate to exactly one record. The
//! format is deliberately human-inspectable. Any deviation from the
//! expected bytes decodes to a structured [`RecordError`] which the cache
//! treats as a miss, never as a crash.

use crate::hash::{ActionId, HASH_SIZE, OutputId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Hex width of one digest
pub const HEX_SIZE: usize = HASH_SIZE * 2;

/// Total record length: `"v1 " + action + " " + output + " " + size + " " + time + "\n"`
pub const ENTRY_SIZE: usize = 2 + 1 + HEX_SIZE + 1 + HEX_SIZE + 1 + 20 + 1 + 20 + 1;

// Named field positions within a record.
const ACTION_START: usize = 3;
const OUTPUT_START: usize = ACTION_START + HEX_SIZE + 1;
const SIZE_START: usize = OUTPUT_START + HEX_SIZE + 1;
const TIME_START: usize = SIZE_START + 20 + 1;

/// Why a byte buffer failed to decode as an index record
#[derive(Error, Debug)]
pub enum RecordError {
    /// More bytes than one record; the file holds trailing garbage
    #[error("entry file too long")]
    TooLong,

    /// Zero bytes
    #[error("entry file is empty")]
    Empty,

    /// Fewer bytes than one record
    #[error("entry file incomplete")]
    Incomplete,

    /// A literal header byte (version tag, separator, newline) was wrong
    #[error("invalid header")]
    BadHeader,

    /// The embedded action key was not valid hex
    #[error("decoding action id")]
    BadActionId(#[source] hex::FromHexError),

    /// The embedded action key decodes but is not the requested key
    #[error("mismatched action id")]
    MismatchedActionId,

    /// The embedded output id was not valid hex
    #[error("decoding output id")]
    BadOutputId(#[source] hex::FromHexError),

    /// The size field was not a decimal integer
    #[error("malformed size field")]
    BadSize,

    /// The size field parsed but was negative
    #[error("negative size")]
    NegativeSize,

    /// The timestamp field was not a decimal integer
    #[error("malformed timestamp field")]
    BadTimestamp,

    /// The timestamp field parsed but was negative
    #[error("negative timestamp")]
    NegativeTimestamp,
}

/// An index record: the latest known output for one action key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Identity of the stored output bytes
    pub output: OutputId,
    /// Output size in bytes
    pub size: u64,
    /// When the record was written
    pub time: DateTime<Utc>,
}

/// Format a record. The result is always exactly [`ENTRY_SIZE`] bytes.
#[must_use]
pub fn encode(action: ActionId, output: OutputId, size: u64, time: DateTime<Utc>) -> [u8; ENTRY_SIZE] {
    let nanos = time.timestamp_nanos_opt().unwrap_or_default();
    let text = format!("v1 {action} {output} {size:>20} {nanos:>20}\n");
    let mut record = [0u8; ENTRY_SIZE];
    record.copy_from_slice(text.as_bytes());
    record
}

/// Parse a space-padded decimal field
fn parse_padded(field: &[u8]) -> Option<i64> {
    let text = std::str::from_utf8(field).ok()?;
    text.trim_start_matches(' ').parse().ok()
}

/// Decode a record, requiring the embedded action key to equal `expected`.
///
/// The embedded-key check defends against truncated or cross-copied entry
/// files: a record that decodes cleanly but names a different action is
/// corruption, not a hit.
///
/// # Errors
///
/// Returns the first [`RecordError`] encountered, in validation order:
/// length, header bytes, action id, output id, size, timestamp.
pub fn decode(buf: &[u8], expected: ActionId) -> std::result::Result<Entry, RecordError> {
    if buf.len() > ENTRY_SIZE {
        return Err(RecordError::TooLong);
    }
    if buf.is_empty() {
        return Err(RecordError::Empty);
    }
    if buf.len() < ENTRY_SIZE {
        return Err(RecordError::Incomplete);
    }

    if buf[0] != b'v'
        || buf[1] != b'1'
        || buf[2] != b' '
        || buf[ACTION_START + HEX_SIZE] != b' '
        || buf[OUTPUT_START + HEX_SIZE] != b' '
        || buf[SIZE_START + 20] != b' '
        || buf[ENTRY_SIZE - 1] != b'\n'
    {
        return Err(RecordError::BadHeader);
    }

    let mut action = [0u8; HASH_SIZE];
    hex::decode_to_slice(&buf[ACTION_START..ACTION_START + HEX_SIZE], &mut action)
        .map_err(RecordError::BadActionId)?;
    if action != *expected.as_bytes() {
        return Err(RecordError::MismatchedActionId);
    }

    let mut output = [0u8; HASH_SIZE];
    hex::decode_to_slice(&buf[OUTPUT_START..OUTPUT_START + HEX_SIZE], &mut output)
        .map_err(RecordError::BadOutputId)?;

    let size = parse_padded(&buf[SIZE_START..SIZE_START + 20]).ok_or(RecordError::BadSize)?;
    let size = u64::try_from(size).map_err(|_| RecordError::NegativeSize)?;

    let nanos = parse_padded(&buf[TIME_START..TIME_START + 20]).ok_or(RecordError::BadTimestamp)?;
    if nanos < 0 {
        return Err(RecordError::NegativeTimestamp);
    }

    Ok(Entry {
        output: OutputId(output),
        size,
        time: DateTime::from_timestamp_nanos(nanos),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_ids() -> (ActionId, OutputId) {
        (ActionId([0xab; HASH_SIZE]), OutputId([0xcd; HASH_SIZE]))
    }

    #[test]
    fn encoded_record_has_fixed_shape() {
        let (action, output) = sample_ids();
        let record = encode(action, output, 42, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        assert_eq!(record.len(), ENTRY_SIZE);
        assert_eq!(&record[..3], b"v1 ");
        assert_eq!(record[ENTRY_SIZE - 1], b'\n');
    }

    #[test]
    fn decode_returns_what_encode_wrote() {
        let (action, output) = sample_ids();
        let time = DateTime::from_timestamp_nanos(1_700_000_000_123_456_789);
        let record = encode(action, output, 9001, time);

        let entry = decode(&record, action).unwrap();
        assert_eq!(entry.output, output);
        assert_eq!(entry.size, 9001);
        assert_eq!(entry.time, time);
    }

    #[test]
    fn flipped_header_byte_is_bad_header() {
        let (action, output) = sample_ids();
        let mut record = encode(action, output, 1, Utc::now());
        record[0] = b'w';
        assert!(matches!(decode(&record, action), Err(RecordError::BadHeader)));

        let mut record = encode(action, output, 1, Utc::now());
        record[ENTRY_SIZE - 1] = b' ';
        assert!(matches!(decode(&record, action), Err(RecordError::BadHeader)));
    }

    #[test]
    fn wrong_lengths_are_structured_misses() {
        let (action, output) = sample_ids();
        let record = encode(action, output, 1, Utc::now());

        assert!(matches!(decode(&[], action), Err(RecordError::Empty)));
        assert!(matches!(
            decode(&record[..ENTRY_SIZE - 5], action),
            Err(RecordError::Incomplete)
        ));
        let mut long = record.to_vec();
        long.push(b'x');
        assert!(matches!(decode(&long, action), Err(RecordError::TooLong)));
    }

    #[test]
    fn record_for_another_action_is_mismatched() {
        let (action, output) = sample_ids();
        let record = encode(action, output, 1, Utc::now());
        let other = ActionId([0x11; HASH_SIZE]);
        assert!(matches!(
            decode(&record, other),
            Err(RecordError::MismatchedActionId)
        ));
    }

    #[test]
    fn non_hex_action_field_is_bad_action_id() {
        let (action, output) = sample_ids();
        let mut record = encode(action, output, 1, Utc::now());
        record[ACTION_START] = b'z';
        assert!(matches!(
            decode(&record, action),
            Err(RecordError::BadActionId(_))
        ));
    }

    #[test]
    fn negative_and_garbage_numeric_fields_are_rejected() {
        let (action, output) = sample_ids();
        let nanos = 1_700_000_000_000_000_000i64;

        let text = format!("v1 {action} {output} {:>20} {nanos:>20}\n", "-1");
        assert!(matches!(
            decode(text.as_bytes(), action),
            Err(RecordError::NegativeSize)
        ));

        let text = format!("v1 {action} {output} {:>20} {nanos:>20}\n", "12x4");
        assert!(matches!(
            decode(text.as_bytes(), action),
            Err(RecordError::BadSize)
        ));

        let text = format!("v1 {action} {output} {:>20} {:>20}\n", 5, "-7");
        assert!(matches!(
            decode(text.as_bytes(), action),
            Err(RecordError::NegativeTimestamp)
        ));
    }
}
