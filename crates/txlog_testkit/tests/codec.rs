//! Entry encoding properties.

use proptest::prelude::*;
use txlog_core::{
    Decoded, DistributedTxId, EntryReader, Identifier, LengthPrefixedCodec, LogEntry, LogResult,
    StopReason, MAX_XID_PART_LEN,
};
use txlog_storage::InMemoryBackend;
use txlog_testkit::prelude::*;

fn at_offset(entry: LogEntry, offset: u64) -> LogEntry {
    match entry {
        LogEntry::Start {
            xid, identifier, ..
        } => LogEntry::Start {
            xid,
            identifier,
            start_offset: offset,
        },
        other => other,
    }
}

proptest! {
    #[test]
    fn back_to_back_entries_decode_in_order(
        entries in prop::collection::vec(entry_strategy(), 1..16)
    ) {
        let mut bytes = Vec::new();
        let mut offsets = Vec::new();
        for entry in &entries {
            offsets.push(bytes.len() as u64);
            entry.encode_into(&LengthPrefixedCodec, &mut bytes).unwrap();
        }

        let backend = InMemoryBackend::with_data(bytes.clone());
        let mut reader = EntryReader::new(&backend, &LengthPrefixedCodec, 0).unwrap();
        let mut decoded = Vec::new();
        while let Some(positioned) = reader.next_entry().unwrap() {
            decoded.push(positioned);
        }

        prop_assert_eq!(reader.stop_reason(), Some(StopReason::EndOfData));
        prop_assert_eq!(reader.position(), bytes.len() as u64);
        prop_assert_eq!(decoded.len(), entries.len());
        for ((positioned, entry), offset) in decoded.into_iter().zip(entries).zip(offsets) {
            prop_assert_eq!(positioned.offset, offset);
            prop_assert_eq!(positioned.entry, at_offset(entry, offset));
        }
    }

    #[test]
    fn every_strict_prefix_is_incomplete(entry in entry_strategy()) {
        let bytes = entry.encode(&LengthPrefixedCodec).unwrap();
        for len in 0..bytes.len() {
            let decoded = LogEntry::decode(&bytes[..len], 0, &LengthPrefixedCodec).unwrap();
            prop_assert_eq!(decoded, Decoded::Incomplete);
        }
        let full = LogEntry::decode(&bytes, 0, &LengthPrefixedCodec).unwrap();
        prop_assert_eq!(full, Decoded::Entry { entry, len: bytes.len() });
    }
}

#[test]
fn longest_xid_parts_fit_the_format() {
    let xid = DistributedTxId::new(
        vec![0xaa; MAX_XID_PART_LEN],
        vec![0xbb; MAX_XID_PART_LEN],
        -1,
    )
    .unwrap();
    let entry = LogEntry::Start {
        xid,
        identifier: Identifier::new(i32::MAX),
        start_offset: 16,
    };
    let bytes = entry.encode(&LengthPrefixedCodec).unwrap();
    assert_eq!(bytes.len(), 3 + 2 * MAX_XID_PART_LEN + 8);

    let backend = InMemoryBackend::with_data(bytes);
    let reader = EntryReader::new(&backend, &LengthPrefixedCodec, 0).unwrap();
    let decoded: LogResult<Vec<_>> = reader.collect();
    assert_eq!(decoded.unwrap()[0].entry, at_offset(entry, 0));

    assert!(DistributedTxId::new(vec![0; MAX_XID_PART_LEN + 1], Vec::new(), 0).is_err());
}

#[test]
fn zero_opcode_ends_the_stream() {
    let mut bytes = LogEntry::Done {
        identifier: Identifier::new(3),
    }
    .encode(&LengthPrefixedCodec)
    .unwrap();
    bytes.extend_from_slice(&[0; 12]);
    let backend = InMemoryBackend::with_data(bytes);

    let mut reader = EntryReader::new(&backend, &LengthPrefixedCodec, 0).unwrap();
    assert!(reader.next_entry().unwrap().is_some());
    assert!(reader.next_entry().unwrap().is_none());
    assert_eq!(reader.stop_reason(), Some(StopReason::Empty));
    assert_eq!(reader.position(), 5);
}
