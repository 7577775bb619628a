//! Tests for identifier encoding, validation, and position ordering.

use std::cmp::Ordering;

use proptest::prelude::*;
use rstest::rstest;

use super::{ENCODED_LEN, MessageId, MessageIdError, MessageIdentifier};

fn arb_message_id() -> impl Strategy<Value = MessageId> {
    let plain = (0_i64..i64::MAX, 0_i64..i64::MAX, -1_i32..64)
        .prop_map(|(ledger, entry, partition)| MessageId::new(ledger, entry, partition));
    let batched = (0_i64..i64::MAX, 0_i64..i64::MAX, -1_i32..64, 1_i32..1024)
        .prop_flat_map(|(ledger, entry, partition, size)| {
            (0..size).prop_map(move |index| {
                MessageId::batched(ledger, entry, partition, index, size)
                    .expect("generated batch index is within the batch")
            })
        });
    prop_oneof![plain, batched]
}

proptest! {
    #[test]
    fn binary_encoding_round_trips(id in arb_message_id()) {
        let bytes = id.to_bytes();
        prop_assert_eq!(bytes.len(), ENCODED_LEN);
        prop_assert_eq!(MessageId::from_bytes(&bytes), Ok(id));
    }

    #[test]
    fn lower_ledger_sorts_first_regardless_of_partition(
        a in arb_message_id(),
        b in arb_message_id(),
        pa in -1_i32..8,
        pb in -1_i32..8,
    ) {
        prop_assume!(a.ledger_id() < b.ledger_id());
        let a = a.with_partition(pa);
        let b = b.with_partition(pb);
        prop_assert_eq!(a.compare(&b), Ordering::Less);
        prop_assert_eq!(b.compare(&a), Ordering::Greater);
    }
}

#[rstest]
#[case(MessageId::new(3, 7, 0), MessageId::new(3, 8, 0), Ordering::Less)]
#[case(MessageId::new(4, 0, 0), MessageId::new(3, 99, 0), Ordering::Greater)]
#[case(MessageId::new(3, 7, 0), MessageId::new(3, 7, 5), Ordering::Equal)]
fn compare_uses_ledger_then_entry(
    #[case] left: MessageId,
    #[case] right: MessageId,
    #[case] expected: Ordering,
) {
    assert_eq!(left.compare(&right), expected);
}

#[test]
fn batch_index_breaks_ties() {
    let first = MessageId::batched(1, 1, 0, 0, 4).expect("valid batch");
    let third = MessageId::batched(1, 1, 0, 2, 4).expect("valid batch");
    assert_eq!(first.compare(&third), Ordering::Less);
    assert!(third.is_after(&first));
    assert!(third.is_at_or_after(&third));
}

#[test]
fn non_batched_entry_sorts_before_its_batch_members() {
    let whole = MessageId::new(1, 1, 0);
    let member = MessageId::batched(1, 1, 0, 0, 2).expect("valid batch");
    assert!(member.is_after(&whole));
}

#[rstest]
#[case(4, 4)]
#[case(-1, 3)]
#[case(0, 0)]
#[case(2, -1)]
fn invalid_batch_positions_are_rejected(#[case] index: i32, #[case] size: i32) {
    assert_eq!(
        MessageId::batched(1, 1, 0, index, size),
        Err(MessageIdError::InvalidBatch {
            batch_index: index,
            batch_size: size,
        })
    );
}

#[test]
fn decoding_rejects_short_input() {
    let bytes = MessageId::new(1, 2, 3).to_bytes();
    assert_eq!(
        MessageId::from_bytes(&bytes[..10]),
        Err(MessageIdError::InvalidLength { found: 10 })
    );
}

#[test]
fn sentinels_bracket_every_stored_position() {
    let stored = MessageId::new(0, 0, 0);
    assert!(stored.is_after(&MessageId::earliest()));
    assert!(MessageId::latest().is_after(&stored));
    assert!(MessageId::earliest().is_sentinel());
    assert!(MessageId::latest().is_sentinel());
    assert!(!stored.is_sentinel());
    assert!(!MessageId::earliest().is_entry_valid());
}

#[test]
fn display_names_sentinels() {
    assert_eq!(MessageId::earliest().to_string(), "earliest");
    assert_eq!(MessageId::latest().to_string(), "latest");
    assert_eq!(MessageId::new(5, 6, 1).to_string(), "5:6:1:-1");
}

#[derive(Debug)]
struct StoredId {
    raw: Vec<u8>,
    inner: MessageId,
}

impl MessageIdentifier for StoredId {
    fn ledger_id(&self) -> i64 { self.inner.ledger_id() }

    fn entry_id(&self) -> i64 { self.inner.entry_id() }

    fn partition_index(&self) -> i32 { self.inner.partition_index() }

    fn batch_index(&self) -> i32 { self.inner.batch_index() }

    fn batch_size(&self) -> i32 { self.inner.batch_size() }

    fn serialize(&self) -> Vec<u8> { self.raw.clone() }
}

#[test]
fn custom_identifiers_convert_through_accessors() {
    let inner = MessageId::batched(9, 4, 2, 1, 3).expect("valid batch");
    let custom = StoredId {
        raw: inner.to_bytes(),
        inner,
    };
    assert_eq!(MessageId::from_identifier(&custom), inner);
    assert_eq!(MessageId::from_bytes(&custom.serialize()), Ok(inner));
}
