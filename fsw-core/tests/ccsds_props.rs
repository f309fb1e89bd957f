//! Property tests for the CCSDS codec
//!
//! The wire format has to hold for every APID, service pair and payload,
//! not just the hand-picked vectors, so the round-trip and sequence laws
//! run under proptest.

use std::sync::Arc;

use proptest::prelude::*;

use fsw_core::ccsds::{parse_tc, Codec, CCSDS_MAX_PACKET_SIZE};
use fsw_core::osal::SimClock;
use fsw_core::time::TimeService;
use fsw_core::types::apid;

fn codec() -> Codec {
    let clock = Arc::new(SimClock::new());
    Codec::new(Arc::new(TimeService::new(clock)))
}

proptest! {
    #[test]
    fn tc_round_trip_preserves_every_field(
        apid_value in 0u16..=apid::MAX,
        service_type in 0u8..=255,
        service_subtype in 0u8..=255,
        scheduled_time in proptest::num::u32::ANY,
        ack_flags in proptest::num::u16::ANY,
        data in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let codec = codec();
        let mut tc = codec.build_tc(apid_value, service_type, service_subtype);
        tc.secondary.scheduled_time = scheduled_time;
        tc.secondary.ack_flags = ack_flags;
        tc.set_data(&data).expect("set data");
        tc.finalize();

        let mut wire = [0u8; CCSDS_MAX_PACKET_SIZE];
        let written = tc.serialize(&mut wire);
        prop_assert_eq!(written, tc.total_length());

        let parsed = parse_tc(&wire[..written]).expect("parse");
        prop_assert_eq!(parsed.primary, tc.primary);
        prop_assert_eq!(parsed.secondary, tc.secondary);
        prop_assert_eq!(parsed.data.as_slice(), tc.data.as_slice());
        prop_assert_eq!(parsed.crc, tc.crc);
        prop_assert!(parsed.validate());
    }

    #[test]
    fn tm_primary_fields_survive_the_wire(
        apid_value in 0u16..=apid::MAX,
        service_type in 0u8..=255,
        service_subtype in 0u8..=255,
        data in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let codec = codec();
        let mut tm = codec.build_tm(apid_value, service_type, service_subtype);
        tm.set_data(&data).expect("set data");
        tm.finalize();

        let mut wire = [0u8; CCSDS_MAX_PACKET_SIZE];
        let written = tm.serialize(&mut wire);
        prop_assert_eq!(written, tm.total_length());

        let parsed = parse_tc(&wire[..written]).expect("parse");
        prop_assert_eq!(parsed.primary, tm.primary);
        prop_assert_eq!(parsed.primary.apid(), apid_value);
    }

    #[test]
    fn finalize_is_idempotent(
        data in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let codec = codec();
        let mut tm = codec.build_tm(apid::SYSTEM, 3, 25);
        tm.set_data(&data).expect("set data");
        tm.finalize();

        let mut first = [0u8; CCSDS_MAX_PACKET_SIZE];
        let first_len = tm.serialize(&mut first);
        tm.finalize();
        let mut second = [0u8; CCSDS_MAX_PACKET_SIZE];
        let second_len = tm.serialize(&mut second);

        prop_assert_eq!(first_len, second_len);
        prop_assert_eq!(&first[..first_len], &second[..second_len]);
    }

    #[test]
    fn corrupting_any_byte_breaks_validation(
        data in proptest::collection::vec(any::<u8>(), 1..128),
        flip_bit in 0u8..8,
        position_seed in proptest::num::usize::ANY,
    ) {
        let codec = codec();
        let mut tc = codec.build_tc(apid::SYSTEM, 17, 1);
        tc.set_data(&data).expect("set data");
        tc.finalize();

        let mut wire = [0u8; CCSDS_MAX_PACKET_SIZE];
        let written = tc.serialize(&mut wire);

        // Corrupt a secondary-header or data byte. The primary header is
        // excluded (a length-field flip changes the parse shape, not just
        // the CRC), as is the CRC trailer itself.
        let corruptible = written - 2 - 6;
        let position = 6 + (position_seed % corruptible);
        wire[position] ^= 1 << flip_bit;

        if let Ok(parsed) = parse_tc(&wire[..written]) {
            prop_assert!(!parsed.validate());
        }
    }

    #[test]
    fn sequence_counts_advance_mod_2_pow_14(
        apid_value in 0u16..=apid::MAX,
        advance in 1u32..200,
    ) {
        let codec = codec();
        let start = codec.next_sequence(apid_value);
        let mut last = start;
        for step in 1..=advance {
            let seq = codec.next_sequence(apid_value);
            prop_assert_eq!(u32::from(seq), (u32::from(start) + step) % (1 << 14));
            prop_assert_eq!((u32::from(last) + 1) % (1 << 14), u32::from(seq));
            last = seq;
        }
    }

    #[test]
    fn sequence_counters_are_independent_across_apids(
        apid_a in 0u16..=100,
        apid_b in 101u16..=200,
        pulls in 1u32..50,
    ) {
        let codec = codec();
        for _ in 0..pulls {
            codec.next_sequence(apid_a);
        }
        prop_assert_eq!(codec.next_sequence(apid_b), 0);
        prop_assert_eq!(codec.next_sequence(apid_a), pulls as u16);
    }
}
