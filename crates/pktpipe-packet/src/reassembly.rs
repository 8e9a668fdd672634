//! Collecting fragments back into whole packets.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;
use tracing::debug;

use crate::error::{PacketError, Result};
use crate::header::{MAX_WIRE_PAYLOAD, METADATA_LEN};
use crate::packet::Packet;
use crate::registry::PacketRegistry;
use crate::split::{FRAGMENT_INDEX_BYTE, FRAGMENT_MAX_INDEX_BYTE};

/// Identity of one in-flight split group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub type_id: i32,
    pub split_id: u8,
    pub max_index: u8,
}

#[derive(Debug)]
struct SplitGroup {
    received: Vec<bool>,
    remaining: usize,
    size: usize,
    fragments: Vec<Packet>,
    /// Set once the group outgrew the payload limit. Later fragments are
    /// only counted so the group can be retired when its last one arrives.
    oversized: bool,
}

impl SplitGroup {
    fn new(expected: usize) -> Self {
        Self {
            received: vec![false; expected],
            remaining: expected,
            size: 0,
            fragments: Vec::with_capacity(expected),
            oversized: false,
        }
    }
}

/// Per-endpoint fragment accumulator.
///
/// Fragments may arrive in any order; they are keyed by the index carried
/// in their metadata, never by arrival order. A group is dropped from the
/// active set as soon as its last fragment arrives.
///
/// The joined payload of a group may not exceed `max_payload` bytes, the
/// same bound the reader puts on a single frame.
pub struct Reassembler {
    registry: Arc<PacketRegistry>,
    max_payload: usize,
    groups: HashMap<GroupKey, SplitGroup>,
}

impl Reassembler {
    pub fn new(registry: Arc<PacketRegistry>, max_payload: usize) -> Self {
        Self {
            registry,
            max_payload: max_payload.min(MAX_WIRE_PAYLOAD),
            groups: HashMap::new(),
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Accept one fragment; returns the rebuilt packet once the group is complete.
    ///
    /// A fragment whose index was already received is ignored. The fragment
    /// that pushes a group past the payload limit fails with
    /// [`PacketError::PayloadTooLarge`]; the group's buffers are released and
    /// its remaining fragments are discarded as they arrive.
    pub fn receive_fragment(&mut self, fragment: Packet) -> Result<Option<Packet>> {
        let Some((index, max_index)) = fragment.fragment_position() else {
            return Err(PacketError::MalformedFragment(
                "packet is not marked as split".to_string(),
            ));
        };
        if index > max_index {
            return Err(PacketError::MalformedFragment(format!(
                "fragment index {index} exceeds max index {max_index}"
            )));
        }

        let key = GroupKey {
            type_id: fragment.type_id(),
            split_id: fragment.split_id(),
            max_index,
        };
        let max = self.max_payload;
        let group = self
            .groups
            .entry(key)
            .or_insert_with(|| SplitGroup::new(usize::from(max_index) + 1));

        let slot = usize::from(index);
        if group.received[slot] {
            debug!(?key, index, "ignoring duplicate fragment");
            return Ok(None);
        }
        group.received[slot] = true;
        group.remaining -= 1;
        let complete = group.remaining == 0;

        if group.oversized {
            debug!(?key, index, "discarding fragment of oversized group");
            if complete {
                self.groups.remove(&key);
            }
            return Ok(None);
        }

        group.size += fragment.payload_len();
        if group.size > max {
            let size = group.size;
            group.oversized = true;
            group.fragments = Vec::new();
            if complete {
                self.groups.remove(&key);
            }
            return Err(PacketError::PayloadTooLarge { size, max });
        }
        group.fragments.push(fragment);

        if !complete {
            return Ok(None);
        }

        let Some(group) = self.groups.remove(&key) else {
            return Ok(None);
        };
        self.rebuild(key, group).map(Some)
    }

    fn rebuild(&self, key: GroupKey, group: SplitGroup) -> Result<Packet> {
        let mut fragments = group.fragments;
        fragments.sort_by_key(|f| f.metadata()[FRAGMENT_INDEX_BYTE]);

        let mut joined = BytesMut::with_capacity(group.size);
        for fragment in &fragments {
            joined.extend_from_slice(fragment.payload());
        }

        let first = &fragments[0];
        let mut packet = self.registry.create(key.type_id)?;
        packet.set_version(first.version());
        packet.set_metadata(
            FRAGMENT_MAX_INDEX_BYTE + 1,
            &first.metadata()[FRAGMENT_MAX_INDEX_BYTE + 1..METADATA_LEN],
        )?;
        packet.set_max_payload_len(self.max_payload)?;
        packet.set_payload(joined.freeze())?;
        packet.populate()?;

        debug!(
            type_id = key.type_id,
            split_id = key.split_id,
            fragments = fragments.len(),
            size = packet.payload_len(),
            "reassembled packet"
        );
        Ok(packet)
    }

    /// Number of groups still waiting for fragments.
    pub fn pending_groups(&self) -> usize {
        self.groups.len()
    }

    /// Drop every partially received group.
    pub fn clear(&mut self) {
        if !self.groups.is_empty() {
            debug!(groups = self.groups.len(), "discarding incomplete split groups");
        }
        self.groups.clear();
    }
}

impl std::fmt::Debug for Reassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reassembler")
            .field("pending_groups", &self.groups.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::codec::DEFAULT_MAX_PAYLOAD;
    use crate::kind::{DataPacket, GZipPacket, IntPacket, StringPacket};
    use crate::split::split_packet;
    use crate::types;

    fn reassembler() -> Reassembler {
        limited(DEFAULT_MAX_PAYLOAD)
    }

    fn limited(max_payload: usize) -> Reassembler {
        Reassembler::new(Arc::new(PacketRegistry::with_builtin_kinds()), max_payload)
    }

    fn data(bytes: &[u8]) -> Packet {
        let mut packet = Packet::new(DataPacket);
        packet.set_payload(bytes.to_vec()).unwrap();
        packet
    }

    fn feed(r: &mut Reassembler, fragments: Vec<Packet>) -> Option<Packet> {
        let mut done = None;
        for fragment in fragments {
            if let Some(packet) = r.receive_fragment(fragment).unwrap() {
                assert!(done.is_none(), "group completed twice");
                done = Some(packet);
            }
        }
        done
    }

    #[test]
    fn string_scenario_reassembles_exactly() {
        let text = "abcdefghijklmnopqrst";
        let fragments = split_packet(Packet::new(StringPacket::new(text)), 2, 0).unwrap();
        assert_eq!(fragments.len(), 10);

        let mut r = reassembler();
        let packet = feed(&mut r, fragments).unwrap();
        assert_eq!(packet.type_id(), types::STRING);
        assert!(!packet.is_split());
        assert_eq!(packet.kind::<StringPacket>().unwrap().text, text);
        assert_eq!(r.pending_groups(), 0);
    }

    #[test]
    fn reverse_order_reassembles() {
        let original: Vec<u8> = (0..50).collect();
        let mut fragments = split_packet(data(&original), 7, 2).unwrap();
        fragments.reverse();

        let packet = feed(&mut reassembler(), fragments).unwrap();
        assert_eq!(packet.payload().as_ref(), original.as_slice());
    }

    #[test]
    fn group_stays_pending_until_complete() {
        let mut fragments = split_packet(data(b"0123456789"), 4, 0).unwrap();
        let last = fragments.pop().unwrap();

        let mut r = reassembler();
        assert!(feed(&mut r, fragments).is_none());
        assert_eq!(r.pending_groups(), 1);

        let packet = r.receive_fragment(last).unwrap().unwrap();
        assert_eq!(packet.payload().as_ref(), b"0123456789");
        assert_eq!(r.pending_groups(), 0);
    }

    #[test]
    fn duplicate_fragment_is_ignored() {
        let fragments = split_packet(data(b"abcdef"), 2, 0).unwrap();
        let mut r = reassembler();

        let copy = {
            let mut dup = Packet::new(DataPacket);
            dup.mark_split(0);
            dup.set_metadata(0, fragments[0].metadata()).unwrap();
            dup.set_payload(&b"XX"[..]).unwrap();
            dup
        };
        assert!(r.receive_fragment(copy).unwrap().is_none());

        let packet = feed(&mut r, fragments).unwrap();
        assert_eq!(packet.payload().as_ref(), b"XXcdef", "first arrival wins");
    }

    #[test]
    fn concurrent_groups_of_same_type_stay_apart() {
        let a = split_packet(data(b"aaaaaa"), 2, 1).unwrap();
        let b = split_packet(data(b"bbbbbb"), 2, 2).unwrap();

        let mut interleaved = Vec::new();
        for (x, y) in a.into_iter().zip(b) {
            interleaved.push(x);
            interleaved.push(y);
        }

        let mut r = reassembler();
        let mut done = Vec::new();
        for fragment in interleaved {
            if let Some(packet) = r.receive_fragment(fragment).unwrap() {
                done.push(packet.payload().clone());
            }
        }
        assert_eq!(done, vec![&b"aaaaaa"[..], &b"bbbbbb"[..]]);
    }

    #[test]
    fn user_metadata_survives_reassembly() {
        let mut packet = Packet::new(IntPacket::new(0x0A0B_0C0D));
        packet.set_metadata(2, &[7; 10]).unwrap();
        let fragments = split_packet(packet, 1, 0).unwrap();

        let rebuilt = feed(&mut reassembler(), fragments).unwrap();
        assert_eq!(rebuilt.kind::<IntPacket>().unwrap().value, 0x0A0B_0C0D);
        assert_eq!(rebuilt.metadata_range(2, 10).unwrap(), &[7; 10]);
        assert_eq!(rebuilt.metadata_range(0, 2).unwrap(), &[0, 0]);
    }

    #[test]
    fn non_fragment_is_rejected() {
        let err = reassembler().receive_fragment(data(b"x")).unwrap_err();
        assert!(matches!(err, PacketError::MalformedFragment(_)));
    }

    #[test]
    fn index_past_max_is_rejected() {
        let mut bogus = Packet::new(DataPacket);
        bogus.mark_split(0);
        bogus.set_metadata(0, &[4, 2]).unwrap();
        let err = reassembler().receive_fragment(bogus).unwrap_err();
        assert!(matches!(err, PacketError::MalformedFragment(_)));
    }

    #[test]
    fn unknown_type_drops_group() {
        let mut fragments = split_packet(data(b"abcd"), 2, 0).unwrap().into_iter();
        let mut r = Reassembler::new(Arc::new(PacketRegistry::new()), DEFAULT_MAX_PAYLOAD);
        assert!(r.receive_fragment(fragments.next().unwrap()).unwrap().is_none());

        let err = r.receive_fragment(fragments.next().unwrap()).unwrap_err();
        assert!(matches!(err, PacketError::UnknownPacketType(types::DATA)));
        assert_eq!(r.pending_groups(), 0);
    }

    #[test]
    fn clear_discards_pending_groups() {
        let mut fragments = split_packet(data(b"abcdef"), 2, 0).unwrap();
        let mut r = reassembler();
        r.receive_fragment(fragments.remove(0)).unwrap();
        assert_eq!(r.pending_groups(), 1);
        r.clear();
        assert_eq!(r.pending_groups(), 0);
    }

    #[test]
    fn gzip_packet_survives_split_and_reassembly() {
        let data: Vec<u8> = (0..2000u32).flat_map(|i| (i % 97).to_le_bytes()).collect();
        let fragments = split_packet(Packet::new(GZipPacket::new(data.clone())), 32, 4).unwrap();
        assert!(fragments.len() > 1);
        assert!(fragments.iter().all(|f| f.type_id() == types::GZIP));

        let packet = feed(&mut reassembler(), fragments).unwrap();
        assert_eq!(packet.kind::<GZipPacket>().unwrap().data, data);
    }

    #[test]
    fn group_at_the_limit_is_rebuilt() {
        let fragments = split_packet(data(&[5; 16]), 4, 0).unwrap();
        let packet = feed(&mut limited(16), fragments).unwrap();
        assert_eq!(packet.payload_len(), 16);
        assert_eq!(packet.max_payload_len(), 16);
    }

    #[test]
    fn oversized_group_is_rejected_and_drained() {
        let mut r = limited(16);
        let mut fragments = split_packet(data(&[1; 40]), 8, 0).unwrap().into_iter();

        assert!(r.receive_fragment(fragments.next().unwrap()).unwrap().is_none());
        assert!(r.receive_fragment(fragments.next().unwrap()).unwrap().is_none());
        let err = r.receive_fragment(fragments.next().unwrap()).unwrap_err();
        assert!(matches!(err, PacketError::PayloadTooLarge { size: 24, max: 16 }));

        // The rest of the group is swallowed without rebuilding anything.
        assert!(r.receive_fragment(fragments.next().unwrap()).unwrap().is_none());
        assert_eq!(r.pending_groups(), 1);
        assert!(r.receive_fragment(fragments.next().unwrap()).unwrap().is_none());
        assert_eq!(r.pending_groups(), 0);

        let next = split_packet(data(b"0123456789"), 4, 1).unwrap();
        let packet = feed(&mut r, next).unwrap();
        assert_eq!(packet.payload().as_ref(), b"0123456789");
    }

    #[test]
    fn limit_is_clamped_to_wire_maximum() {
        assert_eq!(limited(usize::MAX).max_payload(), MAX_WIRE_PAYLOAD);
    }

    fn fragments_in_any_order() -> impl Strategy<Value = (Vec<u8>, usize, Vec<usize>)> {
        (proptest::collection::vec(any::<u8>(), 1..1024), 4usize..64).prop_flat_map(
            |(payload, chunk)| {
                let count = payload.len().div_ceil(chunk);
                let order = Just((0..count).collect::<Vec<usize>>()).prop_shuffle();
                (Just(payload), Just(chunk), order)
            },
        )
    }

    proptest! {
        #[test]
        fn any_permutation_reassembles((payload, chunk, order) in fragments_in_any_order()) {
            let fragments = split_packet(data(&payload), chunk, 0).unwrap();
            prop_assume!(fragments.len() > 1);

            let mut slots: Vec<Option<Packet>> = fragments.into_iter().map(Some).collect();
            let shuffled: Vec<Packet> = order.iter().map(|&i| slots[i].take().unwrap()).collect();

            let packet = feed(&mut reassembler(), shuffled).unwrap();
            prop_assert_eq!(packet.payload().as_ref(), payload.as_slice());
        }
    }
}
