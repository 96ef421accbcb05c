use std::collections::BTreeMap;

use crate::rtcp::transport_layer_nack::NackPair;

/// Entries whose discovery head is further behind the current head are dropped.
pub const NACK_EVICT_DISTANCE: u32 = 100;
/// Pending entries drained into one RTCP compound.
pub const MAX_NACKS_PER_REPORT: usize = 10;
/// Ledger size that signals resource exhaustion.
pub const NACK_LEDGER_HIGH_WATER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NackEntry {
    bitmask: u16,
    head_seq: u32,
    need_to_send: bool,
}

/// Losses discovered while dequeuing, keyed by the first lost extended seq.
#[derive(Debug, Default, Clone)]
pub struct NackLedger {
    entries: BTreeMap<u32, NackEntry>,
}

impl NackLedger {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Inserts or refreshes a loss. Returns false when the ledger overflowed
    /// and its oldest entries were evicted.
    pub fn record(&mut self, first_lost: u32, bitmask: u16, head_seq: u32) -> bool {
        self.entries
            .retain(|_, e| head_seq.wrapping_sub(e.head_seq) as i32 <= NACK_EVICT_DISTANCE as i32);

        match self.entries.get_mut(&first_lost) {
            Some(e) => {
                if e.bitmask != bitmask || e.head_seq != head_seq {
                    e.bitmask = bitmask;
                    e.head_seq = head_seq;
                    e.need_to_send = true;
                }
            }
            None => {
                self.entries.insert(
                    first_lost,
                    NackEntry {
                        bitmask,
                        head_seq,
                        need_to_send: true,
                    },
                );
            }
        }

        let mut ok = true;
        while self.entries.len() > NACK_LEDGER_HIGH_WATER {
            self.entries.pop_first();
            ok = false;
        }
        ok
    }

    /// The packet arrived or was given up on.
    pub fn forget(&mut self, seq: u32) {
        self.entries.remove(&seq);
    }

    /// Drops every entry at or before `seq`.
    pub fn forget_through(&mut self, seq: u32) {
        self.entries
            .retain(|&first, _| (first.wrapping_sub(seq) as i32) > 0);
    }

    pub fn pending(&self) -> usize {
        self.entries.values().filter(|e| e.need_to_send).count()
    }

    /// Takes up to [`MAX_NACKS_PER_REPORT`] pending entries as NACK FCIs.
    pub fn drain(&mut self) -> Vec<NackPair> {
        let mut out = vec![];
        for (&seq, e) in self.entries.iter_mut() {
            if out.len() == MAX_NACKS_PER_REPORT {
                break;
            }
            if e.need_to_send {
                e.need_to_send = false;
                out.push(NackPair {
                    packet_id: seq as u16,
                    lost_packets: e.bitmask,
                });
            }
        }
        out
    }
}
