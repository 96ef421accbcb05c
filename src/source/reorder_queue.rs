use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::packet::Packet;

/// Packets ordered by extended sequence number.
#[derive(Debug, Default)]
pub struct ReorderQueue {
    packets: VecDeque<Packet>,
}

impl ReorderQueue {
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }

    pub fn front(&self) -> Option<&Packet> {
        self.packets.front()
    }

    pub fn pop_front(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    /// Inserts by `meta.ext_seq`, scanning from the tail since most packets
    /// arrive in order.
    pub fn insert(&mut self, packet: Packet) -> Result<()> {
        let seq = packet.meta.ext_seq;
        let mut at = self.packets.len();
        for queued in self.packets.iter().rev() {
            let diff = seq.wrapping_sub(queued.meta.ext_seq) as i32;
            if diff == 0 {
                return Err(Error::DuplicateSequence(seq));
            }
            if diff > 0 {
                break;
            }
            at -= 1;
        }
        self.packets.insert(at, packet);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.packets.iter()
    }
}
