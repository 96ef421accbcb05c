use bytes::Bytes;

pub const RETRANSMIT_RING_SIZE: usize = 256;

#[derive(Debug, Clone)]
struct Entry {
    ext_seq: u32,
    raw: Bytes,
}

/// Recently sent packets, indexed by the low 8 bits of their sequence
/// number. Each slot remembers the extended sequence number so a slot reused
/// after wraparound is never served for an older request.
#[derive(Debug)]
pub struct RetransmitRing {
    slots: Vec<Option<Entry>>,
    last_added: Option<u32>,
}

impl Default for RetransmitRing {
    fn default() -> Self {
        Self::new()
    }
}

impl RetransmitRing {
    pub fn new() -> Self {
        RetransmitRing {
            slots: vec![None; RETRANSMIT_RING_SIZE],
            last_added: None,
        }
    }

    pub fn add(&mut self, ext_seq: u32, raw: Bytes) {
        self.slots[ext_seq as usize % RETRANSMIT_RING_SIZE] = Some(Entry { ext_seq, raw });
        self.last_added = Some(match self.last_added {
            Some(last) if (ext_seq.wrapping_sub(last) as i32) < 0 => last,
            _ => ext_seq,
        });
    }

    /// The marshaled packet sent with `seq`, if it is still in the window.
    pub fn get(&self, seq: u16) -> Option<&Bytes> {
        let last = self.last_added?;
        let diff = (last as u16).wrapping_sub(seq) as u32;
        if diff >= RETRANSMIT_RING_SIZE as u32 || diff > last {
            return None;
        }
        let ext_seq = last - diff;

        self.slots[ext_seq as usize % RETRANSMIT_RING_SIZE]
            .as_ref()
            .filter(|e| e.ext_seq == ext_seq)
            .map(|e| &e.raw)
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.last_added = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn raw(seq: u32) -> Bytes {
        Bytes::from(seq.to_be_bytes().to_vec())
    }

    #[test]
    fn test_recent_packets_are_served() {
        let mut ring = RetransmitRing::new();
        for seq in 1000..1100u32 {
            ring.add(seq, raw(seq));
        }
        assert_eq!(ring.get(1000), Some(&raw(1000)));
        assert_eq!(ring.get(1099), Some(&raw(1099)));
        assert_eq!(ring.get(1100), None, "not sent yet");
    }

    #[test]
    fn test_window_is_256_packets() {
        let mut ring = RetransmitRing::new();
        for seq in 0..600u32 {
            ring.add(seq, raw(seq));
        }
        assert_eq!(ring.get(599 - 255), Some(&raw(344)));
        assert_eq!(ring.get(599 - 256), None);
        assert_eq!(ring.get(10), None);
    }

    #[test]
    fn test_wraparound() {
        let mut ring = RetransmitRing::new();
        for seq in 65_500..65_600u32 {
            ring.add(seq, raw(seq));
        }
        // 65_535 and 65_536 straddle the 16-bit boundary
        assert_eq!(ring.get(65_535), Some(&raw(65_535)));
        assert_eq!(ring.get(0), Some(&raw(65_536)));
        assert_eq!(ring.get(63), Some(&raw(65_599)));
    }

    #[test]
    fn test_stale_slot_is_not_served() {
        let mut ring = RetransmitRing::new();
        ring.add(5, raw(5));
        ring.add(5 + 256, raw(261));
        assert_eq!(ring.get(5), None);
        assert_eq!(ring.get(261), Some(&raw(261)));

        // a gap leaves the slot of an older sequence number in place
        let mut ring = RetransmitRing::new();
        ring.add(10, raw(10));
        ring.add(12, raw(12));
        assert_eq!(ring.get(11), None);
        assert_eq!(ring.get(10), Some(&raw(10)));
    }

    #[test]
    fn test_clear() {
        let mut ring = RetransmitRing::new();
        ring.add(1, raw(1));
        ring.clear();
        assert_eq!(ring.get(1), None);
    }
}
