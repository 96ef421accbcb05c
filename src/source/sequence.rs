/// Extends 16-bit RTP sequence numbers to 32 bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceExtender {
    highest: u32,
    started: bool,
}

impl SequenceExtender {
    pub fn highest(&self) -> u32 {
        self.highest
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn reset(&mut self) {
        *self = SequenceExtender::default();
    }

    /// Picks, among the candidates built from the high half of the highest
    /// extended number, its successor and its predecessor, the one closest to
    /// the highest seen so far. Ties go to the successor.
    pub fn extend(&mut self, seq: u16) -> u32 {
        if !self.started {
            self.started = true;
            self.highest = seq as u32;
            return self.highest;
        }

        let high = self.highest & 0xffff_0000;
        let seq = seq as u32;
        let candidates = [
            high.wrapping_add(0x1_0000) | seq,
            high | seq,
            high.wrapping_sub(0x1_0000) | seq,
        ];

        let distance = |c: u32| (c.wrapping_sub(self.highest) as i32).unsigned_abs();

        let mut best = candidates[0];
        for &c in &candidates[1..] {
            if distance(c) < distance(best) {
                best = c;
            }
        }

        if (best.wrapping_sub(self.highest) as i32) > 0 {
            self.highest = best;
        }

        best
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wraparound() {
        let mut ext = SequenceExtender::default();
        let got: Vec<u32> = [65534u16, 65535, 0, 1, 2]
            .iter()
            .map(|&s| ext.extend(s))
            .collect();
        assert_eq!(got, vec![65534, 65535, 65536, 65537, 65538]);
        assert_eq!(ext.highest(), 65538);
    }

    #[test]
    fn test_reorder_across_wrap() {
        let mut ext = SequenceExtender::default();
        ext.extend(65535);
        assert_eq!(ext.extend(1), 65537);
        // late packet from before the wrap keeps the old cycle
        assert_eq!(ext.extend(0), 65536);
        assert_eq!(ext.extend(65534), 65534);
        assert_eq!(ext.highest(), 65537);
    }

    #[test]
    fn test_highest_is_monotonic() {
        let mut ext = SequenceExtender::default();
        let mut prev = 0;
        let mut seq: u16 = 60000;
        for i in 0..20000u32 {
            // occasional reordering of one step back
            let s = if i % 7 == 3 { seq.wrapping_sub(2) } else { seq };
            ext.extend(s);
            assert!(ext.highest() >= prev);
            prev = ext.highest();
            seq = seq.wrapping_add(1);
        }
        assert_eq!(ext.highest(), 60000 + 19999);
    }
}
