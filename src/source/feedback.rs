//! When to ask the sender for keyframes and bitrate changes.

use crate::rtcp::tmmbr::TmmbEntry;

pub const FIR_DEBOUNCE_US: i64 = 1_000_000;
pub const FIR_PERIOD_US: i64 = 5_000_000;

/// FIR cadence for one video source.
#[derive(Debug, Clone, Default)]
pub struct FirPolicy {
    periodic: bool,
    requested: bool,
    last_fir_us: Option<i64>,
    last_periodic_us: Option<i64>,
    seq: u8,
}

impl FirPolicy {
    pub fn new(periodic: bool) -> Self {
        FirPolicy {
            periodic,
            ..Default::default()
        }
    }

    pub fn set_periodic(&mut self, periodic: bool) {
        self.periodic = periodic;
    }

    /// The assembler lost a reference picture.
    pub fn request(&mut self) {
        self.requested = true;
    }

    pub fn last_seq(&self) -> u8 {
        self.seq
    }

    /// Returns the seq of the FIR to emit now, if one is due.
    pub fn poll(&mut self, now_us: i64) -> Option<u8> {
        let (send, periodic_due) = match self.last_fir_us {
            None => (true, true),
            Some(last) => {
                let on_demand = self.requested && now_us - last >= FIR_DEBOUNCE_US;
                let periodic = self.periodic
                    && self
                        .last_periodic_us
                        .map_or(true, |p| now_us - p >= FIR_PERIOD_US);
                (on_demand || periodic, periodic)
            }
        };

        if !send {
            return None;
        }

        self.seq = self.seq.wrapping_add(1);
        self.last_fir_us = Some(now_us);
        if periodic_due {
            self.last_periodic_us = Some(now_us);
        }
        self.requested = false;

        Some(self.seq)
    }

    pub fn reset(&mut self) {
        *self = FirPolicy::new(self.periodic);
    }
}

/// Tracks the TMMBR target and whether it still has to be announced.
#[derive(Debug, Clone, Default)]
pub struct TmmbrPolicy {
    target: u32,
    last_sent: u32,
}

impl TmmbrPolicy {
    pub fn new(target_bitrate: i32) -> Self {
        TmmbrPolicy {
            target: target_bitrate.max(0) as u32,
            last_sent: 0,
        }
    }

    pub fn set_target(&mut self, target_bitrate: i32) {
        self.target = target_bitrate.max(0) as u32;
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    /// The entry to send if the target changed since the last emission.
    pub fn poll(&mut self, media_ssrc: u32) -> Option<TmmbEntry> {
        if self.target == 0 || self.target == self.last_sent {
            return None;
        }
        self.last_sent = self.target;
        Some(TmmbEntry::from_bitrate(media_ssrc, self.target))
    }
}
