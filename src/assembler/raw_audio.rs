use std::collections::VecDeque;

use bytes::{BufMut, BytesMut};

use super::{AccessUnit, Depacketizer};
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::session_description::TrackDescription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawAudioFormat {
    /// Unsigned 8-bit linear PCM.
    L8,
    /// Signed 16-bit linear PCM, network order on the wire.
    L16,
    Pcmu,
    Pcma,
}

/// Every packet is one access unit; L16 samples are swapped to little endian.
#[derive(Debug)]
pub struct RawAudioAssembler {
    format: RawAudioFormat,
    channels: u32,
    ready: VecDeque<AccessUnit>,
}

impl RawAudioAssembler {
    pub fn new(track: &TrackDescription) -> Result<Self> {
        let format = match track.encoding_name.to_ascii_uppercase().as_str() {
            "L8" => RawAudioFormat::L8,
            "L16" => RawAudioFormat::L16,
            "PCMU" => RawAudioFormat::Pcmu,
            "PCMA" => RawAudioFormat::Pcma,
            other => return Err(Error::Unsupported(format!("raw audio encoding {other}"))),
        };
        Ok(Self::with_format(format, track.channels.max(1)))
    }

    pub(crate) fn with_format(format: RawAudioFormat, channels: u32) -> Self {
        RawAudioAssembler {
            format,
            channels,
            ready: VecDeque::new(),
        }
    }

    pub fn format(&self) -> RawAudioFormat {
        self.format
    }

    fn sample_size(&self) -> usize {
        let width = match self.format {
            RawAudioFormat::L16 => 2,
            _ => 1,
        };
        width * self.channels as usize
    }
}

impl Depacketizer for RawAudioAssembler {
    fn append(&mut self, packet: Packet) -> Result<()> {
        if packet.payload.len() % self.sample_size() != 0 {
            return Err(Error::AssemblerFormat(format!(
                "{} byte payload is not a whole number of samples",
                packet.payload.len()
            )));
        }
        let data = match self.format {
            RawAudioFormat::L16 => {
                let mut out = BytesMut::with_capacity(packet.payload.len());
                for sample in packet.payload.chunks_exact(2) {
                    out.put_u16_le(u16::from_be_bytes([sample[0], sample[1]]));
                }
                out.freeze()
            }
            _ => packet.payload.clone(),
        };
        let mut au = AccessUnit::from_packet(&packet, data);
        au.is_key_frame = true;
        self.ready.push_back(au);
        Ok(())
    }

    fn poll(&mut self) -> Option<AccessUnit> {
        self.ready.pop_front()
    }

    fn on_bye(&mut self) {}

    fn reset(&mut self) {
        self.ready.clear();
    }
}
