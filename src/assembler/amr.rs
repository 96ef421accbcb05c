//! RFC 4867 AMR and AMR-WB depacketization.
//!
//! Every packet yields one access unit in storage format: a sequence of
//! `FT << 3 | Q << 2` table-of-contents bytes each followed by the
//! byte-aligned speech bits of its frame.

use std::collections::VecDeque;

use bitstream_io::{BigEndian, BitRead, BitReader};
use bytes::{BufMut, BytesMut};

use super::{truncated, AccessUnit, Depacketizer};
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::session_description::TrackDescription;

const NO_DATA: u8 = 15;

/// Speech bits per frame type; SID is the last entry.
const NB_FRAME_BITS: [u16; 9] = [95, 103, 118, 134, 148, 159, 204, 244, 39];
const WB_FRAME_BITS: [u16; 10] = [132, 177, 253, 285, 317, 365, 397, 461, 477, 40];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TocEntry {
    frame_type: u8,
    quality: bool,
}

#[derive(Debug)]
pub struct AmrAssembler {
    wideband: bool,
    octet_aligned: bool,
    ready: VecDeque<AccessUnit>,
}

impl AmrAssembler {
    pub fn new(wideband: bool, track: &TrackDescription) -> Result<Self> {
        let flag = |key: &str| track.fmtp_u32(key).unwrap_or(0) == 1;
        if track.fmtp_param("interleaving").is_some() {
            return Err(Error::Unsupported("AMR interleaving".to_owned()));
        }
        if flag("crc") || flag("robust-sorting") {
            return Err(Error::Unsupported("AMR crc/robust sorting".to_owned()));
        }
        Ok(AmrAssembler {
            wideband,
            octet_aligned: flag("octet-align"),
            ready: VecDeque::new(),
        })
    }

    pub(crate) fn with_mode(wideband: bool, octet_aligned: bool) -> Self {
        AmrAssembler {
            wideband,
            octet_aligned,
            ready: VecDeque::new(),
        }
    }

    fn frame_bits(&self, frame_type: u8) -> Result<u16> {
        frame_bits(self.wideband, frame_type).ok_or_else(|| {
            Error::AssemblerFormat(format!("reserved AMR frame type {frame_type}"))
        })
    }

    fn parse_octet_aligned(&self, payload: &[u8], out: &mut BytesMut) -> Result<()> {
        // CMR byte is not acted on by a receiver
        let mut offset = 1;
        let mut toc = Vec::new();
        loop {
            let b = *payload
                .get(offset)
                .ok_or_else(|| Error::AssemblerFormat("truncated AMR ToC".to_owned()))?;
            offset += 1;
            toc.push(TocEntry {
                frame_type: (b >> 3) & 0x0F,
                quality: b & 0x04 != 0,
            });
            if b & 0x80 == 0 {
                break;
            }
        }

        for entry in toc {
            let len = (self.frame_bits(entry.frame_type)? as usize + 7) / 8;
            if offset + len > payload.len() {
                return Err(Error::AssemblerFormat("truncated AMR frame".to_owned()));
            }
            out.put_u8(storage_toc(entry));
            out.put(&payload[offset..offset + len]);
            offset += len;
        }
        Ok(())
    }

    fn parse_bandwidth_efficient(&self, payload: &[u8], out: &mut BytesMut) -> Result<()> {
        let mut r = BitReader::endian(payload, BigEndian);
        r.skip(4).map_err(truncated)?;

        let mut toc = Vec::new();
        loop {
            let follow = r.read_bit().map_err(truncated)?;
            let frame_type = r.read::<u8>(4).map_err(truncated)?;
            let quality = r.read_bit().map_err(truncated)?;
            toc.push(TocEntry {
                frame_type,
                quality,
            });
            if !follow {
                break;
            }
        }

        for entry in toc {
            let bits = self.frame_bits(entry.frame_type)? as u32;
            out.put_u8(storage_toc(entry));
            let mut remaining = bits;
            while remaining > 0 {
                let n = remaining.min(8);
                let v = r.read::<u8>(n).map_err(truncated)?;
                out.put_u8(v << (8 - n));
                remaining -= n;
            }
        }
        Ok(())
    }
}

/// Frame size in bits, zero for NO_DATA, `None` for reserved types.
pub(crate) fn frame_bits(wideband: bool, frame_type: u8) -> Option<u16> {
    if frame_type == NO_DATA {
        return Some(0);
    }
    let table: &[u16] = if wideband {
        &WB_FRAME_BITS
    } else {
        &NB_FRAME_BITS
    };
    table.get(frame_type as usize).copied()
}

fn storage_toc(entry: TocEntry) -> u8 {
    (entry.frame_type << 3) | ((entry.quality as u8) << 2)
}

impl Depacketizer for AmrAssembler {
    fn append(&mut self, packet: Packet) -> Result<()> {
        let mut out = BytesMut::new();
        if self.octet_aligned {
            self.parse_octet_aligned(&packet.payload, &mut out)?;
        } else {
            self.parse_bandwidth_efficient(&packet.payload, &mut out)?;
        }
        let mut au = AccessUnit::from_packet(&packet, out.freeze());
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
