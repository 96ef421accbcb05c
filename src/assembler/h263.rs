//! RFC 4629 (H.263+) depacketization.

use std::collections::VecDeque;

use bitstream_io::{BigEndian, BitRead, BitReader};
use bytes::{BufMut, Bytes, BytesMut};
use log::warn;

use super::{AccessUnit, Depacketizer};
use crate::error::{Error, Result};
use crate::packet::Packet;

const H263_HEADER_SIZE: usize = 2;
const P_BITMASK: u8 = 0x04;
const V_BITMASK: u8 = 0x02;
const EXTENDED_PTYPE: u8 = 7;

#[derive(Debug, Default)]
pub struct H263Assembler {
    head: Option<AccessUnit>,
    data: BytesMut,
    corrupted: bool,
    loss_pending: bool,
    ready: VecDeque<AccessUnit>,
    fir_request: bool,
}

impl H263Assembler {
    pub fn new() -> Self {
        H263Assembler::default()
    }

    fn flush(&mut self) {
        let Some(mut head) = self.head.take() else {
            return;
        };
        let data = self.data.split().freeze();
        if std::mem::take(&mut self.corrupted) {
            warn!("dropping corrupted H263 picture rtp={}", head.rtp_time);
            self.fir_request = true;
            return;
        }
        if data.is_empty() {
            return;
        }
        head.is_key_frame = is_intra_picture(&data);
        head.data = data;
        self.ready.push_back(head);
    }
}

/// Reads the picture coding type from a picture header starting with PSC.
pub(crate) fn is_intra_picture(data: &[u8]) -> bool {
    picture_coding_type_is_intra(data).unwrap_or(false)
}

fn picture_coding_type_is_intra(data: &[u8]) -> std::io::Result<bool> {
    let mut r = BitReader::endian(data, BigEndian);
    let psc = r.read::<u32>(22)?;
    if psc != 0x20 {
        return Ok(false);
    }
    r.skip(8 + 5)?;
    let source_format = r.read::<u8>(3)?;
    if source_format != EXTENDED_PTYPE {
        return Ok(!r.read_bit()?);
    }
    let ufep = r.read::<u8>(3)?;
    if ufep == 1 {
        r.skip(18)?;
    }
    Ok(r.read::<u8>(3)? == 0)
}

impl Depacketizer for H263Assembler {
    fn append(&mut self, packet: Packet) -> Result<()> {
        let payload = &packet.payload;
        if payload.len() < H263_HEADER_SIZE {
            self.corrupted = true;
            return Err(Error::AssemblerFormat("short H263 payload".to_owned()));
        }

        let b0 = payload[0];
        let b1 = payload[1];
        let picture_start = b0 & P_BITMASK != 0;
        let plen = (((b0 & 0x01) << 5) | (b1 >> 3)) as usize;
        let mut offset = H263_HEADER_SIZE;
        if b0 & V_BITMASK != 0 {
            offset += 1;
        }
        offset += plen;

        let same_unit = self.head.as_ref().map(|h| h.rtp_time) == Some(packet.rtp_time());
        if !same_unit {
            self.flush();
            self.head = Some(AccessUnit::from_packet(&packet, Bytes::new()));
        }
        if std::mem::take(&mut self.loss_pending) && (same_unit || !picture_start) {
            self.corrupted = true;
        }

        if offset > payload.len() {
            self.corrupted = true;
            return Err(Error::AssemblerFormat(format!(
                "H263 header length {offset} exceeds payload"
            )));
        }

        if picture_start {
            if !self.data.is_empty() {
                // a new picture inside the same timestamp
                self.flush();
                self.head = Some(AccessUnit::from_packet(&packet, Bytes::new()));
            }
            self.data.put_u16(0);
        }
        self.data.put(&payload[offset..]);

        if packet.marker() {
            if let Some(head) = self.head.as_mut() {
                head.marker = true;
            }
            self.flush();
        }
        Ok(())
    }

    fn poll(&mut self) -> Option<AccessUnit> {
        self.ready.pop_front()
    }

    fn on_bye(&mut self) {
        self.flush();
    }

    fn on_packet_lost(&mut self) {
        self.loss_pending = true;
        if self.head.is_some() {
            self.corrupted = true;
        }
    }

    fn take_fir_request(&mut self) -> bool {
        std::mem::take(&mut self.fir_request)
    }

    fn reset(&mut self) {
        *self = H263Assembler::default();
    }
}
