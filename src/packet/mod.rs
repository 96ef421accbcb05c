pub mod extension;
pub mod header;


use std::fmt;

use bytes::{Buf, BufMut, Bytes};

use crate::error::{Error, Result};
use crate::marshal::{Marshal, MarshalSize, Unmarshal};
use extension::VideoOrientation;
use header::*;

/// Receive-side annotations attached to an RTP packet once it is accepted
/// by a [`Source`](crate::source::Source).
#[derive(Debug, Eq, PartialEq, Default, Clone, Copy)]
pub struct PacketMeta {
    /// 32-bit extended sequence number.
    pub ext_seq: u32,
    pub arrival_time_us: i64,
    /// Media time relative to the first packet of the source.
    pub timestamp_us: i64,
    pub cvo: Option<VideoOrientation>,
}

/// Packet represents an RTP packet: parsed header, payload with padding
/// stripped, and receive metadata.
#[derive(Debug, Eq, PartialEq, Default, Clone)]
pub struct Packet {
    pub header: Header,
    pub payload: Bytes,
    pub meta: PacketMeta,
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = "RTP PACKET:\n".to_string();

        out += format!("\tVersion: {}\n", self.header.version).as_str();
        out += format!("\tMarker: {}\n", self.header.marker).as_str();
        out += format!("\tPayload Type: {}\n", self.header.payload_type).as_str();
        out += format!("\tSequence Number: {}\n", self.header.sequence_number).as_str();
        out += format!("\tTimestamp: {}\n", self.header.timestamp).as_str();
        out += format!("\tSSRC: {} ({:x})\n", self.header.ssrc, self.header.ssrc).as_str();
        out += format!("\tPayload Length: {}\n", self.payload.len()).as_str();

        write!(f, "{out}")
    }
}

impl Packet {
    pub fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    pub fn rtp_time(&self) -> u32 {
        self.header.timestamp
    }

    pub fn marker(&self) -> bool {
        self.header.marker
    }

    /// Reads the CVO byte from the header extension with the given id.
    pub fn parse_cvo(&self, id: u8) -> Option<VideoOrientation> {
        let payload = self.header.get_extension(id)?;
        VideoOrientation::unmarshal(&mut payload.clone()).ok()
    }
}

impl Unmarshal for Packet {
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let header = Header::unmarshal(raw_packet)?;
        let payload_len = raw_packet.remaining();
        let mut payload = raw_packet.copy_to_bytes(payload_len);
        if header.padding {
            if payload_len == 0 {
                return Err(Error::WrongPadding);
            }
            let padding_len = payload[payload_len - 1] as usize;
            if padding_len == 0 || padding_len > payload_len {
                return Err(Error::WrongPadding);
            }
            payload.truncate(payload_len - padding_len);
        }

        Ok(Packet {
            header,
            payload,
            meta: PacketMeta::default(),
        })
    }
}

impl MarshalSize for Packet {
    fn marshal_size(&self) -> usize {
        self.header.marshal_size() + self.payload.len()
    }
}

impl Marshal for Packet {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let n = self.header.marshal_to(buf)?;
        buf = &mut buf[n..];
        buf.put(&*self.payload);

        Ok(n + self.payload.len())
    }
}
