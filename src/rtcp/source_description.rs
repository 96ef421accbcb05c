use std::any::Any;
use std::fmt;

use bytes::{Buf, BufMut, Bytes};

use super::header::*;
use super::Packet;
use crate::error::{Error, Result};
use crate::marshal::{get_padding_size, Marshal, MarshalSize, Unmarshal};

const SDES_SOURCE_LEN: usize = 4;
const SDES_TYPE_LEN: usize = 1;
const SDES_OCTET_COUNT_LEN: usize = 1;

/// SDES item types, RFC 3550 6.5. Only CNAME is produced by the writer.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum SdesType {
    #[default]
    SdesEnd = 0,
    SdesCname = 1,
    SdesName = 2,
    SdesEmail = 3,
    SdesPhone = 4,
    SdesLocation = 5,
    SdesTool = 6,
    SdesNote = 7,
    SdesPrivate = 8,
}

impl fmt::Display for SdesType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SdesType::SdesEnd => "END",
            SdesType::SdesCname => "CNAME",
            SdesType::SdesName => "NAME",
            SdesType::SdesEmail => "EMAIL",
            SdesType::SdesPhone => "PHONE",
            SdesType::SdesLocation => "LOC",
            SdesType::SdesTool => "TOOL",
            SdesType::SdesNote => "NOTE",
            SdesType::SdesPrivate => "PRIV",
        };
        write!(f, "{s}")
    }
}

impl From<u8> for SdesType {
    fn from(b: u8) -> Self {
        match b {
            1 => SdesType::SdesCname,
            2 => SdesType::SdesName,
            3 => SdesType::SdesEmail,
            4 => SdesType::SdesPhone,
            5 => SdesType::SdesLocation,
            6 => SdesType::SdesTool,
            7 => SdesType::SdesNote,
            8 => SdesType::SdesPrivate,
            _ => SdesType::SdesEnd,
        }
    }
}

/// A single type/length/text item inside a chunk.
#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub struct SourceDescriptionItem {
    pub sdes_type: SdesType,
    pub text: Bytes,
}

impl SourceDescriptionItem {
    fn wire_len(&self) -> usize {
        SDES_TYPE_LEN + SDES_OCTET_COUNT_LEN + self.text.len()
    }
}

/// Items describing one SSRC or CSRC.
#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub struct SourceDescriptionChunk {
    pub source: u32,
    pub items: Vec<SourceDescriptionItem>,
}

impl SourceDescriptionChunk {
    fn raw_size(&self) -> usize {
        // terminating null octet
        SDES_SOURCE_LEN + self.items.iter().map(|i| i.wire_len()).sum::<usize>() + SDES_TYPE_LEN
    }

    fn padded_size(&self) -> usize {
        let l = self.raw_size();
        l + get_padding_size(l)
    }

    fn write_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        /*
         *  +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
         *  |                          SSRC/CSRC_1                          |
         *  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         *  |    CNAME=1    |     length    | user and domain name        ...
         *  +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
         */
        buf.put_u32(self.source);
        for it in &self.items {
            if it.sdes_type == SdesType::SdesEnd {
                return Err(Error::SdesMissingType);
            }
            if it.text.len() > SDES_MAX_OCTET_COUNT {
                return Err(Error::SdesTextTooLong);
            }
            buf.put_u8(it.sdes_type as u8);
            buf.put_u8(it.text.len() as u8);
            buf.put(it.text.clone());
        }

        // the item list ends with null octets up to the next 32-bit boundary
        let nulls = self.padded_size() - self.raw_size() + SDES_TYPE_LEN;
        for _ in 0..nulls {
            buf.put_u8(SdesType::SdesEnd as u8);
        }

        Ok(self.padded_size())
    }

    fn read_from<B: Buf>(raw_packet: &mut B) -> Result<Self> {
        if raw_packet.remaining() < SDES_SOURCE_LEN + SDES_TYPE_LEN {
            return Err(Error::ShortPacket);
        }

        let source = raw_packet.get_u32();
        let mut consumed = SDES_SOURCE_LEN;
        let mut items = vec![];

        while raw_packet.has_remaining() {
            let sdes_type = SdesType::from(raw_packet.get_u8());
            consumed += SDES_TYPE_LEN;
            if sdes_type == SdesType::SdesEnd {
                let padding_len = get_padding_size(consumed);
                if raw_packet.remaining() < padding_len {
                    return Err(Error::ShortPacket);
                }
                raw_packet.advance(padding_len);
                return Ok(SourceDescriptionChunk { source, items });
            }

            if !raw_packet.has_remaining() {
                return Err(Error::ShortPacket);
            }
            let octet_count = raw_packet.get_u8() as usize;
            if raw_packet.remaining() < octet_count {
                return Err(Error::ShortPacket);
            }
            let text = raw_packet.copy_to_bytes(octet_count);
            consumed += SDES_OCTET_COUNT_LEN + octet_count;
            items.push(SourceDescriptionItem { sdes_type, text });
        }

        Err(Error::ShortPacket)
    }
}

/// A SourceDescription (SDES) packet describes the sources in an RTP stream.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct SourceDescription {
    pub chunks: Vec<SourceDescriptionChunk>,
}

impl SourceDescription {
    /// A single chunk carrying only a CNAME item.
    pub fn with_cname(source: u32, cname: &str) -> Self {
        SourceDescription {
            chunks: vec![SourceDescriptionChunk {
                source,
                items: vec![SourceDescriptionItem {
                    sdes_type: SdesType::SdesCname,
                    text: Bytes::copy_from_slice(cname.as_bytes()),
                }],
            }],
        }
    }

    pub fn cname(&self, source: u32) -> Option<&Bytes> {
        self.chunks
            .iter()
            .filter(|c| c.source == source)
            .flat_map(|c| c.items.iter())
            .find(|i| i.sdes_type == SdesType::SdesCname)
            .map(|i| &i.text)
    }
}

impl fmt::Display for SourceDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = "Source Description:\n".to_string();
        for c in &self.chunks {
            out += format!("\t{:x}\n", c.source).as_str();
            for it in &c.items {
                out += format!("\t\t{} {:?}\n", it.sdes_type, it.text).as_str();
            }
        }
        write!(f, "{out}")
    }
}

impl Packet for SourceDescription {
    fn header(&self) -> Header {
        // chunks are self-aligned so the packet never needs padding
        Header {
            padding: false,
            count: self.chunks.len() as u8,
            packet_type: PacketType::SourceDescription,
            length: ((self.raw_size() / 4) - 1) as u16,
        }
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        self.chunks.iter().map(|x| x.source).collect()
    }

    fn raw_size(&self) -> usize {
        HEADER_LENGTH + self.chunks.iter().map(|c| c.padded_size()).sum::<usize>()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

impl MarshalSize for SourceDescription {
    fn marshal_size(&self) -> usize {
        self.raw_size()
    }
}

impl Marshal for SourceDescription {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if self.chunks.len() > COUNT_MAX {
            return Err(Error::TooManyChunks);
        }
        if buf.remaining_mut() < self.marshal_size() {
            return Err(Error::BufferTooShort);
        }

        let h = self.header();
        let n = h.marshal_to(buf)?;
        buf = &mut buf[n..];

        for c in &self.chunks {
            let n = c.write_to(buf)?;
            buf = &mut buf[n..];
        }

        Ok(self.marshal_size())
    }
}

impl Unmarshal for SourceDescription {
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let h = Header::unmarshal(raw_packet)?;
        if h.packet_type != PacketType::SourceDescription {
            return Err(Error::WrongType);
        }

        let mut chunks = Vec::with_capacity(h.count as usize);
        for _ in 0..h.count {
            chunks.push(SourceDescriptionChunk::read_from(raw_packet)?);
        }

        raw_packet.advance(raw_packet.remaining());

        Ok(SourceDescription { chunks })
    }
}
