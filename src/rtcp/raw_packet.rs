use std::any::Any;
use std::fmt;

use bytes::{Buf, BufMut, Bytes};

use super::header::*;
use super::Packet;
use crate::error::{Error, Result};
use crate::marshal::{Marshal, MarshalSize, Unmarshal};

/// RawPacket carries an RTCP packet whose type or feedback format is not
/// interpreted. It is kept so compound datagrams still parse end to end.
#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub struct RawPacket(pub Bytes);

impl fmt::Display for RawPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawPacket: {:?}", self.0)
    }
}

impl Packet for RawPacket {
    fn header(&self) -> Header {
        match Header::unmarshal(&mut self.0.clone()) {
            Ok(h) => h,
            Err(_) => Header::default(),
        }
    }

    fn destination_ssrc(&self) -> Vec<u32> {
        vec![]
    }

    fn raw_size(&self) -> usize {
        self.0.len()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

impl MarshalSize for RawPacket {
    fn marshal_size(&self) -> usize {
        self.raw_size()
    }
}

impl Marshal for RawPacket {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < self.0.len() {
            return Err(Error::BufferTooShort);
        }
        buf.put(self.0.clone());
        Ok(self.0.len())
    }
}

impl Unmarshal for RawPacket {
    fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        let raw_packet_len = raw_packet.remaining();
        if raw_packet_len < HEADER_LENGTH {
            return Err(Error::ShortPacket);
        }

        let raw = raw_packet.copy_to_bytes(raw_packet_len);
        // validates the version bits
        Header::unmarshal(&mut raw.clone())?;

        Ok(RawPacket(raw))
    }
}
