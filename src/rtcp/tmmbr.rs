//! Temporary Maximum Media Stream Bit Rate Request and Notification,
//! RFC 5104 4.2.1 and 4.2.2. Both share the same FCI layout.

use std::any::Any;
use std::fmt;

use bytes::{Buf, BufMut};

use super::header::*;
use super::Packet;
use crate::error::{Error, Result};
use crate::marshal::{Marshal, MarshalSize, Unmarshal};

const TMMB_OFFSET: usize = 8;
const TMMB_ENTRY_LENGTH: usize = 8;

const EXP_MASK: u32 = 0x3F;
const MANTISSA_MASK: u32 = 0x1_FFFF;
const OVERHEAD_MASK: u32 = 0x1FF;

/// Bitrate overhead in bytes per packet advertised with every request.
pub const DEFAULT_MEASURED_OVERHEAD: u16 = 40;

/// One FCI entry of a TMMBR or TMMBN.
#[derive(Debug, PartialEq, Eq, Default, Clone, Copy)]
pub struct TmmbEntry {
    pub ssrc: u32,
    /// 6-bit exponent.
    pub exp: u8,
    /// 17-bit mantissa.
    pub mantissa: u32,
    /// 9-bit per-packet overhead in bytes.
    pub measured_overhead: u16,
}

impl TmmbEntry {
    /// Encodes `bitrate` so that the mantissa fits in 17 bits, dropping low
    /// order bits when it does not.
    pub fn from_bitrate(ssrc: u32, bitrate: u32) -> Self {
        let (mantissa, exp) = if bitrate == 0 {
            (0, 0)
        } else {
            let left = 31 - bitrate.leading_zeros();
            let mut right = bitrate.trailing_zeros();
            if left - right > 16 {
                right = left - 16;
            }
            (bitrate >> right, right as u8)
        };

        TmmbEntry {
            ssrc,
            exp,
            mantissa,
            measured_overhead: DEFAULT_MEASURED_OVERHEAD,
        }
    }

    /// mantissa * 2^exp.
    pub fn bitrate(&self) -> u64 {
        (self.mantissa as u64).checked_shl(self.exp as u32).unwrap_or(u64::MAX)
    }

    fn put(&self, buf: &mut &mut [u8]) {
        /*
         *  0                   1                   2                   3
         *  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         * |                              SSRC                             |
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         * | MxTBR Exp |  MxTBR Mantissa                 |Measured Overhead|
         * +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
         */
        buf.put_u32(self.ssrc);
        let word = ((self.exp as u32 & EXP_MASK) << 26)
            | ((self.mantissa & MANTISSA_MASK) << 9)
            | (self.measured_overhead as u32 & OVERHEAD_MASK);
        buf.put_u32(word);
    }

    fn get<B: Buf>(raw_packet: &mut B) -> Self {
        let ssrc = raw_packet.get_u32();
        let word = raw_packet.get_u32();
        TmmbEntry {
            ssrc,
            exp: ((word >> 26) & EXP_MASK) as u8,
            mantissa: (word >> 9) & MANTISSA_MASK,
            measured_overhead: (word & OVERHEAD_MASK) as u16,
        }
    }
}

fn marshal_tmmb(
    format: u8,
    sender_ssrc: u32,
    media_ssrc: u32,
    entries: &[TmmbEntry],
    raw_size: usize,
    mut buf: &mut [u8],
) -> Result<usize> {
    if buf.remaining_mut() < raw_size {
        return Err(Error::BufferTooShort);
    }

    let h = header_for(PacketType::TransportSpecificFeedback, format, raw_size);
    let n = h.marshal_to(buf)?;
    buf = &mut buf[n..];

    buf.put_u32(sender_ssrc);
    buf.put_u32(media_ssrc);
    for e in entries {
        e.put(&mut buf);
    }

    Ok(raw_size)
}

fn unmarshal_tmmb<B: Buf>(raw_packet: &mut B, format: u8) -> Result<(u32, u32, Vec<TmmbEntry>)> {
    let raw_packet_len = raw_packet.remaining();
    if raw_packet_len < HEADER_LENGTH + TMMB_OFFSET {
        return Err(Error::ShortPacket);
    }

    let h = Header::unmarshal(raw_packet)?;
    if raw_packet_len < HEADER_LENGTH + 4 * h.length as usize {
        return Err(Error::ShortPacket);
    }
    if h.packet_type != PacketType::TransportSpecificFeedback || h.count != format {
        return Err(Error::WrongType);
    }

    let sender_ssrc = raw_packet.get_u32();
    let media_ssrc = raw_packet.get_u32();

    let mut entries = vec![];
    while raw_packet.remaining() >= TMMB_ENTRY_LENGTH {
        entries.push(TmmbEntry::get(raw_packet));
    }
    raw_packet.advance(raw_packet.remaining());

    Ok((sender_ssrc, media_ssrc, entries))
}

/// TMMBR: asks the media sender to cap its bitrate.
#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub struct TmmbRequest {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub entries: Vec<TmmbEntry>,
}

/// TMMBN: acknowledges the bounding set after a TMMBR.
#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub struct TmmbNotification {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub entries: Vec<TmmbEntry>,
}

macro_rules! impl_tmmb_packet {
    ($ty:ident, $format:expr, $name:expr) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut out = format!("{} from {:x}\n", $name, self.sender_ssrc);
                for e in &self.entries {
                    out += format!(
                        "\t{:x}\t{}bps\toverhead {}\n",
                        e.ssrc,
                        e.bitrate(),
                        e.measured_overhead
                    )
                    .as_str();
                }
                write!(f, "{out}")
            }
        }

        impl Packet for $ty {
            fn header(&self) -> Header {
                header_for(
                    PacketType::TransportSpecificFeedback,
                    $format,
                    self.raw_size(),
                )
            }

            fn destination_ssrc(&self) -> Vec<u32> {
                self.entries.iter().map(|e| e.ssrc).collect()
            }

            fn raw_size(&self) -> usize {
                HEADER_LENGTH + TMMB_OFFSET + self.entries.len() * TMMB_ENTRY_LENGTH
            }

            fn as_any(&self) -> &(dyn Any + Send + Sync) {
                self
            }
        }

        impl MarshalSize for $ty {
            fn marshal_size(&self) -> usize {
                self.raw_size()
            }
        }

        impl Marshal for $ty {
            fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
                marshal_tmmb(
                    $format,
                    self.sender_ssrc,
                    self.media_ssrc,
                    &self.entries,
                    self.raw_size(),
                    buf,
                )
            }
        }

        impl Unmarshal for $ty {
            fn unmarshal<B>(raw_packet: &mut B) -> Result<Self>
            where
                Self: Sized,
                B: Buf,
            {
                let (sender_ssrc, media_ssrc, entries) = unmarshal_tmmb(raw_packet, $format)?;
                Ok($ty {
                    sender_ssrc,
                    media_ssrc,
                    entries,
                })
            }
        }
    };
}

impl_tmmb_packet!(TmmbRequest, FORMAT_TMMBR, "TMMBR");
impl_tmmb_packet!(TmmbNotification, FORMAT_TMMBN, "TMMBN");
