//! RFC 7798 depacketization into Annex-B access units.

use bytes::{Bytes, BytesMut};

use super::h264::decode_sprop_parameter_sets;
use super::nal_unit::AccessUnitBuilder;
use super::{AccessUnit, Depacketizer};
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::session_description::TrackDescription;

const H265NALU_HEADER_SIZE: usize = 2;
const H265FU_HEADER_SIZE: usize = 1;
/// https://datatracker.ietf.org/doc/html/rfc7798#section-4.4.2
const H265NALU_AGGREGATION_PACKET_TYPE: u8 = 48;
/// https://datatracker.ietf.org/doc/html/rfc7798#section-4.4.3
const H265NALU_FRAGMENTATION_UNIT_TYPE: u8 = 49;
/// https://datatracker.ietf.org/doc/html/rfc7798#section-4.4.4
const H265NALU_PACI_PACKET_TYPE: u8 = 50;

const FU_START_BITMASK: u8 = 0x80;
const FU_END_BITMASK: u8 = 0x40;
const FU_TYPE_BITMASK: u8 = 0x3F;

/// H265NALUHeader is a H265 NAL Unit Header
/// https://datatracker.ietf.org/doc/html/rfc7798#section-1.1.4
/// +---------------+---------------+
///  |0|1|2|3|4|5|6|7|0|1|2|3|4|5|6|7|
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  |F|   Type    |  layer_id  | tid |
///  +-------------+-----------------+
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct H265NaluHeader(pub u16);

impl H265NaluHeader {
    fn new(high_byte: u8, low_byte: u8) -> Self {
        H265NaluHeader(((high_byte as u16) << 8) | low_byte as u16)
    }

    pub fn nalu_type(&self) -> u8 {
        ((self.0 >> 9) & 0x3F) as u8
    }

    /// IRAP pictures and the parameter sets that precede them.
    pub fn is_key_frame(&self) -> bool {
        is_key_nalu_type(self.nalu_type())
    }
}

pub(crate) fn is_key_nalu_type(nalu_type: u8) -> bool {
    matches!(nalu_type, 16..=23 | 32..=34)
}

#[derive(Debug)]
pub struct H265Assembler {
    builder: AccessUnitBuilder,
}

impl H265Assembler {
    pub fn new(track: &TrackDescription, config: &ConnectionConfig) -> Result<Self> {
        let mut parameter_sets = BytesMut::new();
        if !config.vilte_mode {
            for key in ["sprop-vps", "sprop-sps", "sprop-pps"] {
                if let Some(value) = track.fmtp_param(key) {
                    parameter_sets.extend_from_slice(&decode_sprop_parameter_sets(value)?);
                }
            }
        }
        Ok(Self::with_parameter_sets(parameter_sets.freeze()))
    }

    pub(crate) fn with_parameter_sets(parameter_sets: Bytes) -> Self {
        H265Assembler {
            builder: AccessUnitBuilder::new(parameter_sets),
        }
    }

    fn parse(&mut self, payload: &Bytes) -> Result<()> {
        if payload.len() <= H265NALU_HEADER_SIZE {
            self.builder.mark_corrupted();
            return Err(Error::AssemblerFormat("short H265 payload".to_owned()));
        }
        let header = H265NaluHeader::new(payload[0], payload[1]);

        match header.nalu_type() {
            H265NALU_AGGREGATION_PACKET_TYPE => {
                let mut offset = H265NALU_HEADER_SIZE;
                while offset + 2 <= payload.len() {
                    let size = ((payload[offset] as usize) << 8) | payload[offset + 1] as usize;
                    offset += 2;
                    if size < H265NALU_HEADER_SIZE || payload.len() < offset + size {
                        self.builder.mark_corrupted();
                        return Err(Error::AssemblerFormat(format!(
                            "aggregation unit size {size} exceeds payload"
                        )));
                    }
                    let nal = &payload[offset..offset + size];
                    let key = H265NaluHeader::new(nal[0], nal[1]).is_key_frame();
                    self.builder.push_nal(nal, key);
                    offset += size;
                }
            }
            H265NALU_FRAGMENTATION_UNIT_TYPE => {
                let fu_header = payload[H265NALU_HEADER_SIZE];
                let fu_type = fu_header & FU_TYPE_BITMASK;
                let data = &payload[H265NALU_HEADER_SIZE + H265FU_HEADER_SIZE..];

                if fu_header & FU_START_BITMASK != 0 {
                    let nal_header = [(payload[0] & 0x81) | (fu_type << 1), payload[1]];
                    self.builder.start_fragment(&nal_header, data);
                } else if !self.builder.continue_fragment(data) {
                    return Ok(());
                }
                if fu_header & FU_END_BITMASK != 0 {
                    self.builder.end_fragment(is_key_nalu_type(fu_type));
                }
            }
            H265NALU_PACI_PACKET_TYPE => {
                self.builder.mark_corrupted();
                return Err(Error::AssemblerFormat(
                    "PACI packets are not supported".to_owned(),
                ));
            }
            t if t < H265NALU_AGGREGATION_PACKET_TYPE => {
                self.builder.push_nal(payload, header.is_key_frame());
            }
            other => {
                self.builder.mark_corrupted();
                return Err(Error::AssemblerFormat(format!(
                    "unsupported H265 packetization type {other}"
                )));
            }
        }
        Ok(())
    }
}

fn starts_nal(payload: &[u8]) -> bool {
    if payload.len() <= H265NALU_HEADER_SIZE {
        return true;
    }
    let nalu_type = (payload[0] >> 1) & 0x3F;
    nalu_type != H265NALU_FRAGMENTATION_UNIT_TYPE
        || payload[H265NALU_HEADER_SIZE] & FU_START_BITMASK != 0
}

impl Depacketizer for H265Assembler {
    fn append(&mut self, packet: Packet) -> Result<()> {
        self.builder.begin(&packet, starts_nal(&packet.payload));
        let result = self.parse(&packet.payload);
        self.builder.finish(&packet);
        result
    }

    fn poll(&mut self) -> Option<AccessUnit> {
        self.builder.poll()
    }

    fn on_bye(&mut self) {
        self.builder.flush();
    }

    fn on_packet_lost(&mut self) {
        self.builder.on_packet_lost();
    }

    fn take_fir_request(&mut self) -> bool {
        self.builder.take_fir_request()
    }

    fn reset(&mut self) {
        self.builder.reset();
    }
}
