//! RFC 6184 depacketization into Annex-B access units.

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use log::warn;

use super::nal_unit::{annexb_join, AccessUnitBuilder};
use super::{AccessUnit, Depacketizer};
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::session_description::TrackDescription;

pub const IDR_NALU_TYPE: u8 = 5;
pub const SPS_NALU_TYPE: u8 = 7;
pub const PPS_NALU_TYPE: u8 = 8;
pub const STAPA_NALU_TYPE: u8 = 24;
pub const FUA_NALU_TYPE: u8 = 28;
pub const FUB_NALU_TYPE: u8 = 29;

pub const NALU_TYPE_BITMASK: u8 = 0x1F;
pub const FU_START_BITMASK: u8 = 0x80;
pub const FU_END_BITMASK: u8 = 0x40;

const FU_HEADER_SIZE: usize = 2;
const FUB_DON_SIZE: usize = 2;
const STAPA_HEADER_SIZE: usize = 1;
const STAPA_NALU_LENGTH_SIZE: usize = 2;

#[derive(Debug)]
pub struct H264Assembler {
    builder: AccessUnitBuilder,
}

impl H264Assembler {
    pub fn new(track: &TrackDescription, config: &ConnectionConfig) -> Result<Self> {
        let parameter_sets = if config.vilte_mode {
            Bytes::new()
        } else {
            track
                .fmtp_param("sprop-parameter-sets")
                .map(decode_sprop_parameter_sets)
                .transpose()?
                .unwrap_or_default()
        };
        Ok(Self::with_parameter_sets(parameter_sets))
    }

    pub(crate) fn with_parameter_sets(parameter_sets: Bytes) -> Self {
        H264Assembler {
            builder: AccessUnitBuilder::new(parameter_sets),
        }
    }

    fn parse(&mut self, payload: &Bytes) -> Result<()> {
        let b0 = payload[0];
        let nalu_type = b0 & NALU_TYPE_BITMASK;

        match nalu_type {
            1..=23 => {
                self.builder.push_nal(payload, is_key_nalu_type(nalu_type));
            }
            STAPA_NALU_TYPE => {
                let mut curr_offset = STAPA_HEADER_SIZE;
                while curr_offset + STAPA_NALU_LENGTH_SIZE <= payload.len() {
                    let nalu_size =
                        ((payload[curr_offset] as usize) << 8) | payload[curr_offset + 1] as usize;
                    curr_offset += STAPA_NALU_LENGTH_SIZE;

                    if payload.len() < curr_offset + nalu_size {
                        self.builder.mark_corrupted();
                        return Err(Error::AssemblerFormat(format!(
                            "STAP-A declared size({}) is larger than buffer({})",
                            nalu_size,
                            payload.len() - curr_offset
                        )));
                    }
                    let nal = &payload[curr_offset..curr_offset + nalu_size];
                    let key = nal
                        .first()
                        .map(|h| is_key_nalu_type(h & NALU_TYPE_BITMASK))
                        .unwrap_or(false);
                    self.builder.push_nal(nal, key);
                    curr_offset += nalu_size;
                }
            }
            FUA_NALU_TYPE | FUB_NALU_TYPE => {
                if payload.len() <= FU_HEADER_SIZE {
                    self.builder.mark_corrupted();
                    return Err(Error::AssemblerFormat("short fragmentation unit".to_owned()));
                }
                let b1 = payload[1];
                let fragment_type = b1 & NALU_TYPE_BITMASK;
                let key = is_key_nalu_type(fragment_type);

                if b1 & FU_START_BITMASK != 0 {
                    let mut offset = FU_HEADER_SIZE;
                    if nalu_type == FUB_NALU_TYPE {
                        offset += FUB_DON_SIZE;
                    }
                    if payload.len() < offset {
                        self.builder.mark_corrupted();
                        return Err(Error::AssemblerFormat("short FU-B".to_owned()));
                    }
                    let nal_header = (b0 & !NALU_TYPE_BITMASK) | fragment_type;
                    self.builder
                        .start_fragment(&[nal_header], &payload[offset..]);
                } else if !self.builder.continue_fragment(&payload[FU_HEADER_SIZE..]) {
                    warn!("fragment continuation without a start fragment");
                    return Ok(());
                }

                if b1 & FU_END_BITMASK != 0 {
                    self.builder.end_fragment(key);
                }
            }
            other => {
                self.builder.mark_corrupted();
                return Err(Error::AssemblerFormat(format!(
                    "unsupported H264 packetization type {other}"
                )));
            }
        }
        Ok(())
    }
}

/// IDR slices and the parameter sets sent ahead of them.
pub(crate) fn is_key_nalu_type(nalu_type: u8) -> bool {
    matches!(nalu_type, IDR_NALU_TYPE | SPS_NALU_TYPE | PPS_NALU_TYPE)
}

/// True when the payload begins a NAL unit rather than continuing a fragment.
fn starts_nal(payload: &[u8]) -> bool {
    match payload[0] & NALU_TYPE_BITMASK {
        FUA_NALU_TYPE | FUB_NALU_TYPE => payload.len() > 1 && payload[1] & FU_START_BITMASK != 0,
        _ => true,
    }
}

impl Depacketizer for H264Assembler {
    fn append(&mut self, packet: Packet) -> Result<()> {
        if packet.payload.is_empty() {
            return Err(Error::AssemblerFormat("empty H264 payload".to_owned()));
        }
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

/// Decodes `sprop-parameter-sets`, a comma separated list of base64 NAL units.
pub fn decode_sprop_parameter_sets(value: &str) -> Result<Bytes> {
    let mut nals = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let nal = BASE64_STANDARD
            .decode(part)
            .map_err(|e| Error::AssemblerFormat(format!("bad sprop-parameter-sets: {e}")))?;
        nals.push(Bytes::from(nal));
    }
    Ok(annexb_join(nals))
}
