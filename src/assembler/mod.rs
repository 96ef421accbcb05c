//! Payload-format specific reassembly of in-order RTP packets into access units.

pub mod amr;
pub mod h263;
pub mod h264;
pub mod h265;
pub mod latm;
pub mod mpeg2ts;
pub mod mpeg4_es;
mod nal_unit;
pub mod raw_audio;

#[cfg(test)]
mod assembler_test;

use std::fmt;

use bytes::Bytes;

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::packet::extension::VideoOrientation;
use crate::packet::Packet;
use crate::session_description::TrackDescription;
use amr::AmrAssembler;
use h263::H263Assembler;
use h264::H264Assembler;
use h265::H265Assembler;
use latm::LatmAssembler;
use mpeg2ts::Mpeg2TsAssembler;
use mpeg4_es::Mpeg4EsAssembler;
use raw_audio::RawAudioAssembler;

/// A decodable unit handed to the upper layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessUnit {
    pub data: Bytes,
    /// Media time relative to the first packet of the source.
    pub timestamp_us: i64,
    pub rtp_time: u32,
    pub is_key_frame: bool,
    pub marker: bool,
    pub cvo: Option<VideoOrientation>,
}

impl fmt::Display for AccessUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AccessUnit {} bytes @{}us rtp={} key={}",
            self.data.len(),
            self.timestamp_us,
            self.rtp_time,
            self.is_key_frame
        )
    }
}

impl AccessUnit {
    pub(crate) fn from_packet(packet: &Packet, data: Bytes) -> Self {
        AccessUnit {
            data,
            timestamp_us: packet.meta.timestamp_us,
            rtp_time: packet.rtp_time(),
            is_key_frame: false,
            marker: packet.marker(),
            cvo: packet.meta.cvo,
        }
    }
}

/// Operations every payload format implements.
pub(crate) trait Depacketizer {
    /// Consumes the next in-order packet.
    fn append(&mut self, packet: Packet) -> Result<()>;

    /// Next completed access unit, if any.
    fn poll(&mut self) -> Option<AccessUnit>;

    /// The sender left; complete units still buffered are released.
    fn on_bye(&mut self);

    /// One or more packets before the next appended one will never arrive.
    fn on_packet_lost(&mut self) {}

    /// RTP time of the first packet of the unit `packet` belongs to.
    fn find_rtp_time(&self, _first_rtp: u32, packet: &Packet) -> u32 {
        packet.rtp_time()
    }

    /// True once after a reference picture was lost.
    fn take_fir_request(&mut self) -> bool {
        false
    }

    /// Drops all partial state.
    fn reset(&mut self);
}

/// The reassembler selected for a track.
#[derive(Debug)]
pub enum Assembler {
    H264(H264Assembler),
    H265(H265Assembler),
    H263(H263Assembler),
    Amr(AmrAssembler),
    Latm(LatmAssembler),
    Mpeg4Es(Mpeg4EsAssembler),
    RawAudio(RawAudioAssembler),
    Mpeg2Ts(Mpeg2TsAssembler),
}

macro_rules! dispatch {
    ($self:expr, $a:ident => $body:expr) => {
        match $self {
            Assembler::H264($a) => $body,
            Assembler::H265($a) => $body,
            Assembler::H263($a) => $body,
            Assembler::Amr($a) => $body,
            Assembler::Latm($a) => $body,
            Assembler::Mpeg4Es($a) => $body,
            Assembler::RawAudio($a) => $body,
            Assembler::Mpeg2Ts($a) => $body,
        }
    };
}

impl Assembler {
    /// Picks the variant from the track's encoding name.
    pub fn for_track(track: &TrackDescription, config: &ConnectionConfig) -> Result<Self> {
        let name = track.encoding_name.to_ascii_uppercase();
        let assembler = match name.as_str() {
            "H264" => Assembler::H264(H264Assembler::new(track, config)?),
            "H265" | "HEVC" => Assembler::H265(H265Assembler::new(track, config)?),
            "H263" | "H263-1998" | "H263-2000" => Assembler::H263(H263Assembler::new()),
            "AMR" => Assembler::Amr(AmrAssembler::new(false, track)?),
            "AMR-WB" => Assembler::Amr(AmrAssembler::new(true, track)?),
            "MP4A-LATM" => Assembler::Latm(LatmAssembler::new(track)?),
            "MPEG4-GENERIC" => Assembler::Mpeg4Es(Mpeg4EsAssembler::new(track)?),
            "L8" | "L16" | "PCMU" | "PCMA" => Assembler::RawAudio(RawAudioAssembler::new(track)?),
            "MP2T" => Assembler::Mpeg2Ts(Mpeg2TsAssembler::new()),
            other => {
                return Err(Error::Unsupported(format!(
                    "no assembler for encoding {other}"
                )))
            }
        };
        Ok(assembler)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Assembler::H264(_) => "H264",
            Assembler::H265(_) => "H265",
            Assembler::H263(_) => "H263",
            Assembler::Amr(_) => "AMR",
            Assembler::Latm(_) => "LATM",
            Assembler::Mpeg4Es(_) => "MPEG4-ES",
            Assembler::RawAudio(_) => "RAW",
            Assembler::Mpeg2Ts(_) => "MP2T",
        }
    }

    /// Video variants take part in FIR signalling.
    pub fn is_video(&self) -> bool {
        matches!(
            self,
            Assembler::H264(_) | Assembler::H265(_) | Assembler::H263(_)
        )
    }

    pub fn append(&mut self, packet: Packet) -> Result<()> {
        dispatch!(self, a => a.append(packet))
    }

    pub fn poll(&mut self) -> Option<AccessUnit> {
        dispatch!(self, a => a.poll())
    }

    pub fn on_bye(&mut self) {
        dispatch!(self, a => a.on_bye())
    }

    pub fn on_packet_lost(&mut self) {
        dispatch!(self, a => a.on_packet_lost())
    }

    pub fn find_rtp_time(&self, first_rtp: u32, packet: &Packet) -> u32 {
        dispatch!(self, a => a.find_rtp_time(first_rtp, packet))
    }

    pub fn take_fir_request(&mut self) -> bool {
        dispatch!(self, a => a.take_fir_request())
    }

    pub fn reset(&mut self) {
        dispatch!(self, a => a.reset())
    }
}

/// Maps a truncated bitstream read onto the assembler error.
pub(crate) fn truncated(_: std::io::Error) -> Error {
    Error::AssemblerFormat("truncated bitstream".to_owned())
}

/// RTP ticks to microseconds.
pub(crate) fn ticks_to_us(ticks: i64, clock_rate: u32) -> i64 {
    ticks * 1_000_000 / clock_rate.max(1) as i64
}
