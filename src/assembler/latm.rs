//! RFC 6416 MP4A-LATM depacketization with out-of-band `StreamMuxConfig`.

use std::collections::VecDeque;

use bitstream_io::{BigEndian, BitRead, BitReader};
use bytes::{BufMut, Bytes, BytesMut};
use log::warn;

use super::{truncated, AccessUnit, Depacketizer};
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::session_description::TrackDescription;

/// The subset of `StreamMuxConfig` needed to split an `AudioMuxElement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamMuxConfig {
    pub num_sub_frames: u8,
    pub audio_object_type: u8,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
    pub frame_length_type: u8,
    /// Payload length in bytes for `frame_length_type` 1.
    pub fixed_frame_length: Option<usize>,
    pub other_data_len_bits: u32,
}

impl StreamMuxConfig {
    /// Parses the hex `config` fmtp parameter.
    pub fn from_hex(config: &str) -> Result<Self> {
        let raw = hex::decode(config.trim())
            .map_err(|e| Error::AssemblerFormat(format!("bad LATM config: {e}")))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &[u8]) -> Result<Self> {
        let mut r = BitReader::endian(raw, BigEndian);
        let audio_mux_version = r.read_bit().map_err(truncated)?;
        if audio_mux_version {
            return Err(Error::Unsupported("LATM audioMuxVersion 1".to_owned()));
        }
        let all_streams_same_time_framing = r.read_bit().map_err(truncated)?;
        if !all_streams_same_time_framing {
            return Err(Error::Unsupported(
                "LATM without allStreamsSameTimeFraming".to_owned(),
            ));
        }
        let num_sub_frames = r.read::<u8>(6).map_err(truncated)?;
        let num_program = r.read::<u8>(4).map_err(truncated)?;
        let num_layer = r.read::<u8>(3).map_err(truncated)?;
        if num_program != 0 || num_layer != 0 {
            return Err(Error::Unsupported("multi-program LATM".to_owned()));
        }

        let mut config = StreamMuxConfig {
            num_sub_frames,
            ..Default::default()
        };
        parse_audio_specific_config(&mut r, &mut config)?;

        config.frame_length_type = r.read::<u8>(3).map_err(truncated)?;
        match config.frame_length_type {
            0 => {
                // latmBufferFullness
                r.skip(8).map_err(truncated)?;
            }
            1 => {
                let frame_length = r.read::<u16>(9).map_err(truncated)?;
                config.fixed_frame_length = Some(frame_length as usize + 20);
            }
            other => {
                return Err(Error::Unsupported(format!(
                    "LATM frameLengthType {other}"
                )))
            }
        }

        let other_data_present = r.read_bit().map_err(truncated)?;
        if other_data_present {
            loop {
                let escape = r.read_bit().map_err(truncated)?;
                let byte = r.read::<u32>(8).map_err(truncated)?;
                config.other_data_len_bits = (config.other_data_len_bits << 8) | byte;
                if !escape {
                    break;
                }
            }
        }
        // crcCheckPresent and its checksum are not used by the demuxer
        Ok(config)
    }
}

fn parse_audio_specific_config<R: BitRead>(
    r: &mut R,
    config: &mut StreamMuxConfig,
) -> Result<()> {
    let read_object_type = |r: &mut R| -> std::io::Result<u8> {
        let t = r.read::<u8>(5)?;
        if t == 31 {
            Ok(32 + r.read::<u8>(6)?)
        } else {
            Ok(t)
        }
    };
    let read_frequency = |r: &mut R| -> std::io::Result<u8> {
        let index = r.read::<u8>(4)?;
        if index == 0x0F {
            r.skip(24)?;
        }
        Ok(index)
    };

    let mut object_type = read_object_type(r).map_err(truncated)?;
    config.sampling_frequency_index = read_frequency(r).map_err(truncated)?;
    config.channel_configuration = r.read::<u8>(4).map_err(truncated)?;
    if object_type == 5 || object_type == 29 {
        // explicit SBR/PS signalling
        read_frequency(r).map_err(truncated)?;
        object_type = read_object_type(r).map_err(truncated)?;
    }
    config.audio_object_type = object_type;

    match object_type {
        1..=4 | 6 | 7 | 17 | 19..=23 => {
            // GASpecificConfig
            let _frame_length_flag = r.read_bit().map_err(truncated)?;
            let depends_on_core_coder = r.read_bit().map_err(truncated)?;
            if depends_on_core_coder {
                r.skip(14).map_err(truncated)?;
            }
            let extension_flag = r.read_bit().map_err(truncated)?;
            if config.channel_configuration == 0 {
                return Err(Error::Unsupported("LATM program_config_element".to_owned()));
            }
            if object_type == 6 || object_type == 20 {
                r.skip(3).map_err(truncated)?;
            }
            if extension_flag {
                if object_type == 22 {
                    r.skip(16).map_err(truncated)?;
                }
                if matches!(object_type, 17 | 19 | 20 | 23) {
                    r.skip(3).map_err(truncated)?;
                }
                r.skip(1).map_err(truncated)?;
            }
            Ok(())
        }
        other => Err(Error::Unsupported(format!("audio object type {other}"))),
    }
}

#[derive(Debug)]
pub struct LatmAssembler {
    config: StreamMuxConfig,
    head: Option<AccessUnit>,
    data: BytesMut,
    corrupted: bool,
    ready: VecDeque<AccessUnit>,
}

impl LatmAssembler {
    pub fn new(track: &TrackDescription) -> Result<Self> {
        if track.fmtp_u32("cpresent").unwrap_or(1) != 0 {
            return Err(Error::Unsupported("in-band LATM StreamMuxConfig".to_owned()));
        }
        let config = track
            .fmtp_param("config")
            .ok_or_else(|| Error::AssemblerFormat("LATM track without config".to_owned()))?;
        Ok(Self::with_config(StreamMuxConfig::from_hex(config)?))
    }

    pub(crate) fn with_config(config: StreamMuxConfig) -> Self {
        LatmAssembler {
            config,
            head: None,
            data: BytesMut::new(),
            corrupted: false,
            ready: VecDeque::new(),
        }
    }

    /// Strips `PayloadLengthInfo` from each subframe and concatenates payloads.
    fn remove_latm_framing(&self, element: &[u8]) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(element.len());
        let mut offset = 0;
        for _ in 0..=self.config.num_sub_frames {
            let len = match self.config.fixed_frame_length {
                Some(len) => len,
                None => {
                    let mut len = 0usize;
                    loop {
                        let b = *element.get(offset).ok_or_else(|| {
                            Error::AssemblerFormat("truncated PayloadLengthInfo".to_owned())
                        })?;
                        offset += 1;
                        len += b as usize;
                        if b != 0xFF {
                            break;
                        }
                    }
                    len
                }
            };
            if offset + len > element.len() {
                return Err(Error::AssemblerFormat(format!(
                    "LATM payload of {len} bytes exceeds element"
                )));
            }
            out.put(&element[offset..offset + len]);
            offset += len;
        }
        Ok(out.freeze())
    }

    fn flush(&mut self) -> Result<()> {
        let Some(mut head) = self.head.take() else {
            return Ok(());
        };
        let element = self.data.split().freeze();
        if std::mem::take(&mut self.corrupted) {
            warn!("dropping incomplete LATM element rtp={}", head.rtp_time);
            return Ok(());
        }
        head.data = self.remove_latm_framing(&element)?;
        head.is_key_frame = true;
        self.ready.push_back(head);
        Ok(())
    }
}

impl Depacketizer for LatmAssembler {
    fn append(&mut self, packet: Packet) -> Result<()> {
        if self.head.as_ref().map(|h| h.rtp_time) != Some(packet.rtp_time()) {
            if self.head.is_some() {
                // element spilled over without a marker
                self.corrupted = true;
            }
            self.flush()?;
            self.head = Some(AccessUnit::from_packet(&packet, Bytes::new()));
        }
        self.data.put(&*packet.payload);
        if packet.marker() {
            self.flush()?;
        }
        Ok(())
    }

    fn poll(&mut self) -> Option<AccessUnit> {
        self.ready.pop_front()
    }

    fn on_bye(&mut self) {
        if let Err(err) = self.flush() {
            warn!("discarding LATM element at BYE: {err}");
        }
    }

    fn on_packet_lost(&mut self) {
        self.corrupted = true;
    }

    fn reset(&mut self) {
        self.head = None;
        self.data.clear();
        self.corrupted = false;
        self.ready.clear();
    }
}
