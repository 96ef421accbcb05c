//! Byte accumulator that cuts access units out of an elementary stream.
//!
//! Bytes are appended in arbitrary chunks, each tagged with the timestamp of
//! its first byte. An access unit takes the timestamp of the chunk holding
//! its first byte.

mod audio;
mod nal;
mod video;


use std::collections::VecDeque;
use std::fmt;

use bytes::{Bytes, BytesMut};
use log::warn;

use crate::error::{Error, Result};

/// Stream types of ISO/IEC 13818-1 table 2-34 and common private usages.
pub const STREAM_TYPE_MPEG1_VIDEO: u8 = 0x01;
pub const STREAM_TYPE_MPEG2_VIDEO: u8 = 0x02;
pub const STREAM_TYPE_MPEG1_AUDIO: u8 = 0x03;
pub const STREAM_TYPE_MPEG2_AUDIO: u8 = 0x04;
pub const STREAM_TYPE_AAC_ADTS: u8 = 0x0F;
pub const STREAM_TYPE_MPEG4_VIDEO: u8 = 0x10;
pub const STREAM_TYPE_METADATA: u8 = 0x15;
pub const STREAM_TYPE_H264: u8 = 0x1B;
pub const STREAM_TYPE_H265: u8 = 0x24;
pub const STREAM_TYPE_PCM: u8 = 0x80;
pub const STREAM_TYPE_AC3: u8 = 0x81;
pub const STREAM_TYPE_EAC3: u8 = 0x87;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsMode {
    H264,
    H265,
    Aac,
    Ac3,
    MpegAudio,
    MpegVideo,
    Mpeg4Video,
    Pcm,
    Metadata,
}

impl fmt::Display for EsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EsMode::H264 => "H264",
            EsMode::H265 => "H265",
            EsMode::Aac => "AAC",
            EsMode::Ac3 => "AC3",
            EsMode::MpegAudio => "MPEG audio",
            EsMode::MpegVideo => "MPEG video",
            EsMode::Mpeg4Video => "MPEG4 video",
            EsMode::Pcm => "PCM",
            EsMode::Metadata => "metadata",
        };
        write!(f, "{s}")
    }
}

impl EsMode {
    pub fn from_stream_type(stream_type: u8) -> Result<Self> {
        Ok(match stream_type {
            STREAM_TYPE_H264 => EsMode::H264,
            STREAM_TYPE_H265 => EsMode::H265,
            STREAM_TYPE_AAC_ADTS => EsMode::Aac,
            STREAM_TYPE_AC3 | STREAM_TYPE_EAC3 => EsMode::Ac3,
            STREAM_TYPE_MPEG1_AUDIO | STREAM_TYPE_MPEG2_AUDIO => EsMode::MpegAudio,
            STREAM_TYPE_MPEG1_VIDEO | STREAM_TYPE_MPEG2_VIDEO => EsMode::MpegVideo,
            STREAM_TYPE_MPEG4_VIDEO => EsMode::Mpeg4Video,
            STREAM_TYPE_PCM => EsMode::Pcm,
            STREAM_TYPE_METADATA => EsMode::Metadata,
            other => {
                return Err(Error::Unsupported(format!(
                    "elementary stream type {other:#04x}"
                )))
            }
        })
    }

    pub fn is_video(&self) -> bool {
        matches!(
            self,
            EsMode::H264 | EsMode::H265 | EsMode::MpegVideo | EsMode::Mpeg4Video
        )
    }

}

/// Properties discovered while parsing the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EsFormat {
    pub mode: EsMode,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
    /// SPS (or MPEG sequence header / VOL) seen.
    pub has_parameter_sets: bool,
}

impl EsFormat {
    fn new(mode: EsMode) -> Self {
        EsFormat {
            mode,
            sample_rate: None,
            channels: None,
            has_parameter_sets: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsAccessUnit {
    pub data: Bytes,
    pub timestamp_us: i64,
    pub is_key_frame: bool,
}

#[derive(Debug, Clone, Copy)]
struct RangeInfo {
    length: usize,
    timestamp_us: i64,
    /// Units already cut from the front of this range.
    units: u32,
}

#[derive(Debug)]
pub struct ElementaryStreamQueue {
    mode: EsMode,
    buffer: BytesMut,
    ranges: VecDeque<RangeInfo>,
    format: Option<EsFormat>,
    eos: bool,
}

impl ElementaryStreamQueue {
    pub fn new(mode: EsMode) -> Self {
        ElementaryStreamQueue {
            mode,
            buffer: BytesMut::new(),
            ranges: VecDeque::new(),
            format: None,
            eos: false,
        }
    }

    pub fn mode(&self) -> EsMode {
        self.mode
    }

    pub fn format(&self) -> Option<&EsFormat> {
        self.format.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Appends a chunk whose first byte has `timestamp_us`. An empty queue
    /// only accepts data that contains a sync point; bytes before it are
    /// skipped.
    pub fn append(&mut self, data: &[u8], timestamp_us: i64) -> Result<()> {
        if self.eos {
            return Err(Error::Malformed("append after end of stream"));
        }
        if data.is_empty() {
            return Ok(());
        }

        let mut data = data;
        if self.buffer.is_empty() {
            let sync = match self.mode {
                EsMode::H264 | EsMode::H265 | EsMode::MpegVideo | EsMode::Mpeg4Video => {
                    find_start_code(data, 0).map(|p| unit_start(data, p))
                }
                EsMode::Aac => audio::find_adts_sync(data),
                EsMode::Ac3 => audio::find_ac3_sync(data),
                EsMode::MpegAudio => audio::find_mpeg_audio_sync(data),
                EsMode::Pcm | EsMode::Metadata => Some(0),
            };
            match sync {
                Some(0) => {}
                Some(offset) => {
                    warn!("{} stream: skipping {} bytes before sync", self.mode, offset);
                    data = &data[offset..];
                }
                None => return Err(Error::Malformed("no sync point in elementary stream data")),
            }
        }

        self.buffer.extend_from_slice(data);
        self.ranges.push_back(RangeInfo {
            length: data.len(),
            timestamp_us,
            units: 0,
        });
        Ok(())
    }

    /// Cuts the next complete access unit.
    pub fn dequeue_access_unit(&mut self) -> Result<EsAccessUnit> {
        if self.buffer.is_empty() {
            return Err(Error::NotEnoughData);
        }
        match self.mode {
            EsMode::H264 | EsMode::H265 => nal::dequeue(self),
            EsMode::MpegVideo | EsMode::Mpeg4Video => video::dequeue(self),
            EsMode::Aac => audio::dequeue_aac(self),
            EsMode::Ac3 => audio::dequeue_ac3(self),
            EsMode::MpegAudio => audio::dequeue_mpeg_audio(self),
            EsMode::Pcm | EsMode::Metadata => self.dequeue_range(),
        }
    }

    /// Marks the end of input; trailing start-code units become complete.
    pub fn signal_eos(&mut self) {
        self.eos = true;
    }

    pub fn is_eos(&self) -> bool {
        self.eos
    }

    pub fn clear(&mut self, keep_format: bool) {
        self.buffer.clear();
        self.ranges.clear();
        self.eos = false;
        if !keep_format {
            self.format = None;
        }
    }

    fn format_mut(&mut self) -> &mut EsFormat {
        let mode = self.mode;
        self.format.get_or_insert_with(|| EsFormat::new(mode))
    }

    /// One appended chunk per unit.
    fn dequeue_range(&mut self) -> Result<EsAccessUnit> {
        let range = self.ranges.front().copied().ok_or(Error::NotEnoughData)?;
        self.format_mut();
        let timestamp_us = self.fetch_timestamp(range.length, 0)?;
        Ok(EsAccessUnit {
            data: self.buffer.split_to(range.length).freeze(),
            timestamp_us,
            is_key_frame: true,
        })
    }

    /// Removes `size` bytes worth of ranges and returns the timestamp of the
    /// first one, advanced by `unit_duration_us` for each unit already cut
    /// from that range.
    fn fetch_timestamp(&mut self, size: usize, unit_duration_us: i64) -> Result<i64> {
        let front = self.ranges.front().copied().ok_or(Error::NotEnoughData)?;
        let timestamp_us = front.timestamp_us + front.units as i64 * unit_duration_us;

        let mut remaining = size;
        let mut first = true;
        while remaining > 0 {
            let Some(range) = self.ranges.front_mut() else {
                warn!("{} stream: timestamp ranges exhausted", self.mode);
                break;
            };
            if range.length > remaining {
                range.length -= remaining;
                if first {
                    range.units += 1;
                } else {
                    range.units = 0;
                }
                remaining = 0;
            } else {
                remaining -= range.length;
                self.ranges.pop_front();
            }
            first = false;
        }
        Ok(timestamp_us)
    }

    /// Emits `len` leading bytes as one unit.
    fn take_unit(
        &mut self,
        len: usize,
        unit_duration_us: i64,
        is_key_frame: bool,
    ) -> Result<EsAccessUnit> {
        let timestamp_us = self.fetch_timestamp(len, unit_duration_us)?;
        Ok(EsAccessUnit {
            data: self.buffer.split_to(len).freeze(),
            timestamp_us,
            is_key_frame,
        })
    }
}

/// Backs a 3-byte start code position up over the extra zero of a 4-byte one.
pub(crate) fn unit_start(data: &[u8], start_code: usize) -> usize {
    if start_code > 0 && data[start_code - 1] == 0 {
        start_code - 1
    } else {
        start_code
    }
}

/// Offset of the next `00 00 01` at or after `from`.
pub(crate) fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    if data.len() < 3 {
        return None;
    }
    (from..data.len() - 2).find(|&i| data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1)
}
