use bitstream_io::{BigEndian, BitRead, BitReader};

use super::{ElementaryStreamQueue, EsAccessUnit};
use crate::error::{Error, Result};

pub(crate) const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];
const AAC_SAMPLES_PER_FRAME: u32 = 1024;

const AC3_SAMPLE_RATES: [u32; 3] = [48000, 44100, 32000];
const EAC3_REDUCED_SAMPLE_RATES: [u32; 3] = [24000, 22050, 16000];
const AC3_BITRATES_KBPS: [u32; 19] = [
    32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 576, 640,
];
const AC3_CHANNELS: [u32; 8] = [2, 1, 2, 3, 3, 4, 4, 5];

const MPEG_BITRATES_V1: [[u32; 15]; 3] = [
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
];
const MPEG_BITRATES_V2: [[u32; 15]; 2] = [
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];
const MPEG_SAMPLE_RATES_V1: [u32; 3] = [44100, 48000, 32000];

fn is_adts_sync(data: &[u8]) -> bool {
    // 12 sync bits then layer == 0
    data.len() >= 2 && data[0] == 0xFF && data[1] & 0xF6 == 0xF0
}

pub(super) fn find_adts_sync(data: &[u8]) -> Option<usize> {
    (0..data.len()).find(|&i| is_adts_sync(&data[i..]))
}

pub(super) fn find_ac3_sync(data: &[u8]) -> Option<usize> {
    (0..data.len().saturating_sub(1)).find(|&i| data[i] == 0x0B && data[i + 1] == 0x77)
}

pub(super) fn find_mpeg_audio_sync(data: &[u8]) -> Option<usize> {
    (0..data.len()).find(|&i| parse_mpeg_audio_header(&data[i..]).is_some())
}

fn us_per_frame(samples: u32, sample_rate: u32) -> i64 {
    samples as i64 * 1_000_000 / sample_rate.max(1) as i64
}

/// Cuts one ADTS frame and strips its header.
pub(super) fn dequeue_aac(queue: &mut ElementaryStreamQueue) -> Result<EsAccessUnit> {
    let buf = &queue.buffer[..];
    if buf.len() < 7 {
        return Err(Error::NotEnoughData);
    }
    if !is_adts_sync(buf) {
        return Err(Error::Malformed("bad ADTS sync word"));
    }
    let protection_absent = buf[1] & 0x01 != 0;
    let sampling_index = ((buf[2] >> 2) & 0x0F) as usize;
    let channel_config = (((buf[2] & 0x01) << 2) | (buf[3] >> 6)) as u32;
    let frame_length =
        (((buf[3] & 0x03) as usize) << 11) | ((buf[4] as usize) << 3) | ((buf[5] as usize) >> 5);
    let raw_blocks = (buf[6] & 0x03) as u32 + 1;
    let header_length = if protection_absent { 7 } else { 9 };

    let sample_rate = *AAC_SAMPLE_RATES
        .get(sampling_index)
        .ok_or(Error::Malformed("reserved ADTS sampling index"))?;
    if frame_length < header_length {
        return Err(Error::Malformed("ADTS frame shorter than its header"));
    }
    if buf.len() < frame_length {
        return Err(Error::NotEnoughData);
    }

    let format = queue.format_mut();
    format.sample_rate = Some(sample_rate);
    format.channels = Some(channel_config);

    let duration = us_per_frame(AAC_SAMPLES_PER_FRAME * raw_blocks, sample_rate);
    let mut unit = queue.take_unit(frame_length, duration, true)?;
    unit.data = unit.data.slice(header_length..);
    Ok(unit)
}

struct Ac3Header {
    frame_size: usize,
    sample_rate: u32,
    channels: u32,
    samples: u32,
}

fn parse_ac3_header(buf: &[u8]) -> std::io::Result<Option<Ac3Header>> {
    let mut r = BitReader::endian(buf, BigEndian);
    r.skip(16)?;
    let bsid = (buf.get(5).copied().unwrap_or(0)) >> 3;

    if bsid <= 10 {
        r.skip(16)?; // crc1
        let fscod = r.read::<u8>(2)? as usize;
        let frmsizecod = r.read::<u8>(6)? as usize;
        if fscod >= 3 || frmsizecod > 37 {
            return Ok(None);
        }
        let kbps = AC3_BITRATES_KBPS[frmsizecod / 2];
        let words = match fscod {
            0 => kbps * 2,
            1 => kbps * 96_000 / 44_100 + (frmsizecod as u32 & 1),
            _ => kbps * 3,
        };
        r.skip(5 + 3)?; // bsid, bsmod
        let acmod = r.read::<u8>(3)?;
        if acmod & 0x01 != 0 && acmod != 1 {
            r.skip(2)?;
        }
        if acmod & 0x04 != 0 {
            r.skip(2)?;
        }
        if acmod == 2 {
            r.skip(2)?;
        }
        let lfeon = r.read_bit()? as u32;
        Ok(Some(Ac3Header {
            frame_size: words as usize * 2,
            sample_rate: AC3_SAMPLE_RATES[fscod],
            channels: AC3_CHANNELS[acmod as usize] + lfeon,
            samples: 1536,
        }))
    } else if bsid <= 16 {
        r.skip(2 + 3)?; // strmtyp, substreamid
        let frmsiz = r.read::<u16>(11)? as usize;
        let fscod = r.read::<u8>(2)? as usize;
        let (sample_rate, blocks) = if fscod == 3 {
            let fscod2 = r.read::<u8>(2)? as usize;
            if fscod2 == 3 {
                return Ok(None);
            }
            (EAC3_REDUCED_SAMPLE_RATES[fscod2], 6)
        } else {
            let numblkscod = r.read::<u8>(2)?;
            (AC3_SAMPLE_RATES[fscod], [1, 2, 3, 6][numblkscod as usize])
        };
        let acmod = r.read::<u8>(3)?;
        let lfeon = r.read_bit()? as u32;
        Ok(Some(Ac3Header {
            frame_size: (frmsiz + 1) * 2,
            sample_rate,
            channels: AC3_CHANNELS[acmod as usize] + lfeon,
            samples: blocks * 256,
        }))
    } else {
        Ok(None)
    }
}

pub(super) fn dequeue_ac3(queue: &mut ElementaryStreamQueue) -> Result<EsAccessUnit> {
    let buf = &queue.buffer[..];
    if buf.len() < 8 {
        return Err(Error::NotEnoughData);
    }
    if buf[0] != 0x0B || buf[1] != 0x77 {
        return Err(Error::Malformed("bad AC3 sync word"));
    }
    let header = match parse_ac3_header(buf) {
        Ok(Some(header)) => header,
        Ok(None) => return Err(Error::Malformed("invalid AC3 frame header")),
        Err(_) => return Err(Error::NotEnoughData),
    };
    if buf.len() < header.frame_size {
        return Err(Error::NotEnoughData);
    }

    let format = queue.format_mut();
    format.sample_rate = Some(header.sample_rate);
    format.channels = Some(header.channels);

    let duration = us_per_frame(header.samples, header.sample_rate);
    queue.take_unit(header.frame_size, duration, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MpegAudioHeader {
    pub frame_size: usize,
    pub sample_rate: u32,
    pub channels: u32,
    pub samples: u32,
}

pub(crate) fn parse_mpeg_audio_header(buf: &[u8]) -> Option<MpegAudioHeader> {
    if buf.len() < 4 || buf[0] != 0xFF || buf[1] & 0xE0 != 0xE0 {
        return None;
    }
    let version = (buf[1] >> 3) & 0x03;
    let layer = (buf[1] >> 1) & 0x03;
    let bitrate_index = (buf[2] >> 4) as usize;
    let sampling_index = ((buf[2] >> 2) & 0x03) as usize;
    let padding = ((buf[2] >> 1) & 0x01) as u32;
    let channel_mode = buf[3] >> 6;

    if version == 1 || layer == 0 || bitrate_index == 0 || bitrate_index == 15 || sampling_index == 3
    {
        return None;
    }

    // layer bits: 3 => I, 2 => II, 1 => III
    let layer_number = 4 - layer as usize;
    let mpeg1 = version == 3;
    let sample_rate = MPEG_SAMPLE_RATES_V1[sampling_index]
        / match version {
            3 => 1,
            2 => 2,
            _ => 4,
        };
    let bitrate = 1000
        * if mpeg1 {
            MPEG_BITRATES_V1[layer_number - 1][bitrate_index]
        } else if layer_number == 1 {
            MPEG_BITRATES_V2[0][bitrate_index]
        } else {
            MPEG_BITRATES_V2[1][bitrate_index]
        };

    let (frame_size, samples) = match layer_number {
        1 => ((12 * bitrate / sample_rate + padding) * 4, 384),
        2 => (144 * bitrate / sample_rate + padding, 1152),
        _ if mpeg1 => (144 * bitrate / sample_rate + padding, 1152),
        _ => (72 * bitrate / sample_rate + padding, 576),
    };

    Some(MpegAudioHeader {
        frame_size: frame_size as usize,
        sample_rate,
        channels: if channel_mode == 3 { 1 } else { 2 },
        samples,
    })
}

pub(super) fn dequeue_mpeg_audio(queue: &mut ElementaryStreamQueue) -> Result<EsAccessUnit> {
    let buf = &queue.buffer[..];
    if buf.len() < 4 {
        return Err(Error::NotEnoughData);
    }
    let header =
        parse_mpeg_audio_header(buf).ok_or(Error::Malformed("bad MPEG audio frame header"))?;
    if buf.len() < header.frame_size {
        return Err(Error::NotEnoughData);
    }

    let format = queue.format_mut();
    format.sample_rate = Some(header.sample_rate);
    format.channels = Some(header.channels);

    let duration = us_per_frame(header.samples, header.sample_rate);
    queue.take_unit(header.frame_size, duration, true)
}
