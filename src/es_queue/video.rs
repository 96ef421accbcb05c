use super::{find_start_code, unit_start, ElementaryStreamQueue, EsAccessUnit, EsMode};
use crate::error::{Error, Result};

const MPEG_PICTURE: u8 = 0x00;
const MPEG_SEQUENCE_HEADER: u8 = 0xB3;
const MPEG_GROUP_OF_PICTURES: u8 = 0xB8;

const MPEG4_VOS: u8 = 0xB0;
const MPEG4_GOV: u8 = 0xB3;
const MPEG4_VOP: u8 = 0xB6;

enum Marker {
    /// Start of a coded picture; carries the intra flag.
    Picture(bool),
    /// Header that belongs in front of the next picture.
    Header { parameter_set: bool },
    Other,
}

fn classify_mpeg(code: u8, body: &[u8]) -> Option<Marker> {
    Some(match code {
        MPEG_PICTURE => {
            // temporal_reference(10) picture_coding_type(3)
            let b = *body.get(1)?;
            Marker::Picture((b >> 3) & 0x07 == 1)
        }
        MPEG_SEQUENCE_HEADER => Marker::Header {
            parameter_set: true,
        },
        MPEG_GROUP_OF_PICTURES => Marker::Header {
            parameter_set: false,
        },
        _ => Marker::Other,
    })
}

fn classify_mpeg4(code: u8, body: &[u8]) -> Option<Marker> {
    Some(match code {
        MPEG4_VOP => {
            let b = *body.first()?;
            Marker::Picture(b >> 6 == 0)
        }
        MPEG4_VOS | MPEG4_GOV | 0x00..=0x1F => Marker::Header {
            parameter_set: false,
        },
        0x20..=0x2F => Marker::Header {
            parameter_set: true,
        },
        _ => Marker::Other,
    })
}

/// Cuts one picture: everything up to the first header or picture start
/// code following a picture.
pub(super) fn dequeue(queue: &mut ElementaryStreamQueue) -> Result<EsAccessUnit> {
    let classify: fn(u8, &[u8]) -> Option<Marker> = match queue.mode {
        EsMode::Mpeg4Video => classify_mpeg4,
        _ => classify_mpeg,
    };

    let buf = &queue.buffer[..];
    let mut pos = find_start_code(buf, 0).ok_or(Error::Malformed("missing start code"))?;
    let mut seen_picture = false;
    let mut key_frame = false;
    let mut parameter_set = false;
    let mut au_end = None;

    loop {
        let Some(&code) = buf.get(pos + 3) else {
            break;
        };
        let Some(marker) = classify(code, &buf[pos + 4..]) else {
            // picture header not fully buffered yet
            break;
        };
        match marker {
            Marker::Picture(_) | Marker::Header { .. } if seen_picture => {
                au_end = Some(unit_start(buf, pos));
                break;
            }
            Marker::Picture(intra) => {
                seen_picture = true;
                key_frame = intra;
            }
            Marker::Header { parameter_set: p } => parameter_set |= p,
            Marker::Other => {}
        }
        match find_start_code(buf, pos + 3) {
            Some(next) => pos = next,
            None => break,
        }
    }

    let au_end = match au_end {
        Some(end) => end,
        None if queue.eos && seen_picture => buf.len(),
        None => return Err(Error::NotEnoughData),
    };

    if parameter_set {
        queue.format_mut().has_parameter_sets = true;
    } else {
        queue.format_mut();
    }
    queue.take_unit(au_end, 0, key_frame)
}
