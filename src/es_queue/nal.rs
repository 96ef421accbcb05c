use super::{find_start_code, unit_start, ElementaryStreamQueue, EsAccessUnit, EsMode};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default)]
struct NalInfo {
    vcl: bool,
    first_slice: bool,
    /// Non-VCL units that may only precede the first slice of a picture.
    opens_picture: bool,
    key_frame: bool,
    parameter_set: bool,
}

fn classify_h264(nal: &[u8]) -> NalInfo {
    let t = nal[0] & 0x1F;
    NalInfo {
        vcl: (1..=5).contains(&t),
        // first_mb_in_slice == 0 codes as a single '1' bit
        first_slice: nal.len() > 1 && nal[1] & 0x80 != 0,
        opens_picture: matches!(t, 6..=9 | 14..=18),
        key_frame: t == 5,
        parameter_set: t == 7,
    }
}

fn classify_h265(nal: &[u8]) -> NalInfo {
    if nal.len() < 2 {
        return NalInfo::default();
    }
    let t = (nal[0] >> 1) & 0x3F;
    NalInfo {
        vcl: t < 32,
        first_slice: nal.len() > 2 && nal[2] & 0x80 != 0,
        opens_picture: matches!(t, 32..=35 | 39 | 41..=44 | 48..=55),
        key_frame: (16..=23).contains(&t),
        parameter_set: t == 33,
    }
}

/// Cuts one picture of Annex-B NAL units.
pub(super) fn dequeue(queue: &mut ElementaryStreamQueue) -> Result<EsAccessUnit> {
    let classify: fn(&[u8]) -> NalInfo = match queue.mode {
        EsMode::H265 => classify_h265,
        _ => classify_h264,
    };

    let buf = &queue.buffer[..];
    let mut pos = find_start_code(buf, 0).ok_or(Error::Malformed("missing start code"))?;
    let mut seen_vcl = false;
    let mut key_frame = false;
    let mut parameter_set = false;
    let mut au_end = None;

    loop {
        let nal_start = pos + 3;
        let next = find_start_code(buf, nal_start);
        let nal_end = match next {
            Some(p) => unit_start(buf, p),
            None => buf.len(),
        };
        let complete = next.is_some() || queue.eos;
        if nal_end <= nal_start {
            // empty unit between adjacent start codes
            match next {
                Some(p) => {
                    pos = p;
                    continue;
                }
                None => break,
            }
        }

        // the header of an unterminated unit is enough to spot a boundary
        let info = classify(&buf[nal_start..nal_end]);
        if seen_vcl && (info.opens_picture || (info.vcl && info.first_slice)) {
            au_end = Some(unit_start(buf, pos));
            break;
        }
        if !complete {
            break;
        }
        seen_vcl |= info.vcl;
        key_frame |= info.key_frame;
        parameter_set |= info.parameter_set;

        match next {
            Some(p) => pos = p,
            None => {
                if seen_vcl {
                    au_end = Some(buf.len());
                }
                break;
            }
        }
    }

    let Some(au_end) = au_end else {
        if queue.eos && !seen_vcl {
            // trailing non-VCL data with no picture left to attach to
            let len = queue.buffer.len();
            queue.fetch_timestamp(len, 0)?;
            queue.buffer.clear();
        }
        return Err(Error::NotEnoughData);
    };

    if parameter_set {
        queue.format_mut().has_parameter_sets = true;
    } else {
        queue.format_mut();
    }
    queue.take_unit(au_end, 0, key_frame)
}
