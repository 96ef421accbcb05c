//! Minimal reader for the media-level lines of an SDP body.
//!
//! Only what the transport consumes is parsed: `m=`, `a=rtpmap:`, `a=fmtp:`
//! and `a=control:`. Offer/answer semantics live elsewhere.

use std::collections::HashMap;

use log::warn;
use serde::Deserialize;

use crate::error::{Error, Result};

#[cfg(test)]
mod session_description_test;

/// Description of one `m=` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackDescription {
    /// `audio`, `video`, `application`...
    pub media: String,
    pub payload_type: u8,
    /// Upper-cased encoding name from `rtpmap`, e.g. `H264`, `MP4A-LATM`.
    pub encoding_name: String,
    pub clock_rate_hz: u32,
    pub channels: u32,
    /// fmtp parameters, keys lower-cased.
    pub fmtp: HashMap<String, String>,
    pub control: Option<String>,
}

impl TrackDescription {
    pub fn fmtp_param(&self, key: &str) -> Option<&str> {
        self.fmtp.get(&key.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn fmtp_u32(&self, key: &str) -> Option<u32> {
        self.fmtp_param(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn is_video(&self) -> bool {
        self.media.eq_ignore_ascii_case("video")
    }
}

/// Tracks of a session, indexed from 0 in `m=` order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SessionDescription {
    pub tracks: Vec<TrackDescription>,
}

impl SessionDescription {
    pub fn new(tracks: Vec<TrackDescription>) -> Self {
        SessionDescription { tracks }
    }

    pub fn track(&self, index: usize) -> Result<&TrackDescription> {
        self.tracks.get(index).ok_or(Error::TrackNotFound(index))
    }

    pub fn parse(sdp: &str) -> Result<Self> {
        let mut tracks: Vec<TrackDescription> = vec![];

        for line in sdp.lines() {
            let line = line.trim_end_matches('\r').trim();
            if let Some(media) = line.strip_prefix("m=") {
                tracks.push(parse_media_line(media)?);
                continue;
            }

            // session-level attributes are not interesting here
            let Some(track) = tracks.last_mut() else {
                continue;
            };

            if let Some(rtpmap) = line.strip_prefix("a=rtpmap:") {
                let (pt, desc) = split_pt(rtpmap)?;
                if pt != track.payload_type {
                    continue;
                }
                let (name, clock_rate, channels) = parse_rtpmap(desc)?;
                track.encoding_name = name;
                track.clock_rate_hz = clock_rate;
                track.channels = channels;
            } else if let Some(fmtp) = line.strip_prefix("a=fmtp:") {
                let (pt, params) = split_pt(fmtp)?;
                if pt != track.payload_type {
                    continue;
                }
                track.fmtp = parse_fmtp(params);
            } else if let Some(control) = line.strip_prefix("a=control:") {
                track.control = Some(control.trim().to_owned());
            }
        }

        if tracks.is_empty() {
            return Err(Error::MalformedPacket("session description has no m= line"));
        }

        Ok(SessionDescription { tracks })
    }
}

fn parse_media_line(media: &str) -> Result<TrackDescription> {
    // m=<media> <port> <proto> <fmt> ...
    let mut fields = media.split_whitespace();
    let kind = fields.next().unwrap_or_default().to_owned();
    let _port = fields.next();
    let _proto = fields.next();
    let payload_type = fields
        .next()
        .and_then(|f| f.parse::<u8>().ok())
        .filter(|pt| *pt < 128)
        .ok_or(Error::MalformedPacket("m= line without a payload type"))?;

    let mut track = TrackDescription {
        media: kind,
        payload_type,
        channels: 1,
        ..Default::default()
    };

    if let Some((name, clock_rate, channels)) = static_payload_type(payload_type) {
        track.encoding_name = name.to_owned();
        track.clock_rate_hz = clock_rate;
        track.channels = channels;
    }

    Ok(track)
}

fn split_pt(value: &str) -> Result<(u8, &str)> {
    let value = value.trim();
    let (pt, rest) = value.split_once(char::is_whitespace).unwrap_or((value, ""));
    let pt = pt
        .parse::<u8>()
        .map_err(|_| Error::MalformedPacket("attribute without a payload type"))?;
    Ok((pt, rest.trim()))
}

fn parse_rtpmap(desc: &str) -> Result<(String, u32, u32)> {
    let name = desc.split('/').next().unwrap_or_default().to_ascii_uppercase();
    if name.is_empty() {
        return Err(Error::MalformedPacket("empty rtpmap encoding name"));
    }
    let (clock_rate, channels) = parse_format_desc(desc)?;
    Ok((name, clock_rate, channels))
}

/// Splits `key=value;key=value` into a map with lower-cased keys.
pub(crate) fn parse_fmtp(params: &str) -> HashMap<String, String> {
    params
        .split(';')
        .filter_map(|kv| {
            let kv = kv.trim();
            if kv.is_empty() {
                return None;
            }
            match kv.split_once('=') {
                Some((k, v)) => Some((k.trim().to_ascii_lowercase(), v.trim().to_owned())),
                None => Some((kv.to_ascii_lowercase(), String::new())),
            }
        })
        .collect()
}

/// Parses `<encoding>/<clock rate>[/<channels>]` into `(clock_rate, channels)`.
///
/// A missing or zero clock rate is replaced by the format's canonical rate
/// with a warning. Channels default to 1.
pub fn parse_format_desc(desc: &str) -> Result<(u32, u32)> {
    let mut parts = desc.trim().split('/');
    let name = parts.next().unwrap_or_default();

    let mut clock_rate = match parts.next() {
        Some(s) => s
            .trim()
            .parse::<u32>()
            .map_err(|_| Error::MalformedPacket("rtpmap clock rate is not a number"))?,
        None => 0,
    };
    let channels = match parts.next() {
        Some(s) => s
            .trim()
            .parse::<u32>()
            .map_err(|_| Error::MalformedPacket("rtpmap channel count is not a number"))?,
        None => 1,
    };

    if clock_rate == 0 {
        match canonical_clock_rate(name) {
            Some(rate) => {
                warn!("{name}: clock rate missing, assuming {rate} Hz");
                clock_rate = rate;
            }
            None => {
                return Err(Error::Unsupported(format!(
                    "no clock rate for encoding {name}"
                )))
            }
        }
    }

    Ok((clock_rate, channels.max(1)))
}

fn canonical_clock_rate(name: &str) -> Option<u32> {
    let name = name.to_ascii_uppercase();
    let rate = match name.as_str() {
        "H264" | "H265" | "HEVC" | "H263" | "H263-1998" | "H263-2000" | "MP4V-ES" | "MP2T"
        | "MPV" | "JPEG" => 90_000,
        "PCMU" | "PCMA" | "G722" | "AMR" | "GSM" => 8_000,
        "AMR-WB" => 16_000,
        "L8" | "L16" => 44_100,
        "MPA" => 90_000,
        "MP4A-LATM" | "MPEG4-GENERIC" => 44_100,
        _ => return None,
    };
    Some(rate)
}

/// RFC 3551 static payload types the transport knows about.
fn static_payload_type(pt: u8) -> Option<(&'static str, u32, u32)> {
    Some(match pt {
        0 => ("PCMU", 8_000, 1),
        8 => ("PCMA", 8_000, 1),
        9 => ("G722", 8_000, 1),
        10 => ("L16", 44_100, 2),
        11 => ("L16", 44_100, 1),
        14 => ("MPA", 90_000, 1),
        32 => ("MPV", 90_000, 1),
        33 => ("MP2T", 90_000, 1),
        34 => ("H263", 90_000, 1),
        _ => return None,
    })
}
