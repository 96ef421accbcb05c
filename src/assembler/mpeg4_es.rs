//! RFC 3640 `mpeg4-generic` depacketization.

use std::collections::VecDeque;

use bitstream_io::{BigEndian, BitRead, BitReader};
use bytes::{BufMut, Bytes, BytesMut};
use log::warn;

use super::{ticks_to_us, truncated, AccessUnit, Depacketizer};
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::session_description::TrackDescription;

/// AU header layout negotiated through fmtp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuHeaderConfig {
    pub size_length: u32,
    pub index_length: u32,
    pub index_delta_length: u32,
    pub cts_delta_length: u32,
    pub dts_delta_length: u32,
    pub random_access_indication: bool,
    pub stream_state_indication: u32,
    pub auxiliary_data_size_length: u32,
    pub constant_size: Option<usize>,
    /// RTP ticks between consecutive AUs of one packet.
    pub constant_duration: u32,
}

impl AuHeaderConfig {
    pub fn from_track(track: &TrackDescription) -> Self {
        let get = |key: &str| track.fmtp_u32(key).unwrap_or(0);
        let is_aac = track
            .fmtp_param("mode")
            .map(|m| m.to_ascii_uppercase().starts_with("AAC"))
            .unwrap_or(false);
        let constant_duration = match get("constantduration") {
            0 if is_aac => 1024,
            d => d,
        };
        AuHeaderConfig {
            size_length: get("sizelength"),
            index_length: get("indexlength"),
            index_delta_length: get("indexdeltalength"),
            cts_delta_length: get("ctsdeltalength"),
            dts_delta_length: get("dtsdeltalength"),
            random_access_indication: get("randomaccessindication") == 1,
            stream_state_indication: get("streamstateindication"),
            auxiliary_data_size_length: get("auxiliarydatasizelength"),
            constant_size: track.fmtp_u32("constantsize").map(|s| s as usize),
            constant_duration,
        }
    }

    fn has_au_headers(&self) -> bool {
        self.size_length > 0
            || self.index_length > 0
            || self.index_delta_length > 0
            || self.cts_delta_length > 0
            || self.dts_delta_length > 0
            || self.random_access_indication
            || self.stream_state_indication > 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct AuHeader {
    size: usize,
    index: u32,
    cts_delta: Option<i64>,
    random_access: bool,
}

#[derive(Debug)]
struct Fragment {
    head: AccessUnit,
    size: usize,
    data: BytesMut,
}

#[derive(Debug)]
pub struct Mpeg4EsAssembler {
    config: AuHeaderConfig,
    clock_rate: u32,
    fragment: Option<Fragment>,
    discard_rtp: Option<u32>,
    loss_pending: bool,
    ready: VecDeque<AccessUnit>,
}

impl Mpeg4EsAssembler {
    pub fn new(track: &TrackDescription) -> Result<Self> {
        let config = AuHeaderConfig::from_track(track);
        if config.size_length == 0 && config.constant_size.is_none() {
            return Err(Error::AssemblerFormat(
                "mpeg4-generic needs sizelength or constantsize".to_owned(),
            ));
        }
        Ok(Self::with_config(config, track.clock_rate_hz))
    }

    pub(crate) fn with_config(config: AuHeaderConfig, clock_rate: u32) -> Self {
        Mpeg4EsAssembler {
            config,
            clock_rate,
            fragment: None,
            discard_rtp: None,
            loss_pending: false,
            ready: VecDeque::new(),
        }
    }

    fn read_au_headers(&self, payload: &[u8]) -> Result<(Vec<AuHeader>, usize)> {
        let c = &self.config;
        if !c.has_au_headers() {
            let size = c.constant_size.unwrap_or(payload.len());
            return Ok((vec![AuHeader { size, ..Default::default() }], 0));
        }
        if payload.len() < 2 {
            return Err(Error::AssemblerFormat("missing AU-headers-length".to_owned()));
        }
        let headers_bits = u16::from_be_bytes([payload[0], payload[1]]) as u32;
        let headers_bytes = ((headers_bits + 7) / 8) as usize;
        let mut offset = 2 + headers_bytes;
        if payload.len() < offset {
            return Err(Error::AssemblerFormat("truncated AU headers".to_owned()));
        }

        let mut r = BitReader::endian(&payload[2..offset], BigEndian);
        let mut consumed = 0u32;
        let mut headers = Vec::new();
        let mut index = 0u32;
        while consumed < headers_bits {
            let first = headers.is_empty();
            let header_start = consumed;
            let mut h = AuHeader::default();
            if c.size_length > 0 {
                h.size = r.read::<u32>(c.size_length).map_err(truncated)? as usize;
                consumed += c.size_length;
            } else if let Some(size) = c.constant_size {
                h.size = size;
            }
            let index_bits = if first { c.index_length } else { c.index_delta_length };
            if index_bits > 0 {
                let v = r.read::<u32>(index_bits).map_err(truncated)?;
                consumed += index_bits;
                index = if first {
                    v
                } else {
                    index
                        .checked_add(v)
                        .and_then(|i| i.checked_add(1))
                        .ok_or_else(|| Error::AssemblerFormat("AU-index overflow".to_owned()))?
                };
            } else if !first {
                index = index
                    .checked_add(1)
                    .ok_or_else(|| Error::AssemblerFormat("AU-index overflow".to_owned()))?;
            }
            h.index = index;
            if c.cts_delta_length > 0 && !first {
                consumed += 1;
                if r.read_bit().map_err(truncated)? {
                    let v = r.read_signed::<i32>(c.cts_delta_length).map_err(truncated)?;
                    consumed += c.cts_delta_length;
                    h.cts_delta = Some(v as i64);
                }
            }
            if c.dts_delta_length > 0 {
                consumed += 1;
                if r.read_bit().map_err(truncated)? {
                    r.skip(c.dts_delta_length).map_err(truncated)?;
                    consumed += c.dts_delta_length;
                }
            }
            if c.random_access_indication {
                h.random_access = r.read_bit().map_err(truncated)?;
                consumed += 1;
            }
            if c.stream_state_indication > 0 {
                r.skip(c.stream_state_indication).map_err(truncated)?;
                consumed += c.stream_state_indication;
            }
            if !first && consumed == header_start {
                return Err(Error::AssemblerFormat("empty AU header".to_owned()));
            }
            headers.push(h);
        }

        if c.auxiliary_data_size_length > 0 {
            let mut r = BitReader::endian(&payload[offset..], BigEndian);
            let aux_bits = r
                .read::<u32>(c.auxiliary_data_size_length)
                .map_err(truncated)?;
            let aux_bytes = (c.auxiliary_data_size_length as u64 + aux_bits as u64 + 7) / 8;
            offset += aux_bytes as usize;
            if payload.len() < offset {
                return Err(Error::AssemblerFormat("truncated auxiliary section".to_owned()));
            }
        }
        Ok((headers, offset))
    }

    fn emit(&mut self, packet: &Packet, header: &AuHeader, first_index: u32, data: Bytes) {
        let ticks = header.cts_delta.unwrap_or_else(|| {
            (header.index.wrapping_sub(first_index)) as i64 * self.config.constant_duration as i64
        });
        let mut au = AccessUnit::from_packet(packet, data);
        au.rtp_time = packet.rtp_time().wrapping_add(ticks as u32);
        au.timestamp_us += ticks_to_us(ticks, self.clock_rate);
        au.is_key_frame = header.random_access || !self.config.random_access_indication;
        self.ready.push_back(au);
    }
}

impl Depacketizer for Mpeg4EsAssembler {
    fn append(&mut self, packet: Packet) -> Result<()> {
        if std::mem::take(&mut self.loss_pending) {
            if let Some(fragment) = self.fragment.take() {
                warn!("dropping fragmented AU after packet loss");
                self.discard_rtp = Some(fragment.head.rtp_time);
            }
        }
        match self.discard_rtp {
            Some(rtp) if rtp == packet.rtp_time() => return Ok(()),
            Some(_) => self.discard_rtp = None,
            None => {}
        }

        let (headers, data_offset) = self.read_au_headers(&packet.payload)?;
        let payload = packet.payload.slice(data_offset..);

        if let Some(mut fragment) = self.fragment.take() {
            if fragment.head.rtp_time != packet.rtp_time() || headers.len() != 1 {
                warn!("fragmented AU interrupted at rtp={}", packet.rtp_time());
            } else {
                fragment.data.put(&*payload);
                if fragment.data.len() < fragment.size && !packet.marker() {
                    self.fragment = Some(fragment);
                    return Ok(());
                }
                if fragment.data.len() != fragment.size {
                    return Err(Error::AssemblerFormat(format!(
                        "fragmented AU carries {} of {} bytes",
                        fragment.data.len(),
                        fragment.size
                    )));
                }
                let mut au = fragment.head;
                au.data = fragment.data.freeze();
                au.marker = packet.marker();
                self.ready.push_back(au);
                return Ok(());
            }
        }

        let first_index = headers.first().map(|h| h.index).unwrap_or(0);
        if headers.len() == 1 && headers[0].size > payload.len() {
            let mut head = AccessUnit::from_packet(&packet, Bytes::new());
            head.is_key_frame = headers[0].random_access || !self.config.random_access_indication;
            let mut data = BytesMut::with_capacity(headers[0].size);
            data.put(&*payload);
            self.fragment = Some(Fragment {
                head,
                size: headers[0].size,
                data,
            });
            return Ok(());
        }

        let mut offset = 0;
        for header in &headers {
            if offset + header.size > payload.len() {
                return Err(Error::AssemblerFormat(format!(
                    "AU of {} bytes exceeds payload",
                    header.size
                )));
            }
            let data = payload.slice(offset..offset + header.size);
            offset += header.size;
            self.emit(&packet, header, first_index, data);
        }
        Ok(())
    }

    fn poll(&mut self) -> Option<AccessUnit> {
        self.ready.pop_front()
    }

    fn on_bye(&mut self) {
        self.fragment = None;
    }

    fn on_packet_lost(&mut self) {
        self.loss_pending = true;
    }

    fn reset(&mut self) {
        self.fragment = None;
        self.discard_rtp = None;
        self.loss_pending = false;
        self.ready.clear();
    }
}
