//! RFC 2250 MPEG2 transport stream depacketization.
//!
//! The PAT and PMT select one elementary stream (video preferred). Its PES
//! payloads feed an [`ElementaryStreamQueue`] which cuts the access units.

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, warn};

use super::{AccessUnit, Depacketizer};
use crate::error::{Error, Result};
use crate::es_queue::{ElementaryStreamQueue, EsMode};
use crate::packet::Packet;

pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;
const PAT_PID: u16 = 0;
const TABLE_ID_PAT: u8 = 0x00;
const TABLE_ID_PMT: u8 = 0x02;
const PTS_MASK: u64 = (1 << 33) - 1;

const MPEG2_CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_MPEG_2);

#[derive(Debug)]
struct Selected {
    pid: u16,
    queue: ElementaryStreamQueue,
    last_cc: Option<u8>,
}

#[derive(Debug, Default)]
struct Pes {
    data: BytesMut,
    timestamp_us: i64,
    /// Payload bytes announced by PES_packet_length, if bounded.
    expected: Option<usize>,
    corrupted: bool,
}

/// Maps 90 kHz PTS values onto the packet timeline.
#[derive(Debug, Clone, Copy)]
struct PtsBase {
    pts: u64,
    timestamp_us: i64,
    rtp_time: u32,
}

#[derive(Debug, Default)]
pub struct Mpeg2TsAssembler {
    pmt_pid: Option<u16>,
    selected: Option<Selected>,
    pes: Option<Pes>,
    base: Option<PtsBase>,
    last_timestamp_us: Option<i64>,
    ready: VecDeque<AccessUnit>,
}

impl Mpeg2TsAssembler {
    pub fn new() -> Self {
        Mpeg2TsAssembler::default()
    }

    /// Mode of the elementary stream chosen from the PMT.
    pub fn selected_mode(&self) -> Option<EsMode> {
        self.selected.as_ref().map(|s| s.queue.mode())
    }

    fn parse_ts_packet(&mut self, packet: &Packet, ts: &[u8]) -> Result<()> {
        if ts[0] != TS_SYNC_BYTE {
            return Err(Error::AssemblerFormat("lost TS sync".to_owned()));
        }
        let unit_start = ts[1] & 0x40 != 0;
        let pid = (((ts[1] & 0x1F) as u16) << 8) | ts[2] as u16;
        let adaptation_field_control = (ts[3] >> 4) & 0x03;
        let continuity_counter = ts[3] & 0x0F;

        let mut offset = 4;
        if adaptation_field_control & 0x02 != 0 {
            offset += 1 + ts[4] as usize;
        }
        if adaptation_field_control & 0x01 == 0 || offset >= TS_PACKET_SIZE {
            return Ok(());
        }
        let payload = &ts[offset..];

        if pid == PAT_PID {
            if unit_start {
                self.parse_pat(payload)?;
            }
            return Ok(());
        }
        if Some(pid) == self.pmt_pid {
            if unit_start {
                self.parse_pmt(payload)?;
            }
            return Ok(());
        }

        let Some(selected) = self.selected.as_mut() else {
            return Ok(());
        };
        if selected.pid != pid {
            return Ok(());
        }
        if let Some(last) = selected.last_cc {
            if (last + 1) & 0x0F != continuity_counter {
                debug!("TS continuity break on pid {pid}");
                if let Some(pes) = self.pes.as_mut() {
                    pes.corrupted = true;
                }
            }
        }
        selected.last_cc = Some(continuity_counter);

        if unit_start {
            self.flush_pes();
            self.start_pes(packet, payload)?;
        } else if let Some(pes) = self.pes.as_mut() {
            pes.data.put(payload);
        }

        let complete = self
            .pes
            .as_ref()
            .and_then(|pes| pes.expected.map(|e| pes.data.len() >= e))
            .unwrap_or(false);
        if complete {
            self.flush_pes();
        }
        Ok(())
    }

    /// Returns the section body between the 3-byte header and the CRC.
    fn section<'a>(&self, payload: &'a [u8], table_id: u8) -> Result<Option<&'a [u8]>> {
        let pointer = *payload
            .first()
            .ok_or_else(|| Error::AssemblerFormat("empty PSI payload".to_owned()))?
            as usize;
        let section = payload.get(1 + pointer..).unwrap_or_default();
        if section.len() < 3 || section[0] != table_id {
            return Ok(None);
        }
        let section_length = ((((section[1] & 0x0F) as usize) << 8) | section[2] as usize) + 3;
        if section_length > section.len() || section_length < 12 {
            return Err(Error::AssemblerFormat(
                "PSI section spans TS packets".to_owned(),
            ));
        }
        let (body, crc) = section[..section_length].split_at(section_length - 4);
        let expected = u32::from_be_bytes([crc[0], crc[1], crc[2], crc[3]]);
        if MPEG2_CRC.checksum(body) != expected {
            return Err(Error::AssemblerFormat("PSI CRC mismatch".to_owned()));
        }
        Ok(Some(&body[3..]))
    }

    fn parse_pat(&mut self, payload: &[u8]) -> Result<()> {
        let Some(body) = self.section(payload, TABLE_ID_PAT)? else {
            return Ok(());
        };
        // transport_stream_id, version, section numbers
        for entry in body[5..].chunks_exact(4) {
            let program_number = u16::from_be_bytes([entry[0], entry[1]]);
            let pid = (((entry[2] & 0x1F) as u16) << 8) | entry[3] as u16;
            if program_number != 0 {
                if self.pmt_pid != Some(pid) {
                    debug!("TS program {program_number} PMT on pid {pid}");
                }
                self.pmt_pid = Some(pid);
                break;
            }
        }
        Ok(())
    }

    fn parse_pmt(&mut self, payload: &[u8]) -> Result<()> {
        let Some(body) = self.section(payload, TABLE_ID_PMT)? else {
            return Ok(());
        };
        if body.len() < 9 {
            return Err(Error::AssemblerFormat("short PMT".to_owned()));
        }
        let program_info_length = (((body[7] & 0x0F) as usize) << 8) | body[8] as usize;
        let mut offset = 9 + program_info_length;

        let mut video = None;
        let mut audio = None;
        while offset + 5 <= body.len() {
            let stream_type = body[offset];
            let pid = (((body[offset + 1] & 0x1F) as u16) << 8) | body[offset + 2] as u16;
            let es_info_length =
                (((body[offset + 3] & 0x0F) as usize) << 8) | body[offset + 4] as usize;
            offset += 5 + es_info_length;

            match EsMode::from_stream_type(stream_type) {
                Ok(mode) if mode.is_video() => {
                    video.get_or_insert((pid, mode));
                }
                Ok(mode) => {
                    audio.get_or_insert((pid, mode));
                }
                Err(_) => debug!("ignoring TS stream type {stream_type:#04x} on pid {pid}"),
            }
        }

        let Some((pid, mode)) = video.or(audio) else {
            warn!("PMT lists no supported elementary stream");
            return Ok(());
        };
        if self.selected.as_ref().map(|s| s.pid) != Some(pid) {
            debug!("TS selecting {mode} stream on pid {pid}");
            self.selected = Some(Selected {
                pid,
                queue: ElementaryStreamQueue::new(mode),
                last_cc: None,
            });
            self.pes = None;
        }
        Ok(())
    }

    fn start_pes(&mut self, packet: &Packet, payload: &[u8]) -> Result<()> {
        if payload.len() < 9 || payload[..3] != [0x00, 0x00, 0x01] {
            return Err(Error::AssemblerFormat("bad PES start code".to_owned()));
        }
        let pes_packet_length = u16::from_be_bytes([payload[4], payload[5]]) as usize;
        let pts_dts_flags = payload[7] >> 6;
        let header_data_length = payload[8] as usize;
        let data_start = 9 + header_data_length;
        if data_start > payload.len() {
            return Err(Error::AssemblerFormat("PES header spans TS packets".to_owned()));
        }

        let timestamp_us = if pts_dts_flags & 0x02 != 0 {
            let p = match payload.get(9..14) {
                Some(p) if header_data_length >= 5 => p,
                _ => {
                    return Err(Error::AssemblerFormat(
                        "PES header too short for PTS".to_owned(),
                    ))
                }
            };
            let pts = ((((p[0] >> 1) & 0x07) as u64) << 30)
                | ((p[1] as u64) << 22)
                | (((p[2] >> 1) as u64) << 15)
                | ((p[3] as u64) << 7)
                | ((p[4] >> 1) as u64);
            self.map_pts(packet, pts)
        } else {
            self.last_timestamp_us.unwrap_or(packet.meta.timestamp_us)
        };

        let mut data = BytesMut::new();
        data.put(&payload[data_start..]);
        self.pes = Some(Pes {
            data,
            timestamp_us,
            expected: (pes_packet_length != 0)
                .then(|| pes_packet_length.saturating_sub(3 + header_data_length)),
            corrupted: false,
        });
        Ok(())
    }

    fn map_pts(&mut self, packet: &Packet, pts: u64) -> i64 {
        let base = *self.base.get_or_insert(PtsBase {
            pts,
            timestamp_us: packet.meta.timestamp_us,
            rtp_time: packet.rtp_time(),
        });
        let mut delta = (pts.wrapping_sub(base.pts) & PTS_MASK) as i64;
        if delta > (PTS_MASK as i64) / 2 {
            delta -= PTS_MASK as i64 + 1;
        }
        let timestamp_us = base.timestamp_us + delta * 100 / 9;
        self.last_timestamp_us = Some(timestamp_us);
        timestamp_us
    }

    fn rtp_time_for(&self, timestamp_us: i64) -> u32 {
        match self.base {
            Some(base) => base
                .rtp_time
                .wrapping_add(((timestamp_us - base.timestamp_us) * 9 / 100) as u32),
            None => 0,
        }
    }

    fn flush_pes(&mut self) {
        let Some(pes) = self.pes.take() else {
            return;
        };
        let Some(selected) = self.selected.as_mut() else {
            return;
        };
        if pes.corrupted {
            warn!("dropping PES after TS discontinuity");
            selected.queue.clear(true);
            return;
        }
        if let Err(err) = selected.queue.append(&pes.data, pes.timestamp_us) {
            warn!("elementary stream rejected PES: {err}");
            selected.queue.clear(true);
            return;
        }
        self.drain_queue();
    }

    fn drain_queue(&mut self) {
        let Some(selected) = self.selected.as_mut() else {
            return;
        };
        let mut units = Vec::new();
        loop {
            match selected.queue.dequeue_access_unit() {
                Ok(unit) => units.push(unit),
                Err(Error::NotEnoughData) => break,
                Err(err) => {
                    warn!("elementary stream {}: {err}", selected.queue.mode());
                    selected.queue.clear(true);
                    break;
                }
            }
        }
        for unit in units {
            let rtp_time = self.rtp_time_for(unit.timestamp_us);
            self.ready.push_back(AccessUnit {
                data: unit.data,
                timestamp_us: unit.timestamp_us,
                rtp_time,
                is_key_frame: unit.is_key_frame,
                marker: false,
                cvo: None,
            });
        }
    }
}

impl Depacketizer for Mpeg2TsAssembler {
    fn append(&mut self, packet: Packet) -> Result<()> {
        if packet.payload.len() % TS_PACKET_SIZE != 0 {
            return Err(Error::AssemblerFormat(format!(
                "{} byte payload is not a whole number of TS packets",
                packet.payload.len()
            )));
        }
        let payload: Bytes = packet.payload.clone();
        for ts in payload.chunks_exact(TS_PACKET_SIZE) {
            if let Err(err) = self.parse_ts_packet(&packet, ts) {
                warn!("skipping TS packet: {err}");
            }
        }
        Ok(())
    }

    fn poll(&mut self) -> Option<AccessUnit> {
        self.ready.pop_front()
    }

    fn on_bye(&mut self) {
        self.flush_pes();
        if let Some(selected) = self.selected.as_mut() {
            selected.queue.signal_eos();
        }
        self.drain_queue();
    }

    fn on_packet_lost(&mut self) {
        if let Some(pes) = self.pes.as_mut() {
            pes.corrupted = true;
        }
        if let Some(selected) = self.selected.as_mut() {
            selected.last_cc = None;
        }
    }

    fn reset(&mut self) {
        self.pes = None;
        self.base = None;
        self.last_timestamp_us = None;
        self.ready.clear();
        if let Some(selected) = self.selected.as_mut() {
            selected.queue.clear(true);
            selected.last_cc = None;
        }
    }
}
