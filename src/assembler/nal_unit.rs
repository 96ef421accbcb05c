use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};
use log::{trace, warn};

use super::AccessUnit;
use crate::packet::Packet;

pub(crate) static ANNEXB_START_CODE: &[u8] = &[0x00, 0x00, 0x00, 0x01];

/// Collects Annex-B NAL units of one picture across packets sharing an RTP
/// timestamp. Used by the H.264 and H.265 payload formats.
#[derive(Debug, Default)]
pub(crate) struct AccessUnitBuilder {
    head: Option<AccessUnit>,
    data: BytesMut,
    fragment: Option<BytesMut>,
    corrupted: bool,
    key_frame: bool,
    loss_pending: bool,
    ready: VecDeque<AccessUnit>,
    parameter_sets: Bytes,
    parameter_sets_sent: bool,
    fir_request: bool,
}

impl AccessUnitBuilder {
    /// `parameter_sets` is Annex-B data prepended to the first emitted unit.
    pub(crate) fn new(parameter_sets: Bytes) -> Self {
        AccessUnitBuilder {
            parameter_sets,
            ..Default::default()
        }
    }

    /// Opens or continues the unit `packet` belongs to. `starts_nal` tells
    /// whether the payload begins a NAL unit rather than continuing one.
    pub(crate) fn begin(&mut self, packet: &Packet, starts_nal: bool) {
        let in_progress = self.head.as_ref().map(|h| h.rtp_time);
        match in_progress {
            Some(rtp) if rtp == packet.rtp_time() => {
                if self.loss_pending {
                    self.corrupted = true;
                }
            }
            Some(_) => {
                if self.loss_pending {
                    self.corrupted = true;
                }
                self.flush();
                self.open(packet);
                if self.loss_pending && !starts_nal {
                    self.corrupted = true;
                }
            }
            None => {
                self.open(packet);
                if self.loss_pending {
                    self.corrupted = true;
                }
            }
        }
        self.loss_pending = false;
    }

    fn open(&mut self, packet: &Packet) {
        self.head = Some(AccessUnit::from_packet(packet, Bytes::new()));
    }

    pub(crate) fn push_nal(&mut self, nal: &[u8], key_frame: bool) {
        if nal.is_empty() {
            return;
        }
        if self.fragment.take().is_some() {
            trace!("unterminated fragment superseded by a new nal unit");
            self.corrupted = true;
        }
        self.data.put(ANNEXB_START_CODE);
        self.data.put(nal);
        self.key_frame |= key_frame;
    }

    /// Starts a fragmented NAL unit with its reconstructed header.
    pub(crate) fn start_fragment(&mut self, nal_header: &[u8], payload: &[u8]) {
        if self.fragment.is_some() {
            self.corrupted = true;
        }
        let mut fragment = BytesMut::with_capacity(nal_header.len() + payload.len());
        fragment.put(nal_header);
        fragment.put(payload);
        self.fragment = Some(fragment);
    }

    /// Continues the open fragment; returns false when there is none.
    pub(crate) fn continue_fragment(&mut self, payload: &[u8]) -> bool {
        match self.fragment.as_mut() {
            Some(fragment) => {
                fragment.put(payload);
                true
            }
            None => {
                self.corrupted = true;
                false
            }
        }
    }

    pub(crate) fn end_fragment(&mut self, key_frame: bool) {
        if let Some(fragment) = self.fragment.take() {
            self.push_nal(&fragment, key_frame);
        }
    }

    pub(crate) fn mark_corrupted(&mut self) {
        self.corrupted = true;
    }

    pub(crate) fn finish(&mut self, packet: &Packet) {
        if packet.marker() {
            if let Some(head) = self.head.as_mut() {
                head.marker = true;
            }
            self.flush();
        }
    }

    /// Closes the unit in progress, queueing it when intact.
    pub(crate) fn flush(&mut self) {
        let Some(mut head) = self.head.take() else {
            return;
        };
        if self.fragment.take().is_some() {
            self.corrupted = true;
        }
        let data = self.data.split();
        let key_frame = std::mem::take(&mut self.key_frame);
        if std::mem::take(&mut self.corrupted) {
            warn!(
                "dropping corrupted access unit rtp={} ({} bytes)",
                head.rtp_time,
                data.len()
            );
            self.fir_request = true;
            return;
        }
        if data.is_empty() {
            return;
        }

        let data = if !self.parameter_sets_sent && !self.parameter_sets.is_empty() {
            self.parameter_sets_sent = true;
            let mut out = BytesMut::with_capacity(self.parameter_sets.len() + data.len());
            out.put(&*self.parameter_sets);
            out.put(data);
            out.freeze()
        } else {
            data.freeze()
        };
        head.data = data;
        head.is_key_frame = key_frame;
        self.ready.push_back(head);
    }

    pub(crate) fn on_packet_lost(&mut self) {
        self.loss_pending = true;
    }

    pub(crate) fn poll(&mut self) -> Option<AccessUnit> {
        self.ready.pop_front()
    }

    pub(crate) fn take_fir_request(&mut self) -> bool {
        std::mem::take(&mut self.fir_request)
    }

    pub(crate) fn reset(&mut self) {
        self.head = None;
        self.data.clear();
        self.fragment = None;
        self.corrupted = false;
        self.key_frame = false;
        self.loss_pending = false;
        self.ready.clear();
        self.parameter_sets_sent = false;
        self.fir_request = false;
    }
}

/// Joins decoded parameter sets into one Annex-B blob.
pub(crate) fn annexb_join<I>(nals: I) -> Bytes
where
    I: IntoIterator<Item = Bytes>,
{
    let mut out = BytesMut::new();
    for nal in nals {
        if nal.is_empty() {
            continue;
        }
        out.put(ANNEXB_START_CODE);
        out.put(nal);
    }
    out.freeze()
}
