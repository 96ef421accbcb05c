//! Receive state for one synchronization source: reorder queue, loss
//! bookkeeping, timing estimators and the feedback it owes the sender.

pub mod feedback;
pub mod nack_ledger;
pub mod reorder_queue;
pub mod sequence;


use log::{debug, trace, warn};

use crate::assembler::{ticks_to_us, AccessUnit, Assembler};
use crate::error::{Error, Result};
use crate::jitter::JitterCalc;
use crate::packet::Packet;
use crate::rtcp;
use crate::rtcp::full_intra_request::{FirEntry, FullIntraRequest};
use crate::rtcp::receiver_report::ReceiverReport;
use crate::rtcp::reception_report::{ReceptionReport, MAX_TOTAL_LOST, MIN_TOTAL_LOST};
use crate::rtcp::source_description::SourceDescription;
use crate::rtcp::tmmbr::TmmbRequest;
use crate::rtcp::transport_layer_nack::TransportLayerNack;
use feedback::{FirPolicy, TmmbrPolicy};
use nack_ledger::{NackLedger, NACK_LEDGER_HIGH_WATER};
use reorder_queue::ReorderQueue;
use sequence::SequenceExtender;

/// Queued packets above which the oldest ones are shed.
pub const QUEUE_HIGH_WATER: usize = 256;
const QUEUE_LOW_WATER: usize = 128;

/// Alarm requests closer than this to a pending one are merged into it.
pub const ALARM_MERGE_US: i64 = 5_000;

const ANCHOR_CHECK_INTERVAL_US: i64 = 1_000_000;
const ANCHOR_ADJUST_THRESHOLD_MS: f64 = -30.0;

/// Older SRs inside this NTP window are ignored.
const SR_REORDER_WINDOW: u64 = 60 << 32;
const MAX_RTP_RTCP_GAP_SECS: i64 = 60;

/// Lost packets one NACK FCI can describe.
const NACK_SPAN: u32 = 17;

#[derive(Debug, Clone, Copy)]
struct Timeline {
    first_rtp: u32,
    first_recv_us: i64,
    anchor_us: i64,
}

/// The newest sender report heard from this source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderReportInfo {
    pub rtp_time: u32,
    pub ntp_time: u64,
    pub recv_time_us: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SourceQuality {
    pub highest_seq: u32,
    pub base_seq: u32,
    pub num_received: u32,
    pub jitter_time_ms: u32,
    pub rtp_rtcp_gap_ms: i64,
}

/// What one [`Source::poll`] produced.
#[derive(Debug, Default)]
pub struct SourcePoll {
    pub access_units: Vec<AccessUnit>,
    /// When the source next wants to be polled.
    pub alarm_at_us: Option<i64>,
    /// The reorder queue or NACK ledger overflowed since the last poll.
    pub exhausted: bool,
}

#[derive(Debug)]
pub struct Source {
    ssrc: u32,
    clock_rate: u32,
    static_jitter_ms: u32,

    assembler: Assembler,
    queue: ReorderQueue,
    seq: SequenceExtender,
    jitter: JitterCalc,
    nack: NackLedger,
    fir: FirPolicy,
    tmmbr: TmmbrPolicy,

    timeline: Option<Timeline>,
    base_seq: u32,
    last_dequeued: Option<u32>,
    last_au_rtp: Option<u32>,

    num_received: u32,
    bytes_received: u64,
    prev_expected: u32,
    prev_received: u32,
    assembler_errors: u64,

    last_sr: Option<SenderReportInfo>,
    avg_rtp_rtcp_gap_ms: f64,
    avg_underline_delay_ms: f64,
    last_anchor_check_us: i64,
    anchor_adjustments: u32,

    alarm_at_us: Option<i64>,
    exhausted: bool,
}

impl Source {
    pub fn new(
        ssrc: u32,
        clock_rate: u32,
        assembler: Assembler,
        static_jitter_ms: u32,
        periodic_fir: bool,
        target_bitrate: i32,
    ) -> Self {
        let clock_rate = clock_rate.max(1);
        Source {
            ssrc,
            clock_rate,
            static_jitter_ms,
            assembler,
            queue: ReorderQueue::default(),
            seq: SequenceExtender::default(),
            jitter: JitterCalc::new(clock_rate),
            nack: NackLedger::default(),
            fir: FirPolicy::new(periodic_fir),
            tmmbr: TmmbrPolicy::new(target_bitrate),
            timeline: None,
            base_seq: 0,
            last_dequeued: None,
            last_au_rtp: None,
            num_received: 0,
            bytes_received: 0,
            prev_expected: 0,
            prev_received: 0,
            assembler_errors: 0,
            last_sr: None,
            avg_rtp_rtcp_gap_ms: 0.0,
            avg_underline_delay_ms: 0.0,
            last_anchor_check_us: 0,
            anchor_adjustments: 0,
            alarm_at_us: None,
            exhausted: false,
        }
    }

    /// Accepts a packet into the reorder queue.
    ///
    /// The first accepted packet latches the timeline. Packets from another
    /// SSRC, duplicates and packets behind the dequeue point are rejected and
    /// leave the counters untouched.
    pub fn queue_packet(&mut self, mut packet: Packet, now_us: i64) -> Result<()> {
        if packet.ssrc() != self.ssrc {
            return Err(Error::UnknownSsrc(packet.ssrc()));
        }

        let ext_seq = self.seq.extend(packet.header.sequence_number);
        let timeline = match self.timeline {
            Some(t) => t,
            None => self.latch(&packet, ext_seq, now_us),
        };

        if (ext_seq.wrapping_sub(self.next_expected()) as i32) < 0 {
            return Err(Error::StaleTimeline(ext_seq));
        }

        let rtp_time = packet.rtp_time();
        packet.meta.ext_seq = ext_seq;
        packet.meta.arrival_time_us = now_us;
        packet.meta.timestamp_us = ticks_to_us(
            rtp_time.wrapping_sub(timeline.first_rtp) as i32 as i64,
            self.clock_rate,
        );
        let payload_len = packet.payload.len() as u64;
        let au_rtp = self.assembler.find_rtp_time(timeline.first_rtp, &packet);

        self.queue.insert(packet)?;
        self.nack.forget(ext_seq);
        self.num_received += 1;
        self.bytes_received += payload_len;

        self.update_rtp_rtcp_gap(rtp_time, now_us);
        self.update_underline_delay(rtp_time, now_us);
        self.jitter.put_inter_arrival_data(rtp_time, now_us);
        if self.last_au_rtp != Some(au_rtp) {
            self.last_au_rtp = Some(au_rtp);
            self.jitter.put_base_data(au_rtp, now_us);
        }
        self.maybe_adjust_anchor(now_us);

        if self.queue.len() > QUEUE_HIGH_WATER {
            self.shed_queue();
        }

        Ok(())
    }

    /// Moves every packet that is next in line, or whose gap has outlived its
    /// playout deadline, into the assembler and collects finished units.
    pub fn poll(&mut self, now_us: i64) -> SourcePoll {
        let mut out = SourcePoll::default();

        if let Some(timeline) = self.timeline {
            while let Some(head) = self.queue.front() {
                let (head_seq, head_rtp) = (head.meta.ext_seq, head.rtp_time());
                let expected = self.next_expected();
                if head_seq != expected {
                    let deadline = self.playout_deadline_us(&timeline, head_rtp);
                    if now_us < deadline {
                        self.record_loss(expected, head_seq);
                        self.request_alarm(now_us, deadline - now_us);
                        break;
                    }
                    debug!(
                        "ssrc {:08x}: giving up on {} packet(s) before {}",
                        self.ssrc,
                        head_seq.wrapping_sub(expected),
                        head_seq
                    );
                    self.nack.forget_through(head_seq.wrapping_sub(1));
                    self.assembler.on_packet_lost();
                }
                if let Some(packet) = self.queue.pop_front() {
                    self.deliver(packet);
                }
            }
        }

        self.collect(&mut out.access_units);
        out.exhausted = std::mem::take(&mut self.exhausted);
        out.alarm_at_us = self.alarm_at_us;
        out
    }

    /// Flushes the queue regardless of gaps and releases what the assembler
    /// still holds.
    pub fn on_bye(&mut self) -> Vec<AccessUnit> {
        while let Some(packet) = self.queue.pop_front() {
            if packet.meta.ext_seq != self.next_expected() {
                self.assembler.on_packet_lost();
            }
            self.deliver(packet);
        }
        self.nack.clear();
        self.assembler.on_bye();

        let mut units = vec![];
        self.collect(&mut units);
        units
    }

    pub fn on_sender_report(&mut self, rtp_time: u32, ntp_time: u64, now_us: i64) {
        if let Some(prev) = self.last_sr {
            if ntp_time < prev.ntp_time && prev.ntp_time - ntp_time <= SR_REORDER_WINDOW {
                debug!(
                    "ssrc {:08x}: ignoring SR older than {:016x}",
                    self.ssrc, prev.ntp_time
                );
                return;
            }
        }
        self.last_sr = Some(SenderReportInfo {
            rtp_time,
            ntp_time,
            recv_time_us: now_us,
        });
    }

    /// Reception report block for this source; snapshots the interval
    /// counters used by the next one.
    pub fn make_report_block(&mut self, now_us: i64) -> ReceptionReport {
        let expected = self.expected();
        let received = self.num_received;

        let exp_interval = expected as i64 - self.prev_expected as i64;
        let rec_interval = received as i64 - self.prev_received as i64;
        let lost_interval = exp_interval - rec_interval;
        let fraction_lost = if exp_interval > 0 && lost_interval > 0 {
            ((lost_interval << 8) / exp_interval).min(255) as u8
        } else {
            0
        };

        self.prev_expected = expected;
        self.prev_received = received;

        let (last_sender_report, delay) = match self.last_sr {
            Some(sr) => (
                (sr.ntp_time >> 16) as u32,
                ((now_us - sr.recv_time_us).max(0) as i128 * 65536 / 1_000_000) as u32,
            ),
            None => (0, 0),
        };

        ReceptionReport {
            ssrc: self.ssrc,
            fraction_lost,
            total_lost: self
                .cumulative_lost()
                .clamp(MIN_TOTAL_LOST as i64, MAX_TOTAL_LOST as i64) as i32,
            last_sequence_number: self.seq.highest(),
            jitter: self.jitter.inter_arrival_jitter_ticks(),
            last_sender_report,
            delay,
        }
    }

    /// The compound report sent every RTCP interval: RR and SDES, then
    /// TMMBR, FIR and NACK when due.
    pub fn build_rtcp(
        &mut self,
        self_ssrc: u32,
        cname: &str,
        now_us: i64,
    ) -> Vec<Box<dyn rtcp::Packet + Send + Sync>> {
        let mut out: Vec<Box<dyn rtcp::Packet + Send + Sync>> = vec![
            Box::new(ReceiverReport {
                ssrc: self_ssrc,
                reports: vec![self.make_report_block(now_us)],
            }),
            Box::new(SourceDescription::with_cname(self_ssrc, cname)),
        ];

        if let Some(entry) = self.tmmbr.poll(self.ssrc) {
            debug!("ssrc {:08x}: TMMBR {} bps", self.ssrc, entry.bitrate());
            out.push(Box::new(TmmbRequest {
                sender_ssrc: self_ssrc,
                media_ssrc: self.ssrc,
                entries: vec![entry],
            }));
        }

        if self.assembler.is_video() {
            if self.assembler.take_fir_request() {
                self.fir.request();
            }
            if let Some(sequence_number) = self.fir.poll(now_us) {
                debug!("ssrc {:08x}: FIR seq {}", self.ssrc, sequence_number);
                out.push(Box::new(FullIntraRequest {
                    sender_ssrc: self_ssrc,
                    media_ssrc: self.ssrc,
                    fir: vec![FirEntry {
                        ssrc: self.ssrc,
                        sequence_number,
                    }],
                }));
            }
        }

        let nacks = self.nack.drain();
        if !nacks.is_empty() {
            trace!("ssrc {:08x}: NACK {:?}", self.ssrc, nacks);
            out.push(Box::new(TransportLayerNack {
                sender_ssrc: self_ssrc,
                media_ssrc: self.ssrc,
                nacks,
            }));
        }

        out
    }

    /// Asks to be polled `after_us` from now. Returns false when a pending
    /// alarm already covers it.
    pub fn request_alarm(&mut self, now_us: i64, after_us: i64) -> bool {
        let at = now_us + after_us.max(0);
        match self.alarm_at_us {
            Some(pending) if at > pending - ALARM_MERGE_US => false,
            _ => {
                self.alarm_at_us = Some(at);
                true
            }
        }
    }

    pub fn alarm_at_us(&self) -> Option<i64> {
        self.alarm_at_us
    }

    /// Clears the alarm if it is due.
    pub fn take_due_alarm(&mut self, now_us: i64) -> bool {
        match self.alarm_at_us {
            Some(at) if at <= now_us => {
                self.alarm_at_us = None;
                true
            }
            _ => false,
        }
    }

    /// Forgets the timeline after a seek. The next packet is treated as the
    /// first one; the assembler keeps its variant but drops partial units.
    pub fn time_reset(&mut self) {
        debug!("ssrc {:08x}: time reset", self.ssrc);
        self.queue.clear();
        self.seq.reset();
        self.jitter = JitterCalc::new(self.clock_rate);
        self.nack.clear();
        self.fir.reset();
        self.timeline = None;
        self.base_seq = 0;
        self.last_dequeued = None;
        self.last_au_rtp = None;
        self.num_received = 0;
        self.prev_expected = 0;
        self.prev_received = 0;
        self.last_sr = None;
        self.avg_rtp_rtcp_gap_ms = 0.0;
        self.avg_underline_delay_ms = 0.0;
        self.alarm_at_us = None;
        self.exhausted = false;
        self.assembler.reset();
    }

    pub fn quality(&self) -> SourceQuality {
        SourceQuality {
            highest_seq: self.seq.highest(),
            base_seq: self.base_seq,
            num_received: self.num_received,
            jitter_time_ms: self.jitter_time_ms(),
            rtp_rtcp_gap_ms: self.avg_rtp_rtcp_gap_ms as i64,
        }
    }

    /// Playout delay: the static floor or stream B, whichever is larger.
    pub fn jitter_time_ms(&self) -> u32 {
        self.static_jitter_ms.max(self.jitter.base_jitter_ms())
    }

    pub fn set_target_bitrate(&mut self, target_bitrate: i32) {
        self.tmmbr.set_target(target_bitrate);
    }

    pub fn set_periodic_fir(&mut self, periodic: bool) {
        self.fir.set_periodic(periodic);
    }

    /// Payload bytes accepted since the previous call.
    pub fn take_received_bytes(&mut self) -> u64 {
        std::mem::take(&mut self.bytes_received)
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    pub fn assembler(&self) -> &Assembler {
        &self.assembler
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn num_received(&self) -> u32 {
        self.num_received
    }

    pub fn highest_seq(&self) -> u32 {
        self.seq.highest()
    }

    pub fn base_seq(&self) -> u32 {
        self.base_seq
    }

    /// Packets expected between the base and highest sequence numbers.
    pub fn expected(&self) -> u32 {
        if self.timeline.is_none() {
            return 0;
        }
        self.seq.highest().wrapping_sub(self.base_seq).wrapping_add(1)
    }

    pub fn cumulative_lost(&self) -> i64 {
        self.expected() as i64 - self.num_received as i64
    }

    pub fn prev_expected(&self) -> u32 {
        self.prev_expected
    }

    pub fn prev_received(&self) -> u32 {
        self.prev_received
    }

    pub fn first_rtp_time(&self) -> Option<u32> {
        self.timeline.map(|t| t.first_rtp)
    }

    pub fn first_recv_time_us(&self) -> Option<i64> {
        self.timeline.map(|t| t.first_recv_us)
    }

    pub fn anchor_time_us(&self) -> Option<i64> {
        self.timeline.map(|t| t.anchor_us)
    }

    pub fn anchor_adjustments(&self) -> u32 {
        self.anchor_adjustments
    }

    pub fn underline_delay_ms(&self) -> f64 {
        self.avg_underline_delay_ms
    }

    pub fn rtp_rtcp_gap_ms(&self) -> f64 {
        self.avg_rtp_rtcp_gap_ms
    }

    pub fn last_sender_report(&self) -> Option<SenderReportInfo> {
        self.last_sr
    }

    pub fn jitter(&self) -> &JitterCalc {
        &self.jitter
    }

    pub fn assembler_errors(&self) -> u64 {
        self.assembler_errors
    }

    fn latch(&mut self, packet: &Packet, ext_seq: u32, now_us: i64) -> Timeline {
        let timeline = Timeline {
            first_rtp: packet.rtp_time(),
            first_recv_us: now_us,
            anchor_us: now_us,
        };
        debug!(
            "ssrc {:08x}: first packet seq {} rtp {}",
            self.ssrc, ext_seq, timeline.first_rtp
        );
        self.timeline = Some(timeline);
        self.base_seq = ext_seq;
        self.last_anchor_check_us = now_us;
        self.queue.clear();
        self.jitter.init(
            timeline.first_rtp,
            now_us,
            self.static_jitter_ms as i64 * 1000,
        );
        timeline
    }

    fn next_expected(&self) -> u32 {
        match self.last_dequeued {
            Some(seq) => seq.wrapping_add(1),
            None => self.base_seq,
        }
    }

    fn playout_deadline_us(&self, timeline: &Timeline, rtp_time: u32) -> i64 {
        timeline.anchor_us
            + ticks_to_us(
                rtp_time.wrapping_sub(timeline.first_rtp) as i32 as i64,
                self.clock_rate,
            )
            + self.jitter_time_ms() as i64 * 1000
    }

    fn deliver(&mut self, packet: Packet) {
        let seq = packet.meta.ext_seq;
        self.last_dequeued = Some(seq);
        if let Err(err) = self.assembler.append(packet) {
            self.assembler_errors += 1;
            warn!(
                "ssrc {:08x}: {} dropped packet {}: {}",
                self.ssrc,
                self.assembler.name(),
                seq,
                err
            );
        }
    }

    fn collect(&mut self, units: &mut Vec<AccessUnit>) {
        while let Some(au) = self.assembler.poll() {
            trace!("ssrc {:08x}: {}", self.ssrc, au);
            units.push(au);
        }
        if self.assembler.is_video() && self.assembler.take_fir_request() {
            self.fir.request();
        }
    }

    /// Records the packets between `first_lost` and `head_seq` as NACK FCIs.
    fn record_loss(&mut self, first_lost: u32, head_seq: u32) {
        let missing = head_seq.wrapping_sub(first_lost);
        let max_tracked = NACK_SPAN * NACK_LEDGER_HIGH_WATER as u32;
        let mut first = if missing > max_tracked {
            head_seq.wrapping_sub(max_tracked)
        } else {
            first_lost
        };

        while (head_seq.wrapping_sub(first) as i32) > 0 {
            let span = head_seq.wrapping_sub(first).min(NACK_SPAN);
            let mut bitmask = 0u16;
            for i in 1..span {
                bitmask |= 1 << (i - 1);
            }
            if !self.nack.record(first, bitmask, head_seq) {
                self.exhausted = true;
            }
            first = first.wrapping_add(span);
        }
    }

    fn shed_queue(&mut self) {
        warn!(
            "ssrc {:08x}: reorder queue above {} packets, shedding",
            self.ssrc, QUEUE_HIGH_WATER
        );
        while self.queue.len() > QUEUE_LOW_WATER {
            if let Some(packet) = self.queue.pop_front() {
                self.last_dequeued = Some(packet.meta.ext_seq);
                self.num_received = self.num_received.saturating_sub(1);
            }
        }
        if let Some(seq) = self.last_dequeued {
            self.nack.forget_through(seq);
        }
        self.assembler.on_packet_lost();
        self.exhausted = true;
    }

    fn update_rtp_rtcp_gap(&mut self, rtp_time: u32, now_us: i64) {
        let Some(sr) = self.last_sr else {
            return;
        };
        let elapsed = (now_us - sr.recv_time_us) as i128 * self.clock_rate as i128 / 1_000_000;
        let anchor_rtp = sr.rtp_time.wrapping_add(elapsed as u32);
        let gap = anchor_rtp.wrapping_sub(rtp_time) as i32 as i64;
        if gap < 0 || gap > MAX_RTP_RTCP_GAP_SECS * self.clock_rate as i64 {
            return;
        }
        let gap_ms = gap as f64 * 1000.0 / self.clock_rate as f64;
        self.avg_rtp_rtcp_gap_ms = (self.avg_rtp_rtcp_gap_ms * 15.0 + gap_ms) / 16.0;
    }

    fn update_underline_delay(&mut self, rtp_time: u32, now_us: i64) {
        let Some(timeline) = self.timeline else {
            return;
        };
        let elapsed =
            (now_us - timeline.anchor_us) as i128 * self.clock_rate as i128 / 1_000_000;
        let expected = timeline.first_rtp.wrapping_add(elapsed as i64 as u32);
        let delay_ticks = expected.wrapping_sub(rtp_time) as i32 as f64;
        let delay_ms = delay_ticks * 1000.0 / self.clock_rate as f64;
        self.avg_underline_delay_ms = (self.avg_underline_delay_ms * 15.0 + delay_ms) / 16.0;
    }

    /// Packets consistently arriving ahead of the anchor mean the first
    /// packet was late; pull the anchor back by a quarter of the delay.
    fn maybe_adjust_anchor(&mut self, now_us: i64) {
        if now_us - self.last_anchor_check_us < ANCHOR_CHECK_INTERVAL_US {
            return;
        }
        self.last_anchor_check_us = now_us;
        if self.avg_underline_delay_ms >= ANCHOR_ADJUST_THRESHOLD_MS {
            return;
        }
        let Some(timeline) = self.timeline.as_mut() else {
            return;
        };

        let shift_us = (self.avg_underline_delay_ms * 1000.0 / 4.0) as i64;
        timeline.anchor_us += shift_us;
        let (first_rtp, anchor_us) = (timeline.first_rtp, timeline.anchor_us);

        debug!(
            "ssrc {:08x}: underline delay {:.1}ms, anchor moved {}us",
            self.ssrc, self.avg_underline_delay_ms, shift_us
        );
        self.avg_underline_delay_ms = 0.0;
        self.anchor_adjustments += 1;
        self.jitter
            .init(first_rtp, anchor_us, self.static_jitter_ms as i64 * 1000);
    }
}
