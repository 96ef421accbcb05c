//! Messages a [`Connection`](crate::connection::Connection) sends to its owner.

use std::fmt;

use tokio::sync::mpsc;

use crate::assembler::AccessUnit;
use crate::error::Error;
use crate::rtcp::reception_report::ReceptionReport;

/// Channel end handed to `add_stream`. Unbounded so the receive loop never
/// waits on its owner.
pub type NotifySender = mpsc::UnboundedSender<Notify>;
pub type NotifyReceiver = mpsc::UnboundedReceiver<Notify>;

/// Control traffic received from the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpEvent {
    SenderReport {
        ssrc: u32,
        recv_time_us: i64,
        rtp_time: u32,
        ntp_time: u64,
        packet_count: u32,
        octet_count: u32,
    },
    ReceiverReport {
        ssrc: u32,
        recv_time_us: i64,
        blocks: Vec<ReceptionReport>,
    },
    Fir {
        sender_ssrc: u32,
        media_ssrc: u32,
        seq: u8,
    },
    Pli {
        sender_ssrc: u32,
        media_ssrc: u32,
    },
    Nack {
        sender_ssrc: u32,
        media_ssrc: u32,
        lost: Vec<u16>,
    },
    Tmmbr {
        sender_ssrc: u32,
        media_ssrc: u32,
        bitrate: u64,
    },
    Tmmbn {
        sender_ssrc: u32,
        bitrate: u64,
    },
}

impl RtcpEvent {
    /// RTCP packet type the event was carried in.
    pub fn payload_type(&self) -> u8 {
        match self {
            RtcpEvent::SenderReport { .. } => 200,
            RtcpEvent::ReceiverReport { .. } => 201,
            RtcpEvent::Nack { .. } | RtcpEvent::Tmmbr { .. } | RtcpEvent::Tmmbn { .. } => 205,
            RtcpEvent::Fir { .. } | RtcpEvent::Pli { .. } => 206,
        }
    }
}

/// Periodic reception statistics for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QualityReport {
    pub ssrc: u32,
    /// Payload bits per second over the last interval.
    pub bit_rate: u64,
    pub highest_seq_num: u32,
    pub base_seq_num: u32,
    pub num_buf_recv: u32,
    pub rtp_jitter_time_ms: u32,
    pub rtp_rtcpsr_time_gap_ms: i64,
}

#[derive(Debug)]
pub enum Notify {
    AccessUnit { track: usize, unit: AccessUnit },
    Rtcp { track: usize, event: RtcpEvent },
    Quality { track: usize, report: QualityReport },
    /// The stream's sockets failed; it has been marked dead.
    StreamError { track: usize, error: Error },
    ResourceExhaustion { track: usize, what: &'static str },
    Bye { track: usize, ssrc: u32 },
}

impl Notify {
    pub fn track(&self) -> usize {
        match self {
            Notify::AccessUnit { track, .. }
            | Notify::Rtcp { track, .. }
            | Notify::Quality { track, .. }
            | Notify::StreamError { track, .. }
            | Notify::ResourceExhaustion { track, .. }
            | Notify::Bye { track, .. } => *track,
        }
    }
}

impl fmt::Display for Notify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notify::AccessUnit { track, unit } => write!(f, "track {track}: {unit}"),
            Notify::Rtcp { track, event } => {
                write!(f, "track {track}: RTCP {}", event.payload_type())
            }
            Notify::Quality { track, report } => write!(
                f,
                "track {track}: {} bps, jitter {}ms",
                report.bit_rate, report.rtp_jitter_time_ms
            ),
            Notify::StreamError { track, error } => write!(f, "track {track}: {error}"),
            Notify::ResourceExhaustion { track, what } => {
                write!(f, "track {track}: {what} exhausted")
            }
            Notify::Bye { track, ssrc } => write!(f, "track {track}: BYE from {ssrc:08x}"),
        }
    }
}
