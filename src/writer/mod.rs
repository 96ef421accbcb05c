//! The send side: packetizes samples from a [`MediaSource`] and keeps the
//! sender's half of the RTCP loop.

pub mod limiter;
pub mod media_source;
pub mod packetizer;
pub mod retransmit;

#[cfg(test)]
mod writer_test;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use log::{debug, trace, warn};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{StreamConfig, WriterConfig};
use crate::connection::socket::is_transient;
use crate::connection::RECEIVE_MTU;
use crate::error::{Error, Result};
use crate::marshal::Marshal;
use crate::rtcp;
use crate::rtcp::full_intra_request::FullIntraRequest;
use crate::rtcp::goodbye::Goodbye;
use crate::rtcp::picture_loss_indication::PictureLossIndication;
use crate::rtcp::receiver_report::ReceiverReport;
use crate::rtcp::sender_report::SenderReport;
use crate::rtcp::source_description::SourceDescription;
use crate::rtcp::tmmbr::{TmmbEntry, TmmbNotification, TmmbRequest};
use crate::rtcp::transport_layer_nack::TransportLayerNack;
use limiter::TrafficLimiter;
pub use media_source::{MediaSample, MediaSource};
use packetizer::Packetizer;
pub use packetizer::PayloadMode;
use retransmit::RetransmitRing;

pub const SR_INTERVAL: Duration = Duration::from_secs(3);

const SAMPLE_CHANNEL_SIZE: usize = 4;

/// Cumulative counters of a writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub ssrc: u32,
    pub packets_sent: u32,
    /// Payload octets, as reported in SR.
    pub octets_sent: u32,
    pub retransmitted: u32,
    pub key_frame_requests: u32,
    /// Sequence number the next new packet will carry.
    pub next_seq: u16,
}

enum Command {
    ModerateTraffic(Duration, usize),
    Stats(oneshot::Sender<WriterStats>),
    Stop(oneshot::Sender<()>),
}

/// Sends one media stream over a connected RTP/RTCP socket pair.
///
/// Samples are pulled from the [`MediaSource`] until it reports end of
/// stream; the RTCP side keeps running until [`stop`](Writer::stop).
pub struct Writer {
    ssrc: u32,
    cmd_tx: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Writer {
    /// `rtp` and `rtcp` must already be connected to the remote side, as
    /// [`make_rtp_socket_pair`](crate::connection::make_rtp_socket_pair)
    /// leaves them.
    pub fn start(
        rtp: std::net::UdpSocket,
        rtcp: std::net::UdpSocket,
        source: Arc<dyn MediaSource>,
        config: WriterConfig,
        stream_config: StreamConfig,
    ) -> Result<Self> {
        let remote = rtp.peer_addr()?;
        rtcp.peer_addr()?;
        rtp.set_nonblocking(true)?;
        rtcp.set_nonblocking(true)?;
        let rtp = UdpSocket::from_std(rtp)?;
        let rtcp = UdpSocket::from_std(rtcp)?;

        let ssrc = stream_config.resolve_self_ssrc();
        let packetizer = Packetizer::new(
            config.mode,
            config.payload_type,
            ssrc,
            config.mtu,
            stream_config.cvo_extension_id,
        );
        debug!(
            "writer {:08x}: {:?} pt {} to {}",
            ssrc, config.mode, config.payload_type, remote
        );

        let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_CHANNEL_SIZE);
        let puller = tokio::spawn(pull_samples(Arc::clone(&source), sample_tx));

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let writer_loop = WriterLoop {
            ssrc,
            cname: stream_config.cname,
            rtp,
            rtcp,
            source,
            packetizer,
            ring: RetransmitRing::new(),
            limiter: TrafficLimiter::new(),
            stats: WriterStats {
                ssrc,
                ..Default::default()
            },
            last_rtp_time: None,
            last_tmmbr: None,
            last_fir_seq: None,
            eos: false,
            rtp_failed: false,
        };
        let task = tokio::spawn(async move {
            writer_loop.run(cmd_rx, sample_rx, puller).await;
        });

        Ok(Writer {
            ssrc,
            cmd_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Caps the bytes sent within any `sample_period`; packets beyond the cap
    /// wait for the next period. A zero period or limit disables the cap.
    pub fn moderate_instant_traffic(&self, sample_period: Duration, limit_bytes: usize) -> Result<()> {
        self.cmd_tx
            .send(Command::ModerateTraffic(sample_period, limit_bytes))
            .map_err(|_| Error::WriterStopped)
    }

    pub async fn stats(&self) -> Result<WriterStats> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Stats(reply_tx))
            .map_err(|_| Error::WriterStopped)?;
        reply_rx.await.map_err(|_| Error::WriterStopped)
    }

    /// Sends BYE and stops. Calling it again is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Stop(reply_tx)).is_ok() {
            let _ = reply_rx.await;
        }
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!("writer {:08x} ended abnormally: {}", self.ssrc, err);
            }
        }
        Ok(())
    }
}

async fn pull_samples(
    source: Arc<dyn MediaSource>,
    samples: mpsc::Sender<Result<Option<MediaSample>>>,
) {
    loop {
        let sample = source.read().await;
        let done = !matches!(sample, Ok(Some(_)));
        if samples.send(sample).await.is_err() || done {
            return;
        }
    }
}

struct WriterLoop {
    ssrc: u32,
    cname: String,
    rtp: UdpSocket,
    rtcp: UdpSocket,
    source: Arc<dyn MediaSource>,
    packetizer: Packetizer,
    ring: RetransmitRing,
    limiter: TrafficLimiter,
    stats: WriterStats,
    last_rtp_time: Option<u32>,
    /// Bounding tuple echoed in TMMBN, keyed by the requester's SSRC.
    last_tmmbr: Option<TmmbEntry>,
    last_fir_seq: Option<(u32, u8)>,
    eos: bool,
    rtp_failed: bool,
}

impl WriterLoop {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut sample_rx: mpsc::Receiver<Result<Option<MediaSample>>>,
        puller: JoinHandle<()>,
    ) {
        let mut sr_ticker = tokio::time::interval_at(Instant::now() + SR_INTERVAL, SR_INTERVAL);
        let mut buf = vec![0u8; RECEIVE_MTU];
        let mut rtcp_failed = false;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::ModerateTraffic(period, limit)) => {
                            self.limiter.moderate_instant_traffic(period, limit);
                        }
                        Some(Command::Stats(reply)) => {
                            self.stats.next_seq = self.packetizer.next_ext_seq() as u16;
                            let _ = reply.send(self.stats);
                        }
                        Some(Command::Stop(reply)) => {
                            self.send_bye().await;
                            let _ = reply.send(());
                            break;
                        }
                        None => {
                            self.send_bye().await;
                            break;
                        }
                    }
                }
                _ = sr_ticker.tick() => {
                    self.send_sender_report().await;
                }
                res = self.rtcp.recv(&mut buf), if !rtcp_failed => {
                    match res {
                        Ok(n) => self.on_rtcp(Bytes::copy_from_slice(&buf[..n])).await,
                        Err(err) if is_transient(&err) => {
                            trace!("writer {:08x}: RTCP recv: {}", self.ssrc, err);
                        }
                        Err(err) => {
                            warn!("writer {:08x}: RTCP socket failed: {}", self.ssrc, err);
                            rtcp_failed = true;
                        }
                    }
                }
                sample = sample_rx.recv(), if !self.eos => {
                    match sample {
                        Some(Ok(Some(sample))) => self.send_sample(sample).await,
                        Some(Ok(None)) | None => {
                            debug!("writer {:08x}: end of stream", self.ssrc);
                            self.eos = true;
                        }
                        Some(Err(err)) => {
                            warn!("writer {:08x}: media source failed: {}", self.ssrc, err);
                            self.eos = true;
                        }
                    }
                }
            }
        }

        puller.abort();
        let _ = puller.await;
    }

    async fn send_sample(&mut self, sample: MediaSample) {
        if self.rtp_failed {
            return;
        }
        let packets = match self.packetizer.packetize(&sample) {
            Ok(packets) => packets,
            Err(err) => {
                warn!("writer {:08x}: dropping sample: {}", self.ssrc, err);
                return;
            }
        };

        for packet in packets {
            let raw = match packet.marshal() {
                Ok(raw) => raw,
                Err(err) => {
                    warn!("writer {:08x}: failed to marshal RTP: {}", self.ssrc, err);
                    continue;
                }
            };
            if let Some(delay) = self.limiter.reserve(Instant::now(), raw.len()) {
                trace!("writer {:08x}: holding packet for {:?}", self.ssrc, delay);
                tokio::time::sleep(delay).await;
            }

            match self.rtp.send(&raw).await {
                Ok(_) => {}
                Err(err) if is_transient(&err) => {
                    debug!("writer {:08x}: RTP send: {}", self.ssrc, err);
                }
                Err(err) => {
                    warn!("writer {:08x}: RTP socket failed: {}", self.ssrc, err);
                    self.rtp_failed = true;
                    return;
                }
            }

            self.stats.packets_sent = self.stats.packets_sent.wrapping_add(1);
            self.stats.octets_sent = self
                .stats
                .octets_sent
                .wrapping_add(packet.payload.len() as u32);
            self.last_rtp_time = Some(packet.header.timestamp);
            self.ring.add(packet.meta.ext_seq, raw);
        }
    }

    fn sender_report(&self) -> Box<dyn rtcp::Packet + Send + Sync> {
        match self.last_rtp_time {
            Some(rtp_time) => Box::new(SenderReport {
                ssrc: self.ssrc,
                ntp_time: unix_to_ntp(SystemTime::now()),
                rtp_time,
                packet_count: self.stats.packets_sent,
                octet_count: self.stats.octets_sent,
                reports: vec![],
            }),
            None => Box::new(ReceiverReport {
                ssrc: self.ssrc,
                reports: vec![],
            }),
        }
    }

    async fn send_sender_report(&mut self) {
        if self.last_rtp_time.is_none() {
            return;
        }
        let mut packets: Vec<Box<dyn rtcp::Packet + Send + Sync>> = vec![
            self.sender_report(),
            Box::new(SourceDescription::with_cname(self.ssrc, &self.cname)),
        ];
        if let Some(entry) = &self.last_tmmbr {
            packets.push(Box::new(TmmbNotification {
                sender_ssrc: self.ssrc,
                media_ssrc: 0,
                entries: vec![*entry],
            }));
        }
        self.send_rtcp(&packets).await;
    }

    async fn send_bye(&mut self) {
        let packets: Vec<Box<dyn rtcp::Packet + Send + Sync>> = vec![
            self.sender_report(),
            Box::new(SourceDescription::with_cname(self.ssrc, &self.cname)),
            Box::new(Goodbye {
                sources: vec![self.ssrc],
                reason: Bytes::new(),
            }),
        ];
        self.send_rtcp(&packets).await;
        debug!(
            "writer {:08x}: BYE after {} packets",
            self.ssrc, self.stats.packets_sent
        );
    }

    async fn send_rtcp(&mut self, packets: &[Box<dyn rtcp::Packet + Send + Sync>]) {
        let raw = match rtcp::marshal(packets) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("writer {:08x}: failed to marshal RTCP: {}", self.ssrc, err);
                return;
            }
        };
        if let Err(err) = self.rtcp.send(&raw).await {
            debug!("writer {:08x}: RTCP send: {}", self.ssrc, err);
        }
    }

    async fn on_rtcp(&mut self, data: Bytes) {
        let packets = match rtcp::unmarshal(&mut data.clone()) {
            Ok(packets) => packets,
            Err(err) => {
                trace!("writer {:08x}: dropping RTCP: {}", self.ssrc, err);
                return;
            }
        };

        let ssrc = self.ssrc;
        for packet in packets {
            let any = packet.as_any();
            if let Some(nack) = any.downcast_ref::<TransportLayerNack>() {
                if nack.media_ssrc == self.ssrc {
                    let lost: Vec<u16> = nack.nacks.iter().flat_map(|n| n.packet_list()).collect();
                    self.retransmit(&lost).await;
                }
            } else if let Some(fir) = any.downcast_ref::<FullIntraRequest>() {
                for entry in fir.fir.iter().filter(|e| e.ssrc == ssrc) {
                    // a repeated sequence number is a retransmission of the same request
                    let key = (fir.sender_ssrc, entry.sequence_number);
                    if self.last_fir_seq != Some(key) {
                        self.last_fir_seq = Some(key);
                        self.request_key_frame();
                    }
                }
            } else if let Some(pli) = any.downcast_ref::<PictureLossIndication>() {
                if pli.media_ssrc == self.ssrc {
                    self.request_key_frame();
                }
            } else if let Some(tmmbr) = any.downcast_ref::<TmmbRequest>() {
                for entry in tmmbr.entries.iter().filter(|e| e.ssrc == ssrc) {
                    let bitrate = entry.bitrate();
                    debug!(
                        "writer {:08x}: TMMBR {} bps from {:08x}",
                        self.ssrc, bitrate, tmmbr.sender_ssrc
                    );
                    self.source.set_target_bitrate(bitrate);
                    self.last_tmmbr = Some(TmmbEntry {
                        ssrc: tmmbr.sender_ssrc,
                        ..*entry
                    });
                }
            } else if let Some(rr) = any.downcast_ref::<ReceiverReport>() {
                for block in rr.reports.iter().filter(|b| b.ssrc == ssrc) {
                    trace!(
                        "writer {:08x}: receiver {:08x} lost {}/256, jitter {}",
                        self.ssrc,
                        rr.ssrc,
                        block.fraction_lost,
                        block.jitter
                    );
                }
            }
        }
    }

    fn request_key_frame(&mut self) {
        self.stats.key_frame_requests += 1;
        self.source.request_key_frame();
    }

    async fn retransmit(&mut self, lost: &[u16]) {
        for &seq in lost {
            let Some(raw) = self.ring.get(seq).cloned() else {
                trace!("writer {:08x}: {} no longer retransmittable", self.ssrc, seq);
                continue;
            };
            match self.rtp.send(&raw).await {
                Ok(_) => self.stats.retransmitted += 1,
                Err(err) => debug!("writer {:08x}: retransmit {}: {}", self.ssrc, seq, err),
            }
        }
    }
}

/// 64-bit NTP timestamp of `st`.
pub fn unix_to_ntp(st: SystemTime) -> u64 {
    let u = st
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_nanos() as u64;
    // seconds between 1900 and 1970
    let s = u / 1_000_000_000 + 0x83AA_7E80;
    let f = ((u % 1_000_000_000) << 32) / 1_000_000_000;

    (s << 32) | f
}
