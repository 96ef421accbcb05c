use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, trace, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::socket::is_transient;
use super::{Event, QUALITY_INTERVAL_US, RECEIVE_MTU, RTCP_INTERVAL_US};
use crate::assembler::Assembler;
use crate::config::{ConnectionConfig, StreamConfig};
use crate::error::{Error, Result};
use crate::marshal::Unmarshal;
use crate::notify::{Notify, NotifySender, QualityReport, RtcpEvent};
use crate::packet::Packet;
use crate::rtcp;
use crate::rtcp::full_intra_request::FullIntraRequest;
use crate::rtcp::goodbye::Goodbye;
use crate::rtcp::picture_loss_indication::PictureLossIndication;
use crate::rtcp::receiver_report::ReceiverReport;
use crate::rtcp::sender_report::SenderReport;
use crate::rtcp::source_description::SourceDescription;
use crate::rtcp::tmmbr::{TmmbNotification, TmmbRequest};
use crate::rtcp::transport_layer_nack::TransportLayerNack;
use crate::session_description::TrackDescription;
use crate::source::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Live,
    /// The sender said BYE; RTP is ignored until the stream is seeked.
    Draining,
    Dead,
}

/// One track's sockets and receive state, owned by the connection loop.
pub(crate) struct Stream {
    pub(crate) id: u64,
    track: usize,
    track_desc: TrackDescription,
    connection_config: ConnectionConfig,
    config: StreamConfig,
    self_ssrc: u32,

    rtp_socket: Option<Arc<UdpSocket>>,
    rtcp_socket: Option<Arc<UdpSocket>>,
    rtcp_connected: bool,
    rtcp_peer: Option<SocketAddr>,
    readers: Vec<JoinHandle<()>>,

    notify: NotifySender,
    state: StreamState,
    first_ssrc: Option<u32>,
    source: Option<Source>,
    last_rtcp_us: i64,
    last_quality_us: i64,
    foreign_packets: u64,
}

impl Stream {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        track: usize,
        track_desc: TrackDescription,
        connection_config: ConnectionConfig,
        config: StreamConfig,
        sockets: Option<(UdpSocket, UdpSocket)>,
        notify: NotifySender,
        now_us: i64,
    ) -> Result<Self> {
        // surface unsupported encodings now rather than on the first packet
        Assembler::for_track(&track_desc, &connection_config)?;

        let (rtp_socket, rtcp_socket) = match sockets {
            Some((rtp, rtcp)) => (Some(Arc::new(rtp)), Some(Arc::new(rtcp))),
            None => (None, None),
        };
        let rtcp_peer = rtcp_socket.as_ref().and_then(|s| s.peer_addr().ok());
        let self_ssrc = config.resolve_self_ssrc();

        debug!(
            "track {}: {} stream, self ssrc {:08x}",
            track,
            track_desc.encoding_name,
            self_ssrc
        );

        Ok(Stream {
            id,
            track,
            track_desc,
            connection_config,
            config,
            self_ssrc,
            rtp_socket,
            rtcp_socket,
            rtcp_connected: rtcp_peer.is_some(),
            rtcp_peer,
            readers: vec![],
            notify,
            state: StreamState::Live,
            first_ssrc: None,
            source: None,
            last_rtcp_us: now_us,
            last_quality_us: now_us,
            foreign_packets: 0,
        })
    }

    pub(crate) fn start(&mut self, events: mpsc::Sender<Event>) {
        for socket in [&self.rtp_socket, &self.rtcp_socket].into_iter().flatten() {
            let socket = Arc::clone(socket);
            let events = events.clone();
            let stream_id = self.id;
            self.readers.push(tokio::spawn(async move {
                read_loop(socket, stream_id, events).await;
            }));
        }
    }

    pub(crate) fn alarm_at_us(&self) -> Option<i64> {
        if self.state != StreamState::Live {
            return None;
        }
        self.source.as_ref().and_then(|s| s.alarm_at_us())
    }

    pub(crate) async fn on_datagram(&mut self, data: Bytes, from: Option<SocketAddr>, now_us: i64) {
        if self.state == StreamState::Dead {
            return;
        }

        let result = if is_rtcp(&data) {
            if let Some(from) = from {
                if !self.rtcp_connected {
                    self.rtcp_peer = Some(from);
                }
            }
            self.on_rtcp(data, now_us)
        } else {
            if let Some(from) = from {
                if !self.rtcp_connected && self.rtcp_peer.is_none() {
                    self.rtcp_peer = Some(SocketAddr::new(from.ip(), from.port().wrapping_add(1)));
                }
            }
            self.on_rtp(data, now_us)
        };

        if let Err(err) = result {
            if err.is_per_packet() {
                trace!("track {}: dropped packet: {}", self.track, err);
            } else {
                warn!("track {}: {}", self.track, err);
            }
        }
    }

    fn on_rtp(&mut self, data: Bytes, now_us: i64) -> Result<()> {
        if data.len() < 2 || data[0] >> 6 != 2 {
            return Err(Error::MalformedPacket("not an RTP version 2 datagram"));
        }
        if self.state != StreamState::Live {
            return Ok(());
        }

        let mut packet = Packet::unmarshal(&mut data.clone())?;
        if let Some(id) = self.config.cvo_extension_id {
            packet.meta.cvo = packet.parse_cvo(id);
        }

        let ssrc = packet.ssrc();
        match self.first_ssrc {
            None => {
                debug!("track {}: latched ssrc {:08x}", self.track, ssrc);
                self.first_ssrc = Some(ssrc);
            }
            Some(first) if first != ssrc => {
                self.foreign_packets += 1;
                return Err(Error::UnknownSsrc(ssrc));
            }
            Some(_) => {}
        }

        if self.source.is_none() {
            self.source = Some(Source::new(
                ssrc,
                self.track_desc.clock_rate_hz,
                Assembler::for_track(&self.track_desc, &self.connection_config)?,
                self.config.static_jitter_time_ms,
                self.connection_config.regularly_request_fir,
                self.config.target_bitrate,
            ));
        }
        if let Some(source) = self.source.as_mut() {
            source.queue_packet(packet, now_us)?;
        }
        self.pump(now_us);
        Ok(())
    }

    fn on_rtcp(&mut self, data: Bytes, now_us: i64) -> Result<()> {
        let packets = rtcp::unmarshal(&mut data.clone())?;

        for packet in packets {
            let any = packet.as_any();
            if let Some(sr) = any.downcast_ref::<SenderReport>() {
                if let Some(source) = self.source.as_mut().filter(|s| s.ssrc() == sr.ssrc) {
                    source.on_sender_report(sr.rtp_time, sr.ntp_time, now_us);
                }
                self.notify_rtcp(RtcpEvent::SenderReport {
                    ssrc: sr.ssrc,
                    recv_time_us: now_us,
                    rtp_time: sr.rtp_time,
                    ntp_time: sr.ntp_time,
                    packet_count: sr.packet_count,
                    octet_count: sr.octet_count,
                });
                if !sr.reports.is_empty() {
                    self.notify_rtcp(RtcpEvent::ReceiverReport {
                        ssrc: sr.ssrc,
                        recv_time_us: now_us,
                        blocks: sr.reports.clone(),
                    });
                }
            } else if let Some(rr) = any.downcast_ref::<ReceiverReport>() {
                self.notify_rtcp(RtcpEvent::ReceiverReport {
                    ssrc: rr.ssrc,
                    recv_time_us: now_us,
                    blocks: rr.reports.clone(),
                });
            } else if let Some(sdes) = any.downcast_ref::<SourceDescription>() {
                if let Some(cname) = self.first_ssrc.and_then(|ssrc| sdes.cname(ssrc)) {
                    trace!("track {}: CNAME {:?}", self.track, cname);
                }
            } else if let Some(bye) = any.downcast_ref::<Goodbye>() {
                if let Some(ssrc) = self.first_ssrc.filter(|s| bye.sources.contains(s)) {
                    self.on_bye(ssrc);
                }
            } else if let Some(nack) = any.downcast_ref::<TransportLayerNack>() {
                self.notify_rtcp(RtcpEvent::Nack {
                    sender_ssrc: nack.sender_ssrc,
                    media_ssrc: nack.media_ssrc,
                    lost: nack.nacks.iter().flat_map(|n| n.packet_list()).collect(),
                });
            } else if let Some(fir) = any.downcast_ref::<FullIntraRequest>() {
                for entry in &fir.fir {
                    self.notify_rtcp(RtcpEvent::Fir {
                        sender_ssrc: fir.sender_ssrc,
                        media_ssrc: entry.ssrc,
                        seq: entry.sequence_number,
                    });
                }
            } else if let Some(pli) = any.downcast_ref::<PictureLossIndication>() {
                self.notify_rtcp(RtcpEvent::Pli {
                    sender_ssrc: pli.sender_ssrc,
                    media_ssrc: pli.media_ssrc,
                });
            } else if let Some(tmmbr) = any.downcast_ref::<TmmbRequest>() {
                for entry in &tmmbr.entries {
                    self.notify_rtcp(RtcpEvent::Tmmbr {
                        sender_ssrc: tmmbr.sender_ssrc,
                        media_ssrc: entry.ssrc,
                        bitrate: entry.bitrate(),
                    });
                }
            } else if let Some(tmmbn) = any.downcast_ref::<TmmbNotification>() {
                for entry in &tmmbn.entries {
                    self.notify_rtcp(RtcpEvent::Tmmbn {
                        sender_ssrc: tmmbn.sender_ssrc,
                        bitrate: entry.bitrate(),
                    });
                }
            } else {
                trace!(
                    "track {}: ignoring RTCP {}",
                    self.track,
                    packet.header().packet_type
                );
            }
        }
        Ok(())
    }

    fn on_bye(&mut self, ssrc: u32) {
        debug!("track {}: BYE from {:08x}", self.track, ssrc);
        if let Some(mut source) = self.source.take() {
            for unit in source.on_bye() {
                self.send_notify(Notify::AccessUnit {
                    track: self.track,
                    unit,
                });
            }
        }
        self.first_ssrc = None;
        self.state = StreamState::Draining;
        self.send_notify(Notify::Bye {
            track: self.track,
            ssrc,
        });
    }

    /// Drains whatever the source can release at `now_us`.
    fn pump(&mut self, now_us: i64) {
        let Some(source) = self.source.as_mut() else {
            return;
        };
        let polled = source.poll(now_us);
        for unit in polled.access_units {
            self.send_notify(Notify::AccessUnit {
                track: self.track,
                unit,
            });
        }
        if polled.exhausted {
            self.send_notify(Notify::ResourceExhaustion {
                track: self.track,
                what: "jitter buffer",
            });
        }
    }

    pub(crate) fn on_alarm(&mut self, now_us: i64) {
        if self.state != StreamState::Live {
            return;
        }
        let due = self
            .source
            .as_mut()
            .map_or(false, |s| s.take_due_alarm(now_us));
        if due {
            self.pump(now_us);
        }
    }

    pub(crate) async fn on_tick(&mut self, now_us: i64) {
        if self.state != StreamState::Live {
            return;
        }
        self.on_alarm(now_us);
        self.pump(now_us);

        if now_us - self.last_rtcp_us >= RTCP_INTERVAL_US {
            self.last_rtcp_us = now_us;
            let cname = self.config.cname.clone();
            let self_ssrc = self.self_ssrc;
            if let Some(source) = self.source.as_mut() {
                let packets = source.build_rtcp(self_ssrc, &cname, now_us);
                self.send_rtcp(&packets).await;
            }
        }

        if now_us - self.last_quality_us >= QUALITY_INTERVAL_US {
            let elapsed_us = now_us - self.last_quality_us;
            self.last_quality_us = now_us;
            if let Some(source) = self.source.as_mut() {
                let bytes = source.take_received_bytes();
                let quality = source.quality();
                let report = QualityReport {
                    ssrc: source.ssrc(),
                    bit_rate: bytes * 8 * 1_000_000 / elapsed_us.max(1) as u64,
                    highest_seq_num: quality.highest_seq,
                    base_seq_num: quality.base_seq,
                    num_buf_recv: quality.num_received,
                    rtp_jitter_time_ms: quality.jitter_time_ms,
                    rtp_rtcpsr_time_gap_ms: quality.rtp_rtcp_gap_ms,
                };
                self.send_notify(Notify::Quality {
                    track: self.track,
                    report,
                });
            }
        }
    }

    async fn send_rtcp(&mut self, packets: &[Box<dyn rtcp::Packet + Send + Sync>]) {
        let Some(socket) = self.rtcp_socket.clone() else {
            trace!("track {}: no RTCP socket, report dropped", self.track);
            return;
        };
        let raw = match rtcp::marshal(packets) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("track {}: failed to marshal RTCP: {}", self.track, err);
                return;
            }
        };

        let result = if self.rtcp_connected {
            socket.send(&raw).await
        } else if let Some(peer) = self.rtcp_peer {
            socket.send_to(&raw, peer).await
        } else {
            trace!("track {}: RTCP peer unknown", self.track);
            return;
        };

        match result {
            Ok(_) => {}
            Err(err) if is_transient(&err) => {
                debug!("track {}: RTCP send: {}", self.track, err);
            }
            Err(err) => self.on_socket_error(err),
        }
    }

    pub(crate) fn on_socket_error(&mut self, err: io::Error) {
        if self.state == StreamState::Dead {
            return;
        }
        warn!("track {}: socket error: {}", self.track, err);
        self.state = StreamState::Dead;
        self.send_notify(Notify::StreamError {
            track: self.track,
            error: Error::SocketIo(err),
        });
    }

    /// Time-reset: the next packet starts a new timeline.
    pub(crate) fn seek(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.time_reset();
        }
        if self.state == StreamState::Draining {
            self.state = StreamState::Live;
        }
    }

    /// Stops the readers and releases both sockets.
    pub(crate) async fn close(&mut self) {
        self.state = StreamState::Dead;
        for reader in self.readers.drain(..) {
            reader.abort();
            let _ = reader.await;
        }
        self.rtp_socket = None;
        self.rtcp_socket = None;
        if self.foreign_packets > 0 {
            debug!(
                "track {}: {} packets from foreign ssrcs dropped",
                self.track, self.foreign_packets
            );
        }
    }

    fn notify_rtcp(&self, event: RtcpEvent) {
        self.send_notify(Notify::Rtcp {
            track: self.track,
            event,
        });
    }

    fn send_notify(&self, notify: Notify) {
        if self.notify.send(notify).is_err() {
            trace!("track {}: notify receiver gone", self.track);
        }
    }
}

/// RTCP packet types occupy 200..=207 in the second byte.
fn is_rtcp(data: &[u8]) -> bool {
    data.len() >= 2 && (200..=207).contains(&data[1])
}

async fn read_loop(socket: Arc<UdpSocket>, stream_id: u64, events: mpsc::Sender<Event>) {
    let mut buf = vec![0u8; RECEIVE_MTU];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => {
                let event = Event::Datagram {
                    stream_id,
                    from: Some(from),
                    data: Bytes::copy_from_slice(&buf[..n]),
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            Err(err) if is_transient(&err) => {
                trace!("stream {}: {}", stream_id, err);
            }
            Err(error) => {
                let _ = events.send(Event::SocketError { stream_id, error }).await;
                return;
            }
        }
    }
}
