use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::time::timeout;

use super::*;
use crate::connection::{make_port_pair, make_rtp_socket_pair, PortPair};
use crate::marshal::Unmarshal;
use crate::packet::Packet;
use crate::rtcp::full_intra_request::FirEntry;
use crate::rtcp::transport_layer_nack::NackPair;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const WRITER_SSRC: u32 = 0x5151_0001;
const REMOTE_SSRC: u32 = 0x7272_0002;

#[derive(Default)]
struct QueueSource {
    samples: StdMutex<VecDeque<MediaSample>>,
    /// Keep `read` pending once the queue is empty instead of reporting EOS.
    hold_open: bool,
    key_frame_requests: AtomicU32,
    target_bitrate: AtomicU64,
}

impl QueueSource {
    fn new(samples: Vec<MediaSample>, hold_open: bool) -> Arc<Self> {
        Arc::new(QueueSource {
            samples: StdMutex::new(samples.into()),
            hold_open,
            ..Default::default()
        })
    }
}

#[async_trait]
impl MediaSource for QueueSource {
    async fn read(&self) -> Result<Option<MediaSample>> {
        let next = self.samples.lock().unwrap().pop_front();
        match next {
            Some(sample) => Ok(Some(sample)),
            None if self.hold_open => std::future::pending().await,
            None => Ok(None),
        }
    }

    fn request_key_frame(&self) {
        self.key_frame_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn set_target_bitrate(&self, bitrate: u64) {
        self.target_bitrate.store(bitrate, Ordering::SeqCst);
    }
}

fn amr_sample(i: i64) -> MediaSample {
    // one 12.2 kbit/s frame in storage format
    let mut frame = vec![0x3C];
    frame.extend([i as u8; 31]);
    MediaSample::new(Bytes::from(frame), i * 20_000)
}

struct Remote {
    rtp: UdpSocket,
    rtcp: UdpSocket,
    writer_rtcp: SocketAddr,
}

/// A remote pair and a writer-side pair connected to it.
fn socket_pairs() -> Result<(Remote, PortPair)> {
    let remote = make_port_pair()?;
    let local = make_rtp_socket_pair(LOCALHOST, LOCALHOST, remote.rtp_port, -1, 0)?;
    remote.rtp.set_nonblocking(true)?;
    remote.rtcp.set_nonblocking(true)?;
    let writer_rtcp = SocketAddr::new(LOCALHOST, local.rtcp_port());
    Ok((
        Remote {
            rtp: UdpSocket::from_std(remote.rtp)?,
            rtcp: UdpSocket::from_std(remote.rtcp)?,
            writer_rtcp,
        },
        local,
    ))
}

async fn recv(socket: &UdpSocket, secs: u64) -> Bytes {
    let mut buf = vec![0u8; RECEIVE_MTU];
    match timeout(Duration::from_secs(secs), socket.recv(&mut buf)).await {
        Ok(Ok(n)) => Bytes::copy_from_slice(&buf[..n]),
        Ok(Err(err)) => panic!("recv failed: {err}"),
        Err(_) => panic!("nothing received within {secs}s"),
    }
}

async fn send_rtcp(remote: &Remote, packet: Box<dyn rtcp::Packet + Send + Sync>) -> Result<()> {
    let raw = rtcp::marshal(&[packet])?;
    remote.rtcp.send_to(&raw, remote.writer_rtcp).await?;
    Ok(())
}

fn find<T: 'static>(packets: &[Box<dyn rtcp::Packet + Send + Sync>]) -> Option<&T> {
    packets.iter().find_map(|p| p.as_any().downcast_ref::<T>())
}

#[tokio::test]
async fn test_writer_sends_rtp_and_serves_feedback() -> Result<()> {
    let (remote, local) = socket_pairs()?;
    let source = QueueSource::new((0..3).map(amr_sample).collect(), true);
    let writer = Writer::start(
        local.rtp,
        local.rtcp,
        source.clone(),
        WriterConfig::new(PayloadMode::AmrNb, 97),
        StreamConfig::default()
            .with_self_ssrc(WRITER_SSRC)
            .with_cname("writer"),
    )?;

    let mut sent = vec![];
    for _ in 0..3 {
        sent.push(recv(&remote.rtp, 3).await);
    }
    let packets = sent
        .iter()
        .map(|raw| Packet::unmarshal(&mut raw.clone()))
        .collect::<Result<Vec<_>>>()?;
    for (i, p) in packets.iter().enumerate() {
        assert_eq!(p.header.payload_type, 97);
        assert_eq!(p.header.ssrc, WRITER_SSRC);
        assert_eq!(
            p.header.sequence_number,
            packets[0].header.sequence_number.wrapping_add(i as u16)
        );
        assert_eq!(
            p.header.timestamp,
            packets[0].header.timestamp.wrapping_add(i as u32 * 160)
        );
        assert_eq!(p.payload.len(), 33);
    }

    // NACK for the middle packet brings back the identical datagram
    send_rtcp(
        &remote,
        Box::new(TransportLayerNack {
            sender_ssrc: REMOTE_SSRC,
            media_ssrc: WRITER_SSRC,
            nacks: vec![NackPair::new(packets[1].header.sequence_number)],
        }),
    )
    .await?;
    assert_eq!(recv(&remote.rtp, 3).await, sent[1]);

    send_rtcp(
        &remote,
        Box::new(TmmbRequest {
            sender_ssrc: REMOTE_SSRC,
            media_ssrc: 0,
            entries: vec![TmmbEntry::from_bitrate(WRITER_SSRC, 256_000)],
        }),
    )
    .await?;

    // the periodic report carries the counters and echoes the TMMBR
    let report = rtcp::unmarshal(&mut recv(&remote.rtcp, 5).await)?;
    let sr = find::<SenderReport>(&report).expect("SR");
    assert_eq!(sr.ssrc, WRITER_SSRC);
    assert_eq!(sr.packet_count, 3);
    assert_eq!(sr.octet_count, 99);
    assert_eq!(sr.rtp_time, packets[2].header.timestamp);
    let sdes = find::<SourceDescription>(&report).expect("SDES");
    assert_eq!(
        sdes.cname(WRITER_SSRC).map(|c| c.as_ref()),
        Some(&b"writer"[..])
    );
    let tmmbn = find::<TmmbNotification>(&report).expect("TMMBN");
    assert_eq!(tmmbn.entries[0].ssrc, REMOTE_SSRC);
    assert_eq!(tmmbn.entries[0].bitrate(), 256_000);
    assert_eq!(source.target_bitrate.load(Ordering::SeqCst), 256_000);

    let stats = writer.stats().await?;
    assert_eq!(stats.packets_sent, 3);
    assert_eq!(stats.retransmitted, 1);
    assert_eq!(
        stats.next_seq,
        packets[2].header.sequence_number.wrapping_add(1)
    );

    writer.stop().await
}

#[tokio::test]
async fn test_key_frame_requests() -> Result<()> {
    let (remote, local) = socket_pairs()?;
    let source = QueueSource::new(vec![], true);
    let writer = Writer::start(
        local.rtp,
        local.rtcp,
        source.clone(),
        WriterConfig::new(PayloadMode::H264, 96),
        StreamConfig::default().with_self_ssrc(WRITER_SSRC),
    )?;

    let fir = || {
        Box::new(FullIntraRequest {
            sender_ssrc: REMOTE_SSRC,
            media_ssrc: 0,
            fir: vec![FirEntry {
                ssrc: WRITER_SSRC,
                sequence_number: 1,
            }],
        })
    };
    send_rtcp(&remote, fir()).await?;
    // same sequence number: a repeat of the request above
    send_rtcp(&remote, fir()).await?;
    send_rtcp(
        &remote,
        Box::new(PictureLossIndication {
            sender_ssrc: REMOTE_SSRC,
            media_ssrc: WRITER_SSRC,
        }),
    )
    .await?;
    // not addressed to this writer
    send_rtcp(
        &remote,
        Box::new(PictureLossIndication {
            sender_ssrc: REMOTE_SSRC,
            media_ssrc: 0x0bad_0bad,
        }),
    )
    .await?;

    let mut requests = 0;
    for _ in 0..50 {
        requests = writer.stats().await?.key_frame_requests;
        if requests >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(requests, 2);
    assert_eq!(writer.stats().await?.key_frame_requests, 2);
    assert_eq!(source.key_frame_requests.load(Ordering::SeqCst), 2);

    writer.stop().await
}

#[tokio::test]
async fn test_stop_sends_bye() -> Result<()> {
    let (remote, local) = socket_pairs()?;
    let source = QueueSource::new(vec![amr_sample(0)], false);
    let writer = Writer::start(
        local.rtp,
        local.rtcp,
        source,
        WriterConfig::new(PayloadMode::AmrNb, 97),
        StreamConfig::default().with_self_ssrc(WRITER_SSRC),
    )?;
    recv(&remote.rtp, 3).await;

    // end of stream does not stop the writer
    assert_eq!(writer.stats().await?.packets_sent, 1);

    writer.stop().await?;
    let bye = rtcp::unmarshal(&mut recv(&remote.rtcp, 3).await)?;
    assert!(find::<SenderReport>(&bye).is_some());
    let goodbye = find::<Goodbye>(&bye).expect("BYE");
    assert_eq!(goodbye.sources, vec![WRITER_SSRC]);

    writer.stop().await?;
    assert!(matches!(writer.stats().await, Err(Error::WriterStopped)));
    assert!(matches!(
        writer.moderate_instant_traffic(Duration::from_millis(10), 1000),
        Err(Error::WriterStopped)
    ));
    Ok(())
}

#[tokio::test]
async fn test_unconnected_socket_is_rejected() -> Result<()> {
    let rtp = std::net::UdpSocket::bind((LOCALHOST, 0))?;
    let rtcp = std::net::UdpSocket::bind((LOCALHOST, 0))?;
    let result = Writer::start(
        rtp,
        rtcp,
        QueueSource::new(vec![], false),
        WriterConfig::default(),
        StreamConfig::default(),
    );
    assert!(matches!(result, Err(Error::SocketIo(_))));
    Ok(())
}

#[test]
fn test_unix_to_ntp() {
    let t = UNIX_EPOCH + Duration::from_millis(1_500);
    let ntp = unix_to_ntp(t);
    assert_eq!(ntp >> 32, 0x83AA_7E80 + 1);
    assert_eq!(ntp & 0xFFFF_FFFF, 1 << 31);
}
