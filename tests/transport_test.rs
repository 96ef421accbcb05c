use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::assert_ok;

use rtp_transport::marshal::Marshal;
use rtp_transport::packet::header::Header;
use rtp_transport::packet::Packet;
use rtp_transport::{
    make_port_pair, make_rtp_socket_pair, Connection, ConnectionConfig, MediaSample, MediaSource,
    Notify, NotifyReceiver, PayloadMode, Result, SessionDescription, StreamConfig,
    StreamTransport, Writer, WriterConfig,
};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Samples(Mutex<VecDeque<MediaSample>>);

#[async_trait]
impl MediaSource for Samples {
    async fn read(&self) -> Result<Option<MediaSample>> {
        let next = self.0.lock().unwrap().pop_front();
        match next {
            Some(sample) => Ok(Some(sample)),
            // keep the writer alive until the test stops it
            None => std::future::pending().await,
        }
    }
}

async fn next_access_unit(rx: &mut NotifyReceiver) -> rtp_transport::assembler::AccessUnit {
    loop {
        match timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(Notify::AccessUnit { unit, .. })) => return unit,
            Ok(Some(other)) => log::debug!("{other}"),
            Ok(None) => panic!("notify channel closed"),
            Err(_) => panic!("no access unit within 5s"),
        }
    }
}

/// Annex-B key frame whose IDR slice needs several FU-A fragments.
fn key_frame() -> Bytes {
    let sps: &[u8] = &[0x67, 0x42, 0xc0, 0x1f, 0xda, 0x01, 0x40, 0x16, 0xe8];
    let pps: &[u8] = &[0x68, 0xce, 0x3c, 0x80];
    let mut out = BytesMut::new();
    for nal in [sps, pps] {
        out.put(&[0u8, 0, 0, 1][..]);
        out.put(nal);
    }
    out.put(&[0u8, 0, 0, 1, 0x65][..]);
    // no zero bytes, so no accidental start codes
    out.extend((0..5000u32).map(|i| (i % 251 + 1) as u8));
    out.freeze()
}

#[tokio::test]
async fn test_writer_key_frame_survives_fu_a_round_trip() -> Result<()> {
    init_log();

    let receiver_ports = make_port_pair()?;
    let sender_ports = make_rtp_socket_pair(LOCALHOST, LOCALHOST, receiver_ports.rtp_port, -1, 0)?;

    let session = SessionDescription::parse(
        "v=0\r\n\
         m=video 0 RTP/AVP 96\r\n\
         a=rtpmap:96 H264/90000\r\n\
         a=fmtp:96 packetization-mode=1\r\n",
    )?;
    let conn = Connection::new(ConnectionConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    conn.add_stream(
        StreamTransport::Sockets {
            rtp: receiver_ports.rtp,
            rtcp: receiver_ports.rtcp,
        },
        &session,
        0,
        tx,
        StreamConfig::default(),
    )
    .await?;

    let frame = key_frame();
    let mut sample = MediaSample::new(frame.clone(), 0);
    sample.is_key_frame = true;
    let writer = Writer::start(
        sender_ports.rtp,
        sender_ports.rtcp,
        Arc::new(Samples(Mutex::new(vec![sample].into()))),
        WriterConfig::new(PayloadMode::H264, 96).with_mtu(1200),
        StreamConfig::default(),
    )?;

    let unit = next_access_unit(&mut rx).await;
    assert_eq!(unit.data, frame);
    assert!(unit.is_key_frame);
    assert!(unit.marker);

    let stats = writer.stats().await?;
    assert!(stats.packets_sent > 4, "{} packets", stats.packets_sent);

    assert_ok!(writer.stop().await);
    assert_ok!(conn.close().await);
    Ok(())
}

fn pcmu_packet(seq: u16, rtp: u32) -> Result<Bytes> {
    Packet {
        header: Header {
            version: 2,
            payload_type: 0,
            sequence_number: seq,
            timestamp: rtp,
            ssrc: 0xabcd_0001,
            ..Default::default()
        },
        payload: Bytes::from_static(&[0x7f; 160]),
        ..Default::default()
    }
    .marshal()
}

#[tokio::test]
async fn test_add_remove_add_on_same_ports() -> Result<()> {
    init_log();

    let session = SessionDescription::parse(
        "v=0\r\n\
         m=audio 0 RTP/AVP 0\r\n\
         a=rtpmap:0 PCMU/8000\r\n",
    )?;
    let conn = Connection::new(ConnectionConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sender = UdpSocket::bind((LOCALHOST, 0))?;

    let ports = make_port_pair()?;
    let rtp_port = ports.rtp_port;
    let target = SocketAddr::new(LOCALHOST, rtp_port);

    conn.add_stream(
        StreamTransport::Sockets {
            rtp: ports.rtp,
            rtcp: ports.rtcp,
        },
        &session,
        0,
        tx.clone(),
        StreamConfig::default(),
    )
    .await?;
    sender.send_to(&pcmu_packet(1, 0)?, target)?;
    assert_eq!(next_access_unit(&mut rx).await.rtp_time, 0);

    conn.remove_stream(0).await?;

    // both ports were released by the removal
    let rtp = UdpSocket::bind(("0.0.0.0", rtp_port))?;
    let rtcp = UdpSocket::bind(("0.0.0.0", rtp_port + 1))?;
    conn.add_stream(
        StreamTransport::Sockets { rtp, rtcp },
        &session,
        0,
        tx,
        StreamConfig::default(),
    )
    .await?;
    sender.send_to(&pcmu_packet(1000, 8000)?, target)?;
    assert_eq!(next_access_unit(&mut rx).await.rtp_time, 8000);

    conn.close().await
}
