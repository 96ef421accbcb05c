use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::Bytes;
use tokio::time::{timeout, Duration};

use super::*;
use crate::marshal::Marshal;
use crate::notify::{Notify, NotifyReceiver};
use crate::packet::header::Header;
use crate::packet::Packet;
use crate::rtcp;
use crate::rtcp::goodbye::Goodbye;
use crate::rtcp::receiver_report::ReceiverReport;
use crate::rtcp::source_description::SourceDescription;

const SSRC: u32 = 0x4d2c_0001;
const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn pcmu_session() -> SessionDescription {
    SessionDescription::new(vec![TrackDescription {
        media: "audio".to_owned(),
        payload_type: 0,
        encoding_name: "PCMU".to_owned(),
        clock_rate_hz: 8000,
        channels: 1,
        ..Default::default()
    }])
}

fn pcmu_packet(seq: u16, rtp: u32) -> Result<Bytes> {
    Packet {
        header: Header {
            version: 2,
            payload_type: 0,
            sequence_number: seq,
            timestamp: rtp,
            ssrc: SSRC,
            ..Default::default()
        },
        payload: Bytes::from_static(&[0xFF; 160]),
        ..Default::default()
    }
    .marshal()
}

async fn next_notify(rx: &mut NotifyReceiver) -> Notify {
    match timeout(Duration::from_secs(3), rx.recv()).await {
        Ok(Some(notify)) => notify,
        Ok(None) => panic!("notify channel closed"),
        Err(_) => panic!("no notification within 3s"),
    }
}

#[tokio::test]
async fn test_injected_packets_become_access_units() -> Result<()> {
    let conn = Connection::new(ConnectionConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    conn.add_stream(
        StreamTransport::Injected,
        &pcmu_session(),
        0,
        tx,
        StreamConfig::default(),
    )
    .await?;

    for i in 0..3u16 {
        conn.inject_packet(0, pcmu_packet(100 + i, 8000 + i as u32 * 160)?)?;
    }

    let mut rtp_times = vec![];
    while rtp_times.len() < 3 {
        match next_notify(&mut rx).await {
            Notify::AccessUnit { track, unit } => {
                assert_eq!(track, 0);
                assert_eq!(unit.data.len(), 160);
                rtp_times.push(unit.rtp_time);
            }
            other => log::trace!("skipping {}", other),
        }
    }
    assert_eq!(rtp_times, vec![8000, 8160, 8320]);

    conn.close().await
}

#[tokio::test]
async fn test_add_stream_twice_fails() -> Result<()> {
    let conn = Connection::new(ConnectionConfig::default());
    let (tx, _rx) = mpsc::unbounded_channel();
    let session = pcmu_session();

    conn.add_stream(
        StreamTransport::Injected,
        &session,
        0,
        tx.clone(),
        StreamConfig::default(),
    )
    .await?;
    let second = conn
        .add_stream(
            StreamTransport::Injected,
            &session,
            0,
            tx,
            StreamConfig::default(),
        )
        .await;
    assert!(matches!(second, Err(Error::StreamExists(0))));

    conn.close().await
}

#[tokio::test]
async fn test_add_stream_for_missing_track_fails() {
    let conn = Connection::new(ConnectionConfig::default());
    let (tx, _rx) = mpsc::unbounded_channel();
    let result = conn
        .add_stream(
            StreamTransport::Injected,
            &pcmu_session(),
            3,
            tx,
            StreamConfig::default(),
        )
        .await;
    assert!(matches!(result, Err(Error::TrackNotFound(3))));
}

#[tokio::test]
async fn test_remove_stream_is_idempotent() -> Result<()> {
    let conn = Connection::new(ConnectionConfig::default());
    let (tx, _rx) = mpsc::unbounded_channel();
    conn.add_stream(
        StreamTransport::Injected,
        &pcmu_session(),
        0,
        tx.clone(),
        StreamConfig::default(),
    )
    .await?;

    conn.remove_stream(0).await?;
    conn.remove_stream(0).await?;

    // the slot is free again
    conn.add_stream(
        StreamTransport::Injected,
        &pcmu_session(),
        0,
        tx,
        StreamConfig::default(),
    )
    .await?;
    conn.close().await
}

#[tokio::test]
async fn test_seek_unknown_stream() -> Result<()> {
    let conn = Connection::new(ConnectionConfig::default());
    assert!(matches!(
        conn.seek_stream(7).await,
        Err(Error::StreamNotFound(7))
    ));
    conn.close().await
}

#[tokio::test]
async fn test_calls_after_close_fail() -> Result<()> {
    let conn = Connection::new(ConnectionConfig::default());
    conn.close().await?;
    assert!(matches!(
        conn.inject_packet(0, Bytes::new()),
        Err(Error::ConnectionClosed)
    ));
    assert!(matches!(
        conn.seek_stream(0).await,
        Err(Error::ConnectionClosed)
    ));
    Ok(())
}

#[tokio::test]
async fn test_bye_drains_stream() -> Result<()> {
    let conn = Connection::new(ConnectionConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    conn.add_stream(
        StreamTransport::Injected,
        &pcmu_session(),
        0,
        tx,
        StreamConfig::default(),
    )
    .await?;

    conn.inject_packet(0, pcmu_packet(1, 0)?)?;
    let bye = Goodbye {
        sources: vec![SSRC],
        reason: Bytes::from_static(b"done"),
    }
    .marshal()?;
    conn.inject_packet(0, bye)?;
    // ignored while draining
    conn.inject_packet(0, pcmu_packet(2, 160)?)?;

    let mut access_units = 0;
    loop {
        match next_notify(&mut rx).await {
            Notify::AccessUnit { .. } => access_units += 1,
            Notify::Bye { track, ssrc } => {
                assert_eq!(track, 0);
                assert_eq!(ssrc, SSRC);
                break;
            }
            other => log::trace!("skipping {}", other),
        }
    }
    assert_eq!(access_units, 1);

    // seek revives the stream with a fresh timeline
    conn.seek_stream(0).await?;
    conn.inject_packet(0, pcmu_packet(500, 90_000)?)?;
    loop {
        if let Notify::AccessUnit { unit, .. } = next_notify(&mut rx).await {
            assert_eq!(unit.rtp_time, 90_000);
            break;
        }
    }

    conn.close().await
}

#[tokio::test]
async fn test_receiver_report_reaches_remote() -> Result<()> {
    let remote = make_port_pair()?;
    let local = make_rtp_socket_pair(LOCALHOST, LOCALHOST, remote.rtp_port, -1, 0)?;
    let local_rtp_port = local.rtp_port;

    let conn = Connection::new(ConnectionConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    conn.add_stream(
        StreamTransport::Sockets {
            rtp: local.rtp,
            rtcp: local.rtcp,
        },
        &pcmu_session(),
        0,
        tx,
        StreamConfig::default()
            .with_self_ssrc(0xfeed_0001)
            .with_cname("receiver"),
    )
    .await?;

    remote.rtp.set_nonblocking(true)?;
    remote.rtcp.set_nonblocking(true)?;
    let remote_rtp = UdpSocket::from_std(remote.rtp)?;
    let remote_rtcp = UdpSocket::from_std(remote.rtcp)?;

    let target = SocketAddr::new(LOCALHOST, local_rtp_port);
    for i in 0..5u16 {
        remote_rtp
            .send_to(&pcmu_packet(10 + i, i as u32 * 160)?, target)
            .await?;
    }
    match next_notify(&mut rx).await {
        Notify::AccessUnit { unit, .. } => assert_eq!(unit.rtp_time, 0),
        other => panic!("unexpected {other}"),
    }

    let mut buf = vec![0u8; RECEIVE_MTU];
    let n = match timeout(Duration::from_secs(3), remote_rtcp.recv(&mut buf)).await {
        Ok(n) => n?,
        Err(_) => panic!("no RTCP within 3s"),
    };
    let packets = rtcp::unmarshal(&mut Bytes::copy_from_slice(&buf[..n]))?;

    let rr = packets
        .iter()
        .find_map(|p| p.as_any().downcast_ref::<ReceiverReport>())
        .expect("compound starts with RR");
    assert_eq!(rr.ssrc, 0xfeed_0001);
    assert_eq!(rr.reports.len(), 1);
    assert_eq!(rr.reports[0].ssrc, SSRC);
    assert_eq!(rr.reports[0].total_lost, 0);

    let sdes = packets
        .iter()
        .find_map(|p| p.as_any().downcast_ref::<SourceDescription>())
        .expect("compound carries SDES");
    assert_eq!(
        sdes.cname(0xfeed_0001).map(|c| c.as_ref()),
        Some(&b"receiver"[..])
    );

    conn.close().await
}
