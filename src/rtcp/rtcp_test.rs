use bytes::Bytes;

use super::full_intra_request::*;
use super::goodbye::*;
use super::picture_loss_indication::*;
use super::receiver_report::*;
use super::reception_report::*;
use super::sender_report::*;
use super::source_description::*;
use super::tmmbr::*;
use super::transport_layer_nack::*;
use super::*;
use crate::marshal::{Marshal, Unmarshal};

#[test]
fn test_compound_unmarshal() -> Result<()> {
    let mut data = Bytes::from_static(&[
        // Receiver Report (offset=0)
        0x81, 0xc9, 0x0, 0x7, // v=2, p=0, count=1, RR, len=7
        0x90, 0x2f, 0x9e, 0x2e, // ssrc=0x902f9e2e
        0xbc, 0x5e, 0x9a, 0x40, // ssrc=0xbc5e9a40
        0x0, 0x0, 0x0, 0x0, // fracLost=0, totalLost=0
        0x0, 0x0, 0x46, 0xe1, // lastSeq=0x46e1
        0x0, 0x0, 0x1, 0x11, // jitter=273
        0x9, 0xf3, 0x64, 0x32, // lsr=0x9f36432
        0x0, 0x2, 0x4a, 0x79, // delay=150137
        // Source Description (offset=32)
        0x81, 0xca, 0x0, 0x3, // v=2, p=0, count=1, SDES, len=3
        0x90, 0x2f, 0x9e, 0x2e, // ssrc=0x902f9e2e
        0x1, 0x4, b'c', b'a', b'm', b'0', // CNAME "cam0"
        0x0, 0x0, // END + padding
        // Goodbye (offset=48)
        0x81, 0xcb, 0x0, 0x1, // v=2, p=0, count=1, BYE, len=1
        0x90, 0x2f, 0x9e, 0x2e, // source=0x902f9e2e
        // Picture Loss Indication (offset=56)
        0x81, 0xce, 0x0, 0x2, //
        0x90, 0x2f, 0x9e, 0x2e, // sender=0x902f9e2e
        0x90, 0x2f, 0x9e, 0x2e, // media=0x902f9e2e
        // Application defined (offset=68), kept raw
        0x80, 0xcc, 0x0, 0x1, //
        0x01, 0x02, 0x03, 0x04,
    ]);

    let packets = unmarshal(&mut data)?;
    assert_eq!(packets.len(), 5);

    let rr = packets[0]
        .as_any()
        .downcast_ref::<ReceiverReport>()
        .expect("receiver report");
    assert_eq!(
        rr,
        &ReceiverReport {
            ssrc: 0x902f9e2e,
            reports: vec![ReceptionReport {
                ssrc: 0xbc5e9a40,
                fraction_lost: 0,
                total_lost: 0,
                last_sequence_number: 0x46e1,
                jitter: 273,
                last_sender_report: 0x9f36432,
                delay: 150137,
            }],
        }
    );

    let sdes = packets[1]
        .as_any()
        .downcast_ref::<SourceDescription>()
        .expect("sdes");
    assert_eq!(sdes.cname(0x902f9e2e), Some(&Bytes::from_static(b"cam0")));

    let bye = packets[2]
        .as_any()
        .downcast_ref::<Goodbye>()
        .expect("goodbye");
    assert_eq!(bye.sources, vec![0x902f9e2e]);

    assert!(packets[3]
        .as_any()
        .downcast_ref::<PictureLossIndication>()
        .is_some());
    assert!(packets[4].as_any().downcast_ref::<RawPacket>().is_some());

    Ok(())
}

#[test]
fn test_truncated_compound_is_rejected() {
    // length claims 7 words, only 1 present
    let mut data = Bytes::from_static(&[0x81, 0xc9, 0x0, 0x7, 0x90, 0x2f, 0x9e, 0x2e]);
    assert!(matches!(unmarshal(&mut data), Err(Error::ShortPacket)));

    let mut empty = Bytes::new();
    assert!(unmarshal(&mut empty).is_err());
}

#[test]
fn test_negative_cumulative_loss() -> Result<()> {
    let report = ReceptionReport {
        ssrc: 1,
        total_lost: -3,
        ..Default::default()
    };
    let raw = report.marshal()?;
    assert_eq!(&raw[5..8], &[0xff, 0xff, 0xfd]);
    let parsed = ReceptionReport::unmarshal(&mut raw.clone())?;
    assert_eq!(parsed.total_lost, -3);

    let clamped = ReceptionReport {
        total_lost: i32::MAX,
        ..Default::default()
    };
    let parsed = ReceptionReport::unmarshal(&mut clamped.marshal()?)?;
    assert_eq!(parsed.total_lost, MAX_TOTAL_LOST);

    Ok(())
}

#[test]
fn test_sender_report_layout() -> Result<()> {
    let sr = SenderReport {
        ssrc: 0x11223344,
        ntp_time: 0xdead_beef_0000_8000,
        rtp_time: 90000,
        packet_count: 10,
        octet_count: 1000,
        reports: vec![],
    };
    let raw = sr.marshal()?;
    assert_eq!(raw.len(), 28);
    assert_eq!(&raw[0..4], &[0x80, 200, 0x00, 0x06]);

    let packets = unmarshal(&mut raw.clone())?;
    let parsed = packets[0]
        .as_any()
        .downcast_ref::<SenderReport>()
        .expect("sender report");
    assert_eq!(parsed, &sr);

    Ok(())
}

#[test]
fn test_nack_pairs() {
    assert!(nack_pairs_from_sequence_numbers(&[]).is_empty());

    let pairs = nack_pairs_from_sequence_numbers(&[100, 101, 103, 117, 118]);
    assert_eq!(
        pairs,
        vec![
            NackPair {
                packet_id: 100,
                lost_packets: 0b101,
            },
            NackPair {
                packet_id: 117,
                lost_packets: 0b1,
            },
        ]
    );

    // sequence wraparound stays in one pair
    let pairs = nack_pairs_from_sequence_numbers(&[65534, 65535, 0, 1]);
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].packet_list(), vec![65534, 65535, 0, 1]);
}

#[test]
fn test_nack_round_trip() -> Result<()> {
    let nack = TransportLayerNack {
        sender_ssrc: 0x1,
        media_ssrc: 0x2,
        nacks: nack_pairs_from_sequence_numbers(&[5, 7]),
    };
    let raw = nack.marshal()?;
    assert_eq!(&raw[0..4], &[0x81, 205, 0x00, 0x03]);

    let parsed = TransportLayerNack::unmarshal(&mut raw.clone())?;
    assert_eq!(parsed, nack);
    assert_eq!(parsed.nacks[0].packet_list(), vec![5, 7]);

    Ok(())
}

#[test]
fn test_tmmbr_encoding() -> Result<()> {
    let entry = TmmbEntry::from_bitrate(0xabcd, 2_000_000);
    assert_eq!(entry.exp, 7);
    assert_eq!(entry.mantissa, 15625);
    assert_eq!(entry.bitrate(), 2_000_000);

    let req = TmmbRequest {
        sender_ssrc: 0x1,
        media_ssrc: 0,
        entries: vec![entry],
    };
    let raw = req.marshal()?;
    assert_eq!(&raw[0..4], &[0x83, 205, 0x00, 0x04]);
    assert_eq!(&raw[16..20], &[0x1c, 0x7a, 0x12, 0x28]);

    let packets = unmarshal(&mut raw.clone())?;
    let parsed = packets[0]
        .as_any()
        .downcast_ref::<TmmbRequest>()
        .expect("tmmbr");
    assert_eq!(parsed, &req);

    // 29 significant bits lose the low 12
    let wide = TmmbEntry::from_bitrate(0, 0x1fff_ffff);
    assert_eq!(wide.mantissa, 0x1ffff);
    assert_eq!(wide.exp, 12);
    assert_eq!(wide.bitrate(), 0x1fff_f000);

    Ok(())
}

#[test]
fn test_tmmbn_dispatch() -> Result<()> {
    let tmmbn = TmmbNotification {
        sender_ssrc: 0x9,
        media_ssrc: 0,
        entries: vec![TmmbEntry::from_bitrate(0x9, 64_000)],
    };
    let packets = unmarshal(&mut tmmbn.marshal()?)?;
    assert!(packets[0].as_any().downcast_ref::<TmmbNotification>().is_some());
    Ok(())
}

#[test]
fn test_fir_round_trip() -> Result<()> {
    let fir = FullIntraRequest {
        sender_ssrc: 0x10,
        media_ssrc: 0,
        fir: vec![FirEntry {
            ssrc: 0x20,
            sequence_number: 3,
        }],
    };
    let raw = fir.marshal()?;
    assert_eq!(raw.len(), 20);
    assert_eq!(&raw[0..4], &[0x84, 206, 0x00, 0x04]);

    let packets = unmarshal(&mut raw.clone())?;
    let parsed = packets[0]
        .as_any()
        .downcast_ref::<FullIntraRequest>()
        .expect("fir");
    assert_eq!(parsed, &fir);
    Ok(())
}

#[test]
fn test_sdes_alignment() -> Result<()> {
    for cname in ["a", "ab", "abc", "abcd", "user@host.example"] {
        let sdes = SourceDescription::with_cname(0x77, cname);
        let raw = sdes.marshal()?;
        assert_eq!(raw.len() % 4, 0, "cname {cname}");
        let parsed = SourceDescription::unmarshal(&mut raw.clone())?;
        assert_eq!(parsed, sdes);
    }
    Ok(())
}

#[test]
fn test_goodbye_reason() -> Result<()> {
    let bye = Goodbye {
        sources: vec![0x1234],
        reason: Bytes::from_static(b"done"),
    };
    let raw = bye.marshal()?;
    assert_eq!(raw.len() % 4, 0);
    let parsed = Goodbye::unmarshal(&mut raw.clone())?;
    assert_eq!(parsed, bye);
    Ok(())
}
