use bytes::Bytes;

use super::amr::AmrAssembler;
use super::h263::H263Assembler;
use super::h264::H264Assembler;
use super::h265::H265Assembler;
use super::latm::{LatmAssembler, StreamMuxConfig};
use super::mpeg2ts::{Mpeg2TsAssembler, TS_PACKET_SIZE};
use super::mpeg4_es::{AuHeaderConfig, Mpeg4EsAssembler};
use super::raw_audio::{RawAudioAssembler, RawAudioFormat};
use super::*;
use crate::es_queue::EsMode;
use crate::packet::header::Header;
use crate::packet::PacketMeta;

fn track(name: &str, fmtp: &[(&str, &str)]) -> TrackDescription {
    TrackDescription {
        media: "video".to_owned(),
        encoding_name: name.to_owned(),
        clock_rate_hz: 90_000,
        channels: 1,
        fmtp: fmtp
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        ..Default::default()
    }
}

fn packet(seq: u16, rtp: u32, marker: bool, payload: &[u8]) -> Packet {
    Packet {
        header: Header {
            version: 2,
            marker,
            payload_type: 96,
            sequence_number: seq,
            timestamp: rtp,
            ssrc: 0x1234,
            ..Default::default()
        },
        payload: Bytes::copy_from_slice(payload),
        meta: PacketMeta {
            ext_seq: seq as u32,
            timestamp_us: rtp as i64,
            ..Default::default()
        },
    }
}

#[test]
fn test_for_track_selects_variant() -> Result<()> {
    let config = ConnectionConfig::default();
    let cases = [
        ("H264", vec![], "H264", true),
        ("HEVC", vec![], "H265", true),
        ("H263-1998", vec![], "H263", true),
        ("AMR", vec![("octet-align", "1")], "AMR", false),
        ("AMR-WB", vec![], "AMR", false),
        ("MP4A-LATM", vec![("cpresent", "0"), ("config", "400024203fc0")], "LATM", false),
        ("MPEG4-GENERIC", vec![("sizelength", "13"), ("mode", "AAC-hbr")], "MPEG4-ES", false),
        ("L16", vec![], "RAW", false),
        ("PCMA", vec![], "RAW", false),
        ("MP2T", vec![], "MP2T", false),
    ];
    for (name, fmtp, want, video) in cases {
        let assembler = Assembler::for_track(&track(name, &fmtp), &config)?;
        assert_eq!(assembler.name(), want, "encoding {name}");
        assert_eq!(assembler.is_video(), video, "encoding {name}");
    }

    assert!(matches!(
        Assembler::for_track(&track("VP8", &[]), &config),
        Err(Error::Unsupported(_))
    ));
    assert!(matches!(
        Assembler::for_track(&track("AMR", &[("interleaving", "4")]), &config),
        Err(Error::Unsupported(_))
    ));
    Ok(())
}

#[test]
fn test_h264_stapa_and_single_nal() -> Result<()> {
    let mut a = H264Assembler::with_parameter_sets(Bytes::new());
    a.append(packet(
        1,
        3000,
        false,
        &[0x78, 0x00, 0x02, 0x67, 0x42, 0x00, 0x02, 0x68, 0xCE],
    ))?;
    assert!(a.poll().is_none());
    a.append(packet(2, 3000, true, &[0x65, 0x88, 0x84]))?;

    let au = a.poll().expect("access unit");
    assert_eq!(
        &au.data[..],
        &[
            0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xCE, 0, 0, 0, 1, 0x65, 0x88, 0x84
        ]
    );
    assert!(au.is_key_frame);
    assert!(au.marker);
    assert_eq!(au.rtp_time, 3000);
    assert!(a.poll().is_none());
    Ok(())
}

#[test]
fn test_h264_fu_a_reassembly() -> Result<()> {
    let mut a = H264Assembler::with_parameter_sets(Bytes::new());
    a.append(packet(10, 9000, false, &[0x7C, 0x85, 1, 2]))?;
    a.append(packet(11, 9000, false, &[0x7C, 0x05, 3, 4]))?;
    a.append(packet(12, 9000, true, &[0x7C, 0x45, 5, 6]))?;

    let au = a.poll().expect("access unit");
    assert_eq!(&au.data[..], &[0, 0, 0, 1, 0x65, 1, 2, 3, 4, 5, 6]);
    assert!(au.is_key_frame);
    Ok(())
}

#[test]
fn test_h264_loss_drops_unit_and_requests_fir() -> Result<()> {
    let mut a = H264Assembler::with_parameter_sets(Bytes::new());
    a.append(packet(1, 6000, false, &[0x7C, 0x85, 1, 2]))?;
    a.on_packet_lost();
    a.append(packet(3, 6000, true, &[0x7C, 0x45, 5, 6]))?;

    assert!(a.poll().is_none());
    assert!(a.take_fir_request());
    assert!(!a.take_fir_request());

    a.append(packet(4, 9000, true, &[0x41, 0x9A]))?;
    let au = a.poll().expect("access unit after loss");
    assert_eq!(&au.data[..], &[0, 0, 0, 1, 0x41, 0x9A]);
    assert!(!au.is_key_frame);
    Ok(())
}

#[test]
fn test_h264_timestamp_change_ends_unit() -> Result<()> {
    let mut a = H264Assembler::with_parameter_sets(Bytes::new());
    a.append(packet(1, 100, false, &[0x41, 0x9A]))?;
    assert!(a.poll().is_none());
    a.append(packet(2, 200, false, &[0x41, 0x9B]))?;

    let au = a.poll().expect("first unit");
    assert_eq!(au.rtp_time, 100);
    assert!(!au.marker);
    assert!(a.poll().is_none());

    a.on_bye();
    let au = a.poll().expect("unit flushed at bye");
    assert_eq!(au.rtp_time, 200);
    Ok(())
}

#[test]
fn test_h264_parameter_sets_prepended_once() -> Result<()> {
    let t = track("H264", &[("sprop-parameter-sets", "Z0IA,aM4=")]);
    let mut a = H264Assembler::new(&t, &ConnectionConfig::default())?;
    a.append(packet(1, 0, true, &[0x65, 0x88]))?;
    a.append(packet(2, 3000, true, &[0x41, 0x9A]))?;

    let first = a.poll().expect("first");
    assert_eq!(
        &first.data[..],
        &[0, 0, 0, 1, 0x67, 0x42, 0x00, 0, 0, 0, 1, 0x68, 0xCE, 0, 0, 0, 1, 0x65, 0x88]
    );
    let second = a.poll().expect("second");
    assert_eq!(&second.data[..], &[0, 0, 0, 1, 0x41, 0x9A]);

    let mut vilte = H264Assembler::new(&t, &ConnectionConfig::default().with_vilte_mode(true))?;
    vilte.append(packet(1, 0, true, &[0x65, 0x88]))?;
    assert_eq!(
        &vilte.poll().expect("vilte unit").data[..],
        &[0, 0, 0, 1, 0x65, 0x88]
    );
    Ok(())
}

#[test]
fn test_h264_unknown_packetization_type() {
    let mut a = H264Assembler::with_parameter_sets(Bytes::new());
    let result = a.append(packet(1, 0, true, &[0x1E, 0x00]));
    assert!(matches!(result, Err(Error::AssemblerFormat(_))));
    assert!(a.poll().is_none());
}

#[test]
fn test_h265_aggregation_and_fragmentation() -> Result<()> {
    let mut a = H265Assembler::with_parameter_sets(Bytes::new());
    a.append(packet(
        1,
        500,
        false,
        &[
            0x60, 0x01, 0x00, 0x03, 0x40, 0x01, 0x0C, 0x00, 0x03, 0x42, 0x01, 0x01,
        ],
    ))?;
    a.append(packet(2, 500, false, &[0x62, 0x01, 0x93, 0xAA]))?;
    a.append(packet(3, 500, true, &[0x62, 0x01, 0x53, 0xBB]))?;

    let au = a.poll().expect("access unit");
    assert_eq!(
        &au.data[..],
        &[
            0, 0, 0, 1, 0x40, 0x01, 0x0C, 0, 0, 0, 1, 0x42, 0x01, 0x01, 0, 0, 0, 1, 0x26, 0x01,
            0xAA, 0xBB
        ]
    );
    assert!(au.is_key_frame);
    Ok(())
}

#[test]
fn test_h265_paci_rejected() {
    let mut a = H265Assembler::with_parameter_sets(Bytes::new());
    let result = a.append(packet(1, 0, true, &[0x64, 0x01, 0x00, 0x00]));
    assert!(matches!(result, Err(Error::AssemblerFormat(_))));
}

#[test]
fn test_h263_picture_start_and_key_frame() -> Result<()> {
    let mut a = H263Assembler::new();
    a.append(packet(1, 1000, false, &[0x04, 0x00, 0x80, 0x02, 0x08, 0xAB]))?;
    a.append(packet(2, 1000, true, &[0x00, 0x00, 0xCD]))?;

    let au = a.poll().expect("picture");
    assert_eq!(&au.data[..], &[0x00, 0x00, 0x80, 0x02, 0x08, 0xAB, 0xCD]);
    assert!(au.is_key_frame);

    a.append(packet(3, 4000, true, &[0x04, 0x00, 0x80, 0x02, 0x0A]))?;
    assert!(!a.poll().expect("inter picture").is_key_frame);
    Ok(())
}

#[test]
fn test_h263_skips_vrc_and_extra_header() -> Result<()> {
    let mut a = H263Assembler::new();
    a.append(packet(
        1,
        0,
        true,
        &[0x06, 0x10, 0xFF, 0x11, 0x22, 0x80, 0x02, 0x08],
    ))?;
    let au = a.poll().expect("picture");
    assert_eq!(&au.data[..], &[0x00, 0x00, 0x80, 0x02, 0x08]);
    assert!(au.is_key_frame);
    Ok(())
}

#[test]
fn test_amr_octet_aligned() -> Result<()> {
    let mut a = AmrAssembler::with_mode(false, true);
    let mut payload = vec![0xF0, 0xBC, 0x7C];
    payload.extend_from_slice(&[0x55; 31]);
    a.append(packet(1, 160, false, &payload))?;

    let au = a.poll().expect("frames");
    assert_eq!(au.data.len(), 33);
    assert_eq!(au.data[0], 0x3C);
    assert!(au.data[1..32].iter().all(|&b| b == 0x55));
    assert_eq!(au.data[32], 0x7C);
    Ok(())
}

#[test]
fn test_amr_bandwidth_efficient_sid() -> Result<()> {
    let mut a = AmrAssembler::with_mode(false, false);
    a.append(packet(
        1,
        160,
        false,
        &[0xF4, 0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0x80],
    ))?;
    let au = a.poll().expect("sid frame");
    assert_eq!(&au.data[..], &[0x44, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]);
    Ok(())
}

#[test]
fn test_amr_reserved_frame_type() {
    let mut a = AmrAssembler::with_mode(false, true);
    // FT 12 is reserved for narrowband
    let result = a.append(packet(1, 0, false, &[0xF0, 0x60]));
    assert!(matches!(result, Err(Error::AssemblerFormat(_))));
}

#[test]
fn test_raw_audio_l16_to_little_endian() -> Result<()> {
    let mut a = RawAudioAssembler::with_format(RawAudioFormat::L16, 1);
    a.append(packet(1, 0, false, &[0x12, 0x34, 0xAB, 0xCD]))?;
    assert_eq!(
        &a.poll().expect("samples").data[..],
        &[0x34, 0x12, 0xCD, 0xAB]
    );

    let result = a.append(packet(2, 2, false, &[0x12, 0x34, 0x56]));
    assert!(matches!(result, Err(Error::AssemblerFormat(_))));

    let mut mulaw = RawAudioAssembler::with_format(RawAudioFormat::Pcmu, 1);
    mulaw.append(packet(1, 0, false, &[0xFF, 0x7F, 0x00]))?;
    assert_eq!(&mulaw.poll().expect("samples").data[..], &[0xFF, 0x7F, 0x00]);
    Ok(())
}

#[test]
fn test_mpeg4_es_aac_hbr_multiple_units() -> Result<()> {
    let t = TrackDescription {
        clock_rate_hz: 48_000,
        ..track(
            "MPEG4-GENERIC",
            &[
                ("mode", "AAC-hbr"),
                ("sizelength", "13"),
                ("indexlength", "3"),
                ("indexdeltalength", "3"),
            ],
        )
    };
    let mut a = Mpeg4EsAssembler::new(&t)?;
    a.append(packet(
        1,
        48_000,
        true,
        &[0x00, 0x20, 0x00, 0x20, 0x00, 0x18, 1, 2, 3, 4, 5, 6, 7],
    ))?;

    let first = a.poll().expect("first AU");
    assert_eq!(&first.data[..], &[1, 2, 3, 4]);
    assert_eq!(first.rtp_time, 48_000);
    assert_eq!(first.timestamp_us, 48_000);

    let second = a.poll().expect("second AU");
    assert_eq!(&second.data[..], &[5, 6, 7]);
    assert_eq!(second.rtp_time, 48_000 + 1024);
    assert_eq!(second.timestamp_us, 48_000 + 21_333);
    Ok(())
}

#[test]
fn test_mpeg4_es_fragmented_unit() -> Result<()> {
    let t = track("MPEG4-GENERIC", &[("mode", "AAC-hbr"), ("sizelength", "13")]);
    let mut a = Mpeg4EsAssembler::new(&t)?;
    // AU-headers-length 13 bits rounds up to two bytes
    a.append(packet(1, 0, false, &[0x00, 0x0D, 0x00, 0x30, 1, 2, 3]))?;
    assert!(a.poll().is_none());
    a.append(packet(2, 0, true, &[0x00, 0x0D, 0x00, 0x30, 4, 5, 6]))?;
    assert_eq!(&a.poll().expect("AU").data[..], &[1, 2, 3, 4, 5, 6]);
    Ok(())
}

#[test]
fn test_latm_config_and_spanning_element() -> Result<()> {
    let config = StreamMuxConfig::from_hex("400024203fc0")?;
    assert_eq!(config.num_sub_frames, 0);
    assert_eq!(config.audio_object_type, 2);
    assert_eq!(config.sampling_frequency_index, 4);
    assert_eq!(config.channel_configuration, 2);
    assert_eq!(config.frame_length_type, 0);

    let t = track(
        "MP4A-LATM",
        &[("cpresent", "0"), ("config", "400024203fc0")],
    );
    let mut a = LatmAssembler::new(&t)?;
    let mut first = vec![0xFF, 0x2D];
    first.extend_from_slice(&[0x11; 100]);
    a.append(packet(1, 500, false, &first))?;
    assert!(a.poll().is_none());
    a.append(packet(2, 500, true, &[0x22; 200]))?;

    let au = a.poll().expect("audio frame");
    assert_eq!(au.data.len(), 300);
    assert_eq!(au.data[0], 0x11);
    assert_eq!(au.data[299], 0x22);
    Ok(())
}

fn ts_packet(pid: u16, unit_start: bool, cc: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![
        0x47,
        ((unit_start as u8) << 6) | ((pid >> 8) as u8 & 0x1F),
        pid as u8,
    ];
    let stuffing = TS_PACKET_SIZE - 4 - payload.len();
    if stuffing == 0 {
        out.push(0x10 | cc);
    } else {
        out.push(0x30 | cc);
        out.push((stuffing - 1) as u8);
        if stuffing > 1 {
            out.push(0x00);
            out.extend(std::iter::repeat(0xFF).take(stuffing - 2));
        }
    }
    out.extend_from_slice(payload);
    assert_eq!(out.len(), TS_PACKET_SIZE);
    out
}

fn psi_section(table_id: u8, body: &[u8]) -> Vec<u8> {
    let len = body.len() + 4;
    let mut section = vec![table_id, 0xB0 | (len >> 8) as u8, len as u8];
    section.extend_from_slice(body);
    let crc = crc::Crc::<u32>::new(&crc::CRC_32_MPEG_2).checksum(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    let mut payload = vec![0x00];
    payload.extend(section);
    payload
}

/// PAT pointing at a PMT on pid 0x100 that carries AAC on pid 0x101.
fn pat_and_pmt() -> (Vec<u8>, Vec<u8>) {
    let pat = psi_section(0x00, &[0x00, 0x01, 0xC1, 0x00, 0x00, 0x00, 0x01, 0xE1, 0x00]);
    let pmt = psi_section(
        0x02,
        &[
            0x00, 0x01, 0xC1, 0x00, 0x00, 0xE1, 0x01, 0xF0, 0x00, 0x0F, 0xE1, 0x01, 0xF0, 0x00,
        ],
    );
    (pat, pmt)
}

#[test]
fn test_mpeg2ts_pat_pmt_and_adts() -> Result<()> {
    let (pat, pmt) = pat_and_pmt();
    let adts = |body: [u8; 4]| {
        let mut frame = vec![0xFF, 0xF1, 0x50, 0x80, 0x01, 0x7F, 0xFC];
        frame.extend_from_slice(&body);
        frame
    };
    let mut pes = vec![
        0x00, 0x00, 0x01, 0xC0, 0x00, 0x1E, 0x80, 0x80, 0x05, 0x21, 0x00, 0x05, 0xBF, 0x21,
    ];
    pes.extend(adts([0xA1, 0xA2, 0xA3, 0xA4]));
    pes.extend(adts([0xB1, 0xB2, 0xB3, 0xB4]));

    let mut payload = ts_packet(0x0000, true, 0, &pat);
    payload.extend(ts_packet(0x0100, true, 0, &pmt));
    payload.extend(ts_packet(0x0101, true, 0, &pes));

    let mut a = Mpeg2TsAssembler::new();
    let mut p = packet(1, 1000, true, &payload);
    p.meta.timestamp_us = 5_000;
    a.append(p)?;

    assert_eq!(a.selected_mode(), Some(EsMode::Aac));
    let first = a.poll().expect("first frame");
    assert_eq!(&first.data[..], &[0xA1, 0xA2, 0xA3, 0xA4]);
    assert_eq!(first.timestamp_us, 5_000);
    assert_eq!(first.rtp_time, 1000);
    let second = a.poll().expect("second frame");
    assert_eq!(&second.data[..], &[0xB1, 0xB2, 0xB3, 0xB4]);
    assert_eq!(second.timestamp_us, 5_000 + 23_219);
    assert!(a.poll().is_none());
    Ok(())
}

#[test]
fn test_mpeg2ts_rejects_partial_packets() {
    let mut a = Mpeg2TsAssembler::new();
    let result = a.append(packet(1, 0, false, &[0x47; 100]));
    assert!(matches!(result, Err(Error::AssemblerFormat(_))));
}

#[test]
fn test_mpeg2ts_short_pes_header_is_skipped() -> Result<()> {
    let (pat, pmt) = pat_and_pmt();
    // PTS flagged but PES_header_data_length is 0
    let pes = [0x00, 0x00, 0x01, 0xC0, 0x00, 0x00, 0x80, 0x80, 0x00, 0x21];

    let mut payload = ts_packet(0x0000, true, 0, &pat);
    payload.extend(ts_packet(0x0100, true, 0, &pmt));
    payload.extend(ts_packet(0x0101, true, 0, &pes));

    let mut a = Mpeg2TsAssembler::new();
    a.append(packet(1, 1000, true, &payload))?;
    assert_eq!(a.selected_mode(), Some(EsMode::Aac));
    a.on_bye();
    assert!(a.poll().is_none());
    Ok(())
}

/// Feeds every prefix of each payload to a fresh assembler. Errors are
/// expected; panics are not.
fn feed_prefixes<D: Depacketizer>(new: impl Fn() -> D, payloads: &[&[u8]]) {
    for payload in payloads {
        for len in 0..=payload.len() {
            let mut a = new();
            let _ = a.append(packet(1, 0, false, &payload[..len]));
            let _ = a.append(packet(2, 0, true, &payload[..len]));
            a.on_packet_lost();
            let _ = a.append(packet(4, 3000, true, &payload[..len]));
            a.on_bye();
            while a.poll().is_some() {}
        }
    }
}

#[test]
fn test_truncated_payloads_do_not_panic() -> Result<()> {
    feed_prefixes(
        || H264Assembler::with_parameter_sets(Bytes::new()),
        &[
            &[0x78, 0x00, 0x02, 0x67, 0x42, 0x00, 0x02, 0x68, 0xCE, 0x00, 0x02, 0x65, 0x88],
            &[0x7C, 0x85, 1, 2],
            &[0x7C, 0x45, 5, 6],
            &[0x7D, 0x85, 0x00, 0x01, 1, 2],
        ],
    );
    feed_prefixes(
        || H265Assembler::with_parameter_sets(Bytes::new()),
        &[
            &[0x60, 0x01, 0x00, 0x03, 0x40, 0x01, 0x0C, 0x00, 0x03, 0x42, 0x01, 0x01],
            &[0x62, 0x01, 0x93, 0xAA],
            &[0x62, 0x01, 0x53, 0xBB],
        ],
    );
    feed_prefixes(H263Assembler::new, &[&[0x06, 0x10, 0xFF, 0x11, 0x22, 0x80, 0x02, 0x08]]);

    let mut octet_aligned = vec![0xF0, 0xBC, 0x7C];
    octet_aligned.extend_from_slice(&[0x55; 31]);
    feed_prefixes(|| AmrAssembler::with_mode(false, true), &[&octet_aligned]);
    feed_prefixes(
        || AmrAssembler::with_mode(false, false),
        &[&[0xF4, 0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0x80]],
    );
    feed_prefixes(
        || RawAudioAssembler::with_format(RawAudioFormat::L16, 2),
        &[&[0x12, 0x34, 0xAB, 0xCD, 0x01, 0x02, 0x03, 0x04]],
    );

    let aac = TrackDescription {
        clock_rate_hz: 48_000,
        ..track(
            "MPEG4-GENERIC",
            &[
                ("mode", "AAC-hbr"),
                ("sizelength", "13"),
                ("indexlength", "3"),
                ("indexdeltalength", "3"),
            ],
        )
    };
    Mpeg4EsAssembler::new(&aac)?;
    feed_prefixes(
        || Mpeg4EsAssembler::new(&aac).expect("valid fmtp"),
        &[&[0x00, 0x20, 0x00, 0x20, 0x00, 0x18, 1, 2, 3, 4, 5, 6, 7]],
    );

    let config = StreamMuxConfig::from_hex("400024203fc0")?;
    let mut element = vec![0xFF, 0x2D];
    element.extend_from_slice(&[0x11; 300]);
    feed_prefixes(|| LatmAssembler::with_config(config), &[&element]);
    Ok(())
}

#[test]
fn test_truncated_transport_stream_does_not_panic() {
    let (pat, pmt) = pat_and_pmt();
    let mut pes = vec![
        0x00, 0x00, 0x01, 0xC0, 0x00, 0x1E, 0x80, 0x80, 0x05, 0x21, 0x00, 0x05, 0xBF, 0x21,
    ];
    pes.extend([0xFF, 0xF1, 0x50, 0x80, 0x01, 0x7F, 0xFC, 0xA1, 0xA2, 0xA3, 0xA4]);
    pes.extend([0xFF, 0xF1, 0x50, 0x80, 0x01, 0x7F, 0xFC, 0xB1, 0xB2, 0xB3, 0xB4]);

    let cut_pes = (0..=pes.len()).map(|len| {
        let mut payload = ts_packet(0x0000, true, 0, &pat);
        payload.extend(ts_packet(0x0100, true, 0, &pmt));
        payload.extend(ts_packet(0x0101, true, 0, &pes[..len]));
        payload
    });
    let cut_pat = (0..=pat.len()).map(|len| ts_packet(0x0000, true, 0, &pat[..len]));
    let cut_pmt = (0..=pmt.len()).map(|len| {
        let mut payload = ts_packet(0x0000, true, 0, &pat);
        payload.extend(ts_packet(0x0100, true, 0, &pmt[..len]));
        payload
    });

    for payload in cut_pes.chain(cut_pat).chain(cut_pmt) {
        let mut a = Mpeg2TsAssembler::new();
        let _ = a.append(packet(1, 0, true, &payload));
        a.on_bye();
        while a.poll().is_some() {}
    }
}

#[test]
fn test_mpeg4_es_index_delta_overflow() {
    let mut a = Mpeg4EsAssembler::with_config(
        AuHeaderConfig {
            index_length: 32,
            index_delta_length: 32,
            constant_size: Some(1),
            constant_duration: 1024,
            ..Default::default()
        },
        48_000,
    );
    // AU-index 0xFFFFFFFF followed by a delta of 0
    let result = a.append(packet(
        1,
        0,
        true,
        &[0x00, 0x40, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 1, 2],
    ));
    assert!(matches!(result, Err(Error::AssemblerFormat(_))));
    assert!(a.poll().is_none());
}

#[test]
fn test_mpeg4_es_zero_width_header_rejected() {
    // index-delta has no width, so every header after the first is empty
    let mut a = Mpeg4EsAssembler::with_config(
        AuHeaderConfig {
            index_length: 3,
            constant_size: Some(1),
            constant_duration: 1024,
            ..Default::default()
        },
        48_000,
    );
    let result = a.append(packet(1, 0, true, &[0x00, 0x08, 0x00, 1, 2]));
    assert!(matches!(result, Err(Error::AssemblerFormat(_))));
}

#[test]
fn test_h264_parameter_sets_mark_key_frame() -> Result<()> {
    let mut a = H264Assembler::with_parameter_sets(Bytes::new());
    // SPS and PPS aggregated ahead of a non-IDR slice
    a.append(packet(
        1,
        0,
        true,
        &[0x78, 0x00, 0x02, 0x67, 0x42, 0x00, 0x02, 0x68, 0xCE, 0x00, 0x02, 0x41, 0x9A],
    ))?;
    assert!(a.poll().expect("unit with parameter sets").is_key_frame);

    a.append(packet(2, 3000, false, &[0x67, 0x42]))?;
    a.append(packet(3, 3000, true, &[0x41, 0x9B]))?;
    assert!(a.poll().expect("unit led by SPS").is_key_frame);

    a.append(packet(4, 6000, true, &[0x41, 0x9C]))?;
    assert!(!a.poll().expect("plain slice").is_key_frame);
    Ok(())
}
