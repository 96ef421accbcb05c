//! Sender-side payload formats and RTP framing.

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use serde::Deserialize;

use super::media_source::MediaSample;
use crate::assembler::amr;
use crate::error::{Error, Result};
use crate::marshal::Marshal;
use crate::packet::header::Header;
use crate::packet::{Packet, PacketMeta};

/// Payload formats the writer can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PayloadMode {
    H264,
    H265,
    H263,
    AmrNb,
    AmrWb,
}

impl PayloadMode {
    pub fn is_video(&self) -> bool {
        matches!(self, PayloadMode::H264 | PayloadMode::H265 | PayloadMode::H263)
    }

    pub fn clock_rate(&self) -> u32 {
        match self {
            PayloadMode::H264 | PayloadMode::H265 | PayloadMode::H263 => 90_000,
            PayloadMode::AmrNb => 8_000,
            PayloadMode::AmrWb => 16_000,
        }
    }

    /// Mode for an `rtpmap` encoding name.
    pub fn from_encoding_name(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "H264" => Ok(PayloadMode::H264),
            "H265" => Ok(PayloadMode::H265),
            "H263-1998" | "H263-2000" => Ok(PayloadMode::H263),
            "AMR" => Ok(PayloadMode::AmrNb),
            "AMR-WB" => Ok(PayloadMode::AmrWb),
            other => Err(Error::Unsupported(format!("writer encoding {other}"))),
        }
    }
}

/// Payloader splits one sample into RTP payloads no larger than `mtu`.
pub trait Payloader {
    fn payload(&mut self, mtu: usize, sample: &Bytes) -> Result<Vec<Bytes>>;
}

pub fn new_payloader(mode: PayloadMode) -> Box<dyn Payloader + Send + Sync> {
    match mode {
        PayloadMode::H264 => Box::<H264Payloader>::default(),
        PayloadMode::H265 => Box::<H265Payloader>::default(),
        PayloadMode::H263 => Box::new(H263Payloader),
        PayloadMode::AmrNb => Box::new(AmrPayloader { wideband: false }),
        PayloadMode::AmrWb => Box::new(AmrPayloader { wideband: true }),
    }
}

/// Start of the next Annex-B start code at or after `start`, with its length.
fn next_start_code(data: &[u8], start: usize) -> Option<(usize, usize)> {
    let mut zero_count = 0;
    for (i, &b) in data[start..].iter().enumerate() {
        if b == 0 {
            zero_count += 1;
            continue;
        } else if b == 1 && zero_count >= 2 {
            let zeros = zero_count.min(3);
            return Some((start + i - zeros, zeros + 1));
        }
        zero_count = 0;
    }
    None
}

/// Splits an Annex-B byte stream into NAL units. Data without any start
/// code is a single NAL unit.
pub fn split_annexb(data: &Bytes) -> Vec<Bytes> {
    let mut nals = vec![];
    let Some((first, len)) = next_start_code(data, 0) else {
        if !data.is_empty() {
            nals.push(data.clone());
        }
        return nals;
    };
    if first > 0 {
        nals.push(data.slice(..first));
    }

    let mut nal_start = first + len;
    while let Some((next, len)) = next_start_code(data, nal_start) {
        if next > nal_start {
            nals.push(data.slice(nal_start..next));
        }
        nal_start = next + len;
    }
    if nal_start < data.len() {
        nals.push(data.slice(nal_start..));
    }
    nals
}

const H264_NALU_TYPE_BITMASK: u8 = 0x1F;
const H264_NALU_REF_IDC_BITMASK: u8 = 0xE0;
const H264_IDR_NALU_TYPE: u8 = 5;
const H264_SPS_NALU_TYPE: u8 = 7;
const H264_PPS_NALU_TYPE: u8 = 8;
const H264_AUD_NALU_TYPE: u8 = 9;
const H264_FILLER_NALU_TYPE: u8 = 12;
const FUA_NALU_TYPE: u8 = 28;
const FUA_HEADER_SIZE: usize = 2;

/// RFC 6184 non-interleaved mode: single NAL units and FU-A. The last SPS and
/// PPS seen are repeated in front of every IDR that arrives without them.
#[derive(Debug, Default, Clone)]
pub struct H264Payloader {
    sps_nalu: Option<Bytes>,
    pps_nalu: Option<Bytes>,
}

impl H264Payloader {
    fn emit(nalu: &Bytes, mtu: usize, payloads: &mut Vec<Bytes>) {
        if nalu.len() <= mtu {
            payloads.push(nalu.clone());
            return;
        }
        if mtu <= FUA_HEADER_SIZE {
            return;
        }

        let max_fragment_size = mtu - FUA_HEADER_SIZE;
        let nalu_type = nalu[0] & H264_NALU_TYPE_BITMASK;
        let indicator = (nalu[0] & H264_NALU_REF_IDC_BITMASK) | FUA_NALU_TYPE;

        // the NAL header octet travels in the FU indicator and header
        let data = &nalu[1..];
        let fragments = data.chunks(max_fragment_size);
        let last = fragments.len() - 1;
        for (i, fragment) in fragments.enumerate() {
            let mut out = BytesMut::with_capacity(FUA_HEADER_SIZE + fragment.len());
            out.put_u8(indicator);

            let mut header = nalu_type;
            if i == 0 {
                header |= 1 << 7;
            }
            if i == last {
                header |= 1 << 6;
            }
            out.put_u8(header);
            out.put(fragment);
            payloads.push(out.freeze());
        }
    }
}

impl Payloader for H264Payloader {
    fn payload(&mut self, mtu: usize, sample: &Bytes) -> Result<Vec<Bytes>> {
        if sample.is_empty() || mtu == 0 {
            return Ok(vec![]);
        }

        let mut payloads = vec![];
        let (mut sps_sent, mut pps_sent) = (false, false);
        for nalu in split_annexb(sample) {
            match nalu[0] & H264_NALU_TYPE_BITMASK {
                H264_AUD_NALU_TYPE | H264_FILLER_NALU_TYPE => continue,
                H264_SPS_NALU_TYPE => {
                    self.sps_nalu = Some(nalu.clone());
                    sps_sent = true;
                }
                H264_PPS_NALU_TYPE => {
                    self.pps_nalu = Some(nalu.clone());
                    pps_sent = true;
                }
                H264_IDR_NALU_TYPE => {
                    if let (false, Some(sps)) = (sps_sent, &self.sps_nalu) {
                        Self::emit(sps, mtu, &mut payloads);
                        sps_sent = true;
                    }
                    if let (false, Some(pps)) = (pps_sent, &self.pps_nalu) {
                        Self::emit(pps, mtu, &mut payloads);
                        pps_sent = true;
                    }
                }
                _ => {}
            }
            Self::emit(&nalu, mtu, &mut payloads);
        }

        Ok(payloads)
    }
}

const H265_NALU_HEADER_SIZE: usize = 2;
const H265_FU_HEADER_SIZE: usize = 1;
const H265_FU_NALU_TYPE: u8 = 49;
const H265_VPS_NALU_TYPE: u8 = 32;
const H265_SPS_NALU_TYPE: u8 = 33;
const H265_PPS_NALU_TYPE: u8 = 34;
const H265_AUD_NALU_TYPE: u8 = 35;

fn h265_nalu_type(nalu: &[u8]) -> u8 {
    (nalu[0] >> 1) & 0x3F
}

/// RFC 7798 single NAL unit packets and fragmentation units. VPS, SPS and
/// PPS are repeated in front of every IRAP picture that arrives without them.
#[derive(Debug, Default, Clone)]
pub struct H265Payloader {
    parameter_sets: [Option<Bytes>; 3],
}

impl H265Payloader {
    fn emit(nalu: &Bytes, mtu: usize, payloads: &mut Vec<Bytes>) {
        if nalu.len() <= mtu {
            payloads.push(nalu.clone());
            return;
        }
        if mtu <= H265_NALU_HEADER_SIZE + H265_FU_HEADER_SIZE || nalu.len() <= H265_NALU_HEADER_SIZE
        {
            return;
        }

        let max_fragment_size = mtu - H265_NALU_HEADER_SIZE - H265_FU_HEADER_SIZE;
        let nalu_type = h265_nalu_type(nalu);
        // keep F, layer id and tid; replace the type
        let payload_header = [(nalu[0] & 0x81) | (H265_FU_NALU_TYPE << 1), nalu[1]];

        let data = &nalu[H265_NALU_HEADER_SIZE..];
        let fragments = data.chunks(max_fragment_size);
        let last = fragments.len() - 1;
        for (i, fragment) in fragments.enumerate() {
            let mut out = BytesMut::with_capacity(
                H265_NALU_HEADER_SIZE + H265_FU_HEADER_SIZE + fragment.len(),
            );
            out.put(&payload_header[..]);
            let mut fu_header = nalu_type;
            if i == 0 {
                fu_header |= 1 << 7;
            }
            if i == last {
                fu_header |= 1 << 6;
            }
            out.put_u8(fu_header);
            out.put(fragment);
            payloads.push(out.freeze());
        }
    }
}

impl Payloader for H265Payloader {
    fn payload(&mut self, mtu: usize, sample: &Bytes) -> Result<Vec<Bytes>> {
        if sample.is_empty() || mtu == 0 {
            return Ok(vec![]);
        }

        let mut payloads = vec![];
        let mut sent = [false; 3];
        for nalu in split_annexb(sample) {
            if nalu.len() < H265_NALU_HEADER_SIZE {
                continue;
            }
            let nalu_type = h265_nalu_type(&nalu);
            match nalu_type {
                H265_AUD_NALU_TYPE => continue,
                H265_VPS_NALU_TYPE..=H265_PPS_NALU_TYPE => {
                    let i = (nalu_type - H265_VPS_NALU_TYPE) as usize;
                    self.parameter_sets[i] = Some(nalu.clone());
                    sent[i] = true;
                }
                // IRAP
                16..=21 => {
                    for (i, set) in self.parameter_sets.iter().enumerate() {
                        if let (false, Some(set)) = (sent[i], set) {
                            Self::emit(set, mtu, &mut payloads);
                            sent[i] = true;
                        }
                    }
                }
                _ => {}
            }
            Self::emit(&nalu, mtu, &mut payloads);
        }

        Ok(payloads)
    }
}

const H263_HEADER_SIZE: usize = 2;
const H263_P_BIT: u8 = 0x04;

/// RFC 4629: the picture start code is elided from the first packet and
/// signalled with the P bit.
#[derive(Debug, Default, Clone, Copy)]
pub struct H263Payloader;

impl Payloader for H263Payloader {
    fn payload(&mut self, mtu: usize, sample: &Bytes) -> Result<Vec<Bytes>> {
        if sample.is_empty() || mtu <= H263_HEADER_SIZE {
            return Ok(vec![]);
        }
        if sample.len() < 3 || sample[0] != 0 || sample[1] != 0 || sample[2] & 0xFC != 0x80 {
            return Err(Error::Malformed("H263 picture without start code"));
        }

        let max_fragment_size = mtu - H263_HEADER_SIZE;
        let payloads = sample[2..]
            .chunks(max_fragment_size)
            .enumerate()
            .map(|(i, fragment)| {
                let mut out = BytesMut::with_capacity(H263_HEADER_SIZE + fragment.len());
                out.put_u8(if i == 0 { H263_P_BIT } else { 0 });
                out.put_u8(0);
                out.put(fragment);
                out.freeze()
            })
            .collect();
        Ok(payloads)
    }
}

/// No mode request in the CMR field.
const AMR_CMR_NONE: u8 = 0xF0;

/// RFC 4867 octet-aligned mode, all frames of a sample in one packet.
#[derive(Debug, Clone, Copy)]
pub struct AmrPayloader {
    wideband: bool,
}

impl Payloader for AmrPayloader {
    fn payload(&mut self, _mtu: usize, sample: &Bytes) -> Result<Vec<Bytes>> {
        let mut toc = vec![];
        let mut frames = BytesMut::new();
        let mut offset = 0;
        while offset < sample.len() {
            let b = sample[offset];
            let frame_type = (b >> 3) & 0x0F;
            let bits = amr::frame_bits(self.wideband, frame_type)
                .ok_or(Error::Malformed("reserved AMR frame type"))?;
            let len = (bits as usize + 7) / 8;
            offset += 1;
            if offset + len > sample.len() {
                return Err(Error::Malformed("truncated AMR frame"));
            }
            toc.push(b & 0x7C);
            frames.put(&sample[offset..offset + len]);
            offset += len;
        }
        if toc.is_empty() {
            return Ok(vec![]);
        }

        let mut out = BytesMut::with_capacity(1 + toc.len() + frames.len());
        out.put_u8(AMR_CMR_NONE);
        let last = toc.len() - 1;
        for (i, entry) in toc.into_iter().enumerate() {
            // F bit: another ToC entry follows
            out.put_u8(if i < last { entry | 0x80 } else { entry });
        }
        out.put(frames);
        Ok(vec![out.freeze()])
    }
}

/// Turns samples into RTP packets: sequence numbering, timestamps and the
/// marker bit.
pub struct Packetizer {
    mode: PayloadMode,
    payload_type: u8,
    ssrc: u32,
    mtu: usize,
    clock_rate: u32,
    rtp_timebase: u32,
    next_ext_seq: u32,
    cvo_extension_id: Option<u8>,
    first_packet: bool,
    payloader: Box<dyn Payloader + Send + Sync>,
}

impl Packetizer {
    /// Starts from a random timestamp and sequence number.
    pub fn new(
        mode: PayloadMode,
        payload_type: u8,
        ssrc: u32,
        mtu: usize,
        cvo_extension_id: Option<u8>,
    ) -> Self {
        Self::with_rng(
            mode,
            payload_type,
            ssrc,
            mtu,
            cvo_extension_id,
            &mut rand::thread_rng(),
        )
    }

    pub fn with_rng<R: Rng>(
        mode: PayloadMode,
        payload_type: u8,
        ssrc: u32,
        mtu: usize,
        cvo_extension_id: Option<u8>,
        rng: &mut R,
    ) -> Self {
        Packetizer {
            mode,
            payload_type,
            ssrc,
            mtu,
            clock_rate: mode.clock_rate(),
            rtp_timebase: rng.gen(),
            next_ext_seq: rng.gen::<u16>() as u32,
            cvo_extension_id,
            first_packet: true,
            payloader: new_payloader(mode),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn rtp_timebase(&self) -> u32 {
        self.rtp_timebase
    }

    /// Extended sequence number the next packet will carry.
    pub fn next_ext_seq(&self) -> u32 {
        self.next_ext_seq
    }

    pub fn rtp_time(&self, timestamp_us: i64) -> u32 {
        let ticks = (timestamp_us as i128 * self.clock_rate as i128 / 1_000_000) as u32;
        self.rtp_timebase.wrapping_add(ticks)
    }

    /// Packets carrying `sample`, each with its extended sequence number in
    /// `meta.ext_seq`.
    pub fn packetize(&mut self, sample: &MediaSample) -> Result<Vec<Packet>> {
        // room for the fixed header and a one-byte CVO extension
        let header_room = 12 + if self.cvo_extension_id.is_some() { 8 } else { 0 };
        let mtu = self.mtu.saturating_sub(header_room);
        let payloads = self.payloader.payload(mtu, &sample.data)?;
        let timestamp = self.rtp_time(sample.timestamp_us);

        let last = payloads.len().saturating_sub(1);
        let mut packets = Vec::with_capacity(payloads.len());
        for (i, payload) in payloads.into_iter().enumerate() {
            let marker = if self.mode.is_video() {
                i == last
            } else {
                self.first_packet
            };
            self.first_packet = false;

            let ext_seq = self.next_ext_seq;
            self.next_ext_seq = self.next_ext_seq.wrapping_add(1);

            let mut header = Header {
                version: 2,
                marker,
                payload_type: self.payload_type,
                sequence_number: ext_seq as u16,
                timestamp,
                ssrc: self.ssrc,
                ..Default::default()
            };
            if let (true, Some(id), Some(cvo)) = (
                self.mode.is_video() && i == last,
                self.cvo_extension_id,
                sample.cvo,
            ) {
                header.set_extension(id, cvo.marshal()?)?;
            }

            packets.push(Packet {
                header,
                payload,
                meta: PacketMeta {
                    ext_seq,
                    timestamp_us: sample.timestamp_us,
                    cvo: sample.cvo,
                    ..Default::default()
                },
            });
        }
        Ok(packets)
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::marshal::MarshalSize;
    use crate::packet::extension::VideoOrientation;

    fn annexb(nals: &[&[u8]]) -> Bytes {
        let mut out = BytesMut::new();
        for nal in nals {
            out.put(&[0u8, 0, 0, 1][..]);
            out.put(*nal);
        }
        out.freeze()
    }

    #[test]
    fn test_split_annexb() {
        let data = Bytes::from_static(&[0, 0, 0, 1, 0x67, 1, 2, 0, 0, 1, 0x68, 3, 0, 0, 0, 1, 0x65]);
        let nals = split_annexb(&data);
        assert_eq!(
            nals,
            vec![
                Bytes::from_static(&[0x67, 1, 2]),
                Bytes::from_static(&[0x68, 3]),
                Bytes::from_static(&[0x65]),
            ]
        );

        let raw = Bytes::from_static(&[0x41, 9, 9]);
        assert_eq!(split_annexb(&raw), vec![raw.clone()]);
        assert!(split_annexb(&Bytes::new()).is_empty());
    }

    #[test]
    fn test_h264_fu_a() -> Result<()> {
        let mut pck = H264Payloader::default();
        let mut idr = vec![0x65];
        idr.extend((0..25u8).collect::<Vec<_>>());
        let payloads = pck.payload(10, &annexb(&[&idr]))?;

        // 25 bytes after the header, 8 per fragment
        assert_eq!(payloads.len(), 4);
        assert_eq!(&payloads[0][..2], &[0x7C, 0x85]);
        assert_eq!(&payloads[1][..2], &[0x7C, 0x05]);
        assert_eq!(&payloads[3][..2], &[0x7C, 0x45]);
        assert_eq!(payloads[3].len(), 3);

        let rebuilt: Vec<u8> = payloads.iter().flat_map(|p| p[2..].to_vec()).collect();
        assert_eq!(rebuilt, idr[1..].to_vec());
        Ok(())
    }

    #[test]
    fn test_h264_parameter_sets_before_every_idr() -> Result<()> {
        let mut pck = H264Payloader::default();
        let sps: &[u8] = &[0x67, 0x42, 0x00, 0x1f];
        let pps: &[u8] = &[0x68, 0xce, 0x3c, 0x80];
        let idr: &[u8] = &[0x65, 0x88, 0x84];
        let non_idr: &[u8] = &[0x41, 0x9a];
        let aud: &[u8] = &[0x09, 0xf0];

        let first = pck.payload(1200, &annexb(&[aud, sps, pps, idr]))?;
        assert_eq!(first, vec![sps, pps, idr]);

        let delta = pck.payload(1200, &annexb(&[non_idr]))?;
        assert_eq!(delta, vec![non_idr]);

        // IDR without parameter sets gets the cached ones
        let second = pck.payload(1200, &annexb(&[idr]))?;
        assert_eq!(second, vec![sps, pps, idr]);
        Ok(())
    }

    #[test]
    fn test_h265_fu() -> Result<()> {
        let mut pck = H265Payloader::default();
        // IDR_W_RADL, layer 0, tid 1
        let mut idr = vec![0x26, 0x01];
        idr.extend(0..20u8);
        let payloads = pck.payload(10, &annexb(&[&idr]))?;

        // 7 bytes per fragment after the 3 byte FU headers
        assert_eq!(payloads.len(), 3);
        assert_eq!(&payloads[0][..3], &[0x62, 0x01, 0x80 | 19]);
        assert_eq!(&payloads[1][..3], &[0x62, 0x01, 19]);
        assert_eq!(&payloads[2][..3], &[0x62, 0x01, 0x40 | 19]);
        let rebuilt: Vec<u8> = payloads.iter().flat_map(|p| p[3..].to_vec()).collect();
        assert_eq!(rebuilt, idr[2..].to_vec());
        Ok(())
    }

    #[test]
    fn test_h265_parameter_sets_before_irap() -> Result<()> {
        let mut pck = H265Payloader::default();
        let vps: &[u8] = &[0x40, 0x01, 0x0c];
        let sps: &[u8] = &[0x42, 0x01, 0x01];
        let pps: &[u8] = &[0x44, 0x01, 0xc1];
        let idr: &[u8] = &[0x26, 0x01, 0xaf];
        let trail: &[u8] = &[0x02, 0x01, 0xd0];

        pck.payload(1200, &annexb(&[vps, sps, pps, idr]))?;
        assert_eq!(pck.payload(1200, &annexb(&[trail]))?, vec![trail]);
        assert_eq!(
            pck.payload(1200, &annexb(&[idr]))?,
            vec![vps, sps, pps, idr]
        );
        Ok(())
    }

    #[test]
    fn test_h263_picture_start() -> Result<()> {
        let mut pck = H263Payloader;
        let picture = Bytes::from_static(&[0x00, 0x00, 0x80, 0x02, 0x1c, 1, 2, 3, 4, 5]);
        let payloads = pck.payload(6, &picture)?;
        assert_eq!(
            payloads,
            vec![
                Bytes::from_static(&[0x04, 0x00, 0x80, 0x02, 0x1c, 1]),
                Bytes::from_static(&[0x00, 0x00, 2, 3, 4, 5]),
            ]
        );

        assert!(pck.payload(6, &Bytes::from_static(&[1, 2, 3])).is_err());
        Ok(())
    }

    #[test]
    fn test_amr_octet_aligned() -> Result<()> {
        let mut pck = AmrPayloader { wideband: false };
        // two 12.2 kbit/s frames (244 bits, 31 bytes) in storage format
        let mut sample = vec![0x3C];
        sample.extend([0xAA; 31]);
        sample.push(0x3C);
        sample.extend([0xBB; 31]);

        let payloads = pck.payload(1200, &Bytes::from(sample))?;
        assert_eq!(payloads.len(), 1);
        let p = &payloads[0];
        assert_eq!(&p[..3], &[0xF0, 0xBC, 0x3C]);
        assert_eq!(p.len(), 3 + 62);
        assert_eq!(p[3], 0xAA);
        assert_eq!(p[3 + 31], 0xBB);

        let truncated = Bytes::from_static(&[0x3C, 0xAA]);
        assert!(pck.payload(1200, &truncated).is_err());
        Ok(())
    }

    #[test]
    fn test_packetizer_sequencing_and_marker() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut pkt = Packetizer::with_rng(PayloadMode::H264, 96, 0x1111, 100, Some(3), &mut rng);
        let base = pkt.rtp_timebase();
        let first_seq = pkt.next_ext_seq();

        let mut idr = vec![0x65];
        idr.extend([0x11; 200]);
        let mut sample = MediaSample::new(annexb(&[&idr]), 40_000);
        sample.cvo = Some(VideoOrientation::from_degrees(90));

        let packets = pkt.packetize(&sample)?;
        assert!(packets.len() > 2);
        for (i, p) in packets.iter().enumerate() {
            assert_eq!(p.header.sequence_number, (first_seq + i as u32) as u16);
            assert_eq!(p.meta.ext_seq, first_seq + i as u32);
            assert_eq!(p.header.timestamp, base.wrapping_add(3600));
            assert_eq!(p.header.ssrc, 0x1111);
            assert!(p.marshal_size() <= 100);
        }
        let last = packets.last().expect("packets");
        assert!(last.header.marker);
        assert_eq!(last.parse_cvo(3), Some(VideoOrientation::from_degrees(90)));
        assert!(packets[..packets.len() - 1]
            .iter()
            .all(|p| !p.header.marker && !p.header.extension));
        Ok(())
    }

    #[test]
    fn test_audio_marker_on_first_packet_only() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        let mut pkt = Packetizer::with_rng(PayloadMode::AmrNb, 97, 1, 1200, None, &mut rng);
        let mut frame = vec![0x3C];
        frame.extend([0; 31]);
        let sample = MediaSample::new(Bytes::from(frame), 0);

        let first = pkt.packetize(&sample)?;
        let second = pkt.packetize(&MediaSample {
            timestamp_us: 20_000,
            ..sample
        })?;
        assert!(first[0].header.marker);
        assert!(!second[0].header.marker);
        assert_eq!(
            second[0].header.timestamp.wrapping_sub(first[0].header.timestamp),
            160
        );
        Ok(())
    }
}
