use super::*;

const SDP: &str = "v=0\r
o=- 0 0 IN IP4 127.0.0.1\r
s=call\r
c=IN IP4 127.0.0.1\r
t=0 0\r
m=audio 49170 RTP/AVP 97\r
a=rtpmap:97 AMR-WB/16000/1\r
a=fmtp:97 octet-align=1; mode-set=0,1,2\r
a=control:trackID=1\r
m=video 49172 RTP/AVP 96\r
a=rtpmap:96 H264/90000\r
a=fmtp:96 packetization-mode=1;profile-level-id=42e01f;sprop-parameter-sets=Z0LgH9oBQBbpUgAAAwACAAADAGR4wZUA,aM4G4g==\r
a=control:trackID=2\r
m=audio 49174 RTP/AVP 0\r
";

#[test]
fn test_parse_tracks() -> Result<()> {
    let desc = SessionDescription::parse(SDP)?;
    assert_eq!(desc.tracks.len(), 3);

    let amr = desc.track(0)?;
    assert_eq!(amr.media, "audio");
    assert_eq!(amr.payload_type, 97);
    assert_eq!(amr.encoding_name, "AMR-WB");
    assert_eq!(amr.clock_rate_hz, 16000);
    assert_eq!(amr.channels, 1);
    assert_eq!(amr.fmtp_u32("octet-align"), Some(1));
    assert_eq!(amr.fmtp_param("Mode-Set"), Some("0,1,2"));
    assert_eq!(amr.control.as_deref(), Some("trackID=1"));

    let video = desc.track(1)?;
    assert!(video.is_video());
    assert_eq!(video.encoding_name, "H264");
    assert_eq!(video.fmtp_param("packetization-mode"), Some("1"));
    assert!(video
        .fmtp_param("sprop-parameter-sets")
        .is_some_and(|s| s.ends_with("aM4G4g==")));

    // static payload type without rtpmap
    let pcmu = desc.track(2)?;
    assert_eq!(pcmu.encoding_name, "PCMU");
    assert_eq!(pcmu.clock_rate_hz, 8000);

    assert!(matches!(desc.track(3), Err(Error::TrackNotFound(3))));
    Ok(())
}

#[test]
fn test_parse_format_desc() -> Result<()> {
    assert_eq!(parse_format_desc("H264/90000")?, (90000, 1));
    assert_eq!(parse_format_desc("L16/44100/2")?, (44100, 2));
    assert_eq!(parse_format_desc("AMR/8000/1")?, (8000, 1));
    Ok(())
}

#[test]
fn test_missing_clock_rate_uses_canonical() -> Result<()> {
    assert_eq!(parse_format_desc("H264")?, (90000, 1));
    assert_eq!(parse_format_desc("PCMA/0")?, (8000, 1));
    assert_eq!(parse_format_desc("AMR-WB")?, (16000, 1));
    assert!(parse_format_desc("X-UNKNOWN").is_err());
    assert!(parse_format_desc("H264/abc").is_err());
    Ok(())
}

#[test]
fn test_no_media_section() {
    assert!(SessionDescription::parse("v=0\r\ns=x\r\n").is_err());
}
