use serde::Deserialize;

use crate::writer::packetizer::PayloadMode;

/// Options recognised when a [`Connection`](crate::connection::Connection)
/// is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Send a FIR every 5 s on every video stream, on top of on-demand ones.
    pub regularly_request_fir: bool,
    /// Video-over-LTE calls carry parameter sets in band; SDP-provided
    /// `sprop-*` sets are then ignored by the video assemblers.
    pub vilte_mode: bool,
}

impl ConnectionConfig {
    pub fn with_regularly_request_fir(mut self, enabled: bool) -> Self {
        self.regularly_request_fir = enabled;
        self
    }

    pub fn with_vilte_mode(mut self, enabled: bool) -> Self {
        self.vilte_mode = enabled;
        self
    }
}

/// Per-stream tunables for [`Connection::add_stream`](crate::connection::Connection::add_stream)
/// and the [`Writer`](crate::writer::Writer).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// SSRC used as the sender of our RTCP packets. 0 picks a random one.
    pub self_ssrc: u32,
    /// Lower bound of the reported jitter time.
    pub static_jitter_time_ms: u32,
    /// TMMBR target in bits per second; 0 disables TMMBR.
    pub target_bitrate: i32,
    /// IP_TOS byte (DSCP and ECN bits); negative leaves the socket default.
    pub ip_tos_ecn: i32,
    /// Network handle applied as `SO_MARK`; 0 leaves the socket default.
    pub socket_network_handle: i64,
    /// One-byte header extension id carrying CVO, if negotiated.
    pub cvo_extension_id: Option<u8>,
    /// SDES CNAME of our side.
    pub cname: String,
}

pub const DEFAULT_STATIC_JITTER_TIME_MS: u32 = 50;

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            self_ssrc: 0,
            static_jitter_time_ms: DEFAULT_STATIC_JITTER_TIME_MS,
            target_bitrate: 0,
            ip_tos_ecn: -1,
            socket_network_handle: 0,
            cvo_extension_id: None,
            cname: "rtp-transport".to_owned(),
        }
    }
}

impl StreamConfig {
    pub fn with_self_ssrc(mut self, ssrc: u32) -> Self {
        self.self_ssrc = ssrc;
        self
    }

    pub fn with_static_jitter_time_ms(mut self, ms: u32) -> Self {
        self.static_jitter_time_ms = ms;
        self
    }

    pub fn with_target_bitrate(mut self, bps: i32) -> Self {
        self.target_bitrate = bps;
        self
    }

    pub fn with_ip_tos_ecn(mut self, tos: i32) -> Self {
        self.ip_tos_ecn = tos;
        self
    }

    pub fn with_socket_network_handle(mut self, handle: i64) -> Self {
        self.socket_network_handle = handle;
        self
    }

    pub fn with_cvo_extension_id(mut self, id: u8) -> Self {
        self.cvo_extension_id = Some(id);
        self
    }

    pub fn with_cname(mut self, cname: impl Into<String>) -> Self {
        self.cname = cname.into();
        self
    }

    /// Our SSRC, drawing a random one when none was configured.
    pub(crate) fn resolve_self_ssrc(&self) -> u32 {
        if self.self_ssrc != 0 {
            self.self_ssrc
        } else {
            rand::random::<u32>() | 1
        }
    }
}

/// Sender settings for a [`Writer`](crate::writer::Writer); SSRC, CNAME and
/// CVO id come from the accompanying [`StreamConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub mode: PayloadMode,
    pub payload_type: u8,
    /// Largest RTP packet, header included.
    pub mtu: usize,
}

pub const DEFAULT_WRITER_MTU: usize = 1200;

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            mode: PayloadMode::H264,
            payload_type: 96,
            mtu: DEFAULT_WRITER_MTU,
        }
    }
}

impl WriterConfig {
    pub fn new(mode: PayloadMode, payload_type: u8) -> Self {
        WriterConfig {
            mode,
            payload_type,
            ..Default::default()
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_stream_config_from_json() {
        let cfg: StreamConfig = serde_json::from_str(
            r#"{"self_ssrc": 1234, "target_bitrate": 512000, "cvo_extension_id": 4}"#,
        )
        .expect("valid json");
        assert_eq!(cfg.self_ssrc, 1234);
        assert_eq!(cfg.target_bitrate, 512000);
        assert_eq!(cfg.cvo_extension_id, Some(4));
        // unspecified fields keep their defaults
        assert_eq!(cfg.static_jitter_time_ms, DEFAULT_STATIC_JITTER_TIME_MS);
        assert_eq!(cfg.ip_tos_ecn, -1);
    }

    #[test]
    fn test_connection_config_builders() {
        let cfg = ConnectionConfig::default()
            .with_regularly_request_fir(true)
            .with_vilte_mode(true);
        assert!(cfg.regularly_request_fir);
        assert!(cfg.vilte_mode);

        let parsed: ConnectionConfig = serde_json::from_str("{}").expect("valid json");
        assert_eq!(parsed, ConnectionConfig::default());
    }

    #[test]
    fn test_resolve_self_ssrc() {
        assert_eq!(StreamConfig::default().with_self_ssrc(7).resolve_self_ssrc(), 7);
        assert_ne!(StreamConfig::default().resolve_self_ssrc(), 0);
    }

    #[test]
    fn test_writer_config_from_json() {
        let cfg: WriterConfig =
            serde_json::from_str(r#"{"mode": "AmrWb", "payload_type": 100}"#).expect("valid json");
        assert_eq!(cfg.mode, PayloadMode::AmrWb);
        assert_eq!(cfg.payload_type, 100);
        assert_eq!(cfg.mtu, DEFAULT_WRITER_MTU);
    }
}
