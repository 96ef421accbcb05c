#![warn(rust_2018_idioms)]

//! Real-time RTP/RTCP media transport.
//!
//! The receive side is a [`Connection`](connection::Connection): it owns one
//! stream per track, reorders packets per SSRC in a jitter buffer, turns
//! payloads back into access units and runs the RTCP feedback loop (RR,
//! NACK, FIR, TMMBR). The send side is a [`Writer`](writer::Writer), which
//! packetizes samples from a media source and answers the same feedback.

pub mod assembler;
pub mod config;
pub mod connection;
pub mod error;
pub mod es_queue;
pub mod jitter;
pub mod marshal;
pub mod notify;
pub mod packet;
pub mod rtcp;
pub mod session_description;
pub mod source;
pub mod writer;

pub use config::{ConnectionConfig, StreamConfig, WriterConfig};
pub use connection::{make_port_pair, make_rtp_socket_pair, Connection, StreamTransport};
pub use error::{Error, Result};
pub use notify::{Notify, NotifyReceiver, NotifySender, QualityReport, RtcpEvent};
pub use session_description::{parse_format_desc, SessionDescription, TrackDescription};
pub use writer::{MediaSample, MediaSource, PayloadMode, Writer};
