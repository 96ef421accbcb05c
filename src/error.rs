use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Header length, version or payload type out of range.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),
    /// The extended sequence number is already queued.
    #[error("duplicate sequence number {0}")]
    DuplicateSequence(u32),
    /// Packet belongs to a timeline that was already played out or reset.
    #[error("stale packet with sequence number {0}")]
    StaleTimeline(u32),
    /// SSRC differs from the one latched by the stream.
    #[error("unknown ssrc {0:#010x}")]
    UnknownSsrc(u32),
    /// errno from send or recv; the owning stream is marked dead.
    #[error("socket i/o: {0}")]
    SocketIo(#[from] io::Error),
    /// Payload could not be parsed by the assembler.
    #[error("assembler format error: {0}")]
    AssemblerFormat(String),
    /// Jitter buffer or NACK ledger past its high-water mark.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(&'static str),
    /// Unrecoverable construction-time failure.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("packet is not large enough")]
    ShortPacket,
    #[error("buffer too short to be written")]
    BufferTooShort,
    #[error("invalid packet version")]
    BadVersion,
    #[error("invalid header")]
    InvalidHeader,
    #[error("wrong packet type")]
    WrongType,
    #[error("too many reports")]
    TooManyReports,
    #[error("too many chunks")]
    TooManyChunks,
    #[error("too many sources")]
    TooManySources,
    #[error("SDES must be < 255 octets long")]
    SdesTextTooLong,
    #[error("SDES item missing type")]
    SdesMissingType,
    #[error("reason must be < 255 octets long")]
    ReasonTooLong,
    #[error("invalid padding value")]
    WrongPadding,
    #[error("header extension payload must be in 32-bit words")]
    HeaderExtensionPayloadNot32BitWords,
    #[error("header extension id out of range")]
    HeaderExtensionIdRange,
    #[error("header extension payload too large")]
    HeaderExtensionSize,

    /// Elementary stream queue cannot find an access unit boundary yet.
    #[error("not enough data")]
    NotEnoughData,
    /// Elementary stream contains an invalid start code or sync word.
    #[error("malformed elementary stream: {0}")]
    Malformed(&'static str),
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("stream for track {0} not found")]
    StreamNotFound(usize),
    #[error("track {0} not present in session description")]
    TrackNotFound(usize),
    #[error("stream for track {0} already exists")]
    StreamExists(usize),
    #[error("port {0} has no RTCP successor")]
    InvalidPort(u16),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("writer stopped")]
    WriterStopped,

    #[error("{0}")]
    Other(String),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ConnectionClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::ConnectionClosed
    }
}

impl Error {
    /// Errors that only affect the packet that produced them.
    pub fn is_per_packet(&self) -> bool {
        matches!(
            self,
            Error::MalformedPacket(_)
                | Error::DuplicateSequence(_)
                | Error::StaleTimeline(_)
                | Error::UnknownSsrc(_)
                | Error::AssemblerFormat(_)
                | Error::ShortPacket
                | Error::BadVersion
                | Error::InvalidHeader
                | Error::WrongType
                | Error::WrongPadding
        )
    }
}
