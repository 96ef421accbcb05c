use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::packet::extension::VideoOrientation;

/// One encoded access unit handed to the [`Writer`](super::Writer).
///
/// Video samples are Annex-B byte streams (H.264/H.265) or a picture starting
/// with its PSC (H.263). AMR samples are in storage format: a table-of-contents
/// byte followed by the frame's speech bits, repeated per frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaSample {
    pub data: Bytes,
    /// Presentation time relative to the start of the stream.
    pub timestamp_us: i64,
    pub is_key_frame: bool,
    /// Rotation to signal with the CVO header extension.
    pub cvo: Option<VideoOrientation>,
}

impl MediaSample {
    pub fn new(data: Bytes, timestamp_us: i64) -> Self {
        MediaSample {
            data,
            timestamp_us,
            ..Default::default()
        }
    }
}

/// Encoder-side collaborator the writer pulls samples from.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Next sample; `Ok(None)` marks end of stream.
    async fn read(&self) -> Result<Option<MediaSample>>;

    /// The remote side asked for a key frame (FIR or PLI).
    fn request_key_frame(&self) {}

    /// The remote side asked for a maximum bitrate (TMMBR).
    fn set_target_bitrate(&self, _bitrate: u64) {}
}
