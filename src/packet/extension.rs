use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::marshal::{Marshal, MarshalSize, Unmarshal};

pub const VIDEO_ORIENTATION_EXTENSION_SIZE: usize = 1;

/// Coordination of Video Orientation (3GPP TS 26.114), carried as a one-byte
/// RFC 8285 header extension.
///
///    0                   1
///    0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |  ID   | len=0 |0 0 0 0 C F R R|
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(PartialEq, Eq, Debug, Default, Copy, Clone, Serialize, Deserialize)]
pub struct VideoOrientation {
    /// Back-facing camera when set.
    pub back_camera: bool,
    pub flip: bool,
    /// Clockwise rotation in units of 90 degrees, 0..=3.
    pub rotation: u8,
}

impl VideoOrientation {
    pub fn degrees(&self) -> u32 {
        self.rotation as u32 * 90
    }

    pub fn from_degrees(degrees: u32) -> Self {
        VideoOrientation {
            rotation: ((degrees / 90) % 4) as u8,
            ..Default::default()
        }
    }
}

impl MarshalSize for VideoOrientation {
    fn marshal_size(&self) -> usize {
        VIDEO_ORIENTATION_EXTENSION_SIZE
    }
}

impl Unmarshal for VideoOrientation {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        Self: Sized,
        B: Buf,
    {
        if buf.remaining() < VIDEO_ORIENTATION_EXTENSION_SIZE {
            return Err(Error::ShortPacket);
        }

        let b = buf.get_u8();
        Ok(VideoOrientation {
            back_camera: b & 0b1000 != 0,
            flip: b & 0b0100 != 0,
            rotation: b & 0b0011,
        })
    }
}

impl Marshal for VideoOrientation {
    fn marshal_to(&self, mut buf: &mut [u8]) -> Result<usize> {
        if buf.remaining_mut() < VIDEO_ORIENTATION_EXTENSION_SIZE {
            return Err(Error::BufferTooShort);
        }
        let c = if self.back_camera { 0b1000 } else { 0 };
        let f = if self.flip { 0b0100 } else { 0 };
        buf.put_u8(c | f | (self.rotation & 0b0011));

        Ok(VIDEO_ORIENTATION_EXTENSION_SIZE)
    }
}
