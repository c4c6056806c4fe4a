//! Decoded watcher output and the codecs that produce it.

pub mod audio;
pub mod image;

pub use self::audio::{decode_wav, encode_wav, AudioClip};
pub use self::image::{decode_image, encode_png, ImageTensor};

use crate::config::PayloadKind;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Image(ImageTensor),
    Audio(AudioClip),
}

impl Payload {
    /// Placeholder served before anything has been fetched
    pub fn sentinel(kind: PayloadKind) -> Self {
        match kind {
            PayloadKind::Image => Payload::Image(ImageTensor::sentinel()),
            PayloadKind::Audio => Payload::Audio(AudioClip::sentinel()),
        }
    }

    pub fn decode(kind: PayloadKind, bytes: &[u8]) -> Result<Self> {
        match kind {
            PayloadKind::Image => decode_image(bytes).map(Payload::Image),
            PayloadKind::Audio => decode_wav(bytes).map(Payload::Audio),
        }
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Image(_) => PayloadKind::Image,
            Payload::Audio(_) => PayloadKind::Audio,
        }
    }

    pub fn as_image(&self) -> Option<&ImageTensor> {
        match self {
            Payload::Image(tensor) => Some(tensor),
            Payload::Audio(_) => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioClip> {
        match self {
            Payload::Audio(clip) => Some(clip),
            Payload::Image(_) => None,
        }
    }

    /// Short shape description for logs
    pub fn describe(&self) -> String {
        match self {
            Payload::Image(t) => format!(
                "image {}x{}x{} ({} frame(s))",
                t.width, t.height, t.channels, t.frames
            ),
            Payload::Audio(a) => format!(
                "audio {} ch, {} samples @ {} Hz",
                a.channel_count(),
                a.sample_count(),
                a.sample_rate
            ),
        }
    }
}
