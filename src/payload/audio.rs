use crate::error::{Result, WatchError};
use std::io::Cursor;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Planar samples in `[-1, 1]`: `channels[c][i]`
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl AudioClip {
    /// Empty mono clip
    pub fn sentinel() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: vec![Vec::new()],
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn sample_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }
}

fn decode_err(e: impl std::fmt::Display) -> WatchError {
    WatchError::Decode(e.to_string())
}

pub fn decode_wav(bytes: &[u8]) -> Result<AudioClip> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(decode_err)?;
    let spec = reader.spec();
    let channel_count = spec.channels as usize;
    if channel_count == 0 {
        return Err(WatchError::Decode("wav declares zero channels".to_string()));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(decode_err)?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(decode_err)?
        }
    };

    let mut channels = vec![Vec::with_capacity(interleaved.len() / channel_count); channel_count];
    for frame in interleaved.chunks_exact(channel_count) {
        for (channel, sample) in channels.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }

    Ok(AudioClip {
        sample_rate: spec.sample_rate,
        channels,
    })
}

/// 16-bit PCM WAV
pub fn encode_wav(clip: &AudioClip) -> Result<Vec<u8>> {
    let channel_count = clip.channel_count();
    if channel_count == 0 || channel_count > u16::MAX as usize {
        return Err(WatchError::Encode(format!(
            "unsupported channel count {}",
            channel_count
        )));
    }
    let samples = clip.sample_count();
    if clip.channels.iter().any(|c| c.len() != samples) {
        return Err(WatchError::Encode(
            "channels have different lengths".to_string(),
        ));
    }

    let spec = hound::WavSpec {
        channels: channel_count as u16,
        sample_rate: clip.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let encode_err = |e: hound::Error| WatchError::Encode(e.to_string());
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(encode_err)?;
        for i in 0..samples {
            for channel in &clip.channels {
                let value = (channel[i] * 32767.0).clamp(-32768.0, 32767.0) as i16;
                writer.write_sample(value).map_err(encode_err)?;
            }
        }
        writer.finalize().map_err(encode_err)?;
    }
    Ok(cursor.into_inner())
}
