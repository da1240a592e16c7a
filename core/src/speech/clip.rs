//! Synthesized audio clips and WAV rendering.

use super::sink::PlaybackError;
use std::time::Duration;

pub const DEFAULT_PCM_RATE: u32 = 24_000;

/// Highest sample rate accepted from a synthesizer
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Highest channel count accepted from a synthesizer
pub const MAX_CHANNELS: u16 = 8;

const WAV_HEADER_LEN: usize = 44;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// Raw little-endian signed 16-bit PCM
    Pcm16 { sample_rate: u32, channels: u16 },
    /// RIFF/WAVE container
    Wav,
}

/// Encoded audio returned by a synthesizer
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub format: AudioFormat,
    pub data: Vec<u8>,
}

/// PCM view of a clip
struct Pcm<'a> {
    sample_rate: u32,
    channels: u16,
    samples: &'a [u8],
}

impl AudioClip {
    pub fn pcm16(sample_rate: u32, channels: u16, data: Vec<u8>) -> Self {
        Self {
            format: AudioFormat::Pcm16 {
                sample_rate,
                channels,
            },
            data,
        }
    }

    pub fn wav(data: Vec<u8>) -> Self {
        Self {
            format: AudioFormat::Wav,
            data,
        }
    }

    /// Playback length at normal speed
    pub fn duration(&self) -> Result<Duration, PlaybackError> {
        let pcm = self.pcm()?;
        let bytes_per_sec = pcm.sample_rate as u64 * pcm.channels as u64 * 2;
        if bytes_per_sec == 0 {
            return Err(PlaybackError::Decode("zero sample rate".into()));
        }
        Ok(Duration::from_micros(
            pcm.samples.len() as u64 * 1_000_000 / bytes_per_sec,
        ))
    }

    /// Produce a PCM16 WAV with samples scaled by `volume` and the declared
    /// sample rate scaled by `speed`.
    pub fn render_wav(&self, volume: f32, speed: f32) -> Result<Vec<u8>, PlaybackError> {
        let pcm = self.pcm()?;
        let speed = if speed.is_finite() && speed > 0.0 { speed } else { 1.0 };
        let rate = ((pcm.sample_rate as f32) * speed)
            .round()
            .clamp(1.0, (MAX_SAMPLE_RATE * 2) as f32) as u32;

        let mut samples = pcm.samples[..pcm.samples.len() & !1].to_vec();
        if (volume - 1.0).abs() > f32::EPSILON {
            scale_pcm16(&mut samples, volume);
        }
        wav_bytes(rate, pcm.channels, &samples)
    }

    fn pcm(&self) -> Result<Pcm<'_>, PlaybackError> {
        match self.format {
            AudioFormat::Pcm16 {
                sample_rate,
                channels,
            } => {
                check_layout(sample_rate, channels)?;
                Ok(Pcm {
                    sample_rate,
                    channels,
                    samples: &self.data,
                })
            }
            AudioFormat::Wav => parse_wav(&self.data),
        }
    }
}

/// Reject sample layouts no output device can play
pub(crate) fn check_layout(sample_rate: u32, channels: u16) -> Result<(), PlaybackError> {
    if sample_rate == 0 || sample_rate > MAX_SAMPLE_RATE {
        return Err(PlaybackError::Decode(format!(
            "unsupported sample rate {sample_rate} Hz"
        )));
    }
    if channels == 0 || channels > MAX_CHANNELS {
        return Err(PlaybackError::Decode(format!(
            "unsupported channel count {channels}"
        )));
    }
    Ok(())
}

fn scale_pcm16(data: &mut [u8], gain: f32) {
    for chunk in data.chunks_exact_mut(2) {
        let s = i16::from_le_bytes([chunk[0], chunk[1]]);
        let scaled = (s as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        chunk.copy_from_slice(&scaled.to_le_bytes());
    }
}

fn wav_bytes(sample_rate: u32, channels: u16, samples: &[u8]) -> Result<Vec<u8>, PlaybackError> {
    let too_large = || PlaybackError::Decode("audio too large for a WAV header".into());
    let block_align = channels.checked_mul(2).ok_or_else(too_large)?;
    let byte_rate = sample_rate
        .checked_mul(u32::from(block_align))
        .ok_or_else(too_large)?;
    let data_len = u32::try_from(samples.len()).map_err(|_| too_large())?;
    let riff_len = data_len.checked_add(36).ok_or_else(too_large)?;

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + samples.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&riff_len.to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(samples);
    Ok(out)
}

fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    buf.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    buf.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn parse_wav(buf: &[u8]) -> Result<Pcm<'_>, PlaybackError> {
    if buf.len() < 12 || &buf[0..4] != b"RIFF" || &buf[8..12] != b"WAVE" {
        return Err(PlaybackError::Decode("not a RIFF/WAVE stream".into()));
    }

    let mut fmt: Option<(u16, u16, u32, u16)> = None;
    let mut idx = 12;
    while idx + 8 <= buf.len() {
        let chunk_id = &buf[idx..idx + 4];
        let size = read_u32(buf, idx + 4).unwrap_or(0) as usize;
        let body = idx + 8;
        if chunk_id == b"fmt " {
            fmt = Some((
                read_u16(buf, body).unwrap_or(0),
                read_u16(buf, body + 2).unwrap_or(0),
                read_u32(buf, body + 4).unwrap_or(0),
                read_u16(buf, body + 14).unwrap_or(0),
            ));
        } else if chunk_id == b"data" {
            let (format_tag, channels, sample_rate, bits) =
                fmt.ok_or_else(|| PlaybackError::Decode("data chunk before fmt chunk".into()))?;
            if format_tag != 1 || bits != 16 {
                return Err(PlaybackError::Decode(format!(
                    "unsupported WAV encoding (format {format_tag}, {bits} bits)"
                )));
            }
            check_layout(sample_rate, channels)?;
            // Streaming encoders may write a placeholder size
            let end = body.saturating_add(size).min(buf.len());
            return Ok(Pcm {
                sample_rate,
                channels,
                samples: &buf[body..end],
            });
        }
        // Chunks are word aligned
        idx = body.saturating_add(size).saturating_add(size & 1);
    }
    Err(PlaybackError::Decode("missing data chunk".into()))
}
