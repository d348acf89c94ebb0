// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Canonical-format audio conversion.
//!
//! Transcription expects 16 kHz mono WAV. Capture audio arrives as 48 kHz
//! stereo PCM16, so finished utterances are downmixed, resampled with linear
//! interpolation, and wrapped in a WAV container before being handed to the
//! transcription service.

use thiserror::Error;

/// Errors raised while converting captured PCM to the canonical format.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// PCM byte length is not a whole number of samples/frames.
    #[error("malformed PCM input: {0}")]
    MalformedPcm(&'static str),
    /// Unsupported channel layout.
    #[error("unsupported channel count: {0}")]
    UnsupportedChannels(u32),
}

/// Downmix interleaved stereo PCM16 to mono by averaging sample pairs.
pub fn downmix_stereo_to_mono(pcm: &[u8]) -> Result<Vec<u8>, ConvertError> {
    if !pcm.len().is_multiple_of(4) {
        return Err(ConvertError::MalformedPcm(
            "stereo input must be a whole number of sample pairs",
        ));
    }

    let mut mono = Vec::with_capacity(pcm.len() / 2);
    for pair in pcm.chunks_exact(4) {
        let left = i16::from_le_bytes([pair[0], pair[1]]) as i32;
        let right = i16::from_le_bytes([pair[2], pair[3]]) as i32;
        let mixed = ((left + right) / 2) as i16;
        mono.extend_from_slice(&mixed.to_le_bytes());
    }
    Ok(mono)
}

/// Resample little-endian PCM16 bytes between sample rates using linear
/// interpolation between neighbouring samples.
///
/// Identity rates and inputs shorter than two samples come back as a plain
/// copy. Degenerate rate combinations that would produce a non-finite output
/// length also fall back to a copy of the input.
pub fn resample_linear(pcm: &[u8], from_rate: u32, to_rate: u32) -> Vec<u8> {
    if from_rate == to_rate {
        return pcm.to_vec();
    }

    let samples: Vec<i16> = pcm
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();
    if samples.len() < 2 {
        return pcm.to_vec();
    }

    let step = f64::from(from_rate) / f64::from(to_rate);
    let output_len_f = (samples.len() as f64 / step).ceil();
    if !output_len_f.is_finite() || output_len_f < 0.0 {
        return pcm.to_vec();
    }
    let output_len = output_len_f as usize;

    let last = samples.len() - 1;
    let mut out = Vec::with_capacity(output_len.saturating_mul(2));
    for i in 0..output_len {
        let pos = i as f64 * step;
        let idx = pos.floor() as usize;
        let sample = if idx < last {
            let frac = pos - idx as f64;
            let a = f64::from(samples[idx]);
            let b = f64::from(samples[idx + 1]);
            (a + frac * (b - a)) as i16
        } else {
            samples[last]
        };
        out.extend_from_slice(&sample.to_le_bytes());
    }

    out
}

/// Wrap little-endian PCM16 samples in a minimal RIFF/WAVE container.
///
/// The header is the fixed 44-byte uncompressed-PCM layout; the sample bytes
/// follow verbatim in a single `data` chunk.
pub fn encode_pcm_to_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Vec<u8> {
    const BITS_PER_SAMPLE: u16 = 16;
    const HEADER_LEN: usize = 44;

    let frame_size = channels * (BITS_PER_SAMPLE / 8);
    let bytes_per_sec = sample_rate * u32::from(frame_size);
    let data_len = pcm.len().min(u32::MAX as usize) as u32;

    let mut wav = Vec::with_capacity(HEADER_LEN + pcm.len());

    wav.extend_from_slice(b"RIFF");
    // Riff chunk size covers everything after this field.
    wav.extend_from_slice(&data_len.saturating_add(HEADER_LEN as u32 - 8).to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // uncompressed PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&bytes_per_sec.to_le_bytes());
    wav.extend_from_slice(&frame_size.to_le_bytes());
    wav.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);

    wav
}

/// Convert captured PCM to the canonical transcription format.
///
/// Downmixes to mono if needed, resamples to `dst_rate`, and wraps the result
/// in a WAV container. Only mono and stereo sources are supported.
pub fn to_canonical_wav(
    pcm: &[u8],
    src_rate: u32,
    src_channels: u32,
    dst_rate: u32,
    dst_channels: u32,
) -> Result<Vec<u8>, ConvertError> {
    if dst_channels != 1 {
        return Err(ConvertError::UnsupportedChannels(dst_channels));
    }
    if !pcm.len().is_multiple_of(2) {
        return Err(ConvertError::MalformedPcm("odd-length PCM input"));
    }

    let mono = match src_channels {
        1 => pcm.to_vec(),
        2 => downmix_stereo_to_mono(pcm)?,
        other => return Err(ConvertError::UnsupportedChannels(other)),
    };

    let resampled = resample_linear(&mono, src_rate, dst_rate);
    Ok(encode_pcm_to_wav(&resampled, dst_rate, 1))
}
