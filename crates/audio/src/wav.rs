//! WAV decode and encode

use std::path::Path;

use voxclone_core::{Error, Result};

/// Read a WAV file as mono f32 in [-1, 1], returning `(samples, rate)`.
///
/// Integer formats are scaled by their bit depth; multi-channel input is
/// downmixed by averaging.
pub fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| Error::audio(format!("failed to open {}: {e}", path.display())))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::audio(format!("wav decode error: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::audio(format!("wav decode error: {e}")))?
        }
    };

    if channels == 1 {
        return Ok((interleaved, spec.sample_rate));
    }

    let mono: Vec<f32> = interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

/// Write mono f32 samples as a 16-bit PCM WAV file.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| Error::audio(format!("failed to create {}: {e}", path.display())))?;
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(v)
            .map_err(|e| Error::audio(format!("wav write error: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| Error::audio(format!("wav finalize error: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let samples: Vec<f32> = (0..2400)
            .map(|i| (i as f32 * 0.02).sin() * 0.5)
            .collect();
        write_wav(&path, &samples, 24_000).unwrap();

        let (decoded, rate) = read_wav_mono(&path).unwrap();
        assert_eq!(rate, 24_000);
        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_stereo_downmix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");

        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(8000i16).unwrap();
            writer.write_sample(-8000i16).unwrap();
        }
        writer.finalize().unwrap();

        let (decoded, rate) = read_wav_mono(&path).unwrap();
        assert_eq!(rate, 16_000);
        assert_eq!(decoded.len(), 100);
        // Opposite-phase channels cancel in the downmix.
        assert!(decoded.iter().all(|&s| s.abs() < 1e-4));
    }

    #[test]
    fn test_missing_file_is_audio_error() {
        let err = read_wav_mono(Path::new("/nonexistent/ref.wav")).unwrap_err();
        assert!(matches!(err, Error::Audio(_)));
    }
}
