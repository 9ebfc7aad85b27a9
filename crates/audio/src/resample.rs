//! Sample-rate conversion for reference audio

use rubato::{FftFixedIn, Resampler as RubatoResampler};

/// FFT-based resampler with a linear-interpolation fallback for inputs too
/// short for the FFT window.
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self { from_rate, to_rate }
    }

    pub fn resample(&self, input: &[f32]) -> Vec<f32> {
        if self.from_rate == self.to_rate || input.is_empty() {
            return input.to_vec();
        }
        if input.len() < 64 {
            return self.resample_linear(input);
        }

        let samples_f64: Vec<f64> = input.iter().map(|&s| s as f64).collect();
        let chunk_size = input.len().min(1024);

        match FftFixedIn::<f64>::new(
            self.from_rate as usize,
            self.to_rate as usize,
            chunk_size,
            2,
            1,
        ) {
            Ok(mut resampler) => {
                let mut output = Vec::new();
                let mut offset = 0;
                while offset < samples_f64.len() {
                    let needed = resampler.input_frames_next();
                    let end = samples_f64.len().min(offset + needed);
                    let mut chunk = samples_f64[offset..end].to_vec();
                    // Zero-pad the tail chunk to the fixed input size.
                    chunk.resize(needed, 0.0);
                    match resampler.process(&[chunk], None) {
                        Ok(frames) => output.extend(frames[0].iter().map(|&s| s as f32)),
                        Err(e) => {
                            tracing::warn!("resampler processing failed: {e}");
                            return self.resample_linear(input);
                        }
                    }
                    offset = end;
                }
                // Trim the zero-pad overshoot back to the expected length.
                let expected =
                    (input.len() as u64 * self.to_rate as u64 / self.from_rate as u64) as usize;
                output.truncate(expected.max(1));
                output
            }
            Err(e) => {
                tracing::warn!("resampler init failed: {e}");
                self.resample_linear(input)
            }
        }
    }

    fn resample_linear(&self, input: &[f32]) -> Vec<f32> {
        let ratio = self.to_rate as f64 / self.from_rate as f64;
        let output_len = (input.len() as f64 * ratio).ceil() as usize;
        let mut output = Vec::with_capacity(output_len);
        for i in 0..output_len {
            let src = i as f64 / ratio;
            let lo = src.floor() as usize;
            let hi = (lo + 1).min(input.len().saturating_sub(1));
            let frac = (src - lo as f64) as f32;
            output.push(input[lo] * (1.0 - frac) + input[hi] * frac);
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_rate_is_passthrough() {
        let input = vec![0.5f32; 480];
        let out = Resampler::new(16_000, 16_000).resample(&input);
        assert_eq!(out, input);
    }

    #[test]
    fn test_upsample_length_ratio() {
        let input: Vec<f32> = (0..16_000).map(|i| (i as f32 * 0.01).sin()).collect();
        let out = Resampler::new(16_000, 24_000).resample(&input);
        let expected = input.len() * 3 / 2;
        let tolerance = expected / 100 + 16;
        assert!(
            out.len().abs_diff(expected) <= tolerance,
            "got {}, expected ~{expected}",
            out.len()
        );
    }

    #[test]
    fn test_short_input_uses_linear_fallback() {
        let input = vec![1.0f32; 10];
        let out = Resampler::new(48_000, 24_000).resample(&input);
        assert_eq!(out.len(), 5);
    }
}
