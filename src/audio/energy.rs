/// Loudness summary of a PCM16 buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechEnergy {
    pub rms: f64,
    /// Largest absolute sample value
    pub peak: u32,
    /// Fraction of samples whose magnitude exceeds the gate's RMS floor
    pub speech_ratio: f64,
}

/// Energy thresholds below which audio is treated as silence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceGate {
    pub min_rms: f64,
    pub min_speech_ratio: f64,
}

impl Default for SilenceGate {
    fn default() -> Self {
        // Speech sits around RMS 350-550, room noise at 100-200
        Self {
            min_rms: 200.0,
            min_speech_ratio: 0.01,
        }
    }
}

impl SilenceGate {
    /// Measure little-endian PCM16 bytes; a trailing odd byte is ignored
    pub fn measure(&self, pcm_bytes: &[u8]) -> SpeechEnergy {
        let mut sum_squares = 0f64;
        let mut peak = 0u32;
        let mut loud = 0usize;
        let mut samples = 0usize;

        for pair in pcm_bytes.chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]) as i32;
            let magnitude = sample.unsigned_abs();
            sum_squares += (sample * sample) as f64;
            peak = peak.max(magnitude);
            if magnitude as f64 > self.min_rms {
                loud += 1;
            }
            samples += 1;
        }

        if samples == 0 {
            return SpeechEnergy {
                rms: 0.0,
                peak: 0,
                speech_ratio: 0.0,
            };
        }

        SpeechEnergy {
            rms: (sum_squares / samples as f64).sqrt(),
            peak,
            speech_ratio: loud as f64 / samples as f64,
        }
    }

    pub fn has_speech(&self, energy: &SpeechEnergy) -> bool {
        energy.speech_ratio >= self.min_speech_ratio && energy.rms > self.min_rms
    }
}
