use anyhow::{Context, Result};
use std::io::Cursor;

/// Wrap raw little-endian PCM16 bytes in an in-memory WAV container
///
/// The transcription service accepts file uploads, so buffered chunk audio is
/// framed as a WAV file before sending. A trailing odd byte is dropped.
pub fn encode_pcm16(pcm_bytes: &[u8], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(pcm_bytes.len() + 44));
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;

        for pair in pcm_bytes.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .context("Failed to write sample to WAV")?;
        }

        writer.finalize().context("Failed to finalize WAV data")?;
    }

    Ok(cursor.into_inner())
}

/// Duration of raw PCM16 audio in milliseconds
pub fn pcm16_duration_ms(byte_len: usize, sample_rate: u32, channels: u16) -> u64 {
    let frames = byte_len as u64 / (2 * channels.max(1) as u64);
    frames * 1000 / sample_rate.max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_pcm16_roundtrip_samples() -> Result<()> {
        let samples: Vec<i16> = vec![100, -200, 300, -400];
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        let wav = encode_pcm16(&pcm, 16000, 1)?;
        assert_eq!(&wav[0..4], b"RIFF");

        let mut reader = hound::WavReader::new(Cursor::new(wav))?;
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        let decoded: Vec<i16> = reader.samples::<i16>().collect::<Result<_, _>>()?;
        assert_eq!(decoded, samples);
        Ok(())
    }

    #[test]
    fn test_encode_drops_trailing_odd_byte() -> Result<()> {
        let wav = encode_pcm16(&[1, 0, 7], 16000, 1)?;
        let reader = hound::WavReader::new(Cursor::new(wav))?;
        assert_eq!(reader.len(), 1);
        Ok(())
    }

    #[test]
    fn test_pcm16_duration() {
        // 1 second of 16kHz mono PCM16 = 32000 bytes
        assert_eq!(pcm16_duration_ms(32000, 16000, 1), 1000);
        assert_eq!(pcm16_duration_ms(32000, 16000, 2), 500);
    }
}
