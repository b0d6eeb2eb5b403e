//! # WAV Container Header
//!
//! Every segment blob is a canonical 44-byte RIFF/WAVE header followed by raw
//! PCM payload. The header declares the payload length twice (RIFF chunk size
//! and data chunk size), so it has to be regenerated whenever the payload grows.
//!
//! ## Layout (little-endian except the ASCII tags):
//! ```text
//!  0..4   "RIFF"        4..8   36 + payload_len   8..12  "WAVE"
//! 12..16  "fmt "       16..20  16                20..22  1 (PCM)
//! 22..24  channels     24..28  sample_rate       28..32  byte_rate
//! 32..34  block_align  34..36  bits_per_sample
//! 36..40  "data"       40..44  payload_len
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Size of the canonical header in bytes.
pub const HEADER_LEN: usize = 44;

/// Largest payload whose length still fits the RIFF chunk size field.
pub const MAX_PAYLOAD_LEN: u32 = u32::MAX - 36;

/// Highest sample rate a segment may declare.
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Sample format of the PCM payload carried by a segment.
///
/// ## Rust Concepts:
/// - **Copy**: The struct is three integers, so passing it by value is free
/// - **PartialEq**: Lets the rotation policy compare a segment's format with an incoming chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// Samples per second (16000 for the reference client)
    pub sample_rate: u32,

    /// Number of interleaved channels (the ingestion endpoint only produces mono)
    pub channels: u16,

    /// Bits per sample (16 for signed little-endian PCM)
    pub bits_per_sample: u16,
}

impl PcmFormat {
    /// Mono 16-bit PCM at the given rate, the only format the endpoint accepts.
    pub fn mono16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    /// `mono16` for a rate in `1..=MAX_SAMPLE_RATE`, `None` otherwise.
    pub fn checked_mono16(sample_rate: u32) -> Option<Self> {
        (1..=MAX_SAMPLE_RATE)
            .contains(&sample_rate)
            .then(|| Self::mono16(sample_rate))
    }

    /// Bytes per second of audio, or `None` when it does not fit the header's u32 field.
    pub fn checked_byte_rate(&self) -> Option<u32> {
        let bits = u64::from(self.sample_rate)
            * u64::from(self.channels)
            * u64::from(self.bits_per_sample);
        u32::try_from(bits / 8).ok()
    }

    /// Bytes per second of audio: sample_rate * channels * bits_per_sample / 8,
    /// saturating at `u32::MAX`.
    pub fn byte_rate(&self) -> u32 {
        self.checked_byte_rate().unwrap_or(u32::MAX)
    }

    /// Bytes per sample frame (all channels): channels * bits_per_sample / 8
    pub fn block_align(&self) -> u16 {
        self.channels.saturating_mul(self.bits_per_sample) / 8
    }
}

/// Build the 44-byte header for a payload of `payload_len` bytes.
///
/// ## Rust Concepts:
/// - **[u8; 44]**: Fixed-size array, the compiler guarantees the length
/// - **WriteBytesExt**: byteorder's extension trait for writing typed little-endian integers
///
/// The function is total: writing into a cursor over a fixed buffer of exactly
/// the right size cannot fail, so the write results are discarded.
pub fn encode_header(payload_len: u32, format: PcmFormat) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    let mut cursor = Cursor::new(&mut header[..]);

    let _ = write_fields(&mut cursor, payload_len, format);

    header
}

fn write_fields(
    cursor: &mut Cursor<&mut [u8]>,
    payload_len: u32,
    format: PcmFormat,
) -> std::io::Result<()> {
    use std::io::Write;

    // RIFF chunk descriptor
    cursor.write_all(b"RIFF")?;
    cursor.write_u32::<LittleEndian>(36u32.wrapping_add(payload_len))?;
    cursor.write_all(b"WAVE")?;

    // fmt sub-chunk
    cursor.write_all(b"fmt ")?;
    cursor.write_u32::<LittleEndian>(16)?;
    cursor.write_u16::<LittleEndian>(1)?;
    cursor.write_u16::<LittleEndian>(format.channels)?;
    cursor.write_u32::<LittleEndian>(format.sample_rate)?;
    cursor.write_u32::<LittleEndian>(format.byte_rate())?;
    cursor.write_u16::<LittleEndian>(format.block_align())?;
    cursor.write_u16::<LittleEndian>(format.bits_per_sample)?;

    // data sub-chunk
    cursor.write_all(b"data")?;
    cursor.write_u32::<LittleEndian>(payload_len)?;

    Ok(())
}

/// Fields read back out of a canonical header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    pub format: PcmFormat,
    pub data_len: u32,
}

/// Parse a canonical header from the start of `bytes`.
///
/// Returns `None` when the buffer is shorter than 44 bytes or the ASCII tags
/// are not where the canonical layout puts them. Only the canonical layout is
/// understood; WAV files with extra chunks are not segments we wrote.
pub fn parse_header(bytes: &[u8]) -> Option<HeaderInfo> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    if &bytes[0..4] != b"RIFF"
        || &bytes[8..12] != b"WAVE"
        || &bytes[12..16] != b"fmt "
        || &bytes[36..40] != b"data"
    {
        return None;
    }

    let mut cursor = Cursor::new(&bytes[..HEADER_LEN]);
    cursor.set_position(22);
    let channels = cursor.read_u16::<LittleEndian>().ok()?;
    let sample_rate = cursor.read_u32::<LittleEndian>().ok()?;

    cursor.set_position(34);
    let bits_per_sample = cursor.read_u16::<LittleEndian>().ok()?;

    cursor.set_position(40);
    let data_len = cursor.read_u32::<LittleEndian>().ok()?;

    Some(HeaderInfo {
        format: PcmFormat {
            sample_rate,
            channels,
            bits_per_sample,
        },
        data_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = encode_header(320_000, PcmFormat::mono16(16000));

        assert_eq!(header.len(), HEADER_LEN);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[4..8], &(36u32 + 320_000).to_le_bytes());
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(&header[16..20], &16u32.to_le_bytes());
        assert_eq!(&header[20..22], &1u16.to_le_bytes());
        assert_eq!(&header[22..24], &1u16.to_le_bytes());
        assert_eq!(&header[24..28], &16000u32.to_le_bytes());
        assert_eq!(&header[28..32], &32000u32.to_le_bytes());
        assert_eq!(&header[32..34], &2u16.to_le_bytes());
        assert_eq!(&header[34..36], &16u16.to_le_bytes());
        assert_eq!(&header[36..40], b"data");
        assert_eq!(&header[40..44], &320_000u32.to_le_bytes());
    }

    #[test]
    fn test_declared_length_matches_input() {
        for len in [0u32, 1, 2, 44, 160_000, MAX_PAYLOAD_LEN] {
            for rate in [8000u32, 16000, 44100, 48000] {
                let header = encode_header(len, PcmFormat::mono16(rate));
                let info = parse_header(&header).expect("canonical header parses");
                assert_eq!(info.data_len, len);
                assert_eq!(&header[4..8], &(36 + len).to_le_bytes());
                assert_eq!(info.format, PcmFormat::mono16(rate));
            }
        }
    }

    #[test]
    fn test_rebuild_is_byte_identical() {
        let format = PcmFormat::mono16(22050);
        assert_eq!(encode_header(4096, format), encode_header(4096, format));
    }

    #[test]
    fn test_stereo_rates() {
        let format = PcmFormat {
            sample_rate: 44100,
            channels: 2,
            bits_per_sample: 16,
        };
        assert_eq!(format.byte_rate(), 176_400);
        assert_eq!(format.block_align(), 4);
    }

    #[test]
    fn test_sample_rate_bounds() {
        assert_eq!(PcmFormat::checked_mono16(0), None);
        assert_eq!(PcmFormat::checked_mono16(MAX_SAMPLE_RATE + 1), None);
        assert_eq!(PcmFormat::checked_mono16(300_000_000), None);
        assert_eq!(
            PcmFormat::checked_mono16(48000),
            Some(PcmFormat::mono16(48000))
        );
        assert_eq!(PcmFormat::mono16(MAX_SAMPLE_RATE).checked_byte_rate(), Some(768_000));
    }

    #[test]
    fn test_oversized_rate_does_not_overflow() {
        let format = PcmFormat::mono16(300_000_000);
        assert_eq!(format.checked_byte_rate(), Some(600_000_000));

        let absurd = PcmFormat {
            sample_rate: u32::MAX,
            channels: u16::MAX,
            bits_per_sample: u16::MAX,
        };
        assert_eq!(absurd.checked_byte_rate(), None);
        assert_eq!(absurd.byte_rate(), u32::MAX);
        assert_eq!(absurd.block_align(), u16::MAX / 8);

        let header = encode_header(64, absurd);
        assert_eq!(&header[28..32], &u32::MAX.to_le_bytes());
    }

    #[test]
    fn test_decodes_with_independent_reader() {
        let samples: Vec<i16> = (0..100).map(|i| (i * 300 - 15000) as i16).collect();
        let mut blob = encode_header((samples.len() * 2) as u32, PcmFormat::mono16(16000)).to_vec();
        for s in &samples {
            blob.extend_from_slice(&s.to_le_bytes());
        }

        let (header, data) = wav::read(&mut Cursor::new(blob)).expect("valid wav");
        assert_eq!(header.audio_format, 1);
        assert_eq!(header.channel_count, 1);
        assert_eq!(header.sampling_rate, 16000);
        assert_eq!(header.bits_per_sample, 16);
        assert_eq!(data.as_sixteen().map(|d| d.to_vec()), Some(samples));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_header(&[0u8; 10]).is_none());
        assert!(parse_header(&[0u8; 44]).is_none());

        let mut header = encode_header(8, PcmFormat::mono16(16000));
        header[36] = b'x';
        assert!(parse_header(&header).is_none());
    }
}
