//! # Audio Format Module
//!
//! PCM format description and the WAV container header that wraps every stored segment.
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: chosen per request (16kHz unless the client says otherwise)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod wav;    // Canonical 44-byte header codec

pub use wav::{
    encode_header, parse_header, PcmFormat, HEADER_LEN, MAX_PAYLOAD_LEN, MAX_SAMPLE_RATE,
};
