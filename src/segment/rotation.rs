//! # Rotation Policy
//!
//! Decides, before each chunk is written, whether the open segment has to be
//! closed and a new one started. Pure: the caller passes the clock reading in.

use super::metadata::SegmentMetadata;
use crate::audio::PcmFormat;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Why a chunk opens a new segment, or `Continue` when it extends the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationDecision {
    /// No segment is open yet.
    NoSegment,
    /// The open segment already holds `max_duration` of audio.
    DurationCap,
    /// Nothing was written to the open segment for `inactivity_limit`.
    Inactivity,
    /// The chunk's sample rate differs from the one in the segment header.
    FormatChange,
    Continue,
}

impl RotationDecision {
    pub fn rotates(&self) -> bool {
        !matches!(self, RotationDecision::Continue)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RotationDecision::NoSegment => "no_segment",
            RotationDecision::DurationCap => "duration_cap",
            RotationDecision::Inactivity => "inactivity",
            RotationDecision::FormatChange => "format_change",
            RotationDecision::Continue => "continue",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_duration: Duration,
    pub inactivity_limit: Duration,
}

impl RotationPolicy {
    pub fn new(max_duration: Duration, inactivity_limit: Duration) -> Self {
        Self {
            max_duration,
            inactivity_limit,
        }
    }

    /// Classify the next chunk against the open segment.
    ///
    /// ## Rules, in order:
    /// 1. No metadata → `NoSegment`
    /// 2. Segment opened at a different sample rate → `FormatChange`
    /// 3. `current_size / byte_rate >= max_duration` → `DurationCap`
    /// 4. `now - last_write_time >= inactivity_limit` → `Inactivity`
    ///
    /// The duration check is done in integer bytes, comparing `current_size`
    /// with the byte count of `max_duration` at the segment's rate, so the
    /// boundary is exact. A clock that moved backwards counts as zero idle time.
    pub fn decide(
        &self,
        metadata: Option<&SegmentMetadata>,
        now: DateTime<Utc>,
        format: PcmFormat,
    ) -> RotationDecision {
        let Some(metadata) = metadata else {
            return RotationDecision::NoSegment;
        };

        if let Some(rate) = metadata.sample_rate {
            if rate != format.sample_rate {
                return RotationDecision::FormatChange;
            }
        }

        if metadata.current_size >= self.max_duration_bytes(format) {
            return RotationDecision::DurationCap;
        }

        let idle = (now - metadata.last_write_time).to_std().unwrap_or(Duration::ZERO);
        if idle >= self.inactivity_limit {
            return RotationDecision::Inactivity;
        }

        RotationDecision::Continue
    }

    pub fn should_rotate(
        &self,
        metadata: Option<&SegmentMetadata>,
        now: DateTime<Utc>,
        format: PcmFormat,
    ) -> bool {
        self.decide(metadata, now, format).rotates()
    }

    /// Payload bytes that make up `max_duration` of audio in `format`.
    pub fn max_duration_bytes(&self, format: PcmFormat) -> u64 {
        let bytes = self.max_duration.as_nanos() * u128::from(format.byte_rate()) / 1_000_000_000;
        u64::try_from(bytes).unwrap_or(u64::MAX)
    }
}
