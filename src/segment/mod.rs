//! # Segment Lifecycle
//!
//! Accumulates short PCM chunks into rotating WAV segments in the blob store.
//!
//! ## Key Components:
//! - **Metadata**: The single durable record of the open segment (`metadata.rs`)
//! - **Rotation Policy**: Decides when the open segment has to be closed (`rotation.rs`)
//! - **Append Engine**: Applies one chunk: load, decide, write, save (`engine.rs`)
//!
//! ## Segment Lifecycle:
//! 1. **Opened**: First chunk with no record, or a rotation; new blob + new record
//! 2. **Extended**: Each later chunk rewrites the blob and grows `current_size`
//! 3. **Closed**: Superseded by the next rotation; the blob is never touched again

pub mod engine;
pub mod metadata;
pub mod rotation;

pub use engine::{AppendEngine, IngestError, IngestOutcome};
pub use rotation::RotationPolicy;
