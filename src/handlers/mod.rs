pub mod config;
pub mod ingest;
pub mod segment;

pub use config::*;
pub use ingest::*;
pub use segment::*;
