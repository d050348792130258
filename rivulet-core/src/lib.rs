//! # rivulet-core
//!
//! Core plumbing for the rivulet decoders:
//! - the pull-based [`ByteSource`] contract and standard adapters
//! - the cache-based bit reader ([`BitCache`]) with a rolling CRC-16
//! - a bit writer for synthesizing coded streams
//! - CRC-8 / CRC-16 primitives
//!
//! The byte source contract is deliberately minimal: a read that must not
//! return short except at end of stream, and a seek that must refuse targets
//! beyond the end. Everything else in the decoder stack is built on those two
//! guarantees.

pub mod bits;
pub mod crc;
pub mod error;
pub mod source;
pub mod writer;

pub use bits::BitCache;
pub use error::{Error, Result};
pub use source::{ByteSource, IoSource, MemorySource, SeekOrigin};
pub use writer::BitWriter;
