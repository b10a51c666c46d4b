//! Buffer abstractions for XDR encoding/decoding
//!
//! This module provides in-memory buffer types for reading and writing
//! the binary encoding used on the GDS wire.

mod read;
mod write;

pub use read::{vax_integer, xdr_pad, ReadBuffer};
pub use write::WriteBuffer;
