//! Length-prefixed message codec over a byte stream: typed readers/writers
//! for fixed-width integers, UUIDs, length-prefixed bytes/strings, and the
//! `(tag:u8, length:u32, payload)` message envelope. All widths are
//! big-endian.

pub mod headers;
pub mod read;
pub mod tags;
pub mod write;

pub use read::ReadBuffer;
pub use write::WriteBuffer;

/// Size in bytes of the frame header: one tag byte plus a 4-byte length
/// (the length field counts itself, matching the wire protocol's
/// `length:u32 (including length field)`).
pub const FRAME_HEADER_SIZE: usize = 1 + 4;
