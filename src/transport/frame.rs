//! Length-prefix framing.
//!
//! ```text
//! +----------------+---------------------+
//! | length: u32 BE | payload (length B)  |
//! +----------------+---------------------+
//! ```
//!
//! A zero-length frame carries an empty message.

use bytes::{BufMut, BytesMut};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Parse result.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    /// A complete frame is buffered; holds the payload length.
    Complete(usize),
    /// Need more data.
    Incomplete,
    /// Declared payload length exceeds the limit.
    TooLarge(usize),
}

/// Check whether `input` starts with a complete frame.
pub fn parse(input: &[u8], max_frame_size: usize) -> ParseResult {
    let Some(header) = input.get(..HEADER_LEN) else {
        return ParseResult::Incomplete;
    };

    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if len > max_frame_size {
        return ParseResult::TooLarge(len);
    }

    if input.len() < HEADER_LEN + len {
        ParseResult::Incomplete
    } else {
        ParseResult::Complete(len)
    }
}

/// Append a framed payload to `output`.
///
/// Returns `None` if the payload does not fit the 32-bit length prefix.
pub fn encode(payload: &[u8], output: &mut BytesMut) -> Option<()> {
    let len = u32::try_from(payload.len()).ok()?;
    output.reserve(HEADER_LEN + payload.len());
    output.put_u32(len);
    output.extend_from_slice(payload);
    Some(())
}
