//! Revision codec for the watch key.
//!
//! The watch key holds the decimal ASCII text of a non-negative revision
//! counter. Publishers overwrite it with the next revision; pollers never decode
//! it and only compare raw bytes.

use crate::error::{Result, WatcherError};

/// Decode the revision stored at the watch key. A missing key is revision 0.
pub fn decode(raw: Option<&[u8]>) -> Result<u64> {
    let Some(raw) = raw else {
        return Ok(0);
    };

    let text = std::str::from_utf8(raw).map_err(|e| WatcherError::decode(raw, e.to_string()))?;
    text.parse::<u64>()
        .map_err(|e| WatcherError::decode(raw, e.to_string()))
}

/// Encode a revision in its wire format.
pub fn encode(revision: u64) -> Vec<u8> {
    revision.to_string().into_bytes()
}

/// Compute the revision that follows the stored value.
pub fn next(raw: Option<&[u8]>) -> Result<u64> {
    let current = decode(raw)?;
    current
        .checked_add(1)
        .ok_or_else(|| WatcherError::decode(raw.unwrap_or_default(), "revision overflow"))
}
