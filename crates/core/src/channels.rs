//! Well-known channel names and channel-name validation.
//!
//! A channel is a plain string. The only reserved name is
//! [`WILDCARD_CHANNEL`]: publishing to it reaches every subscriber, and
//! subscribing to it receives every message regardless of channel.

use crate::error::CoreError;

/// Broadcast channel. Matches every channel; no other glob syntax exists.
pub const WILDCARD_CHANNEL: &str = "*";

/// Returns `true` if `channel` is the reserved broadcast channel.
pub fn is_wildcard(channel: &str) -> bool {
    channel == WILDCARD_CHANNEL
}

/// Reject channel names the bus cannot route.
///
/// Only the empty string is invalid; whitespace and punctuation are
/// carried through verbatim.
pub fn validate_channel(channel: &str) -> Result<(), CoreError> {
    if channel.is_empty() {
        return Err(CoreError::Validation(
            "channel name must not be empty".to_string(),
        ));
    }
    Ok(())
}
