//! Keyed integrity checksum for persisted conversation state.
//!
//! The digest covers the accounting fields, the install identifier, and the
//! save instant (day plus a 10-second bucket). Keying on the install
//! identifier means state files copied from another machine fail
//! verification; folding in the save instant means a stale checksum cannot be
//! replayed onto edited fields. The bucket is derived from the timestamp
//! stored in the record, never from the clock at load time, so verification
//! is stable across restarts.

use sha2::{Digest, Sha256};

use crate::state::ConversationState;

/// Width of the time bucket folded into the digest.
const BUCKET_SECONDS: i64 = 10;

/// Compute the checksum for a state record under an install key.
pub fn state_checksum(state: &ConversationState, install_id: &str) -> String {
    let day = state.updated_at.format("%Y-%m-%d").to_string();
    let bucket = state.updated_at.timestamp().div_euclid(BUCKET_SECONDS);

    let mut hasher = Sha256::new();
    hasher.update(install_id.as_bytes());
    hasher.update(state.conversation_id.as_bytes());
    hasher.update((state.total_tokens as u64).to_le_bytes());
    hasher.update((state.system_tokens as u64).to_le_bytes());
    hasher.update((state.message_count as u64).to_le_bytes());
    hasher.update(day.as_bytes());
    hasher.update(bucket.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Whether a stored checksum matches the record it was saved with.
pub fn verify(state: &ConversationState, install_id: &str, checksum: &str) -> bool {
    state_checksum(state, install_id) == checksum
}
