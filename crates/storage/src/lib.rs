//! Durable conversation-state storage with integrity checking.
//!
//! One JSON file per conversation, each carrying a keyed SHA-256 checksum
//! over its accounting fields. Verification failure on load resets the
//! accounting to defaults rather than trusting the stored numbers. This is an
//! integrity check, not encryption: it catches hand-edited files and state
//! copied between installs, nothing stronger.

pub mod integrity;
pub mod state;
pub mod store;

pub use state::{ConversationState, DEFAULT_SYSTEM_TOKENS};
pub use store::{LoadOutcome, StateStore, StorageError, PRIVATE_PREFIX};
