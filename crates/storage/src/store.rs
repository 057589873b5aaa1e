//! File-backed conversation state store.
//!
//! Layout under the base directory:
//! - `install-id`: the install identifier keying every checksum
//! - `conversations/<id>.json`: one envelope per conversation

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::integrity;
use crate::state::ConversationState;

/// Conversation ids with this prefix are never written to disk.
pub const PRIVATE_PREFIX: &str = "private-";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("state io: {0}")]
    Io(#[from] std::io::Error),
    #[error("state decode: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Outcome of loading persisted state.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// Nothing on disk for this conversation.
    Missing,
    /// State read and verified.
    Loaded(ConversationState),
    /// Integrity check failed; accounting was reset to defaults.
    Reset(ConversationState),
}

/// On-disk envelope: the state plus the checksum it was saved with.
#[derive(Serialize, Deserialize)]
struct StoredState {
    state: ConversationState,
    checksum: String,
}

/// Reads and writes conversation state under a base directory.
pub struct StateStore {
    base_dir: PathBuf,
    install_id: String,
}

impl StateStore {
    pub fn new(base_dir: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(base_dir.join("conversations"))?;
        let install_id = load_or_create_install_id(&base_dir)?;
        Ok(Self {
            base_dir,
            install_id,
        })
    }

    /// Default state directory under the platform config dir.
    pub fn default_dir() -> PathBuf {
        directories::ProjectDirs::from("com.local", "Tally", "Tally")
            .map(|p| p.config_dir().join("token_state"))
            .unwrap_or_else(|| PathBuf::from("./token_state"))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn install_id(&self) -> &str {
        &self.install_id
    }

    fn state_path(&self, conversation_id: &str) -> PathBuf {
        // Conversation ids are UUIDs in practice; flatten anything else so an
        // id can never escape the state directory.
        let safe: String = conversation_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_dir.join("conversations").join(format!("{safe}.json"))
    }

    /// Persist a state record. Private conversations are skipped entirely.
    pub fn save(&self, state: &ConversationState) -> Result<(), StorageError> {
        if state.conversation_id.starts_with(PRIVATE_PREFIX) {
            return Ok(());
        }

        let envelope = StoredState {
            checksum: integrity::state_checksum(state, &self.install_id),
            state: state.clone(),
        };
        let json = serde_json::to_string_pretty(&envelope)?;
        fs::write(self.state_path(&state.conversation_id), json)?;
        Ok(())
    }

    /// Load the state for a conversation.
    ///
    /// A failed integrity check yields [`LoadOutcome::Reset`] carrying the
    /// state with its accounting reset to defaults, regardless of what the
    /// file claimed.
    pub fn load(&self, conversation_id: &str) -> Result<LoadOutcome, StorageError> {
        if conversation_id.starts_with(PRIVATE_PREFIX) {
            return Ok(LoadOutcome::Missing);
        }

        let path = self.state_path(conversation_id);
        if !path.exists() {
            return Ok(LoadOutcome::Missing);
        }

        let json = fs::read_to_string(&path)?;
        let envelope: StoredState = serde_json::from_str(&json)?;

        if integrity::verify(&envelope.state, &self.install_id, &envelope.checksum) {
            Ok(LoadOutcome::Loaded(envelope.state))
        } else {
            tracing::warn!(
                conversation_id,
                "state failed integrity check, resetting accounting"
            );
            let mut state = envelope.state;
            state.reset();
            Ok(LoadOutcome::Reset(state))
        }
    }

    /// Remove the stored state for a conversation, if any.
    pub fn delete(&self, conversation_id: &str) -> Result<(), StorageError> {
        let path = self.state_path(conversation_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

fn load_or_create_install_id(base_dir: &Path) -> Result<String, StorageError> {
    let path = base_dir.join("install-id");
    if path.exists() {
        let id = fs::read_to_string(&path)?;
        return Ok(id.trim().to_string());
    }

    let id = Uuid::new_v4().to_string();
    fs::write(&path, &id)?;
    Ok(id)
}
