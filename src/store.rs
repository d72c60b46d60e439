use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::session::{ChatSession, Message};
use crate::storage::{SessionStorage, StorageError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to encode sessions: {0}")]
    Encode(#[from] serde_json::Error),
}

/// All chat threads plus the active one. Every mutation is written through to
/// the storage port before returning.
pub struct SessionStore {
    sessions: Vec<ChatSession>,
    active_id: Option<Uuid>,
    storage: Arc<dyn SessionStorage>,
}

impl SessionStore {
    /// Hydrates from storage. Absent or unreadable documents yield an empty store.
    pub fn load(storage: Arc<dyn SessionStorage>) -> Self {
        let sessions = match storage.load() {
            Ok(Some(doc)) => match serde_json::from_str::<Vec<ChatSession>>(&doc) {
                Ok(sessions) => sessions,
                Err(e) => {
                    warn!(error = %e, "stored sessions are corrupt, starting empty");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "could not read stored sessions, starting empty");
                Vec::new()
            }
        };
        debug!(count = sessions.len(), "sessions loaded");
        Self { sessions, active_id: None, storage }
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let doc = serde_json::to_string(&self.sessions)?;
        self.storage.save(&doc)?;
        Ok(())
    }

    pub fn sessions(&self) -> &[ChatSession] { &self.sessions }

    pub fn active_id(&self) -> Option<Uuid> { self.active_id }

    pub fn active(&self) -> Option<&ChatSession> {
        self.active_id.and_then(|id| self.get(id))
    }

    pub fn get(&self, id: Uuid) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: Uuid) -> bool { self.get(id).is_some() }

    pub fn create(&mut self) -> Result<Uuid, StoreError> {
        let session = ChatSession::new();
        let id = session.id;
        self.sessions.push(session);
        self.active_id = Some(id);
        debug!(session = %id, "session created");
        self.save()?;
        Ok(id)
    }

    pub fn delete(&mut self, id: Uuid) -> Result<(), StoreError> {
        let Some(pos) = self.sessions.iter().position(|s| s.id == id) else {
            return Ok(());
        };
        self.sessions.remove(pos);
        if self.active_id == Some(id) {
            self.active_id = self.sessions.first().map(|s| s.id);
        }
        debug!(session = %id, active = ?self.active_id, "session deleted");
        self.save()
    }

    pub fn select(&mut self, id: Uuid) -> Result<(), StoreError> {
        if !self.contains(id) {
            return Err(StoreError::NotFound(id));
        }
        self.active_id = Some(id);
        self.save()
    }

    pub fn append_message(&mut self, id: Uuid, message: Message) -> Result<(), StoreError> {
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::NotFound(id))?;
        session.messages.push(message);
        self.save()
    }
}
