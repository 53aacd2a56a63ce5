use std::collections::HashMap;
use std::sync::Arc;

use mcloud_scheduler::SessionExecutor;
use parking_lot::RwLock;
use serde_json::Value;

/// Live sessions by id.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<SessionExecutor>>>,
}

impl SessionStore {
    pub fn insert(&self, session_id: impl Into<String>, executor: Arc<SessionExecutor>) {
        self.sessions.write().insert(session_id.into(), executor);
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionExecutor>> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<SessionExecutor>> {
        self.sessions.write().remove(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// `{id, capabilities}` of every live session, sorted by id.
    pub fn summaries(&self) -> Vec<Value> {
        let sessions = self.sessions.read();
        let mut ids: Vec<&String> = sessions.keys().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| {
                serde_json::json!({
                    "id": id,
                    "capabilities": sessions[id].capabilities(),
                })
            })
            .collect()
    }

    /// Removes every session and returns their executors.
    pub fn drain(&self) -> Vec<Arc<SessionExecutor>> {
        self.sessions.write().drain().map(|(_, executor)| executor).collect()
    }
}
