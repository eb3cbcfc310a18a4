//! Session registry: session name → sandbox session id.
//!
//! The registry is the only place that creates or deletes sandbox sessions.
//! Creation is serialized per name, so concurrent callers asking for the same
//! new name share one sandbox session instead of racing to create two.

use crate::error::ShellError;
use crate::sandbox::SandboxClient;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub struct SessionRegistry {
    client: Arc<dyn SandboxClient>,
    sessions: Mutex<HashMap<String, String>>,
    /// Per-name creation gates. A gate is dropped only when no caller holds
    /// it, so two creators can never hold different gates for one name.
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionRegistry {
    pub fn new(client: Arc<dyn SandboxClient>) -> Self {
        Self {
            client,
            sessions: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Sandbox session id for `name`, creating the session on first use.
    ///
    /// On failure nothing is recorded, so a later call retries creation.
    pub async fn resolve(&self, name: &str) -> Result<String, ShellError> {
        if let Some(id) = self.get(name) {
            return Ok(id);
        }

        let gate = self.gate(name);
        let _creating = gate.lock().await;

        // Another caller may have finished creating it while we waited.
        if let Some(id) = self.get(name) {
            return Ok(id);
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        self.client
            .create_session(&session_id)
            .await
            .map_err(ShellError::SessionCreation)?;

        tracing::info!("Created sandbox session {session_id} for '{name}'");
        self.sessions
            .lock()
            .insert(name.to_string(), session_id.clone());
        Ok(session_id)
    }

    /// Forget `name` and delete its sandbox session. Remote failures are
    /// logged and swallowed; the entry is removed regardless.
    pub async fn cleanup(&self, name: &str) {
        let removed = self.sessions.lock().remove(name);
        self.release_gate(name);
        let Some(session_id) = removed else {
            return;
        };

        match self.client.delete_session(&session_id).await {
            Ok(()) => tracing::debug!("Deleted sandbox session {session_id} ('{name}')"),
            Err(e) => tracing::warn!("Failed to cleanup session {name}: {e:#}"),
        }
    }

    /// Clean up every registered session.
    pub async fn cleanup_all(&self) {
        let names: Vec<String> = self.sessions.lock().keys().cloned().collect();
        for name in names {
            self.cleanup(&name).await;
        }
        // Gates left behind by names whose creation failed.
        self.gates.lock().retain(|_, g| Arc::strong_count(g) > 1);
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.sessions.lock().get(name).cloned()
    }

    /// Registered session names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Drop the gate for `name` unless a resolve is using it.
    fn release_gate(&self, name: &str) {
        let mut gates = self.gates.lock();
        if gates.get(name).is_some_and(|g| Arc::strong_count(g) == 1) {
            gates.remove(name);
        }
    }

    fn gate(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.gates
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}
