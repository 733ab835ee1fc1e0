//! Conversation threads.

use std::sync::Arc;

use proto::{ThreadId, Turn};
use tokio::sync::Mutex;
use tracing::debug;

use crate::runtime::Agent;

/// Ordered turns of one conversation, bound to one agent snapshot
///
/// Turns on a thread run one after another: a second `send` waits until the
/// first has recorded its turn. A `send` that is dropped before finishing
/// records nothing.
pub struct Thread {
    id: Option<ThreadId>,
    agent: Arc<Agent>,
    turns: Mutex<Vec<Turn>>,
}

impl Thread {
    /// Creates an empty thread. `None` makes an anonymous thread.
    pub fn new(id: Option<ThreadId>, agent: Arc<Agent>) -> Self {
        Self {
            id,
            agent,
            turns: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> Option<&ThreadId> {
        self.id.as_ref()
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Version of the catalogue this thread was created against.
    pub fn catalogue_version(&self) -> u64 {
        self.agent.catalogue().version()
    }

    /// Runs one turn and returns the agent's answer.
    pub async fn send(&self, message: &str) -> Result<String, proto::Error> {
        let mut turns = self.turns.lock().await;
        let turn = self.agent.run(&turns, message).await?;
        debug!(
            thread = %self.label(),
            turn = turns.len() + 1,
            tool_calls = turn.tool_calls.len(),
            "Turn recorded"
        );
        let response = turn.response.clone();
        turns.push(turn);
        Ok(response)
    }

    /// Snapshot of the recorded turns.
    pub async fn turns(&self) -> Vec<Turn> {
        self.turns.lock().await.clone()
    }

    pub async fn turn_count(&self) -> usize {
        self.turns.lock().await.len()
    }

    fn label(&self) -> &str {
        self.id.as_ref().map(ThreadId::as_str).unwrap_or("anonymous")
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("catalogue_version", &self.catalogue_version())
            .finish_non_exhaustive()
    }
}
