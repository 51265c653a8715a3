//! One-way messaging to remote configuration agents.

use crate::error::BindResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A message addressed to an agent host on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub topic: String,
    pub host: String,
    /// Remote method the agent should run.
    pub method: String,
    pub payload: serde_json::Value,
}

impl AgentMessage {
    pub fn new(
        topic: impl Into<String>,
        host: impl Into<String>,
        method: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            topic: topic.into(),
            host: host.into(),
            method: method.into(),
            payload,
        }
    }

    /// Fully qualified destination, `topic.host`.
    pub fn destination(&self) -> String {
        format!("{}.{}", self.topic, self.host)
    }
}

/// Best-effort, fire-and-forget delivery.
///
/// `cast` must not wait for the remote side. An `Err` only means the
/// message could not be handed to the transport; nothing retries it.
pub trait Messenger: Send + Sync {
    fn cast(&self, message: AgentMessage) -> BindResult<()>;
}

impl<M: Messenger + ?Sized> Messenger for Arc<M> {
    fn cast(&self, message: AgentMessage) -> BindResult<()> {
        (**self).cast(message)
    }
}
