//! Notification Dispatcher - tells remote agents what changed
//!
//! Casts are fire-and-forget: a message that cannot be handed to the
//! transport is logged and dropped, never retried.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use segbind_common::{
    AgentMessage, BindError, BindResult, Messenger, OperationKind, SegmentTarget,
};

use crate::reconciler::ReconciliationResult;
use crate::topics::{methods, CFG_AGENT_BINDINGS_TOPIC, CFG_AGENT_TOPIC};

/// Payload of a binding change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingNotification {
    pub resource_ids: Vec<String>,
    pub operation: OperationKind,
    pub physical_target: String,
    /// Segment/target pairs provisioned by the change
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provisioned: Vec<SegmentTarget>,
    /// Segment/target pairs deprovisioned by the change
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deprovisioned: Vec<SegmentTarget>,
}

impl BindingNotification {
    pub fn from_result(result: &ReconciliationResult) -> Self {
        Self {
            resource_ids: vec![result.resource_id.clone()],
            operation: result.operation,
            physical_target: result.physical_target.clone(),
            provisioned: result.provisioned().into_iter().cloned().collect(),
            deprovisioned: result.deprovisioned().into_iter().cloned().collect(),
        }
    }

    /// Remote method announcing this change.
    pub fn method(&self) -> &'static str {
        match self.operation {
            OperationKind::Delete => methods::BINDING_REMOVED,
            _ => methods::BINDINGS_UPDATED,
        }
    }
}

/// Sends binding notifications through a [`Messenger`]
pub struct NotificationDispatcher<M> {
    messenger: M,
    topic: String,
}

impl<M: Messenger> NotificationDispatcher<M> {
    pub fn new(messenger: M) -> Self {
        Self::with_topic(messenger, CFG_AGENT_BINDINGS_TOPIC)
    }

    pub fn with_topic(messenger: M, topic: impl Into<String>) -> Self {
        Self {
            messenger,
            topic: topic.into(),
        }
    }

    pub fn messenger(&self) -> &M {
        &self.messenger
    }

    /// Notifies `targets` of a reconciliation result.
    ///
    /// Nothing is sent when `targets` is empty or the result needs no device
    /// action. Returns the number of messages handed to the transport.
    pub fn dispatch(&self, result: &ReconciliationResult, targets: &[String]) -> usize {
        if targets.is_empty() {
            debug!(resource = %result.resource_id, "No agents for target, skipping notification");
            return 0;
        }
        if !result.requires_device_action() {
            return 0;
        }

        let notification = BindingNotification::from_result(result);
        let payload = match serde_json::to_value(&notification) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(resource = %result.resource_id, error = %e, "Failed to encode notification");
                return 0;
            }
        };

        let mut sent = 0;
        for host in targets {
            let message = AgentMessage::new(
                self.topic.as_str(),
                host.as_str(),
                notification.method(),
                payload.clone(),
            );
            if self.cast_logged(message) {
                sent += 1;
            }
        }
        sent
    }

    /// Tells the agent on `host` that targets were taken out of service.
    ///
    /// `hosting_data` maps each removed target to the resources it carried.
    /// Empty `hosting_data` sends nothing.
    pub fn targets_removed(
        &self,
        host: &str,
        hosting_data: &BTreeMap<String, Vec<String>>,
        deconfigure: bool,
    ) -> bool {
        if hosting_data.is_empty() {
            return false;
        }
        let payload = serde_json::json!({
            "hosting_data": hosting_data,
            "deconfigure": deconfigure,
        });
        self.cast_logged(AgentMessage::new(
            CFG_AGENT_TOPIC,
            host,
            methods::HOSTING_DEVICES_REMOVED,
            payload,
        ))
    }

    fn cast_logged(&self, message: AgentMessage) -> bool {
        debug!(
            destination = %message.destination(),
            method = %message.method,
            "Casting agent notification"
        );
        match self.messenger.cast(message) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Dropping agent notification");
                false
            }
        }
    }
}

/// Messenger backed by an unbounded tokio channel
///
/// `cast` never waits; the receiver is drained by whoever owns delivery.
#[derive(Debug, Clone)]
pub struct ChannelMessenger {
    tx: mpsc::UnboundedSender<AgentMessage>,
}

impl ChannelMessenger {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Messenger for ChannelMessenger {
    fn cast(&self, message: AgentMessage) -> BindResult<()> {
        self.tx.send(message).map_err(|e| {
            let message = e.0;
            BindError::messaging(message.topic, message.host, message.method, "channel closed")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::Reconciler;
    use crate::store::MemoryBindingStore;
    use pretty_assertions::assert_eq;
    use segbind_common::SegmentId;
    use std::sync::Arc;

    fn vlan(id: u16) -> SegmentId {
        SegmentId::new(id).unwrap()
    }

    fn agents(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn created() -> ReconciliationResult {
        let reconciler = Reconciler::new(Arc::new(MemoryBindingStore::new()));
        reconciler
            .reconcile("portA", Some(vlan(100)), "switch1", false)
            .unwrap()
    }

    #[test]
    fn test_dispatch_to_every_agent() {
        let (messenger, mut rx) = ChannelMessenger::new();
        let dispatcher = NotificationDispatcher::new(messenger);

        let sent = dispatcher.dispatch(&created(), &agents(&["agent-a", "agent-b"]));
        assert_eq!(sent, 2);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.topic, CFG_AGENT_BINDINGS_TOPIC);
        assert_eq!(first.host, "agent-a");
        assert_eq!(first.method, methods::BINDINGS_UPDATED);
        assert_eq!(first.payload["resource_ids"], serde_json::json!(["portA"]));
        assert_eq!(first.payload["operation"], "create");
        assert_eq!(first.payload["provisioned"][0]["segment_id"], 100);
        assert_eq!(rx.try_recv().unwrap().host, "agent-b");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_without_targets_is_noop() {
        let (messenger, mut rx) = ChannelMessenger::new();
        let dispatcher = NotificationDispatcher::new(messenger);

        assert_eq!(dispatcher.dispatch(&created(), &[]), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_skips_noop_result() {
        let (messenger, mut rx) = ChannelMessenger::new();
        let dispatcher = NotificationDispatcher::new(messenger);

        let noop = ReconciliationResult::default();
        assert_eq!(dispatcher.dispatch(&noop, &agents(&["agent-a"])), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_delete_uses_removed_method() {
        let (messenger, mut rx) = ChannelMessenger::new();
        let dispatcher = NotificationDispatcher::new(messenger);
        let reconciler = Reconciler::new(Arc::new(MemoryBindingStore::new()));
        reconciler
            .reconcile("portA", Some(vlan(100)), "switch1", false)
            .unwrap();
        let removed = reconciler.reconcile("portA", None, "switch1", false).unwrap();

        dispatcher.dispatch(&removed, &agents(&["agent-a"]));
        let message = rx.try_recv().unwrap();
        assert_eq!(message.method, methods::BINDING_REMOVED);
        assert_eq!(message.payload["deprovisioned"][0]["physical_target"], "switch1");
    }

    #[test]
    fn test_closed_channel_is_dropped_not_raised() {
        let (messenger, rx) = ChannelMessenger::new();
        drop(rx);
        let dispatcher = NotificationDispatcher::new(messenger);
        assert_eq!(dispatcher.dispatch(&created(), &agents(&["agent-a"])), 0);
    }

    #[test]
    fn test_targets_removed() {
        let (messenger, mut rx) = ChannelMessenger::new();
        let dispatcher = NotificationDispatcher::new(messenger);

        assert!(!dispatcher.targets_removed("agent-a", &BTreeMap::new(), true));
        assert!(rx.try_recv().is_err());

        let mut hosting_data = BTreeMap::new();
        hosting_data.insert("switch1".to_string(), vec!["portA".to_string()]);
        assert!(dispatcher.targets_removed("agent-a", &hosting_data, true));

        let message = rx.try_recv().unwrap();
        assert_eq!(message.topic, CFG_AGENT_TOPIC);
        assert_eq!(message.method, methods::HOSTING_DEVICES_REMOVED);
        assert_eq!(
            message.payload,
            serde_json::json!({
                "hosting_data": {"switch1": ["portA"]},
                "deconfigure": true,
            })
        );
    }
}
