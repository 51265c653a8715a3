//! Device-facing actions and the driver seam.

use crate::error::BindResult;
use crate::types::{Binding, SegmentTarget, Vni};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A concrete change to push to a physical target.
///
/// A reconciliation result lists these in the order they must be applied:
/// detaches, deprovisions, provisions, attaches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeviceAction {
    /// Create the segment on the target (e.g. `vlan N`).
    ProvisionSegment {
        segment: SegmentTarget,
        is_provider: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vni: Option<Vni>,
    },
    /// Associate a port with a provisioned segment.
    AttachPort { binding: Binding },
    /// Remove a port from a segment.
    DetachPort { binding: Binding },
    /// Remove an unreferenced segment from the target.
    DeprovisionSegment {
        segment: SegmentTarget,
        is_provider: bool,
    },
}

impl DeviceAction {
    /// The target this action is pushed to.
    pub fn physical_target(&self) -> &str {
        match self {
            DeviceAction::ProvisionSegment { segment, .. }
            | DeviceAction::DeprovisionSegment { segment, .. } => &segment.physical_target,
            DeviceAction::AttachPort { binding } | DeviceAction::DetachPort { binding } => {
                &binding.physical_target
            }
        }
    }

    pub fn is_provision(&self) -> bool {
        matches!(self, DeviceAction::ProvisionSegment { .. })
    }

    pub fn is_deprovision(&self) -> bool {
        matches!(self, DeviceAction::DeprovisionSegment { .. })
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceAction::ProvisionSegment { .. } => "provision",
            DeviceAction::AttachPort { .. } => "attach",
            DeviceAction::DetachPort { .. } => "detach",
            DeviceAction::DeprovisionSegment { .. } => "deprovision",
        }
    }
}

/// Vendor driver that performs device-facing configuration.
///
/// Drivers are only called after the store transaction producing the
/// actions has committed.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Driver name for logs.
    fn name(&self) -> &str;

    /// Pushes one action to its target.
    async fn apply(&self, action: &DeviceAction) -> BindResult<()>;

    /// Rebuilds a target's state from a full list of actions, e.g. after the
    /// target restarted. Defaults to applying each action in turn.
    async fn replay(&self, target: &str, actions: &[DeviceAction]) -> BindResult<()> {
        tracing::info!(driver = self.name(), switch = target, count = actions.len(), "Replaying target");
        for action in actions {
            self.apply(action).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<D: DeviceDriver + ?Sized> DeviceDriver for Arc<D> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn apply(&self, action: &DeviceAction) -> BindResult<()> {
        (**self).apply(action).await
    }

    async fn replay(&self, target: &str, actions: &[DeviceAction]) -> BindResult<()> {
        (**self).replay(target, actions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BindError;
    use crate::types::SegmentId;
    use std::sync::Mutex;

    struct Counting(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl DeviceDriver for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn apply(&self, action: &DeviceAction) -> BindResult<()> {
            if action.physical_target() == "down" {
                return Err(BindError::device("down", "unreachable"));
            }
            self.0.lock().unwrap().push(action.kind());
            Ok(())
        }
    }

    fn provision(target: &str) -> DeviceAction {
        DeviceAction::ProvisionSegment {
            segment: SegmentTarget::new(SegmentId::new(100).unwrap(), target),
            is_provider: false,
            vni: None,
        }
    }

    #[tokio::test]
    async fn test_default_replay_applies_in_order() {
        let driver = Counting(Mutex::new(Vec::new()));
        let binding = Binding::new("portA", SegmentId::new(100).unwrap(), "switch1", false);
        let actions = vec![provision("switch1"), DeviceAction::AttachPort { binding }];

        driver.replay("switch1", &actions).await.unwrap();
        assert_eq!(*driver.0.lock().unwrap(), vec!["provision", "attach"]);
    }

    #[tokio::test]
    async fn test_replay_stops_on_error() {
        let driver = Arc::new(Counting(Mutex::new(Vec::new())));
        let err = driver
            .replay("down", &[provision("down"), provision("switch1")])
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(driver.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_action_json_tag() {
        let json = serde_json::to_value(provision("switch1")).unwrap();
        assert_eq!(json["action"], "provision_segment");
        assert_eq!(json["segment"]["physical_target"], "switch1");
    }
}
