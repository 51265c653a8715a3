//! Test fixtures for binding manager scenarios
//!
//! Provides recording collaborators and reusable topologies

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;

use segbind_common::{
    AgentMessage, BindError, BindResult, Binding, DeviceAction, DeviceDriver, Messenger, SegmentId,
};

/// Build a VLAN segment id, panicking on invalid input
pub fn vlan(id: u16) -> SegmentId {
    SegmentId::new(id).unwrap_or_else(|e| panic!("bad test VLAN {}: {}", id, e))
}

/// Build a plain tenant binding
pub fn binding(resource_id: &str, segment: u16, target: &str) -> Binding {
    Binding::new(resource_id, vlan(segment), target, false)
}

/// Two switches, three hosts:
/// - compute1 on switch 10.0.0.1 (two links) and 10.0.0.2
/// - compute2 on 10.0.0.1
/// - compute3 on 10.0.0.2
pub fn sample_topology_toml() -> &'static str {
    r#"
[bindings]
vlan_name_prefix = "q-"
provider_vlan_name_prefix = "p-"
managed_physical_network = "physnet1"

[[switches]]
address = "10.0.0.1"
agents = ["agent-a"]

[switches.hosts]
compute1 = ["ethernet:1/1", "1/2"]
compute2 = ["1/3"]

[[switches]]
address = "10.0.0.2"
agents = ["agent-b"]

[switches.hosts]
compute1 = ["port-channel:2"]
compute3 = ["1/9"]
"#
}

/// Device driver that records every applied action
///
/// Targets marked with [`RecordingDriver::fail_target`] reject every action
/// until [`RecordingDriver::heal_target`] is called.
#[derive(Default)]
pub struct RecordingDriver {
    applied: Mutex<Vec<DeviceAction>>,
    replays: Mutex<Vec<(String, Vec<DeviceAction>)>>,
    failing: Mutex<BTreeSet<String>>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every push to `target` fail
    pub fn fail_target(&self, target: &str) {
        self.failing.lock().insert(target.to_string());
    }

    pub fn heal_target(&self, target: &str) {
        self.failing.lock().remove(target);
    }

    /// Actions applied so far, in order
    pub fn applied(&self) -> Vec<DeviceAction> {
        self.applied.lock().clone()
    }

    /// Actions applied to one target, in order
    pub fn applied_to(&self, target: &str) -> Vec<DeviceAction> {
        self.applied
            .lock()
            .iter()
            .filter(|a| a.physical_target() == target)
            .cloned()
            .collect()
    }

    /// Full replays received, in order
    pub fn replays(&self) -> Vec<(String, Vec<DeviceAction>)> {
        self.replays.lock().clone()
    }

    pub fn clear(&self) {
        self.applied.lock().clear();
        self.replays.lock().clear();
    }

    fn check(&self, target: &str) -> BindResult<()> {
        if self.failing.lock().contains(target) {
            return Err(BindError::device(target, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceDriver for RecordingDriver {
    fn name(&self) -> &str {
        "recording"
    }

    async fn apply(&self, action: &DeviceAction) -> BindResult<()> {
        self.check(action.physical_target())?;
        self.applied.lock().push(action.clone());
        Ok(())
    }

    async fn replay(&self, target: &str, actions: &[DeviceAction]) -> BindResult<()> {
        self.check(target)?;
        self.replays
            .lock()
            .push((target.to_string(), actions.to_vec()));
        Ok(())
    }
}

/// Messenger that records every cast
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<AgentMessage>>,
    closed: Mutex<bool>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every further cast fail
    pub fn close(&self) {
        *self.closed.lock() = true;
    }

    pub fn sent(&self) -> Vec<AgentMessage> {
        self.sent.lock().clone()
    }

    /// Messages with the given remote method
    pub fn sent_with_method(&self, method: &str) -> Vec<AgentMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.method == method)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl Messenger for RecordingMessenger {
    fn cast(&self, message: AgentMessage) -> BindResult<()> {
        if *self.closed.lock() {
            return Err(BindError::messaging(
                message.topic,
                message.host,
                message.method,
                "transport closed",
            ));
        }
        self.sent.lock().push(message);
        Ok(())
    }
}
