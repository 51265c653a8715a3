//! CLI device driver - renders device actions into switch configuration

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use segbind_common::{BindResult, DeviceAction, DeviceDriver};

use crate::commands::{
    build_create_vlan_cmds, build_delete_vlan_cmds, build_trunk_add_cmds, build_trunk_remove_cmds,
    vlan_name,
};
use crate::config::BindingSettings;

/// Delivers a rendered configuration snippet to a switch.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send(&self, target: &str, commands: Vec<String>) -> BindResult<()>;
}

/// Sink that only logs the commands; used when no device session is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl CommandSink for LogSink {
    async fn send(&self, target: &str, commands: Vec<String>) -> BindResult<()> {
        for cmd in &commands {
            info!(switch = target, "config: {}", cmd);
        }
        Ok(())
    }
}

/// Driver that renders NX-OS style CLI for each action.
pub struct CliDeviceDriver<S> {
    settings: Arc<BindingSettings>,
    sink: S,
}

impl<S: CommandSink> CliDeviceDriver<S> {
    pub fn new(settings: Arc<BindingSettings>, sink: S) -> Self {
        Self { settings, sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Commands for one action; empty when the action is not pushed.
    pub fn render(&self, action: &DeviceAction) -> Vec<String> {
        let settings = &self.settings;
        match action {
            DeviceAction::ProvisionSegment {
                segment,
                is_provider,
                vni,
            } => {
                if *is_provider && !settings.provider_vlan_auto_create {
                    return Vec::new();
                }
                let prefix = if *is_provider {
                    &settings.provider_vlan_name_prefix
                } else {
                    &settings.vlan_name_prefix
                };
                build_create_vlan_cmds(segment.segment_id, &vlan_name(prefix, segment.segment_id), *vni)
            }
            DeviceAction::DeprovisionSegment {
                segment,
                is_provider,
            } => {
                if *is_provider && !settings.provider_vlan_auto_create {
                    return Vec::new();
                }
                build_delete_vlan_cmds(segment.segment_id)
            }
            DeviceAction::AttachPort { binding } | DeviceAction::DetachPort { binding } => {
                if binding.is_provider && !settings.provider_vlan_auto_trunk {
                    return Vec::new();
                }
                let Some(interface) = binding.interface.as_deref() else {
                    return Vec::new();
                };
                if matches!(action, DeviceAction::AttachPort { .. }) {
                    build_trunk_add_cmds(interface, binding.segment_id)
                } else {
                    build_trunk_remove_cmds(interface, binding.segment_id)
                }
            }
        }
    }
}

#[async_trait]
impl<S: CommandSink> DeviceDriver for CliDeviceDriver<S> {
    fn name(&self) -> &str {
        "cli"
    }

    async fn apply(&self, action: &DeviceAction) -> BindResult<()> {
        let commands = self.render(action);
        if commands.is_empty() {
            debug!(action = action.kind(), switch = action.physical_target(), "Nothing to push");
            return Ok(());
        }
        self.sink.send(action.physical_target(), commands).await
    }
}
