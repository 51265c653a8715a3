//! Configuration file support for bindmgrd
//!
//! The topology and naming options are loaded once at startup into an
//! immutable [`BindMgrConfig`] that consumers share through an `Arc`.
//!
//! ```toml
//! [bindings]
//! vlan_name_prefix = "q-"
//! managed_physical_network = "physnet1"
//!
//! [[switches]]
//! address = "10.0.0.1"
//! agents = ["agent-a"]
//!
//! [switches.hosts]
//! compute1 = ["ethernet:1/1", "1/2"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use segbind_common::{BindError, BindResult};

use crate::commands::normalize_interface;

/// VLAN naming and provider network behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSettings {
    /// Prefix of tenant VLAN names
    #[serde(default = "default_vlan_name_prefix")]
    pub vlan_name_prefix: String,

    /// Prefix of provider VLAN names
    #[serde(default = "default_provider_vlan_name_prefix")]
    pub provider_vlan_name_prefix: String,

    /// Create and delete provider VLANs on the switch
    #[serde(default = "default_true")]
    pub provider_vlan_auto_create: bool,

    /// Add and remove provider VLANs on trunk interfaces
    #[serde(default = "default_true")]
    pub provider_vlan_auto_trunk: bool,

    /// Only segments on this physical network are handled; all when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_physical_network: Option<String>,
}

/// A switch and the hosts wired to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// Management address; the physical target id of its bindings
    pub address: String,

    /// Agent hosts told about binding changes on this switch
    #[serde(default)]
    pub agents: Vec<String>,

    /// Host name -> switch interfaces (`type:port` or bare port)
    #[serde(default)]
    pub hosts: BTreeMap<String, Vec<String>>,
}

/// Top-level bindmgrd configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMgrConfig {
    #[serde(default)]
    pub bindings: BindingSettings,

    #[serde(default)]
    pub switches: Vec<SwitchConfig>,
}

/// One way a host reaches a switch
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct HostConnection {
    pub switch: String,
    /// Normalized `type:port`
    pub interface: String,
}

fn default_vlan_name_prefix() -> String {
    "q-".to_string()
}

fn default_provider_vlan_name_prefix() -> String {
    "p-".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for BindingSettings {
    fn default() -> Self {
        Self {
            vlan_name_prefix: default_vlan_name_prefix(),
            provider_vlan_name_prefix: default_provider_vlan_name_prefix(),
            provider_vlan_auto_create: default_true(),
            provider_vlan_auto_trunk: default_true(),
            managed_physical_network: None,
        }
    }
}

impl BindingSettings {
    /// Returns true if segments on `physical_network` are handled.
    pub fn is_managed_network(&self, physical_network: Option<&str>) -> bool {
        match &self.managed_physical_network {
            None => true,
            Some(managed) => physical_network == Some(managed.as_str()),
        }
    }
}

impl BindMgrConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> BindResult<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).map_err(|e| BindError::io(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> BindResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| BindError::invalid_config("toml", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the topology.
    pub fn validate(&self) -> BindResult<()> {
        if let Some(physnet) = &self.bindings.managed_physical_network {
            if physnet.trim().is_empty() {
                return Err(BindError::invalid_config(
                    "bindings.managed_physical_network",
                    "must not be empty",
                ));
            }
        }

        let mut seen = BTreeSet::new();
        for switch in &self.switches {
            if switch.address.trim().is_empty() {
                return Err(BindError::invalid_config(
                    "switches.address",
                    "must not be empty",
                ));
            }
            if !seen.insert(switch.address.as_str()) {
                return Err(BindError::invalid_config(
                    "switches.address",
                    format!("duplicate switch {}", switch.address),
                ));
            }
            for (host, interfaces) in &switch.hosts {
                if interfaces.iter().any(|i| i.trim().is_empty()) {
                    return Err(BindError::invalid_config(
                        format!("switches.hosts.{}", host),
                        format!("empty interface on switch {}", switch.address),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Every (switch, interface) the host is wired to.
    pub fn host_connections(&self, host: &str) -> Vec<HostConnection> {
        let mut connections: Vec<HostConnection> = self
            .switches
            .iter()
            .flat_map(|switch| {
                switch
                    .hosts
                    .get(host)
                    .into_iter()
                    .flatten()
                    .map(move |interface| HostConnection {
                        switch: switch.address.clone(),
                        interface: normalize_interface(interface),
                    })
            })
            .collect();
        connections.sort();
        connections.dedup();
        connections
    }

    pub fn switch(&self, address: &str) -> Option<&SwitchConfig> {
        self.switches.iter().find(|s| s.address == address)
    }

    /// Agent hosts for a physical target; empty for unknown targets.
    pub fn agents_for_target(&self, address: &str) -> &[String] {
        self.switch(address)
            .map(|s| s.agents.as_slice())
            .unwrap_or(&[])
    }
}
