//! Agent topic and method names

/// Configuration agent topic (device management casts)
pub const CFG_AGENT_TOPIC: &str = "cisco_cfg_agent";

/// Configuration agent topic for binding updates
pub const CFG_AGENT_BINDINGS_TOPIC: &str = "cisco_cfg_agent_l3_routing";

/// Remote method names
pub mod methods {
    /// Bindings were created or changed
    pub const BINDINGS_UPDATED: &str = "bindings_updated";

    /// Bindings were removed
    pub const BINDING_REMOVED: &str = "binding_removed";

    /// Targets were taken out of service
    pub const HOSTING_DEVICES_REMOVED: &str = "hosting_devices_removed";
}
