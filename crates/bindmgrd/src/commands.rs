//! Switch CLI command builders for VLAN operations

use segbind_common::{SegmentId, Vni};

/// Longest VLAN name the switch accepts
pub const NEXUS_MAX_VLAN_NAME_LEN: usize = 32;

/// Interface type assumed when a host entry names only a port
pub const DEFAULT_INTERFACE_TYPE: &str = "ethernet";

/// Separator between interfaces when a binding spans several
pub const INTERFACE_SEPARATOR: char = ',';

/// Build the VLAN name `<prefix><vlan-id>`
///
/// The prefix is truncated so the whole name fits the switch limit; the id is
/// never cut.
pub fn vlan_name(prefix: &str, segment: SegmentId) -> String {
    let id = segment.to_string();
    let max_prefix = NEXUS_MAX_VLAN_NAME_LEN.saturating_sub(id.len());
    let prefix: String = prefix.chars().take(max_prefix).collect();
    format!("{}{}", prefix, id)
}

/// Split `type:port` into its parts; a bare port is an ethernet port
pub fn split_interface(interface: &str) -> (&str, &str) {
    match interface.split_once(':') {
        Some((kind, port)) => (kind, port),
        None => (DEFAULT_INTERFACE_TYPE, interface),
    }
}

/// Normalize a host interface entry to `type:port`
pub fn normalize_interface(interface: &str) -> String {
    let (kind, port) = split_interface(interface.trim());
    format!("{}:{}", kind.to_ascii_lowercase(), port)
}

/// Build VLAN creation commands
pub fn build_create_vlan_cmds(segment: SegmentId, name: &str, vni: Option<Vni>) -> Vec<String> {
    let mut cmds = vec![format!("vlan {}", segment)];
    if let Some(vni) = vni {
        cmds.push(format!("vn-segment {}", vni));
    }
    cmds.push(format!("name {}", name));
    cmds.push("state active".to_string());
    cmds.push("no shutdown".to_string());
    cmds.push("exit".to_string());
    cmds
}

/// Build VLAN deletion command
pub fn build_delete_vlan_cmds(segment: SegmentId) -> Vec<String> {
    vec![format!("no vlan {}", segment)]
}

/// Build trunk allowed-vlan add commands for each interface in a
/// separator-joined list
pub fn build_trunk_add_cmds(interface: &str, segment: SegmentId) -> Vec<String> {
    build_trunk_cmds(interface, "add", segment)
}

/// Build trunk allowed-vlan remove commands for each interface in a
/// separator-joined list
pub fn build_trunk_remove_cmds(interface: &str, segment: SegmentId) -> Vec<String> {
    build_trunk_cmds(interface, "remove", segment)
}

/// The interfaces of a separator-joined list, skipping empty entries.
pub fn interfaces(list: &str) -> impl Iterator<Item = &str> {
    list.split(INTERFACE_SEPARATOR).filter(|i| !i.is_empty())
}

fn build_trunk_cmds(interfaces_list: &str, verb: &str, segment: SegmentId) -> Vec<String> {
    interfaces(interfaces_list)
        .flat_map(|interface| {
            let (kind, port) = split_interface(interface);
            [
                format!("interface {} {}", kind, port),
                format!("switchport trunk allowed vlan {} {}", verb, segment),
                "exit".to_string(),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vlan(id: u16) -> SegmentId {
        SegmentId::new(id).unwrap()
    }

    #[test]
    fn test_vlan_name() {
        assert_eq!(vlan_name("q-", vlan(100)), "q-100");
        assert_eq!(vlan_name("", vlan(7)), "7");

        let long = "x".repeat(40);
        let name = vlan_name(&long, vlan(4094));
        assert_eq!(name.len(), NEXUS_MAX_VLAN_NAME_LEN);
        assert!(name.ends_with("4094"));
    }

    #[test]
    fn test_interfaces() {
        assert_eq!(split_interface("ethernet:1/1"), ("ethernet", "1/1"));
        assert_eq!(split_interface("1/2"), ("ethernet", "1/2"));
        assert_eq!(split_interface("port-channel:2"), ("port-channel", "2"));
        assert_eq!(normalize_interface(" 1/3 "), "ethernet:1/3");
        assert_eq!(normalize_interface("Ethernet:1/4"), "ethernet:1/4");
    }

    #[test]
    fn test_create_vlan_cmds() {
        let cmds = build_create_vlan_cmds(vlan(100), "q-100", None);
        assert_eq!(cmds, vec!["vlan 100", "name q-100", "state active", "no shutdown", "exit"]);

        let cmds = build_create_vlan_cmds(vlan(100), "q-100", Some(Vni::new(5000).unwrap()));
        assert_eq!(cmds[1], "vn-segment 5000");
    }

    #[test]
    fn test_trunk_cmds() {
        assert_eq!(
            build_trunk_add_cmds("ethernet:1/1", vlan(100)),
            vec!["interface ethernet 1/1", "switchport trunk allowed vlan add 100", "exit"]
        );
        assert_eq!(
            build_trunk_remove_cmds("port-channel:2", vlan(100))[1],
            "switchport trunk allowed vlan remove 100"
        );
        assert_eq!(build_delete_vlan_cmds(vlan(100)), vec!["no vlan 100"]);
    }

    #[test]
    fn test_trunk_cmds_for_several_interfaces() {
        let cmds = build_trunk_add_cmds("ethernet:1/1,ethernet:1/2", vlan(100));
        assert_eq!(cmds.len(), 6);
        assert_eq!(cmds[0], "interface ethernet 1/1");
        assert_eq!(cmds[3], "interface ethernet 1/2");
    }
}
