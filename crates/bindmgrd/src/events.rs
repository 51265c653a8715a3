//! Port binding events consumed by bindmgrd

use serde::{Deserialize, Serialize};

use segbind_common::{BindResult, QueuedEvent, SegmentId, Vni};

/// Network type of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Vlan,
    Vxlan,
    #[serde(other)]
    Other,
}

/// Segment a port is bound to, as reported by the event source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub network_type: NetworkType,
    pub segmentation_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_network: Option<String>,
}

impl Segment {
    pub fn vlan(segmentation_id: u32, physical_network: Option<&str>) -> Self {
        Self {
            network_type: NetworkType::Vlan,
            segmentation_id,
            physical_network: physical_network.map(str::to_string),
        }
    }

    /// The VLAN id of a VLAN segment.
    pub fn segment_id(&self) -> BindResult<SegmentId> {
        SegmentId::try_from(self.segmentation_id)
    }
}

/// A change in the desired binding of a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BindingEvent {
    /// The port is bound to a segment on a host
    PortBound {
        resource_id: String,
        host_id: String,
        segment: Segment,
        #[serde(default)]
        is_provider: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vni: Option<Vni>,
        /// Policy profile name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        profile: Option<String>,
    },
    /// The port was deleted or unbound
    PortUnbound { resource_id: String },
}

impl BindingEvent {
    pub fn resource_id(&self) -> &str {
        match self {
            BindingEvent::PortBound { resource_id, .. }
            | BindingEvent::PortUnbound { resource_id } => resource_id,
        }
    }

    /// Parse one JSON line.
    pub fn from_json(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

impl QueuedEvent for BindingEvent {
    fn key(&self) -> &str {
        self.resource_id()
    }

    fn is_removal(&self) -> bool {
        matches!(self, BindingEvent::PortUnbound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_bound() {
        let event = BindingEvent::from_json(
            r#"{"event":"port_bound","resource_id":"portA","host_id":"compute1",
                "segment":{"network_type":"vlan","segmentation_id":100,"physical_network":"physnet1"},
                "vni":5000}"#,
        )
        .unwrap();

        match &event {
            BindingEvent::PortBound {
                segment,
                is_provider,
                vni,
                profile,
                ..
            } => {
                assert_eq!(segment.network_type, NetworkType::Vlan);
                assert_eq!(segment.segment_id().unwrap().get(), 100);
                assert!(!is_provider);
                assert_eq!(vni.map(Vni::get), Some(5000));
                assert!(profile.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(event.key(), "portA");
        assert!(!event.is_removal());
    }

    #[test]
    fn test_parse_unknown_network_type() {
        let event = BindingEvent::from_json(
            r#"{"event":"port_bound","resource_id":"p","host_id":"h",
                "segment":{"network_type":"gre","segmentation_id":7}}"#,
        )
        .unwrap();
        match event {
            BindingEvent::PortBound { segment, .. } => {
                assert_eq!(segment.network_type, NetworkType::Other)
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_parse_port_unbound() {
        let event = BindingEvent::from_json(r#"{"event":"port_unbound","resource_id":"portA"}"#).unwrap();
        assert!(event.is_removal());
        assert_eq!(event.resource_id(), "portA");
        assert!(BindingEvent::from_json(r#"{"event":"port_moved"}"#).is_err());
    }

    #[test]
    fn test_segment_id_validation() {
        assert!(Segment::vlan(5000, None).segment_id().is_err());
        assert!(Segment::vlan(0, None).segment_id().is_err());
    }
}
