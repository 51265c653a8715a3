//! Binding and profile row model.

use crate::error::{BindError, BindResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lowest usable VLAN id.
pub const MIN_VLAN_ID: u16 = 1;

/// Highest usable VLAN id.
pub const MAX_VLAN_ID: u16 = 4094;

/// Lowest VNI accepted by the switches (lower values are reserved).
pub const MIN_VNI: u32 = 4096;

/// Highest 24-bit VNI.
pub const MAX_VNI: u32 = 16_777_215;

/// VLAN segment identifier (1-4094).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct SegmentId(u16);

impl SegmentId {
    /// Lowest segment id; the start of range scans.
    pub const MIN: SegmentId = SegmentId(MIN_VLAN_ID);

    /// Creates a segment id, validating the range.
    pub fn new(id: u16) -> BindResult<Self> {
        if !(MIN_VLAN_ID..=MAX_VLAN_ID).contains(&id) {
            return Err(BindError::invalid_segment(
                id,
                format!("VLAN id must be in {}..={}", MIN_VLAN_ID, MAX_VLAN_ID),
            ));
        }
        Ok(Self(id))
    }

    /// Returns the raw VLAN id.
    pub fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for SegmentId {
    type Error = BindError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<u32> for SegmentId {
    type Error = BindError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        let id = u16::try_from(value)
            .map_err(|_| BindError::invalid_segment(value, "VLAN id does not fit in 12 bits"))?;
        Self::new(id)
    }
}

impl From<SegmentId> for u16 {
    fn from(id: SegmentId) -> Self {
        id.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// VXLAN network identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Vni(u32);

impl Vni {
    /// Creates a VNI, validating the range.
    pub fn new(vni: u32) -> BindResult<Self> {
        if !(MIN_VNI..=MAX_VNI).contains(&vni) {
            return Err(BindError::invalid_segment(
                vni,
                format!("VNI must be in {}..={}", MIN_VNI, MAX_VNI),
            ));
        }
        Ok(Self(vni))
    }

    /// Returns the raw VNI.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Vni {
    type Error = BindError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Vni> for u32 {
    fn from(vni: Vni) -> Self {
        vni.0
    }
}

impl fmt::Display for Vni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A segment on a physical target; the unit of provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentTarget {
    pub segment_id: SegmentId,
    pub physical_target: String,
}

impl SegmentTarget {
    pub fn new(segment_id: SegmentId, physical_target: impl Into<String>) -> Self {
        Self {
            segment_id,
            physical_target: physical_target.into(),
        }
    }
}

impl fmt::Display for SegmentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.segment_id, self.physical_target)
    }
}

/// Unique key of a binding row.
///
/// Ordering is resource first, which lets the store range-scan all rows of
/// one resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindingKey {
    pub resource_id: String,
    pub segment_id: SegmentId,
    pub physical_target: String,
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.resource_id, self.segment_id, self.physical_target
        )
    }
}

/// Association between a logical resource and a segment on a physical target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub resource_id: String,
    pub segment_id: SegmentId,
    pub physical_target: String,
    pub is_provider: bool,
    /// Switch interfaces the resource is reached through, comma separated
    /// `type:port` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vni: Option<Vni>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<ProfileId>,
}

impl Binding {
    /// Creates a binding without interface, VNI or profile.
    pub fn new(
        resource_id: impl Into<String>,
        segment_id: SegmentId,
        physical_target: impl Into<String>,
        is_provider: bool,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            segment_id,
            physical_target: physical_target.into(),
            is_provider,
            interface: None,
            vni: None,
            profile_id: None,
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_vni(mut self, vni: Vni) -> Self {
        self.vni = Some(vni);
        self
    }

    pub fn with_profile(mut self, profile_id: ProfileId) -> Self {
        self.profile_id = Some(profile_id);
        self
    }

    /// Returns the unique key of this row.
    pub fn key(&self) -> BindingKey {
        BindingKey {
            resource_id: self.resource_id.clone(),
            segment_id: self.segment_id,
            physical_target: self.physical_target.clone(),
        }
    }

    /// Returns the segment/target pair this row references.
    pub fn segment_target(&self) -> SegmentTarget {
        SegmentTarget::new(self.segment_id, self.physical_target.clone())
    }
}

/// Partial binding key; unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingFilter {
    pub resource_id: Option<String>,
    pub segment_id: Option<SegmentId>,
    pub physical_target: Option<String>,
    pub profile_id: Option<ProfileId>,
}

impl BindingFilter {
    /// A filter matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter on a full binding key.
    pub fn from_key(key: &BindingKey) -> Self {
        Self {
            resource_id: Some(key.resource_id.clone()),
            segment_id: Some(key.segment_id),
            physical_target: Some(key.physical_target.clone()),
            profile_id: None,
        }
    }

    pub fn resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn segment(mut self, segment_id: SegmentId) -> Self {
        self.segment_id = Some(segment_id);
        self
    }

    pub fn target(mut self, physical_target: impl Into<String>) -> Self {
        self.physical_target = Some(physical_target.into());
        self
    }

    pub fn profile(mut self, profile_id: ProfileId) -> Self {
        self.profile_id = Some(profile_id);
        self
    }

    /// Returns true if the binding satisfies every set field.
    pub fn matches(&self, binding: &Binding) -> bool {
        self.resource_id
            .as_ref()
            .map_or(true, |r| *r == binding.resource_id)
            && self.segment_id.map_or(true, |s| s == binding.segment_id)
            && self
                .physical_target
                .as_ref()
                .map_or(true, |t| *t == binding.physical_target)
            && self
                .profile_id
                .map_or(true, |p| binding.profile_id == Some(p))
    }
}

impl fmt::Display for BindingFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(r) = &self.resource_id {
            parts.push(format!("resource_id={}", r));
        }
        if let Some(s) = self.segment_id {
            parts.push(format!("segment_id={}", s));
        }
        if let Some(t) = &self.physical_target {
            parts.push(format!("physical_target={}", t));
        }
        if let Some(p) = self.profile_id {
            parts.push(format!("profile_id={}", p));
        }
        if parts.is_empty() {
            write!(f, "<all>")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Profile identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(Uuid);

impl ProfileId {
    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of configuration template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    /// Policy profile applied to ports.
    Policy,
    /// Network profile describing a segment.
    Network,
    /// Port-profile on a fabric interconnect.
    PortProfile,
}

impl ProfileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileKind::Policy => "policy",
            ProfileKind::Network => "network",
            ProfileKind::PortProfile => "port_profile",
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named configuration template referenced by bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    pub kind: ProfileKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<SegmentId>,
}

impl Profile {
    /// Creates a profile with a fresh id.
    pub fn new(name: impl Into<String>, kind: ProfileKind) -> Self {
        Self {
            id: ProfileId::generate(),
            name: name.into(),
            kind,
            segment_id: None,
        }
    }

    pub fn with_segment(mut self, segment_id: SegmentId) -> Self {
        self.segment_id = Some(segment_id);
        self
    }
}

/// Kind of change a reconciliation made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Nothing changed.
    #[default]
    None,
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::None => "none",
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
