//! Common building blocks for the segment binding manager.
//!
//! This crate holds everything the binding store, the reconciler and the
//! collaborators at the edges have to agree on:
//!
//! - [`Binding`], [`BindingFilter`], [`Profile`]: the row model
//! - [`BindError`]: the error taxonomy shared by every layer
//! - [`RefIndex`]: segment/target reference counting that never auto-creates
//! - [`EventQueue`]: per-resource deduplication of pending events
//! - [`Messenger`] and [`DeviceDriver`]: the outbound seams
//!
//! # Architecture
//!
//! 1. An event (port bound, port unbound) names the desired logical state
//! 2. The reconciler diffs it against the binding store in one transaction
//! 3. The resulting [`DeviceAction`]s go to a [`DeviceDriver`]
//! 4. Agents are told about the change through a [`Messenger`] cast

pub mod error;

mod consumer;
mod device;
mod messaging;
mod ref_index;
mod types;

pub use consumer::{EventQueue, QueuedEvent};
pub use device::{DeviceAction, DeviceDriver};
pub use error::{BindError, BindResult};
pub use messaging::{AgentMessage, Messenger};
pub use ref_index::{RefIndex, RefIndexError, RefTransition};
pub use types::{
    Binding, BindingFilter, BindingKey, OperationKind, Profile, ProfileId, ProfileKind,
    SegmentId, SegmentTarget, Vni, MAX_VLAN_ID, MAX_VNI, MIN_VLAN_ID, MIN_VNI,
};
