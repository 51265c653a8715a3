//! bindmgrd - segment binding manager daemon
//!
//! Keeps a transactional table of (resource, segment, switch) bindings,
//! reconciles port binding events against it and turns the resulting delta
//! into switch VLAN configuration and agent notifications.

mod bind_mgr;
mod commands;
mod config;
mod dispatcher;
mod driver;
mod events;
mod locks;
mod reconciler;
mod store;
mod topics;

pub use bind_mgr::{ApplyOutcome, BindMgr};
pub use commands::*;
pub use config::{BindMgrConfig, BindingSettings, HostConnection, SwitchConfig};
pub use dispatcher::{BindingNotification, ChannelMessenger, NotificationDispatcher};
pub use driver::{CliDeviceDriver, CommandSink, LogSink};
pub use events::{BindingEvent, NetworkType, Segment};
pub use locks::{KeyGuard, KeyedLocks};
pub use reconciler::{replay_actions, DesiredBinding, ReconciliationResult, Reconciler};
pub use store::{BindingStore, BindingTxn, MemoryBindingStore};
pub use topics::*;
