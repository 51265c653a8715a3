//! BindMgr - turns port binding events into committed bindings, device
//! pushes and agent notifications

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use segbind_common::{
    BindError, BindResult, BindingFilter, DeviceDriver, Messenger, Profile, ProfileKind,
    SegmentId, Vni,
};

use crate::commands::INTERFACE_SEPARATOR;
use crate::config::BindMgrConfig;
use crate::dispatcher::NotificationDispatcher;
use crate::events::{BindingEvent, NetworkType, Segment};
use crate::locks::{KeyGuard, KeyedLocks};
use crate::reconciler::{DesiredBinding, ReconciliationResult, Reconciler};
use crate::store::BindingStore;

/// Outcome of handling one event
#[derive(Debug)]
pub enum ApplyOutcome {
    /// The event does not concern a managed segment or host
    Ignored { reason: String },
    /// Bindings committed and pushed
    Applied { results: Vec<ReconciliationResult> },
    /// Bindings committed but a device push failed; the `pending` results
    /// were not pushed and need [`BindMgr::recover`] to converge the devices
    DevicePushFailed {
        results: Vec<ReconciliationResult>,
        /// Results for every switch that failed, in commit order
        pending: Vec<ReconciliationResult>,
        /// First switch that failed and its error
        failed_target: String,
        error: BindError,
    },
}

impl ApplyOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        ApplyOutcome::Ignored {
            reason: reason.into(),
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, ApplyOutcome::Ignored { .. })
    }

    /// Results not yet pushed to their switch.
    pub fn pending(&self) -> &[ReconciliationResult] {
        match self {
            ApplyOutcome::DevicePushFailed { pending, .. } => pending,
            _ => &[],
        }
    }

    /// Committed reconciliation results, whatever happened on the device.
    pub fn results(&self) -> &[ReconciliationResult] {
        match self {
            ApplyOutcome::Ignored { .. } => &[],
            ApplyOutcome::Applied { results } | ApplyOutcome::DevicePushFailed { results, .. } => {
                results
            }
        }
    }
}

/// A device push that left results behind
struct PushFailure {
    /// Indices of the results not fully pushed
    pending: Vec<usize>,
    target: String,
    error: BindError,
}

impl PushFailure {
    fn into_outcome(self, results: Vec<ReconciliationResult>) -> ApplyOutcome {
        let pending = self.pending.iter().map(|&i| results[i].clone()).collect();
        ApplyOutcome::DevicePushFailed {
            results,
            pending,
            failed_target: self.target,
            error: self.error,
        }
    }
}

/// BindMgr handles binding events for a switch topology
///
/// Event flow:
/// 1. PortBound / PortUnbound → desired bindings per connected switch
/// 2. Reconciler commits the delta in one store transaction
/// 3. Device actions are pushed to the driver in order
/// 4. Agents of each switch are notified of pushed changes
///
/// Events for one resource run one at a time. Steps 2 and 3 also hold the
/// lock of every switch the event touches, so device pushes for a shared
/// segment reach the switch in commit order.
pub struct BindMgr<S, D, M> {
    config: Arc<BindMgrConfig>,
    reconciler: Reconciler<S>,
    driver: D,
    dispatcher: NotificationDispatcher<M>,
    resource_locks: KeyedLocks,
    switch_locks: KeyedLocks,
}

impl<S, D, M> BindMgr<S, D, M>
where
    S: BindingStore,
    D: DeviceDriver,
    M: Messenger,
{
    /// Creates a new BindMgr instance
    pub fn new(config: Arc<BindMgrConfig>, store: Arc<S>, driver: D, messenger: M) -> Self {
        Self {
            config,
            reconciler: Reconciler::new(store),
            driver,
            dispatcher: NotificationDispatcher::new(messenger),
            resource_locks: KeyedLocks::new(),
            switch_locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &BindMgrConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &Reconciler<S> {
        &self.reconciler
    }

    pub fn store(&self) -> &Arc<S> {
        self.reconciler.store()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher<M> {
        &self.dispatcher
    }

    /// Resources with an in-flight event
    pub fn busy_resources(&self) -> usize {
        self.resource_locks.len()
    }

    /// Handle one binding event
    #[instrument(skip(self, event), fields(resource = event.resource_id()))]
    pub async fn handle_event(&self, event: &BindingEvent) -> BindResult<ApplyOutcome> {
        match event {
            BindingEvent::PortBound {
                resource_id,
                host_id,
                segment,
                is_provider,
                vni,
                profile,
            } => {
                self.port_bound(
                    resource_id,
                    host_id,
                    segment,
                    *is_provider,
                    *vni,
                    profile.as_deref(),
                )
                .await
            }
            BindingEvent::PortUnbound { resource_id } => self.port_unbound(resource_id).await,
        }
    }

    async fn port_bound(
        &self,
        resource_id: &str,
        host_id: &str,
        segment: &Segment,
        is_provider: bool,
        vni: Option<Vni>,
        profile: Option<&str>,
    ) -> BindResult<ApplyOutcome> {
        if segment.network_type != NetworkType::Vlan {
            warn!(resource_id, network_type = ?segment.network_type, "Segment is not a VLAN, ignoring");
            return Ok(ApplyOutcome::ignored("segment is not a VLAN"));
        }
        if !self
            .config
            .bindings
            .is_managed_network(segment.physical_network.as_deref())
        {
            warn!(
                resource_id,
                physical_network = ?segment.physical_network,
                "Segment is not on the managed physical network, ignoring"
            );
            return Ok(ApplyOutcome::ignored("physical network is not managed"));
        }
        let segment_id = segment.segment_id()?;

        let profile_id = match profile {
            Some(name) => Some(self.store().profile_by_name(name, ProfileKind::Policy)?.id),
            None => None,
        };

        // One binding per switch; several links to the same switch share it.
        let mut per_switch: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for connection in self.config.host_connections(host_id) {
            per_switch
                .entry(connection.switch)
                .or_default()
                .push(connection.interface);
        }
        if per_switch.is_empty() {
            warn!(resource_id, host_id, "Host is not connected to any switch, ignoring");
            return Ok(ApplyOutcome::ignored(format!("unknown host {}", host_id)));
        }

        let separator = INTERFACE_SEPARATOR.to_string();
        let desired: Vec<DesiredBinding> = per_switch
            .into_iter()
            .map(|(switch, interfaces)| {
                DesiredBinding::bound(resource_id, segment_id, switch, is_provider)
                    .with_interface(interfaces.join(separator.as_str()))
                    .with_vni(vni)
                    .with_profile(profile_id)
            })
            .collect();

        let _resource = self.resource_locks.lock(resource_id).await;
        let _switches = self
            .lock_switches(resource_id, desired.iter().map(|d| d.physical_target.clone()))
            .await;
        let results = self.reconciler.reconcile_resource(resource_id, &desired)?;
        Ok(self.push_and_notify(results).await)
    }

    async fn port_unbound(&self, resource_id: &str) -> BindResult<ApplyOutcome> {
        let _resource = self.resource_locks.lock(resource_id).await;
        let _switches = self.lock_switches(resource_id, std::iter::empty()).await;
        let results = self.reconciler.remove_resource(resource_id)?;
        Ok(self.push_and_notify(results).await)
    }

    /// Locks the switches `resource_id` is bound to plus `extra`.
    ///
    /// The caller holds the resource lock, so the bound set cannot change
    /// between this read and the reconciliation.
    async fn lock_switches<I>(&self, resource_id: &str, extra: I) -> Vec<KeyGuard<'_>>
    where
        I: Iterator<Item = String>,
    {
        let bound = self
            .store()
            .find(&BindingFilter::all().resource(resource_id))
            .into_iter()
            .map(|b| b.physical_target);
        self.switch_locks.lock_all(bound.chain(extra)).await
    }

    /// Push committed results in order.
    ///
    /// A switch that fails gets nothing more in this push; results for the
    /// other switches still go out.
    async fn push(&self, results: &[ReconciliationResult]) -> Result<(), PushFailure> {
        let mut failed = BTreeSet::new();
        let mut pending = Vec::new();
        let mut first_error = None;
        for (index, result) in results.iter().enumerate() {
            if failed.contains(result.physical_target.as_str()) {
                pending.push(index);
                continue;
            }
            for action in &result.actions {
                if let Err(error) = self.driver.apply(action).await {
                    let target = action.physical_target();
                    warn!(switch = target, action = action.kind(), error = %error, "Device push failed");
                    failed.insert(target);
                    first_error.get_or_insert((target.to_string(), error));
                    pending.push(index);
                    break;
                }
            }
        }
        match first_error {
            None => Ok(()),
            Some((target, error)) => Err(PushFailure {
                pending,
                target,
                error,
            }),
        }
    }

    async fn push_and_notify(&self, results: Vec<ReconciliationResult>) -> ApplyOutcome {
        let failure = self.push(&results).await.err();
        let pending = failure.as_ref().map_or(&[][..], |f| &f.pending[..]);

        for (index, result) in results.iter().enumerate() {
            if !pending.contains(&index) {
                self.notify(result);
            }
        }

        match failure {
            None => ApplyOutcome::Applied { results },
            Some(failure) => {
                error!(
                    switch = %failure.target,
                    error = %failure.error,
                    pending = failure.pending.len(),
                    "Binding committed but device push failed"
                );
                failure.into_outcome(results)
            }
        }
    }

    fn notify(&self, result: &ReconciliationResult) {
        self.dispatcher
            .dispatch(result, self.config.agents_for_target(&result.physical_target));
    }

    /// Rebuild a switch from the store, e.g. after it restarted
    #[instrument(skip(self))]
    pub async fn replay_target(&self, physical_target: &str) -> BindResult<usize> {
        let _switch = self.switch_locks.lock(physical_target).await;
        self.rebuild(physical_target, &[]).await
    }

    /// Converge the switches a failed push left behind
    ///
    /// For each switch of `pending`, the unpushed removals still valid
    /// against the store are sent together with a full replay of the
    /// switch. Agents are then told about the pending results. Returns the
    /// number of actions sent.
    #[instrument(skip(self, pending), fields(pending = pending.len()))]
    pub async fn recover(&self, pending: &[ReconciliationResult]) -> BindResult<usize> {
        let targets: BTreeSet<&str> = pending.iter().map(|r| r.physical_target.as_str()).collect();
        let _switches = self
            .switch_locks
            .lock_all(targets.iter().map(|t| t.to_string()))
            .await;

        let mut sent = 0;
        for target in targets {
            sent += self.rebuild(target, pending).await?;
        }
        pending.iter().for_each(|result| self.notify(result));
        Ok(sent)
    }

    /// Sends the recovery actions of one switch; the caller holds its lock.
    async fn rebuild(&self, physical_target: &str, pending: &[ReconciliationResult]) -> BindResult<usize> {
        let actions = self.reconciler.recovery_actions(physical_target, pending);
        if actions.is_empty() {
            info!(switch = physical_target, "Nothing to replay");
            return Ok(0);
        }
        self.driver.replay(physical_target, &actions).await?;
        info!(switch = physical_target, actions = actions.len(), "Replayed switch configuration");
        Ok(actions.len())
    }

    /// Take a switch out of service and drop all of its bindings
    ///
    /// With `deconfigure` the removals are also pushed to the switch. The
    /// switch's agents are told which resources it carried.
    #[instrument(skip(self))]
    pub async fn remove_target(
        &self,
        physical_target: &str,
        deconfigure: bool,
    ) -> BindResult<ApplyOutcome> {
        let _switch = self.switch_locks.lock(physical_target).await;
        let results = self.reconciler.remove_target(physical_target)?;

        let mut hosting_data = BTreeMap::new();
        let resources: Vec<String> = results.iter().map(|r| r.resource_id.clone()).collect();
        if !resources.is_empty() {
            hosting_data.insert(physical_target.to_string(), resources);
        }
        for agent in self.config.agents_for_target(physical_target) {
            self.dispatcher
                .targets_removed(agent, &hosting_data, deconfigure);
        }

        if !deconfigure {
            return Ok(ApplyOutcome::Applied { results });
        }
        match self.push(&results).await {
            Ok(()) => Ok(ApplyOutcome::Applied { results }),
            Err(failure) => {
                error!(switch = %failure.target, error = %failure.error, "Failed to deconfigure switch");
                Ok(failure.into_outcome(results))
            }
        }
    }

    /// Register a profile
    #[instrument(skip(self))]
    pub fn create_profile(
        &self,
        name: &str,
        kind: ProfileKind,
        segment_id: Option<SegmentId>,
    ) -> BindResult<Profile> {
        let mut profile = Profile::new(name, kind);
        profile.segment_id = segment_id;
        self.store().add_profile(profile.clone())?;
        info!(profile = name, %kind, "Created profile");
        Ok(profile)
    }

    /// Delete a profile no binding references
    #[instrument(skip(self))]
    pub fn delete_profile(&self, name: &str, kind: ProfileKind) -> BindResult<Profile> {
        let removed = self.store().transaction(|tx| {
            let profile = tx.profile_by_name(name, kind)?;
            tx.delete_profile(profile.id)
        })?;
        info!(profile = name, %kind, "Deleted profile");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ChannelMessenger;
    use crate::driver::{CliDeviceDriver, LogSink};
    use crate::store::MemoryBindingStore;

    const TOPOLOGY: &str = r#"
[[switches]]
address = "10.0.0.1"
agents = ["agent-a"]

[switches.hosts]
compute1 = ["1/1", "1/2"]
"#;

    type TestMgr = BindMgr<MemoryBindingStore, CliDeviceDriver<LogSink>, ChannelMessenger>;

    fn mgr() -> (TestMgr, tokio::sync::mpsc::UnboundedReceiver<segbind_common::AgentMessage>) {
        let config = Arc::new(BindMgrConfig::from_toml(TOPOLOGY).unwrap());
        let driver = CliDeviceDriver::new(Arc::new(config.bindings.clone()), LogSink);
        let (messenger, rx) = ChannelMessenger::new();
        (
            BindMgr::new(config, Arc::new(MemoryBindingStore::new()), driver, messenger),
            rx,
        )
    }

    fn bound(resource: &str, host: &str, segment: Segment) -> BindingEvent {
        BindingEvent::PortBound {
            resource_id: resource.to_string(),
            host_id: host.to_string(),
            segment,
            is_provider: false,
            vni: None,
            profile: None,
        }
    }

    #[tokio::test]
    async fn test_port_bound_joins_interfaces_per_switch() {
        let (mgr, mut rx) = mgr();
        let outcome = mgr
            .handle_event(&bound("portA", "compute1", Segment::vlan(100, None)))
            .await
            .unwrap();

        assert!(outcome.is_applied());
        let created = &outcome.results()[0].created[0];
        assert_eq!(created.interface.as_deref(), Some("ethernet:1/1,ethernet:1/2"));
        assert_eq!(rx.try_recv().unwrap().host, "agent-a");
        assert_eq!(mgr.busy_resources(), 0);
    }

    #[tokio::test]
    async fn test_ignored_events() {
        let (mgr, _rx) = mgr();

        let vxlan = Segment {
            network_type: NetworkType::Vxlan,
            segmentation_id: 5000,
            physical_network: None,
        };
        assert!(mgr
            .handle_event(&bound("portA", "compute1", vxlan))
            .await
            .unwrap()
            .is_ignored());
        assert!(mgr
            .handle_event(&bound("portA", "compute9", Segment::vlan(100, None)))
            .await
            .unwrap()
            .is_ignored());
        assert!(mgr.store().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_vlan_is_an_error() {
        let (mgr, _rx) = mgr();
        let err = mgr
            .handle_event(&bound("portA", "compute1", Segment::vlan(5000, None)))
            .await
            .unwrap_err();
        assert!(matches!(err, BindError::InvalidSegment { .. }));
    }

    #[tokio::test]
    async fn test_profiles() {
        let (mgr, _rx) = mgr();
        mgr.create_profile("gold", ProfileKind::Policy, None).unwrap();

        let mut event = bound("portA", "compute1", Segment::vlan(100, None));
        if let BindingEvent::PortBound { profile, .. } = &mut event {
            *profile = Some("gold".to_string());
        }
        mgr.handle_event(&event).await.unwrap();

        let err = mgr.delete_profile("gold", ProfileKind::Policy).unwrap_err();
        assert!(matches!(err, BindError::ProfileInUse { .. }));

        mgr.handle_event(&BindingEvent::PortUnbound {
            resource_id: "portA".to_string(),
        })
        .await
        .unwrap();
        mgr.delete_profile("gold", ProfileKind::Policy).unwrap();

        let mut unknown = bound("portB", "compute1", Segment::vlan(100, None));
        if let BindingEvent::PortBound { profile, .. } = &mut unknown {
            *profile = Some("silver".to_string());
        }
        assert!(mgr.handle_event(&unknown).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_remove_target_notifies_agents() {
        let (mgr, mut rx) = mgr();
        mgr.handle_event(&bound("portA", "compute1", Segment::vlan(100, None)))
            .await
            .unwrap();
        rx.try_recv().unwrap();

        let outcome = mgr.remove_target("10.0.0.1", true).await.unwrap();
        assert!(outcome.is_applied());
        assert!(mgr.store().is_empty());

        let message = rx.try_recv().unwrap();
        assert_eq!(message.method, "hosting_devices_removed");
        assert_eq!(message.payload["hosting_data"]["10.0.0.1"][0], "portA");
    }
}
