//! Binding Reconciler - diffs desired port state against the store
//!
//! Every call runs in a single store transaction. The returned
//! [`ReconciliationResult`] lists the device actions the commit implies, in
//! push order: detach, deprovision, provision, attach.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use segbind_common::{
    BindResult, Binding, BindingFilter, DeviceAction, OperationKind, ProfileId, RefTransition,
    SegmentId, SegmentTarget, Vni,
};

use crate::commands::{interfaces, INTERFACE_SEPARATOR};
use crate::store::{BindingStore, BindingTxn};

/// Desired state of one resource on one physical target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredBinding {
    pub resource_id: String,
    /// `None` means the resource should not be bound on the target.
    pub segment_id: Option<SegmentId>,
    pub physical_target: String,
    pub is_provider: bool,
    pub interface: Option<String>,
    pub vni: Option<Vni>,
    pub profile_id: Option<ProfileId>,
}

impl DesiredBinding {
    /// The resource should be bound to `segment_id` on the target.
    pub fn bound(
        resource_id: impl Into<String>,
        segment_id: SegmentId,
        physical_target: impl Into<String>,
        is_provider: bool,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            segment_id: Some(segment_id),
            physical_target: physical_target.into(),
            is_provider,
            interface: None,
            vni: None,
            profile_id: None,
        }
    }

    /// The resource should have no binding on the target.
    pub fn absent(resource_id: impl Into<String>, physical_target: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            segment_id: None,
            physical_target: physical_target.into(),
            is_provider: false,
            interface: None,
            vni: None,
            profile_id: None,
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_vni(mut self, vni: Option<Vni>) -> Self {
        self.vni = vni;
        self
    }

    pub fn with_profile(mut self, profile_id: Option<ProfileId>) -> Self {
        self.profile_id = profile_id;
        self
    }

    fn to_binding(&self) -> Option<Binding> {
        let segment_id = self.segment_id?;
        Some(Binding {
            resource_id: self.resource_id.clone(),
            segment_id,
            physical_target: self.physical_target.clone(),
            is_provider: self.is_provider,
            interface: self.interface.clone(),
            vni: self.vni,
            profile_id: self.profile_id,
        })
    }
}

/// What a reconciliation changed for one resource on one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationResult {
    pub resource_id: String,
    pub physical_target: String,
    pub operation: OperationKind,
    /// Rows written by this reconciliation.
    pub created: Vec<Binding>,
    /// Rows deleted or overwritten by this reconciliation.
    pub removed: Vec<Binding>,
    /// Device actions in push order.
    pub actions: Vec<DeviceAction>,
}

impl ReconciliationResult {
    fn new(resource_id: impl Into<String>, physical_target: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            physical_target: physical_target.into(),
            ..Default::default()
        }
    }

    /// Returns true if the store was left untouched.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }

    /// Returns true if something has to be pushed to the device.
    pub fn requires_device_action(&self) -> bool {
        !self.actions.is_empty()
    }

    /// Segment/target pairs that became referenced.
    pub fn provisioned(&self) -> Vec<&SegmentTarget> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                DeviceAction::ProvisionSegment { segment, .. } => Some(segment),
                _ => None,
            })
            .collect()
    }

    /// Segment/target pairs that became unreferenced.
    pub fn deprovisioned(&self) -> Vec<&SegmentTarget> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                DeviceAction::DeprovisionSegment { segment, .. } => Some(segment),
                _ => None,
            })
            .collect()
    }

    /// Drops a row and records the device actions it implies.
    fn release(&mut self, tx: &mut dyn BindingTxn, binding: Binding) {
        let pair = binding.segment_target();
        if tx.delete(&BindingFilter::from_key(&binding.key())).is_empty() {
            return;
        }
        self.detach(tx, &binding);
        if tx.segment_refs(&pair) == 0 {
            self.actions.push(DeviceAction::DeprovisionSegment {
                segment: pair,
                is_provider: binding.is_provider,
            });
        }
        self.removed.push(binding);
    }

    /// Records a detach for a row already gone from the store, limited to
    /// the interfaces no remaining row on its segment/target still lists.
    fn detach(&mut self, tx: &dyn BindingTxn, binding: &Binding) {
        if let Some(binding) = narrowed_detach(tx, binding) {
            self.actions.push(DeviceAction::DetachPort { binding });
        }
    }

    /// Writes a row and records the device actions it implies.
    fn acquire(&mut self, tx: &mut dyn BindingTxn, binding: Binding) -> BindResult<()> {
        let transition = tx.insert(binding.clone())?;
        self.attached(binding, transition == RefTransition::Created);
        Ok(())
    }

    /// Records provision (when the pair is new) and attach for a committed row.
    fn attached(&mut self, binding: Binding, new_pair: bool) {
        let pair = binding.segment_target();
        if new_pair {
            self.actions.push(DeviceAction::ProvisionSegment {
                segment: pair,
                is_provider: binding.is_provider,
                vni: binding.vni,
            });
        }
        self.actions.push(DeviceAction::AttachPort {
            binding: binding.clone(),
        });
        self.created.push(binding);
    }

    fn finish(mut self, operation: OperationKind) -> Self {
        // Stable, so per-phase order is kept.
        self.actions.sort_by_key(phase);
        self.operation = if self.is_noop() {
            OperationKind::None
        } else {
            operation
        };
        self
    }
}

/// The part of `binding` to detach given the current rows of its
/// segment/target.
///
/// Interfaces another row still lists stay trunked; `None` when nothing is
/// left to remove.
fn narrowed_detach(tx: &dyn BindingTxn, binding: &Binding) -> Option<Binding> {
    let Some(list) = binding.interface.as_deref() else {
        return Some(binding.clone());
    };
    let in_use: BTreeSet<String> = tx
        .find(
            &BindingFilter::all()
                .segment(binding.segment_id)
                .target(binding.physical_target.as_str()),
        )
        .iter()
        .filter_map(|b| b.interface.as_deref())
        .flat_map(interfaces)
        .map(str::to_string)
        .collect();
    let released: Vec<&str> = interfaces(list).filter(|i| !in_use.contains(*i)).collect();
    if released.is_empty() {
        return None;
    }
    Some(Binding {
        interface: Some(released.join(INTERFACE_SEPARATOR.to_string().as_str())),
        ..binding.clone()
    })
}

fn phase(action: &DeviceAction) -> u8 {
    match action {
        DeviceAction::DetachPort { .. } => 0,
        DeviceAction::DeprovisionSegment { .. } => 1,
        DeviceAction::ProvisionSegment { .. } => 2,
        DeviceAction::AttachPort { .. } => 3,
    }
}

/// Applies one desired binding inside an open transaction.
fn plan(tx: &mut dyn BindingTxn, desired: &DesiredBinding) -> BindResult<ReconciliationResult> {
    let mut result = ReconciliationResult::new(&desired.resource_id, &desired.physical_target);
    let existing = tx.find(
        &BindingFilter::all()
            .resource(desired.resource_id.as_str())
            .target(desired.physical_target.as_str()),
    );

    let Some(wanted) = desired.to_binding() else {
        for binding in existing {
            result.release(tx, binding);
        }
        return Ok(result.finish(OperationKind::Delete));
    };

    let wanted_key = wanted.key();
    let mut current = None;
    for binding in existing {
        if binding.key() == wanted_key {
            current = Some(binding);
        } else {
            result.release(tx, binding);
        }
    }

    match current {
        Some(current) if current == wanted => {}
        Some(current) => {
            // Same segment, different attributes: overwrite in place.
            tx.replace(wanted.clone())?;
            if current.interface != wanted.interface {
                result.detach(tx, &current);
                result.actions.push(DeviceAction::AttachPort {
                    binding: wanted.clone(),
                });
            }
            result.removed.push(current);
            result.created.push(wanted);
        }
        None => result.acquire(tx, wanted)?,
    }

    let operation = if result.removed.is_empty() {
        OperationKind::Create
    } else {
        OperationKind::Update
    };
    Ok(result.finish(operation))
}

/// Rebuilds the full action list for a target from its stored bindings.
///
/// Rows are sorted by (segment, vni, interface); each segment is provisioned
/// once, from its first row, and each interface is attached once per segment.
pub fn replay_actions(mut bindings: Vec<Binding>) -> Vec<DeviceAction> {
    bindings.sort_by(|a, b| {
        (a.segment_id, a.vni, &a.interface, &a.resource_id)
            .cmp(&(b.segment_id, b.vni, &b.interface, &b.resource_id))
    });

    let mut provisioned = BTreeSet::new();
    let mut attached = BTreeSet::new();
    let mut actions = Vec::new();
    for binding in bindings {
        let pair = binding.segment_target();
        if provisioned.insert(pair.clone()) {
            actions.push(DeviceAction::ProvisionSegment {
                segment: pair.clone(),
                is_provider: binding.is_provider,
                vni: binding.vni,
            });
        }
        if attached.insert((pair, binding.interface.clone())) {
            actions.push(DeviceAction::AttachPort { binding });
        }
    }
    actions
}

/// Reconciles desired resource state against a [`BindingStore`].
pub struct Reconciler<S> {
    store: Arc<S>,
}

impl<S> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: BindingStore> Reconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Brings the binding of `resource_id` on `physical_target` to
    /// `desired_segment`; `None` removes it.
    pub fn reconcile(
        &self,
        resource_id: &str,
        desired_segment: Option<SegmentId>,
        physical_target: &str,
        is_provider: bool,
    ) -> BindResult<ReconciliationResult> {
        let desired = match desired_segment {
            Some(segment) => DesiredBinding::bound(resource_id, segment, physical_target, is_provider),
            None => DesiredBinding::absent(resource_id, physical_target),
        };
        self.reconcile_desired(&desired)
    }

    /// Reconciles one fully described desired binding.
    #[instrument(skip(self))]
    pub fn reconcile_desired(&self, desired: &DesiredBinding) -> BindResult<ReconciliationResult> {
        let result = self.store.transaction(|tx| plan(tx, desired))?;
        log_result(&result);
        Ok(result)
    }

    /// Reconciles every target of a resource at once.
    ///
    /// Targets the resource is bound on but that are not listed in `desired`
    /// are released (the resource moved away from them).
    #[instrument(skip(self, desired))]
    pub fn reconcile_resource(
        &self,
        resource_id: &str,
        desired: &[DesiredBinding],
    ) -> BindResult<Vec<ReconciliationResult>> {
        let results = self.store.transaction(|tx| {
            let wanted_targets: BTreeSet<&str> =
                desired.iter().map(|d| d.physical_target.as_str()).collect();
            let stale_targets: BTreeSet<String> = tx
                .find(&BindingFilter::all().resource(resource_id))
                .into_iter()
                .map(|b| b.physical_target)
                .filter(|t| !wanted_targets.contains(t.as_str()))
                .collect();

            let mut results = Vec::with_capacity(desired.len() + stale_targets.len());
            for target in stale_targets {
                results.push(plan(tx, &DesiredBinding::absent(resource_id, target))?);
            }
            for d in desired {
                results.push(plan(tx, d)?);
            }
            Ok(results)
        })?;

        results.iter().for_each(log_result);
        Ok(results)
    }

    /// Moves the single binding of a resource to a new segment.
    ///
    /// Fails with `NotFound` for a resource that was never reconciled.
    #[instrument(skip(self))]
    pub fn update_segment(
        &self,
        resource_id: &str,
        new_segment: SegmentId,
    ) -> BindResult<ReconciliationResult> {
        let result = self.store.transaction(|tx| {
            let previous = tx.update(resource_id, new_segment)?;
            let mut result = ReconciliationResult::new(resource_id, &previous.physical_target);
            if previous.segment_id == new_segment {
                return Ok(result.finish(OperationKind::None));
            }

            let old_pair = previous.segment_target();
            result.detach(tx, &previous);
            if tx.segment_refs(&old_pair) == 0 {
                result.actions.push(DeviceAction::DeprovisionSegment {
                    segment: old_pair,
                    is_provider: previous.is_provider,
                });
            }
            result.removed.push(previous.clone());

            let mut moved = previous;
            moved.segment_id = new_segment;
            let new_pair = tx.segment_refs(&moved.segment_target()) == 1;
            result.attached(moved, new_pair);
            Ok(result.finish(OperationKind::Update))
        })?;

        log_result(&result);
        Ok(result)
    }

    /// Removes a resource from every target. Absent resources are a no-op.
    #[instrument(skip(self))]
    pub fn remove_resource(&self, resource_id: &str) -> BindResult<Vec<ReconciliationResult>> {
        self.reconcile_resource(resource_id, &[])
    }

    /// Removes every binding on a target, one result per resource.
    #[instrument(skip(self))]
    pub fn remove_target(&self, physical_target: &str) -> BindResult<Vec<ReconciliationResult>> {
        let results = self.store.transaction(|tx| {
            let resources: BTreeSet<String> = tx
                .find(&BindingFilter::all().target(physical_target))
                .into_iter()
                .map(|b| b.resource_id)
                .collect();
            resources
                .into_iter()
                .map(|r| plan(tx, &DesiredBinding::absent(r, physical_target)))
                .collect::<BindResult<Vec<_>>>()
        })?;

        info!(
            switch = physical_target,
            resources = results.len(),
            "Removed target bindings"
        );
        Ok(results)
    }

    /// Full action list to rebuild a target from the store.
    pub fn replay(&self, physical_target: &str) -> Vec<DeviceAction> {
        replay_actions(self.store.find(&BindingFilter::all().target(physical_target)))
    }

    /// Actions that bring a target in line with the store after `pending`
    /// results for it were never pushed.
    ///
    /// Pending removals are checked against the current rows: detaches keep
    /// only interfaces nothing trunks any more and deprovisions only pairs
    /// with no references left. The full replay of the target follows.
    pub fn recovery_actions(
        &self,
        physical_target: &str,
        pending: &[ReconciliationResult],
    ) -> Vec<DeviceAction> {
        let mut actions = self.store.read(|tx| {
            let mut detached = BTreeSet::new();
            let mut deprovisioned = BTreeSet::new();
            let mut actions = Vec::new();
            let unpushed = pending
                .iter()
                .flat_map(|r| &r.actions)
                .filter(|a| a.physical_target() == physical_target);
            for action in unpushed {
                match action {
                    DeviceAction::DetachPort { binding } => {
                        let Some(narrowed) = narrowed_detach(tx, binding) else {
                            continue;
                        };
                        if detached.insert((narrowed.segment_target(), narrowed.interface.clone())) {
                            actions.push(DeviceAction::DetachPort { binding: narrowed });
                        }
                    }
                    DeviceAction::DeprovisionSegment { segment, .. } => {
                        if tx.segment_refs(segment) == 0 && deprovisioned.insert(segment.clone()) {
                            actions.push(action.clone());
                        }
                    }
                    _ => {}
                }
            }
            actions.sort_by_key(phase);
            actions
        });
        actions.extend(self.replay(physical_target));
        actions
    }
}

fn log_result(result: &ReconciliationResult) {
    if result.is_noop() {
        debug!(
            resource = %result.resource_id,
            switch = %result.physical_target,
            "Binding already in desired state"
        );
        return;
    }
    info!(
        resource = %result.resource_id,
        switch = %result.physical_target,
        operation = %result.operation,
        provisioned = result.provisioned().len(),
        deprovisioned = result.deprovisioned().len(),
        "Reconciled binding"
    );
}
