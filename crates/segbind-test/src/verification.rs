//! Verification helpers for device action streams and binding tables

use std::collections::BTreeSet;
use thiserror::Error;

use segbind_common::{Binding, BindingKey, DeviceAction, SegmentTarget};

/// Verification error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Port attached to {segment} before the segment was provisioned")]
    AttachBeforeProvision { segment: SegmentTarget },

    #[error("Binding key {key} appears more than once")]
    DuplicateKey { key: BindingKey },

    #[error("Expected {expected} deprovision(s) of {segment}, found {actual}")]
    DeprovisionCount {
        segment: SegmentTarget,
        expected: usize,
        actual: usize,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Every attach must follow a provision of its segment (or a segment live
/// from before the stream started, listed in `already_provisioned`).
pub fn verify_provision_precedes_attach(
    actions: &[DeviceAction],
    already_provisioned: &[SegmentTarget],
) -> VerifyResult<()> {
    let mut live: BTreeSet<SegmentTarget> = already_provisioned.iter().cloned().collect();
    for action in actions {
        match action {
            DeviceAction::ProvisionSegment { segment, .. } => {
                live.insert(segment.clone());
            }
            DeviceAction::DeprovisionSegment { segment, .. } => {
                live.remove(segment);
            }
            DeviceAction::AttachPort { binding } => {
                let segment = binding.segment_target();
                if !live.contains(&segment) {
                    return Err(VerificationError::AttachBeforeProvision { segment });
                }
            }
            DeviceAction::DetachPort { .. } => {}
        }
    }
    Ok(())
}

/// No two rows share (resource_id, segment_id, physical_target).
pub fn verify_unique_keys(bindings: &[Binding]) -> VerifyResult<()> {
    let mut seen = BTreeSet::new();
    for binding in bindings {
        let key = binding.key();
        if !seen.insert(key.clone()) {
            return Err(VerificationError::DuplicateKey { key });
        }
    }
    Ok(())
}

/// Number of deprovisions of `segment` in the stream.
pub fn count_deprovisions(actions: &[DeviceAction], segment: &SegmentTarget) -> usize {
    actions
        .iter()
        .filter(|a| matches!(a, DeviceAction::DeprovisionSegment { segment: s, .. } if s == segment))
        .count()
}

/// The stream deprovisions `segment` exactly `expected` times.
pub fn verify_deprovision_count(
    actions: &[DeviceAction],
    segment: &SegmentTarget,
    expected: usize,
) -> VerifyResult<()> {
    let actual = count_deprovisions(actions, segment);
    if actual != expected {
        return Err(VerificationError::DeprovisionCount {
            segment: segment.clone(),
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{binding, vlan};

    #[test]
    fn test_attach_before_provision_detected() {
        let attach = DeviceAction::AttachPort {
            binding: binding("portA", 100, "switch1"),
        };
        let segment = SegmentTarget::new(vlan(100), "switch1");

        assert_eq!(
            verify_provision_precedes_attach(std::slice::from_ref(&attach), &[]),
            Err(VerificationError::AttachBeforeProvision {
                segment: segment.clone()
            })
        );
        assert!(verify_provision_precedes_attach(&[attach], &[segment]).is_ok());
    }

    #[test]
    fn test_duplicate_keys_detected() {
        let rows = vec![binding("portA", 100, "switch1"), binding("portA", 100, "switch1")];
        assert!(matches!(
            verify_unique_keys(&rows),
            Err(VerificationError::DuplicateKey { .. })
        ));
        assert!(verify_unique_keys(&rows[..1]).is_ok());
    }
}
