//! Capacity accounting for narrowings
//!
//! A narrowing is a group of polygons with a declared capacity. Each mesh
//! instance keeps its own occupancy counters, and a `NarrowingPolicy` decides
//! whether an agent may step into a narrowing given its current occupancy.

use std::fmt::Debug;

use log::warn;

/// Live occupancy of one narrowing in one mesh instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NarrowingInstance {
    pub used: u32,
}

/// Everything a policy may look at when an agent asks to enter a narrowing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionRequest {
    pub narrowing_id: u32,
    /// Declared capacity of the narrowing being entered
    pub available: u32,
    /// Declared capacity of the narrowing being left, if any
    pub previous_available: Option<u32>,
    /// Teleports and other placements that must not be refused
    pub force: bool,
}

/// Admission rule for narrowings.
///
/// Implementations must keep `try_reserve` and `release` symmetric: every
/// successful reservation is paired with exactly one release.
pub trait NarrowingPolicy: Debug + Send {
    /// Counts the agent in and returns true, or leaves `instance` untouched
    /// and returns false
    fn try_reserve(&self, request: &AdmissionRequest, instance: &mut NarrowingInstance) -> bool;

    /// Counts an agent out
    fn release(&self, instance: &mut NarrowingInstance) {
        match instance.used.checked_sub(1) {
            Some(used) => instance.used = used,
            None => warn!("narrowing released more often than it was reserved"),
        }
    }
}

/// Default policy: a hard cap at the declared capacity.
///
/// Moving from a wider narrowing straight into a tighter one costs
/// `tighter_penalty` places, so a queue squeezing down keeps a gap. The
/// effective capacity never drops below one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct CapacityPolicy {
    pub tighter_penalty: u32,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self { tighter_penalty: 1 }
    }
}

impl CapacityPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tighter_penalty(mut self, penalty: u32) -> Self {
        self.tighter_penalty = penalty;
        self
    }

    /// Capacity the request is checked against
    pub fn effective_capacity(&self, request: &AdmissionRequest) -> u32 {
        match request.previous_available {
            Some(previous) if previous > request.available => request
                .available
                .saturating_sub(self.tighter_penalty)
                .max(request.available.min(1)),
            _ => request.available,
        }
    }
}

impl NarrowingPolicy for CapacityPolicy {
    fn try_reserve(&self, request: &AdmissionRequest, instance: &mut NarrowingInstance) -> bool {
        if !request.force && instance.used >= self.effective_capacity(request) {
            return false;
        }
        instance.used += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(available: u32, previous: Option<u32>) -> AdmissionRequest {
        AdmissionRequest {
            narrowing_id: 0,
            available,
            previous_available: previous,
            force: false,
        }
    }

    #[test]
    fn test_cap_at_capacity() {
        let policy = CapacityPolicy::new();
        let mut instance = NarrowingInstance::default();
        assert!(policy.try_reserve(&request(2, None), &mut instance));
        assert!(policy.try_reserve(&request(2, None), &mut instance));
        assert!(!policy.try_reserve(&request(2, None), &mut instance));
        assert_eq!(instance.used, 2);
        policy.release(&mut instance);
        assert!(policy.try_reserve(&request(2, None), &mut instance));
    }

    #[test]
    fn test_force_ignores_capacity() {
        let policy = CapacityPolicy::new();
        let mut instance = NarrowingInstance { used: 1 };
        let forced = AdmissionRequest {
            force: true,
            ..request(1, None)
        };
        assert!(policy.try_reserve(&forced, &mut instance));
        assert_eq!(instance.used, 2);
    }

    #[test]
    fn test_tighter_penalty() {
        let policy = CapacityPolicy::new();
        assert_eq!(policy.effective_capacity(&request(3, Some(5))), 2);
        assert_eq!(policy.effective_capacity(&request(3, Some(3))), 3);
        assert_eq!(policy.effective_capacity(&request(1, Some(4))), 1);
        assert_eq!(policy.effective_capacity(&request(0, Some(4))), 0);

        let harsh = CapacityPolicy::new().with_tighter_penalty(10);
        assert_eq!(harsh.effective_capacity(&request(4, Some(8))), 1);

        let mut instance = NarrowingInstance { used: 2 };
        assert!(!policy.try_reserve(&request(3, Some(5)), &mut instance));
    }

    #[test]
    fn test_release_never_underflows() {
        let policy = CapacityPolicy::new();
        let mut instance = NarrowingInstance::default();
        policy.release(&mut instance);
        assert_eq!(instance.used, 0);
    }
}
