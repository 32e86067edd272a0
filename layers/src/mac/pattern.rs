//! Slot ownership pattern of a group of paired devices

use crate::LayerError;
use common::Rnti;
use serde::{Deserialize, Serialize};

/// How the slots of a subframe are handed out to the devices of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternPolicy {
    /// One slot per device, remaining slots unassigned
    #[default]
    Default,
    /// Every slot assigned, devices taking turns
    Optimized,
}

/// Owner of each slot in a subframe; `None` leaves the slot idle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPattern {
    slots: Vec<Option<Rnti>>,
}

impl AllocationPattern {
    pub fn build(
        policy: PatternPolicy,
        devices: &[Rnti],
        slots_per_subframe: u8,
    ) -> Result<Self, LayerError> {
        let slots = slots_per_subframe as usize;
        if devices.is_empty() {
            return Err(LayerError::InvalidConfiguration(
                "Allocation pattern needs at least one device".into(),
            ));
        }
        if devices.len() > slots {
            return Err(LayerError::InvalidConfiguration(format!(
                "{} devices do not fit in {} slots per subframe",
                devices.len(),
                slots
            )));
        }

        let slots = match policy {
            PatternPolicy::Default => (0..slots).map(|slot| devices.get(slot).copied()).collect(),
            PatternPolicy::Optimized => (0..slots)
                .map(|slot| Some(devices[slot % devices.len()]))
                .collect(),
        };
        Ok(Self { slots })
    }

    pub fn from_slots(slots: Vec<Option<Rnti>>) -> Self {
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Option<Rnti>] {
        &self.slots
    }

    pub fn owner(&self, slot: u8) -> Option<Rnti> {
        self.slots.get(slot as usize).copied().flatten()
    }

    /// Number of slots owned by `rnti`
    pub fn slots_of(&self, rnti: Rnti) -> usize {
        self.slots.iter().filter(|owner| **owner == Some(rnti)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rntis(n: u16) -> Vec<Rnti> {
        (1..=n).map(Rnti).collect()
    }

    #[test]
    fn test_default_policy_one_slot_each() {
        for k in 1..=8u16 {
            let devices = rntis(k);
            let pattern = AllocationPattern::build(PatternPolicy::Default, &devices, 8).unwrap();
            assert_eq!(pattern.len(), 8);
            assert_eq!(pattern.slots().iter().filter(|s| s.is_some()).count(), k as usize);
            assert!(devices.iter().all(|&rnti| pattern.slots_of(rnti) == 1));
        }
    }

    #[test]
    fn test_optimized_policy_fills_every_slot() {
        for k in 1..=8u16 {
            let devices = rntis(k);
            let pattern = AllocationPattern::build(PatternPolicy::Optimized, &devices, 8).unwrap();
            assert!(pattern.slots().iter().all(Option::is_some));
            let counts: Vec<usize> = devices.iter().map(|&rnti| pattern.slots_of(rnti)).collect();
            let spread = counts.iter().max().unwrap() - counts.iter().min().unwrap();
            assert!(spread <= 1);
        }
    }

    #[test]
    fn test_rejects_bad_groups() {
        assert!(AllocationPattern::build(PatternPolicy::Default, &[], 4).is_err());
        assert!(AllocationPattern::build(PatternPolicy::Optimized, &rntis(5), 4).is_err());
    }

    #[test]
    fn test_owner_lookup() {
        let pattern = AllocationPattern::from_slots(vec![Some(Rnti(3)), None]);
        assert_eq!(pattern.owner(0), Some(Rnti(3)));
        assert_eq!(pattern.owner(1), None);
        assert_eq!(pattern.owner(7), None);
    }
}
