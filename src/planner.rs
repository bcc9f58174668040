//! Decides where a new interface goes and what has to make room for it.
//!
//! The planner is a pure function of the catalog, the chips' active modes
//! and the registry. It never touches hardware; executing a plan is the
//! coordinator's job.
//!
//! For every chip, every mode and every expanded combination of that mode
//! which has a slot for the requested type, a candidate plan is built:
//!
//! - if the mode differs from the chip's active mode, every interface on the
//!   chip must go (switching modes destroys them all);
//! - otherwise only the interfaces that overflow the combination's per-type
//!   capacity must go, picked low priority first, then newest first.
//!
//! A candidate is dropped when any of its victims may not be evicted by the
//! requester (see [`may_evict`]). The surviving candidate with the fewest
//! evictions wins; ties prefer staying in the active mode, then the lower
//! chip id, then the lower mode id.

use std::cmp::Ordering;
use tracing::trace;

use crate::catalog::{ChipId, ChipInfo, ChipMode, IfaceType, ModeId, Priority, TypeCounts};
use crate::error::{RadioManagerError, Result};
use crate::registry::{InterfaceEntry, InterfaceHandle, InterfaceRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRequest {
    pub iface_type: IfaceType,
    pub priority: Priority,
    pub target_chip: Option<ChipId>,
}

impl AllocationRequest {
    pub fn new(iface_type: IfaceType, priority: Priority) -> Self {
        AllocationRequest {
            iface_type,
            priority,
            target_chip: None,
        }
    }

    pub fn on_chip(mut self, chip: ChipId) -> Self {
        self.target_chip = Some(chip);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPlan {
    pub chip_id: ChipId,
    pub mode_id: ModeId,
    pub mode_switch: bool,
    /// Interfaces to destroy, in teardown order.
    pub evictions: Vec<InterfaceHandle>,
}

impl AllocationPlan {
    fn rank(&self) -> (usize, bool, ChipId, ModeId) {
        (self.evictions.len(), self.mode_switch, self.chip_id, self.mode_id)
    }
}

/// What the planner needs to know about one chip.
#[derive(Debug, Clone, Copy)]
pub struct ChipView<'a> {
    pub info: &'a ChipInfo,
    pub active_mode: Option<ModeId>,
}

pub struct AllocationPlanner<'a> {
    chips: Vec<ChipView<'a>>,
    registry: &'a InterfaceRegistry,
}

impl<'a> AllocationPlanner<'a> {
    pub fn new(chips: impl IntoIterator<Item = ChipView<'a>>, registry: &'a InterfaceRegistry) -> Self {
        let mut chips: Vec<ChipView<'a>> = chips.into_iter().collect();
        chips.sort_by_key(|c| c.info.id);
        AllocationPlanner { chips, registry }
    }

    pub fn plan(&self, request: &AllocationRequest) -> Result<AllocationPlan> {
        if let Some(target) = request.target_chip {
            if !self.chips.iter().any(|c| c.info.id == target) {
                return Err(RadioManagerError::UnknownChip(target));
            }
        }

        let mut supported = false;
        let mut best: Option<AllocationPlan> = None;

        for chip in &self.chips {
            if request.target_chip.is_some_and(|target| target != chip.info.id) {
                continue;
            }
            for mode in &chip.info.modes {
                for capacity in mode.capacities() {
                    if capacity.get(request.iface_type) == 0 {
                        continue;
                    }
                    supported = true;
                    let Some(candidate) = self.candidate(chip, mode, capacity, request) else {
                        continue;
                    };
                    trace!(
                        chip = candidate.chip_id,
                        mode = candidate.mode_id,
                        evictions = candidate.evictions.len(),
                        "feasible candidate"
                    );
                    if best.as_ref().is_none_or(|b| candidate.rank() < b.rank()) {
                        best = Some(candidate);
                    }
                }
            }
        }

        match best {
            Some(plan) => Ok(plan),
            None if !supported => Err(RadioManagerError::Unsupported(request.iface_type)),
            None => Err(RadioManagerError::NoFeasiblePlan(request.iface_type)),
        }
    }

    /// Whether a normal-priority request for `iface_type` could be satisfied
    /// right now, evictions included.
    pub fn can_allocate(&self, iface_type: IfaceType) -> bool {
        self.plan(&AllocationRequest::new(iface_type, Priority::Normal))
            .is_ok()
    }

    fn candidate(
        &self,
        chip: &ChipView<'_>,
        mode: &ChipMode,
        capacity: &TypeCounts,
        request: &AllocationRequest,
    ) -> Option<AllocationPlan> {
        let chip_id = chip.info.id;
        let existing: Vec<&InterfaceEntry> = self.registry.on_chip(chip_id).collect();
        let counts = self.registry.counts_on_chip(chip_id);
        let mode_switch = chip.active_mode != Some(mode.id);

        let mut victims: Vec<&InterfaceEntry> = Vec::new();
        if mode_switch {
            victims.extend(existing.iter().copied());
        } else {
            for iface_type in IfaceType::ALL {
                let needed = counts.get(iface_type) + u32::from(iface_type == request.iface_type);
                let cap = capacity.get(iface_type);
                if needed <= cap {
                    continue;
                }
                let excess = (needed - cap) as usize;
                let mut of_type: Vec<&InterfaceEntry> = existing
                    .iter()
                    .copied()
                    .filter(|e| e.iface_type == iface_type)
                    .collect();
                if of_type.len() < excess {
                    return None;
                }
                of_type.sort_by(|a, b| eviction_order(a, b));
                victims.extend(of_type.into_iter().take(excess));
            }
        }

        if !victims.iter().all(|v| may_evict(v, request, &counts)) {
            return None;
        }
        victims.sort_by(|a, b| eviction_order(a, b));

        Some(AllocationPlan {
            chip_id,
            mode_id: mode.id,
            mode_switch,
            evictions: victims.into_iter().map(|v| v.handle).collect(),
        })
    }
}

/// Low priority first, then most recently created, then by name.
fn eviction_order(a: &InterfaceEntry, b: &InterfaceEntry) -> Ordering {
    let rank = |p: Priority| match p {
        Priority::Low => 0,
        Priority::Normal => 1,
    };
    rank(a.priority)
        .cmp(&rank(b.priority))
        .then_with(|| b.created_seq.cmp(&a.created_seq))
        .then_with(|| a.name.cmp(&b.name))
}

/// Whether `request` may destroy `victim`. `counts` is what the victim's chip
/// currently hosts.
///
/// A normal request may always take a low-priority interface's place and a
/// low request may never take a normal one's. Otherwise nothing is evicted
/// for a request of the victim's own type, nor when the requested type is
/// already present on the chip. One of several interfaces of the same type
/// may always go. Beyond that, STA and AP requests may evict any other type,
/// P2P may evict only NAN, and NAN evicts nothing.
pub fn may_evict(victim: &InterfaceEntry, request: &AllocationRequest, counts: &TypeCounts) -> bool {
    match (victim.priority, request.priority) {
        (Priority::Low, Priority::Normal) => return true,
        (Priority::Normal, Priority::Low) => return false,
        _ => {}
    }
    if victim.iface_type == request.iface_type {
        return false;
    }
    if counts.get(request.iface_type) > 0 {
        return false;
    }
    if counts.get(victim.iface_type) > 1 {
        return true;
    }
    match request.iface_type {
        IfaceType::Sta | IfaceType::Ap => true,
        IfaceType::P2p => victim.iface_type == IfaceType::Nan,
        IfaceType::Nan => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Combination;

    // mode 0: STA + (P2P | NAN), mode 1: AP (no RTT)
    fn single_sta_chip() -> ChipInfo {
        ChipInfo::new(10)
            .with_mode(
                ChipMode::new(0).with_combination(
                    Combination::new()
                        .limit(1, [IfaceType::Sta])
                        .limit(1, [IfaceType::P2p, IfaceType::Nan]),
                ),
            )
            .with_mode(
                ChipMode::new(1)
                    .with_combination(Combination::new().limit(1, [IfaceType::Ap]))
                    .without_rtt(),
            )
    }

    // single mode: STA + (STA | AP) + (P2P | NAN)
    fn dual_sta_chip() -> ChipInfo {
        ChipInfo::new(12).with_mode(
            ChipMode::new(5).with_combination(
                Combination::new()
                    .limit(1, [IfaceType::Sta])
                    .limit(1, [IfaceType::Sta, IfaceType::Ap])
                    .limit(1, [IfaceType::P2p, IfaceType::Nan]),
            ),
        )
    }

    fn plan_for(
        chip: &ChipInfo,
        active: Option<ModeId>,
        registry: &InterfaceRegistry,
        iface_type: IfaceType,
        priority: Priority,
    ) -> Result<AllocationPlan> {
        let planner = AllocationPlanner::new(
            [ChipView {
                info: chip,
                active_mode: active,
            }],
            registry,
        );
        planner.plan(&AllocationRequest::new(iface_type, priority))
    }

    #[test]
    fn test_unconfigured_chip_requires_mode_switch() {
        let chip = single_sta_chip();
        let registry = InterfaceRegistry::new();
        let plan = plan_for(&chip, None, &registry, IfaceType::Sta, Priority::Normal).unwrap();
        assert_eq!(plan.mode_id, 0);
        assert!(plan.mode_switch);
        assert!(plan.evictions.is_empty());
    }

    #[test]
    fn test_room_in_active_mode_means_no_churn() {
        let chip = single_sta_chip();
        let mut registry = InterfaceRegistry::new();
        registry.insert("wlan0".to_string(), IfaceType::Sta, 10, Priority::Normal);

        let plan = plan_for(&chip, Some(0), &registry, IfaceType::P2p, Priority::Normal).unwrap();
        assert!(!plan.mode_switch);
        assert!(plan.evictions.is_empty());
    }

    #[test]
    fn test_second_sta_rejected_on_single_sta_chip() {
        let chip = single_sta_chip();
        let mut registry = InterfaceRegistry::new();
        registry.insert("wlan0".to_string(), IfaceType::Sta, 10, Priority::Normal);

        let err = plan_for(&chip, Some(0), &registry, IfaceType::Sta, Priority::Normal).unwrap_err();
        assert!(matches!(err, RadioManagerError::NoFeasiblePlan(IfaceType::Sta)));
    }

    #[test]
    fn test_ap_switches_mode_and_evicts_everything() {
        let chip = single_sta_chip();
        let mut registry = InterfaceRegistry::new();
        let sta = registry.insert("wlan0".to_string(), IfaceType::Sta, 10, Priority::Normal);
        let p2p = registry.insert("p2p0".to_string(), IfaceType::P2p, 10, Priority::Normal);

        let plan = plan_for(&chip, Some(0), &registry, IfaceType::Ap, Priority::Normal).unwrap();
        assert_eq!(plan.mode_id, 1);
        assert!(plan.mode_switch);
        assert_eq!(plan.evictions, vec![p2p, sta]);
    }

    #[test]
    fn test_p2p_evicts_nan_but_not_the_reverse() {
        let chip = single_sta_chip();
        let mut registry = InterfaceRegistry::new();
        registry.insert("wlan0".to_string(), IfaceType::Sta, 10, Priority::Normal);
        let nan = registry.insert("nan0".to_string(), IfaceType::Nan, 10, Priority::Normal);

        let plan = plan_for(&chip, Some(0), &registry, IfaceType::P2p, Priority::Normal).unwrap();
        assert_eq!(plan.evictions, vec![nan]);

        registry.remove(nan);
        registry.insert("p2p0".to_string(), IfaceType::P2p, 10, Priority::Normal);
        assert!(plan_for(&chip, Some(0), &registry, IfaceType::Nan, Priority::Normal).is_err());
    }

    #[test]
    fn test_newest_sta_evicted_for_ap() {
        let chip = dual_sta_chip();
        let mut registry = InterfaceRegistry::new();
        let _first = registry.insert("wlan0".to_string(), IfaceType::Sta, 12, Priority::Normal);
        let second = registry.insert("wlan1".to_string(), IfaceType::Sta, 12, Priority::Normal);

        let plan = plan_for(&chip, Some(5), &registry, IfaceType::Ap, Priority::Normal).unwrap();
        assert!(!plan.mode_switch);
        assert_eq!(plan.evictions, vec![second]);
    }

    #[test]
    fn test_low_priority_never_preempts_normal() {
        let chip = single_sta_chip();
        let mut registry = InterfaceRegistry::new();
        registry.insert("ap0".to_string(), IfaceType::Ap, 10, Priority::Normal);

        assert!(plan_for(&chip, Some(1), &registry, IfaceType::Sta, Priority::Low).is_err());
        assert!(plan_for(&chip, Some(1), &registry, IfaceType::Sta, Priority::Normal).is_ok());
    }

    #[test]
    fn test_normal_request_preempts_low_of_same_type() {
        let chip = single_sta_chip();
        let mut registry = InterfaceRegistry::new();
        let low = registry.insert("wlan1".to_string(), IfaceType::Sta, 10, Priority::Low);

        let plan = plan_for(&chip, Some(0), &registry, IfaceType::Sta, Priority::Normal).unwrap();
        assert_eq!(plan.evictions, vec![low]);
        assert!(plan_for(&chip, Some(0), &registry, IfaceType::Sta, Priority::Low).is_err());
    }

    #[test]
    fn test_existing_requested_type_blocks_evictions() {
        let chip = dual_sta_chip();
        let mut registry = InterfaceRegistry::new();
        registry.insert("wlan0".to_string(), IfaceType::Sta, 12, Priority::Normal);
        registry.insert("p2p0".to_string(), IfaceType::P2p, 12, Priority::Normal);
        registry.insert("ap0".to_string(), IfaceType::Ap, 12, Priority::Normal);

        // a second STA would need the AP's slot, but a STA already exists
        assert!(plan_for(&chip, Some(5), &registry, IfaceType::Sta, Priority::Normal).is_err());
        assert!(plan_for(&chip, Some(5), &registry, IfaceType::Ap, Priority::Normal).is_err());
    }

    // one mode, two combinations: STA + (STA | AP), or STA + (P2P | NAN)
    fn split_combination_chip() -> ChipInfo {
        ChipInfo::new(15).with_mode(
            ChipMode::new(7)
                .with_combination(
                    Combination::new()
                        .limit(1, [IfaceType::Sta])
                        .limit(1, [IfaceType::Sta, IfaceType::Ap]),
                )
                .with_combination(
                    Combination::new()
                        .limit(1, [IfaceType::Sta])
                        .limit(1, [IfaceType::P2p, IfaceType::Nan]),
                ),
        )
    }

    #[test]
    fn test_duplicate_sta_may_make_room_for_nan_and_p2p() {
        let chip = split_combination_chip();
        let mut registry = InterfaceRegistry::new();
        registry.insert("wlan0".to_string(), IfaceType::Sta, 15, Priority::Normal);
        let second = registry.insert("wlan1".to_string(), IfaceType::Sta, 15, Priority::Normal);

        let plan = plan_for(&chip, Some(7), &registry, IfaceType::Nan, Priority::Normal).unwrap();
        assert!(!plan.mode_switch);
        assert_eq!(plan.evictions, vec![second]);

        let plan = plan_for(&chip, Some(7), &registry, IfaceType::P2p, Priority::Normal).unwrap();
        assert_eq!(plan.evictions, vec![second]);

        // a lone STA stays protected from NAN
        registry.remove(second);
        registry.insert("ap0".to_string(), IfaceType::Ap, 15, Priority::Normal);
        let err = plan_for(&chip, Some(7), &registry, IfaceType::Nan, Priority::Normal).unwrap_err();
        assert!(matches!(err, RadioManagerError::NoFeasiblePlan(IfaceType::Nan)));
    }

    #[test]
    fn test_duplicate_rule_does_not_override_priority() {
        let chip = split_combination_chip();
        let mut registry = InterfaceRegistry::new();
        registry.insert("wlan0".to_string(), IfaceType::Sta, 15, Priority::Normal);
        registry.insert("wlan1".to_string(), IfaceType::Sta, 15, Priority::Normal);

        assert!(plan_for(&chip, Some(7), &registry, IfaceType::Nan, Priority::Low).is_err());
    }

    #[test]
    fn test_unsupported_type() {
        let chip = ChipInfo::new(1).with_mode(
            ChipMode::new(0).with_combination(Combination::new().limit(1, [IfaceType::Sta])),
        );
        let registry = InterfaceRegistry::new();
        let err = plan_for(&chip, None, &registry, IfaceType::Nan, Priority::Normal).unwrap_err();
        assert!(matches!(err, RadioManagerError::Unsupported(IfaceType::Nan)));
    }

    #[test]
    fn test_fewest_evictions_then_lowest_chip() {
        let a = ChipInfo::new(3).with_mode(
            ChipMode::new(0).with_combination(Combination::new().limit(1, [IfaceType::Ap])),
        );
        let b = ChipInfo::new(1).with_mode(
            ChipMode::new(0).with_combination(Combination::new().limit(1, [IfaceType::Ap])),
        );
        let mut registry = InterfaceRegistry::new();
        let planner = AllocationPlanner::new(
            [
                ChipView { info: &a, active_mode: Some(0) },
                ChipView { info: &b, active_mode: Some(0) },
            ],
            &registry,
        );
        let plan = planner.plan(&AllocationRequest::new(IfaceType::Ap, Priority::Normal)).unwrap();
        assert_eq!(plan.chip_id, 1);

        registry.insert("ap0".to_string(), IfaceType::Ap, 1, Priority::Normal);
        let planner = AllocationPlanner::new(
            [
                ChipView { info: &a, active_mode: Some(0) },
                ChipView { info: &b, active_mode: Some(0) },
            ],
            &registry,
        );
        let plan = planner.plan(&AllocationRequest::new(IfaceType::Ap, Priority::Normal)).unwrap();
        assert_eq!(plan.chip_id, 3);
    }

    #[test]
    fn test_target_chip_restricts_search() {
        let chip = single_sta_chip();
        let registry = InterfaceRegistry::new();
        let planner = AllocationPlanner::new(
            [ChipView { info: &chip, active_mode: None }],
            &registry,
        );
        let request = AllocationRequest::new(IfaceType::Sta, Priority::Normal).on_chip(99);
        assert!(matches!(planner.plan(&request), Err(RadioManagerError::UnknownChip(99))));
        assert!(planner.plan(&request.on_chip(10)).is_ok());
        assert!(planner.can_allocate(IfaceType::Nan));
    }
}
