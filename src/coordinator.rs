//! Executes allocation plans against the chips and keeps the bookkeeping
//! (registry, availability, RTT) consistent with what the hardware holds.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::availability::AvailabilityNotifier;
use crate::catalog::{ChipId, ChipInfo, ChipModeCatalog, IfaceType, ModeId};
use crate::error::{RadioManagerError, Result};
use crate::hal::{RadioChip, RadioService, RttControllerHandle};
use crate::listener::{
    CallbackContext, InterfaceAvailableListener, InterfaceDestroyedListener, RttControllerLifecycleListener,
};
use crate::planner::{AllocationPlan, AllocationPlanner, AllocationRequest, ChipView};
use crate::registry::{InterfaceEntry, InterfaceHandle, InterfaceRegistry};
use crate::rtt::RttControllerLifecycleManager;

/// A discovered chip's hardware handle and the mode last seen configured on
/// it. What the chip can host lives in the coordinator's catalog.
pub struct ChipSlot {
    pub id: ChipId,
    pub hw: Arc<dyn RadioChip>,
    pub active_mode: Option<ModeId>,
}

fn chip_views<'a>(
    catalog: &'a ChipModeCatalog,
    chips: &'a BTreeMap<ChipId, ChipSlot>,
) -> impl Iterator<Item = ChipView<'a>> + 'a {
    catalog.chips().map(move |info| ChipView {
        info,
        active_mode: chips.get(&info.id).and_then(|slot| slot.active_mode),
    })
}

#[derive(Default)]
pub struct LifecycleCoordinator {
    catalog: ChipModeCatalog,
    chips: BTreeMap<ChipId, ChipSlot>,
    registry: InterfaceRegistry,
    availability: AvailabilityNotifier,
    rtt: RttControllerLifecycleManager,
}

impl LifecycleCoordinator {
    pub fn new() -> Self {
        LifecycleCoordinator::default()
    }

    /// Fetches every chip and its modes from a started service.
    pub fn discover(&mut self, service: &dyn RadioService) -> Result<()> {
        let ids = service
            .chip_ids()
            .map_err(|e| RadioManagerError::hardware("chip_ids", e))?;
        let mut infos = Vec::new();
        let mut chips = BTreeMap::new();
        for id in ids {
            let hw = service
                .chip(id)
                .map_err(|e| RadioManagerError::hardware("chip", e))?;
            let modes = hw
                .available_modes()
                .map_err(|e| RadioManagerError::hardware("available_modes", e))?;
            let active_mode = hw
                .mode()
                .map_err(|e| RadioManagerError::hardware("mode", e))?;
            debug!(chip = id, modes = modes.len(), ?active_mode, "discovered chip");
            infos.push(ChipInfo { id, modes });
            chips.insert(id, ChipSlot { id, hw, active_mode });
        }
        info!(chips = chips.len(), "chip discovery complete");
        self.catalog = ChipModeCatalog::new(infos);
        self.chips = chips;
        Ok(())
    }

    /// Modes and combinations of the discovered chips. Empty until
    /// discovery and again after teardown.
    pub fn catalog(&self) -> &ChipModeCatalog {
        &self.catalog
    }

    pub fn chips(&self) -> impl Iterator<Item = &ChipSlot> {
        self.chips.values()
    }

    pub fn active_mode(&self, chip_id: ChipId) -> Option<ModeId> {
        self.chips.get(&chip_id).and_then(|slot| slot.active_mode)
    }

    pub fn registry(&self) -> &InterfaceRegistry {
        &self.registry
    }

    pub fn rtt_controller(&self) -> Option<RttControllerHandle> {
        self.rtt.controller()
    }

    pub fn supported_types(&self) -> BTreeSet<IfaceType> {
        self.catalog.supported_types()
    }

    pub fn supported_types_for(&self, chip_id: ChipId) -> Option<BTreeSet<IfaceType>> {
        self.catalog.supported_types_for(chip_id)
    }

    fn planner(&self) -> AllocationPlanner<'_> {
        AllocationPlanner::new(chip_views(&self.catalog, &self.chips), &self.registry)
    }

    pub fn can_allocate(&self, iface_type: IfaceType) -> bool {
        self.planner().can_allocate(iface_type)
    }

    /// Creates an interface, evicting and reconfiguring as the chosen plan
    /// requires. Listeners are notified whatever the outcome, except on a
    /// desync, after which the caller is expected to tear everything down.
    pub fn create(
        &mut self,
        request: &AllocationRequest,
        listener: Option<(Arc<dyn InterfaceDestroyedListener>, CallbackContext)>,
    ) -> Result<InterfaceHandle> {
        let result = self.allocate(request, listener);
        if result.as_ref().is_err_and(RadioManagerError::is_desync) {
            return result;
        }
        match &result {
            Ok(handle) => debug!(%handle, iface_type = %request.iface_type, "interface created"),
            Err(e) => warn!(iface_type = %request.iface_type, error = %e, "interface creation failed"),
        }
        self.after_mutation();
        result
    }

    fn allocate(
        &mut self,
        request: &AllocationRequest,
        listener: Option<(Arc<dyn InterfaceDestroyedListener>, CallbackContext)>,
    ) -> Result<InterfaceHandle> {
        self.refresh_modes()?;
        self.check_sync()?;

        let plan = self.planner().plan(request)?;
        info!(
            chip = plan.chip_id,
            mode = plan.mode_id,
            mode_switch = plan.mode_switch,
            evictions = plan.evictions.len(),
            iface_type = %request.iface_type,
            priority = %request.priority,
            "executing allocation plan"
        );
        self.execute(&plan, request, listener)
    }

    fn execute(
        &mut self,
        plan: &AllocationPlan,
        request: &AllocationRequest,
        listener: Option<(Arc<dyn InterfaceDestroyedListener>, CallbackContext)>,
    ) -> Result<InterfaceHandle> {
        if plan.mode_switch && self.rtt.controller_chip() == Some(plan.chip_id) {
            self.rtt.destroy();
        }

        for handle in &plan.evictions {
            self.evict(*handle)?;
        }

        let slot = self
            .chips
            .get_mut(&plan.chip_id)
            .ok_or(RadioManagerError::UnknownChip(plan.chip_id))?;

        if plan.mode_switch {
            if let Err(e) = slot.hw.configure(plan.mode_id) {
                slot.active_mode = None;
                return Err(RadioManagerError::hardware("configure", e));
            }
            slot.active_mode = Some(plan.mode_id);
        }

        let name = slot
            .hw
            .create_interface(request.iface_type)
            .map_err(|e| RadioManagerError::hardware("create_interface", e))?;

        let handle = self
            .registry
            .insert(name, request.iface_type, plan.chip_id, request.priority);
        if let (Some((listener, context)), Some(entry)) = (listener, self.registry.get_mut(handle)) {
            entry.add_destroyed_listener(listener, context);
        }
        Ok(handle)
    }

    /// Destroys one interface. The entry leaves the registry and its
    /// listeners hear about it even if the hardware call fails.
    fn evict(&mut self, handle: InterfaceHandle) -> Result<()> {
        let Some(entry) = self.registry.remove(handle) else {
            return Ok(());
        };
        let result = self.remove_from_hardware(&entry);
        info!(name = %entry.name, iface_type = %entry.iface_type, chip = entry.chip_id, "interface destroyed");
        entry.deliver_destroyed();
        result
    }

    fn remove_from_hardware(&self, entry: &InterfaceEntry) -> Result<()> {
        let Some(slot) = self.chips.get(&entry.chip_id) else {
            return Ok(());
        };
        match slot.hw.remove_interface(entry.iface_type, &entry.name) {
            Ok(()) => Ok(()),
            Err(e) if e.is_absent() => {
                debug!(name = %entry.name, "interface already gone from hardware");
                Ok(())
            }
            Err(e) => Err(RadioManagerError::hardware("remove_interface", e)),
        }
    }

    /// Returns false for an unknown handle or a hardware failure.
    pub fn remove(&mut self, handle: InterfaceHandle) -> bool {
        if self.registry.get(handle).is_none() {
            debug!(%handle, "remove of unknown interface");
            return false;
        }
        let result = self.evict(handle);
        if let Err(e) = &result {
            warn!(%handle, error = %e, "interface removal failed");
        }
        self.after_mutation();
        result.is_ok()
    }

    fn refresh_modes(&mut self) -> Result<()> {
        for slot in self.chips.values_mut() {
            slot.active_mode = slot
                .hw
                .mode()
                .map_err(|e| RadioManagerError::hardware("mode", e))?;
        }
        Ok(())
    }

    /// Verifies that every registered interface is still known to its chip.
    pub fn check_sync(&self) -> Result<()> {
        let mut listed: BTreeMap<(ChipId, IfaceType), Vec<String>> = BTreeMap::new();
        for entry in self.registry.iter() {
            let desync = || RadioManagerError::Desync {
                chip: entry.chip_id,
                iface_type: entry.iface_type,
                name: entry.name.clone(),
            };
            let Some(slot) = self.chips.get(&entry.chip_id) else {
                return Err(desync());
            };
            let key = (entry.chip_id, entry.iface_type);
            if !listed.contains_key(&key) {
                let names = slot
                    .hw
                    .interface_names(entry.iface_type)
                    .map_err(|e| RadioManagerError::hardware("interface_names", e))?;
                listed.insert(key, names);
            }
            if !listed.get(&key).is_some_and(|names| names.contains(&entry.name)) {
                return Err(desync());
            }
        }
        Ok(())
    }

    /// Forgets all hardware state. Every live interface is reported
    /// destroyed, oldest first, after the RTT controller.
    pub fn teardown(&mut self) {
        self.rtt.destroy();
        let entries = self.registry.drain();
        if !entries.is_empty() {
            info!(count = entries.len(), "tearing down interfaces");
        }
        for entry in entries {
            entry.deliver_destroyed();
        }
        self.chips.clear();
        self.catalog = ChipModeCatalog::default();
        self.availability.refresh(|_| false);
    }

    /// Re-evaluates availability and the RTT controller.
    pub fn after_mutation(&mut self) {
        self.refresh_availability();
        self.ensure_rtt();
    }

    pub fn refresh_availability(&mut self) {
        let planner = AllocationPlanner::new(chip_views(&self.catalog, &self.chips), &self.registry);
        self.availability.refresh(|iface_type| planner.can_allocate(iface_type));
    }

    fn ensure_rtt(&mut self) {
        if !self.rtt.needs_controller() {
            return;
        }
        for slot in self.chips.values() {
            let rtt_capable = slot
                .active_mode
                .and_then(|mode| self.catalog.mode(slot.id, mode))
                .is_some_and(|mode| mode.rtt_capable);
            if !rtt_capable {
                continue;
            }
            match slot.hw.create_rtt_controller() {
                Ok(handle) => {
                    self.rtt.install(slot.id, handle);
                    return;
                }
                Err(e) => debug!(chip = slot.id, error = %e, "RTT controller creation failed"),
            }
        }
    }

    pub fn register_available_listener(
        &mut self,
        iface_type: IfaceType,
        listener: Arc<dyn InterfaceAvailableListener>,
        context: CallbackContext,
    ) -> bool {
        let available_now = self.can_allocate(iface_type);
        self.availability
            .register(iface_type, listener, context, available_now)
    }

    pub fn register_rtt_listener(
        &mut self,
        listener: Arc<dyn RttControllerLifecycleListener>,
        context: CallbackContext,
    ) -> bool {
        let added = self.rtt.register(listener, context);
        self.ensure_rtt();
        added
    }

    /// Returns false if the interface is unknown or the pair is a duplicate.
    pub fn register_destroyed_listener(
        &mut self,
        handle: InterfaceHandle,
        listener: Arc<dyn InterfaceDestroyedListener>,
        context: CallbackContext,
    ) -> bool {
        self.registry
            .get_mut(handle)
            .is_some_and(|entry| entry.add_destroyed_listener(listener, context))
    }
}
