//! In-memory hardware for demos and tests.
//!
//! [`SimChip`] enforces its own mode capacities, so a manager bug that
//! overcommits a chip shows up as a hardware error rather than silently.
//! Every simulated object records its calls and can be scripted to fail.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::catalog::{ChipId, ChipMode, IfaceType, ModeId, TypeCounts};
use crate::error::{HalError, HalResult};
use crate::hal::{EventLink, RadioChip, RadioService, RttControllerHandle, ServiceDirectory};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn name_prefix(iface_type: IfaceType) -> &'static str {
    match iface_type {
        IfaceType::Sta => "wlan",
        IfaceType::Ap => "ap",
        IfaceType::P2p => "p2p",
        IfaceType::Nan => "nan",
    }
}

#[derive(Default)]
struct ChipState {
    mode: Option<ModeId>,
    interfaces: Vec<(IfaceType, String)>,
    calls: Vec<String>,
    fail_configure: Option<HalError>,
    fail_create: Option<HalError>,
    fail_remove: Option<HalError>,
    rtt_unavailable: bool,
    next_rtt: u64,
}

impl ChipState {
    fn counts(&self) -> TypeCounts {
        let mut counts = TypeCounts::default();
        for (iface_type, _) in &self.interfaces {
            counts.increment(*iface_type);
        }
        counts
    }

    fn free_name(&self, iface_type: IfaceType) -> String {
        let prefix = name_prefix(iface_type);
        let mut index = 0;
        loop {
            let candidate = format!("{prefix}{index}");
            if !self.interfaces.iter().any(|(_, name)| *name == candidate) {
                return candidate;
            }
            index += 1;
        }
    }
}

pub struct SimChip {
    id: ChipId,
    modes: Vec<ChipMode>,
    state: Mutex<ChipState>,
}

impl SimChip {
    /// A chip with no mode configured.
    pub fn new(id: ChipId, modes: Vec<ChipMode>) -> Self {
        SimChip {
            id,
            modes,
            state: Mutex::new(ChipState::default()),
        }
    }

    /// Every mutating call made so far, e.g. `"configure 1"` or
    /// `"create STA wlan0"`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    pub fn current_mode(&self) -> Option<ModeId> {
        lock(&self.state).mode
    }

    pub fn interface_count(&self) -> usize {
        lock(&self.state).interfaces.len()
    }

    pub fn occupancy(&self) -> TypeCounts {
        lock(&self.state).counts()
    }

    /// Drops an interface behind the manager's back.
    pub fn forget_interface(&self, name: &str) {
        lock(&self.state).interfaces.retain(|(_, n)| n != name);
    }

    pub fn fail_next_configure(&self, error: HalError) {
        lock(&self.state).fail_configure = Some(error);
    }

    pub fn fail_next_create(&self, error: HalError) {
        lock(&self.state).fail_create = Some(error);
    }

    pub fn fail_next_remove(&self, error: HalError) {
        lock(&self.state).fail_remove = Some(error);
    }

    pub fn set_rtt_unavailable(&self, unavailable: bool) {
        lock(&self.state).rtt_unavailable = unavailable;
    }

    /// What a service stop or crash does to the chip.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.mode = None;
        state.interfaces.clear();
    }

    fn active_mode(&self, state: &ChipState) -> Option<&ChipMode> {
        state
            .mode
            .and_then(|id| self.modes.iter().find(|m| m.id == id))
    }
}

impl RadioChip for SimChip {
    fn id(&self) -> ChipId {
        self.id
    }

    fn available_modes(&self) -> HalResult<Vec<ChipMode>> {
        Ok(self.modes.clone())
    }

    fn mode(&self) -> HalResult<Option<ModeId>> {
        Ok(lock(&self.state).mode)
    }

    fn configure(&self, mode: ModeId) -> HalResult<()> {
        let mut state = lock(&self.state);
        state.calls.push(format!("configure {mode}"));
        if let Some(error) = state.fail_configure.take() {
            state.mode = None;
            state.interfaces.clear();
            return Err(error);
        }
        if !self.modes.iter().any(|m| m.id == mode) {
            return Err(HalError::InvalidArgs(format!("mode {mode}")));
        }
        if state.mode != Some(mode) {
            state.interfaces.clear();
            state.mode = Some(mode);
        }
        Ok(())
    }

    fn create_interface(&self, iface_type: IfaceType) -> HalResult<String> {
        let mut state = lock(&self.state);
        if let Some(error) = state.fail_create.take() {
            state.calls.push(format!("create {iface_type} failed"));
            return Err(error);
        }
        let mut wanted = state.counts();
        wanted.increment(iface_type);
        let fits = self
            .active_mode(&state)
            .is_some_and(|mode| mode.can_host(&wanted));
        if !fits {
            state.calls.push(format!("create {iface_type} rejected"));
            return Err(HalError::Busy);
        }
        let name = state.free_name(iface_type);
        state.calls.push(format!("create {iface_type} {name}"));
        state.interfaces.push((iface_type, name.clone()));
        debug!(chip = self.id, %name, "sim interface created");
        Ok(name)
    }

    fn remove_interface(&self, iface_type: IfaceType, name: &str) -> HalResult<()> {
        let mut state = lock(&self.state);
        state.calls.push(format!("remove {iface_type} {name}"));
        if let Some(error) = state.fail_remove.take() {
            return Err(error);
        }
        let before = state.interfaces.len();
        state
            .interfaces
            .retain(|(t, n)| !(*t == iface_type && n == name));
        if state.interfaces.len() == before {
            return Err(HalError::NotExists(name.to_string()));
        }
        Ok(())
    }

    fn interface_names(&self, iface_type: IfaceType) -> HalResult<Vec<String>> {
        Ok(lock(&self.state)
            .interfaces
            .iter()
            .filter(|(t, _)| *t == iface_type)
            .map(|(_, n)| n.clone())
            .collect())
    }

    fn create_rtt_controller(&self) -> HalResult<RttControllerHandle> {
        let mut state = lock(&self.state);
        let capable = !state.rtt_unavailable && self.active_mode(&state).is_some_and(|m| m.rtt_capable);
        if !capable {
            return Err(HalError::NotSupported);
        }
        state.next_rtt += 1;
        let handle = RttControllerHandle(u64::from(self.id) * 1000 + state.next_rtt);
        state.calls.push(format!("rtt {}", handle.0));
        Ok(handle)
    }
}

#[derive(Default)]
struct ServiceState {
    started: bool,
    start_script: VecDeque<HalResult<()>>,
    start_calls: usize,
    stop_calls: usize,
    event_links: Vec<EventLink>,
    death_links: Vec<EventLink>,
}

pub struct SimService {
    chips: Vec<Arc<SimChip>>,
    state: Mutex<ServiceState>,
}

impl SimService {
    pub fn new(chips: Vec<Arc<SimChip>>) -> Self {
        SimService {
            chips,
            state: Mutex::new(ServiceState::default()),
        }
    }

    /// Results for the next `start` calls. Once the script runs out, starts
    /// succeed.
    pub fn script_start(&self, results: impl IntoIterator<Item = HalResult<()>>) {
        lock(&self.state).start_script.extend(results);
    }

    pub fn start_calls(&self) -> usize {
        lock(&self.state).start_calls
    }

    pub fn stop_calls(&self) -> usize {
        lock(&self.state).stop_calls
    }

    /// Crashes the service: chips reset and death links fire.
    pub fn kill(&self) {
        let links = {
            let mut state = lock(&self.state);
            state.started = false;
            std::mem::take(&mut state.death_links)
        };
        self.reset_chips();
        for link in links {
            link.service_died();
        }
    }

    /// Reports an asynchronous failure; the chips lose their state.
    pub fn report_failure(&self, error: HalError) {
        let links = lock(&self.state).event_links.clone();
        self.reset_chips();
        for link in links {
            link.service_failure(error.clone());
        }
    }

    fn reset_chips(&self) {
        for chip in &self.chips {
            chip.reset();
        }
    }
}

impl RadioService for SimService {
    fn start(&self) -> HalResult<()> {
        let links = {
            let mut state = lock(&self.state);
            state.start_calls += 1;
            state.start_script.pop_front().unwrap_or(Ok(()))?;
            state.started = true;
            state.event_links.clone()
        };
        for link in links {
            link.service_started();
        }
        Ok(())
    }

    fn stop(&self) -> HalResult<()> {
        let links = {
            let mut state = lock(&self.state);
            state.stop_calls += 1;
            state.started = false;
            state.event_links.clone()
        };
        self.reset_chips();
        for link in links {
            link.service_stopped();
        }
        Ok(())
    }

    fn is_started(&self) -> bool {
        lock(&self.state).started
    }

    fn chip_ids(&self) -> HalResult<Vec<ChipId>> {
        if !self.is_started() {
            return Err(HalError::NotStarted);
        }
        Ok(self.chips.iter().map(|c| c.id()).collect())
    }

    fn chip(&self, id: ChipId) -> HalResult<Arc<dyn RadioChip>> {
        if !self.is_started() {
            return Err(HalError::NotStarted);
        }
        self.chips
            .iter()
            .find(|c| c.id() == id)
            .map(|c| Arc::clone(c) as Arc<dyn RadioChip>)
            .ok_or_else(|| HalError::NotExists(format!("chip {id}")))
    }

    fn register_event_callback(&self, link: EventLink) -> HalResult<()> {
        lock(&self.state).event_links.push(link);
        Ok(())
    }

    fn link_to_death(&self, link: EventLink) -> HalResult<()> {
        lock(&self.state).death_links.push(link);
        Ok(())
    }
}

#[derive(Default)]
struct DirectoryState {
    declared: Vec<String>,
    services: Vec<(String, Arc<dyn RadioService>)>,
    watchers: Vec<(String, EventLink)>,
    death_links: Vec<EventLink>,
}

/// Service directory hosting at most one service per instance name of a
/// single interface.
pub struct SimDirectory {
    interface: String,
    state: Mutex<DirectoryState>,
}

impl SimDirectory {
    pub fn new(interface: impl Into<String>) -> Self {
        SimDirectory {
            interface: interface.into(),
            state: Mutex::new(DirectoryState::default()),
        }
    }

    /// Lists `instance` in the manifest without running anything.
    pub fn declare(&self, instance: &str) {
        let mut state = lock(&self.state);
        if !state.declared.iter().any(|i| i == instance) {
            state.declared.push(instance.to_string());
        }
    }

    /// Declares and (re)registers a running service, notifying watchers.
    pub fn register_service(&self, instance: &str, service: Arc<dyn RadioService>) {
        self.declare(instance);
        let watchers: Vec<EventLink> = {
            let mut state = lock(&self.state);
            state.services.retain(|(i, _)| i != instance);
            state.services.push((instance.to_string(), service));
            state
                .watchers
                .iter()
                .filter(|(i, _)| i == instance)
                .map(|(_, link)| link.clone())
                .collect()
        };
        for link in watchers {
            link.service_registered(&self.interface, instance, false);
        }
    }

    pub fn unregister_service(&self, instance: &str) {
        lock(&self.state).services.retain(|(i, _)| i != instance);
    }

    /// Crashes the directory itself.
    pub fn kill(&self) {
        let links = std::mem::take(&mut lock(&self.state).death_links);
        for link in links {
            link.directory_died();
        }
    }
}

impl ServiceDirectory for SimDirectory {
    fn list_manifest_by_interface(&self, interface: &str) -> HalResult<Vec<String>> {
        if interface != self.interface {
            return Ok(Vec::new());
        }
        Ok(lock(&self.state).declared.clone())
    }

    fn register_for_notifications(&self, interface: &str, instance: &str, link: EventLink) -> HalResult<()> {
        if interface != self.interface {
            return Err(HalError::InvalidArgs(interface.to_string()));
        }
        let running = {
            let mut state = lock(&self.state);
            state.watchers.push((instance.to_string(), link.clone()));
            state.services.iter().any(|(i, _)| i == instance)
        };
        if running {
            link.service_registered(interface, instance, true);
        }
        Ok(())
    }

    fn link_to_death(&self, link: EventLink) -> HalResult<()> {
        lock(&self.state).death_links.push(link);
        Ok(())
    }

    fn get_service(&self, interface: &str, instance: &str) -> HalResult<Option<Arc<dyn RadioService>>> {
        if interface != self.interface {
            return Ok(None);
        }
        Ok(lock(&self.state)
            .services
            .iter()
            .find(|(i, _)| i == instance)
            .map(|(_, service)| Arc::clone(service)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Combination;
    use crate::hal::ManagerEvent;
    use tokio::sync::mpsc::unbounded_channel;

    fn sta_ap_chip() -> SimChip {
        SimChip::new(
            0,
            vec![
                ChipMode::new(0).with_combination(Combination::new().limit(1, [IfaceType::Sta])),
                ChipMode::new(1)
                    .with_combination(Combination::new().limit(1, [IfaceType::Ap]))
                    .without_rtt(),
            ],
        )
    }

    #[test]
    fn test_chip_enforces_capacity() {
        let chip = sta_ap_chip();
        assert_eq!(chip.create_interface(IfaceType::Sta), Err(HalError::Busy));

        chip.configure(0).unwrap();
        assert_eq!(chip.create_interface(IfaceType::Sta).unwrap(), "wlan0");
        assert_eq!(chip.create_interface(IfaceType::Sta), Err(HalError::Busy));
    }

    #[test]
    fn test_mode_change_drops_interfaces() {
        let chip = sta_ap_chip();
        chip.configure(0).unwrap();
        chip.create_interface(IfaceType::Sta).unwrap();
        chip.configure(1).unwrap();

        assert_eq!(chip.interface_count(), 0);
        assert_eq!(
            chip.remove_interface(IfaceType::Sta, "wlan0"),
            Err(HalError::NotExists("wlan0".to_string()))
        );
        assert!(chip.create_rtt_controller().is_err());
    }

    #[test]
    fn test_names_reuse_lowest_free_index() {
        let chip = SimChip::new(
            0,
            vec![ChipMode::new(0).with_combination(Combination::new().limit(3, [IfaceType::Sta]))],
        );
        chip.configure(0).unwrap();
        chip.create_interface(IfaceType::Sta).unwrap();
        chip.create_interface(IfaceType::Sta).unwrap();
        chip.remove_interface(IfaceType::Sta, "wlan0").unwrap();
        assert_eq!(chip.create_interface(IfaceType::Sta).unwrap(), "wlan0");
    }

    #[test]
    fn test_scripted_start_and_kill() {
        let service = SimService::new(vec![Arc::new(sta_ap_chip())]);
        let (tx, mut rx) = unbounded_channel();
        service.link_to_death(EventLink::new(tx, 9)).unwrap();
        service.script_start([Err(HalError::NotAvailable)]);

        assert_eq!(service.start(), Err(HalError::NotAvailable));
        assert!(service.chip_ids().is_err());
        assert!(service.start().is_ok());
        assert_eq!(service.chip_ids().unwrap(), vec![0]);
        assert_eq!(service.start_calls(), 2);

        service.kill();
        assert!(!service.is_started());
        assert_eq!(rx.try_recv().unwrap(), ManagerEvent::ServiceDied { generation: 9 });
    }

    #[test]
    fn test_directory_announces_running_service() {
        let directory = SimDirectory::new("radio");
        let (tx, mut rx) = unbounded_channel();
        directory
            .register_for_notifications("radio", "default", EventLink::new(tx, 0))
            .unwrap();
        assert!(rx.try_recv().is_err());

        directory.register_service("default", Arc::new(SimService::new(Vec::new())));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ManagerEvent::ServiceRegistered { preexisting: false, .. }
        ));
        assert_eq!(directory.list_manifest_by_interface("radio").unwrap(), vec!["default"]);
        assert!(directory.get_service("radio", "default").unwrap().is_some());
    }
}
