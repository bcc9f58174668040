//! Public entry point.
//!
//! [`RadioManager`] is single-threaded: every operation runs on the caller's
//! thread and returns a definite result. Hardware notifications arrive
//! through an unbounded channel and are processed at the start of each
//! public operation, or explicitly through [`RadioManager::dispatch_events`].
//!
//! A caller that wants deaths and failures delivered while it sits idle
//! converts the manager with [`RadioManager::into_shared`]. A task on the
//! given tokio runtime then handles each notification as it arrives.
//!
//! ```
//! use std::sync::Arc;
//! use radio_manager::catalog::{ChipMode, Combination, IfaceType, Priority};
//! use radio_manager::config::ManagerConfig;
//! use radio_manager::listener::CallbackContext;
//! use radio_manager::sim::{SimChip, SimDirectory, SimService};
//! use radio_manager::RadioManager;
//!
//! let config = ManagerConfig::default();
//! let chip = Arc::new(SimChip::new(0, vec![
//!     ChipMode::new(0).with_combination(Combination::new().limit(1, [IfaceType::Sta])),
//! ]));
//! let directory = Arc::new(SimDirectory::new(config.service_name.clone()));
//! directory.register_service(&config.service_instance, Arc::new(SimService::new(vec![chip])));
//!
//! let mut manager = RadioManager::new(directory, config);
//! assert!(manager.initialize());
//! assert!(manager.start());
//!
//! let sta = manager
//!     .create_interface(IfaceType::Sta, Priority::Normal, None, CallbackContext::Inline)
//!     .unwrap();
//! assert_eq!(manager.interface_name(sta).as_deref(), Some("wlan0"));
//! assert!(manager.remove_interface(sta));
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::catalog::{ChipId, IfaceType, Priority};
use crate::config::ManagerConfig;
use crate::coordinator::LifecycleCoordinator;
use crate::dump::ManagerSnapshot;
use crate::error::{RadioManagerError, Result};
use crate::hal::{ManagerEvent, ServiceDirectory};
use crate::listener::{
    CallbackContext, InterfaceAvailableListener, InterfaceDestroyedListener, ManagerStatusListener,
    RttControllerLifecycleListener,
};
use crate::planner::AllocationRequest;
use crate::registry::InterfaceHandle;
use crate::supervisor::{ServiceSupervisor, SupervisorState};

pub struct RadioManager {
    supervisor: ServiceSupervisor,
    coordinator: LifecycleCoordinator,
    events_tx: UnboundedSender<ManagerEvent>,
    /// `None` once an event task owns the receiving side.
    events_rx: Option<UnboundedReceiver<ManagerEvent>>,
}

impl RadioManager {
    pub fn new(directory: Arc<dyn ServiceDirectory>, config: ManagerConfig) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        RadioManager {
            supervisor: ServiceSupervisor::new(directory, config, events_tx.clone()),
            coordinator: LifecycleCoordinator::new(),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Moves the manager behind a mutex and spawns a task on `runtime` that
    /// handles hardware notifications as they arrive.
    ///
    /// Listeners registered with [`CallbackContext::Inline`] are then called
    /// from that task while the manager is locked, so they must not call back
    /// into the manager.
    pub fn into_shared(mut self, runtime: &Handle) -> SharedRadioManager {
        let events = self.events_rx.take();
        let inner = Arc::new(Mutex::new(self));
        let dispatcher = events.map(|rx| runtime.spawn(handle_events(Arc::downgrade(&inner), rx)));
        SharedRadioManager { inner, dispatcher }
    }

    fn handle_event(&mut self, event: ManagerEvent) {
        debug!(?event, "handling hardware event");
        self.supervisor.handle_event(event, &mut self.coordinator);
    }

    /// Sender for injecting hardware notifications, as a service or
    /// directory would.
    pub fn event_sender(&self) -> UnboundedSender<ManagerEvent> {
        self.events_tx.clone()
    }

    /// Processes queued hardware notifications and returns how many there
    /// were.
    pub fn dispatch_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.events_rx.as_mut().and_then(|rx| rx.try_recv().ok()) {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    pub fn initialize(&mut self) -> bool {
        self.dispatch_events();
        self.supervisor.initialize()
    }

    pub fn is_supported(&self) -> bool {
        self.supervisor.is_supported()
    }

    pub fn is_ready(&mut self) -> bool {
        self.dispatch_events();
        self.supervisor.is_ready()
    }

    pub fn is_started(&mut self) -> bool {
        self.dispatch_events();
        self.supervisor.is_started()
    }

    pub fn state(&self) -> SupervisorState {
        self.supervisor.state()
    }

    pub fn start(&mut self) -> bool {
        self.dispatch_events();
        self.supervisor.start(&mut self.coordinator)
    }

    pub fn stop(&mut self) {
        self.dispatch_events();
        self.supervisor.stop(&mut self.coordinator);
    }

    /// Creates an interface anywhere it fits. `None` on any failure.
    pub fn create_interface(
        &mut self,
        iface_type: IfaceType,
        priority: Priority,
        destroyed_listener: Option<Arc<dyn InterfaceDestroyedListener>>,
        context: CallbackContext,
    ) -> Option<InterfaceHandle> {
        let request = AllocationRequest::new(iface_type, priority);
        self.try_create_interface(&request, destroyed_listener, context)
            .ok()
    }

    /// Like [`create_interface`](Self::create_interface), restricted to one
    /// chip.
    pub fn create_interface_on(
        &mut self,
        chip_id: ChipId,
        iface_type: IfaceType,
        priority: Priority,
        destroyed_listener: Option<Arc<dyn InterfaceDestroyedListener>>,
        context: CallbackContext,
    ) -> Option<InterfaceHandle> {
        let request = AllocationRequest::new(iface_type, priority).on_chip(chip_id);
        self.try_create_interface(&request, destroyed_listener, context)
            .ok()
    }

    /// Creates an interface and reports why it could not be.
    pub fn try_create_interface(
        &mut self,
        request: &AllocationRequest,
        destroyed_listener: Option<Arc<dyn InterfaceDestroyedListener>>,
        context: CallbackContext,
    ) -> Result<InterfaceHandle> {
        self.dispatch_events();
        if !self.supervisor.is_started() {
            debug!(iface_type = %request.iface_type, "create requested while not started");
            return Err(RadioManagerError::NotStarted);
        }

        let listener = destroyed_listener.map(|l| (l, context));
        let result = self.coordinator.create(request, listener);
        if let Err(e) = &result {
            if e.is_desync() {
                error!(error = %e, "interface registry out of sync with hardware");
                self.supervisor.force_stop(&mut self.coordinator);
            }
        }
        result
    }

    /// Returns true if the interface was destroyed (or was already gone from
    /// the hardware), false for an unknown handle or a hardware failure.
    pub fn remove_interface(&mut self, handle: InterfaceHandle) -> bool {
        self.dispatch_events();
        self.coordinator.remove(handle)
    }

    pub fn register_status_listener(
        &mut self,
        listener: Arc<dyn ManagerStatusListener>,
        context: CallbackContext,
    ) -> bool {
        self.dispatch_events();
        self.supervisor.register_status_listener(listener, context)
    }

    pub fn register_interface_available_listener(
        &mut self,
        iface_type: IfaceType,
        listener: Arc<dyn InterfaceAvailableListener>,
        context: CallbackContext,
    ) -> bool {
        self.dispatch_events();
        self.coordinator
            .register_available_listener(iface_type, listener, context)
    }

    pub fn register_destroyed_listener(
        &mut self,
        handle: InterfaceHandle,
        listener: Arc<dyn InterfaceDestroyedListener>,
        context: CallbackContext,
    ) -> bool {
        self.dispatch_events();
        self.coordinator
            .register_destroyed_listener(handle, listener, context)
    }

    pub fn register_rtt_controller_lifecycle_listener(
        &mut self,
        listener: Arc<dyn RttControllerLifecycleListener>,
        context: CallbackContext,
    ) -> bool {
        self.dispatch_events();
        self.coordinator.register_rtt_listener(listener, context)
    }

    /// Union over all discovered chips. Empty until started.
    pub fn supported_iface_types(&mut self) -> BTreeSet<IfaceType> {
        self.dispatch_events();
        self.coordinator.supported_types()
    }

    pub fn supported_iface_types_for(&mut self, chip_id: ChipId) -> Option<BTreeSet<IfaceType>> {
        self.dispatch_events();
        self.coordinator.supported_types_for(chip_id)
    }

    pub fn interface_name(&self, handle: InterfaceHandle) -> Option<String> {
        self.coordinator
            .registry()
            .get(handle)
            .map(|entry| entry.name.clone())
    }

    pub fn interface_type(&self, handle: InterfaceHandle) -> Option<IfaceType> {
        self.coordinator
            .registry()
            .get(handle)
            .map(|entry| entry.iface_type)
    }

    pub fn find_interface(&self, name: &str) -> Option<InterfaceHandle> {
        self.coordinator
            .registry()
            .find_by_name(name)
            .map(|entry| entry.handle)
    }

    pub fn interface_count(&self) -> usize {
        self.coordinator.registry().len()
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot::capture(&self.supervisor, &self.coordinator)
    }

    pub fn dump(&self) -> String {
        self.snapshot().to_string()
    }
}

/// A [`RadioManager`] whose hardware notifications are handled by a
/// background task instead of on the next call.
pub struct SharedRadioManager {
    inner: Arc<Mutex<RadioManager>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl SharedRadioManager {
    pub fn lock(&self) -> MutexGuard<'_, RadioManager> {
        lock_manager(&self.inner)
    }
}

impl Drop for SharedRadioManager {
    fn drop(&mut self) {
        if let Some(task) = self.dispatcher.take() {
            task.abort();
        }
    }
}

fn lock_manager(manager: &Mutex<RadioManager>) -> MutexGuard<'_, RadioManager> {
    manager.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn handle_shared(manager: &Mutex<RadioManager>, event: ManagerEvent) {
    lock_manager(manager).handle_event(event);
}

async fn handle_events(manager: Weak<Mutex<RadioManager>>, mut events: UnboundedReceiver<ManagerEvent>) {
    while let Some(event) = events.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        handle_shared(&manager, event);
    }
    debug!("hardware event task finished");
}
